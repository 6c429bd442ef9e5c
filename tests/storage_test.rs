//! Storage Integration Tests
//!
//! Settings, history and saved chats in an on-disk database, across reopen.

use std::sync::Arc;
use tempfile::TempDir;
use yappari::{
    Database, Defaults, Forgotten, HistoryStore, SettingKey, SettingsStore, SnapshotMatch,
    SnapshotStore, Turn,
};

fn open(dir: &TempDir) -> Arc<Database> {
    Arc::new(Database::open(&dir.path().join("data").join("userdata.db")).expect("Failed to open db"))
}

fn conversation(topic: &str) -> Vec<Turn> {
    vec![
        Turn::system("You are a helpful assistant"),
        Turn::user(format!("Tell me about {}", topic)),
        Turn::assistant(format!("{} is great.", topic)),
    ]
}

#[test]
fn test_everything_survives_reopen() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    {
        let db = open(&dir);
        db.init_user(1).unwrap();
        SettingsStore::new(db.clone())
            .set(1, SettingKey::Model, "gpt-4o")
            .unwrap();
        let history = HistoryStore::new(db.clone());
        history.replace(1, &conversation("Rust")).unwrap();
        SnapshotStore::new(db.clone()).save(1, "rust").unwrap();
        history.replace(1, &conversation("Go")).unwrap();
    }

    let db = open(&dir);
    let settings = SettingsStore::new(db.clone())
        .load_effective(1, &Defaults::default())
        .unwrap();
    assert_eq!(settings.model, "gpt-4o");
    assert_eq!(settings.prompt, "You are a helpful assistant");
    assert_eq!(HistoryStore::new(db.clone()).get(1).unwrap(), conversation("Go"));
    assert_eq!(SnapshotStore::new(db).list(1).unwrap(), vec!["rust".to_string()]);
}

#[test]
fn test_snapshot_lifecycle() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let db = open(&dir);
    db.init_user(1).unwrap();
    let history = HistoryStore::new(db.clone());
    let snapshots = SnapshotStore::new(db.clone());

    for topic in ["work notes", "work plans", "holiday"] {
        history.replace(1, &conversation(topic)).unwrap();
        snapshots.save(1, topic).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    assert_eq!(
        snapshots.list(1).unwrap(),
        vec!["work notes".to_string(), "work plans".to_string(), "holiday".to_string()]
    );

    // "work" is ambiguous and nothing changes
    let outcome = snapshots.load(1, "work").unwrap();
    assert_eq!(
        outcome,
        SnapshotMatch::Ambiguous(vec!["work notes".to_string(), "work plans".to_string()])
    );
    assert!(history.get(1).unwrap().is_empty());

    assert_eq!(
        snapshots.forget(1, "plans").unwrap(),
        SnapshotMatch::Found(Forgotten::Snapshot("work plans".to_string()))
    );
    assert_eq!(
        snapshots.load(1, "work").unwrap(),
        SnapshotMatch::Found("work notes".to_string())
    );
    assert_eq!(history.get(1).unwrap(), conversation("work notes"));

    assert_eq!(snapshots.load(1, "nope").unwrap(), SnapshotMatch::NotFound);

    assert!(matches!(
        snapshots.forget(1, "all").unwrap(),
        SnapshotMatch::Found(Forgotten::All { snapshots: 1 })
    ));
    assert!(snapshots.list(1).unwrap().is_empty());
    assert!(history.get(1).unwrap().is_empty());
}

#[test]
fn test_snapshots_are_per_user() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let db = open(&dir);
    db.init_user(1).unwrap();
    db.init_user(2).unwrap();
    let history = HistoryStore::new(db.clone());
    let snapshots = SnapshotStore::new(db);

    history.replace(1, &conversation("secrets")).unwrap();
    snapshots.save(1, "private").unwrap();

    assert!(snapshots.list(2).unwrap().is_empty());
    assert_eq!(snapshots.load(2, "private").unwrap(), SnapshotMatch::NotFound);
    assert_eq!(snapshots.forget(2, "all").unwrap(), SnapshotMatch::Found(Forgotten::All { snapshots: 0 }));
    assert_eq!(snapshots.list(1).unwrap(), vec!["private".to_string()]);
}
