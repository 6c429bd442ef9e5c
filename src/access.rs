//! Who may talk to the bot
//!
//! The owner always may. Everyone else is listed by username, one per line, in a plain
//! text file that is read once at startup and rewritten on every change.

use crate::error::Result;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{info, warn};

/// Result of an allow/disallow request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessUpdate {
    Changed,
    Unchanged,
    /// Empty name, or the owner
    Invalid,
}

pub struct AccessList {
    owner: String,
    path: PathBuf,
    users: RwLock<Vec<String>>,
}

/// Lower-cased username without a leading `@`
pub fn normalize_username(name: &str) -> String {
    name.trim().trim_start_matches('@').to_lowercase()
}

impl AccessList {
    /// Load the list, creating an empty file when there is none
    pub fn load(owner: &str, path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let owner = normalize_username(owner);

        let users = match std::fs::read_to_string(path) {
            Ok(text) => {
                let mut users: Vec<String> = Vec::new();
                for name in text.lines().map(normalize_username) {
                    if !name.is_empty() && name != owner && !users.contains(&name) {
                        users.push(name);
                    }
                }
                users
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                std::fs::write(path, "")?;
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        info!("Access list: owner @{}, {} allowed users", owner, users.len());
        Ok(Self {
            owner,
            path: path.to_path_buf(),
            users: RwLock::new(users),
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn is_owner(&self, username: &str) -> bool {
        normalize_username(username) == self.owner
    }

    pub fn is_allowed(&self, username: &str) -> bool {
        let name = normalize_username(username);
        if name.is_empty() {
            return false;
        }
        name == self.owner || self.read().contains(&name)
    }

    pub fn allow(&self, username: &str) -> Result<AccessUpdate> {
        let name = normalize_username(username);
        if name.is_empty() || name == self.owner {
            return Ok(AccessUpdate::Invalid);
        }

        let mut users = self.write();
        if users.contains(&name) {
            return Ok(AccessUpdate::Unchanged);
        }
        users.push(name.clone());
        self.persist(&users)?;
        info!("Allowed user @{}", name);
        Ok(AccessUpdate::Changed)
    }

    pub fn disallow(&self, username: &str) -> Result<AccessUpdate> {
        let name = normalize_username(username);
        if name.is_empty() || name == self.owner {
            return Ok(AccessUpdate::Invalid);
        }

        let mut users = self.write();
        let Some(index) = users.iter().position(|u| *u == name) else {
            return Ok(AccessUpdate::Unchanged);
        };
        users.remove(index);
        self.persist(&users)?;
        info!("Disallowed user @{}", name);
        Ok(AccessUpdate::Changed)
    }

    /// Owner first, then allowed users in the order they were added
    pub fn list(&self) -> Vec<String> {
        std::iter::once(self.owner.clone())
            .chain(self.read().iter().cloned())
            .collect()
    }

    fn persist(&self, users: &[String]) -> Result<()> {
        let mut text = users.join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        std::fs::write(&self.path, text).map_err(|e| {
            warn!("Failed to write {}: {}", self.path.display(), e);
            e.into()
        })
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<String>> {
        self.users.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<String>> {
        self.users.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn list_in(dir: &TempDir) -> AccessList {
        AccessList::load("@Owner", &dir.path().join("allowed_users.txt")).unwrap()
    }

    #[test]
    fn test_owner_always_allowed() {
        let dir = TempDir::new().unwrap();
        let access = list_in(&dir);
        assert!(access.is_allowed("owner"));
        assert!(access.is_allowed("OWNER"));
        assert!(!access.is_allowed("stranger"));
        assert!(!access.is_allowed(""));
    }

    #[test]
    fn test_missing_file_is_created() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("allowed_users.txt");
        AccessList::load("owner", &path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_allow_and_disallow_persist() {
        let dir = TempDir::new().unwrap();
        let access = list_in(&dir);

        assert_eq!(access.allow("@Friend").unwrap(), AccessUpdate::Changed);
        assert_eq!(access.allow("friend").unwrap(), AccessUpdate::Unchanged);
        assert!(access.is_allowed("FRIEND"));

        let reloaded = list_in(&dir);
        assert!(reloaded.is_allowed("friend"));
        assert_eq!(reloaded.list(), vec!["owner".to_string(), "friend".to_string()]);

        assert_eq!(reloaded.disallow("friend").unwrap(), AccessUpdate::Changed);
        assert_eq!(reloaded.disallow("friend").unwrap(), AccessUpdate::Unchanged);
        assert!(!list_in(&dir).is_allowed("friend"));
    }

    #[test]
    fn test_owner_cannot_be_changed() {
        let dir = TempDir::new().unwrap();
        let access = list_in(&dir);
        assert_eq!(access.allow("owner").unwrap(), AccessUpdate::Invalid);
        assert_eq!(access.disallow("Owner").unwrap(), AccessUpdate::Invalid);
        assert_eq!(access.allow("  ").unwrap(), AccessUpdate::Invalid);
        assert!(access.is_allowed("owner"));
    }

    #[test]
    fn test_file_entries_are_normalized() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("allowed_users.txt");
        std::fs::write(&path, "Alice\n\n  @bob \nalice\nowner\n").unwrap();

        let access = AccessList::load("owner", &path).unwrap();
        assert_eq!(
            access.list(),
            vec!["owner".to_string(), "alice".to_string(), "bob".to_string()]
        );
    }
}
