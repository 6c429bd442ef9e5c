//! YAPPARI - Entry Point
//!
//! Runs the Telegram bot. Logs go to stdout, as JSON with --json-logs.

use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use yappari::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Parse args
    let args: Vec<String> = std::env::args().collect();
    let json_logs = args.iter().any(|a| a == "--json-logs" || a == "-j");
    let help_mode = args.iter().any(|a| a == "--help" || a == "-h");

    if help_mode {
        println!("YAPPARI v{}", env!("CARGO_PKG_VERSION"));
        println!("Yet Another Prompt-based Personal Assistant Robot, Indeed!");
        println!();
        println!("Usage: yappari [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --json-logs, -j    Log as JSON");
        println!("  --help, -h         Show this help");
        println!();
        println!("Environment variables:");
        println!("  BOT_TOKEN                      Telegram bot token (required)");
        println!("  BOT_OWNER                      Owner's Telegram username (required)");
        println!("  OPENAI_API_KEY                 OpenAI API key (required)");
        println!("  OPENAI_BASE_URL                API base (default: https://api.openai.com/v1)");
        println!("  YAPPARI_DB_PATH                SQLite database path");
        println!("  YAPPARI_ALLOWED_USERS          Allowed usernames file");
        println!("  YAPPARI_REQUEST_TIMEOUT_SECS   Timeout for OpenAI/YouTube calls (default: 120)");
        println!("  YAPPARI_TRANSCRIPT_LANGUAGE    Preferred transcript language (default: en)");
        println!("  YAPPARI_DEFAULT_MODEL, YAPPARI_DEFAULT_PROMPT, YAPPARI_DEFAULT_TEMPERATURE,");
        println!("  YAPPARI_DEFAULT_MAX_TOKENS, YAPPARI_DEFAULT_MAX_HISTORY_TOKENS");
        println!("                                 Defaults for users without overrides");
        println!("  RUST_LOG                       Log filter (default: info)");
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json_logs {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    info!("YAPPARI v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    yappari::telegram::run_telegram_bot(config).await?;

    Ok(())
}
