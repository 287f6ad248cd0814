//! Seedloop - Entry Point
//!
//! Modes:
//! - Default: run the tick engine until SIGINT/SIGTERM or an inbox `quit`
//! - --status / -s: print what the agent has learned so far
//! - --send <command>: append one command to the inbox

use seedloop::{Config, EventLog, Inbox, StateStore, StatusReport, TickEngine};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Parse args
    let args: Vec<String> = std::env::args().collect();
    let status_mode = args.iter().any(|a| a == "--status" || a == "-s");
    let help_mode = args.iter().any(|a| a == "--help" || a == "-h");
    let send_command = args
        .iter()
        .position(|a| a == "--send")
        .map(|idx| args[idx + 1..].join(" "));

    if help_mode {
        println!("Seedloop v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: seedloop [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --status, -s        Print learned status and exit");
        println!("  --send <command>    Append a command to the inbox and exit");
        println!("  --help, -h          Show this help");
        println!();
        println!("Default: run the tick loop");
        println!();
        println!("Environment variables:");
        println!("  SEEDLOOP_HOME              Root directory (default: .)");
        println!("  SEEDLOOP_DATA_DIR          State, inbox and log directory");
        println!("  SEEDLOOP_SKILLS_DIR        Plugin directory (skill_*.toml)");
        println!("  SEEDLOOP_TICK_MS           Tick interval (default: 1000)");
        println!("  SEEDLOOP_SCAN_SECS         Plugin rescan period (default: 10)");
        println!("  SEEDLOOP_EPSILON_BASELINE  Reset epsilon after each tick");
        println!("  SEEDLOOP_SEED              Fixed RNG seed");
        println!("  SEEDLOOP_LOG_JSON          Diagnostic logs as JSON on stderr");
        return Ok(());
    }

    // Setup logging
    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    let json_logs = std::env::var("SEEDLOOP_LOG_JSON")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);

    if json_logs {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    let config = Config::from_env()?;

    if let Some(command) = send_command {
        if command.trim().is_empty() {
            anyhow::bail!("--send needs a command, e.g. --send reward heartbeat +0.5");
        }
        Inbox::new(config.inbox_path(), config.settable_keys.clone()).push(&command)?;
        println!("queued: {}", command);
        return Ok(());
    }

    if status_mode {
        let state = StateStore::new(config.state_path()).read()?;
        let log = EventLog::new(config.log_path(), config.rotation.clone());
        print!("{}", StatusReport::build(&state, &log));
        return Ok(());
    }

    info!("Seedloop v{}", env!("CARGO_PKG_VERSION"));

    let mut engine = TickEngine::new(config)?;

    let lifecycle = engine.lifecycle();
    tokio::spawn(async move {
        seedloop::lifecycle::shutdown_signal().await;
        lifecycle.request_stop();
    });

    engine.run().await?;

    info!("Stopped");
    Ok(())
}
