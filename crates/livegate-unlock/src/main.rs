//! Unlock front-end: waits for the manager, asks for the password and reports
//! the outcome.

use anyhow::{Context, Result};
use clap::Parser;
use livegate_core::{
    config::LivegateConfig,
    event::EventLoop,
    flow::unlock::{prepare_session, signal_sink, UnlockFlow},
    logging,
    unlock::{RetryPolicy, UnlockClient},
};
use livegate_system::{BusManagerConnector, DesktopSession};
use log::{error, info};
use std::env;
use std::path::PathBuf;

mod terminal;

/// Command-line options.
#[derive(Parser, Debug)]
#[command(name = "livegate-unlock", version, about = "Unlock the internal partition.")]
struct Cli {
    /// Configuration file; defaults to LIVEGATE_CONFIG or /etc/livegate.toml.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Default log filter when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Skip graphical session discovery (console use).
    #[arg(long)]
    no_session: bool,
}

/// Entry point: run and surface errors with an exit code.
fn main() {
    if let Err(err) = run() {
        error!("livegate-unlock: {err:?}");
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    let config_path = cli.config.unwrap_or_else(LivegateConfig::path_from_env);
    let config = LivegateConfig::load_or_default(&config_path)
        .with_context(|| format!("load config {}", config_path.display()))?;

    let mut session = DesktopSession::new();
    if !cli.no_session {
        prepare_session(
            &mut session,
            &config.session.settings,
            config.ui_poll_interval(),
            None,
        );
    }

    if let Some(paths) = config.managed_paths() {
        for (key, value) in paths.exports() {
            env::set_var(key, value);
        }
    }

    let events = EventLoop::new();
    let connector = BusManagerConnector::from_config(&config);
    let client = UnlockClient::connect(
        &connector,
        RetryPolicy::from_config(&config),
        signal_sink(events.sender()),
    )
    .context("connect to manager service")?;

    let mut flow = UnlockFlow::new(client, session, events);
    let sender = flow.sender();
    flow.pages_mut()
        .subscribe(Box::new(terminal::TerminalPages::new(sender)));

    let decision = flow.start();
    info!(
        "manager version {} valid to {} ({decision:?})",
        flow.client().session().version().unwrap_or("unknown"),
        flow.client().session().valid_to().unwrap_or("unknown"),
    );
    flow.run();
    Ok(())
}
