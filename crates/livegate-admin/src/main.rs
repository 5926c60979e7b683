//! Administration front-end: initialize or authenticate against the internal
//! partition, format plugged devices and change the password.

use anyhow::{bail, Context, Result};
use clap::Parser;
use livegate_core::{
    config::LivegateConfig,
    devices::DeviceMonitor,
    event::EventLoop,
    flow::admin::{AdminEvent, AdminFlow},
    job::JobRunner,
    logging,
};
use livegate_provider::DeviceInventory;
use livegate_system::{spawn_hotplug_watcher, MountAdminContext, ToolBackend, UdevEnumerator};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};

mod terminal;

#[derive(Parser, Debug)]
#[command(name = "livegate-admin", version, about = "Administer the internal partition.")]
struct Cli {
    /// Configuration file; defaults to LIVEGATE_CONFIG or /etc/livegate.toml.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "info")]
    log_level: String,

    /// Do not watch the device directory for hotplug events.
    #[arg(long)]
    no_hotplug: bool,
}

fn main() {
    if let Err(err) = run() {
        error!("livegate-admin: {err:?}");
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
    let problems = config.validate();
    if !problems.is_empty() {
        bail!("invalid configuration: {}", problems.join("; "));
    }

    let context = MountAdminContext::from_config(&config);
    let backend = Arc::new(ToolBackend::from_config(&config));
    let enumerator = Arc::new(UdevEnumerator::from_config(&config));
    let mut monitor = DeviceMonitor::new(enumerator, config.settle_delay());
    let runner = JobRunner::from_config(&config);
    let events = EventLoop::new();

    let devices = Arc::new(Mutex::new(DeviceInventory::new()));
    monitor.subscribe(Box::new(terminal::SharedInventory::new(devices.clone())));

    let (hotplug_tx, hotplug_rx) = mpsc::channel();
    if cli.no_hotplug {
        info!("hotplug watch disabled");
    } else {
        let wake = events.sender();
        let watch_dir = Path::new(&config.devices.watch_dir);
        if let Err(err) = spawn_hotplug_watcher(watch_dir, hotplug_tx, move || {
            wake.post(AdminEvent::Hotplug);
        }) {
            warn!("device list will not follow hotplug: {err}");
        }
    }

    let mut flow = AdminFlow::new(
        context,
        backend,
        monitor,
        runner,
        config.admin.formats.clone(),
        Box::new(hotplug_rx),
        events,
    );
    let sender = flow.sender();
    let formats = flow.formats().to_vec();
    flow.pages_mut()
        .subscribe(Box::new(terminal::TerminalPages::new(sender, formats, devices)));

    let decision = flow.start();
    info!("admin session started ({decision:?})");
    flow.run();
    Ok(())
}
