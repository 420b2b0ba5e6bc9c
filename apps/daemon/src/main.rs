//! mediad - Removable-storage volume manager daemon.
//!
//! Reads device events and administrative commands as JSON lines on stdin,
//! answers on stdout, and broadcasts disk/volume state changes interleaved
//! on the same stream.

mod daemon;
mod protocol;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use mediad_core::{Platform, VolumeManager, config};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Removable-storage volume manager.
#[derive(Parser)]
#[command(name = "mediad")]
#[command(about = "Removable-storage volume manager daemon", long_about = None)]
struct Cli {
    /// Managed device source configuration file.
    #[arg(long, default_value = config::CONFIG_PATH)]
    config: PathBuf,

    /// Treat the environment as an emulator, enabling virtio-blk detection.
    /// Auto-detected from DMI when not given.
    #[arg(long)]
    emulator: bool,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("mediad firing up");

    let platform = Arc::new(Platform {
        is_emulator: cli.emulator || running_in_emulator(),
        ..Platform::default()
    });

    let manager = VolumeManager::new(platform, Arc::new(daemon::StdoutBroadcaster::new()));
    manager.set_debug(cli.debug);

    match config::parse_config(&cli.config) {
        Ok(sources) => {
            for source in sources {
                manager.add_disk_source(source);
            }
        }
        Err(e) => {
            // Keep running with zero sources; every device will be ignored
            // until the config is fixed.
            warn!("error reading configuration, continuing anyways: {e}");
        }
    }

    if let Err(e) = daemon::run(&manager) {
        warn!("daemon loop failed: {e}");
        let _ = manager.shutdown();
        std::process::exit(1);
    }

    info!("mediad exiting");
}

/// Emulator heuristic: QEMU advertises itself in the DMI vendor strings.
fn running_in_emulator() -> bool {
    for attr in ["sys_vendor", "product_name"] {
        let path = format!("/sys/devices/virtual/dmi/id/{attr}");
        if let Ok(value) = std::fs::read_to_string(&path) {
            if value.contains("QEMU") {
                return true;
            }
        }
    }
    false
}
