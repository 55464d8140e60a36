//! blockwatch CLI - operator frontend for the block-device view.
//!
//! `watch` keeps a live view driven by hotplug events; `list`, `mount`, and
//! `unmount` are one-shot operations against a fresh snapshot.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use blockwatch_core::{DeviceManager, DeviceMonitor, Lsblk, Result, UdisksCtl, ViewState};

/// Block-device hotplug watcher and mount control.
#[derive(Parser)]
#[command(name = "blockwatch")]
#[command(about = "Watch block-device hotplug events and mount/unmount devices", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the current device list and exit.
    List,
    /// Follow hotplug events, printing the device list on every change.
    ///
    /// Exits with an error if the event subscription cannot be opened or
    /// is lost mid-run; one-shot commands keep working either way.
    Watch,
    /// Mount a device by kernel name (e.g., "sda1").
    Mount { device: String },
    /// Unmount a device by kernel name.
    Unmount { device: String },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli.command).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(command: Commands) -> Result<()> {
    let manager = Arc::new(DeviceManager::new(Lsblk, UdisksCtl));

    match command {
        Commands::List => {
            let view = manager.refresh().await?;
            print_view(&view);
            Ok(())
        }
        Commands::Watch => watch(manager).await,
        Commands::Mount { device } => {
            manager.refresh().await?;
            finish_command("mount", &device, manager.request_remount(&device).await)
        }
        Commands::Unmount { device } => {
            manager.refresh().await?;
            finish_command("unmount", &device, manager.request_unmount(&device).await)
        }
    }
}

async fn watch(manager: Arc<DeviceManager<Lsblk, UdisksCtl>>) -> Result<()> {
    // A snapshot failure here is non-fatal; the view fills in on the first
    // successful refresh.
    if let Err(e) = manager.refresh().await {
        warn!("initial refresh failed: {e}");
    }

    let monitor = DeviceMonitor::connect().await?;
    let mut driver = Arc::clone(&manager).attach_events(monitor.events().await?);
    let mut views = manager.subscribe();

    print_view(&manager.current_view());

    loop {
        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let view = views.borrow_and_update().clone();
                print_view(&view);
            }
            outcome = &mut driver => {
                eprintln!("event feed lost; the view is stale until restarted");
                return match outcome {
                    Ok(result) => result,
                    Err(join_err) => {
                        warn!("event driver task failed: {join_err}");
                        Ok(())
                    }
                };
            }
        }
    }
}

fn finish_command(
    verb: &str,
    device: &str,
    result: blockwatch_core::CommandResult,
) -> Result<()> {
    if result.success {
        println!("{}ed {}", verb, device);
        Ok(())
    } else {
        eprintln!(
            "failed to {} {}: {}",
            verb,
            device,
            result.detail.unwrap_or_default()
        );
        std::process::exit(1);
    }
}

fn print_view(view: &ViewState) {
    println!("---");
    for entry in &view.devices {
        println!("{} {}", entry.name, entry.mountpoint);
    }
}
