//! blockwatch-core: Core library for hotplug-aware block-device viewing.
//!
//! This library maintains a live view of the block devices on a host. A
//! background monitor receives kernel hotplug notifications, a manager
//! reconciles them with fresh `lsblk` snapshots into one consistent view,
//! and mount/unmount requests are delegated to `udisksctl`.
//!
//! # Modules
//!
//! - [`disk`]: Device-tree snapshots using `lsblk`
//! - [`command`]: Mount/unmount execution via `udisksctl`
//! - [`monitor`]: Block-subsystem hotplug event subscription
//! - [`manager`]: The reconciliation core owning the published view
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use blockwatch_core::{DeviceManager, DeviceMonitor, Lsblk, UdisksCtl};
//!
//! # async fn run() -> blockwatch_core::Result<()> {
//! let manager = Arc::new(DeviceManager::new(Lsblk, UdisksCtl));
//! manager.refresh().await?;
//!
//! // Keep the view current from hotplug events; a connect/subscribe
//! // failure here is fatal, since the view could never stay live.
//! let monitor = DeviceMonitor::connect().await?;
//! let driver = Arc::clone(&manager).attach_events(monitor.events().await?);
//!
//! // Operator actions go through the same manager.
//! let result = manager.request_unmount("sda1").await;
//! if !result.success {
//!     eprintln!("{}", result.detail.unwrap_or_default());
//! }
//! # drop(driver);
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod disk;
pub mod error;
pub mod manager;
pub mod monitor;

// Re-export commonly used types
pub use command::{CommandResult, Mounter, UdisksCtl};
pub use disk::{DeviceEntry, DeviceNode, Lsblk, SnapshotSource};
pub use error::{Error, Result};
pub use manager::{DeviceManager, Status, ViewState};
pub use monitor::{DeviceAction, DeviceEvent, DeviceEventStream, DeviceMonitor};
