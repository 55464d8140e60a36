//! Reconciliation core: the canonical, hotplug-aware device view.
//!
//! The manager owns the one shared mutable resource in the system, the
//! published [`ViewState`]. Every mutation (refresh, mount, unmount) is
//! serialized through a single lock and ends by atomically replacing the
//! published snapshot, so readers never observe a torn view. Reads go
//! through a watch channel and never block on I/O.
//!
//! Hotplug events carry no usable delta: a single physical plug can make
//! several partitions appear or vanish at once. The manager therefore
//! re-derives the whole view from a fresh snapshot on every event, which
//! also makes it insensitive to the ordering of rapid add/remove bursts.

use std::path::PathBuf;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::command::{CommandResult, Mounter};
use crate::disk::{DeviceEntry, SnapshotSource, flatten};
use crate::error::{Error, Result};
use crate::monitor::{DeviceEvent, DeviceEventStream};

/// The flattened device list as last derived from a snapshot.
///
/// Replaced wholesale on every refresh, never mutated in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewState {
    pub devices: Vec<DeviceEntry>,
}

impl ViewState {
    /// Looks up a device by kernel name.
    pub fn find(&self, id: &str) -> Option<&DeviceEntry> {
        self.devices.iter().find(|d| d.name == id)
    }

    /// Resolves a device id to its /dev path.
    pub fn device_path(&self, id: &str) -> Option<PathBuf> {
        self.find(id).map(|d| d.path.clone())
    }
}

/// Whether live event delivery is in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The monitor is attached and events drive refreshes.
    Live,
    /// No live events; the view only changes on manual refresh. Terminal
    /// once entered mid-run.
    Degraded,
}

/// Owns the device view and serializes all mutation against it.
pub struct DeviceManager<S, M> {
    source: S,
    mounter: M,
    /// Serializes refresh/mount/unmount. Never held across executor I/O.
    mutate: Mutex<()>,
    view: watch::Sender<Arc<ViewState>>,
    status: watch::Sender<Status>,
}

impl<S: SnapshotSource, M: Mounter> DeviceManager<S, M> {
    /// Creates a manager with an empty view.
    ///
    /// The manager starts Degraded; only a successful monitor attach via
    /// [`DeviceManager::attach_events`] makes it Live.
    pub fn new(source: S, mounter: M) -> Self {
        let (view, _) = watch::channel(Arc::new(ViewState::default()));
        let (status, _) = watch::channel(Status::Degraded);
        Self {
            source,
            mounter,
            mutate: Mutex::new(()),
            view,
            status,
        }
    }

    /// Re-derives the view from a fresh snapshot and publishes it.
    ///
    /// On error the previously published view is left untouched.
    pub async fn refresh(&self) -> Result<Arc<ViewState>> {
        let _guard = self.mutate.lock().await;
        self.refresh_locked().await
    }

    async fn refresh_locked(&self) -> Result<Arc<ViewState>> {
        let tree = self.source.snapshot().await?;
        let next = Arc::new(ViewState {
            devices: flatten(&tree),
        });
        self.view.send_replace(Arc::clone(&next));
        Ok(next)
    }

    /// Handles one hotplug notification from the monitor.
    ///
    /// The event itself is only a change signal; the refreshed snapshot is
    /// the source of truth. A failed refresh keeps the stale view.
    pub async fn on_device_event(&self, event: DeviceEvent) {
        info!(
            action = ?event.action,
            device = %event.device,
            seq = event.seq,
            "device event"
        );
        if let Err(e) = self.refresh().await {
            warn!("refresh after device event failed: {e}");
        }
    }

    /// Unmounts the device with the given kernel name.
    ///
    /// On success the view is refreshed before returning; on failure the
    /// view is unchanged and the tool's diagnostic is returned verbatim.
    pub async fn request_unmount(&self, id: &str) -> CommandResult {
        self.run_device_command(id, false).await
    }

    /// Mounts (remounts) the device with the given kernel name.
    pub async fn request_remount(&self, id: &str) -> CommandResult {
        self.run_device_command(id, true).await
    }

    async fn run_device_command(&self, id: &str, mount: bool) -> CommandResult {
        let Some(path) = self.current_view().device_path(id) else {
            return CommandResult::failed(Error::UnknownDevice { id: id.into() }.to_string());
        };

        // Blocking external I/O; deliberately outside the mutation lock.
        let outcome = if mount {
            self.mounter.mount(&path).await
        } else {
            self.mounter.unmount(&path).await
        };
        let result = match outcome {
            Ok(result) => result,
            Err(e) => CommandResult::failed(e.to_string()),
        };

        let verb = if mount { "mount" } else { "unmount" };
        if result.success {
            info!(device = %path.display(), "{verb} succeeded");
            if let Err(e) = self.refresh().await {
                warn!("refresh after {verb} failed: {e}");
            }
        } else {
            warn!(
                device = %path.display(),
                detail = result.detail.as_deref().unwrap_or(""),
                "{verb} failed"
            );
        }
        result
    }

    /// Returns the last published view. Never blocks, never touches I/O.
    pub fn current_view(&self) -> Arc<ViewState> {
        self.view.borrow().clone()
    }

    /// Subscribes to view changes. Each refresh publishes a new snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ViewState>> {
        self.view.subscribe()
    }

    /// Current liveness of event delivery.
    pub fn status(&self) -> Status {
        *self.status.borrow()
    }

    /// Subscribes to liveness transitions.
    pub fn subscribe_status(&self) -> watch::Receiver<Status> {
        self.status.subscribe()
    }

    /// Drives the manager from a hotplug event stream.
    ///
    /// Marks the manager Live, then refreshes on every event. When the
    /// stream ends the manager drops to Degraded for the rest of the
    /// process run and the task resolves with `MonitorLost`; manual
    /// refresh/mount/unmount keep working.
    pub fn attach_events(self: Arc<Self>, mut events: DeviceEventStream) -> JoinHandle<Result<()>>
    where
        S: 'static,
        M: 'static,
    {
        self.status.send_replace(Status::Live);
        let manager = self;
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                manager.on_device_event(event).await;
            }
            warn!("device event feed lost; view updates are now manual only");
            manager.status.send_replace(Status::Degraded);
            Err(Error::MonitorLost)
        })
    }
}
