//! Hotplug event monitor for the block subsystem.
//!
//! Subscribes to the UDisks2 ObjectManager on the system bus and forwards
//! add/remove notifications for block devices as [`DeviceEvent`]s. The
//! forwarder task parks on the signal streams; nothing here polls.

use std::collections::HashMap;
use std::task::{Context, Poll};

use futures_util::StreamExt;
use futures_util::stream::Stream;
use snafu::ResultExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use zbus::{Connection, zvariant};
use zbus_macros::proxy;

use crate::error::{MonitorInitSnafu, Result};

const BLOCK_IFACE: &str = "org.freedesktop.UDisks2.Block";
const BLOCK_PATH_PREFIX: &str = "/org/freedesktop/UDisks2/block_devices/";

#[proxy(
    default_service = "org.freedesktop.UDisks2",
    default_path = "/org/freedesktop/UDisks2",
    interface = "org.freedesktop.DBus.ObjectManager"
)]
trait UDisks2ObjectManager {
    #[zbus(signal)]
    fn interfaces_added(
        &self,
        object_path: zvariant::OwnedObjectPath,
        interfaces_and_properties: HashMap<String, HashMap<String, zvariant::OwnedValue>>,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    fn interfaces_removed(
        &self,
        object_path: zvariant::OwnedObjectPath,
        interfaces: Vec<String>,
    ) -> zbus::Result<()>;
}

/// What happened to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAction {
    Added,
    Removed,
}

/// One hotplug notification, consumed exactly once by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEvent {
    pub action: DeviceAction,
    /// Absolute device path (e.g., "/dev/sdb1").
    pub device: String,
    /// Monotonic sequence number assigned at delivery; opaque ordering token.
    pub seq: u64,
}

/// Ordered stream of block-device hotplug events.
///
/// The stream ends when the underlying subscription is lost; that is the
/// degraded-mode signal for the consumer.
pub struct DeviceEventStream {
    receiver: mpsc::Receiver<DeviceEvent>,
}

impl DeviceEventStream {
    /// Wraps a raw receiver; lets tests drive a manager with scripted events.
    #[cfg(test)]
    pub(crate) fn from_receiver(receiver: mpsc::Receiver<DeviceEvent>) -> Self {
        Self { receiver }
    }
}

impl Stream for DeviceEventStream {
    type Item = DeviceEvent;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Subscription handle to the host's block-subsystem event feed.
pub struct DeviceMonitor {
    connection: Connection,
}

impl DeviceMonitor {
    /// Connects to the system bus.
    ///
    /// Fails with `MonitorInit` if the bus is unreachable; callers should
    /// treat that as fatal since no live view is possible without events.
    pub async fn connect() -> Result<Self> {
        let connection = Connection::system().await.context(MonitorInitSnafu)?;
        Ok(Self { connection })
    }

    /// Opens the block-subsystem subscription and returns the event stream.
    ///
    /// Events for other object kinds (drives, jobs, managers) are filtered
    /// out at the source: only objects under the block_devices namespace
    /// carrying the Block interface are delivered. Consecutive duplicate
    /// notifications for the same device are dropped.
    pub async fn events(&self) -> Result<DeviceEventStream> {
        let object_manager = UDisks2ObjectManagerProxy::new(&self.connection)
            .await
            .context(MonitorInitSnafu)?;
        let mut added_stream = object_manager
            .receive_interfaces_added()
            .await
            .context(MonitorInitSnafu)?;
        let mut removed_stream = object_manager
            .receive_interfaces_removed()
            .await
            .context(MonitorInitSnafu)?;

        let (sender, receiver) = mpsc::channel(32);

        tokio::spawn(async move {
            let mut seq: u64 = 0;
            let mut last: Option<(DeviceAction, String)> = None;

            loop {
                let event = tokio::select! {
                    maybe_added = added_stream.next() => {
                        let Some(signal) = maybe_added else { break };
                        match signal.args() {
                            Ok(args) => {
                                if !args.interfaces_and_properties.contains_key(BLOCK_IFACE) {
                                    continue;
                                }
                                block_device_path(args.object_path.as_str())
                                    .map(|device| (DeviceAction::Added, device))
                            }
                            Err(e) => {
                                warn!("failed to parse InterfacesAdded signal args: {e}");
                                continue;
                            }
                        }
                    }
                    maybe_removed = removed_stream.next() => {
                        let Some(signal) = maybe_removed else { break };
                        match signal.args() {
                            Ok(args) => {
                                if !args.interfaces.iter().any(|i| i == BLOCK_IFACE) {
                                    continue;
                                }
                                block_device_path(args.object_path.as_str())
                                    .map(|device| (DeviceAction::Removed, device))
                            }
                            Err(e) => {
                                warn!("failed to parse InterfacesRemoved signal args: {e}");
                                continue;
                            }
                        }
                    }
                };

                let Some((action, device)) = event else {
                    continue;
                };

                // One physical event can fan out into repeated identical
                // notifications; deliver each distinct change once.
                if last.as_ref() == Some(&(action, device.clone())) {
                    debug!(device = %device, "dropping duplicate device notification");
                    continue;
                }
                last = Some((action, device.clone()));

                seq += 1;
                let event = DeviceEvent {
                    action,
                    device,
                    seq,
                };
                if sender.send(event).await.is_err() {
                    debug!("device event receiver dropped; stopping forwarder");
                    break;
                }
            }

            warn!("block-device signal streams closed");
        });

        info!("subscribed to block-subsystem device events");
        Ok(DeviceEventStream { receiver })
    }
}

/// Maps a UDisks2 block-device object path to its /dev node path.
///
/// Returns None for objects outside the block_devices namespace.
fn block_device_path(object_path: &str) -> Option<String> {
    let node = object_path.strip_prefix(BLOCK_PATH_PREFIX)?;
    if node.is_empty() || node.contains('/') {
        return None;
    }
    Some(format!("/dev/{}", unescape_object_path(node)))
}

/// Undoes D-Bus object-path escaping (`_xx` hex sequences) in a path element.
fn unescape_object_path(element: &str) -> String {
    let bytes = element.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'_' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(&element[i + 1..i + 3], 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
