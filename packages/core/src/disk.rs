//! Block-device snapshot module using lsblk.
//!
//! This module provides a point-in-time read of the block-device tree on the
//! system, parsed from `lsblk --json` and flattened into the parent-first
//! order the view layer displays.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Error, IoResultExt, Result};

/// One node of the block-device tree as reported by the enumeration tool.
///
/// Children mirror physical partitioning: a disk's partitions (and their
/// volumes) hang off the disk node, root-first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceNode {
    /// Kernel device name (e.g., "sda1", "nvme0n1p2").
    pub name: String,
    /// Current mount point, if mounted.
    pub mountpoint: Option<String>,
    /// Child devices (partitions of a disk, volumes of a partition).
    pub children: Vec<DeviceNode>,
}

/// One row of the flattened device view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    /// Kernel device name (e.g., "sda1").
    pub name: String,
    /// Mount point; empty string when unmounted.
    pub mountpoint: String,
    /// Full device path (e.g., "/dev/sda1").
    pub path: PathBuf,
}

impl DeviceEntry {
    /// Returns true if this device is currently mounted.
    pub fn is_mounted(&self) -> bool {
        !self.mountpoint.is_empty()
    }
}

/// Source of device-tree snapshots.
///
/// The production implementation shells out to lsblk; tests substitute an
/// in-memory fake.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Reads the current block-device tree.
    async fn snapshot(&self) -> Result<Vec<DeviceNode>>;
}

/// Raw JSON structure from lsblk output.
#[derive(Debug, Deserialize)]
struct LsblkOutput {
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: String,
    #[serde(default)]
    mountpoint: Option<String>,
    #[serde(default)]
    children: Option<Vec<LsblkDevice>>,
}

impl LsblkDevice {
    fn into_node(self) -> DeviceNode {
        DeviceNode {
            name: self.name,
            mountpoint: self.mountpoint,
            children: self
                .children
                .unwrap_or_default()
                .into_iter()
                .map(LsblkDevice::into_node)
                .collect(),
        }
    }
}

/// Snapshot source backed by `lsblk --json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lsblk;

#[async_trait]
impl SnapshotSource for Lsblk {
    async fn snapshot(&self) -> Result<Vec<DeviceNode>> {
        let output = Command::new("lsblk")
            .arg("--json")
            .output()
            .await
            .command_context("lsblk")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(Error::Enumeration {
                message: format!(
                    "lsblk exited with code {}: {}",
                    output.status.code().unwrap_or(-1),
                    stderr.trim()
                ),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let tree = parse_lsblk(&stdout)?;
        debug!(devices = tree.len(), "block device snapshot taken");
        Ok(tree)
    }
}

/// Parses lsblk JSON output into a device tree.
pub fn parse_lsblk(json: &str) -> Result<Vec<DeviceNode>> {
    let output: LsblkOutput = serde_json::from_str(json).map_err(|e| Error::Enumeration {
        message: e.to_string(),
    })?;

    Ok(output
        .blockdevices
        .into_iter()
        .map(LsblkDevice::into_node)
        .collect())
}

/// Flattens a device tree depth-first, parent before children.
pub fn flatten(nodes: &[DeviceNode]) -> Vec<DeviceEntry> {
    let mut entries = Vec::new();
    collect_entries(nodes, &mut entries);
    entries
}

fn collect_entries(nodes: &[DeviceNode], entries: &mut Vec<DeviceEntry>) {
    for node in nodes {
        entries.push(DeviceEntry {
            name: node.name.clone(),
            mountpoint: node.mountpoint.clone().unwrap_or_default(),
            path: PathBuf::from(format!("/dev/{}", node.name)),
        });
        collect_entries(&node.children, entries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_LSBLK_JSON: &str = r#"{
        "blockdevices": [
            {
                "name": "sda",
                "mountpoint": null,
                "children": [
                    {
                        "name": "sda1",
                        "mountpoint": "/mnt/a"
                    },
                    {
                        "name": "sda2",
                        "mountpoint": null
                    }
                ]
            },
            {
                "name": "sdb",
                "mountpoint": null,
                "children": [
                    {
                        "name": "sdb1",
                        "mountpoint": "/run/media/user/USB"
                    }
                ]
            }
        ]
    }"#;

    #[test]
    fn test_parse_lsblk_json() {
        let tree = parse_lsblk(SAMPLE_LSBLK_JSON).unwrap();

        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].name, "sda");
        assert_eq!(tree[0].children.len(), 2);
        assert_eq!(tree[0].children[0].mountpoint, Some("/mnt/a".to_string()));
        assert_eq!(tree[1].children[0].name, "sdb1");
    }

    #[test]
    fn test_flatten_parent_before_children() {
        let tree = parse_lsblk(SAMPLE_LSBLK_JSON).unwrap();
        let entries = flatten(&tree);

        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["sda", "sda1", "sda2", "sdb", "sdb1"]);

        let sda = &entries[0];
        assert_eq!(sda.mountpoint, "");
        assert!(!sda.is_mounted());

        let sda1 = &entries[1];
        assert_eq!(sda1.mountpoint, "/mnt/a");
        assert_eq!(sda1.path, PathBuf::from("/dev/sda1"));
        assert!(sda1.is_mounted());
    }

    #[test]
    fn test_flatten_deep_nesting() {
        let tree = vec![DeviceNode {
            name: "sdc".to_string(),
            mountpoint: None,
            children: vec![DeviceNode {
                name: "sdc1".to_string(),
                mountpoint: None,
                children: vec![DeviceNode {
                    name: "dm-0".to_string(),
                    mountpoint: Some("/".to_string()),
                    children: Vec::new(),
                }],
            }],
        }];

        let entries = flatten(&tree);
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["sdc", "sdc1", "dm-0"]);
        assert_eq!(entries[2].mountpoint, "/");
    }

    #[test]
    fn test_parse_malformed_json() {
        let err = parse_lsblk("not json").unwrap_err();
        assert!(matches!(err, Error::Enumeration { .. }));
    }

    #[test]
    fn test_parse_missing_blockdevices_key() {
        let err = parse_lsblk(r#"{"devices": []}"#).unwrap_err();
        assert!(matches!(err, Error::Enumeration { .. }));
    }
}
