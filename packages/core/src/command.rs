//! Mount and unmount operations via udisksctl.
//!
//! Each operation is a single attempt against the external tool; the exit
//! status and stderr are captured verbatim and handed back to the caller.
//! No retries and no timeout are applied here.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{IoResultExt, Result};

/// Outcome of one mount or unmount attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// True when the external tool exited with status zero.
    pub success: bool,
    /// Diagnostic text from the tool's stderr; present on failure.
    pub detail: Option<String>,
}

impl CommandResult {
    /// A successful result with no diagnostic.
    pub fn ok() -> Self {
        Self {
            success: true,
            detail: None,
        }
    }

    /// A failed result carrying diagnostic text.
    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: Some(detail.into()),
        }
    }
}

/// Executes mount and unmount operations against a block device.
///
/// The production implementation shells out to udisksctl; tests substitute
/// a fake that scripts successes and failures.
#[async_trait]
pub trait Mounter: Send + Sync {
    /// Mounts the device at the given path.
    async fn mount(&self, device: &Path) -> Result<CommandResult>;

    /// Unmounts the device at the given path.
    async fn unmount(&self, device: &Path) -> Result<CommandResult>;
}

/// Mounter backed by `udisksctl mount`/`udisksctl unmount`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UdisksCtl;

impl UdisksCtl {
    async fn run(&self, verb: &str, device: &Path) -> Result<CommandResult> {
        let output = Command::new("udisksctl")
            .arg(verb)
            .arg("-b")
            .arg(device)
            .output()
            .await
            .command_context(format!("udisksctl {}", verb))?;

        debug!(
            verb,
            device = %device.display(),
            code = output.status.code().unwrap_or(-1),
            "udisksctl finished"
        );

        if output.status.success() {
            Ok(CommandResult::ok())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            Ok(CommandResult::failed(stderr))
        }
    }
}

#[async_trait]
impl Mounter for UdisksCtl {
    async fn mount(&self, device: &Path) -> Result<CommandResult> {
        self.run("mount", device).await
    }

    async fn unmount(&self, device: &Path) -> Result<CommandResult> {
        self.run("unmount", device).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_result() {
        let result = CommandResult::ok();
        assert!(result.success);
        assert!(result.detail.is_none());
    }

    #[test]
    fn test_failed_result_keeps_diagnostic_verbatim() {
        let result = CommandResult::failed("target is busy");
        assert!(!result.success);
        assert_eq!(result.detail.as_deref(), Some("target is busy"));
    }
}
