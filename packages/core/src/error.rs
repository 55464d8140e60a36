//! Unified error types for the blockwatch-core library.
//!
//! Uses SNAFU for context-rich error handling, especially useful when the same
//! underlying error type (like `std::io::Error`) appears in different contexts.

use snafu::{ResultExt, Snafu};

/// Result type alias using the library's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all core library operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Failed to execute a system command.
    #[snafu(display("failed to execute command '{command}'"))]
    CommandExecution {
        command: String,
        source: std::io::Error,
    },

    /// Block-device enumeration failed or produced unreadable output.
    ///
    /// Recoverable: callers keep serving the last known view.
    #[snafu(display("failed to enumerate block devices: {message}"))]
    Enumeration { message: String },

    /// Device id not present in the current view.
    #[snafu(display("unknown device '{id}'"))]
    UnknownDevice { id: String },

    /// The device-event subscription could not be opened.
    ///
    /// Fatal at startup: without it no view can be kept current.
    #[snafu(display("failed to open device event subscription"))]
    MonitorInit { source: zbus::Error },

    /// The device-event feed closed mid-run.
    ///
    /// The view serves stale data until a manual refresh; event delivery
    /// does not resume for this process run.
    #[snafu(display("device event feed closed unexpectedly"))]
    MonitorLost,
}

/// Extension trait for adding context to io::Error results.
pub trait IoResultExt<T> {
    /// Add context for command execution errors.
    fn command_context(self, command: impl Into<String>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::result::Result<T, std::io::Error> {
    fn command_context(self, command: impl Into<String>) -> Result<T> {
        self.context(CommandExecutionSnafu {
            command: command.into(),
        })
    }
}
