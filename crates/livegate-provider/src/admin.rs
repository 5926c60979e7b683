//! Lifecycle operations the admin application runs against the internal
//! partition.

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::path::PathBuf;
use zeroize::Zeroizing;

/// A single lifecycle operation. Secrets are carried separately from any
/// argument vector so backends can feed them through stdin.
#[derive(Clone, PartialEq, Eq)]
pub enum AdminOperation {
    /// Create and encrypt the internal partition for the first time.
    Initialize { password: Zeroizing<String> },
    /// Unlock the internal partition with the admin password.
    Authenticate { password: Zeroizing<String> },
    /// Format `device` with the given format configuration.
    Format {
        config_id: String,
        params: BTreeMap<String, String>,
        device: PathBuf,
    },
    /// Replace the admin password.
    ChangePassword {
        current: Zeroizing<String>,
        new: Zeroizing<String>,
    },
}

impl AdminOperation {
    /// Short label used in logs and progress messages.
    pub fn label(&self) -> &'static str {
        match self {
            AdminOperation::Initialize { .. } => "Initializing internal partition",
            AdminOperation::Authenticate { .. } => "Authenticating",
            AdminOperation::Format { .. } => "Formatting device",
            AdminOperation::ChangePassword { .. } => "Changing password",
        }
    }
}

impl fmt::Debug for AdminOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdminOperation::Format {
                config_id, device, ..
            } => f
                .debug_struct("Format")
                .field("config_id", config_id)
                .field("device", device)
                .finish_non_exhaustive(),
            other => f.write_str(other.label()),
        }
    }
}

/// Executes lifecycle operations; invoked off the interactive thread.
pub trait AdminBackend {
    type Error: Error + Send + Sync + 'static;

    /// Run `operation` to completion and return its textual output.
    fn run(&self, operation: &AdminOperation) -> Result<String, Self::Error>;
}
