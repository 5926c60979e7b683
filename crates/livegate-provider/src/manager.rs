//! Contract for the privileged manager service.
//!
//! The manager owns the encrypted internal partition. Clients only ever see
//! its request/response surface plus three asynchronous signals.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Wire code the manager uses for a rejected credential.
pub const REASON_CREDENTIAL: i32 = 0;
/// Wire code the manager uses when the device failed its integrity checks.
pub const REASON_INTEGRITY: i32 = 1;
/// Wire code for any other failure.
pub const REASON_OTHER: i32 = 2;
/// Wire code for exhausted credential attempts.
pub const REASON_TOO_MANY_ATTEMPTS: i32 = 3;

/// Tagged reason attached to a failed unlock attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The credential was rejected; the user may retry.
    Credential,
    /// Too many failed attempts; no further retry is offered.
    TooManyAttempts,
    /// The device failed its integrity verification.
    Integrity(String),
    /// Anything else, carrying the manager's message verbatim.
    Other(String),
}

impl FailureReason {
    /// Decode the `(reason, message)` pair carried by the `unlock_failed` signal.
    pub fn from_wire(code: i32, message: &str) -> Self {
        match code {
            REASON_CREDENTIAL => FailureReason::Credential,
            REASON_TOO_MANY_ATTEMPTS => FailureReason::TooManyAttempts,
            REASON_INTEGRITY => FailureReason::Integrity(message.to_string()),
            _ => FailureReason::Other(message.to_string()),
        }
    }

    /// Whether the user may submit another credential after this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureReason::Credential)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Credential => f.write_str("invalid credential"),
            FailureReason::TooManyAttempts => f.write_str("too many failed attempts"),
            FailureReason::Integrity(message) if message.is_empty() => {
                f.write_str("Device may be compromised")
            }
            FailureReason::Integrity(message) | FailureReason::Other(message) => {
                f.write_str(message)
            }
        }
    }
}

/// Asynchronous notifications emitted by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerSignal {
    UnlockDone,
    UnlockFailed(FailureReason),
    UpdatesStatusChanged,
}

/// Snapshot of the four status fields returned in one round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentStatus {
    pub version: String,
    pub valid_to: String,
    pub expired: bool,
    pub invalid_env: bool,
}

impl EnvironmentStatus {
    /// True when neither the validity window nor the execution environment is broken.
    pub fn is_usable(&self) -> bool {
        !self.expired && !self.invalid_env
    }
}

/// Background maintenance status reported by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatesStatus {
    pub action: String,
    pub last_run: String,
}

impl UpdatesStatus {
    /// Action string the manager reports while no maintenance is running.
    pub const IDLE: &'static str = "Idle";

    pub fn is_idle(&self) -> bool {
        self.action.trim().eq_ignore_ascii_case(Self::IDLE)
    }
}

/// Callback through which subscribed signals are handed to the client.
///
/// Implementations are invoked from whatever thread the transport delivers
/// on; the receiving side is responsible for moving them onto the
/// interactive thread.
pub type SignalSink = Arc<dyn Fn(ManagerSignal) + Send + Sync>;

/// Request/response surface of the privileged manager.
pub trait ManagerService {
    type Error: Error + Send + Sync + 'static;

    fn is_unlocked(&self) -> Result<bool, Self::Error>;

    fn version(&self) -> Result<String, Self::Error>;

    fn valid_to(&self) -> Result<String, Self::Error>;

    fn expired(&self) -> Result<bool, Self::Error>;

    fn invalid_env(&self) -> Result<bool, Self::Error>;

    /// Fire-and-forget unlock request; the outcome arrives as a signal.
    fn unlock_with_password(&self, secret: &str) -> Result<(), Self::Error>;

    fn updates_status(&self) -> Result<UpdatesStatus, Self::Error>;

    /// Subscribe `sink` to `unlock_done`, `unlock_failed` and
    /// `updates_status_changed`.
    fn subscribe(&self, sink: SignalSink) -> Result<(), Self::Error>;
}

/// Factory for manager connections; a single attempt per call.
pub trait ManagerConnector {
    type Service: ManagerService;
    type Error: Error + Send + Sync + 'static;

    fn connect(&self) -> Result<Self::Service, Self::Error>;
}
