//! One-shot startup decision for both applications.

use livegate_provider::{AdminContext, EnvironmentStatus};
use log::info;

pub const EXPIRED_MESSAGE: &str = "The validity period of this device has expired";
pub const INVALID_ENV_MESSAGE: &str = "This device is running in an invalid environment";

/// Environment facts gathered before any page is shown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnvironmentFlags {
    pub expired: bool,
    pub invalid: bool,
    pub initialized: bool,
    pub unlocked: bool,
}

impl EnvironmentFlags {
    /// Flags for the unlock app; the manager only runs on initialized devices.
    pub fn from_status(status: &EnvironmentStatus, unlocked: bool) -> Self {
        Self {
            expired: status.expired,
            invalid: status.invalid_env,
            initialized: true,
            unlocked,
        }
    }

    pub fn from_admin<C: AdminContext>(context: &C) -> Self {
        Self {
            expired: false,
            invalid: !context.is_valid(),
            initialized: context.is_initialized(),
            unlocked: context.is_unlocked(),
        }
    }
}

/// Initial page selected at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapDecision {
    Fatal(String),
    Initialize,
    Authenticate,
    Menu,
}

/// Consumed by [`SessionBootstrap::run`] so the decision is taken once.
#[derive(Debug)]
pub struct SessionBootstrap {
    flags: EnvironmentFlags,
}

impl SessionBootstrap {
    pub fn new(flags: EnvironmentFlags) -> Self {
        Self { flags }
    }

    /// First matching rule wins; environment problems always pre-empt the
    /// lock state.
    pub fn run(self) -> BootstrapDecision {
        let flags = self.flags;
        let decision = if flags.expired {
            BootstrapDecision::Fatal(EXPIRED_MESSAGE.to_string())
        } else if flags.invalid {
            BootstrapDecision::Fatal(INVALID_ENV_MESSAGE.to_string())
        } else if !flags.initialized {
            BootstrapDecision::Initialize
        } else if !flags.unlocked {
            BootstrapDecision::Authenticate
        } else {
            BootstrapDecision::Menu
        };
        info!("bootstrap decision: {decision:?} (from {flags:?})");
        decision
    }
}
