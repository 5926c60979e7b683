//! Contracts for the desktop session and the administrative partition context.

use std::error::Error;

/// Desktop session collaborator used by the unlock application.
pub trait SessionEnvironment {
    /// Prepare the process environment for talking to the graphical session.
    ///
    /// Returns `false` while no graphical user is logged in; callers poll
    /// until it succeeds before creating any UI.
    fn define_ui_environment(&mut self) -> bool;

    /// Change a per-user desktop setting. Failures are reported through logs
    /// only.
    fn user_setting_set(&self, schema: &str, key: &str, value: &str);

    /// Show a passive desktop notification.
    fn notify(&self, message: &str);
}

/// Administrative view over the device/partition the admin app manages.
pub trait AdminContext {
    type Error: Error + Send + Sync + 'static;

    fn is_valid(&self) -> bool;

    fn is_initialized(&self) -> bool;

    fn is_unlocked(&self) -> bool;

    /// Lock the internal partition again. May block on external commands, so
    /// callers run it off the interactive thread.
    fn logout(&self) -> Result<(), Self::Error>;
}
