//! Client side of the unlock protocol spoken with the privileged manager.
//!
//! [`UnlockClient`] owns the only [`UnlockSession`]. Local connect attempts
//! and manager signals (already moved onto the interactive thread) are the
//! only things that move it between states.

use crate::config::LivegateConfig;
use crate::error::{LivegateError, LivegateResult};
use livegate_provider::{
    EnvironmentStatus, FailureReason, ManagerConnector, ManagerService, ManagerSignal,
    SignalSink, UpdatesStatus,
};
use log::{debug, info, warn};
use std::thread;
use std::time::Duration;
use zeroize::Zeroizing;

/// Lifecycle of the unlock session as seen by this client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Locked,
    Unlocking,
    Unlocked,
    Expired,
    InvalidEnvironment,
    Failed(FailureReason),
}

impl SessionState {
    /// `Expired`, `InvalidEnvironment` and every failure other than a
    /// rejected credential pre-empt all later transitions.
    pub fn is_terminal(&self) -> bool {
        match self {
            SessionState::Expired | SessionState::InvalidEnvironment => true,
            SessionState::Failed(reason) => *reason != FailureReason::Credential,
            _ => false,
        }
    }
}

/// State tracked for the lifetime of the unlock application.
#[derive(Debug, Clone)]
pub struct UnlockSession {
    state: SessionState,
    version: Option<String>,
    valid_to: Option<String>,
    last_failure: Option<FailureReason>,
}

impl Default for UnlockSession {
    fn default() -> Self {
        Self {
            state: SessionState::Disconnected,
            version: None,
            valid_to: None,
            last_failure: None,
        }
    }
}

impl UnlockSession {
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn valid_to(&self) -> Option<&str> {
        self.valid_to.as_deref()
    }

    pub fn last_failure(&self) -> Option<&FailureReason> {
        self.last_failure.as_ref()
    }

    /// Move to `next` unless the session already sits in a terminal state.
    fn transition(&mut self, next: SessionState) -> bool {
        if self.state.is_terminal() {
            debug!("ignoring transition to {next:?}: session is {:?}", self.state);
            return false;
        }
        if let SessionState::Failed(reason) = &next {
            self.last_failure = Some(reason.clone());
        }
        debug!("unlock session {:?} -> {next:?}", self.state);
        self.state = next;
        true
    }

    /// Whether a credential may be submitted in the current state.
    pub fn accepts_credential(&self) -> bool {
        matches!(
            self.state,
            SessionState::Locked | SessionState::Failed(FailureReason::Credential)
        )
    }
}

/// How connection attempts are paced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub fn from_config(config: &LivegateConfig) -> Self {
        Self {
            interval: config.connect_interval(),
            max_attempts: config.max_connect_attempts(),
        }
    }
}

/// What the interactive layer should do in response to a manager signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalReaction {
    /// Go back to credential entry; nothing is persisted.
    RetryCredential,
    /// Non-recoverable error carrying the text to show.
    Fatal(String),
    /// Unlock finished; show the closable confirmation page.
    Done,
    /// Surface a passive notification.
    Notify(String),
    /// Nothing user-visible.
    Nothing,
}

/// Owned handle on the manager service plus the session it drives.
pub struct UnlockClient<S> {
    service: S,
    session: UnlockSession,
    attempts: u32,
}

impl<S: ManagerService> UnlockClient<S> {
    /// Connect to the manager, retrying with a fixed backoff, and subscribe
    /// `sink` to its three signals.
    ///
    /// Failures are logged and retried; an error is returned only when the
    /// policy caps the number of attempts.
    pub fn connect<C>(connector: &C, policy: RetryPolicy, sink: SignalSink) -> LivegateResult<Self>
    where
        C: ManagerConnector<Service = S>,
    {
        let mut session = UnlockSession::default();
        session.transition(SessionState::Connecting);

        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            match connector.connect() {
                Ok(service) => match service.subscribe(sink.clone()) {
                    Ok(()) => {
                        info!("connected to manager service after {attempt} attempt(s)");
                        session.transition(SessionState::Locked);
                        return Ok(Self {
                            service,
                            session,
                            attempts: attempt,
                        });
                    }
                    Err(err) => warn!("manager signal subscription failed: {err}"),
                },
                Err(err) => info!("manager service not reachable yet ({attempt}): {err}"),
            }

            if policy.max_attempts.is_some_and(|max| attempt >= max) {
                return Err(LivegateError::ManagerUnavailable { attempts: attempt });
            }
            thread::sleep(policy.interval);
        }
    }

    pub fn session(&self) -> &UnlockSession {
        &self.session
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Number of attempts the successful connection took.
    pub fn connect_attempts(&self) -> u32 {
        self.attempts
    }

    /// Fetch the four status fields in one round trip.
    ///
    /// Any failing call leaves the status unknown (`None`) rather than
    /// erroring out; an expired or invalid environment moves the session to
    /// its terminal state.
    pub fn query_status(&mut self) -> Option<EnvironmentStatus> {
        let service = &self.service;
        let fetched = (|| -> Result<EnvironmentStatus, S::Error> {
            Ok(EnvironmentStatus {
                version: service.version()?,
                valid_to: service.valid_to()?,
                expired: service.expired()?,
                invalid_env: service.invalid_env()?,
            })
        })();

        let status = match fetched {
            Ok(status) => status,
            Err(err) => {
                warn!("could not query manager status: {err}");
                return None;
            }
        };

        self.session.version = Some(status.version.clone());
        self.session.valid_to = Some(status.valid_to.clone());
        if status.expired {
            self.session.transition(SessionState::Expired);
        } else if status.invalid_env {
            self.session.transition(SessionState::InvalidEnvironment);
        }
        Some(status)
    }

    /// Ask the manager whether the partition is unlocked. `None` when unknown.
    pub fn is_unlocked(&mut self) -> Option<bool> {
        match self.service.is_unlocked() {
            Ok(unlocked) => {
                if unlocked {
                    self.session.transition(SessionState::Unlocked);
                }
                Some(unlocked)
            }
            Err(err) => {
                warn!("could not query lock state: {err}");
                None
            }
        }
    }

    /// Send the credential without waiting for a verdict.
    ///
    /// The outcome arrives later as `unlock_done` or `unlock_failed`.
    pub fn request_unlock(&mut self, credential: &Zeroizing<String>) -> LivegateResult<()> {
        if !self.session.accepts_credential() {
            return Err(LivegateError::UnlockNotAllowed(format!(
                "session is {:?}",
                self.session.state
            )));
        }
        self.service
            .unlock_with_password(credential.as_str())
            .map_err(|err| LivegateError::Manager(err.to_string()))?;
        self.session.transition(SessionState::Unlocking);
        info!("unlock requested");
        Ok(())
    }

    /// Apply a manager signal to the session and say how to react.
    pub fn handle_signal(&mut self, signal: ManagerSignal) -> SignalReaction {
        match signal {
            ManagerSignal::UnlockDone => {
                if !self.session.transition(SessionState::Unlocked) {
                    return SignalReaction::Nothing;
                }
                info!("manager reported unlock completed");
                SignalReaction::Done
            }
            ManagerSignal::UnlockFailed(reason) => {
                if !self.session.transition(SessionState::Failed(reason.clone())) {
                    return SignalReaction::Nothing;
                }
                warn!("manager reported unlock failure: {reason}");
                match reason {
                    FailureReason::Credential => SignalReaction::RetryCredential,
                    other => SignalReaction::Fatal(other.to_string()),
                }
            }
            ManagerSignal::UpdatesStatusChanged => match self.updates_status() {
                Some(status) if !status.is_idle() => SignalReaction::Notify(status.action),
                _ => SignalReaction::Nothing,
            },
        }
    }

    pub fn updates_status(&self) -> Option<UpdatesStatus> {
        match self.service.updates_status() {
            Ok(status) => {
                debug!("updates status: {} (last run {})", status.action, status.last_run);
                Some(status)
            }
            Err(err) => {
                warn!("could not fetch updates status: {err}");
                None
            }
        }
    }
}

#[cfg(test)]
mod mock {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug)]
    pub struct MockError(pub String);

    impl std::fmt::Display for MockError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(&self.0)
        }
    }

    impl std::error::Error for MockError {}

    #[derive(Debug, Default)]
    pub struct ManagerState {
        pub unlocked: bool,
        pub expired: bool,
        pub invalid_env: bool,
        pub fail_status: bool,
        pub updates_action: String,
        pub secrets: Vec<String>,
        pub subscriptions: u32,
    }

    #[derive(Clone, Default)]
    pub struct MockManager {
        pub state: Arc<Mutex<ManagerState>>,
    }

    impl MockManager {
        fn with<T>(&self, f: impl FnOnce(&mut ManagerState) -> T) -> T {
            f(&mut self.state.lock().unwrap())
        }

        fn guard(&self) -> Result<(), MockError> {
            if self.with(|s| s.fail_status) {
                Err(MockError("bus call failed".into()))
            } else {
                Ok(())
            }
        }
    }

    impl ManagerService for MockManager {
        type Error = MockError;

        fn is_unlocked(&self) -> Result<bool, Self::Error> {
            self.guard()?;
            Ok(self.with(|s| s.unlocked))
        }

        fn version(&self) -> Result<String, Self::Error> {
            self.guard()?;
            Ok("1.4.2".into())
        }

        fn valid_to(&self) -> Result<String, Self::Error> {
            self.guard()?;
            Ok("2031-01-01".into())
        }

        fn expired(&self) -> Result<bool, Self::Error> {
            self.guard()?;
            Ok(self.with(|s| s.expired))
        }

        fn invalid_env(&self) -> Result<bool, Self::Error> {
            self.guard()?;
            Ok(self.with(|s| s.invalid_env))
        }

        fn unlock_with_password(&self, secret: &str) -> Result<(), Self::Error> {
            self.with(|s| s.secrets.push(secret.to_string()));
            Ok(())
        }

        fn updates_status(&self) -> Result<UpdatesStatus, Self::Error> {
            Ok(UpdatesStatus {
                action: self.with(|s| s.updates_action.clone()),
                last_run: "2026-10-01 10:00:00".into(),
            })
        }

        fn subscribe(&self, _sink: SignalSink) -> Result<(), Self::Error> {
            self.with(|s| s.subscriptions += 1);
            Ok(())
        }
    }

    /// Connector that refuses the first `failures` attempts.
    pub struct FlakyConnector {
        pub manager: MockManager,
        pub failures: Mutex<u32>,
        pub attempts: Mutex<u32>,
    }

    impl FlakyConnector {
        pub fn new(manager: MockManager, failures: u32) -> Self {
            Self {
                manager,
                failures: Mutex::new(failures),
                attempts: Mutex::new(0),
            }
        }
    }

    impl ManagerConnector for FlakyConnector {
        type Service = MockManager;
        type Error = MockError;

        fn connect(&self) -> Result<Self::Service, Self::Error> {
            *self.attempts.lock().unwrap() += 1;
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(MockError("service unknown".into()));
            }
            Ok(self.manager.clone())
        }
    }

    pub fn sink() -> SignalSink {
        Arc::new(|_signal| {})
    }

    pub fn fast_policy(max_attempts: Option<u32>) -> RetryPolicy {
        RetryPolicy {
            interval: Duration::from_millis(1),
            max_attempts,
        }
    }
}
