//! The unlock application: wait for the manager, collect the credential and
//! follow the manager's verdict.

use crate::bootstrap::{BootstrapDecision, EnvironmentFlags, SessionBootstrap};
use crate::config::UserSetting;
use crate::error::LivegateError;
use crate::event::{EventLoop, EventSender};
use crate::flow::{guarded, GENERIC_ERROR};
use crate::pages::{ActionSet, Page, PageController};
use crate::unlock::{SignalReaction, UnlockClient};
use livegate_provider::{ManagerService, ManagerSignal, SessionEnvironment, SignalSink};
use log::{debug, info, warn};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use zeroize::Zeroizing;

/// Pages of the unlock application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockPage {
    Wait,
    Credential,
    Unlocking,
    Done,
    Error,
}

impl Page for UnlockPage {
    fn default_actions(self) -> ActionSet {
        match self {
            UnlockPage::Wait | UnlockPage::Unlocking => ActionSet::NONE,
            UnlockPage::Credential => ActionSet::NONE.with_ok(),
            UnlockPage::Done | UnlockPage::Error => ActionSet::CLOSE_ONLY,
        }
    }

    fn error_page() -> Self {
        UnlockPage::Error
    }

    fn title(self) -> &'static str {
        match self {
            UnlockPage::Wait => "Please wait",
            UnlockPage::Credential => "Enter your password",
            UnlockPage::Unlocking => "Unlocking",
            UnlockPage::Done => "Unlocked",
            UnlockPage::Error => "Error",
        }
    }
}

/// Everything the unlock application reacts to.
pub enum UnlockEvent {
    Signal(ManagerSignal),
    Credential(Zeroizing<String>),
    Close,
}

impl std::fmt::Debug for UnlockEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnlockEvent::Signal(signal) => f.debug_tuple("Signal").field(signal).finish(),
            UnlockEvent::Credential(_) => f.write_str("Credential(..)"),
            UnlockEvent::Close => f.write_str("Close"),
        }
    }
}

/// Build a signal sink that forwards manager signals onto the loop.
pub fn signal_sink(events: EventSender<UnlockEvent>) -> SignalSink {
    Arc::new(move |signal| {
        if !events.post(UnlockEvent::Signal(signal)) {
            debug!("unlock loop gone; dropping manager signal");
        }
    })
}

/// Poll until the graphical session is reachable, then apply user settings.
///
/// `max_polls` of `None` waits forever. Returns whether the environment got
/// defined.
pub fn prepare_session<N: SessionEnvironment>(
    env: &mut N,
    settings: &[UserSetting],
    poll: Duration,
    max_polls: Option<u32>,
) -> bool {
    let mut polls: u32 = 0;
    while !env.define_ui_environment() {
        polls = polls.saturating_add(1);
        if max_polls.is_some_and(|max| polls >= max) {
            warn!("no graphical session after {polls} attempt(s)");
            return false;
        }
        debug!("graphical session not ready; retrying in {poll:?}");
        thread::sleep(poll);
    }
    for setting in settings {
        env.user_setting_set(&setting.schema, &setting.key, &setting.value);
    }
    info!("UI environment defined; applied {} setting(s)", settings.len());
    true
}

/// Unlock application state and event handling.
pub struct UnlockFlow<S, N> {
    client: UnlockClient<S>,
    env: N,
    pages: PageController<UnlockPage>,
    events: EventLoop<UnlockEvent>,
    notifications: u32,
    closed: bool,
}

impl<S: ManagerService, N: SessionEnvironment> UnlockFlow<S, N> {
    pub fn new(client: UnlockClient<S>, env: N, events: EventLoop<UnlockEvent>) -> Self {
        Self {
            client,
            env,
            pages: PageController::new(UnlockPage::Wait),
            events,
            notifications: 0,
            closed: false,
        }
    }

    pub fn pages(&self) -> &PageController<UnlockPage> {
        &self.pages
    }

    pub fn pages_mut(&mut self) -> &mut PageController<UnlockPage> {
        &mut self.pages
    }

    pub fn client(&self) -> &UnlockClient<S> {
        &self.client
    }

    pub fn sender(&self) -> EventSender<UnlockEvent> {
        self.events.sender()
    }

    /// Notifications surfaced so far.
    pub fn notifications(&self) -> u32 {
        self.notifications
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Query the manager and pick the first page.
    pub fn start(&mut self) -> BootstrapDecision {
        let status = self.client.query_status();
        let unlocked = self.client.is_unlocked().unwrap_or(false);
        let flags = match &status {
            Some(status) => EnvironmentFlags::from_status(status, unlocked),
            None => {
                warn!("manager status unknown; offering credential entry");
                EnvironmentFlags {
                    initialized: true,
                    unlocked,
                    ..EnvironmentFlags::default()
                }
            }
        };

        let decision = SessionBootstrap::new(flags).run();
        match &decision {
            BootstrapDecision::Fatal(message) => {
                self.pages.show_fatal_error(message.clone());
            }
            BootstrapDecision::Initialize | BootstrapDecision::Authenticate => {
                self.pages.show_page(UnlockPage::Credential, None);
            }
            BootstrapDecision::Menu => {
                self.pages.show_page(UnlockPage::Done, None);
            }
        }
        decision
    }

    /// Handle events until the application is closed.
    pub fn run(&mut self) {
        while !self.closed {
            match self.events.next() {
                Some(event) => self.dispatch(event),
                None => break,
            }
        }
    }

    /// Handle every event already queued; used by tests and polling front-ends.
    pub fn run_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.events.try_next() {
            self.dispatch(event);
            handled += 1;
        }
        handled
    }

    /// Handle one event, containing any panic it causes.
    pub fn dispatch(&mut self, event: UnlockEvent) {
        if guarded("unlock event", || self.handle(event)).is_none() {
            self.pages.show_fatal_error(GENERIC_ERROR);
        }
    }

    fn handle(&mut self, event: UnlockEvent) {
        match event {
            UnlockEvent::Signal(signal) => self.on_signal(signal),
            UnlockEvent::Credential(secret) => self.on_credential(secret),
            UnlockEvent::Close => {
                if self.pages.state().actions.close {
                    info!("unlock application closed");
                    self.closed = true;
                } else {
                    debug!("close requested while not offered");
                }
            }
        }
    }

    fn on_signal(&mut self, signal: ManagerSignal) {
        match self.client.handle_signal(signal) {
            SignalReaction::RetryCredential => {
                self.pages.show_page(UnlockPage::Credential, None);
            }
            SignalReaction::Fatal(message) => {
                self.pages.show_fatal_error(message);
            }
            SignalReaction::Done => {
                self.pages.show_page(UnlockPage::Done, None);
            }
            SignalReaction::Notify(message) => {
                self.env.notify(&message);
                self.notifications += 1;
            }
            SignalReaction::Nothing => {}
        }
    }

    fn on_credential(&mut self, secret: Zeroizing<String>) {
        if self.pages.current() != UnlockPage::Credential {
            warn!(
                "credential submitted on page {:?}; ignoring",
                self.pages.current()
            );
            return;
        }
        match self.client.request_unlock(&secret) {
            Ok(()) => {
                self.pages.show_page(UnlockPage::Unlocking, None);
            }
            Err(LivegateError::UnlockNotAllowed(reason)) => {
                warn!("unlock refused locally: {reason}");
            }
            Err(err) => {
                self.pages
                    .show_message(UnlockPage::Credential, err.to_string(), None);
            }
        }
    }
}
