//! Page navigation shared by the unlock and admin applications.
//!
//! Each application defines its own fixed page enum implementing [`Page`];
//! which actions a page offers is data attached to the page, while the
//! transitions themselves are explicit calls made by the flow code.

use log::{debug, warn};
use std::fmt;

/// Which window-level actions are currently offered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionSet {
    pub back: bool,
    pub close: bool,
    pub ok: bool,
    pub cancel: bool,
}

impl ActionSet {
    pub const NONE: ActionSet = ActionSet {
        back: false,
        close: false,
        ok: false,
        cancel: false,
    };

    /// Only closing the application remains possible.
    pub const CLOSE_ONLY: ActionSet = ActionSet {
        back: false,
        close: true,
        ok: false,
        cancel: false,
    };

    pub const fn with_back(mut self) -> Self {
        self.back = true;
        self
    }

    pub const fn with_close(mut self) -> Self {
        self.close = true;
        self
    }

    pub const fn with_ok(mut self) -> Self {
        self.ok = true;
        self
    }

    pub const fn with_cancel(mut self) -> Self {
        self.cancel = true;
        self
    }
}

/// A named page of one application's navigation graph.
pub trait Page: Copy + Eq + fmt::Debug {
    /// Actions offered when the page is shown without overrides.
    fn default_actions(self) -> ActionSet;

    /// Page used to display a fatal error.
    fn error_page() -> Self;

    fn title(self) -> &'static str;
}

/// Everything a renderer needs to draw the current page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageState<P> {
    pub current: P,
    pub actions: ActionSet,
    pub message: Option<String>,
    pub fatal: bool,
}

/// Reacts to pages becoming visible.
pub trait PageObserver<P: Page> {
    fn page_shown(&mut self, state: &PageState<P>);
}

/// Owns the current [`PageState`] and broadcasts every transition.
pub struct PageController<P: Page> {
    state: PageState<P>,
    observers: Vec<Box<dyn PageObserver<P>>>,
    transitions: u64,
}

impl<P: Page> PageController<P> {
    pub fn new(initial: P) -> Self {
        Self {
            state: PageState {
                current: initial,
                actions: initial.default_actions(),
                message: None,
                fatal: false,
            },
            observers: Vec::new(),
            transitions: 0,
        }
    }

    pub fn subscribe(&mut self, observer: Box<dyn PageObserver<P>>) {
        self.observers.push(observer);
    }

    pub fn state(&self) -> &PageState<P> {
        &self.state
    }

    pub fn current(&self) -> P {
        self.state.current
    }

    pub fn is_fatal(&self) -> bool {
        self.state.fatal
    }

    /// Number of successful transitions so far.
    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    /// Show `page`, optionally overriding whether going back is allowed.
    ///
    /// Returns `false`, leaving everything untouched, once a fatal error is
    /// displayed.
    pub fn show_page(&mut self, page: P, back: Option<bool>) -> bool {
        self.enter(page, back, None)
    }

    /// Show `page` with an accompanying message (progress or non-fatal error).
    pub fn show_message(&mut self, page: P, message: impl Into<String>, back: Option<bool>) -> bool {
        self.enter(page, back, Some(message.into()))
    }

    /// Terminal transition to the error page; only closing stays enabled.
    pub fn show_fatal_error(&mut self, message: impl Into<String>) -> bool {
        if self.state.fatal {
            warn!("fatal error already displayed; ignoring another one");
            return false;
        }
        let message = message.into();
        warn!("fatal error: {message}");
        self.state = PageState {
            current: P::error_page(),
            actions: ActionSet::CLOSE_ONLY,
            message: Some(message),
            fatal: true,
        };
        self.transitions += 1;
        self.broadcast();
        true
    }

    fn enter(&mut self, page: P, back: Option<bool>, message: Option<String>) -> bool {
        if self.state.fatal {
            debug!("refusing transition to {page:?} after a fatal error");
            return false;
        }
        let mut actions = page.default_actions();
        if let Some(back) = back {
            actions.back = back;
        }
        debug!("page {:?} -> {page:?}", self.state.current);
        self.state = PageState {
            current: page,
            actions,
            message,
            fatal: false,
        };
        self.transitions += 1;
        self.broadcast();
        true
    }

    fn broadcast(&mut self) {
        for observer in &mut self.observers {
            observer.page_shown(&self.state);
        }
    }
}
