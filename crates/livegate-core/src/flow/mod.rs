//! Orchestration of the two applications on top of the core components.
//!
//! Each flow owns its [`crate::event::EventLoop`] and handles one event at a
//! time on the interactive thread. Panics escaping a handler are contained
//! here and turned into a generic error page.

pub mod admin;
pub mod unlock;

use crate::job::panic_message;
use log::error;
use std::panic::{self, AssertUnwindSafe};

/// Text shown when a handler failed in an unexpected way.
pub const GENERIC_ERROR: &str = "An unexpected error occurred";

/// Run `handler`, returning `None` if it panicked.
pub(crate) fn guarded<R>(what: &str, handler: impl FnOnce() -> R) -> Option<R> {
    match panic::catch_unwind(AssertUnwindSafe(handler)) {
        Ok(value) => Some(value),
        Err(payload) => {
            error!("{what} handler panicked: {}", panic_message(payload.as_ref()));
            None
        }
    }
}
