//! Console rendering of the unlock pages.

use livegate_core::event::EventSender;
use livegate_core::flow::unlock::{UnlockEvent, UnlockPage};
use livegate_core::pages::{Page, PageObserver, PageState};
use log::warn;
use std::io::{self, BufRead};
use std::thread;
use zeroize::Zeroizing;

pub struct TerminalPages {
    events: EventSender<UnlockEvent>,
}

impl TerminalPages {
    pub fn new(events: EventSender<UnlockEvent>) -> Self {
        Self { events }
    }

    fn prompt_credential(&self) {
        let events = self.events.clone();
        thread::spawn(move || match rpassword::prompt_password("Password: ") {
            Ok(secret) => {
                events.post(UnlockEvent::Credential(Zeroizing::new(secret)));
            }
            Err(err) => {
                warn!("cannot read password: {err}");
                events.post(UnlockEvent::Close);
            }
        });
    }

    fn wait_for_close(&self) {
        let events = self.events.clone();
        thread::spawn(move || {
            println!("Press Enter to close.");
            let mut line = String::new();
            let _ = io::stdin().lock().read_line(&mut line);
            events.post(UnlockEvent::Close);
        });
    }
}

impl PageObserver<UnlockPage> for TerminalPages {
    fn page_shown(&mut self, state: &PageState<UnlockPage>) {
        println!("== {} ==", state.current.title());
        if let Some(message) = &state.message {
            println!("{message}");
        }
        match state.current {
            UnlockPage::Credential => self.prompt_credential(),
            UnlockPage::Done | UnlockPage::Error if state.actions.close => self.wait_for_close(),
            _ => {}
        }
    }
}
