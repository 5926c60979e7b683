//! Console rendering and input for the admin pages.
//!
//! Prompts run on a short-lived input thread per page and answer by posting
//! an [`AdminEvent`]; the flow itself never blocks on the terminal.

use livegate_core::devices::DeviceListener;
use livegate_core::event::EventSender;
use livegate_core::flow::admin::{AdminEvent, AdminPage};
use livegate_core::format::FormatConfig;
use livegate_core::pages::{Page, PageObserver, PageState};
use livegate_provider::DeviceInventory;
use log::warn;
use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use zeroize::Zeroizing;

/// Keeps a copy of the latest inventory for the input threads.
pub struct SharedInventory {
    devices: Arc<Mutex<DeviceInventory>>,
}

impl SharedInventory {
    pub fn new(devices: Arc<Mutex<DeviceInventory>>) -> Self {
        Self { devices }
    }
}

impl DeviceListener for SharedInventory {
    fn devices_changed(&mut self, inventory: &DeviceInventory) {
        match self.devices.lock() {
            Ok(mut devices) => *devices = inventory.clone(),
            Err(poisoned) => *poisoned.into_inner() = inventory.clone(),
        }
    }
}

pub struct TerminalPages {
    events: EventSender<AdminEvent>,
    formats: Arc<Vec<FormatConfig>>,
    devices: Arc<Mutex<DeviceInventory>>,
}

impl TerminalPages {
    pub fn new(
        events: EventSender<AdminEvent>,
        formats: Vec<FormatConfig>,
        devices: Arc<Mutex<DeviceInventory>>,
    ) -> Self {
        Self {
            events,
            formats: Arc::new(formats),
            devices,
        }
    }

    fn spawn_prompt<F>(&self, prompt: F)
    where
        F: FnOnce() -> io::Result<AdminEvent> + Send + 'static,
    {
        let events = self.events.clone();
        thread::spawn(move || match prompt() {
            Ok(event) => {
                events.post(event);
            }
            Err(err) => {
                warn!("terminal input ended: {err}");
                events.post(AdminEvent::Close);
            }
        });
    }
}

impl PageObserver<AdminPage> for TerminalPages {
    fn page_shown(&mut self, state: &PageState<AdminPage>) {
        println!();
        println!("== {} ==", state.current.title());
        if let Some(message) = &state.message {
            println!("{message}");
        }

        let actions = state.actions;
        match state.current {
            AdminPage::Message => {}
            AdminPage::Init => self.spawn_prompt(prompt_initialize),
            AdminPage::Auth => self.spawn_prompt(|| {
                let password = read_secret("Password: ")?;
                Ok(AdminEvent::Authenticate(password))
            }),
            AdminPage::Menu => self.spawn_prompt(prompt_menu),
            AdminPage::Format => {
                let formats = Arc::clone(&self.formats);
                let devices = Arc::clone(&self.devices);
                self.spawn_prompt(move || prompt_format(&formats, &devices));
            }
            AdminPage::PasswordChange => self.spawn_prompt(prompt_password_change),
            AdminPage::Error => self.spawn_prompt(move || {
                read_line("Press Enter to continue. ")?;
                Ok(if actions.back {
                    AdminEvent::Back
                } else {
                    AdminEvent::Close
                })
            }),
        }
    }
}

fn read_line(prompt: &str) -> io::Result<String> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "end of input"));
    }
    Ok(line.trim().to_string())
}

fn read_secret(prompt: &str) -> io::Result<Zeroizing<String>> {
    rpassword::prompt_password(prompt).map(Zeroizing::new)
}

/// Ask twice until both entries match.
fn read_confirmed_secret(prompt: &str) -> io::Result<Zeroizing<String>> {
    loop {
        let first = read_secret(prompt)?;
        let second = read_secret("Confirm: ")?;
        if first.as_str() == second.as_str() {
            return Ok(first);
        }
        println!("Entries differ, try again.");
    }
}

fn prompt_initialize() -> io::Result<AdminEvent> {
    let password = read_confirmed_secret("New password: ")?;
    Ok(AdminEvent::Initialize(password))
}

fn prompt_menu() -> io::Result<AdminEvent> {
    println!("  1) Format a device");
    println!("  2) Change password");
    println!("  3) Log out");
    println!("  q) Quit");
    loop {
        match read_line("> ")?.as_str() {
            "1" => return Ok(AdminEvent::Navigate(AdminPage::Format)),
            "2" => return Ok(AdminEvent::Navigate(AdminPage::PasswordChange)),
            "3" => return Ok(AdminEvent::Logout),
            "q" => return Ok(AdminEvent::Close),
            _ => println!("Unknown choice."),
        }
    }
}

fn prompt_password_change() -> io::Result<AdminEvent> {
    println!("Leave the current password empty to go back.");
    let current = read_secret("Current password: ")?;
    if current.is_empty() {
        return Ok(AdminEvent::Back);
    }
    let new = read_confirmed_secret("New password: ")?;
    Ok(AdminEvent::ChangePassword { current, new })
}

/// Pick an entry by 1-based index; `b` goes back.
fn choose(prompt: &str, count: usize) -> io::Result<Option<usize>> {
    loop {
        let answer = read_line(prompt)?;
        if answer == "b" {
            return Ok(None);
        }
        match answer.parse::<usize>() {
            Ok(index) if (1..=count).contains(&index) => return Ok(Some(index - 1)),
            _ => println!("Enter a number between 1 and {count}, or b."),
        }
    }
}

fn prompt_format(
    formats: &[FormatConfig],
    devices: &Mutex<DeviceInventory>,
) -> io::Result<AdminEvent> {
    if formats.is_empty() {
        println!("No format configuration available.");
        read_line("Press Enter to go back. ")?;
        return Ok(AdminEvent::Back);
    }
    for (index, format) in formats.iter().enumerate() {
        println!("  {}) {} {}", index + 1, format.id, format.description);
    }
    let Some(choice) = choose("Configuration (b to go back): ", formats.len())? else {
        return Ok(AdminEvent::Back);
    };
    let format = &formats[choice];

    let keys: Vec<(String, String)> = {
        let inventory = match devices.lock() {
            Ok(inventory) => inventory,
            Err(poisoned) => poisoned.into_inner(),
        };
        inventory
            .iter()
            .map(|(key, record)| (key.to_string(), record.describe()))
            .collect()
    };
    let device = if keys.is_empty() {
        println!("No device plugged.");
        None
    } else {
        for (index, (_, description)) in keys.iter().enumerate() {
            println!("  {}) {description}", index + 1);
        }
        match choose("Device (b to go back): ", keys.len())? {
            Some(index) => Some(keys[index].0.clone()),
            None => return Ok(AdminEvent::Back),
        }
    };

    let mut values = BTreeMap::new();
    for name in format.user_parameters() {
        let value = if name.starts_with("password") {
            read_confirmed_secret(&format!("{name}: "))?.as_str().to_string()
        } else {
            read_line(&format!("{name}: "))?
        };
        if !value.is_empty() {
            values.insert(name.to_string(), value);
        }
    }

    Ok(AdminEvent::Format {
        config_id: format.id.clone(),
        values,
        device,
    })
}
