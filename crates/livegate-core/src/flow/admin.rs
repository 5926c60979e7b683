//! The admin application: lifecycle operations on the internal partition
//! and formatting of plugged devices.

use crate::bootstrap::{BootstrapDecision, EnvironmentFlags, SessionBootstrap};
use crate::devices::{DeviceMonitor, HotplugSource};
use crate::error::JobError;
use crate::event::{EventLoop, EventSender};
use crate::flow::{guarded, GENERIC_ERROR};
use crate::format::{FormatConfig, FormatRequest};
use crate::job::{JobOutcome, JobRunner};
use crate::pages::{ActionSet, Page, PageController, PageObserver, PageState};
use chrono::Utc;
use livegate_provider::{AdminBackend, AdminContext, AdminOperation, DeviceEnumerator};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Pages of the admin application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminPage {
    /// Progress or information while an operation runs.
    Message,
    Init,
    Auth,
    Menu,
    Format,
    PasswordChange,
    Error,
}

impl Page for AdminPage {
    fn default_actions(self) -> ActionSet {
        match self {
            AdminPage::Message => ActionSet::NONE,
            AdminPage::Init | AdminPage::Auth => ActionSet::NONE.with_ok().with_close(),
            AdminPage::Menu => ActionSet::CLOSE_ONLY,
            AdminPage::Format | AdminPage::PasswordChange => {
                ActionSet::NONE.with_back().with_ok()
            }
            AdminPage::Error => ActionSet::NONE.with_back().with_close(),
        }
    }

    fn error_page() -> Self {
        AdminPage::Error
    }

    fn title(self) -> &'static str {
        match self {
            AdminPage::Message => "Please wait",
            AdminPage::Init => "Initialize",
            AdminPage::Auth => "Authenticate",
            AdminPage::Menu => "Administration",
            AdminPage::Format => "Format a device",
            AdminPage::PasswordChange => "Change password",
            AdminPage::Error => "Error",
        }
    }
}

/// Everything the admin application reacts to.
pub enum AdminEvent {
    /// Device directory activity; drain the hotplug source.
    Hotplug,
    /// Re-enumerate devices without settling first.
    RefreshDevices,
    Initialize(Zeroizing<String>),
    Authenticate(Zeroizing<String>),
    Format {
        config_id: String,
        values: BTreeMap<String, String>,
        device: Option<String>,
    },
    ChangePassword {
        current: Zeroizing<String>,
        new: Zeroizing<String>,
    },
    Logout,
    Navigate(AdminPage),
    Back,
    Close,
}

impl std::fmt::Debug for AdminEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdminEvent::Hotplug => f.write_str("Hotplug"),
            AdminEvent::RefreshDevices => f.write_str("RefreshDevices"),
            AdminEvent::Initialize(_) => f.write_str("Initialize(..)"),
            AdminEvent::Authenticate(_) => f.write_str("Authenticate(..)"),
            AdminEvent::Format {
                config_id, device, ..
            } => f
                .debug_struct("Format")
                .field("config_id", config_id)
                .field("device", device)
                .finish_non_exhaustive(),
            AdminEvent::ChangePassword { .. } => f.write_str("ChangePassword(..)"),
            AdminEvent::Logout => f.write_str("Logout"),
            AdminEvent::Navigate(page) => f.debug_tuple("Navigate").field(page).finish(),
            AdminEvent::Back => f.write_str("Back"),
            AdminEvent::Close => f.write_str("Close"),
        }
    }
}

/// Requests a device refresh whenever the format page becomes visible.
pub struct DeviceListObserver {
    events: EventSender<AdminEvent>,
}

impl DeviceListObserver {
    pub fn new(events: EventSender<AdminEvent>) -> Self {
        Self { events }
    }
}

impl PageObserver<AdminPage> for DeviceListObserver {
    fn page_shown(&mut self, state: &PageState<AdminPage>) {
        if state.current == AdminPage::Format {
            self.events.post(AdminEvent::RefreshDevices);
        }
    }
}

/// Admin application state and event handling.
pub struct AdminFlow<C, B, E> {
    context: Arc<C>,
    backend: Arc<B>,
    monitor: DeviceMonitor<E>,
    runner: JobRunner,
    formats: Vec<FormatConfig>,
    hotplug: Box<dyn HotplugSource>,
    pages: PageController<AdminPage>,
    events: EventLoop<AdminEvent>,
    closed: bool,
}

impl<C, B, E> AdminFlow<C, B, E>
where
    C: AdminContext + Send + Sync + 'static,
    B: AdminBackend + Send + Sync + 'static,
    E: DeviceEnumerator + Send + Sync + 'static,
{
    pub fn new(
        context: C,
        backend: Arc<B>,
        monitor: DeviceMonitor<E>,
        runner: JobRunner,
        formats: Vec<FormatConfig>,
        hotplug: Box<dyn HotplugSource>,
        events: EventLoop<AdminEvent>,
    ) -> Self {
        let mut pages = PageController::new(AdminPage::Message);
        pages.subscribe(Box::new(DeviceListObserver::new(events.sender())));
        Self {
            context: Arc::new(context),
            backend,
            monitor,
            runner,
            formats,
            hotplug,
            pages,
            events,
            closed: false,
        }
    }

    pub fn pages(&self) -> &PageController<AdminPage> {
        &self.pages
    }

    pub fn pages_mut(&mut self) -> &mut PageController<AdminPage> {
        &mut self.pages
    }

    pub fn monitor(&self) -> &DeviceMonitor<E> {
        &self.monitor
    }

    pub fn monitor_mut(&mut self) -> &mut DeviceMonitor<E> {
        &mut self.monitor
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn formats(&self) -> &[FormatConfig] {
        &self.formats
    }

    pub fn sender(&self) -> EventSender<AdminEvent> {
        self.events.sender()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Enumerate devices once and pick the first page.
    pub fn start(&mut self) -> BootstrapDecision {
        if let Err(err) = self
            .monitor
            .update(false, &self.runner, &mut self.events)
        {
            warn!("initial device enumeration failed: {err}");
        }

        let decision = SessionBootstrap::new(EnvironmentFlags::from_admin(self.context.as_ref())).run();
        match &decision {
            BootstrapDecision::Fatal(message) => {
                self.pages.show_fatal_error(message.clone());
            }
            BootstrapDecision::Initialize => {
                self.pages.show_page(AdminPage::Init, None);
            }
            BootstrapDecision::Authenticate => {
                self.pages.show_page(AdminPage::Auth, None);
            }
            BootstrapDecision::Menu => {
                self.pages.show_page(AdminPage::Menu, None);
            }
        }
        decision
    }

    pub fn run(&mut self) {
        while !self.closed {
            match self.events.next() {
                Some(event) => self.dispatch(event),
                None => break,
            }
        }
    }

    /// Handle every event already queued, including ones queued meanwhile.
    pub fn run_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.events.try_next() {
            self.dispatch(event);
            handled += 1;
        }
        handled
    }

    /// Handle one event, containing any panic it causes.
    pub fn dispatch(&mut self, event: AdminEvent) {
        if guarded("admin event", || self.handle(event)).is_none() {
            self.pages.show_fatal_error(GENERIC_ERROR);
        }
    }

    fn handle(&mut self, event: AdminEvent) {
        debug!("admin event {event:?} on page {:?}", self.pages.current());
        if self.pages.is_fatal() && !matches!(event, AdminEvent::Close) {
            warn!("ignoring {event:?}: a fatal error is displayed");
            return;
        }
        match event {
            AdminEvent::Hotplug => self.on_hotplug(),
            AdminEvent::RefreshDevices => {
                if let Err(err) = self.monitor.update(false, &self.runner, &mut self.events) {
                    warn!("device refresh failed: {err}");
                }
            }
            AdminEvent::Initialize(password) => {
                if self.requires_page(AdminPage::Init, "initialization") {
                    let op = AdminOperation::Initialize { password };
                    self.run_operation(op, AdminPage::Init, AdminPage::Menu);
                }
            }
            AdminEvent::Authenticate(password) => {
                if self.requires_page(AdminPage::Auth, "authentication") {
                    let op = AdminOperation::Authenticate { password };
                    self.run_operation(op, AdminPage::Auth, AdminPage::Menu);
                }
            }
            AdminEvent::Format {
                config_id,
                values,
                device,
            } => {
                if self.requires_page(AdminPage::Format, "format") {
                    self.on_format(&config_id, &values, device.as_deref());
                }
            }
            AdminEvent::ChangePassword { current, new } => {
                if self.requires_page(AdminPage::PasswordChange, "password change") {
                    let op = AdminOperation::ChangePassword { current, new };
                    if self.run_operation(op, AdminPage::PasswordChange, AdminPage::Menu) {
                        self.pages
                            .show_message(AdminPage::Menu, "Password changed", None);
                    }
                }
            }
            AdminEvent::Logout => {
                if self.requires_page(AdminPage::Menu, "logout") {
                    self.on_logout();
                }
            }
            AdminEvent::Navigate(page) => self.on_navigate(page),
            AdminEvent::Back => {
                if self.pages.state().actions.back {
                    self.pages.show_page(AdminPage::Menu, None);
                }
            }
            AdminEvent::Close => {
                if self.pages.state().actions.close {
                    info!("admin application closed");
                    self.closed = true;
                }
            }
        }
    }

    /// Operations are only accepted from the page that offers them.
    fn requires_page(&self, page: AdminPage, what: &str) -> bool {
        let current = self.pages.current();
        if current != page {
            warn!("{what} requested on page {current:?}; ignoring");
        }
        current == page
    }

    fn on_hotplug(&mut self) {
        match self
            .monitor
            .on_hotplug(self.hotplug.as_mut(), &self.runner, &mut self.events)
        {
            Ok(None) => debug!("hotplug burst without whole-device changes"),
            Ok(Some(changed)) => debug!("hotplug refresh done (changed: {changed})"),
            Err(err) => warn!("hotplug refresh failed: {err}"),
        }
    }

    fn on_navigate(&mut self, page: AdminPage) {
        let allowed = self.pages.current() == AdminPage::Menu
            && matches!(page, AdminPage::Format | AdminPage::PasswordChange);
        if allowed {
            self.pages.show_page(page, None);
        } else {
            warn!(
                "navigation from {:?} to {page:?} is not offered",
                self.pages.current()
            );
        }
    }

    fn on_format(
        &mut self,
        config_id: &str,
        values: &BTreeMap<String, String>,
        device: Option<&str>,
    ) {
        let Some(config) = self.formats.iter().find(|format| format.id == config_id) else {
            self.pages.show_message(
                AdminPage::Format,
                format!("Unknown format configuration `{config_id}`"),
                None,
            );
            return;
        };
        let device_path = device
            .and_then(|key| self.monitor.inventory().get(key))
            .map(|record| record.path.clone());

        let request =
            match FormatRequest::build(config, values, device_path.as_deref(), Utc::now()) {
                Ok(request) => request,
                Err(err) => {
                    self.pages
                        .show_message(AdminPage::Format, err.to_string(), None);
                    return;
                }
            };

        info!("formatting {} with `{}`", request.device.display(), request.config_id);
        // Showing the format page again queues the device refresh.
        self.run_operation(request.into_operation(), AdminPage::Format, AdminPage::Format);
    }

    fn on_logout(&mut self) {
        let context = Arc::clone(&self.context);
        let locked = self.run_job("Logging out", AdminPage::Menu, AdminPage::Auth, move || {
            context
                .logout()
                .map(|()| String::new())
                .map_err(|err| JobError::Failed(format!("Logout failed: {err}")))
        });
        if locked {
            info!("internal partition locked");
        }
    }

    /// Run `op` as a job; on failure show the error on `origin`.
    fn run_operation(&mut self, op: AdminOperation, origin: AdminPage, success: AdminPage) -> bool {
        let backend = Arc::clone(&self.backend);
        self.run_job(op.label(), origin, success, move || {
            backend
                .run(&op)
                .map_err(|err| JobError::Failed(err.to_string()))
        })
    }

    /// Show progress, run `work` off the interactive thread and move to
    /// `success`, or back to `origin` with the error.
    fn run_job<F>(
        &mut self,
        label: &'static str,
        origin: AdminPage,
        success: AdminPage,
        work: F,
    ) -> bool
    where
        F: FnOnce() -> Result<String, JobError> + Send + 'static,
    {
        self.pages
            .show_message(AdminPage::Message, label, Some(false));

        let handle = self.runner.submit(label, work);

        match self.runner.wait_interactive(handle, &mut self.events) {
            JobOutcome::Succeeded(output) => {
                info!("{label}: done");
                if !output.trim().is_empty() {
                    debug!("{label} output: {}", output.trim());
                }
                self.pages.show_page(success, None);
                true
            }
            JobOutcome::Failed(err) => {
                warn!("{label} failed: {err}");
                self.pages.show_message(origin, err.to_string(), None);
                false
            }
        }
    }
}
