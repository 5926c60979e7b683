use livegate_core::devices::DeviceMonitor;
use livegate_core::error::{LivegateError, LivegateResult};
use livegate_core::event::EventLoop;
use livegate_core::flow::admin::{AdminEvent, AdminFlow, AdminPage};
use livegate_core::format::FormatConfig;
use livegate_core::job::JobRunner;
use livegate_core::BootstrapDecision;
use livegate_provider::{
    AdminBackend, AdminContext, AdminOperation, DeviceEnumerator, DeviceInventory, DeviceRecord,
    HotplugEvent, HotplugKind,
};
use std::collections::BTreeMap;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use zeroize::Zeroizing;

type Flow = AdminFlow<MockContext, MockBackend, MockEnumerator>;

#[test]
fn invalid_device_is_fatal_at_startup() {
    let harness = Harness::new(|c| c.valid = false);
    let mut flow = harness.flow;
    assert!(matches!(flow.start(), BootstrapDecision::Fatal(_)));
    assert!(flow.pages().is_fatal());

    flow.dispatch(AdminEvent::Navigate(AdminPage::Format));
    assert_eq!(flow.pages().current(), AdminPage::Error);
}

#[test]
fn fatal_page_blocks_every_operation() {
    let harness = Harness::new(|c| {
        c.valid = false;
        c.unlocked = true;
    });
    let mut flow = harness.flow;
    assert!(matches!(flow.start(), BootstrapDecision::Fatal(_)));

    flow.dispatch(AdminEvent::Initialize(Zeroizing::new("x".into())));
    flow.dispatch(AdminEvent::Authenticate(Zeroizing::new("x".into())));
    flow.dispatch(format_event(Some("sdb")));
    flow.dispatch(AdminEvent::ChangePassword {
        current: Zeroizing::new("a".into()),
        new: Zeroizing::new("b".into()),
    });
    flow.dispatch(AdminEvent::Logout);

    assert!(harness.backend.operations().is_empty());
    assert!(flow.context().is_unlocked());
    assert_eq!(flow.pages().current(), AdminPage::Error);
    assert!(flow.pages().is_fatal());

    flow.dispatch(AdminEvent::Close);
    assert!(flow.is_closed());
}

#[test]
fn operations_are_only_accepted_on_their_page() {
    let harness = Harness::new(|c| c.unlocked = true);
    let mut flow = harness.flow;
    assert_eq!(flow.start(), BootstrapDecision::Menu);

    flow.dispatch(AdminEvent::Initialize(Zeroizing::new("x".into())));
    flow.dispatch(AdminEvent::Authenticate(Zeroizing::new("x".into())));
    flow.dispatch(format_event(Some("sdb")));
    flow.dispatch(AdminEvent::ChangePassword {
        current: Zeroizing::new("a".into()),
        new: Zeroizing::new("b".into()),
    });
    assert!(harness.backend.operations().is_empty());
    assert_eq!(flow.pages().current(), AdminPage::Menu);

    flow.dispatch(AdminEvent::Navigate(AdminPage::Format));
    flow.dispatch(AdminEvent::Logout);
    assert!(flow.context().is_unlocked());
    assert_eq!(flow.pages().current(), AdminPage::Format);
}

#[test]
fn initialization_runs_as_job_and_reaches_menu() {
    let harness = Harness::new(|c| c.initialized = false);
    let mut flow = harness.flow;
    assert_eq!(flow.start(), BootstrapDecision::Initialize);
    assert_eq!(flow.pages().current(), AdminPage::Init);

    flow.dispatch(AdminEvent::Initialize(Zeroizing::new("s3cret".into())));
    assert_eq!(flow.pages().current(), AdminPage::Menu);
    assert_eq!(
        harness.backend.operations(),
        vec![AdminOperation::Initialize {
            password: Zeroizing::new("s3cret".into())
        }]
    );
}

#[test]
fn failed_authentication_returns_to_auth_page_with_message() {
    let harness = Harness::new(|_| {});
    harness.backend.fail_with("wrong password");
    let mut flow = harness.flow;
    assert_eq!(flow.start(), BootstrapDecision::Authenticate);

    flow.dispatch(AdminEvent::Authenticate(Zeroizing::new("nope".into())));
    let state = flow.pages().state();
    assert_eq!(state.current, AdminPage::Auth);
    assert!(!state.fatal);
    assert!(state.message.as_deref().unwrap().contains("wrong password"));
}

#[test]
fn panicking_backend_is_reported_as_operation_failure() {
    let harness = Harness::new(|c| c.unlocked = true);
    harness.backend.panic_on_run();
    let mut flow = harness.flow;
    flow.start();
    flow.dispatch(AdminEvent::Navigate(AdminPage::PasswordChange));

    flow.dispatch(AdminEvent::ChangePassword {
        current: Zeroizing::new("old".into()),
        new: Zeroizing::new("new".into()),
    });
    let state = flow.pages().state();
    assert_eq!(state.current, AdminPage::PasswordChange);
    assert!(!state.fatal);
    assert!(state.message.as_deref().unwrap().contains("panicked"));
}

#[test]
fn showing_format_page_refreshes_devices() {
    let harness = Harness::new(|c| c.unlocked = true);
    let mut flow = harness.flow;
    assert_eq!(flow.start(), BootstrapDecision::Menu);
    assert_eq!(harness.enumerator.calls(), 1);

    flow.dispatch(AdminEvent::Navigate(AdminPage::Format));
    assert_eq!(flow.pages().current(), AdminPage::Format);
    assert_eq!(flow.run_pending(), 1);
    assert_eq!(harness.enumerator.calls(), 2);

    flow.dispatch(AdminEvent::Back);
    assert_eq!(flow.pages().current(), AdminPage::Menu);
    assert_eq!(flow.run_pending(), 0);
}

#[test]
fn format_requires_a_selected_device() {
    let harness = Harness::new(|c| c.unlocked = true);
    let mut flow = harness.flow;
    flow.start();
    flow.dispatch(AdminEvent::Navigate(AdminPage::Format));

    flow.dispatch(format_event(None));
    assert_eq!(flow.pages().current(), AdminPage::Format);
    assert_eq!(
        flow.pages().state().message.as_deref(),
        Some("No device selected")
    );
    assert!(harness.backend.operations().is_empty());
}

#[test]
fn successful_format_runs_tool_and_refreshes_inventory() {
    let harness = Harness::new(|c| c.unlocked = true);
    let mut flow = harness.flow;
    flow.start();
    flow.dispatch(AdminEvent::Navigate(AdminPage::Format));
    flow.run_pending();
    let before = harness.enumerator.calls();

    flow.dispatch(format_event(Some("sdb")));
    assert_eq!(flow.pages().current(), AdminPage::Format);
    assert_eq!(flow.run_pending(), 1);
    assert_eq!(harness.enumerator.calls(), before + 1);

    let operations = harness.backend.operations();
    assert_eq!(operations.len(), 1);
    match &operations[0] {
        AdminOperation::Format {
            config_id,
            params,
            device,
        } => {
            assert_eq!(config_id, "office-usb");
            assert_eq!(device.to_str(), Some("/dev/sdb"));
            assert_eq!(params["confid"], "office-usb");
            assert_eq!(params["fs-data"], "exfat");
            assert_eq!(params["password-user"], "pw");
        }
        other => panic!("unexpected operation {other:?}"),
    }
}

#[test]
fn hotplug_bursts_of_partitions_are_ignored() {
    let harness = Harness::new(|c| c.unlocked = true);
    let mut flow = harness.flow;
    flow.start();
    assert_eq!(harness.enumerator.calls(), 1);

    harness.hotplug.send(HotplugEvent::new("sdb1", HotplugKind::Created)).unwrap();
    harness.hotplug.send(HotplugEvent::new("sdb2", HotplugKind::Created)).unwrap();
    flow.dispatch(AdminEvent::Hotplug);
    assert_eq!(harness.enumerator.calls(), 1);

    harness.enumerator.plug("sdc");
    harness.hotplug.send(HotplugEvent::new("sdc", HotplugKind::Created)).unwrap();
    harness.hotplug.send(HotplugEvent::new("sdc1", HotplugKind::Created)).unwrap();
    flow.dispatch(AdminEvent::Hotplug);
    assert_eq!(harness.enumerator.calls(), 2);
    assert_eq!(
        flow.monitor().inventory().keys().collect::<Vec<_>>(),
        vec!["sdb", "sdc"]
    );
}

#[test]
fn logout_locks_and_returns_to_authentication() {
    let harness = Harness::new(|c| c.unlocked = true);
    let mut flow = harness.flow;
    flow.start();

    flow.dispatch(AdminEvent::Logout);
    assert_eq!(flow.pages().current(), AdminPage::Auth);
    assert!(!flow.context().is_unlocked());
}

#[test]
fn failed_logout_stays_on_menu_with_message() {
    let harness = Harness::new(|c| c.unlocked = true);
    harness.context.lock().unwrap().logout_error = Some("target is busy".into());
    let mut flow = harness.flow;
    flow.start();

    flow.dispatch(AdminEvent::Logout);
    let state = flow.pages().state();
    assert_eq!(state.current, AdminPage::Menu);
    assert_eq!(
        state.message.as_deref(),
        Some("Logout failed: admin operation failed: target is busy")
    );
    assert!(flow.context().is_unlocked());
}

#[test]
fn close_is_only_honoured_when_offered() {
    let harness = Harness::new(|c| c.unlocked = true);
    let mut flow = harness.flow;
    flow.start();
    flow.dispatch(AdminEvent::Navigate(AdminPage::Format));
    flow.dispatch(AdminEvent::Close);
    assert!(!flow.is_closed());

    flow.dispatch(AdminEvent::Back);
    flow.dispatch(AdminEvent::Close);
    assert!(flow.is_closed());
}

fn format_event(device: Option<&str>) -> AdminEvent {
    let values: BTreeMap<String, String> = [
        ("password-user", "pw"),
        ("enctype-data", "luks"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    AdminEvent::Format {
        config_id: "office-usb".into(),
        values,
        device: device.map(str::to_string),
    }
}

struct Harness {
    flow: Flow,
    context: Arc<Mutex<ContextState>>,
    backend: Arc<MockBackend>,
    enumerator: Arc<MockEnumerator>,
    hotplug: Sender<HotplugEvent>,
}

impl Harness {
    fn new(configure: impl FnOnce(&mut ContextState)) -> Self {
        let mut state = ContextState {
            valid: true,
            initialized: true,
            unlocked: false,
            logout_error: None,
        };
        configure(&mut state);
        let shared = Arc::new(Mutex::new(state));
        let context = MockContext {
            state: Arc::clone(&shared),
        };

        let backend = Arc::new(MockBackend::default());
        let enumerator = Arc::new(MockEnumerator::default());
        enumerator.plug("sdb");
        let (tx, rx) = mpsc::channel();

        let flow = AdminFlow::new(
            context,
            Arc::clone(&backend),
            DeviceMonitor::new(Arc::clone(&enumerator), Duration::ZERO),
            JobRunner::new(Duration::from_millis(2)),
            vec![FormatConfig {
                id: "office-usb".into(),
                ..FormatConfig::default()
            }],
            Box::new(rx),
            EventLoop::new(),
        );

        Self {
            flow,
            context: shared,
            backend,
            enumerator,
            hotplug: tx,
        }
    }
}

struct ContextState {
    valid: bool,
    initialized: bool,
    unlocked: bool,
    logout_error: Option<String>,
}

struct MockContext {
    state: Arc<Mutex<ContextState>>,
}

impl AdminContext for MockContext {
    type Error = LivegateError;

    fn is_valid(&self) -> bool {
        self.state.lock().unwrap().valid
    }

    fn is_initialized(&self) -> bool {
        self.state.lock().unwrap().initialized
    }

    fn is_unlocked(&self) -> bool {
        self.state.lock().unwrap().unlocked
    }

    fn logout(&self) -> LivegateResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = state.logout_error.clone() {
            return Err(LivegateError::Admin(message));
        }
        state.unlocked = false;
        Ok(())
    }
}

#[derive(Default)]
struct BackendState {
    operations: Vec<AdminOperation>,
    failure: Option<String>,
    panic: bool,
}

#[derive(Default)]
struct MockBackend {
    state: Mutex<BackendState>,
}

impl MockBackend {
    fn operations(&self) -> Vec<AdminOperation> {
        self.state.lock().unwrap().operations.clone()
    }

    fn fail_with(&self, message: &str) {
        self.state.lock().unwrap().failure = Some(message.to_string());
    }

    fn panic_on_run(&self) {
        self.state.lock().unwrap().panic = true;
    }
}

impl AdminBackend for MockBackend {
    type Error = LivegateError;

    fn run(&self, operation: &AdminOperation) -> LivegateResult<String> {
        let (failure, panic) = {
            let mut state = self.state.lock().unwrap();
            state.operations.push(operation.clone());
            (state.failure.clone(), state.panic)
        };
        if panic {
            panic!("tool crashed");
        }
        match failure {
            Some(message) => Err(LivegateError::Admin(message)),
            None => Ok("ok".into()),
        }
    }
}

#[derive(Default)]
struct MockEnumerator {
    devices: Mutex<Vec<String>>,
    calls: Mutex<u32>,
}

impl MockEnumerator {
    fn plug(&self, name: &str) {
        self.devices.lock().unwrap().push(name.to_string());
    }

    fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

impl DeviceEnumerator for MockEnumerator {
    type Error = LivegateError;

    fn enumerate(&self) -> LivegateResult<DeviceInventory> {
        *self.calls.lock().unwrap() += 1;
        Ok(self
            .devices
            .lock()
            .unwrap()
            .iter()
            .map(|name| {
                (
                    name.clone(),
                    DeviceRecord::new(format!("/dev/{name}")).with_meta("bus", "usb"),
                )
            })
            .collect())
    }
}
