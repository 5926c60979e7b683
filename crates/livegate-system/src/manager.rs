//! Manager service client over D-Bus.

use livegate_core::config::{BusKind, LivegateConfig, ManagerCfg};
use livegate_core::error::{LivegateError, LivegateResult};
use livegate_provider::{
    FailureReason, ManagerConnector, ManagerService, ManagerSignal, SignalSink, UpdatesStatus,
};
use log::{debug, warn};
use std::fmt::Display;
use std::thread;
use zbus::blocking::fdo::DBusProxy;
use zbus::blocking::{Connection, Proxy};
use zbus::names::{BusName, InterfaceName};
use zbus::zvariant::ObjectPath;

const SIGNAL_UNLOCK_DONE: &str = "unlock_done";
const SIGNAL_UNLOCK_FAILED: &str = "unlock_failed";
const SIGNAL_UPDATES_STATUS_CHANGED: &str = "updates_status_changed";

fn bus_error(err: impl Display) -> LivegateError {
    LivegateError::Manager(err.to_string())
}

/// Opens one connection per attempt and checks the service owns its name.
#[derive(Debug, Clone)]
pub struct BusManagerConnector {
    cfg: ManagerCfg,
}

impl BusManagerConnector {
    pub fn new(cfg: ManagerCfg) -> Self {
        Self { cfg }
    }

    pub fn from_config(config: &LivegateConfig) -> Self {
        Self::new(config.manager.clone())
    }
}

impl ManagerConnector for BusManagerConnector {
    type Service = BusManager;
    type Error = LivegateError;

    fn connect(&self) -> LivegateResult<BusManager> {
        let connection = match self.cfg.bus {
            BusKind::System => Connection::system(),
            BusKind::Session => Connection::session(),
        }
        .map_err(bus_error)?;

        let service = BusName::try_from(self.cfg.service.clone()).map_err(bus_error)?;
        let present = DBusProxy::new(&connection)
            .and_then(|dbus| dbus.name_has_owner(service.clone()).map_err(Into::into))
            .map_err(bus_error)?;
        if !present {
            return Err(LivegateError::Manager(format!(
                "{} is not on the bus yet",
                self.cfg.service
            )));
        }

        let proxy = Proxy::new(
            &connection,
            service,
            ObjectPath::try_from(self.cfg.object_path.clone()).map_err(bus_error)?,
            InterfaceName::try_from(self.cfg.interface.clone()).map_err(bus_error)?,
        )
        .map_err(bus_error)?;
        debug!(
            "manager proxy ready for {} at {}",
            self.cfg.service, self.cfg.object_path
        );
        Ok(BusManager { proxy })
    }
}

/// Connected manager proxy.
#[derive(Clone)]
pub struct BusManager {
    proxy: Proxy<'static>,
}

impl BusManager {
    fn get<R>(&self, method: &'static str) -> LivegateResult<R>
    where
        R: for<'d> zbus::zvariant::DynamicDeserialize<'d>,
    {
        self.proxy.call(method, &()).map_err(bus_error)
    }

    /// Forward every emission of `signal` to `sink` from a dedicated thread,
    /// preserving emission order.
    fn forward<F>(&self, signal: &'static str, sink: SignalSink, decode: F) -> LivegateResult<()>
    where
        F: Fn(&zbus::Message) -> Option<ManagerSignal> + Send + 'static,
    {
        let stream = self.proxy.receive_signal(signal).map_err(bus_error)?;
        thread::Builder::new()
            .name(format!("signal-{signal}"))
            .spawn(move || {
                for message in stream {
                    match decode(&message) {
                        Some(decoded) => sink(decoded),
                        None => warn!("ignoring malformed {signal} signal"),
                    }
                }
                debug!("{signal} stream ended");
            })?;
        Ok(())
    }
}

impl ManagerService for BusManager {
    type Error = LivegateError;

    fn is_unlocked(&self) -> LivegateResult<bool> {
        self.get("isUnlocked")
    }

    fn version(&self) -> LivegateResult<String> {
        self.get("getVersion")
    }

    fn valid_to(&self) -> LivegateResult<String> {
        self.get("getValidTo")
    }

    fn expired(&self) -> LivegateResult<bool> {
        self.get("getExpired")
    }

    fn invalid_env(&self) -> LivegateResult<bool> {
        self.get("getInvalidEnv")
    }

    fn unlock_with_password(&self, secret: &str) -> LivegateResult<()> {
        self.proxy
            .call_noreply("unlockWithPassword", &(secret,))
            .map_err(bus_error)
    }

    fn updates_status(&self) -> LivegateResult<UpdatesStatus> {
        let (action, last_run): (String, String) = self.get("getUpdatesStatus")?;
        Ok(UpdatesStatus { action, last_run })
    }

    fn subscribe(&self, sink: SignalSink) -> LivegateResult<()> {
        self.forward(SIGNAL_UNLOCK_DONE, sink.clone(), |_| {
            Some(ManagerSignal::UnlockDone)
        })?;
        self.forward(SIGNAL_UNLOCK_FAILED, sink.clone(), |message| {
            let (code, text): (i32, String) = message.body().deserialize().ok()?;
            Some(ManagerSignal::UnlockFailed(FailureReason::from_wire(
                code, &text,
            )))
        })?;
        self.forward(SIGNAL_UPDATES_STATUS_CHANGED, sink, |_| {
            Some(ManagerSignal::UpdatesStatusChanged)
        })
    }
}
