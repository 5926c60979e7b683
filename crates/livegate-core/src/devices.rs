//! Hotplug-driven device inventory.
//!
//! Raw device-node notifications are drained in bursts, partition entries are
//! dropped, and only whole-device arrivals or removals trigger a fresh
//! enumeration. Enumeration always runs through the [`JobRunner`] so the
//! interactive thread is never blocked on device I/O.

use crate::error::JobError;
use crate::event::EventPump;
use crate::job::{JobOutcome, JobRunner};
use livegate_provider::{DeviceEnumerator, DeviceInventory, HotplugEvent};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Non-blocking source of raw hotplug notifications.
pub trait HotplugSource {
    /// Next pending event, or `None` when the source is currently empty.
    fn try_next(&mut self) -> Option<HotplugEvent>;
}

impl HotplugSource for Receiver<HotplugEvent> {
    fn try_next(&mut self) -> Option<HotplugEvent> {
        self.try_recv().ok()
    }
}

impl HotplugSource for VecDeque<HotplugEvent> {
    fn try_next(&mut self) -> Option<HotplugEvent> {
        self.pop_front()
    }
}

/// Notified on the interactive thread whenever the device key set changes.
pub trait DeviceListener {
    fn devices_changed(&mut self, inventory: &DeviceInventory);
}

/// Owns the current device inventory and decides when to rebuild it.
pub struct DeviceMonitor<E> {
    enumerator: Arc<E>,
    inventory: DeviceInventory,
    settle: Duration,
    enumerations: u64,
    listeners: Vec<Box<dyn DeviceListener>>,
}

impl<E> DeviceMonitor<E>
where
    E: DeviceEnumerator + Send + Sync + 'static,
{
    pub fn new(enumerator: Arc<E>, settle: Duration) -> Self {
        Self {
            enumerator,
            inventory: DeviceInventory::new(),
            settle,
            enumerations: 0,
            listeners: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, listener: Box<dyn DeviceListener>) {
        self.listeners.push(listener);
    }

    pub fn inventory(&self) -> &DeviceInventory {
        &self.inventory
    }

    /// Number of completed enumerations.
    pub fn enumerations(&self) -> u64 {
        self.enumerations
    }

    /// Re-enumerate devices and replace the inventory.
    ///
    /// `changed` is true only when the sorted key set differs from the
    /// previous inventory; metadata-only differences are not a change. After a
    /// hotplug event the worker first waits for the configured settle delay so
    /// the kernel and udev finish publishing the device.
    pub fn update(
        &mut self,
        after_hotplug: bool,
        runner: &JobRunner,
        pump: &mut dyn EventPump,
    ) -> Result<(bool, &DeviceInventory), JobError> {
        let enumerator = Arc::clone(&self.enumerator);
        let settle = if after_hotplug {
            self.settle
        } else {
            Duration::ZERO
        };

        let handle = runner.submit("enumerate devices", move || {
            if !settle.is_zero() {
                thread::sleep(settle);
            }
            enumerator
                .enumerate()
                .map_err(|err| JobError::Failed(err.to_string()))
        });

        let fresh = match runner.wait_interactive(handle, pump) {
            JobOutcome::Succeeded(inventory) => inventory,
            JobOutcome::Failed(err) => {
                warn!("device enumeration failed: {err}");
                return Err(err);
            }
        };

        let changed = !self.inventory.same_keys(&fresh);
        self.inventory = fresh;
        self.enumerations += 1;

        if changed {
            info!("device set changed: {} device(s)", self.inventory.len());
            for listener in &mut self.listeners {
                listener.devices_changed(&self.inventory);
            }
        } else {
            debug!("device set unchanged after enumeration");
        }

        Ok((changed, &self.inventory))
    }

    /// Drain `source` until it is empty and report whether any whole-device
    /// entry appeared or vanished.
    pub fn drain_hotplug(&mut self, source: &mut dyn HotplugSource) -> bool {
        let mut refresh = false;
        while let Some(event) = source.try_next() {
            if event.is_partition() {
                debug!("ignoring partition entry {} ({:?})", event.name, event.kind);
                continue;
            }
            debug!("whole device entry {} ({:?})", event.name, event.kind);
            refresh = true;
        }
        refresh
    }

    /// Handle a hotplug wake-up: drain, filter and refresh at most once.
    ///
    /// Returns `Ok(None)` when the burst held only partition entries (no
    /// enumeration), otherwise `Ok(Some(changed))`.
    pub fn on_hotplug(
        &mut self,
        source: &mut dyn HotplugSource,
        runner: &JobRunner,
        pump: &mut dyn EventPump,
    ) -> Result<Option<bool>, JobError> {
        if !self.drain_hotplug(source) {
            return Ok(None);
        }
        let (changed, _) = self.update(true, runner, pump)?;
        Ok(Some(changed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LivegateError;
    use crate::event::NoopPump;
    use livegate_provider::{DeviceRecord, HotplugKind};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Mutex;

    /// Enumerator that replays scripted inventories and counts calls.
    struct ScriptedEnumerator {
        script: Mutex<VecDeque<Result<DeviceInventory, String>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedEnumerator {
        fn new(script: Vec<Result<DeviceInventory, String>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    impl DeviceEnumerator for ScriptedEnumerator {
        type Error = LivegateError;

        fn enumerate(&self) -> Result<DeviceInventory, Self::Error> {
            *self.calls.lock().unwrap() += 1;
            match self.script.lock().unwrap().pop_front() {
                Some(Ok(inventory)) => Ok(inventory),
                Some(Err(message)) => Err(LivegateError::Device(message)),
                None => Ok(DeviceInventory::new()),
            }
        }
    }

    struct Recorder(Rc<RefCell<Vec<usize>>>);

    impl DeviceListener for Recorder {
        fn devices_changed(&mut self, inventory: &DeviceInventory) {
            self.0.borrow_mut().push(inventory.len());
        }
    }

    fn inventory(entries: &[(&str, &str)]) -> DeviceInventory {
        entries
            .iter()
            .map(|(key, model)| {
                (
                    key.to_string(),
                    DeviceRecord::new(format!("/dev/{key}")).with_meta("model", *model),
                )
            })
            .collect()
    }

    fn runner() -> JobRunner {
        JobRunner::new(Duration::from_millis(2))
    }

    #[test]
    fn partition_only_bursts_do_not_enumerate() {
        let enumerator = ScriptedEnumerator::new(vec![]);
        let mut monitor = DeviceMonitor::new(Arc::clone(&enumerator), Duration::ZERO);
        let mut source: VecDeque<HotplugEvent> = VecDeque::from(vec![
            HotplugEvent::new("sdb1", HotplugKind::Created),
            HotplugEvent::new("sdb2", HotplugKind::Created),
            HotplugEvent::new("sdc9", HotplugKind::Deleted),
        ]);

        let result = monitor
            .on_hotplug(&mut source, &runner(), &mut NoopPump)
            .unwrap();
        assert_eq!(result, None);
        assert_eq!(enumerator.calls(), 0);
        assert!(source.is_empty());
    }

    #[test]
    fn bursts_are_coalesced_into_one_enumeration() {
        let enumerator = ScriptedEnumerator::new(vec![Ok(inventory(&[("sdb", "A")]))]);
        let mut monitor = DeviceMonitor::new(Arc::clone(&enumerator), Duration::ZERO);
        let mut source: VecDeque<HotplugEvent> = VecDeque::from(vec![
            HotplugEvent::new("sdb", HotplugKind::Created),
            HotplugEvent::new("sdb1", HotplugKind::Created),
            HotplugEvent::new("sdb2", HotplugKind::Created),
        ]);

        let result = monitor
            .on_hotplug(&mut source, &runner(), &mut NoopPump)
            .unwrap();
        assert_eq!(result, Some(true));
        assert_eq!(enumerator.calls(), 1);
        assert!(source.is_empty());
    }

    #[test]
    fn metadata_changes_under_same_keys_are_not_changes() {
        let enumerator = ScriptedEnumerator::new(vec![
            Ok(inventory(&[("sdb", "A"), ("sdc", "B")])),
            Ok(inventory(&[("sdb", "relabelled"), ("sdc", "B")])),
        ]);
        let mut monitor = DeviceMonitor::new(enumerator, Duration::ZERO);
        let runner = runner();

        let (changed, _) = monitor.update(false, &runner, &mut NoopPump).unwrap();
        assert!(changed);
        let (changed, latest) = monitor.update(false, &runner, &mut NoopPump).unwrap();
        assert!(!changed);
        assert_eq!(
            latest.get("sdb").unwrap().metadata.get("model").unwrap(),
            "relabelled"
        );
    }

    #[test]
    fn key_set_changes_replace_inventory_wholesale() {
        let enumerator = ScriptedEnumerator::new(vec![
            Ok(inventory(&[("sdb", "A"), ("sdc", "B")])),
            Ok(inventory(&[("sdd", "C")])),
        ]);
        let mut monitor = DeviceMonitor::new(enumerator, Duration::ZERO);
        let runner = runner();
        let changes = Rc::new(RefCell::new(Vec::new()));
        monitor.subscribe(Box::new(Recorder(Rc::clone(&changes))));

        monitor.update(false, &runner, &mut NoopPump).unwrap();
        let (changed, latest) = monitor.update(true, &runner, &mut NoopPump).unwrap();
        assert!(changed);
        assert_eq!(latest.keys().collect::<Vec<_>>(), vec!["sdd"]);
        assert_eq!(*changes.borrow(), vec![2, 1]);
        assert_eq!(monitor.enumerations(), 2);
    }

    #[test]
    fn enumeration_failure_keeps_previous_inventory() {
        let enumerator = ScriptedEnumerator::new(vec![
            Ok(inventory(&[("sdb", "A")])),
            Err("udev unavailable".into()),
        ]);
        let mut monitor = DeviceMonitor::new(enumerator, Duration::ZERO);
        let runner = runner();

        monitor.update(false, &runner, &mut NoopPump).unwrap();
        let err = monitor.update(true, &runner, &mut NoopPump).unwrap_err();
        assert!(err.to_string().contains("udev unavailable"));
        assert_eq!(monitor.inventory().len(), 1);
        assert_eq!(monitor.enumerations(), 1);
    }

    #[test]
    fn channel_receivers_drain_until_empty() {
        let (tx, mut rx) = std::sync::mpsc::channel();
        tx.send(HotplugEvent::new("sdb", HotplugKind::Deleted)).unwrap();
        tx.send(HotplugEvent::new("sdb1", HotplugKind::Deleted)).unwrap();

        let enumerator = ScriptedEnumerator::new(vec![]);
        let mut monitor = DeviceMonitor::new(enumerator, Duration::ZERO);
        assert!(monitor.drain_hotplug(&mut rx));
        assert!(!monitor.drain_hotplug(&mut rx));
    }
}
