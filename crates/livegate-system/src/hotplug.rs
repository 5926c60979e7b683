//! Device-directory watch feeding raw hotplug events to the interactive loop.

use livegate_core::error::{LivegateError, LivegateResult};
use livegate_provider::{HotplugEvent, HotplugKind};
use log::{debug, warn};
use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify, InotifyEvent};
use std::path::Path;
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};

/// Watch `dir` for entries appearing or vanishing.
///
/// Every entry is forwarded on `events`; `wake` is called once per batch read
/// from the kernel so the consumer drains the channel in one go. The thread
/// ends when the receiving side is dropped.
pub fn spawn_hotplug_watcher<W>(
    dir: &Path,
    events: Sender<HotplugEvent>,
    wake: W,
) -> LivegateResult<JoinHandle<()>>
where
    W: Fn() + Send + 'static,
{
    let inotify = Inotify::init(InitFlags::IN_CLOEXEC)
        .map_err(|err| LivegateError::Device(format!("inotify init failed: {err}")))?;
    inotify
        .add_watch(dir, AddWatchFlags::IN_CREATE | AddWatchFlags::IN_DELETE)
        .map_err(|err| {
            LivegateError::Device(format!("cannot watch {}: {err}", dir.display()))
        })?;
    debug!("watching {} for device nodes", dir.display());

    let handle = thread::Builder::new()
        .name("hotplug-watch".into())
        .spawn(move || loop {
            let batch = match inotify.read_events() {
                Ok(batch) => batch,
                Err(err) => {
                    warn!("hotplug watch stopped: {err}");
                    return;
                }
            };

            let mut forwarded = 0;
            for event in &batch {
                if event.mask.contains(AddWatchFlags::IN_Q_OVERFLOW) {
                    warn!("inotify queue overflow; device events may be lost");
                }
                let Some(hotplug) = to_hotplug(event) else {
                    continue;
                };
                if events.send(hotplug).is_err() {
                    debug!("hotplug consumer gone; stopping watch");
                    return;
                }
                forwarded += 1;
            }
            if forwarded > 0 {
                wake();
            }
        })?;
    Ok(handle)
}

fn to_hotplug(event: &InotifyEvent) -> Option<HotplugEvent> {
    let name = event.name.as_ref()?.to_string_lossy().into_owned();
    let kind = if event.mask.contains(AddWatchFlags::IN_CREATE) {
        HotplugKind::Created
    } else if event.mask.contains(AddWatchFlags::IN_DELETE) {
        HotplugKind::Deleted
    } else {
        return None;
    };
    Some(HotplugEvent::new(name, kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::mpsc;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn entries_created_and_removed_are_reported() {
        let dir = tempdir().unwrap();
        let (tx, rx) = mpsc::channel();
        let (wake_tx, wake_rx) = mpsc::channel();
        spawn_hotplug_watcher(dir.path(), tx, move || {
            let _ = wake_tx.send(());
        })
        .unwrap();

        fs::write(dir.path().join("sdz"), "").unwrap();
        wake_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let created = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(created, HotplugEvent::new("sdz", HotplugKind::Created));

        fs::remove_file(dir.path().join("sdz")).unwrap();
        let removed = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(removed, HotplugEvent::new("sdz", HotplugKind::Deleted));
    }

    #[test]
    fn missing_directory_is_an_error() {
        let (tx, _rx) = mpsc::channel();
        let err = spawn_hotplug_watcher(Path::new("/nonexistent/livegate-dev"), tx, || {})
            .unwrap_err();
        assert!(err.to_string().contains("cannot watch"));
    }
}
