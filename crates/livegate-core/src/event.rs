//! Interactive event loop.
//!
//! Manager signals, hotplug wake-ups and user input all arrive here from
//! their producer threads and are consumed on the single interactive thread.
//! State owned by that thread therefore needs no locking.

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

/// Something that can service pending interactive work without blocking.
///
/// [`crate::job::JobRunner::wait_interactive`] calls this repeatedly while a
/// job runs so the interface keeps processing events.
pub trait EventPump {
    /// Service whatever is pending and return how many events were observed.
    fn pump(&mut self) -> usize;
}

/// Cloneable, thread-safe handle for posting events onto the loop.
#[derive(Debug)]
pub struct EventSender<E> {
    tx: Sender<E>,
}

impl<E> Clone for EventSender<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<E> EventSender<E> {
    /// Post an event. Returns `false` once the loop has been dropped.
    pub fn post(&self, event: E) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// FIFO event queue owned by the interactive thread.
///
/// Events observed while pumping during a job wait are kept in a backlog and
/// handed out, in arrival order, by the next calls to [`EventLoop::next`].
#[derive(Debug)]
pub struct EventLoop<E> {
    tx: Sender<E>,
    rx: Receiver<E>,
    backlog: VecDeque<E>,
    observed: u64,
}

impl<E> Default for EventLoop<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventLoop<E> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx,
            rx,
            backlog: VecDeque::new(),
            observed: 0,
        }
    }

    pub fn sender(&self) -> EventSender<E> {
        EventSender {
            tx: self.tx.clone(),
        }
    }

    /// Post from the interactive thread itself.
    pub fn post(&self, event: E) {
        // The loop holds its own receiver, so this cannot fail.
        let _ = self.tx.send(event);
    }

    /// Total number of events that have reached this loop so far.
    pub fn observed(&self) -> u64 {
        self.observed
    }

    /// Number of events waiting to be handed out.
    pub fn pending(&self) -> usize {
        self.backlog.len()
    }

    /// Block until the next event.
    pub fn next(&mut self) -> Option<E> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }
        match self.rx.recv() {
            Ok(event) => {
                self.observed += 1;
                Some(event)
            }
            Err(_) => None,
        }
    }

    /// Wait at most `timeout` for the next event.
    pub fn next_timeout(&mut self, timeout: Duration) -> Option<E> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }
        match self.rx.recv_timeout(timeout) {
            Ok(event) => {
                self.observed += 1;
                Some(event)
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Return the next event only if one is immediately available.
    pub fn try_next(&mut self) -> Option<E> {
        self.pump();
        self.backlog.pop_front()
    }
}

impl<E> EventPump for EventLoop<E> {
    fn pump(&mut self) -> usize {
        let mut count = 0;
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    self.backlog.push_back(event);
                    count += 1;
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        self.observed += count as u64;
        count
    }
}

/// Pump that does nothing; for callers with no interactive surface.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPump;

impl EventPump for NoopPump {
    fn pump(&mut self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn events_keep_arrival_order_across_pumps() {
        let mut events = EventLoop::new();
        let sender = events.sender();
        sender.post(1);
        sender.post(2);
        assert_eq!(events.pump(), 2);
        sender.post(3);

        assert_eq!(events.next(), Some(1));
        assert_eq!(events.next(), Some(2));
        assert_eq!(events.next(), Some(3));
        assert_eq!(events.observed(), 3);
    }

    #[test]
    fn senders_work_from_other_threads() {
        let mut events = EventLoop::new();
        let sender = events.sender();
        let producer = thread::spawn(move || {
            for value in 0..10 {
                assert!(sender.post(value));
            }
        });
        producer.join().unwrap();

        let received: Vec<i32> = std::iter::from_fn(|| events.try_next()).collect();
        assert_eq!(received, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn next_timeout_returns_none_when_idle() {
        let mut events: EventLoop<()> = EventLoop::new();
        assert_eq!(events.next_timeout(Duration::from_millis(10)), None);
    }
}
