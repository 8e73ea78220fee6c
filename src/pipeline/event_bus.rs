//! Control event bus: elements produce, the player consumes.

use crate::defaults::EVENT_SEND_TIMEOUT_MS;
use crate::error::BusError;
use crate::pipeline::types::ControlMessage;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const RESERVE_POLL: Duration = Duration::from_millis(1);

/// Multi-producer, single-consumer queue of control messages.
///
/// At most `capacity` format reports wait at any time; a producer that finds
/// them full waits briefly and then drops its report. Status reports are
/// always queued. Each element task sends exactly one per run and the player
/// relies on the sink's report to detect end of stream.
///
/// Delivery is FIFO across both kinds.
pub struct EventBus {
    tx: Sender<ControlMessage>,
    rx: Receiver<ControlMessage>,
    /// Format reports currently queued.
    queued: Arc<AtomicUsize>,
    capacity: usize,
}

impl EventBus {
    /// Creates a bus holding at most `capacity` undelivered format reports.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            queued: Arc::new(AtomicUsize::new(0)),
            capacity: capacity.max(1),
        }
    }

    /// Producer handle for an element task.
    pub fn sender(&self) -> EventSender {
        EventSender {
            tx: self.tx.clone(),
            queued: self.queued.clone(),
            capacity: self.capacity,
            send_timeout: Duration::from_millis(EVENT_SEND_TIMEOUT_MS),
        }
    }

    /// Waits up to `timeout` for the next message.
    pub fn listen(&self, timeout: Duration) -> Result<ControlMessage, BusError> {
        let msg = self.rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => BusError::Timeout,
            RecvTimeoutError::Disconnected => BusError::Disconnected,
        })?;
        self.release(&msg);
        Ok(msg)
    }

    /// Number of messages waiting to be consumed.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Discards all waiting messages and returns how many were dropped.
    pub fn drain(&self) -> usize {
        self.rx.try_iter().map(|msg| self.release(&msg)).count()
    }

    /// Closes the bus. Messages still queued are discarded.
    pub fn shutdown(self) {
        let dropped = self.drain();
        if dropped > 0 {
            debug!(dropped, "discarded pending control messages on shutdown");
        }
    }

    fn release(&self, msg: &ControlMessage) {
        if matches!(msg, ControlMessage::FormatInfo { .. }) {
            self.queued.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

/// Cloneable producer side of the [`EventBus`].
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<ControlMessage>,
    queued: Arc<AtomicUsize>,
    capacity: usize,
    send_timeout: Duration,
}

impl EventSender {
    /// Pushes a message.
    ///
    /// Format reports wait briefly for room. Returns false if the message
    /// was dropped.
    pub fn send(&self, msg: ControlMessage) -> bool {
        match msg {
            ControlMessage::StatusReport { .. } => self.push(msg),
            ControlMessage::FormatInfo { .. } => {
                if !self.reserve() {
                    warn!(?msg, "event queue full, dropping control message");
                    return false;
                }
                let sent = self.push(msg);
                if !sent {
                    self.queued.fetch_sub(1, Ordering::AcqRel);
                }
                sent
            }
        }
    }

    // Claims one format slot, waiting up to the send timeout
    fn reserve(&self) -> bool {
        let deadline = Instant::now() + self.send_timeout;
        loop {
            let claimed = self
                .queued
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    (n < self.capacity).then_some(n + 1)
                })
                .is_ok();
            if claimed {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(RESERVE_POLL);
        }
    }

    fn push(&self, msg: ControlMessage) -> bool {
        if self.tx.send(msg).is_err() {
            debug!("event bus closed, dropping control message");
            return false;
        }
        true
    }
}
