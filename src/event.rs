//! Receive-completion events.
//!
//! Each endpoint (and each transport facade) owns an [`EventQueue`]: a pool
//! of inactive events plus an unbounded delivery queue. Producers take an
//! event from the pool, fill it, and emit it; consumers drain the queue and
//! hand the event back once they have moved the payload out.

use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::sync::Mutex;

use tracing::debug;

/// What an emitted event signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A message payload arrived for the owning endpoint.
    UserData,
    /// The owning transport is shutting down.
    Term,
}

/// A single receive-completion event.
#[derive(Debug)]
pub struct Event {
    /// What this event signals.
    pub kind: EventKind,
    /// Payload bytes, already copied out of any pooled transport buffer.
    pub data: Vec<u8>,
}

impl Event {
    fn new() -> Self {
        Self {
            kind: EventKind::UserData,
            data: Vec::new(),
        }
    }
}

/// An event queue with a bounded inactive-event pool.
#[derive(Debug)]
pub struct EventQueue {
    n_events: usize,
    inactive: Mutex<Vec<Event>>,
    tx: Sender<Event>,
    rx: Mutex<Receiver<Event>>,
}

impl EventQueue {
    /// Creates a queue with `n_events` inactive events ready to be taken.
    pub fn new(n_events: usize) -> Self {
        let inactive = (0..n_events).map(|_| Event::new()).collect();
        let (tx, rx) = channel();
        Self {
            n_events,
            inactive: Mutex::new(inactive),
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Takes an event from the inactive pool.
    ///
    /// When the pool runs dry a fresh event is allocated instead; the
    /// delivery queue is unbounded and emission must not fail under load.
    pub fn get(&self) -> Event {
        let pooled = self.inactive.lock().expect("event pool lock poisoned").pop();
        pooled.unwrap_or_else(|| {
            debug!(n_events = self.n_events, "inactive event pool empty; allocating");
            Event::new()
        })
    }

    /// Emits an event onto the delivery queue.
    pub fn emit(&self, evt: Event) {
        // The receiver lives inside self, so the channel cannot be closed
        // while this method is callable.
        self.tx.send(evt).expect("event queue receiver gone");
    }

    /// Blocks until the next event is delivered.
    pub fn next(&self) -> Event {
        self.rx
            .lock()
            .expect("event queue lock poisoned")
            .recv()
            .expect("event queue sender gone")
    }

    /// Returns the next event if one is already queued.
    pub fn try_next(&self) -> Option<Event> {
        match self.rx.lock().expect("event queue lock poisoned").try_recv() {
            Ok(evt) => Some(evt),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Hands a consumed event back to the inactive pool.
    ///
    /// The payload is dropped; events beyond the pool's capacity are
    /// discarded.
    pub fn ret(&self, mut evt: Event) {
        evt.data = Vec::new();
        evt.kind = EventKind::UserData;
        let mut inactive = self.inactive.lock().expect("event pool lock poisoned");
        if inactive.len() < self.n_events {
            inactive.push(evt);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_and_drain_in_order() {
        let queue = EventQueue::new(4);

        for i in 0..3u8 {
            let mut evt = queue.get();
            evt.kind = EventKind::UserData;
            evt.data = vec![i];
            queue.emit(evt);
        }

        for i in 0..3u8 {
            let evt = queue.next();
            assert_eq!(evt.data, vec![i]);
            queue.ret(evt);
        }
        assert!(queue.try_next().is_none());
    }

    #[test]
    fn pool_drains_and_refills() {
        let queue = EventQueue::new(2);

        let a = queue.get();
        let b = queue.get();
        // Pool is empty now; get() still produces an event.
        let c = queue.get();

        queue.ret(a);
        queue.ret(b);
        queue.ret(c); // beyond capacity, silently dropped

        assert_eq!(
            queue.inactive.lock().unwrap().len(),
            2,
            "pool never grows past its configured size"
        );
    }
}
