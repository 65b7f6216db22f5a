//! Publish/subscribe relay with bounded per-listener mailboxes.
//!
//! Two delivery primitives:
//! - [`Relay::notify`] blocks until every registered listener accepted the
//!   event (or closed while the publisher waited);
//! - [`Relay::broadcast`] never blocks and drops the event for any listener
//!   whose mailbox is full.
//!
//! Publishers deliver from a snapshot of the registry, so a listener can be
//! closed from any thread while a publisher is blocked on its mailbox.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, Receiver, Sender, TryRecvError};
use parking_lot::{Mutex, RwLock};
use tracing::{trace, warn};

pub use crossbeam_channel::RecvTimeoutError;

/// Mailbox size used when a listener is requested with capacity 0.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 1024;

/// Outcome of one publish call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub skipped: usize,
}

impl DeliveryReport {
    fn record(&mut self, accepted: bool) {
        if accepted {
            self.delivered += 1;
        } else {
            self.skipped += 1;
        }
    }
}

/// Holds the listener's "done" sender. Taking it out is the close; it can
/// only happen once. Dropping the sender disconnects the receiver held by
/// publishers, which wakes any of them blocked on this listener.
type CloseGuard = Arc<Mutex<Option<Sender<()>>>>;

struct Slot<T> {
    tx: Sender<T>,
    done: Receiver<()>,
    guard: CloseGuard,
}

struct Registry<T> {
    slots: HashMap<u64, Slot<T>>,
    closed: bool,
}

struct Shared<T> {
    name: String,
    registry: RwLock<Registry<T>>,
    next_id: AtomicU64,
}

impl<T> Shared<T> {
    fn unregister(&self, id: u64) {
        self.registry.write().slots.remove(&id);
    }

    /// Mark closed and fire every listener's guard. Returns how many were open.
    fn shutdown(&self) -> usize {
        let slots: Vec<Slot<T>> = {
            let mut registry = self.registry.write();
            registry.closed = true;
            registry.slots.drain().map(|(_, slot)| slot).collect()
        };
        let count = slots.len();
        for slot in slots {
            slot.guard.lock().take();
        }
        count
    }
}

/// Fan-out broadcaster. Closing (or dropping) the relay force-closes every
/// listener it handed out.
pub struct Relay<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Clone + Send + 'static> Relay<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                registry: RwLock::new(Registry {
                    slots: HashMap::new(),
                    closed: false,
                }),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Register a listener with a mailbox of `capacity` events
    /// (0 means [`DEFAULT_MAILBOX_CAPACITY`]).
    ///
    /// On a closed relay the listener comes back already closed.
    pub fn listener(&self, capacity: usize) -> Listener<T> {
        let capacity = if capacity == 0 {
            DEFAULT_MAILBOX_CAPACITY
        } else {
            capacity
        };
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = bounded(capacity);
        let (done_tx, done_rx) = bounded::<()>(0);
        let guard: CloseGuard = Arc::new(Mutex::new(Some(done_tx)));

        let mut registry = self.shared.registry.write();
        if registry.closed {
            guard.lock().take();
        } else {
            registry.slots.insert(
                id,
                Slot {
                    tx,
                    done: done_rx,
                    guard: Arc::clone(&guard),
                },
            );
            trace!(relay = %self.shared.name, listener = id, capacity, "listener registered");
        }
        drop(registry);

        Listener {
            rx,
            closer: ListenerCloser {
                id,
                guard,
                relay: Arc::downgrade(&self.shared),
            },
        }
    }

    /// Guaranteed delivery: blocks until every listener accepted `event`.
    /// Listeners closed while the publisher waits are skipped.
    pub fn notify(&self, event: T) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for (tx, done) in self.snapshot() {
            let accepted = select! {
                send(tx, event.clone()) -> res => res.is_ok(),
                recv(done) -> _ => false,
            };
            report.record(accepted);
        }
        report
    }

    /// Like [`Relay::notify`], but listeners that have not accepted by the
    /// time `deadline` (measured from the call) elapses are skipped.
    pub fn notify_with_deadline(&self, event: T, deadline: Duration) -> DeliveryReport {
        let until = Instant::now() + deadline;
        let mut report = DeliveryReport::default();
        for (tx, done) in self.snapshot() {
            let remaining = until.saturating_duration_since(Instant::now());
            let accepted = select! {
                send(tx, event.clone()) -> res => res.is_ok(),
                recv(done) -> _ => false,
                default(remaining) => false,
            };
            report.record(accepted);
        }
        if report.skipped > 0 {
            warn!(
                relay = %self.shared.name,
                delivered = report.delivered,
                skipped = report.skipped,
                ?deadline,
                "deadline delivery skipped listeners"
            );
        }
        report
    }

    /// Best-effort delivery: never blocks; a full mailbox drops the event for
    /// that listener only.
    pub fn broadcast(&self, event: T) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for (tx, done) in self.snapshot() {
            let accepted = matches!(done.try_recv(), Err(TryRecvError::Empty))
                && tx.try_send(event.clone()).is_ok();
            report.record(accepted);
        }
        report
    }

    /// Force-close every listener and refuse new ones. Idempotent.
    pub fn close(&self) {
        let closed = self.shared.shutdown();
        if closed > 0 {
            trace!(relay = %self.shared.name, listeners = closed, "relay closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.registry.read().closed
    }

    pub fn listener_count(&self) -> usize {
        self.shared.registry.read().slots.len()
    }

    fn snapshot(&self) -> Vec<(Sender<T>, Receiver<()>)> {
        self.shared
            .registry
            .read()
            .slots
            .values()
            .map(|slot| (slot.tx.clone(), slot.done.clone()))
            .collect()
    }
}

impl<T> Drop for Relay<T> {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

/// Closes one listener from any thread. Cheap to clone.
pub struct ListenerCloser<T> {
    id: u64,
    guard: CloseGuard,
    relay: Weak<Shared<T>>,
}

impl<T> Clone for ListenerCloser<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            guard: Arc::clone(&self.guard),
            relay: Weak::clone(&self.relay),
        }
    }
}

impl<T> ListenerCloser<T> {
    /// Unregister the listener. Safe to race; only the first call acts.
    pub fn close(&self) {
        let done = self.guard.lock().take();
        if done.is_none() {
            return;
        }
        drop(done);
        if let Some(shared) = self.relay.upgrade() {
            shared.unregister(self.id);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.guard.lock().is_none()
    }
}

/// Receiving end of a relay subscription.
///
/// After close, buffered events can still be drained; `recv` then returns
/// `None`. Dropping the listener closes it.
pub struct Listener<T> {
    rx: Receiver<T>,
    closer: ListenerCloser<T>,
}

impl<T> Listener<T> {
    pub fn id(&self) -> u64 {
        self.closer.id
    }

    /// Block for the next event; `None` once closed and drained.
    pub fn recv(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    /// Blocking iterator that ends when the listener is closed and drained.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        self.rx.iter()
    }

    /// Number of events waiting in the mailbox.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    pub fn close(&self) {
        self.closer.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closer.is_closed()
    }

    pub fn closer(&self) -> ListenerCloser<T> {
        self.closer.clone()
    }
}

impl<T> Drop for Listener<T> {
    fn drop(&mut self) {
        self.closer.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn zero_capacity_uses_default_mailbox() {
        let relay: Relay<u32> = Relay::new("test");
        let listener = relay.listener(0);
        for i in 0..DEFAULT_MAILBOX_CAPACITY as u32 {
            assert_eq!(relay.broadcast(i).delivered, 1);
        }
        assert_eq!(relay.broadcast(0).skipped, 1);
        assert_eq!(listener.pending(), DEFAULT_MAILBOX_CAPACITY);
    }

    #[test]
    fn broadcast_drops_only_for_full_mailbox() {
        let relay = Relay::new("test");
        let small = relay.listener(1);
        let large = relay.listener(8);

        let first = relay.broadcast(1);
        assert_eq!(first, DeliveryReport { delivered: 2, skipped: 0 });
        let second = relay.broadcast(2);
        assert_eq!(second, DeliveryReport { delivered: 1, skipped: 1 });

        assert_eq!(small.try_recv(), Some(1));
        assert_eq!(small.try_recv(), None);
        assert_eq!(large.try_recv(), Some(1));
        assert_eq!(large.try_recv(), Some(2));
    }

    #[test]
    fn notify_waits_for_slow_consumer() {
        let relay = Relay::new("test");
        let listener = relay.listener(1);

        let consumer = thread::spawn(move || {
            let mut seen = Vec::new();
            while let Some(v) = listener.recv() {
                seen.push(v);
                if seen.len() == 5 {
                    break;
                }
            }
            seen
        });

        for i in 0..5 {
            let report = relay.notify(i);
            assert_eq!(report.delivered, 1);
        }
        assert_eq!(consumer.join().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn closing_listener_unblocks_waiting_publisher() {
        let relay = Arc::new(Relay::new("test"));
        let listener = relay.listener(1);
        relay.notify(0);

        let closer = listener.closer();
        let publisher = {
            let relay = Arc::clone(&relay);
            thread::spawn(move || relay.notify(1))
        };
        thread::sleep(Duration::from_millis(50));
        closer.close();

        let report = publisher.join().unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(relay.listener_count(), 0);
        // Buffered event still drains, then the listener reports closed.
        assert_eq!(listener.recv(), Some(0));
        assert_eq!(listener.recv(), None);
    }

    #[test]
    fn deadline_skips_stalled_listener() {
        let relay = Relay::new("test");
        let stalled = relay.listener(1);
        let _ = relay.notify(0);

        let started = Instant::now();
        let report = relay.notify_with_deadline(1, Duration::from_millis(30));
        assert_eq!(report, DeliveryReport { delivered: 0, skipped: 1 });
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert_eq!(stalled.pending(), 1);
    }

    #[test]
    fn relay_close_is_idempotent_under_races() {
        let relay = Arc::new(Relay::new("test"));
        let listeners: Vec<_> = (0..8).map(|_| relay.listener(4)).collect();
        let closers: Vec<_> = listeners.iter().map(|l| l.closer()).collect();

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let relay = Arc::clone(&relay);
                let closers = closers.clone();
                thread::spawn(move || {
                    if i % 2 == 0 {
                        relay.close();
                    }
                    for closer in &closers {
                        closer.close();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        relay.close();
        assert!(relay.is_closed());
        assert_eq!(relay.listener_count(), 0);
        for listener in &listeners {
            assert!(listener.is_closed());
            assert_eq!(listener.recv(), None);
        }
        assert_eq!(relay.notify(1), DeliveryReport::default());
    }

    #[test]
    fn listener_on_closed_relay_is_closed() {
        let relay: Relay<u8> = Relay::new("test");
        relay.close();
        let listener = relay.listener(4);
        assert!(listener.is_closed());
        assert_eq!(listener.recv(), None);
        assert_eq!(relay.broadcast(1).delivered, 0);
    }

    #[test]
    fn dropping_listener_unregisters_it() {
        let relay: Relay<u8> = Relay::new("test");
        let listener = relay.listener(4);
        assert_eq!(relay.listener_count(), 1);
        drop(listener);
        assert_eq!(relay.listener_count(), 0);
    }

    #[test]
    fn dropping_relay_closes_listeners() {
        let relay: Relay<u8> = Relay::new("test");
        let listener = relay.listener(4);
        relay.broadcast(9);
        drop(relay);
        assert!(listener.is_closed());
        assert_eq!(listener.recv(), Some(9));
        assert_eq!(listener.recv(), None);
        listener.close();
    }
}
