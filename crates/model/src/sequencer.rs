//! Per-identity write ordering.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

/// Serializes writes that target the same record identity.
///
/// A write takes a numbered ticket for its identity when it is issued
/// ([`WriteSequencer::reserve`], synchronous) and waits for that number to be
/// served before reaching the driver. Issue order is therefore fixed at call
/// time, regardless of how the runtime schedules the tasks that later wait.
/// Writes to different identities proceed independently.
///
/// A ticket dropped before its turn (a cancelled or timed-out write) is
/// skipped. An identity's queue is removed once every ticket issued for it
/// has been served or abandoned.
#[derive(Debug, Default, Clone)]
pub struct WriteSequencer {
    queues: Arc<Mutex<HashMap<String, Queue>>>,
}

#[derive(Debug)]
struct Queue {
    next: u64,
    serving: u64,
    abandoned: BTreeSet<u64>,
    notify: Arc<Notify>,
}

impl Queue {
    fn new() -> Self {
        Self {
            next: 0,
            serving: 0,
            abandoned: BTreeSet::new(),
            notify: Arc::new(Notify::new()),
        }
    }

    fn is_idle(&self) -> bool {
        self.serving == self.next
    }
}

/// A reserved place in an identity's write queue.
#[derive(Debug)]
pub struct WriteTicket {
    queues: Arc<Mutex<HashMap<String, Queue>>>,
    key: String,
    number: u64,
    notify: Arc<Notify>,
}

/// Held for the duration of one write; the next ticket is served on drop.
#[derive(Debug)]
pub struct SequencedWrite {
    _ticket: WriteTicket,
}

fn lock(queues: &Mutex<HashMap<String, Queue>>) -> MutexGuard<'_, HashMap<String, Queue>> {
    queues.lock().unwrap_or_else(|e| e.into_inner())
}

impl WriteSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the next place in `key`'s queue without waiting.
    pub fn reserve(&self, key: impl Into<String>) -> WriteTicket {
        let key = key.into();
        let mut queues = lock(&self.queues);
        let queue = queues.entry(key.clone()).or_insert_with(Queue::new);
        let number = queue.next;
        queue.next += 1;

        WriteTicket {
            queues: self.queues.clone(),
            key,
            number,
            notify: queue.notify.clone(),
        }
    }

    /// `reserve` followed by `wait`.
    pub async fn acquire(&self, key: impl Into<String>) -> SequencedWrite {
        self.reserve(key).wait().await
    }

    /// Number of identities with an active or pending write.
    pub fn in_flight(&self) -> usize {
        lock(&self.queues).len()
    }
}

impl WriteTicket {
    fn is_turn(&self) -> bool {
        lock(&self.queues)
            .get(&self.key)
            .is_some_and(|queue| queue.serving == self.number)
    }

    /// Resolves once every earlier ticket for the same identity is done.
    pub async fn wait(self) -> SequencedWrite {
        let notify = self.notify.clone();
        loop {
            // Registered before the check, so a release in between is not missed.
            let notified = notify.notified();
            if self.is_turn() {
                return SequencedWrite { _ticket: self };
            }
            notified.await;
        }
    }
}

impl Drop for WriteTicket {
    fn drop(&mut self) {
        let mut queues = lock(&self.queues);
        let Some(queue) = queues.get_mut(&self.key) else {
            return;
        };

        if queue.serving == self.number {
            queue.serving += 1;
            while queue.abandoned.remove(&queue.serving) {
                queue.serving += 1;
            }
            queue.notify.notify_waiters();
        } else {
            queue.abandoned.insert(self.number);
        }

        if queue.is_idle() {
            queues.remove(&self.key);
        }
    }
}
