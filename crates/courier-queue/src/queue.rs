//! Named queue collections.

use std::cmp::Ordering;
use std::collections::HashMap;

use tracing::debug;

use crate::error::QueueError;
use crate::message::Message;

/// Name used when a producer does not pick a queue.
pub const DEFAULT_QUEUE: &str = "default";

struct Entry {
    message: Message,
    arrival: u64,
    in_flight: bool,
}

/// Delivery order: higher priority first, then earlier timestamp, then
/// earlier arrival.
fn delivery_order(a: &Entry, b: &Entry) -> Ordering {
    b.message
        .priority
        .cmp(&a.message.priority)
        .then_with(|| a.message.timestamp.cmp(&b.message.timestamp))
        .then_with(|| a.arrival.cmp(&b.arrival))
}

#[derive(Default)]
struct NamedQueue {
    entries: Vec<Entry>,
    next_sequence: u64,
    next_arrival: u64,
}

impl NamedQueue {
    /// Indices of deliverable entries, in delivery order.
    fn ordered_ready(&self) -> Vec<usize> {
        let mut idx: Vec<usize> = (0..self.entries.len())
            .filter(|&i| !self.entries[i].in_flight)
            .collect();
        idx.sort_by(|&a, &b| delivery_order(&self.entries[a], &self.entries[b]));
        idx
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.message.id == id)
    }

    fn push(&mut self, message: Message) {
        if let Some(seq) = message.sequence {
            self.next_sequence = self.next_sequence.max(seq);
        }
        let arrival = self.next_arrival;
        self.next_arrival += 1;

        match self.position(&message.id) {
            Some(i) => {
                self.entries[i].message = message;
                self.entries[i].in_flight = false;
            }
            None => self.entries.push(Entry {
                message,
                arrival,
                in_flight: false,
            }),
        }
    }
}

/// Per-name ordered message collections.
///
/// The store is a plain data structure; callers hold it behind a lock and
/// never across an await. Messages handed out by [`QueueStore::begin_batch`]
/// stay stored but are skipped by later reads until removed or released.
#[derive(Default)]
pub struct QueueStore {
    queues: HashMap<String, NamedQueue>,
}

impl QueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the next per-queue sequence number to an `ordered` message.
    pub fn assign_sequence(&mut self, queue: &str, message: &mut Message) {
        if !message.ordered {
            return;
        }
        let q = self.queues.entry(queue.to_string()).or_default();
        q.next_sequence += 1;
        message.sequence = Some(q.next_sequence);
    }

    /// Whether `queue` can take one more message (`capacity` 0 = unlimited).
    pub fn has_capacity(&self, queue: &str, capacity: usize) -> bool {
        capacity == 0 || self.depth(queue) < capacity
    }

    /// Append a message, enforcing `capacity`. An id that is already stored
    /// in `queue` is rejected, in flight or not.
    pub fn insert(
        &mut self,
        queue: &str,
        message: Message,
        capacity: usize,
    ) -> Result<(), QueueError> {
        if self.contains(queue, &message.id) {
            return Err(QueueError::Duplicate {
                queue: queue.to_string(),
                id: message.id,
            });
        }
        if !self.has_capacity(queue, capacity) {
            return Err(QueueError::QueueFull {
                queue: queue.to_string(),
                capacity,
            });
        }

        debug!(
            "Queue '{}' <- {} (priority: {:?})",
            queue, message.id, message.priority
        );
        self.queues.entry(queue.to_string()).or_default().push(message);
        Ok(())
    }

    /// Insert without capacity or duplicate checks, replacing a stored copy.
    /// Used when rebuilding from disk.
    pub fn restore(&mut self, queue: &str, message: Message) {
        self.queues.entry(queue.to_string()).or_default().push(message);
    }

    /// Remove and return the next deliverable message.
    pub fn dequeue_one(&mut self, queue: &str) -> Option<Message> {
        let q = self.queues.get_mut(queue)?;
        let first = q.ordered_ready().into_iter().next()?;
        Some(q.entries.remove(first).message)
    }

    /// Up to `batch_size` deliverable messages in delivery order, without
    /// removing them.
    pub fn peek_batch(&self, queue: &str, batch_size: usize) -> Vec<Message> {
        let Some(q) = self.queues.get(queue) else {
            return Vec::new();
        };
        q.ordered_ready()
            .into_iter()
            .take(batch_size)
            .map(|i| q.entries[i].message.clone())
            .collect()
    }

    /// Like [`QueueStore::peek_batch`], but marks the returned messages as
    /// in flight.
    pub fn begin_batch(&mut self, queue: &str, batch_size: usize) -> Vec<Message> {
        let Some(q) = self.queues.get_mut(queue) else {
            return Vec::new();
        };
        let picked: Vec<usize> = q.ordered_ready().into_iter().take(batch_size).collect();
        picked
            .into_iter()
            .map(|i| {
                q.entries[i].in_flight = true;
                q.entries[i].message.clone()
            })
            .collect()
    }

    /// Make an in-flight message deliverable again.
    pub fn release(&mut self, queue: &str, id: &str) {
        if let Some(q) = self.queues.get_mut(queue) {
            if let Some(i) = q.position(id) {
                q.entries[i].in_flight = false;
            }
        }
    }

    /// Remove a message by id.
    pub fn remove(&mut self, queue: &str, id: &str) -> Option<Message> {
        let q = self.queues.get_mut(queue)?;
        let i = q.position(id)?;
        Some(q.entries.remove(i).message)
    }

    /// Copy of a stored message.
    pub fn get(&self, queue: &str, id: &str) -> Option<Message> {
        let q = self.queues.get(queue)?;
        q.position(id).map(|i| q.entries[i].message.clone())
    }

    pub fn contains(&self, queue: &str, id: &str) -> bool {
        self.queues
            .get(queue)
            .is_some_and(|q| q.position(id).is_some())
    }

    /// Number of stored messages in `queue`, in-flight included.
    pub fn depth(&self, queue: &str) -> usize {
        self.queues.get(queue).map_or(0, |q| q.entries.len())
    }

    /// Stored messages across every queue.
    pub fn total_depth(&self) -> usize {
        self.queues.values().map(|q| q.entries.len()).sum()
    }

    /// Names of every queue that has been used, sorted.
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop every message in `queue`, returning them.
    pub fn clear(&mut self, queue: &str) -> Vec<Message> {
        match self.queues.get_mut(queue) {
            Some(q) => q.entries.drain(..).map(|e| e.message).collect(),
            None => Vec::new(),
        }
    }

    /// Copy of every stored message with its queue name.
    pub fn snapshot(&self) -> Vec<(String, Message)> {
        self.queues
            .iter()
            .flat_map(|(name, q)| q.entries.iter().map(move |e| (name.clone(), e.message.clone())))
            .collect()
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
