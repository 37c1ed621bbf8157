//! Idempotency window for notification consumers.
//!
//! Events arrive at-least-once. A consumer keeps a [`DedupWindow`] and only
//! renders events it admits, keyed on [`Event::key`]. The window forgets keys
//! older than its TTL and never holds more than `capacity` of them.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Duration, Utc};

use crate::config::EngineConfig;
use crate::events::{Event, EventKey};

#[derive(Debug)]
pub struct DedupWindow {
    ttl: Duration,
    capacity: usize,
    seen: HashSet<EventKey>,
    // Keys with the time they were admitted, oldest first.
    order: VecDeque<(EventKey, DateTime<Utc>)>,
}

impl DedupWindow {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            Duration::seconds(config.dedup_window_secs),
            config.dedup_capacity,
        )
    }

    /// `true` the first time an event is seen within the window.
    pub fn admit(&mut self, event: &Event) -> bool {
        self.admit_at(event.key(), Utc::now())
    }

    pub fn admit_at(&mut self, key: EventKey, now: DateTime<Utc>) -> bool {
        self.expire(now);
        if !self.seen.insert(key) {
            return false;
        }
        self.order.push_back((key, now));
        while self.order.len() > self.capacity {
            if let Some((old, _)) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn expire(&mut self, now: DateTime<Utc>) {
        while let Some(&(key, at)) = self.order.front() {
            if now - at < self.ttl {
                break;
            }
            self.order.pop_front();
            self.seen.remove(&key);
        }
    }
}
