//! Events published for every accepted transition.
//!
//! Events are written to the store's outbox in the same atomic unit as the
//! transition, then pushed to live subscribers by [`EventEmitter::flush`].
//! The outbox is also the event log: a [`Subscription`] remembers the last
//! sequence it handed out and reads the log whenever the live channel lags,
//! skips a sequence or runs dry. Delivery is at-least-once; consumers that
//! render notifications deduplicate on [`Event::key`] (see
//! [`crate::notify::DedupWindow`]).

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::store::StepStore;
use crate::workflow::{LogEntry, StepAction, WorkerId};

/// A worker mentioned by an event, with the name resolved at emit time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub id: WorkerId,
    pub name: String,
}

/// Event id plus the time of the transition it reports.
pub type EventKey = (Uuid, DateTime<Utc>);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    /// Global publication order, assigned by the store on commit.
    pub sequence: u64,
    pub occurred_at: DateTime<Utc>,
    pub action: StepAction,
    pub macro_task_id: Uuid,
    pub macro_task_title: String,
    pub step_id: Uuid,
    pub function: String,
    pub actor: Option<Party>,
    pub target: Option<Party>,
    pub reason: Option<String>,
}

impl Event {
    /// Builds the event mirroring an audit entry.
    pub fn from_log(
        entry: &LogEntry,
        macro_task_title: &str,
        function: &str,
        name_of: impl Fn(&str) -> String,
    ) -> Self {
        let party = |id: &String| Party {
            id: id.clone(),
            name: name_of(id.as_str()),
        };
        Self {
            id: Uuid::new_v4(),
            sequence: 0,
            occurred_at: entry.at,
            action: entry.action,
            macro_task_id: entry.macro_task_id,
            macro_task_title: macro_task_title.to_string(),
            step_id: entry.step_id,
            function: function.to_string(),
            actor: entry.actor.as_ref().map(&party),
            target: entry.target.as_ref().map(&party),
            reason: entry.reason.clone(),
        }
    }

    /// Stable identity used by consumers to drop duplicates.
    pub fn key(&self) -> EventKey {
        (self.id, self.occurred_at)
    }

    /// Message suitable for a notification, built from the payload alone.
    pub fn describe(&self) -> String {
        let actor = self
            .actor
            .as_ref()
            .map(|p| p.name.as_str())
            .unwrap_or("system");
        let title = &self.macro_task_title;
        let function = &self.function;
        match self.action {
            StepAction::Returned => {
                let target = self
                    .target
                    .as_ref()
                    .map(|p| p.name.as_str())
                    .unwrap_or("?");
                let reason = self.reason.as_deref().unwrap_or_default();
                format!("{actor} returned {function} on \"{title}\" to {target}: {reason}")
            }
            StepAction::Unblocked => format!("{function} on \"{title}\" is ready to start"),
            StepAction::Blocked => format!("{function} on \"{title}\" is waiting on its dependency"),
            action => format!("{actor} {} {function} on \"{title}\"", action.verb()),
        }
    }
}

/// Pushes outbox events to in-process subscribers.
pub struct EventEmitter {
    tx: broadcast::Sender<Event>,
    // Serializes flushes so subscribers see events in sequence order.
    flush_lock: Mutex<()>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            flush_lock: Mutex::new(()),
        }
    }

    /// A subscription starting at the beginning of the event log.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            last_seen: 0,
            backlog: VecDeque::new(),
        }
    }

    /// Pushes every unpublished outbox event in order, then marks them
    /// published. Returns how many events were pushed.
    pub async fn flush<S: StepStore>(&self, store: &S) -> Result<usize> {
        let _guard = self.flush_lock.lock().await;
        let pending = store.pending_events().await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let mut ids = Vec::with_capacity(pending.len());
        for event in pending {
            ids.push(event.id);
            let sequence = event.sequence;
            match self.tx.send(event) {
                Ok(receivers) => debug!(sequence, receivers, "event delivered"),
                Err(_) => debug!(sequence, "no live subscribers, event stays in the log"),
            }
        }
        store.ack_events(&ids).await?;
        Ok(ids.len())
    }
}

/// A consumer's cursor over the event stream.
///
/// Live events come from the broadcast channel. Anything the channel lost
/// (lag, a gap in sequence numbers, events published before the receiver
/// existed) is read back from the store, so every committed event is handed
/// out at least once and in sequence order.
pub struct Subscription {
    rx: broadcast::Receiver<Event>,
    last_seen: u64,
    backlog: VecDeque<Event>,
}

impl Subscription {
    /// Sequence of the last event handed out.
    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }

    /// Next event without waiting, or `None` once caught up with the log.
    pub async fn try_next<S: StepStore>(&mut self, store: &S) -> Result<Option<Event>> {
        loop {
            if let Some(event) = self.pop_backlog() {
                return Ok(Some(event));
            }
            match self.rx.try_recv() {
                Ok(event) => {
                    if let Some(event) = self.accept(event, store).await? {
                        return Ok(Some(event));
                    }
                }
                Err(TryRecvError::Lagged(skipped)) => self.lagged(skipped, store).await?,
                Err(TryRecvError::Empty | TryRecvError::Closed) => {
                    self.catch_up(store).await?;
                    if self.backlog.is_empty() {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Waits for the next event. `None` once the emitter is gone and the
    /// log is drained.
    pub async fn recv<S: StepStore>(&mut self, store: &S) -> Result<Option<Event>> {
        loop {
            if let Some(event) = self.try_next(store).await? {
                return Ok(Some(event));
            }
            match self.rx.recv().await {
                Ok(event) => {
                    if let Some(event) = self.accept(event, store).await? {
                        return Ok(Some(event));
                    }
                }
                Err(RecvError::Lagged(skipped)) => self.lagged(skipped, store).await?,
                Err(RecvError::Closed) => return Ok(None),
            }
        }
    }

    async fn accept<S: StepStore>(&mut self, event: Event, store: &S) -> Result<Option<Event>> {
        if event.sequence <= self.last_seen {
            // Already handed out from the log.
            return Ok(None);
        }
        if event.sequence > self.last_seen + 1 {
            debug!(
                expected = self.last_seen + 1,
                got = event.sequence,
                "gap in live events, reading the log"
            );
            self.catch_up(store).await?;
            return Ok(self.pop_backlog());
        }
        self.last_seen = event.sequence;
        Ok(Some(event))
    }

    async fn lagged<S: StepStore>(&mut self, skipped: u64, store: &S) -> Result<()> {
        warn!(
            skipped,
            last_seen = self.last_seen,
            "subscriber lagged, reading the log"
        );
        self.catch_up(store).await
    }

    async fn catch_up<S: StepStore>(&mut self, store: &S) -> Result<()> {
        let from = self.backlog.back().map_or(self.last_seen, |e| e.sequence);
        self.backlog.extend(store.events_after(from).await?);
        Ok(())
    }

    fn pop_backlog(&mut self) -> Option<Event> {
        let event = self.backlog.pop_front()?;
        self.last_seen = event.sequence;
        Some(event)
    }
}
