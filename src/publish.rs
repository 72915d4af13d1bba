//! Published result slot.
//!
//! The publisher holds the most recent processed frame for a presentation
//! layer. Writers are arbitrated:
//! - A writer must hold the current `SessionToken` to publish
//! - Issuing a new token makes every older token stale
//! - Each accepted frame gets a strictly increasing sequence number
//!
//! Consumers either read `latest()` or hold a `Subscription`, which only
//! yields frames newer than the last one it saw.

use anyhow::Result;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::PipelineError;
use crate::frame::Frame;

/// Identifier of a publishing session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

/// Exclusive right to publish. Not `Clone`: there is one holder per session.
#[derive(Debug)]
pub struct SessionToken {
    id: SessionId,
}

impl SessionToken {
    pub fn id(&self) -> SessionId {
        self.id
    }
}

/// A frame accepted by the publisher.
#[derive(Clone, Debug)]
pub struct PublishedFrame {
    pub sequence: u64,
    pub session: SessionId,
    pub frame: Arc<Frame>,
}

#[derive(Default)]
struct Slot {
    latest: Option<PublishedFrame>,
    active: Option<SessionId>,
    next_session: u64,
    next_sequence: u64,
}

/// Single-slot observable result.
#[derive(Default)]
pub struct ResultPublisher {
    slot: Mutex<Slot>,
    changed: Condvar,
}

impl ResultPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take over the slot. Any previously issued token becomes stale.
    pub fn begin_session(&self) -> SessionToken {
        let mut slot = self.lock();
        slot.next_session += 1;
        let id = SessionId(slot.next_session);
        if let Some(previous) = slot.active.replace(id) {
            log::debug!("publisher: session {} superseded by {}", previous.0, id.0);
        }
        SessionToken { id }
    }

    /// Release exclusivity if `token` is still the active writer.
    pub fn end_session(&self, token: &SessionToken) {
        let mut slot = self.lock();
        if slot.active == Some(token.id) {
            slot.active = None;
        }
    }

    pub fn is_current(&self, token: &SessionToken) -> bool {
        self.lock().active == Some(token.id)
    }

    pub fn active_session(&self) -> Option<SessionId> {
        self.lock().active
    }

    /// Replace the published frame. Returns the assigned sequence number.
    ///
    /// Fails with `StaleSession` when another session has taken over.
    pub fn publish(&self, token: &SessionToken, frame: Frame) -> Result<u64> {
        let mut slot = self.lock();
        if slot.active != Some(token.id) {
            return Err(PipelineError::StaleSession {
                session: token.id.0,
            }
            .into());
        }
        slot.next_sequence += 1;
        let sequence = slot.next_sequence;
        slot.latest = Some(PublishedFrame {
            sequence,
            session: token.id,
            frame: Arc::new(frame),
        });
        drop(slot);
        self.changed.notify_all();
        Ok(sequence)
    }

    pub fn latest(&self) -> Option<PublishedFrame> {
        self.lock().latest.clone()
    }

    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        Subscription {
            publisher: Arc::clone(self),
            last_seen: 0,
        }
    }

    fn wait_newer(&self, after: u64, timeout: Duration) -> Option<PublishedFrame> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.lock();
        loop {
            if let Some(latest) = slot.latest.as_ref() {
                if latest.sequence > after {
                    return Some(latest.clone());
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            slot = match self.changed.wait_timeout(slot, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

/// Consumer view that discards frames it has already seen.
pub struct Subscription {
    publisher: Arc<ResultPublisher>,
    last_seen: u64,
}

impl Subscription {
    /// Newest frame if it is newer than the last one returned.
    pub fn poll(&mut self) -> Option<PublishedFrame> {
        let latest = self.publisher.latest()?;
        self.accept(latest)
    }

    /// Block until a newer frame is published or `timeout` elapses.
    pub fn wait(&mut self, timeout: Duration) -> Option<PublishedFrame> {
        let latest = self.publisher.wait_newer(self.last_seen, timeout)?;
        self.accept(latest)
    }

    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }

    fn accept(&mut self, frame: PublishedFrame) -> Option<PublishedFrame> {
        if frame.sequence <= self.last_seen {
            return None;
        }
        self.last_seen = frame.sequence;
        Some(frame)
    }
}
