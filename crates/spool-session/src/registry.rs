use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use spool_core::event::RunEvent;
use spool_core::ids::{SubscriberId, ThreadId};

/// A live subscription: one subscriber watching one thread through a
/// bounded event sink.
struct RunSession {
    subscriber_id: SubscriberId,
    sink: mpsc::Sender<RunEvent>,
}

/// Per-thread fan-out of run events to every watching subscriber.
///
/// At most one session exists per (thread, subscriber) pair: subscribing
/// again evicts the previous session and completes its sink. Dropping a
/// session's sender is the normal terminal signal for the receiver, not
/// a failure.
pub struct SessionRegistry {
    sessions: DashMap<ThreadId, Vec<RunSession>>,
    sink_capacity: usize,
}

impl SessionRegistry {
    pub fn new(sink_capacity: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            sink_capacity,
        }
    }

    /// Open a session for `(thread, subscriber)` and return its event
    /// receiver. An existing session for the same pair is replaced; its
    /// receiver completes.
    pub fn subscribe(
        &self,
        subscriber_id: SubscriberId,
        thread_id: ThreadId,
    ) -> mpsc::Receiver<RunEvent> {
        let (sink, receiver) = mpsc::channel(self.sink_capacity);

        let mut entry = self.sessions.entry(thread_id).or_default();
        if let Some(pos) = entry
            .iter()
            .position(|s| s.subscriber_id == subscriber_id)
        {
            debug!(subscriber_id = %subscriber_id, "replacing existing session for pair");
            entry.remove(pos);
        }
        entry.push(RunSession { subscriber_id, sink });

        receiver
    }

    /// Whether a session exists for the pair.
    pub fn is_subscribed(&self, thread_id: &ThreadId, subscriber_id: &SubscriberId) -> bool {
        self.sessions
            .get(thread_id)
            .map(|sessions| sessions.iter().any(|s| &s.subscriber_id == subscriber_id))
            .unwrap_or(false)
    }

    /// Deliver an event to every session on the thread, in registration
    /// order. Returns the number of sinks that accepted the event; zero
    /// when nobody is listening (events are not buffered for later).
    pub fn publish(&self, thread_id: &ThreadId, event: RunEvent) -> usize {
        let Some(sessions) = self.sessions.get(thread_id) else {
            debug!(thread_id = %thread_id, "no listeners for event");
            return 0;
        };

        let mut delivered = 0;
        for session in sessions.iter() {
            match session.sink.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        thread_id = %thread_id,
                        subscriber_id = %session.subscriber_id,
                        "event sink full, dropping event"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // Receiver went away; close() will reap the session.
                }
            }
        }
        delivered
    }

    /// Close exactly the caller's session. When it was the last one on
    /// the thread, the thread's registration is removed entirely.
    /// Returns false when no such session existed.
    pub fn close(&self, thread_id: &ThreadId, subscriber_id: &SubscriberId) -> bool {
        let removed = {
            let Some(mut entry) = self.sessions.get_mut(thread_id) else {
                return false;
            };
            match entry
                .iter()
                .position(|s| &s.subscriber_id == subscriber_id)
            {
                Some(pos) => {
                    entry.remove(pos);
                    true
                }
                None => false,
            }
        };

        if removed {
            self.sessions.remove_if(thread_id, |_, sessions| sessions.is_empty());
        }
        removed
    }

    /// Number of threads with at least one session.
    pub fn thread_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of sessions on one thread.
    pub fn session_count(&self, thread_id: &ThreadId) -> usize {
        self.sessions
            .get(thread_id)
            .map(|sessions| sessions.len())
            .unwrap_or(0)
    }
}
