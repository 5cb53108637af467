//! Event bus — per-session bounded streams consumed by SSE clients.
//!
//! Events are typed, serialized as one JSON object with a `type` field.
//! Queues are bounded; a slow subscriber loses the oldest events and
//! receives a synthetic [`EventPayload::Overflow`] marker instead.
//! Pushing never blocks engine execution.

use std::collections::HashMap;
use std::sync::Mutex;

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

/// Default per-session queue bound.
pub const DEFAULT_QUEUE_BOUND: usize = 500;

/// Typed payload of a session event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// A pattern run started.
    PatternStart {
        /// Pattern id.
        pattern_id: String,
        /// Pattern type tag.
        pattern_type: String,
    },
    /// A pattern run finished.
    PatternEnd {
        /// Whether the run succeeded.
        success: bool,
        /// Error message, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// A mission phase started.
    PhaseStarted {
        /// Phase display name.
        name: String,
    },
    /// A mission phase completed.
    PhaseCompleted {
        /// Final phase status tag.
        status: String,
        /// Phase summary.
        summary: String,
    },
    /// A mission phase failed.
    PhaseFailed {
        /// Error detail.
        error: String,
    },
    /// An agent began streaming output.
    StreamStart {
        /// Agent id.
        agent_id: String,
    },
    /// Incremental streamed text.
    StreamDelta {
        /// Agent id.
        agent_id: String,
        /// Text chunk.
        delta: String,
    },
    /// Reasoning heartbeat while the model thinks.
    StreamThinking {
        /// Agent id.
        agent_id: String,
    },
    /// An agent finished streaming.
    StreamEnd {
        /// Agent id.
        agent_id: String,
    },
    /// A session message was persisted.
    Message {
        /// Sender agent id.
        from_agent: String,
        /// Message kind tag.
        kind: String,
        /// Message body.
        content: String,
    },
    /// Agent activity indicator.
    AgentStatus {
        /// Agent id.
        agent_id: String,
        /// `thinking` or `idle`.
        status: String,
    },
    /// A human checkpoint was reached.
    Checkpoint {
        /// Checkpoint prompt.
        message: String,
        /// Whether the orchestrator waits for input.
        requires_input: bool,
    },
    /// Evidence gate report.
    EvidenceGate {
        /// Whether all criteria passed.
        all_passed: bool,
        /// Per-criterion report.
        report: Value,
    },
    /// Orchestrator rolled back to an earlier phase.
    Reloop {
        /// Target phase index.
        target_phase: usize,
        /// Reloop count so far.
        count: usize,
    },
    /// A key insight was stored in project memory.
    MemoryStored {
        /// Memory key.
        key: String,
        /// Memory category.
        category: String,
    },
    /// The mission failed terminally.
    MissionFailed {
        /// Error detail.
        error: String,
    },
    /// Board state changed; clients should refetch.
    KanbanRefresh,
    /// Subscriber lagged; `dropped` events were discarded.
    Overflow {
        /// Number of dropped events.
        dropped: u64,
    },
}

/// One event on a session stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    /// Typed payload, flattened into the JSON object.
    #[serde(flatten)]
    pub payload: EventPayload,
    /// Phase the event belongs to, injected by the dispatcher.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase_id: Option<String>,
}

impl SessionEvent {
    /// Wrap a payload without phase context.
    #[must_use]
    pub const fn new(payload: EventPayload) -> Self {
        Self {
            payload,
            phase_id: None,
        }
    }

    /// Attach a phase id if none is set.
    #[must_use]
    pub fn with_phase(mut self, phase_id: &str) -> Self {
        if self.phase_id.is_none() {
            self.phase_id = Some(phase_id.to_owned());
        }
        self
    }
}

impl From<EventPayload> for SessionEvent {
    fn from(payload: EventPayload) -> Self {
        Self::new(payload)
    }
}

/// Per-session bounded event fan-out.
///
/// Cheap to clone via interior sharing is intentionally avoided: hold it
/// in an `Arc`. Sessions are materialized lazily on first push/subscribe.
#[derive(Debug)]
pub struct EventBus {
    bound: usize,
    sessions: Mutex<HashMap<String, broadcast::Sender<SessionEvent>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_BOUND)
    }
}

impl EventBus {
    /// Create a bus with the given per-session queue bound.
    #[must_use]
    pub fn new(bound: usize) -> Self {
        Self {
            bound: bound.max(1),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn sender(&self, session_id: &str) -> broadcast::Sender<SessionEvent> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .entry(session_id.to_owned())
            .or_insert_with(|| broadcast::channel(self.bound).0)
            .clone()
    }

    /// Append an event to a session's stream. Never blocks; events pushed
    /// with no subscriber are dropped.
    pub fn push(&self, session_id: &str, event: impl Into<SessionEvent>) {
        let event = event.into();
        trace!(session_id, payload = ?event.payload, "bus push");
        let _ = self.sender(session_id).send(event);
    }

    /// Subscribe to a session's stream.
    ///
    /// Yields events in push order until the bus is dropped. When the
    /// subscriber lags past the queue bound, the oldest events are
    /// discarded and an [`EventPayload::Overflow`] marker is yielded.
    pub fn subscribe(&self, session_id: &str) -> impl Stream<Item = SessionEvent> + use<> {
        let mut rx = self.sender(session_id).subscribe();
        async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Lagged(dropped)) => {
                        yield SessionEvent::new(EventPayload::Overflow { dropped });
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    /// Drop a session's queue (stream ends for subscribers).
    pub fn close(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt as _;

    #[tokio::test]
    async fn events_arrive_in_order() {
        let bus = EventBus::default();
        let mut stream = Box::pin(bus.subscribe("s1"));

        bus.push("s1", EventPayload::PatternStart {
            pattern_id: "p".into(),
            pattern_type: "solo".into(),
        });
        bus.push(
            "s1",
            SessionEvent::new(EventPayload::PatternEnd {
                success: true,
                error: None,
            })
            .with_phase("phase-1"),
        );

        let first = stream.next().await.unwrap();
        assert!(matches!(first.payload, EventPayload::PatternStart { .. }));
        let second = stream.next().await.unwrap();
        assert!(matches!(second.payload, EventPayload::PatternEnd { success: true, .. }));
        assert_eq!(second.phase_id.as_deref(), Some("phase-1"));
    }

    #[tokio::test]
    async fn overflow_yields_marker() {
        let bus = EventBus::new(4);
        let mut stream = Box::pin(bus.subscribe("s1"));

        for _ in 0..10 {
            bus.push("s1", EventPayload::KanbanRefresh);
        }

        let first = stream.next().await.unwrap();
        let EventPayload::Overflow { dropped } = first.payload else {
            panic!("expected overflow marker, got {:?}", first.payload);
        };
        assert!(dropped >= 1);
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let event = SessionEvent::new(EventPayload::StreamDelta {
            agent_id: "a1".into(),
            delta: "hi".into(),
        })
        .with_phase("dev");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "stream_delta");
        assert_eq!(json["phase_id"], "dev");
    }
}
