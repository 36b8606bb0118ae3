//! The streaming event stream (§4.10): a single ordered channel of typed
//! events, produced by exactly one writer at a time — the active phase's
//! task. Phases never run in parallel on the same request (§4.9, §5).

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::types::{Finding, Source};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Strategy,
    Retrieval,
    Analysis,
    Validation,
    Answer,
}

/// One event on the stream (§4.10's typed frames).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    PhaseStart { phase: Phase, timestamp: i64 },
    PhaseComplete { phase: Phase, timestamp: i64 },
    Progress { phase: Phase, message: String },
    /// Emitted only during `ANSWER`, strictly between its `phase_start`
    /// and `phase_complete` (§4.10).
    Token { content: String },
    Sources { sources: Vec<Source> },
    Findings { phase: Phase, findings: Vec<Finding> },
    Final { content: String, sources: Vec<Source>, state_summary: String },
    Error { phase: Phase, message: String },
}

/// The single-writer sink an `Orchestrator` run writes events to. Wraps a
/// bounded `mpsc` channel so a blocked consumer (e.g. a stalled response
/// socket, §5 "Backpressure") pauses the producing phase rather than
/// unboundedly buffering.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<AgentEvent>,
}

pub struct EventStream {
    rx: mpsc::Receiver<AgentEvent>,
}

/// Builds a connected sink/stream pair. `capacity` bounds in-flight
/// events before a `send` blocks (applies backpressure to the writer).
pub fn channel(capacity: usize) -> (EventSink, EventStream) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSink { tx }, EventStream { rx })
}

impl EventSink {
    pub async fn send(&self, event: AgentEvent) {
        // A closed receiver means the client disconnected (§7 `ClientCancel`);
        // dropping the event is correct — there is nothing left to notify.
        let _ = self.tx.send(event).await;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl EventStream {
    pub async fn recv(&mut self) -> Option<AgentEvent> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_are_received_in_send_order() {
        let (sink, mut stream) = channel(8);
        sink.send(AgentEvent::PhaseStart { phase: Phase::Retrieval, timestamp: 1 }).await;
        sink.send(AgentEvent::Token { content: "a".to_string() }).await;
        sink.send(AgentEvent::Token { content: "b".to_string() }).await;
        drop(sink);

        let mut received = Vec::new();
        while let Some(ev) = stream.recv().await {
            received.push(ev);
        }
        assert_eq!(received.len(), 3);
        assert!(matches!(received[0], AgentEvent::PhaseStart { .. }));
    }

    #[tokio::test]
    async fn dropped_receiver_does_not_panic_sender() {
        let (sink, stream) = channel(1);
        drop(stream);
        sink.send(AgentEvent::Final {
            content: "x".to_string(),
            sources: vec![],
            state_summary: String::new(),
        })
        .await;
    }
}
