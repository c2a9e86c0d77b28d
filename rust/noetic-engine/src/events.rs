//! Event bus facade (C9): topic-keyed, best-effort, in-order-per-publisher
//! fan-out.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// The lifecycle and cycle events the engine publishes. `claim_text` is
/// truncated to 200 characters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    SessionStarted { session_id: String, blackboard_id: String },
    SessionPaused { session_id: String },
    SessionResumed { session_id: String },
    SessionStopped { session_id: String },
    SessionCompleted { session_id: String, reason: String },
    CycleStarted { session_id: String, cycle: u64, blackboard_id: String },
    CycleComplete {
        session_id: String,
        cycle: u64,
        duration_ms: u64,
        support: f64,
        current_claim: Option<String>,
    },
    ClaimUpdated { session_id: String, claim: String },
    SupportUpdated { session_id: String, support: f64 },
    ClaimDied { session_id: String, claim: String, cause: String },
    ClaimGraduated { session_id: String, claim: String },
    /// Fired best-effort from RESET once the (externally implemented)
    /// claim-diff/change-detector has produced a transition description.
    ClaimChanged { session_id: String, transition: String },
    /// Fired best-effort from RESET once the (externally implemented)
    /// summarizer has produced an updated running summary.
    SummaryUpdated { session_id: String, summary: String },
    CostRecorded { session_id: String, cost_usd: f64 },
    /// `blackboard:<id>`-scoped; mirrors `Blackboard::increment_cycle`.
    CycleCountChanged { session_id: String, cycle_count: u64 },
}

fn truncate_claim(claim: Option<String>) -> Option<String> {
    claim.map(|c| c.chars().take(200).collect())
}

impl Event {
    pub fn cycle_complete(
        session_id: String,
        cycle: u64,
        duration_ms: u64,
        support: f64,
        current_claim: Option<String>,
    ) -> Self {
        Event::CycleComplete {
            session_id,
            cycle,
            duration_ms,
            support,
            current_claim: truncate_claim(current_claim),
        }
    }
}

const TOPIC_CAPACITY: usize = 256;

/// Topic-keyed fan-out: `session:<id>`, `sessions`, `blackboard:<id>`.
/// Delivery is best-effort — a topic with no subscribers silently drops
/// events, matching a `broadcast` channel's semantics.
pub struct EventBus {
    topics: DashMap<String, broadcast::Sender<Event>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
        }
    }

    fn sender_for(&self, topic: &str) -> broadcast::Sender<Event> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }

    /// Subscribe to a topic, creating it if it doesn't exist yet.
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<Event> {
        self.sender_for(topic).subscribe()
    }

    /// Publish to a topic. A topic with no subscribers drops the event.
    pub fn publish(&self, topic: &str, event: Event) {
        let _ = self.sender_for(topic).send(event);
    }

    pub fn publish_session_event(&self, session_id: &str, event: Event) {
        self.publish(&format!("session:{session_id}"), event.clone());
        self.publish("sessions", event);
    }

    pub fn publish_blackboard_event(&self, session_id: &str, event: Event) {
        self.publish(&format!("blackboard:{session_id}"), event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe("sessions");
        bus.publish(
            "sessions",
            Event::SessionStarted {
                session_id: "s1".into(),
                blackboard_id: "b1".into(),
            },
        );
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, Event::SessionStarted { .. }));
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(
            "sessions",
            Event::SessionStopped {
                session_id: "s1".into(),
            },
        );
    }

    #[test]
    fn cycle_complete_truncates_claim_to_200_chars() {
        let long_claim: String = std::iter::repeat('x').take(500).collect();
        let event = Event::cycle_complete("s1".into(), 1, 10, 0.5, Some(long_claim));
        match event {
            Event::CycleComplete { current_claim, .. } => {
                assert_eq!(current_claim.unwrap().len(), 200);
            }
            _ => panic!("wrong variant"),
        }
    }
}
