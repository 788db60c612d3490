//! Domain events and the state event shared by snapshots and deltas

use serde::{Deserialize, Serialize};

use crate::sim::conversation::ConversationQuality;
use crate::sim::metrics::SimulationMetrics;
use crate::sim::state::{AgentData, AgentId};
use crate::sim::time::GameTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
}

/// Something that happened during one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum DomainEvent {
    ConversationStart {
        conversation_id: u64,
        participants: Vec<AgentId>,
        topic: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        location: Option<String>,
    },
    ConversationTurn {
        conversation_id: u64,
        speaker: AgentId,
        listener: AgentId,
        text: String,
        sentiment: f32,
    },
    ConversationEnd {
        conversation_id: u64,
        participants: Vec<AgentId>,
        quality: ConversationQuality,
    },
    RelationshipShift {
        from: AgentId,
        to: AgentId,
        delta: f32,
        value: f32,
    },
    LocationArrival {
        agent: AgentId,
        location: String,
    },
    TopicSpread {
        from: AgentId,
        to: AgentId,
        topic: String,
    },
    SpeechBubble {
        agent: AgentId,
        text: String,
        duration_ticks: u32,
    },
    Log {
        level: LogLevel,
        message: String,
    },
}

impl DomainEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::ConversationStart { .. } => "conversationStart",
            DomainEvent::ConversationTurn { .. } => "conversationTurn",
            DomainEvent::ConversationEnd { .. } => "conversationEnd",
            DomainEvent::RelationshipShift { .. } => "relationshipShift",
            DomainEvent::LocationArrival { .. } => "locationArrival",
            DomainEvent::TopicSpread { .. } => "topicSpread",
            DomainEvent::SpeechBubble { .. } => "speechBubble",
            DomainEvent::Log { .. } => "log",
        }
    }
}

/// World projection at one tick. Snapshots and deltas share this shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateEvent {
    pub tick_id: u64,
    pub game_time: GameTime,
    pub agents: Vec<AgentData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<SimulationMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<DomainEvent>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_tagged_encoding() {
        let e = DomainEvent::LocationArrival {
            agent: Uuid::nil(),
            location: "Cafe".into(),
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["type"], "locationArrival");
        assert_eq!(json["type"], e.kind());
        assert_eq!(json["location"], "Cafe");

        let bubble = DomainEvent::SpeechBubble {
            agent: Uuid::nil(),
            text: "hi".into(),
            duration_ticks: 3,
        };
        let json = serde_json::to_value(&bubble).unwrap();
        assert_eq!(json["type"], "speechBubble");
        assert_eq!(json["durationTicks"], 3);
    }

    #[test]
    fn test_decode_by_tag() {
        let json = r#"{"type":"log","level":"warn","message":"queue critical"}"#;
        let e: DomainEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            e,
            DomainEvent::Log {
                level: LogLevel::Warn,
                message: "queue critical".into()
            }
        );
        assert!(serde_json::from_str::<DomainEvent>(r#"{"type":"explode"}"#).is_err());
    }

    #[test]
    fn test_state_event_optional_fields() {
        let event = StateEvent {
            tick_id: 0,
            game_time: GameTime::start(),
            agents: Vec::new(),
            metrics: None,
            events: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["tickId"], 0);
        assert!(json.get("metrics").is_none());
        assert!(json.get("events").is_none());
    }
}
