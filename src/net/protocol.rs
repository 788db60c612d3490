//! Wire messages
//!
//! JSON objects tagged by `type`. Every inbound message is decoded and
//! validated before it reaches the hub; every outbound message is validated
//! before it is written.

use serde::{Deserialize, Serialize};

use crate::sim::control::{ControlAction, ControlEvent};
use crate::sim::events::StateEvent;
use crate::sim::state::AgentData;
use crate::sim::time::GameTime;

/// Wire format version. A join with any other value is refused.
pub const PROTOCOL_VERSION: u32 = 1;

/// Close code sent after a refused handshake
pub const CLOSE_PROTOCOL_MISMATCH: u32 = 4001;
pub const PROTOCOL_MISMATCH_REASON: &str = "protocol mismatch";

/// Close code for a viewer whose outbound queue filled during the handshake
pub const CLOSE_HANDSHAKE_BACKLOG: u32 = 4002;
pub const HANDSHAKE_BACKLOG_REASON: &str = "outbound backlog during join";

/// Reason on control acks for connections that have not joined
pub const JOIN_REQUIRED: &str = "join required";

/// Messages from viewer to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Join {
        protocol_version: u32,
    },
    Control {
        action: ControlAction,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<f64>,
    },
}

impl ClientMessage {
    pub fn join() -> Self {
        ClientMessage::Join {
            protocol_version: PROTOCOL_VERSION,
        }
    }

    pub fn control(event: ControlEvent) -> Self {
        ClientMessage::Control {
            action: event.action,
            value: event.value,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            ClientMessage::Join { .. } => Ok(()),
            ClientMessage::Control { value: Some(v), .. } if !v.is_finite() => {
                Err(ValidationError("control value must be finite".into()))
            }
            ClientMessage::Control { .. } => Ok(()),
        }
    }
}

/// Messages from server to viewer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    JoinAck {
        protocol_version: u32,
        accepted: bool,
        tick_id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    ControlAck {
        action: ControlAction,
        accepted: bool,
        tick_id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Full state, sent once right after an accepted join
    Snapshot(StateEvent),
    /// Per-tick state, sent only to joined connections
    Delta(StateEvent),
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::JoinAck { .. } => "joinAck",
            ServerMessage::ControlAck { .. } => "controlAck",
            ServerMessage::Snapshot(_) => "snapshot",
            ServerMessage::Delta(_) => "delta",
        }
    }

    /// Schema check run before anything goes on the wire
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            ServerMessage::JoinAck { accepted, reason, .. }
            | ServerMessage::ControlAck { accepted, reason, .. } => {
                if !accepted && reason.as_deref().map_or(true, str::is_empty) {
                    return Err(ValidationError(format!("rejected {} without a reason", self.kind())));
                }
                Ok(())
            }
            ServerMessage::Snapshot(event) | ServerMessage::Delta(event) => validate_state(event),
        }
    }
}

fn validate_state(event: &StateEvent) -> Result<(), ValidationError> {
    if event.game_time != GameTime::from_total_minutes(event.game_time.total_minutes) {
        return Err(ValidationError("gameTime fields disagree with totalMinutes".into()));
    }
    if let Some(metrics) = &event.metrics {
        metrics.validate().map_err(|e| ValidationError(e.to_string()))?;
    }
    event.agents.iter().try_for_each(validate_agent)
}

fn validate_agent(agent: &AgentData) -> Result<(), ValidationError> {
    for (field, value) in [("energy", agent.energy), ("hunger", agent.hunger), ("mood", agent.mood)] {
        if !(0.0..=1.0).contains(&value) {
            return Err(ValidationError(format!("agent {} {} out of range: {}", agent.id, field, value)));
        }
    }
    if !agent.position.is_finite() {
        return Err(ValidationError(format!("agent {} position not finite", agent.id)));
    }
    Ok(())
}

pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, EncodeError> {
    serde_json::to_vec(message).map_err(|e| EncodeError(e.to_string()))
}

pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, DecodeError> {
    serde_json::from_slice(data).map_err(|e| DecodeError(e.to_string()))
}

/// Decode and validate one inbound frame
pub fn decode_client(data: &[u8]) -> Result<ClientMessage, DecodeError> {
    let message: ClientMessage = decode(data)?;
    message.validate().map_err(|e| DecodeError(e.0))?;
    Ok(message)
}

/// Validate then encode one outbound message
pub fn encode_server(message: &ServerMessage) -> Result<Vec<u8>, EncodeError> {
    message.validate().map_err(|e| EncodeError(e.0))?;
    encode(message)
}

#[derive(Debug, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[derive(Debug, thiserror::Error)]
#[error("Decode error: {0}")]
pub struct DecodeError(String);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Invalid message: {0}")]
pub struct ValidationError(pub String);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::orchestrator::{OrchestratorConfig, SimulationOrchestrator};

    #[test]
    fn test_decode_join() {
        let msg = decode_client(br#"{"type":"join","protocolVersion":1}"#).unwrap();
        assert_eq!(msg, ClientMessage::join());
    }

    #[test]
    fn test_decode_control() {
        let msg = decode_client(br#"{"type":"control","action":"setSpeed","value":4}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Control {
                action: ControlAction::SetSpeed,
                value: Some(4.0),
            }
        );
        let msg = decode_client(br#"{"type":"control","action":"pause"}"#).unwrap();
        assert_eq!(msg, ClientMessage::control(ControlEvent::pause()));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(decode_client(b"not json").is_err());
        assert!(decode_client(br#"{"type":"teleport"}"#).is_err());
        assert!(decode_client(br#"{"type":"join"}"#).is_err());
        assert!(decode_client(br#"{"type":"join","protocolVersion":-1}"#).is_err());
        assert!(decode_client(br#"{"type":"control","action":"rewind"}"#).is_err());
    }

    #[test]
    fn test_ack_shape() {
        let ack = ServerMessage::ControlAck {
            action: ControlAction::Pause,
            accepted: false,
            tick_id: 12,
            reason: Some(JOIN_REQUIRED.into()),
        };
        let json: serde_json::Value = serde_json::from_slice(&encode_server(&ack).unwrap()).unwrap();
        assert_eq!(json["type"], "controlAck");
        assert_eq!(json["action"], "pause");
        assert_eq!(json["tickId"], 12);
        assert_eq!(json["reason"], "join required");

        let ok = ServerMessage::JoinAck {
            protocol_version: PROTOCOL_VERSION,
            accepted: true,
            tick_id: 0,
            reason: None,
        };
        let json: serde_json::Value = serde_json::from_slice(&encode_server(&ok).unwrap()).unwrap();
        assert_eq!(json["type"], "joinAck");
        assert!(json.get("reason").is_none());
    }

    #[test]
    fn test_rejection_needs_reason() {
        let ack = ServerMessage::JoinAck {
            protocol_version: PROTOCOL_VERSION,
            accepted: false,
            tick_id: 0,
            reason: None,
        };
        assert!(ack.validate().is_err());
        assert!(encode_server(&ack).is_err());
    }

    #[test]
    fn test_state_messages_flatten() {
        let mut sim = SimulationOrchestrator::new(OrchestratorConfig {
            agent_count: 3,
            ..OrchestratorConfig::default()
        });
        sim.tick(1);
        let delta = ServerMessage::Delta(sim.create_delta_event(1));
        let bytes = encode_server(&delta).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["type"], "delta");
        assert_eq!(json["tickId"], 1);
        assert_eq!(json["agents"].as_array().unwrap().len(), 3);
        assert!(json["gameTime"]["hour"].is_number());

        match decode::<ServerMessage>(&bytes).unwrap() {
            ServerMessage::Delta(event) => {
                assert_eq!(event.tick_id, 1);
                assert_eq!(event.agents.len(), 3);
                assert_eq!(event.game_time, sim.game_time());
            }
            other => panic!("unexpected {}", other.kind()),
        }
    }

    #[test]
    fn test_state_validation_catches_bad_agent() {
        let sim = SimulationOrchestrator::new(OrchestratorConfig {
            agent_count: 1,
            ..OrchestratorConfig::default()
        });
        let mut event = sim.create_snapshot_event(0);
        event.agents[0].energy = 1.5;
        assert!(ServerMessage::Snapshot(event).validate().is_err());
    }
}
