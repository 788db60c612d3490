//! Viewer synchronization hub
//!
//! Per connection: `Unjoined -> Joined -> (removed)`. Only joined connections
//! receive deltas, and a join always sends its snapshot before the caller can
//! broadcast the next delta, so no viewer sees a delta without context.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::net::connection::{ClientSink, Connection, ConnectionManager, ConnectionState, SinkError};
use crate::net::protocol::{
    decode_client, encode_server, ClientMessage, ServerMessage, CLOSE_HANDSHAKE_BACKLOG, CLOSE_PROTOCOL_MISMATCH,
    HANDSHAKE_BACKLOG_REASON, JOIN_REQUIRED, PROTOCOL_MISMATCH_REASON, PROTOCOL_VERSION,
};
use crate::sim::control::{ControlEvent, ControlRejection};
use crate::sim::events::StateEvent;
use crate::sim::orchestrator::SimulationOrchestrator;

/// What the hub needs from the simulation
pub trait SimulationControl {
    fn apply_control(&mut self, event: &ControlEvent) -> Result<(), ControlRejection>;

    fn current_tick_id(&self) -> u64;

    /// Full state as of the last completed tick
    fn snapshot_event(&self) -> StateEvent;
}

impl SimulationControl for SimulationOrchestrator {
    fn apply_control(&mut self, event: &ControlEvent) -> Result<(), ControlRejection> {
        SimulationOrchestrator::apply_control(self, event)
    }

    fn current_tick_id(&self) -> u64 {
        self.last_tick_id()
    }

    fn snapshot_event(&self) -> StateEvent {
        self.create_snapshot_event(self.last_tick_id())
    }
}

/// Result of handling one inbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    UnknownConnection,
    /// Malformed or invalid; nothing was sent
    Dropped,
    Joined,
    /// Version mismatch; connection closed and removed
    Rejected,
    ControlAcked { accepted: bool },
    /// The reply could not be written; connection removed
    SinkClosed,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HubStats {
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub joins_accepted: u64,
    pub joins_rejected: u64,
    pub controls_forwarded: u64,
    pub deltas_sent: u64,
}

#[derive(Default)]
pub struct SyncHub {
    connections: ConnectionManager,
    stats: HubStats,
}

impl SyncHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new viewer; it starts unjoined
    pub fn connect(&mut self, sink: Arc<dyn ClientSink>) -> u64 {
        let id = self.connections.create(sink);
        debug!(connection = id, "Viewer connected");
        id
    }

    pub fn disconnect(&mut self, id: u64) -> bool {
        let removed = self.connections.remove(id).is_some();
        if removed {
            debug!(connection = id, "Viewer disconnected");
        }
        removed
    }

    pub fn handle_frame(&mut self, id: u64, frame: &[u8], sim: &mut dyn SimulationControl) -> FrameOutcome {
        let Some(conn) = self.connections.get_mut(id) else {
            return FrameOutcome::UnknownConnection;
        };
        conn.record_received();
        self.stats.frames_received += 1;

        let message = match decode_client(frame) {
            Ok(message) => message,
            Err(e) => {
                debug!(connection = id, error = %e, "Dropping malformed frame");
                self.stats.frames_dropped += 1;
                return FrameOutcome::Dropped;
            }
        };

        match message {
            ClientMessage::Join { protocol_version } => self.handle_join(id, protocol_version, sim),
            ClientMessage::Control { action, value } => self.handle_control(id, ControlEvent { action, value }, sim),
        }
    }

    fn handle_join(&mut self, id: u64, protocol_version: u32, sim: &mut dyn SimulationControl) -> FrameOutcome {
        let tick_id = sim.current_tick_id();
        let Some(conn) = self.connections.get_mut(id) else {
            return FrameOutcome::UnknownConnection;
        };

        if protocol_version != PROTOCOL_VERSION {
            let ack = ServerMessage::JoinAck {
                protocol_version: PROTOCOL_VERSION,
                accepted: false,
                tick_id,
                reason: Some(format!(
                    "{}: server speaks {}, client sent {}",
                    PROTOCOL_MISMATCH_REASON, PROTOCOL_VERSION, protocol_version
                )),
            };
            send_message(conn, &ack);
            conn.sink.close(CLOSE_PROTOCOL_MISMATCH, PROTOCOL_MISMATCH_REASON);
            self.connections.remove(id);
            self.stats.joins_rejected += 1;
            info!(connection = id, protocol_version, "Join rejected: protocol mismatch");
            return FrameOutcome::Rejected;
        }

        let rejoin = conn.is_joined();
        let ack = ServerMessage::JoinAck {
            protocol_version,
            accepted: true,
            tick_id,
            reason: None,
        };
        let snapshot = ServerMessage::Snapshot(sim.snapshot_event());
        let (ack, snapshot) = match (encode_server(&ack), encode_server(&snapshot)) {
            (Ok(ack), Ok(snapshot)) => (ack, snapshot),
            (Err(e), _) | (_, Err(e)) => {
                warn!(connection = id, error = %e, "Join handshake failed validation");
                return FrameOutcome::Dropped;
            }
        };

        // Joined only once both are queued; a delta must never precede the snapshot
        if let Err(e) = conn.send(ack.into()).and_then(|()| conn.send(snapshot.into())) {
            if e == SinkError::Full {
                warn!(connection = id, "Outbound queue full during join");
                conn.sink.close(CLOSE_HANDSHAKE_BACKLOG, HANDSHAKE_BACKLOG_REASON);
            }
            self.connections.remove(id);
            return FrameOutcome::SinkClosed;
        }
        conn.mark_joined(protocol_version);

        self.stats.joins_accepted += 1;
        if rejoin {
            debug!(connection = id, tick_id, "Viewer re-joined");
        } else {
            info!(connection = id, tick_id, "Viewer joined");
        }
        FrameOutcome::Joined
    }

    fn handle_control(&mut self, id: u64, event: ControlEvent, sim: &mut dyn SimulationControl) -> FrameOutcome {
        let Some(conn) = self.connections.get_mut(id) else {
            return FrameOutcome::UnknownConnection;
        };

        let (accepted, reason) = if conn.is_joined() {
            self.stats.controls_forwarded += 1;
            match sim.apply_control(&event) {
                Ok(()) => (true, None),
                Err(rejection) => (false, Some(rejection.to_string())),
            }
        } else {
            debug!(connection = id, action = event.action.as_str(), "Control before join");
            (false, Some(JOIN_REQUIRED.to_string()))
        };

        let ack = ServerMessage::ControlAck {
            action: event.action,
            accepted,
            tick_id: sim.current_tick_id(),
            reason,
        };
        if send_message(conn, &ack) {
            FrameOutcome::ControlAcked { accepted }
        } else {
            self.connections.remove(id);
            FrameOutcome::SinkClosed
        }
    }

    /// Encode once and send to every joined connection. Returns the number of
    /// viewers reached; closed sinks are pruned.
    pub fn broadcast_delta(&mut self, event: &StateEvent) -> usize {
        if self.connections.joined_count() == 0 {
            return 0;
        }
        let payload: Arc<[u8]> = match encode_server(&ServerMessage::Delta(event.clone())) {
            Ok(bytes) => bytes.into(),
            Err(e) => {
                warn!(tick_id = event.tick_id, error = %e, "Dropping invalid delta");
                return 0;
            }
        };

        let mut sent = 0;
        let mut closed = Vec::new();
        for conn in self.connections.iter_mut() {
            if !conn.is_joined() {
                continue;
            }
            if !conn.sink.is_open() {
                closed.push(conn.id);
                continue;
            }
            match conn.send(payload.clone()) {
                Ok(()) => sent += 1,
                Err(SinkError::Closed) => closed.push(conn.id),
                Err(SinkError::Full) => {
                    warn!(connection = conn.id, tick_id = event.tick_id, "Viewer lagging, delta skipped");
                }
            }
        }

        for id in closed {
            self.connections.remove(id);
            debug!(connection = id, "Pruned closed viewer");
        }
        self.stats.deltas_sent += sent as u64;
        sent
    }

    pub fn connection_count(&self) -> usize {
        self.connections.count()
    }

    pub fn joined_count(&self) -> usize {
        self.connections.joined_count()
    }

    pub fn connection_state(&self, id: u64) -> Option<ConnectionState> {
        self.connections.get(id).map(|c| c.state)
    }

    pub fn stats(&self) -> HubStats {
        self.stats
    }
}

/// Validate, encode and send. False only if the sink refused the bytes.
fn send_message(conn: &mut Connection, message: &ServerMessage) -> bool {
    let bytes = match encode_server(message) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(connection = conn.id, kind = message.kind(), error = %e, "Dropping invalid outbound message");
            return true;
        }
    };
    match conn.send(bytes.into()) {
        Ok(()) => true,
        Err(SinkError::Full) => {
            warn!(connection = conn.id, kind = message.kind(), "Outbound buffer full");
            true
        }
        Err(SinkError::Closed) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::control::ControlAction;
    use crate::sim::orchestrator::OrchestratorConfig;
    use crate::sim::time::GameTime;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct SpySink {
        sent: Mutex<Vec<serde_json::Value>>,
        closed: Mutex<Option<(u32, String)>>,
        shut: AtomicBool,
        /// Sends left that report `Full` before the queue frees up
        backlog: AtomicUsize,
        /// Total messages the queue holds before reporting `Full`
        capacity: Mutex<Option<usize>>,
    }

    impl SpySink {
        fn types(&self) -> Vec<String> {
            self.sent
                .lock()
                .iter()
                .map(|v| v["type"].as_str().unwrap_or_default().to_string())
                .collect()
        }

        fn last(&self) -> serde_json::Value {
            self.sent.lock().last().cloned().unwrap()
        }
    }

    impl ClientSink for SpySink {
        fn send(&self, payload: Arc<[u8]>) -> Result<(), SinkError> {
            if self.shut.load(Ordering::SeqCst) {
                return Err(SinkError::Closed);
            }
            if self
                .backlog
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(SinkError::Full);
            }
            let capacity = *self.capacity.lock();
            if capacity.is_some_and(|cap| self.sent.lock().len() >= cap) {
                return Err(SinkError::Full);
            }
            self.sent.lock().push(serde_json::from_slice(&payload).unwrap());
            Ok(())
        }

        fn close(&self, code: u32, reason: &str) {
            *self.closed.lock() = Some((code, reason.to_string()));
            self.shut.store(true, Ordering::SeqCst);
        }

        fn is_open(&self) -> bool {
            !self.shut.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct SpySim {
        controls: usize,
        tick_id: u64,
    }

    impl SimulationControl for SpySim {
        fn apply_control(&mut self, event: &ControlEvent) -> Result<(), ControlRejection> {
            self.controls += 1;
            match event.action {
                ControlAction::SetSpeed => Err(ControlRejection::UnsupportedSpeed(event.value.unwrap_or(0.0))),
                _ => Ok(()),
            }
        }

        fn current_tick_id(&self) -> u64 {
            self.tick_id
        }

        fn snapshot_event(&self) -> StateEvent {
            state(self.tick_id)
        }
    }

    fn state(tick_id: u64) -> StateEvent {
        StateEvent {
            tick_id,
            game_time: GameTime::start(),
            agents: Vec::new(),
            metrics: None,
            events: None,
        }
    }

    fn join_frame(version: u32) -> Vec<u8> {
        format!(r#"{{"type":"join","protocolVersion":{}}}"#, version).into_bytes()
    }

    const PAUSE: &[u8] = br#"{"type":"control","action":"pause"}"#;

    fn connect(hub: &mut SyncHub) -> (u64, Arc<SpySink>) {
        let sink = Arc::new(SpySink::default());
        let id = hub.connect(sink.clone());
        (id, sink)
    }

    #[test]
    fn test_join_sends_ack_then_snapshot() {
        let mut hub = SyncHub::new();
        let mut sim = SpySim {
            tick_id: 42,
            ..SpySim::default()
        };
        let (id, sink) = connect(&mut hub);

        assert_eq!(hub.handle_frame(id, &join_frame(PROTOCOL_VERSION), &mut sim), FrameOutcome::Joined);
        assert_eq!(sink.types(), vec!["joinAck", "snapshot"]);
        let ack = sink.sent.lock()[0].clone();
        assert_eq!(ack["accepted"], true);
        assert_eq!(ack["tickId"], 42);
        assert_eq!(sink.last()["tickId"], 42);
        assert_eq!(
            hub.connection_state(id),
            Some(ConnectionState {
                joined: true,
                protocol_version: Some(PROTOCOL_VERSION)
            })
        );
    }

    #[test]
    fn test_full_queue_at_join_never_leaks_a_delta() {
        let mut hub = SyncHub::new();
        let mut sim = SpySim {
            tick_id: 1,
            ..SpySim::default()
        };
        let (id, sink) = connect(&mut hub);
        sink.backlog.store(2, Ordering::SeqCst);

        assert_eq!(hub.handle_frame(id, &join_frame(PROTOCOL_VERSION), &mut sim), FrameOutcome::SinkClosed);
        assert!(hub.connection_state(id).is_none());
        assert_eq!(hub.joined_count(), 0);
        assert_eq!(
            *sink.closed.lock(),
            Some((CLOSE_HANDSHAKE_BACKLOG, HANDSHAKE_BACKLOG_REASON.to_string()))
        );

        assert_eq!(hub.broadcast_delta(&state(2)), 0);
        assert!(sink.types().iter().all(|t| t != "delta"));
    }

    #[test]
    fn test_snapshot_refused_after_ack_does_not_join() {
        let mut hub = SyncHub::new();
        let mut sim = SpySim::default();
        let (id, sink) = connect(&mut hub);
        *sink.capacity.lock() = Some(1);

        assert_eq!(hub.handle_frame(id, &join_frame(PROTOCOL_VERSION), &mut sim), FrameOutcome::SinkClosed);
        assert_eq!(sink.types(), vec!["joinAck"]);
        assert_eq!(hub.stats().joins_accepted, 0);
        assert_eq!(hub.broadcast_delta(&state(1)), 0);
        assert_eq!(sink.types(), vec!["joinAck"]);
    }

    #[test]
    fn test_rejoin_is_idempotent() {
        let mut hub = SyncHub::new();
        let mut sim = SpySim::default();
        let (id, sink) = connect(&mut hub);
        hub.handle_frame(id, &join_frame(PROTOCOL_VERSION), &mut sim);
        hub.handle_frame(id, &join_frame(PROTOCOL_VERSION), &mut sim);
        assert_eq!(sink.types(), vec!["joinAck", "snapshot", "joinAck", "snapshot"]);
        assert_eq!(hub.joined_count(), 1);
    }

    #[test]
    fn test_version_mismatch_closes() {
        let mut hub = SyncHub::new();
        let mut sim = SpySim::default();
        let (id, sink) = connect(&mut hub);

        assert_eq!(hub.handle_frame(id, &join_frame(PROTOCOL_VERSION + 1), &mut sim), FrameOutcome::Rejected);
        assert_eq!(sink.types(), vec!["joinAck"]);
        let ack = sink.last();
        assert_eq!(ack["accepted"], false);
        assert!(ack["reason"].as_str().unwrap().contains("protocol mismatch"));
        assert_eq!(
            *sink.closed.lock(),
            Some((CLOSE_PROTOCOL_MISMATCH, "protocol mismatch".to_string()))
        );
        assert_eq!(hub.connection_count(), 0);

        // Gone from the broadcast set
        assert_eq!(hub.broadcast_delta(&state(1)), 0);
        assert_eq!(sink.types(), vec!["joinAck"]);
    }

    #[test]
    fn test_control_before_join_not_forwarded() {
        let mut hub = SyncHub::new();
        let mut sim = SpySim {
            tick_id: 7,
            ..SpySim::default()
        };
        let (id, sink) = connect(&mut hub);

        assert_eq!(
            hub.handle_frame(id, PAUSE, &mut sim),
            FrameOutcome::ControlAcked { accepted: false }
        );
        assert_eq!(sim.controls, 0);
        let ack = sink.last();
        assert_eq!(ack["type"], "controlAck");
        assert_eq!(ack["accepted"], false);
        assert_eq!(ack["reason"], "join required");
        assert_eq!(ack["tickId"], 7);
        assert_eq!(hub.connection_count(), 1);
    }

    #[test]
    fn test_control_after_join_mirrors_result() {
        let mut hub = SyncHub::new();
        let mut sim = SpySim::default();
        let (id, sink) = connect(&mut hub);
        hub.handle_frame(id, &join_frame(PROTOCOL_VERSION), &mut sim);

        assert_eq!(hub.handle_frame(id, PAUSE, &mut sim), FrameOutcome::ControlAcked { accepted: true });
        assert_eq!(sink.last()["accepted"], true);
        assert!(sink.last().get("reason").is_none());

        let speed = br#"{"type":"control","action":"setSpeed","value":3}"#;
        assert_eq!(hub.handle_frame(id, speed, &mut sim), FrameOutcome::ControlAcked { accepted: false });
        assert!(sink.last()["reason"].as_str().unwrap().contains("unsupported speed"));
        assert_eq!(sim.controls, 2);
    }

    #[test]
    fn test_malformed_frames_dropped_silently() {
        let mut hub = SyncHub::new();
        let mut sim = SpySim::default();
        let (id, sink) = connect(&mut hub);

        let frames: [&[u8]; 3] = [b"{", br#"{"type":"nope"}"#, br#"{"type":"control","action":"fly"}"#];
        for frame in frames {
            assert_eq!(hub.handle_frame(id, frame, &mut sim), FrameOutcome::Dropped);
        }
        assert!(sink.sent.lock().is_empty());
        assert_eq!(hub.stats().frames_dropped, 3);
        assert_eq!(hub.connection_count(), 1);
        assert_eq!(hub.handle_frame(99, PAUSE, &mut sim), FrameOutcome::UnknownConnection);
    }

    #[test]
    fn test_broadcast_only_to_joined() {
        let mut hub = SyncHub::new();
        let mut sim = SpySim::default();
        let (joined, joined_sink) = connect(&mut hub);
        let (_lurker, lurker_sink) = connect(&mut hub);
        hub.handle_frame(joined, &join_frame(PROTOCOL_VERSION), &mut sim);

        assert_eq!(hub.broadcast_delta(&state(1)), 1);
        assert_eq!(joined_sink.types(), vec!["joinAck", "snapshot", "delta"]);
        assert!(lurker_sink.sent.lock().is_empty());
    }

    #[test]
    fn test_broadcast_prunes_closed() {
        let mut hub = SyncHub::new();
        let mut sim = SpySim::default();
        let (a, sink_a) = connect(&mut hub);
        let (b, _sink_b) = connect(&mut hub);
        hub.handle_frame(a, &join_frame(PROTOCOL_VERSION), &mut sim);
        hub.handle_frame(b, &join_frame(PROTOCOL_VERSION), &mut sim);

        sink_a.shut.store(true, Ordering::SeqCst);
        assert_eq!(hub.broadcast_delta(&state(1)), 1);
        assert_eq!(hub.connection_count(), 1);
        assert!(hub.connection_state(a).is_none());
        assert!(hub.disconnect(b));
        assert!(!hub.disconnect(b));
    }

    #[test]
    fn test_orchestrator_as_control() {
        let mut hub = SyncHub::new();
        let mut sim = SimulationOrchestrator::new(OrchestratorConfig {
            agent_count: 2,
            ..OrchestratorConfig::default()
        });
        sim.tick(1);
        let (id, sink) = connect(&mut hub);
        hub.handle_frame(id, &join_frame(PROTOCOL_VERSION), &mut sim);
        assert_eq!(sink.last()["agents"].as_array().unwrap().len(), 2);

        hub.handle_frame(id, PAUSE, &mut sim);
        assert!(sim.is_paused());

        sim.tick(2);
        assert_eq!(hub.broadcast_delta(&sim.create_delta_event(2)), 1);
        assert_eq!(sink.last()["tickId"], 2);
    }
}
