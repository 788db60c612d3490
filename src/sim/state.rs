//! World state: agents and their projections
//!
//! Agents are owned by the orchestrator and stored in a `Vec` indexed by spawn
//! order. Every per-tick pass iterates that `Vec` in order so equal seeds give
//! equal worlds. Hash maps never drive iteration.

use std::collections::{BTreeMap, VecDeque};

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sim::decision::DecisionTrace;
use crate::sim::map::{LocationId, LocationKind, TilePos, TownMap};
use crate::sim::time::GameTime;
use crate::util::vec2::Vec2;

/// Unique agent identifier (derived from the seeded generator)
pub type AgentId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Idle,
    Walking,
    Conversing,
    Activity,
    Sleeping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Sleep,
    Eat,
    Work,
    Read,
    Relax,
    Shop,
    Socialize,
    /// Stand still in place
    Wait,
}

impl ActivityKind {
    pub const ALL: [ActivityKind; 8] = [
        ActivityKind::Sleep,
        ActivityKind::Eat,
        ActivityKind::Work,
        ActivityKind::Read,
        ActivityKind::Relax,
        ActivityKind::Shop,
        ActivityKind::Socialize,
        ActivityKind::Wait,
    ];

    /// Kind of place this activity happens at (`None` = anywhere)
    pub fn venue(&self) -> Option<LocationKind> {
        match self {
            ActivityKind::Sleep => Some(LocationKind::Home),
            ActivityKind::Eat => Some(LocationKind::Cafe),
            ActivityKind::Work => Some(LocationKind::Workshop),
            ActivityKind::Read => Some(LocationKind::Library),
            ActivityKind::Relax => Some(LocationKind::Park),
            ActivityKind::Shop => Some(LocationKind::Market),
            ActivityKind::Socialize => Some(LocationKind::Plaza),
            ActivityKind::Wait => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Sleep => "sleep",
            ActivityKind::Eat => "eat",
            ActivityKind::Work => "work",
            ActivityKind::Read => "read",
            ActivityKind::Relax => "relax",
            ActivityKind::Shop => "shop",
            ActivityKind::Socialize => "socialize",
            ActivityKind::Wait => "wait",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

/// Where the agent is heading and what it will do there
#[derive(Debug, Clone, PartialEq)]
pub struct Goal {
    pub kind: ActivityKind,
    pub location: LocationId,
    pub duration_minutes: u32,
}

/// Activity in progress
#[derive(Debug, Clone, PartialEq)]
pub struct Activity {
    pub kind: ActivityKind,
    pub location: Option<LocationId>,
    pub remaining_minutes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Personality {
    pub sociability: f32,
    pub diligence: f32,
    pub curiosity: f32,
}

impl Personality {
    fn random(rng: &mut StdRng) -> Self {
        Self {
            sociability: rng.gen_range(0.1..1.0),
            diligence: rng.gen_range(0.1..1.0),
            curiosity: rng.gen_range(0.1..1.0),
        }
    }
}

/// Simulated townsperson
///
/// Fields are grouped by how often the tick loop touches them.
#[derive(Debug, Clone)]
pub struct Agent {
    // === HOT (every running tick) ===
    pub position: Vec2,
    pub tile: TilePos,
    pub state: AgentState,
    pub path: VecDeque<TilePos>,
    pub energy: f32,
    pub hunger: f32,
    pub mood: f32,

    // === WARM (on decisions and arrivals) ===
    pub goal: Option<Goal>,
    pub activity: Option<Activity>,
    pub plan: Vec<String>,
    /// Id of the conversation the agent is part of
    pub conversation: Option<u64>,
    /// Outstanding decision request id
    pub pending_request: Option<u64>,
    /// Simulated minute of the last conversation turn
    pub last_social_minute: Option<u64>,

    // === COLD ===
    pub id: AgentId,
    pub name: String,
    pub home: LocationId,
    pub personality: Personality,
    /// Affinity toward other agents by index, in [-1, 1]
    pub relationships: BTreeMap<usize, f32>,
    pub topics: Vec<String>,
    pub last_reflection: Option<String>,
    pub decision_trace: Option<DecisionTrace>,
}

impl Agent {
    pub fn is_free(&self) -> bool {
        self.state == AgentState::Idle && self.pending_request.is_none()
    }

    pub fn relationship(&self, other: usize) -> f32 {
        self.relationships.get(&other).copied().unwrap_or(0.0)
    }

    pub fn shift_relationship(&mut self, other: usize, delta: f32) -> f32 {
        let entry = self.relationships.entry(other).or_insert(0.0);
        *entry = (*entry + delta).clamp(-1.0, 1.0);
        *entry
    }

    /// Place the agent on a tile, snapping its continuous position
    pub fn place(&mut self, tile: TilePos) {
        self.tile = tile;
        self.position = tile.center();
    }

    pub fn action_label(&self, map: &TownMap) -> Option<String> {
        self.activity.as_ref().map(|a| match a.location.and_then(|l| map.location(l)) {
            Some(loc) => format!("{} at {}", a.kind.as_str(), loc.name),
            None => a.kind.as_str().to_string(),
        })
    }

    pub fn goal_label(&self, map: &TownMap) -> Option<String> {
        self.goal.as_ref().map(|g| match map.location(g.location) {
            Some(loc) => format!("{} at {}", g.kind.as_str(), loc.name),
            None => g.kind.as_str().to_string(),
        })
    }
}

/// Wire projection of an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentData {
    pub id: AgentId,
    pub name: String,
    pub position: Vec2,
    pub tile_position: TilePos,
    pub state: AgentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<TilePos>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    pub energy: f32,
    pub hunger: f32,
    pub mood: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reflection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_trace: Option<DecisionTrace>,
}

/// Exact comparison key for determinism checks
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AgentFingerprint {
    pub position: (u32, u32),
    pub tile: TilePos,
    pub state: AgentState,
    pub goal: Option<String>,
    pub plan: Vec<String>,
    pub action: Option<String>,
    pub energy: u32,
    pub hunger: u32,
    pub mood: u32,
}

const NAMES: [&str; 16] = [
    "Ada", "Bram", "Cleo", "Dov", "Edda", "Finn", "Greta", "Hal", "Iris", "Jonas", "Kaya", "Lev",
    "Mira", "Nils", "Ona", "Piet",
];

/// All mutable simulation state
#[derive(Debug, Clone)]
pub struct WorldState {
    pub map: TownMap,
    pub agents: Vec<Agent>,
    /// Sum of simulated minutes over all running ticks
    pub total_minutes: u64,
}

impl WorldState {
    /// Spawn `agent_count` agents at their homes. All randomness comes from `rng`.
    pub fn spawn(map: TownMap, agent_count: usize, rng: &mut StdRng) -> Self {
        let homes: Vec<LocationId> = map.homes().map(|h| h.id).collect();
        let mut agents = Vec::with_capacity(agent_count);

        for i in 0..agent_count {
            let base = NAMES[i % NAMES.len()];
            let name = if i < NAMES.len() {
                base.to_string()
            } else {
                format!("{} {}", base, i / NAMES.len() + 1)
            };
            let id = uuid::Builder::from_random_bytes(rng.gen()).into_uuid();
            let home = homes.get(i % homes.len().max(1)).copied().unwrap_or(0);
            let tile = match map.location(home) {
                Some(loc) => map.random_tile_in(loc, rng),
                None => TilePos::new(0, 0),
            };
            let personality = Personality::random(rng);

            agents.push(Agent {
                position: tile.center(),
                tile,
                state: AgentState::Idle,
                path: VecDeque::new(),
                energy: rng.gen_range(0.7..1.0),
                hunger: rng.gen_range(0.1..0.4),
                mood: rng.gen_range(0.5..0.8),
                goal: None,
                activity: None,
                plan: Vec::new(),
                conversation: None,
                pending_request: None,
                last_social_minute: None,
                id,
                name,
                home,
                personality,
                relationships: BTreeMap::new(),
                topics: Vec::new(),
                last_reflection: None,
                decision_trace: None,
            });
        }

        Self {
            map,
            agents,
            total_minutes: 0,
        }
    }

    pub fn game_time(&self) -> GameTime {
        GameTime::from_total_minutes(self.total_minutes)
    }

    /// "closest: Bram (+0.35)"
    fn relationship_summary(&self, agent: &Agent) -> Option<String> {
        let (other, value) = agent
            .relationships
            .iter()
            .filter(|(_, v)| v.abs() > f32::EPSILON)
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()).then(b.0.cmp(a.0)))?;
        let name = self.agents.get(*other).map(|a| a.name.as_str()).unwrap_or("someone");
        let label = if *value >= 0.0 { "closest" } else { "at odds with" };
        Some(format!("{}: {} ({:+.2})", label, name, value))
    }

    pub fn agent_data(&self, index: usize) -> Option<AgentData> {
        let agent = self.agents.get(index)?;
        Some(AgentData {
            id: agent.id,
            name: agent.name.clone(),
            position: agent.position,
            tile_position: agent.tile,
            state: agent.state,
            path: if agent.path.is_empty() {
                None
            } else {
                Some(agent.path.iter().copied().collect())
            },
            goal: agent.goal_label(&self.map),
            plan: if agent.plan.is_empty() {
                None
            } else {
                Some(agent.plan.clone())
            },
            action: agent.action_label(&self.map),
            energy: agent.energy,
            hunger: agent.hunger,
            mood: agent.mood,
            last_reflection: agent.last_reflection.clone(),
            relationship_summary: self.relationship_summary(agent),
            decision_trace: agent.decision_trace.clone(),
        })
    }

    pub fn all_agent_data(&self) -> Vec<AgentData> {
        (0..self.agents.len()).filter_map(|i| self.agent_data(i)).collect()
    }

    pub fn fingerprints(&self) -> Vec<AgentFingerprint> {
        self.agents
            .iter()
            .map(|a| AgentFingerprint {
                position: a.position.to_bits(),
                tile: a.tile,
                state: a.state,
                goal: a.goal_label(&self.map),
                plan: a.plan.clone(),
                action: a.action_label(&self.map),
                energy: a.energy.to_bits(),
                hunger: a.hunger.to_bits(),
                mood: a.mood.to_bits(),
            })
            .collect()
    }

    /// Rough heap footprint of the world, in bytes
    pub fn estimated_heap_bytes(&self) -> usize {
        use std::mem::size_of;
        let mut total = self.agents.capacity() * size_of::<Agent>();
        for a in &self.agents {
            total += a.path.capacity() * size_of::<TilePos>();
            total += a.plan.iter().map(|s| s.capacity() + size_of::<String>()).sum::<usize>();
            total += a.topics.iter().map(|s| s.capacity() + size_of::<String>()).sum::<usize>();
            // BTreeMap node overhead per entry
            total += a.relationships.len() * (size_of::<usize>() + size_of::<f32>() + 16);
            total += a.name.capacity();
        }
        total += (self.map.width() * self.map.height()) as usize / 8;
        total += self.map.locations().len() * size_of::<crate::sim::map::Location>();
        total
    }
}
