//! Agent-to-agent conversations
//!
//! Agents sharing a location may strike up a conversation. Each running tick
//! adds one turn to every active conversation; when a conversation reaches its
//! length it ends, shifts both relationships toward its average tone and
//! spreads its topic to the listener.

use rand::rngs::StdRng;
use rand::Rng;

use crate::sim::constants::conversation::{
    BUBBLE_TICKS, MAX_TURNS, MIN_TURNS, RELATIONSHIP_SHIFT, START_CHANCE,
};
use crate::sim::conversation::{evaluate_conversation, ConversationQuality, ConversationTurn};
use crate::sim::events::DomainEvent;
use crate::sim::map::{LocationId, TownMap};
use crate::sim::state::{ActivityKind, Agent, AgentState};

const TOPICS: [&str; 7] = [
    "the weather",
    "market prices",
    "a book from the library",
    "the new workshop tools",
    "the ducks on the pond",
    "last night's dinner",
    "the plaza festival",
];

/// Max tile distance between two agents starting a conversation
const START_RANGE: u32 = 3;

#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: u64,
    pub participants: [usize; 2],
    pub topic: String,
    pub location: Option<LocationId>,
    pub turns: Vec<ConversationTurn>,
    pub max_turns: u32,
}

#[derive(Debug, Default)]
pub struct ConversationSystem {
    active: Vec<Conversation>,
    next_id: u64,
    completed: u64,
    last_quality: Option<ConversationQuality>,
}

impl ConversationSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> &[Conversation] {
        &self.active
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn last_quality(&self) -> Option<ConversationQuality> {
        self.last_quality
    }

    pub fn update(
        &mut self,
        agents: &mut [Agent],
        map: &TownMap,
        now_minute: u64,
        rng: &mut StdRng,
        events: &mut Vec<DomainEvent>,
    ) {
        self.advance(agents, now_minute, rng, events);
        self.start_new(agents, map, rng, events);
    }

    fn advance(&mut self, agents: &mut [Agent], now_minute: u64, rng: &mut StdRng, events: &mut Vec<DomainEvent>) {
        let mut finished = Vec::new();
        for (slot, convo) in self.active.iter_mut().enumerate() {
            let speaker = convo.participants[convo.turns.len() % 2];
            let listener = convo.participants[(convo.turns.len() + 1) % 2];
            let relationship = agents[speaker].relationship(listener);
            let mood = agents[speaker].mood;
            let sentiment =
                (relationship * 0.6 + (mood - 0.5) * 0.8 + rng.gen_range(-0.3f32..0.3)).clamp(-1.0, 1.0);
            let text = line(&convo.topic, sentiment, rng);

            events.push(DomainEvent::ConversationTurn {
                conversation_id: convo.id,
                speaker: agents[speaker].id,
                listener: agents[listener].id,
                text: text.clone(),
                sentiment,
            });
            events.push(DomainEvent::SpeechBubble {
                agent: agents[speaker].id,
                text: text.clone(),
                duration_ticks: BUBBLE_TICKS,
            });
            agents[speaker].last_social_minute = Some(now_minute);
            agents[listener].last_social_minute = Some(now_minute);

            convo.turns.push(ConversationTurn {
                speaker,
                listener,
                text,
                sentiment,
                relationship,
            });
            if convo.turns.len() as u32 >= convo.max_turns {
                finished.push(slot);
            }
        }

        for slot in finished.into_iter().rev() {
            let convo = self.active.remove(slot);
            self.finish(convo, agents, events);
        }
    }

    fn finish(&mut self, convo: Conversation, agents: &mut [Agent], events: &mut Vec<DomainEvent>) {
        let quality = evaluate_conversation(&convo.turns);
        let avg = convo.turns.iter().map(|t| t.sentiment).sum::<f32>() / convo.turns.len().max(1) as f32;
        let delta = if avg > 0.0 {
            RELATIONSHIP_SHIFT
        } else if avg < 0.0 {
            -RELATIONSHIP_SHIFT
        } else {
            0.0
        };

        let [a, b] = convo.participants;
        for (from, to) in [(a, b), (b, a)] {
            let value = agents[from].shift_relationship(to, delta);
            events.push(DomainEvent::RelationshipShift {
                from: agents[from].id,
                to: agents[to].id,
                delta,
                value,
            });
        }

        if !agents[a].topics.contains(&convo.topic) {
            agents[a].topics.push(convo.topic.clone());
        }
        if !agents[b].topics.contains(&convo.topic) {
            agents[b].topics.push(convo.topic.clone());
            events.push(DomainEvent::TopicSpread {
                from: agents[a].id,
                to: agents[b].id,
                topic: convo.topic.clone(),
            });
        }

        for idx in [a, b] {
            let agent = &mut agents[idx];
            agent.conversation = None;
            agent.state = match agent.activity.as_ref().map(|act| act.kind) {
                Some(ActivityKind::Sleep) => AgentState::Sleeping,
                Some(_) => AgentState::Activity,
                None => AgentState::Idle,
            };
        }

        events.push(DomainEvent::ConversationEnd {
            conversation_id: convo.id,
            participants: vec![agents[a].id, agents[b].id],
            quality,
        });
        self.completed += 1;
        self.last_quality = Some(quality);
    }

    fn start_new(&mut self, agents: &mut [Agent], map: &TownMap, rng: &mut StdRng, events: &mut Vec<DomainEvent>) {
        let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); map.locations().len()];
        for (i, agent) in agents.iter().enumerate() {
            if !is_available(agent) {
                continue;
            }
            if let Some(loc) = map.location_at(agent.tile) {
                buckets[loc.id].push(i);
            }
        }

        for (location, members) in buckets.iter().enumerate() {
            if members.len() < 2 {
                continue;
            }
            let mut taken = vec![false; members.len()];
            for m in 0..members.len() {
                if taken[m] {
                    continue;
                }
                let i = members[m];
                let chance = (START_CHANCE * agents[i].personality.sociability as f64).clamp(0.0, 1.0);
                if !rng.gen_bool(chance) {
                    continue;
                }
                let partner = (m + 1..members.len())
                    .find(|&n| !taken[n] && agents[members[n]].tile.manhattan(agents[i].tile) <= START_RANGE);
                let Some(n) = partner else {
                    continue;
                };
                taken[m] = true;
                taken[n] = true;
                let j = members[n];

                let topic = if agents[i].topics.is_empty() {
                    TOPICS[rng.gen_range(0..TOPICS.len())].to_string()
                } else {
                    agents[i].topics[rng.gen_range(0..agents[i].topics.len())].clone()
                };
                let id = self.next_id;
                self.next_id += 1;

                for idx in [i, j] {
                    agents[idx].conversation = Some(id);
                    agents[idx].state = AgentState::Conversing;
                }
                events.push(DomainEvent::ConversationStart {
                    conversation_id: id,
                    participants: vec![agents[i].id, agents[j].id],
                    topic: topic.clone(),
                    location: map.location(location).map(|l| l.name.clone()),
                });
                self.active.push(Conversation {
                    id,
                    participants: [i, j],
                    topic,
                    location: Some(location),
                    turns: Vec::new(),
                    max_turns: rng.gen_range(MIN_TURNS..=MAX_TURNS),
                });
            }
        }
    }
}

/// Agents doing something interruptible and not already talking
fn is_available(agent: &Agent) -> bool {
    if agent.conversation.is_some() || agent.pending_request.is_some() {
        return false;
    }
    match agent.state {
        AgentState::Idle => true,
        AgentState::Activity => !matches!(
            agent.activity.as_ref().map(|a| a.kind),
            Some(ActivityKind::Work) | Some(ActivityKind::Sleep)
        ),
        _ => false,
    }
}

fn line(topic: &str, sentiment: f32, rng: &mut StdRng) -> String {
    let templates: &[&str] = if sentiment > 0.25 {
        &[
            "I really enjoyed {}!",
            "Have you seen {}? Lovely.",
            "Always good to talk about {} with you.",
        ]
    } else if sentiment < -0.25 {
        &[
            "Honestly, {} gets on my nerves.",
            "I'd rather not dwell on {}.",
            "Not {} again...",
        ]
    } else {
        &[
            "What do you think about {}?",
            "I heard something about {}.",
            "Hm, {}.",
        ]
    };
    templates[rng.gen_range(0..templates.len())].replace("{}", topic)
}
