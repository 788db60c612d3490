use crate::sim::constants::needs::*;
use crate::sim::state::{ActivityKind, Agent, AgentState};

/// Minutes after a conversation during which mood gets a social lift
const SOCIAL_AFTERGLOW_MINUTES: u64 = 120;

/// Advance hunger, energy and mood by `minutes` of simulated time
pub fn update(agent: &mut Agent, minutes: u32, now_minute: u64) {
    let m = minutes as f32;
    let activity = agent.activity.as_ref().map(|a| a.kind);

    agent.hunger += HUNGER_PER_MINUTE * m;
    if activity == Some(ActivityKind::Eat) {
        agent.hunger -= EAT_RECOVERY_PER_MINUTE * m;
    }

    if agent.state == AgentState::Sleeping {
        agent.energy += SLEEP_RECOVERY_PER_MINUTE * m;
    } else {
        let drain = match activity {
            Some(ActivityKind::Work) => ENERGY_DRAIN_PER_MINUTE * 1.5,
            Some(ActivityKind::Relax) | Some(ActivityKind::Wait) => ENERGY_DRAIN_PER_MINUTE * 0.5,
            _ => ENERGY_DRAIN_PER_MINUTE,
        };
        agent.energy -= drain * m;
    }

    agent.hunger = agent.hunger.clamp(0.0, 1.0);
    agent.energy = agent.energy.clamp(0.0, 1.0);

    let social = match agent.last_social_minute {
        Some(t) if now_minute.saturating_sub(t) <= SOCIAL_AFTERGLOW_MINUTES => 0.15,
        _ => 0.0,
    };
    let target = (0.45 + 0.3 * agent.energy - 0.4 * agent.hunger + social).clamp(0.0, 1.0);
    let blend = (MOOD_DRIFT_PER_MINUTE * m).min(1.0);
    agent.mood = (agent.mood + (target - agent.mood) * blend).clamp(0.0, 1.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::map::TownMap;
    use crate::sim::state::{Activity, WorldState};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn agent() -> Agent {
        let mut rng = StdRng::seed_from_u64(1);
        let mut w = WorldState::spawn(TownMap::standard(), 1, &mut rng);
        let mut a = w.agents.remove(0);
        a.energy = 0.5;
        a.hunger = 0.5;
        a.mood = 0.5;
        a
    }

    #[test]
    fn test_awake_drains_energy_and_raises_hunger() {
        let mut a = agent();
        update(&mut a, 60, 60);
        assert!(a.energy < 0.5);
        assert!(a.hunger > 0.5);
    }

    #[test]
    fn test_sleep_restores_energy() {
        let mut a = agent();
        a.state = AgentState::Sleeping;
        update(&mut a, 60, 60);
        assert!(a.energy > 0.5);
    }

    #[test]
    fn test_eating_reduces_hunger() {
        let mut a = agent();
        a.state = AgentState::Activity;
        a.activity = Some(Activity {
            kind: ActivityKind::Eat,
            location: None,
            remaining_minutes: 30,
        });
        update(&mut a, 10, 10);
        assert!(a.hunger < 0.5);
    }

    #[test]
    fn test_values_stay_in_range() {
        let mut a = agent();
        for _ in 0..100 {
            update(&mut a, 240, 0);
        }
        assert!((0.0..=1.0).contains(&a.hunger));
        assert!((0.0..=1.0).contains(&a.energy));
        assert!((0.0..=1.0).contains(&a.mood));
        assert_eq!(a.hunger, 1.0);
        assert_eq!(a.energy, 0.0);
    }

    #[test]
    fn test_zero_minutes_is_noop() {
        let mut a = agent();
        let before = (a.energy, a.hunger, a.mood);
        update(&mut a, 0, 0);
        assert_eq!(before, (a.energy, a.hunger, a.mood));
    }
}
