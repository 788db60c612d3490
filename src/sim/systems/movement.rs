use crate::sim::state::{Agent, AgentState};

/// Walk up to `tiles` steps along the agent's path. Returns true on arrival.
pub fn step(agent: &mut Agent, tiles: u32) -> bool {
    if agent.state != AgentState::Walking {
        return false;
    }
    for _ in 0..tiles {
        match agent.path.pop_front() {
            Some(next) => agent.place(next),
            None => break,
        }
    }
    if agent.path.is_empty() {
        agent.state = AgentState::Idle;
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::map::{TilePos, TownMap};
    use crate::sim::state::WorldState;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn walker(path: &[TilePos]) -> Agent {
        let mut rng = StdRng::seed_from_u64(1);
        let mut w = WorldState::spawn(TownMap::standard(), 1, &mut rng);
        let mut a = w.agents.remove(0);
        a.state = AgentState::Walking;
        a.path = path.iter().copied().collect();
        a
    }

    #[test]
    fn test_steps_along_path() {
        let path = [TilePos::new(1, 4), TilePos::new(1, 5), TilePos::new(2, 5)];
        let mut a = walker(&path);

        assert!(!step(&mut a, 1));
        assert_eq!(a.tile, TilePos::new(1, 4));
        assert_eq!(a.position, TilePos::new(1, 4).center());

        assert!(step(&mut a, 4));
        assert_eq!(a.tile, TilePos::new(2, 5));
        assert_eq!(a.state, AgentState::Idle);
    }

    #[test]
    fn test_not_walking_is_noop() {
        let mut a = walker(&[TilePos::new(1, 4)]);
        a.state = AgentState::Activity;
        let before = a.tile;
        assert!(!step(&mut a, 1));
        assert_eq!(a.tile, before);
    }
}
