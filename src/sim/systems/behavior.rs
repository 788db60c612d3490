use rand::rngs::StdRng;
use rand::Rng;

use crate::sim::constants::activity::{FALLBACK_WAIT, MAX_DURATION, MEAL, MIN_DURATION};
use crate::sim::constants::needs::{HUNGRY_THRESHOLD, RESTED_THRESHOLD, TIRED_THRESHOLD};
use crate::sim::constants::time::{MINUTES_PER_DAY, MORNING_HOUR};
use crate::sim::decision::ValidDecision;
use crate::sim::map::{LocationId, LocationKind, TilePos, TownMap};
use crate::sim::state::{Activity, ActivityKind, Agent, AgentState, Goal};
use crate::sim::time::GameTime;

/// Local decision policy used when the reasoning service is disabled
///
/// Sleep at night or when exhausted, eat when hungry, otherwise pick a
/// weighted leisure or work activity from the agent's personality.
pub fn choose_local(agent: &Agent, map: &TownMap, time: GameTime, rng: &mut StdRng) -> ValidDecision {
    if time.is_night() || agent.energy < TIRED_THRESHOLD {
        let duration = if time.is_night() {
            minutes_until_morning(time)
        } else {
            90
        };
        return decision(ActivityKind::Sleep, Some(agent.home), duration, "head home", "sleep");
    }

    if agent.hunger > HUNGRY_THRESHOLD {
        let cafe = map.first_of_kind(LocationKind::Cafe).map(|l| l.id);
        return decision(ActivityKind::Eat, cafe, MEAL, "walk to the cafe", "eat");
    }

    let working_hours = (9..17).contains(&time.hour);
    let p = agent.personality;
    let weights = [
        (ActivityKind::Work, p.diligence as f64 * if working_hours { 1.5 } else { 0.3 }),
        (ActivityKind::Read, p.curiosity as f64),
        (ActivityKind::Relax, 0.5),
        (ActivityKind::Shop, 0.3),
        (ActivityKind::Socialize, p.sociability as f64),
        (ActivityKind::Wait, 0.1),
    ];
    let total: f64 = weights.iter().map(|(_, w)| w).sum();
    let mut roll = rng.gen::<f64>() * total;
    let mut kind = ActivityKind::Wait;
    for (k, w) in weights {
        if roll < w {
            kind = k;
            break;
        }
        roll -= w;
    }

    let duration = match kind {
        ActivityKind::Work => rng.gen_range(60..=120),
        ActivityKind::Wait => FALLBACK_WAIT,
        _ => rng.gen_range(20..=90),
    };
    let location = kind.venue().and_then(|v| map.first_of_kind(v)).map(|l| l.id);
    let travel = match location.and_then(|id| map.location(id)) {
        Some(loc) => format!("walk to {}", loc.name),
        None => "stay put".to_string(),
    };
    decision(kind, location, duration, &travel, kind.as_str())
}

fn decision(
    kind: ActivityKind,
    location: Option<LocationId>,
    duration: u32,
    first: &str,
    second: &str,
) -> ValidDecision {
    ValidDecision {
        kind,
        location,
        duration_minutes: duration.clamp(MIN_DURATION, MAX_DURATION),
        plan: vec![first.to_string(), second.to_string()],
        reflection: None,
    }
}

fn minutes_until_morning(time: GameTime) -> u32 {
    let now = time.minute_of_day() as u64;
    let morning = MORNING_HOUR as u64 * 60;
    let until = if now < morning {
        morning - now
    } else {
        MINUTES_PER_DAY - now + morning
    };
    until as u32
}

/// Commit an agent to a decision.
///
/// Returns the tile to route to when the activity happens elsewhere; otherwise
/// the activity starts in place.
pub fn begin(agent: &mut Agent, decision: ValidDecision, map: &TownMap, rng: &mut StdRng) -> Option<TilePos> {
    agent.plan = decision.plan;
    if decision.reflection.is_some() {
        agent.last_reflection = decision.reflection;
    }

    match decision.location.and_then(|id| map.location(id)) {
        Some(loc) if !loc.contains(agent.tile) => {
            let target = map.random_tile_in(loc, rng);
            agent.activity = None;
            agent.goal = Some(Goal {
                kind: decision.kind,
                location: loc.id,
                duration_minutes: decision.duration_minutes,
            });
            Some(target)
        }
        _ => {
            start_activity(agent, decision.kind, decision.location, decision.duration_minutes);
            None
        }
    }
}

pub fn start_activity(agent: &mut Agent, kind: ActivityKind, location: Option<LocationId>, minutes: u32) {
    agent.goal = None;
    agent.path.clear();
    agent.activity = Some(Activity {
        kind,
        location,
        remaining_minutes: minutes,
    });
    agent.state = if kind == ActivityKind::Sleep {
        AgentState::Sleeping
    } else {
        AgentState::Activity
    };
}

/// Safe default when no usable decision exists
pub fn fallback(agent: &mut Agent) {
    agent.plan = vec!["wait".to_string()];
    start_activity(agent, ActivityKind::Wait, None, FALLBACK_WAIT);
}

/// Count down the current activity. Returns true if it finished this tick.
pub fn advance_activity(agent: &mut Agent, minutes: u32, time: GameTime) -> bool {
    let Some(activity) = agent.activity.as_mut() else {
        if matches!(agent.state, AgentState::Activity | AgentState::Sleeping) {
            agent.state = AgentState::Idle;
        }
        return false;
    };
    activity.remaining_minutes = activity.remaining_minutes.saturating_sub(minutes);

    let rested = agent.state == AgentState::Sleeping && agent.energy >= RESTED_THRESHOLD && !time.is_night();
    if activity.remaining_minutes == 0 || rested {
        agent.activity = None;
        agent.plan.clear();
        agent.state = AgentState::Idle;
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::state::WorldState;
    use rand::SeedableRng;

    fn setup() -> (WorldState, StdRng) {
        let mut rng = StdRng::seed_from_u64(11);
        let w = WorldState::spawn(TownMap::standard(), 2, &mut rng);
        (w, rng)
    }

    #[test]
    fn test_sleeps_at_night() {
        let (w, mut rng) = setup();
        // 08:00 + 15h = 23:00
        let night = GameTime::from_total_minutes(15 * 60);
        let d = choose_local(&w.agents[0], &w.map, night, &mut rng);
        assert_eq!(d.kind, ActivityKind::Sleep);
        assert_eq!(d.location, Some(w.agents[0].home));
        // 23:00 -> 06:00
        assert_eq!(d.duration_minutes, MAX_DURATION.min(7 * 60));
    }

    #[test]
    fn test_eats_when_hungry() {
        let (mut w, mut rng) = setup();
        w.agents[0].hunger = 0.9;
        w.agents[0].energy = 0.9;
        let d = choose_local(&w.agents[0], &w.map, GameTime::start(), &mut rng);
        assert_eq!(d.kind, ActivityKind::Eat);
        assert_eq!(w.map.location(d.location.unwrap()).unwrap().kind, LocationKind::Cafe);
    }

    #[test]
    fn test_daytime_choice_is_valid() {
        let (mut w, mut rng) = setup();
        w.agents[0].hunger = 0.1;
        w.agents[0].energy = 0.9;
        for _ in 0..50 {
            let d = choose_local(&w.agents[0], &w.map, GameTime::start(), &mut rng);
            assert_ne!(d.kind, ActivityKind::Sleep);
            assert!((MIN_DURATION..=MAX_DURATION).contains(&d.duration_minutes));
            assert_eq!(d.location.is_none(), d.kind == ActivityKind::Wait);
        }
    }

    #[test]
    fn test_begin_routes_or_starts() {
        let (mut w, mut rng) = setup();
        let cafe = w.map.first_of_kind(LocationKind::Cafe).unwrap().id;
        let d = decision(ActivityKind::Eat, Some(cafe), 30, "go", "eat");
        let target = begin(&mut w.agents[0], d, &w.map, &mut rng).unwrap();
        assert!(w.map.location(cafe).unwrap().contains(target));
        assert!(w.agents[0].goal.is_some());

        let home = w.agents[1].home;
        let d = decision(ActivityKind::Sleep, Some(home), 60, "stay", "sleep");
        assert!(begin(&mut w.agents[1], d, &w.map, &mut rng).is_none());
        assert_eq!(w.agents[1].state, AgentState::Sleeping);
    }

    #[test]
    fn test_activity_countdown() {
        let (mut w, _) = setup();
        let a = &mut w.agents[0];
        start_activity(a, ActivityKind::Read, None, 10);
        assert!(!advance_activity(a, 5, GameTime::start()));
        assert!(advance_activity(a, 5, GameTime::start()));
        assert_eq!(a.state, AgentState::Idle);
        assert!(a.activity.is_none());
    }

    #[test]
    fn test_rested_sleeper_wakes_in_daytime() {
        let (mut w, _) = setup();
        let a = &mut w.agents[0];
        start_activity(a, ActivityKind::Sleep, None, 200);
        a.energy = 1.0;
        assert!(advance_activity(a, 1, GameTime::start()));
    }

    #[test]
    fn test_fallback_is_wait() {
        let (mut w, _) = setup();
        let a = &mut w.agents[0];
        fallback(a);
        assert_eq!(a.state, AgentState::Activity);
        assert_eq!(a.activity.as_ref().unwrap().kind, ActivityKind::Wait);
        assert_eq!(a.activity.as_ref().unwrap().remaining_minutes, FALLBACK_WAIT);
    }
}
