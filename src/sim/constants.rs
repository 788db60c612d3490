/// Simulation clock constants
pub mod time {
    /// Minutes in one in-game day
    pub const MINUTES_PER_DAY: u64 = 1440;
    /// Default in-game minutes advanced by one tick at 1x speed
    pub const DEFAULT_MINUTES_PER_TICK: u32 = 1;
    /// The clock reads 08:00 on day 1 before the first tick
    pub const START_MINUTE_OF_DAY: u64 = 8 * 60;
    /// Hour at which agents head home to sleep
    pub const NIGHT_START_HOUR: u8 = 22;
    /// Hour at which sleeping agents may wake
    pub const MORNING_HOUR: u8 = 6;
}

/// Tick scheduling defaults
pub mod tick {
    /// Wall-clock milliseconds per tick
    pub const DEFAULT_INTERVAL_MS: u64 = 200;
    /// Maximum ticks processed for one elapsed-time sample
    pub const DEFAULT_MAX_CATCH_UP: u32 = 5;
    /// Rolling window of tick duration samples used for percentiles
    pub const DURATION_SAMPLE_WINDOW: usize = 600;
}

/// Operator speed controls
pub mod speed {
    /// Speed multipliers accepted by `setSpeed`
    pub const SUPPORTED: [u32; 4] = [1, 2, 4, 10];
    pub const DEFAULT: u32 = 1;

    #[inline]
    pub fn is_supported(multiplier: u32) -> bool {
        SUPPORTED.contains(&multiplier)
    }
}

/// Town layout constants
pub mod map {
    /// Map width in tiles
    pub const WIDTH: i32 = 40;
    /// Map height in tiles
    pub const HEIGHT: i32 = 30;
    /// Pixels per tile edge
    pub const TILE_SIZE: f32 = 32.0;
}

/// Agent needs. Hunger rises toward 1.0, energy drains toward 0.0.
pub mod needs {
    pub const HUNGER_PER_MINUTE: f32 = 0.0012;
    pub const ENERGY_DRAIN_PER_MINUTE: f32 = 0.0008;
    pub const SLEEP_RECOVERY_PER_MINUTE: f32 = 0.0025;
    pub const EAT_RECOVERY_PER_MINUTE: f32 = 0.02;
    /// Above this an idle agent goes to eat
    pub const HUNGRY_THRESHOLD: f32 = 0.6;
    /// Below this an idle agent goes home to sleep
    pub const TIRED_THRESHOLD: f32 = 0.25;
    /// Sleeping agents wake once energy reaches this level in the daytime
    pub const RESTED_THRESHOLD: f32 = 0.95;
    /// Mood drifts toward the needs-derived target by this fraction per minute
    pub const MOOD_DRIFT_PER_MINUTE: f32 = 0.01;
}

/// Movement constants
pub mod movement {
    /// Tiles walked per tick at 1x speed
    pub const TILES_PER_TICK: u32 = 1;
}

/// Agent activity durations (in-game minutes)
pub mod activity {
    pub const MIN_DURATION: u32 = 5;
    pub const MAX_DURATION: u32 = 240;
    pub const MEAL: u32 = 30;
    /// Fixed fallback action when a decision is missing, overdue, or invalid
    pub const FALLBACK_WAIT: u32 = 15;
}

/// Asynchronous decision queue
pub mod decision {
    /// Maximum pending (waiting + in-flight) requests
    pub const DEFAULT_QUEUE_CAPACITY: usize = 32;
    /// Maximum requests dispatched to the decision service at once
    pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;
    /// Requests older than this many running ticks are abandoned
    pub const DEFAULT_OVERDUE_TICKS: u64 = 50;
    /// Wall-clock timeout applied to each provider call
    pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;
    /// Depth ratio at which backpressure becomes elevated
    pub const LOW_WATER_RATIO: f64 = 0.5;
    /// Depth ratio at which backpressure becomes critical
    pub const HIGH_WATER_RATIO: f64 = 0.85;
    /// Consecutive ticks with drops that count as sustained
    pub const SUSTAINED_DROP_TICKS: u32 = 3;
}

/// Conversation system
pub mod conversation {
    /// Base chance per tick that two co-located agents start talking
    pub const START_CHANCE: f64 = 0.08;
    pub const MIN_TURNS: u32 = 2;
    pub const MAX_TURNS: u32 = 6;
    /// Relationship change applied when a conversation ends
    pub const RELATIONSHIP_SHIFT: f32 = 0.05;
    /// |relationship| below this counts as neutral
    pub const NEUTRAL_BAND: f32 = 0.1;
    /// Ticks a speech bubble stays visible
    pub const BUBBLE_TICKS: u32 = 3;
}

/// Wire protocol constants
pub mod net {
    /// Maximum inbound frame size
    pub const MAX_MESSAGE_SIZE: usize = 65536;
    /// Maximum outbound frame size (snapshots of large towns)
    pub const MAX_OUTBOUND_SIZE: usize = 8 * 1024 * 1024;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_speeds() {
        for s in [1, 2, 4, 10] {
            assert!(speed::is_supported(s));
        }
        assert!(!speed::is_supported(3));
        assert!(!speed::is_supported(0));
        assert!(speed::is_supported(speed::DEFAULT));
    }

    #[test]
    fn test_watermarks_ordered() {
        assert!(decision::LOW_WATER_RATIO < decision::HIGH_WATER_RATIO);
        assert!(decision::HIGH_WATER_RATIO <= 1.0);
    }

    #[test]
    fn test_activity_bounds() {
        assert!(activity::MIN_DURATION <= activity::FALLBACK_WAIT);
        assert!(activity::FALLBACK_WAIT <= activity::MAX_DURATION);
    }
}
