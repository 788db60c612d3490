//! In-game clock

use serde::{Deserialize, Serialize};

use crate::sim::constants::time::{MINUTES_PER_DAY, START_MINUTE_OF_DAY};

/// Calendar view of the simulation clock.
///
/// Always derived from `total_minutes`; never advanced on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameTime {
    pub day: u32,
    pub hour: u8,
    pub minute: u8,
    pub total_minutes: u64,
}

impl GameTime {
    /// Project cumulative simulated minutes onto the calendar (day 1 starts at 08:00)
    pub fn from_total_minutes(total_minutes: u64) -> Self {
        let absolute = START_MINUTE_OF_DAY + total_minutes;
        let day = absolute / MINUTES_PER_DAY + 1;
        let minute_of_day = absolute % MINUTES_PER_DAY;
        Self {
            day: day.min(u32::MAX as u64) as u32,
            hour: (minute_of_day / 60) as u8,
            minute: (minute_of_day % 60) as u8,
            total_minutes,
        }
    }

    pub fn start() -> Self {
        Self::from_total_minutes(0)
    }

    pub fn minute_of_day(&self) -> u32 {
        self.hour as u32 * 60 + self.minute as u32
    }

    /// True between the night start hour and morning
    pub fn is_night(&self) -> bool {
        use crate::sim::constants::time::{MORNING_HOUR, NIGHT_START_HOUR};
        self.hour >= NIGHT_START_HOUR || self.hour < MORNING_HOUR
    }

    /// "Day 3 14:05"
    pub fn label(&self) -> String {
        format!("Day {} {:02}:{:02}", self.day, self.hour, self.minute)
    }
}

impl Default for GameTime {
    fn default() -> Self {
        Self::start()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_is_morning_of_day_one() {
        let t = GameTime::start();
        assert_eq!((t.day, t.hour, t.minute, t.total_minutes), (1, 8, 0, 0));
        assert!(!t.is_night());
    }

    #[test]
    fn test_rollover_to_next_day() {
        // 08:00 + 16h = midnight of day 2
        let t = GameTime::from_total_minutes(16 * 60);
        assert_eq!((t.day, t.hour, t.minute), (2, 0, 0));
        assert!(t.is_night());
    }

    #[test]
    fn test_minutes_and_label() {
        let t = GameTime::from_total_minutes(365);
        assert_eq!((t.hour, t.minute), (14, 5));
        assert_eq!(t.minute_of_day(), 14 * 60 + 5);
        assert_eq!(t.label(), "Day 1 14:05");
    }

    #[test]
    fn test_wire_shape() {
        let json = serde_json::to_value(GameTime::from_total_minutes(90)).unwrap();
        assert_eq!(json["totalMinutes"], 90);
        assert_eq!(json["hour"], 9);
        assert_eq!(json["minute"], 30);
        assert_eq!(json["day"], 1);
    }
}
