//! Operator controls: pause, resume, speed

use serde::{Deserialize, Serialize};

use crate::sim::constants::speed;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ControlAction {
    Pause,
    Resume,
    SetSpeed,
}

impl ControlAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlAction::Pause => "pause",
            ControlAction::Resume => "resume",
            ControlAction::SetSpeed => "setSpeed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlEvent {
    pub action: ControlAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl ControlEvent {
    pub fn pause() -> Self {
        Self {
            action: ControlAction::Pause,
            value: None,
        }
    }

    pub fn resume() -> Self {
        Self {
            action: ControlAction::Resume,
            value: None,
        }
    }

    pub fn set_speed(value: f64) -> Self {
        Self {
            action: ControlAction::SetSpeed,
            value: Some(value),
        }
    }
}

/// Why a control was refused. The display text is the ack reason.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ControlRejection {
    #[error("speed value required")]
    MissingSpeed,
    #[error("unsupported speed {0}; expected one of 1, 2, 4, 10")]
    UnsupportedSpeed(f64),
}

/// Pause flag and speed multiplier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationControls {
    pub paused: bool,
    pub speed: u32,
}

impl Default for SimulationControls {
    fn default() -> Self {
        Self {
            paused: false,
            speed: speed::DEFAULT,
        }
    }
}

impl SimulationControls {
    /// Apply a control. Rejected controls leave state untouched.
    pub fn apply(&mut self, event: &ControlEvent) -> Result<(), ControlRejection> {
        match event.action {
            ControlAction::Pause => {
                self.paused = true;
                Ok(())
            }
            ControlAction::Resume => {
                self.paused = false;
                Ok(())
            }
            ControlAction::SetSpeed => {
                let value = event.value.ok_or(ControlRejection::MissingSpeed)?;
                let multiplier = speed_multiplier(value).ok_or(ControlRejection::UnsupportedSpeed(value))?;
                self.speed = multiplier;
                Ok(())
            }
        }
    }
}

/// Integral supported multiplier for `value`, if any
fn speed_multiplier(value: f64) -> Option<u32> {
    if !value.is_finite() || value.fract() != 0.0 || value < 0.0 || value > u32::MAX as f64 {
        return None;
    }
    let multiplier = value as u32;
    speed::is_supported(multiplier).then_some(multiplier)
}
