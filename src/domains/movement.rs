use serde::{Deserialize, Serialize};

use crate::common::{Point2D, SimResult, SimulationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementMode {
    /// Gradual motion at `speed` along the straight line to the target.
    Realistic,
    /// Jump straight onto the target every tick.
    Teleport,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MovementModel {
    mode: MovementMode,
    stochastic_pauses: bool,
}

impl MovementModel {
    pub fn new(mode: MovementMode, stochastic_pauses: bool) -> Self {
        Self {
            mode,
            stochastic_pauses,
        }
    }

    /// Whether tags only move on a tick with probability equal to their
    /// randomizer.
    pub fn stochastic_pauses(&self) -> bool {
        self.stochastic_pauses
    }

    pub fn advance(&self, position: Point2D, target: Point2D, speed: f64, dt: f64) -> SimResult<Point2D> {
        match self.mode {
            MovementMode::Teleport => Ok(target),
            MovementMode::Realistic => step_towards(position, target, speed, dt),
        }
    }
}

/// Move from `position` towards `target` by at most `speed * dt`, snapping
/// onto the target when it is within reach.
pub fn step_towards(position: Point2D, target: Point2D, speed: f64, dt: f64) -> SimResult<Point2D> {
    if !(speed.is_finite() && speed >= 0.0) {
        return Err(SimulationError::Model(format!("Invalid tag speed: {}", speed)));
    }
    if !(dt.is_finite() && dt >= 0.0) {
        return Err(SimulationError::Model(format!("Invalid time step: {}", dt)));
    }

    let dx = target.x - position.x;
    let dy = target.y - position.y;
    let remaining = dx.hypot(dy);
    let reach = speed * dt;

    if remaining <= reach {
        return Ok(target);
    }

    let fraction = reach / remaining;
    Ok(Point2D {
        x: position.x + dx * fraction,
        y: position.y + dy * fraction,
    })
}
