use std::f64::consts::TAU;

use rand::Rng;

use crate::common::{Bounds, Point2D, SimResult, SimulationError};

/// Draws beyond this many that land on the current position mean the target
/// region has collapsed.
const MAX_DRAW_ATTEMPTS: usize = 32;

/// Picks a tag's next destination inside a disk around its position.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetSelector {
    bounds: Bounds,
    offset_radius: f64,
    proximity: f64,
}

impl TargetSelector {
    pub fn new(bounds: Bounds, offset_radius: f64, proximity: f64) -> SimResult<Self> {
        if !(offset_radius.is_finite() && offset_radius > 0.0) {
            return Err(SimulationError::Model(format!(
                "Target offset radius must be positive, got {}",
                offset_radius
            )));
        }
        if !(bounds.area().is_finite() && bounds.area() > 0.0) {
            return Err(SimulationError::Model(
                "Environment bounds have zero area".to_string(),
            ));
        }
        if !(proximity.is_finite() && proximity >= 0.0) {
            return Err(SimulationError::Model(format!(
                "Target proximity must not be negative, got {}",
                proximity
            )));
        }
        Ok(Self {
            bounds,
            offset_radius,
            proximity,
        })
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    pub fn has_arrived(&self, position: Point2D, target: Point2D) -> bool {
        let remaining = position.distance_to(&target);
        remaining == 0.0 || remaining < self.proximity
    }

    /// Uniform draw in the disk of `offset_radius` around `position`, clamped
    /// into bounds. Never returns `position` itself.
    pub fn select<R: Rng + ?Sized>(&self, position: Point2D, rng: &mut R) -> SimResult<Point2D> {
        for _ in 0..MAX_DRAW_ATTEMPTS {
            let radius = self.offset_radius * rng.gen::<f64>().sqrt();
            let angle = rng.gen_range(0.0..TAU);
            let candidate = self.bounds.clamp(Point2D {
                x: position.x + radius * angle.cos(),
                y: position.y + radius * angle.sin(),
            });
            if candidate != position {
                return Ok(candidate);
            }
        }
        Err(SimulationError::Model(format!(
            "No target distinct from ({}, {}) after {} draws",
            position.x, position.y, MAX_DRAW_ATTEMPTS
        )))
    }
}
