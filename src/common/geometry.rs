use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Point2D) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// The rectangular environment `[0, size_x] × [0, size_y]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub size_x: f64,
    pub size_y: f64,
}

impl Bounds {
    pub fn new(size_x: f64, size_y: f64) -> Self {
        Self { size_x, size_y }
    }

    pub fn area(&self) -> f64 {
        self.size_x * self.size_y
    }

    pub fn contains(&self, point: &Point2D) -> bool {
        (0.0..=self.size_x).contains(&point.x) && (0.0..=self.size_y).contains(&point.y)
    }

    pub fn clamp(&self, point: Point2D) -> Point2D {
        Point2D {
            x: point.x.clamp(0.0, self.size_x),
            y: point.y.clamp(0.0, self.size_y),
        }
    }

    /// Uniform point anywhere inside the environment.
    pub fn random_point<R: Rng + ?Sized>(&self, rng: &mut R) -> Point2D {
        Point2D {
            x: rng.gen_range(0.0..=self.size_x),
            y: rng.gen_range(0.0..=self.size_y),
        }
    }
}
