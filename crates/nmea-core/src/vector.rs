//! Planar velocity vectors.
//!
//! Directions follow the navigation convention: degrees clockwise from North,
//! `x` pointing East and `y` pointing North.

use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};

use crate::model::normalize_360;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Velocity {
    pub x: f64,
    pub y: f64,
}

impl Velocity {
    pub const ZERO: Velocity = Velocity { x: 0.0, y: 0.0 };

    /// Build from a speed and a direction in degrees.
    pub fn polar(speed: f64, direction: f64) -> Self {
        let rad = direction.to_radians();
        Self {
            x: speed * rad.sin(),
            y: speed * rad.cos(),
        }
    }

    pub fn speed(&self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Direction in [0, 360). Zero for a null vector.
    pub fn direction(&self) -> f64 {
        if self.x == 0.0 && self.y == 0.0 {
            return 0.0;
        }
        normalize_360(self.x.atan2(self.y).to_degrees())
    }
}

impl Add for Velocity {
    type Output = Velocity;

    fn add(self, rhs: Velocity) -> Velocity {
        Velocity {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
        }
    }
}

impl Sub for Velocity {
    type Output = Velocity;

    fn sub(self, rhs: Velocity) -> Velocity {
        Velocity {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
        }
    }
}

impl Mul<f64> for Velocity {
    type Output = Velocity;

    fn mul(self, rhs: f64) -> Velocity {
        Velocity {
            x: self.x * rhs,
            y: self.y * rhs,
        }
    }
}

impl AddAssign for Velocity {
    fn add_assign(&mut self, rhs: Velocity) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl SubAssign for Velocity {
    fn sub_assign(&mut self, rhs: Velocity) {
        self.x -= rhs.x;
        self.y -= rhs.y;
    }
}
