use super::{applied_step, cut_fraction, diff_step, Absolute, Delta};
use crate::time_step::TimeStep;
use crate::{Input, MAX_STEP_DT, MIN_FACING_SPEED, PLAYER_SPEED, VELOCITY_DAMPING};
use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Kinematic state of one player at an instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionState {
    pub step: TimeStep,
    pub position: Vec2,
    pub velocity: Vec2,
    /// Unit facing vector; follows velocity while moving.
    pub direction: Vec2,
    /// Heading in degrees, always derived from `direction`.
    pub angle: f32,
    /// Sum of the currently held movement keys.
    pub active_inputs: Vec2,
}

/// Change of a [`MotionState`] over an interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionDelta {
    pub step: TimeStep,
    pub position: Vec2,
    pub velocity: Vec2,
    pub direction: Vec2,
}

/// Heading in degrees, counter-clockwise from +y. This is the rotation a
/// renderer applies to a model that faces forward at rest.
pub fn heading_deg(direction: Vec2) -> f32 {
    (-direction.x).atan2(direction.y).to_degrees()
}

impl MotionState {
    /// At rest at `position`, facing forward, valid at instant `at`.
    pub fn at(position: Vec2, at: f64) -> Self {
        Self {
            step: TimeStep::absolute(at),
            position,
            velocity: Vec2::ZERO,
            direction: Vec2::Y,
            angle: heading_deg(Vec2::Y),
            active_inputs: Vec2::ZERO,
        }
    }

    /// Integrates one simulation step up to `now`.
    ///
    /// The velocity is blended toward `PLAYER_SPEED` along the normalised
    /// input axis; the remaining velocity error decays by `VELOCITY_DAMPING`
    /// per second. Calls with `now` at or before the current end only move
    /// nothing.
    pub fn update(&mut self, now: f64) {
        let dt = (now - self.step.end).clamp(0.0, MAX_STEP_DT) as f32;
        self.step.end = self.step.end.max(now);
        if dt <= 0.0 {
            return;
        }

        let target = self.active_inputs.normalize_or_zero() * PLAYER_SPEED;
        let blend = 1.0 - VELOCITY_DAMPING.powf(dt);
        self.velocity += (target - self.velocity) * blend;
        self.position += self.velocity * dt;

        if self.velocity.length() > MIN_FACING_SPEED {
            self.direction = self.velocity.normalize_or_zero();
            self.angle = heading_deg(self.direction);
        }
    }

    /// Folds one key press/release into the held input axis.
    pub fn update_input(&mut self, input: Input) {
        self.active_inputs += input.axis();
    }

    pub fn clear_inputs(&mut self) {
        self.active_inputs = Vec2::ZERO;
    }

    fn set_direction(&mut self, direction: Vec2) {
        if direction.length() > f32::EPSILON {
            self.direction = direction.normalize_or_zero();
            self.angle = heading_deg(self.direction);
        }
    }
}

impl Absolute for MotionState {
    type Delta = MotionDelta;

    fn step(&self) -> TimeStep {
        self.step
    }

    fn diff(&self, other: &Self) -> MotionDelta {
        MotionDelta {
            step: diff_step(self.step, other.step, "motion"),
            position: other.position - self.position,
            velocity: other.velocity - self.velocity,
            direction: other.direction - self.direction,
        }
    }

    fn apply(&mut self, delta: &MotionDelta) {
        self.step = applied_step(self.step, delta.step, "motion");
        self.position += delta.position;
        self.velocity += delta.velocity;
        self.set_direction(self.direction + delta.direction);
    }

    fn lerp(&self, t: f32, other: &Self) -> MotionDelta {
        MotionDelta {
            step: TimeStep::new(self.step.end, self.step.end),
            position: (other.position - self.position) * t,
            velocity: (other.velocity - self.velocity) * t,
            direction: (other.direction - self.direction) * t,
        }
    }
}

impl MotionDelta {
    pub fn zero(step: TimeStep) -> Self {
        Self {
            step,
            position: Vec2::ZERO,
            velocity: Vec2::ZERO,
            direction: Vec2::ZERO,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.position == Vec2::ZERO && self.velocity == Vec2::ZERO && self.direction == Vec2::ZERO
    }
}

impl Delta for MotionDelta {
    fn step(&self) -> TimeStep {
        self.step
    }

    fn cut_end(&self, new_end: f64) -> Self {
        let Some(t) = cut_fraction(self.step, new_end) else {
            return self.clone();
        };
        Self {
            step: TimeStep::new(self.step.begin, new_end.max(self.step.begin)),
            position: self.position * t,
            velocity: self.velocity * t,
            direction: self.direction * t,
        }
    }
}
