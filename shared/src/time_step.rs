use log::warn;
use serde::{Deserialize, Serialize};

/// Tolerance used when comparing interval bounds for contiguity.
pub const TIME_EPSILON: f64 = 1e-6;

/// Half-open validity interval `[begin, end)` in seconds of server time.
///
/// States that describe an instant are stamped `[0, at)`; deltas are stamped
/// with the interval they cover.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeStep {
    pub begin: f64,
    pub end: f64,
}

impl TimeStep {
    /// Creates an interval, clamping `end` up to `begin` if they are inverted.
    pub fn new(begin: f64, end: f64) -> Self {
        if end < begin {
            warn!(
                "Inverted time step [{:.4}, {:.4}), clamping to zero length",
                begin, end
            );
            return Self { begin, end: begin };
        }
        Self { begin, end }
    }

    /// Interval stamped on a state that is valid at the instant `at`.
    pub fn absolute(at: f64) -> Self {
        Self {
            begin: 0.0,
            end: at.max(0.0),
        }
    }

    pub fn is_absolute(&self) -> bool {
        self.begin == 0.0
    }

    pub fn duration(&self) -> f64 {
        self.end - self.begin
    }

    pub fn contains(&self, t: f64) -> bool {
        self.begin <= t && t < self.end
    }

    /// True when `self` starts exactly where `previous` ends.
    pub fn follows(&self, previous: &TimeStep) -> bool {
        (self.begin - previous.end).abs() <= TIME_EPSILON
    }
}
