//! Timestamped state algebra shared by client prediction and server history.
//!
//! Every layer (motion, player, game) comes in two shapes: an absolute state,
//! valid at one instant and stamped `[0, at)`, and a delta covering an
//! interval. Only absolute states can be integrated forward; deltas can only
//! be applied, cut or inspected. Keeping them as distinct types means a delta
//! can never be stepped by mistake.
//!
//! Ordering violations never fail: UDP reorders routinely, so a diff against
//! an older state or an apply of a non-contiguous delta is logged and then
//! carried out with clamped time bounds.

mod game;
mod motion;
mod player;

pub use game::{GameDelta, GameState};
pub use motion::{heading_deg, MotionDelta, MotionState};
pub use player::{PlayerDelta, PlayerState};

use crate::time_step::{TimeStep, TIME_EPSILON};
use log::{debug, warn};

/// Operations available on an absolute (instantaneous) state.
pub trait Absolute: Clone {
    type Delta: Delta;

    fn step(&self) -> TimeStep;

    /// Field-wise `other - self`, covering `[self.end, other.end)`.
    fn diff(&self, other: &Self) -> Self::Delta;

    /// Adds `delta` in place and extends the validity to `delta`'s end.
    fn apply(&mut self, delta: &Self::Delta);

    /// `(other - self) * t` for the continuous fields, as a zero-length delta
    /// anchored at `self`'s end. Discrete fields are taken from `other`.
    fn lerp(&self, t: f32, other: &Self) -> Self::Delta;
}

/// Operations available on a delta.
pub trait Delta: Clone {
    fn step(&self) -> TimeStep;

    /// Linear approximation of the delta restricted to `[begin, new_end)`.
    /// Never extrapolates: a `new_end` past the end returns the delta as is.
    fn cut_end(&self, new_end: f64) -> Self;
}

/// Interval of a diff from a state ending at `from` to one ending at `to`.
pub(crate) fn diff_step(from: TimeStep, to: TimeStep, what: &str) -> TimeStep {
    if to.end + TIME_EPSILON < from.end {
        warn!(
            "Out-of-order {} diff: target ends at {:.4}, before source end {:.4}",
            what, to.end, from.end
        );
        return TimeStep::new(from.end, from.end);
    }
    TimeStep::new(from.end, to.end.max(from.end))
}

/// Validity of a state ending at `base` after a delta covering `delta` is applied.
pub(crate) fn applied_step(base: TimeStep, delta: TimeStep, what: &str) -> TimeStep {
    if delta.begin > base.end + TIME_EPSILON {
        warn!(
            "Applying {} delta starting at {:.4} leaves a gap after {:.4}",
            what, delta.begin, base.end
        );
    } else if delta.end + TIME_EPSILON < base.end {
        warn!(
            "Applying stale {} delta ending at {:.4} onto state ending at {:.4}",
            what, delta.end, base.end
        );
    } else if !delta.follows(&base) {
        debug!(
            "Applying overlapping {} delta [{:.4}, {:.4}) onto state ending at {:.4}",
            what, delta.begin, delta.end, base.end
        );
    }
    TimeStep {
        begin: base.begin,
        end: base.end.max(delta.end),
    }
}

/// Fraction of `step` elapsed at `new_end`, or `None` when no cut is needed.
pub(crate) fn cut_fraction(step: TimeStep, new_end: f64) -> Option<f32> {
    let duration = step.duration();
    if new_end >= step.end || duration <= TIME_EPSILON {
        return None;
    }
    Some(((new_end - step.begin) / duration).max(0.0) as f32)
}
