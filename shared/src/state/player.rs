use super::{Absolute, Delta, MotionDelta, MotionState};
use crate::time_step::TimeStep;
use crate::{Item, MAX_ENERGY};
use glam::Vec2;
use log::warn;
use serde::{Deserialize, Serialize};

/// Everything the simulation knows about one player at an instant.
///
/// Identity, inventory, energy and the frozen flag are discrete: diffs carry
/// the newer value through and apply overwrites with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub id: String,
    pub username: String,
    pub motion: MotionState,
    pub slot: Item,
    pub energy: f32,
    pub frozen: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerDelta {
    pub id: String,
    pub username: String,
    pub motion: MotionDelta,
    pub slot: Item,
    pub energy: f32,
    pub frozen: bool,
}

impl PlayerState {
    pub fn new(id: impl Into<String>, username: impl Into<String>, position: Vec2, at: f64) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            motion: MotionState::at(position, at),
            slot: Item::Empty,
            energy: MAX_ENERGY,
            frozen: false,
        }
    }

    pub fn position(&self) -> Vec2 {
        self.motion.position
    }

    /// Advances the motion integrator to `now`. A frozen player stays put
    /// but still moves forward in time.
    pub fn update(&mut self, now: f64) {
        if self.frozen {
            self.motion.velocity = Vec2::ZERO;
            self.motion.step.end = self.motion.step.end.max(now);
            return;
        }
        self.motion.update(now);
    }
}

impl Absolute for PlayerState {
    type Delta = PlayerDelta;

    fn step(&self) -> TimeStep {
        self.motion.step
    }

    fn diff(&self, other: &Self) -> PlayerDelta {
        if self.id != other.id {
            warn!("Diffing player {} against player {}", self.id, other.id);
        }
        PlayerDelta {
            id: other.id.clone(),
            username: other.username.clone(),
            motion: self.motion.diff(&other.motion),
            slot: other.slot,
            energy: other.energy,
            frozen: other.frozen,
        }
    }

    fn apply(&mut self, delta: &PlayerDelta) {
        if self.id != delta.id {
            warn!("Applying delta of player {} onto player {}", delta.id, self.id);
        }
        self.motion.apply(&delta.motion);
        self.username.clone_from(&delta.username);
        self.slot = delta.slot;
        self.energy = delta.energy;
        self.frozen = delta.frozen;
    }

    fn lerp(&self, t: f32, other: &Self) -> PlayerDelta {
        PlayerDelta {
            id: self.id.clone(),
            username: other.username.clone(),
            motion: self.motion.lerp(t, &other.motion),
            slot: other.slot,
            energy: other.energy,
            frozen: other.frozen,
        }
    }
}

impl Delta for PlayerDelta {
    fn step(&self) -> TimeStep {
        self.motion.step
    }

    fn cut_end(&self, new_end: f64) -> Self {
        Self {
            motion: self.motion.cut_end(new_end),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_new_player_defaults() {
        let player = PlayerState::new("1", "alice", Vec2::new(2.0, 3.0), 0.5);
        assert_eq!(player.slot, Item::Empty);
        assert_eq!(player.energy, MAX_ENERGY);
        assert!(!player.frozen);
        assert_eq!(player.step(), TimeStep::absolute(0.5));
    }

    #[test]
    fn test_discrete_fields_are_last_write_wins() {
        let a = PlayerState::new("1", "alice", Vec2::ZERO, 1.0);
        let mut b = PlayerState::new("1", "alice", Vec2::new(1.0, 1.0), 1.1);
        b.slot = Item::Flag;
        b.energy = 40.0;
        b.frozen = true;

        let delta = a.diff(&b);
        assert_eq!(delta.slot, Item::Flag);
        assert_eq!(delta.energy, 40.0);

        let mut folded = a.clone();
        folded.apply(&delta);
        assert_eq!(folded.slot, Item::Flag);
        assert_eq!(folded.energy, 40.0);
        assert!(folded.frozen);
        assert_approx_eq!(folded.position().x, 1.0, 1e-6);
        assert_eq!(folded.step(), b.step());
    }

    #[test]
    fn test_cut_end_keeps_discrete_fields() {
        let a = PlayerState::new("2", "bob", Vec2::ZERO, 4.0);
        let mut b = PlayerState::new("2", "bob", Vec2::new(2.0, 0.0), 4.2);
        b.energy = 12.0;
        let cut = a.diff(&b).cut_end(4.1);
        assert_approx_eq!(cut.motion.position.x, 1.0, 1e-5);
        assert_eq!(cut.energy, 12.0);
    }

    #[test]
    fn test_frozen_player_holds_position() {
        let mut player = PlayerState::new("3", "carol", Vec2::new(1.0, 1.0), 0.0);
        player.motion.update_input(crate::Input::RightPressed);
        player.frozen = true;
        player.update(0.1);
        assert_eq!(player.position(), Vec2::new(1.0, 1.0));
        assert_eq!(player.step(), TimeStep::absolute(0.1));

        player.frozen = false;
        player.update(0.2);
        assert!(player.position().x > 1.0);
    }
}
