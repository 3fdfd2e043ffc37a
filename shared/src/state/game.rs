use super::{applied_step, diff_step, Absolute, Delta, PlayerDelta, PlayerState};
use crate::time_step::TimeStep;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// World snapshot: every known player at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    pub step: TimeStep,
    pub players: BTreeMap<String, PlayerState>,
}

/// Change of a [`GameState`] over an interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameDelta {
    pub step: TimeStep,
    pub players: BTreeMap<String, PlayerDelta>,
}

impl GameState {
    pub fn empty(at: f64) -> Self {
        Self {
            step: TimeStep::absolute(at),
            players: BTreeMap::new(),
        }
    }

    /// Snapshot stamped at `at` holding copies of `players`.
    pub fn capture<'a>(at: f64, players: impl IntoIterator<Item = &'a PlayerState>) -> Self {
        Self {
            step: TimeStep::absolute(at),
            players: players
                .into_iter()
                .map(|player| (player.id.clone(), player.clone()))
                .collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&PlayerState> {
        self.players.get(id)
    }

    fn same_players(&self, other: &GameState) -> bool {
        self.players.len() == other.players.len()
            && self.players.keys().all(|id| other.players.contains_key(id))
    }
}

impl Absolute for GameState {
    type Delta = GameDelta;

    fn step(&self) -> TimeStep {
        self.step
    }

    /// Players present on only one side are left out of the delta.
    fn diff(&self, other: &Self) -> GameDelta {
        if !self.same_players(other) {
            warn!(
                "Diffing game states with different players ({} vs {}), using the common set",
                self.players.len(),
                other.players.len()
            );
        }
        GameDelta {
            step: diff_step(self.step, other.step, "game"),
            players: self
                .players
                .iter()
                .filter_map(|(id, before)| {
                    other
                        .players
                        .get(id)
                        .map(|after| (id.clone(), before.diff(after)))
                })
                .collect(),
        }
    }

    fn apply(&mut self, delta: &GameDelta) {
        self.step = applied_step(self.step, delta.step, "game");
        for (id, player_delta) in &delta.players {
            match self.players.get_mut(id) {
                Some(player) => player.apply(player_delta),
                None => warn!("Delta for unknown player {} ignored", id),
            }
        }
    }

    fn lerp(&self, t: f32, other: &Self) -> GameDelta {
        GameDelta {
            step: TimeStep::new(self.step.end, self.step.end),
            players: self
                .players
                .iter()
                .filter_map(|(id, before)| {
                    other
                        .players
                        .get(id)
                        .map(|after| (id.clone(), before.lerp(t, after)))
                })
                .collect(),
        }
    }
}

impl Delta for GameDelta {
    fn step(&self) -> TimeStep {
        self.step
    }

    fn cut_end(&self, new_end: f64) -> Self {
        let cut = |delta: &PlayerDelta| delta.cut_end(new_end);
        Self {
            step: if new_end >= self.step.end {
                self.step
            } else {
                TimeStep::new(self.step.begin, new_end.max(self.step.begin))
            },
            players: self
                .players
                .iter()
                .map(|(id, delta)| (id.clone(), cut(delta)))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use glam::Vec2;

    fn snapshot(at: f64, players: &[(&str, Vec2)]) -> GameState {
        let players: Vec<PlayerState> = players
            .iter()
            .map(|(id, position)| PlayerState::new(*id, *id, *position, at))
            .collect();
        GameState::capture(at, &players)
    }

    #[test]
    fn test_game_roundtrip() {
        let a = snapshot(1.0, &[("0", Vec2::ZERO), ("1", Vec2::new(5.0, 5.0))]);
        let b = snapshot(1.1, &[("0", Vec2::new(1.0, 0.0)), ("1", Vec2::new(4.0, 6.0))]);

        let mut folded = a.clone();
        folded.apply(&a.diff(&b));

        assert_eq!(folded.step, b.step);
        for (id, player) in &b.players {
            let got = folded.get(id).unwrap();
            assert_approx_eq!(got.position().x, player.position().x, 1e-5);
            assert_approx_eq!(got.position().y, player.position().y, 1e-5);
        }
    }

    #[test]
    fn test_game_self_diff() {
        let a = snapshot(2.0, &[("0", Vec2::new(1.0, 1.0))]);
        let delta = a.diff(&a);
        assert_eq!(delta.step.duration(), 0.0);
        assert!(delta.players["0"].motion.is_zero());
    }

    #[test]
    fn test_mismatched_players_use_common_set() {
        let a = snapshot(1.0, &[("0", Vec2::ZERO)]);
        let b = snapshot(1.1, &[("0", Vec2::new(1.0, 0.0)), ("1", Vec2::ZERO)]);
        let delta = a.diff(&b);
        assert_eq!(delta.players.len(), 1);

        let mut folded = a.clone();
        folded.apply(&delta);
        assert_eq!(folded.players.len(), 1);
    }

    #[test]
    fn test_cut_end_slices_every_player() {
        let a = snapshot(9.0, &[("0", Vec2::ZERO), ("1", Vec2::new(2.0, 2.0))]);
        let b = snapshot(9.1, &[("0", Vec2::new(1.0, 0.0)), ("1", Vec2::new(2.0, 4.0))]);
        let cut = a.diff(&b).cut_end(9.05);

        let mut rendered = a.clone();
        rendered.apply(&cut);
        assert_approx_eq!(rendered.get("0").unwrap().position().x, 0.5, 1e-5);
        assert_approx_eq!(rendered.get("1").unwrap().position().y, 3.0, 1e-5);
        assert_approx_eq!(rendered.step.end, 9.05, 1e-9);
    }
}
