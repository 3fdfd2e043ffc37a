//! Snapshot history and shot replay against rewound player positions.
//!
//! A client fires at what it rendered, which is the world as it was some
//! time ago. The server keeps a short trailing history of snapshots and,
//! when a shot arrives, replays the projectile from the snapshot covering
//! the claimed fire time forward through every later snapshot, comparing it
//! against where each target *was* at that moment.

use crate::game::closest_approach;
use log::{debug, warn};
use shared::time_step::TIME_EPSILON;
use shared::{GameState, Vec2, HIT_RADIUS, PROJECTILE_LIFETIME, PROJECTILE_SPEED};
use std::collections::VecDeque;

/// Samples taken per history interval while replaying a shot.
pub const REPLAY_SUB_SAMPLES: usize = 4;

/// Distance in front of the shooter where projectiles appear.
pub const MUZZLE_OFFSET: f32 = 0.5;

/// Trailing window of authoritative snapshots, oldest first.
pub struct History {
    snapshots: VecDeque<GameState>,
    window: f64,
}

/// A fire request as received from a client.
#[derive(Debug, Clone)]
pub struct Shot<'a> {
    pub shooter: &'a str,
    pub direction: Vec2,
    /// Server time the shooter saw when firing.
    pub timestamp: f64,
}

/// Outcome of replaying one shot through history.
#[derive(Debug, Clone, PartialEq)]
pub struct Replay {
    /// Players hit, in the order they were reached.
    pub hits: Vec<String>,
    pub origin: Vec2,
    /// Unit direction of travel.
    pub direction: Vec2,
    /// Where the projectile is at the end of the replay.
    pub position: Vec2,
    /// Seconds flown during the replay.
    pub age: f64,
}

impl History {
    pub fn new(window: f64) -> Self {
        Self {
            snapshots: VecDeque::new(),
            window,
        }
    }

    /// Appends a snapshot. Snapshots must arrive in time order; one not newer
    /// than the latest replaces it.
    pub fn push(&mut self, snapshot: GameState) {
        if let Some(newest) = self.snapshots.back() {
            if snapshot.step.end <= newest.step.end {
                debug!(
                    "Snapshot at {:.4} does not advance history at {:.4}, replacing",
                    snapshot.step.end, newest.step.end
                );
                self.snapshots.pop_back();
            }
        }
        self.snapshots.push_back(snapshot);
    }

    /// Drops snapshots older than the window, always keeping the newest.
    pub fn trim(&mut self, now: f64) {
        let horizon = now - self.window;
        while self.snapshots.len() > 1
            && self
                .snapshots
                .front()
                .is_some_and(|oldest| oldest.step.end < horizon)
        {
            self.snapshots.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn oldest(&self) -> Option<&GameState> {
        self.snapshots.front()
    }

    pub fn newest(&self) -> Option<&GameState> {
        self.snapshots.back()
    }

    /// Index of the first snapshot ending at or after `timestamp`, falling
    /// back to the oldest or newest one when `timestamp` is outside history.
    fn index_at(&self, timestamp: f64) -> Option<usize> {
        let oldest = self.snapshots.front()?;
        if timestamp + TIME_EPSILON < oldest.step.end {
            warn!(
                "Shot at {:.4} predates history starting at {:.4}, using the oldest snapshot",
                timestamp, oldest.step.end
            );
            return Some(0);
        }
        match self
            .snapshots
            .iter()
            .position(|snapshot| snapshot.step.end + TIME_EPSILON >= timestamp)
        {
            Some(index) => Some(index),
            None => {
                warn!(
                    "Shot at {:.4} is newer than all history, using the newest snapshot",
                    timestamp
                );
                Some(self.snapshots.len() - 1)
            }
        }
    }

    /// Replays `shot` from the snapshot covering its timestamp through the
    /// rest of history. Returns `None` when there is no history or the
    /// shooter is not in it.
    pub fn rewind(&self, shot: &Shot<'_>) -> Option<Replay> {
        let Some(start) = self.index_at(shot.timestamp) else {
            warn!("No history to rewind shot from {}", shot.shooter);
            return None;
        };
        let base = &self.snapshots[start];
        let Some(shooter) = base.get(shot.shooter) else {
            warn!(
                "Shooter {} missing from snapshot at {:.4}",
                shot.shooter, base.step.end
            );
            return None;
        };

        let direction = match shot.direction.normalize_or_zero() {
            d if d == Vec2::ZERO => shooter.motion.direction,
            d => d,
        };
        let origin = shooter.position() + direction * MUZZLE_OFFSET;
        let start_time = base.step.end;
        let position_at = |t: f64| origin + direction * (PROJECTILE_SPEED * (t - start_time) as f32);

        let mut hits: Vec<String> = base
            .players
            .values()
            .filter(|target| target.id != shot.shooter && !target.frozen)
            .filter(|target| target.position().distance(origin) < HIT_RADIUS)
            .map(|target| target.id.clone())
            .collect();
        let mut last_time = start_time;

        'replay: for (previous, next) in self
            .snapshots
            .iter()
            .skip(start)
            .zip(self.snapshots.iter().skip(start + 1))
        {
            let span = next.step.end - previous.step.end;
            for sample in 0..REPLAY_SUB_SAMPLES {
                let from = sample as f32 / REPLAY_SUB_SAMPLES as f32;
                let to = (sample + 1) as f32 / REPLAY_SUB_SAMPLES as f32;
                let t0 = previous.step.end + span * from as f64;
                let t1 = previous.step.end + span * to as f64;
                if t1 - start_time > PROJECTILE_LIFETIME {
                    break 'replay;
                }

                for target in next.players.values() {
                    if target.id == shot.shooter || target.frozen || hits.contains(&target.id) {
                        continue;
                    }
                    let end = target.position();
                    let begin = previous.get(&target.id).map_or(end, |p| p.position());
                    let at = |f: f32| begin + (end - begin) * f;
                    let distance =
                        closest_approach(position_at(t0) - at(from), position_at(t1) - at(to));
                    if distance < HIT_RADIUS {
                        debug!(
                            "Shot from {} hit {} at {:.4} (rewound {:.4}s)",
                            shot.shooter,
                            target.id,
                            t1,
                            self.newest().map_or(0.0, |n| n.step.end) - t1
                        );
                        hits.push(target.id.clone());
                    }
                }
                last_time = t1;
            }
        }

        Some(Replay {
            hits,
            origin,
            direction,
            position: position_at(last_time),
            age: last_time - start_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::PlayerState;

    fn snapshot(at: f64, players: &[(&str, Vec2)]) -> GameState {
        let players: Vec<PlayerState> = players
            .iter()
            .map(|(id, position)| PlayerState::new(*id, *id, *position, at))
            .collect();
        GameState::capture(at, players.iter())
    }

    /// Target walks from (1, 0) to (1, 1.5) between t=1.0 and t=1.3 while the
    /// shooter stands at the origin.
    fn walking_target() -> History {
        let mut history = History::new(0.5);
        for i in 0..=3 {
            let t = 1.0 + i as f64 * 0.1;
            history.push(snapshot(
                t,
                &[("a", Vec2::ZERO), ("b", Vec2::new(1.0, 0.5 * i as f32))],
            ));
        }
        history
    }

    #[test]
    fn test_trim_keeps_window() {
        let mut history = History::new(0.5);
        for i in 0..10 {
            history.push(snapshot(i as f64 * 0.1, &[]));
        }
        history.trim(0.95);
        assert_approx_eq!(history.oldest().unwrap().step.end, 0.5);
        assert_eq!(history.len(), 5);

        history.trim(100.0);
        assert_eq!(history.len(), 1);
        assert_approx_eq!(history.newest().unwrap().step.end, 0.9);
    }

    #[test]
    fn test_push_replaces_stale_snapshot() {
        let mut history = History::new(0.5);
        history.push(snapshot(1.0, &[]));
        history.push(snapshot(1.0, &[("a", Vec2::ZERO)]));
        assert_eq!(history.len(), 1);
        assert!(history.newest().unwrap().get("a").is_some());
    }

    #[test]
    fn test_empty_history_cannot_rewind() {
        let history = History::new(0.5);
        let shot = Shot {
            shooter: "a",
            direction: Vec2::new(1.0, 0.0),
            timestamp: 1.0,
        };
        assert!(history.rewind(&shot).is_none());
    }

    #[test]
    fn test_rewound_target_is_hit() {
        // At t=1.0 the target stands at (1, 0): a shot along +x fired then hits.
        let history = walking_target();
        let replay = history
            .rewind(&Shot {
                shooter: "a",
                direction: Vec2::new(1.0, 0.0),
                timestamp: 1.0,
            })
            .unwrap();
        assert_eq!(replay.hits, vec!["b".to_string()]);
        assert_eq!(replay.origin, Vec2::new(0.5, 0.0));
    }

    #[test]
    fn test_present_position_would_miss() {
        // Fired at the newest snapshot the target is already at (1, 1.5).
        let history = walking_target();
        let replay = history
            .rewind(&Shot {
                shooter: "a",
                direction: Vec2::new(1.0, 0.0),
                timestamp: 1.3,
            })
            .unwrap();
        assert!(replay.hits.is_empty());
        assert_eq!(replay.age, 0.0);
    }

    #[test]
    fn test_target_hit_once() {
        let mut history = History::new(1.0);
        for i in 0..6 {
            history.push(snapshot(
                1.0 + i as f64 * 0.05,
                &[("a", Vec2::ZERO), ("b", Vec2::new(1.0, 0.0)), ("c", Vec2::new(2.0, 0.1))],
            ));
        }
        let replay = history
            .rewind(&Shot {
                shooter: "a",
                direction: Vec2::new(1.0, 0.0),
                timestamp: 1.0,
            })
            .unwrap();
        assert_eq!(replay.hits, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_shooter_is_never_hit() {
        let history = walking_target();
        let replay = history
            .rewind(&Shot {
                shooter: "a",
                direction: Vec2::new(-1.0, 0.0),
                timestamp: 1.0,
            })
            .unwrap();
        assert!(replay.hits.is_empty());
        assert_approx_eq!(replay.age, 0.3);
        assert_approx_eq!(replay.position.x, -3.5, 1e-4);
    }

    #[test]
    fn test_timestamp_outside_history_falls_back() {
        let history = walking_target();
        let too_old = history
            .rewind(&Shot {
                shooter: "a",
                direction: Vec2::new(1.0, 0.0),
                timestamp: 0.2,
            })
            .unwrap();
        assert_eq!(too_old.hits, vec!["b".to_string()]);

        let too_new = history
            .rewind(&Shot {
                shooter: "a",
                direction: Vec2::new(1.0, 0.0),
                timestamp: 5.0,
            })
            .unwrap();
        assert!(too_new.hits.is_empty());
    }

    #[test]
    fn test_missing_shooter() {
        let history = walking_target();
        let shot = Shot {
            shooter: "z",
            direction: Vec2::new(1.0, 0.0),
            timestamp: 1.0,
        };
        assert!(history.rewind(&shot).is_none());
    }
}
