//! Client synchronization: prediction of the local player, reconciliation
//! against server snapshots, and delayed interpolation of remote players.
//!
//! The local player exists twice. `predicted` is what gets rendered and
//! responds to input immediately. `shadow` is the client's best guess of
//! the local player as the server sees it: it is reset from each snapshot
//! (plus the local movement the server has not seen yet) and otherwise moves
//! by exactly the steps the prediction takes. Each frame `predicted` is
//! pulled a fraction of the way toward `shadow`, so corrections show up as
//! a short glide rather than a jump.

use crate::config::ClientConfig;
use log::{debug, info, warn};
use shared::{Absolute, Delta, GameState, Input, MotionDelta, PlayerState, TimeStep};
use std::collections::{BTreeMap, VecDeque};

/// Local movement diffs kept while waiting for the server to catch up.
const MAX_LOCAL_DIFFS: usize = 256;

/// Estimate of the server clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientClock {
    offset: Option<f64>,
}

impl ClientClock {
    /// Aligns with the server time received in the room config.
    pub fn sync(&mut self, server_time: f64, local: f64) {
        info!("Clock synced to server time {:.3}", server_time);
        self.offset = Some(server_time - local);
    }

    /// Moves the estimate forward when the server is seen to be ahead of it.
    pub fn observe(&mut self, server_time: f64, local: f64) {
        match self.offset {
            Some(offset) if server_time <= local + offset => {}
            Some(offset) => {
                debug!(
                    "Clock behind server by {:.4}s, catching up",
                    server_time - local - offset
                );
                self.offset = Some(server_time - local);
            }
            None => self.offset = Some(server_time - local),
        }
    }

    pub fn is_synced(&self) -> bool {
        self.offset.is_some()
    }

    pub fn now(&self, local: f64) -> f64 {
        local + self.offset.unwrap_or(0.0)
    }
}

/// Per-frame synchronization state of one client.
pub struct ClientSession {
    lerp_factor: f32,
    drift_factor: f32,
    interpolation_delay: f64,
    snapshot_capacity: usize,

    main_id: Option<String>,
    predicted: Option<PlayerState>,
    shadow: Option<PlayerState>,
    local_diffs: VecDeque<MotionDelta>,
    remotes: BTreeMap<String, PlayerState>,
    snapshots: VecDeque<GameState>,
    /// End of the newest snapshot reconciled so far.
    last_reconciled_end: Option<f64>,
}

impl ClientSession {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            lerp_factor: config.lerp_factor,
            drift_factor: config.drift_factor,
            interpolation_delay: config.interpolation_delay,
            snapshot_capacity: config.snapshot_capacity.max(1),
            main_id: None,
            predicted: None,
            shadow: None,
            local_diffs: VecDeque::new(),
            remotes: BTreeMap::new(),
            snapshots: VecDeque::new(),
            last_reconciled_end: None,
        }
    }

    /// Takes over the room roster received on joining.
    pub fn join(&mut self, main_id: &str, players: Vec<PlayerState>) {
        self.reset();
        for player in players {
            if player.id == main_id {
                self.shadow = Some(player.clone());
                self.predicted = Some(player);
            } else {
                self.remotes.insert(player.id.clone(), player);
            }
        }
        if self.predicted.is_none() {
            warn!("Room config does not contain our own player {}", main_id);
        }
        self.main_id = Some(main_id.to_string());
    }

    pub fn add_player(&mut self, player: PlayerState) {
        if Some(&player.id) == self.main_id.as_ref() {
            return;
        }
        info!("Player {} ({}) joined", player.id, player.username);
        self.remotes.insert(player.id.clone(), player);
    }

    /// Marks a player frozen or thawed ahead of the next snapshot.
    pub fn set_frozen(&mut self, id: &str, frozen: bool) {
        if self.main_id.as_deref() == Some(id) {
            for player in [self.predicted.as_mut(), self.shadow.as_mut()]
                .into_iter()
                .flatten()
            {
                player.frozen = frozen;
            }
        } else if let Some(remote) = self.remotes.get_mut(id) {
            remote.frozen = frozen;
        }
    }

    /// Forgets everything about the current match.
    pub fn reset(&mut self) {
        self.main_id = None;
        self.predicted = None;
        self.shadow = None;
        self.local_diffs.clear();
        self.remotes.clear();
        self.snapshots.clear();
        self.last_reconciled_end = None;
    }

    pub fn main_id(&self) -> Option<&str> {
        self.main_id.as_deref()
    }

    pub fn predicted(&self) -> Option<&PlayerState> {
        self.predicted.as_ref()
    }

    pub fn shadow(&self) -> Option<&PlayerState> {
        self.shadow.as_ref()
    }

    pub fn remotes(&self) -> impl Iterator<Item = &PlayerState> {
        self.remotes.values()
    }

    pub fn local_diffs(&self) -> impl Iterator<Item = &MotionDelta> {
        self.local_diffs.iter()
    }

    pub fn interpolation_delay(&self) -> f64 {
        self.interpolation_delay
    }

    pub fn update_input(&mut self, input: Input) {
        if let Some(predicted) = self.predicted.as_mut() {
            predicted.motion.update_input(input);
        }
    }

    /// Runs one frame at estimated server time `now` with the snapshots that
    /// arrived since the last frame.
    ///
    /// Every snapshot goes into the interpolation buffer. Only the newest one
    /// is reconciled against, and only if it is newer than anything
    /// reconciled before: the local diffs it would need were dropped when
    /// the newer snapshot was applied.
    pub fn frame(&mut self, now: f64, snapshots: impl IntoIterator<Item = GameState>) {
        let snapshots: Vec<GameState> = snapshots.into_iter().collect();
        let newest = snapshots.iter().max_by(|a, b| a.step.end.total_cmp(&b.step.end));

        let reconciled = match (newest, self.last_reconciled_end) {
            (Some(snapshot), Some(end)) if snapshot.step.end <= end => {
                debug!(
                    "Snapshot at {:.4} is not newer than {:.4}, only buffering it",
                    snapshot.step.end, end
                );
                false
            }
            (Some(snapshot), _) => {
                self.reconcile(snapshot);
                true
            }
            (None, _) => false,
        };
        for snapshot in snapshots {
            self.insert_snapshot(snapshot);
        }

        let factor = if reconciled {
            self.lerp_factor
        } else {
            self.drift_factor
        };
        self.predict(now, factor);
    }

    /// Advances the prediction one step, records the step, moves the shadow
    /// by the same step, then pulls the prediction `factor` toward it.
    fn predict(&mut self, now: f64, factor: f32) {
        let (Some(predicted), Some(shadow)) = (self.predicted.as_mut(), self.shadow.as_mut()) else {
            return;
        };

        let before = predicted.motion.clone();
        predicted.update(now);
        let step = before.diff(&predicted.motion);

        shadow.motion.apply(&step);
        if !step.is_zero() {
            self.local_diffs.push_back(step);
            while self.local_diffs.len() > MAX_LOCAL_DIFFS {
                self.local_diffs.pop_front();
            }
        }

        let correction = predicted.lerp(factor, shadow);
        predicted.apply(&correction);
    }

    /// Replays local movement newer than `snapshot` onto it.
    ///
    /// Diffs ending before the snapshot are already part of it and are
    /// dropped for good. The rest are folded onto the local player's entry
    /// in chronological order.
    pub fn apply_local_diffs(&mut self, snapshot: &GameState) -> GameState {
        let end = snapshot.step.end;
        let before = self.local_diffs.len();
        self.local_diffs.retain(|diff| diff.step.end >= end);
        if before != self.local_diffs.len() {
            debug!(
                "Dropped {} local diffs covered by snapshot at {:.4}",
                before - self.local_diffs.len(),
                end
            );
        }

        let mut reconciled = snapshot.clone();
        if let Some(main) = self
            .main_id
            .as_ref()
            .and_then(|id| reconciled.players.get_mut(id))
        {
            for diff in &self.local_diffs {
                main.motion.apply(diff);
            }
        }
        reconciled
    }

    fn reconcile(&mut self, snapshot: &GameState) {
        self.last_reconciled_end = Some(snapshot.step.end);
        let reconciled = self.apply_local_diffs(snapshot);

        for (id, player) in &reconciled.players {
            if Some(id) != self.main_id.as_ref() {
                self.remotes.insert(id.clone(), player.clone());
            }
        }
        self.remotes
            .retain(|id, _| reconciled.players.contains_key(id));

        let Some(main_id) = self.main_id.as_ref() else {
            return;
        };
        match reconciled.players.get(main_id) {
            Some(main) => {
                let predicted = self.predicted.get_or_insert_with(|| main.clone());
                // The next prediction step starts where the prediction ends.
                let mut shadow = main.clone();
                shadow.motion.step = TimeStep::absolute(predicted.motion.step.end);
                self.shadow = Some(shadow);
            }
            None => warn!("Snapshot at {:.4} lacks our player {}", snapshot.step.end, main_id),
        }
    }

    /// Buffers a snapshot for interpolation, keeping the buffer ordered by
    /// time and at most `snapshot_capacity` long.
    fn insert_snapshot(&mut self, snapshot: GameState) {
        let end = snapshot.step.end;
        match self
            .snapshots
            .iter()
            .position(|buffered| buffered.step.end >= end)
        {
            Some(index) if (self.snapshots[index].step.end - end).abs() < f64::EPSILON => {
                self.snapshots[index] = snapshot;
            }
            Some(index) => {
                debug!("Snapshot at {:.4} arrived out of order", end);
                self.snapshots.insert(index, snapshot);
            }
            None => self.snapshots.push_back(snapshot),
        }
        while self.snapshots.len() > self.snapshot_capacity {
            self.snapshots.pop_front();
        }
    }

    /// World as it was at `target_time`, reconstructed from the buffered
    /// snapshots. `None` until the first snapshot arrives.
    ///
    /// Players only present in the later of the two snapshots are taken from
    /// it as they are.
    pub fn interpolate_remote(&self, target_time: f64) -> Option<GameState> {
        let newest = self.snapshots.back()?;
        let index = match self
            .snapshots
            .iter()
            .position(|snapshot| snapshot.step.end >= target_time)
        {
            Some(index) => index,
            None => return Some(newest.clone()),
        };
        if index == 0 {
            return Some(self.snapshots[0].clone());
        }

        let previous = &self.snapshots[index - 1];
        let next = &self.snapshots[index];
        let slice = previous.diff(next).cut_end(target_time);
        let mut state = previous.clone();
        state.apply(&slice);
        for (id, player) in &next.players {
            if !state.players.contains_key(id) {
                state.players.insert(id.clone(), player.clone());
            }
        }
        Some(state)
    }

    /// Remote players as they should be drawn at `now`. Freeze flags come
    /// from the latest roster rather than the delayed snapshot.
    pub fn render_remotes(&self, now: f64) -> Vec<PlayerState> {
        let main_id = self.main_id.as_deref();
        match self.interpolate_remote(now - self.interpolation_delay) {
            Some(state) => state
                .players
                .into_values()
                .filter(|player| Some(player.id.as_str()) != main_id)
                .map(|mut player| {
                    if let Some(remote) = self.remotes.get(&player.id) {
                        player.frozen = remote.frozen;
                    }
                    player
                })
                .collect(),
            None => self.remotes.values().cloned().collect(),
        }
    }

    /// Interval covered by the buffered snapshots.
    pub fn buffered_span(&self) -> Option<TimeStep> {
        let oldest = self.snapshots.front()?;
        let newest = self.snapshots.back()?;
        Some(TimeStep::new(oldest.step.end, newest.step.end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::Vec2;

    fn session() -> ClientSession {
        ClientSession::new(&ClientConfig::default())
    }

    fn player(id: &str, position: Vec2, at: f64) -> PlayerState {
        PlayerState::new(id, id, position, at)
    }

    fn snapshot(at: f64, players: &[(&str, Vec2)]) -> GameState {
        let players: Vec<PlayerState> = players
            .iter()
            .map(|(id, position)| player(id, *position, at))
            .collect();
        GameState::capture(at, players.iter())
    }

    fn motion_diff(begin: f64, end: f64, offset: Vec2) -> MotionDelta {
        MotionDelta {
            position: offset,
            ..MotionDelta::zero(TimeStep::new(begin, end))
        }
    }

    #[test]
    fn test_clock_sync_and_catch_up() {
        let mut clock = ClientClock::default();
        assert!(!clock.is_synced());
        clock.sync(10.0, 2.0);
        assert_approx_eq!(clock.now(3.0), 11.0);

        clock.observe(10.5, 3.0);
        assert_approx_eq!(clock.now(3.0), 11.0);
        clock.observe(11.5, 3.0);
        assert_approx_eq!(clock.now(3.0), 11.5);
    }

    #[test]
    fn test_stale_local_diffs_are_discarded() {
        let mut session = session();
        session.join("p", vec![player("p", Vec2::ZERO, 9.7)]);
        session.local_diffs.push_back(motion_diff(9.8, 9.9, Vec2::new(0.1, 0.0)));
        session.local_diffs.push_back(motion_diff(9.9, 10.2, Vec2::new(0.3, 0.2)));

        let reconciled = session.apply_local_diffs(&snapshot(10.0, &[("p", Vec2::new(5.0, 5.0))]));

        let main = reconciled.get("p").unwrap();
        assert_approx_eq!(main.position().x, 5.3, 1e-5);
        assert_approx_eq!(main.position().y, 5.2, 1e-5);
        assert_approx_eq!(main.step().end, 10.2);
        assert_eq!(session.local_diffs().count(), 1);
    }

    #[test]
    fn test_interpolation_cuts_between_snapshots() {
        let mut session = session();
        session.insert_snapshot(snapshot(9.0, &[("r", Vec2::ZERO)]));
        session.insert_snapshot(snapshot(9.1, &[("r", Vec2::new(1.0, 0.0))]));

        let state = session.interpolate_remote(9.05).unwrap();
        let remote = state.get("r").unwrap();
        assert_approx_eq!(remote.position().x, 0.5, 1e-4);
        assert_approx_eq!(remote.position().y, 0.0);
    }

    #[test]
    fn test_interpolation_edges() {
        let mut session = session();
        assert!(session.interpolate_remote(1.0).is_none());

        session.insert_snapshot(snapshot(9.0, &[("r", Vec2::ZERO)]));
        session.insert_snapshot(snapshot(9.1, &[("r", Vec2::new(1.0, 0.0))]));

        let beyond = session.interpolate_remote(12.0).unwrap();
        assert_eq!(beyond.get("r").unwrap().position(), Vec2::new(1.0, 0.0));
        let before = session.interpolate_remote(8.0).unwrap();
        assert_eq!(before.get("r").unwrap().position(), Vec2::ZERO);
    }

    #[test]
    fn test_snapshot_buffer_is_ordered_and_bounded() {
        let mut session = session();
        for t in [1.0, 1.2, 1.1, 1.4, 1.3, 1.5, 1.6] {
            session.insert_snapshot(snapshot(t, &[]));
        }
        let ends: Vec<f64> = session.snapshots.iter().map(|s| s.step.end).collect();
        assert_eq!(ends, vec![1.2, 1.3, 1.4, 1.5, 1.6]);
        assert_eq!(session.buffered_span(), Some(TimeStep::new(1.2, 1.6)));
    }

    #[test]
    fn test_prediction_records_steps() {
        let mut session = session();
        session.join("p", vec![player("p", Vec2::ZERO, 0.0)]);
        session.update_input(Input::ForwardPressed);

        for i in 1..=10 {
            session.frame(i as f64 / 60.0, None);
        }
        let predicted = session.predicted().unwrap();
        let shadow = session.shadow().unwrap();
        assert!(predicted.position().y > 0.0);
        assert_approx_eq!(predicted.position().y, shadow.position().y, 1e-4);
        assert_eq!(session.local_diffs().count(), 10);
    }

    #[test]
    fn test_frozen_main_player_stops_predicting() {
        let mut session = session();
        session.join("p", vec![player("p", Vec2::ZERO, 0.0), player("q", Vec2::ZERO, 0.0)]);
        session.update_input(Input::RightPressed);
        session.frame(0.1, None);
        let x = session.predicted().unwrap().position().x;
        assert!(x > 0.0);

        session.set_frozen("p", true);
        session.frame(0.2, None);
        assert!(session.predicted().unwrap().frozen);
        assert_approx_eq!(session.predicted().unwrap().position().x, x, 1e-6);

        session.set_frozen("q", true);
        assert!(session.remotes().all(|remote| remote.frozen));
    }

    #[test]
    fn test_reconciliation_converges_to_snapshot() {
        let mut session = session();
        session.join("p", vec![player("p", Vec2::ZERO, 0.0)]);

        session.frame(1.0, Some(snapshot(1.0, &[("p", Vec2::new(2.0, 0.0))])));
        let after_one = session.predicted().unwrap().position().x;
        assert_approx_eq!(after_one, 0.4, 1e-4);

        for i in 1..=60 {
            let now = 1.0 + i as f64 / 60.0;
            session.frame(now, Some(snapshot(now, &[("p", Vec2::new(2.0, 0.0))])));
        }
        assert_approx_eq!(session.predicted().unwrap().position().x, 2.0, 1e-3);
        assert_eq!(session.local_diffs().count(), 0);
    }

    #[test]
    fn test_remote_players_follow_snapshots() {
        let mut session = session();
        session.join("p", vec![player("p", Vec2::ZERO, 0.0), player("r", Vec2::ZERO, 0.0)]);
        assert_eq!(session.render_remotes(0.0).len(), 1);

        session.frame(2.0, Some(snapshot(2.0, &[("p", Vec2::ZERO), ("r", Vec2::new(3.0, 3.0))])));
        assert_eq!(session.remotes().next().unwrap().position(), Vec2::new(3.0, 3.0));

        let rendered = session.render_remotes(2.05);
        assert_eq!(rendered.len(), 1);
        assert_eq!(rendered[0].id, "r");

        session.frame(2.1, Some(snapshot(2.1, &[("p", Vec2::ZERO)])));
        assert_eq!(session.remotes().count(), 0);
    }

    #[test]
    fn test_stale_snapshot_is_buffered_not_reconciled() {
        let mut session = session();
        session.join("p", vec![player("p", Vec2::ZERO, 0.0)]);

        session.frame(1.0, Some(snapshot(1.0, &[("p", Vec2::new(2.0, 0.0))])));
        assert_approx_eq!(session.shadow().unwrap().position().x, 2.0, 1e-5);

        session.frame(1.02, Some(snapshot(0.95, &[("p", Vec2::ZERO)])));
        assert_approx_eq!(session.shadow().unwrap().position().x, 2.0, 1e-5);
        assert_eq!(session.buffered_span(), Some(TimeStep::new(0.95, 1.0)));
    }

    #[test]
    fn test_snapshots_of_one_frame_are_all_buffered() {
        let mut session = session();
        session.join("p", vec![player("p", Vec2::ZERO, 0.0)]);

        session.frame(
            1.1,
            vec![
                snapshot(1.1, &[("p", Vec2::new(1.0, 0.0))]),
                snapshot(1.05, &[("p", Vec2::new(0.5, 0.0))]),
            ],
        );
        assert_eq!(session.buffered_span(), Some(TimeStep::new(1.05, 1.1)));
        assert_approx_eq!(session.shadow().unwrap().position().x, 1.0, 1e-5);
    }

    #[test]
    fn test_reconciled_shadow_continues_the_prediction() {
        let mut session = session();
        session.join("p", vec![player("p", Vec2::ZERO, 0.0)]);
        session.frame(0.5, None);

        session.frame(0.52, Some(snapshot(0.6, &[("p", Vec2::ZERO)])));
        let predicted = session.predicted().unwrap();
        let shadow = session.shadow().unwrap();
        assert_approx_eq!(shadow.motion.step.end, predicted.motion.step.end, 1e-9);
        assert_approx_eq!(shadow.motion.step.end, 0.52, 1e-9);
    }

    #[test]
    fn test_new_remote_and_freeze_are_drawn_at_once() {
        let mut session = session();
        session.join("p", vec![player("p", Vec2::ZERO, 0.0)]);
        let delay = session.interpolation_delay();

        session.frame(5.0, Some(snapshot(5.0, &[("p", Vec2::ZERO)])));
        session.frame(
            5.05,
            Some(snapshot(5.05, &[("p", Vec2::ZERO), ("r", Vec2::new(1.0, 1.0))])),
        );

        let rendered = session.render_remotes(5.03 + delay);
        assert_eq!(rendered.len(), 1);
        assert_eq!(rendered[0].id, "r");
        assert!(!rendered[0].frozen);

        session.set_frozen("r", true);
        assert!(session.render_remotes(5.03 + delay)[0].frozen);
    }
}
