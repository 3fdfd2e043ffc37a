//! Authoritative world simulation: players, live projectiles, energy bolts,
//! the flag, and freeze timers.

use crate::map::{scatter_bolts, MapGenerator};
use log::{debug, info};
use shared::{
    Bolt, GameState, Input, Item, MapLayout, PlayerState, TimeStep, Vec2,
    BOLT_ENERGY, BULLET_ENERGY, FREEZE_DURATION, HIT_RADIUS, MAX_ENERGY, PICKUP_REACH,
    PROJECTILE_LIFETIME, PROJECTILE_SPEED,
};
use std::collections::{BTreeMap, HashMap};

/// Something the simulation noticed during one step.
#[derive(Debug, Clone, PartialEq)]
pub enum WorldEvent {
    ProjectileHit {
        projectile: u32,
        shooter: String,
        target: String,
    },
    ProjectileHitWall {
        projectile: u32,
    },
    ProjectileExpired {
        projectile: u32,
    },
    PlayerResumed {
        id: String,
    },
    /// The flag holder reached their own safe zone.
    FlagCaptured {
        id: String,
    },
}

/// A shot still flying in real time.
#[derive(Debug, Clone, PartialEq)]
pub struct Projectile {
    pub id: u32,
    pub owner: String,
    pub position: Vec2,
    /// Unit vector.
    pub direction: Vec2,
    /// Seconds flown so far, including any replayed history.
    pub age: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlagState {
    pub holder: Option<String>,
    /// Resting position while nobody holds it.
    pub position: Vec2,
}

/// Smallest distance between two points moving linearly over one interval,
/// given their separation `start` at its beginning and `end` at its end.
pub(crate) fn closest_approach(start: Vec2, end: Vec2) -> f32 {
    let travel = end - start;
    let length_sq = travel.length_squared();
    if length_sq <= f32::EPSILON {
        return start.length();
    }
    let s = (-start.dot(travel) / length_sq).clamp(0.0, 1.0);
    (start + travel * s).length()
}

pub struct World {
    map: MapLayout,
    players: BTreeMap<String, PlayerState>,
    slots: HashMap<String, usize>,
    frozen_until: HashMap<String, f64>,
    projectiles: Vec<Projectile>,
    next_projectile_id: u32,
    bolts: Vec<Bolt>,
    next_bolt_id: u32,
    flag: FlagState,
    last_step: f64,
}

impl World {
    pub fn new(map: MapLayout, bolts: Vec<Bolt>, now: f64) -> Self {
        let next_bolt_id = bolts
            .iter()
            .filter_map(|bolt| bolt.id.parse::<u32>().ok())
            .max()
            .map_or(0, |id| id + 1);
        let flag = FlagState {
            holder: None,
            position: map.flag,
        };
        Self {
            map,
            players: BTreeMap::new(),
            slots: HashMap::new(),
            frozen_until: HashMap::new(),
            projectiles: Vec::new(),
            next_projectile_id: 1,
            bolts,
            next_bolt_id,
            flag,
            last_step: now,
        }
    }

    /// Fresh map and bolts for a new match.
    pub fn generate(
        generator: &mut dyn MapGenerator,
        size: u32,
        players: usize,
        bolts: usize,
        now: f64,
    ) -> Self {
        let map = generator.generate(size, players);
        let bolts = scatter_bolts(generator, &map, 0, bolts);
        Self::new(map, bolts, now)
    }

    pub fn map(&self) -> &MapLayout {
        &self.map
    }

    pub fn bolts(&self) -> &[Bolt] {
        &self.bolts
    }

    pub fn flag(&self) -> &FlagState {
        &self.flag
    }

    pub fn projectiles(&self) -> &[Projectile] {
        &self.projectiles
    }

    pub fn player(&self, id: &str) -> Option<&PlayerState> {
        self.players.get(id)
    }

    pub fn players(&self) -> impl Iterator<Item = &PlayerState> {
        self.players.values()
    }

    pub fn player_mut(&mut self, id: &str) -> Option<&mut PlayerState> {
        self.players.get_mut(id)
    }

    pub fn add_player(&mut self, id: &str, username: &str, slot: usize, now: f64) -> &PlayerState {
        let spawn = self.map.spawn(slot);
        info!("Spawning player {} at ({:.1}, {:.1})", id, spawn.x, spawn.y);
        self.slots.insert(id.to_string(), slot);
        self.players
            .entry(id.to_string())
            .or_insert_with(|| PlayerState::new(id, username, spawn, now))
    }

    /// Current state of every player stamped at `now`.
    pub fn snapshot(&self, now: f64) -> GameState {
        let mut snapshot = GameState::capture(now, self.players.values());
        for player in snapshot.players.values_mut() {
            player.motion.step = TimeStep::absolute(now);
        }
        snapshot
    }

    /// Folds a key event into the player's held inputs. Frozen players keep
    /// tracking their keys so the axis is right once they resume.
    pub fn apply_input(&mut self, id: &str, input: Input) -> bool {
        match self.players.get_mut(id) {
            Some(player) => {
                player.motion.update_input(input);
                true
            }
            None => false,
        }
    }

    /// Charges the shooter for one bullet. Frozen or drained players cannot fire.
    pub fn spend_shot(&mut self, id: &str) -> bool {
        match self.players.get_mut(id) {
            Some(player) if !player.frozen && player.energy >= BULLET_ENERGY => {
                player.energy -= BULLET_ENERGY;
                true
            }
            _ => false,
        }
    }

    /// Keeps a shot flying after its replay through history missed everyone.
    pub fn launch(&mut self, owner: &str, position: Vec2, direction: Vec2, age: f64) -> u32 {
        let id = self.next_projectile_id;
        self.next_projectile_id += 1;
        self.projectiles.push(Projectile {
            id,
            owner: owner.to_string(),
            position,
            direction: direction.normalize_or_zero(),
            age,
        });
        id
    }

    /// Id for a shot that never becomes a live projectile.
    pub fn next_projectile_id(&mut self) -> u32 {
        let id = self.next_projectile_id;
        self.next_projectile_id += 1;
        id
    }

    /// Freezes `id` until `now + FREEZE_DURATION`. A frozen holder loses the
    /// flag where they stand; its new resting position is returned.
    pub fn freeze(&mut self, id: &str, now: f64) -> Option<Vec2> {
        let player = self.players.get_mut(id)?;
        player.frozen = true;
        player.motion.velocity = Vec2::ZERO;
        self.frozen_until.insert(id.to_string(), now + FREEZE_DURATION);
        info!("Player {} frozen until {:.2}", id, now + FREEZE_DURATION);

        if self.flag.holder.as_deref() == Some(id) {
            return self.drop_flag(id);
        }
        None
    }

    pub fn pick_flag(&mut self, id: &str) -> bool {
        if self.flag.holder.is_some() {
            return false;
        }
        let Some(player) = self.players.get_mut(id) else {
            return false;
        };
        if player.frozen || player.position().distance(self.flag.position) > PICKUP_REACH {
            debug!("Player {} is out of reach of the flag", id);
            return false;
        }
        player.slot = Item::Flag;
        self.flag.holder = Some(id.to_string());
        info!("Flag picked by player {}", id);
        true
    }

    /// Drops the flag at the holder's position. Only the holder can drop it.
    pub fn drop_flag(&mut self, id: &str) -> Option<Vec2> {
        if self.flag.holder.as_deref() != Some(id) {
            return None;
        }
        let player = self.players.get_mut(id)?;
        player.slot = Item::Empty;
        self.flag.holder = None;
        self.flag.position = player.position();
        info!("Flag dropped by player {}", id);
        Some(self.flag.position)
    }

    /// Consumes a bolt, refills the picker's energy and scatters a
    /// replacement. Returns the replacement.
    pub fn pick_bolt(
        &mut self,
        id: &str,
        bolt_id: &str,
        generator: &mut dyn MapGenerator,
    ) -> Option<Bolt> {
        let index = self.bolts.iter().position(|bolt| bolt.id == bolt_id)?;
        let player = self.players.get_mut(id)?;
        player.energy = (player.energy + BOLT_ENERGY).min(MAX_ENERGY);
        self.bolts.swap_remove(index);

        let replacement = scatter_bolts(generator, &self.map, self.next_bolt_id, 1);
        self.next_bolt_id += 1;
        self.bolts.extend(replacement.iter().cloned());
        replacement.into_iter().next()
    }

    /// Advances everything to `now`.
    pub fn step(&mut self, now: f64) -> Vec<WorldEvent> {
        let dt = (now - self.last_step).max(0.0);
        self.last_step = now;
        let mut events = Vec::new();

        let resumed: Vec<String> = self
            .frozen_until
            .iter()
            .filter(|(_, until)| **until <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in resumed {
            self.frozen_until.remove(&id);
            if let Some(player) = self.players.get_mut(&id) {
                player.frozen = false;
                info!("Player {} resumed", id);
                events.push(WorldEvent::PlayerResumed { id });
            }
        }

        let before: HashMap<String, Vec2> = self
            .players
            .iter()
            .map(|(id, player)| (id.clone(), player.position()))
            .collect();

        for player in self.players.values_mut() {
            player.update(now);
        }

        self.advance_projectiles(dt, &before, &mut events);

        if let Some(holder) = self.flag.holder.clone() {
            let slot = self.slots.get(&holder).copied().unwrap_or_default();
            if let Some(player) = self.players.get(&holder) {
                if self.map.in_safe_zone(slot, player.position()) {
                    events.push(WorldEvent::FlagCaptured { id: holder });
                }
            }
        }

        events
    }

    fn advance_projectiles(
        &mut self,
        dt: f64,
        before: &HashMap<String, Vec2>,
        events: &mut Vec<WorldEvent>,
    ) {
        let players = &self.players;
        let map = &self.map;
        self.projectiles.retain_mut(|projectile| {
            let start = projectile.position;
            projectile.position += projectile.direction * (PROJECTILE_SPEED * dt as f32);
            projectile.age += dt;

            let hit = players
                .values()
                .filter(|player| player.id != projectile.owner && !player.frozen)
                .find(|player| {
                    let from = before.get(&player.id).copied().unwrap_or(player.position());
                    closest_approach(start - from, projectile.position - player.position())
                        < HIT_RADIUS
                });
            if let Some(target) = hit {
                events.push(WorldEvent::ProjectileHit {
                    projectile: projectile.id,
                    shooter: projectile.owner.clone(),
                    target: target.id.clone(),
                });
                return false;
            }
            if !map.contains(projectile.position) {
                events.push(WorldEvent::ProjectileHitWall {
                    projectile: projectile.id,
                });
                return false;
            }
            if projectile.age >= PROJECTILE_LIFETIME {
                events.push(WorldEvent::ProjectileExpired {
                    projectile: projectile.id,
                });
                return false;
            }
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::RandomMapGenerator;
    use assert_approx_eq::assert_approx_eq;

    fn empty_map() -> MapLayout {
        MapLayout {
            size: 10,
            tiles: Vec::new(),
            spawns: vec![
                Vec2::new(1.0, 1.0),
                Vec2::new(19.0, 19.0),
                Vec2::new(1.0, 19.0),
                Vec2::new(19.0, 1.0),
            ],
            flag: Vec2::new(10.0, 10.0),
        }
    }

    fn world() -> World {
        let bolts = vec![Bolt {
            id: "0".to_string(),
            position: Vec2::new(5.0, 5.0),
        }];
        World::new(empty_map(), bolts, 0.0)
    }

    #[test]
    fn test_closest_approach() {
        assert_approx_eq!(closest_approach(Vec2::new(-1.0, 0.5), Vec2::new(1.0, 0.5)), 0.5);
        assert_approx_eq!(closest_approach(Vec2::new(2.0, 0.0), Vec2::new(3.0, 0.0)), 2.0);
        assert_approx_eq!(closest_approach(Vec2::new(0.0, 1.0), Vec2::new(0.0, 1.0)), 1.0);
    }

    #[test]
    fn test_players_spawn_in_their_slot() {
        let mut world = world();
        world.add_player("1", "alice", 1, 0.0);
        assert_eq!(world.player("1").unwrap().position(), Vec2::new(19.0, 19.0));
        assert_eq!(world.snapshot(0.5).step, TimeStep::absolute(0.5));
    }

    #[test]
    fn test_input_moves_player() {
        let mut world = world();
        world.add_player("1", "alice", 0, 0.0);
        assert!(world.apply_input("1", Input::ForwardPressed));
        assert!(!world.apply_input("9", Input::ForwardPressed));

        world.step(0.05);
        world.step(0.1);
        assert!(world.player("1").unwrap().position().y > 1.0);
    }

    #[test]
    fn test_firing_costs_energy() {
        let mut world = world();
        world.add_player("1", "alice", 0, 0.0);
        for _ in 0..5 {
            assert!(world.spend_shot("1"));
        }
        assert!(!world.spend_shot("1"));
        assert_eq!(world.player("1").unwrap().energy, 0.0);
    }

    #[test]
    fn test_flag_needs_reach_and_is_exclusive() {
        let mut world = world();
        world.add_player("1", "alice", 0, 0.0);
        world.add_player("2", "bob", 1, 0.0);
        assert!(!world.pick_flag("1"));

        world.player_mut("1").unwrap().motion.position = Vec2::new(10.3, 10.0);
        world.player_mut("2").unwrap().motion.position = Vec2::new(10.0, 10.3);
        assert!(world.pick_flag("1"));
        assert!(!world.pick_flag("2"));
        assert_eq!(world.player("1").unwrap().slot, Item::Flag);

        assert_eq!(world.drop_flag("2"), None);
        assert_eq!(world.drop_flag("1"), Some(Vec2::new(10.3, 10.0)));
        assert_eq!(world.flag().holder, None);
    }

    #[test]
    fn test_freeze_drops_flag_and_resumes() {
        let mut world = world();
        world.add_player("1", "alice", 0, 0.0);
        world.player_mut("1").unwrap().motion.position = Vec2::new(10.0, 10.0);
        assert!(world.pick_flag("1"));

        assert_eq!(world.freeze("1", 1.0), Some(Vec2::new(10.0, 10.0)));
        assert!(world.player("1").unwrap().frozen);
        assert!(!world.spend_shot("1"));

        assert!(world.step(2.0).is_empty());
        let events = world.step(1.0 + FREEZE_DURATION);
        assert_eq!(events, vec![WorldEvent::PlayerResumed { id: "1".to_string() }]);
        assert!(!world.player("1").unwrap().frozen);
    }

    #[test]
    fn test_frozen_player_does_not_move() {
        let mut world = world();
        world.add_player("1", "alice", 0, 0.0);
        world.apply_input("1", Input::RightPressed);
        world.freeze("1", 0.0);
        world.step(0.1);
        assert_eq!(world.player("1").unwrap().position(), Vec2::new(1.0, 1.0));
    }

    #[test]
    fn test_bolt_pickup_refills_and_replaces() {
        let mut world = world();
        let mut generator = RandomMapGenerator::seeded(5);
        world.add_player("1", "alice", 0, 0.0);
        world.spend_shot("1");
        world.spend_shot("1");

        let replacement = world.pick_bolt("1", "0", &mut generator).unwrap();
        assert_eq!(replacement.id, "1");
        assert_eq!(world.bolts().len(), 1);
        assert_eq!(world.player("1").unwrap().energy, 85.0);
        assert!(world.pick_bolt("1", "0", &mut generator).is_none());
    }

    #[test]
    fn test_projectile_hits_live_player() {
        let mut world = world();
        world.add_player("1", "alice", 0, 0.0);
        world.add_player("2", "bob", 1, 0.0);
        world.player_mut("2").unwrap().motion.position = Vec2::new(5.0, 3.0);

        let id = world.launch("1", Vec2::new(5.0, 1.0), Vec2::new(0.0, 1.0), 0.0);
        world.step(0.1);
        let events = world.step(0.2);
        assert_eq!(
            events,
            vec![WorldEvent::ProjectileHit {
                projectile: id,
                shooter: "1".to_string(),
                target: "2".to_string(),
            }]
        );
        assert!(world.projectiles().is_empty());
    }

    #[test]
    fn test_projectile_leaves_arena() {
        let mut world = world();
        world.add_player("1", "alice", 0, 0.0);
        let id = world.launch("1", Vec2::new(1.0, 19.5), Vec2::new(0.0, 1.0), 0.0);
        let events = world.step(0.1);
        assert_eq!(events, vec![WorldEvent::ProjectileHitWall { projectile: id }]);
    }

    #[test]
    fn test_projectile_expires() {
        let mut world = world();
        let lifetime_left = PROJECTILE_LIFETIME - 0.01;
        let id = world.launch("1", Vec2::new(10.0, 1.0), Vec2::new(0.0, 1.0), lifetime_left);
        let events = world.step(0.05);
        assert_eq!(events, vec![WorldEvent::ProjectileExpired { projectile: id }]);
    }

    #[test]
    fn test_capture_in_own_safe_zone() {
        let mut world = world();
        world.add_player("1", "alice", 0, 0.0);
        world.player_mut("1").unwrap().motion.position = Vec2::new(10.0, 10.0);
        assert!(world.pick_flag("1"));
        assert!(world.step(0.01).is_empty());

        world.player_mut("1").unwrap().motion.position = Vec2::new(1.5, 1.5);
        let events = world.step(0.02);
        assert_eq!(events, vec![WorldEvent::FlagCaptured { id: "1".to_string() }]);
    }
}
