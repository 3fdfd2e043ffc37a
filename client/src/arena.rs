//! Client-side view of the arena items and the collision events the
//! synchronization loop reacts to.

use log::debug;
use shared::{
    Bolt, Item, MapLayout, PlayerState, ProjectileSpawn, Vec2, PICKUP_REACH, PROJECTILE_LIFETIME,
    PROJECTILE_SPEED,
};

/// Contact noticed by the local proximity checks in one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum PhysicsEvent {
    /// The local player stands next to the free flag.
    FlagInReach,
    BoltTouched { id: String },
    ProjectileHitWall { id: u32 },
    /// The local player carried the flag into their own safe zone.
    EnteredSafeZone,
}

/// A shot drawn on screen, moving along a straight line from where it was fired.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientProjectile {
    pub id: u32,
    pub owner: String,
    pub origin: Vec2,
    pub direction: Vec2,
    pub fired_at: f64,
    pub position: Vec2,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlagView {
    pub holder: Option<String>,
    pub position: Vec2,
}

pub struct Arena {
    map: Option<MapLayout>,
    slot: usize,
    bolts: Vec<Bolt>,
    flag: FlagView,
    projectiles: Vec<ClientProjectile>,
    was_in_safe_zone: bool,
    next_local_projectile: u32,
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl Arena {
    pub fn new() -> Self {
        Self {
            map: None,
            slot: 0,
            bolts: Vec::new(),
            flag: FlagView {
                holder: None,
                position: Vec2::ZERO,
            },
            projectiles: Vec::new(),
            was_in_safe_zone: false,
            next_local_projectile: u32::MAX,
        }
    }

    pub fn setup(&mut self, map: MapLayout, slot: usize) {
        self.reset();
        self.flag.position = map.flag;
        self.map = Some(map);
        self.slot = slot;
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn map(&self) -> Option<&MapLayout> {
        self.map.as_ref()
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn bolts(&self) -> &[Bolt] {
        &self.bolts
    }

    pub fn flag(&self) -> &FlagView {
        &self.flag
    }

    pub fn projectiles(&self) -> &[ClientProjectile] {
        &self.projectiles
    }

    pub fn set_bolts(&mut self, bolts: Vec<Bolt>) {
        self.bolts = bolts;
    }

    pub fn replace_bolt(&mut self, old: &str, new: Bolt) {
        self.bolts.retain(|bolt| bolt.id != old);
        self.bolts.push(new);
    }

    pub fn flag_picked(&mut self, holder: &str) {
        self.flag.holder = Some(holder.to_string());
    }

    pub fn flag_dropped(&mut self, position: Vec2) {
        self.flag.holder = None;
        self.flag.position = position;
    }

    pub fn spawn(&mut self, spawn: ProjectileSpawn) {
        if self.projectiles.iter().any(|p| p.id == spawn.id && p.owner == spawn.owner) {
            return;
        }
        self.projectiles.push(ClientProjectile {
            id: spawn.id,
            owner: spawn.owner,
            origin: spawn.position,
            direction: spawn.direction.normalize_or_zero(),
            fired_at: spawn.timestamp,
            position: spawn.position,
        });
    }

    /// Shows our own shot straight away; the server never echoes it back.
    pub fn spawn_local(&mut self, owner: &str, position: Vec2, direction: Vec2, at: f64) {
        let id = self.next_local_projectile;
        self.next_local_projectile = self.next_local_projectile.wrapping_sub(1);
        self.spawn(ProjectileSpawn {
            id,
            owner: owner.to_string(),
            position,
            direction,
            timestamp: at,
        });
    }

    /// Moves projectiles to where they are at `now`.
    pub fn advance(&mut self, now: f64) {
        for projectile in &mut self.projectiles {
            let flown = (now - projectile.fired_at).max(0.0) as f32;
            projectile.position = projectile.origin + projectile.direction * (PROJECTILE_SPEED * flown);
        }
    }

    /// Proximity checks for the local player, once per frame.
    pub fn detect(&mut self, player: Option<&PlayerState>, now: f64) -> Vec<PhysicsEvent> {
        let mut events = Vec::new();

        if let Some(map) = &self.map {
            self.projectiles.retain(|projectile| {
                if !map.contains(projectile.position) {
                    events.push(PhysicsEvent::ProjectileHitWall { id: projectile.id });
                    return false;
                }
                if now - projectile.fired_at > PROJECTILE_LIFETIME {
                    debug!("Projectile {} faded out", projectile.id);
                    return false;
                }
                true
            });
        }

        let Some(player) = player else {
            return events;
        };
        let position = player.position();

        if self.flag.holder.is_none() && position.distance(self.flag.position) <= PICKUP_REACH {
            events.push(PhysicsEvent::FlagInReach);
        }

        events.extend(
            self.bolts
                .iter()
                .filter(|bolt| position.distance(bolt.position) <= PICKUP_REACH)
                .map(|bolt| PhysicsEvent::BoltTouched {
                    id: bolt.id.clone(),
                }),
        );

        let in_safe_zone = self
            .map
            .as_ref()
            .is_some_and(|map| map.in_safe_zone(self.slot, position));
        if in_safe_zone && !self.was_in_safe_zone && player.slot == Item::Flag {
            events.push(PhysicsEvent::EnteredSafeZone);
        }
        self.was_in_safe_zone = in_safe_zone;

        events
    }
}
