use crate::SAFE_ZONE_RADIUS;
use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Edge length of one map tile in world units.
pub const TILE_SIZE: f32 = 2.0;

/// One placed tile of the generated map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileRecord {
    pub tile_id: String,
    pub position: Vec2,
    /// Rotation in degrees, a multiple of 90.
    pub rotation: f32,
}

/// Fully resolved arena layout sent to clients when they join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapLayout {
    /// Tiles per side.
    pub size: u32,
    pub tiles: Vec<TileRecord>,
    /// Spawn point per player slot; each doubles as that player's safe zone.
    pub spawns: Vec<Vec2>,
    pub flag: Vec2,
}

impl MapLayout {
    /// Side length of the square arena in world units.
    pub fn extent(&self) -> f32 {
        self.size as f32 * TILE_SIZE
    }

    pub fn contains(&self, position: Vec2) -> bool {
        let extent = self.extent();
        (0.0..=extent).contains(&position.x) && (0.0..=extent).contains(&position.y)
    }

    pub fn spawn(&self, slot: usize) -> Vec2 {
        self.spawns
            .get(slot % self.spawns.len().max(1))
            .copied()
            .unwrap_or_default()
    }

    pub fn in_safe_zone(&self, slot: usize, position: Vec2) -> bool {
        position.distance(self.spawn(slot)) <= SAFE_ZONE_RADIUS
    }
}

/// Energy pickup lying on the map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bolt {
    pub id: String,
    pub position: Vec2,
}

/// A shot announced to clients that did not fire it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectileSpawn {
    pub id: u32,
    pub owner: String,
    pub position: Vec2,
    pub direction: Vec2,
    pub timestamp: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> MapLayout {
        MapLayout {
            size: 10,
            tiles: Vec::new(),
            spawns: vec![Vec2::new(1.0, 1.0), Vec2::new(19.0, 19.0)],
            flag: Vec2::new(8.0, 8.0),
        }
    }

    #[test]
    fn test_bounds() {
        let map = layout();
        assert_eq!(map.extent(), 20.0);
        assert!(map.contains(Vec2::new(10.0, 0.0)));
        assert!(!map.contains(Vec2::new(-0.1, 5.0)));
        assert!(!map.contains(Vec2::new(5.0, 20.5)));
    }

    #[test]
    fn test_safe_zone_is_own_spawn() {
        let map = layout();
        assert!(map.in_safe_zone(0, Vec2::new(1.5, 1.5)));
        assert!(!map.in_safe_zone(1, Vec2::new(1.5, 1.5)));
        assert_eq!(map.spawn(3), Vec2::new(19.0, 19.0));
    }
}
