//! Arena layout generation.

use log::warn;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use shared::map::TILE_SIZE;
use shared::{Bolt, MapLayout, TileRecord, Vec2};

/// Produces a fully resolved layout for a match.
pub trait MapGenerator: Send {
    fn generate(&mut self, size: u32, players: usize) -> MapLayout;

    /// A free spot for a new energy bolt.
    fn bolt_position(&mut self, map: &MapLayout) -> Vec2;
}

/// Largest map side in tiles. FIND_ROOM_OK carries every tile and has to fit
/// in one datagram.
pub const MAX_MAP_SIZE: u32 = 40;

const TILE_KINDS: [&str; 4] = ["floor", "crate", "ramp", "pillar"];
const ROTATIONS: [f32; 4] = [0.0, 90.0, 180.0, 270.0];

/// Random tiles with one spawn in each corner and the flag in the middle.
pub struct RandomMapGenerator {
    rng: StdRng,
}

impl RandomMapGenerator {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic generator, for tests and replays.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomMapGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MapGenerator for RandomMapGenerator {
    fn generate(&mut self, size: u32, players: usize) -> MapLayout {
        if size > MAX_MAP_SIZE {
            warn!("Map size {} exceeds {}, clamping", size, MAX_MAP_SIZE);
        }
        let size = size.clamp(2, MAX_MAP_SIZE);
        let mut tiles = Vec::with_capacity((size * size) as usize);
        for row in 0..size {
            for column in 0..size {
                let tile_id = TILE_KINDS.choose(&mut self.rng).copied().unwrap_or("floor");
                let rotation = ROTATIONS.choose(&mut self.rng).copied().unwrap_or(0.0);
                tiles.push(TileRecord {
                    tile_id: tile_id.to_string(),
                    position: Vec2::new(
                        (column as f32 + 0.5) * TILE_SIZE,
                        (row as f32 + 0.5) * TILE_SIZE,
                    ),
                    rotation,
                });
            }
        }

        let extent = size as f32 * TILE_SIZE;
        let margin = TILE_SIZE / 2.0;
        let corners = [
            Vec2::new(margin, margin),
            Vec2::new(extent - margin, extent - margin),
            Vec2::new(margin, extent - margin),
            Vec2::new(extent - margin, margin),
        ];
        let spawns = corners.iter().copied().cycle().take(players.max(1)).collect();

        MapLayout {
            size,
            tiles,
            spawns,
            flag: Vec2::new(extent / 2.0, extent / 2.0),
        }
    }

    fn bolt_position(&mut self, map: &MapLayout) -> Vec2 {
        let extent = map.extent();
        let margin = TILE_SIZE / 2.0;
        Vec2::new(
            self.rng.gen_range(margin..extent - margin),
            self.rng.gen_range(margin..extent - margin),
        )
    }
}

/// Scatters `count` fresh bolts with ids starting at `first_id`.
pub fn scatter_bolts(
    generator: &mut dyn MapGenerator,
    map: &MapLayout,
    first_id: u32,
    count: usize,
) -> Vec<Bolt> {
    (0..count as u32)
        .map(|i| Bolt {
            id: (first_id + i).to_string(),
            position: generator.bolt_position(map),
        })
        .collect()
}
