use crate::arena::Arena;
use crate::game::ClientSession;
use crate::network::{Client, ClientStatus};
use macroquad::prelude::*;
use shared::map::TILE_SIZE;
use shared::{PlayerState, Vec2, PLAYER_RADIUS, PROJECTILE_RADIUS, SAFE_ZONE_RADIUS};

const MARGIN: f32 = 40.0;

/// Maps arena coordinates (y up) onto the window (y down).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
    pub extent: f32,
}

impl Viewport {
    /// Fits a square arena of side `extent` into a `width` × `height` window.
    pub fn fit(extent: f32, width: f32, height: f32) -> Self {
        let extent = extent.max(1.0);
        let available = (width.min(height) - 2.0 * MARGIN).max(1.0);
        let scale = available / extent;
        Self {
            scale,
            offset_x: (width - extent * scale) / 2.0,
            offset_y: (height - extent * scale) / 2.0,
            extent,
        }
    }

    pub fn to_screen(&self, position: Vec2) -> (f32, f32) {
        (
            self.offset_x + position.x * self.scale,
            self.offset_y + (self.extent - position.y) * self.scale,
        )
    }

    pub fn length(&self, world: f32) -> f32 {
        world * self.scale
    }
}

pub struct Renderer {
    slot_colors: [Color; 4],
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer {
    pub fn new() -> Self {
        Renderer {
            slot_colors: [
                Color::from_rgba(68, 170, 255, 255),
                Color::from_rgba(255, 68, 68, 255),
                Color::from_rgba(68, 221, 102, 255),
                Color::from_rgba(255, 187, 51, 255),
            ],
        }
    }

    pub fn render(&mut self, client: &Client) {
        clear_background(Color::from_rgba(26, 26, 26, 255));

        let arena = client.arena();
        if let Some(map) = arena.map() {
            let view = Viewport::fit(map.extent(), screen_width(), screen_height());
            self.draw_floor(arena, &view);
            self.draw_items(arena, client.session(), &view);
            self.draw_players(client.session(), client.server_time(), &view);
            self.draw_projectiles(arena, &view);
        }

        self.draw_status(client);
    }

    fn draw_floor(&mut self, arena: &Arena, view: &Viewport) {
        let Some(map) = arena.map() else {
            return;
        };
        let (x, y) = view.to_screen(Vec2::new(0.0, map.extent()));
        let side = view.length(map.extent());
        draw_rectangle(x, y, side, side, Color::from_rgba(44, 44, 44, 255));

        let tile = view.length(TILE_SIZE);
        for record in &map.tiles {
            let (cx, cy) = view.to_screen(record.position);
            let shade = 52 + (record.tile_id.len() as u8 % 4) * 6;
            draw_rectangle(
                cx - tile / 2.0 + 1.0,
                cy - tile / 2.0 + 1.0,
                tile - 2.0,
                tile - 2.0,
                Color::from_rgba(shade, shade, shade, 255),
            );
        }

        for (slot, spawn) in map.spawns.iter().enumerate() {
            let (sx, sy) = view.to_screen(*spawn);
            let mut color = self.slot_colors[slot % self.slot_colors.len()];
            color.a = if slot == arena.slot() { 0.35 } else { 0.15 };
            draw_circle(sx, sy, view.length(SAFE_ZONE_RADIUS), color);
        }
    }

    fn draw_items(&mut self, arena: &Arena, session: &ClientSession, view: &Viewport) {
        for bolt in arena.bolts() {
            let (x, y) = view.to_screen(bolt.position);
            draw_poly(x, y, 4, view.length(0.2), 45.0, YELLOW);
        }

        let flag = arena.flag();
        let position = match flag.holder.as_deref() {
            Some(holder) if session.main_id() == Some(holder) => {
                session.predicted().map(|player| player.position())
            }
            Some(holder) => session
                .remotes()
                .find(|player| player.id == holder)
                .map(|player| player.position()),
            None => Some(flag.position),
        };
        if let Some(position) = position {
            let (x, y) = view.to_screen(position);
            let pole = view.length(0.6);
            draw_line(x, y, x, y - pole, 2.0, WHITE);
            draw_triangle(
                vec2(x, y - pole),
                vec2(x, y - pole * 0.6),
                vec2(x + pole * 0.5, y - pole * 0.8),
                Color::from_rgba(255, 0, 255, 255),
            );
        }
    }

    fn draw_players(&mut self, session: &ClientSession, now: f64, view: &Viewport) {
        for player in session.render_remotes(now) {
            self.draw_player(&player, view, false);
        }
        if let Some(player) = session.predicted() {
            self.draw_player(player, view, true);
        }
    }

    fn draw_player(&mut self, player: &PlayerState, view: &Viewport, local: bool) {
        let (x, y) = view.to_screen(player.position());
        let radius = view.length(PLAYER_RADIUS);
        let color = if player.frozen {
            Color::from_rgba(170, 221, 255, 255)
        } else if local {
            GREEN
        } else {
            Color::from_rgba(255, 68, 68, 255)
        };
        draw_circle(x, y, radius, color);
        draw_circle_lines(x, y, radius, 2.0, WHITE);

        let facing = player.motion.direction;
        let tip = view.to_screen(player.position() + facing * (PLAYER_RADIUS * 1.6));
        draw_line(x, y, tip.0, tip.1, 2.0, YELLOW);

        draw_text(&player.username, x - radius, y - radius - 4.0, 14.0, WHITE);

        let energy = (player.energy / shared::MAX_ENERGY).clamp(0.0, 1.0);
        draw_rectangle(x - radius, y + radius + 3.0, radius * 2.0, 3.0, DARKGRAY);
        draw_rectangle(x - radius, y + radius + 3.0, radius * 2.0 * energy, 3.0, SKYBLUE);
    }

    fn draw_projectiles(&mut self, arena: &Arena, view: &Viewport) {
        for projectile in arena.projectiles() {
            let (x, y) = view.to_screen(projectile.position);
            draw_circle(x, y, view.length(PROJECTILE_RADIUS).max(2.0), ORANGE);
        }
    }

    fn draw_status(&mut self, client: &Client) {
        let line = match client.status() {
            ClientStatus::Searching => "Looking for a room...".to_string(),
            ClientStatus::Joined { id, slot } => {
                let session = client.session();
                format!(
                    "Player {} (slot {}) | {}/{} players | {} unconfirmed steps",
                    id,
                    slot,
                    session.remotes().count() + 1,
                    client.expected_players(),
                    session.local_diffs().count()
                )
            }
            ClientStatus::Rejected { reason } => format!("Rejected: {} (R to retry)", reason),
            ClientStatus::Ended { username, .. } => {
                format!("{} captured the flag! (R to play again)", username)
            }
        };
        draw_text(&line, 10.0, 20.0, 18.0, WHITE);
        draw_text(
            "WASD/arrows move, Space fires, Q drops the flag",
            10.0,
            screen_height() - 10.0,
            14.0,
            GRAY,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_viewport_flips_y() {
        let view = Viewport::fit(20.0, 800.0, 600.0);
        assert_approx_eq!(view.scale, 26.0, 1e-4);

        let (x, y) = view.to_screen(Vec2::new(0.0, 0.0));
        assert_approx_eq!(x, 140.0, 1e-3);
        assert_approx_eq!(y, 560.0, 1e-3);

        let (x, y) = view.to_screen(Vec2::new(20.0, 20.0));
        assert_approx_eq!(x, 660.0, 1e-3);
        assert_approx_eq!(y, 40.0, 1e-3);
    }

    #[test]
    fn test_viewport_never_degenerates() {
        let view = Viewport::fit(0.0, 10.0, 10.0);
        assert!(view.scale > 0.0);
        assert!(view.extent >= 1.0);
    }
}
