//! Keyboard sampling and press/release edge detection.

use macroquad::prelude::*;
use shared::Input;

/// Which movement directions are held this frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeldKeys {
    pub forward: bool,
    pub backward: bool,
    pub left: bool,
    pub right: bool,
}

/// Everything the player asked for in one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputFrame {
    pub inputs: Vec<Input>,
    pub fire: bool,
    pub drop_flag: bool,
}

/// Turns held-key samples into the press and release events the server
/// expects. Only changes are reported, so holding a key sends nothing.
#[derive(Debug, Default)]
pub struct KeyEdges {
    previous: HeldKeys,
}

impl KeyEdges {
    pub fn transitions(&mut self, held: HeldKeys) -> Vec<Input> {
        let pairs = [
            (self.previous.forward, held.forward, Input::ForwardPressed, Input::ForwardReleased),
            (self.previous.backward, held.backward, Input::BackwardPressed, Input::BackwardReleased),
            (self.previous.left, held.left, Input::LeftPressed, Input::LeftReleased),
            (self.previous.right, held.right, Input::RightPressed, Input::RightReleased),
        ];
        self.previous = held;

        pairs
            .into_iter()
            .filter_map(|(was, is, pressed, released)| match (was, is) {
                (false, true) => Some(pressed),
                (true, false) => Some(released),
                _ => None,
            })
            .collect()
    }

    /// Releases every held key, e.g. when the window loses the match.
    pub fn release_all(&mut self) -> Vec<Input> {
        self.transitions(HeldKeys::default())
    }
}

pub struct InputManager {
    edges: KeyEdges,
    prev_fire: bool,
    prev_drop: bool,
}

impl Default for InputManager {
    fn default() -> Self {
        Self::new()
    }
}

impl InputManager {
    pub fn new() -> Self {
        Self {
            edges: KeyEdges::default(),
            prev_fire: false,
            prev_drop: false,
        }
    }

    /// Samples the keyboard. WASD and the arrow keys both move, Space fires
    /// and Q drops the flag.
    pub fn update(&mut self) -> InputFrame {
        let held = HeldKeys {
            forward: is_key_down(KeyCode::W) || is_key_down(KeyCode::Up),
            backward: is_key_down(KeyCode::S) || is_key_down(KeyCode::Down),
            left: is_key_down(KeyCode::A) || is_key_down(KeyCode::Left),
            right: is_key_down(KeyCode::D) || is_key_down(KeyCode::Right),
        };
        let fire = is_key_down(KeyCode::Space) || is_mouse_button_down(MouseButton::Left);
        let drop_flag = is_key_down(KeyCode::Q);

        let frame = InputFrame {
            inputs: self.edges.transitions(held),
            fire: fire && !self.prev_fire,
            drop_flag: drop_flag && !self.prev_drop,
        };
        self.prev_fire = fire;
        self.prev_drop = drop_flag;
        frame
    }

    pub fn release_all(&mut self) -> Vec<Input> {
        self.edges.release_all()
    }
}
