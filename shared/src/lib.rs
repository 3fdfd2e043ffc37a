//! Code shared by the arena server and client: the timestamped state
//! algebra, the keyed-field wire protocol, the UDP I/O thread, and the
//! constants both sides must agree on for prediction to match simulation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod connection;
pub mod map;
pub mod state;
pub mod time_step;
pub mod transfer;

pub use connection::{ConnectionError, ConnectionStats, ConnectionThread};
pub use glam::Vec2;
pub use map::{Bolt, MapLayout, ProjectileSpawn, TileRecord};
pub use state::{
    heading_deg, Absolute, Delta, GameDelta, GameState, MotionDelta, MotionState, PlayerDelta,
    PlayerState,
};
pub use time_step::TimeStep;
pub use transfer::{Route, Transfer, TransferBuilder, TransferError, Value};

pub const DEFAULT_PORT: u16 = 7654;
pub const MAX_PLAYERS: usize = 4;

/// Top speed reached with a movement key held, in units per second.
pub const PLAYER_SPEED: f32 = 4.0;
/// Fraction of the velocity error left after one second of blending.
pub const VELOCITY_DAMPING: f32 = 0.01;
/// Longest step the integrator will take at once.
pub const MAX_STEP_DT: f64 = 0.1;
/// Below this speed the facing is left unchanged.
pub const MIN_FACING_SPEED: f32 = 0.01;

pub const PLAYER_RADIUS: f32 = 0.25;
pub const PROJECTILE_RADIUS: f32 = 0.1;
pub const HIT_RADIUS: f32 = PLAYER_RADIUS + PROJECTILE_RADIUS;
pub const PROJECTILE_SPEED: f32 = 10.0;
pub const PROJECTILE_LIFETIME: f64 = 2.0;

pub const MAX_ENERGY: f32 = 100.0;
pub const BULLET_ENERGY: f32 = 20.0;
pub const BOLT_ENERGY: f32 = 25.0;

pub const PICKUP_REACH: f32 = 0.6;
pub const SAFE_ZONE_RADIUS: f32 = 1.5;
pub const FREEZE_DURATION: f64 = 3.0;

/// One-byte message kind carried in every transfer's `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Hello = 1,
    FindRoom,
    FindRoomOk,
    FindRoomFail,
    NewPlayer,
    UpdateInput,
    FireGun,
    GlobalState,
    FlagPicked,
    FlagDropped,
    PlayerPickedFlag,
    PlayerDroppedFlag,
    BoltsSetup,
    BoltsUpdate,
    PlayerPickedBolt,
    FreezePlayer,
    ResumePlayer,
    GameEnd,
}

impl MessageType {
    const ALL: [MessageType; 18] = [
        MessageType::Hello,
        MessageType::FindRoom,
        MessageType::FindRoomOk,
        MessageType::FindRoomFail,
        MessageType::NewPlayer,
        MessageType::UpdateInput,
        MessageType::FireGun,
        MessageType::GlobalState,
        MessageType::FlagPicked,
        MessageType::FlagDropped,
        MessageType::PlayerPickedFlag,
        MessageType::PlayerDroppedFlag,
        MessageType::BoltsSetup,
        MessageType::BoltsUpdate,
        MessageType::PlayerPickedBolt,
        MessageType::FreezePlayer,
        MessageType::ResumePlayer,
        MessageType::GameEnd,
    ];
}

impl TryFrom<i64> for MessageType {
    type Error = TransferError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::ALL
            .iter()
            .copied()
            .find(|message| *message as i64 == value)
            .ok_or(TransferError::UnknownMessage(value))
    }
}

/// Inventory slot content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Item {
    #[default]
    Empty,
    Flag,
}

/// A movement key going down or up, as sent in `UPDATE_INPUT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    ForwardPressed,
    ForwardReleased,
    BackwardPressed,
    BackwardReleased,
    LeftPressed,
    LeftReleased,
    RightPressed,
    RightReleased,
}

impl Input {
    /// Contribution of this event to the held input axis.
    pub fn axis(self) -> Vec2 {
        match self {
            Input::ForwardPressed | Input::BackwardReleased => Vec2::new(0.0, 1.0),
            Input::ForwardReleased | Input::BackwardPressed => Vec2::new(0.0, -1.0),
            Input::RightPressed | Input::LeftReleased => Vec2::new(1.0, 0.0),
            Input::RightReleased | Input::LeftPressed => Vec2::new(-1.0, 0.0),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Input::ForwardPressed => "+forward",
            Input::ForwardReleased => "-forward",
            Input::BackwardPressed => "+backward",
            Input::BackwardReleased => "-backward",
            Input::LeftPressed => "+left",
            Input::LeftReleased => "-left",
            Input::RightPressed => "+right",
            Input::RightReleased => "-right",
        }
    }
}

impl FromStr for Input {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "+forward" => Ok(Input::ForwardPressed),
            "-forward" => Ok(Input::ForwardReleased),
            "+backward" => Ok(Input::BackwardPressed),
            "-backward" => Ok(Input::BackwardReleased),
            "+left" => Ok(Input::LeftPressed),
            "-left" => Ok(Input::LeftReleased),
            "+right" => Ok(Input::RightPressed),
            "-right" => Ok(Input::RightReleased),
            _ => Err(TransferError::WrongType {
                key: "input".to_string(),
                expected: "a movement input",
            }),
        }
    }
}

impl fmt::Display for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
