//! # Arena Client Library
//!
//! Client side of the arena game: samples input, predicts the local player,
//! reconciles against the server's snapshots, interpolates everyone else,
//! and draws the result.
//!
//! ## Module Organization
//!
//! - `config`: tuning of the synchronization loop
//! - `game`: prediction, reconciliation and remote interpolation
//! - `arena`: bolts, flag and projectiles, plus the local proximity checks
//! - `input`: keyboard sampling and press/release edges
//! - `network`: the UDP I/O thread and message handling
//! - `rendering`: macroquad drawing
//!
//! The local player is rendered from its prediction, which moves as soon
//! as a key goes down. A second copy tracks what the server would have
//! computed and the prediction is pulled toward it every frame, gently
//! between snapshots and harder when one arrives. Remote players are drawn
//! a fixed delay in the past by cutting the diff between the two buffered
//! snapshots that bracket that moment.

pub mod arena;
pub mod config;
pub mod game;
pub mod input;
pub mod network;
pub mod rendering;
