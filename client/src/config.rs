use shared::DEFAULT_PORT;
use std::net::SocketAddr;

/// Seconds between snapshots at the server's default rates.
const DEFAULT_SNAPSHOT_INTERVAL: f64 = 3.0 / 60.0;

/// Tuning of the client synchronization loop.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server: SocketAddr,
    pub username: String,
    /// Share of the prediction error corrected on a frame with a snapshot.
    pub lerp_factor: f32,
    /// Share corrected on frames without one.
    pub drift_factor: f32,
    /// How far in the past remote players are rendered, in seconds.
    pub interpolation_delay: f64,
    /// Snapshots kept for remote interpolation.
    pub snapshot_capacity: usize,
    /// Seconds between unanswered room requests.
    pub find_room_retry: f64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            username: "player".to_string(),
            lerp_factor: 0.2,
            drift_factor: 0.02,
            interpolation_delay: 2.0 * DEFAULT_SNAPSHOT_INTERVAL,
            snapshot_capacity: 5,
            find_room_retry: 1.0,
        }
    }
}
