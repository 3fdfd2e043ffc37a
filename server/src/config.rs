use shared::{DEFAULT_PORT, MAX_PLAYERS};
use std::net::SocketAddr;
use std::time::Duration;

/// Runtime settings of one server process.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// Simulation steps per second.
    pub tick_rate: u32,
    /// A snapshot is broadcast every `broadcast_divisor` steps.
    pub broadcast_divisor: u32,
    pub max_players: usize,
    /// Tiles per map side.
    pub map_size: u32,
    /// Trailing window of snapshots kept for lag compensation, in seconds.
    pub history_window: f64,
    /// Energy bolts on the map at any time.
    pub bolt_count: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            tick_rate: 60,
            broadcast_divisor: 3,
            max_players: MAX_PLAYERS,
            map_size: 10,
            history_window: 0.5,
            bolt_count: 5,
        }
    }
}

impl ServerConfig {
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.addr.port(), 7654);
        assert_eq!(config.max_players, 4);
        assert_eq!(config.broadcast_divisor, 3);
        assert_eq!(config.tick_duration(), Duration::from_secs_f64(1.0 / 60.0));
    }

    #[test]
    fn test_zero_tick_rate_does_not_divide_by_zero() {
        let config = ServerConfig {
            tick_rate: 0,
            ..ServerConfig::default()
        };
        assert_eq!(config.tick_duration(), Duration::from_secs(1));
    }
}
