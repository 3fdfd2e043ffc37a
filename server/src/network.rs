//! Server network layer: pairs the room with its UDP I/O thread and drives
//! the fixed-rate simulation loop.

use crate::accounts::AccountStore;
use crate::config::ServerConfig;
use crate::map::MapGenerator;
use crate::room::Room;
use log::{debug, info};
use shared::{ConnectionError, ConnectionStats, ConnectionThread};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::time::{interval, MissedTickBehavior};

/// Main server coordinating networking and game simulation
pub struct Server {
    connection: ConnectionThread,
    room: Room,
    tick_duration: Duration,
    started: Instant,
    frames: u64,
}

impl Server {
    pub fn new(
        config: ServerConfig,
        maps: Box<dyn MapGenerator>,
        accounts: Box<dyn AccountStore>,
    ) -> Result<Self, ConnectionError> {
        let connection = ConnectionThread::bind(config.addr)?;
        info!("Server listening on {}", connection.local_addr());

        let tick_duration = config.tick_duration();
        Ok(Server {
            connection,
            room: Room::new(config, maps, accounts, 0.0),
            tick_duration,
            started: Instant::now(),
            frames: 0,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.connection.local_addr()
    }

    pub fn room(&self) -> &Room {
        &self.room
    }

    /// Seconds since the server started; the clock every client syncs to.
    pub fn now(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// One frame: handle everything received, advance the simulation, and
    /// queue the results for sending. Returns the number of transfers queued.
    pub fn step(&mut self) -> usize {
        let now = self.now();
        let mut outgoing = Vec::new();
        for transfer in self.connection.drain_incoming() {
            outgoing.extend(self.room.handle(&transfer, now));
        }
        outgoing.extend(self.room.tick(now));

        let queued = outgoing.len();
        for transfer in outgoing {
            self.connection.enqueue(transfer);
        }

        self.frames += 1;
        if self.frames % 600 == 0 {
            let stats = self.connection.stats();
            debug!(
                "Frame {}: {} players, {} received, {} sent, {} dropped",
                self.frames,
                self.room.clients().len(),
                stats.received,
                stats.sent,
                stats.dropped
            );
        }
        queued
    }

    /// Runs the simulation at the configured tick rate until the task is
    /// cancelled.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Server started, ticking every {:.2}ms",
            self.tick_duration.as_secs_f64() * 1000.0
        );

        loop {
            tick_interval.tick().await;
            self.step();
        }
    }

    /// Flushes queued sends and stops the I/O thread.
    pub fn shutdown(self) -> ConnectionStats {
        info!("Server shutting down");
        self.connection.shutdown()
    }
}
