//! Client network layer: owns the UDP I/O thread, turns received transfers
//! into session and arena updates, and sends the player's actions.

use crate::arena::{Arena, PhysicsEvent};
use crate::config::ClientConfig;
use crate::game::{ClientClock, ClientSession};
use crate::input::InputFrame;
use log::{debug, info, warn};
use shared::transfer::TYPE_KEY;
use shared::{
    Bolt, ConnectionError, ConnectionStats, ConnectionThread, GameState, Input, Item, MapLayout,
    MessageType, PlayerState, ProjectileSpawn, Transfer, TransferBuilder, TransferError, Vec2,
    BULLET_ENERGY,
};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Instant;

/// Seconds between repeated flag pickup requests while standing on it.
const FLAG_REQUEST_INTERVAL: f64 = 0.25;

#[derive(Debug, Clone, PartialEq)]
pub enum ClientStatus {
    /// Waiting for the server to answer FIND_ROOM.
    Searching,
    Joined { id: String, slot: usize },
    Rejected { reason: String },
    Ended { winner: String, username: String },
}

pub struct Client {
    config: ClientConfig,
    connection: ConnectionThread,
    builder: TransferBuilder,
    session: ClientSession,
    arena: Arena,
    clock: ClientClock,
    started: Instant,
    status: ClientStatus,
    expected_players: usize,
    last_find_room: Option<f64>,
    last_flag_request: Option<f64>,
    requested_bolts: HashSet<String>,
    /// Snapshots received since the last session frame.
    pending_snapshots: Vec<GameState>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self, ConnectionError> {
        let unspecified = match config.server.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let connection = ConnectionThread::bind(SocketAddr::new(unspecified, 0))?;
        info!(
            "Client bound to {}, server is {}",
            connection.local_addr(),
            config.server
        );

        let mut client = Client {
            session: ClientSession::new(&config),
            config,
            connection,
            builder: TransferBuilder::new(),
            arena: Arena::new(),
            clock: ClientClock::default(),
            started: Instant::now(),
            status: ClientStatus::Searching,
            expected_players: 0,
            last_find_room: None,
            last_flag_request: None,
            requested_bolts: HashSet::new(),
            pending_snapshots: Vec::new(),
        };

        client.builder.add(TYPE_KEY, MessageType::Hello);
        client.send();
        Ok(client)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.connection.local_addr()
    }

    pub fn status(&self) -> &ClientStatus {
        &self.status
    }

    pub fn session(&self) -> &ClientSession {
        &self.session
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn expected_players(&self) -> usize {
        self.expected_players
    }

    /// Seconds since the client started.
    pub fn local_time(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Current estimate of the server clock.
    pub fn server_time(&self) -> f64 {
        self.clock.now(self.local_time())
    }

    /// Starts looking for a room again after a rejection or a finished match.
    pub fn search_again(&mut self) {
        if matches!(self.status, ClientStatus::Joined { .. }) {
            return;
        }
        info!("Searching for a room");
        self.status = ClientStatus::Searching;
        self.last_find_room = None;
    }

    /// One render frame.
    pub fn frame(&mut self, input: &InputFrame) {
        let local = self.local_time();
        self.step(local, input);
    }

    /// One frame at local time `local`.
    pub fn step(&mut self, local: f64, input: &InputFrame) {
        if self.status == ClientStatus::Searching {
            self.find_room(local);
        }

        for transfer in self.connection.drain_incoming() {
            if transfer.source() != Some(self.config.server) {
                warn!("Dropping transfer from unexpected sender {:?}", transfer.source());
                continue;
            }
            if let Err(e) = self.handle(&transfer, local) {
                warn!("Failed to handle transfer from server: {}", e);
                self.builder.cleanup();
            }
        }

        if !matches!(self.status, ClientStatus::Joined { .. }) {
            self.pending_snapshots.clear();
            return;
        }

        let now = self.clock.now(local);
        for &event in &input.inputs {
            self.send_input(event);
        }
        self.session.frame(now, self.pending_snapshots.drain(..));
        self.arena.advance(now);

        let events = self.arena.detect(self.session.predicted(), now);
        for event in events {
            self.on_physics_event(event, now);
        }

        if input.fire {
            self.fire(now);
        }
        if input.drop_flag {
            self.drop_flag();
        }
    }

    fn find_room(&mut self, local: f64) {
        let due = self
            .last_find_room
            .map_or(true, |last| local - last >= self.config.find_room_retry);
        if !due {
            return;
        }
        debug!("Requesting a room as {}", self.config.username);
        self.last_find_room = Some(local);
        self.builder
            .add(TYPE_KEY, MessageType::FindRoom)
            .add("username", self.config.username.as_str());
        self.send();
    }

    fn handle(&mut self, transfer: &Transfer, local: f64) -> Result<(), TransferError> {
        match transfer.message_type()? {
            MessageType::FindRoomOk => {
                let id = transfer.get_str("id")?.to_string();
                let slot = transfer.get_int("slot")?.max(0) as usize;
                let map: MapLayout = transfer.get_decoded("map")?;
                let players: Vec<PlayerState> = transfer.get_decoded("players")?;

                if self.status
                    == (ClientStatus::Joined {
                        id: id.clone(),
                        slot,
                    })
                {
                    debug!("Room config repeated, already joined");
                    return Ok(());
                }

                self.clock.sync(transfer.get_float("time")?, local);
                self.expected_players = transfer.get_int("player_count")?.max(0) as usize;
                info!(
                    "Joined room as player {} in slot {} with {} players",
                    id,
                    slot,
                    players.len()
                );
                self.arena.setup(map, slot);
                self.session.join(&id, players);
                self.requested_bolts.clear();
                self.last_flag_request = None;
                self.status = ClientStatus::Joined { id, slot };
            }
            MessageType::FindRoomFail => {
                let reason = transfer.get_str("reason")?.to_string();
                warn!("Server refused to find a room: {}", reason);
                self.status = ClientStatus::Rejected { reason };
            }
            MessageType::NewPlayer => {
                let player: PlayerState = transfer.get_decoded("player")?;
                self.session.add_player(player);
            }
            MessageType::GlobalState => {
                let state: GameState = transfer.get_decoded("state")?;
                let projectiles: Vec<ProjectileSpawn> = transfer.get_decoded("projectiles")?;
                self.clock.observe(state.step.end, local);
                for spawn in projectiles {
                    self.arena.spawn(spawn);
                }
                self.pending_snapshots.push(state);
            }
            MessageType::PlayerPickedFlag => {
                let player = transfer.get_str("player")?;
                info!("Player {} picked up the flag", player);
                self.arena.flag_picked(player);
            }
            MessageType::PlayerDroppedFlag => {
                let player = transfer.get_str("player")?;
                let position = Vec2::new(
                    transfer.get_float("x")? as f32,
                    transfer.get_float("y")? as f32,
                );
                info!("Player {} dropped the flag", player);
                self.arena.flag_dropped(position);
            }
            MessageType::BoltsSetup => {
                let bolts: Vec<Bolt> = transfer.get_decoded("bolts")?;
                self.requested_bolts.clear();
                self.arena.set_bolts(bolts);
            }
            MessageType::BoltsUpdate => {
                let old = transfer.get_str("old_bolt")?;
                let new: Bolt = transfer.get_decoded("new_bolt")?;
                self.requested_bolts.remove(old);
                self.arena.replace_bolt(old, new);
            }
            MessageType::FreezePlayer => {
                let player = transfer.get_str("player")?;
                info!("Player {} frozen by {}", player, transfer.get_str("by")?);
                self.session.set_frozen(player, true);
            }
            MessageType::ResumePlayer => {
                let player = transfer.get_str("player")?;
                self.session.set_frozen(player, false);
            }
            MessageType::GameEnd => {
                let winner = transfer.get_str("winner")?.to_string();
                let username = transfer.get_str("username")?.to_string();
                info!("Game over, {} ({}) captured the flag", username, winner);
                self.session.reset();
                self.arena.reset();
                self.pending_snapshots.clear();
                self.status = ClientStatus::Ended { winner, username };
            }
            other => warn!("Unexpected {:?} from server", other),
        }
        Ok(())
    }

    fn on_physics_event(&mut self, event: PhysicsEvent, now: f64) {
        match event {
            PhysicsEvent::FlagInReach => {
                let due = self
                    .last_flag_request
                    .map_or(true, |last| now - last >= FLAG_REQUEST_INTERVAL);
                if due {
                    self.last_flag_request = Some(now);
                    self.builder.add(TYPE_KEY, MessageType::FlagPicked);
                    self.send();
                }
            }
            PhysicsEvent::BoltTouched { id } => {
                if self.requested_bolts.insert(id.clone()) {
                    debug!("Picking bolt {}", id);
                    self.builder
                        .add(TYPE_KEY, MessageType::PlayerPickedBolt)
                        .add("bolt_id", id);
                    self.send();
                }
            }
            PhysicsEvent::ProjectileHitWall { id } => {
                debug!("Projectile {} left the arena", id);
            }
            PhysicsEvent::EnteredSafeZone => {
                info!("Flag brought home, waiting for the server to confirm");
            }
        }
    }

    fn send_input(&mut self, input: Input) {
        self.session.update_input(input);
        self.builder
            .add(TYPE_KEY, MessageType::UpdateInput)
            .add("input", input.as_str());
        self.send();
    }

    /// Fires along the predicted facing, stamped with the time the shooter
    /// was looking at.
    fn fire(&mut self, now: f64) {
        let Some(player) = self.session.predicted() else {
            return;
        };
        if player.frozen || player.energy < BULLET_ENERGY {
            debug!("Cannot fire right now");
            return;
        }
        let (id, position, direction) = (
            player.id.clone(),
            player.position(),
            player.motion.direction,
        );

        self.builder
            .add(TYPE_KEY, MessageType::FireGun)
            .add("timestamp", now - self.session.interpolation_delay())
            .add("x", direction.x)
            .add("y", direction.y);
        self.send();
        self.arena.spawn_local(&id, position, direction, now);
    }

    fn drop_flag(&mut self) {
        let holding = self
            .session
            .predicted()
            .is_some_and(|player| player.slot == Item::Flag);
        if holding {
            self.builder.add(TYPE_KEY, MessageType::FlagDropped);
            self.send();
        }
    }

    /// Encodes the staged fields for the server and queues them.
    fn send(&mut self) {
        self.builder.set_destination(self.config.server);
        match self.builder.encode(true) {
            Ok(transfer) => self.connection.enqueue(transfer),
            Err(e) => warn!("Failed to encode transfer: {}", e),
        }
    }

    /// Releases held keys on the server and stops the I/O thread.
    pub fn shutdown(mut self) -> ConnectionStats {
        info!("Client shutting down");
        if matches!(self.status, ClientStatus::Joined { .. }) {
            for input in [
                Input::ForwardReleased,
                Input::BackwardReleased,
                Input::LeftReleased,
                Input::RightReleased,
            ] {
                self.builder
                    .add(TYPE_KEY, MessageType::UpdateInput)
                    .add("input", input.as_str());
                self.send();
            }
        }
        self.connection.shutdown()
    }
}
