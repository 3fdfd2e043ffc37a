//! One match: the roster, the world, its snapshot history, and the message
//! handlers that connect them to the wire.
//!
//! Everything here is synchronous and single threaded. The caller feeds in
//! received transfers and the current server time; every method returns the
//! transfers to send.

use crate::accounts::AccountStore;
use crate::client_manager::ClientManager;
use crate::config::ServerConfig;
use crate::game::{World, WorldEvent};
use crate::lag_compensation::{History, Shot};
use crate::map::MapGenerator;
use log::{debug, info, warn};
use shared::transfer::TYPE_KEY;
use shared::{
    Bolt, Input, MessageType, PlayerState, ProjectileSpawn, Transfer, TransferBuilder,
    TransferError, Vec2,
};
use std::net::SocketAddr;

/// Events that wait for the next snapshot broadcast.
#[derive(Debug, Clone)]
enum Pending {
    Projectile(ProjectileSpawn),
    BoltReplaced { old: String, new: Bolt },
}

pub struct Room {
    config: ServerConfig,
    clients: ClientManager,
    world: World,
    history: History,
    builder: TransferBuilder,
    maps: Box<dyn MapGenerator>,
    accounts: Box<dyn AccountStore>,
    pending: Vec<Pending>,
    frame: u64,
}

type Outgoing = Result<Vec<Transfer>, TransferError>;

impl Room {
    pub fn new(
        config: ServerConfig,
        mut maps: Box<dyn MapGenerator>,
        accounts: Box<dyn AccountStore>,
        now: f64,
    ) -> Self {
        let world = World::generate(
            maps.as_mut(),
            config.map_size,
            config.max_players,
            config.bolt_count,
            now,
        );
        Self {
            clients: ClientManager::new(config.max_players),
            history: History::new(config.history_window),
            config,
            world,
            builder: TransferBuilder::new(),
            maps,
            accounts,
            pending: Vec::new(),
            frame: 0,
        }
    }

    pub fn clients(&self) -> &ClientManager {
        &self.clients
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn accounts(&self) -> &dyn AccountStore {
        self.accounts.as_ref()
    }

    #[cfg(test)]
    pub(crate) fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// Dispatches one received transfer.
    pub fn handle(&mut self, transfer: &Transfer, now: f64) -> Vec<Transfer> {
        let Some(addr) = transfer.source() else {
            warn!("Ignoring transfer without a source address");
            return Vec::new();
        };

        let result = match transfer.message_type() {
            Ok(MessageType::Hello) => {
                info!("Hello from {}", addr);
                Ok(Vec::new())
            }
            Ok(MessageType::FindRoom) => self.on_find_room(transfer, addr, now),
            Ok(message) => match self.clients.get(&addr).map(|client| client.id.clone()) {
                Some(id) => self.on_player_message(message, transfer, &id, now),
                None => {
                    warn!("Dropping {:?} from unknown sender {}", message, addr);
                    Ok(Vec::new())
                }
            },
            Err(e) => Err(e),
        };

        result.unwrap_or_else(|e| {
            warn!("Failed to handle transfer from {}: {}", addr, e);
            self.builder.cleanup();
            Vec::new()
        })
    }

    fn on_player_message(
        &mut self,
        message: MessageType,
        transfer: &Transfer,
        id: &str,
        now: f64,
    ) -> Outgoing {
        match message {
            MessageType::UpdateInput => {
                let input: Input = transfer.get_str("input")?.parse()?;
                self.world.apply_input(id, input);
                Ok(Vec::new())
            }
            MessageType::FireGun => self.on_fire_gun(transfer, id, now),
            MessageType::FlagPicked => {
                if !self.world.pick_flag(id) {
                    return Ok(Vec::new());
                }
                self.builder
                    .add(TYPE_KEY, MessageType::PlayerPickedFlag)
                    .add("player", id);
                self.broadcast()
            }
            MessageType::FlagDropped => match self.world.drop_flag(id) {
                Some(position) => self.flag_dropped(id, position),
                None => Ok(Vec::new()),
            },
            MessageType::PlayerPickedBolt => {
                let bolt_id = transfer.get_str("bolt_id")?;
                match self.world.pick_bolt(id, bolt_id, self.maps.as_mut()) {
                    Some(new) => {
                        debug!("Player {} picked bolt {}", id, bolt_id);
                        self.pending.push(Pending::BoltReplaced {
                            old: bolt_id.to_string(),
                            new,
                        });
                    }
                    None => debug!("Bolt {} is already gone", bolt_id),
                }
                Ok(Vec::new())
            }
            other => {
                warn!("Unexpected {:?} from player {}", other, id);
                Ok(Vec::new())
            }
        }
    }

    fn on_find_room(&mut self, transfer: &Transfer, addr: SocketAddr, now: f64) -> Outgoing {
        if let Some(client) = self.clients.get(&addr) {
            info!("Resending room config to player {}", client.id);
            let (id, slot) = (client.id.clone(), client.slot);
            return Ok(vec![self.room_config(addr, &id, slot, now)?]);
        }

        if self.clients.is_full() {
            info!("Room is full, rejecting {}", addr);
            self.builder
                .add(TYPE_KEY, MessageType::FindRoomFail)
                .add("reason", "room is full")
                .set_destination(addr);
            return Ok(vec![self.builder.encode(true)?]);
        }

        let username = transfer.get_str("username")?;
        let Some(client) = self.clients.add_client(addr, username) else {
            return Ok(Vec::new());
        };
        let (id, slot) = (client.id.clone(), client.slot);
        self.accounts.login_or_create(username);
        let player = self.world.add_player(&id, username, slot, now).clone();

        let mut out = vec![self.room_config(addr, &id, slot, now)?];

        if let Some(holder) = self.world.flag().holder.clone() {
            self.builder
                .add(TYPE_KEY, MessageType::PlayerPickedFlag)
                .add("player", holder)
                .set_destination(addr);
            out.push(self.builder.encode(true)?);
        }

        self.builder
            .add(TYPE_KEY, MessageType::BoltsSetup)
            .add_encoded("bolts", &self.world.bolts().to_vec())?
            .set_destination(addr);
        out.push(self.builder.encode(true)?);

        let others: Vec<SocketAddr> = self
            .clients
            .get_client_addrs()
            .into_iter()
            .filter(|other| *other != addr)
            .collect();
        self.builder
            .add(TYPE_KEY, MessageType::NewPlayer)
            .add("id", id.as_str())
            .add("slot", slot)
            .add_encoded("player", &player)?;
        out.extend(self.builder.encode_for_all(others)?);

        Ok(out)
    }

    fn room_config(
        &mut self,
        addr: SocketAddr,
        id: &str,
        slot: usize,
        now: f64,
    ) -> Result<Transfer, TransferError> {
        let players: Vec<PlayerState> = self.world.players().cloned().collect();
        self.builder
            .add(TYPE_KEY, MessageType::FindRoomOk)
            .add("id", id)
            .add("slot", slot)
            .add("time", now)
            .add("player_count", self.clients.max_clients())
            .add_encoded("map", self.world.map())?
            .add_encoded("players", &players)?
            .set_destination(addr);
        self.builder.encode(true)
    }

    fn on_fire_gun(&mut self, transfer: &Transfer, id: &str, now: f64) -> Outgoing {
        let timestamp = transfer.get_float("timestamp")?;
        let direction = Vec2::new(
            transfer.get_float("x")? as f32,
            transfer.get_float("y")? as f32,
        );
        if !self.world.spend_shot(id) {
            debug!("Player {} cannot fire", id);
            return Ok(Vec::new());
        }

        let shot = Shot {
            shooter: id,
            direction,
            timestamp,
        };
        let Some(replay) = self.history.rewind(&shot) else {
            return Ok(Vec::new());
        };

        let projectile = if replay.hits.is_empty() {
            self.world
                .launch(id, replay.position, replay.direction, replay.age)
        } else {
            self.world.next_projectile_id()
        };
        self.pending.push(Pending::Projectile(ProjectileSpawn {
            id: projectile,
            owner: id.to_string(),
            position: replay.origin,
            direction: replay.direction,
            timestamp,
        }));

        let mut out = Vec::new();
        for target in &replay.hits {
            info!("Player {} hit player {}", id, target);
            out.extend(self.freeze(id, target, now)?);
        }
        Ok(out)
    }

    fn freeze(&mut self, shooter: &str, target: &str, now: f64) -> Outgoing {
        let dropped = self.world.freeze(target, now);
        self.builder
            .add(TYPE_KEY, MessageType::FreezePlayer)
            .add("player", target)
            .add("by", shooter);
        let mut out = self.broadcast()?;
        if let Some(position) = dropped {
            out.extend(self.flag_dropped(target, position)?);
        }
        Ok(out)
    }

    fn flag_dropped(&mut self, id: &str, position: Vec2) -> Outgoing {
        self.builder
            .add(TYPE_KEY, MessageType::PlayerDroppedFlag)
            .add("player", id)
            .add("x", position.x)
            .add("y", position.y);
        self.broadcast()
    }

    fn broadcast(&mut self) -> Outgoing {
        let addrs = self.clients.get_client_addrs();
        self.builder.encode_for_all(addrs)
    }

    /// One simulation step at server time `now`.
    pub fn tick(&mut self, now: f64) -> Vec<Transfer> {
        match self.step(now) {
            Ok(out) => out,
            Err(e) => {
                warn!("Failed to encode outgoing transfers: {}", e);
                self.builder.cleanup();
                Vec::new()
            }
        }
    }

    fn step(&mut self, now: f64) -> Outgoing {
        let mut out = Vec::new();
        for event in self.world.step(now) {
            match event {
                WorldEvent::ProjectileHit {
                    projectile,
                    shooter,
                    target,
                } => {
                    info!("Projectile {} from {} hit {}", projectile, shooter, target);
                    out.extend(self.freeze(&shooter, &target, now)?);
                }
                WorldEvent::ProjectileHitWall { projectile } => {
                    debug!("Projectile {} hit a wall", projectile);
                }
                WorldEvent::ProjectileExpired { projectile } => {
                    debug!("Projectile {} expired", projectile);
                }
                WorldEvent::PlayerResumed { id } => {
                    self.builder
                        .add(TYPE_KEY, MessageType::ResumePlayer)
                        .add("player", id);
                    out.extend(self.broadcast()?);
                }
                WorldEvent::FlagCaptured { id } => {
                    out.extend(self.end_game(&id, now)?);
                    return Ok(out);
                }
            }
        }

        self.history.push(self.world.snapshot(now));
        self.history.trim(now);

        self.frame += 1;
        if self.frame % u64::from(self.config.broadcast_divisor.max(1)) == 0 {
            out.extend(self.broadcast_state(now)?);
        }
        Ok(out)
    }

    /// Sends the full snapshot to every player, with the queued events each
    /// of them has not caused themselves.
    fn broadcast_state(&mut self, now: f64) -> Outgoing {
        if self.clients.is_empty() {
            self.pending.clear();
            return Ok(Vec::new());
        }

        let snapshot = self.world.snapshot(now);
        let pending = std::mem::take(&mut self.pending);
        let recipients: Vec<(String, SocketAddr)> = self
            .clients
            .clients()
            .map(|client| (client.id.clone(), client.addr))
            .collect();

        let mut out = Vec::with_capacity(recipients.len());
        for (id, addr) in recipients {
            let projectiles: Vec<&ProjectileSpawn> = pending
                .iter()
                .filter_map(|event| match event {
                    Pending::Projectile(spawn) if spawn.owner != id => Some(spawn),
                    _ => None,
                })
                .collect();
            self.builder
                .add(TYPE_KEY, MessageType::GlobalState)
                .add_encoded("state", &snapshot)?
                .add_encoded("projectiles", &projectiles)?
                .set_destination(addr);
            out.push(self.builder.encode(true)?);
        }

        for event in pending {
            if let Pending::BoltReplaced { old, new } = event {
                self.builder
                    .add(TYPE_KEY, MessageType::BoltsUpdate)
                    .add("old_bolt", old)
                    .add_encoded("new_bolt", &new)?;
                out.extend(self.broadcast()?);
            }
        }
        Ok(out)
    }

    fn end_game(&mut self, winner: &str, now: f64) -> Outgoing {
        let username = self
            .clients
            .find_by_id(winner)
            .map(|client| client.username.clone())
            .unwrap_or_default();
        info!("Player {} ({}) captured the flag", winner, username);

        for client in self.clients.clients() {
            if client.id == winner {
                self.accounts.record_win(&client.username);
            } else {
                self.accounts.record_loss(&client.username);
            }
        }

        self.builder
            .add(TYPE_KEY, MessageType::GameEnd)
            .add("winner", winner)
            .add("username", username);
        let out = self.broadcast()?;

        self.reset(now);
        Ok(out)
    }

    /// Clears the roster and starts over on a fresh map.
    pub fn reset(&mut self, now: f64) {
        info!("Resetting room");
        self.clients.clear();
        self.history.clear();
        self.pending.clear();
        self.frame = 0;
        self.world = World::generate(
            self.maps.as_mut(),
            self.config.map_size,
            self.config.max_players,
            self.config.bolt_count,
            now,
        );
    }
}
