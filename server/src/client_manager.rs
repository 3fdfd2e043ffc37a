//! Roster of the players admitted to the room.
//!
//! Clients are identified by the address their datagrams come from; there is
//! no connection object on a UDP transport. Each admitted client gets a
//! server-assigned id and a spawn slot that decides their start position and
//! safe zone.

use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;

/// One admitted client.
#[derive(Debug, Clone)]
pub struct Client {
    pub id: String,
    pub addr: SocketAddr,
    pub username: String,
    /// Index into the map's spawn points.
    pub slot: usize,
}

/// Admitted clients, capped at `max_clients`.
pub struct ClientManager {
    clients: HashMap<SocketAddr, Client>,
    next_client_id: u32,
    max_clients: usize,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Admits a new address. Returns `None` when the room is full or the
    /// address is already admitted.
    pub fn add_client(&mut self, addr: SocketAddr, username: &str) -> Option<&Client> {
        if self.is_full() || self.clients.contains_key(&addr) {
            return None;
        }

        let slot = (0..self.max_clients)
            .find(|slot| self.clients.values().all(|client| client.slot != *slot))?;
        let id = self.next_client_id.to_string();
        self.next_client_id += 1;

        info!("Client {} ({}) joined from {} in slot {}", id, username, addr, slot);
        let client = Client {
            id,
            addr,
            username: username.to_string(),
            slot,
        };
        Some(self.clients.entry(addr).or_insert(client))
    }

    pub fn get(&self, addr: &SocketAddr) -> Option<&Client> {
        self.clients.get(addr)
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Client> {
        self.clients.values().find(|client| client.id == id)
    }

    pub fn get_client_addrs(&self) -> Vec<SocketAddr> {
        self.clients.keys().copied().collect()
    }

    pub fn clients(&self) -> impl Iterator<Item = &Client> {
        self.clients.values()
    }

    pub fn clear(&mut self) {
        self.clients.clear();
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.clients.len() >= self.max_clients
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }
}
