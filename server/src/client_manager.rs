//! Connected peer bookkeeping for the sync server
//!
//! Tracks which address belongs to which client, which replicated object
//! each client owns, and when each client was last heard from.

use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A connected peer
#[derive(Debug)]
pub struct Client {
    /// Unique client identifier assigned by the server
    pub id: u32,
    pub addr: SocketAddr,
    pub player_name: String,
    /// Last time we received any packet from this client
    pub last_seen: Instant,
    /// Highest sync sequence received from this client
    pub last_sequence: Option<u32>,
}

impl Client {
    pub fn new(id: u32, addr: SocketAddr, player_name: String) -> Self {
        Self {
            id,
            addr,
            player_name,
            last_seen: Instant::now(),
            last_sequence: None,
        }
    }

    /// Client id as it appears in authority checks and `senderId`
    pub fn authority_id(&self) -> String {
        self.id.to_string()
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// All connected clients, bounded by a capacity limit
pub struct ClientManager {
    clients: HashMap<u32, Client>,
    next_client_id: u32,
    max_clients: usize,
}

impl ClientManager {
    /// Client ids start from 1
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Returns the new client's id, or None if the server is full
    pub fn add_client(&mut self, addr: SocketAddr, player_name: String) -> Option<u32> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} ({}) connected from {}", client_id, player_name, addr);
        self.clients
            .insert(client_id, Client::new(client_id, addr, player_name));

        Some(client_id)
    }

    pub fn remove_client(&mut self, client_id: &u32) -> bool {
        if let Some(client) = self.clients.remove(client_id) {
            info!("Client {} disconnected", client.id);
            true
        } else {
            false
        }
    }

    pub fn get(&self, client_id: u32) -> Option<&Client> {
        self.clients.get(&client_id)
    }

    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<u32> {
        self.clients
            .iter()
            .find(|(_, client)| client.addr == addr)
            .map(|(id, _)| *id)
    }

    /// Marks the client as alive
    pub fn touch(&mut self, client_id: u32) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.last_seen = Instant::now();
        }
    }

    /// Records an incoming sync sequence. Returns false for a sequence at or
    /// behind the last one seen, allowing for wraparound.
    pub fn accept_sequence(&mut self, client_id: u32, sequence: u32) -> bool {
        let Some(client) = self.clients.get_mut(&client_id) else {
            return false;
        };
        let fresh = match client.last_sequence {
            None => true,
            Some(last) => {
                let ahead = sequence.wrapping_sub(last);
                ahead != 0 && ahead < u32::MAX / 2
            }
        };
        if fresh {
            client.last_sequence = Some(sequence);
        }
        fresh
    }

    /// Removes and returns clients silent for longer than `timeout`
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<u32> {
        let timed_out: Vec<u32> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        for client_id in &timed_out {
            self.remove_client(client_id);
        }

        timed_out
    }

    pub fn get_client_addrs(&self) -> Vec<(u32, SocketAddr)> {
        self.clients
            .iter()
            .map(|(id, client)| (*id, client.addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    #[test]
    fn test_client_creation() {
        let client = Client::new(1, test_addr(), "Hero".to_string());

        assert_eq!(client.id, 1);
        assert_eq!(client.addr, test_addr());
        assert_eq!(client.authority_id(), "1");
        assert!(client.last_sequence.is_none());
    }

    #[test]
    fn test_client_timeout() {
        let mut client = Client::new(1, test_addr(), "Hero".to_string());

        assert!(!client.is_timed_out(Duration::from_secs(1)));

        client.last_seen = Instant::now() - Duration::from_secs(2);

        assert!(client.is_timed_out(Duration::from_secs(1)));
    }

    #[test]
    fn test_add_multiple_clients() {
        let mut manager = ClientManager::new(3);

        let client_id1 = manager.add_client(test_addr(), "A".to_string()).unwrap();
        let client_id2 = manager.add_client(test_addr2(), "B".to_string()).unwrap();

        assert_eq!(client_id1, 1);
        assert_eq!(client_id2, 2);
        assert_eq!(manager.len(), 2);
        assert_eq!(manager.get(2).unwrap().player_name, "B");
    }

    #[test]
    fn test_add_client_max_capacity() {
        let mut manager = ClientManager::new(1);

        assert!(manager.add_client(test_addr(), "A".to_string()).is_some());
        assert!(manager.add_client(test_addr2(), "B".to_string()).is_none());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_remove_client() {
        let mut manager = ClientManager::new(2);
        let client_id = manager.add_client(test_addr(), "A".to_string()).unwrap();

        assert!(manager.remove_client(&client_id));
        assert!(!manager.remove_client(&client_id));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_find_client_by_addr() {
        let mut manager = ClientManager::new(2);
        let client_id1 = manager.add_client(test_addr(), "A".to_string()).unwrap();
        manager.add_client(test_addr2(), "B".to_string()).unwrap();

        assert_eq!(manager.find_client_by_addr(test_addr()), Some(client_id1));

        let unknown_addr: SocketAddr = "192.168.1.1:9999".parse().unwrap();
        assert_eq!(manager.find_client_by_addr(unknown_addr), None);
    }

    #[test]
    fn test_sequence_tracking() {
        let mut manager = ClientManager::new(2);
        let id = manager.add_client(test_addr(), "A".to_string()).unwrap();

        assert!(manager.accept_sequence(id, 5));
        assert!(!manager.accept_sequence(id, 5));
        assert!(!manager.accept_sequence(id, 4));
        assert!(manager.accept_sequence(id, 6));

        assert!(!manager.accept_sequence(99, 1));

        let wrapping = manager.add_client(test_addr2(), "B".to_string()).unwrap();
        assert!(manager.accept_sequence(wrapping, u32::MAX - 1));
        assert!(manager.accept_sequence(wrapping, u32::MAX));
        assert!(manager.accept_sequence(wrapping, 0));
        assert!(!manager.accept_sequence(wrapping, u32::MAX));
    }

    #[test]
    fn test_check_timeouts_removes_silent_clients() {
        let mut manager = ClientManager::new(2);
        let quiet = manager.add_client(test_addr(), "A".to_string()).unwrap();
        let active = manager.add_client(test_addr2(), "B".to_string()).unwrap();

        manager.clients.get_mut(&quiet).unwrap().last_seen =
            Instant::now() - Duration::from_secs(10);

        assert_eq!(manager.check_timeouts(CLIENT_TIMEOUT), vec![quiet]);
        assert!(manager.get(active).is_some());
        assert_eq!(manager.len(), 1);
    }
}
