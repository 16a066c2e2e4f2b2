//! Transport boundary
//!
//! Delivery, ordering, and retries belong to the transport. This crate only
//! hands it encoded [`crate::SyncMessage`] bytes and accepts bytes back.

use crate::error::TransportError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const PROTOCOL_VERSION: u32 = 1;

/// UDP envelope exchanged by the server and client binaries. Sync payloads
/// are encoded [`crate::SyncMessage`] bytes carried opaquely.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    Connect {
        client_version: u32,
        player_name: String,
    },
    Sync {
        payload: Vec<u8>,
    },
    Disconnect,

    Connected {
        client_id: u32,
        network_id: String,
    },
    /// The named object no longer exists on the server
    Despawn {
        network_id: String,
    },
    Disconnected {
        reason: String,
    },
}

impl Packet {
    /// Encodes the packet for a single datagram
    pub fn to_bytes(&self) -> Result<Vec<u8>, TransportError> {
        Ok(bincode::serialize(self)?)
    }

    /// Decodes a datagram
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TransportError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Fire-and-forget outgoing side of a transport
pub trait Transport {
    fn send(&mut self, bytes: Vec<u8>) -> Result<(), TransportError>;
}

/// In-process transport. Clones share one queue, so one clone can send
/// while another delivers.
#[derive(Debug, Clone, Default)]
pub struct LoopbackTransport {
    queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
    closed: Arc<AtomicBool>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later send fail, for every clone
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Number of payloads waiting for delivery
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Passes every queued message to `handler` in send order. Returns the
    /// number delivered.
    pub fn deliver<F: FnMut(&[u8])>(&self, mut handler: F) -> usize {
        let messages: Vec<Vec<u8>> = self.lock().drain(..).collect();
        for bytes in &messages {
            handler(bytes);
        }
        messages.len()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Vec<u8>>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for LoopbackTransport {
    fn send(&mut self, bytes: Vec<u8>) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.lock().push_back(bytes);
        Ok(())
    }
}

impl Transport for Vec<Vec<u8>> {
    fn send(&mut self, bytes: Vec<u8>) -> Result<(), TransportError> {
        self.push(bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_delivers_in_order() {
        let mut sender = LoopbackTransport::new();
        let receiver = sender.clone();

        sender.send(vec![1]).unwrap();
        sender.send(vec![2, 2]).unwrap();
        assert_eq!(receiver.pending(), 2);

        let mut seen = Vec::new();
        let delivered = receiver.deliver(|bytes| seen.push(bytes.to_vec()));
        assert_eq!(delivered, 2);
        assert_eq!(seen, vec![vec![1], vec![2, 2]]);
        assert_eq!(receiver.pending(), 0);
    }

    #[test]
    fn test_packet_serialization() {
        let packet = Packet::Sync {
            payload: vec![0, 1, 2, 3],
        };
        let bytes = packet.to_bytes().unwrap();
        assert_eq!(Packet::from_bytes(&bytes).unwrap(), packet);

        let connect = Packet::Connect {
            client_version: PROTOCOL_VERSION,
            player_name: "Hero".to_string(),
        };
        let bytes = connect.to_bytes().unwrap();
        match Packet::from_bytes(&bytes).unwrap() {
            Packet::Connect {
                client_version,
                player_name,
            } => {
                assert_eq!(client_version, 1);
                assert_eq!(player_name, "Hero");
            }
            _ => panic!("Wrong packet type"),
        }
    }

    #[test]
    fn test_garbage_packet_is_an_error() {
        assert!(matches!(
            Packet::from_bytes(&[0xff, 0xff, 0xff, 0xff]),
            Err(TransportError::Packet(_))
        ));
    }

    #[test]
    fn test_closed_loopback_rejects_send() {
        let mut transport = LoopbackTransport::new();
        transport.close();
        assert!(matches!(transport.send(vec![0]), Err(TransportError::Closed)));
    }
}
