//! Server network layer handling UDP communications and the sync loop

use crate::client_manager::{ClientManager, CLIENT_TIMEOUT};
use crate::game::{GameState, SyncRejection};
use log::{debug, error, info, warn};
use shared::{Packet, SyncContext, SyncMessage, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;

pub const MAX_PACKET_SIZE: usize = 8192;

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: Packet,
        addr: SocketAddr,
    },
    ClientTimeout {
        client_id: u32,
    },
    #[allow(dead_code)]
    Shutdown,
}

/// Messages sent from the sync loop to network tasks
#[derive(Debug)]
pub enum GameMessage {
    SendPacket {
        packet: Packet,
        addr: SocketAddr,
    },
    BroadcastPacket {
        packet: Packet,
        exclude: Option<u32>,
    },
}

/// Wraps an encoded sync message for the wire
pub fn sync_packet(message: &SyncMessage) -> Option<Packet> {
    match message.encode() {
        Ok(payload) => Some(Packet::Sync { payload }),
        Err(e) => {
            error!("Failed to encode sync for {}: {}", message.network_id, e);
            None
        }
    }
}

/// Main server coordinating networking and replication
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    game_state: GameState,
    tick_duration: Duration,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    pub async fn new(
        addr: &str,
        tick_duration: Duration,
        max_clients: usize,
        ctx: SyncContext,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(max_clients))),
            game_state: GameState::with_context(ctx)?,
            tick_duration,
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Spawns task that continuously listens for incoming packets
    async fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; MAX_PACKET_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match Packet::from_bytes(&buffer[0..len]) {
                        Ok(packet) => {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        }
                        Err(e) => warn!("Failed to deserialize packet from {}: {}", addr, e),
                    },
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue
    async fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::BroadcastPacket { packet, exclude } => {
                        let client_addrs = {
                            let clients_guard = clients.read().await;
                            clients_guard.get_client_addrs()
                        };

                        for (client_id, addr) in client_addrs {
                            if Some(client_id) == exclude {
                                continue;
                            }

                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to client {}: {}", client_id, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    async fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts(CLIENT_TIMEOUT)
                };

                for client_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { client_id }) {
                        error!("Failed to send timeout message: {}", e);
                        break;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = packet.to_bytes()?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn broadcast_packet(&self, packet: Packet, exclude: Option<u32>) {
        if let Err(e) = self.game_tx.send(GameMessage::BroadcastPacket { packet, exclude }) {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    async fn client_for(&self, addr: SocketAddr) -> Option<u32> {
        let clients = self.clients.read().await;
        clients.find_client_by_addr(addr)
    }

    async fn drop_client(&mut self, client_id: u32) {
        {
            let mut clients = self.clients.write().await;
            clients.remove_client(&client_id);
        }
        if let Some(network_id) = self.game_state.remove_player(&client_id) {
            self.broadcast_packet(Packet::Despawn { network_id }, None);
        }
    }

    /// Processes incoming packets and updates replicated state
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect {
                client_version,
                player_name,
            } => {
                info!(
                    "Client {} connecting from {} (version: {})",
                    player_name, addr, client_version
                );

                if client_version != PROTOCOL_VERSION {
                    let reason = "Protocol version mismatch".to_string();
                    self.send_packet(Packet::Disconnected { reason }, addr);
                    return;
                }

                // Remove existing connection if present
                if let Some(existing_id) = self.client_for(addr).await {
                    info!("Removing existing client {} from {}", existing_id, addr);
                    self.drop_client(existing_id).await;
                }

                let client_id = {
                    let mut clients = self.clients.write().await;
                    clients.add_client(addr, player_name.clone())
                };

                let Some(client_id) = client_id else {
                    let reason = "Server full".to_string();
                    self.send_packet(Packet::Disconnected { reason }, addr);
                    return;
                };

                let Some(network_id) = self.game_state.add_player(client_id, &player_name) else {
                    let mut clients = self.clients.write().await;
                    clients.remove_client(&client_id);
                    let reason = "Player could not be registered".to_string();
                    self.send_packet(Packet::Disconnected { reason }, addr);
                    return;
                };

                self.send_packet(
                    Packet::Connected {
                        client_id,
                        network_id,
                    },
                    addr,
                );

                // The new client gets everything, everyone else gets the newcomer
                for message in self.game_state.full_sync() {
                    if let Some(packet) = sync_packet(&message) {
                        self.send_packet(packet, addr);
                    }
                }
                if let Some(packet) = self
                    .game_state
                    .full_sync_for(client_id)
                    .as_ref()
                    .and_then(sync_packet)
                {
                    self.broadcast_packet(packet, Some(client_id));
                }
            }

            Packet::Sync { payload } => {
                let Some(client_id) = self.client_for(addr).await else {
                    debug!("Sync from unknown address {}", addr);
                    return;
                };

                let message = match SyncMessage::decode(&payload) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("Malformed sync from client {}: {}", client_id, e);
                        return;
                    }
                };

                let fresh = {
                    let mut clients = self.clients.write().await;
                    clients.touch(client_id);
                    clients.accept_sequence(client_id, message.sync_sequence)
                };
                if !fresh {
                    debug!(
                        "Dropping stale sync {} from client {}",
                        message.sync_sequence, client_id
                    );
                    return;
                }

                match self.game_state.apply_client_sync(client_id, message) {
                    Ok((relay, report)) => {
                        debug!("Client {} updated {:?}", client_id, report.applied);
                        if let Some(packet) = sync_packet(&relay) {
                            self.broadcast_packet(packet, Some(client_id));
                        }
                    }
                    Err(SyncRejection::NothingWritable) => {
                        debug!("Client {} sent only server-owned fields", client_id);
                    }
                    Err(rejection) => {
                        warn!("Rejected sync from client {}: {:?}", client_id, rejection);
                    }
                }
            }

            Packet::Disconnect => {
                if let Some(client_id) = self.client_for(addr).await {
                    self.drop_client(client_id).await;
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    /// Broadcasts every pending change
    fn broadcast_updates(&mut self) {
        for message in self.game_state.collect_updates() {
            if let Some(packet) = sync_packet(&message) {
                self.broadcast_packet(packet, None);
            }
        }
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        // Initialize concurrent tasks
        self.spawn_network_receiver().await;
        self.spawn_network_sender().await;
        self.spawn_timeout_checker().await;

        let mut tick_interval = interval(self.tick_duration);

        info!("Server started successfully");

        loop {
            tokio::select! {
                // Handle network events
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { client_id }) => {
                            if let Some(network_id) = self.game_state.remove_player(&client_id) {
                                self.broadcast_packet(Packet::Despawn { network_id }, None);
                            }
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                // Handle server tick events
                _ = tick_interval.tick() => {
                    self.game_state.update(&mut rand::thread_rng());
                    self.broadcast_updates();

                    // Periodic monitoring
                    if self.game_state.tick % 60 == 0 && self.game_state.player_count() > 0 {
                        debug!(
                            "Tick {}: {} players",
                            self.game_state.tick,
                            self.game_state.player_count()
                        );
                    }
                },
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{FieldUpdate, FieldValue, SyncConfig};
    use std::net::{IpAddr, Ipv4Addr};

    fn message(network_id: &str) -> SyncMessage {
        SyncMessage {
            component_type: "PlayerState".to_string(),
            network_id: network_id.to_string(),
            field_updates: vec![FieldUpdate {
                field_number: 1,
                property_key: "health".to_string(),
                payload: shared::codec::encode(&FieldValue::Number(50.0)).unwrap(),
                old_value: FieldValue::Null,
                timestamp_ms: 1,
                authority_only: false,
            }],
            is_full_sync: false,
            sender_id: "server".to_string(),
            sync_sequence: 1,
            timestamp_ms: 1,
        }
    }

    #[test]
    fn test_server_message_creation() {
        let packet = Packet::Connect {
            client_version: PROTOCOL_VERSION,
            player_name: "Hero".to_string(),
        };
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8080);

        match (ServerMessage::PacketReceived { packet, addr }) {
            ServerMessage::PacketReceived { packet: p, addr: a } => {
                assert_eq!(a, addr);
                assert!(matches!(p, Packet::Connect { client_version: 1, .. }));
            }
            _ => panic!("Unexpected message type"),
        }
    }

    #[test]
    fn test_sync_packet_carries_wire_bytes() {
        let original = message("player-1");
        let Some(Packet::Sync { payload }) = sync_packet(&original) else {
            panic!("Expected a sync packet");
        };
        assert_eq!(SyncMessage::decode(&payload).unwrap(), original);
    }

    #[test]
    fn test_unencodable_message_is_dropped() {
        let mut bad = message("player-1");
        bad.field_updates[0].payload = vec![42];
        assert!(sync_packet(&bad).is_none());
    }

    #[test]
    fn test_sync_packet_fits_receive_buffer() {
        let packet = sync_packet(&message("player-1")).unwrap();
        assert!(packet.to_bytes().unwrap().len() < MAX_PACKET_SIZE);
    }

    #[tokio::test]
    async fn test_server_binds_ephemeral_port() {
        let server = Server::new(
            "127.0.0.1:0",
            Duration::from_millis(16),
            4,
            SyncContext::new(SyncConfig::server()),
        )
        .await
        .unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
    }
}
