use crate::game::ClientGameState;
use log::{debug, error, info, warn};
use shared::{Packet, SyncMessage, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::interval;

pub const MAX_PACKET_SIZE: usize = 8192;
/// Ticks between state summaries in the log
pub const SUMMARY_INTERVAL: u32 = 90;

pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    player_name: String,
    client_id: Option<u32>,
    connected: bool,
    tick_duration: Duration,

    game_state: ClientGameState,
}

impl Client {
    pub async fn new(
        server_addr: &str,
        player_name: &str,
        tick_duration: Duration,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = server_addr.parse()?;

        Ok(Client {
            socket,
            server_addr,
            player_name: player_name.to_string(),
            client_id: None,
            connected: false,
            tick_duration,
            game_state: ClientGameState::new()?,
        })
    }

    pub fn game_state(&self) -> &ClientGameState {
        &self.game_state
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Connecting to server as {}...", self.player_name);

        let packet = Packet::Connect {
            client_version: PROTOCOL_VERSION,
            player_name: self.player_name.clone(),
        };
        self.send_packet(&packet).await
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        let data = packet.to_bytes()?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    pub fn handle_packet(&mut self, packet: Packet) {
        match packet {
            Packet::Connected {
                client_id,
                network_id,
            } => {
                info!("Connected! Client ID: {}", client_id);
                match self.game_state.on_connected(client_id, network_id) {
                    Ok(()) => {
                        self.client_id = Some(client_id);
                        self.connected = true;
                    }
                    Err(e) => error!("Failed to start session: {}", e),
                }
            }

            Packet::Sync { payload } => {
                if !self.connected {
                    debug!("Ignoring sync before connection");
                    return;
                }
                match SyncMessage::decode(&payload) {
                    Ok(message) => {
                        self.game_state.apply(&message);
                    }
                    Err(e) => warn!("Malformed sync from server: {}", e),
                }
            }

            Packet::Despawn { network_id } => {
                self.game_state.despawn(&network_id);
            }

            Packet::Disconnected { reason } => {
                warn!("Disconnected: {}", reason);
                self.connected = false;
                self.client_id = None;
            }

            _ => {
                warn!("Unexpected packet type");
            }
        }
    }

    /// Sends local edits, if any
    async fn flush(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if !self.connected {
            return Ok(());
        }
        if let Some(message) = self.game_state.take_outgoing() {
            let payload = message.encode()?;
            self.send_packet(&Packet::Sync { payload }).await?;
        }
        Ok(())
    }

    /// Runs until the server disconnects us, or for `ticks` ticks if given
    pub async fn run(&mut self, ticks: Option<u32>) -> Result<(), Box<dyn std::error::Error>> {
        self.connect().await?;

        let mut tick_interval = interval(self.tick_duration);
        let mut buffer = [0u8; MAX_PACKET_SIZE];
        let mut elapsed = 0u32;

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, _)) => match Packet::from_bytes(&buffer[0..len]) {
                            Ok(Packet::Disconnected { reason }) => {
                                self.handle_packet(Packet::Disconnected { reason });
                                break;
                            }
                            Ok(packet) => self.handle_packet(packet),
                            Err(e) => warn!("Failed to deserialize packet: {}", e),
                        },
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                _ = tick_interval.tick() => {
                    self.game_state.step();
                    if let Err(e) = self.flush().await {
                        error!("Error sending sync: {}", e);
                    }

                    elapsed += 1;
                    if elapsed % SUMMARY_INTERVAL == 0 {
                        for line in self.game_state.summary() {
                            info!("{}", line);
                        }
                    }
                    if ticks.is_some_and(|limit| elapsed >= limit) {
                        break;
                    }
                },
            }
        }

        if self.connected {
            let _ = self.send_packet(&Packet::Disconnect).await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{NetworkIdentity, ObjectId, PlayerState, SyncConfig, SyncContext, Synced};

    async fn client() -> Client {
        Client::new("127.0.0.1:9", "Hero", Duration::from_millis(16))
            .await
            .unwrap()
    }

    fn full_sync_packet(network_id: &str) -> Packet {
        let mut ctx = SyncContext::new(SyncConfig::server());
        ctx.register_type::<PlayerState>().unwrap();
        let player = Synced::new(
            ObjectId(1),
            NetworkIdentity::new(network_id),
            PlayerState::new("Remote"),
        );
        ctx.initialize_component(&player);
        Packet::Sync {
            payload: ctx.create_full_sync(&player).unwrap().encode().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_sync_ignored_before_connect() {
        let mut client = client().await;
        client.handle_packet(full_sync_packet("player-2"));
        assert_eq!(client.game_state().player_count(), 0);
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let mut client = client().await;

        client.handle_packet(Packet::Connected {
            client_id: 1,
            network_id: "player-1".to_string(),
        });
        assert!(client.is_connected());
        assert_eq!(client.game_state().local_network_id(), Some("player-1"));

        client.handle_packet(full_sync_packet("player-2"));
        assert_eq!(client.game_state().mirror("player-2").unwrap().player_name, "Remote");

        client.handle_packet(Packet::Despawn {
            network_id: "player-2".to_string(),
        });
        assert_eq!(client.game_state().player_count(), 0);

        client.handle_packet(Packet::Disconnected {
            reason: "Server full".to_string(),
        });
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_malformed_sync_is_dropped() {
        let mut client = client().await;
        client.handle_packet(Packet::Connected {
            client_id: 1,
            network_id: "player-1".to_string(),
        });
        client.handle_packet(Packet::Sync {
            payload: vec![1, 2, 3],
        });
        assert_eq!(client.game_state().player_count(), 0);
    }
}
