//! Integration tests for the replication stack
//!
//! These tests drive the shared core through the server and client crates
//! and over real UDP sockets.

use client::game::ClientGameState;
use server::game::GameState;
use shared::{
    FieldValue, LoopbackTransport, ManualClock, NetworkIdentity, ObjectId, Packet, PlayerState,
    SyncConfig, SyncContext, SyncMessage, Synced, Transport, WriteOutcome, PROTOCOL_VERSION,
};
use std::sync::Arc;
use std::time::Duration;

fn server_game() -> GameState {
    let ctx = SyncContext::with_clock(SyncConfig::server(), Arc::new(ManualClock::new(50_000)));
    GameState::with_context(ctx).unwrap()
}

fn connected_client(client_id: u32) -> ClientGameState {
    let mut game = ClientGameState::new().unwrap();
    game.on_connected(client_id, format!("player-{}", client_id))
        .unwrap();
    game
}

/// Sends every message through a loopback transport and decodes it again
fn over_the_wire(messages: Vec<SyncMessage>) -> Vec<SyncMessage> {
    let mut transport = LoopbackTransport::new();
    for message in &messages {
        transport.send(message.encode().unwrap()).unwrap();
    }
    let mut received = Vec::new();
    transport.deliver(|bytes| received.push(SyncMessage::decode(bytes).unwrap()));
    received
}

/// NETWORK PROTOCOL TESTS
mod protocol_tests {
    use super::*;
    use std::net::UdpSocket;
    use std::thread;

    /// Sync payloads survive the bincode envelope untouched
    #[test]
    fn sync_payload_survives_envelope() {
        let mut ctx = SyncContext::new(SyncConfig::server());
        ctx.register_type::<PlayerState>().unwrap();
        let player = Synced::new(ObjectId(1), NetworkIdentity::new("p1"), PlayerState::new("A"));
        assert!(ctx.initialize_component(&player));

        let payload = ctx.create_full_sync(&player).unwrap().encode().unwrap();
        let bytes = Packet::Sync {
            payload: payload.clone(),
        }
        .to_bytes()
        .unwrap();

        match Packet::from_bytes(&bytes).unwrap() {
            Packet::Sync { payload: received } => assert_eq!(received, payload),
            _ => panic!("Wrong packet type after serialization"),
        }
    }

    /// Tests real UDP socket communication
    #[test]
    fn udp_socket_communication() {
        let server_socket = UdpSocket::bind("127.0.0.1:0").expect("Failed to bind server socket");
        let server_addr = server_socket.local_addr().unwrap();

        // Echo server
        let server_socket_clone = server_socket.try_clone().unwrap();
        thread::spawn(move || {
            let mut buf = [0; 1024];
            if let Ok((size, client_addr)) = server_socket_clone.recv_from(&mut buf) {
                let _ = server_socket_clone.send_to(&buf[..size], client_addr);
            }
        });

        let client_socket = UdpSocket::bind("127.0.0.1:0").expect("Failed to bind client socket");
        client_socket
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();

        let test_packet = Packet::Connect {
            client_version: PROTOCOL_VERSION,
            player_name: "Hero".to_string(),
        };
        client_socket
            .send_to(&test_packet.to_bytes().unwrap(), server_addr)
            .unwrap();

        let mut buf = [0; 1024];
        let (size, _) = client_socket.recv_from(&mut buf).unwrap();
        assert_eq!(Packet::from_bytes(&buf[..size]).unwrap(), test_packet);
    }
}

/// REPLICATION INTEGRATION TESTS
mod replication_tests {
    use super::*;

    /// A joining client mirrors every player from the full sync
    #[test]
    fn join_mirrors_all_players() {
        let mut server = server_game();
        server.add_player(1, "Alpha");
        server.add_player(2, "Beta");

        let mut client = connected_client(2);
        for message in over_the_wire(server.full_sync()) {
            assert!(client.apply(&message).is_some());
        }

        assert_eq!(client.player_count(), 2);
        assert_eq!(client.mirror("player-1").unwrap().player_name, "Alpha");
        assert_eq!(client.local_player().unwrap().player_name, "Beta");
        assert!(client.take_outgoing().is_none());
    }

    /// Server-side changes reach the client and are not echoed back
    #[test]
    fn server_updates_do_not_echo() {
        let mut server = server_game();
        server.add_player(1, "Alpha");

        let mut client = connected_client(1);
        for message in over_the_wire(server.full_sync()) {
            client.apply(&message);
        }

        let mut rng = seeded_rng();
        for _ in 0..server::game::READY_AFTER_TICKS {
            server.update(&mut rng);
            for message in over_the_wire(server.collect_updates()) {
                client.apply(&message);
            }
        }

        let authoritative = server.player(1).unwrap();
        let mirror = client.local_player().unwrap();
        assert_eq!(mirror.health, authoritative.health);
        assert_eq!(mirror.score, authoritative.score);
        assert!(mirror.is_ready);

        assert!(client.take_outgoing().is_none());
        assert!(client.context().pending_changes(client.local_player().unwrap()).is_empty());
    }

    /// A client rename reaches the server and is relayed to other clients
    #[test]
    fn client_edit_is_relayed() {
        let mut server = server_game();
        server.add_player(1, "Alpha");
        server.add_player(2, "Beta");

        let mut alpha = connected_client(1);
        let mut beta = connected_client(2);
        for message in over_the_wire(server.full_sync()) {
            alpha.apply(&message);
            beta.apply(&message);
        }

        assert_eq!(
            alpha.set_local("playerName", "Alpha Prime"),
            Some(WriteOutcome::Recorded { needs_sync: true })
        );
        let outgoing = alpha.take_outgoing().unwrap();

        let (relay, report) = server
            .apply_client_sync(1, over_the_wire(vec![outgoing]).remove(0))
            .unwrap();
        assert_eq!(report.applied, vec!["playerName".to_string()]);
        assert_eq!(server.player(1).unwrap().player_name, "Alpha Prime");

        for message in over_the_wire(vec![relay]) {
            beta.apply(&message);
        }
        let mirror = beta.mirror("player-1").unwrap();
        assert_eq!(mirror.player_name, "Alpha Prime");
        assert_eq!(
            mirror.name_changes.last(),
            Some(&("Alpha".to_string(), "Alpha Prime".to_string()))
        );

        // Nothing the server applied is queued to go back out
        assert!(server.collect_updates().is_empty());
    }

    /// Clients cannot write server-owned fields, locally or remotely
    #[test]
    fn ready_flag_stays_server_owned() {
        let mut server = server_game();
        server.add_player(1, "Alpha");

        let mut client = connected_client(1);
        for message in over_the_wire(server.full_sync()) {
            client.apply(&message);
        }

        assert_eq!(client.set_local("isReady", true), Some(WriteOutcome::Denied));
        assert!(!client.local_player().unwrap().is_ready);
        assert!(client.take_outgoing().is_none());
    }

    /// Position edits inside the throttle window are stored but sent once
    #[test]
    fn throttled_position_sends_once() {
        let clock = ManualClock::new(1_000);
        let mut ctx = SyncContext::with_clock(SyncConfig::client("1"), Arc::new(clock.clone()));
        ctx.register_type::<PlayerState>().unwrap();
        let mut player = Synced::new(ObjectId(1), NetworkIdentity::new("player-1"), PlayerState::new("A"));
        assert!(ctx.initialize_component(&player));

        for step in 1..=5 {
            player.set(&mut ctx, "position", serde_json::json!({ "x": step, "y": 0 }));
            clock.advance(20);
        }
        assert_eq!(player.position, (5.0, 0.0));

        let message = ctx.create_sync_data(&player).unwrap();
        assert_eq!(message.field_updates.len(), 1);
        assert_eq!(
            message.field_updates[0].new_value().unwrap(),
            FieldValue::from(serde_json::json!({ "x": 1, "y": 0 }))
        );
    }

    fn seeded_rng() -> impl rand::Rng {
        use rand::SeedableRng;
        rand::rngs::StdRng::seed_from_u64(42)
    }
}

/// LIVE SERVER TESTS
mod live_server_tests {
    use super::*;
    use server::network::Server;
    use tokio::net::UdpSocket;

    /// A raw UDP peer connects and receives its id and its own full state
    #[tokio::test]
    async fn connect_receives_id_and_full_sync() {
        let mut server = Server::new(
            "127.0.0.1:0",
            Duration::from_millis(20),
            4,
            SyncContext::new(SyncConfig::server()),
        )
        .await
        .unwrap();
        let server_addr = server.local_addr().unwrap();

        let probe = async {
            let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            let connect = Packet::Connect {
                client_version: PROTOCOL_VERSION,
                player_name: "Probe".to_string(),
            };
            socket
                .send_to(&connect.to_bytes().unwrap(), server_addr)
                .await
                .unwrap();

            let mut connected = None;
            let mut full_sync = None;
            let mut buf = [0u8; 8192];
            while connected.is_none() || full_sync.is_none() {
                let (len, _) = socket.recv_from(&mut buf).await.unwrap();
                match Packet::from_bytes(&buf[..len]).unwrap() {
                    Packet::Connected {
                        client_id,
                        network_id,
                    } => connected = Some((client_id, network_id)),
                    Packet::Sync { payload } => {
                        let message = SyncMessage::decode(&payload).unwrap();
                        if message.is_full_sync {
                            full_sync = Some(message);
                        }
                    }
                    other => panic!("Unexpected packet {:?}", other),
                }
            }
            (connected.unwrap(), full_sync.unwrap())
        };

        let ((client_id, network_id), full_sync) = tokio::select! {
            _ = server.run() => panic!("Server stopped early"),
            result = tokio::time::timeout(Duration::from_secs(5), probe) => {
                result.expect("Timed out waiting for the server")
            }
        };

        assert_eq!(client_id, 1);
        assert_eq!(network_id, "player-1");
        assert_eq!(full_sync.network_id, "player-1");
        assert_eq!(full_sync.sender_id, "server");
        assert_eq!(full_sync.field_updates.len(), 5);
    }

    /// Wrong protocol versions are turned away
    #[tokio::test]
    async fn version_mismatch_is_refused() {
        let mut server = Server::new(
            "127.0.0.1:0",
            Duration::from_millis(20),
            4,
            SyncContext::new(SyncConfig::server()),
        )
        .await
        .unwrap();
        let server_addr = server.local_addr().unwrap();

        let probe = async {
            let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            let connect = Packet::Connect {
                client_version: PROTOCOL_VERSION + 1,
                player_name: "Old".to_string(),
            };
            socket
                .send_to(&connect.to_bytes().unwrap(), server_addr)
                .await
                .unwrap();

            let mut buf = [0u8; 8192];
            let (len, _) = socket.recv_from(&mut buf).await.unwrap();
            Packet::from_bytes(&buf[..len]).unwrap()
        };

        let packet = tokio::select! {
            _ = server.run() => panic!("Server stopped early"),
            result = tokio::time::timeout(Duration::from_secs(5), probe) => {
                result.expect("Timed out waiting for the server")
            }
        };

        assert_eq!(
            packet,
            Packet::Disconnected {
                reason: "Protocol version mismatch".to_string()
            }
        );
    }
}
