//! # Sync Server Library
//!
//! The authoritative host for replicated player state. It owns one
//! `PlayerState` per connected client, mutates server-owned fields on a
//! fixed tick, and broadcasts field-level deltas to every peer.
//!
//! ## Authority
//!
//! The server context runs with the `server` environment, so every write it
//! makes is authorized and synced. Writes arriving from clients are applied
//! only to the object the client owns, and authority-only fields (such as
//! `isReady`) are stripped before applying. Accepted client writes are
//! relayed to every other client.
//!
//! ## Module Organization
//!
//! ### Client Manager Module (`client_manager`)
//! Connection tracking, client id assignment, timeout detection, and
//! per-client sync sequence tracking.
//!
//! ### Game Module (`game`)
//! The replicated player objects and the sync context that tracks them.
//!
//! ### Network Module (`network`)
//! UDP socket tasks, the `Packet` envelope, and the main tick loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use shared::{SyncConfig, SyncContext};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new(
//!         "127.0.0.1:8080",
//!         Duration::from_millis(33),
//!         32,
//!         SyncContext::new(SyncConfig::server()),
//!     )
//!     .await?;
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod game;
pub mod network;
