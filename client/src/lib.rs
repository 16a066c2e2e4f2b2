//! # Sync Client Library
//!
//! A remote peer for the replication server. The client mirrors every
//! replicated `PlayerState` the server announces and writes only the
//! fields of its own player that the server lets clients own.
//!
//! ## Data Flow
//!
//! - On `Connected` the client starts a fresh sync context with its client
//!   id and learns which network id it owns.
//! - Full syncs create mirrors; deltas update them. Applied values go
//!   straight to storage, so nothing received is ever sent back.
//! - Every tick the client moves its own player and flushes the resulting
//!   changes as one `Sync` packet.
//! - `Despawn` drops a mirror and its change ledger.
//!
//! ## Module Organization
//!
//! ### Game Module (`game`)
//! Mirrors, the local sync context, and local player edits.
//!
//! ### Network Module (`network`)
//! UDP socket handling and the tick loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::Client;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::new("127.0.0.1:8080", "Hero", Duration::from_millis(33)).await?;
//!     client.run(None).await?;
//!     Ok(())
//! }
//! ```

pub mod game;
pub mod network;
