//! Authoritative replicated state
//!
//! The server owns one [`PlayerState`] per connected client. Server-side
//! simulation writes go through the sync context like any other tracked
//! write; client writes arrive as sync messages and are applied only when
//! they come from the owning client.

use log::{debug, info, warn};
use rand::Rng;
use shared::player::TYPE_NAME;
use shared::{
    ApplyReport, DeclarationError, NetworkIdentity, ObjectId, PlayerState, SyncConfig,
    SyncContext, SyncMessage, SyncTarget, Synced,
};
use std::collections::HashMap;

/// Ticks a player must stay connected before the server marks them ready
pub const READY_AFTER_TICKS: u32 = 30;
pub const MAX_HEALTH: f64 = 100.0;

pub fn network_id_for(client_id: u32) -> String {
    format!("player-{}", client_id)
}

/// Why a client's sync message was not applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncRejection {
    UnknownClient,
    /// The message targets an object the client does not own
    NotOwner { network_id: String },
    /// Only server-owned fields were present
    NothingWritable,
    Rejected,
}

pub struct GameState {
    pub tick: u32,
    ctx: SyncContext,
    players: HashMap<u32, Synced<PlayerState>>,
    joined_at: HashMap<u32, u32>,
}

impl GameState {
    pub fn new() -> Result<Self, DeclarationError> {
        Self::with_context(SyncContext::new(SyncConfig::server()))
    }

    pub fn with_context(mut ctx: SyncContext) -> Result<Self, DeclarationError> {
        ctx.register_type::<PlayerState>()?;
        Ok(Self {
            tick: 0,
            ctx,
            players: HashMap::new(),
            joined_at: HashMap::new(),
        })
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    pub fn player(&self, client_id: u32) -> Option<&Synced<PlayerState>> {
        self.players.get(&client_id)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Spawns the client's player and returns its network id
    pub fn add_player(&mut self, client_id: u32, player_name: &str) -> Option<String> {
        let network_id = network_id_for(client_id);
        let identity = NetworkIdentity::new(network_id.clone())
            .with_owner(client_id.to_string())
            .with_entity(format!("entity-{}", client_id));
        let state = PlayerState::new(player_name).with_owner(client_id.to_string());
        let mut player = Synced::new(ObjectId(u64::from(client_id)), identity, state);

        if !self.ctx.initialize_component(&player) {
            return None;
        }

        let spawn_x = 100.0 + f64::from(client_id) * 60.0 % 600.0;
        player.set(
            &mut self.ctx,
            "position",
            serde_json::json!({ "x": spawn_x, "y": 0.0 }),
        );
        // Full sync covers the spawn state
        self.ctx.clear_changes(&player, None);

        info!("Added player {} ({}) as {}", client_id, player_name, network_id);
        self.players.insert(client_id, player);
        self.joined_at.insert(client_id, self.tick);
        Some(network_id)
    }

    /// Removes the client's player and returns its network id
    pub fn remove_player(&mut self, client_id: &u32) -> Option<String> {
        let player = self.players.remove(client_id)?;
        self.joined_at.remove(client_id);
        self.ctx.unregister_component(&player);
        info!("Removed player {}", client_id);
        Some(player.network_id().to_string())
    }

    /// Full state of every player, for a newly joined client
    pub fn full_sync(&mut self) -> Vec<SyncMessage> {
        let mut messages = Vec::new();
        for player in self.players.values() {
            if let Some(message) = self.ctx.create_full_sync(player) {
                messages.push(message);
            }
        }
        messages
    }

    /// Full state of one player, for every other client
    pub fn full_sync_for(&mut self, client_id: u32) -> Option<SyncMessage> {
        let player = self.players.get(&client_id)?;
        self.ctx.create_full_sync(player)
    }

    /// Advances the server-owned simulation by one tick
    pub fn update<R: Rng>(&mut self, rng: &mut R) {
        self.tick = self.tick.wrapping_add(1);

        for (client_id, player) in self.players.iter_mut() {
            let health = if rng.gen_bool(0.1) {
                (player.health - rng.gen_range(1.0..10.0)).max(0.0)
            } else {
                (player.health + 1.0).min(MAX_HEALTH)
            };
            player.set(&mut self.ctx, "health", health.round());

            if rng.gen_bool(0.05) {
                let score = f64::from(player.score.saturating_add(1));
                player.set(&mut self.ctx, "score", score);
            }

            let joined = self.joined_at.get(client_id).copied().unwrap_or(self.tick);
            if !player.is_ready && self.tick.wrapping_sub(joined) >= READY_AFTER_TICKS {
                debug!("Player {} is ready", client_id);
                player.set(&mut self.ctx, "isReady", true);
            }
        }
    }

    /// One message per player with pending changes. Packed changes are cleared.
    pub fn collect_updates(&mut self) -> Vec<SyncMessage> {
        let targets: Vec<&dyn SyncTarget> = self
            .players
            .values()
            .map(|player| player as &dyn SyncTarget)
            .collect();
        self.ctx.create_batch(&targets)
    }

    /// Applies a client's message to the player it owns.
    ///
    /// Authority-only fields are dropped before applying. Returns the
    /// message trimmed to the applied fields, for relaying to other clients.
    pub fn apply_client_sync(
        &mut self,
        client_id: u32,
        mut message: SyncMessage,
    ) -> Result<(SyncMessage, ApplyReport), SyncRejection> {
        let player = self
            .players
            .get_mut(&client_id)
            .ok_or(SyncRejection::UnknownClient)?;

        if message.network_id != player.network_id() {
            warn!(
                "Client {} tried to write {} which it does not own",
                client_id, message.network_id
            );
            return Err(SyncRejection::NotOwner {
                network_id: message.network_id,
            });
        }

        let registry = self.ctx.registry();
        message.field_updates.retain(|update| {
            registry
                .field_by_number(TYPE_NAME, update.field_number)
                .map_or(true, |declaration| !declaration.authority_only)
        });
        if message.field_updates.is_empty() {
            return Err(SyncRejection::NothingWritable);
        }

        let report = self.ctx.apply_sync_data(player, &message);
        if report.rejected {
            return Err(SyncRejection::Rejected);
        }

        message
            .field_updates
            .retain(|update| !report.skipped.iter().any(|(n, _)| *n == update.field_number));
        if message.field_updates.is_empty() {
            return Err(SyncRejection::Rejected);
        }

        Ok((message, report))
    }
}
