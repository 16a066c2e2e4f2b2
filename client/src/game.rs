//! Client-side mirrors of replicated player state
//!
//! Every player the server announces gets a local [`Synced`] mirror keyed by
//! network id. Incoming messages are applied straight to storage, so they
//! are never echoed back. The only object this client writes is its own
//! player, and only the fields it owns.

use log::{debug, info, warn};
use shared::{
    ApplyReport, DeclarationError, FieldValue, NetworkIdentity, ObjectId, PlayerState, SyncConfig,
    SyncContext, SyncMessage, SyncTarget, Synced, WriteOutcome,
};
use std::collections::HashMap;

pub const ORBIT_RADIUS: f64 = 40.0;
/// Radians per tick
pub const ORBIT_SPEED: f64 = 0.05;

pub struct ClientGameState {
    pub tick: u32,
    ctx: SyncContext,
    mirrors: HashMap<String, Synced<PlayerState>>,
    local_network_id: Option<String>,
    next_object_id: u64,
    orbit_center: Option<(f64, f64)>,
}

fn context(config: SyncConfig) -> Result<SyncContext, DeclarationError> {
    let mut ctx = SyncContext::new(config);
    ctx.register_type::<PlayerState>()?;
    Ok(ctx)
}

impl ClientGameState {
    pub fn new() -> Result<Self, DeclarationError> {
        Self::with_context(context(SyncConfig::default())?)
    }

    pub fn with_context(mut ctx: SyncContext) -> Result<Self, DeclarationError> {
        if !ctx.registry().has_type(shared::player::TYPE_NAME) {
            ctx.register_type::<PlayerState>()?;
        }
        Ok(Self {
            tick: 0,
            ctx,
            mirrors: HashMap::new(),
            local_network_id: None,
            next_object_id: 1,
            orbit_center: None,
        })
    }

    /// Starts a fresh session as `client_id`, owning `network_id`
    pub fn on_connected(
        &mut self,
        client_id: u32,
        network_id: String,
    ) -> Result<(), DeclarationError> {
        self.ctx = context(SyncConfig::client(client_id.to_string()))?;
        self.mirrors.clear();
        self.orbit_center = None;
        info!("Session started as client {} owning {}", client_id, network_id);
        self.local_network_id = Some(network_id);
        Ok(())
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    pub fn local_network_id(&self) -> Option<&str> {
        self.local_network_id.as_deref()
    }

    pub fn mirror(&self, network_id: &str) -> Option<&Synced<PlayerState>> {
        self.mirrors.get(network_id)
    }

    pub fn local_player(&self) -> Option<&Synced<PlayerState>> {
        self.mirrors.get(self.local_network_id.as_deref()?)
    }

    pub fn player_count(&self) -> usize {
        self.mirrors.len()
    }

    /// Applies a message from the server, creating the mirror on full sync
    pub fn apply(&mut self, message: &SyncMessage) -> Option<ApplyReport> {
        if !self.mirrors.contains_key(&message.network_id) {
            if !message.is_full_sync {
                warn!("Delta for unknown object {}, waiting for full sync", message.network_id);
                return None;
            }
            self.spawn_mirror(&message.network_id)?;
        }

        let mirror = self.mirrors.get_mut(&message.network_id)?;
        let report = self.ctx.apply_sync_data(mirror, message);
        if !report.skipped.is_empty() {
            debug!("Skipped {:?} on {}", report.skipped, message.network_id);
        }
        Some(report)
    }

    fn spawn_mirror(&mut self, network_id: &str) -> Option<()> {
        let mut identity = NetworkIdentity::new(network_id);
        identity.is_local_owner = self.local_network_id.as_deref() == Some(network_id);

        let mirror = Synced::new(ObjectId(self.next_object_id), identity, PlayerState::new(""));
        self.next_object_id += 1;

        if !self.ctx.initialize_component(&mirror) {
            return None;
        }
        debug!("Mirroring {}", network_id);
        self.mirrors.insert(network_id.to_string(), mirror);
        Some(())
    }

    pub fn despawn(&mut self, network_id: &str) -> bool {
        let Some(mirror) = self.mirrors.remove(network_id) else {
            return false;
        };
        self.ctx.unregister_component(&mirror);
        info!("{} left", network_id);
        true
    }

    /// Writes a field on the local player
    pub fn set_local(
        &mut self,
        key: &str,
        value: impl Into<FieldValue>,
    ) -> Option<WriteOutcome> {
        let network_id = self.local_network_id.as_deref()?;
        let player = self.mirrors.get_mut(network_id)?;
        Some(player.set(&mut self.ctx, key, value))
    }

    /// Moves the local player one step around its spawn point
    pub fn step(&mut self) {
        self.tick = self.tick.wrapping_add(1);

        let Some(position) = self.local_player().map(|p| p.position) else {
            return;
        };
        let center = *self.orbit_center.get_or_insert(position);

        let angle = f64::from(self.tick) * ORBIT_SPEED;
        let x = center.0 + ORBIT_RADIUS * angle.cos();
        let y = center.1 + ORBIT_RADIUS * angle.sin();
        self.set_local("position", serde_json::json!({ "x": x.round(), "y": y.round() }));
    }

    /// Pending local changes packed into one message, cleared once taken
    pub fn take_outgoing(&mut self) -> Option<SyncMessage> {
        let network_id = self.local_network_id.as_deref()?;
        let player: &dyn SyncTarget = self.mirrors.get(network_id)?;
        self.ctx.create_batch(&[player]).pop()
    }

    /// One line per mirrored player
    pub fn summary(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .mirrors
            .iter()
            .map(|(network_id, p)| {
                format!(
                    "{}{} {:<12} hp {:>5.1} score {:>4} ready {:<5} at ({:.0}, {:.0})",
                    if Some(network_id.as_str()) == self.local_network_id.as_deref() {
                        "*"
                    } else {
                        " "
                    },
                    network_id,
                    p.player_name,
                    p.health,
                    p.score,
                    p.is_ready,
                    p.position.0,
                    p.position.1
                )
            })
            .collect();
        lines.sort();
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn server_player(ctx: &mut SyncContext, client_id: u32) -> Synced<PlayerState> {
        let player = Synced::new(
            ObjectId(u64::from(client_id)),
            NetworkIdentity::new(format!("player-{}", client_id)).with_owner(client_id.to_string()),
            PlayerState::new(format!("P{}", client_id)).with_owner(client_id.to_string()),
        );
        assert!(ctx.initialize_component(&player));
        player
    }

    fn server() -> SyncContext {
        let mut ctx = SyncContext::new(SyncConfig::server());
        ctx.register_type::<PlayerState>().unwrap();
        ctx
    }

    #[test]
    fn test_full_sync_creates_mirror() {
        let mut server = server();
        let remote = server_player(&mut server, 2);

        let mut game = ClientGameState::new().unwrap();
        game.on_connected(1, "player-1".to_string()).unwrap();

        let report = game.apply(&server.create_full_sync(&remote).unwrap()).unwrap();
        assert_eq!(report.applied.len(), 5);
        assert_eq!(game.mirror("player-2").unwrap().player_name, "P2");
        assert!(!game.mirror("player-2").unwrap().identity().is_local_owner);
        assert!(game.take_outgoing().is_none());
    }

    #[test]
    fn test_delta_for_unknown_object_is_ignored() {
        let mut server = server();
        let mut remote = server_player(&mut server, 2);
        remote.set(&mut server, "health", 5.0);

        let mut game = ClientGameState::new().unwrap();
        game.on_connected(1, "player-1".to_string()).unwrap();

        assert!(game.apply(&server.create_sync_data(&remote).unwrap()).is_none());
        assert_eq!(game.player_count(), 0);
    }

    #[test]
    fn test_local_player_edits_go_out_once() {
        let mut server = server();
        let own = server_player(&mut server, 1);

        let mut game = ClientGameState::new().unwrap();
        game.on_connected(1, "player-1".to_string()).unwrap();
        game.apply(&server.create_full_sync(&own).unwrap());
        assert!(game.local_player().unwrap().identity().is_local_owner);

        assert!(game.set_local("playerName", "Hero").unwrap().is_recorded());
        let outgoing = game.take_outgoing().unwrap();
        assert_eq!(outgoing.network_id, "player-1");
        assert_eq!(outgoing.sender_id, "client-1");
        assert_eq!(outgoing.field_updates[0].new_value().unwrap(), FieldValue::from("Hero"));

        assert!(game.take_outgoing().is_none());
    }

    #[test]
    fn test_server_owned_field_is_denied_locally() {
        let mut server = server();
        let own = server_player(&mut server, 1);

        let mut game = ClientGameState::new().unwrap();
        game.on_connected(1, "player-1".to_string()).unwrap();
        game.apply(&server.create_full_sync(&own).unwrap());

        assert_eq!(game.set_local("isReady", true), Some(WriteOutcome::Denied));
        assert!(!game.local_player().unwrap().is_ready);
        assert!(game.take_outgoing().is_none());
    }

    #[test]
    fn test_step_orbits_spawn_point() {
        let mut server = server();
        let own = server_player(&mut server, 1);

        let mut game = ClientGameState::new().unwrap();
        game.on_connected(1, "player-1".to_string()).unwrap();
        game.apply(&server.create_full_sync(&own).unwrap());

        game.step();
        let (x, y) = game.local_player().unwrap().position;
        let distance = (x * x + y * y).sqrt();
        assert_approx_eq!(distance, ORBIT_RADIUS, 1.0);
        assert!(game.take_outgoing().is_some());
    }

    #[test]
    fn test_despawn_removes_mirror() {
        let mut server = server();
        let remote = server_player(&mut server, 2);

        let mut game = ClientGameState::new().unwrap();
        game.on_connected(1, "player-1".to_string()).unwrap();
        game.apply(&server.create_full_sync(&remote).unwrap());

        let object_id = game.mirror("player-2").unwrap().object_id();
        assert!(game.despawn("player-2"));
        assert!(!game.despawn("player-2"));
        assert!(!game.context().changes().is_registered(object_id));
        assert_eq!(game.summary().len(), 0);
    }
}
