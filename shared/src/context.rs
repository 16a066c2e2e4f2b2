//! The replication runtime context
//!
//! [`SyncContext`] bundles everything one process role needs: the field
//! registry, the authority engine, the change manager, and a clock. It is
//! passed explicitly to every tracked write and sync operation.

use crate::authority::{AuthorityDecision, AuthorityEngine};
use crate::change::{ChangeRecord, ComponentChangeStats};
use crate::clock::{Clock, SystemClock};
use crate::component::{Replicated, SyncTarget};
use crate::config::{Environment, SyncConfig};
use crate::error::{DeclarationError, TransportError, WireError};
use crate::manager::{ApplyReport, ChangeManager, WriteOutcome};
use crate::message::SyncMessage;
use crate::registry::{FieldDeclaration, FieldRegistry};
use crate::transport::Transport;
use crate::value::FieldValue;
use log::{debug, error, info};
use std::sync::Arc;

pub struct SyncContext {
    config: SyncConfig,
    clock: Arc<dyn Clock>,
    registry: FieldRegistry,
    authority: AuthorityEngine,
    changes: ChangeManager,
}

impl SyncContext {
    /// Creates a context reading wall-clock time
    pub fn new(config: SyncConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a context on an explicit clock.
    ///
    /// The authority engine gets the default rules unless the config
    /// turns them off.
    pub fn with_clock(config: SyncConfig, clock: Arc<dyn Clock>) -> Self {
        let mut authority = if config.install_default_rules {
            AuthorityEngine::with_default_rules(config.environment, Arc::clone(&clock))
        } else {
            AuthorityEngine::new(config.environment, Arc::clone(&clock))
        };
        authority.set_local_client_id(config.client_id.clone());
        authority.set_cache_timeout_ms(config.authority_cache_timeout_ms);

        info!(
            "Sync context ready: {} as {}",
            config.environment, config.sender_id
        );

        Self {
            changes: ChangeManager::new(config.sender_id.clone()),
            config,
            clock,
            registry: FieldRegistry::new(),
            authority,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn environment(&self) -> Environment {
        self.config.environment
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn registry(&self) -> &FieldRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut FieldRegistry {
        &mut self.registry
    }

    pub fn authority(&self) -> &AuthorityEngine {
        &self.authority
    }

    pub fn authority_mut(&mut self) -> &mut AuthorityEngine {
        &mut self.authority
    }

    pub fn changes(&self) -> &ChangeManager {
        &self.changes
    }

    /// Runs a type's field declarations against this context's registry
    pub fn register_type<T: Replicated>(&mut self) -> Result<(), DeclarationError> {
        T::declare_fields(&mut self.registry)
    }

    /// Validates and registers an object. Validation errors are logged and
    /// nothing is registered.
    pub fn initialize_component(&mut self, target: &dyn SyncTarget) -> bool {
        match self.changes.initialize_component(&self.registry, target) {
            Ok(()) => true,
            Err(errors) => {
                for e in &errors {
                    error!("{}", e);
                }
                error!(
                    "Refusing to register {} {}: {} invalid declarations",
                    target.component().type_name(),
                    target.object_id(),
                    errors.len()
                );
                false
            }
        }
    }

    /// Drops the object's ledger. Returns false if it was not registered.
    pub fn unregister_component(&mut self, target: &dyn SyncTarget) -> bool {
        self.changes.unregister_component(target.object_id())
    }

    /// Evaluates and records a write the caller stores itself
    pub fn record_change(
        &mut self,
        target: &dyn SyncTarget,
        property_key: &str,
        old: &FieldValue,
        new: &FieldValue,
    ) -> WriteOutcome {
        let now = self.clock.now_ms();
        self.changes.record_change(
            &self.registry,
            &mut self.authority,
            target,
            property_key,
            old,
            new,
            now,
        )
    }

    pub(crate) fn evaluate_write(
        &mut self,
        target: &dyn SyncTarget,
        declaration: &FieldDeclaration,
        old: &FieldValue,
        new: &FieldValue,
    ) -> WriteOutcome {
        let now = self.clock.now_ms();
        self.changes
            .evaluate_write(&mut self.authority, target, declaration, old, new, now)
    }

    pub(crate) fn commit_change(
        &mut self,
        target: &dyn SyncTarget,
        declaration: &FieldDeclaration,
        old: FieldValue,
        new: FieldValue,
        needs_sync: bool,
    ) {
        let now = self.clock.now_ms();
        self.changes
            .commit_change(target.object_id(), declaration, old, new, needs_sync, now);
    }

    /// Records for `target` still waiting to be sent
    pub fn pending_changes(&self, target: &dyn SyncTarget) -> Vec<&ChangeRecord> {
        self.changes.pending_changes(target.object_id())
    }

    /// Removes records for the given keys, or all of them
    pub fn clear_changes(&mut self, target: &dyn SyncTarget, property_keys: Option<&[&str]>) -> usize {
        self.changes.clear_changes(target.object_id(), property_keys)
    }

    /// Drops all records and throttle state for `target`
    pub fn reset_changes(&mut self, target: &dyn SyncTarget) {
        self.changes.reset_changes(target.object_id());
    }

    /// Incremental message for `target`, or `None` when nothing is pending.
    ///
    /// Nothing is cleared; see [`Self::create_batch`] and [`Self::flush`].
    pub fn create_sync_data(&mut self, target: &dyn SyncTarget) -> Option<SyncMessage> {
        let now = self.clock.now_ms();
        self.changes.create_sync_data(&self.registry, target, now)
    }

    /// Message carrying every declared field's current value
    pub fn create_full_sync(&mut self, target: &dyn SyncTarget) -> Option<SyncMessage> {
        let now = self.clock.now_ms();
        self.changes.create_full_sync(&self.registry, target, now)
    }

    /// One message per object with pending changes. The packed changes are
    /// cleared.
    pub fn create_batch(&mut self, targets: &[&dyn SyncTarget]) -> Vec<SyncMessage> {
        let mut messages = Vec::new();
        for target in self.changes.filter_components_with_changes(targets) {
            if let Some(message) = self.create_sync_data(target) {
                self.clear_packed(target, &message);
                messages.push(message);
            }
        }
        messages
    }

    /// Writes an incoming message into `target` without recording changes.
    ///
    /// Per-field failures are listed in the report instead of aborting.
    pub fn apply_sync_data(&mut self, target: &mut dyn SyncTarget, message: &SyncMessage) -> ApplyReport {
        let report = self.changes.apply_sync_data(&self.registry, target, message);
        debug!(
            "Applied seq {} from {} to {}: {} fields, {} skipped",
            message.sync_sequence,
            message.sender_id,
            message.network_id,
            report.applied.len(),
            report.skipped.len()
        );
        report
    }

    /// The subset of `targets` with pending changes
    pub fn filter_components_with_changes<'a, S>(&self, targets: &[&'a S]) -> Vec<&'a S>
    where
        S: SyncTarget + ?Sized,
    {
        self.changes.filter_components_with_changes(targets)
    }

    /// Diagnostic counts for `target`'s ledger
    pub fn component_change_stats(&self, target: &dyn SyncTarget) -> ComponentChangeStats {
        self.changes.component_change_stats(target.object_id())
    }

    /// Whether `client_id`, or the local client, may write `target`
    pub fn has_authority(&mut self, target: &dyn SyncTarget, client_id: Option<&str>) -> bool {
        self.authority.has_authority(target, client_id)
    }

    pub fn evaluate_authority(&mut self, target: &dyn SyncTarget, client_id: Option<&str>) -> AuthorityDecision {
        self.authority.evaluate(target, client_id)
    }

    /// Builds, encodes, and sends the object's pending changes.
    ///
    /// Changes are cleared only after the transport accepts the bytes.
    /// Returns false when nothing was pending.
    pub fn flush<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        target: &dyn SyncTarget,
    ) -> Result<bool, TransportError> {
        let Some(message) = self.create_sync_data(target) else {
            return Ok(false);
        };
        transport.send(message.encode()?)?;
        self.clear_packed(target, &message);
        Ok(true)
    }

    /// Decodes bytes delivered by the transport
    pub fn receive(&self, bytes: &[u8]) -> Result<SyncMessage, WireError> {
        SyncMessage::decode(bytes)
    }

    fn clear_packed(&mut self, target: &dyn SyncTarget, message: &SyncMessage) {
        let keys: Vec<&str> = message
            .field_updates
            .iter()
            .map(|update| update.property_key.as_str())
            .collect();
        self.changes
            .clear_changes(target.object_id(), Some(keys.as_slice()));
    }
}
