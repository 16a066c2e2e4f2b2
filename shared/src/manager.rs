//! Change manager: per-object ledgers, outgoing message assembly, and
//! incoming message application
//!
//! The manager decides whether a write becomes a change ([`ChangeManager::evaluate_write`])
//! and owns the resulting history. It never writes field storage on the
//! local-write path; [`crate::Synced`] stores values according to the
//! decision. On the apply path it writes storage directly so remote values
//! are never recorded as new outgoing changes.

use crate::authority::AuthorityEngine;
use crate::change::{ChangeRecord, ComponentChangeStats, ObjectChangeLedger};
use crate::component::{run_hook, ObjectId, Replicated, SyncTarget};
use crate::error::{CodecError, ValidationError};
use crate::message::{FieldUpdate, SyncMessage};
use crate::registry::{FieldDeclaration, FieldRegistry};
use crate::value::FieldValue;
use log::{debug, error, warn};
use std::collections::HashMap;

/// What happened to one tracked write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Not a declared field; stored without tracking
    Unobserved,
    /// The object was never initialized; stored without tracking
    Unregistered,
    /// Equal to the current value; stored, nothing recorded
    Unchanged,
    /// Inside the field's throttle window; stored, nothing recorded
    Throttled,
    /// Authority-only field without authority; not stored
    Denied,
    /// Stored and recorded
    Recorded { needs_sync: bool },
    /// The object refused the value
    Rejected,
}

impl WriteOutcome {
    /// Whether the new value should reach storage
    pub fn stores_value(self) -> bool {
        !matches!(self, WriteOutcome::Denied | WriteOutcome::Rejected)
    }

    /// Whether the write produced a change record
    pub fn is_recorded(self) -> bool {
        matches!(self, WriteOutcome::Recorded { .. })
    }
}

/// Why a field update in an incoming message was not applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    UnknownField,
    Codec(CodecError),
    Rejected,
}

/// Outcome of applying one incoming message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Property keys written, in message order
    pub applied: Vec<String>,
    pub skipped: Vec<(u16, SkipReason)>,
    pub hook_failures: usize,
    /// The whole message was addressed to a different object
    pub rejected: bool,
}

#[derive(Debug)]
pub struct ChangeManager {
    ledgers: HashMap<ObjectId, ObjectChangeLedger>,
    sender_id: String,
    next_sequence: u32,
}

impl ChangeManager {
    /// Creates a manager stamping outgoing messages with `sender_id`
    pub fn new(sender_id: impl Into<String>) -> Self {
        Self {
            ledgers: HashMap::new(),
            sender_id: sender_id.into(),
            next_sequence: 0,
        }
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    /// Checks every declaration on the component's type against the object
    pub fn validate(registry: &FieldRegistry, component: &dyn Replicated) -> Vec<ValidationError> {
        let type_name = component.type_name();
        let mut errors = Vec::new();

        for declaration in registry.metadata_for(type_name) {
            let field = &declaration.property_key;

            if component.get_field(field).is_none() {
                errors.push(ValidationError::UnreadableField {
                    type_name: type_name.to_string(),
                    field: field.clone(),
                });
            }

            if let Some(hook) = &declaration.hook {
                if hook.trim().is_empty() {
                    errors.push(ValidationError::EmptyHook {
                        type_name: type_name.to_string(),
                        field: field.clone(),
                    });
                } else if !component.has_hook(hook) {
                    errors.push(ValidationError::MissingHook {
                        type_name: type_name.to_string(),
                        field: field.clone(),
                        hook: hook.clone(),
                    });
                }
            }

            if declaration.serializer.is_some() != declaration.deserializer.is_some() {
                errors.push(ValidationError::IncompleteCodec {
                    type_name: type_name.to_string(),
                    field: field.clone(),
                });
            }
        }

        errors
    }

    /// Validates the object's declarations and allocates its ledger.
    ///
    /// Nothing is registered if any check fails. Initializing an already
    /// registered object keeps its existing ledger.
    pub fn initialize_component(
        &mut self,
        registry: &FieldRegistry,
        target: &dyn SyncTarget,
    ) -> Result<(), Vec<ValidationError>> {
        let errors = Self::validate(registry, target.component());
        if !errors.is_empty() {
            return Err(errors);
        }

        self.ledgers.entry(target.object_id()).or_default();
        debug!(
            "Registered {} {} ({} fields)",
            target.component().type_name(),
            target.object_id(),
            registry.metadata_for(target.component().type_name()).len()
        );
        Ok(())
    }

    /// Drops the object's ledger.
    ///
    /// Returns false if the object was never registered.
    pub fn unregister_component(&mut self, id: ObjectId) -> bool {
        self.ledgers.remove(&id).is_some()
    }

    /// Whether the object has a ledger
    pub fn is_registered(&self, id: ObjectId) -> bool {
        self.ledgers.contains_key(&id)
    }

    /// Read access to an object's full change history
    pub fn ledger(&self, id: ObjectId) -> Option<&ObjectChangeLedger> {
        self.ledgers.get(&id)
    }

    /// Decides what a write of `new` over `old` should do. Does not mutate
    /// the ledger.
    pub fn evaluate_write(
        &self,
        authority: &mut AuthorityEngine,
        target: &dyn SyncTarget,
        declaration: &FieldDeclaration,
        old: &FieldValue,
        new: &FieldValue,
        now_ms: u64,
    ) -> WriteOutcome {
        let Some(ledger) = self.ledgers.get(&target.object_id()) else {
            return WriteOutcome::Unregistered;
        };

        if old.shallow_eq(new) {
            return WriteOutcome::Unchanged;
        }

        if declaration.authority_only && !authority.has_authority(target, None) {
            return WriteOutcome::Denied;
        }

        if ledger.is_throttled(&declaration.property_key, declaration.throttle_ms, now_ms) {
            return WriteOutcome::Throttled;
        }

        WriteOutcome::Recorded {
            needs_sync: authority.should_sync(target, declaration),
        }
    }

    /// Appends a change record. Returns false if the object is not registered.
    pub fn commit_change(
        &mut self,
        id: ObjectId,
        declaration: &FieldDeclaration,
        old: FieldValue,
        new: FieldValue,
        needs_sync: bool,
        now_ms: u64,
    ) -> bool {
        let Some(ledger) = self.ledgers.get_mut(&id) else {
            warn!("Dropping change to {} on unregistered object {}", declaration.property_key, id);
            return false;
        };

        ledger.push(ChangeRecord {
            property_key: declaration.property_key.clone(),
            field_number: declaration.field_number,
            old_value: old,
            new_value: new,
            timestamp_ms: now_ms,
            needs_sync,
            authority_only: declaration.authority_only,
        });
        true
    }

    /// Evaluates a write and records it when it counts as a change.
    ///
    /// Field storage is the caller's responsibility: store `new` whenever
    /// the returned outcome [`WriteOutcome::stores_value`].
    #[allow(clippy::too_many_arguments)]
    pub fn record_change(
        &mut self,
        registry: &FieldRegistry,
        authority: &mut AuthorityEngine,
        target: &dyn SyncTarget,
        property_key: &str,
        old: &FieldValue,
        new: &FieldValue,
        now_ms: u64,
    ) -> WriteOutcome {
        let Some(declaration) = registry.field(target.component().type_name(), property_key) else {
            return WriteOutcome::Unobserved;
        };

        let outcome = self.evaluate_write(authority, target, declaration, old, new, now_ms);
        if let WriteOutcome::Recorded { needs_sync } = outcome {
            self.commit_change(
                target.object_id(),
                declaration,
                old.clone(),
                new.clone(),
                needs_sync,
                now_ms,
            );
        }
        outcome
    }

    /// Records waiting to be sent, in recording order
    pub fn pending_changes(&self, id: ObjectId) -> Vec<&ChangeRecord> {
        self.ledgers
            .get(&id)
            .map(|ledger| ledger.pending().collect())
            .unwrap_or_default()
    }

    /// Whether the object has anything left to send
    pub fn has_pending_changes(&self, id: ObjectId) -> bool {
        self.ledgers.get(&id).is_some_and(ObjectChangeLedger::has_pending)
    }

    /// Removes records for the given keys, or all records. Returns the
    /// number removed.
    pub fn clear_changes(&mut self, id: ObjectId, property_keys: Option<&[&str]>) -> usize {
        self.ledgers
            .get_mut(&id)
            .map(|ledger| ledger.clear(property_keys))
            .unwrap_or(0)
    }

    /// Drops all records and throttle state for the object
    pub fn reset_changes(&mut self, id: ObjectId) {
        if let Some(ledger) = self.ledgers.get_mut(&id) {
            ledger.reset();
        }
    }

    /// Builds an incremental message from pending changes.
    ///
    /// Returns `None` when nothing is pending. Pending records are not
    /// cleared; call [`Self::clear_changes`] once the message is sent.
    /// Records that cannot be encoded are dropped from the pending set and
    /// kept only as history.
    pub fn create_sync_data(
        &mut self,
        registry: &FieldRegistry,
        target: &dyn SyncTarget,
        now_ms: u64,
    ) -> Option<SyncMessage> {
        let type_name = target.component().type_name();
        let ledger = self.ledgers.get_mut(&target.object_id())?;

        let mut field_updates = Vec::new();
        let mut unsendable = Vec::new();
        for (position, record) in ledger.changes().iter().enumerate() {
            if !record.needs_sync {
                continue;
            }
            let Some(declaration) = registry.field(type_name, &record.property_key) else {
                warn!("{}.{} is no longer declared, dropping change", type_name, record.property_key);
                unsendable.push(position);
                continue;
            };
            match declaration.encode_value(&record.new_value) {
                Ok(payload) => field_updates.push(FieldUpdate {
                    field_number: record.field_number,
                    property_key: record.property_key.clone(),
                    payload,
                    old_value: record.old_value.clone(),
                    timestamp_ms: record.timestamp_ms,
                    authority_only: record.authority_only,
                }),
                Err(e) => {
                    error!("Failed to encode {}.{}, dropping change: {}", type_name, record.property_key, e);
                    unsendable.push(position);
                }
            }
        }
        ledger.retire(&unsendable);

        if field_updates.is_empty() {
            return None;
        }

        Some(self.message(target, field_updates, false, now_ms))
    }

    /// Builds a message carrying the current value of every declared field
    pub fn create_full_sync(
        &mut self,
        registry: &FieldRegistry,
        target: &dyn SyncTarget,
        now_ms: u64,
    ) -> Option<SyncMessage> {
        let component = target.component();
        let type_name = component.type_name();

        let mut field_updates = Vec::new();
        for declaration in registry.metadata_for(type_name) {
            let value = component
                .get_field(&declaration.property_key)
                .unwrap_or_default();
            match declaration.encode_value(&value) {
                Ok(payload) => field_updates.push(FieldUpdate {
                    field_number: declaration.field_number,
                    property_key: declaration.property_key.clone(),
                    payload,
                    old_value: value,
                    timestamp_ms: now_ms,
                    authority_only: declaration.authority_only,
                }),
                Err(e) => error!("Failed to encode {}.{}: {}", type_name, declaration.property_key, e),
            }
        }

        if field_updates.is_empty() {
            return None;
        }

        Some(self.message(target, field_updates, true, now_ms))
    }

    /// Writes an incoming message into the target's storage.
    ///
    /// Storage is written directly, so nothing applied here is recorded as
    /// a new outgoing change. Pending local changes to the applied fields
    /// are cleared. Each field fails independently.
    pub fn apply_sync_data(
        &mut self,
        registry: &FieldRegistry,
        target: &mut dyn SyncTarget,
        message: &SyncMessage,
    ) -> ApplyReport {
        let mut report = ApplyReport::default();
        let type_name = target.component().type_name();

        if message.component_type != type_name {
            warn!(
                "Rejecting {} message for {} object {}",
                message.component_type,
                type_name,
                target.object_id()
            );
            report.rejected = true;
            return report;
        }

        if message.network_id != target.identity().network_id {
            warn!(
                "Rejecting message for {} addressed to {}",
                target.identity().network_id,
                message.network_id
            );
            report.rejected = true;
            return report;
        }

        for update in &message.field_updates {
            let Some(declaration) = registry.field_by_number(type_name, update.field_number) else {
                warn!(
                    "Unknown field number {} ({}) for {}, skipping",
                    update.field_number, update.property_key, type_name
                );
                report.skipped.push((update.field_number, SkipReason::UnknownField));
                continue;
            };

            if declaration.property_key != update.property_key {
                debug!(
                    "Field {} of {} is {} locally but {} in message",
                    update.field_number, type_name, declaration.property_key, update.property_key
                );
            }

            let value = match declaration.decode_value(&update.payload) {
                Ok(value) => value,
                Err(e) => {
                    error!("Failed to decode {}.{}: {}", type_name, declaration.property_key, e);
                    report.skipped.push((update.field_number, SkipReason::Codec(e)));
                    continue;
                }
            };

            let component = target.component_mut();
            let old = component
                .get_field(&declaration.property_key)
                .unwrap_or_default();

            if !component.set_field(&declaration.property_key, value.clone()) {
                warn!("{} refused value {} for {}", type_name, value, declaration.property_key);
                report.skipped.push((update.field_number, SkipReason::Rejected));
                continue;
            }

            if let Some(hook) = &declaration.hook {
                if !run_hook(component, hook, &old, &value) {
                    report.hook_failures += 1;
                }
            }

            report.applied.push(declaration.property_key.clone());
        }

        if !report.applied.is_empty() {
            let keys: Vec<&str> = report.applied.iter().map(String::as_str).collect();
            self.clear_changes(target.object_id(), Some(keys.as_slice()));
        }

        report
    }

    /// The subset of `targets` with at least one pending change
    pub fn filter_components_with_changes<'a, S>(&self, targets: &[&'a S]) -> Vec<&'a S>
    where
        S: SyncTarget + ?Sized,
    {
        targets
            .iter()
            .copied()
            .filter(|target| self.has_pending_changes(target.object_id()))
            .collect()
    }

    /// Ledger summary for diagnostics. Unregistered objects report zeros.
    pub fn component_change_stats(&self, id: ObjectId) -> ComponentChangeStats {
        self.ledgers
            .get(&id)
            .map(ObjectChangeLedger::stats)
            .unwrap_or_default()
    }

    fn message(
        &mut self,
        target: &dyn SyncTarget,
        field_updates: Vec<FieldUpdate>,
        is_full_sync: bool,
        now_ms: u64,
    ) -> SyncMessage {
        let sync_sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);

        SyncMessage {
            component_type: target.component().type_name().to_string(),
            network_id: target.identity().network_id.clone(),
            field_updates,
            is_full_sync,
            sender_id: self.sender_id.clone(),
            sync_sequence,
            timestamp_ms: now_ms,
        }
    }
}
