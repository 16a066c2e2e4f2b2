//! Tracked ownership of a replicated object
//!
//! [`Synced`] owns the host value and hands out only shared references to
//! it, so every write to a declared field has to pass through
//! [`Synced::set`]. Reads go through `Deref` and are never intercepted.

use crate::component::{run_hook, NetworkIdentity, ObjectId, Replicated, SyncTarget};
use crate::context::SyncContext;
use crate::manager::WriteOutcome;
use crate::value::FieldValue;
use log::{debug, warn};
use std::ops::Deref;

#[derive(Debug, Clone)]
pub struct Synced<T: Replicated> {
    id: ObjectId,
    identity: NetworkIdentity,
    inner: T,
}

impl<T: Replicated> Synced<T> {
    /// Wraps a value. Changes are tracked only once the object is
    /// initialized on a context.
    pub fn new(id: ObjectId, identity: NetworkIdentity, inner: T) -> Self {
        Self {
            id,
            identity,
            inner,
        }
    }

    /// Writes a field, recording the change when it counts as one.
    ///
    /// Undeclared keys are stored without tracking. Authority-only fields
    /// are left untouched when the context denies authority. Throttled and
    /// equal writes are stored but not recorded.
    pub fn set(
        &mut self,
        ctx: &mut SyncContext,
        key: &str,
        value: impl Into<FieldValue>,
    ) -> WriteOutcome {
        let new = value.into();

        let Some(declaration) = ctx.registry().field(self.inner.type_name(), key).cloned() else {
            return if self.inner.set_field(key, new) {
                WriteOutcome::Unobserved
            } else {
                WriteOutcome::Rejected
            };
        };

        let old = self.inner.get_field(key).unwrap_or_default();
        let outcome = ctx.evaluate_write(self, &declaration, &old, &new);

        if !outcome.stores_value() {
            debug!(
                "{}.{} on {}: write of {} denied",
                self.inner.type_name(),
                key,
                self.identity.network_id,
                new
            );
            return outcome;
        }

        if !self.inner.set_field(key, new.clone()) {
            warn!("{} refused value {} for {}", self.inner.type_name(), new, key);
            return WriteOutcome::Rejected;
        }

        match outcome {
            WriteOutcome::Recorded { needs_sync } => {
                ctx.commit_change(self, &declaration, old.clone(), new.clone(), needs_sync);
            }
            WriteOutcome::Throttled => {}
            _ => return outcome,
        }

        if let Some(hook) = &declaration.hook {
            run_hook(&mut self.inner, hook, &old, &new);
        }

        outcome
    }

    /// Current value of a field by name
    pub fn get(&self, key: &str) -> Option<FieldValue> {
        self.inner.get_field(key)
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn network_id(&self) -> &str {
        &self.identity.network_id
    }

    /// Updates the local authority flag and drops cached decisions
    pub fn grant_authority(&mut self, ctx: &mut SyncContext, granted: bool) {
        self.identity.has_authority = granted;
        ctx.authority_mut().clear_cache();
    }

    /// Marks whether this process owns the object and drops cached
    /// authority decisions
    pub fn set_local_owner(&mut self, ctx: &mut SyncContext, is_local_owner: bool) {
        self.identity.is_local_owner = is_local_owner;
        ctx.authority_mut().clear_cache();
    }

    /// Mutable access that bypasses change tracking. Writes made here are
    /// never replicated.
    pub fn untracked_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Unwraps the value, leaving any ledger on the context untouched
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Replicated> Deref for Synced<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T: Replicated> SyncTarget for Synced<T> {
    fn object_id(&self) -> ObjectId {
        self.id
    }

    fn identity(&self) -> &NetworkIdentity {
        &self.identity
    }

    fn component(&self) -> &dyn Replicated {
        &self.inner
    }

    fn component_mut(&mut self) -> &mut dyn Replicated {
        &mut self.inner
    }
}
