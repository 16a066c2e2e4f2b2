//! Host object-model boundary
//!
//! The replication core never sees a host type directly. It reads declared
//! field metadata from the [`FieldRegistry`], reads and writes fields by
//! name through [`Replicated`], and addresses objects through [`SyncTarget`].

use crate::authority::AuthorityContext;
use crate::error::{DeclarationError, HookError};
use crate::registry::FieldRegistry;
use crate::value::FieldValue;
use log::error;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Process-local identity of a replicated object, supplied by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Network-level identity of a replicated object
///
/// `network_id` is the logical identity shared by every peer.
/// `is_local_owner` and `has_authority` describe the local process's
/// relationship to the object and feed the default authority rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkIdentity {
    pub network_id: String,
    pub entity_id: Option<String>,
    pub owner_client_id: Option<String>,
    pub is_local_owner: bool,
    pub has_authority: bool,
}

impl NetworkIdentity {
    /// Identity with no owner, no entity and no local authority
    pub fn new(network_id: impl Into<String>) -> Self {
        Self {
            network_id: network_id.into(),
            ..Default::default()
        }
    }

    /// Sets the client that owns the object
    pub fn with_owner(mut self, client_id: impl Into<String>) -> Self {
        self.owner_client_id = Some(client_id.into());
        self
    }

    pub fn with_entity(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }
}

/// A host type whose declared fields are replicated
///
/// Implementors expose their declared fields by name. `set_field` is raw
/// storage access: it must not trigger change tracking of its own. All
/// tracked writes go through [`crate::Synced::set`].
pub trait Replicated {
    /// Registry key and `componentType` on the wire
    fn type_name(&self) -> &'static str;

    /// Declares this type's replicated fields, in field-number order
    fn declare_fields(registry: &mut FieldRegistry) -> Result<(), DeclarationError>
    where
        Self: Sized;

    /// Current value of a field, or `None` if the type has no such field
    fn get_field(&self, key: &str) -> Option<FieldValue>;

    /// Stores a value. Returns false if the key is unknown or the value
    /// has the wrong shape for the field.
    fn set_field(&mut self, key: &str, value: FieldValue) -> bool;

    /// Whether a hook with this name can be invoked
    fn has_hook(&self, _name: &str) -> bool {
        false
    }

    fn call_hook(
        &mut self,
        name: &str,
        _old: &FieldValue,
        _new: &FieldValue,
    ) -> Result<(), HookError> {
        Err(HookError::Missing(name.to_string()))
    }

    /// The object's own authority check, if it has one
    fn check_authority(&self, _context: &AuthorityContext) -> Option<bool> {
        None
    }

    /// Client id owning the parent entity
    fn owner_id(&self) -> Option<&str> {
        None
    }
}

/// An addressable replicated object: identity plus component access
pub trait SyncTarget {
    fn object_id(&self) -> ObjectId;
    fn identity(&self) -> &NetworkIdentity;
    fn component(&self) -> &dyn Replicated;
    fn component_mut(&mut self) -> &mut dyn Replicated;
}

/// Invokes a declared hook, logging instead of propagating failures
pub(crate) fn run_hook(
    component: &mut dyn Replicated,
    hook: &str,
    old: &FieldValue,
    new: &FieldValue,
) -> bool {
    match component.call_hook(hook, old, new) {
        Ok(()) => true,
        Err(e) => {
            error!("{}: {}", component.type_name(), e);
            false
        }
    }
}
