//! Field-level state replication
//!
//! Declared fields on replicated objects are tracked through [`Synced`],
//! recorded per object by the [`ChangeManager`], gated by the
//! [`AuthorityEngine`], and shipped as compact [`SyncMessage`] deltas.
//! Everything a process needs lives in one [`SyncContext`].

pub mod authority;
pub mod change;
pub mod clock;
pub mod codec;
pub mod component;
pub mod config;
pub mod context;
pub mod error;
pub mod interceptor;
pub mod manager;
pub mod message;
pub mod player;
pub mod registry;
pub mod transport;
pub mod value;

pub use authority::{
    default_rules, AuthorityContext, AuthorityDecision, AuthorityEngine, AuthorityLevel,
    AuthorityRule,
};
pub use change::{ChangeRecord, ComponentChangeStats, ObjectChangeLedger};
pub use clock::{Clock, ManualClock, SystemClock};
pub use component::{NetworkIdentity, ObjectId, Replicated, SyncTarget};
pub use config::{Environment, SyncConfig};
pub use context::SyncContext;
pub use error::{
    AuthorityError, CodecError, ConfigError, DeclarationError, HookError, TransportError,
    ValidationError, WireError,
};
pub use interceptor::Synced;
pub use manager::{ApplyReport, ChangeManager, SkipReason, WriteOutcome};
pub use message::{FieldUpdate, SyncMessage};
pub use player::PlayerState;
pub use registry::{FieldDeclaration, FieldOptions, FieldRegistry};
pub use transport::{LoopbackTransport, Packet, Transport, PROTOCOL_VERSION};
pub use value::{FieldValue, ValueKind};
