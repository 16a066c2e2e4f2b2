//! Error types for the replication core
//!
//! None of these are fatal to the host process. The change manager logs
//! them and drops the single field change they belong to.

use thiserror::Error;

/// Failure while encoding or decoding one field value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("empty value payload")]
    Empty,
    #[error("unknown value tag {0}")]
    UnknownTag(u8),
    #[error("truncated {kind} payload: need {needed} bytes, have {available}")]
    Truncated {
        kind: &'static str,
        needed: usize,
        available: usize,
    },
    #[error("invalid boolean byte {0:#04x}")]
    InvalidBool(u8),
    #[error("invalid UTF-8 in string payload")]
    InvalidUtf8,
    #[error("structured payload is not valid JSON: {0}")]
    Json(String),
    #[error("payload length {0} does not fit in a u32 prefix")]
    TooLong(usize),
    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),
    #[error("custom codec failed: {0}")]
    Custom(String),
}

/// Failure while framing or parsing a whole sync message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("message truncated while reading {0}")]
    Truncated(&'static str),
    #[error("{field} length {len} exceeds limit {max}")]
    StringTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),
    #[error("invalid flag byte {value:#04x} in {field}")]
    InvalidFlag { field: &'static str, value: u8 },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
}

/// Rejected field declaration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeclarationError {
    #[error("type name must not be empty")]
    EmptyTypeName,
    #[error("property key on {type_name} must be a non-empty name")]
    InvalidPropertyKey { type_name: String },
    #[error("field numbers for {type_name} are exhausted")]
    FieldNumbersExhausted { type_name: String },
}

/// One failed check from `initialize_component`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{type_name}.{field}: hook {hook} is not implemented")]
    MissingHook {
        type_name: String,
        field: String,
        hook: String,
    },
    #[error("{type_name}.{field}: hook name is empty")]
    EmptyHook { type_name: String, field: String },
    #[error("{type_name}.{field}: custom codec needs both an encoder and a decoder")]
    IncompleteCodec { type_name: String, field: String },
    #[error("{type_name}.{field}: declared field is not readable on the object")]
    UnreadableField { type_name: String, field: String },
}

/// Failure reported by a field hook
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HookError {
    #[error("hook {0} is not implemented")]
    Missing(String),
    #[error("hook {hook} failed: {reason}")]
    Failed { hook: String, reason: String },
}

/// Failure inside the authority engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorityError {
    #[error("rule {rule} failed: {reason}")]
    RuleFailed { rule: String, reason: String },
    #[error("rule {0} is already registered")]
    DuplicateRule(String),
    #[error("rule {0} is not registered")]
    UnknownRule(String),
}

/// Failure at the transport boundary
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("packet encoding failed: {0}")]
    Packet(#[from] bincode::Error),
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Failure while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid sync config: {0}")]
    Json(#[from] serde_json::Error),
}
