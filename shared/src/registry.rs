//! Field declaration registry
//!
//! Maps each replicated type to its declared fields. Field numbers are
//! assigned per type in declaration order starting at 1 and are never
//! reused: re-declaring a field replaces its options but keeps its number.

use crate::codec::{self, DecodeFn, EncodeFn};
use crate::error::{CodecError, DeclarationError};
use crate::value::FieldValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Per-field sync policy supplied at declaration time
#[derive(Clone, Default)]
pub struct FieldOptions {
    pub hook: Option<String>,
    pub authority_only: bool,
    pub serializer: Option<EncodeFn>,
    pub deserializer: Option<DecodeFn>,
    pub throttle_ms: u32,
}

impl FieldOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hook invoked as `hook(old, new)` after every value change
    pub fn hook(mut self, name: impl Into<String>) -> Self {
        self.hook = Some(name.into());
        self
    }

    /// Only a process holding authority may write the field
    pub fn authority_only(mut self) -> Self {
        self.authority_only = true;
        self
    }

    /// Minimum time between two recorded changes of the field
    pub fn throttle_ms(mut self, ms: u32) -> Self {
        self.throttle_ms = ms;
        self
    }

    /// Replaces the default value codec for this field
    pub fn codec<E, D>(mut self, encode: E, decode: D) -> Self
    where
        E: Fn(&FieldValue) -> Result<Vec<u8>, CodecError> + Send + Sync + 'static,
        D: Fn(&[u8]) -> Result<FieldValue, CodecError> + Send + Sync + 'static,
    {
        self.serializer = Some(Arc::new(encode));
        self.deserializer = Some(Arc::new(decode));
        self
    }
}

impl fmt::Debug for FieldOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldOptions")
            .field("hook", &self.hook)
            .field("authority_only", &self.authority_only)
            .field("serializer", &self.serializer.is_some())
            .field("deserializer", &self.deserializer.is_some())
            .field("throttle_ms", &self.throttle_ms)
            .finish()
    }
}

/// One declared field on one type
#[derive(Clone)]
pub struct FieldDeclaration {
    pub property_key: String,
    pub field_number: u16,
    pub hook: Option<String>,
    pub authority_only: bool,
    pub serializer: Option<EncodeFn>,
    pub deserializer: Option<DecodeFn>,
    pub throttle_ms: u32,
}

impl FieldDeclaration {
    fn new(property_key: &str, field_number: u16, options: FieldOptions) -> Self {
        let mut declaration = Self {
            property_key: property_key.to_string(),
            field_number,
            hook: None,
            authority_only: false,
            serializer: None,
            deserializer: None,
            throttle_ms: 0,
        };
        declaration.apply(options);
        declaration
    }

    fn apply(&mut self, options: FieldOptions) {
        self.hook = options.hook;
        self.authority_only = options.authority_only;
        self.serializer = options.serializer;
        self.deserializer = options.deserializer;
        self.throttle_ms = options.throttle_ms;
    }

    /// Whether the field bypasses the default value codec
    pub fn has_custom_codec(&self) -> bool {
        self.serializer.is_some() || self.deserializer.is_some()
    }

    /// Encodes a value into a message value slot
    pub fn encode_value(&self, value: &FieldValue) -> Result<Vec<u8>, CodecError> {
        match &self.serializer {
            Some(serializer) => codec::frame_custom(&serializer(value)?),
            None => codec::encode(value),
        }
    }

    /// Decodes a message value slot produced by [`Self::encode_value`]
    pub fn decode_value(&self, slot: &[u8]) -> Result<FieldValue, CodecError> {
        match &self.deserializer {
            Some(deserializer) => deserializer(codec::unframe_custom(slot)?),
            None => codec::decode(slot),
        }
    }
}

impl fmt::Debug for FieldDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDeclaration")
            .field("property_key", &self.property_key)
            .field("field_number", &self.field_number)
            .field("hook", &self.hook)
            .field("authority_only", &self.authority_only)
            .field("custom_codec", &self.has_custom_codec())
            .field("throttle_ms", &self.throttle_ms)
            .finish()
    }
}

#[derive(Debug, Default)]
struct TypeFields {
    // Indexed by field_number - 1
    fields: Vec<FieldDeclaration>,
    by_key: HashMap<String, usize>,
}

/// Declared fields for every replicated type
#[derive(Debug, Default)]
pub struct FieldRegistry {
    types: HashMap<String, TypeFields>,
}

impl FieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a field, or replaces the options of an existing one.
    ///
    /// Returns the field number, which is stable for the registry's lifetime.
    pub fn declare(
        &mut self,
        type_name: &str,
        property_key: &str,
        options: FieldOptions,
    ) -> Result<u16, DeclarationError> {
        if type_name.is_empty() {
            return Err(DeclarationError::EmptyTypeName);
        }
        if property_key.trim().is_empty() {
            return Err(DeclarationError::InvalidPropertyKey {
                type_name: type_name.to_string(),
            });
        }

        let entry = self.types.entry(type_name.to_string()).or_default();

        if let Some(&index) = entry.by_key.get(property_key) {
            let declaration = &mut entry.fields[index];
            declaration.apply(options);
            return Ok(declaration.field_number);
        }

        let field_number = u16::try_from(entry.fields.len() + 1).map_err(|_| {
            DeclarationError::FieldNumbersExhausted {
                type_name: type_name.to_string(),
            }
        })?;

        entry
            .fields
            .push(FieldDeclaration::new(property_key, field_number, options));
        entry
            .by_key
            .insert(property_key.to_string(), entry.fields.len() - 1);

        Ok(field_number)
    }

    /// All declarations for a type in field-number order
    pub fn metadata_for(&self, type_name: &str) -> &[FieldDeclaration] {
        self.types
            .get(type_name)
            .map(|entry| entry.fields.as_slice())
            .unwrap_or(&[])
    }

    /// Looks up a declaration by property key
    pub fn field(&self, type_name: &str, property_key: &str) -> Option<&FieldDeclaration> {
        let entry = self.types.get(type_name)?;
        entry.by_key.get(property_key).map(|&i| &entry.fields[i])
    }

    /// Looks up a declaration by wire field number
    pub fn field_by_number(&self, type_name: &str, field_number: u16) -> Option<&FieldDeclaration> {
        let index = usize::from(field_number).checked_sub(1)?;
        self.types.get(type_name)?.fields.get(index)
    }

    /// Whether any field has been declared for the type
    pub fn has_type(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }
}
