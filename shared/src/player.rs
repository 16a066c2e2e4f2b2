//! Replicated per-player state shared by the server and client binaries

use crate::error::{CodecError, DeclarationError, HookError};
use crate::registry::{FieldOptions, FieldRegistry};
use crate::value::FieldValue;
use crate::Replicated;
use serde_json::json;

pub const TYPE_NAME: &str = "PlayerState";
pub const NAME_HOOK: &str = "on_name_changed";
pub const POSITION_THROTTLE_MS: u32 = 100;
pub const START_HEALTH: f64 = 100.0;

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerState {
    pub health: f64,
    pub player_name: String,
    /// Only the server may flip this
    pub is_ready: bool,
    pub position: (f64, f64),
    pub score: u32,

    // Local only
    pub owner: Option<String>,
    pub name_changes: Vec<(String, String)>,
}

impl PlayerState {
    /// A fresh player at full health at the origin
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            health: START_HEALTH,
            player_name: name.into(),
            is_ready: false,
            position: (0.0, 0.0),
            score: 0,
            owner: None,
            name_changes: Vec::new(),
        }
    }

    pub fn with_owner(mut self, client_id: impl Into<String>) -> Self {
        self.owner = Some(client_id.into());
        self
    }
}

fn is_score(n: f64) -> bool {
    n.fract() == 0.0 && (0.0..=f64::from(u32::MAX)).contains(&n)
}

fn encode_score(value: &FieldValue) -> Result<Vec<u8>, CodecError> {
    let score = value
        .as_f64()
        .filter(|n| is_score(*n))
        .ok_or_else(|| CodecError::Custom(format!("score must be a u32, got {}", value)))?;
    Ok((score as u32).to_le_bytes().to_vec())
}

fn decode_score(bytes: &[u8]) -> Result<FieldValue, CodecError> {
    let raw: [u8; 4] = bytes.try_into().map_err(|_| CodecError::Truncated {
        kind: "score",
        needed: 4,
        available: bytes.len(),
    })?;
    Ok(FieldValue::Number(f64::from(u32::from_le_bytes(raw))))
}

impl Replicated for PlayerState {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn declare_fields(registry: &mut FieldRegistry) -> Result<(), DeclarationError> {
        registry.declare(TYPE_NAME, "health", FieldOptions::new())?;
        registry.declare(TYPE_NAME, "playerName", FieldOptions::new().hook(NAME_HOOK))?;
        registry.declare(TYPE_NAME, "isReady", FieldOptions::new().authority_only())?;
        registry.declare(
            TYPE_NAME,
            "position",
            FieldOptions::new().throttle_ms(POSITION_THROTTLE_MS),
        )?;
        registry.declare(
            TYPE_NAME,
            "score",
            FieldOptions::new().codec(encode_score, decode_score),
        )?;
        Ok(())
    }

    fn get_field(&self, key: &str) -> Option<FieldValue> {
        match key {
            "health" => Some(FieldValue::Number(self.health)),
            "playerName" => Some(FieldValue::String(self.player_name.clone())),
            "isReady" => Some(FieldValue::Bool(self.is_ready)),
            "position" => Some(FieldValue::Structured(
                json!({ "x": self.position.0, "y": self.position.1 }),
            )),
            "score" => Some(FieldValue::Number(f64::from(self.score))),
            _ => None,
        }
    }

    fn set_field(&mut self, key: &str, value: FieldValue) -> bool {
        match (key, value) {
            ("health", FieldValue::Number(n)) => self.health = n,
            ("playerName", FieldValue::String(s)) => self.player_name = s,
            ("isReady", FieldValue::Bool(b)) => self.is_ready = b,
            ("position", FieldValue::Structured(v)) => {
                match (v.get("x").and_then(|x| x.as_f64()), v.get("y").and_then(|y| y.as_f64())) {
                    (Some(x), Some(y)) => self.position = (x, y),
                    _ => return false,
                }
            }
            ("score", FieldValue::Number(n)) if is_score(n) => self.score = n as u32,
            _ => return false,
        }
        true
    }

    fn has_hook(&self, name: &str) -> bool {
        name == NAME_HOOK
    }

    fn call_hook(&mut self, name: &str, old: &FieldValue, new: &FieldValue) -> Result<(), HookError> {
        if name != NAME_HOOK {
            return Err(HookError::Missing(name.to_string()));
        }
        let (Some(old), Some(new)) = (old.as_str(), new.as_str()) else {
            return Err(HookError::Failed {
                hook: name.to_string(),
                reason: format!("expected names, got {} -> {}", old, new),
            });
        };
        self.name_changes.push((old.to_string(), new.to_string()));
        Ok(())
    }

    fn owner_id(&self) -> Option<&str> {
        self.owner.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;

    #[test]
    fn test_declares_in_order() {
        let mut registry = FieldRegistry::new();
        PlayerState::declare_fields(&mut registry).unwrap();

        let numbers: Vec<(u16, &str)> = registry
            .metadata_for(TYPE_NAME)
            .iter()
            .map(|d| (d.field_number, d.property_key.as_str()))
            .collect();
        assert_eq!(
            numbers,
            vec![(1, "health"), (2, "playerName"), (3, "isReady"), (4, "position"), (5, "score")]
        );
    }

    #[test]
    fn test_position_roundtrips_through_fields() {
        let mut player = PlayerState::new("A");
        assert!(player.set_field("position", FieldValue::from(json!({"x": 3.5, "y": -1}))));
        assert_eq!(player.position, (3.5, -1.0));
        assert!(!player.set_field("position", FieldValue::from(json!({"x": 1}))));
    }

    #[test]
    fn test_score_codec_frames_custom_payload() {
        let mut registry = FieldRegistry::new();
        PlayerState::declare_fields(&mut registry).unwrap();
        let declaration = registry.field(TYPE_NAME, "score").unwrap();

        let slot = declaration.encode_value(&FieldValue::Number(258.0)).unwrap();
        assert_eq!(slot[0], codec::TAG_CUSTOM);
        assert_eq!(&slot[5..], &[2, 1, 0, 0]);
        assert_eq!(declaration.decode_value(&slot).unwrap(), FieldValue::Number(258.0));

        assert!(declaration.encode_value(&FieldValue::Number(-1.0)).is_err());
    }

    #[test]
    fn test_hook_rejects_non_strings() {
        let mut player = PlayerState::new("A");
        assert!(player
            .call_hook(NAME_HOOK, &FieldValue::Null, &FieldValue::from("B"))
            .is_err());
        assert!(player.name_changes.is_empty());
    }
}
