//! Per-object change ledger

use crate::value::FieldValue;
use std::collections::{BTreeMap, HashMap};

/// One observed value change on one field
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub property_key: String,
    pub field_number: u16,
    pub old_value: FieldValue,
    pub new_value: FieldValue,
    pub timestamp_ms: u64,
    /// False for history-only records that must not be sent
    pub needs_sync: bool,
    pub authority_only: bool,
}

/// Diagnostic snapshot of an object's ledger
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentChangeStats {
    pub total_changes: usize,
    pub pending_changes: usize,
    pub last_change_ms: Option<u64>,
    pub changes_by_field: BTreeMap<String, usize>,
    pub has_authority_changes: bool,
}

/// Append-only change history for one registered object
#[derive(Debug, Default)]
pub struct ObjectChangeLedger {
    changes: Vec<ChangeRecord>,
    last_sync_time: HashMap<String, u64>,
}

impl ObjectChangeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record and stamps the field's last sync time
    pub fn push(&mut self, record: ChangeRecord) {
        self.last_sync_time
            .insert(record.property_key.clone(), record.timestamp_ms);
        self.changes.push(record);
    }

    /// Every record, sent or not, in recording order
    pub fn changes(&self) -> &[ChangeRecord] {
        &self.changes
    }

    /// Records still waiting to be sent, in recording order
    pub fn pending(&self) -> impl Iterator<Item = &ChangeRecord> {
        self.changes.iter().filter(|record| record.needs_sync)
    }

    /// Whether any record still needs sending
    pub fn has_pending(&self) -> bool {
        self.changes.iter().any(|record| record.needs_sync)
    }

    /// Timestamp of the last recorded change to the field
    pub fn last_sync_time(&self, property_key: &str) -> Option<u64> {
        self.last_sync_time.get(property_key).copied()
    }

    /// Whether a write at `now_ms` falls inside the field's throttle window
    pub fn is_throttled(&self, property_key: &str, throttle_ms: u32, now_ms: u64) -> bool {
        if throttle_ms == 0 {
            return false;
        }
        self.last_sync_time(property_key)
            .is_some_and(|last| now_ms.saturating_sub(last) < u64::from(throttle_ms))
    }

    /// Removes records for the given keys, or every record when `None`.
    ///
    /// Throttle timestamps are kept. Returns the number of records removed.
    pub fn clear(&mut self, property_keys: Option<&[&str]>) -> usize {
        let before = self.changes.len();
        match property_keys {
            Some(keys) => self
                .changes
                .retain(|record| !keys.contains(&record.property_key.as_str())),
            None => self.changes.clear(),
        }
        before - self.changes.len()
    }

    /// Marks the records at `positions` as already handled, keeping them
    /// as history. Returns how many were still pending.
    pub fn retire(&mut self, positions: &[usize]) -> usize {
        let mut retired = 0;
        for &position in positions {
            if let Some(record) = self.changes.get_mut(position) {
                if record.needs_sync {
                    record.needs_sync = false;
                    retired += 1;
                }
            }
        }
        retired
    }

    /// Drops all records and throttle state
    pub fn reset(&mut self) {
        self.changes.clear();
        self.last_sync_time.clear();
    }

    /// Summarizes the ledger for diagnostics
    pub fn stats(&self) -> ComponentChangeStats {
        let mut changes_by_field = BTreeMap::new();
        for record in &self.changes {
            *changes_by_field
                .entry(record.property_key.clone())
                .or_insert(0) += 1;
        }

        ComponentChangeStats {
            total_changes: self.changes.len(),
            pending_changes: self.pending().count(),
            last_change_ms: self.changes.iter().map(|r| r.timestamp_ms).max(),
            changes_by_field,
            has_authority_changes: self.changes.iter().any(|r| r.authority_only),
        }
    }
}
