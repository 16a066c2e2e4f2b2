//! Sync messages and their binary wire format
//!
//! All integers are little-endian. Strings are a u16 byte length followed
//! by UTF-8 bytes.
//!
//! ```text
//! header:  componentType  networkId  senderId
//!          syncSequence u32 | isFullSync u8 | timestampMs u64 | updateCount u32
//! entry:   fieldNumber u16 | propertyKey | authorityOnly u8 | timestampMs u64
//!          value slot (see `codec`)
//! ```

use crate::codec;
use crate::error::{CodecError, WireError};
use crate::value::FieldValue;

/// One field delta inside a [`SyncMessage`]
#[derive(Debug, Clone, PartialEq)]
pub struct FieldUpdate {
    pub field_number: u16,
    pub property_key: String,
    /// Encoded new value, exactly as it appears on the wire
    pub payload: Vec<u8>,
    /// Previous value at the sender. Not carried on the wire; `Null`
    /// after decoding.
    pub old_value: FieldValue,
    pub timestamp_ms: u64,
    pub authority_only: bool,
}

impl FieldUpdate {
    /// Decodes the payload with the default codec
    pub fn new_value(&self) -> Result<FieldValue, CodecError> {
        codec::decode(&self.payload)
    }
}

/// The unit exchanged between peers
#[derive(Debug, Clone, PartialEq)]
pub struct SyncMessage {
    pub component_type: String,
    pub network_id: String,
    pub field_updates: Vec<FieldUpdate>,
    pub is_full_sync: bool,
    pub sender_id: String,
    pub sync_sequence: u32,
    pub timestamp_ms: u64,
}

impl SyncMessage {
    /// Serializes the message in wire order.
    ///
    /// Fails if a string does not fit its u16 length prefix or a value
    /// slot is malformed.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut writer = WireWriter::default();
        writer.string("componentType", &self.component_type)?;
        writer.string("networkId", &self.network_id)?;
        writer.string("senderId", &self.sender_id)?;
        writer.u32(self.sync_sequence);
        writer.flag(self.is_full_sync);
        writer.u64(self.timestamp_ms);

        let count = u32::try_from(self.field_updates.len()).map_err(|_| WireError::StringTooLong {
            field: "fieldUpdates",
            len: self.field_updates.len(),
            max: u32::MAX as usize,
        })?;
        writer.u32(count);

        for update in &self.field_updates {
            writer.u16(update.field_number);
            writer.string("propertyKey", &update.property_key)?;
            writer.flag(update.authority_only);
            writer.u64(update.timestamp_ms);
            // The slot must be a single well-formed value
            let len = codec::slot_len(&update.payload)?;
            if len != update.payload.len() {
                return Err(CodecError::TrailingBytes(update.payload.len() - len).into());
            }
            writer.bytes(&update.payload);
        }

        Ok(writer.finish())
    }

    /// Parses exactly one message. Trailing bytes are an error.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut reader = WireReader::new(bytes);
        let component_type = reader.string("componentType")?;
        let network_id = reader.string("networkId")?;
        let sender_id = reader.string("senderId")?;
        let sync_sequence = reader.u32("syncSequence")?;
        let is_full_sync = reader.flag("isFullSync")?;
        let timestamp_ms = reader.u64("timestampMs")?;
        let count = reader.u32("updateCount")? as usize;

        // Each entry is at least 14 bytes; don't trust the count for allocation
        let mut field_updates = Vec::with_capacity(count.min(reader.remaining() / 14));
        for _ in 0..count {
            let field_number = reader.u16("fieldNumber")?;
            let property_key = reader.string("propertyKey")?;
            let authority_only = reader.flag("authorityOnly")?;
            let timestamp_ms = reader.u64("entry timestampMs")?;
            let payload = reader.slot()?;
            field_updates.push(FieldUpdate {
                field_number,
                property_key,
                payload,
                old_value: FieldValue::Null,
                timestamp_ms,
                authority_only,
            });
        }

        if reader.remaining() > 0 {
            return Err(WireError::TrailingBytes(reader.remaining()));
        }

        Ok(Self {
            component_type,
            network_id,
            field_updates,
            is_full_sync,
            sender_id,
            sync_sequence,
            timestamp_ms,
        })
    }
}

#[derive(Default)]
struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    fn u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn flag(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    fn string(&mut self, field: &'static str, value: &str) -> Result<(), WireError> {
        let len = u16::try_from(value.len()).map_err(|_| WireError::StringTooLong {
            field,
            len: value.len(),
            max: u16::MAX as usize,
        })?;
        self.u16(len);
        self.buf.extend_from_slice(value.as_bytes());
        Ok(())
    }

    fn bytes(&mut self, value: &[u8]) {
        self.buf.extend_from_slice(value);
    }

    fn finish(self) -> Vec<u8> {
        self.buf
    }
}

struct WireReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, len: usize, what: &'static str) -> Result<&'a [u8], WireError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or(WireError::Truncated(what))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self, what: &'static str) -> Result<[u8; N], WireError> {
        let slice = self.take(N, what)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn u16(&mut self, what: &'static str) -> Result<u16, WireError> {
        Ok(u16::from_le_bytes(self.array(what)?))
    }

    fn u32(&mut self, what: &'static str) -> Result<u32, WireError> {
        Ok(u32::from_le_bytes(self.array(what)?))
    }

    fn u64(&mut self, what: &'static str) -> Result<u64, WireError> {
        Ok(u64::from_le_bytes(self.array(what)?))
    }

    fn flag(&mut self, what: &'static str) -> Result<bool, WireError> {
        match self.array::<1>(what)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            value => Err(WireError::InvalidFlag { field: what, value }),
        }
    }

    fn string(&mut self, what: &'static str) -> Result<String, WireError> {
        let len = usize::from(self.u16(what)?);
        let raw = self.take(len, what)?;
        std::str::from_utf8(raw)
            .map(str::to_string)
            .map_err(|_| WireError::InvalidUtf8(what))
    }

    fn slot(&mut self) -> Result<Vec<u8>, WireError> {
        let len = codec::slot_len(&self.bytes[self.pos..]).map_err(|e| match e {
            CodecError::Truncated { .. } | CodecError::Empty => WireError::Truncated("value slot"),
            other => WireError::Codec(other),
        })?;
        Ok(self.take(len, "value slot")?.to_vec())
    }
}
