//! Peer-to-peer wire-message codec.
//!
//! A message is a fixed schedule of little-endian integers and
//! compact-size-prefixed vectors. Only the payload lives here; the network
//! envelope (magic, command, length, checksum fields) is the transport's
//! concern and consumes [`WireMessage::name`] and [`WireMessage::checksum`].

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;
#[cfg(feature = "std")]
use std::vec::Vec;

use bitcoin::hashes::{sha256, Hash, HashEngine};

use crate::script::ScriptError;

/// Width of the zero-padded ASCII command field in the envelope header.
pub const COMMAND_SIZE: usize = 12;

/// Encoded width of `value` as a compact-size integer.
pub fn compact_size_len(value: u64) -> usize {
    match value {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

fn put_compact_size(out: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => out.push(value as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(value as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
}

fn put_byte_string(out: &mut Vec<u8>, bytes: &[u8]) {
    put_compact_size(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

/// Bounds-checked cursor over a message payload.
///
/// Every read fails with [`ScriptError::Truncated`] instead of running past
/// the end of the input.
#[derive(Debug)]
pub struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ScriptError> {
        let end = self.pos.checked_add(len).ok_or(ScriptError::Truncated)?;
        if end > self.bytes.len() {
            return Err(ScriptError::Truncated);
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn read_i32(&mut self) -> Result<i32, ScriptError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(i32::from_le_bytes(buf))
    }

    pub fn read_i64(&mut self) -> Result<i64, ScriptError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(i64::from_le_bytes(buf))
    }

    pub fn read_compact_size(&mut self) -> Result<u64, ScriptError> {
        let marker = self.take(1)?[0];
        match marker {
            0xfd => {
                let mut buf = [0u8; 2];
                buf.copy_from_slice(self.take(2)?);
                Ok(u16::from_le_bytes(buf) as u64)
            }
            0xfe => {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(self.take(4)?);
                Ok(u32::from_le_bytes(buf) as u64)
            }
            0xff => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(self.take(8)?);
                Ok(u64::from_le_bytes(buf))
            }
            short => Ok(short as u64),
        }
    }

    /// Reads a compact-size length followed by that many raw bytes.
    pub fn read_byte_string(&mut self) -> Result<Vec<u8>, ScriptError> {
        let len = self.read_compact_size()?;
        let len = usize::try_from(len).map_err(|_| ScriptError::Truncated)?;
        let bytes = self.take(len)?;
        let mut out = Vec::new();
        out.try_reserve_exact(bytes.len())
            .map_err(|_| ScriptError::OutOfMemory)?;
        out.extend_from_slice(bytes);
        Ok(out)
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn is_done(&self) -> bool {
        self.pos == self.bytes.len()
    }
}

/// A p2p message payload: serialization schedule plus envelope hooks.
pub trait WireMessage {
    /// Zero-padded ASCII command name for the envelope header.
    fn name(&self) -> [u8; COMMAND_SIZE];

    /// Exact number of bytes [`WireMessage::serialize`] emits.
    fn serialized_len(&self) -> usize;

    /// Appends the encoded schedule to `out`.
    fn serialize_into(&self, out: &mut Vec<u8>);

    fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.serialized_len());
        self.serialize_into(&mut out);
        out
    }

    /// First four bytes of a single SHA-256 over the field bytes in schedule
    /// order. Length prefixes are not hashed, only field contents; this is
    /// not the envelope's double-SHA-256 and deliberately so.
    fn checksum(&self) -> [u8; 4];
}

fn command(name: &str) -> [u8; COMMAND_SIZE] {
    let mut out = [0u8; COMMAND_SIZE];
    out[..name.len()].copy_from_slice(name.as_bytes());
    out
}

/// The `alert` message: a signed notice broadcast to the network.
///
/// Field schedule, in serialization order: `version`, `relay_until`,
/// `expiration`, `id`, `cancel`, `set_cancel`, `min_ver`, `max_ver`,
/// `set_sub_ver`, `priority`, `comment`, `status_bar`, `reserved`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Alert {
    pub version: i32,
    pub relay_until: i64,
    pub expiration: i64,
    pub id: i32,
    pub cancel: i32,
    pub set_cancel: Vec<i32>,
    pub min_ver: i32,
    pub max_ver: i32,
    pub set_sub_ver: Vec<Vec<u8>>,
    pub priority: i32,
    pub comment: Vec<u8>,
    pub status_bar: Vec<u8>,
    pub reserved: Vec<u8>,
}

impl Alert {
    /// Reads one alert from `reader`, leaving any trailing bytes unread.
    pub fn deserialize(reader: &mut Reader<'_>) -> Result<Self, ScriptError> {
        let version = reader.read_i32()?;
        let relay_until = reader.read_i64()?;
        let expiration = reader.read_i64()?;
        let id = reader.read_i32()?;
        let cancel = reader.read_i32()?;

        let count = reader.read_compact_size()?;
        // Each entry takes four bytes; a count beyond the remaining input is
        // a truncation, caught before any allocation happens.
        if count > (reader.remaining() / 4) as u64 {
            return Err(ScriptError::Truncated);
        }
        let mut set_cancel = Vec::new();
        set_cancel
            .try_reserve_exact(count as usize)
            .map_err(|_| ScriptError::OutOfMemory)?;
        for _ in 0..count {
            set_cancel.push(reader.read_i32()?);
        }

        let min_ver = reader.read_i32()?;
        let max_ver = reader.read_i32()?;

        let count = reader.read_compact_size()?;
        if count > reader.remaining() as u64 {
            return Err(ScriptError::Truncated);
        }
        let mut set_sub_ver = Vec::new();
        set_sub_ver
            .try_reserve_exact(count as usize)
            .map_err(|_| ScriptError::OutOfMemory)?;
        for _ in 0..count {
            set_sub_ver.push(reader.read_byte_string()?);
        }

        let priority = reader.read_i32()?;
        let comment = reader.read_byte_string()?;
        let status_bar = reader.read_byte_string()?;
        let reserved = reader.read_byte_string()?;

        Ok(Self {
            version,
            relay_until,
            expiration,
            id,
            cancel,
            set_cancel,
            min_ver,
            max_ver,
            set_sub_ver,
            priority,
            comment,
            status_bar,
            reserved,
        })
    }

    /// Decodes an alert from a whole payload buffer.
    pub fn from_payload(payload: &[u8]) -> Result<Self, ScriptError> {
        let mut reader = Reader::new(payload);
        Self::deserialize(&mut reader)
    }
}

impl WireMessage for Alert {
    fn name(&self) -> [u8; COMMAND_SIZE] {
        command("alert")
    }

    fn serialized_len(&self) -> usize {
        let mut len = 4 + 8 + 8 + 4 + 4;
        len += compact_size_len(self.set_cancel.len() as u64) + 4 * self.set_cancel.len();
        len += 4 + 4;
        len += compact_size_len(self.set_sub_ver.len() as u64);
        for sub_ver in &self.set_sub_ver {
            len += compact_size_len(sub_ver.len() as u64) + sub_ver.len();
        }
        len += 4;
        for field in [&self.comment, &self.status_bar, &self.reserved] {
            len += compact_size_len(field.len() as u64) + field.len();
        }
        len
    }

    fn serialize_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.relay_until.to_le_bytes());
        out.extend_from_slice(&self.expiration.to_le_bytes());
        out.extend_from_slice(&self.id.to_le_bytes());
        out.extend_from_slice(&self.cancel.to_le_bytes());
        put_compact_size(out, self.set_cancel.len() as u64);
        for entry in &self.set_cancel {
            out.extend_from_slice(&entry.to_le_bytes());
        }
        out.extend_from_slice(&self.min_ver.to_le_bytes());
        out.extend_from_slice(&self.max_ver.to_le_bytes());
        put_compact_size(out, self.set_sub_ver.len() as u64);
        for sub_ver in &self.set_sub_ver {
            put_byte_string(out, sub_ver);
        }
        out.extend_from_slice(&self.priority.to_le_bytes());
        put_byte_string(out, &self.comment);
        put_byte_string(out, &self.status_bar);
        put_byte_string(out, &self.reserved);
    }

    fn checksum(&self) -> [u8; 4] {
        let mut engine = sha256::Hash::engine();
        engine.input(&self.version.to_le_bytes());
        engine.input(&self.relay_until.to_le_bytes());
        engine.input(&self.expiration.to_le_bytes());
        engine.input(&self.id.to_le_bytes());
        engine.input(&self.cancel.to_le_bytes());
        for entry in &self.set_cancel {
            engine.input(&entry.to_le_bytes());
        }
        engine.input(&self.min_ver.to_le_bytes());
        engine.input(&self.max_ver.to_le_bytes());
        for sub_ver in &self.set_sub_ver {
            engine.input(sub_ver);
        }
        engine.input(&self.priority.to_le_bytes());
        engine.input(&self.comment);
        engine.input(&self.status_bar);
        engine.input(&self.reserved);
        let digest = sha256::Hash::from_engine(engine);
        let mut out = [0u8; 4];
        out.copy_from_slice(&digest.as_byte_array()[..4]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_size_width_forms() {
        assert_eq!(compact_size_len(0), 1);
        assert_eq!(compact_size_len(0xfc), 1);
        assert_eq!(compact_size_len(0xfd), 3);
        assert_eq!(compact_size_len(0xffff), 3);
        assert_eq!(compact_size_len(0x1_0000), 5);
        assert_eq!(compact_size_len(0xffff_ffff), 5);
        assert_eq!(compact_size_len(0x1_0000_0000), 9);
    }

    #[test]
    fn compact_size_roundtrip() {
        for value in [0u64, 1, 0xfc, 0xfd, 0x1234, 0xffff, 0x1_0000, 0xdead_beef] {
            let mut buf = Vec::new();
            put_compact_size(&mut buf, value);
            assert_eq!(buf.len(), compact_size_len(value));
            let mut reader = Reader::new(&buf);
            assert_eq!(reader.read_compact_size().unwrap(), value);
            assert!(reader.is_done());
        }
    }

    #[test]
    fn reader_rejects_short_input() {
        let mut reader = Reader::new(&[0x01, 0x02]);
        assert_eq!(reader.read_i32().unwrap_err(), ScriptError::Truncated);
    }

    #[test]
    fn byte_string_reads_prefix_then_contents() {
        let mut reader = Reader::new(&[0x03, 0xaa, 0xbb, 0xcc, 0xff]);
        assert_eq!(reader.read_byte_string().unwrap(), vec![0xaa, 0xbb, 0xcc]);
        assert_eq!(reader.remaining(), 1);
    }

    #[test]
    fn alert_command_is_zero_padded() {
        let alert = Alert::default();
        assert_eq!(&alert.name(), b"alert\0\0\0\0\0\0\0");
    }
}
