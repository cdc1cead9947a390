//! Versioned save-stream primitives.
//!
//! Interpreter state is persisted as a flat little-endian stream: a fixed
//! header (magic plus stream version) followed by fixed-width fields,
//! single-byte booleans, and length-prefixed buffers. Object references are
//! written as opaque handles and re-resolved against the live registries on
//! load. This crate keeps the byte layout in one place so the writer and the
//! reader cannot drift apart.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

/// Bytes that prefix every save stream ("CSAV").
pub const SAVE_MAGIC: [u8; 4] = *b"CSAV";

/// Stream revision written by this crate. Version 2 added the conversation
/// walker's exit-mode field; version 1 streams remain readable.
pub const SAVE_VERSION: u16 = 2;

/// Oldest stream revision the reader still understands.
pub const MIN_SAVE_VERSION: u16 = 1;

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("save stream missing CSAV signature")]
    BadMagic,
    #[error("save stream version {0} is not supported")]
    UnsupportedVersion(u16),
    #[error("save stream truncated at offset {offset}")]
    UnexpectedEof { offset: usize },
    #[error("length field {len} exceeds remaining stream size {remaining}")]
    LengthOverrun { len: usize, remaining: usize },
}

/// Serializer-assigned opaque id standing in for a registry reference.
///
/// Handles are arena indices, never addresses; `NONE` marks an absent
/// reference and survives round-trips unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(pub u32);

impl HandleId {
    pub const NONE: HandleId = HandleId(u32::MAX);

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }

    pub fn index(self) -> Option<usize> {
        if self.is_none() {
            None
        } else {
            Some(self.0 as usize)
        }
    }
}

impl From<Option<u32>> for HandleId {
    fn from(value: Option<u32>) -> Self {
        match value {
            Some(raw) => HandleId(raw),
            None => HandleId::NONE,
        }
    }
}

/// Accumulates a save stream. The header is written on construction.
pub struct SaveWriter {
    buf: Vec<u8>,
}

impl SaveWriter {
    pub fn new() -> Self {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&SAVE_MAGIC);
        buf.write_u16::<LittleEndian>(SAVE_VERSION)
            .expect("writing to a Vec cannot fail");
        SaveWriter { buf }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf
            .write_u16::<LittleEndian>(value)
            .expect("writing to a Vec cannot fail");
    }

    pub fn write_i16(&mut self, value: i16) {
        self.buf
            .write_i16::<LittleEndian>(value)
            .expect("writing to a Vec cannot fail");
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf
            .write_u32::<LittleEndian>(value)
            .expect("writing to a Vec cannot fail");
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf
            .write_i32::<LittleEndian>(value)
            .expect("writing to a Vec cannot fail");
    }

    /// Free-standing buffer: u32 length prefix followed by the raw bytes.
    pub fn write_bytes(&mut self, value: &[u8]) {
        self.write_u32(value.len() as u32);
        self.buf.extend_from_slice(value);
    }

    pub fn write_string(&mut self, value: &str) {
        self.write_bytes(value.as_bytes());
    }

    pub fn write_handle(&mut self, value: HandleId) {
        self.write_u32(value.0);
    }
}

impl Default for SaveWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads a save stream produced by [`SaveWriter`].
///
/// The header version is exposed through [`SaveReader::version`]; fields
/// introduced in later revisions must be skipped entirely (not defaulted)
/// when loading an older stream.
pub struct SaveReader<'a> {
    cursor: Cursor<&'a [u8]>,
    version: u16,
}

impl<'a> SaveReader<'a> {
    pub fn open(data: &'a [u8]) -> Result<Self, SaveError> {
        if data.len() < 6 || data[..4] != SAVE_MAGIC {
            return Err(SaveError::BadMagic);
        }
        let version = u16::from_le_bytes([data[4], data[5]]);
        if !(MIN_SAVE_VERSION..=SAVE_VERSION).contains(&version) {
            return Err(SaveError::UnsupportedVersion(version));
        }
        let mut cursor = Cursor::new(data);
        cursor.set_position(6);
        Ok(SaveReader { cursor, version })
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    fn offset(&self) -> usize {
        self.cursor.position() as usize
    }

    fn remaining(&self) -> usize {
        self.cursor.get_ref().len() - self.offset()
    }

    pub fn read_u8(&mut self) -> Result<u8, SaveError> {
        let offset = self.offset();
        self.cursor
            .read_u8()
            .map_err(|_| SaveError::UnexpectedEof { offset })
    }

    pub fn read_bool(&mut self) -> Result<bool, SaveError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16, SaveError> {
        let offset = self.offset();
        self.cursor
            .read_u16::<LittleEndian>()
            .map_err(|_| SaveError::UnexpectedEof { offset })
    }

    pub fn read_i16(&mut self) -> Result<i16, SaveError> {
        let offset = self.offset();
        self.cursor
            .read_i16::<LittleEndian>()
            .map_err(|_| SaveError::UnexpectedEof { offset })
    }

    pub fn read_u32(&mut self) -> Result<u32, SaveError> {
        let offset = self.offset();
        self.cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| SaveError::UnexpectedEof { offset })
    }

    pub fn read_i32(&mut self) -> Result<i32, SaveError> {
        let offset = self.offset();
        self.cursor
            .read_i32::<LittleEndian>()
            .map_err(|_| SaveError::UnexpectedEof { offset })
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>, SaveError> {
        let len = self.read_u32()? as usize;
        let remaining = self.remaining();
        if len > remaining {
            return Err(SaveError::LengthOverrun { len, remaining });
        }
        let start = self.offset();
        let bytes = self.cursor.get_ref()[start..start + len].to_vec();
        self.cursor.set_position((start + len) as u64);
        Ok(bytes)
    }

    pub fn read_string(&mut self) -> Result<String, SaveError> {
        let bytes = self.read_bytes()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn read_handle(&mut self) -> Result<HandleId, SaveError> {
        Ok(HandleId(self.read_u32()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_round_trip() {
        let mut writer = SaveWriter::new();
        writer.write_u8(7);
        writer.write_bool(true);
        writer.write_bool(false);
        writer.write_i16(-1234);
        writer.write_u16(40000);
        writer.write_i32(-7_000_000);
        writer.write_u32(0xDEAD_BEEF);
        writer.write_bytes(b"script bytes");
        writer.write_string("BARKEEP");
        writer.write_handle(HandleId(3));
        writer.write_handle(HandleId::NONE);

        let bytes = writer.into_bytes();
        let mut reader = SaveReader::open(&bytes).expect("header");
        assert_eq!(reader.version(), SAVE_VERSION);
        assert_eq!(reader.read_u8().unwrap(), 7);
        assert!(reader.read_bool().unwrap());
        assert!(!reader.read_bool().unwrap());
        assert_eq!(reader.read_i16().unwrap(), -1234);
        assert_eq!(reader.read_u16().unwrap(), 40000);
        assert_eq!(reader.read_i32().unwrap(), -7_000_000);
        assert_eq!(reader.read_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(reader.read_bytes().unwrap(), b"script bytes");
        assert_eq!(reader.read_string().unwrap(), "BARKEEP");
        assert_eq!(reader.read_handle().unwrap(), HandleId(3));
        assert!(reader.read_handle().unwrap().is_none());
    }

    #[test]
    fn rejects_bad_magic() {
        let bytes = b"XSAV\x02\x00".to_vec();
        assert!(matches!(
            SaveReader::open(&bytes),
            Err(SaveError::BadMagic)
        ));
    }

    #[test]
    fn rejects_future_version() {
        let mut bytes = SAVE_MAGIC.to_vec();
        bytes.extend_from_slice(&(SAVE_VERSION + 1).to_le_bytes());
        assert!(matches!(
            SaveReader::open(&bytes),
            Err(SaveError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn truncated_stream_reports_offset() {
        let mut writer = SaveWriter::new();
        writer.write_u16(9);
        let bytes = writer.into_bytes();
        let mut reader = SaveReader::open(&bytes).expect("header");
        reader.read_u16().expect("first field present");
        let err = reader.read_u32().unwrap_err();
        assert!(matches!(err, SaveError::UnexpectedEof { offset: 8 }));
    }

    #[test]
    fn length_prefix_cannot_overrun() {
        let mut writer = SaveWriter::new();
        writer.write_u32(1000);
        let bytes = writer.into_bytes();
        let mut reader = SaveReader::open(&bytes).expect("header");
        assert!(matches!(
            reader.read_bytes(),
            Err(SaveError::LengthOverrun { len: 1000, .. })
        ));
    }

    #[test]
    fn older_stream_version_is_accepted() {
        let mut bytes = SAVE_MAGIC.to_vec();
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.push(0xAB);
        let mut reader = SaveReader::open(&bytes).expect("header");
        assert_eq!(reader.version(), 1);
        assert_eq!(reader.read_u8().unwrap(), 0xAB);
    }
}
