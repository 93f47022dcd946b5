//! Spike records and their fixed 12-byte wire layout.
//!
//! # Wire Format
//!
//! ```text
//! [sender_id: u32 LE][auxiliary_id: u32 LE][time: f32 LE]
//! ```
//!
//! Arrays are flat concatenations of 12-byte blocks with no separators or
//! length prefix. The byte buffer never leaves this module: callers see
//! `SpikeRecord` values only.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

/// Size of one encoded record in bytes.
pub const RECORD_SIZE: usize = 12;

/// Version of the field layout. Bump when fields change order or width.
pub const RECORD_LAYOUT_VERSION: u16 = 1;

/// Tag compared between heterogeneous builds during the handshake.
///
/// High half is the layout version, low half the record size.
pub const RECORD_LAYOUT_TAG: u32 = ((RECORD_LAYOUT_VERSION as u32) << 16) | RECORD_SIZE as u32;

/// Errors that can occur while decoding spike records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("buffer of {len} bytes is not a whole number of 12-byte records")]
    TrailingBytes { len: usize },

    #[error("record count {0} does not fit in a u32")]
    TooManyRecords(usize),

    #[error("announced counts cover {counted} records, buffer holds {decoded}")]
    CountMismatch { counted: usize, decoded: usize },
}

/// One cross-group event: who fired, a reserved payload word and when.
///
/// `auxiliary_id` carries no meaning for the exchange but is part of the
/// layout and round-trips unchanged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpikeRecord {
    sender_id: u32,
    auxiliary_id: u32,
    time: f32,
}

impl SpikeRecord {
    pub fn new(sender_id: u32, auxiliary_id: u32, time: f32) -> Self {
        Self {
            sender_id,
            auxiliary_id,
            time,
        }
    }

    /// A record with the reserved word zeroed.
    pub fn emitted(sender_id: u32, time: f32) -> Self {
        Self::new(sender_id, 0, time)
    }

    pub fn sender_id(&self) -> u32 {
        self.sender_id
    }

    pub fn auxiliary_id(&self) -> u32 {
        self.auxiliary_id
    }

    /// Emission time in simulation time units.
    pub fn time(&self) -> f32 {
        self.time
    }

    /// Append the 12-byte encoding of this record.
    pub fn encode_into<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.sender_id);
        buf.put_u32_le(self.auxiliary_id);
        buf.put_f32_le(self.time);
    }

    /// Read one record. The caller guarantees at least 12 bytes remain.
    fn decode_from<B: Buf>(buf: &mut B) -> Self {
        let sender_id = buf.get_u32_le();
        let auxiliary_id = buf.get_u32_le();
        let time = buf.get_f32_le();
        Self {
            sender_id,
            auxiliary_id,
            time,
        }
    }
}

/// Encode a sequence of records as a flat byte buffer.
pub fn encode_records(records: &[SpikeRecord]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(records.len() * RECORD_SIZE);
    for record in records {
        record.encode_into(&mut buf);
    }
    buf.to_vec()
}

/// Decode a flat byte buffer into records.
pub fn decode_records(bytes: &[u8]) -> Result<Vec<SpikeRecord>, CodecError> {
    if bytes.len() % RECORD_SIZE != 0 {
        return Err(CodecError::TrailingBytes { len: bytes.len() });
    }
    let mut buf = bytes;
    let mut records = Vec::with_capacity(bytes.len() / RECORD_SIZE);
    while buf.has_remaining() {
        records.push(SpikeRecord::decode_from(&mut buf));
    }
    Ok(records)
}

/// Number of records as the unsigned count announced to peers.
pub fn record_count(records: &[SpikeRecord]) -> Result<u32, CodecError> {
    u32::try_from(records.len()).map_err(|_| CodecError::TooManyRecords(records.len()))
}
