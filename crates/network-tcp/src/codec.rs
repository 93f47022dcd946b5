//! Frame encoding and decoding for the TCP transport.
//!
//! # Wire Format
//!
//! ```text
//! ┌────────┬──────────────┬──────────────┬─────────────────┐
//! │ op: u8 │ seq: u64 LE  │ len: u32 LE  │ payload (len B) │
//! └────────┴──────────────┴──────────────┴─────────────────┘
//! ```
//!
//! `op` is 0 for the join handshake, 0xff for an abort and the
//! [`CollectiveOp`] tag otherwise. `seq` numbers collectives from 1; the
//! join handshake uses 0. Both ends refuse payloads over [`MAX_PAYLOAD`].

use bytes::{Buf, BufMut, Bytes, BytesMut};
use cosim_core::CollectiveOp;
use std::io::{Read, Write};
use thiserror::Error;

/// Size of the fixed frame header.
pub const HEADER_LEN: usize = 1 + 8 + 4;

/// Largest payload a peer may announce.
pub const MAX_PAYLOAD: usize = 1 << 30;

const HELLO_TAG: u8 = 0;
const ABORT_TAG: u8 = 0xff;

/// Errors that can occur during frame encoding and decoding.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("unknown frame op {0}")]
    UnknownOp(u8),

    #[error("frame payload of {0} bytes exceeds the limit")]
    TooLarge(usize),

    #[error("malformed {what}: {len} bytes")]
    Malformed { what: &'static str, len: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// What a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Join handshake: a spoke announcing itself, or the hub's reply once
    /// every rank has joined.
    Hello,
    Collective(CollectiveOp),
    /// The hub gave up on a collective; the payload is the reason.
    Abort,
}

impl FrameKind {
    fn tag(self) -> u8 {
        match self {
            FrameKind::Hello => HELLO_TAG,
            FrameKind::Abort => ABORT_TAG,
            FrameKind::Collective(op) => op.as_u8(),
        }
    }

    fn from_tag(tag: u8) -> Result<Self, FrameError> {
        match tag {
            HELLO_TAG => return Ok(FrameKind::Hello),
            ABORT_TAG => return Ok(FrameKind::Abort),
            _ => {}
        }
        CollectiveOp::from_u8(tag)
            .map(FrameKind::Collective)
            .ok_or(FrameError::UnknownOp(tag))
    }
}

/// One message on a rank-to-hub connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub seq: u64,
    pub payload: Bytes,
}

impl Frame {
    pub fn collective(op: CollectiveOp, seq: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: FrameKind::Collective(op),
            seq,
            payload: payload.into(),
        }
    }

    /// Join handshake frame naming the sender's rank and the job size.
    pub fn hello(rank: u32, size: u32) -> Self {
        let mut payload = BytesMut::with_capacity(8);
        payload.put_u32_le(rank);
        payload.put_u32_le(size);
        Self {
            kind: FrameKind::Hello,
            seq: 0,
            payload: payload.freeze(),
        }
    }

    /// Abort notice for the collective numbered `seq`.
    pub fn abort(seq: u64, reason: &str) -> Self {
        Self {
            kind: FrameKind::Abort,
            seq,
            payload: Bytes::copy_from_slice(reason.as_bytes()),
        }
    }

    /// Reason carried by an abort frame.
    pub fn abort_reason(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Parse a join handshake payload into `(rank, size)`.
    pub fn hello_fields(&self) -> Result<(u32, u32), FrameError> {
        if self.kind != FrameKind::Hello || self.payload.len() != 8 {
            return Err(FrameError::Malformed {
                what: "hello",
                len: self.payload.len(),
            });
        }
        let mut buf = self.payload.clone();
        Ok((buf.get_u32_le(), buf.get_u32_le()))
    }

    /// Header plus payload as one contiguous buffer.
    pub fn encode(&self) -> Result<Bytes, FrameError> {
        self.encode_limited(MAX_PAYLOAD)
    }

    fn encode_limited(&self, limit: usize) -> Result<Bytes, FrameError> {
        let len = wire_len(self.payload.len(), limit)?;
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_u8(self.kind.tag());
        buf.put_u64_le(self.seq);
        buf.put_u32_le(len);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Nothing is written when the frame is over the size limit.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), FrameError> {
        writer.write_all(&self.encode()?)?;
        writer.flush()?;
        Ok(())
    }

    /// Read exactly one frame.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, FrameError> {
        Self::read_limited(reader, MAX_PAYLOAD)
    }

    fn read_limited<R: Read>(reader: &mut R, limit: usize) -> Result<Self, FrameError> {
        let mut header = [0u8; HEADER_LEN];
        reader.read_exact(&mut header)?;
        let mut fields = &header[..];
        let kind = FrameKind::from_tag(fields.get_u8())?;
        let seq = fields.get_u64_le();
        let len = fields.get_u32_le() as usize;
        if len > limit {
            return Err(FrameError::TooLarge(len));
        }

        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload)?;
        Ok(Self {
            kind,
            seq,
            payload: payload.into(),
        })
    }
}

/// Payload length as written in the header, refusing anything the reading
/// side would reject.
fn wire_len(len: usize, limit: usize) -> Result<u32, FrameError> {
    if len > limit {
        return Err(FrameError::TooLarge(len));
    }
    u32::try_from(len).map_err(|_| FrameError::TooLarge(len))
}

/// Hub reply to a variable byte exchange: a per-rank length table followed
/// by every rank's block in rank order.
///
/// Fails when the whole reply would not fit in one frame.
pub fn encode_gathered(blocks: &[Bytes]) -> Result<Bytes, FrameError> {
    encode_gathered_limited(blocks, MAX_PAYLOAD)
}

fn encode_gathered_limited(blocks: &[Bytes], limit: usize) -> Result<Bytes, FrameError> {
    let body: usize = blocks.iter().map(Bytes::len).sum();
    let total = 4 * blocks.len() + body;
    wire_len(total, limit)?;
    let mut buf = BytesMut::with_capacity(total);
    for block in blocks {
        buf.put_u32_le(wire_len(block.len(), limit)?);
    }
    for block in blocks {
        buf.put_slice(block);
    }
    Ok(buf.freeze())
}

/// Split a gathered reply for a job of `size` ranks back into blocks.
pub fn decode_gathered(mut payload: Bytes, size: usize) -> Result<Vec<Bytes>, FrameError> {
    let malformed = |len| FrameError::Malformed {
        what: "gathered reply",
        len,
    };
    let total = payload.len();
    if total < 4 * size {
        return Err(malformed(total));
    }
    let lengths: Vec<usize> = (0..size).map(|_| payload.get_u32_le() as usize).collect();
    if lengths.iter().sum::<usize>() != payload.len() {
        return Err(malformed(total));
    }
    Ok(lengths.into_iter().map(|len| payload.split_to(len)).collect())
}
