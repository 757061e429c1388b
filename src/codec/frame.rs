//! Binary framing for streamed stdout/stderr/display/log data between a
//! Worker process and the host (§4.1). Header layout, little-endian:
//! `u16 magic, u8 version, u8 kind, u32 jobIdHash, u8 flags, u32 length`,
//! payload follows. Mirrors
//! `grid_component/component_communication/codec.rs`'s `tokio_util::codec`
//! `Encoder`/`Decoder` pair over `BytesMut`, generalized from
//! length-delimited-plus-bincode framing to this fixed header layout since
//! StreamFrame's wire format is fully specified rather than opaque.

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

pub const MAGIC: u16 = 0x4E42;
pub const VERSION: u8 = 1;
pub const HEADER_LEN: usize = 2 + 1 + 1 + 4 + 1 + 4;
pub const FLAG_FINAL: u8 = 0b0000_0001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Stdout = 1,
    Stderr = 2,
    Display = 3,
    Log = 4,
}

impl FrameKind {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(FrameKind::Stdout),
            2 => Some(FrameKind::Stderr),
            3 => Some(FrameKind::Display),
            4 => Some(FrameKind::Log),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub kind: FrameKind,
    pub job_id_hash: u32,
    pub final_: bool,
    pub payload: Vec<u8>,
}

/// 32-bit FNV-1a of the job id string. Sufficient for fan-out keying;
/// collisions are tolerated since jobs are also tagged by the enclosing
/// event envelope (§4.1).
pub fn job_id_hash(job_id: &str) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    let mut hash = OFFSET_BASIS;
    for byte in job_id.as_bytes() {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

pub fn encode_text(kind: FrameKind, job_id_hash: u32, text: &str, final_: bool) -> Vec<u8> {
    encode_raw(kind, job_id_hash, text.as_bytes(), final_)
}

pub fn encode_display(job_id_hash: u32, payload: &[u8], final_: bool) -> Vec<u8> {
    encode_raw(FrameKind::Display, job_id_hash, payload, final_)
}

fn encode_raw(kind: FrameKind, job_id_hash: u32, payload: &[u8], final_: bool) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u16_le(MAGIC);
    buf.put_u8(VERSION);
    buf.put_u8(kind as u8);
    buf.put_u32_le(job_id_hash);
    buf.put_u8(if final_ { FLAG_FINAL } else { 0 });
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(payload);
    buf.to_vec()
}

/// Decode a single frame from a byte slice. Returns `None` (never panics or
/// throws) on truncated input, bad magic, or an unrecognized version —
/// callers treat this as "not enough data yet" or "drop silently"
/// (protocol_error, §7).
pub fn decode(bytes: &[u8]) -> Option<Frame> {
    if bytes.len() < HEADER_LEN {
        return None;
    }
    let mut cursor = bytes;
    let magic = cursor.get_u16_le();
    if magic != MAGIC {
        return None;
    }
    let version = cursor.get_u8();
    if version != VERSION {
        return None;
    }
    let kind = FrameKind::from_u8(cursor.get_u8())?;
    let job_id_hash = cursor.get_u32_le();
    let flags = cursor.get_u8();
    let length = cursor.get_u32_le() as usize;
    if cursor.len() < length {
        return None;
    }
    let payload = cursor[..length].to_vec();
    Some(Frame { kind, job_id_hash, final_: flags & FLAG_FINAL != 0, payload })
}

/// Length-aware `tokio_util::codec` adapter so frames can be read directly
/// off a worker's stdout pipe without the caller buffering manually.
#[derive(Debug, Default)]
pub struct FrameCodec {
    max_payload_bytes: usize,
}

impl FrameCodec {
    pub fn new(max_payload_bytes: usize) -> Self {
        Self { max_payload_bytes }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let magic = u16::from_le_bytes([src[0], src[1]]);
        let version = src[2];
        if magic != MAGIC || version != VERSION {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "bad frame header"));
        }
        let kind_byte = src[3];
        let length = u32::from_le_bytes([src[9], src[10], src[11], src[12]]) as usize;
        if length > self.max_payload_bytes {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "frame payload exceeds max_payload_bytes"));
        }
        if src.len() < HEADER_LEN + length {
            src.reserve(HEADER_LEN + length - src.len());
            return Ok(None);
        }
        let kind = match FrameKind::from_u8(kind_byte) {
            Some(k) => k,
            None => return Err(io::Error::new(io::ErrorKind::InvalidData, "unknown frame kind")),
        };
        let job_id_hash = u32::from_le_bytes([src[4], src[5], src[6], src[7]]);
        let flags = src[8];
        let mut full = src.split_to(HEADER_LEN + length);
        let payload = full.split_off(HEADER_LEN).to_vec();
        Ok(Some(Frame { kind, job_id_hash, final_: flags & FLAG_FINAL != 0, payload }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = encode_raw(item.kind, item.job_id_hash, &item.payload, item.final_);
        dst.extend_from_slice(&bytes);
        Ok(())
    }
}
