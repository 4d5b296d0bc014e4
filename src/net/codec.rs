//! Frame header and message payload codec for the TCP front end.
//!
//! Every frame on the wire is:
//!
//! ```text
//! u32 length_be ∥ u16 type_be ∥ u16 reserved ∥ payload
//! ```
//!
//! `length` counts everything *after* the length field itself — the 4-byte
//! type+reserved header plus the payload — so `payload.len() == length - 4`.
//! All integers here are big-endian; this is the one place in the crate
//! that deliberately diverges from [`crate::encoding`]'s little-endian
//! convention (used for the WAL/manifest/SSTable on-disk containers) and
//! [`crate::varint`]'s endian-agnostic LEB128 (used for the arena record
//! format) — matching spec.md's explicit callout that wire integers are
//! big-endian while everything on disk is little-endian.

use std::io::{ErrorKind, Read, Write};

use thiserror::Error;

use crate::hlc::Hlc;
use crate::varint;

/// Maximum payload size accepted from the wire, guarding against a
/// corrupt or malicious length prefix causing an unbounded allocation.
pub const MAX_PAYLOAD_LEN: u32 = 64 * 1024 * 1024;

/// Errors raised by frame encoding/decoding.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown message type {0}")]
    UnknownType(u16),

    #[error("frame length {0} is smaller than the 4-byte header it must include")]
    ShortLength(u32),

    #[error("frame payload of {0} bytes exceeds the {max} byte limit", max = MAX_PAYLOAD_LEN)]
    PayloadTooLarge(u32),

    #[error("malformed payload: {0}")]
    Malformed(&'static str),

    #[error("truncated varint in payload")]
    Varint(#[from] varint::VarintError),
}

/// The seven message types spec.md §6 defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Identify = 0,
    Heartbeat = 2,
    Peer = 3,
    WriteReq = 4,
    WriteResp = 5,
    ReadReq = 6,
    ReadResp = 7,
}

impl MessageType {
    fn from_u16(v: u16) -> Result<Self, FrameError> {
        match v {
            0 => Ok(Self::Identify),
            2 => Ok(Self::Heartbeat),
            3 => Ok(Self::Peer),
            4 => Ok(Self::WriteReq),
            5 => Ok(Self::WriteResp),
            6 => Ok(Self::ReadReq),
            7 => Ok(Self::ReadResp),
            other => Err(FrameError::UnknownType(other)),
        }
    }
}

/// A decoded frame: its message type and raw payload bytes.
#[derive(Debug, Clone)]
pub struct Frame {
    pub msg_type: MessageType,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Writes `msg_type`/`payload` as a complete frame.
    pub fn write(w: &mut impl Write, msg_type: MessageType, payload: &[u8]) -> Result<(), FrameError> {
        let length = 4u32 + payload.len() as u32;
        w.write_all(&length.to_be_bytes())?;
        w.write_all(&(msg_type as u16).to_be_bytes())?;
        w.write_all(&0u16.to_be_bytes())?; // reserved
        w.write_all(payload)?;
        w.flush()?;
        Ok(())
    }

    /// Reads one frame, or `Ok(None)` if the peer closed the connection
    /// cleanly before sending another frame (zero bytes available at the
    /// start of the length prefix). Any other short read is a
    /// [`FrameError::Io`] — a connection that dies mid-frame is a protocol
    /// violation, not a clean close.
    pub fn read(r: &mut impl Read) -> Result<Option<Self>, FrameError> {
        let mut len_buf = [0u8; 4];
        let mut filled = 0;
        loop {
            match r.read(&mut len_buf[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => {
                    return Err(FrameError::Io(std::io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "connection closed mid-frame",
                    )));
                }
                Ok(n) => {
                    filled += n;
                    if filled == 4 {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let length = u32::from_be_bytes(len_buf);
        if length < 4 {
            return Err(FrameError::ShortLength(length));
        }
        if length - 4 > MAX_PAYLOAD_LEN {
            return Err(FrameError::PayloadTooLarge(length - 4));
        }

        let mut rest = vec![0u8; length as usize];
        r.read_exact(&mut rest)?;

        let msg_type = MessageType::from_u16(u16::from_be_bytes([rest[0], rest[1]]))?;
        let payload = rest[4..].to_vec();

        Ok(Some(Frame { msg_type, payload }))
    }
}

// --------------------------------------------------------------------------
// Payload encoding helpers
// --------------------------------------------------------------------------

/// `WRITE_REQ` payload: `op(1) ∥ hlc(14) ∥ varint(key_len) ∥ key ∥
/// varint(value_len) ∥ value`. `value` is empty when `op` is a delete.
pub struct WriteReq {
    pub is_delete: bool,
    pub hlc: Hlc,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl WriteReq {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + 14 + self.key.len() + self.value.len() + 10);
        buf.push(if self.is_delete { 1 } else { 0 });
        buf.extend_from_slice(&self.hlc.to_wire_bytes());
        varint::encode_len(self.key.len(), &mut buf);
        buf.extend_from_slice(&self.key);
        varint::encode_len(self.value.len(), &mut buf);
        buf.extend_from_slice(&self.value);
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self, FrameError> {
        if payload.len() < 1 + 14 {
            return Err(FrameError::Malformed("WRITE_REQ shorter than op+hlc"));
        }
        let is_delete = match payload[0] {
            0 => false,
            1 => true,
            _ => return Err(FrameError::Malformed("WRITE_REQ op must be 0 or 1")),
        };

        let mut hlc_bytes = [0u8; 14];
        hlc_bytes.copy_from_slice(&payload[1..15]);
        let hlc = Hlc::from_wire_bytes(&hlc_bytes);

        let mut off = 15;
        let (key_len, n) = varint::decode_len(&payload[off..])?;
        off += n;
        let key = payload
            .get(off..off + key_len)
            .ok_or(FrameError::Malformed("WRITE_REQ key truncated"))?
            .to_vec();
        off += key_len;

        let (value_len, n) = varint::decode_len(&payload[off..])?;
        off += n;
        let value = payload
            .get(off..off + value_len)
            .ok_or(FrameError::Malformed("WRITE_REQ value truncated"))?
            .to_vec();

        Ok(Self {
            is_delete,
            hlc,
            key,
            value,
        })
    }
}

/// `WRITE_RESP` payload: `status(1)`. `0` means applied; any other value is
/// a [`crate::net::server::WireStatus`] code.
pub fn encode_write_resp(status: u8) -> Vec<u8> {
    vec![status]
}

pub fn decode_write_resp(payload: &[u8]) -> Result<u8, FrameError> {
    payload
        .first()
        .copied()
        .ok_or(FrameError::Malformed("WRITE_RESP missing status byte"))
}

/// `READ_REQ` payload: `varint(key_len) ∥ key`.
pub fn encode_read_req(key: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(key.len() + 5);
    varint::encode_len(key.len(), &mut buf);
    buf.extend_from_slice(key);
    buf
}

pub fn decode_read_req(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let (key_len, n) = varint::decode_len(payload)?;
    payload
        .get(n..n + key_len)
        .map(|s| s.to_vec())
        .ok_or(FrameError::Malformed("READ_REQ key truncated"))
}

/// `READ_RESP` payload: `status(1) ∥ [varint(value_len) ∥ value if status==0
/// and found]`. `status` is one of [`crate::net::server::WireStatus`]'s
/// seven codes — a miss and every engine error get their own status rather
/// than collapsing onto "not found", so a caller can tell a genuinely
/// absent key apart from a lookup that failed.
pub fn encode_read_resp(status: u8, value: Option<&[u8]>) -> Vec<u8> {
    let mut buf = Vec::with_capacity(value.map_or(0, <[u8]>::len) + 6);
    buf.push(status);
    if let Some(value) = value {
        varint::encode_len(value.len(), &mut buf);
        buf.extend_from_slice(value);
    }
    buf
}

pub fn decode_read_resp(payload: &[u8]) -> Result<(u8, Option<Vec<u8>>), FrameError> {
    let status = payload
        .first()
        .copied()
        .ok_or(FrameError::Malformed("READ_RESP missing status byte"))?;
    if payload.len() == 1 {
        return Ok((status, None));
    }
    let (value_len, n) = varint::decode_len(&payload[1..])?;
    let value = payload
        .get(1 + n..1 + n + value_len)
        .ok_or(FrameError::Malformed("READ_RESP value truncated"))?
        .to_vec();
    Ok((status, Some(value)))
}

/// `IDENTIFY` payload: `node_id: u32 be`.
pub fn encode_identify(node_id: u32) -> Vec<u8> {
    node_id.to_be_bytes().to_vec()
}

pub fn decode_identify(payload: &[u8]) -> Result<u32, FrameError> {
    let bytes: [u8; 4] = payload
        .try_into()
        .map_err(|_| FrameError::Malformed("IDENTIFY payload must be exactly 4 bytes"))?;
    Ok(u32::from_be_bytes(bytes))
}

/// `PEER` payload: `addr_len: u16 be ∥ addr: utf8 bytes`.
pub fn encode_peer(addr: &str) -> Vec<u8> {
    let bytes = addr.as_bytes();
    let mut buf = Vec::with_capacity(bytes.len() + 2);
    buf.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    buf.extend_from_slice(bytes);
    buf
}

pub fn decode_peer(payload: &[u8]) -> Result<String, FrameError> {
    if payload.len() < 2 {
        return Err(FrameError::Malformed("PEER shorter than its length prefix"));
    }
    let addr_len = u16::from_be_bytes([payload[0], payload[1]]) as usize;
    let bytes = payload
        .get(2..2 + addr_len)
        .ok_or(FrameError::Malformed("PEER address truncated"))?;
    String::from_utf8(bytes.to_vec()).map_err(|_| FrameError::Malformed("PEER address not utf8"))
}
