//! Trellis radio wire format — control opcodes, status events, chunk framing.
//!
//! These shapes ARE the protocol between the shears and the hub. Both
//! devices ship independently, so every opcode value, every length byte,
//! and the attribute layout of the registered service are frozen. Changing
//! anything here strands fielded shears.
//!
//! Two framings travel over the radio link:
//!
//! * control channel — single-opcode commands hub→shears and status
//!   events shears→hub (variable length, hand-packed)
//! * data channel — file chunks shears→hub, a 2-byte little-endian
//!   chunk index followed by raw payload

use bytes::{BufMut, Bytes, BytesMut};

// ── Service layout ────────────────────────────────────────────────────────────

/// 16-bit identifier of the log-transfer service.
pub const SERVICE_UUID: u16 = 0xFFF0;

/// Control characteristic — write (hub→shears) and notify (shears→hub).
pub const CONTROL_UUID: u16 = 0xFFF1;

/// Data characteristic — notify only (shears→hub).
pub const DATA_UUID: u16 = 0xFFF2;

/// Complete local name the shears advertises.
pub const DEVICE_NAME: &str = "WM-SHEARS";

/// Attribute table of the registered service. The shears registers these
/// positions; the hub rediscovers them, but the subscription descriptor is
/// always the attribute immediately after the value it configures.
pub const SERVICE_FIRST_HANDLE: u16 = 0x0001;
pub const CONTROL_VALUE_HANDLE: u16 = 0x0003;
pub const CONTROL_CCCD_HANDLE: u16 = 0x0004;
pub const DATA_VALUE_HANDLE: u16 = 0x0006;
pub const DATA_CCCD_HANDLE: u16 = 0x0007;
pub const SERVICE_LAST_HANDLE: u16 = 0x0007;

/// Descriptor value that enables notifications on a characteristic.
pub const CCCD_ENABLE_NOTIFICATIONS: [u8; 2] = [0x01, 0x00];

/// Connection parameters the hub requests when initiating a connection.
/// Supervision timeout 0x258 = 6 s at the standard 10 ms tick — this gates
/// link-loss detection on both sides.
pub const CONN_INTERVAL_MIN: u16 = 0x10;
pub const CONN_INTERVAL_MAX: u16 = 0x20;
pub const CONN_LATENCY: u16 = 0;
pub const CONN_SUPERVISION_TIMEOUT: u16 = 0x258;

// ── Chunk framing ─────────────────────────────────────────────────────────────

/// Bytes of chunk header preceding the payload: the chunk index, LE u16.
pub const CHUNK_HEADER_LEN: usize = 2;

/// Hard cap on chunk payload bytes, regardless of the negotiated link
/// attribute size.
pub const MAX_CHUNK_PAYLOAD: usize = 160;

/// Number of chunk indices the 16-bit counter can express. A file needing
/// more chunks than this at the negotiated payload size is rejected at
/// request time rather than wrapping.
pub const MAX_CHUNKS_PER_SESSION: u32 = 65_536;

/// Longest accepted requested basename, in bytes.
pub const MAX_BASENAME_LEN: usize = 48;

/// Pack one data-channel notification: chunk index, then payload.
pub fn encode_chunk(index: u16, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(CHUNK_HEADER_LEN + payload.len());
    buf.put_u16_le(index);
    buf.put_slice(payload);
    buf.freeze()
}

/// Split one data-channel notification into chunk index and payload.
pub fn decode_chunk(data: &[u8]) -> Result<(u16, &[u8]), WireError> {
    if data.len() < CHUNK_HEADER_LEN {
        return Err(WireError::Truncated {
            need: CHUNK_HEADER_LEN,
            got: data.len(),
        });
    }
    let index = u16::from_le_bytes([data[0], data[1]]);
    Ok((index, &data[CHUNK_HEADER_LEN..]))
}

// ── Control commands (hub → shears) ───────────────────────────────────────────

pub const OP_NOP: u8 = 0x00;
pub const OP_START_TRANSFER: u8 = 0x01;
pub const OP_ABORT: u8 = 0x02;

/// A command written to the control characteristic by the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Nop,
    /// Request a file offload. Carries the requested basename (the shears
    /// resolves it under its storage prefix).
    StartTransfer { name: String },
    /// Cancel the active transfer.
    Abort,
}

impl Command {
    pub fn encode(&self) -> Bytes {
        match self {
            Command::Nop => Bytes::from_static(&[OP_NOP]),
            Command::Abort => Bytes::from_static(&[OP_ABORT]),
            Command::StartTransfer { name } => {
                let mut buf = BytesMut::with_capacity(2 + name.len());
                buf.put_u8(OP_START_TRANSFER);
                buf.put_slice(name.as_bytes());
                buf.put_u8(0); // basename is null-terminated on the wire
                buf.freeze()
            }
        }
    }

    pub fn decode(data: &[u8]) -> Result<Command, WireError> {
        let (&opcode, rest) = data
            .split_first()
            .ok_or(WireError::Truncated { need: 1, got: 0 })?;
        match opcode {
            OP_NOP => Ok(Command::Nop),
            OP_ABORT => Ok(Command::Abort),
            OP_START_TRANSFER => {
                // Stop at the terminator; a peer that omits it sends the
                // name flush against the end of the write.
                let name_bytes = match rest.iter().position(|&b| b == 0) {
                    Some(nul) => &rest[..nul],
                    None => rest,
                };
                if !name_bytes.is_ascii() {
                    return Err(WireError::BadBasename);
                }
                let name = String::from_utf8(name_bytes.to_vec())
                    .map_err(|_| WireError::BadBasename)?;
                Ok(Command::StartTransfer { name })
            }
            other => Err(WireError::UnknownOpcode(other)),
        }
    }
}

// ── Status events (shears → hub) ──────────────────────────────────────────────

pub const OP_STATUS: u8 = 0x80;

/// Status codes carried in a STATUS event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StatusCode {
    /// Transfer request accepted; the file size follows.
    Accepted = 0,
    /// The requested file does not exist.
    NoFile = 1,
    /// Filesystem failure, bad basename, or unusable link attribute size.
    FsError = 2,
    /// A transfer is already active; the new request was rejected.
    Busy = 3,
    /// All chunks emitted; the session is over.
    Done = 4,
    /// Transfer cancelled on request.
    Aborted = 5,
}

impl StatusCode {
    /// Terminal codes end the session on both sides.
    pub fn is_terminal(self) -> bool {
        !matches!(self, StatusCode::Accepted)
    }
}

impl TryFrom<u8> for StatusCode {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(StatusCode::Accepted),
            1 => Ok(StatusCode::NoFile),
            2 => Ok(StatusCode::FsError),
            3 => Ok(StatusCode::Busy),
            4 => Ok(StatusCode::Done),
            5 => Ok(StatusCode::Aborted),
            other => Err(WireError::UnknownStatus(other)),
        }
    }
}

/// A status event notified on the control characteristic.
///
/// `size` is the total file size. It accompanies ACCEPTED (where the hub
/// requires it to initialize the reception) and the session-closing DONE
/// and ABORTED; the failure codes carry no size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub code: StatusCode,
    pub size: Option<u32>,
}

impl Status {
    pub fn new(code: StatusCode, size: Option<u32>) -> Self {
        Self { code, size }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(6);
        buf.put_u8(OP_STATUS);
        buf.put_u8(self.code as u8);
        if let Some(size) = self.size {
            buf.put_u32_le(size);
        }
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Status, WireError> {
        if data.len() < 2 {
            return Err(WireError::Truncated {
                need: 2,
                got: data.len(),
            });
        }
        if data[0] != OP_STATUS {
            return Err(WireError::UnknownOpcode(data[0]));
        }
        let code = StatusCode::try_from(data[1])?;
        let size = if data.len() >= 6 {
            Some(u32::from_le_bytes([data[2], data[3], data[4], data[5]]))
        } else {
            None
        };
        Ok(Status { code, size })
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting radio wire data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unknown opcode: 0x{0:02x}")]
    UnknownOpcode(u8),

    #[error("unknown status code: 0x{0:02x}")]
    UnknownStatus(u8),

    #[error("truncated message: need {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },

    #[error("basename is not printable ASCII")]
    BadBasename,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
