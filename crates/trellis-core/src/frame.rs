//! Host serial framing — the wire between the hub and the host computer.
//!
//! Every message travels as one frame:
//!
//! ```text
//! [0xAA] [msg_type:1] [len:2 LE] [payload:len] [checksum:1]
//! ```
//!
//! `checksum` is the XOR of every byte from `msg_type` through the last
//! payload byte. There is no retransmission and no acknowledgment on this
//! link; the host parser resynchronizes on the start byte after any framing
//! error, and [`Deframer`] implements that side of the contract for the
//! simulator and the tests.

use bytes::{BufMut, Bytes, BytesMut};
use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Start-of-frame marker.
pub const FRAME_START: u8 = 0xAA;

/// Hard maximum payload per frame. A larger `send` is a programming error
/// and is refused before any bytes are queued.
pub const MAX_FRAME_PAYLOAD: usize = 200;

/// Fixed bytes around the payload: start, type, length, checksum.
pub const FRAME_OVERHEAD: usize = 5;

// ── Message types ─────────────────────────────────────────────────────────────

/// Frame type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HostMessageType {
    /// One packed [`CutRecord`].
    CutRecord = 0x01,
    /// One [`HostStatus`] code byte.
    Status = 0x02,
    /// Variable-length ASCII log data, no terminator.
    LogLine = 0x03,
}

impl TryFrom<u8> for HostMessageType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(HostMessageType::CutRecord),
            0x02 => Ok(HostMessageType::Status),
            0x03 => Ok(HostMessageType::LogLine),
            other => Err(FrameError::UnknownType(other)),
        }
    }
}

/// Status codes forwarded to the host in a `Status` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HostStatus {
    LinkUp = 1,
    LinkDown = 2,
    TransferStart = 3,
    TransferDone = 4,
    TransferError = 5,
}

impl TryFrom<u8> for HostStatus {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(HostStatus::LinkUp),
            2 => Ok(HostStatus::LinkDown),
            3 => Ok(HostStatus::TransferStart),
            4 => Ok(HostStatus::TransferDone),
            5 => Ok(HostStatus::TransferError),
            other => Err(FrameError::UnknownStatus(other)),
        }
    }
}

// ── Cut record ────────────────────────────────────────────────────────────────

/// One cut event, packed for the host.
///
/// Wire size: 21 bytes. The host decodes this layout byte-for-byte;
/// field order and widths are frozen.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct CutRecord {
    /// Monotonic cut sequence number.
    pub seq: u32,
    /// Seconds since device boot at the moment of the cut.
    pub timestamp: u32,
    /// Latitude, decimal degrees. Positive north.
    pub lat: f32,
    /// Longitude, decimal degrees. Positive east.
    pub lon: f32,
    /// Peak blade force for this cut, newtons.
    pub force: f32,
    /// GPS fix quality at the moment of the cut.
    pub fix: u8,
}

// Compile-time size guard. If this fails, the host parser is broken.
assert_eq_size!(CutRecord, [u8; 21]);

// ── Packing ───────────────────────────────────────────────────────────────────

/// XOR checksum over `msg_type`, both length bytes, and the payload.
fn checksum(msg_type: u8, len: u16, payload: &[u8]) -> u8 {
    let mut sum = msg_type;
    let [len_lo, len_hi] = len.to_le_bytes();
    sum ^= len_lo;
    sum ^= len_hi;
    for &b in payload {
        sum ^= b;
    }
    sum
}

/// Build one complete frame.
pub fn encode_frame(msg_type: HostMessageType, payload: &[u8]) -> Result<Bytes, FrameError> {
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(FrameError::PayloadTooLarge(payload.len()));
    }
    let len = payload.len() as u16;
    let mut buf = BytesMut::with_capacity(FRAME_OVERHEAD + payload.len());
    buf.put_u8(FRAME_START);
    buf.put_u8(msg_type as u8);
    buf.put_u16_le(len);
    buf.put_slice(payload);
    buf.put_u8(checksum(msg_type as u8, len, payload));
    Ok(buf.freeze())
}

/// Parse one frame that is known to start at `data[0]`.
///
/// Rejects a missing start byte, a declared length over the hard maximum,
/// and a checksum mismatch. Returns the type and a borrow of the payload.
pub fn decode_frame(data: &[u8]) -> Result<(HostMessageType, &[u8]), FrameError> {
    if data.len() < FRAME_OVERHEAD {
        return Err(FrameError::Truncated {
            need: FRAME_OVERHEAD,
            got: data.len(),
        });
    }
    if data[0] != FRAME_START {
        return Err(FrameError::MissingStart(data[0]));
    }
    let len = u16::from_le_bytes([data[2], data[3]]) as usize;
    if len > MAX_FRAME_PAYLOAD {
        return Err(FrameError::PayloadTooLarge(len));
    }
    let total = FRAME_OVERHEAD + len;
    if data.len() < total {
        return Err(FrameError::Truncated {
            need: total,
            got: data.len(),
        });
    }
    let payload = &data[4..4 + len];
    let expected = data[total - 1];
    let computed = checksum(data[1], len as u16, payload);
    if computed != expected {
        return Err(FrameError::BadChecksum { expected, computed });
    }
    let msg_type = HostMessageType::try_from(data[1])?;
    Ok((msg_type, payload))
}

// ── Deframer ──────────────────────────────────────────────────────────────────

/// Incremental frame parser with start-byte resynchronization.
///
/// Feed arbitrary byte slices with [`Deframer::push`]; complete, verified
/// frames come back in order. Garbage between frames, truncated writes, and
/// corrupted checksums cost only the bytes scanned past.
#[derive(Default)]
pub struct Deframer {
    buf: Vec<u8>,
}

impl Deframer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes and drain every complete frame.
    pub fn push(&mut self, data: &[u8]) -> Vec<(HostMessageType, Bytes)> {
        self.buf.extend_from_slice(data);
        let mut frames = Vec::new();

        loop {
            // Discard up to the next plausible start byte.
            match self.buf.iter().position(|&b| b == FRAME_START) {
                Some(0) => {}
                Some(skip) => {
                    self.buf.drain(..skip);
                }
                None => {
                    self.buf.clear();
                    break;
                }
            }

            match decode_frame(&self.buf) {
                Ok((msg_type, payload)) => {
                    let frame_len = FRAME_OVERHEAD + payload.len();
                    let payload = Bytes::copy_from_slice(payload);
                    self.buf.drain(..frame_len);
                    frames.push((msg_type, payload));
                }
                Err(FrameError::Truncated { .. }) => break,
                Err(_) => {
                    // Corrupt frame — skip the start byte and rescan.
                    self.buf.drain(..1);
                }
            }
        }

        frames
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when building or interpreting host frames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("payload length {0} exceeds maximum {}", MAX_FRAME_PAYLOAD)]
    PayloadTooLarge(usize),

    #[error("unknown message type: 0x{0:02x}")]
    UnknownType(u8),

    #[error("unknown host status code: 0x{0:02x}")]
    UnknownStatus(u8),

    #[error("truncated frame: need {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },

    #[error("expected start byte 0xaa, got 0x{0:02x}")]
    MissingStart(u8),

    #[error("checksum mismatch: frame carries 0x{expected:02x}, computed 0x{computed:02x}")]
    BadChecksum { expected: u8, computed: u8 },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
