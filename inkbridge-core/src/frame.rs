//! Wire frames for the multiplexed pen/touch protocol.
//!
//! Every frame is self-describing via a leading type tag. All
//! multi-byte integers are little-endian.
//!
//! ## Wire format
//!
//! **Pen frame** (23 bytes):
//! ```text
//! type:       u8   (1)  = 0x01
//! tool_class: u8   (1)
//! action:     u8   (1)  bit 5 set while the primary button is held
//! x:          i32  (4)  0..=32767
//! y:          i32  (4)  0..=32767
//! pressure:   i32  (4)  0..=4096
//! tilt_x:     i32  (4)  -90..=90 degrees
//! tilt_y:     i32  (4)  -90..=90 degrees
//! ```
//!
//! **Touch frame** (2 + 10·n bytes, n = 1..=10):
//! ```text
//! type:         u8  (1)  = 0x02
//! finger_count: u8  (1)
//! per finger:
//!   slot_id: u8  (1)  platform tracking id, passthrough
//!   state:   u8  (1)  1 = active, 0 = lifted
//!   x:       i32 (4)
//!   y:       i32 (4)
//! ```
//!
//! **Heartbeat** (23 bytes): every byte set to the sentinel 127.
//! Emitted by the writer when no real data was pending for a full
//! poll interval; the receiver discards it.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::StreamError;

// ── Constants ────────────────────────────────────────────────────

/// Type tag of a pen frame.
pub const FRAME_TYPE_PEN: u8 = 0x01;
/// Type tag of a touch frame.
pub const FRAME_TYPE_TOUCH: u8 = 0x02;
/// Fill byte of a heartbeat frame. Out of range for every tag and
/// coordinate byte pattern the receiver accepts.
pub const HEARTBEAT_SENTINEL: u8 = 127;

/// Encoded size of a pen frame.
pub const PEN_FRAME_LEN: usize = 23;
/// Encoded size of one touch slot.
pub const TOUCH_SLOT_LEN: usize = 10;
/// Maximum finger slots carried by one touch frame.
pub const MAX_TOUCH_SLOTS: usize = 10;
/// Largest possible frame on the wire (a full touch frame).
pub const MAX_FRAME_LEN: usize = 2 + MAX_TOUCH_SLOTS * TOUCH_SLOT_LEN;

/// Bit set in the wire action byte while the primary button is held.
pub const ACTION_BUTTON_BIT: u8 = 1 << 5;

/// Full-scale normalized coordinate.
pub const COORD_SCALE: i32 = 32767;
/// Full-scale normalized pressure.
pub const PRESSURE_SCALE: i32 = 4096;
/// Tilt magnitude limit in degrees.
pub const TILT_LIMIT: i32 = 90;

// ── PenFrame ─────────────────────────────────────────────────────

/// One stylus/eraser reading, normalized and ready for the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PenFrame {
    pub tool_class: u8,
    /// Platform action code in the low bits; bit 5 = button held.
    pub action: u8,
    pub x: i32,
    pub y: i32,
    pub pressure: i32,
    pub tilt_x: i32,
    pub tilt_y: i32,
}

impl PenFrame {
    /// Serialize to wire bytes (little-endian).
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(PEN_FRAME_LEN);
        buf.put_u8(FRAME_TYPE_PEN);
        buf.put_u8(self.tool_class);
        buf.put_u8(self.action);
        buf.put_i32_le(self.x);
        buf.put_i32_le(self.y);
        buf.put_i32_le(self.pressure);
        buf.put_i32_le(self.tilt_x);
        buf.put_i32_le(self.tilt_y);
        buf.freeze()
    }

    /// Deserialize from wire bytes. Used by tests and receiver-side
    /// tooling; the streaming side only encodes.
    pub fn decode(data: &[u8]) -> Result<Self, StreamError> {
        if data.len() < PEN_FRAME_LEN {
            return Err(StreamError::InvalidFrame("pen frame too short"));
        }
        if data[0] != FRAME_TYPE_PEN {
            return Err(StreamError::InvalidFrame("not a pen frame"));
        }
        let le = |at: usize| read_i32_le(data, at);
        Ok(Self {
            tool_class: data[1],
            action: data[2],
            x: le(3),
            y: le(7),
            pressure: le(11),
            tilt_x: le(15),
            tilt_y: le(19),
        })
    }

    /// Whether the primary button bit is set.
    pub fn button_held(&self) -> bool {
        self.action & ACTION_BUTTON_BIT != 0
    }

    /// Action code with the button bit stripped.
    pub fn action_code(&self) -> u8 {
        self.action & !ACTION_BUTTON_BIT
    }
}

// ── TouchFrame ───────────────────────────────────────────────────

/// One slot of a touch frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TouchSlot {
    /// Platform tracking id, passed through unchanged.
    pub id: u8,
    /// 1 = in contact, 0 = lifted.
    pub state: u8,
    pub x: i32,
    pub y: i32,
}

/// A multi-finger reading covering every active pointer, so the
/// receiver's slot table updates atomically from a single frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TouchFrame {
    pub slots: Vec<TouchSlot>,
}

impl TouchFrame {
    pub fn new(slots: Vec<TouchSlot>) -> Result<Self, StreamError> {
        if slots.is_empty() {
            return Err(StreamError::InvalidFrame("touch frame with zero slots"));
        }
        if slots.len() > MAX_TOUCH_SLOTS {
            return Err(StreamError::InvalidFrame("touch frame exceeds 10 slots"));
        }
        Ok(Self { slots })
    }

    /// Encoded size on the wire.
    pub fn wire_len(&self) -> usize {
        2 + self.slots.len() * TOUCH_SLOT_LEN
    }

    /// Serialize to wire bytes (little-endian).
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        buf.put_u8(FRAME_TYPE_TOUCH);
        buf.put_u8(self.slots.len() as u8);
        for slot in &self.slots {
            buf.put_u8(slot.id);
            buf.put_u8(slot.state);
            buf.put_i32_le(slot.x);
            buf.put_i32_le(slot.y);
        }
        buf.freeze()
    }

    /// Deserialize from wire bytes.
    pub fn decode(data: &[u8]) -> Result<Self, StreamError> {
        if data.len() < 2 {
            return Err(StreamError::InvalidFrame("touch frame too short"));
        }
        if data[0] != FRAME_TYPE_TOUCH {
            return Err(StreamError::InvalidFrame("not a touch frame"));
        }
        let count = data[1] as usize;
        if count == 0 || count > MAX_TOUCH_SLOTS {
            return Err(StreamError::InvalidFrame("bad finger count"));
        }
        if data.len() < 2 + count * TOUCH_SLOT_LEN {
            return Err(StreamError::InvalidFrame("touch frame truncated"));
        }
        let mut slots = Vec::with_capacity(count);
        for i in 0..count {
            let at = 2 + i * TOUCH_SLOT_LEN;
            slots.push(TouchSlot {
                id: data[at],
                state: data[at + 1],
                x: read_i32_le(data, at + 2),
                y: read_i32_le(data, at + 6),
            });
        }
        Ok(Self { slots })
    }
}

/// Caller guarantees `at + 4 <= data.len()`.
fn read_i32_le(data: &[u8], at: usize) -> i32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&data[at..at + 4]);
    i32::from_le_bytes(raw)
}

// ── Heartbeat ────────────────────────────────────────────────────

/// A liveness frame: pen-frame sized, filled with the sentinel.
pub fn heartbeat_frame() -> Bytes {
    Bytes::from_static(&[HEARTBEAT_SENTINEL; PEN_FRAME_LEN])
}

/// Whether a buffer holds exactly one heartbeat frame.
pub fn is_heartbeat(data: &[u8]) -> bool {
    data.len() == PEN_FRAME_LEN && data.iter().all(|&b| b == HEARTBEAT_SENTINEL)
}

// ── Tests ────────────────────────────────────────────────────────
