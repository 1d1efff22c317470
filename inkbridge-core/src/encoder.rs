//! Event encoder: turns raw pointer samples into wire frames.
//!
//! Routing rule, checked per delivered sample set:
//!
//! 1. Any active pen-class pointer (stylus, eraser, unknown tool)
//!    routes the whole sample down the **pen** path, restricted to
//!    pointer 0 — multi-pointer stylus input is not a supported use
//!    case and is ignored beyond the first pointer.
//! 2. Otherwise, two or more active fingers emit a **touch** frame
//!    covering all of them. Deliberate multi-finger gestures are
//!    never suppressed, even in stylus-only mode.
//! 3. A single finger emits a touch frame only when stylus-only mode
//!    is disabled; with it enabled the event is consumed (so the OS
//!    cannot reinterpret the contact) but nothing is transmitted.
//!
//! Historical sub-samples are flushed oldest-first before the
//! current sample so fast strokes keep their shape.
//!
//! The encoder has no side effects beyond writing to the outbound
//! buffer; a full buffer silently drops frames (backpressure).

use std::sync::Arc;

use tracing::warn;

use crate::buffer::OutboundBuffer;
use crate::frame::{
    PenFrame, TouchFrame, TouchSlot, ACTION_BUTTON_BIT, COORD_SCALE, PRESSURE_SCALE, TILT_LIMIT,
};
use crate::pointer::{Pointer, PointerAction, PointerSample, SurfaceSize};

// ── Normalization helpers ────────────────────────────────────────

/// Normalize a surface-local coordinate into the wire scale.
///
/// Truncating rather than rounding keeps the historical behaviour
/// the receiver calibrates against (960 of 1920 maps to 16383).
pub fn normalize_coord(value: f32, dimension: f32) -> i32 {
    ((value / dimension) * COORD_SCALE as f32) as i32
}

fn clamp_coord(value: i32) -> i32 {
    value.clamp(0, COORD_SCALE)
}

/// Normalize pressure 0.0..=1.0 into the wire scale.
pub fn normalize_pressure(pressure: f32) -> i32 {
    ((pressure * PRESSURE_SCALE as f32).round() as i32).clamp(0, PRESSURE_SCALE)
}

/// Convert polar tilt (tilt angle + azimuth, radians) into the
/// Cartesian degree pair the receiver expects.
pub fn tilt_to_cartesian(tilt: f32, orientation: f32) -> (i32, i32) {
    let magnitude = (tilt as f64).sin() * TILT_LIMIT as f64;
    let x = (magnitude * (orientation as f64).sin()).round() as i32;
    let y = (magnitude * (orientation as f64).cos()).round() as i32;
    (x.clamp(-TILT_LIMIT, TILT_LIMIT), y.clamp(-TILT_LIMIT, TILT_LIMIT))
}

// ── EventEncoder ─────────────────────────────────────────────────

/// Converts pointer samples into frames and queues them for the
/// writer. One encoder exists per session; the stylus-only flag is
/// read once at connect time and never changes mid-session.
pub struct EventEncoder {
    stylus_only: bool,
    buffer: Arc<OutboundBuffer>,
}

impl EventEncoder {
    pub fn new(stylus_only: bool, buffer: Arc<OutboundBuffer>) -> Self {
        Self { stylus_only, buffer }
    }

    pub fn stylus_only(&self) -> bool {
        self.stylus_only
    }

    /// Process one delivered sample set.
    ///
    /// Returns `true` when the event was consumed (whether or not
    /// any bytes were produced), `false` when it could not be routed
    /// and should fall through to the caller.
    pub fn process(&self, sample: &PointerSample, surface: SurfaceSize) -> bool {
        if !surface.is_valid() {
            warn!(width = surface.width, height = surface.height, "invalid surface dimensions");
            return false;
        }
        if sample.pointers.is_empty() {
            return false;
        }

        if sample.has_pen() {
            self.emit_pen(sample, surface);
            return true;
        }

        if sample.pointers.len() < 2 && self.stylus_only {
            // Consume the contact so the OS gesture layer cannot act
            // on it, but transmit nothing.
            return true;
        }

        self.emit_touch(sample, surface);
        true
    }

    // ── Pen path ─────────────────────────────────────────────────

    fn emit_pen(&self, sample: &PointerSample, surface: SurfaceSize) {
        // Intermediate positions first, oldest to newest.
        let replay_action = match sample.action {
            PointerAction::HoverMove => PointerAction::HoverMove,
            _ => PointerAction::Move,
        };
        for entry in &sample.history {
            if let Some(p) = entry.pointers.first() {
                let frame = self.pen_frame(p, replay_action, sample.button_pressed, surface);
                self.buffer.enqueue(frame.encode());
            }
        }

        let p = &sample.pointers[0];
        let frame = self.pen_frame(p, sample.action, sample.button_pressed, surface);
        self.buffer.enqueue(frame.encode());
    }

    fn pen_frame(
        &self,
        p: &Pointer,
        action: PointerAction,
        button: bool,
        surface: SurfaceSize,
    ) -> PenFrame {
        let mut action_byte = action.code();
        if button {
            action_byte |= ACTION_BUTTON_BIT;
        }
        let (tilt_x, tilt_y) = tilt_to_cartesian(p.tilt, p.orientation);
        PenFrame {
            tool_class: p.tool.code(),
            action: action_byte,
            x: clamp_coord(normalize_coord(p.x, surface.width)),
            y: clamp_coord(normalize_coord(p.y, surface.height)),
            pressure: normalize_pressure(p.pressure),
            tilt_x,
            tilt_y,
        }
    }

    // ── Touch path ───────────────────────────────────────────────

    fn emit_touch(&self, sample: &PointerSample, surface: SurfaceSize) {
        // History entries are intermediate positions: every slot is
        // still in contact there.
        for entry in &sample.history {
            if let Ok(frame) = Self::touch_frame(&entry.pointers, surface, |_| 1) {
                self.buffer.enqueue(frame.encode());
            }
        }

        // Slot states for the current sample. A partial lift marks
        // only the lifting slot; the rest stay active, so the
        // receiver's slot table updates atomically from one frame.
        let states: Box<dyn Fn(usize) -> u8> = match sample.action {
            PointerAction::Up | PointerAction::Cancel => Box::new(|_| 0),
            PointerAction::PointerUp => {
                let lifted = sample.changed_index;
                Box::new(move |i| u8::from(i != lifted))
            }
            _ => Box::new(|_| 1),
        };

        if let Ok(frame) = Self::touch_frame(&sample.pointers, surface, states) {
            self.buffer.enqueue(frame.encode());
        }
    }

    fn touch_frame(
        pointers: &[Pointer],
        surface: SurfaceSize,
        state_of: impl Fn(usize) -> u8,
    ) -> Result<TouchFrame, crate::error::StreamError> {
        let slots = pointers
            .iter()
            .take(crate::frame::MAX_TOUCH_SLOTS)
            .enumerate()
            .map(|(i, p)| TouchSlot {
                id: p.id,
                state: state_of(i),
                x: clamp_coord(normalize_coord(p.x, surface.width)),
                y: clamp_coord(normalize_coord(p.y, surface.height)),
            })
            .collect();
        TouchFrame::new(slots)
    }
}

// ── Tests ────────────────────────────────────────────────────────
