//! Input-side data model: one pointer sample as delivered by the
//! touch/stylus surface.
//!
//! A sample describes *all* currently-active pointers plus zero or
//! more historical sub-samples batched by the input system since the
//! last delivery. Tool-class and action codes are the platform input
//! system's own codes and go onto the wire unchanged — slot ids are
//! never renumbered, so lift/re-press continuity is preserved.

// ── ToolClass ────────────────────────────────────────────────────

/// What produced a pointer reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolClass {
    Unknown,
    Finger,
    Stylus,
    Eraser,
}

impl ToolClass {
    /// Platform tool-class code, passed through to the wire.
    pub fn code(self) -> u8 {
        match self {
            ToolClass::Unknown => 0,
            ToolClass::Finger => 1,
            ToolClass::Stylus => 2,
            ToolClass::Eraser => 4,
        }
    }

    /// A pen-class tool routes the whole sample down the pen path.
    pub fn is_pen(self) -> bool {
        matches!(self, ToolClass::Stylus | ToolClass::Eraser | ToolClass::Unknown)
    }
}

// ── PointerAction ────────────────────────────────────────────────

/// What happened in this sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerAction {
    /// First pointer touched down.
    Down,
    /// Last pointer lifted.
    Up,
    /// One or more pointers moved.
    Move,
    /// The gesture was aborted by the input system.
    Cancel,
    /// An additional pointer touched down mid-gesture.
    PointerDown,
    /// One of several pointers lifted (partial lift).
    PointerUp,
    /// Stylus hovering above the surface.
    HoverMove,
}

impl PointerAction {
    /// Platform action code, packed into the low bits of the wire
    /// action byte (bit 5 is reserved for the primary button).
    pub fn code(self) -> u8 {
        match self {
            PointerAction::Down => 0,
            PointerAction::Up => 1,
            PointerAction::Move => 2,
            PointerAction::Cancel => 3,
            PointerAction::PointerDown => 5,
            PointerAction::PointerUp => 6,
            PointerAction::HoverMove => 7,
        }
    }

    /// Whether this action ends contact for the pointer(s) it names.
    pub fn is_terminal(self) -> bool {
        matches!(self, PointerAction::Up | PointerAction::Cancel)
    }
}

// ── Pointer ──────────────────────────────────────────────────────

/// One active pointer within a sample.
#[derive(Debug, Clone, Copy)]
pub struct Pointer {
    /// Platform-provided pointer/slot identifier (passthrough).
    pub id: u8,
    pub tool: ToolClass,
    /// Position in surface-local pixels.
    pub x: f32,
    pub y: f32,
    /// Normalized pressure, 0.0..=1.0.
    pub pressure: f32,
    /// Tilt away from the surface normal, radians.
    pub tilt: f32,
    /// Azimuth of the tilt, radians.
    pub orientation: f32,
}

impl Pointer {
    /// A finger pointer with neutral axis data.
    pub fn finger(id: u8, x: f32, y: f32) -> Self {
        Self {
            id,
            tool: ToolClass::Finger,
            x,
            y,
            pressure: 1.0,
            tilt: 0.0,
            orientation: 0.0,
        }
    }

    /// A stylus pointer.
    pub fn stylus(x: f32, y: f32, pressure: f32) -> Self {
        Self {
            id: 0,
            tool: ToolClass::Stylus,
            x,
            y,
            pressure,
            tilt: 0.0,
            orientation: 0.0,
        }
    }
}

// ── HistoricalSample ─────────────────────────────────────────────

/// Coordinates batched by the input system between deliveries.
/// Entries are ordered oldest-first and must be replayed before the
/// current sample to preserve stroke fidelity during fast motion.
#[derive(Debug, Clone)]
pub struct HistoricalSample {
    /// One entry per active pointer, aligned with
    /// [`PointerSample::pointers`].
    pub pointers: Vec<Pointer>,
}

// ── PointerSample ────────────────────────────────────────────────

/// One reading from the input surface.
#[derive(Debug, Clone)]
pub struct PointerSample {
    pub action: PointerAction,
    /// Index into `pointers` of the pointer that triggered a
    /// `PointerDown`/`PointerUp`; ignored for other actions.
    pub changed_index: usize,
    /// All currently-active pointers, in platform delivery order.
    pub pointers: Vec<Pointer>,
    /// Whether the primary stylus button is held.
    pub button_pressed: bool,
    /// Batched sub-samples since the last delivery, oldest first.
    pub history: Vec<HistoricalSample>,
}

impl PointerSample {
    pub fn new(action: PointerAction, pointers: Vec<Pointer>) -> Self {
        Self {
            action,
            changed_index: 0,
            pointers,
            button_pressed: false,
            history: Vec::new(),
        }
    }

    /// True when any active pointer is a pen-class tool.
    pub fn has_pen(&self) -> bool {
        self.pointers.iter().any(|p| p.tool.is_pen())
    }
}

// ── SurfaceSize ──────────────────────────────────────────────────

/// Current input surface dimensions, supplied per sample by the
/// owning view layer for coordinate normalization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceSize {
    pub width: f32,
    pub height: f32,
}

impl SurfaceSize {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// A zero-area surface cannot normalize coordinates.
    pub fn is_valid(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_codes_are_platform_passthrough() {
        assert_eq!(ToolClass::Unknown.code(), 0);
        assert_eq!(ToolClass::Finger.code(), 1);
        assert_eq!(ToolClass::Stylus.code(), 2);
        assert_eq!(ToolClass::Eraser.code(), 4);
    }

    #[test]
    fn pen_routing_classes() {
        assert!(ToolClass::Stylus.is_pen());
        assert!(ToolClass::Eraser.is_pen());
        assert!(ToolClass::Unknown.is_pen());
        assert!(!ToolClass::Finger.is_pen());
    }

    #[test]
    fn action_codes_fit_below_button_bit() {
        for action in [
            PointerAction::Down,
            PointerAction::Up,
            PointerAction::Move,
            PointerAction::Cancel,
            PointerAction::PointerDown,
            PointerAction::PointerUp,
            PointerAction::HoverMove,
        ] {
            assert!(action.code() < 0x20, "{action:?} collides with bit 5");
        }
    }

    #[test]
    fn surface_validity() {
        assert!(SurfaceSize::new(1920.0, 1080.0).is_valid());
        assert!(!SurfaceSize::new(0.0, 1080.0).is_valid());
    }
}
