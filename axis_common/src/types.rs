//! State enums and controller status flags for the axis engine.
//!
//! All mode enums use `#[repr(u8)]` for compact layout and carry
//! `from_u8` converters for host frameworks that store modes numerically.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

// ─── Control Mode ───────────────────────────────────────────────────

/// Stop / Pause / Move / Go control mode.
///
/// - `Stop`: stop the motor; when it stops, snap drive values to readback
///   so it stays put until re-targeted.
/// - `Pause`: stop the motor; the pending target survives and motion
///   resumes on the next `Go`.
/// - `Move`: go to the target once, then pause (single-shot).
/// - `Go`: go, and keep responding to target changes (implicit go).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Spmg {
    /// Stop and hold at the stopped position.
    Stop = 0,
    /// Stop but keep the pending target.
    Pause = 1,
    /// Single-shot move.
    Move = 2,
    /// Free-running mode.
    Go = 3,
}

impl Spmg {
    /// Convert from raw `u8`. Returns `None` for invalid values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Stop),
            1 => Some(Self::Pause),
            2 => Some(Self::Move),
            3 => Some(Self::Go),
            _ => None,
        }
    }

    /// Whether this mode inhibits motion (Stop or Pause).
    #[inline]
    pub const fn inhibits_motion(self) -> bool {
        matches!(self, Self::Stop | Self::Pause)
    }
}

impl Default for Spmg {
    fn default() -> Self {
        Self::Go
    }
}

// ─── Coordinate-Space Modes ─────────────────────────────────────────

/// User ↔ dial coordinate direction sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Direction {
    /// User coordinates increase with dial coordinates.
    Positive = 0,
    /// User coordinates decrease as dial coordinates increase.
    Negative = 1,
}

impl Direction {
    /// Direction as a multiplicative sign.
    #[inline]
    pub const fn sign(self) -> f64 {
        match self {
            Self::Positive => 1.0,
            Self::Negative => -1.0,
        }
    }

    #[inline]
    pub const fn is_positive(self) -> bool {
        matches!(self, Self::Positive)
    }
}

impl Default for Direction {
    fn default() -> Self {
        Self::Positive
    }
}

/// Use/Set calibration switch.
///
/// In `Set` mode, target writes redefine coordinates without moving the
/// motor (offset recalibration or raw position reload).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CalibMode {
    /// Normal operation: target writes move the motor.
    Use = 0,
    /// Calibration: target writes redefine positions.
    Set = 1,
}

impl Default for CalibMode {
    fn default() -> Self {
        Self::Use
    }
}

/// Offset handling when coordinates are redefined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum FreezeOffset {
    /// Offset may be adjusted to keep user and dial in agreement.
    Variable = 0,
    /// Offset is frozen; the user coordinate moves instead.
    Frozen = 1,
}

impl Default for FreezeOffset {
    fn default() -> Self {
        Self::Variable
    }
}

/// Where the desired value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OperatingMode {
    /// Targets are written directly by operators/clients.
    Supervisory = 0,
    /// Targets are fetched from the input link each cycle.
    ClosedLoop = 1,
}

impl Default for OperatingMode {
    fn default() -> Self {
        Self::Supervisory
    }
}

/// Status-update request state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum UpdateRequest {
    /// No update requested.
    Off = 0,
    /// An info refresh has been requested.
    On = 1,
    /// The refresh command is in flight.
    Busy = 2,
}

impl Default for UpdateRequest {
    fn default() -> Self {
        Self::Off
    }
}

// ─── Alarms ─────────────────────────────────────────────────────────

/// Alarm condition raised through the field publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlarmCondition {
    /// Desired value is undefined (input link unreadable).
    Undefined,
    /// High limit switch or dial drive beyond the high limit.
    High,
    /// Low limit switch or dial drive beyond the low limit.
    Low,
    /// Controller communication error.
    Comm,
}

/// Alarm severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Severity {
    /// No alarm.
    None = 0,
    Minor = 1,
    Major = 2,
    Invalid = 3,
}

impl Default for Severity {
    fn default() -> Self {
        Self::None
    }
}

// ─── Controller Status ──────────────────────────────────────────────

bitflags! {
    /// Raw status word reported by the motor controller.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StatusFlags: u16 {
        /// Last commanded travel direction was positive.
        const DIRECTION_POSITIVE = 0x0001;
        /// Motion complete.
        const DONE               = 0x0002;
        /// Positive-end travel limit switch engaged.
        const PLUS_LS            = 0x0004;
        /// Motor home switch engaged.
        const HOME_SWITCH        = 0x0008;
        /// Negative-end travel limit switch engaged.
        const MINUS_LS           = 0x0010;
        /// Encoder home signal seen.
        const ENCODER_HOME       = 0x0020;
        /// An encoder is fitted and reporting.
        const ENCODER_PRESENT    = 0x0040;
        /// Controller fault; motion is not possible.
        const FAULT              = 0x0080;
        /// Closed-loop position maintenance active.
        const POSITION_MAINT     = 0x0100;
        /// Communication error with the controller.
        const COMM_ERROR         = 0x0200;
        /// Controller supports servo gain / torque commands.
        const GAIN_SUPPORT       = 0x0400;
    }
}

/// One status refresh from the controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusUpdate {
    /// True when this refresh observes a fresh asynchronous callback
    /// (motion progress or command completion), as opposed to a refresh
    /// performed because the host invoked the engine.
    pub callback: bool,
    /// Controller status word.
    pub flags: StatusFlags,
    /// Raw motor position [steps].
    pub motor_steps: i64,
    /// Raw encoder position [counts].
    pub encoder_steps: i64,
}

// ─── Tests ──────────────────────────────────────────────────────────
