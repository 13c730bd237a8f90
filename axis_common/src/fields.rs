//! Published-field catalogue.
//!
//! Every externally visible axis field is identified by a [`Field`] value.
//! The engine batches change notifications per cycle (see
//! `axis_engine::publish`) and flushes each dirty field exactly once
//! through the host's `FieldPublisher`.

/// Identifier of a published axis field.
///
/// Discriminants are bit positions in the engine's dirty mask and must
/// stay below 64.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Field {
    /// Desired position, user coordinates.
    Val = 0,
    /// Desired position, dial coordinates.
    Dval = 1,
    /// Desired position, raw steps.
    Rval = 2,
    /// User high travel limit.
    Hlm = 3,
    /// User low travel limit.
    Llm = 4,
    /// Done moving.
    Dmov = 5,
    /// Stop/Pause/Move/Go mode.
    Spmg = 6,
    /// Retry count.
    Rcnt = 7,
    /// Motor resolution [EGU/step].
    Mres = 8,
    /// Encoder resolution [EGU/count].
    Eres = 9,
    /// Use-encoder flag.
    Ueip = 10,
    /// Use-readback-link flag.
    Urip = 11,
    /// Software travel limit violation.
    Lvio = 12,
    /// Relative move value.
    Rlv = 13,
    /// User offset.
    Off = 14,
    /// Readback, user coordinates.
    Rbv = 15,
    /// Dial high travel limit.
    Dhlm = 16,
    /// Dial low travel limit.
    Dllm = 17,
    /// Readback, dial coordinates.
    Drbv = 18,
    /// Retry deadband.
    Rdbd = 19,
    /// Moving now.
    Movn = 20,
    /// High limit switch (user sense).
    Hls = 21,
    /// Low limit switch (user sense).
    Lls = 22,
    /// Readback, raw steps.
    Rrbv = 23,
    /// Raw motor position.
    Rmp = 24,
    /// Raw encoder position.
    Rep = 25,
    /// Controller status word.
    Msta = 26,
    /// At-home indicator.
    Athm = 27,
    /// Last travel direction.
    Tdir = 28,
    /// Motion-in-progress word.
    Mip = 29,
    /// Dial distance to target.
    Diff = 30,
    /// Raw distance to target.
    Rdif = 31,
    /// Slew speed [rev/s].
    S = 32,
    /// Base speed [rev/s].
    Sbas = 33,
    /// Backlash speed [rev/s].
    Sbak = 34,
    /// Steps per revolution.
    Srev = 35,
    /// EGU per revolution.
    Urev = 36,
    /// Slew velocity [EGU/s].
    Velo = 37,
    /// Base velocity [EGU/s].
    Vbas = 38,
    /// Backlash velocity [EGU/s].
    Bvel = 39,
    /// Retry-exhausted (missed target) flag.
    Miss = 40,
    /// Slew acceleration time [s].
    Accl = 41,
    /// Backlash acceleration time [s].
    Bacc = 42,
    /// Status-update request.
    Stup = 43,
    /// Maximum velocity [EGU/s].
    Vmax = 44,
    /// Maximum speed [rev/s].
    Smax = 45,
    /// Home-forward button.
    Homf = 46,
    /// Home-reverse button.
    Homr = 47,
    /// Jog-forward button.
    Jogf = 48,
    /// Jog-reverse button.
    Jogr = 49,
    /// Jog velocity [EGU/s].
    Jvel = 50,
    /// Jog acceleration rate [EGU/s²].
    Jar = 51,
    /// Home velocity [EGU/s].
    Hvel = 52,
    /// Move fraction.
    Frac = 53,
    /// Backlash distance.
    Bdst = 54,
    /// Torque enable.
    Cnen = 55,
    /// Proportional gain.
    Pcof = 56,
    /// Integral gain.
    Icof = 57,
    /// Derivative gain.
    Dcof = 58,
    /// High limit switch (raw sense).
    Rhls = 59,
    /// Low limit switch (raw sense).
    Rlls = 60,
    /// Use/Set calibration switch.
    Set = 61,
    /// Freeze-offset switch.
    Foff = 62,
    /// User-direction (dial sense) switch.
    Dir = 63,
}

impl Field {
    /// Number of catalogued fields.
    pub const COUNT: usize = Self::ALL.len();

    /// All fields, in flush order: high-rate readback fields first, the
    /// less frequently changing remainder after.
    pub const ALL: [Field; 63] = [
        // High-rate fields.
        Field::Rbv,
        Field::Rrbv,
        Field::Drbv,
        Field::Rmp,
        Field::Rep,
        Field::Diff,
        Field::Rdif,
        Field::Msta,
        // Less frequently posted fields.
        Field::Val,
        Field::Dval,
        Field::Rval,
        Field::Tdir,
        Field::Mip,
        Field::Hlm,
        Field::Llm,
        Field::Spmg,
        Field::Rcnt,
        Field::Rlv,
        Field::Off,
        Field::Dhlm,
        Field::Dllm,
        Field::Hls,
        Field::Lls,
        Field::Rhls,
        Field::Rlls,
        Field::Athm,
        Field::Mres,
        Field::Eres,
        Field::Ueip,
        Field::Urip,
        Field::Lvio,
        Field::Rdbd,
        Field::S,
        Field::Sbas,
        Field::Sbak,
        Field::Srev,
        Field::Urev,
        Field::Velo,
        Field::Vbas,
        Field::Bvel,
        Field::Vmax,
        Field::Smax,
        Field::Miss,
        Field::Accl,
        Field::Bacc,
        Field::Movn,
        Field::Dmov,
        Field::Stup,
        Field::Homf,
        Field::Homr,
        Field::Jogf,
        Field::Jogr,
        Field::Jvel,
        Field::Jar,
        Field::Hvel,
        Field::Frac,
        Field::Bdst,
        Field::Cnen,
        Field::Pcof,
        Field::Icof,
        Field::Dcof,
        Field::Set,
        Field::Foff,
    ];

    /// Bit position of this field in a dirty mask.
    #[inline]
    pub const fn bit(self) -> u64 {
        1u64 << (self as u8)
    }
}

/// Value carried with a field-change notification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Int(i64),
    Bool(bool),
}

impl FieldValue {
    /// Numeric view, for hosts that publish everything as a double.
    #[inline]
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Float(v) => v,
            Self::Int(v) => v as f64,
            Self::Bool(v) => {
                if v {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_fields_unique_bits() {
        let mut seen = 0u64;
        for field in Field::ALL {
            assert_eq!(seen & field.bit(), 0, "duplicate bit for {field:?}");
            seen |= field.bit();
        }
        assert_eq!(seen.count_ones() as usize, Field::COUNT);
    }

    #[test]
    fn field_count_fits_mask() {
        assert!(Field::COUNT <= 64);
    }

    #[test]
    fn field_value_as_f64() {
        assert_eq!(FieldValue::Float(2.5).as_f64(), 2.5);
        assert_eq!(FieldValue::Int(-3).as_f64(), -3.0);
        assert_eq!(FieldValue::Bool(true).as_f64(), 1.0);
        assert_eq!(FieldValue::Bool(false).as_f64(), 0.0);
    }
}
