//! Axis configuration: TOML loading with defaults and bounds validation.
//!
//! Every field here is also runtime-mutable through the engine's
//! field-write hooks; the configuration supplies the initial values the
//! engine reconciles at construction (speed/resolution sync, deadband
//! floor, limit push).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{CalibMode, Direction, FreezeOffset, OperatingMode, Severity, Spmg};

/// Upper bound on the retry limit.
pub const RETRY_LIMIT_MAX: u16 = 100;

/// Valid range for the move fraction.
pub const FRAC_MIN: f64 = 0.1;
pub const FRAC_MAX: f64 = 1.5;

/// Per-axis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxisConfig {
    /// Human-readable axis name (e.g., "sample-x").
    #[serde(default = "default_name")]
    pub name: String,

    /// User ↔ dial direction sense.
    #[serde(default)]
    pub dir: Direction,
    /// User offset [EGU].
    #[serde(default)]
    pub off: f64,
    /// Offset handling during calibration.
    #[serde(default)]
    pub foff: FreezeOffset,
    /// Use/Set calibration switch at startup.
    #[serde(default)]
    pub set_mode: CalibMode,
    /// Desired-value source.
    #[serde(default)]
    pub omsl: OperatingMode,
    /// Initial control mode.
    #[serde(default)]
    pub spmg: Spmg,

    /// Motor resolution [EGU/step], sign-carrying. Zero is reconciled to
    /// `urev / srev` (or 1.0) at startup.
    #[serde(default)]
    pub mres: f64,
    /// Encoder resolution [EGU/count]. Zero inherits `mres`.
    #[serde(default)]
    pub eres: f64,
    /// Steps per revolution. Non-positive is reconciled to 200.
    #[serde(default = "default_srev")]
    pub srev: i32,
    /// EGU per revolution.
    #[serde(default)]
    pub urev: f64,

    /// Slew velocity [EGU/s].
    #[serde(default = "default_velo")]
    pub velo: f64,
    /// Base velocity [EGU/s].
    #[serde(default)]
    pub vbas: f64,
    /// Maximum velocity [EGU/s]; zero disables the cap.
    #[serde(default)]
    pub vmax: f64,
    /// Slew speed [rev/s]; zero defers to `velo`.
    #[serde(default)]
    pub s: f64,
    /// Base speed [rev/s]; zero defers to `vbas`.
    #[serde(default)]
    pub sbas: f64,
    /// Maximum speed [rev/s]; zero defers to `vmax`.
    #[serde(default)]
    pub smax: f64,
    /// Backlash speed [rev/s]; zero defers to `bvel`.
    #[serde(default)]
    pub sbak: f64,
    /// Backlash velocity [EGU/s].
    #[serde(default)]
    pub bvel: f64,
    /// Slew acceleration time [s].
    #[serde(default = "default_accl")]
    pub accl: f64,
    /// Backlash acceleration time [s].
    #[serde(default = "default_bacc")]
    pub bacc: f64,
    /// Jog velocity [EGU/s]; zero inherits `velo`.
    #[serde(default)]
    pub jvel: f64,
    /// Jog acceleration rate [EGU/s²]; zero inherits `velo / accl`.
    #[serde(default)]
    pub jar: f64,
    /// Home velocity [EGU/s]; zero inherits `vbas`.
    #[serde(default)]
    pub hvel: f64,

    /// Backlash distance [EGU], sign selects the preferred direction.
    #[serde(default)]
    pub bdst: f64,
    /// Retry deadband [EGU]; floored to `|mres|` at runtime.
    #[serde(default)]
    pub rdbd: f64,
    /// Retry limit; zero disables retries.
    #[serde(default = "default_rtry")]
    pub rtry: u16,
    /// Fraction of the remaining backlash distance per approach step.
    #[serde(default = "default_frac")]
    pub frac: f64,
    /// Readback settle delay [s].
    #[serde(default)]
    pub dly: f64,
    /// Stop on a commanded-direction reversal mid-move.
    #[serde(default = "default_ntm")]
    pub ntm: bool,

    /// Use the encoder for readback when present.
    #[serde(default)]
    pub ueip: bool,
    /// Use the external readback link.
    #[serde(default)]
    pub urip: bool,
    /// External readback resolution multiplier.
    #[serde(default = "default_rres")]
    pub rres: f64,

    /// Dial high travel limit [EGU]. Both limits zero disables checking.
    #[serde(default)]
    pub dhlm: f64,
    /// Dial low travel limit [EGU].
    #[serde(default)]
    pub dllm: f64,

    /// Proportional gain, normalized to [0, 1].
    #[serde(default)]
    pub pcof: f64,
    /// Integral gain, normalized to [0, 1].
    #[serde(default)]
    pub icof: f64,
    /// Derivative gain, normalized to [0, 1].
    #[serde(default)]
    pub dcof: f64,
    /// Holding torque / closed-loop enable at startup.
    #[serde(default)]
    pub cnen: bool,

    /// Alarm severity for limit conditions.
    #[serde(default)]
    pub hlsv: Severity,
}

fn default_name() -> String {
    "axis".to_string()
}
fn default_srev() -> i32 {
    200
}
fn default_velo() -> f64 {
    1.0
}
fn default_accl() -> f64 {
    0.2
}
fn default_bacc() -> f64 {
    0.5
}
fn default_rtry() -> u16 {
    10
}
fn default_frac() -> f64 {
    1.0
}
fn default_ntm() -> bool {
    true
}
fn default_rres() -> f64 {
    1.0
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            dir: Direction::default(),
            off: 0.0,
            foff: FreezeOffset::default(),
            set_mode: CalibMode::default(),
            omsl: OperatingMode::default(),
            spmg: Spmg::default(),
            mres: 0.0,
            eres: 0.0,
            srev: default_srev(),
            urev: 0.0,
            velo: default_velo(),
            vbas: 0.0,
            vmax: 0.0,
            s: 0.0,
            sbas: 0.0,
            smax: 0.0,
            sbak: 0.0,
            bvel: 0.0,
            accl: default_accl(),
            bacc: default_bacc(),
            jvel: 0.0,
            jar: 0.0,
            hvel: 0.0,
            bdst: 0.0,
            rdbd: 0.0,
            rtry: default_rtry(),
            frac: default_frac(),
            dly: 0.0,
            ntm: default_ntm(),
            ueip: false,
            urip: false,
            rres: default_rres(),
            dhlm: 0.0,
            dllm: 0.0,
            pcof: 0.0,
            icof: 0.0,
            dcof: 0.0,
            cnen: false,
            hlsv: Severity::default(),
        }
    }
}

impl AxisConfig {
    /// Parse and validate a configuration from a TOML string.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let cfg: Self =
            toml::from_str(text).map_err(|e| ConfigError::Parse(format!("axis config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load and validate a configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    /// Validate parameter bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn non_negative(name: &str, value: f64) -> Result<(), ConfigError> {
            if value < 0.0 {
                return Err(ConfigError::Validation(format!("{name} {value} is negative")));
            }
            Ok(())
        }

        for (name, value) in [
            ("velo", self.velo),
            ("vbas", self.vbas),
            ("vmax", self.vmax),
            ("s", self.s),
            ("sbas", self.sbas),
            ("smax", self.smax),
            ("sbak", self.sbak),
            ("bvel", self.bvel),
            ("jvel", self.jvel),
            ("jar", self.jar),
            ("hvel", self.hvel),
            ("accl", self.accl),
            ("bacc", self.bacc),
            ("rdbd", self.rdbd),
            ("dly", self.dly),
        ] {
            non_negative(name, value)?;
        }

        if self.rtry > RETRY_LIMIT_MAX {
            return Err(ConfigError::Validation(format!(
                "rtry {} out of range [0, {RETRY_LIMIT_MAX}]",
                self.rtry
            )));
        }
        if !(FRAC_MIN..=FRAC_MAX).contains(&self.frac) {
            return Err(ConfigError::Validation(format!(
                "frac {} out of range [{FRAC_MIN}, {FRAC_MAX}]",
                self.frac
            )));
        }
        for (name, gain) in [("pcof", self.pcof), ("icof", self.icof), ("dcof", self.dcof)] {
            if !(0.0..=1.0).contains(&gain) {
                return Err(ConfigError::Validation(format!(
                    "{name} {gain} out of range [0, 1]"
                )));
            }
        }
        if self.urip && self.rres == 0.0 {
            return Err(ConfigError::Validation(
                "rres must be nonzero when urip is enabled".into(),
            ));
        }
        if self.dhlm < self.dllm {
            return Err(ConfigError::Validation(format!(
                "dhlm {} below dllm {}",
                self.dhlm, self.dllm
            )));
        }
        Ok(())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let cfg = AxisConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.srev, 200);
        assert_eq!(cfg.rtry, 10);
        assert_eq!(cfg.frac, 1.0);
        assert!(cfg.ntm);
    }

    #[test]
    fn parse_minimal_toml() {
        let cfg = AxisConfig::from_toml(
            r#"
name = "sample-x"
mres = 0.001
velo = 2.5
dhlm = 100.0
dllm = -100.0
"#,
        )
        .unwrap();
        assert_eq!(cfg.name, "sample-x");
        assert_eq!(cfg.mres, 0.001);
        assert_eq!(cfg.velo, 2.5);
        assert_eq!(cfg.dhlm, 100.0);
    }

    #[test]
    fn rejects_negative_velocity() {
        let err = AxisConfig::from_toml("velo = -1.0").unwrap_err();
        assert!(err.to_string().contains("velo"));
    }

    #[test]
    fn rejects_frac_out_of_range() {
        assert!(AxisConfig::from_toml("frac = 0.01").is_err());
        assert!(AxisConfig::from_toml("frac = 2.0").is_err());
    }

    #[test]
    fn rejects_gain_out_of_range() {
        assert!(AxisConfig::from_toml("pcof = 1.5").is_err());
    }

    #[test]
    fn rejects_inverted_limits() {
        assert!(AxisConfig::from_toml("dhlm = -1.0\ndllm = 1.0").is_err());
    }

    #[test]
    fn rejects_urip_without_rres() {
        assert!(AxisConfig::from_toml("urip = true\nrres = 0.0").is_err());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name = \"theta\"\nmres = 0.0005").unwrap();
        let cfg = AxisConfig::load(file.path()).unwrap();
        assert_eq!(cfg.name, "theta");
        assert_eq!(cfg.mres, 0.0005);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = AxisConfig::load(Path::new("/nonexistent/axis.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
