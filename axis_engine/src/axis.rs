//! Per-axis state record.
//!
//! One `Axis` aggregates everything the engine tracks between
//! invocations: desired and last-commanded positions in all three
//! coordinate spaces, derived readback, motion-characteristic parameters,
//! the motion-in-progress word, and the request fields the host writes.
//! The record is exclusively owned by the [`Engine`](crate::engine::Engine)
//! and mutated only while its single-flight guard is held.

use axis_common::config::AxisConfig;
use axis_common::driver::ValueLink;
use axis_common::fields::{Field, FieldValue};
use axis_common::types::{
    CalibMode, Direction, FreezeOffset, OperatingMode, Severity, Spmg, StatusFlags, UpdateRequest,
};
use tracing::trace;

use crate::mip::Mip;
use crate::publish::ChangeSet;
use crate::transform::{dial_to_user, nint};

/// Full per-axis state.
#[derive(Debug, Clone)]
pub struct Axis {
    /// Human-readable axis name.
    pub name: String,

    // ── Coordinate-space configuration ──
    /// User ↔ dial direction sense.
    pub dir: Direction,
    /// User offset [EGU].
    pub off: f64,
    /// Offset handling during calibration.
    pub foff: FreezeOffset,
    /// Use/Set calibration switch.
    pub set_mode: CalibMode,
    /// Desired-value source.
    pub omsl: OperatingMode,

    // ── Control mode ──
    /// Stop/Pause/Move/Go.
    pub spmg: Spmg,
    /// Previous SPMG, for edge detection.
    pub lspg: Spmg,

    // ── Resolution ──
    /// Motor resolution [EGU/step], sign-carrying.
    pub mres: f64,
    /// Encoder resolution [EGU/count].
    pub eres: f64,
    /// Steps per revolution.
    pub srev: i32,
    /// EGU per revolution.
    pub urev: f64,

    // ── Speeds and accelerations ──
    /// Slew velocity [EGU/s].
    pub velo: f64,
    /// Base velocity [EGU/s].
    pub vbas: f64,
    /// Maximum velocity [EGU/s]; zero disables the cap.
    pub vmax: f64,
    /// Slew speed [rev/s].
    pub s: f64,
    /// Base speed [rev/s].
    pub sbas: f64,
    /// Maximum speed [rev/s].
    pub smax: f64,
    /// Backlash speed [rev/s].
    pub sbak: f64,
    /// Backlash velocity [EGU/s].
    pub bvel: f64,
    /// Slew acceleration time [s] (base → slew velocity).
    pub accl: f64,
    /// Backlash acceleration time [s].
    pub bacc: f64,
    /// Jog velocity [EGU/s].
    pub jvel: f64,
    /// Jog acceleration rate [EGU/s²].
    pub jar: f64,
    /// Home velocity [EGU/s].
    pub hvel: f64,

    // ── Backlash and retry ──
    /// Backlash distance [EGU]; sign selects the preferred direction.
    pub bdst: f64,
    /// Retry deadband [EGU].
    pub rdbd: f64,
    /// Retry limit; zero disables retries.
    pub rtry: u16,
    /// Retry count.
    pub rcnt: u16,
    /// Fraction of the remaining distance per approach step.
    pub frac: f64,
    /// Readback settle delay [s].
    pub dly: f64,
    /// Stop on commanded-direction reversal mid-move.
    pub ntm: bool,

    // ── Readback source ──
    /// Use the encoder when present.
    pub ueip: bool,
    /// Use the external readback link.
    pub urip: bool,
    /// External readback resolution multiplier.
    pub rres: f64,

    // ── Travel limits ──
    /// Dial high limit [EGU].
    pub dhlm: f64,
    /// Dial low limit [EGU].
    pub dllm: f64,
    /// User high limit [EGU].
    pub hlm: f64,
    /// User low limit [EGU].
    pub llm: f64,

    // ── Servo ──
    /// Proportional gain [0, 1].
    pub pcof: f64,
    /// Integral gain [0, 1].
    pub icof: f64,
    /// Derivative gain [0, 1].
    pub dcof: f64,
    /// Holding torque enable.
    pub cnen: bool,

    // ── Alarm configuration ──
    /// Severity for limit conditions.
    pub hlsv: Severity,
    /// Desired value undefined (input link unreadable).
    pub udf: bool,

    // ── Desired positions ──
    /// Desired position, user coordinates.
    pub val: f64,
    /// Desired position, dial coordinates.
    pub dval: f64,
    /// Desired position, raw steps.
    pub rval: i64,
    /// `val` at the last issued command.
    pub lval: f64,
    /// `dval` at the last issued command.
    pub ldvl: f64,
    /// `rval` at the last issued command.
    pub lrvl: i64,

    // ── Readback ──
    /// Readback, user coordinates.
    pub rbv: f64,
    /// Readback, dial coordinates.
    pub drbv: f64,
    /// Readback, raw steps.
    pub rrbv: i64,
    /// Raw motor position from the controller.
    pub rmp: i64,
    /// Raw encoder position from the controller.
    pub rep: i64,
    /// Dial distance to target: `dval - drbv`.
    pub diff: f64,
    /// Raw distance to target.
    pub rdif: i64,

    // ── Status ──
    /// Last controller status word.
    pub status: StatusFlags,
    /// Done moving.
    pub dmov: bool,
    /// Moving now.
    pub movn: bool,
    /// High limit switch, user sense.
    pub hls: bool,
    /// Low limit switch, user sense.
    pub lls: bool,
    /// High limit switch, raw/controller sense.
    pub rhls: bool,
    /// Low limit switch, raw/controller sense.
    pub rlls: bool,
    /// Software travel-limit violation.
    pub lvio: bool,
    /// Retries exhausted without reaching the target.
    pub miss: bool,
    /// At home switch.
    pub athm: bool,
    /// Last travel direction was positive.
    pub tdir: bool,
    /// Commanded direction of the move in flight (true = positive).
    pub cdir: bool,
    /// Status-update request state.
    pub stup: UpdateRequest,
    /// Post-motion reconciliation pending.
    pub pp: bool,

    // ── Motion in progress ──
    pub mip: Mip,

    // ── Request fields (edge-consumed) ──
    /// Explicit stop request.
    pub stop: bool,
    /// Jog-forward button.
    pub jogf: bool,
    /// Jog-reverse button.
    pub jogr: bool,
    /// Home-forward button.
    pub homf: bool,
    /// Home-reverse button.
    pub homr: bool,
    /// Tweak forward.
    pub twf: bool,
    /// Tweak reverse.
    pub twr: bool,
    /// Tweak step size [EGU].
    pub twv: f64,
    /// Relative move value [EGU].
    pub rlv: f64,
    /// Previous relative move value.
    pub lrlv: f64,
}

impl Axis {
    /// Build the initial axis state from a validated configuration.
    ///
    /// Positions start at zero; the engine reconciles speeds/resolution
    /// and syncs to the first readback during construction.
    pub fn from_config(cfg: &AxisConfig) -> Self {
        Self {
            name: cfg.name.clone(),
            dir: cfg.dir,
            off: cfg.off,
            foff: cfg.foff,
            set_mode: cfg.set_mode,
            omsl: cfg.omsl,
            spmg: cfg.spmg,
            lspg: cfg.spmg,
            mres: cfg.mres,
            eres: cfg.eres,
            srev: cfg.srev,
            urev: cfg.urev,
            velo: cfg.velo,
            vbas: cfg.vbas,
            vmax: cfg.vmax,
            s: cfg.s,
            sbas: cfg.sbas,
            smax: cfg.smax,
            sbak: cfg.sbak,
            bvel: cfg.bvel,
            accl: cfg.accl,
            bacc: cfg.bacc,
            jvel: cfg.jvel,
            jar: cfg.jar,
            hvel: cfg.hvel,
            bdst: cfg.bdst,
            rdbd: cfg.rdbd,
            rtry: cfg.rtry,
            rcnt: 0,
            frac: cfg.frac,
            dly: cfg.dly,
            ntm: cfg.ntm,
            ueip: cfg.ueip,
            urip: cfg.urip,
            rres: cfg.rres,
            dhlm: cfg.dhlm,
            dllm: cfg.dllm,
            hlm: 0.0,
            llm: 0.0,
            pcof: cfg.pcof,
            icof: cfg.icof,
            dcof: cfg.dcof,
            cnen: cfg.cnen,
            hlsv: cfg.hlsv,
            udf: false,
            val: 0.0,
            dval: 0.0,
            rval: 0,
            lval: 0.0,
            ldvl: 0.0,
            lrvl: 0,
            rbv: 0.0,
            drbv: 0.0,
            rrbv: 0,
            rmp: 0,
            rep: 0,
            diff: 0.0,
            rdif: 0,
            status: StatusFlags::empty(),
            dmov: true,
            movn: false,
            hls: false,
            lls: false,
            rhls: false,
            rlls: false,
            lvio: false,
            miss: false,
            athm: false,
            tdir: false,
            cdir: false,
            stup: UpdateRequest::Off,
            pp: false,
            mip: Mip::new(),
            stop: false,
            jogf: false,
            jogr: false,
            homf: false,
            homr: false,
            twf: false,
            twr: false,
            twv: 0.0,
            rlv: 0.0,
            lrlv: 0.0,
        }
    }

    /// Whether the encoder or an external readback drives positioning,
    /// in which case moves are issued as relative displacements.
    #[inline]
    pub fn use_relative_moves(&self) -> bool {
        (self.status.contains(StatusFlags::ENCODER_PRESENT) && self.ueip) || self.urip
    }

    /// User and dial coordinates share their sense when the direction
    /// setting and the resolution sign agree.
    #[inline]
    pub fn user_matches_raw_sense(&self) -> bool {
        self.dir.is_positive() == (self.mres >= 0.0)
    }

    /// Recompute derived readback from the raw controller feedback.
    ///
    /// `init` suppresses the external readback link (its value may chain
    /// off fields that are not initialized yet on the very first pass).
    pub fn refresh_readback(
        &mut self,
        init: bool,
        readback_link: Option<&mut (dyn ValueLink + '_)>,
        changes: &mut ChangeSet,
    ) {
        let old_drbv = self.drbv;
        let old_rbv = self.rbv;
        let old_rrbv = self.rrbv;
        let old_tdir = self.tdir;
        let old_movn = self.movn;
        let old_hls = self.hls;
        let old_lls = self.lls;
        let old_athm = self.athm;

        // Raw and dial readback, from the encoder when in use.
        if self.status.contains(StatusFlags::ENCODER_PRESENT) && self.ueip {
            self.rrbv = self.rep;
            self.drbv = self.rrbv as f64 * self.eres;
        } else {
            self.rrbv = self.rmp;
            self.drbv = self.rrbv as f64 * self.mres;
        }

        changes.mark(Field::Rmp);
        changes.mark(Field::Rep);
        if self.rrbv != old_rrbv {
            changes.mark(Field::Rrbv);
        }
        if self.drbv != old_drbv {
            changes.mark(Field::Drbv);
        }

        // User readback.
        self.rbv = dial_to_user(self.drbv, self.off, self.dir);
        if self.rbv != old_rbv {
            changes.mark(Field::Rbv);
        }

        // Current or most recent travel direction.
        self.tdir = self.status.contains(StatusFlags::DIRECTION_POSITIVE);
        if self.tdir != old_tdir {
            changes.mark(Field::Tdir);
        }

        // Limit switches: a raw limit only counts when we were commanding
        // motion into it.
        self.rhls = self.status.contains(StatusFlags::PLUS_LS) && self.cdir;
        self.rlls = self.status.contains(StatusFlags::MINUS_LS) && !self.cdir;
        let ls_active = self.rhls || self.rlls;

        let (hls, lls) = if self.user_matches_raw_sense() {
            (self.rhls, self.rlls)
        } else {
            (self.rlls, self.rhls)
        };
        self.hls = hls;
        self.lls = lls;
        if self.hls != old_hls {
            changes.mark(Field::Hls);
            changes.mark(Field::Rhls);
            changes.mark(Field::Rlls);
        }
        if self.lls != old_lls {
            changes.mark(Field::Lls);
            changes.mark(Field::Rhls);
            changes.mark(Field::Rlls);
        }

        // Moving-now indicator.
        self.movn = !(ls_active
            || self.status.contains(StatusFlags::DONE)
            || self.status.contains(StatusFlags::FAULT));
        if self.movn != old_movn {
            changes.mark(Field::Movn);
        }

        // Home switch.
        self.athm = if self.status.contains(StatusFlags::ENCODER_PRESENT) && self.ueip {
            self.status.contains(StatusFlags::ENCODER_HOME)
        } else {
            self.status.contains(StatusFlags::HOME_SWITCH)
        };
        if self.athm != old_athm {
            changes.mark(Field::Athm);
        }

        // External readback device overrides the dial readback. A failed
        // read holds the previous value.
        if self.urip && !init {
            if let Some(link) = readback_link {
                let old_drbv = self.drbv;
                match link.read() {
                    Ok(value) => {
                        self.drbv = value * self.rres;
                        self.rbv = dial_to_user(self.drbv, self.off, self.dir);
                        if self.drbv != old_drbv {
                            changes.mark(Field::Drbv);
                            changes.mark(Field::Rbv);
                        }
                    }
                    Err(err) => {
                        trace!(axis = %self.name, %err, "readback link unreadable; holding");
                    }
                }
            }
        }

        self.diff = self.dval - self.drbv;
        changes.mark(Field::Diff);
        self.rdif = nint(self.diff / self.mres);
        changes.mark(Field::Rdif);
    }

    /// Current value of a published field.
    pub fn field_value(&self, field: Field) -> FieldValue {
        use FieldValue::{Bool, Float, Int};
        match field {
            Field::Val => Float(self.val),
            Field::Dval => Float(self.dval),
            Field::Rval => Int(self.rval),
            Field::Hlm => Float(self.hlm),
            Field::Llm => Float(self.llm),
            Field::Dmov => Bool(self.dmov),
            Field::Spmg => Int(self.spmg as i64),
            Field::Rcnt => Int(self.rcnt as i64),
            Field::Mres => Float(self.mres),
            Field::Eres => Float(self.eres),
            Field::Ueip => Bool(self.ueip),
            Field::Urip => Bool(self.urip),
            Field::Lvio => Bool(self.lvio),
            Field::Rlv => Float(self.rlv),
            Field::Off => Float(self.off),
            Field::Rbv => Float(self.rbv),
            Field::Dhlm => Float(self.dhlm),
            Field::Dllm => Float(self.dllm),
            Field::Drbv => Float(self.drbv),
            Field::Rdbd => Float(self.rdbd),
            Field::Movn => Bool(self.movn),
            Field::Hls => Bool(self.hls),
            Field::Lls => Bool(self.lls),
            Field::Rrbv => Int(self.rrbv),
            Field::Rmp => Int(self.rmp),
            Field::Rep => Int(self.rep),
            Field::Msta => Int(self.status.bits() as i64),
            Field::Athm => Bool(self.athm),
            Field::Tdir => Bool(self.tdir),
            Field::Mip => Int(self.mip.bits() as i64),
            Field::Diff => Float(self.diff),
            Field::Rdif => Int(self.rdif),
            Field::S => Float(self.s),
            Field::Sbas => Float(self.sbas),
            Field::Sbak => Float(self.sbak),
            Field::Srev => Int(self.srev as i64),
            Field::Urev => Float(self.urev),
            Field::Velo => Float(self.velo),
            Field::Vbas => Float(self.vbas),
            Field::Bvel => Float(self.bvel),
            Field::Miss => Bool(self.miss),
            Field::Accl => Float(self.accl),
            Field::Bacc => Float(self.bacc),
            Field::Stup => Int(self.stup as i64),
            Field::Vmax => Float(self.vmax),
            Field::Smax => Float(self.smax),
            Field::Homf => Bool(self.homf),
            Field::Homr => Bool(self.homr),
            Field::Jogf => Bool(self.jogf),
            Field::Jogr => Bool(self.jogr),
            Field::Jvel => Float(self.jvel),
            Field::Jar => Float(self.jar),
            Field::Hvel => Float(self.hvel),
            Field::Frac => Float(self.frac),
            Field::Bdst => Float(self.bdst),
            Field::Cnen => Bool(self.cnen),
            Field::Pcof => Float(self.pcof),
            Field::Icof => Float(self.icof),
            Field::Dcof => Float(self.dcof),
            Field::Rhls => Bool(self.rhls),
            Field::Rlls => Bool(self.rlls),
            Field::Set => Int(self.set_mode as i64),
            Field::Foff => Int(self.foff as i64),
            Field::Dir => Int(self.dir as i64),
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn axis_with(mres: f64) -> Axis {
        let mut cfg = AxisConfig::default();
        cfg.mres = mres;
        let mut axis = Axis::from_config(&cfg);
        axis.mres = mres;
        axis
    }

    #[test]
    fn initial_state_is_idle() {
        let axis = Axis::from_config(&AxisConfig::default());
        assert!(axis.dmov);
        assert!(!axis.movn);
        assert!(axis.mip.is_done());
        assert_eq!(axis.rcnt, 0);
    }

    #[test]
    fn readback_from_motor_steps() {
        let mut axis = axis_with(0.001);
        axis.rmp = 1500;
        let mut changes = ChangeSet::new();
        axis.status = StatusFlags::DONE;
        axis.refresh_readback(true, None, &mut changes);
        assert_eq!(axis.rrbv, 1500);
        assert!((axis.drbv - 1.5).abs() < 1e-12);
        assert!((axis.rbv - 1.5).abs() < 1e-12);
        assert!(changes.contains(Field::Drbv));
    }

    #[test]
    fn readback_prefers_encoder_when_in_use() {
        let mut axis = axis_with(0.001);
        axis.eres = 0.0005;
        axis.ueip = true;
        axis.rmp = 1000;
        axis.rep = 4000;
        axis.status = StatusFlags::DONE | StatusFlags::ENCODER_PRESENT;
        let mut changes = ChangeSet::new();
        axis.refresh_readback(true, None, &mut changes);
        assert_eq!(axis.rrbv, 4000);
        assert!((axis.drbv - 2.0).abs() < 1e-12);
    }

    #[test]
    fn limit_switch_requires_commanded_direction() {
        let mut axis = axis_with(0.001);
        axis.status = StatusFlags::DONE | StatusFlags::PLUS_LS;
        axis.cdir = false; // commanded reverse: plus limit is stale
        let mut changes = ChangeSet::new();
        axis.refresh_readback(true, None, &mut changes);
        assert!(!axis.rhls);

        axis.cdir = true;
        axis.refresh_readback(true, None, &mut changes);
        assert!(axis.rhls);
        assert!(axis.hls);
        assert!(!axis.movn);
    }

    #[test]
    fn negative_resolution_swaps_user_limit_sense() {
        let mut axis = axis_with(-0.001);
        axis.status = StatusFlags::PLUS_LS;
        axis.cdir = true;
        let mut changes = ChangeSet::new();
        axis.refresh_readback(true, None, &mut changes);
        // dir positive + mres negative: raw high limit reads as user low.
        assert!(axis.rhls);
        assert!(axis.lls);
        assert!(!axis.hls);
    }

    #[test]
    fn diff_tracks_target_distance() {
        let mut axis = axis_with(0.001);
        axis.dval = 2.0;
        axis.rmp = 500;
        axis.status = StatusFlags::DONE;
        let mut changes = ChangeSet::new();
        axis.refresh_readback(true, None, &mut changes);
        assert!((axis.diff - 1.5).abs() < 1e-12);
        assert_eq!(axis.rdif, 1500);
    }

    #[test]
    fn moving_while_no_done_flag() {
        let mut axis = axis_with(0.001);
        axis.status = StatusFlags::empty();
        let mut changes = ChangeSet::new();
        axis.refresh_readback(true, None, &mut changes);
        assert!(axis.movn);
    }
}
