//! Per-field post-write hooks and startup reconciliation.
//!
//! The host writes a field on the axis record, then calls
//! [`Engine::field_written`] with that field before the next `process()`.
//! Hooks keep paired representations in sync (EGU/s velocities against
//! rev/s speeds, resolution against units-per-revolution), clamp values
//! into range, push limit and gain changes to the controller (adopting
//! its verdict on rejection), and queue jog requests.

use axis_common::command::{Command, Transaction};
use axis_common::config::{FRAC_MAX, FRAC_MIN};
use axis_common::fields::Field;
use axis_common::types::{Direction, FreezeOffset, StatusFlags, UpdateRequest};
use tracing::trace;

use crate::engine::Engine;
use crate::limits::{enforce_min_retry_deadband, range_check};
use crate::mip::Activity;
use crate::transform::dial_to_user;

impl Engine {
    /// Run the post-write hook for `field`.
    ///
    /// Marks accumulate in the engine's change set and flush on the next
    /// `process()` call, which the host issues after any write that can
    /// affect motion.
    pub fn field_written(&mut self, field: Field) {
        trace!(axis = %self.axis.name, ?field, "field written");
        let dir = self.axis.dir;
        let fabs_urev = self.axis.urev.abs();

        match field {
            // ── Velocity pairs: EGU/s ↔ rev/s through |urev| ──
            Field::Vbas => {
                if self.axis.vbas < 0.0 {
                    self.axis.vbas = 0.0;
                    self.changes.mark(Field::Vbas);
                }
                if self.axis.urev != 0.0 {
                    let sbas = self.axis.vbas / fabs_urev;
                    if self.axis.sbas != sbas {
                        self.axis.sbas = sbas;
                        self.changes.mark(Field::Sbas);
                    }
                }
            }
            Field::Sbas => {
                if self.axis.sbas < 0.0 {
                    self.axis.sbas = 0.0;
                    self.changes.mark(Field::Sbas);
                }
                let vbas = fabs_urev * self.axis.sbas;
                if self.axis.vbas != vbas {
                    self.axis.vbas = vbas;
                    self.changes.mark(Field::Vbas);
                }
            }
            Field::Vmax => {
                if self.axis.vmax < 0.0 {
                    self.axis.vmax = 0.0;
                    self.changes.mark(Field::Vmax);
                }
                if self.axis.urev != 0.0 {
                    let smax = self.axis.vmax / fabs_urev;
                    if self.axis.smax != smax {
                        self.axis.smax = smax;
                        self.changes.mark(Field::Smax);
                    }
                }
            }
            Field::Smax => {
                if self.axis.smax < 0.0 {
                    self.axis.smax = 0.0;
                    self.changes.mark(Field::Smax);
                }
                let vmax = fabs_urev * self.axis.smax;
                if self.axis.vmax != vmax {
                    self.axis.vmax = vmax;
                    self.changes.mark(Field::Vmax);
                }
            }
            Field::Velo => {
                if range_check(&mut self.axis.velo, self.axis.vbas, self.axis.vmax) {
                    self.changes.mark(Field::Velo);
                }
                if self.axis.urev != 0.0 {
                    let s = self.axis.velo / fabs_urev;
                    if self.axis.s != s {
                        self.axis.s = s;
                        self.changes.mark(Field::S);
                    }
                }
            }
            Field::S => {
                if range_check(&mut self.axis.s, self.axis.sbas, self.axis.smax) {
                    self.changes.mark(Field::S);
                }
                let velo = fabs_urev * self.axis.s;
                if self.axis.velo != velo {
                    self.axis.velo = velo;
                    self.changes.mark(Field::Velo);
                }
            }
            Field::Bvel => {
                if range_check(&mut self.axis.bvel, self.axis.vbas, self.axis.vmax) {
                    self.changes.mark(Field::Bvel);
                }
                if self.axis.urev != 0.0 {
                    let sbak = self.axis.bvel / fabs_urev;
                    if self.axis.sbak != sbak {
                        self.axis.sbak = sbak;
                        self.changes.mark(Field::Sbak);
                    }
                }
            }
            Field::Sbak => {
                if range_check(&mut self.axis.sbak, self.axis.sbas, self.axis.smax) {
                    self.changes.mark(Field::Sbak);
                }
                let bvel = fabs_urev * self.axis.sbak;
                if self.axis.bvel != bvel {
                    self.axis.bvel = bvel;
                    self.changes.mark(Field::Bvel);
                }
            }

            // ── Acceleration sanity ──
            Field::Accl => {
                if self.axis.accl <= 0.0 {
                    self.axis.accl = 0.1;
                    self.changes.mark(Field::Accl);
                }
            }
            Field::Bacc => {
                if self.axis.bacc <= 0.0 {
                    self.axis.bacc = 0.1;
                    self.changes.mark(Field::Bacc);
                }
            }

            // ── Deadband and backlash keep the deadband achievable ──
            Field::Rdbd | Field::Bdst => {
                if enforce_min_retry_deadband(&mut self.axis.rdbd, self.axis.mres) {
                    self.changes.mark(Field::Rdbd);
                }
            }

            // ── Coordinate redefinition ──
            Field::Dir => {
                if self.axis.foff == FreezeOffset::Frozen {
                    self.axis.val = dial_to_user(self.axis.dval, self.axis.off, dir);
                    self.changes.mark(Field::Val);
                } else {
                    self.axis.off = self.axis.val - self.axis.dval * dir.sign();
                    self.changes.mark(Field::Off);
                }
                self.axis.rbv = dial_to_user(self.axis.drbv, self.axis.off, dir);
                self.changes.mark(Field::Rbv);
                self.set_user_limits();
            }
            Field::Off => {
                self.axis.val = dial_to_user(self.axis.dval, self.axis.off, dir);
                self.axis.lval = dial_to_user(self.axis.ldvl, self.axis.off, dir);
                self.axis.rbv = dial_to_user(self.axis.drbv, self.axis.off, dir);
                self.changes.mark(Field::Val);
                self.changes.mark(Field::Rbv);
                self.set_user_limits();
            }

            // ── Travel limits ──
            Field::Hlm => self.user_limit_written(true),
            Field::Llm => self.user_limit_written(false),
            Field::Dhlm => self.push_dial_high_limit(),
            Field::Dllm => self.push_dial_low_limit(),

            // ── Move fraction ──
            Field::Frac => {
                let mut changed = false;
                if self.axis.frac < FRAC_MIN {
                    self.axis.frac = FRAC_MIN;
                    changed = true;
                }
                if self.axis.frac > FRAC_MAX {
                    self.axis.frac = FRAC_MAX;
                    changed = true;
                }
                if changed {
                    self.changes.mark(Field::Frac);
                }
            }

            // ── Resolution trio: mres ↔ urev ↔ srev ──
            // Changing mres or urev keeps the rev/s speeds constant and
            // recomputes the EGU/s velocities from them.
            Field::Mres => {
                // Stays marked so the sequencer pushes the new ratio.
                self.changes.mark(Field::Mres);
                let urev = self.axis.mres * self.axis.srev as f64;
                if self.axis.urev != urev {
                    self.axis.urev = urev;
                    self.changes.mark(Field::Urev);
                }
                self.resync_velocities_from_speeds();
            }
            Field::Urev => {
                let mres = self.axis.urev / self.axis.srev as f64;
                if self.axis.mres != mres {
                    self.axis.mres = mres;
                    self.changes.mark(Field::Mres);
                }
                self.resync_velocities_from_speeds();
            }
            Field::Srev => {
                if self.axis.srev <= 0 {
                    self.axis.srev = 200;
                    self.changes.mark(Field::Srev);
                }
                let mres = self.axis.urev / self.axis.srev as f64;
                if self.axis.mres != mres {
                    self.axis.mres = mres;
                    self.changes.mark(Field::Mres);
                }
            }
            Field::Eres => {
                if self.axis.eres == 0.0 {
                    self.axis.eres = self.axis.mres;
                }
                self.changes.mark(Field::Eres);
            }
            Field::Ueip => {
                // Speeds should ideally be recalculated here, but whether
                // the hardware has an encoder is unknown until the
                // sequencer asks.
                self.changes.mark(Field::Ueip);
            }
            Field::Urip => {}

            // ── Servo gains and torque ──
            Field::Pcof | Field::Icof | Field::Dcof => self.gain_written(field),
            Field::Cnen => {
                if self.axis.status.contains(StatusFlags::GAIN_SUPPORT) {
                    self.send_one(if self.axis.cnen {
                        Command::EnableTorque
                    } else {
                        Command::DisableTorque
                    });
                }
            }

            // ── Home buttons are immutable while a home runs ──
            Field::Homf => {
                if self.axis.mip.is_homing() {
                    self.axis.homf = self.axis.mip.activity() == Activity::HomeForward;
                }
            }
            Field::Homr => {
                if self.axis.mip.is_homing() {
                    self.axis.homr = self.axis.mip.activity() == Activity::HomeReverse;
                }
            }

            // ── Jog buttons queue or cancel the jog request ──
            Field::Jogf => {
                if !self.axis.jogf {
                    self.axis.mip.clear_jog_request();
                } else if self.axis.mip.is_done() && !self.axis.hls {
                    self.axis.mip.request_jog();
                }
            }
            Field::Jogr => {
                if !self.axis.jogr {
                    self.axis.mip.clear_jog_request();
                } else if self.axis.mip.is_done() && !self.axis.lls {
                    self.axis.mip.request_jog();
                }
            }

            // ── Jog parameters ──
            Field::Jvel => {
                if range_check(&mut self.axis.jvel, self.axis.vbas, self.axis.vmax) {
                    self.changes.mark(Field::Jvel);
                }
                // Retune a jog already in flight.
                if matches!(
                    self.axis.mip.activity(),
                    Activity::JogForward | Activity::JogReverse
                ) {
                    let mut jogv = (self.axis.jvel * dir.sign()) / self.axis.mres;
                    let jacc = self.axis.jar / self.axis.mres.abs();
                    if self.axis.mip.activity() == Activity::JogReverse {
                        jogv = -jogv;
                    }
                    let mut txn = Transaction::begin();
                    txn.push(Command::SetAccel(jacc));
                    txn.push(Command::JogVelocity(jogv));
                    self.send(txn);
                }
            }
            Field::Jar => {
                if self.axis.jar <= 0.0 {
                    self.axis.jar = self.axis.jvel / 0.1;
                    self.changes.mark(Field::Jar);
                }
            }
            Field::Hvel => {
                if range_check(&mut self.axis.hvel, self.axis.vbas, self.axis.vmax) {
                    self.changes.mark(Field::Hvel);
                }
            }

            // ── Status-update request validation ──
            Field::Stup => {
                if self.axis.stup != UpdateRequest::On {
                    self.axis.stup = UpdateRequest::Off;
                    self.changes.mark(Field::Stup);
                }
            }

            // ── Drive-field writes blink done-moving ──
            Field::Val | Field::Dval | Field::Rval | Field::Rlv => {
                if self.axis.dmov {
                    self.axis.dmov = false;
                    self.changes.mark(Field::Dmov);
                }
            }

            _ => {}
        }

        // Cross-check the velocity family after any bound moved.
        match field {
            Field::Vmax | Field::Smax => {
                if self.axis.vmax != 0.0 && self.axis.vmax < self.axis.vbas {
                    self.axis.vbas = self.axis.vmax;
                    self.changes.mark(Field::Vbas);
                    self.axis.sbas = self.axis.smax;
                    self.changes.mark(Field::Sbas);
                }
                self.recheck_velocities();
            }
            Field::Vbas | Field::Sbas => {
                if self.axis.vmax != 0.0 && self.axis.vbas > self.axis.vmax {
                    self.axis.vmax = self.axis.vbas;
                    self.changes.mark(Field::Vmax);
                    self.axis.smax = self.axis.sbas;
                    self.changes.mark(Field::Smax);
                }
                self.recheck_velocities();
            }
            _ => {}
        }
    }

    /// Re-range-check every velocity against the (possibly moved) base
    /// and maximum, keeping the rev/s twins in step.
    fn recheck_velocities(&mut self) {
        let fabs_urev = self.axis.urev.abs();

        if range_check(&mut self.axis.velo, self.axis.vbas, self.axis.vmax) {
            self.changes.mark(Field::Velo);
        }
        if self.axis.urev != 0.0 {
            let s = self.axis.velo / fabs_urev;
            if self.axis.s != s {
                self.axis.s = s;
                self.changes.mark(Field::S);
            }
        }

        if range_check(&mut self.axis.bvel, self.axis.vbas, self.axis.vmax) {
            self.changes.mark(Field::Bvel);
        }
        if self.axis.urev != 0.0 {
            let sbak = self.axis.bvel / fabs_urev;
            if self.axis.sbak != sbak {
                self.axis.sbak = sbak;
                self.changes.mark(Field::Sbak);
            }
        }

        if range_check(&mut self.axis.jvel, self.axis.vbas, self.axis.vmax) {
            self.changes.mark(Field::Jvel);
        }
        if range_check(&mut self.axis.hvel, self.axis.vbas, self.axis.vmax) {
            self.changes.mark(Field::Hvel);
        }
    }

    /// Recompute EGU/s velocities from the rev/s speeds after a
    /// resolution change (the rev/s values stay constant).
    fn resync_velocities_from_speeds(&mut self) {
        let fabs_urev = self.axis.urev.abs();

        let velo = fabs_urev * self.axis.s;
        if self.axis.velo != velo {
            self.axis.velo = velo;
            self.changes.mark(Field::Velo);
        }
        let vbas = fabs_urev * self.axis.sbas;
        if self.axis.vbas != vbas {
            self.axis.vbas = vbas;
            self.changes.mark(Field::Vbas);
        }
        let bvel = fabs_urev * self.axis.sbak;
        if self.axis.bvel != bvel {
            self.axis.bvel = bvel;
            self.changes.mark(Field::Bvel);
        }
        let vmax = fabs_urev * self.axis.smax;
        if self.axis.vmax != vmax {
            self.axis.vmax = vmax;
            self.changes.mark(Field::Vmax);
        }
    }

    /// A user-space travel limit was written: translate to dial, push to
    /// the controller, and adopt the controller's value on rejection.
    fn user_limit_written(&mut self, high: bool) {
        let offset = self.axis.off;
        let user = if high { self.axis.hlm } else { self.axis.llm };

        // With a negative direction sense the user high limit maps onto
        // the dial low limit, and vice versa.
        let sets_dial_high = high == self.axis.dir.is_positive();
        let dial = if self.axis.dir.is_positive() {
            user - offset
        } else {
            -user + offset
        };
        let raw = dial / self.axis.mres;
        let cmd = if sets_dial_high {
            Command::SetHighLimit(raw)
        } else {
            Command::SetLowLimit(raw)
        };

        match self.try_send(cmd) {
            Ok(()) => {
                if sets_dial_high {
                    self.axis.dhlm = dial;
                    self.changes.mark(Field::Dhlm);
                } else {
                    self.axis.dllm = dial;
                    self.changes.mark(Field::Dllm);
                }
            }
            Err(rejected) => {
                // The controller kept its own limit; translate it back.
                let dial = rejected.fallback * self.axis.mres;
                if sets_dial_high {
                    self.axis.dhlm = dial;
                    self.changes.mark(Field::Dhlm);
                } else {
                    self.axis.dllm = dial;
                    self.changes.mark(Field::Dllm);
                }
                let user = match (high, self.axis.dir) {
                    (true, Direction::Positive) => self.axis.dhlm + offset,
                    (true, Direction::Negative) => -self.axis.dllm + offset,
                    (false, Direction::Positive) => self.axis.dllm + offset,
                    (false, Direction::Negative) => -self.axis.dhlm + offset,
                };
                if high {
                    self.axis.hlm = user;
                } else {
                    self.axis.llm = user;
                }
            }
        }
        self.changes
            .mark(if high { Field::Hlm } else { Field::Llm });
    }

    /// Push the dial high limit to the controller and retranslate the
    /// user limit. The controller may veto with its own value.
    pub(crate) fn push_dial_high_limit(&mut self) {
        let raw = self.axis.dhlm / self.axis.mres;
        if let Err(rejected) = self.try_send(Command::SetHighLimit(raw)) {
            self.axis.dhlm = rejected.fallback * self.axis.mres;
        }
        let offset = self.axis.off;
        if self.axis.dir.is_positive() {
            self.axis.hlm = self.axis.dhlm + offset;
            self.changes.mark(Field::Hlm);
        } else {
            self.axis.llm = -self.axis.dhlm + offset;
            self.changes.mark(Field::Llm);
        }
        self.changes.mark(Field::Dhlm);
    }

    /// Push the dial low limit to the controller and retranslate the
    /// user limit.
    pub(crate) fn push_dial_low_limit(&mut self) {
        let raw = self.axis.dllm / self.axis.mres;
        if let Err(rejected) = self.try_send(Command::SetLowLimit(raw)) {
            self.axis.dllm = rejected.fallback * self.axis.mres;
        }
        let offset = self.axis.off;
        if self.axis.dir.is_positive() {
            self.axis.llm = self.axis.dllm + offset;
            self.changes.mark(Field::Llm);
        } else {
            self.axis.hlm = -self.axis.dllm + offset;
            self.changes.mark(Field::Hlm);
        }
        self.changes.mark(Field::Dllm);
    }

    /// Translate dial limits to user limits.
    pub(crate) fn set_user_limits(&mut self) {
        if self.axis.dir.is_positive() {
            self.axis.hlm = self.axis.dhlm + self.axis.off;
            self.axis.llm = self.axis.dllm + self.axis.off;
        } else {
            self.axis.hlm = -self.axis.dllm + self.axis.off;
            self.axis.llm = -self.axis.dhlm + self.axis.off;
        }
        self.changes.mark(Field::Hlm);
        self.changes.mark(Field::Llm);
    }

    /// A servo gain was written: clamp to [0, 1] and push when the
    /// controller supports gains, adopting its value on rejection.
    fn gain_written(&mut self, field: Field) {
        if !self.axis.status.contains(StatusFlags::GAIN_SUPPORT) {
            return;
        }

        let mut value = match field {
            Field::Pcof => self.axis.pcof,
            Field::Icof => self.axis.icof,
            _ => self.axis.dcof,
        };
        let mut changed = false;
        if value < 0.0 {
            value = 0.0;
            changed = true;
        } else if value > 1.0 {
            value = 1.0;
            changed = true;
        }

        let cmd = match field {
            Field::Pcof => Command::SetPGain(value),
            Field::Icof => Command::SetIGain(value),
            _ => Command::SetDGain(value),
        };
        if let Err(rejected) = self.try_send(cmd) {
            value = rejected.fallback;
            changed = true;
        }

        match field {
            Field::Pcof => self.axis.pcof = value,
            Field::Icof => self.axis.icof = value,
            _ => self.axis.dcof = value,
        }
        if changed {
            self.changes.mark(field);
        }
    }

    /// Reconcile the two ways of specifying speed and resolution; make
    /// sure everything is sane. Runs once at construction.
    pub(crate) fn reconcile_speeds(&mut self) {
        // Steps per revolution must be sane.
        if self.axis.srev <= 0 {
            self.axis.srev = 200;
            self.changes.mark(Field::Srev);
        }

        // urev ↔ mres.
        if self.axis.urev != 0.0 {
            self.axis.mres = self.axis.urev / self.axis.srev as f64;
            self.changes.mark(Field::Mres);
        }
        if self.axis.mres == 0.0 {
            self.axis.mres = 1.0;
            self.changes.mark(Field::Mres);
        }
        if self.axis.urev != self.axis.mres * self.axis.srev as f64 {
            self.axis.urev = self.axis.mres * self.axis.srev as f64;
            self.changes.mark(Field::Urev);
        }
        let fabs_urev = self.axis.urev.abs();

        // smax ↔ vmax.
        if self.axis.smax > 0.0 {
            self.axis.vmax = self.axis.smax * fabs_urev;
        } else if self.axis.vmax > 0.0 {
            self.axis.smax = self.axis.vmax / fabs_urev;
        } else {
            self.axis.smax = 0.0;
            self.axis.vmax = 0.0;
        }
        self.changes.mark(Field::Vmax);
        self.changes.mark(Field::Smax);

        // sbas ↔ vbas.
        if self.axis.sbas != 0.0 {
            range_check(&mut self.axis.sbas, 0.0, self.axis.smax);
            self.axis.vbas = self.axis.sbas * fabs_urev;
        } else {
            range_check(&mut self.axis.vbas, 0.0, self.axis.vmax);
            self.axis.sbas = self.axis.vbas / fabs_urev;
        }
        self.changes.mark(Field::Vbas);
        self.changes.mark(Field::Sbas);

        // s ↔ velo.
        if self.axis.s != 0.0 {
            range_check(&mut self.axis.s, self.axis.sbas, self.axis.smax);
            self.axis.velo = self.axis.s * fabs_urev;
        } else {
            range_check(&mut self.axis.velo, self.axis.vbas, self.axis.vmax);
            self.axis.s = self.axis.velo / fabs_urev;
        }
        self.changes.mark(Field::Velo);
        self.changes.mark(Field::S);

        // sbak ↔ bvel.
        if self.axis.sbak != 0.0 {
            range_check(&mut self.axis.sbak, self.axis.sbas, self.axis.smax);
            self.axis.bvel = self.axis.sbak * fabs_urev;
        } else {
            range_check(&mut self.axis.bvel, self.axis.vbas, self.axis.vmax);
            self.axis.sbak = self.axis.bvel / fabs_urev;
        }
        self.changes.mark(Field::Sbak);
        self.changes.mark(Field::Bvel);

        // Acceleration-time sanity.
        if self.axis.accl == 0.0 {
            self.axis.accl = 0.1;
            self.changes.mark(Field::Accl);
        }
        if self.axis.bacc == 0.0 {
            self.axis.bacc = 0.1;
            self.changes.mark(Field::Bacc);
        }

        // Jog velocity/acceleration and home velocity defaults.
        if self.axis.jvel == 0.0 {
            self.axis.jvel = self.axis.velo;
        } else {
            range_check(&mut self.axis.jvel, self.axis.vbas, self.axis.vmax);
        }
        if self.axis.jar == 0.0 {
            self.axis.jar = self.axis.velo / self.axis.accl;
        }
        if self.axis.hvel == 0.0 {
            self.axis.hvel = self.axis.vbas;
        } else {
            range_check(&mut self.axis.hvel, self.axis.vbas, self.axis.vmax);
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{new_engine, new_engine_with_sim};
    use axis_sim::SimConfig;

    #[test]
    fn startup_reconciles_speed_and_resolution() {
        // urev drives mres; zero speeds fill in from velocities.
        let (engine, _sim, _pub, _timer) = new_engine(|cfg| {
            cfg.urev = 2.0;
            cfg.srev = 400;
            cfg.velo = 4.0;
        });
        assert_eq!(engine.axis().mres, 2.0 / 400.0);
        assert_eq!(engine.axis().s, 2.0); // 4.0 EGU/s over 2.0 EGU/rev
        assert!(engine.axis().accl > 0.0);
        assert_eq!(engine.axis().jvel, 4.0, "jvel inherits velo");
    }

    #[test]
    fn startup_defaults_zero_resolution_to_unity() {
        let (engine, _sim, _pub, _timer) = new_engine(|_cfg| {});
        assert_eq!(engine.axis().mres, 1.0);
        assert_eq!(engine.axis().urev, 200.0);
    }

    #[test]
    fn vbas_write_syncs_rev_speed() {
        let (mut engine, _sim, _pub, _timer) = new_engine(|cfg| {
            cfg.mres = 0.01;
            cfg.srev = 200; // urev = 2.0
        });
        engine.axis_mut().vbas = 0.5;
        engine.field_written(Field::Vbas);
        assert_eq!(engine.axis().sbas, 0.25);

        // Negative values clamp to zero.
        engine.axis_mut().vbas = -1.0;
        engine.field_written(Field::Vbas);
        assert_eq!(engine.axis().vbas, 0.0);
        assert_eq!(engine.axis().sbas, 0.0);
    }

    #[test]
    fn raising_vbas_above_vmax_drags_vmax_up() {
        let (mut engine, _sim, _pub, _timer) = new_engine(|cfg| {
            cfg.mres = 0.01;
            cfg.vmax = 5.0;
            cfg.velo = 2.0;
        });
        engine.axis_mut().vbas = 8.0;
        engine.field_written(Field::Vbas);
        assert_eq!(engine.axis().vmax, 8.0);
        // velo was dragged up to the new base.
        assert_eq!(engine.axis().velo, 8.0);
    }

    #[test]
    fn mres_write_keeps_rev_speeds_constant() {
        let (mut engine, _sim, _pub, _timer) = new_engine(|cfg| {
            cfg.mres = 0.01;
            cfg.srev = 200;
            cfg.velo = 2.0; // s = 1.0 rev/s at urev = 2.0
        });
        assert_eq!(engine.axis().s, 1.0);

        engine.axis_mut().mres = 0.02;
        engine.field_written(Field::Mres);
        // urev followed mres; velo recomputed from the constant s.
        assert_eq!(engine.axis().urev, 4.0);
        assert_eq!(engine.axis().s, 1.0);
        assert_eq!(engine.axis().velo, 4.0);
    }

    #[test]
    fn frac_write_clamps_into_range() {
        let (mut engine, _sim, _pub, _timer) = new_engine(|cfg| cfg.mres = 0.001);
        engine.axis_mut().frac = 0.01;
        engine.field_written(Field::Frac);
        assert_eq!(engine.axis().frac, FRAC_MIN);

        engine.axis_mut().frac = 9.0;
        engine.field_written(Field::Frac);
        assert_eq!(engine.axis().frac, FRAC_MAX);
    }

    #[test]
    fn bdst_write_keeps_deadband_achievable() {
        let (mut engine, _sim, _pub, _timer) = new_engine(|cfg| {
            cfg.mres = 0.01;
            cfg.rdbd = 0.001;
        });
        // Construction already floored rdbd at |mres|.
        assert_eq!(engine.axis().rdbd, 0.01);
        engine.axis_mut().rdbd = 0.0001;
        engine.field_written(Field::Rdbd);
        assert_eq!(engine.axis().rdbd, 0.01);
    }

    #[test]
    fn jog_button_queues_and_cancels_request() {
        let (mut engine, _sim, _pub, _timer) = new_engine(|cfg| cfg.mres = 0.001);
        engine.axis_mut().jogf = true;
        engine.field_written(Field::Jogf);
        assert!(engine.axis().mip.jog_requested());

        engine.axis_mut().jogf = false;
        engine.field_written(Field::Jogf);
        assert!(!engine.axis().mip.jog_requested());
    }

    #[test]
    fn jog_button_ignored_against_its_limit() {
        let (mut engine, _sim, _pub, _timer) = new_engine(|cfg| cfg.mres = 0.001);
        engine.axis_mut().hls = true;
        engine.axis_mut().jogf = true;
        engine.field_written(Field::Jogf);
        assert!(!engine.axis().mip.jog_requested());
    }

    #[test]
    fn gain_write_clamps_when_supported() {
        let (mut engine, _sim, _pub, _timer) = new_engine_with_sim(
            SimConfig {
                gain_support: true,
                ..SimConfig::default()
            },
            |cfg| cfg.mres = 0.001,
        );
        engine.axis_mut().pcof = 1.5;
        engine.field_written(Field::Pcof);
        assert_eq!(engine.axis().pcof, 1.0);

        engine.axis_mut().icof = -0.5;
        engine.field_written(Field::Icof);
        assert_eq!(engine.axis().icof, 0.0);
    }

    #[test]
    fn gain_write_untouched_without_support() {
        let (mut engine, _sim, _pub, _timer) = new_engine(|cfg| cfg.mres = 0.001);
        engine.axis_mut().pcof = 1.5;
        engine.field_written(Field::Pcof);
        // No gain support: the hook leaves the value alone.
        assert_eq!(engine.axis().pcof, 1.5);
    }

    #[test]
    fn offset_write_shifts_user_coordinates() {
        let (mut engine, _sim, _pub, _timer) = new_engine(|cfg| {
            cfg.mres = 0.001;
            cfg.dhlm = 10.0;
            cfg.dllm = -10.0;
        });
        engine.axis_mut().off = 2.5;
        engine.field_written(Field::Off);
        assert_eq!(engine.axis().val, 2.5);
        assert_eq!(engine.axis().rbv, 2.5);
        assert_eq!(engine.axis().hlm, 12.5);
        assert_eq!(engine.axis().llm, -7.5);
    }

    #[test]
    fn user_limit_write_translates_to_dial_and_pushes() {
        let (mut engine, sim, _pub, _timer) = new_engine(|cfg| {
            cfg.mres = 0.001;
            cfg.off = 1.0;
        });
        sim.clear_transactions();
        engine.axis_mut().hlm = 6.0;
        engine.field_written(Field::Hlm);
        assert_eq!(engine.axis().dhlm, 5.0);
        assert!(
            sim.commands()
                .iter()
                .any(|c| matches!(c, Command::SetHighLimit(raw) if *raw == 5000.0))
        );
    }

    #[test]
    fn home_buttons_frozen_while_homing() {
        let (mut engine, _sim, _pub, _timer) = new_engine(|cfg| cfg.mres = 0.001);
        engine.axis_mut().homr = true;
        engine.axis_mut().mip.restart(Activity::HomeReverse);

        // The opposite button cannot be raised mid-home.
        engine.axis_mut().homf = true;
        engine.field_written(Field::Homf);
        assert!(!engine.axis().homf);

        // Nor can the active one be cleared; a stop cancels a home.
        engine.axis_mut().homr = false;
        engine.field_written(Field::Homr);
        assert!(engine.axis().homr);
    }

    #[test]
    fn stup_write_rejected_unless_requesting() {
        let (mut engine, _sim, _pub, _timer) = new_engine(|cfg| cfg.mres = 0.001);
        engine.axis_mut().stup = UpdateRequest::Busy;
        engine.field_written(Field::Stup);
        assert_eq!(engine.axis().stup, UpdateRequest::Off);

        engine.axis_mut().stup = UpdateRequest::On;
        engine.field_written(Field::Stup);
        assert_eq!(engine.axis().stup, UpdateRequest::On);
    }
}
