//! The command sequencer: examines current versus desired state and
//! emits motor command transactions, or defers to a later callback.
//!
//! Runs in strict precedence order: stop/pause edges first, then
//! resolution reconciliation, closed-loop input, home and jog requests,
//! tweak folding, user→dial propagation, the travel-limit gate, and
//! finally the (possibly backlash-corrected) move dispatch. Each handled
//! concern returns; at most one concern acts per pass.

use axis_common::command::{Command, Transaction};
use axis_common::error::EngineError;
use axis_common::fields::Field;
use axis_common::types::{
    CalibMode, Direction, FreezeOffset, OperatingMode, Spmg, StatusFlags, UpdateRequest,
};
use tracing::{debug, trace};

use crate::engine::Engine;
use crate::limits::{enforce_min_retry_deadband, target_violation};
use crate::mip::Activity;
use crate::transform::{dial_to_user, nint, sanitize_resolution, user_to_dial};

impl Engine {
    /// One sequencer pass.
    pub(crate) fn sequence(&mut self) -> Result<(), EngineError> {
        let dir = self.axis.dir;
        let set_mode = self.axis.set_mode;
        let stop_or_pause = self.axis.spmg.inhibits_motion();
        let old_lvio = self.axis.lvio;

        trace!(axis = %self.axis.name, "sequencer begin");

        // ── Stop / Pause / Move / Go edges and explicit stops ──
        if self.axis.spmg != self.axis.lspg || self.axis.stop {
            let stop = self.axis.stop;
            if self.axis.spmg != self.axis.lspg {
                self.axis.lspg = self.axis.spmg;
            } else {
                self.axis.stop = false;
            }

            if stop_or_pause || stop {
                if self.axis.spmg == Spmg::Stop || stop {
                    if self.axis.mip.is_done()
                        || self.axis.mip.is_bare_stop()
                        || self.axis.mip.is_exactly(Activity::Retry)
                    {
                        if self.axis.mip.is_exactly(Activity::Retry) {
                            self.axis.mip.conclude();
                            self.changes.mark(Field::Mip);
                            self.axis.dmov = true;
                            self.changes.mark(Field::Dmov);
                        }
                        // Shouldn't be moving; send the stop anyway but
                        // stay out of the stop state.
                        self.send_one(Command::StopAxis);
                        return Ok(());
                    } else if self.axis.movn {
                        // Snap to readback once the motor confirms.
                        self.axis.pp = true;
                        self.axis.jogf = false;
                        self.axis.jogr = false;
                    } else {
                        self.axis.val = self.axis.rbv;
                        self.axis.lval = self.axis.rbv;
                        self.changes.mark(Field::Val);
                        self.axis.dval = self.axis.drbv;
                        self.axis.ldvl = self.axis.drbv;
                        self.changes.mark(Field::Dval);
                        self.axis.rval = nint(self.axis.dval / self.axis.mres);
                        self.axis.lrvl = self.axis.rval;
                        self.changes.mark(Field::Rval);
                    }
                }
                // A stop cancels any home request in flight.
                if self.axis.mip.activity() == Activity::HomeForward {
                    self.axis.homf = false;
                    self.changes.mark(Field::Homf);
                } else if self.axis.mip.activity() == Activity::HomeReverse {
                    self.axis.homr = false;
                    self.changes.mark(Field::Homr);
                }
                self.axis.mip.set_stopping();
                self.changes.mark(Field::Mip);
                self.send_one(Command::StopAxis);
                return Ok(());
            } else if self.axis.spmg == Spmg::Go {
                // A jog button held through the stop is a queued request.
                if (self.axis.jogf && !self.axis.hls) || (self.axis.jogr && !self.axis.lls) {
                    self.axis.mip.conclude();
                    self.axis.mip.request_jog();
                    self.changes.mark(Field::Mip);
                } else if self.axis.mip.is_bare_stop() {
                    self.axis.mip.conclude();
                    self.changes.mark(Field::Mip);
                }
            } else {
                self.axis.mip.conclude();
                self.changes.mark(Field::Mip);
                self.axis.rcnt = 0;
                self.changes.mark(Field::Rcnt);
            }
        }

        // ── Motor/encoder resolution or encoder-use changed ──
        if self
            .changes
            .contains_any(&[Field::Mres, Field::Eres, Field::Ueip])
        {
            self.reconcile_resolution(set_mode);
            return Ok(());
        }

        // ── Collect desired-value changes from all sources ──
        let mut fetched_from_link = false;
        if self.axis.omsl == OperatingMode::ClosedLoop {
            if let Some(link) = self.input_link.as_mut() {
                match link.read() {
                    Ok(value) => {
                        self.axis.val = value;
                        self.axis.udf = false;
                    }
                    Err(err) => {
                        self.axis.udf = true;
                        return Err(EngineError::LinkRead(err));
                    }
                }
                fetched_from_link = true;
            }
        }

        if !fetched_from_link {
            // Home request.
            if !self.axis.lvio
                && ((self.axis.homf
                    && self.axis.mip.activity() != Activity::HomeForward
                    && !self.axis.hls)
                    || (self.axis.homr
                        && self.axis.mip.activity() != Activity::HomeReverse
                        && !self.axis.lls))
            {
                self.start_home(stop_or_pause);
                return Ok(());
            }

            // Jog start.
            if !self.axis.mip.is_jogging()
                && !stop_or_pause
                && !self.axis.lvio
                && self.axis.mip.jog_requested()
            {
                self.start_jog(dir);
                return Ok(());
            }

            // Jog stop.
            if !self.axis.mip.jog_requested()
                && matches!(
                    self.axis.mip.activity(),
                    Activity::JogForward | Activity::JogReverse
                )
            {
                // Stop the motor; the post-processor corrects backlash.
                self.axis.pp = true;
                self.axis.mip.begin(Activity::JogStopping);
                self.send_one(Command::StopAxis);
                return Ok(());
            } else if self.axis.mip.in_jog_wind_down() {
                // Suppress the target-changed logic below mid wind-down.
                return Ok(());
            }

            // Tweaks fold into the user value.
            if self.axis.twf || self.axis.twr {
                self.axis.val += self.axis.twv * if self.axis.twf { 1.0 } else { -1.0 };
                self.axis.twf = false;
                self.axis.twr = false;
            }

            // Relative move value.
            if self.axis.rlv != self.axis.lrlv {
                self.axis.val += self.axis.rlv;
                self.axis.rlv = 0.0;
                self.changes.mark(Field::Rlv);
                self.axis.lrlv = 0.0;
            }

            // Raw-value write propagates to dial.
            if self.axis.rval != self.axis.lrvl {
                self.axis.dval = self.axis.rval as f64 * self.axis.mres;
            }
        }

        // ── User → dial propagation ──
        if self.axis.val != self.axis.lval {
            self.changes.mark(Field::Val);
            if set_mode == CalibMode::Set && self.axis.foff == FreezeOffset::Variable {
                // Redefine the user coordinate without motion: absorb the
                // change into the offset.
                self.axis.off = self.axis.val - self.axis.dval * dir.sign();
                self.axis.rbv = dial_to_user(self.axis.drbv, self.axis.off, dir);
                self.changes.mark(Field::Off);
                self.changes.mark(Field::Rbv);
                self.set_user_limits();
                self.axis.lval = self.axis.val;
                self.axis.mip.conclude();
                self.changes.mark(Field::Mip);
                self.axis.dmov = true;
                self.changes.mark(Field::Dmov);
                return Ok(());
            }
            self.axis.dval = user_to_dial(self.axis.val, self.axis.off, dir);
        }

        // ── Travel-limit gate on the target ──
        if self.limits_are_disabled() {
            self.axis.lvio = false;
        } else {
            self.axis.lvio = target_violation(
                self.axis.dval,
                self.axis.dhlm,
                self.axis.dllm,
                self.axis.bdst,
            );
        }
        if self.axis.lvio != old_lvio {
            self.changes.mark(Field::Lvio);
        }
        if self.axis.lvio {
            // Roll the target back to the last commanded values.
            self.axis.val = self.axis.lval;
            self.changes.mark(Field::Val);
            self.axis.dval = self.axis.ldvl;
            self.changes.mark(Field::Dval);
            self.axis.rval = self.axis.lrvl;
            self.changes.mark(Field::Rval);
            if self.axis.mip.is_done() {
                self.axis.dmov = true;
                self.changes.mark(Field::Dmov);
            }
            return Ok(());
        }

        if stop_or_pause {
            return Ok(());
        }

        // ── Pending status-update request ──
        if self.axis.stup == UpdateRequest::On {
            self.axis.stup = UpdateRequest::Busy;
            self.changes.mark(Field::Stup);
            self.send_one(Command::GetInfo);
        }

        // ── Dial value changed, or motion not yet concluded ──
        if self.axis.dval != self.axis.ldvl || !self.axis.dmov {
            if self.axis.dval != self.axis.ldvl {
                self.changes.mark(Field::Dval);
            }
            self.axis.diff = self.axis.dval - self.axis.drbv;
            self.changes.mark(Field::Diff);
            self.axis.rdif = nint(self.axis.diff / self.axis.mres);
            self.changes.mark(Field::Rdif);

            if set_mode == CalibMode::Set {
                // Redefine the raw position; the controller calls back.
                self.load_position();
                return Ok(());
            }
            self.dispatch_move(dir);
        }

        Ok(())
    }

    /// Recompute the encoder:motor step ratio and reload the position.
    fn reconcile_resolution(&mut self, set_mode: CalibMode) {
        let encoder_in_use =
            self.axis.status.contains(StatusFlags::ENCODER_PRESENT) && self.axis.ueip;

        let (encoder, motor) = if encoder_in_use {
            let (mres, corrected) = sanitize_resolution(self.axis.mres);
            if corrected {
                self.axis.mres = mres;
                self.changes.mark(Field::Mres);
            }
            if self.axis.eres == 0.0 {
                self.axis.eres = self.axis.mres;
                self.changes.mark(Field::Eres);
            }
            // Integer-scale the ratio until both components fit in ±1e6.
            let mut m = 10_000_000_i64;
            while m > 1
                && ((m as f64 / self.axis.eres).abs() > 1.0e6
                    || (m as f64 / self.axis.mres).abs() > 1.0e6)
            {
                m /= 10;
            }
            (
                (m as f64 / self.axis.eres).abs(),
                (m as f64 / self.axis.mres).abs(),
            )
        } else {
            (1.0, 1.0)
        };

        if enforce_min_retry_deadband(&mut self.axis.rdbd, self.axis.mres) {
            self.changes.mark(Field::Rdbd);
        }

        if self.axis.status.contains(StatusFlags::ENCODER_PRESENT) {
            self.send_one(Command::SetEncRatio { encoder, motor });
        }

        if set_mode == CalibMode::Set {
            self.axis.pp = true;
            self.send_one(Command::GetInfo);
        } else {
            self.load_position();
        }
    }

    /// Begin a home: stop first if moving, else issue the home command.
    fn start_home(&mut self, stop_or_pause: bool) {
        if stop_or_pause {
            // Processed from the post-processor once SPMG goes to Go.
            self.axis.dmov = false;
            self.changes.mark(Field::Dmov);
            return;
        }

        // Projected limit check with the velocity-widened margin.
        if !self.limits_are_disabled()
            && ((self.axis.homf && self.axis.dval > self.axis.dhlm - self.axis.velo)
                || (self.axis.homr && self.axis.dval < self.axis.dllm + self.axis.velo))
        {
            self.axis.lvio = true;
            self.changes.mark(Field::Lvio);
            return;
        }

        let forward = self.axis.homf;
        self.axis.mip.restart(if forward {
            Activity::HomeForward
        } else {
            Activity::HomeReverse
        });
        self.changes.mark(Field::Mip);
        self.axis.pp = true;

        if self.axis.movn {
            self.axis.mip.request_stop();
            self.changes.mark(Field::Mip);
            self.send_one(Command::StopAxis);
        } else {
            if self.axis.eres == 0.0 {
                self.axis.eres = self.axis.mres;
                self.changes.mark(Field::Eres);
            }
            let abs_mres = self.axis.mres.abs();
            let vbase = self.axis.vbas / abs_mres;
            let hvel = self.axis.hvel / abs_mres;

            let mut txn = Transaction::begin();
            txn.push(Command::SetVelBase(vbase));
            txn.push(Command::SetVelocity(hvel));
            txn.push(if forward {
                Command::HomeForward(0.0)
            } else {
                Command::HomeReverse(0.0)
            });
            txn.push(Command::Go);
            self.send(txn);

            self.axis.dmov = false;
            self.changes.mark(Field::Dmov);
            self.axis.rcnt = 0;
            self.changes.mark(Field::Rcnt);
        }
        debug!(axis = %self.axis.name, forward, "homing");
    }

    /// Begin a jog: stop first if moving, else issue the jog command.
    fn start_jog(&mut self, dir: Direction) {
        // Projected limit check with the velocity-widened margin.
        if !self.limits_are_disabled()
            && ((self.axis.jogf && self.axis.dval > self.axis.dhlm - self.axis.velo)
                || (self.axis.jogr && self.axis.dval < self.axis.dllm + self.axis.velo))
        {
            self.axis.lvio = true;
            self.changes.mark(Field::Lvio);
            return;
        }

        let forward = self.axis.jogf;
        self.axis.mip.restart(if forward {
            Activity::JogForward
        } else {
            Activity::JogReverse
        });
        self.changes.mark(Field::Mip);

        if self.axis.movn {
            self.axis.pp = true;
            self.axis.mip.request_stop();
            self.changes.mark(Field::Mip);
            self.send_one(Command::StopAxis);
        } else {
            let mut jogv = (self.axis.jvel * dir.sign()) / self.axis.mres;
            let jacc = self.axis.jar / self.axis.mres.abs();

            self.axis.dmov = false;
            self.changes.mark(Field::Dmov);
            self.axis.pp = true;
            if forward {
                self.axis.cdir = true;
            } else {
                self.axis.cdir = false;
                jogv = -jogv;
            }
            if self.axis.mres < 0.0 {
                self.axis.cdir = !self.axis.cdir;
            }

            let mut txn = Transaction::begin();
            txn.push(Command::SetAccel(jacc));
            txn.push(Command::Jog(jogv));
            self.send(txn);
            debug!(axis = %self.axis.name, jogv, "jogging");
        }
    }

    /// Dispatch a (possibly backlash-corrected) move toward `dval`.
    fn dispatch_move(&mut self, dir: Direction) {
        let mres = self.axis.mres;
        let abs_mres = mres.abs();
        let rbvpos = self.axis.drbv / mres; // where the motor is
        let currpos = self.axis.ldvl / mres; // where we are
        let newpos = self.axis.dval / mres; // where to go
        let vbase = self.axis.vbas / abs_mres;
        let vel = self.axis.velo / abs_mres;
        let acc = vel / self.axis.accl;
        // One backlash distance away from the target.
        let bpos = (self.axis.dval - self.axis.bdst) / mres;
        let bvel = self.axis.bvel / abs_mres;
        let bacc = bvel / self.axis.bacc;
        let slop = 0.95 * self.axis.rdbd;
        let relpos = self.axis.diff / mres;
        let relbpos = ((self.axis.dval - self.axis.bdst) - self.axis.drbv) / mres;
        // Relative targets carry a half-step bias: the hardware truncates
        // the encoder-to-motor conversion instead of rounding.
        let m_rel_pos = nint(relpos) as f64 + if relpos > 0.0 { 0.5 } else { -0.5 };
        let m_rel_bpos = nint(relbpos) as f64 + if relbpos > 0.0 { 0.5 } else { -0.5 };
        let use_rel = self.axis.use_relative_moves();

        // Recalculate val/rval from dval. The origin of the change is
        // unknown by now, and they must agree.
        self.axis.val = dial_to_user(self.axis.dval, self.axis.off, dir);
        if self.axis.val != self.axis.lval {
            self.changes.mark(Field::Val);
        }
        self.axis.rval = nint(self.axis.dval / mres);
        if self.axis.rval != self.axis.lrvl {
            self.changes.mark(Field::Rval);
        }

        let rpos = nint(rbvpos);
        let npos = nint(newpos);
        if npos == rpos {
            // Raw no-op move. The retry decision can route here even
            // though the target equals the readback.
            if !self.axis.dmov
                && (self.axis.mip.is_done() || self.axis.mip.is_exactly(Activity::Retry))
            {
                self.axis.dmov = true;
                self.changes.mark(Field::Dmov);
                if !self.axis.mip.is_done() {
                    self.axis.mip.conclude();
                    self.changes.mark(Field::Mip);
                }
            }
            self.axis.ldvl = self.axis.dval;
            self.axis.lval = self.axis.val;
            self.axis.lrvl = self.axis.rval;
            return;
        }

        // Fresh moves reset the retry counter.
        if self.axis.mip.activity() != Activity::Retry {
            self.axis.rcnt = 0;
            self.changes.mark(Field::Rcnt);
        }

        let preferred_dir = if use_rel {
            (self.axis.diff > 0.0) == (self.axis.bdst > 0.0)
        } else {
            (self.axis.dval > self.axis.ldvl) == (self.axis.bdst > 0.0)
        };

        // Within the deadband, only the preferred direction may move.
        if self.axis.diff.abs() < slop && !preferred_dir {
            if self.axis.mip.is_done() {
                self.axis.ldvl = self.axis.dval;
                self.axis.lval = self.axis.val;
                self.axis.lrvl = self.axis.rval;
                self.axis.dmov = true;
                self.changes.mark(Field::Dmov);
            }
            return;
        }

        if self.axis.mip.is_done() || self.axis.mip.is_exactly(Activity::Retry) {
            self.axis.mip.restart(Activity::Move);
            self.changes.mark(Field::Mip);
            if self.axis.dmov {
                self.axis.dmov = false;
                self.changes.mark(Field::Dmov);
            }
            self.axis.ldvl = self.axis.dval;
            self.axis.lval = self.axis.val;
            self.axis.lrvl = self.axis.rval;

            let velocity;
            let accel;
            let position;
            let mut backlash_follows = false;

            if self.axis.bdst.abs() < abs_mres
                || (preferred_dir
                    && self.axis.bvel == self.axis.velo
                    && self.axis.bacc == self.axis.accl)
            {
                // Backlash disabled, or no benefit to a separate leg.
                velocity = vel;
                accel = acc;
                position = if use_rel {
                    m_rel_pos * self.axis.frac
                } else {
                    currpos + self.axis.frac * (newpos - currpos)
                };
            } else if self.axis.diff.abs() < slop
                || (use_rel && ((relbpos < 0.0) == (relpos > 0.0)))
                || (!use_rel && ((currpos + slop > bpos) == (newpos > currpos)))
            {
                // Already past the backlash point (or inside the
                // deadband): creep the remaining fraction at backlash
                // speed. Overshoot costs far more than undershoot here;
                // the callback gives us another fraction each time, which
                // also rides out creeping or latent readback devices.
                velocity = bvel;
                accel = bacc;
                position = if use_rel {
                    m_rel_pos * self.axis.frac
                } else {
                    currpos + self.axis.frac * (newpos - currpos)
                };
            } else {
                // Two-leg move: slew to the backlash point; the
                // post-processor runs the correction leg.
                velocity = vel;
                accel = acc;
                position = if use_rel { m_rel_bpos } else { bpos };
                backlash_follows = true;
            }
            if backlash_follows {
                self.axis.pp = true;
            }

            self.axis.cdir = self.axis.rdif >= 0;

            let mut txn = Transaction::begin();
            txn.push(Command::SetVelBase(vbase));
            txn.push(Command::SetVelocity(velocity));
            txn.push(Command::SetAccel(accel));
            txn.push(if use_rel {
                Command::MoveRel(position)
            } else {
                Command::MoveAbs(position)
            });
            txn.push(Command::Go);
            self.send(txn);
            debug!(axis = %self.axis.name, position, velocity, backlash_follows, "move dispatched");
        }
    }

    /// Load a new raw position into the controller without moving.
    pub(crate) fn load_position(&mut self) {
        let newpos = self.axis.dval / self.axis.mres;

        self.axis.ldvl = self.axis.dval;
        self.axis.lval = self.axis.val;
        // The controller's position register is integral; truncate the
        // way it will.
        self.axis.rval = newpos as i64;
        self.axis.lrvl = self.axis.rval;

        if self.axis.foff == FreezeOffset::Frozen {
            // Offset frozen: the user coordinate follows the dial.
            self.axis.val = dial_to_user(self.axis.dval, self.axis.off, self.axis.dir);
            self.changes.mark(Field::Val);
            self.axis.lval = self.axis.val;
        } else {
            // Absorb the redefinition into the offset.
            self.axis.off = self.axis.val - self.axis.dval * self.axis.dir.sign();
            self.changes.mark(Field::Off);
            self.set_user_limits();
        }

        self.axis.mip.restart(Activity::LoadPosition);
        self.changes.mark(Field::Mip);
        self.axis.pp = true;
        if self.axis.dmov {
            self.axis.dmov = false;
            self.changes.mark(Field::Dmov);
        }

        // Reload the register, then refresh readback.
        self.send_one(Command::LoadPos(newpos));
        self.send_one(Command::GetInfo);
    }
}
