//! Post-motion reconciliation.
//!
//! Runs when the motor has just stopped with follow-up work pending: a
//! stop-then-home replay, the backlash leg after a move or jog, the
//! second jog backlash phase, or the conclusion of a position reload.

use axis_common::command::{Command, Transaction};
use axis_common::fields::Field;
use axis_common::types::OperatingMode;
use tracing::debug;

use crate::engine::Engine;
use crate::mip::Activity;
use crate::transform::nint;

impl Engine {
    /// Reconcile state after the motor stopped with `pp` pending.
    pub(crate) fn post_process(&mut self) {
        debug!(axis = %self.axis.name, mip = ?self.axis.mip.activity(), "post-process");
        self.axis.pp = false;

        if self.axis.omsl != OperatingMode::ClosedLoop
            && !matches!(
                self.axis.mip.activity(),
                Activity::Move
                    | Activity::MoveBacklash
                    | Activity::JogBacklash1
                    | Activity::JogBacklash2
            )
        {
            // Close the loop by hand: drive values agree with readback.
            self.axis.val = self.axis.rbv;
            self.changes.mark(Field::Val);
            self.axis.dval = self.axis.drbv;
            self.changes.mark(Field::Dval);
            self.axis.rval = nint(self.axis.dval / self.axis.mres);
            self.changes.mark(Field::Rval);
            self.axis.diff = 0.0;
            self.changes.mark(Field::Diff);
            self.axis.rdif = 0;
            self.changes.mark(Field::Rdif);
        }

        match self.axis.mip.activity() {
            Activity::LoadPosition => {
                // LOAD_POS followed by GET_INFO has completed.
                self.axis.mip.conclude();
            }
            Activity::HomeForward | Activity::HomeReverse => self.post_home(),
            Activity::JogStopping | Activity::Move => self.post_move_or_jog_stop(),
            Activity::JogBacklash1 => self.post_jog_backlash(),
            Activity::JogBacklash2 | Activity::MoveBacklash => {
                // Backlash leg complete.
                self.axis.mip.conclude();
                self.rearm_jog_request();
            }
            _ => {}
        }

        // Snapshot last-commanded values for the next change detection.
        self.axis.lval = self.axis.val;
        self.axis.ldvl = self.axis.dval;
        self.axis.lrvl = self.axis.rval;
        self.axis.mip.clear_stop();
        self.changes.mark(Field::Mip);
    }

    /// Home handling: replay the home after a stop-first, or conclude.
    fn post_home(&mut self) {
        if self.axis.mip.stop_requested() {
            // Stopped and the home button is still down: home now.
            let abs_mres = self.axis.mres.abs();
            let vbase = self.axis.vbas / abs_mres;
            let hvel = self.axis.hvel / abs_mres;
            let forward = self.axis.mip.activity() == Activity::HomeForward;

            self.axis.mip.clear_stop();
            self.axis.dmov = false;
            self.changes.mark(Field::Dmov);
            self.axis.rcnt = 0;
            self.changes.mark(Field::Rcnt);

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
            self.axis.pp = true;
        } else if self.axis.mip.activity() == Activity::HomeForward {
            self.axis.mip.begin(Activity::Idle);
            self.axis.homf = false;
            self.changes.mark(Field::Homf);
        } else {
            self.axis.mip.begin(Activity::Idle);
            self.axis.homr = false;
            self.changes.mark(Field::Homr);
        }
    }

    /// Backlash correction after a jog stop or a two-leg move.
    fn post_move_or_jog_stop(&mut self) {
        if self.axis.bdst.abs() > self.axis.mres.abs() {
            let mres = self.axis.mres;
            let abs_mres = mres.abs();
            let vbase = self.axis.vbas / abs_mres;
            let mut vel = self.axis.velo / abs_mres;
            let bpos = (self.axis.dval - self.axis.bdst) / mres;
            let use_rel = self.axis.use_relative_moves();
            let relpos = self.axis.diff / mres;
            let relbpos = ((self.axis.dval - self.axis.bdst) - self.axis.drbv) / mres;

            // The done-moving blink between the legs must not be posted.
            self.axis.dmov = false;
            self.changes.unmark(Field::Dmov);

            let mut txn = Transaction::begin();
            if self.axis.mip.activity() == Activity::JogStopping {
                // Full leg to the backlash point at slew speed.
                let acc = vel / self.axis.accl;
                txn.push(Command::SetVelBase(vbase));
                if vel <= vbase {
                    vel = vbase + 1.0;
                }
                txn.push(Command::SetVelocity(vel));
                txn.push(Command::SetAccel(acc));
                if use_rel {
                    txn.push(Command::MoveRel(relbpos));
                } else {
                    txn.push(Command::MoveAbs(bpos));
                }
                self.axis.mip.restart(Activity::JogBacklash1);
            } else {
                // Fractional approach leg at backlash speed.
                let mut bvel = self.axis.bvel / abs_mres;
                let bacc = bvel / self.axis.bacc;
                if bvel <= vbase {
                    bvel = vbase + 1.0;
                }
                txn.push(Command::SetVelocity(bvel));
                txn.push(Command::SetAccel(bacc));
                if use_rel {
                    txn.push(Command::MoveRel((relpos - relbpos) * self.axis.frac));
                } else {
                    let currpos = self.axis.dval / mres;
                    let newpos = bpos + self.axis.frac * (currpos - bpos);
                    self.axis.rval = nint(newpos);
                    txn.push(Command::MoveAbs(newpos));
                }
                self.axis.mip.restart(Activity::MoveBacklash);
            }
            txn.push(Command::Go);
            self.send(txn);
            self.axis.pp = true;
        } else {
            // Backlash distance below one step: skip the correction.
            self.axis.mip.conclude();
            self.rearm_jog_request();
        }
    }

    /// Second-phase jog backlash leg.
    fn post_jog_backlash(&mut self) {
        let mres = self.axis.mres;
        let abs_mres = mres.abs();
        let mut bvel = self.axis.bvel / abs_mres;
        let bacc = bvel / self.axis.bacc;
        let vbase = self.axis.vbas / abs_mres;
        let bpos = (self.axis.dval - self.axis.bdst) / mres;
        let use_rel = self.axis.use_relative_moves();
        let relpos = self.axis.diff / mres;
        let relbpos = ((self.axis.dval - self.axis.bdst) - self.axis.drbv) / mres;

        self.axis.dmov = false;
        self.changes.unmark(Field::Dmov);

        let mut txn = Transaction::begin();
        if bvel <= vbase {
            bvel = vbase + 1.0;
        }
        txn.push(Command::SetVelocity(bvel));
        txn.push(Command::SetAccel(bacc));
        if use_rel {
            txn.push(Command::MoveRel((relpos - relbpos) * self.axis.frac));
        } else {
            let currpos = self.axis.dval / mres;
            let newpos = bpos + self.axis.frac * (currpos - bpos);
            self.axis.rval = nint(newpos);
            txn.push(Command::MoveAbs(newpos));
        }
        txn.push(Command::Go);
        self.send(txn);

        self.axis.mip.restart(Activity::JogBacklash2);
        self.axis.pp = true;
    }

    /// Re-arm a queued jog if its button is still held and the limit in
    /// that direction is clear.
    pub(crate) fn rearm_jog_request(&mut self) {
        if (self.axis.jogf && !self.axis.hls) || (self.axis.jogr && !self.axis.lls) {
            self.axis.mip.request_jog();
        }
    }
}
