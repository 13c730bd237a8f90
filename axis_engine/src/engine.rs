//! The engine: single-flight processing entry, callback handling, settle
//! delay, and batched publishing.
//!
//! `process()` is invoked once per external request and once per
//! controller status callback. One logical motion (stop-first jog,
//! two-leg backlash move, retry chain) spans many such invocations; the
//! motion-in-progress tracker carries the position in the sequence
//! between them. The only suspension point is the readback settle delay,
//! armed as a generation-keyed one-shot on the host timer.

use axis_common::command::{Command, Transaction};
use axis_common::config::AxisConfig;
use axis_common::driver::{FieldPublisher, MotorController, SettleTimer, ValueLink};
use axis_common::error::{CommandRejected, ConfigError, EngineError};
use axis_common::fields::Field;
use axis_common::types::{CalibMode, OperatingMode, Spmg, UpdateRequest};
use tracing::{debug, trace, warn};

use crate::axis::Axis;
use crate::limits::{
    enforce_min_retry_deadband, limits_disabled, position_violation, slewing_violation,
};
use crate::mip::Activity;
use crate::publish::ChangeSet;
use crate::transform::nint;

/// Optional value links wired to the engine at construction.
#[derive(Default)]
pub struct Links {
    /// Closed-loop desired-value input.
    pub input: Option<Box<dyn ValueLink>>,
    /// External readback device.
    pub readback: Option<Box<dyn ValueLink>>,
}

/// How the callback phase left the invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    /// Fall through to limit checks, the sequencer, and link firing.
    Continue,
    /// Conclude the invocation (alarms and publishing still run).
    Exit,
}

/// Motion-control engine for one axis.
pub struct Engine {
    pub(crate) axis: Axis,
    pub(crate) controller: Box<dyn MotorController>,
    pub(crate) publisher: Box<dyn FieldPublisher>,
    timer: Box<dyn SettleTimer>,
    pub(crate) input_link: Option<Box<dyn ValueLink>>,
    readback_link: Option<Box<dyn ValueLink>>,
    /// Single-flight guard: a re-entrant invocation is a no-op.
    pact: bool,
    pub(crate) changes: ChangeSet,
    /// Generation counter keying settle-delay one-shots.
    delay_generation: u64,
}

impl Engine {
    /// Construct the engine and run the initialization reconciliation:
    /// speed/resolution sync, first status refresh, readback sync, and
    /// the initial dial-limit push.
    pub fn new(
        cfg: &AxisConfig,
        controller: Box<dyn MotorController>,
        publisher: Box<dyn FieldPublisher>,
        timer: Box<dyn SettleTimer>,
        links: Links,
    ) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let mut engine = Self {
            axis: Axis::from_config(cfg),
            controller,
            publisher,
            timer,
            input_link: links.input,
            readback_link: links.readback,
            pact: false,
            changes: ChangeSet::new(),
            delay_generation: 0,
        };
        engine.initialize();
        Ok(engine)
    }

    /// The axis record (host-facing field surface).
    #[inline]
    pub fn axis(&self) -> &Axis {
        &self.axis
    }

    /// Mutable access to the axis record. The host writes fields here,
    /// then calls [`field_written`](Self::field_written) and
    /// [`process`](Self::process).
    #[inline]
    pub fn axis_mut(&mut self) -> &mut Axis {
        &mut self.axis
    }

    fn initialize(&mut self) {
        self.reconcile_speeds();

        let update = self.controller.update();
        self.axis.status = update.flags;
        self.axis.rmp = update.motor_steps;
        self.axis.rep = update.encoder_steps;

        if self.axis.eres == 0.0 {
            self.axis.eres = self.axis.mres;
            self.changes.mark(Field::Eres);
        }

        let mut changes = ChangeSet::new();
        self.axis.refresh_readback(true, None, &mut changes);
        self.changes.merge(changes);

        if enforce_min_retry_deadband(&mut self.axis.rdbd, self.axis.mres) {
            self.changes.mark(Field::Rdbd);
        }

        // In closed-loop mode the input link owns the drive values;
        // otherwise start out agreeing with the readback.
        if self.axis.omsl != OperatingMode::ClosedLoop {
            self.axis.val = self.axis.rbv;
            self.changes.mark(Field::Val);
            self.axis.dval = self.axis.drbv;
            self.changes.mark(Field::Dval);
            self.axis.rval = nint(self.axis.dval / self.axis.mres);
            self.changes.mark(Field::Rval);
        }

        // Push dial limits so the controller can veto invalid values.
        self.push_dial_high_limit();
        self.push_dial_low_limit();

        self.axis.dmov = true;
        self.changes.mark(Field::Dmov);
        self.axis.movn = false;
        self.changes.mark(Field::Movn);
        self.axis.lspg = self.axis.spmg;
        self.changes.mark(Field::Spmg);
        self.axis.diff = self.axis.dval - self.axis.drbv;
        self.changes.mark(Field::Diff);
        self.axis.rdif = nint(self.axis.diff / self.axis.mres);
        self.changes.mark(Field::Rdif);
        self.axis.lval = self.axis.val;
        self.axis.ldvl = self.axis.dval;
        self.axis.lrvl = self.axis.rval;
        self.axis.lvio = false;

        if !limits_disabled(self.axis.dhlm, self.axis.dllm)
            && (self.axis.drbv > self.axis.dhlm + self.axis.mres
                || self.axis.drbv < self.axis.dllm - self.axis.mres)
        {
            self.axis.lvio = true;
            self.changes.mark(Field::Lvio);
        }

        self.flush_changes();
    }

    /// Process the axis: refresh status, handle motion progress or
    /// completion, re-evaluate user intent, publish.
    ///
    /// Returns the error of an aborted sequencer pass (unreadable input
    /// link); all other conditions surface as published state.
    pub fn process(&mut self) -> Result<(), EngineError> {
        if self.pact {
            trace!(axis = %self.axis.name, "re-entrant process rejected");
            return Ok(());
        }
        self.pact = true;
        trace!(axis = %self.axis.name, "process begin");

        let old_status = self.axis.status;
        let update = self.controller.update();
        self.axis.status = update.flags;
        self.axis.rmp = update.motor_steps;
        self.axis.rep = update.encoder_steps;
        if self.axis.status != old_status {
            self.changes.mark(Field::Msta);
        }

        // A delay acknowledge is a continuation of the device callback
        // that armed it.
        let callback = update.callback || self.axis.mip.delay_acked();

        let mut result = Ok(());
        if self.callback_phase(callback) == Flow::Continue {
            self.recompute_soft_limits();

            // Re-evaluate user intent whenever it may have changed: a
            // stop, a non-callback trigger, motion done, or mid-retry.
            if self.axis.stop
                || self.axis.spmg == Spmg::Stop
                || self.axis.spmg == Spmg::Pause
                || !callback
                || self.axis.dmov
                || self.axis.mip.activity() == Activity::Retry
            {
                result = self.sequence();
            }

            self.publisher.readback_link(self.axis.rbv);
            if self.axis.dmov {
                self.publisher.forward_link();
            }
        }

        self.finish(callback);
        trace!(axis = %self.axis.name, "process end");
        result
    }

    /// The settle-delay one-shot fired.
    ///
    /// A firing whose generation no longer matches (or arriving with no
    /// delay request pending) was orphaned by an intervening stop or new
    /// target and is silently ignored.
    pub fn settle_fired(&mut self, generation: u64) -> Result<(), EngineError> {
        if generation != self.delay_generation || !self.axis.mip.delay_requested() {
            debug!(axis = %self.axis.name, generation, "orphaned settle one-shot ignored");
            return Ok(());
        }
        self.axis.mip.acknowledge_delay();
        self.process()
    }

    /// Callback-driven part of the cycle: readback refresh, reversal
    /// check, completion detection, post-processing, settle delay.
    fn callback_phase(&mut self, callback: bool) -> Flow {
        if !callback {
            return Flow::Continue;
        }

        self.axis
            .refresh_readback(false, self.readback_link.as_deref_mut(), &mut self.changes);

        if self.axis.movn {
            // New target in the opposite direction of current travel, by
            // more than twice the backlash + deadband span, on a plain
            // move or retry: the readback may be lying. Stop now.
            let sign_rdif_positive = self.axis.rdif >= 0;
            if self.axis.ntm
                && sign_rdif_positive != self.axis.cdir
                && self.axis.diff.abs() > 2.0 * (self.axis.bdst.abs() + self.axis.rdbd)
                && (self.axis.mip.is_exactly(Activity::Retry)
                    || self.axis.mip.is_exactly(Activity::Move))
            {
                warn!(
                    axis = %self.axis.name,
                    tdir = self.axis.tdir,
                    "commanded-direction reversal; stopping"
                );
                self.send_one(Command::StopAxis);
                self.axis.mip.request_stop();
                self.changes.mark(Field::Mip);
            }
            return Flow::Continue;
        }

        if self.axis.stup == UpdateRequest::Busy {
            // Mid status-refresh: skip stopped-motor handling this pass.
            return Flow::Continue;
        }

        // Motor has stopped. Assume done until told otherwise.
        if !self.axis.dmov {
            self.axis.dmov = true;
            self.changes.mark(Field::Dmov);
        }

        // A limit switch ended the motion: one more info refresh, then
        // force-conclude.
        if !self.axis.mip.is_done() && (self.axis.rhls || self.axis.rlls) {
            self.send_one(Command::GetInfo);
            self.axis.pp = true;
            self.axis.mip.conclude();
            self.changes.mark(Field::Mip);
            return Flow::Exit;
        }

        if self.axis.pp {
            if self.axis.val != self.axis.lval {
                // Target changed while a post-process was pending
                // (backlash + delay + new-target race): scrap the
                // pending reconciliation and head straight for the
                // sequencer, or the record livelocks.
                self.axis.mip.conclude();
                self.changes.mark(Field::Mip);
                return Flow::Continue;
            }
            self.post_process();
        }

        // Close enough? Apply the settle delay before deciding.
        if self.axis.dmov && !(self.axis.rhls || self.axis.rlls) {
            if self.axis.mip.delay_acked() || self.axis.dly <= 0.0 {
                if self.axis.mip.delay_acked() && !self.axis.mip.delay_requested() {
                    // Delay just elapsed: take one fresh status snapshot
                    // before trusting the readback.
                    self.axis.mip.hold_delay();
                    self.send_one(Command::GetInfo);
                    self.axis.dmov = false;
                    return Flow::Exit;
                } else if self.axis.stup != UpdateRequest::On {
                    self.axis.mip.clear_delay();
                    self.changes.mark(Field::Mip);
                    self.maybe_retry();
                }
            } else if self.changes.contains(Field::Dmov) && !self.axis.mip.delay_requested() {
                // First sight of done-moving: let the readback settle.
                self.axis.mip.request_delay();
                self.changes.mark(Field::Mip);
                self.delay_generation += 1;
                self.timer.arm(self.axis.dly, self.delay_generation);
                self.axis.dmov = false;
                return Flow::Exit;
            }
        }

        Flow::Continue
    }

    /// Context-sensitive soft-limit recompute; a rising edge outside
    /// calibration forces a stop and clears the motion buttons.
    fn recompute_soft_limits(&mut self) {
        let axis = &mut self.axis;
        let old_lvio = axis.lvio;

        if limits_disabled(axis.dhlm, axis.dllm) {
            axis.lvio = false;
        } else if axis.mip.is_jogging() {
            axis.lvio = slewing_violation(
                axis.jogf, axis.jogr, axis.drbv, axis.dhlm, axis.dllm, axis.velo,
            );
        } else if axis.mip.is_homing() {
            axis.lvio = slewing_violation(
                axis.homf, axis.homr, axis.drbv, axis.dhlm, axis.dllm, axis.velo,
            );
        } else {
            axis.lvio = position_violation(axis.drbv, axis.dhlm, axis.dllm, axis.mres);
        }

        if axis.lvio != old_lvio {
            self.changes.mark(Field::Lvio);
            if axis.lvio && axis.set_mode == CalibMode::Use {
                axis.stop = true;
                axis.jogf = false;
                axis.jogr = false;
                axis.homf = false;
                axis.homr = false;
            }
        }
    }

    /// Cycle epilogue: status-refresh completion, alarms, publish flush,
    /// guard release.
    fn finish(&mut self, callback: bool) {
        if callback && self.axis.stup == UpdateRequest::Busy {
            self.axis.stup = UpdateRequest::Off;
            self.changes.mark(Field::Stup);
        }
        self.evaluate_alarms();
        self.flush_changes();
        self.pact = false;
    }

    /// Flush the accumulated change set: publish each dirty field's
    /// current value exactly once.
    pub(crate) fn flush_changes(&mut self) {
        let changes = std::mem::take(&mut self.changes);
        for field in changes.iter() {
            let value = self.axis.field_value(field);
            self.publisher.field_changed(field, value);
        }
    }

    /// Deliver a transaction, logging an unexpected rejection. Commands
    /// whose rejection carries meaning (limits, gains) go through
    /// [`try_send`](Self::try_send) instead.
    pub(crate) fn send(&mut self, txn: Transaction) {
        if let Err(rejected) = self.controller.transact(txn) {
            debug!(axis = %self.axis.name, %rejected, "controller rejected command");
        }
    }

    /// Deliver a single command.
    pub(crate) fn send_one(&mut self, cmd: Command) {
        let mut txn = Transaction::begin();
        txn.push(cmd);
        self.send(txn);
    }

    /// Deliver a single command, surfacing a rejection to the caller.
    pub(crate) fn try_send(&mut self, cmd: Command) -> Result<(), CommandRejected> {
        let mut txn = Transaction::begin();
        txn.push(cmd);
        self.controller.transact(txn)
    }

    /// Whether soft travel limits are configured out.
    pub(crate) fn limits_are_disabled(&self) -> bool {
        limits_disabled(self.axis.dhlm, self.axis.dllm)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
