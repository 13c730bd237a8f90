//! The retry decision: compare the settled position against the deadband
//! and either resend a corrective move or conclude the motion.

use axis_common::fields::Field;
use axis_common::types::Spmg;
use tracing::debug;

use crate::engine::Engine;
use crate::mip::Activity;

impl Engine {
    /// Decide whether the just-finished motion needs a corrective retry.
    pub(crate) fn maybe_retry(&mut self) {
        if self.axis.diff.abs() > self.axis.rdbd && !self.axis.hls && !self.axis.lls {
            // Not close enough.
            debug!(axis = %self.axis.name, diff = self.axis.diff, "outside deadband");

            if self.axis.rtry == 0 {
                // Retry disabled. Conclude, keeping a queued jog alive
                // for reactivation in the post-processor.
                self.axis.mip.conclude_keeping_jog_request();
                self.changes.mark(Field::Mip);
            } else {
                self.axis.rcnt += 1;
                if self.axis.rcnt > self.axis.rtry {
                    // Too many retries.
                    self.axis.mip.conclude();
                    self.changes.mark(Field::Mip);
                    self.axis.lval = self.axis.val;
                    self.axis.ldvl = self.axis.dval;
                    self.axis.lrvl = self.axis.rval;
                    self.axis.miss = true;
                    self.changes.mark(Field::Miss);
                } else {
                    self.axis.dmov = false;
                    self.changes.mark(Field::Dmov);
                    self.axis.mip.restart(Activity::Retry);
                    self.changes.mark(Field::Mip);
                }
                self.changes.mark(Field::Rcnt);
            }
        } else {
            // Close enough.
            debug!(axis = %self.axis.name, diff = self.axis.diff, "within deadband");
            self.axis.mip.conclude_keeping_jog_request();
            self.changes.mark(Field::Mip);
            if self.axis.miss {
                self.axis.miss = false;
                self.changes.mark(Field::Miss);
            }
            // A "Move"-initiated motion is single-shot: pause on arrival.
            if self.axis.spmg == Spmg::Move {
                self.axis.spmg = Spmg::Pause;
                self.changes.mark(Field::Spmg);
            }
        }
    }
}
