//! Alarm severity evaluation.
//!
//! Runs at the end of every cycle. Failures surface as published alarm
//! state, never as errors crossing the engine boundary.

use axis_common::fields::Field;
use axis_common::types::{AlarmCondition, Severity, StatusFlags};

use crate::engine::Engine;

impl Engine {
    /// Evaluate alarm conditions and report the most severe one.
    pub(crate) fn evaluate_alarms(&mut self) {
        if self.axis.udf {
            self.publisher.alarm(AlarmCondition::Undefined, Severity::Invalid);
            return;
        }

        // Limit-switch and soft-limit conditions at the configured
        // severity.
        if self.axis.hlsv != Severity::None && (self.axis.hls || self.axis.dval > self.axis.dhlm) {
            self.publisher.alarm(AlarmCondition::High, self.axis.hlsv);
            return;
        }
        if self.axis.hlsv != Severity::None && (self.axis.lls || self.axis.dval < self.axis.dllm) {
            self.publisher.alarm(AlarmCondition::Low, self.axis.hlsv);
            return;
        }

        // A communication error alarms once, then clears from the status
        // word.
        if self.axis.status.contains(StatusFlags::COMM_ERROR) {
            self.axis.status.remove(StatusFlags::COMM_ERROR);
            self.changes.mark(Field::Msta);
            self.publisher.alarm(AlarmCondition::Comm, Severity::Invalid);
        }
    }
}
