//! Collaborator traits: controller binding, field publisher, value links,
//! and the settle-delay timer.
//!
//! The traits are deliberately thin: they capture what the engine needs
//! from each collaborator without mandating a transport or framework.

use crate::command::Transaction;
use crate::error::{CommandRejected, LinkError};
use crate::fields::{Field, FieldValue};
use crate::types::{AlarmCondition, Severity, StatusUpdate};

/// A concrete motor-controller binding.
///
/// # Contract
///
/// - [`update`](Self::update) refreshes raw position/status and reports
///   whether the refresh observed a fresh asynchronous callback.
/// - [`transact`](Self::transact) delivers a command batch atomically and
///   in append order. Limit and gain commands may be rejected with the
///   controller's own clamped value ([`CommandRejected`]); all other
///   commands are accepted.
///
/// Capability discovery (encoder present, gain support) travels in the
/// status word of every [`StatusUpdate`].
pub trait MotorController: Send {
    /// Refresh raw motor/encoder position and the status word.
    fn update(&mut self) -> StatusUpdate;

    /// Deliver a command batch.
    fn transact(&mut self, txn: Transaction) -> Result<(), CommandRejected>;
}

/// Host-framework sink for published axis state.
///
/// Implementations must tolerate being called many times per cycle; the
/// engine only publishes a field whose value actually changed since the
/// previous flush.
pub trait FieldPublisher: Send {
    /// A field's value changed since the last publish cycle.
    fn field_changed(&mut self, field: Field, value: FieldValue);

    /// The user-space readback, pushed every cycle to the readback link.
    fn readback_link(&mut self, _value: f64) {}

    /// Motion concluded; trigger forward processing.
    fn forward_link(&mut self) {}

    /// Alarm severity evaluation result for this cycle.
    fn alarm(&mut self, _condition: AlarmCondition, _severity: Severity) {}
}

/// A readable scalar link (closed-loop input or external readback).
pub trait ValueLink: Send {
    fn read(&mut self) -> Result<f64, LinkError>;
}

/// One-shot settle-delay timer.
///
/// Arming replaces any previous arm. There is no cancel call: the engine
/// keys every arm with a generation counter and ignores firings whose
/// generation no longer matches (orphan detection).
pub trait SettleTimer: Send {
    /// Arm a one-shot that should call `Engine::settle_fired(generation)`
    /// after `seconds`.
    fn arm(&mut self, seconds: f64, generation: u64);
}
