//! # Axis Motion Engine
//!
//! Callback-driven motion sequencing for a single motorized axis: given a
//! target position, travel limits, velocity/acceleration profiles, and
//! periodic readback from a motor controller, the engine decides what
//! commands to issue (move, jog, home, stop, backlash-correct, retry) and
//! tracks a logical motion to completion across many re-entries.
//!
//! ## Architecture
//!
//! - [`mip`]: motion-in-progress tracker, one primary activity plus
//!   orthogonal overlay flags (stop request, settle delay, jog request).
//! - [`transform`]: user/dial/raw coordinate and velocity-unit math.
//! - [`limits`]: retry-deadband floor, range clamps, soft travel limits.
//! - [`axis`]: the per-axis state record and readback derivation.
//! - [`engine`]: the [`engine::Engine`] itself, with the single-flight `process()` entry,
//!   command sequencing, post-motion reconciliation, retry decision,
//!   per-field write hooks, and batched field publishing.
//!
//! ## Invocation model
//!
//! The host calls [`engine::Engine::process`] once per external request
//! and once per controller status callback. A re-entrant call while an
//! invocation is active is rejected as a no-op. The only suspension point
//! is the readback settle delay, armed as a generation-keyed one-shot
//! through the host timer.

pub mod alarm;
pub mod axis;
pub mod engine;
pub mod limits;
pub mod mip;
pub mod publish;
pub mod transform;

mod postprocess;
mod retry;
mod sequencer;
mod hooks;

#[cfg(test)]
mod testutil;

pub use axis::Axis;
pub use engine::{Engine, Links};
pub use mip::{Activity, Mip, Overlay};
