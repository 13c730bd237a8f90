//! # Axis Simulator
//!
//! A simulated motor controller implementing the engine's
//! [`MotorController`] contract: velocity-limited motion toward a staged
//! target, jogging, homing, limit switches, and asynchronous-callback
//! signaling. Used by integration tests and benchmarks.
//!
//! The simulator is split into a controller half (owned by the engine)
//! and a [`SimHandle`] sharing the same state, through which a test
//! advances simulated time and inspects every transaction the engine
//! issued.

use std::sync::{Arc, Mutex, MutexGuard};

use axis_common::command::{Command, Transaction};
use axis_common::driver::MotorController;
use axis_common::error::CommandRejected;
use axis_common::types::{StatusFlags, StatusUpdate};
use tracing::{debug, trace};

/// Simulator tuning knobs.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Initial raw position [steps].
    pub initial_position: f64,
    /// Report an encoder.
    pub encoder_present: bool,
    /// Encoder counts per motor step.
    pub encoder_scale: f64,
    /// Report servo gain / torque support.
    pub gain_support: bool,
    /// Raw position of the positive limit switch, if any.
    pub high_switch: Option<f64>,
    /// Raw position of the negative limit switch, if any.
    pub low_switch: Option<f64>,
    /// Stop this many steps short of the target on arrival.
    pub stall_steps: f64,
    /// How many arrivals stall before the axis lands exactly.
    pub stall_repeats: u32,
    /// Reject raw limit values beyond this magnitude, reporting the
    /// clamped value (exercises the controller-veto path).
    pub reject_limits_beyond: Option<f64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            initial_position: 0.0,
            encoder_present: false,
            encoder_scale: 1.0,
            gain_support: false,
            high_switch: None,
            low_switch: None,
            stall_steps: 0.0,
            stall_repeats: 0,
            reject_limits_beyond: None,
        }
    }
}

/// Mutable simulator state shared between controller and handle.
#[derive(Debug)]
struct SimState {
    cfg: SimConfig,
    /// Current raw position [steps].
    position: f64,
    /// Commanded target [steps].
    target: f64,
    /// Slew velocity [steps/s].
    velocity: f64,
    /// Base velocity [steps/s].
    base_velocity: f64,
    /// Acceleration [steps/s²] (recorded; motion is velocity-limited).
    accel: f64,
    /// Active jog velocity, signed [steps/s].
    jog: Option<f64>,
    /// Homing direction staged by a home command (true = forward).
    pending_home: Option<bool>,
    /// Target staged by a move command, executed on GO.
    pending_target: Option<f64>,
    /// Axis is in motion.
    moving: bool,
    /// Homing motion underway.
    homing: bool,
    /// Home position reached.
    at_home: bool,
    /// Last motion direction was positive.
    direction_positive: bool,
    /// Positive/negative limit switch engaged.
    plus_ls: bool,
    minus_ls: bool,
    /// An asynchronous callback is waiting to be observed.
    callback_pending: bool,
    /// Remaining stalled arrivals.
    stalls_left: u32,
    /// Every transaction received, in order.
    transactions: Vec<Transaction>,
}

impl SimState {
    fn new(cfg: SimConfig) -> Self {
        Self {
            position: cfg.initial_position,
            target: cfg.initial_position,
            velocity: 0.0,
            base_velocity: 0.0,
            accel: 0.0,
            jog: None,
            pending_home: None,
            pending_target: None,
            moving: false,
            homing: false,
            at_home: false,
            direction_positive: true,
            plus_ls: false,
            minus_ls: false,
            callback_pending: false,
            stalls_left: cfg.stall_repeats,
            transactions: Vec::new(),
            cfg,
        }
    }

    fn flags(&self) -> StatusFlags {
        let mut flags = StatusFlags::empty();
        if !self.moving {
            flags |= StatusFlags::DONE;
        }
        if self.direction_positive {
            flags |= StatusFlags::DIRECTION_POSITIVE;
        }
        if self.plus_ls {
            flags |= StatusFlags::PLUS_LS;
        }
        if self.minus_ls {
            flags |= StatusFlags::MINUS_LS;
        }
        if self.at_home {
            flags |= StatusFlags::HOME_SWITCH | StatusFlags::ENCODER_HOME;
        }
        if self.cfg.encoder_present {
            flags |= StatusFlags::ENCODER_PRESENT;
        }
        if self.cfg.gain_support {
            flags |= StatusFlags::GAIN_SUPPORT;
        }
        flags
    }

    fn check_switches(&mut self) {
        self.plus_ls = self
            .cfg
            .high_switch
            .is_some_and(|limit| self.position >= limit);
        self.minus_ls = self
            .cfg
            .low_switch
            .is_some_and(|limit| self.position <= limit);
        if self.plus_ls || self.minus_ls {
            // A limit switch kills any motion.
            self.jog = None;
            self.homing = false;
            if self.moving {
                self.moving = false;
                self.target = self.position;
                self.callback_pending = true;
            }
        }
    }

    fn advance(&mut self, dt: f64) {
        let was_moving = self.moving || self.jog.is_some();

        if let Some(v) = self.jog {
            self.position += v * dt;
            self.direction_positive = v >= 0.0;
            self.moving = true;
        } else if self.moving {
            let remaining = self.target - self.position;
            let speed = if self.velocity > 0.0 {
                self.velocity
            } else {
                self.base_velocity.max(1.0)
            };
            let step = speed * dt;
            if remaining.abs() <= step {
                // Arrived; possibly short by the configured stall.
                let stall = if self.stalls_left > 0 {
                    self.stalls_left -= 1;
                    self.cfg.stall_steps
                } else {
                    0.0
                };
                self.position = self.target - stall * remaining.signum();
                self.moving = false;
                if self.homing {
                    self.homing = false;
                    self.at_home = true;
                }
            } else {
                self.position += step * remaining.signum();
                self.direction_positive = remaining >= 0.0;
            }
        }

        self.check_switches();

        if self.moving || self.jog.is_some() || was_moving {
            self.callback_pending = true;
        }
        trace!(
            pos = self.position,
            target = self.target,
            moving = self.moving,
            "sim tick"
        );
    }

    fn apply(&mut self, index: usize, cmd: &Command) -> Result<(), CommandRejected> {
        match *cmd {
            Command::StopAxis => {
                self.jog = None;
                self.pending_home = None;
                self.pending_target = None;
                self.homing = false;
                // Cooperative stop: the axis coasts to the current
                // position and reports the stop on a later callback.
                self.target = self.position;
            }
            Command::SetVelBase(v) => self.base_velocity = v,
            Command::SetVelocity(v) => self.velocity = v,
            Command::SetAccel(a) => self.accel = a,
            Command::MoveAbs(p) => self.pending_target = Some(p),
            Command::MoveRel(d) => self.pending_target = Some(self.position + d),
            Command::Go => {
                if let Some(dir) = self.pending_home.take() {
                    self.target = 0.0;
                    self.homing = true;
                    self.at_home = false;
                    self.moving = true;
                    self.direction_positive = dir;
                } else if let Some(target) = self.pending_target.take() {
                    self.target = target;
                    self.moving = true;
                    self.direction_positive = target >= self.position;
                }
            }
            Command::HomeForward(_) => self.pending_home = Some(true),
            Command::HomeReverse(_) => self.pending_home = Some(false),
            Command::Jog(v) | Command::JogVelocity(v) => {
                self.jog = Some(v);
            }
            Command::LoadPos(p) => {
                self.position = p;
                self.target = p;
                self.callback_pending = true;
            }
            Command::GetInfo => self.callback_pending = true,
            Command::SetEncRatio { .. } => {}
            Command::SetHighLimit(raw) | Command::SetLowLimit(raw) => {
                if let Some(max) = self.cfg.reject_limits_beyond {
                    if raw.abs() > max {
                        let fallback = max * raw.signum();
                        debug!(raw, fallback, "sim rejected limit value");
                        return Err(CommandRejected { index, fallback });
                    }
                }
            }
            Command::SetPGain(_)
            | Command::SetIGain(_)
            | Command::SetDGain(_)
            | Command::EnableTorque
            | Command::DisableTorque => {}
        }
        Ok(())
    }
}

/// Controller half handed to the engine.
pub struct SimController {
    shared: Arc<Mutex<SimState>>,
}

/// Test-side handle sharing the controller state.
#[derive(Clone)]
pub struct SimHandle {
    shared: Arc<Mutex<SimState>>,
}

/// Create a simulator pair from the given configuration.
pub fn simulator(cfg: SimConfig) -> (SimController, SimHandle) {
    let shared = Arc::new(Mutex::new(SimState::new(cfg)));
    (
        SimController {
            shared: shared.clone(),
        },
        SimHandle { shared },
    )
}

impl MotorController for SimController {
    fn update(&mut self) -> StatusUpdate {
        let mut state = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        let callback = std::mem::take(&mut state.callback_pending);
        StatusUpdate {
            callback,
            flags: state.flags(),
            motor_steps: state.position.round() as i64,
            encoder_steps: (state.position * state.cfg.encoder_scale).round() as i64,
        }
    }

    fn transact(&mut self, txn: Transaction) -> Result<(), CommandRejected> {
        let mut state = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        state.transactions.push(txn.clone());
        for (index, cmd) in txn.commands().iter().enumerate() {
            state.apply(index, cmd)?;
        }
        Ok(())
    }
}

impl SimHandle {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Advance simulated time by `dt` seconds.
    pub fn tick(&self, dt: f64) {
        self.lock().advance(dt);
    }

    /// Advance until motion stops or `max_ticks` elapse. Returns the
    /// number of ticks taken.
    pub fn run_until_stopped(&self, dt: f64, max_ticks: usize) -> usize {
        for i in 0..max_ticks {
            self.tick(dt);
            let state = self.lock();
            if !state.moving && state.jog.is_none() {
                return i + 1;
            }
        }
        max_ticks
    }

    /// Current raw position [steps].
    pub fn position(&self) -> f64 {
        self.lock().position
    }

    /// Override the raw position (readback glitch injection).
    pub fn set_position(&self, position: f64) {
        let mut state = self.lock();
        state.position = position;
        state.callback_pending = true;
    }

    /// Whether the axis is in motion.
    pub fn moving(&self) -> bool {
        let state = self.lock();
        state.moving || state.jog.is_some()
    }

    /// Force a callback on the next status refresh.
    pub fn push_callback(&self) {
        self.lock().callback_pending = true;
    }

    /// All transactions received so far.
    pub fn transactions(&self) -> Vec<Transaction> {
        self.lock().transactions.clone()
    }

    /// All commands received so far, flattened in order.
    pub fn commands(&self) -> Vec<Command> {
        self.lock()
            .transactions
            .iter()
            .flat_map(|t| t.commands().iter().copied())
            .collect()
    }

    /// Number of transactions received.
    pub fn transaction_count(&self) -> usize {
        self.lock().transactions.len()
    }

    /// Forget recorded transactions.
    pub fn clear_transactions(&self) {
        self.lock().transactions.clear();
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn send(sim: &SimHandle, controller: &mut SimController, cmds: &[Command]) {
        let mut txn = Transaction::begin();
        for cmd in cmds {
            txn.push(*cmd);
        }
        controller.transact(txn).unwrap();
        let _ = sim;
    }

    #[test]
    fn move_completes_and_signals_callback() {
        let (mut controller, sim) = simulator(SimConfig::default());
        send(
            &sim,
            &mut controller,
            &[
                Command::SetVelocity(100.0),
                Command::MoveAbs(250.0),
                Command::Go,
            ],
        );
        assert!(sim.moving());
        let ticks = sim.run_until_stopped(1.0, 100);
        assert!(ticks <= 4, "took {ticks} ticks");
        assert_eq!(sim.position(), 250.0);

        let update = controller.update();
        assert!(update.callback);
        assert!(update.flags.contains(StatusFlags::DONE));
        assert_eq!(update.motor_steps, 250);
    }

    #[test]
    fn stop_confirms_on_a_later_callback() {
        let (mut controller, sim) = simulator(SimConfig::default());
        send(
            &sim,
            &mut controller,
            &[
                Command::SetVelocity(10.0),
                Command::MoveAbs(1000.0),
                Command::Go,
            ],
        );
        sim.tick(1.0);
        send(&sim, &mut controller, &[Command::StopAxis]);
        assert!(sim.moving());
        sim.tick(1.0);
        assert!(!sim.moving());
        let update = controller.update();
        assert!(update.callback);
        assert!(update.flags.contains(StatusFlags::DONE));
    }

    #[test]
    fn jog_runs_until_stopped() {
        let (mut controller, sim) = simulator(SimConfig::default());
        send(
            &sim,
            &mut controller,
            &[Command::SetAccel(50.0), Command::Jog(-20.0)],
        );
        sim.tick(1.0);
        sim.tick(1.0);
        assert_eq!(sim.position(), -40.0);
        send(&sim, &mut controller, &[Command::StopAxis]);
        sim.tick(1.0);
        assert!(!sim.moving());
    }

    #[test]
    fn limit_switch_kills_motion() {
        let (mut controller, sim) = simulator(SimConfig {
            high_switch: Some(100.0),
            ..SimConfig::default()
        });
        send(
            &sim,
            &mut controller,
            &[
                Command::SetVelocity(60.0),
                Command::MoveAbs(500.0),
                Command::Go,
            ],
        );
        sim.run_until_stopped(1.0, 20);
        let update = controller.update();
        assert!(update.flags.contains(StatusFlags::PLUS_LS));
        assert!(update.flags.contains(StatusFlags::DONE));
    }

    #[test]
    fn stall_short_of_target_then_land() {
        let (mut controller, sim) = simulator(SimConfig {
            stall_steps: 10.0,
            stall_repeats: 1,
            ..SimConfig::default()
        });
        send(
            &sim,
            &mut controller,
            &[
                Command::SetVelocity(100.0),
                Command::MoveAbs(200.0),
                Command::Go,
            ],
        );
        sim.run_until_stopped(1.0, 20);
        assert_eq!(sim.position(), 190.0);

        // Retry lands exactly.
        send(
            &sim,
            &mut controller,
            &[Command::MoveAbs(200.0), Command::Go],
        );
        sim.run_until_stopped(1.0, 20);
        assert_eq!(sim.position(), 200.0);
    }

    #[test]
    fn homing_sets_home_flag() {
        let (mut controller, sim) = simulator(SimConfig {
            initial_position: 300.0,
            ..SimConfig::default()
        });
        send(
            &sim,
            &mut controller,
            &[
                Command::SetVelBase(10.0),
                Command::SetVelocity(150.0),
                Command::HomeReverse(0.0),
                Command::Go,
            ],
        );
        sim.run_until_stopped(1.0, 20);
        assert_eq!(sim.position(), 0.0);
        let update = controller.update();
        assert!(update.flags.contains(StatusFlags::HOME_SWITCH));
    }

    #[test]
    fn rejects_out_of_range_limit() {
        let (mut controller, _sim) = simulator(SimConfig {
            reject_limits_beyond: Some(1000.0),
            ..SimConfig::default()
        });
        let mut txn = Transaction::begin();
        txn.push(Command::SetHighLimit(5000.0));
        let err = controller.transact(txn).unwrap_err();
        assert_eq!(err.index, 0);
        assert_eq!(err.fallback, 1000.0);
    }

    #[test]
    fn load_pos_reloads_position_register() {
        let (mut controller, sim) = simulator(SimConfig::default());
        let mut txn = Transaction::begin();
        txn.push(Command::LoadPos(4242.0));
        controller.transact(txn).unwrap();
        assert_eq!(sim.position(), 4242.0);
        let update = controller.update();
        assert!(update.callback);
        assert_eq!(update.motor_steps, 4242);
    }
}
