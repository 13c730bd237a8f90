//! Shared fixtures for unit tests: recording collaborators and an
//! engine wired to the simulator.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use axis_common::config::AxisConfig;
use axis_common::driver::{FieldPublisher, SettleTimer};
use axis_common::fields::{Field, FieldValue};
use axis_common::types::{AlarmCondition, Severity};
use axis_sim::{SimConfig, SimHandle, simulator};

use crate::engine::{Engine, Links};

/// Publisher capturing every notification; clones share the buffers.
#[derive(Default, Clone)]
pub(crate) struct RecordingPublisher {
    pub events: Arc<Mutex<Vec<(Field, FieldValue)>>>,
    pub readbacks: Arc<Mutex<Vec<f64>>>,
    pub forwards: Arc<Mutex<usize>>,
    pub alarms: Arc<Mutex<Vec<(AlarmCondition, Severity)>>>,
}

impl RecordingPublisher {
    pub fn values_for(&self, field: Field) -> Vec<FieldValue> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(f, _)| *f == field)
            .map(|(_, v)| *v)
            .collect()
    }

    pub fn last(&self, field: Field) -> Option<FieldValue> {
        self.values_for(field).last().copied()
    }

    pub fn forward_count(&self) -> usize {
        *self.forwards.lock().unwrap()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
        self.readbacks.lock().unwrap().clear();
        self.alarms.lock().unwrap().clear();
        *self.forwards.lock().unwrap() = 0;
    }
}

impl FieldPublisher for RecordingPublisher {
    fn field_changed(&mut self, field: Field, value: FieldValue) {
        self.events.lock().unwrap().push((field, value));
    }

    fn readback_link(&mut self, value: f64) {
        self.readbacks.lock().unwrap().push(value);
    }

    fn forward_link(&mut self) {
        *self.forwards.lock().unwrap() += 1;
    }

    fn alarm(&mut self, condition: AlarmCondition, severity: Severity) {
        self.alarms.lock().unwrap().push((condition, severity));
    }
}

/// Timer recording every arm request; clones share the buffer.
#[derive(Default, Clone)]
pub(crate) struct RecordingTimer {
    pub arms: Arc<Mutex<Vec<(f64, u64)>>>,
}

impl RecordingTimer {
    pub fn armed(&self) -> Vec<(f64, u64)> {
        self.arms.lock().unwrap().clone()
    }
}

impl SettleTimer for RecordingTimer {
    fn arm(&mut self, seconds: f64, generation: u64) {
        self.arms.lock().unwrap().push((seconds, generation));
    }
}

/// Timer that drops every arm request.
pub(crate) struct NullTimer;

impl SettleTimer for NullTimer {
    fn arm(&mut self, _seconds: f64, _generation: u64) {}
}

/// Engine wired to a default simulator.
pub(crate) fn new_engine(
    configure: impl FnOnce(&mut AxisConfig),
) -> (Engine, SimHandle, RecordingPublisher, RecordingTimer) {
    new_engine_with_sim(SimConfig::default(), configure)
}

/// Engine wired to a simulator with the given configuration.
pub(crate) fn new_engine_with_sim(
    sim_cfg: SimConfig,
    configure: impl FnOnce(&mut AxisConfig),
) -> (Engine, SimHandle, RecordingPublisher, RecordingTimer) {
    let mut cfg = AxisConfig::default();
    configure(&mut cfg);
    let (controller, sim) = simulator(sim_cfg);
    let publisher = RecordingPublisher::default();
    let timer = RecordingTimer::default();
    let engine = Engine::new(
        &cfg,
        Box::new(controller),
        Box::new(publisher.clone()),
        Box::new(timer.clone()),
        Links::default(),
    )
    .expect("engine construction");
    (engine, sim, publisher, timer)
}
