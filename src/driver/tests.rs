//! Unit tests for the `Simulation` lifecycle (spec.md §4.5, §8).
//!
//! These exercise the driver's bookkeeping (logging-mode selection,
//! singleton guard, cancellation, argument validation) rather than the
//! model's numerical behavior, which `tests/scenarios.rs` covers
//! end-to-end against the compiled-in cell model.

#![cfg(test)]

use super::*;
use crate::model::definition;
use crate::pacing::event::EventRecord;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Mutex;

// `ENGINE_RUNNING` is process-wide; serialize the tests that touch it so
// they don't race across cargo's default parallel test threads.
static TEST_LOCK: Mutex<()> = Mutex::new(());

struct VecSink(Rc<RefCell<Vec<f64>>>);
impl FloatSink for VecSink {
    fn append(&mut self, value: f64) -> Result<(), String> {
        self.0.borrow_mut().push(value);
        Ok(())
    }
}

fn base_config(tmax: f64) -> SimulationConfig {
    let log = Rc::new(RefCell::new(Vec::new()));
    SimulationConfig {
        tmin: 0.0,
        tmax,
        state: definition::STATE_DEFAULTS.to_vec(),
        s_state: Vec::new(),
        literals: definition::LITERAL_DEFAULTS.to_vec(),
        parameters: definition::PARAMETER_DEFAULTS.to_vec(),
        protocols: vec![PacingProtocol::Event(vec![])],
        log_descriptor: vec![(
            "engine.time".to_string(),
            Box::new(VecSink(log)) as Box<dyn FloatSink>,
        )],
        log_interval: 1.0,
        log_times: None,
        sensitivities: None,
        rf_index: None,
        rf_threshold: 0.0,
        rf_sink: None,
        log_realtime: false,
        solver: SolverConfig::default(),
    }
}

#[test]
fn init_then_clean_releases_the_process_singleton() {
    let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let mut sim = Simulation::new();
    sim.init(base_config(2.0)).unwrap();
    assert!(sim.is_running());
    sim.clean();
    assert!(!sim.is_running());

    let mut other = Simulation::new();
    other.init(base_config(2.0)).unwrap();
    other.clean();
}

#[test]
fn double_init_without_clean_fails() {
    let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let mut sim = Simulation::new();
    sim.init(base_config(2.0)).unwrap();

    let mut other = Simulation::new();
    let result = other.init(base_config(2.0));
    assert!(matches!(result, Err(EngineError::AlreadyRunning)));

    sim.clean();
}

#[test]
fn non_monotonic_log_times_are_rejected() {
    let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let mut config = base_config(2.0);
    config.log_interval = 0.0;
    config.log_times = Some(vec![0.0, 5.0, 3.0]);
    let mut sim = Simulation::new();
    let result = sim.init(config);
    assert!(matches!(result, Err(EngineError::Value(_))));
    // A rejected init must not leave the singleton held.
    let mut other = Simulation::new();
    other.init(base_config(2.0)).unwrap();
    other.clean();
}

#[test]
fn cancellation_flag_aborts_the_run() {
    let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let mut sim = Simulation::new();
    sim.init(base_config(1000.0)).unwrap();
    let cancel = sim.cancellation_handle();
    cancel.store(true, std::sync::atomic::Ordering::SeqCst);
    let result = sim.step();
    assert!(matches!(result, Err(EngineError::Cancelled)));
    assert!(!sim.is_running());
}

#[test]
fn tnext_starts_at_the_first_event_discontinuity() {
    let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let mut config = base_config(500.0);
    config.protocols = vec![PacingProtocol::Event(vec![EventRecord {
        start: 10.0,
        duration: 2.0,
        period: 0.0,
        multiplier: 0.0,
        level: 1.0,
    }])];
    let mut sim = Simulation::new();
    sim.init(config).unwrap();
    assert_eq!(sim.tnext, 10.0);
    sim.clean();
}

#[test]
fn periodic_log_index_overflow_is_reported() {
    let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let mut config = base_config(2.0);
    config.log_interval = 1.0;
    let mut sim = Simulation::new();
    sim.init(config).unwrap();
    sim.periodic_log_index = u64::MAX;
    let result = sim.next_log_time();
    assert!(matches!(result, Err(EngineError::Overflow(_))));
    sim.clean();
}
