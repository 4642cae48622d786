//! The Simulation driver: the `init -> step* -> clean` lifecycle that
//! ties the Model, pacing systems, and solver façade together into one
//! runnable simulation (spec.md §4.5).
//!
//! Directly descended from `vicseksim-rs`'s `simulation::Simulation`:
//! the same `run()`/`step()` split and `stop_flag`-style cooperative
//! cancellation, repurposed here to drive a cardiac cell model instead
//! of a flock of boids.

pub mod tests;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::error::{EngineError, EngineResult};
use crate::logging::{FloatSink, MatrixSink, TupleSink};
use crate::model::{Model, SensitivityIndependent};
use crate::pacing::{PacingProtocol, PacingSystem};
use crate::solver::{RootConfig, Solver, SolverConfig};

/// Process-wide exclusivity guard (spec.md §5: "a running simulation is
/// a process-wide singleton").
static ENGINE_RUNNING: AtomicBool = AtomicBool::new(false);

/// Every 100 completed iterations the driver yields to the host
/// (spec.md §4.5 step 10).
const HOST_YIELD_PERIOD: u64 = 100;

/// Consecutive zero-length steps before the driver gives up
/// (spec.md §4.5 step 3).
const MAX_ZERO_STEPS: u32 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimState {
    Idle,
    Initialized,
    Running,
}

enum LogMode {
    Dynamic,
    Periodic(f64),
    PointList,
}

/// Everything `init` needs in one place, mirroring spec.md §4.5 step 1's
/// 17-argument parameter list.
pub struct SimulationConfig {
    pub tmin: f64,
    pub tmax: f64,
    pub state: Vec<f64>,
    pub s_state: Vec<Vec<f64>>,
    pub literals: Vec<f64>,
    pub parameters: Vec<f64>,
    pub protocols: Vec<PacingProtocol>,
    pub log_descriptor: Vec<(String, Box<dyn FloatSink>)>,
    pub log_interval: f64,
    pub log_times: Option<Vec<f64>>,
    pub sensitivities: Option<(Vec<SensitivityIndependent>, Box<dyn MatrixSink>)>,
    pub rf_index: Option<String>,
    pub rf_threshold: f64,
    pub rf_sink: Option<Box<dyn TupleSink>>,
    pub log_realtime: bool,
    pub solver: SolverConfig,
}

pub struct Simulation {
    state: SimState,
    model: Model,
    pacing: Vec<PacingSystem>,
    solver: Solver,
    sensitivities_enabled: bool,

    tmin: f64,
    tmax: f64,
    t: f64,
    tnext: f64,

    log_mode: LogMode,
    tnext_log: f64,
    log_times: Vec<f64>,
    log_times_cursor: usize,
    log_realtime: bool,
    periodic_log_index: u64,

    rf_sink: Option<Box<dyn TupleSink>>,

    zero_step_count: u32,
    iteration_count: u64,
    steps_completed: u64,

    start: Option<Instant>,
    cancel: Arc<AtomicBool>,

    bound_out: Vec<f64>,
}

impl Simulation {
    /// A fresh, unarmed driver. Call [`Simulation::init`] before
    /// [`Simulation::step`].
    pub fn new() -> Self {
        Simulation {
            state: SimState::Idle,
            model: Model::create().expect("model allocation never fails in practice"),
            pacing: Vec::new(),
            solver: Solver::new(SolverConfig::default(), 0),
            sensitivities_enabled: false,
            tmin: 0.0,
            tmax: 0.0,
            t: 0.0,
            tnext: f64::INFINITY,
            log_mode: LogMode::Dynamic,
            tnext_log: 0.0,
            log_times: Vec::new(),
            log_times_cursor: 0,
            log_realtime: false,
            periodic_log_index: 0,
            rf_sink: None,
            zero_step_count: 0,
            iteration_count: 0,
            steps_completed: 0,
            start: None,
            cancel: Arc::new(AtomicBool::new(false)),
            bound_out: Vec::new(),
        }
    }

    /// A clone of the cooperative-cancellation flag; the host sets this
    /// from another thread to request an abort at the next yield point.
    pub fn cancellation_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// spec.md §4.5 `init`: parses the 17-argument config, arms the
    /// model/pacing/solver, binds logging, and performs the precision
    /// sanity check. Fails with [`EngineError::AlreadyRunning`] if a
    /// simulation is already running anywhere in the process.
    pub fn init(&mut self, config: SimulationConfig) -> EngineResult<()> {
        if ENGINE_RUNNING
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EngineError::AlreadyRunning);
        }

        // Step 2: determine logging mode.
        let log_mode = if config.log_interval <= 0.0 && config.log_times.is_none() {
            LogMode::Dynamic
        } else if config.log_interval > 0.0 {
            LogMode::Periodic(config.log_interval)
        } else {
            LogMode::PointList
        };
        if let LogMode::PointList = log_mode {
            let times = config.log_times.clone().unwrap_or_default();
            for window in times.windows(2) {
                if window[1] < window[0] {
                    ENGINE_RUNNING.store(false, Ordering::SeqCst);
                    return Err(EngineError::Value(
                        "log_times must be non-decreasing".to_string(),
                    ));
                }
            }
        }

        // Step 3: create/populate the Model.
        let mut model = Model::create()?;
        model.set_literals(&config.literals)?;
        model.set_parameters(&config.parameters)?;
        model.setup_pacing(config.protocols.len());
        model.set_states(&config.state)?;

        // Step 4: construct pacing systems and the initial tnext.
        let result = (|| -> EngineResult<Vec<PacingSystem>> {
            config
                .protocols
                .iter()
                .map(PacingSystem::from_protocol)
                .collect()
        })();
        let pacing = match result {
            Ok(p) => p,
            Err(e) => {
                ENGINE_RUNNING.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        let tnext = pacing
            .iter()
            .map(PacingSystem::next_time)
            .fold(config.tmax, f64::min);

        // Step 5: solver setup, sensitivities, root finding.
        let mut solver = Solver::new(config.solver, model.n_states());
        let sensitivities_enabled = config.sensitivities.is_some();
        if let Some((independents, sink)) = config.sensitivities {
            model.setup_sensitivities(independents);
            solver.enable_sensitivities(model.ns_independents());
            model.bind_sensitivity_sink(sink)?;
            for (k, row) in config.s_state.iter().enumerate() {
                model.set_state_sensitivities(k, row);
            }
        }

        let rf_sink = if let Some(name) = &config.rf_index {
            let index = match model.resolve_variable(name) {
                Some(crate::logging::VariableRef::State(i)) => i,
                _ => {
                    ENGINE_RUNNING.store(false, Ordering::SeqCst);
                    return Err(EngineError::Value(format!(
                        "root-finding index '{name}' does not name a state variable"
                    )));
                }
            };
            solver.set_root(RootConfig {
                state_index: index,
                threshold: config.rf_threshold,
            });
            config.rf_sink
        } else {
            solver.clear_root();
            None
        };

        // Step 6: bind logging sinks; precision sanity check (periodic mode only —
        // dynamic and point-list modes carry `log_interval == 0.0`, which would
        // otherwise always trip this check).
        model.initialize_logging(config.log_descriptor)?;
        if matches!(log_mode, LogMode::Periodic(_)) && config.tmax + config.log_interval == config.tmax {
            ENGINE_RUNNING.store(false, Ordering::SeqCst);
            return Err(EngineError::Value(
                "log_interval is too small relative to tmax to make progress".to_string(),
            ));
        }

        solver.seed(config.tmin, &config.state, &mut model, &pacing)?;

        self.model = model;
        self.pacing = pacing;
        self.solver = solver;
        self.sensitivities_enabled = sensitivities_enabled;
        self.tmin = config.tmin;
        self.tmax = config.tmax;
        self.t = config.tmin;
        self.tnext = tnext;
        self.log_times = config.log_times.unwrap_or_default();
        self.log_times_cursor = 0;
        self.tnext_log = match &log_mode {
            LogMode::PointList => self.log_times.first().copied().unwrap_or(config.tmin),
            _ => config.tmin,
        };
        self.log_mode = log_mode;
        self.periodic_log_index = 0;
        self.log_realtime = config.log_realtime;
        self.rf_sink = rf_sink;
        self.zero_step_count = 0;
        self.iteration_count = 0;
        self.steps_completed = 0;
        self.start = Some(Instant::now());
        self.bound_out.clear();
        self.state = SimState::Initialized;

        // Step 7: dynamic mode logs tmin immediately — every `init` binds a
        // fresh set of sinks, so the first logged time is always tmin.
        if matches!(self.log_mode, LogMode::Dynamic) {
            self.model.evaluate_derivatives()?;
            self.model.log()?;
        }

        Ok(())
    }

    fn realtime(&self) -> f64 {
        if self.log_realtime {
            self.start
                .map(|i| i.elapsed().as_secs_f64())
                .unwrap_or(0.0)
        } else {
            0.0
        }
    }

    /// Advances `tnext_log`. For periodic mode this is `tmin + index *
    /// interval` computed from a checked integer index rather than
    /// repeated float addition, so spec.md §7's `OverflowError` ("periodic
    /// log index wraps") has something concrete to detect.
    fn next_log_time(&mut self) -> EngineResult<f64> {
        match &self.log_mode {
            LogMode::Dynamic => Ok(f64::INFINITY),
            LogMode::Periodic(interval) => {
                self.periodic_log_index =
                    self.periodic_log_index.checked_add(1).ok_or_else(|| {
                        EngineError::Overflow("periodic log index wrapped".to_string())
                    })?;
                Ok(self.tmin + self.periodic_log_index as f64 * interval)
            }
            LogMode::PointList => {
                self.log_times_cursor += 1;
                Ok(self
                    .log_times
                    .get(self.log_times_cursor)
                    .copied()
                    .unwrap_or(f64::INFINITY))
            }
        }
    }

    /// Advances the simulation one solver step, returning the progress
    /// time or `None` once the run has reached `tmax` (spec.md §4.5
    /// `step`). Must be called only after [`Simulation::init`].
    pub fn step(&mut self) -> EngineResult<Option<f64>> {
        if self.state != SimState::Initialized && self.state != SimState::Running {
            return Err(EngineError::NotInitialized);
        }
        self.state = SimState::Running;

        if self.t >= self.tmax {
            return Ok(None);
        }

        // Step 1: save ylast/tlast.
        let tlast = self.t;

        // Step 2: advance the solver one step toward tnext.
        let reached = self
            .solver
            .advance_one_step(self.tnext, &mut self.model, &self.pacing)?;
        let mut t = reached;

        // Step 3: zero-length step bookkeeping. Individual zero-length
        // steps are a solver warning (spec.md §7: "do not abort"); only
        // the 500th consecutive one is a hard error.
        if t == tlast {
            self.zero_step_count += 1;
            log::warn!(
                "zero-length solver step at t={tlast} ({}/{MAX_ZERO_STEPS} consecutive)",
                self.zero_step_count
            );
            if self.zero_step_count >= MAX_ZERO_STEPS {
                return Err(EngineError::Arithmetic(format!(
                    "{MAX_ZERO_STEPS} consecutive zero-length solver steps"
                )));
            }
        } else {
            self.zero_step_count = 0;
        }

        // Step 4: overshoot / root handling.
        let mut reinit_needed = false;
        if t > self.tnext {
            t = self.tnext;
            reinit_needed = true;
        } else if let Some((root_t, direction)) = self.solver.find_root_in_last_step() {
            if let Some(sink) = &mut self.rf_sink {
                sink.append_root(root_t, direction)
                    .map_err(EngineError::LogAppendFailed)?;
            }
        }

        // Step 5: interpolated logging over [tlast, t), half-open.
        if !matches!(self.log_mode, LogMode::Dynamic) {
            while self.tnext_log < t {
                let tlog = self.tnext_log;
                let dense: Vec<f64> = (0..self.model.n_states())
                    .map(|i| self.solver.dense_state(i, tlog))
                    .collect();
                self.model.set_states(&dense)?;
                let pace: Vec<f64> = self.pacing.iter().map(|p| p.level(tlog)).collect();
                self.model
                    .set_bound(tlog, &pace, self.realtime(), self.solver.evaluations())?;
                self.model.evaluate_derivatives()?;
                if self.sensitivities_enabled {
                    self.solver.write_sensitivities_into(&mut self.model);
                    self.model.evaluate_sensitivity_outputs()?;
                }
                self.model.log()?;
                if self.sensitivities_enabled {
                    self.model.log_sensitivity_matrix()?;
                }
                self.tnext_log = self.next_log_time()?;
            }
        }

        // Step 6: advance event pacing systems to t; recompute tnext.
        for p in &mut self.pacing {
            p.advance(t);
        }
        self.tnext = self
            .pacing
            .iter()
            .map(PacingSystem::next_time)
            .fold(self.tmax, f64::min);

        // Step 7: dynamic-mode logging.
        if matches!(self.log_mode, LogMode::Dynamic) {
            let states = self.solver.states().to_vec();
            self.model.set_states(&states)?;
            let pace: Vec<f64> = self.pacing.iter().map(|p| p.level(t)).collect();
            self.model
                .set_bound(t, &pace, self.realtime(), self.solver.evaluations())?;
            if self.model.logging_requires_rhs_evaluation() {
                self.model.evaluate_derivatives()?;
            }
            self.model.log()?;
            if self.sensitivities_enabled {
                self.solver.write_sensitivities_into(&mut self.model);
                self.model.evaluate_sensitivity_outputs()?;
                self.model.log_sensitivity_matrix()?;
            }
        }

        // Step 8: reinit if we clamped to a discontinuity.
        if reinit_needed {
            let states = (0..self.model.n_states())
                .map(|i| self.solver.dense_state(i, t))
                .collect::<Vec<_>>();
            self.solver.seed(t, &states, &mut self.model, &self.pacing)?;
            self.solver.reset_step_size();
        }

        self.t = t;
        self.steps_completed += 1;

        // Step 9: termination check (tolerant of float drift near tmax).
        if (self.tmax - self.t).abs() <= 1.0e-9 * self.tmax.abs().max(1.0) {
            self.t = self.tmax;
        }

        // Step 10: host yield / cancellation check.
        self.iteration_count += 1;
        if self.cancel.load(Ordering::SeqCst) {
            self.clean();
            return Err(EngineError::Cancelled);
        }
        if self.t >= self.tmax {
            self.finalize();
            return Ok(None);
        }
        if self.iteration_count % HOST_YIELD_PERIOD == 0 {
            return Ok(Some(self.t));
        }
        Ok(Some(self.t))
    }

    /// Runs to completion, ignoring the host-yield progress values.
    pub fn run(&mut self) -> EngineResult<()> {
        while self.step()?.is_some() {}
        Ok(())
    }

    fn finalize(&mut self) {
        self.bound_out = vec![self.t, self.realtime(), self.solver.evaluations() as f64];
        self.bound_out
            .extend(self.pacing.iter().map(|p| p.level(self.t)));
        self.clean();
    }

    /// Final `[t, realtime, evaluations, pace_0, pace_1, ...]` snapshot
    /// from the last completed run (spec.md §4.5 finalization).
    pub fn bound_out(&self) -> &[f64] {
        &self.bound_out
    }

    pub fn number_of_steps(&self) -> u64 {
        self.steps_completed
    }

    pub fn number_of_evaluations(&self) -> u64 {
        self.solver.evaluations()
    }

    pub fn time(&self) -> f64 {
        self.t
    }

    pub fn tmin(&self) -> f64 {
        self.tmin
    }

    pub fn tmax(&self) -> f64 {
        self.tmax
    }

    pub fn is_running(&self) -> bool {
        self.state != SimState::Idle
    }

    /// Idempotent teardown. Safe to call on an already-clean driver.
    pub fn clean(&mut self) {
        if self.state == SimState::Idle {
            return;
        }
        self.model.deinitialize_logging();
        self.state = SimState::Idle;
        ENGINE_RUNNING.store(false, Ordering::SeqCst);
    }
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        self.clean();
    }
}
