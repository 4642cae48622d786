//! The Model: owns all numerical state of one cardiac cell instance and
//! exposes pure-function-style updates and evaluators (spec.md §4.1).
//!
//! A single `Model` has one logical lifecycle, `create -> (configure
//! inputs -> evaluate*)* -> destroy`, and is the exclusive owner of its
//! storage. An integrator holds only a borrowed reference and mutates it
//! through the published operations below.

pub mod definition;
pub mod tests;

use crate::error::{EngineError, EngineResult};
use crate::logging::{self, FloatSink, LoggingSubstrate, MatrixSink, VariableRef};
use definition::{
    N_INTERMEDIARY, N_LITERALS, N_LITERAL_DERIVED, N_PARAMETERS, N_PARAMETER_DERIVED, N_STATES,
};
use nalgebra::DMatrix;

/// Which array a forward-sensitivity independent refers to (spec.md §9's
/// redesign of the source's raw-pointer `s_independents`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensitivityIndependentKind {
    Parameter,
    State,
}

#[derive(Debug, Clone, Copy)]
pub struct SensitivityIndependent {
    pub kind: SensitivityIndependentKind,
    pub slot: usize,
}

/// External inputs to the Model: time, pacing vector, and diagnostics
/// supplied by the host/driver.
#[derive(Debug, Clone, Default)]
pub struct Bound {
    pub time: f64,
    pub pace_values: Vec<f64>,
    pub realtime: f64,
    pub evaluations: u64,
}

/// A step in a finite-difference perturbation, scaled by `pbar` as
/// spec.md §4.4 requires (`pbar[i] = max(|p_i|, 1)`).
const RELATIVE_STEP: f64 = 1.0e-6;

pub struct Model {
    states: [f64; N_STATES],
    derivatives: [f64; N_STATES],
    intermediary: [f64; N_INTERMEDIARY],
    bound: Bound,

    literals: [f64; N_LITERALS],
    literal_derived: [f64; N_LITERAL_DERIVED],
    parameters: [f64; N_PARAMETERS],
    parameter_derived: [f64; N_PARAMETER_DERIVED],

    s_independents: Vec<SensitivityIndependent>,
    // Flat, row-major: s_states[k * N_STATES + j] = d(states[j])/d(independent[k]).
    s_states: Vec<f64>,
    // Flat, row-major: s_intermediary[k * N_INTERMEDIARY + i].
    s_intermediary: Vec<f64>,

    cache_generation: u64,
    derivatives_valid_at: Option<u64>,
    sensitivities_valid_at: Option<u64>,

    logging: LoggingSubstrate,
    logging_initialized: bool,
}

impl Model {
    /// Allocates all arrays, populates default literal values, computes
    /// literal-derived constants, and sets the default initial state.
    pub fn create() -> EngineResult<Model> {
        let literals = definition::LITERAL_DEFAULTS;
        let literal_derived = definition::eval_literal_derived(&literals);
        let parameters = definition::PARAMETER_DEFAULTS;
        let parameter_derived = definition::eval_parameter_derived(&parameters);

        Ok(Model {
            states: definition::STATE_DEFAULTS,
            derivatives: [0.0; N_STATES],
            intermediary: [0.0; N_INTERMEDIARY],
            bound: Bound::default(),
            literals,
            literal_derived,
            parameters,
            parameter_derived,
            s_independents: Vec::new(),
            s_states: Vec::new(),
            s_intermediary: Vec::new(),
            cache_generation: 0,
            derivatives_valid_at: None,
            sensitivities_valid_at: None,
            logging: LoggingSubstrate::new(),
            logging_initialized: false,
        })
    }

    fn invalidate(&mut self) {
        self.cache_generation += 1;
    }

    // -- configuration -----------------------------------------------------

    pub fn set_literals(&mut self, values: &[f64]) -> EngineResult<()> {
        debug_assert_eq!(values.len(), N_LITERALS);
        if self.literals.as_slice() != values {
            self.literals.copy_from_slice(values);
            self.literal_derived = definition::eval_literal_derived(&self.literals);
            self.parameter_derived = definition::eval_parameter_derived(&self.parameters);
            self.invalidate();
        }
        Ok(())
    }

    pub fn set_parameters(&mut self, values: &[f64]) -> EngineResult<()> {
        debug_assert_eq!(values.len(), N_PARAMETERS);
        if self.parameters.as_slice() != values {
            self.parameters.copy_from_slice(values);
            self.parameter_derived = definition::eval_parameter_derived(&self.parameters);
            self.invalidate();
        }
        Ok(())
    }

    /// Extracts the parameter slots from an independent-variable vector
    /// (which may also contain initial-state slots) and applies them.
    pub fn set_parameters_from_independents(&mut self, indep: &[f64]) -> EngineResult<()> {
        let mut values = self.parameters;
        for (k, s) in self.s_independents.iter().enumerate() {
            if s.kind == SensitivityIndependentKind::Parameter {
                values[s.slot] = indep[k];
            }
        }
        self.set_parameters(&values)
    }

    pub fn set_bound(
        &mut self,
        time: f64,
        pace_values: &[f64],
        realtime: f64,
        evaluations: u64,
    ) -> EngineResult<()> {
        let changed = self.bound.time != time || self.bound.pace_values != pace_values;
        self.bound.time = time;
        self.bound.pace_values = pace_values.to_vec();
        self.bound.realtime = realtime;
        self.bound.evaluations = evaluations;
        if changed {
            self.invalidate();
        }
        Ok(())
    }

    pub fn set_states(&mut self, values: &[f64]) -> EngineResult<()> {
        debug_assert_eq!(values.len(), N_STATES);
        if self.states.as_slice() != values {
            self.states.copy_from_slice(values);
            self.invalidate();
        }
        Ok(())
    }

    /// Allocates the pacing vector for `n` pacing channels.
    pub fn setup_pacing(&mut self, n: usize) {
        self.bound.pace_values = vec![0.0; n];
        self.invalidate();
    }

    /// (Re)allocates sensitivity storage for the given independents.
    pub fn setup_sensitivities(&mut self, independents: Vec<SensitivityIndependent>) {
        let ns = independents.len();
        self.s_independents = independents;
        self.s_states = vec![0.0; ns * N_STATES];
        self.s_intermediary = vec![0.0; ns * N_INTERMEDIARY];
        self.sensitivities_valid_at = None;
    }

    pub fn set_state_sensitivities(&mut self, independent_index: usize, s_states: &[f64]) {
        debug_assert_eq!(s_states.len(), N_STATES);
        let offset = independent_index * N_STATES;
        self.s_states[offset..offset + N_STATES].copy_from_slice(s_states);
        self.sensitivities_valid_at = None;
    }

    // -- evaluation ----------------------------------------------------

    fn pace(&self) -> f64 {
        self.bound.pace_values.first().copied().unwrap_or(0.0)
    }

    fn eval_with(&self, states: &[f64; N_STATES]) -> ([f64; N_STATES], [f64; N_INTERMEDIARY]) {
        definition::eval_rhs(
            states,
            self.pace(),
            &self.literals,
            &self.literal_derived,
            &self.parameters,
        )
    }

    fn eval_with_parameters(
        &self,
        parameters: &[f64; N_PARAMETERS],
    ) -> ([f64; N_STATES], [f64; N_INTERMEDIARY]) {
        definition::eval_rhs(
            &self.states,
            self.pace(),
            &self.literals,
            &self.literal_derived,
            parameters,
        )
    }

    /// Computes all intermediaries and state derivatives. Pure with
    /// respect to bound/states/constants: repeated calls without an
    /// intervening mutation yield bit-equal output.
    pub fn evaluate_derivatives(&mut self) -> EngineResult<()> {
        if self.derivatives_valid_at == Some(self.cache_generation) {
            return Ok(());
        }
        let (derivatives, intermediary) = self.eval_with(&self.states);
        self.derivatives = derivatives;
        self.intermediary = intermediary;
        self.derivatives_valid_at = Some(self.cache_generation);
        Ok(())
    }

    /// `d(derivatives)/d(states)` via central finite differences, scaled
    /// by a `pbar`-like relative step. Used by the solver façade for
    /// Newton iteration and by forward-sensitivity propagation.
    pub(crate) fn state_jacobian(&self) -> DMatrix<f64> {
        let mut jac = DMatrix::<f64>::zeros(N_STATES, N_STATES);
        for j in 0..N_STATES {
            let h = RELATIVE_STEP * self.states[j].abs().max(1.0);
            let mut plus = self.states;
            plus[j] += h;
            let mut minus = self.states;
            minus[j] -= h;
            let (d_plus, _) = self.eval_with(&plus);
            let (d_minus, _) = self.eval_with(&minus);
            for i in 0..N_STATES {
                jac[(i, j)] = (d_plus[i] - d_minus[i]) / (2.0 * h);
            }
        }
        jac
    }

    /// `d(derivatives)/d(parameters[idx])`, scaled by `pbar[idx] =
    /// max(|p_idx|, 1)` (spec.md §4.4).
    pub(crate) fn parameter_partial_derivatives(&self, idx: usize) -> [f64; N_STATES] {
        let pbar = self.parameters[idx].abs().max(1.0);
        let h = RELATIVE_STEP * pbar;
        let mut plus = self.parameters;
        plus[idx] += h;
        let mut minus = self.parameters;
        minus[idx] -= h;
        let (d_plus, _) = self.eval_with_parameters(&plus);
        let (d_minus, _) = self.eval_with_parameters(&minus);
        let mut out = [0.0; N_STATES];
        for i in 0..N_STATES {
            out[i] = (d_plus[i] - d_minus[i]) / (2.0 * h);
        }
        out
    }

    /// Computes intermediary-variable sensitivities, assuming state
    /// sensitivities (`s_states`) have already been set by the solver
    /// after each accepted step.
    pub fn evaluate_sensitivity_outputs(&mut self) -> EngineResult<()> {
        if self.sensitivities_valid_at == Some(self.cache_generation) {
            return Ok(());
        }

        // d(intermediary)/d(states), central finite difference.
        let mut d_inter_d_state = [[0.0; N_STATES]; N_INTERMEDIARY];
        for j in 0..N_STATES {
            let h = RELATIVE_STEP * self.states[j].abs().max(1.0);
            let mut plus = self.states;
            plus[j] += h;
            let mut minus = self.states;
            minus[j] -= h;
            let (_, i_plus) = self.eval_with(&plus);
            let (_, i_minus) = self.eval_with(&minus);
            for i in 0..N_INTERMEDIARY {
                d_inter_d_state[i][j] = (i_plus[i] - i_minus[i]) / (2.0 * h);
            }
        }

        let ns = self.s_independents.len();
        for k in 0..ns {
            let row = &self.s_states[k * N_STATES..(k + 1) * N_STATES];
            let direct = match self.s_independents[k] {
                SensitivityIndependent {
                    kind: SensitivityIndependentKind::Parameter,
                    slot,
                } => {
                    let pbar = self.parameters[slot].abs().max(1.0);
                    let h = RELATIVE_STEP * pbar;
                    let mut plus = self.parameters;
                    plus[slot] += h;
                    let mut minus = self.parameters;
                    minus[slot] -= h;
                    let (_, i_plus) = self.eval_with_parameters(&plus);
                    let (_, i_minus) = self.eval_with_parameters(&minus);
                    let mut d = [0.0; N_INTERMEDIARY];
                    for i in 0..N_INTERMEDIARY {
                        d[i] = (i_plus[i] - i_minus[i]) / (2.0 * h);
                    }
                    d
                }
                SensitivityIndependent {
                    kind: SensitivityIndependentKind::State,
                    ..
                } => [0.0; N_INTERMEDIARY],
            };

            for i in 0..N_INTERMEDIARY {
                let chain: f64 = (0..N_STATES).map(|j| d_inter_d_state[i][j] * row[j]).sum();
                self.s_intermediary[k * N_INTERMEDIARY + i] = chain + direct[i];
            }
        }

        self.sensitivities_valid_at = Some(self.cache_generation);
        Ok(())
    }

    // -- accessors -------------------------------------------------------

    pub fn states(&self) -> &[f64; N_STATES] {
        &self.states
    }
    pub fn derivatives(&self) -> &[f64; N_STATES] {
        &self.derivatives
    }
    pub fn intermediary(&self) -> &[f64; N_INTERMEDIARY] {
        &self.intermediary
    }
    pub fn bound(&self) -> &Bound {
        &self.bound
    }
    pub fn literals(&self) -> &[f64; N_LITERALS] {
        &self.literals
    }
    pub fn parameters(&self) -> &[f64; N_PARAMETERS] {
        &self.parameters
    }
    pub fn n_states(&self) -> usize {
        N_STATES
    }
    pub fn ns_independents(&self) -> usize {
        self.s_independents.len()
    }
    pub fn s_independents(&self) -> &[SensitivityIndependent] {
        &self.s_independents
    }
    pub fn s_states_row(&self, k: usize) -> &[f64] {
        &self.s_states[k * N_STATES..(k + 1) * N_STATES]
    }

    fn resolve(&self, name: &str) -> Option<VariableRef> {
        logging::resolve_name(
            name,
            &definition::STATE_NAMES,
            &definition::INTERMEDIARY_NAMES,
            &definition::LITERAL_NAMES,
            &definition::LITERAL_DERIVED_NAMES,
            &definition::PARAMETER_NAMES,
            &definition::PARAMETER_DERIVED_NAMES,
        )
    }

    /// Resolves a variable name for callers outside the logging path
    /// (e.g. the driver's root-finding index lookup).
    pub fn resolve_variable(&self, name: &str) -> Option<VariableRef> {
        self.resolve(name)
    }

    fn read(&self, r: VariableRef) -> f64 {
        match r {
            VariableRef::State(i) => self.states[i],
            VariableRef::Derivative(i) => self.derivatives[i],
            VariableRef::Intermediary(i) => self.intermediary[i],
            VariableRef::Literal(i) => self.literals[i],
            VariableRef::LiteralDerived(i) => self.literal_derived[i],
            VariableRef::Parameter(i) => self.parameters[i],
            VariableRef::ParameterDerived(i) => self.parameter_derived[i],
            VariableRef::BoundTime => self.bound.time,
            VariableRef::BoundPace(i) => self.bound.pace_values.get(i).copied().unwrap_or(0.0),
            VariableRef::BoundRealtime => self.bound.realtime,
            VariableRef::BoundEvaluations => self.bound.evaluations as f64,
        }
    }

    // -- logging -----------------------------------------------------------

    /// Binds every entry of `descriptor` to a sink. Fails if any name is
    /// unrecognized, or if logging was already initialized.
    pub fn initialize_logging(
        &mut self,
        descriptor: Vec<(String, Box<dyn FloatSink>)>,
    ) -> EngineResult<()> {
        if self.logging_initialized {
            return Err(EngineError::LoggingAlreadyInitialized);
        }

        let mut unknown = Vec::new();
        let mut resolved = Vec::with_capacity(descriptor.len());
        for (name, sink) in descriptor {
            match self.resolve(&name) {
                Some(r) => resolved.push((r, sink)),
                None => unknown.push(name),
            }
        }
        if !unknown.is_empty() {
            return Err(EngineError::UnknownVariablesInLog(unknown));
        }

        for (r, sink) in resolved {
            self.logging.bind(r, sink);
        }
        self.logging_initialized = true;
        Ok(())
    }

    pub fn bind_sensitivity_sink(&mut self, sink: Box<dyn MatrixSink>) -> EngineResult<()> {
        if !self.logging_initialized {
            return Err(EngineError::LoggingNotInitialized);
        }
        self.logging.bind_sensitivity_sink(sink);
        Ok(())
    }

    pub fn logging_requires_rhs_evaluation(&self) -> bool {
        self.logging.any_requires_rhs_evaluation()
    }

    /// Appends the current value of each bound variable to its sink, in
    /// binding order.
    pub fn log(&mut self) -> EngineResult<()> {
        if !self.logging_initialized {
            return Err(EngineError::LoggingNotInitialized);
        }
        let states = self.states;
        let derivatives = self.derivatives;
        let intermediary = self.intermediary;
        let literals = self.literals;
        let literal_derived = self.literal_derived;
        let parameters = self.parameters;
        let parameter_derived = self.parameter_derived;
        let bound = self.bound.clone();
        self.logging.log(|r| match r {
            VariableRef::State(i) => states[i],
            VariableRef::Derivative(i) => derivatives[i],
            VariableRef::Intermediary(i) => intermediary[i],
            VariableRef::Literal(i) => literals[i],
            VariableRef::LiteralDerived(i) => literal_derived[i],
            VariableRef::Parameter(i) => parameters[i],
            VariableRef::ParameterDerived(i) => parameter_derived[i],
            VariableRef::BoundTime => bound.time,
            VariableRef::BoundPace(i) => bound.pace_values.get(i).copied().unwrap_or(0.0),
            VariableRef::BoundRealtime => bound.realtime,
            VariableRef::BoundEvaluations => bound.evaluations as f64,
        })
    }

    /// Appends a full `ns_dependents x ns_independents` sensitivity
    /// matrix, where dependents are the state variables followed by the
    /// intermediary variables, in declaration order.
    pub fn log_sensitivity_matrix(&mut self) -> EngineResult<()> {
        let ns = self.s_independents.len();
        let n_dependents = N_STATES + N_INTERMEDIARY;
        let mut rows = vec![vec![0.0; ns]; n_dependents];
        for k in 0..ns {
            for j in 0..N_STATES {
                rows[j][k] = self.s_states[k * N_STATES + j];
            }
            for i in 0..N_INTERMEDIARY {
                rows[N_STATES + i][k] = self.s_intermediary[k * N_INTERMEDIARY + i];
            }
        }
        self.logging.log_sensitivity_matrix(&rows)
    }

    pub fn deinitialize_logging(&mut self) {
        self.logging.clear();
        self.logging_initialized = false;
    }
}

/// One-shot RHS evaluation with a scratch Model (spec.md §6
/// `eval_derivatives`). Used by host wrappers that want a derivative
/// evaluation without standing up a full simulation.
pub fn eval_derivatives(
    t: f64,
    pace: &[f64],
    state: &[f64],
    out_deriv: &mut [f64],
    literals: &[f64],
    parameters: &[f64],
) -> EngineResult<()> {
    let mut model = Model::create()?;
    model.setup_pacing(pace.len());
    model.set_literals(literals)?;
    model.set_parameters(parameters)?;
    model.set_bound(t, pace, 0.0, 0)?;
    model.set_states(state)?;
    model.evaluate_derivatives()?;
    out_deriv.copy_from_slice(model.derivatives());
    Ok(())
}
