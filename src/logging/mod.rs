//! Variable-logging substrate.
//!
//! Maps fully qualified variable names (spec.md §6's naming convention) to
//! externally owned mutable sequence sinks, and appends the current value
//! of each bound variable on demand. This module only knows about name
//! resolution and the sink capability set (spec.md §9: "a capability set,
//! not inheritance"); it has no notion of what a cardiac cell is — that
//! lives in [`crate::model`], which owns a `LoggingSubstrate` and resolves
//! names against its own variable tables before binding them here.

pub mod tests;

use crate::error::{EngineError, EngineResult};

/// A single externally owned float sink. Borrowed, never owned, by the
/// core (spec.md §5).
pub trait FloatSink {
    fn append(&mut self, value: f64) -> Result<(), String>;
}

/// A sink for `(time, direction)` root-crossing records.
pub trait TupleSink {
    fn append_root(&mut self, time: f64, direction: i8) -> Result<(), String>;
}

/// A sink for nested sensitivity-matrix snapshots
/// (`ns_dependents x ns_independents`).
pub trait MatrixSink {
    fn append_matrix(&mut self, rows: &[Vec<f64>]) -> Result<(), String>;
}

/// Identifies which internal array (and slot within it) a bound log entry
/// reads from. Resolved once at `initialize_logging` time and cheap to
/// dereference on every `log()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableRef {
    State(usize),
    Derivative(usize),
    Intermediary(usize),
    Literal(usize),
    LiteralDerived(usize),
    Parameter(usize),
    ParameterDerived(usize),
    BoundTime,
    BoundPace(usize),
    BoundRealtime,
    BoundEvaluations,
}

impl VariableRef {
    /// True for any reference whose value is only valid after a full RHS
    /// evaluation (spec.md §4.5 step 7's dynamic-logging trigger).
    pub fn requires_rhs_evaluation(self) -> bool {
        matches!(self, VariableRef::Derivative(_) | VariableRef::Intermediary(_))
    }
}

/// One bound `(source, sink)` pair.
struct Binding {
    source: VariableRef,
    sink: Box<dyn FloatSink>,
}

/// Owns the bound sinks for one Model's lifetime between
/// `initialize_logging` and `deinitialize_logging`.
#[derive(Default)]
pub struct LoggingSubstrate {
    bindings: Vec<Binding>,
    sensitivity_sink: Option<Box<dyn MatrixSink>>,
}

impl LoggingSubstrate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, source: VariableRef, sink: Box<dyn FloatSink>) {
        self.bindings.push(Binding { source, sink });
    }

    pub fn bind_sensitivity_sink(&mut self, sink: Box<dyn MatrixSink>) {
        self.sensitivity_sink = Some(sink);
    }

    pub fn has_sensitivity_sink(&self) -> bool {
        self.sensitivity_sink.is_some()
    }

    /// True if any bound source needs a full RHS evaluation before its
    /// value is meaningful.
    pub fn any_requires_rhs_evaluation(&self) -> bool {
        self.bindings
            .iter()
            .any(|b| b.source.requires_rhs_evaluation())
    }

    /// Appends `read(source)` to each bound sink, in binding order.
    pub fn log(&mut self, read: impl Fn(VariableRef) -> f64) -> EngineResult<()> {
        for binding in &mut self.bindings {
            let value = read(binding.source);
            binding
                .sink
                .append(value)
                .map_err(EngineError::LogAppendFailed)?;
        }
        Ok(())
    }

    /// Appends a full sensitivity matrix snapshot. `rows[i][k]` is
    /// dependent `i`'s sensitivity to independent `k`.
    pub fn log_sensitivity_matrix(&mut self, rows: &[Vec<f64>]) -> EngineResult<()> {
        match &mut self.sensitivity_sink {
            Some(sink) => sink
                .append_matrix(rows)
                .map_err(EngineError::SensitivityLogAppendFailed),
            None => Err(EngineError::NoSensitivitiesToLog),
        }
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
        self.sensitivity_sink = None;
    }
}

/// Resolves a fully qualified variable name against a model's static
/// tables. Shared by [`crate::model::Model::initialize_logging`] and by
/// anything else that needs name -> reference resolution (e.g. root-find
/// index lookup).
pub fn resolve_name(
    name: &str,
    state_names: &[&str],
    intermediary_names: &[&str],
    literal_names: &[&str],
    literal_derived_names: &[&str],
    parameter_names: &[&str],
    parameter_derived_names: &[&str],
) -> Option<VariableRef> {
    if name == "engine.time" {
        return Some(VariableRef::BoundTime);
    }
    if name == "engine.realtime" {
        return Some(VariableRef::BoundRealtime);
    }
    if name == "engine.evaluations" {
        return Some(VariableRef::BoundEvaluations);
    }
    if let Some(rest) = name.strip_prefix("engine.pace") {
        return if rest.is_empty() {
            Some(VariableRef::BoundPace(0))
        } else {
            rest.parse::<usize>().ok().map(VariableRef::BoundPace)
        };
    }
    if let Some(inner) = name.strip_prefix("dot(").and_then(|s| s.strip_suffix(')')) {
        return state_names
            .iter()
            .position(|n| *n == inner)
            .map(VariableRef::Derivative);
    }
    if let Some(i) = state_names.iter().position(|n| *n == name) {
        return Some(VariableRef::State(i));
    }
    if let Some(i) = intermediary_names.iter().position(|n| *n == name) {
        return Some(VariableRef::Intermediary(i));
    }
    if let Some(i) = literal_names.iter().position(|n| *n == name) {
        return Some(VariableRef::Literal(i));
    }
    if let Some(i) = literal_derived_names.iter().position(|n| *n == name) {
        return Some(VariableRef::LiteralDerived(i));
    }
    if let Some(i) = parameter_names.iter().position(|n| *n == name) {
        return Some(VariableRef::Parameter(i));
    }
    if let Some(i) = parameter_derived_names.iter().position(|n| *n == name) {
        return Some(VariableRef::ParameterDerived(i));
    }
    None
}
