//! Unit tests for name resolution and the logging substrate.

#![cfg(test)]

use super::*;

const STATES: [&str; 2] = ["membrane.V", "ina.m"];
const INTER: [&str; 1] = ["ina.INa"];
const LITS: [&str; 1] = ["membrane.C"];
const LIT_DERIVED: [&str; 1] = ["membrane.Cinv"];
const PARAMS: [&str; 1] = ["ina.gNaBar"];
const PARAM_DERIVED: [&str; 0] = [];

fn resolve(name: &str) -> Option<VariableRef> {
    resolve_name(
        name,
        &STATES,
        &INTER,
        &LITS,
        &LIT_DERIVED,
        &PARAMS,
        &PARAM_DERIVED,
    )
}

#[test]
fn resolves_bound_names() {
    assert_eq!(resolve("engine.time"), Some(VariableRef::BoundTime));
    assert_eq!(resolve("engine.realtime"), Some(VariableRef::BoundRealtime));
    assert_eq!(
        resolve("engine.evaluations"),
        Some(VariableRef::BoundEvaluations)
    );
    assert_eq!(resolve("engine.pace"), Some(VariableRef::BoundPace(0)));
    assert_eq!(resolve("engine.pace1"), Some(VariableRef::BoundPace(1)));
}

#[test]
fn resolves_state_and_derivative_names() {
    assert_eq!(resolve("membrane.V"), Some(VariableRef::State(0)));
    assert_eq!(resolve("ina.m"), Some(VariableRef::State(1)));
    assert_eq!(
        resolve("dot(membrane.V)"),
        Some(VariableRef::Derivative(0))
    );
}

#[test]
fn resolves_intermediary_literal_and_parameter_names() {
    assert_eq!(resolve("ina.INa"), Some(VariableRef::Intermediary(0)));
    assert_eq!(resolve("membrane.C"), Some(VariableRef::Literal(0)));
    assert_eq!(
        resolve("membrane.Cinv"),
        Some(VariableRef::LiteralDerived(0))
    );
    assert_eq!(resolve("ina.gNaBar"), Some(VariableRef::Parameter(0)));
}

#[test]
fn unknown_name_resolves_to_none() {
    assert_eq!(resolve("nonexistent.thing"), None);
    assert_eq!(resolve("dot(nonexistent.thing)"), None);
}

struct VecSink(Vec<f64>);
impl FloatSink for VecSink {
    fn append(&mut self, value: f64) -> Result<(), String> {
        self.0.push(value);
        Ok(())
    }
}

struct FailingSink;
impl FloatSink for FailingSink {
    fn append(&mut self, _value: f64) -> Result<(), String> {
        Err("sink closed".to_string())
    }
}

struct MatrixVecSink(Vec<Vec<Vec<f64>>>);
impl MatrixSink for MatrixVecSink {
    fn append_matrix(&mut self, rows: &[Vec<f64>]) -> Result<(), String> {
        self.0.push(rows.to_vec());
        Ok(())
    }
}

#[test]
fn log_appends_in_binding_order() {
    let mut substrate = LoggingSubstrate::new();
    substrate.bind(VariableRef::State(0), Box::new(VecSink(Vec::new())));
    substrate.bind(VariableRef::State(1), Box::new(VecSink(Vec::new())));

    let read = |r: VariableRef| match r {
        VariableRef::State(0) => 1.0,
        VariableRef::State(1) => 2.0,
        _ => unreachable!(),
    };
    substrate.log(read).unwrap();
}

#[test]
fn log_propagates_sink_failure() {
    let mut substrate = LoggingSubstrate::new();
    substrate.bind(VariableRef::State(0), Box::new(FailingSink));
    let result = substrate.log(|_| 0.0);
    assert!(matches!(result, Err(EngineError::LogAppendFailed(_))));
}

#[test]
fn sensitivity_matrix_requires_bound_sink() {
    let mut substrate = LoggingSubstrate::new();
    let result = substrate.log_sensitivity_matrix(&[vec![1.0]]);
    assert!(matches!(result, Err(EngineError::NoSensitivitiesToLog)));

    substrate.bind_sensitivity_sink(Box::new(MatrixVecSink(Vec::new())));
    substrate
        .log_sensitivity_matrix(&[vec![1.0, 2.0], vec![3.0, 4.0]])
        .unwrap();
}
