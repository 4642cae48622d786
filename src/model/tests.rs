//! Unit tests for Model invariants (spec.md §8).

#![cfg(test)]

use super::*;
use crate::logging::FloatSink;

struct VecSink(std::rc::Rc<std::cell::RefCell<Vec<f64>>>);
impl FloatSink for VecSink {
    fn append(&mut self, value: f64) -> Result<(), String> {
        self.0.borrow_mut().push(value);
        Ok(())
    }
}

#[test]
fn create_populates_defaults() {
    let model = Model::create().unwrap();
    assert_eq!(model.states()[definition::INDEX_V], -84.5286);
    assert_eq!(model.literals(), &definition::LITERAL_DEFAULTS);
}

#[test]
fn set_states_and_bound_round_trip_bit_exact() {
    let mut model = Model::create().unwrap();
    model.setup_pacing(1);
    let states = [-80.0, 0.02, 0.9, 0.95, 0.01, 0.9, 0.001, 3.0e-7];
    model.set_states(&states).unwrap();
    model.set_bound(12.5, &[1.0], 0.0, 0).unwrap();
    model.evaluate_derivatives().unwrap();

    assert_eq!(model.states(), &states);
    assert_eq!(model.bound().time, 12.5);
    assert_eq!(model.bound().pace_values, vec![1.0]);
}

#[test]
fn evaluate_derivatives_is_pure() {
    let mut model = Model::create().unwrap();
    model.setup_pacing(1);
    model.set_bound(0.0, &[0.0], 0.0, 0).unwrap();
    model.evaluate_derivatives().unwrap();
    let first = *model.derivatives();
    model.evaluate_derivatives().unwrap();
    let second = *model.derivatives();
    assert_eq!(first, second);
}

#[test]
fn literal_derived_is_recomputed_on_set_literals() {
    let mut model = Model::create().unwrap();
    let mut literals = definition::LITERAL_DEFAULTS;
    literals[0] = 2.0; // membrane.C
    model.set_literals(&literals).unwrap();
    let literal_derived = model.literal_derived;
    assert_eq!(literal_derived[0], 0.5); // membrane.Cinv = 1 / C
}

#[test]
fn unstimulated_cell_holds_resting_potential() {
    let mut model = Model::create().unwrap();
    model.setup_pacing(1);
    model.set_bound(0.0, &[0.0], 0.0, 0).unwrap();
    model.evaluate_derivatives().unwrap();
    // At true rest, dV/dt should be small relative to the scenario's
    // tolerance window (spec.md §8 scenario 1); this is a smoke check,
    // the full scenario lives in tests/scenarios.rs.
    assert!(model.derivatives()[definition::INDEX_V].abs() < 1.0);
}

#[test]
fn initialize_logging_rejects_unknown_variable() {
    let mut model = Model::create().unwrap();
    let sink: Box<dyn FloatSink> = Box::new(VecSink(Default::default()));
    let result = model.initialize_logging(vec![("not.a.variable".to_string(), sink)]);
    assert!(matches!(result, Err(EngineError::UnknownVariablesInLog(_))));
}

#[test]
fn initialize_logging_twice_fails() {
    let mut model = Model::create().unwrap();
    let sink: Box<dyn FloatSink> = Box::new(VecSink(Default::default()));
    model
        .initialize_logging(vec![("engine.time".to_string(), sink)])
        .unwrap();
    let sink2: Box<dyn FloatSink> = Box::new(VecSink(Default::default()));
    let result = model.initialize_logging(vec![("engine.time".to_string(), sink2)]);
    assert!(matches!(result, Err(EngineError::LoggingAlreadyInitialized)));
}

#[test]
fn log_without_initialization_fails() {
    let mut model = Model::create().unwrap();
    assert!(matches!(
        model.log(),
        Err(EngineError::LoggingNotInitialized)
    ));
}

#[test]
fn log_appends_bound_variable_values() {
    let mut model = Model::create().unwrap();
    model.setup_pacing(1);
    model.set_bound(3.0, &[0.0], 0.0, 0).unwrap();

    let log = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let sink: Box<dyn FloatSink> = Box::new(VecSink(log.clone()));
    model
        .initialize_logging(vec![("engine.time".to_string(), sink)])
        .unwrap();
    model.log().unwrap();
    assert_eq!(*log.borrow(), vec![3.0]);
}

#[test]
fn sensitivity_setup_allocates_and_resets_rows() {
    let mut model = Model::create().unwrap();
    model.setup_sensitivities(vec![
        SensitivityIndependent {
            kind: SensitivityIndependentKind::Parameter,
            slot: 0,
        },
        SensitivityIndependent {
            kind: SensitivityIndependentKind::State,
            slot: definition::INDEX_V,
        },
    ]);
    assert_eq!(model.ns_independents(), 2);
    assert_eq!(model.s_states_row(0).len(), definition::N_STATES);
}

#[test]
fn eval_derivatives_one_shot_matches_full_model() {
    let state = definition::STATE_DEFAULTS;
    let mut out = [0.0; definition::N_STATES];
    eval_derivatives(
        0.0,
        &[0.0],
        &state,
        &mut out,
        &definition::LITERAL_DEFAULTS,
        &definition::PARAMETER_DEFAULTS,
    )
    .unwrap();

    let mut model = Model::create().unwrap();
    model.setup_pacing(1);
    model.set_bound(0.0, &[0.0], 0.0, 0).unwrap();
    model.evaluate_derivatives().unwrap();
    assert_eq!(&out, model.derivatives());
}
