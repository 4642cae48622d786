use cardiac_lib::driver::{Simulation, SimulationConfig};
use cardiac_lib::logging::FloatSink;
use cardiac_lib::model::definition;
use cardiac_lib::model::{eval_derivatives, Model};
use cardiac_lib::pacing::PacingProtocol;
use cardiac_lib::solver::SolverConfig;
use criterion::{criterion_group, criterion_main, Criterion};

struct NullSink;
impl FloatSink for NullSink {
    fn append(&mut self, _value: f64) -> Result<(), String> {
        Ok(())
    }
}

fn bench_evaluate_derivatives(c: &mut Criterion) {
    let mut model = Model::create().unwrap();
    model.setup_pacing(1);
    model.set_bound(0.0, &[0.0], 0.0, 0).unwrap();
    model.set_states(&definition::STATE_DEFAULTS).unwrap();

    c.bench_function("model_evaluate_derivatives", |b| {
        b.iter(|| {
            model.set_states(&definition::STATE_DEFAULTS).unwrap();
            model.evaluate_derivatives().unwrap();
        })
    });
}

fn bench_eval_derivatives_free_function(c: &mut Criterion) {
    let mut out = [0.0; definition::N_STATES];
    c.bench_function("free_function_eval_derivatives", |b| {
        b.iter(|| {
            eval_derivatives(
                0.0,
                &[0.0],
                &definition::STATE_DEFAULTS,
                &mut out,
                &definition::LITERAL_DEFAULTS,
                &definition::PARAMETER_DEFAULTS,
            )
            .unwrap();
        })
    });
}

fn bench_unstimulated_run(c: &mut Criterion) {
    c.bench_function("unstimulated_cell_500ms", |b| {
        b.iter(|| {
            let config = SimulationConfig {
                tmin: 0.0,
                tmax: 500.0,
                state: definition::STATE_DEFAULTS.to_vec(),
                s_state: Vec::new(),
                literals: definition::LITERAL_DEFAULTS.to_vec(),
                parameters: definition::PARAMETER_DEFAULTS.to_vec(),
                protocols: vec![PacingProtocol::Event(vec![])],
                log_descriptor: vec![(
                    "engine.time".to_string(),
                    Box::new(NullSink) as Box<dyn FloatSink>,
                )],
                log_interval: 10.0,
                log_times: None,
                sensitivities: None,
                rf_index: None,
                rf_threshold: 0.0,
                rf_sink: None,
                log_realtime: false,
                solver: SolverConfig::default(),
            };
            let mut sim = Simulation::new();
            sim.init(config).unwrap();
            sim.run().unwrap();
            sim.clean();
        })
    });
}

criterion_group!(
    benches,
    bench_evaluate_derivatives,
    bench_eval_derivatives_free_function,
    bench_unstimulated_run
);
criterion_main!(benches);
