//! Command-line interface over the simulation engine.
//!
//! A host-wrapper convenience (SPEC_FULL.md §6 ambient addition), in the
//! same three-subcommand spirit as the teacher crate's pipeline CLI, but
//! exposing `run-scenario` / `describe-model` / `check-protocol` instead
//! of a multi-stage flocking pipeline.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;

use crate::driver::{Simulation, SimulationConfig};
use crate::logging::FloatSink;
use crate::model::definition;
use crate::pacing::event::EventRecord;
use crate::pacing::PacingProtocol;
use crate::solver::SolverConfig;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum OutputFormat {
    Csv,
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.to_possible_value().unwrap().get_name().fmt(f)
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Scenario {
    Unstimulated,
    SingleStimulus,
    PeriodicStimulus,
    RootFinding,
    PointList,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one of the named scenarios against the compiled-in cell model
    RunScenario {
        #[arg(value_enum)]
        scenario: Scenario,

        /// Where to write the log; prints to stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Csv)]
        format: OutputFormat,
    },

    /// Print the compiled-in model's variable table
    DescribeModel,

    /// Validate a pacing-protocol TOML file without running a simulation
    CheckProtocol {
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
}

#[derive(Debug, Deserialize)]
struct ProtocolFile {
    #[serde(default)]
    event: Vec<EventRecordFile>,
    #[serde(default)]
    fixed: Vec<(f64, f64)>,
}

#[derive(Debug, Deserialize)]
struct EventRecordFile {
    start: f64,
    duration: f64,
    #[serde(default)]
    period: f64,
    #[serde(default)]
    multiplier: f64,
    level: f64,
}

struct ColumnSink(Rc<RefCell<Vec<f64>>>);
impl FloatSink for ColumnSink {
    fn append(&mut self, value: f64) -> Result<(), String> {
        self.0.borrow_mut().push(value);
        Ok(())
    }
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::RunScenario {
            scenario,
            output,
            format,
        } => run_scenario(scenario, output, format),
        Commands::DescribeModel => describe_model(),
        Commands::CheckProtocol { path } => check_protocol(&path),
    }
}

fn run_scenario(scenario: Scenario, output: Option<PathBuf>, format: OutputFormat) -> Result<()> {
    let names = ["engine.time", "membrane.V"];
    let columns: Vec<Rc<RefCell<Vec<f64>>>> =
        names.iter().map(|_| Rc::new(RefCell::new(Vec::new()))).collect();
    let log_descriptor = names
        .iter()
        .zip(&columns)
        .map(|(name, col)| {
            (
                name.to_string(),
                Box::new(ColumnSink(col.clone())) as Box<dyn FloatSink>,
            )
        })
        .collect();

    let mut config = SimulationConfig {
        tmin: 0.0,
        tmax: 500.0,
        state: definition::STATE_DEFAULTS.to_vec(),
        s_state: Vec::new(),
        literals: definition::LITERAL_DEFAULTS.to_vec(),
        parameters: definition::PARAMETER_DEFAULTS.to_vec(),
        protocols: vec![PacingProtocol::Event(vec![])],
        log_descriptor,
        log_interval: 1.0,
        log_times: None,
        sensitivities: None,
        rf_index: None,
        rf_threshold: 0.0,
        rf_sink: None,
        log_realtime: false,
        solver: SolverConfig::default(),
    };

    match scenario {
        Scenario::Unstimulated => {}
        Scenario::SingleStimulus => {
            config.tmax = 500.0;
            config.protocols = vec![PacingProtocol::Event(vec![EventRecord {
                start: 10.0,
                duration: 2.0,
                period: 0.0,
                multiplier: 0.0,
                level: 1.0,
            }])];
        }
        Scenario::PeriodicStimulus => {
            config.tmax = 1200.0;
            config.protocols = vec![PacingProtocol::Event(vec![EventRecord {
                start: 10.0,
                duration: 2.0,
                period: 500.0,
                multiplier: 2.0,
                level: 1.0,
            }])];
        }
        Scenario::RootFinding => {
            config.tmax = 500.0;
            config.protocols = vec![PacingProtocol::Event(vec![EventRecord {
                start: 10.0,
                duration: 2.0,
                period: 0.0,
                multiplier: 0.0,
                level: 1.0,
            }])];
            config.rf_index = Some("membrane.V".to_string());
            config.rf_threshold = -40.0;
            config.rf_sink = Some(Box::new(PrintTupleSink));
        }
        Scenario::PointList => {
            config.tmax = 500.0;
            config.log_interval = 0.0;
            config.log_times = Some(vec![0.0, 10.0, 12.0, 20.0, 100.0]);
            config.protocols = vec![PacingProtocol::Event(vec![EventRecord {
                start: 10.0,
                duration: 2.0,
                period: 0.0,
                multiplier: 0.0,
                level: 1.0,
            }])];
        }
    }

    let mut sim = Simulation::new();
    sim.init(config).context("failed to initialize simulation")?;
    sim.run().context("simulation run failed")?;

    let time = columns[0].borrow();
    let v = columns[1].borrow();
    let rendered = match format {
        OutputFormat::Csv => {
            let mut s = String::from("engine.time,membrane.V\n");
            for (t, vv) in time.iter().zip(v.iter()) {
                s.push_str(&format!("{t},{vv}\n"));
            }
            s
        }
        OutputFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
            "engine.time": &*time,
            "membrane.V": &*v,
        }))?,
    };

    match output {
        Some(path) => std::fs::write(&path, rendered)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => print!("{rendered}"),
    }
    Ok(())
}

struct PrintTupleSink;
impl crate::logging::TupleSink for PrintTupleSink {
    fn append_root(&mut self, time: f64, direction: i8) -> Result<(), String> {
        println!("root crossing: t={time} direction={direction}");
        Ok(())
    }
}

fn describe_model() -> Result<()> {
    println!("states:");
    for name in definition::STATE_NAMES {
        println!("  {name}");
    }
    println!("intermediaries:");
    for name in definition::INTERMEDIARY_NAMES {
        println!("  {name}");
    }
    println!("literals:");
    for name in definition::LITERAL_NAMES {
        println!("  {name}");
    }
    println!("parameters:");
    for name in definition::PARAMETER_NAMES {
        println!("  {name}");
    }
    println!("bound inputs:");
    println!("  engine.time");
    println!("  engine.realtime");
    println!("  engine.evaluations");
    println!("  engine.pace0");
    Ok(())
}

fn check_protocol(path: &PathBuf) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let file: ProtocolFile =
        toml::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))?;

    if file.event.is_empty() && file.fixed.is_empty() {
        bail!("protocol file declares no [[event]] or fixed series");
    }

    let records: Vec<EventRecord> = file
        .event
        .into_iter()
        .map(|e| EventRecord {
            start: e.start,
            duration: e.duration,
            period: e.period,
            multiplier: e.multiplier,
            level: e.level,
        })
        .collect();
    if !records.is_empty() {
        crate::pacing::PacingSystem::from_protocol(&PacingProtocol::Event(records))?;
    }
    if !file.fixed.is_empty() {
        crate::pacing::PacingSystem::from_protocol(&PacingProtocol::Fixed(file.fixed))?;
    }

    println!("{}: protocol is valid", path.display());
    Ok(())
}
