use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{Level, error, info, warn};

use mesh_lab_abstract::{DataRate, ExperimentConfig, SimulationEngine};
use mesh_lab_simulator::{
    Experiment, ExperimentReport, LossyChannelEngine, RecordedTelemetry, ResultsWriter,
    load_scenario, write_mesh_report, write_telemetry,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Randomized traffic experiments over a wireless mesh grid")]
struct Args {
    /// Load experiment settings from a TOML scenario.
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Grid columns.
    #[arg(long)]
    x_size: Option<u32>,
    /// Grid rows.
    #[arg(long)]
    y_size: Option<u32>,

    /// Source data rate, e.g. 150kbps.
    #[arg(long)]
    txrate: Option<DataRate>,

    /// Simulated time in seconds.
    #[arg(long)]
    total_time: Option<f64>,

    #[arg(long)]
    seed: Option<u64>,

    /// File name prefix of the results channels.
    #[arg(long)]
    prefix: Option<String>,

    /// Directory the results channels are written to.
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Aggregate flow records captured from an external engine run instead
    /// of running the built-in engine.
    #[arg(long)]
    records: Option<PathBuf>,

    /// Save the raw flow records of this run as JSON.
    #[arg(long)]
    telemetry_out: Option<PathBuf>,

    /// Write a JSON report of the finished experiment.
    #[arg(long)]
    trace_out: Option<PathBuf>,

    /// Write per mesh point counters as JSON.
    #[arg(long)]
    mesh_report: Option<PathBuf>,

    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);
    info!("mesh-lab starting…");

    let (config, name) = args.experiment_config()?;
    let experiment = Experiment::prepare(config, name)?;

    let mut engine: Box<dyn SimulationEngine> = match &args.records {
        Some(path) => Box::new(RecordedTelemetry::new(path)),
        None => Box::new(LossyChannelEngine::new()),
    };
    let run = experiment.simulate(engine.as_mut())?;

    if let Some(path) = &args.telemetry_out {
        write_telemetry(path, &run.telemetry)?;
        info!("flow records saved to {}", path.display());
    }

    if let Some(path) = &args.mesh_report {
        match &run.mesh_report {
            Some(report) => {
                write_mesh_report(path, report)?;
                info!("mesh point report saved to {}", path.display());
            }
            None => warn!("{} engine keeps no mesh point counters", run.engine),
        }
    }

    let report = experiment.analyze(&run)?;
    let writer = ResultsWriter::new(&args.output_dir, &report.config.results_prefix);
    let written = writer.write(&report.summary);

    if let Some(path) = &args.trace_out {
        write_trace(path, &report)?;
    }

    if let Err(e) = written {
        error!(
            "results not saved; PDF {} %, delay {} s, throughput {} kbps",
            report.summary.delivery_ratio_pct,
            report.summary.avg_delay_sec,
            report.summary.total_rx_bitrate_kbps
        );
        return Err(e.into());
    }
    Ok(())
}

impl Args {
    /// Defaults, then the scenario file, then command line flags.
    fn experiment_config(&self) -> Result<(ExperimentConfig, Option<String>)> {
        let mut config = ExperimentConfig::default();
        let mut name = None;
        if let Some(path) = &self.scenario {
            let scenario = load_scenario(path)?;
            scenario.config.apply_to(&mut config);
            name = Some(scenario.name);
        }

        if let Some(v) = self.x_size {
            config.x_size = v;
        }
        if let Some(v) = self.y_size {
            config.y_size = v;
        }
        if let Some(v) = self.txrate {
            config.tx_rate = v;
        }
        if let Some(v) = self.total_time {
            config.total_time = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        if let Some(v) = &self.prefix {
            config.results_prefix = v.clone();
        }
        Ok((config, name))
    }
}

fn init_logging(verbose: bool) {
    if verbose {
        tracing_subscriber::fmt().with_max_level(Level::DEBUG).init();
    } else {
        tracing_subscriber::fmt::init();
    }
}

fn write_trace(path: &Path, report: &ExperimentReport) -> Result<()> {
    let data = serde_json::to_vec_pretty(report).context("Failed to serialize experiment report")?;
    fs::write(path, &data)
        .with_context(|| format!("Failed to write trace file {}", path.display()))?;
    Ok(())
}
