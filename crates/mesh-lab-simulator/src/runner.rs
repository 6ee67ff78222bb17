use anyhow::Context;
use mesh_lab_abstract::{
    ExperimentConfig, ExperimentScenario, FlowTelemetry, MeshReport, Result, SimulationContext,
    SimulationEngine,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::info;

use crate::stats::FlowAggregator;
use crate::trace::ExperimentReport;
use crate::traffic::TrafficGenerator;

pub fn load_scenario(path: &Path) -> anyhow::Result<ExperimentScenario> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
    let scenario: ExperimentScenario =
        toml::from_str(&content).context("Failed to parse scenario file")?;
    info!("Running Scenario: {}", scenario.name);
    if !scenario.description.is_empty() {
        info!("Description: {}", scenario.description);
    }
    Ok(scenario)
}

/// Output of the engine stage.
#[derive(Debug)]
pub struct SimulationRun {
    pub engine: String,
    pub telemetry: FlowTelemetry,
    /// Per mesh point counters, when the engine keeps them.
    pub mesh_report: Option<MeshReport>,
    pub wall_time_secs: f64,
}

/// A prepared experiment: grid laid out, addresses assigned, traffic drawn.
#[derive(Debug)]
pub struct Experiment {
    name: Option<String>,
    ctx: SimulationContext,
}

impl Experiment {
    pub fn prepare(config: ExperimentConfig, name: Option<String>) -> Result<Self> {
        let mut ctx = SimulationContext::new(config)?;
        let generator = TrafficGenerator::new(ctx.config().traffic.clone())?;
        let mut rng = StdRng::seed_from_u64(ctx.config().seed);
        let flows = generator.generate(ctx.nodes().len(), ctx.config().total_time, &mut rng)?;
        ctx.install_traffic(flows)?;
        info!(
            "prepared {}x{} grid ({} m step) with {} flows at {}",
            ctx.config().x_size,
            ctx.config().y_size,
            ctx.config().step,
            ctx.flows().len(),
            ctx.config().tx_rate
        );
        Ok(Self { name, ctx })
    }

    pub fn context(&self) -> &SimulationContext {
        &self.ctx
    }

    pub fn simulate(&self, engine: &mut dyn SimulationEngine) -> Result<SimulationRun> {
        let started = Instant::now();
        let telemetry = engine.run(&self.ctx)?;
        let wall_time_secs = started.elapsed().as_secs_f64();
        info!("*** Simulation time: {wall_time_secs:.3}s");
        Ok(SimulationRun {
            engine: engine.name().to_string(),
            telemetry,
            mesh_report: engine.mesh_report(),
            wall_time_secs,
        })
    }

    pub fn analyze(&self, run: &SimulationRun) -> Result<ExperimentReport> {
        let aggregate = FlowAggregator::new(self.ctx.config().subnet).aggregate(&run.telemetry)?;
        Ok(ExperimentReport {
            scenario: self.name.clone(),
            engine: run.engine.clone(),
            config: self.ctx.config().clone(),
            traffic: self.ctx.flows().to_vec(),
            flows: aggregate.flows,
            summary: aggregate.summary,
            mesh: run.mesh_report.clone(),
            wall_time_secs: run.wall_time_secs,
        })
    }
}
