use mesh_lab_abstract::{ExperimentConfig, MeshReport, TrafficFlow};
use serde::Serialize;

use crate::stats::{FlowReport, RunSummary};

/// Serializable record of a finished experiment.
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentReport {
    pub scenario: Option<String>,
    pub engine: String,
    pub config: ExperimentConfig,
    pub traffic: Vec<TrafficFlow>,
    pub flows: Vec<FlowReport>,
    pub summary: RunSummary,
    pub mesh: Option<MeshReport>,
    /// Wall-clock time spent inside the engine, in seconds.
    pub wall_time_secs: f64,
}
