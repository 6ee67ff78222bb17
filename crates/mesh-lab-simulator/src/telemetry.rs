use mesh_lab_abstract::{
    FiveTuple, FlowId, FlowTelemetry, MeshLabError, MeshReport, RawFlowRecord, Result,
    SimulationContext, SimulationEngine,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// On-disk layout of the records of an externally executed run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryFile {
    pub flows: Vec<FlowEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowEntry {
    pub flow_id: FlowId,
    pub tuple: FiveTuple,
    pub stats: RawFlowRecord,
}

impl TelemetryFile {
    pub fn from_telemetry(telemetry: &FlowTelemetry) -> Self {
        let flows = telemetry
            .records
            .iter()
            .filter_map(|(id, stats)| {
                telemetry.classifier.find_flow(*id).map(|tuple| FlowEntry {
                    flow_id: *id,
                    tuple: *tuple,
                    stats: stats.clone(),
                })
            })
            .collect();
        Self { flows }
    }

    pub fn into_telemetry(self) -> Result<FlowTelemetry> {
        let mut telemetry = FlowTelemetry::default();
        for entry in self.flows {
            if telemetry.records.contains_key(&entry.flow_id) {
                return Err(MeshLabError::telemetry(format!(
                    "flow {} is reported more than once",
                    entry.flow_id
                )));
            }
            telemetry.record(entry.flow_id, entry.tuple, entry.stats);
        }
        Ok(telemetry)
    }
}

pub fn parse_telemetry(content: &str) -> Result<FlowTelemetry> {
    let file: TelemetryFile = serde_json::from_str(content)
        .map_err(|e| MeshLabError::telemetry(format!("malformed flow records: {e}")))?;
    file.into_telemetry()
}

pub fn load_telemetry(path: &Path) -> Result<FlowTelemetry> {
    let content = fs::read_to_string(path).map_err(|e| {
        MeshLabError::telemetry(format!("cannot read flow records {}: {e}", path.display()))
    })?;
    parse_telemetry(&content)
}

pub fn write_telemetry(path: &Path, telemetry: &FlowTelemetry) -> Result<()> {
    write_json(path, &TelemetryFile::from_telemetry(telemetry))
}

/// Per mesh point diagnostics, one JSON document for the whole grid.
pub fn write_mesh_report(path: &Path, report: &MeshReport) -> Result<()> {
    write_json(path, report)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let io_err = |source: std::io::Error| MeshLabError::OutputWrite {
        path: path.to_path_buf(),
        source,
    };
    let data = serde_json::to_vec_pretty(value).map_err(|e| io_err(e.into()))?;
    fs::write(path, data).map_err(io_err)
}

/// Engine stand-in that replays records captured from an external run.
#[derive(Debug, Clone)]
pub struct RecordedTelemetry {
    path: PathBuf,
}

impl RecordedTelemetry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SimulationEngine for RecordedTelemetry {
    fn name(&self) -> &str {
        "recorded"
    }

    fn run(&mut self, ctx: &SimulationContext) -> Result<FlowTelemetry> {
        let telemetry = load_telemetry(&self.path)?;
        info!(
            "replaying {} flow records from {} for a {}-node grid",
            telemetry.records.len(),
            self.path.display(),
            ctx.nodes().len()
        );
        Ok(telemetry)
    }
}
