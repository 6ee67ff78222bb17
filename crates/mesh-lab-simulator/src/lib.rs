pub mod engine;
pub mod results;
pub mod runner;
pub mod stats;
pub mod telemetry;
pub mod trace;
pub mod traffic;

pub use engine::LossyChannelEngine;
pub use results::ResultsWriter;
pub use runner::{Experiment, SimulationRun, load_scenario};
pub use stats::{AggregateReport, FlowAggregator, FlowMetrics, FlowReport, RunSummary, RunTotals};
pub use telemetry::{RecordedTelemetry, load_telemetry, write_mesh_report, write_telemetry};
pub use trace::ExperimentReport;
pub use traffic::TrafficGenerator;
