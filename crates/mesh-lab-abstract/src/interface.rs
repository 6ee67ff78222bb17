use crate::context::SimulationContext;
use crate::error::Result;
use crate::flow::FlowTelemetry;
use crate::mesh::MeshReport;

/// The network simulator the experiment delegates to.
///
/// Implementations install one on/off source and one packet sink per flow of
/// the context, run until `total_time` and return the per-flow records that
/// remain once the run has terminated.
pub trait SimulationEngine {
    /// Short label used in logs.
    fn name(&self) -> &str;

    fn run(&mut self, ctx: &SimulationContext) -> Result<FlowTelemetry>;

    /// Per mesh point counters of the last run, for engines that keep them.
    fn mesh_report(&self) -> Option<MeshReport> {
        None
    }
}
