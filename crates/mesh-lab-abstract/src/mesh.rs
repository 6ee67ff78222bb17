use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use crate::context::SimulationContext;
use crate::flow::NodeIndex;

/// Counters of one mesh point at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshPointReport {
    pub node: NodeIndex,
    pub address: Ipv4Addr,
    pub cell: (u32, u32),
    pub interfaces: u32,
    pub beacons_sent: u64,
    /// Data packets handed to the channel by sources on this node.
    pub packets_sourced: u64,
    pub bytes_sourced: u64,
    /// Data packets delivered to sinks on this node.
    pub packets_sunk: u64,
    pub bytes_sunk: u64,
    /// Packets sent from this node, beacons included, that the channel lost.
    pub channel_drops: u64,
}

impl Default for MeshPointReport {
    fn default() -> Self {
        Self {
            node: NodeIndex::default(),
            address: Ipv4Addr::UNSPECIFIED,
            cell: (0, 0),
            interfaces: 0,
            beacons_sent: 0,
            packets_sourced: 0,
            bytes_sourced: 0,
            packets_sunk: 0,
            bytes_sunk: 0,
            channel_drops: 0,
        }
    }
}

/// Per mesh point diagnostics, taken when the simulated time runs out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshReport {
    pub stack: String,
    /// Simulated time the counters were read at, in seconds.
    pub at_time: f64,
    pub points: Vec<MeshPointReport>,
}

impl MeshReport {
    /// Zeroed counters for every node of the grid.
    pub fn for_grid(ctx: &SimulationContext) -> Self {
        let config = ctx.config();
        let points = ctx
            .nodes()
            .iter()
            .map(|node| MeshPointReport {
                node: node.index,
                address: node.address,
                cell: node.cell,
                interfaces: config.n_ifaces,
                ..Default::default()
            })
            .collect();
        Self {
            stack: config.stack.clone(),
            at_time: config.total_time,
            points,
        }
    }

    pub fn point_mut(&mut self, node: NodeIndex) -> Option<&mut MeshPointReport> {
        self.points.get_mut(node)
    }
}
