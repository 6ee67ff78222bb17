use serde::Serialize;
use std::net::Ipv4Addr;

use crate::config::ExperimentConfig;
use crate::error::{MeshLabError, Result};
use crate::flow::{NodeIndex, TrafficFlow};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MeshNode {
    pub index: NodeIndex,
    /// Grid column and row.
    pub cell: (u32, u32),
    pub position: Position,
    pub address: Ipv4Addr,
}

/// State of one experiment as it moves from configuration to simulation.
///
/// Built once from a validated config (grid placement and addressing), then
/// receives its traffic matrix before being handed to an engine by reference.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationContext {
    config: ExperimentConfig,
    nodes: Vec<MeshNode>,
    flows: Vec<TrafficFlow>,
}

impl SimulationContext {
    pub fn new(config: ExperimentConfig) -> Result<Self> {
        config.validate()?;

        let mut nodes = Vec::with_capacity(config.node_count());
        // Column-major, matching the order nodes are created in.
        for column in 0..config.x_size {
            for row in 0..config.y_size {
                let index = nodes.len();
                nodes.push(MeshNode {
                    index,
                    cell: (column, row),
                    position: Position {
                        x: f64::from(column) * config.step,
                        y: f64::from(row) * config.step,
                        z: 0.0,
                    },
                    address: config.subnet.host(index)?,
                });
            }
        }

        Ok(Self {
            config,
            nodes,
            flows: Vec::new(),
        })
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn nodes(&self) -> &[MeshNode] {
        &self.nodes
    }

    pub fn node(&self, index: NodeIndex) -> Option<&MeshNode> {
        self.nodes.get(index)
    }

    pub fn flows(&self) -> &[TrafficFlow] {
        &self.flows
    }

    /// Attach the traffic matrix. Every flow is checked against the grid and
    /// the run length before anything is accepted.
    pub fn install_traffic(&mut self, flows: Vec<TrafficFlow>) -> Result<()> {
        let total_time = self.config.total_time;
        for (i, flow) in flows.iter().enumerate() {
            if flow.source >= self.nodes.len() || flow.destination >= self.nodes.len() {
                return Err(MeshLabError::config(format!(
                    "flow #{i} references a node outside the {}-node grid",
                    self.nodes.len()
                )));
            }
            if flow.source == flow.destination {
                return Err(MeshLabError::config(format!(
                    "flow #{i} has node {} as both source and destination",
                    flow.source
                )));
            }
            let fits = 0.0 <= flow.start_time
                && flow.start_time < flow.stop_time
                && flow.stop_time <= total_time;
            if !fits {
                return Err(MeshLabError::config(format!(
                    "flow #{i} window [{}, {}] does not fit in a {total_time}s run",
                    flow.start_time, flow.stop_time
                )));
            }
        }
        self.flows = flows;
        Ok(())
    }

    /// Grid hops between two nodes (Manhattan distance, at least one).
    pub fn hop_distance(&self, a: NodeIndex, b: NodeIndex) -> u32 {
        match (self.node(a), self.node(b)) {
            (Some(a), Some(b)) => {
                (a.cell.0.abs_diff(b.cell.0) + a.cell.1.abs_diff(b.cell.1)).max(1)
            }
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SimulationContext;
    use crate::config::ExperimentConfig;
    use crate::flow::TrafficFlow;
    use std::net::Ipv4Addr;

    fn small() -> SimulationContext {
        SimulationContext::new(ExperimentConfig {
            x_size: 3,
            y_size: 2,
            step: 100.0,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn grid_is_laid_out_column_major() {
        let ctx = small();
        assert_eq!(ctx.nodes().len(), 6);
        let node = ctx.node(3).unwrap();
        assert_eq!(node.cell, (1, 1));
        assert_eq!(node.position.x, 100.0);
        assert_eq!(node.position.y, 100.0);
        assert_eq!(node.address, Ipv4Addr::new(192, 168, 1, 4));
    }

    #[test]
    fn hop_distance_is_manhattan() {
        let ctx = small();
        assert_eq!(ctx.hop_distance(0, 5), 3);
        assert_eq!(ctx.hop_distance(0, 1), 1);
        assert_eq!(ctx.hop_distance(2, 2), 1);
    }

    #[test]
    fn invalid_flows_are_refused() {
        let mut ctx = small();
        let good = TrafficFlow {
            source: 0,
            destination: 5,
            start_time: 60.0,
            stop_time: 90.0,
            dest_port: 49010,
        };
        ctx.install_traffic(vec![good.clone()]).unwrap();
        assert_eq!(ctx.flows().len(), 1);

        let same = TrafficFlow {
            destination: 0,
            ..good.clone()
        };
        assert!(ctx.install_traffic(vec![same]).is_err());

        let outside = TrafficFlow {
            destination: 6,
            ..good.clone()
        };
        assert!(ctx.install_traffic(vec![outside]).is_err());

        let late = TrafficFlow {
            stop_time: 500.0,
            ..good
        };
        assert!(ctx.install_traffic(vec![late]).is_err());
        // Failed installs leave the previous matrix in place.
        assert_eq!(ctx.flows().len(), 1);
    }
}
