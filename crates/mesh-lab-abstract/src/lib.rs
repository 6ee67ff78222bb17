pub mod config;
pub mod context;
pub mod error;
pub mod flow;
pub mod interface;
pub mod mesh;
pub mod net;
pub mod rate;
pub mod scenario;

pub use config::{ChannelConfig, ExperimentConfig, MAX_HOP_LATENCY_MS, TrafficParams};
pub use context::{MeshNode, Position, SimulationContext};
pub use error::{MeshLabError, Result};
pub use flow::{
    FiveTuple, FlowClassifier, FlowId, FlowTelemetry, NodeIndex, PROTOCOL_UDP, RawFlowRecord,
    TrafficFlow,
};
pub use interface::SimulationEngine;
pub use mesh::{MeshPointReport, MeshReport};
pub use net::Ipv4Subnet;
pub use rate::DataRate;
pub use scenario::{ExperimentConfigOverride, ExperimentScenario};
