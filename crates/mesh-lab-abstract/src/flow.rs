use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::Ipv4Addr;

use crate::error::{MeshLabError, Result};

/// Index of a mesh node in `[0, x_size * y_size)`.
pub type NodeIndex = usize;

/// One directed traffic session handed to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficFlow {
    pub source: NodeIndex,
    pub destination: NodeIndex,
    /// Seconds since simulation start.
    pub start_time: f64,
    pub stop_time: f64,
    pub dest_port: u16,
}

impl TrafficFlow {
    pub fn duration(&self) -> f64 {
        self.stop_time - self.start_time
    }
}

/// Identifier the engine assigns to an observed flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowId(pub u32);

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub const PROTOCOL_UDP: u8 = 17;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FiveTuple {
    pub source_address: Ipv4Addr,
    pub destination_address: Ipv4Addr,
    pub protocol: u8,
    pub source_port: u16,
    pub destination_port: u16,
}

impl fmt::Display for FiveTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.source_address, self.source_port, self.destination_address, self.destination_port
        )
    }
}

/// Post-run counters for a single flow. Timestamps and `delay_sum` are in
/// seconds; timestamps of a direction with no packets are meaningless.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawFlowRecord {
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub lost_packets: u64,
    pub dropped_packets: u64,
    pub time_first_tx: f64,
    pub time_last_tx: f64,
    pub time_first_rx: f64,
    pub time_last_rx: f64,
    pub delay_sum: f64,
}

impl RawFlowRecord {
    /// Check the counters are mutually consistent.
    pub fn validate(&self, id: FlowId) -> Result<()> {
        let times = [
            self.time_first_tx,
            self.time_last_tx,
            self.time_first_rx,
            self.time_last_rx,
            self.delay_sum,
        ];
        if times.iter().any(|t| !t.is_finite() || *t < 0.0) {
            return Err(MeshLabError::telemetry(format!(
                "flow {id} carries a negative or non-finite timestamp"
            )));
        }
        if self.tx_packets > 0 && self.time_last_tx < self.time_first_tx {
            return Err(MeshLabError::telemetry(format!(
                "flow {id} has last tx before first tx"
            )));
        }
        if self.rx_packets > 0 && self.time_last_rx < self.time_first_rx {
            return Err(MeshLabError::telemetry(format!(
                "flow {id} has last rx before first rx"
            )));
        }
        if self.rx_packets > 0 && self.rx_bytes == 0 {
            return Err(MeshLabError::telemetry(format!(
                "flow {id} received {} packets but no bytes",
                self.rx_packets
            )));
        }
        Ok(())
    }
}

/// Resolves flow identifiers back to their five-tuple.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowClassifier {
    tuples: HashMap<FlowId, FiveTuple>,
}

impl FlowClassifier {
    pub fn insert(&mut self, id: FlowId, tuple: FiveTuple) {
        self.tuples.insert(id, tuple);
    }

    pub fn find_flow(&self, id: FlowId) -> Option<&FiveTuple> {
        self.tuples.get(&id)
    }
}

/// Everything the engine reports once the run has terminated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowTelemetry {
    pub records: BTreeMap<FlowId, RawFlowRecord>,
    pub classifier: FlowClassifier,
}

impl FlowTelemetry {
    pub fn record(&mut self, id: FlowId, tuple: FiveTuple, record: RawFlowRecord) {
        self.classifier.insert(id, tuple);
        self.records.insert(id, record);
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple(last: u8) -> FiveTuple {
        FiveTuple {
            source_address: Ipv4Addr::new(10, 0, 0, 1),
            destination_address: Ipv4Addr::new(10, 0, 0, last),
            protocol: PROTOCOL_UDP,
            source_port: 49153,
            destination_port: 49001,
        }
    }

    #[test]
    fn classifier_resolves_flow_ids() {
        let mut classifier = FlowClassifier::default();
        classifier.insert(FlowId(1), tuple(2));
        classifier.insert(FlowId(2), tuple(3));
        assert_eq!(classifier.find_flow(FlowId(2)), Some(&tuple(3)));
        assert_eq!(classifier.find_flow(FlowId(1)), Some(&tuple(2)));
        assert!(classifier.find_flow(FlowId(7)).is_none());
    }

    #[test]
    fn inconsistent_record_is_incomplete_telemetry() {
        let record = RawFlowRecord {
            tx_packets: 3,
            time_first_tx: 5.0,
            time_last_tx: 4.0,
            ..Default::default()
        };
        assert!(matches!(
            record.validate(FlowId(1)),
            Err(MeshLabError::IncompleteTelemetry(_))
        ));

        let record = RawFlowRecord {
            delay_sum: f64::NAN,
            ..Default::default()
        };
        assert!(record.validate(FlowId(1)).is_err());
    }

    #[test]
    fn idle_record_is_consistent() {
        RawFlowRecord::default().validate(FlowId(1)).unwrap();
    }
}
