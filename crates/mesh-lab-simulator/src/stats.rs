//! Reduction of per-flow engine counters into run-level figures.
//!
//! Only unicast data flows count towards the totals: anything addressed to
//! the subnet broadcast address is control traffic and is reported per flow
//! but left out of the summary.
//!
//! The run throughput is the plain sum of the per-flow receive bitrates,
//! not a volume-weighted rate over the run. Flows active at different times
//! therefore add up as if they had overlapped.

use mesh_lab_abstract::{
    FiveTuple, FlowId, FlowTelemetry, Ipv4Subnet, MeshLabError, RawFlowRecord, Result,
};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Bits in the "k" of kbps, as the mesh scripts count it.
pub const BITS_PER_KILOBIT: f64 = 1024.0;

/// A NaN or infinity escaping a guarded division means the counters cannot
/// describe a real flow, e.g. a non-zero window too short to divide by.
fn finite(value: f64, what: &str, flow: FlowId) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(MeshLabError::telemetry(format!(
            "{what} of flow {flow} is not finite: {value}"
        )))
    }
}

/// kbps over an activity window; an empty window means no measurable rate.
fn bitrate_kbps(bytes: u64, window: f64) -> f64 {
    if window > 0.0 {
        bytes as f64 * 8.0 / BITS_PER_KILOBIT / window
    } else {
        0.0
    }
}

/// Metrics derived from a single flow record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FlowMetrics {
    /// `None` when the flow never transmitted.
    pub delivery_ratio_pct: Option<f64>,
    pub rx_bitrate_kbps: f64,
    pub tx_bitrate_kbps: f64,
    pub avg_delay_sec: f64,
}

impl FlowMetrics {
    pub fn from_record(id: FlowId, record: &RawFlowRecord) -> Result<Self> {
        let delivery_ratio_pct = if record.tx_packets > 0 {
            Some(finite(
                record.rx_packets as f64 / record.tx_packets as f64 * 100.0,
                "delivery ratio",
                id,
            )?)
        } else {
            None
        };

        // A single transmitted packet leaves a zero-length window.
        let tx_window = record.time_last_tx - record.time_first_tx;
        let tx_bitrate_kbps = if record.tx_packets > 0 {
            finite(bitrate_kbps(record.tx_bytes, tx_window), "tx bitrate", id)?
        } else {
            0.0
        };

        let (rx_bitrate_kbps, avg_delay_sec) = if record.rx_packets > 0 {
            let rx_window = record.time_last_rx - record.time_first_rx;
            (
                finite(bitrate_kbps(record.rx_bytes, rx_window), "rx bitrate", id)?,
                finite(record.delay_sum / record.rx_packets as f64, "delay", id)?,
            )
        } else {
            (0.0, 0.0)
        };

        Ok(Self {
            delivery_ratio_pct,
            rx_bitrate_kbps,
            tx_bitrate_kbps,
            avg_delay_sec,
        })
    }
}

/// Running totals over the qualifying flows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunTotals {
    pub data_flows: usize,
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub delay_sum: f64,
    pub rx_bitrate_sum_kbps: f64,
}

impl RunTotals {
    pub fn accumulate(&mut self, record: &RawFlowRecord, metrics: &FlowMetrics) {
        self.data_flows += 1;
        self.tx_packets += record.tx_packets;
        self.rx_packets += record.rx_packets;
        self.tx_bytes += record.tx_bytes;
        self.rx_bytes += record.rx_bytes;
        self.delay_sum += record.delay_sum;
        self.rx_bitrate_sum_kbps += metrics.rx_bitrate_kbps;
    }
}

/// Finalized figures of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub totals: RunTotals,
    /// Records left out as control traffic.
    pub excluded_flows: usize,
    pub delivery_ratio_pct: f64,
    pub avg_delay_sec: f64,
    pub total_rx_bitrate_kbps: f64,
}

impl RunSummary {
    pub fn finalize(totals: RunTotals, excluded_flows: usize) -> Self {
        let delivery_ratio_pct = if totals.tx_packets > 0 {
            totals.rx_packets as f64 / totals.tx_packets as f64 * 100.0
        } else {
            0.0
        };
        let avg_delay_sec = if totals.rx_packets > 0 {
            totals.delay_sum / totals.rx_packets as f64
        } else {
            0.0
        };
        let total_rx_bitrate_kbps = if totals.rx_packets > 0 {
            totals.rx_bitrate_sum_kbps
        } else {
            0.0
        };
        Self {
            totals,
            excluded_flows,
            delivery_ratio_pct,
            avg_delay_sec,
            total_rx_bitrate_kbps,
        }
    }
}

/// Per-flow line of the diagnostic report.
#[derive(Debug, Clone, Serialize)]
pub struct FlowReport {
    pub flow_id: FlowId,
    pub tuple: FiveTuple,
    pub is_data: bool,
    pub record: RawFlowRecord,
    pub metrics: FlowMetrics,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateReport {
    pub flows: Vec<FlowReport>,
    pub summary: RunSummary,
}

/// Folds engine telemetry into a [`RunSummary`].
#[derive(Debug, Clone)]
pub struct FlowAggregator {
    subnet: Ipv4Subnet,
}

impl FlowAggregator {
    pub fn new(subnet: Ipv4Subnet) -> Self {
        Self { subnet }
    }

    pub fn is_data_flow(&self, tuple: &FiveTuple) -> bool {
        !self.subnet.is_directed_broadcast(tuple.destination_address)
    }

    /// Single pass over the records in flow id order, so the result does not
    /// depend on the order the engine reported them in.
    pub fn aggregate(&self, telemetry: &FlowTelemetry) -> Result<AggregateReport> {
        if telemetry.is_empty() {
            return Err(MeshLabError::telemetry(
                "the run terminated without producing any flow record",
            ));
        }

        let mut totals = RunTotals::default();
        let mut excluded = 0;
        let mut flows = Vec::with_capacity(telemetry.records.len());

        for (&id, record) in &telemetry.records {
            let tuple = *telemetry.classifier.find_flow(id).ok_or_else(|| {
                MeshLabError::telemetry(format!("flow {id} has no five-tuple in the classifier"))
            })?;
            record.validate(id)?;

            let metrics = FlowMetrics::from_record(id, record)?;
            let is_data = self.is_data_flow(&tuple);
            if is_data {
                totals.accumulate(record, &metrics);
                log_flow(totals.data_flows, &tuple, record, &metrics);
            } else {
                excluded += 1;
                debug!(
                    "flow {id} ({tuple}) is broadcast control traffic: tx {} rx {}",
                    record.tx_packets, record.rx_packets
                );
            }

            flows.push(FlowReport {
                flow_id: id,
                tuple,
                is_data,
                record: record.clone(),
                metrics,
            });
        }

        let summary = RunSummary::finalize(totals, excluded);
        if !summary.total_rx_bitrate_kbps.is_finite() {
            return Err(MeshLabError::telemetry(
                "summed receive bitrate of the data flows is not finite",
            ));
        }
        info!("Total PDF: {} %", summary.delivery_ratio_pct);
        info!("Total Rx bitrate: {} kbps", summary.total_rx_bitrate_kbps);
        info!("Total Delay: {} s", summary.avg_delay_sec);
        Ok(AggregateReport { flows, summary })
    }
}

fn log_flow(n: usize, tuple: &FiveTuple, record: &RawFlowRecord, metrics: &FlowMetrics) {
    info!(
        "Flow {n} ({} -> {})",
        tuple.source_address, tuple.destination_address
    );
    match metrics.delivery_ratio_pct {
        Some(pdf) => info!("PDF: {pdf} %"),
        None => warn!("PDF: not computable, flow never transmitted"),
    }
    info!(
        "Tx Packets: {} | Rx Packets: {} | Lost Packets: {} | Dropped Packets: {}",
        record.tx_packets, record.rx_packets, record.lost_packets, record.dropped_packets
    );
    info!(
        "Average delay: {}s | Rx bitrate: {} kbps | Tx bitrate: {} kbps",
        metrics.avg_delay_sec, metrics.rx_bitrate_kbps, metrics.tx_bitrate_kbps
    );
}
