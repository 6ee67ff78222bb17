use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

use crate::error::{MeshLabError, Result};
use crate::net::Ipv4Subnet;
use crate::rate::DataRate;

/// Full description of one mesh experiment run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Grid columns.
    pub x_size: u32,
    /// Grid rows.
    pub y_size: u32,
    /// Separation between neighbouring nodes, in metres.
    pub step: f64,
    /// Upper bound of the random MAC start offset, in seconds.
    pub random_start: f64,
    /// Simulated time, in seconds.
    pub total_time: f64,
    /// Application payload size of the on/off sources, in bytes.
    pub packet_size: u32,
    pub tx_rate: DataRate,
    /// Radio interfaces per mesh point.
    pub n_ifaces: u32,
    /// Spread interfaces over orthogonal channels.
    pub multi_channel: bool,
    pub pcap: bool,
    /// Mesh stack installer passed through to the engine.
    pub stack: String,
    pub seed: u64,
    pub subnet: Ipv4Subnet,
    /// File name prefix of the three results channels.
    pub results_prefix: String,
    pub traffic: TrafficParams,
    pub channel: ChannelConfig,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            x_size: 5,
            y_size: 5,
            step: 170.0,
            random_start: 0.1,
            total_time: 240.0,
            packet_size: 1024,
            tx_rate: DataRate::from_bps(150_000),
            n_ifaces: 1,
            multi_channel: false,
            pcap: false,
            stack: "ns3::Dot11sStack".to_string(),
            seed: 0,
            subnet: Ipv4Subnet::default(),
            results_prefix: "1_HWMP".to_string(),
            traffic: TrafficParams::default(),
            channel: ChannelConfig::default(),
        }
    }
}

impl ExperimentConfig {
    pub fn node_count(&self) -> usize {
        self.x_size as usize * self.y_size as usize
    }

    /// Reject parameter combinations that cannot yield a valid experiment.
    pub fn validate(&self) -> Result<()> {
        let nodes = self.node_count();
        if nodes <= 1 {
            return Err(MeshLabError::config(format!(
                "a {}x{} grid has {nodes} node(s); at least two are needed for a flow",
                self.x_size, self.y_size
            )));
        }
        if !(self.step.is_finite() && self.step > 0.0) {
            return Err(MeshLabError::config("node spacing must be positive"));
        }
        if !(self.random_start.is_finite() && self.random_start >= 0.0) {
            return Err(MeshLabError::config("MAC random start must be non-negative"));
        }
        if !(self.total_time.is_finite() && self.total_time > 0.0) {
            return Err(MeshLabError::config("total simulation time must be positive"));
        }
        if self.packet_size == 0 {
            return Err(MeshLabError::config("packet size must be positive"));
        }
        if self.n_ifaces == 0 {
            return Err(MeshLabError::config("mesh points need at least one interface"));
        }
        if self.stack.trim().is_empty() {
            return Err(MeshLabError::config("mesh stack identifier is empty"));
        }
        let capacity = self.subnet.host_capacity()?;
        if nodes as u64 > capacity {
            return Err(MeshLabError::config(format!(
                "{nodes} nodes do not fit in subnet {} ({capacity} hosts)",
                self.subnet
            )));
        }
        self.traffic.validate(self.total_time)?;
        self.channel.validate()
    }
}

/// Shape of the randomized traffic matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficParams {
    /// Warm-up left untouched at the beginning of the run, in seconds.
    pub earliest_start: f64,
    /// No flow starts later than `total_time - tail_margin`.
    pub tail_margin: f64,
    /// No flow stops later than `total_time - end_margin`.
    pub end_margin: f64,
    /// Mean of the exponential flow duration, in seconds.
    pub mean_duration: f64,
    /// Added to every exponential draw so durations stay strictly positive.
    pub min_duration: f64,
    pub port_min: u16,
    pub port_max: u16,
    /// Cap on source re-draws while looking for a source distinct from the destination.
    pub max_redraws: u32,
}

impl Default for TrafficParams {
    fn default() -> Self {
        Self {
            earliest_start: 50.0,
            tail_margin: 15.0,
            end_margin: 10.0,
            mean_duration: 30.0,
            min_duration: 1.0,
            port_min: 49000,
            port_max: 49100,
            max_redraws: 1024,
        }
    }
}

impl TrafficParams {
    pub fn start_window(&self, total_time: f64) -> RangeInclusive<f64> {
        self.earliest_start..=total_time - self.tail_margin
    }

    pub fn stop_limit(&self, total_time: f64) -> f64 {
        total_time - self.end_margin
    }

    pub fn ports(&self) -> RangeInclusive<u16> {
        self.port_min..=self.port_max
    }

    pub fn validate(&self, total_time: f64) -> Result<()> {
        let finite = [
            self.earliest_start,
            self.tail_margin,
            self.end_margin,
            self.mean_duration,
            self.min_duration,
        ]
        .iter()
        .all(|v| v.is_finite());
        if !finite {
            return Err(MeshLabError::config("traffic parameters must be finite"));
        }
        if self.earliest_start < 0.0 {
            return Err(MeshLabError::config("earliest flow start must be non-negative"));
        }
        if self.end_margin < 0.0 {
            return Err(MeshLabError::config("end margin must be non-negative"));
        }
        let window = self.start_window(total_time);
        if *window.end() <= *window.start() {
            return Err(MeshLabError::config(format!(
                "start window [{}, {}] is empty for a {total_time}s run",
                window.start(),
                window.end()
            )));
        }
        // Flows must stop strictly after the latest possible start.
        if self.end_margin >= self.tail_margin {
            return Err(MeshLabError::config(format!(
                "end margin {} must be smaller than tail margin {}",
                self.end_margin, self.tail_margin
            )));
        }
        if self.mean_duration <= 0.0 {
            return Err(MeshLabError::config("mean flow duration must be positive"));
        }
        if self.min_duration <= 0.0 {
            return Err(MeshLabError::config("minimum flow duration must be positive"));
        }
        if self.port_min > self.port_max {
            return Err(MeshLabError::config(format!(
                "port range {}..={} is inverted",
                self.port_min, self.port_max
            )));
        }
        if self.max_redraws == 0 {
            return Err(MeshLabError::config("source re-draw cap must be at least one"));
        }
        Ok(())
    }
}

/// Upper bound on a single hop's latency, in milliseconds.
pub const MAX_HOP_LATENCY_MS: u64 = 60_000;

/// Knobs of the built-in lossy channel engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Probability that a single hop loses a packet.
    pub loss_rate: f64,
    /// Per-hop latency bounds, in milliseconds.
    pub min_latency: u64,
    pub max_latency: u64,
    /// Period of the broadcast control beacons each node emits, in seconds.
    /// Zero disables beacons.
    pub beacon_interval: f64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            loss_rate: 0.02,
            min_latency: 2,
            max_latency: 10,
            beacon_interval: 1.0,
        }
    }
}

impl ChannelConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.loss_rate) {
            return Err(MeshLabError::config(format!(
                "loss rate {} is outside [0, 1]",
                self.loss_rate
            )));
        }
        if self.min_latency > self.max_latency {
            return Err(MeshLabError::config(format!(
                "latency range {}..={} ms is inverted",
                self.min_latency, self.max_latency
            )));
        }
        if self.max_latency > MAX_HOP_LATENCY_MS {
            return Err(MeshLabError::config(format!(
                "hop latency {} ms exceeds the {MAX_HOP_LATENCY_MS} ms ceiling",
                self.max_latency
            )));
        }
        if !(self.beacon_interval.is_finite() && self.beacon_interval >= 0.0) {
            return Err(MeshLabError::config("beacon interval must be non-negative"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ExperimentConfig, MAX_HOP_LATENCY_MS};
    use crate::error::MeshLabError;

    #[test]
    fn default_config_is_valid() {
        let config = ExperimentConfig::default();
        config.validate().unwrap();
        assert_eq!(config.node_count(), 25);
    }

    #[test]
    fn single_node_grid_is_rejected() {
        let config = ExperimentConfig {
            x_size: 1,
            y_size: 1,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(MeshLabError::Configuration(_))));
    }

    #[test]
    fn empty_start_window_is_rejected() {
        let config = ExperimentConfig {
            total_time: 65.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(MeshLabError::Configuration(_))));

        let config = ExperimentConfig {
            total_time: 65.5,
            ..Default::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn end_margin_must_leave_room_after_latest_start() {
        let mut config = ExperimentConfig::default();
        config.traffic.end_margin = config.traffic.tail_margin;
        assert!(config.validate().is_err());
    }

    #[test]
    fn grid_must_fit_in_subnet() {
        let config = ExperimentConfig {
            x_size: 16,
            y_size: 16,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn channel_bounds_are_checked() {
        let mut config = ExperimentConfig::default();
        config.channel.loss_rate = 1.5;
        assert!(config.validate().is_err());

        let mut config = ExperimentConfig::default();
        config.channel.min_latency = 20;
        config.channel.max_latency = 10;
        assert!(config.validate().is_err());

        let mut config = ExperimentConfig::default();
        config.channel.max_latency = u64::MAX;
        assert!(matches!(config.validate(), Err(MeshLabError::Configuration(_))));
        config.channel.max_latency = MAX_HOP_LATENCY_MS;
        config.validate().unwrap();
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config: ExperimentConfig = toml::from_str(
            r#"
            x_size = 3
            tx_rate = "64kbps"

            [traffic]
            mean_duration = 12.0
            "#,
        )
        .unwrap();
        assert_eq!(config.x_size, 3);
        assert_eq!(config.y_size, 5);
        assert_eq!(config.tx_rate.bits_per_second(), 64_000);
        assert_eq!(config.traffic.mean_duration, 12.0);
        assert_eq!(config.traffic.earliest_start, 50.0);
    }
}
