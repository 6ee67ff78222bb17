use crate::config::ExperimentConfig;
use crate::rate::DataRate;
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
pub struct ExperimentScenario {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: ExperimentConfigOverride,
}

/// Partial config, applied on top of the defaults.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ExperimentConfigOverride {
    pub x_size: Option<u32>,
    pub y_size: Option<u32>,
    pub step: Option<f64>,
    pub total_time: Option<f64>,
    pub packet_size: Option<u32>,
    pub tx_rate: Option<DataRate>,
    pub n_ifaces: Option<u32>,
    pub multi_channel: Option<bool>,
    pub stack: Option<String>,
    pub seed: Option<u64>,
    pub results_prefix: Option<String>,
    pub loss_rate: Option<f64>,
    pub min_latency: Option<u64>,
    pub max_latency: Option<u64>,
    pub beacon_interval: Option<f64>,
    pub mean_duration: Option<f64>,
}

impl ExperimentConfigOverride {
    pub fn apply_to(&self, config: &mut ExperimentConfig) {
        if let Some(v) = self.x_size {
            config.x_size = v;
        }
        if let Some(v) = self.y_size {
            config.y_size = v;
        }
        if let Some(v) = self.step {
            config.step = v;
        }
        if let Some(v) = self.total_time {
            config.total_time = v;
        }
        if let Some(v) = self.packet_size {
            config.packet_size = v;
        }
        if let Some(v) = self.tx_rate {
            config.tx_rate = v;
        }
        if let Some(v) = self.n_ifaces {
            config.n_ifaces = v;
        }
        if let Some(v) = self.multi_channel {
            config.multi_channel = v;
        }
        if let Some(v) = &self.stack {
            config.stack = v.clone();
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        if let Some(v) = &self.results_prefix {
            config.results_prefix = v.clone();
        }
        if let Some(v) = self.loss_rate {
            config.channel.loss_rate = v;
        }
        if let Some(v) = self.min_latency {
            config.channel.min_latency = v;
        }
        if let Some(v) = self.max_latency {
            config.channel.max_latency = v;
        }
        if let Some(v) = self.beacon_interval {
            config.channel.beacon_interval = v;
        }
        if let Some(v) = self.mean_duration {
            config.traffic.mean_duration = v;
        }
    }
}
