use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures surfaced by the experiment pipeline.
#[derive(Debug, Error)]
pub enum MeshLabError {
    /// Invalid parameter combination detected before generation. No flow set
    /// is produced and the simulation must not be started.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The engine produced no records, or a record is missing data needed to
    /// compute the run summary.
    #[error("incomplete telemetry: {0}")]
    IncompleteTelemetry(String),

    /// A results channel could not be opened or written. Already computed
    /// summaries stay valid.
    #[error("failed to write results to {}: {source}", path.display())]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The simulation engine itself failed to run.
    #[error("simulation engine failure: {0}")]
    Engine(String),
}

impl MeshLabError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::IncompleteTelemetry(message.into())
    }
}

pub type Result<T, E = MeshLabError> = std::result::Result<T, E>;
