use mesh_lab_abstract::{MeshLabError, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::stats::RunSummary;

/// Writes the three run scalars to `<prefix>_PDF.txt`, `<prefix>_Delay.txt`
/// and `<prefix>_Throu.txt`, replacing whatever a previous run left there.
#[derive(Debug, Clone)]
pub struct ResultsWriter {
    dir: PathBuf,
    prefix: String,
}

impl ResultsWriter {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn pdf_path(&self) -> PathBuf {
        self.channel("PDF")
    }

    pub fn delay_path(&self) -> PathBuf {
        self.channel("Delay")
    }

    pub fn throughput_path(&self) -> PathBuf {
        self.channel("Throu")
    }

    fn channel(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}_{name}.txt", self.prefix))
    }

    /// Returns the written paths in PDF, delay, throughput order.
    pub fn write(&self, summary: &RunSummary) -> Result<[PathBuf; 3]> {
        let outputs = [
            (self.pdf_path(), summary.delivery_ratio_pct),
            (self.delay_path(), summary.avg_delay_sec),
            (self.throughput_path(), summary.total_rx_bitrate_kbps),
        ];
        for (path, value) in &outputs {
            write_scalar(path, *value)?;
            info!("wrote {} = {value}", path.display());
        }
        let [(pdf, _), (delay, _), (throughput, _)] = outputs;
        Ok([pdf, delay, throughput])
    }
}

fn write_scalar(path: &Path, value: f64) -> Result<()> {
    let io_err = |source: std::io::Error| MeshLabError::OutputWrite {
        path: path.to_path_buf(),
        source,
    };
    let mut out = BufWriter::new(File::create(path).map_err(io_err)?);
    writeln!(out, "{value}").map_err(io_err)?;
    out.flush().map_err(io_err)
}
