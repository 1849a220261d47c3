use std::path::PathBuf;

use clap::Parser;

use crate::config::batch::{BatchConfig, ProgressMode};

// Define command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Extract entities and citations from a batch of documents", long_about = None)]
pub struct Args {
    /// Files or directories to ingest. Directories are scanned one level deep.
    #[arg(required_unless_present = "validate_config")]
    pub inputs: Vec<PathBuf>,

    /// Path to the batch configuration YAML file. Defaults apply when omitted.
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Maximum number of documents processed at once (overrides the config file)
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// File extensions picked up when scanning directories
    #[arg(short = 'e', long = "extension", default_value = "txt")]
    pub extensions: Vec<String>,

    /// Port for the Prometheus /metrics endpoint
    #[arg(long)]
    pub metrics_port: Option<u16>,

    /// Directory for rolling JSON log files
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// How progress is shown
    #[arg(long, value_enum)]
    pub progress: Option<ProgressMode>,

    /// Write the full batch result as JSON to this path
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Validate the configuration and exit
    #[arg(long, default_value_t = false)]
    pub validate_config: bool,
}

impl Args {
    /// Command-line flags win over values from the config file.
    pub fn apply_overrides(&self, config: &mut BatchConfig) {
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(port) = self.metrics_port {
            config.metrics_port = Some(port);
        }
        if let Some(dir) = &self.log_dir {
            config.log_dir = Some(dir.clone());
        }
        if let Some(mode) = self.progress {
            config.progress = mode;
        }
    }
}
