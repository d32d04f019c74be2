use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use tracing::info;

use uptime_config::AnalyzerConfig;

use crate::logging;

#[derive(Parser, Clone, Debug)]
pub struct AnalyzeCmd {
    /// Analyzer configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: PathBuf,
}

impl AnalyzeCmd {
    pub async fn run(self) -> Result<()> {
        let config = AnalyzerConfig::load(&self.config).wrap_err_with(|| {
            format!("Failed to load configuration from {}", self.config.display())
        })?;

        logging::init(config.logging);
        info!(file = %self.config.display(), network = %config.network_name, "Loaded configuration");

        let report = uptime_analyzer::run(&config).await?;

        report
            .publish(&config.output, config.output_region())
            .await
            .wrap_err("Failed to write the report")?;

        Ok(())
    }
}
