pub mod processor;
pub mod schema;
pub mod storage;
pub mod utils;

use common::Result;
use common::config::{LogFormat, LoggingConfig, Settings};
use processor::{PipelineConfig, RunSummary, SongplaysProcessor};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Runs the complete songplays pipeline described by the config file.
pub async fn run_songplays_pipeline(config_path: &str) -> Result<RunSummary> {
    let settings = Settings::new(config_path)?;
    init_tracing(&settings.logging);

    let config = PipelineConfig::from_settings(&settings)?;
    info!(
        config = config_path,
        input = %config.input_data,
        output = %config.output_data,
        timezone = ?config.timezone,
        "Starting songplays pipeline"
    );

    let processor = SongplaysProcessor::new(config)?;
    processor.run().await
}

/// Installs the global subscriber. `RUST_LOG` overrides the configured level;
/// later calls are no-ops.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let _ = match logging.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
}
