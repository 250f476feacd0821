use super::time::TimeZonePolicy;
use crate::storage::S3Config;
use crate::utils::retry::IoPolicy;
use common::config::{MalformedRecordPolicy, Settings};
use common::{Error, Result};
use std::time::Duration;

/// Everything one pipeline run needs, resolved from `Settings` up front.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub input_data: String,
    pub output_data: String,
    pub timezone: TimeZonePolicy,
    pub malformed_records: MalformedRecordPolicy,
    pub io: IoPolicy,
    pub song_data_pattern: String,
    pub log_data_pattern: String,
    pub batch_size: usize,
    pub storage: S3Config,
}

impl PipelineConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let pipeline = &settings.pipeline;
        if pipeline.io_timeout_secs == 0 {
            return Err(Error::InvalidInput("pipeline.io_timeout_secs must be at least 1".into()));
        }
        if pipeline.batch_size == 0 {
            return Err(Error::InvalidInput("pipeline.batch_size must be at least 1".into()));
        }
        let io = IoPolicy {
            timeout: Duration::from_secs(pipeline.io_timeout_secs),
            max_retries: pipeline.max_retries,
            base_delay_ms: pipeline.retry_base_delay_ms,
        };

        Ok(Self {
            input_data: pipeline.input_data.clone(),
            output_data: pipeline.output_data.clone(),
            timezone: pipeline.timezone.parse()?,
            malformed_records: pipeline.malformed_records,
            io,
            song_data_pattern: pipeline.song_data_pattern.clone(),
            log_data_pattern: pipeline.log_data_pattern.clone(),
            batch_size: pipeline.batch_size,
            storage: S3Config {
                region: settings.aws.region.clone(),
                endpoint: settings.aws.endpoint.clone(),
                credentials: settings.aws.credentials(),
                timeout: io.timeout,
            },
        })
    }

    /// Local-only configuration with default policies.
    pub fn local(input_data: impl Into<String>, output_data: impl Into<String>) -> Self {
        let io = IoPolicy::default();
        Self {
            input_data: input_data.into(),
            output_data: output_data.into(),
            timezone: TimeZonePolicy::Utc,
            malformed_records: MalformedRecordPolicy::Skip,
            io,
            song_data_pattern: "*/*/*/*.json".to_string(),
            log_data_pattern: "*/*/*.json".to_string(),
            batch_size: 8192,
            storage: S3Config {
                region: "us-west-2".to_string(),
                endpoint: None,
                credentials: None,
                timeout: io.timeout,
            },
        }
    }
}
