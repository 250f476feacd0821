use config::{Config, ConfigError};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(default)]
    pub aws: AwsConfig,
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AwsConfig {
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    /// S3-compatible endpoint, e.g. a local MinIO.
    pub endpoint: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineSettings {
    pub input_data: String,
    pub output_data: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub malformed_records: MalformedRecordPolicy,
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_song_data_pattern")]
    pub song_data_pattern: String,
    #[serde(default = "default_log_data_pattern")]
    pub log_data_pattern: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MalformedRecordPolicy {
    /// Log and count the record, keep reading.
    #[default]
    Skip,
    /// Fail the run on the first bad record.
    Abort,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            access_key_id: None,
            secret_access_key: None,
            region: default_region(),
            endpoint: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl AwsConfig {
    /// Credentials from the config file, falling back to the
    /// `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` pair.
    pub fn credentials(&self) -> Option<AwsCredentials> {
        let access_key_id = non_empty(self.access_key_id.clone())
            .or_else(|| non_empty(std::env::var("AWS_ACCESS_KEY_ID").ok()))?;
        let secret_access_key = non_empty(self.secret_access_key.clone())
            .or_else(|| non_empty(std::env::var("AWS_SECRET_ACCESS_KEY").ok()))?;

        Some(AwsCredentials {
            access_key_id,
            secret_access_key,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn default_region() -> String {
    "us-west-2".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_io_timeout_secs() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_song_data_pattern() -> String {
    "*/*/*/*.json".to_string()
}

fn default_log_data_pattern() -> String {
    "*/*/*.json".to_string()
}

fn default_batch_size() -> usize {
    8192
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("SONGPLAYS").separator("__"));

        let config = builder.build()?;
        let settings: Settings = config.try_deserialize()?;

        debug!(
            input = %settings.pipeline.input_data,
            output = %settings.pipeline.output_data,
            timezone = %settings.pipeline.timezone,
            malformed_records = ?settings.pipeline.malformed_records,
            "Loaded pipeline settings"
        );

        Ok(settings)
    }
}
