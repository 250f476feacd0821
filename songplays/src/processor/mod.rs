pub mod activity_log;
pub mod config;
pub mod records;
pub mod sink;
pub mod song_catalog;
pub mod songplays;
pub mod source;
pub mod time;
pub mod udf;

pub use activity_log::ActivityLogTransformer;
pub use config::PipelineConfig;
pub use records::ReadStats;
pub use sink::{TableSink, WriteSummary};
pub use song_catalog::SongCatalogTransformer;
pub use songplays::FactAssembler;
pub use source::{DatasetKind, SourceReader};
pub use time::TimeZonePolicy;
pub use udf::TimeFunctions;

use crate::storage::StorageManager;
use common::Result;
use sink::{ARTISTS, SONGPLAYS, SONGS, TIME, USERS};
use datafusion::execution::context::SessionContext;
use serde::Serialize;
use tracing::info;

/// Outcome of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub song_data: ReadStats,
    pub log_data: ReadStats,
    pub tables: Vec<WriteSummary>,
}

impl RunSummary {
    pub fn table(&self, name: &str) -> Option<&WriteSummary> {
        self.tables.iter().find(|t| t.table == name)
    }
}

/// Runs the star-schema build: catalog dimensions, activity dimensions,
/// then the fact table, writing each table as soon as it is computed.
pub struct SongplaysProcessor {
    pub ctx: SessionContext,
    config: PipelineConfig,
    storage: StorageManager,
    time_fns: TimeFunctions,
}

impl SongplaysProcessor {
    /// Fails with `CredentialMissing` before any I/O if a remote location
    /// has no credentials.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        Self::with_context(SessionContext::new(), config)
    }

    pub fn with_context(ctx: SessionContext, config: PipelineConfig) -> Result<Self> {
        let storage = StorageManager::new(config.storage.clone());
        storage.ensure_credentials(&[config.input_data.as_str(), config.output_data.as_str()])?;

        let time_fns = TimeFunctions::new(config.timezone);
        time_fns.register(&ctx);

        Ok(Self {
            ctx,
            config,
            storage,
            time_fns,
        })
    }

    pub async fn run(&self) -> Result<RunSummary> {
        let source = self.storage.resolve_source(&self.config.input_data)?;
        let target = self.storage.resolve_sink(&self.config.output_data)?;
        let reader = SourceReader::new(source, &self.config)?;
        let sink = TableSink::new(target, self.config.io);
        let mut tables = Vec::with_capacity(5);

        info!(input = %self.config.input_data, "Processing song catalog");
        let (catalog, song_data) = reader.load(DatasetKind::SongCatalog, &self.ctx).await?;
        let catalog_tables = SongCatalogTransformer.transform(catalog.clone())?;
        tables.push(sink.write(&SONGS, catalog_tables.songs).await?);
        tables.push(sink.write(&ARTISTS, catalog_tables.artists).await?);

        info!(input = %self.config.input_data, "Processing activity log");
        let (log, log_data) = reader.load(DatasetKind::ActivityLog, &self.ctx).await?;
        let activity = ActivityLogTransformer::new(self.time_fns.clone()).transform(log)?;
        tables.push(sink.write(&USERS, activity.users).await?);
        tables.push(sink.write(&TIME, activity.time).await?);

        let facts = FactAssembler
            .assemble(&self.ctx, activity.plays, catalog)
            .await?;
        tables.push(sink.write(&SONGPLAYS, facts).await?);

        let summary = RunSummary {
            song_data,
            log_data,
            tables,
        };
        info!(
            output = %self.config.output_data,
            songplays = summary.table("songplays").map(|t| t.rows).unwrap_or(0),
            skipped_records = summary.song_data.skipped + summary.log_data.skipped,
            "Pipeline finished"
        );
        Ok(summary)
    }
}
