use super::config::PipelineConfig;
use super::records::{ReadStats, SourceRecord, collect_records, parse_json_lines};
use crate::schema::{RawSchemaVersion, get_raw_schema};
use crate::storage::StorageLocation;
use crate::utils::retry::{IoPolicy, retry_with_backoff};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use common::config::MalformedRecordPolicy;
use common::{Error, Result};
use datafusion::datasource::MemTable;
use datafusion::prelude::{DataFrame, SessionContext};
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use glob::{MatchOptions, Pattern};
use object_store::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

const FETCH_CONCURRENCY: usize = 8;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    SongCatalog,
    ActivityLog,
}

impl DatasetKind {
    /// Directory under the input root holding this dataset.
    pub fn dir_name(&self) -> &'static str {
        match self {
            DatasetKind::SongCatalog => "song_data",
            DatasetKind::ActivityLog => "log_data",
        }
    }

    pub fn schema(&self) -> SchemaRef {
        match self {
            DatasetKind::SongCatalog => get_raw_schema(RawSchemaVersion::SongCatalog),
            DatasetKind::ActivityLog => get_raw_schema(RawSchemaVersion::ActivityLog),
        }
    }
}

pub struct SourceReader {
    location: StorageLocation,
    io: IoPolicy,
    malformed_records: MalformedRecordPolicy,
    batch_size: usize,
    song_data_pattern: Pattern,
    log_data_pattern: Pattern,
}

impl SourceReader {
    pub fn new(location: StorageLocation, config: &PipelineConfig) -> Result<Self> {
        Ok(Self {
            location,
            io: config.io,
            malformed_records: config.malformed_records,
            batch_size: config.batch_size,
            song_data_pattern: Pattern::new(&config.song_data_pattern)?,
            log_data_pattern: Pattern::new(&config.log_data_pattern)?,
        })
    }

    fn pattern(&self, kind: DatasetKind) -> &Pattern {
        match kind {
            DatasetKind::SongCatalog => &self.song_data_pattern,
            DatasetKind::ActivityLog => &self.log_data_pattern,
        }
    }

    /// Lists every file under the dataset root whose relative path matches
    /// the dataset pattern. Fails when nothing matches.
    pub async fn discover(&self, kind: DatasetKind) -> Result<Vec<Path>> {
        let root = self.location.child(kind.dir_name());
        let store = self.location.store.clone();

        let objects = retry_with_backoff(&self.io, || {
            let store = store.clone();
            let root = root.clone();
            async move {
                let listed = store.list(Some(&root)).try_collect::<Vec<_>>().await?;
                Ok::<_, Error>(listed)
            }
        })
        .await
        .map_err(|e| Error::SourceUnavailable(format!("listing {}: {}", root, e)))?;

        let pattern = self.pattern(kind);
        let mut files: Vec<Path> = objects
            .into_iter()
            .map(|meta| meta.location)
            .filter(|location| {
                relative_path(&root, location)
                    .map(|rel| pattern.matches_with(&rel, MATCH_OPTIONS))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(Error::SourceUnavailable(format!(
                "no files matching '{}' under {}/{}",
                pattern.as_str(),
                self.location.uri.trim_end_matches('/'),
                kind.dir_name()
            )));
        }

        debug!(dataset = kind.dir_name(), files = files.len(), "Discovered source files");
        Ok(files)
    }

    async fn fetch(&self, path: &Path) -> Result<Bytes> {
        let store = self.location.store.clone();
        retry_with_backoff(&self.io, || {
            let store = store.clone();
            async move { Ok::<_, Error>(store.get(path).await?.bytes().await?) }
        })
        .await
        .map_err(|e| Error::SourceUnavailable(format!("reading {}: {}", path, e)))
    }

    /// Lazily fetches `files` and yields their records in file order.
    pub fn records(&self, files: Vec<Path>) -> impl Stream<Item = Result<SourceRecord>> + '_ {
        stream::iter(files)
            .map(move |path| async move {
                let content = self.fetch(&path).await?;
                Ok::<_, Error>(parse_json_lines(path.as_ref(), &content))
            })
            .buffered(FETCH_CONCURRENCY)
            .map_ok(stream::iter)
            .try_flatten()
    }

    /// Reads a whole dataset into record batches of its raw schema.
    pub async fn read_batches(&self, kind: DatasetKind) -> Result<(Vec<RecordBatch>, ReadStats)> {
        let files = self.discover(kind).await?;
        let file_count = files.len();

        let (batches, mut stats) = collect_records(
            self.records(files),
            kind.schema(),
            self.malformed_records,
            self.batch_size,
        )
        .await?;
        stats.files = file_count;

        info!(
            dataset = kind.dir_name(),
            files = stats.files,
            records = stats.records,
            skipped = stats.skipped,
            "Read source dataset"
        );
        Ok((batches, stats))
    }

    /// Reads a dataset and exposes it as a `DataFrame` on `ctx`.
    pub async fn load(&self, kind: DatasetKind, ctx: &SessionContext) -> Result<(DataFrame, ReadStats)> {
        let (batches, stats) = self.read_batches(kind).await?;
        let table = MemTable::try_new(kind.schema(), vec![batches])?;
        let df = ctx.read_table(Arc::new(table))?;
        Ok((df, stats))
    }
}

/// Builds a raw-schema `DataFrame` from inline JSON lines.
#[cfg(test)]
pub(crate) fn frame_from_json(ctx: &SessionContext, kind: DatasetKind, lines: &[&str]) -> DataFrame {
    use super::records::BatchCollector;

    let mut collector = BatchCollector::new(kind.schema(), MalformedRecordPolicy::Abort, 1024).unwrap();
    for record in parse_json_lines("inline.json", lines.join("\n").as_bytes()) {
        collector.push(record).unwrap();
    }
    let (batches, _) = collector.finish().unwrap();
    let table = MemTable::try_new(kind.schema(), vec![batches]).unwrap();
    ctx.read_table(Arc::new(table)).unwrap()
}

fn relative_path(root: &Path, location: &Path) -> Option<String> {
    let parts = location.prefix_match(root)?;
    Some(
        parts
            .map(|part| part.as_ref().to_string())
            .collect::<Vec<_>>()
            .join("/"),
    )
}
