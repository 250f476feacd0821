use crate::storage::StorageLocation;
use crate::utils::paths::PathBuilder;
use crate::utils::retry::{IoPolicy, retry_with_backoff};
use arrow::array::{Array, AsArray, UInt32Array};
use arrow::compute::{cast, concat_batches, take_record_batch};
use arrow::datatypes::{DataType, SchemaRef};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use common::{Error, Result};
use datafusion::prelude::DataFrame;
use futures::TryStreamExt;
use object_store::PutPayload;
use object_store::path::Path;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Output table name and its partition columns, outermost first.
#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    pub name: &'static str,
    pub partition_by: &'static [&'static str],
}

pub const SONGS: TableSpec = TableSpec {
    name: "songs",
    partition_by: &["year", "artist_id"],
};

pub const ARTISTS: TableSpec = TableSpec {
    name: "artists",
    partition_by: &[],
};

pub const USERS: TableSpec = TableSpec {
    name: "users",
    partition_by: &[],
};

pub const TIME: TableSpec = TableSpec {
    name: "time",
    partition_by: &["year", "month"],
};

pub const SONGPLAYS: TableSpec = TableSpec {
    name: "songplays",
    partition_by: &["year", "month"],
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteSummary {
    pub table: String,
    pub rows: usize,
    pub files: usize,
    pub partition_by: Vec<String>,
}

#[derive(Serialize)]
struct SuccessMarker<'a> {
    #[serde(flatten)]
    summary: &'a WriteSummary,
    created_at: DateTime<Utc>,
}

type PartitionKey = Vec<Option<String>>;

/// Writes tables as Hive-partitioned Parquet, replacing whatever the table
/// directory held before.
pub struct TableSink {
    location: StorageLocation,
    io: IoPolicy,
}

impl TableSink {
    pub fn new(location: StorageLocation, io: IoPolicy) -> Self {
        Self { location, io }
    }

    pub fn table_path(&self, spec: &TableSpec) -> Path {
        PathBuilder::new(&self.location.prefix, spec.name).build_table_path()
    }

    pub async fn write(&self, spec: &TableSpec, df: DataFrame) -> Result<WriteSummary> {
        let schema: SchemaRef = Arc::new(df.schema().as_arrow().clone());
        let batches = df.collect().await?;
        self.write_batches(spec, schema, batches).await
    }

    pub async fn write_batches(
        &self,
        spec: &TableSpec,
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
    ) -> Result<WriteSummary> {
        let schema = batches.first().map(|b| b.schema()).unwrap_or(schema);
        let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
        let groups = split_by_partition(&schema, &batches, spec.partition_by)?;

        self.clear(spec).await?;

        let mut files = 0;
        for (key, batch) in &groups {
            let builder = spec
                .partition_by
                .iter()
                .zip(key)
                .fold(PathBuilder::new(&self.location.prefix, spec.name), |b, (column, value)| {
                    b.with_partition(column, value.as_deref())
                });
            self.put_parquet(&builder, files, batch).await?;
            files += 1;
        }

        if groups.is_empty() && spec.partition_by.is_empty() {
            // Readers still need the schema of an empty table.
            let empty = RecordBatch::new_empty(schema.clone());
            self.put_parquet(&PathBuilder::new(&self.location.prefix, spec.name), 0, &empty)
                .await?;
            files = 1;
        }

        let summary = WriteSummary {
            table: spec.name.to_string(),
            rows,
            files,
            partition_by: spec.partition_by.iter().map(|c| c.to_string()).collect(),
        };
        self.write_marker(spec, &summary).await?;

        info!(
            table = spec.name,
            rows = summary.rows,
            files = summary.files,
            "Table written"
        );
        Ok(summary)
    }

    /// Deletes every object under the table directory.
    async fn clear(&self, spec: &TableSpec) -> Result<()> {
        let table_path = self.table_path(spec);
        let store = self.location.store.clone();

        let existing = retry_with_backoff(&self.io, || {
            let store = store.clone();
            let table_path = table_path.clone();
            async move {
                let listed = store.list(Some(&table_path)).try_collect::<Vec<_>>().await?;
                Ok::<_, Error>(listed)
            }
        })
        .await
        .map_err(|e| Error::WriteFailure(format!("listing {}: {}", table_path, e)))?;

        for meta in &existing {
            retry_with_backoff(&self.io, || {
                let store = store.clone();
                async move { Ok::<_, Error>(store.delete(&meta.location).await?) }
            })
            .await
            .map_err(|e| Error::WriteFailure(format!("deleting {}: {}", meta.location, e)))?;
        }

        if !existing.is_empty() {
            debug!(table = spec.name, removed = existing.len(), "Cleared previous output");
        }
        Ok(())
    }

    async fn put_parquet(&self, builder: &PathBuilder, index: usize, batch: &RecordBatch) -> Result<()> {
        let filename = format!("part-{:05}-{}.snappy.parquet", index, Uuid::new_v4());
        let path = builder.build_file_path(&filename);
        let content = Bytes::from(encode_parquet(batch)?);
        self.put(&path, content).await
    }

    async fn write_marker(&self, spec: &TableSpec, summary: &WriteSummary) -> Result<()> {
        let marker = SuccessMarker {
            summary,
            created_at: Utc::now(),
        };
        let content = Bytes::from(serde_json::to_vec_pretty(&marker)?);
        self.put(&self.table_path(spec).child("_SUCCESS"), content).await
    }

    async fn put(&self, path: &Path, content: Bytes) -> Result<()> {
        let store = self.location.store.clone();
        retry_with_backoff(&self.io, || {
            let store = store.clone();
            let payload = PutPayload::from(content.clone());
            async move {
                store.put(path, payload).await?;
                Ok::<_, Error>(())
            }
        })
        .await
        .map_err(|e| Error::WriteFailure(format!("writing {}: {}", path, e)))
    }
}

fn encode_parquet(batch: &RecordBatch) -> Result<Vec<u8>> {
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;
    Ok(buffer)
}

/// Groups rows by their partition values and drops the partition columns.
/// Unpartitioned tables come back as a single group (none when empty).
fn split_by_partition(
    schema: &SchemaRef,
    batches: &[RecordBatch],
    partition_by: &[&str],
) -> Result<BTreeMap<PartitionKey, RecordBatch>> {
    let partition_indices = partition_by
        .iter()
        .map(|column| schema.index_of(column))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let data_indices: Vec<usize> = (0..schema.fields().len())
        .filter(|i| !partition_indices.contains(i))
        .collect();
    let data_schema = Arc::new(schema.project(&data_indices)?);

    let mut grouped: BTreeMap<PartitionKey, Vec<RecordBatch>> = BTreeMap::new();
    for batch in batches.iter().filter(|b| b.num_rows() > 0) {
        let data = batch.project(&data_indices)?;
        let values = partition_indices
            .iter()
            .map(|&i| cast(batch.column(i), &DataType::Utf8))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let strings: Vec<_> = values.iter().map(|array| array.as_string::<i32>()).collect();

        let mut rows_by_key: BTreeMap<PartitionKey, Vec<u32>> = BTreeMap::new();
        for row in 0..batch.num_rows() {
            let key = strings
                .iter()
                .map(|array| (!array.is_null(row)).then(|| array.value(row).to_string()))
                .collect();
            rows_by_key.entry(key).or_default().push(row as u32);
        }

        for (key, rows) in rows_by_key {
            let part = take_record_batch(&data, &UInt32Array::from(rows))?;
            grouped.entry(key).or_default().push(part);
        }
    }

    grouped
        .into_iter()
        .map(|(key, parts)| -> Result<(PartitionKey, RecordBatch)> {
            Ok((key, concat_batches(&data_schema, &parts)?))
        })
        .collect()
}
