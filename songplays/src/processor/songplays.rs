use arrow::array::{ArrayRef, Int64Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use common::{Error, Result};
use datafusion::common::JoinType;
use datafusion::datasource::MemTable;
use datafusion::logical_expr::ident;
use datafusion::physical_plan::RecordBatchStream;
use datafusion::prelude::{DataFrame, SessionContext, col};
use futures::StreamExt;
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::debug;

/// Bits reserved for the row counter inside a partition.
pub const ROW_BITS: u32 = 33;
const MAX_ROW: u64 = (1 << ROW_BITS) - 1;
const MAX_PARTITION: u64 = (1 << (63 - ROW_BITS)) - 1;

/// Hands out `songplay_id`s for one output partition:
/// `(partition_index << 33) | row_number`.
pub struct SurrogateKeyGenerator {
    partition: u64,
    next_row: u64,
}

impl SurrogateKeyGenerator {
    pub fn new(partition: usize) -> Result<Self> {
        let partition = partition as u64;
        if partition > MAX_PARTITION {
            return Err(Error::InvalidInput(format!(
                "partition index {} exceeds surrogate key space",
                partition
            )));
        }
        Ok(Self {
            partition,
            next_row: 0,
        })
    }

    pub fn next_key(&mut self) -> Result<i64> {
        if self.next_row > MAX_ROW {
            return Err(Error::InvalidInput(format!(
                "partition {} has more than {} rows",
                self.partition, MAX_ROW
            )));
        }
        let key = (self.partition << ROW_BITS) | self.next_row;
        self.next_row += 1;
        Ok(key as i64)
    }

    /// Prepends a `songplay_id` column to `batch`.
    pub fn assign(&mut self, batch: &RecordBatch, schema: SchemaRef) -> Result<RecordBatch> {
        let keys = (0..batch.num_rows())
            .map(|_| self.next_key())
            .collect::<Result<Vec<_>>>()?;

        let mut columns: Vec<ArrayRef> = Vec::with_capacity(batch.num_columns() + 1);
        columns.push(Arc::new(Int64Array::from(keys)));
        columns.extend(batch.columns().iter().cloned());
        Ok(RecordBatch::try_new(schema, columns)?)
    }
}

/// Joins song plays to the raw catalog on literal `(artist, song)` equality
/// and keys the resulting fact rows.
pub struct FactAssembler;

impl FactAssembler {
    /// Fact columns without the surrogate key. Plays that match no catalog
    /// entry drop out of the inner join.
    pub fn join(&self, plays: DataFrame, catalog: DataFrame) -> Result<DataFrame> {
        let plays = plays.select(vec![
            col("start_time"),
            ident("userId").alias("user_id"),
            col("level"),
            ident("sessionId").alias("session_id"),
            col("location"),
            ident("userAgent").alias("user_agent"),
            col("artist"),
            col("song"),
            col("year"),
            col("month"),
        ])?;
        let catalog = catalog.select(vec![
            col("song_id"),
            col("artist_id"),
            col("artist_name"),
            col("title"),
        ])?;

        Ok(plays
            .join(
                catalog,
                JoinType::Inner,
                &["artist", "song"],
                &["artist_name", "title"],
                None,
            )?
            .select(vec![
                col("start_time"),
                col("user_id"),
                col("level"),
                col("song_id"),
                col("artist_id"),
                col("session_id"),
                col("location"),
                col("user_agent"),
                col("year"),
                col("month"),
            ])?)
    }

    /// Executes the join and assigns `songplay_id` while draining every
    /// output partition concurrently.
    pub async fn assemble(
        &self,
        ctx: &SessionContext,
        plays: DataFrame,
        catalog: DataFrame,
    ) -> Result<DataFrame> {
        let joined = self.join(plays, catalog)?;
        let logical_schema: SchemaRef = Arc::new(joined.schema().as_arrow().clone());

        let streams = joined.execute_stream_partitioned().await?;
        let input_schema = streams
            .first()
            .map(|s| s.schema())
            .unwrap_or(logical_schema);
        let schema = keyed_schema(&input_schema);
        debug!(partitions = streams.len(), "Assigning songplay keys");

        let partitions = try_join_all(streams.into_iter().enumerate().map(|(idx, mut stream)| {
            let schema = schema.clone();
            async move {
                let mut keys = SurrogateKeyGenerator::new(idx)?;
                let mut batches = Vec::new();
                while let Some(batch) = stream.next().await {
                    let batch = batch?;
                    if batch.num_rows() > 0 {
                        batches.push(keys.assign(&batch, schema.clone())?);
                    }
                }
                Ok::<_, Error>(batches)
            }
        }))
        .await?;

        let table = MemTable::try_new(schema, partitions)?;
        Ok(ctx.read_table(Arc::new(table))?)
    }
}

fn keyed_schema(input: &Schema) -> SchemaRef {
    let mut fields = vec![Arc::new(Field::new("songplay_id", DataType::Int64, false))];
    fields.extend(input.fields().iter().cloned());
    Arc::new(Schema::new(fields))
}
