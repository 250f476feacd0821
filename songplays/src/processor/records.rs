use arrow::array::{ArrayRef, Float64Builder, Int32Builder, Int64Builder, StringBuilder};
use arrow::datatypes::{DataType, SchemaRef};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use common::config::MalformedRecordPolicy;
use common::{Error, Result};
use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::warn;

/// Activity-log event time, epoch milliseconds.
const TIMESTAMP_FIELD: &str = "ts";

/// One JSON object read from a source file.
#[derive(Debug, Clone)]
pub struct SourceRecord {
    pub location: String,
    pub line: usize,
    pub fields: Map<String, Value>,
}

impl SourceRecord {
    /// Looks a field up by exact name, then case-insensitively.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).or_else(|| {
            self.fields
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value)
        })
    }

    fn malformed(&self, reason: impl Into<String>) -> Error {
        Error::MalformedRecord {
            location: self.location.clone(),
            line: self.line,
            reason: reason.into(),
        }
    }
}

/// Splits newline-delimited JSON into records. Blank lines are ignored;
/// a line that is not valid UTF-8 is malformed.
pub fn parse_json_lines(location: &str, content: &[u8]) -> Vec<Result<SourceRecord>> {
    content
        .split(|b| *b == b'\n')
        .enumerate()
        .filter(|(_, line)| !line.trim_ascii().is_empty())
        .map(|(idx, bytes)| {
            let malformed = |reason: String| Error::MalformedRecord {
                location: location.to_string(),
                line: idx + 1,
                reason,
            };
            let line = std::str::from_utf8(bytes).map_err(|e| malformed(format!("invalid UTF-8: {}", e)))?;
            match serde_json::from_str::<Value>(line) {
                Ok(Value::Object(fields)) => Ok(SourceRecord {
                    location: location.to_string(),
                    line: idx + 1,
                    fields,
                }),
                Ok(other) => Err(malformed(format!("expected a JSON object, found {}", kind_of(&other)))),
                Err(e) => Err(malformed(e.to_string())),
            }
        })
        .collect()
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReadStats {
    pub files: usize,
    pub records: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Null,
    Str(String),
    Int(i64),
    Float(f64),
}

enum ColumnBuffer {
    Utf8(StringBuilder),
    Int32(Int32Builder),
    Int64(Int64Builder),
    Float64(Float64Builder),
}

impl ColumnBuffer {
    fn for_type(data_type: &DataType) -> Result<Self> {
        Ok(match data_type {
            DataType::Utf8 => Self::Utf8(StringBuilder::new()),
            DataType::Int32 => Self::Int32(Int32Builder::new()),
            DataType::Int64 => Self::Int64(Int64Builder::new()),
            DataType::Float64 => Self::Float64(Float64Builder::new()),
            other => {
                return Err(Error::InvalidInput(format!(
                    "Unsupported raw column type {:?}",
                    other
                )));
            }
        })
    }

    fn append(&mut self, cell: Cell) {
        match (self, cell) {
            (Self::Utf8(b), Cell::Str(s)) => b.append_value(s),
            (Self::Int32(b), Cell::Int(v)) => b.append_value(v as i32),
            (Self::Int64(b), Cell::Int(v)) => b.append_value(v),
            (Self::Float64(b), Cell::Float(v)) => b.append_value(v),
            (Self::Utf8(b), _) => b.append_null(),
            (Self::Int32(b), _) => b.append_null(),
            (Self::Int64(b), _) => b.append_null(),
            (Self::Float64(b), _) => b.append_null(),
        }
    }

    fn finish(&mut self) -> ArrayRef {
        match self {
            Self::Utf8(b) => Arc::new(b.finish()),
            Self::Int32(b) => Arc::new(b.finish()),
            Self::Int64(b) => Arc::new(b.finish()),
            Self::Float64(b) => Arc::new(b.finish()),
        }
    }
}

/// Converts a JSON value to a cell of `data_type`, or explains why it can't.
fn coerce(value: Option<&Value>, data_type: &DataType) -> std::result::Result<Cell, String> {
    let value = match value {
        None | Some(Value::Null) => return Ok(Cell::Null),
        Some(v) => v,
    };

    match (data_type, value) {
        (_, Value::Array(_) | Value::Object(_)) => {
            Err(format!("expected a scalar, found {}", kind_of(value)))
        }
        (DataType::Utf8, Value::String(s)) => Ok(Cell::Str(s.clone())),
        (DataType::Utf8, other) => Ok(Cell::Str(other.to_string())),
        (DataType::Int32 | DataType::Int64, _) => {
            let parsed = match value {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().filter(|f| integral_in_range(*f)).map(|f| f as i64)),
                Value::String(s) if s.trim().is_empty() => return Ok(Cell::Null),
                Value::String(s) => s.trim().parse::<i64>().ok(),
                _ => None,
            };
            let v = parsed.ok_or_else(|| format!("expected an integer, found {}", value))?;
            if matches!(data_type, DataType::Int32) && i32::try_from(v).is_err() {
                return Err(format!("{} does not fit a 32-bit integer", v));
            }
            Ok(Cell::Int(v))
        }
        (DataType::Float64, _) => {
            let parsed = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) if s.trim().is_empty() => return Ok(Cell::Null),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            parsed
                .map(Cell::Float)
                .ok_or_else(|| format!("expected a number, found {}", value))
        }
        (other, _) => Err(format!("unsupported column type {:?}", other)),
    }
}

/// Whole floats within `i64`; anything else would saturate on cast.
fn integral_in_range(f: f64) -> bool {
    f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64
}

/// Accumulates source records into record batches of a fixed raw schema,
/// applying the malformed-record policy.
pub struct BatchCollector {
    schema: SchemaRef,
    policy: MalformedRecordPolicy,
    batch_size: usize,
    columns: Vec<ColumnBuffer>,
    pending_rows: usize,
    batches: Vec<RecordBatch>,
    stats: ReadStats,
}

impl BatchCollector {
    pub fn new(schema: SchemaRef, policy: MalformedRecordPolicy, batch_size: usize) -> Result<Self> {
        let columns = schema
            .fields()
            .iter()
            .map(|f| ColumnBuffer::for_type(f.data_type()))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            schema,
            policy,
            batch_size: batch_size.max(1),
            columns,
            pending_rows: 0,
            batches: Vec::new(),
            stats: ReadStats::default(),
        })
    }

    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    /// Adds a record (or a parse failure) to the collector.
    pub fn push(&mut self, record: Result<SourceRecord>) -> Result<()> {
        let outcome = record.and_then(|r| self.to_cells(&r));
        match outcome {
            Ok(cells) => {
                for (column, cell) in self.columns.iter_mut().zip(cells) {
                    column.append(cell);
                }
                self.stats.records += 1;
                self.pending_rows += 1;
                if self.pending_rows >= self.batch_size {
                    self.flush()?;
                }
                Ok(())
            }
            Err(e @ Error::MalformedRecord { .. }) => match self.policy {
                MalformedRecordPolicy::Abort => Err(e),
                MalformedRecordPolicy::Skip => {
                    warn!(error = %e, "Skipping malformed record");
                    self.stats.skipped += 1;
                    Ok(())
                }
            },
            Err(e) => Err(e),
        }
    }

    fn to_cells(&self, record: &SourceRecord) -> Result<Vec<Cell>> {
        self.schema
            .fields()
            .iter()
            .map(|field| {
                let cell = coerce(record.field(field.name()), field.data_type())
                    .map_err(|reason| record.malformed(format!("field '{}': {}", field.name(), reason)))?;
                if cell == Cell::Null && !field.is_nullable() {
                    return Err(record.malformed(format!("missing required field '{}'", field.name())));
                }
                if let Cell::Int(ms) = cell {
                    if field.name() == TIMESTAMP_FIELD && DateTime::<Utc>::from_timestamp_millis(ms).is_none() {
                        return Err(record.malformed(format!(
                            "field '{}': {} is not a representable timestamp",
                            field.name(),
                            ms
                        )));
                    }
                }
                Ok(cell)
            })
            .collect()
    }

    fn flush(&mut self) -> Result<()> {
        if self.pending_rows == 0 {
            return Ok(());
        }
        let arrays: Vec<ArrayRef> = self.columns.iter_mut().map(|c| c.finish()).collect();
        self.batches.push(RecordBatch::try_new(self.schema.clone(), arrays)?);
        self.pending_rows = 0;
        Ok(())
    }

    pub fn finish(mut self) -> Result<(Vec<RecordBatch>, ReadStats)> {
        self.flush()?;
        Ok((self.batches, self.stats))
    }
}

/// Drains a record stream into batches.
pub async fn collect_records<S>(
    records: S,
    schema: SchemaRef,
    policy: MalformedRecordPolicy,
    batch_size: usize,
) -> Result<(Vec<RecordBatch>, ReadStats)>
where
    S: Stream<Item = Result<SourceRecord>>,
{
    let mut records = std::pin::pin!(records);
    let mut collector = BatchCollector::new(schema, policy, batch_size)?;
    while let Some(record) = records.next().await {
        collector.push(record)?;
    }
    collector.finish()
}
