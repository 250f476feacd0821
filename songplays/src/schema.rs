use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use lazy_static::lazy_static;
use std::sync::Arc;

// Raw source schemas. Field names are the keys found in the JSON files;
// non-nullable fields are required for a record to be accepted.
pub fn raw_song_catalog_schema() -> Schema {
    Schema::new(vec![
        Field::new("song_id", DataType::Utf8, false),
        Field::new("title", DataType::Utf8, false),
        Field::new("artist_id", DataType::Utf8, false),
        Field::new("artist_name", DataType::Utf8, true),
        Field::new("artist_location", DataType::Utf8, true),
        Field::new("artist_latitude", DataType::Float64, true),
        Field::new("artist_longitude", DataType::Float64, true),
        Field::new("year", DataType::Int32, true),
        Field::new("duration", DataType::Float64, true),
    ])
}

pub fn raw_activity_log_schema() -> Schema {
    Schema::new(vec![
        Field::new("page", DataType::Utf8, false),
        Field::new("ts", DataType::Int64, false),
        Field::new("userId", DataType::Utf8, true),
        Field::new("firstName", DataType::Utf8, true),
        Field::new("lastName", DataType::Utf8, true),
        Field::new("gender", DataType::Utf8, true),
        Field::new("level", DataType::Utf8, true),
        Field::new("artist", DataType::Utf8, true),
        Field::new("song", DataType::Utf8, true),
        Field::new("sessionId", DataType::Int64, true),
        Field::new("location", DataType::Utf8, true),
        Field::new("userAgent", DataType::Utf8, true),
    ])
}

/// `start_time` holds wall-clock time in the configured zone, hence no zone on the type.
pub fn start_time_type() -> DataType {
    DataType::Timestamp(TimeUnit::Millisecond, None)
}

pub enum RawSchemaVersion {
    SongCatalog,
    ActivityLog,
}

pub fn get_raw_schema(version: RawSchemaVersion) -> SchemaRef {
    match version {
        RawSchemaVersion::SongCatalog => RAW_SONG_CATALOG_SCHEMA.clone(),
        RawSchemaVersion::ActivityLog => RAW_ACTIVITY_LOG_SCHEMA.clone(),
    }
}

// Lazy-loaded static schemas
lazy_static! {
    static ref RAW_SONG_CATALOG_SCHEMA: SchemaRef = Arc::new(raw_song_catalog_schema());
    static ref RAW_ACTIVITY_LOG_SCHEMA: SchemaRef = Arc::new(raw_activity_log_schema());
}
