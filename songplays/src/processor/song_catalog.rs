use common::Result;
use datafusion::prelude::{DataFrame, col};

/// Song and artist dimensions derived from the raw song catalog.
pub struct CatalogTables {
    pub songs: DataFrame,
    pub artists: DataFrame,
}

pub struct SongCatalogTransformer;

impl SongCatalogTransformer {
    pub fn transform(&self, catalog: DataFrame) -> Result<CatalogTables> {
        Ok(CatalogTables {
            songs: self.songs(catalog.clone())?,
            artists: self.artists(catalog)?,
        })
    }

    /// One row per catalog record, no dedup.
    pub fn songs(&self, catalog: DataFrame) -> Result<DataFrame> {
        Ok(catalog.select(vec![
            col("song_id"),
            col("title"),
            col("artist_id"),
            col("year"),
            col("duration"),
        ])?)
    }

    /// Artist attributes, deduplicated on the whole row. An artist whose
    /// location differs between records keeps one row per variant.
    pub fn artists(&self, catalog: DataFrame) -> Result<DataFrame> {
        Ok(catalog
            .select(vec![
                col("artist_id"),
                col("artist_name").alias("name"),
                col("artist_location").alias("location"),
                col("artist_latitude").alias("latitude"),
                col("artist_longitude").alias("longitude"),
            ])?
            .distinct()?)
    }
}
