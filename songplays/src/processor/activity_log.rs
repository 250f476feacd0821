use super::udf::TimeFunctions;
use common::Result;
use datafusion::logical_expr::ident;
use datafusion::prelude::{DataFrame, col, lit};

/// Only these page views count as song plays.
pub const SONG_PLAY_PAGE: &str = "NextSong";

pub struct ActivityTables {
    pub users: DataFrame,
    pub time: DataFrame,
    /// Song-play events with `start_time`, `year` and `month` attached.
    pub plays: DataFrame,
}

pub struct ActivityLogTransformer {
    time_fns: TimeFunctions,
}

impl ActivityLogTransformer {
    pub fn new(time_fns: TimeFunctions) -> Self {
        Self { time_fns }
    }

    pub fn transform(&self, log: DataFrame) -> Result<ActivityTables> {
        let plays = self.song_plays(log)?;
        Ok(ActivityTables {
            users: self.users(plays.clone())?,
            time: self.time(plays.clone())?,
            plays,
        })
    }

    /// Keeps `NextSong` events and derives their calendar columns.
    pub fn song_plays(&self, log: DataFrame) -> Result<DataFrame> {
        let ts = || ident("ts");
        Ok(log
            .filter(col("page").eq(lit(SONG_PLAY_PAGE)))?
            .with_column("start_time", self.time_fns.start_time(ts()))?
            .with_column("year", self.time_fns.year(ts()))?
            .with_column("month", self.time_fns.month(ts()))?)
    }

    /// User attributes, deduplicated on the whole row, so a level change
    /// yields a second row for the same `user_id`.
    pub fn users(&self, plays: DataFrame) -> Result<DataFrame> {
        Ok(plays
            .select(vec![
                ident("userId").alias("user_id"),
                ident("firstName").alias("first_name"),
                ident("lastName").alias("last_name"),
                col("gender"),
                col("level"),
            ])?
            .distinct()?)
    }

    pub fn time(&self, plays: DataFrame) -> Result<DataFrame> {
        let ts = || ident("ts");
        Ok(plays
            .select(vec![
                col("start_time"),
                self.time_fns.hour(ts()).alias("hour"),
                self.time_fns.day(ts()).alias("day"),
                self.time_fns.week(ts()).alias("week"),
                col("month"),
                col("year"),
                self.time_fns.weekday(ts()).alias("weekday"),
            ])?
            .distinct()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::source::{DatasetKind, frame_from_json};
    use crate::processor::time::TimeZonePolicy;
    use datafusion::arrow::array::{Int32Array, StringArray, TimestampMillisecondArray};
    use datafusion::arrow::record_batch::RecordBatch;
    use datafusion::arrow::util::pretty::pretty_format_batches;
    use datafusion::prelude::SessionContext;

    const PLAY: &str = r#"{"page":"NextSong","userId":"1","firstName":"F","lastName":"L","gender":"M","level":"free","ts":1541121934796,"artist":"N1","song":"T1","sessionId":10,"location":"City","userAgent":"UA"}"#;
    const PLAY_PAID: &str = r#"{"page":"NextSong","userId":"1","firstName":"F","lastName":"L","gender":"M","level":"paid","ts":1541203200000,"artist":"N1","song":"T1","sessionId":11,"location":"City","userAgent":"UA"}"#;
    const HOME: &str = r#"{"page":"Home","userId":"2","firstName":"G","lastName":"H","gender":"F","level":"free","ts":1541121934796,"sessionId":12,"location":"Town","userAgent":"UA"}"#;

    fn transformer() -> ActivityLogTransformer {
        ActivityLogTransformer::new(TimeFunctions::new(TimeZonePolicy::Utc))
    }

    async fn rows(df: DataFrame) -> Vec<RecordBatch> {
        df.collect()
            .await
            .unwrap()
            .into_iter()
            .filter(|b| b.num_rows() > 0)
            .collect()
    }

    fn int(batch: &RecordBatch, name: &str) -> i32 {
        batch
            .column_by_name(name)
            .unwrap()
            .as_any()
            .downcast_ref::<Int32Array>()
            .unwrap()
            .value(0)
    }

    #[tokio::test]
    async fn test_filter_keeps_only_next_song() {
        let ctx = SessionContext::new();
        let log = frame_from_json(&ctx, DatasetKind::ActivityLog, &[PLAY, HOME, PLAY_PAID]);

        let plays = transformer().song_plays(log).unwrap();
        assert_eq!(plays.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_users_renamed_and_level_change_kept() {
        let ctx = SessionContext::new();
        let log = frame_from_json(&ctx, DatasetKind::ActivityLog, &[PLAY, PLAY, HOME, PLAY_PAID]);

        let tables = transformer().transform(log).unwrap();
        let fields: Vec<String> = tables.users.schema().fields().iter().map(|f| f.name().clone()).collect();
        assert_eq!(fields, vec!["user_id", "first_name", "last_name", "gender", "level"]);

        let sorted = tables.users.sort(vec![col("level").sort(true, true)]).unwrap();
        let batches = rows(sorted).await;
        let levels: Vec<String> = batches
            .iter()
            .flat_map(|b| {
                let levels = b.column_by_name("level").unwrap().as_any().downcast_ref::<StringArray>().unwrap();
                (0..b.num_rows()).map(|i| levels.value(i).to_string()).collect::<Vec<_>>()
            })
            .collect();
        assert_eq!(levels, vec!["free", "paid"]);
    }

    #[tokio::test]
    async fn test_time_rows_decomposed_and_distinct() {
        let ctx = SessionContext::new();
        let log = frame_from_json(&ctx, DatasetKind::ActivityLog, &[PLAY, PLAY, HOME]);

        let time = transformer().transform(log).unwrap().time;
        let fields: Vec<String> = time.schema().fields().iter().map(|f| f.name().clone()).collect();
        assert_eq!(fields, vec!["start_time", "hour", "day", "week", "month", "year", "weekday"]);

        let batches = rows(time).await;
        assert_eq!(batches.iter().map(|b| b.num_rows()).sum::<usize>(), 1);

        let batch = &batches[0];
        let start = batch
            .column_by_name("start_time")
            .unwrap()
            .as_any()
            .downcast_ref::<TimestampMillisecondArray>()
            .unwrap();
        assert_eq!(start.value(0), 1541121934796);
        assert_eq!(int(batch, "hour"), 1);
        assert_eq!(int(batch, "day"), 2);
        assert_eq!(int(batch, "week"), 44);
        assert_eq!(int(batch, "month"), 11);
        assert_eq!(int(batch, "year"), 2018);
        assert_eq!(int(batch, "weekday"), 6);
    }

    #[tokio::test]
    async fn test_time_dedup_is_idempotent() {
        let ctx = SessionContext::new();
        let log = frame_from_json(&ctx, DatasetKind::ActivityLog, &[PLAY, PLAY_PAID, PLAY]);

        let time = transformer().transform(log).unwrap().time;
        let again = time.clone().distinct().unwrap();
        assert_eq!(time.count().await.unwrap(), 2);
        assert_eq!(again.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_users_dedup_is_idempotent() {
        let ctx = SessionContext::new();
        let log = frame_from_json(&ctx, DatasetKind::ActivityLog, &[PLAY, PLAY, PLAY_PAID, HOME]);

        let users = transformer().transform(log).unwrap().users;
        let again = users.clone().distinct().unwrap();
        let render = |df: DataFrame| async move {
            let sorted = df.sort(vec![col("user_id").sort(true, true), col("level").sort(true, true)]).unwrap();
            pretty_format_batches(&rows(sorted).await).unwrap().to_string()
        };

        assert_eq!(users.clone().count().await.unwrap(), 2);
        assert_eq!(again.clone().count().await.unwrap(), 2);
        assert_eq!(render(users).await, render(again).await);
    }
}
