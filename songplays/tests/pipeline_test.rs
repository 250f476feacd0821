use arrow::array::{Array, Int32Array, Int64Array, StringArray, TimestampMillisecondArray};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use songplays::processor::{PipelineConfig, SongplaysProcessor};
use std::fs;
use std::path::{Path, PathBuf};

const SONG: &str = r#"{"num_songs":1,"song_id":"S1","title":"T1","artist_id":"A1","artist_name":"N1","artist_location":"L1","artist_latitude":1.0,"artist_longitude":2.0,"year":2000,"duration":180.0}"#;
const PLAY: &str = r#"{"page":"NextSong","userId":"1","firstName":"F","lastName":"L","gender":"M","level":"free","ts":1541121934796,"artist":"N1","song":"T1","sessionId":10,"location":"City","userAgent":"UA"}"#;
const UNMATCHED_PLAY: &str = r#"{"page":"NextSong","userId":"2","firstName":"G","lastName":"H","gender":"F","level":"paid","ts":1541122000000,"artist":"Nobody","song":"Nothing","sessionId":11,"location":"Town","userAgent":"UA"}"#;
const HOME: &str = r#"{"page":"Home","userId":"3","firstName":"I","lastName":"J","gender":"M","level":"free","ts":1541123000000,"sessionId":12,"location":"Village","userAgent":"UA"}"#;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn parquet_files(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    if !dir.exists() {
        return found;
    }
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            found.extend(parquet_files(&path));
        } else if path.extension().is_some_and(|e| e == "parquet") {
            found.push(path);
        }
    }
    found.sort();
    found
}

/// Every non-empty batch of a table, across all of its files.
fn read_table(dir: &Path) -> Vec<RecordBatch> {
    parquet_files(dir)
        .into_iter()
        .flat_map(|path| {
            let file = fs::File::open(path).unwrap();
            ParquetRecordBatchReaderBuilder::try_new(file)
                .unwrap()
                .build()
                .unwrap()
                .collect::<Result<Vec<_>, _>>()
                .unwrap()
        })
        .filter(|b| b.num_rows() > 0)
        .collect()
}

fn row_count(batches: &[RecordBatch]) -> usize {
    batches.iter().map(|b| b.num_rows()).sum()
}

fn string(batch: &RecordBatch, name: &str) -> String {
    batch
        .column_by_name(name)
        .unwrap()
        .as_any()
        .downcast_ref::<StringArray>()
        .unwrap()
        .value(0)
        .to_string()
}

fn seed_input(input: &Path) {
    write(input, "song_data/A/B/C/TRABC.json", SONG);
    write(
        input,
        "log_data/2018/11/2018-11-02-events.json",
        &[PLAY, UNMATCHED_PLAY, HOME].join("\n"),
    );
}

#[tokio::test]
async fn test_end_to_end_star_schema() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input");
    let output = dir.path().join("output");
    seed_input(&input);

    let config = PipelineConfig::local(input.to_str().unwrap(), output.to_str().unwrap());
    let summary = SongplaysProcessor::new(config).unwrap().run().await.unwrap();

    assert_eq!(summary.song_data.records, 1);
    assert_eq!(summary.log_data.records, 3);
    assert_eq!(summary.table("songplays").unwrap().rows, 1);

    // artists
    let artists = read_table(&output.join("artists"));
    assert_eq!(row_count(&artists), 1);
    assert_eq!(string(&artists[0], "artist_id"), "A1");
    assert_eq!(string(&artists[0], "name"), "N1");

    // songs, partitioned by year and artist
    let songs_dir = output.join("songs").join("year=2000").join("artist_id=A1");
    let songs = read_table(&songs_dir);
    assert_eq!(row_count(&songs), 1);
    assert_eq!(string(&songs[0], "song_id"), "S1");
    assert_eq!(row_count(&read_table(&output.join("songs"))), 1);

    // users: both song-play users, not the Home visitor
    let users = read_table(&output.join("users"));
    assert_eq!(row_count(&users), 2);

    // time, partitioned by year and month
    let time = read_table(&output.join("time").join("year=2018").join("month=11"));
    assert_eq!(row_count(&time), 2);
    let hours: Vec<i32> = time
        .iter()
        .flat_map(|b| {
            let hours = b.column_by_name("hour").unwrap().as_any().downcast_ref::<Int32Array>().unwrap();
            hours.values().to_vec()
        })
        .collect();
    assert!(hours.iter().all(|h| *h == 1));

    // songplays: only the matched play survives the join
    let songplays = read_table(&output.join("songplays").join("year=2018").join("month=11"));
    assert_eq!(row_count(&songplays), 1);
    let play = &songplays[0];
    assert_eq!(string(play, "song_id"), "S1");
    assert_eq!(string(play, "artist_id"), "A1");
    assert_eq!(string(play, "user_id"), "1");
    assert_eq!(string(play, "level"), "free");
    assert_eq!(string(play, "user_agent"), "UA");

    let ids = play.column_by_name("songplay_id").unwrap();
    assert_eq!(ids.null_count(), 0);
    let sessions = play
        .column_by_name("session_id")
        .unwrap()
        .as_any()
        .downcast_ref::<Int64Array>()
        .unwrap();
    assert_eq!(sessions.value(0), 10);
    let start = play
        .column_by_name("start_time")
        .unwrap()
        .as_any()
        .downcast_ref::<TimestampMillisecondArray>()
        .unwrap();
    assert_eq!(start.value(0), 1541121934796);

    let schema = play.schema();
    assert!(schema.index_of("year").is_err());
    assert!(schema.index_of("song_Id").is_err());

    for table in ["songs", "artists", "users", "time", "songplays"] {
        assert!(output.join(table).join("_SUCCESS").is_file(), "{table}");
    }
}

#[tokio::test]
async fn test_rerun_replaces_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input");
    let output = dir.path().join("output");
    seed_input(&input);

    let config = PipelineConfig::local(input.to_str().unwrap(), output.to_str().unwrap());
    let processor = SongplaysProcessor::new(config).unwrap();
    processor.run().await.unwrap();
    processor.run().await.unwrap();

    assert_eq!(row_count(&read_table(&output.join("songplays"))), 1);
    assert_eq!(row_count(&read_table(&output.join("artists"))), 1);
    assert_eq!(parquet_files(&output.join("songs")).len(), 1);
}

#[tokio::test]
async fn test_no_matches_writes_empty_fact_table() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input");
    let output = dir.path().join("output");
    write(&input, "song_data/A/B/C/TRABC.json", SONG);
    write(&input, "log_data/2018/11/events.json", UNMATCHED_PLAY);

    let config = PipelineConfig::local(input.to_str().unwrap(), output.to_str().unwrap());
    let summary = SongplaysProcessor::new(config).unwrap().run().await.unwrap();

    let songplays = summary.table("songplays").unwrap();
    assert_eq!(songplays.rows, 0);
    assert_eq!(songplays.files, 0);
    assert!(output.join("songplays").join("_SUCCESS").is_file());
}
