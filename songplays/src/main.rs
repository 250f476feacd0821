use clap::{Arg, Command};
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    let matches = Command::new("songplays-cli")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Builds the Sparkify star schema from song and activity logs")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Sets a custom config file")
                .default_value("config/songplays.toml"),
        )
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .map(|s| s.as_str())
        .unwrap_or("config/songplays.toml");

    match songplays::run_songplays_pipeline(config_path).await {
        Ok(summary) => {
            for table in &summary.tables {
                println!("{:<10} rows={:<8} files={}", table.table, table.rows, table.files);
            }
        }
        Err(e) => {
            error!(error = %e, "Songplays pipeline failed");
            eprintln!("Songplays pipeline error: {}", e);
            process::exit(1);
        }
    }
}
