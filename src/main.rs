use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use lyrics_dataset::acquisition::{self, AcquisitionConfig, CancellationToken};
use lyrics_dataset::backup;
use lyrics_dataset::catalog::{self, CatalogKind};
use lyrics_dataset::config::{PipelineConfig, DEFAULT_DB_NAME};
use lyrics_dataset::dedup;
use lyrics_dataset::language::StopwordDetector;
use lyrics_dataset::lyrics_files::LyricsFileStore;
use lyrics_dataset::progress::set_log_only;
use lyrics_dataset::provider::GeniusClient;
use lyrics_dataset::scoring;
use lyrics_dataset::store;
use lyrics_dataset::summary::RunSummary;
use lyrics_dataset::validity::ValidityFilter;

#[derive(Parser)]
#[command(name = "lyrics-dataset")]
#[command(about = "Build the Spotify + lyrics dataset: catalog import, dedup, lyrics acquisition and scoring")]
struct Args {
    /// Root of the data directory (databases/, datasets/, lyrics/)
    #[arg(long, env = "DATA_PATH")]
    data_dir: PathBuf,

    /// Database name (file `<data>/databases/binaries/<name>.db`)
    #[arg(long, default_value = DEFAULT_DB_NAME)]
    db_name: String,

    /// Hide progress bars, only emit log lines
    #[arg(long)]
    log_only: bool,

    /// Write the run summary as JSON to this path
    #[arg(long)]
    stats_json: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database and all tables (idempotent)
    InitDb,
    /// Import the tracks catalog
    ImportTracks {
        /// Defaults to <data>/datasets/spotify/tracks.csv
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Import the artists catalog (with genres)
    ImportArtists {
        /// Defaults to <data>/datasets/spotify/artists.csv
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Deduplicate each artist's tracks into tracks_filtered
    FilterTracks {
        #[arg(long, default_value_t = 2000)]
        cutoff_year: i32,
    },
    /// Create missing track_status rows for filtered tracks
    InitStatus,
    /// Fetch, validate and store lyrics for the working set
    FetchLyrics(FetchArgs),
    /// Score stored lyrics that have no score yet
    ScoreLyrics {
        #[arg(long, default_value_t = 100)]
        progress_interval: u64,
    },
    /// Compare lyrics_stored flags with lyrics files
    Reconcile {
        /// Reset flags without files, adopt files without flags
        #[arg(long)]
        repair: bool,

        #[arg(long, default_value_t = 1)]
        generation: i64,
    },
    /// Snapshot the database into databases/dumps
    DumpDb,
    /// Restore the newest snapshot into databases/binaries
    LoadDump {
        /// Replace an existing database
        #[arg(long)]
        force: bool,
    },
}

#[derive(clap::Args)]
struct FetchArgs {
    #[arg(long, env = "GENIUS_ACCESS_TOKEN", hide_env_values = true)]
    genius_token: Option<String>,

    /// Language code lyrics must be detected as
    #[arg(long, default_value = "en")]
    language: String,

    #[arg(long, default_value_t = 1)]
    generation: i64,

    /// Minimum delay between provider requests
    #[arg(long, default_value_t = 0)]
    request_delay_ms: u64,

    #[arg(long, default_value_t = 15)]
    timeout_secs: u64,

    /// Only attempt this many tracks
    #[arg(long)]
    limit: Option<usize>,

    #[arg(long, default_value_t = 100)]
    progress_interval: u64,
}

fn one_step(phase: &str, start: Instant) -> RunSummary {
    let mut summary = RunSummary::new(phase);
    summary.total = 1;
    summary.succeeded = 1;
    summary.elapsed_secs = start.elapsed().as_secs_f64();
    summary
}

fn fetch_lyrics(config: &PipelineConfig, args: FetchArgs) -> Result<RunSummary> {
    let mut conn = store::open_existing(&config.database_path())?;
    let files = LyricsFileStore::open(config.lyrics_dir())?;
    let client = GeniusClient::new(
        args.genius_token.as_deref().unwrap_or_default(),
        Duration::from_secs(args.timeout_secs),
        Duration::from_millis(args.request_delay_ms),
    )
    .context("Failed to set up the Genius client")?;
    let detector = StopwordDetector::default();
    let filter = ValidityFilter::new(&detector, args.language);

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        warn!("Interrupt received, stopping after the current track");
        handler_token.cancel();
    })
    .context("Failed to install Ctrl-C handler")?;

    let acquisition_config = AcquisitionConfig {
        generation: args.generation,
        progress_interval: args.progress_interval,
        limit: args.limit,
    };
    acquisition::run_acquisition(&mut conn, &client, &filter, &files, &cancel, &acquisition_config)
}

fn run(args: Args) -> Result<()> {
    let start = Instant::now();
    let config = PipelineConfig::from_data_dir(&args.data_dir, &args.db_name)?;
    let db_path = config.database_path();
    info!("Data directory: {}", config.data_dir().display());

    let summary = match args.command {
        Command::InitDb => {
            store::create_database(&db_path)?;
            info!("Database ready at {}", db_path.display());
            one_step("init-db", start)
        }
        Command::ImportTracks { csv } => {
            let mut conn = store::open_existing(&db_path)?;
            let csv = csv.unwrap_or_else(|| config.catalog_csv(CatalogKind::Tracks));
            catalog::import_catalog_file(&mut conn, CatalogKind::Tracks, &csv)?
        }
        Command::ImportArtists { csv } => {
            let mut conn = store::open_existing(&db_path)?;
            let csv = csv.unwrap_or_else(|| config.catalog_csv(CatalogKind::Artists));
            catalog::import_catalog_file(&mut conn, CatalogKind::Artists, &csv)?
        }
        Command::FilterTracks { cutoff_year } => {
            let mut conn = store::open_existing(&db_path)?;
            dedup::run_filter_tracks(&mut conn, cutoff_year)?
        }
        Command::InitStatus => {
            let conn = store::open_existing(&db_path)?;
            let created = store::init_track_status(&conn)?;
            info!("Created {} track_status rows", created);
            let mut summary = RunSummary::new("init-status");
            summary.total = created as u64;
            summary.succeeded = created as u64;
            summary.elapsed_secs = start.elapsed().as_secs_f64();
            summary
        }
        Command::FetchLyrics(fetch_args) => fetch_lyrics(&config, fetch_args)?,
        Command::ScoreLyrics { progress_interval } => {
            let conn = store::open_existing(&db_path)?;
            let files = LyricsFileStore::open(config.lyrics_dir())?;
            scoring::run_score_lyrics(&conn, &files, progress_interval)?
        }
        Command::Reconcile { repair, generation } => {
            let mut conn = store::open_existing(&db_path)?;
            let files = LyricsFileStore::open(config.lyrics_dir())?;
            let report = acquisition::reconcile(&mut conn, &files, repair, generation)?;
            report.summary(start.elapsed().as_secs_f64())
        }
        Command::DumpDb => {
            let now = chrono::Local::now().naive_local();
            backup::dump_db(&db_path, &config.db_name, &config.dumps_dir(), now)?;
            one_step("dump-db", start)
        }
        Command::LoadDump { force } => {
            backup::load_latest_dump(&config.dumps_dir(), &config.db_name, &db_path, force)?;
            one_step("load-dump", start)
        }
    };

    summary.log();
    if let Some(path) = &args.stats_json {
        summary.write_json(path)?;
        info!("Wrote run summary to {}", path.display());
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    set_log_only(args.log_only);

    if let Err(err) = run(args) {
        error!("fatal: {:#}", err);
        std::process::exit(1);
    }
}
