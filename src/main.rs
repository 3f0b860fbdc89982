use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use constellate::config::{Config, ConfigFile};
use constellate::fingerprint;
use constellate::ingest;
use constellate::matcher;
use constellate::signal;
use constellate::store::CatalogStore;

#[derive(Debug, Parser)]
#[command(name = "constellate", version, about = "Offline audio-fingerprint recognition engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Overrides the catalog database path.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Path to a TOML config file, merged over the defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fingerprints every audio file under a library directory into the catalog.
    Ingest {
        /// Re-fingerprint files already present in the catalog.
        #[arg(long)]
        reprocess: bool,
        /// Root directory to scan for audio files.
        library_dir: PathBuf,
    },
    /// Recognizes audio against the catalog.
    Recognize {
        /// Seconds of live audio to capture (requires an external capture collaborator).
        #[arg(short = 'd', long, default_value_t = 10)]
        duration: u32,
        /// Capture device index (external collaborator).
        #[arg(long)]
        device: Option<u32>,
        /// Stream progressive partial results (external collaborator).
        #[arg(long)]
        progressive: bool,
        /// Minimum confidence to report a match.
        #[arg(long)]
        confidence: Option<f64>,
        /// Run the pipeline against a decoded file slice instead of a live capture device.
        #[arg(long)]
        from_file: Option<PathBuf>,
    },
    /// Prints catalog statistics.
    Stats,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.db.as_deref())?;

    let store = Arc::new(CatalogStore::open(&config.db_path).context("failed to open catalog store")?);

    match cli.command {
        Commands::Ingest { reprocess, library_dir } => run_ingest(&store, &library_dir, &config, reprocess),
        Commands::Recognize { duration, device, progressive, confidence, from_file } => {
            run_recognize(&store, &config, duration, device, progressive, confidence, from_file)
        }
        Commands::Stats => run_stats(&store),
    }
}

fn load_config(config_path: Option<&std::path::Path>, db_override: Option<&std::path::Path>) -> Result<Config> {
    let mut config = Config::default();
    if let Some(path) = config_path {
        let file = ConfigFile::load(path).with_context(|| format!("failed to load config file {path:?}"))?;
        config = file.merge_onto(config);
    }
    if let Some(db) = db_override {
        config.db_path = db.to_path_buf();
    }
    Ok(config)
}

fn run_ingest(store: &Arc<CatalogStore>, library_dir: &std::path::Path, config: &Config, reprocess: bool) -> Result<()> {
    let summary = ingest::ingest_library(store, library_dir, config, reprocess).context("ingest failed")?;
    println!(
        "ingest complete: {} succeeded, {} failed, {} skipped",
        summary.succeeded, summary.failed, summary.skipped
    );
    if summary.failed > 0 && summary.succeeded == 0 && summary.skipped == 0 {
        anyhow::bail!("every file in the library failed to ingest");
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_recognize(
    store: &CatalogStore,
    config: &Config,
    _duration: u32,
    _device: Option<u32>,
    _progressive: bool,
    confidence: Option<f64>,
    from_file: Option<PathBuf>,
) -> Result<()> {
    let Some(path) = from_file else {
        anyhow::bail!(
            "recognize requires --from-file in this offline-core build; live audio capture is an external collaborator"
        );
    };

    let mut config = config.clone();
    if let Some(c) = confidence {
        config.min_match_confidence = c;
    }

    let decoded =
        constellate::audio_io::load_audio_file(&path, config.target_sample_rate).context("failed to decode query file")?;
    let spectrogram = signal::compute_spectrogram(
        &decoded.samples,
        config.stft_window_size,
        config.stft_hop_size,
        config.silence_threshold,
    );
    let peaks = signal::extract_peaks(&spectrogram, config.neighborhood_size, config.peak_threshold_db);
    let tokens = fingerprint::build_tokens(&peaks, config.fan_value, config.min_time_delta, config.max_time_delta);

    let matches = matcher::find_matches(store, &tokens, &config).context("matching failed")?;
    if matches.is_empty() {
        println!("No matches found");
        return Ok(());
    }

    for (track_id, confidence) in matches.into_iter().take(5) {
        match store.get_track(track_id)? {
            Some(track) => println!("{:.3}  {} — {}", confidence, track.artist, track.title),
            None => println!("{:.3}  track {} (metadata unavailable)", confidence, track_id),
        }
    }
    Ok(())
}

fn run_stats(store: &CatalogStore) -> Result<()> {
    let stats = store.stats().context("failed to read catalog stats")?;
    println!("tracks:    {}", stats.total_tracks);
    println!("postings:  {}", stats.total_postings);
    println!("hashes:    {}", stats.unique_hashes);
    println!("albums:    {}", stats.total_albums);
    println!("artists:   {}", stats.total_artists);
    println!("db size:   {} bytes", stats.db_size_bytes);
    Ok(())
}
