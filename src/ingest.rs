//! Drives the ingestion pipeline over a library directory: a bounded worker pool decodes and
//! fingerprints files in parallel, feeding a single writer thread that owns every mutating
//! Catalog Store call.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::audio_io;
use crate::config::Config;
use crate::fingerprint;
use crate::model::{TrackInfo, Token};
use crate::signal;
use crate::store::CatalogStore;
use crate::tags;

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "wav", "m4a", "ogg", "aac", "opus"];

/// Outcome counters for a full library ingest run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

enum WorkItem {
    Processed { track_info: TrackInfo, tokens: Vec<Token> },
    Failed { path: PathBuf, reason: String },
    Skipped,
}

/// Walks `library_dir` for recognized audio extensions and ingests each file into `store`.
/// Per-file failures are isolated and counted; the run only returns `Err` for an I/O failure
/// walking the directory itself.
pub fn ingest_library(
    store: &Arc<CatalogStore>,
    library_dir: &Path,
    config: &Config,
    reprocess: bool,
) -> crate::error::Result<IngestSummary> {
    let files = collect_audio_files(library_dir)?;
    info!(count = files.len(), dir = %library_dir.display(), "starting ingest");

    let queue = Arc::new(Mutex::new(VecDeque::from(files)));
    let (tx, rx) = mpsc::channel::<WorkItem>();

    let num_workers = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    let mut handles = Vec::with_capacity(num_workers);

    for _ in 0..num_workers {
        let queue = Arc::clone(&queue);
        let tx = tx.clone();
        let config = config.clone();
        // `CatalogStore` is only used here for the read-only `track_id_for_path` lookup;
        // every mutating call happens in the writer loop below, preserving the
        // single-writer discipline over the store connection.
        let store = Arc::clone(store);

        handles.push(std::thread::spawn(move || loop {
            let path = {
                let mut q = queue.lock().expect("work queue poisoned");
                q.pop_front()
            };
            let Some(path) = path else { break };

            let item = process_file(&store, &path, &config, reprocess);
            if tx.send(item).is_err() {
                break;
            }
        }));
    }
    drop(tx);

    let mut summary = IngestSummary::default();
    while let Ok(item) = rx.recv() {
        match item {
            WorkItem::Processed { track_info, tokens } => match store.add_track(track_info) {
                Ok(outcome) => {
                    let track_id = outcome.track_id();
                    match store.upsert_postings(track_id, &tokens, None) {
                        Ok(()) => summary.succeeded += 1,
                        Err(e) => {
                            warn!(track_id, error = %e, "failed to write postings");
                            summary.failed += 1;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to add track");
                    summary.failed += 1;
                }
            },
            WorkItem::Failed { path, reason } => {
                warn!(file = %path.display(), reason, "failed to process file");
                summary.failed += 1;
            }
            WorkItem::Skipped => summary.skipped += 1,
        }
    }

    for handle in handles {
        let _ = handle.join();
    }

    info!(
        succeeded = summary.succeeded,
        failed = summary.failed,
        skipped = summary.skipped,
        "ingest complete"
    );
    Ok(summary)
}

fn process_file(store: &CatalogStore, path: &Path, config: &Config, reprocess: bool) -> WorkItem {
    let path_str = path.display().to_string();

    match store.track_id_for_path(&path_str) {
        Ok(Some(_)) if !reprocess => return WorkItem::Skipped,
        Ok(_) => {}
        Err(e) => return WorkItem::Failed { path: path.to_path_buf(), reason: e.to_string() },
    }

    let decoded = match audio_io::load_audio_file(path, config.target_sample_rate) {
        Ok(d) => d,
        Err(e) => return WorkItem::Failed { path: path.to_path_buf(), reason: e.to_string() },
    };

    let mut track_info = match tags::extract_track_info(path) {
        Ok(t) => t,
        Err(e) => return WorkItem::Failed { path: path.to_path_buf(), reason: e.to_string() },
    };
    track_info.audio_file_path = path_str;

    let spectrogram = signal::compute_spectrogram(
        &decoded.samples,
        config.stft_window_size,
        config.stft_hop_size,
        config.silence_threshold,
    );
    let peaks = signal::extract_peaks(&spectrogram, config.neighborhood_size, config.peak_threshold_db);
    let tokens = fingerprint::build_tokens(&peaks, config.fan_value, config.min_time_delta, config.max_time_delta);

    WorkItem::Processed { track_info, tokens }
}

fn collect_audio_files(dir: &Path) -> crate::error::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    walk_dir(dir, &mut out)?;
    Ok(out)
}

fn walk_dir(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk_dir(&path, out)?;
        } else if is_audio_file(&path) {
            out.push(path);
        }
    }
    Ok(())
}

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| AUDIO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_audio_file_recognizes_known_extensions() {
        assert!(is_audio_file(Path::new("/music/song.mp3")));
        assert!(is_audio_file(Path::new("/music/song.FLAC")));
        assert!(!is_audio_file(Path::new("/music/cover.jpg")));
        assert!(!is_audio_file(Path::new("/music/readme")));
    }

    #[test]
    fn collect_audio_files_walks_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("Disc 1")).unwrap();
        std::fs::write(dir.path().join("Disc 1/track1.mp3"), b"fake").unwrap();
        std::fs::write(dir.path().join("cover.jpg"), b"fake").unwrap();

        let files = collect_audio_files(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("track1.mp3"));
    }
}
