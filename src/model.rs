use chrono::{DateTime, Utc};

/// Metadata describing a track, as presented to or read from the catalog store.
///
/// `track_id`/`fingerprint_count`/`date_added` are populated by the store once a track has
/// actually been persisted; they are `None`/defaulted on a freshly-built value passed into
/// `add_track`.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    pub track_id: Option<i64>,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub album_art_path: Option<String>,
    pub lyrics_path: Option<String>,
    pub duration_seconds: i64,
    pub audio_file_path: String,
    pub track_number: Option<i64>,
    pub total_tracks: Option<i64>,
    pub disc_number: i64,
    pub total_discs: Option<i64>,
    pub fingerprint_count: i64,
    pub date_added: Option<DateTime<Utc>>,
}

impl TrackInfo {
    /// Build a new, not-yet-persisted track record. `disc_number` defaults to 1 per the
    /// spec's Open Question resolution.
    pub fn new(title: impl Into<String>, artist: impl Into<String>, audio_file_path: impl Into<String>) -> Self {
        Self {
            track_id: None,
            title: title.into(),
            artist: artist.into(),
            album: None,
            album_art_path: None,
            lyrics_path: None,
            duration_seconds: 0,
            audio_file_path: audio_file_path.into(),
            track_number: None,
            total_tracks: None,
            disc_number: 1,
            total_discs: None,
            fingerprint_count: 0,
            date_added: None,
        }
    }
}

/// Outcome of `CatalogStore::add_track`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddTrackOutcome {
    Inserted(i64),
    AlreadyExists(i64),
}

impl AddTrackOutcome {
    pub fn track_id(self) -> i64 {
        match self {
            AddTrackOutcome::Inserted(id) | AddTrackOutcome::AlreadyExists(id) => id,
        }
    }
}

/// A single strict local-maximum cell of a spectrogram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub frame: usize,
    pub bin: usize,
    pub magnitude_db: f32,
}

/// A constellation-pair hash token, `(hash64, anchor_frame)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub hash: u64,
    pub anchor_frame: i64,
}

/// Bounded-staleness catalog statistics (`CatalogStore::stats`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CatalogStats {
    pub total_tracks: i64,
    pub total_postings: i64,
    pub unique_hashes: i64,
    pub total_albums: i64,
    pub total_artists: i64,
    pub db_size_bytes: i64,
}

/// Ephemeral per-buffer audio state, consumed only by the visualizer collaborator via
/// `group_frequencies`. The core never stores an instance of this.
#[derive(Debug, Clone, Default)]
pub struct AudioState {
    pub volume_rms: f32,
    pub frequency_bins: Vec<f32>,
}
