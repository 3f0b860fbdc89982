//! Persistent, transactional hash-indexed catalog, backed by SQLite via `rusqlite`.
//!
//! Grounded in the teacher's `database.rs` (the enroll/query shape), generalized to the
//! canonical three-table layout (`tracks`/`postings`/`schema_meta`), bounded-staleness
//! caching, and chunked/retrying bulk writes the expanded spec calls for.

mod schema;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use crate::error::{CoreError, Result};
use crate::model::{AddTrackOutcome, CatalogStats, Token, TrackInfo};

const POSTING_CHUNK_SIZE: usize = 5000;
const LOOKUP_BATCH_SIZE: usize = 500;
const LOOKUP_TEMP_TABLE_THRESHOLD: usize = 1000;
const MAX_RETRIES: u32 = 3;
const STATS_CACHE_TTL: Duration = Duration::from_secs(60);

/// Handle to the on-disk catalog. Cheaply `Clone`-free; share via `Arc<CatalogStore>` across
/// worker threads — internally it is just a `Mutex<Connection>` plus two small caches.
pub struct CatalogStore {
    conn: Mutex<Connection>,
    track_cache: Mutex<HashMap<i64, TrackInfo>>,
    stats_cache: Mutex<Option<(Instant, CatalogStats)>>,
}

impl CatalogStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = schema::open_and_init(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
            track_cache: Mutex::new(HashMap::new()),
            stats_cache: Mutex::new(None),
        })
    }

    pub fn add_track(&self, mut track: TrackInfo) -> Result<AddTrackOutcome> {
        if track.title.trim().is_empty() {
            return Err(CoreError::InvalidInput("title must not be empty".to_string()));
        }
        if track.artist.trim().is_empty() {
            return Err(CoreError::InvalidInput("artist must not be empty".to_string()));
        }
        if track.duration_seconds < 0 {
            return Err(CoreError::InvalidInput(format!(
                "duration_seconds must not be negative, got {}",
                track.duration_seconds
            )));
        }

        let conn = self.conn.lock().expect("catalog connection poisoned");

        let existing_id: Option<i64> = conn
            .query_row(
                "SELECT id FROM tracks WHERE audio_file_path = ?1",
                params![track.audio_file_path],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing_id {
            return Ok(AddTrackOutcome::AlreadyExists(id));
        }

        let now = Utc::now();
        conn.execute(
            "INSERT INTO tracks (
                title, artist, album, album_art_path, lyrics_path, duration_seconds,
                audio_file_path, track_number, total_tracks, disc_number, total_discs,
                fingerprint_count, date_added
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0, ?12)",
            params![
                track.title,
                track.artist,
                track.album,
                track.album_art_path,
                track.lyrics_path,
                track.duration_seconds,
                track.audio_file_path,
                track.track_number,
                track.total_tracks,
                track.disc_number,
                track.total_discs,
                now.to_rfc3339(),
            ],
        )?;

        let track_id = conn.last_insert_rowid();
        track.track_id = Some(track_id);
        track.date_added = Some(now);

        drop(conn);
        self.track_cache.lock().expect("track cache poisoned").insert(track_id, track);
        self.invalidate_stats();

        Ok(AddTrackOutcome::Inserted(track_id))
    }

    pub fn delete_track(&self, track_id: i64) -> Result<()> {
        let conn = self.conn.lock().expect("catalog connection poisoned");
        conn.execute("DELETE FROM tracks WHERE id = ?1", params![track_id])?;
        drop(conn);

        self.track_cache.lock().expect("track cache poisoned").remove(&track_id);
        self.invalidate_stats();
        Ok(())
    }

    pub fn get_track(&self, track_id: i64) -> Result<Option<TrackInfo>> {
        if let Some(track) = self.track_cache.lock().expect("track cache poisoned").get(&track_id) {
            return Ok(Some(track.clone()));
        }

        let conn = self.conn.lock().expect("catalog connection poisoned");
        let track = conn
            .query_row(
                "SELECT id, title, artist, album, album_art_path, lyrics_path, duration_seconds,
                        audio_file_path, track_number, total_tracks, disc_number, total_discs,
                        fingerprint_count, date_added
                 FROM tracks WHERE id = ?1",
                params![track_id],
                row_to_track_info,
            )
            .optional()?;
        drop(conn);

        if let Some(ref t) = track {
            self.track_cache.lock().expect("track cache poisoned").insert(track_id, t.clone());
        }
        Ok(track)
    }

    /// Read-only existence check by file path, safe to call from decode/fingerprint worker
    /// threads that do not otherwise mutate the store.
    pub fn track_id_for_path(&self, audio_file_path: &str) -> Result<Option<i64>> {
        let conn = self.conn.lock().expect("catalog connection poisoned");
        let id = conn
            .query_row("SELECT id FROM tracks WHERE audio_file_path = ?1", params![audio_file_path], |row| row.get(0))
            .optional()?;
        Ok(id)
    }

    pub fn track_exists(&self, title: &str, artist: &str, album: Option<&str>) -> Result<bool> {
        let conn = self.conn.lock().expect("catalog connection poisoned");
        let exists = conn
            .query_row(
                "SELECT 1 FROM tracks WHERE title = ?1 AND artist = ?2 AND
                    ((?3 IS NULL AND album IS NULL) OR album = ?3) LIMIT 1",
                params![title, artist, album],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        Ok(exists)
    }

    /// Substring match over title/artist/album, title matches ordered first.
    pub fn search_tracks(&self, query: &str) -> Result<Vec<TrackInfo>> {
        let like = format!("%{query}%");
        let conn = self.conn.lock().expect("catalog connection poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, title, artist, album, album_art_path, lyrics_path, duration_seconds,
                    audio_file_path, track_number, total_tracks, disc_number, total_discs,
                    fingerprint_count, date_added
             FROM tracks
             WHERE title LIKE ?1 OR artist LIKE ?1 OR album LIKE ?1
             ORDER BY
                CASE WHEN title LIKE ?1 THEN 0 ELSE 1 END,
                CASE WHEN artist LIKE ?1 THEN 0 ELSE 1 END,
                CASE WHEN album LIKE ?1 THEN 0 ELSE 1 END,
                title",
        )?;
        let rows = stmt.query_map(params![like], row_to_track_info)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(CoreError::from)
    }

    pub fn get_album_tracks(&self, album: &str, artist: Option<&str>) -> Result<Vec<TrackInfo>> {
        let conn = self.conn.lock().expect("catalog connection poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, title, artist, album, album_art_path, lyrics_path, duration_seconds,
                    audio_file_path, track_number, total_tracks, disc_number, total_discs,
                    fingerprint_count, date_added
             FROM tracks
             WHERE album = ?1 AND (?2 IS NULL OR artist = ?2)
             ORDER BY disc_number, track_number",
        )?;
        let rows = stmt.query_map(params![album, artist], row_to_track_info)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(CoreError::from)
    }

    /// Atomically replaces `track_id`'s posting set: deletes existing postings, inserts the
    /// new tokens in chunks of ~5000, and updates `fingerprint_count` only once every chunk
    /// has committed.
    /// Deletes `track_id`'s existing postings, inserts `tokens`, and updates
    /// `fingerprint_count`, all inside one transaction so a mid-upsert failure rolls back to
    /// the prior posting set rather than leaving a partial one. Chunking of the inserts is
    /// purely to bound statement/memory size per round-trip; SQLite sustains one large
    /// transaction fine, so it is not split into separate commits.
    pub fn upsert_postings(&self, track_id: i64, tokens: &[Token], deadline: Option<Instant>) -> Result<()> {
        let conn = self.conn.lock().expect("catalog connection poisoned");

        run_with_retry(
            || {
                let tx = conn.unchecked_transaction()?;

                tx.execute("DELETE FROM postings WHERE track_id = ?1", params![track_id])?;

                for chunk in tokens.chunks(POSTING_CHUNK_SIZE) {
                    let mut stmt = tx.prepare(
                        "INSERT OR IGNORE INTO postings (hash, track_id, time_offset) VALUES (?1, ?2, ?3)",
                    )?;
                    for token in chunk {
                        stmt.execute(params![token.hash as i64, track_id, token.anchor_frame])?;
                    }
                }

                tx.execute(
                    "UPDATE tracks SET fingerprint_count = (SELECT COUNT(*) FROM postings WHERE track_id = ?1) WHERE id = ?1",
                    params![track_id],
                )?;

                tx.commit()
            },
            deadline,
        )?;

        drop(conn);
        self.track_cache.lock().expect("track cache poisoned").remove(&track_id);
        self.invalidate_stats();
        Ok(())
    }

    /// Returns `(hash, track_id, time_offset)` for every posting whose hash is in `hashes`.
    pub fn lookup_postings(&self, hashes: &[u64], deadline: Option<Instant>) -> Result<Vec<(u64, i64, i64)>> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock().expect("catalog connection poisoned");

        if hashes.len() > LOOKUP_TEMP_TABLE_THRESHOLD {
            return lookup_via_temp_table(&conn, hashes, deadline);
        }

        let mut results = Vec::new();
        for batch in hashes.chunks(LOOKUP_BATCH_SIZE) {
            if let Some(dl) = deadline {
                if Instant::now() > dl {
                    return Err(CoreError::Timeout);
                }
            }
            let placeholders = std::iter::repeat("?").take(batch.len()).collect::<Vec<_>>().join(",");
            let sql = format!("SELECT hash, track_id, time_offset FROM postings WHERE hash IN ({placeholders})");
            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<i64> = batch.iter().map(|h| *h as i64).collect();
            let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), |row| {
                let hash: i64 = row.get(0)?;
                let track_id: i64 = row.get(1)?;
                let time_offset: i64 = row.get(2)?;
                Ok((hash as u64, track_id, time_offset))
            })?;
            for row in rows {
                results.push(row?);
            }
        }
        Ok(results)
    }

    pub fn stats(&self) -> Result<CatalogStats> {
        {
            let cache = self.stats_cache.lock().expect("stats cache poisoned");
            if let Some((fetched_at, stats)) = *cache {
                if fetched_at.elapsed() < STATS_CACHE_TTL {
                    return Ok(stats);
                }
            }
        }

        let conn = self.conn.lock().expect("catalog connection poisoned");
        let total_tracks: i64 = conn.query_row("SELECT COUNT(*) FROM tracks", [], |r| r.get(0))?;
        let total_postings: i64 = conn.query_row("SELECT COUNT(*) FROM postings", [], |r| r.get(0))?;
        let unique_hashes: i64 = conn.query_row("SELECT COUNT(DISTINCT hash) FROM postings", [], |r| r.get(0))?;
        let total_albums: i64 =
            conn.query_row("SELECT COUNT(DISTINCT album) FROM tracks WHERE album IS NOT NULL", [], |r| r.get(0))?;
        let total_artists: i64 = conn.query_row("SELECT COUNT(DISTINCT artist) FROM tracks", [], |r| r.get(0))?;
        let db_size_bytes: i64 = conn.query_row(
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
            [],
            |r| r.get(0),
        )?;

        let stats = CatalogStats {
            total_tracks,
            total_postings,
            unique_hashes,
            total_albums,
            total_artists,
            db_size_bytes,
        };

        drop(conn);
        *self.stats_cache.lock().expect("stats cache poisoned") = Some((Instant::now(), stats));
        Ok(stats)
    }

    pub fn optimize(&self) -> Result<()> {
        let conn = self.conn.lock().expect("catalog connection poisoned");
        conn.execute_batch("PRAGMA optimize; ANALYZE;")?;
        Ok(())
    }

    fn invalidate_stats(&self) {
        *self.stats_cache.lock().expect("stats cache poisoned") = None;
    }
}

fn lookup_via_temp_table(
    conn: &Connection,
    hashes: &[u64],
    deadline: Option<Instant>,
) -> Result<Vec<(u64, i64, i64)>> {
    conn.execute_batch("CREATE TEMP TABLE IF NOT EXISTS lookup_hashes (hash INTEGER PRIMARY KEY);")?;
    conn.execute_batch("DELETE FROM lookup_hashes;")?;

    {
        let tx_stmt = "INSERT OR IGNORE INTO lookup_hashes (hash) VALUES (?1)";
        let mut stmt = conn.prepare(tx_stmt)?;
        for h in hashes {
            if let Some(dl) = deadline {
                if Instant::now() > dl {
                    return Err(CoreError::Timeout);
                }
            }
            stmt.execute(params![*h as i64])?;
        }
    }

    let mut stmt = conn.prepare(
        "SELECT p.hash, p.track_id, p.time_offset
         FROM postings p JOIN lookup_hashes l ON p.hash = l.hash",
    )?;
    let rows = stmt.query_map([], |row| {
        let hash: i64 = row.get(0)?;
        let track_id: i64 = row.get(1)?;
        let time_offset: i64 = row.get(2)?;
        Ok((hash as u64, track_id, time_offset))
    })?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}

fn row_to_track_info(row: &rusqlite::Row<'_>) -> rusqlite::Result<TrackInfo> {
    let date_added_str: String = row.get(13)?;
    let date_added = parse_rfc3339(&date_added_str);

    Ok(TrackInfo {
        track_id: Some(row.get(0)?),
        title: row.get(1)?,
        artist: row.get(2)?,
        album: row.get(3)?,
        album_art_path: row.get(4)?,
        lyrics_path: row.get(5)?,
        duration_seconds: row.get(6)?,
        audio_file_path: row.get(7)?,
        track_number: row.get(8)?,
        total_tracks: row.get(9)?,
        disc_number: row.get(10)?,
        total_discs: row.get(11)?,
        fingerprint_count: row.get(12)?,
        date_added: Some(date_added),
    })
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|_| Utc.timestamp_opt(0, 0).unwrap())
}

/// Retries a fallible sqlite operation up to [`MAX_RETRIES`] times on `SQLITE_BUSY`/
/// `SQLITE_LOCKED`, with linear backoff, surfacing [`CoreError::Transient`] if every attempt
/// is exhausted and [`CoreError::Timeout`] if a deadline passes first.
fn run_with_retry<T, F>(mut op: F, deadline: Option<Instant>) -> Result<T>
where
    F: FnMut() -> rusqlite::Result<T>,
{
    let mut attempt = 0;
    loop {
        if let Some(dl) = deadline {
            if Instant::now() > dl {
                return Err(CoreError::Timeout);
            }
        }

        match op() {
            Ok(v) => return Ok(v),
            Err(e) if is_retryable(&e) && attempt < MAX_RETRIES => {
                attempt += 1;
                warn!(attempt, "catalog store busy, retrying");
                std::thread::sleep(Duration::from_millis(50 * attempt as u64));
            }
            Err(e) if is_retryable(&e) => {
                return Err(CoreError::Transient(format!("exhausted retries: {e}")));
            }
            Err(e) => return Err(CoreError::from(e)),
        }
    }
}

fn is_retryable(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TrackInfo;

    fn temp_store() -> (CatalogStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::open(&dir.path().join("catalog.sqlite3")).unwrap();
        (store, dir)
    }

    #[test]
    fn add_track_then_duplicate_path_returns_already_exists() {
        let (store, _dir) = temp_store();
        let track = TrackInfo::new("Song", "Artist", "/music/song.mp3");
        let first = store.add_track(track.clone()).unwrap();
        let second = store.add_track(track).unwrap();
        assert!(matches!(first, AddTrackOutcome::Inserted(_)));
        match second {
            AddTrackOutcome::AlreadyExists(id) => assert_eq!(id, first.track_id()),
            _ => panic!("expected AlreadyExists"),
        }
    }

    #[test]
    fn upsert_postings_round_trips_and_updates_fingerprint_count() {
        let (store, _dir) = temp_store();
        let outcome = store.add_track(TrackInfo::new("Song", "Artist", "/music/song.mp3")).unwrap();
        let track_id = outcome.track_id();

        let tokens = vec![
            Token { hash: 1, anchor_frame: 0 },
            Token { hash: 2, anchor_frame: 5 },
        ];
        store.upsert_postings(track_id, &tokens, None).unwrap();

        let track = store.get_track(track_id).unwrap().unwrap();
        assert_eq!(track.fingerprint_count, 2);

        let found = store.lookup_postings(&[1, 2], None).unwrap();
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn delete_track_cascades_postings_and_updates_stats() {
        let (store, _dir) = temp_store();
        let outcome = store.add_track(TrackInfo::new("Song", "Artist", "/music/song.mp3")).unwrap();
        let track_id = outcome.track_id();
        let tokens = vec![Token { hash: 1, anchor_frame: 0 }];
        store.upsert_postings(track_id, &tokens, None).unwrap();

        let before = store.stats().unwrap();
        assert_eq!(before.total_postings, 1);

        store.delete_track(track_id).unwrap();
        let after = store.stats().unwrap();
        assert_eq!(after.total_postings, 0);
        assert_eq!(after.total_tracks, 0);
        assert!(store.get_track(track_id).unwrap().is_none());
    }

    #[test]
    fn lookup_postings_uses_temp_table_path_above_threshold() {
        let (store, _dir) = temp_store();
        let outcome = store.add_track(TrackInfo::new("Song", "Artist", "/music/song.mp3")).unwrap();
        let tokens: Vec<Token> = (0..10).map(|i| Token { hash: i, anchor_frame: i as i64 }).collect();
        store.upsert_postings(outcome.track_id(), &tokens, None).unwrap();

        let hashes: Vec<u64> = (0..1500).collect();
        let found = store.lookup_postings(&hashes, None).unwrap();
        assert_eq!(found.len(), 10);
    }
}
