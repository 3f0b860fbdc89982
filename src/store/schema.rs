//! Table definitions, pragmas, and the schema-version check run on every open.

use rusqlite::Connection;

use crate::error::{CoreError, Result};
use crate::fingerprint::HASH_LAYOUT_VERSION;

/// Bumped whenever the `tracks`/`postings` table shapes change incompatibly.
pub const SCHEMA_VERSION: i64 = 1;

const CREATE_TRACKS: &str = "
CREATE TABLE IF NOT EXISTS tracks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    artist TEXT NOT NULL,
    album TEXT,
    album_art_path TEXT,
    lyrics_path TEXT,
    duration_seconds INTEGER NOT NULL,
    audio_file_path TEXT NOT NULL UNIQUE,
    track_number INTEGER,
    total_tracks INTEGER,
    disc_number INTEGER NOT NULL DEFAULT 1,
    total_discs INTEGER,
    fingerprint_count INTEGER NOT NULL DEFAULT 0,
    date_added TEXT NOT NULL
);";

const CREATE_TRACKS_ALBUM_INDEX: &str = "
CREATE INDEX IF NOT EXISTS idx_tracks_album_disc_track
    ON tracks (album, disc_number, track_number);";

const CREATE_POSTINGS: &str = "
CREATE TABLE IF NOT EXISTS postings (
    hash INTEGER NOT NULL,
    track_id INTEGER NOT NULL,
    time_offset INTEGER NOT NULL,
    PRIMARY KEY (hash, track_id, time_offset),
    FOREIGN KEY (track_id) REFERENCES tracks(id) ON DELETE CASCADE
) WITHOUT ROWID;";

const CREATE_POSTINGS_TRACK_INDEX: &str = "
CREATE INDEX IF NOT EXISTS idx_postings_track_id ON postings (track_id);";

const CREATE_SCHEMA_META: &str = "
CREATE TABLE IF NOT EXISTS schema_meta (
    id INTEGER PRIMARY KEY CHECK (id = 0),
    schema_version INTEGER NOT NULL,
    hash_layout_version INTEGER NOT NULL
);";

/// Opens `path`, applies performance pragmas, creates tables if absent, and verifies the
/// stored schema/hash-layout versions match this build. `page_size` must be set before any
/// table exists, so it runs first.
pub fn open_and_init(path: &std::path::Path) -> Result<Connection> {
    let conn = Connection::open(path)?;

    conn.execute_batch("PRAGMA page_size = 16384;")?;
    conn.execute_batch(
        "PRAGMA cache_size = -65536;
         PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;",
    )?;

    conn.execute_batch(CREATE_TRACKS)?;
    conn.execute_batch(CREATE_TRACKS_ALBUM_INDEX)?;
    conn.execute_batch(CREATE_POSTINGS)?;
    conn.execute_batch(CREATE_POSTINGS_TRACK_INDEX)?;
    conn.execute_batch(CREATE_SCHEMA_META)?;

    check_or_init_schema_meta(&conn)?;

    Ok(conn)
}

fn check_or_init_schema_meta(conn: &Connection) -> Result<()> {
    let existing: Option<(i64, i64)> = conn
        .query_row(
            "SELECT schema_version, hash_layout_version FROM schema_meta WHERE id = 0",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .ok();

    match existing {
        Some((schema_version, hash_layout_version)) => {
            if schema_version != SCHEMA_VERSION {
                return Err(CoreError::Corruption(format!(
                    "schema version mismatch: catalog has {schema_version}, this build expects {SCHEMA_VERSION}"
                )));
            }
            if hash_layout_version != HASH_LAYOUT_VERSION {
                return Err(CoreError::Corruption(format!(
                    "hash layout version mismatch: catalog has {hash_layout_version}, this build expects {HASH_LAYOUT_VERSION}"
                )));
            }
            Ok(())
        }
        None => {
            conn.execute(
                "INSERT INTO schema_meta (id, schema_version, hash_layout_version) VALUES (0, ?1, ?2)",
                rusqlite::params![SCHEMA_VERSION, HASH_LAYOUT_VERSION],
            )?;
            Ok(())
        }
    }
}
