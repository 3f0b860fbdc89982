//! Reads embedded track metadata via `lofty`, falling back to folder- and filename-derived
//! guesses when tags are absent, per the original library-scanning scripts this engine's
//! ingestion path replaces.

use std::path::Path;

use lofty::file::{AudioFile, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::Accessor;
use tracing::debug;

use crate::error::{CoreError, Result};
use crate::model::TrackInfo;

/// Builds a [`TrackInfo`] for `path`, preferring embedded tags and falling back to
/// folder-name disc detection and `"Artist - Title"` filename parsing.
pub fn extract_track_info(path: &Path) -> Result<TrackInfo> {
    let tagged_file = Probe::open(path)
        .map_err(|e| CoreError::Decode { path: path.display().to_string(), source: e.into() })?
        .read()
        .map_err(|e| CoreError::Decode { path: path.display().to_string(), source: e.into() })?;

    let duration_seconds = tagged_file.properties().duration().as_secs() as i64;
    let tag = tagged_file.primary_tag().or_else(|| tagged_file.first_tag());

    let (title, artist, album, track_number, total_tracks, tag_disc_number, total_discs) = match tag {
        Some(tag) => (
            tag.title().map(|s| s.to_string()),
            tag.artist().map(|s| s.to_string()),
            tag.album().map(|s| s.to_string()),
            tag.track().map(|n| n as i64),
            tag.track_total().map(|n| n as i64),
            tag.disk().map(|n| n as i64),
            tag.disk_total().map(|n| n as i64),
        ),
        None => {
            debug!(file = %path.display(), "no embedded tags, falling back to filename/folder");
            (None, None, None, None, None, None, None)
        }
    };

    let (fallback_artist, fallback_title) = parse_artist_title_from_filename(path);

    let disc_number = tag_disc_number
        .or_else(|| disc_number_from_folder(path))
        .unwrap_or(1);

    Ok(TrackInfo {
        track_id: None,
        title: title.unwrap_or(fallback_title),
        artist: artist.unwrap_or(fallback_artist),
        album,
        album_art_path: None,
        lyrics_path: None,
        duration_seconds,
        audio_file_path: path.display().to_string(),
        track_number,
        total_tracks,
        disc_number,
        total_discs,
        fingerprint_count: 0,
        date_added: None,
    })
}

/// `"Artist - Title"` stem parsing; a stem with no `" - "` separator becomes the title with
/// artist `"Unknown Artist"`.
fn parse_artist_title_from_filename(path: &Path) -> (String, String) {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Unknown Title")
        .to_string();

    match stem.split_once(" - ") {
        Some((artist, title)) => (artist.trim().to_string(), title.trim().to_string()),
        None => ("Unknown Artist".to_string(), stem),
    }
}

/// Recognizes `Disc N` / `CD N` / `Disk N` / `Part N` in the immediate parent folder name.
fn disc_number_from_folder(path: &Path) -> Option<i64> {
    let folder_name = path.parent()?.file_name()?.to_str()?;
    find_disc_number(folder_name)
}

fn find_disc_number(folder_name: &str) -> Option<i64> {
    let lower = folder_name.to_ascii_lowercase();
    for prefix in ["disc", "cd", "disk", "part"] {
        if let Some(pos) = lower.find(prefix) {
            let rest = lower[pos + prefix.len()..].trim_start();
            let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
            if !digits.is_empty() {
                if let Ok(n) = digits.parse::<i64>() {
                    return Some(n);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn filename_parses_artist_dash_title() {
        let (artist, title) = parse_artist_title_from_filename(Path::new("/music/Artist Name - Song Title.mp3"));
        assert_eq!(artist, "Artist Name");
        assert_eq!(title, "Song Title");
    }

    #[test]
    fn filename_without_separator_is_title_only() {
        let (artist, title) = parse_artist_title_from_filename(Path::new("/music/SongTitle.mp3"));
        assert_eq!(artist, "Unknown Artist");
        assert_eq!(title, "SongTitle");
    }

    #[test]
    fn disc_number_recognizes_common_patterns() {
        assert_eq!(find_disc_number("Disc 1"), Some(1));
        assert_eq!(find_disc_number("CD2"), Some(2));
        assert_eq!(find_disc_number("Disk 3"), Some(3));
        assert_eq!(find_disc_number("Part 4"), Some(4));
        assert_eq!(find_disc_number("Greatest Hits"), None);
    }

    #[test]
    fn disc_number_from_folder_reads_parent_directory() {
        let path: PathBuf = PathBuf::from("/music/Album/Disc 2/track.flac");
        assert_eq!(disc_number_from_folder(&path), Some(2));
    }
}
