//! Ranks candidate tracks for a query token sequence via time-offset histogramming.
//!
//! Grounded in the teacher's `query_db_and_match` (the offset-histogram idea), generalized
//! to the canonical confidence formula and deterministic top-10 ranking this spec calls for.

use std::collections::HashMap;

use crate::config::Config;
use crate::error::Result;
use crate::model::Token;
use crate::store::CatalogStore;

/// Scores and ranks candidate tracks for `query_tokens` against `store`.
///
/// Returns the top 10 matches as `(track_id, confidence)` pairs, sorted by
/// `(confidence DESC, aligned_count DESC, track_id ASC)`. Callers resolve `TrackInfo` via
/// `CatalogStore::get_track`.
pub fn find_matches(store: &CatalogStore, query_tokens: &[Token], config: &Config) -> Result<Vec<(i64, f64)>> {
    if query_tokens.is_empty() {
        return Ok(Vec::new());
    }

    let mut hash_to_query_times: HashMap<u64, Vec<i64>> = HashMap::new();
    for token in query_tokens {
        hash_to_query_times.entry(token.hash).or_default().push(token.anchor_frame);
    }

    let hashes: Vec<u64> = hash_to_query_times.keys().copied().collect();
    let postings = store.lookup_postings(&hashes, None)?;

    let mut per_track_diffs: HashMap<i64, Vec<i64>> = HashMap::new();
    for (hash, track_id, db_time) in postings {
        if let Some(query_times) = hash_to_query_times.get(&hash) {
            for &query_time in query_times {
                per_track_diffs.entry(track_id).or_default().push(db_time - query_time);
            }
        }
    }

    let total_query_tokens = query_tokens.len() as f64;
    let mut scored: Vec<(i64, f64, usize)> = Vec::new();

    for (track_id, diffs) in per_track_diffs {
        let mut counts: HashMap<i64, usize> = HashMap::new();
        for &diff in &diffs {
            *counts.entry(diff).or_insert(0) += 1;
        }

        let (_, aligned_count) = counts
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
            .map(|(diff, count)| (*diff, *count))
            .expect("diffs is non-empty for any track present in per_track_diffs");

        if aligned_count < config.min_absolute_matches {
            continue;
        }

        let alignment_score = aligned_count as f64 / diffs.len() as f64;
        let coverage_score = aligned_count as f64 / total_query_tokens;
        let base = 0.6 * alignment_score + 0.4 * coverage_score;

        let boost = if aligned_count > 100 {
            1.2
        } else if aligned_count > 50 {
            1.1
        } else {
            1.0
        };

        let confidence = (base * boost).clamp(0.0, 1.0);

        if confidence < config.min_match_confidence {
            continue;
        }

        scored.push((track_id, confidence, aligned_count));
    }

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.2.cmp(&a.2))
            .then(a.0.cmp(&b.0))
    });
    scored.truncate(10);

    Ok(scored.into_iter().map(|(track_id, confidence, _)| (track_id, confidence)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AddTrackOutcome, TrackInfo};

    fn temp_store() -> (CatalogStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::open(&dir.path().join("catalog.sqlite3")).unwrap();
        (store, dir)
    }

    fn ingest(store: &CatalogStore, path: &str, tokens: &[Token]) -> i64 {
        let outcome = store.add_track(TrackInfo::new("Song", "Artist", path)).unwrap();
        let track_id = match outcome {
            AddTrackOutcome::Inserted(id) | AddTrackOutcome::AlreadyExists(id) => id,
        };
        store.upsert_postings(track_id, tokens, None).unwrap();
        track_id
    }

    #[test]
    fn empty_query_yields_no_store_reads_and_empty_result() {
        let (store, _dir) = temp_store();
        let config = Config::default();
        let matches = find_matches(&store, &[], &config).unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn self_match_scores_highest_with_exact_alignment() {
        let (store, _dir) = temp_store();
        let mut config = Config::default();
        config.min_absolute_matches = 3;

        let tokens: Vec<Token> = (0..20).map(|i| Token { hash: i, anchor_frame: i as i64 * 10 }).collect();
        let track_id = ingest(&store, "/music/a.mp3", &tokens);

        let matches = find_matches(&store, &tokens, &config).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].0, track_id);
        assert!(matches[0].1 >= 0.5);
    }

    #[test]
    fn noise_query_with_no_overlapping_hashes_rejected() {
        let (store, _dir) = temp_store();
        let config = Config::default();

        let catalog_tokens: Vec<Token> = (0..20).map(|i| Token { hash: i, anchor_frame: i as i64 }).collect();
        ingest(&store, "/music/a.mp3", &catalog_tokens);

        let noise_tokens: Vec<Token> = (1000..1010).map(|i| Token { hash: i, anchor_frame: i as i64 }).collect();
        let matches = find_matches(&store, &noise_tokens, &config).unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn below_min_absolute_matches_is_skipped() {
        let (store, _dir) = temp_store();
        let mut config = Config::default();
        config.min_absolute_matches = 10;

        let tokens: Vec<Token> = (0..5).map(|i| Token { hash: i, anchor_frame: i as i64 }).collect();
        ingest(&store, "/music/a.mp3", &tokens);

        let matches = find_matches(&store, &tokens, &config).unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn ranking_is_deterministic_across_repeated_runs() {
        let (store, _dir) = temp_store();
        let mut config = Config::default();
        config.min_absolute_matches = 3;

        let tokens_a: Vec<Token> = (0..20).map(|i| Token { hash: i, anchor_frame: i as i64 }).collect();
        let tokens_b: Vec<Token> = (0..20).map(|i| Token { hash: i, anchor_frame: i as i64 + 1 }).collect();
        ingest(&store, "/music/a.mp3", &tokens_a);
        ingest(&store, "/music/b.mp3", &tokens_b);

        let query: Vec<Token> = (0..20).map(|i| Token { hash: i, anchor_frame: i as i64 }).collect();
        let first = find_matches(&store, &query, &config).unwrap();
        let second = find_matches(&store, &query, &config).unwrap();
        assert_eq!(first, second);
    }
}
