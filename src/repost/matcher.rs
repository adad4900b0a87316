//! Approximate-match scan over a record snapshot.

use thiserror::Error;
use tracing::debug;

use crate::repost::fingerprint::is_blank;
use crate::repost::record_store::{FingerprintJob, ImageRecord, RecordSnapshot};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatchError {
    #[error("Invalid fingerprint '{0}'")]
    InvalidFingerprint(String),

    #[error("Fingerprint lengths differ: {0} vs {1}")]
    LengthMismatch(usize, usize),

    #[error("Match scan panicked: {0}")]
    Panicked(String),
}

pub type MatchResult<T> = Result<T, MatchError>;

/// A record matches when its distance is strictly below the cutoff.
#[inline]
fn within_cutoff(distance: u32, cutoff: u32) -> bool {
    distance < cutoff
}

fn decode(hash: &str) -> MatchResult<Vec<u8>> {
    hex::decode(hash).map_err(|_| MatchError::InvalidFingerprint(hash.to_string()))
}

/// Number of differing bits between two hex-encoded fingerprints.
pub fn hamming_distance(a: &str, b: &str) -> MatchResult<u32> {
    distance_to(&decode(a)?, b)
}

fn distance_to(candidate: &[u8], hash: &str) -> MatchResult<u32> {
    let other = decode(hash)?;
    if other.len() != candidate.len() {
        return Err(MatchError::LengthMismatch(candidate.len() * 2, hash.len()));
    }
    Ok(candidate
        .iter()
        .zip(&other)
        .map(|(x, y)| (x ^ y).count_ones())
        .sum())
}

/// Every earlier record within `cutoff` of the job's fingerprint, oldest first.
///
/// Records are compared at the job's own width. Records with the job's own
/// id or author are never returned. A blank candidate matches nothing.
pub fn find_matches(job: &FingerprintJob, snapshot: &RecordSnapshot, cutoff: u32) -> MatchResult<Vec<ImageRecord>> {
    let candidate = decode(&job.fingerprint)?;
    if candidate.is_empty() {
        return Err(MatchError::InvalidFingerprint(job.fingerprint.clone()));
    }
    if is_blank(&job.fingerprint) {
        return Ok(Vec::new());
    }

    let mut matches: Vec<ImageRecord> = snapshot
        .iter()
        .filter(|record| record.image_id != job.image_id && record.author != job.author)
        .filter(|record| match distance_to(&candidate, record.fingerprint(job.hash_size)) {
            Ok(distance) => within_cutoff(distance, cutoff),
            Err(e) => {
                debug!(image_id = %record.image_id, trace_id = %job.trace_id, "Skipping record: {}", e);
                false
            }
        })
        .cloned()
        .collect();

    matches.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repost::config_loader::HashSize;
    use crate::repost::record_store::tests::record;
    use uuid::Uuid;

    fn job(id: &str, author: &str, hash: &str) -> FingerprintJob {
        let hash_size = match hash.len() {
            64 => HashSize::Hash64,
            256 => HashSize::Hash256,
            _ => HashSize::Hash16,
        };
        FingerprintJob {
            trace_id: Uuid::new_v4(),
            fingerprint: hash.to_string(),
            hash_size,
            image_id: id.to_string(),
            author: author.to_string(),
        }
    }

    fn ids(records: &[ImageRecord]) -> Vec<&str> {
        records.iter().map(|r| r.image_id.as_str()).collect()
    }

    fn scenario() -> RecordSnapshot {
        // B is submitted before A so ordering is by time, not insertion.
        vec![record("A", "u1", "0f0f", 5), record("B", "u2", "0f0e", 2)]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_hamming_distance() {
        assert_eq!(hamming_distance("0f0f", "0f0f").unwrap(), 0);
        assert_eq!(hamming_distance("0f0f", "0f0e").unwrap(), 1);
        assert_eq!(hamming_distance("00", "ff").unwrap(), 8);
        assert!(matches!(
            hamming_distance("0f0f", "0f"),
            Err(MatchError::LengthMismatch(4, 2))
        ));
        assert!(matches!(
            hamming_distance("zz", "00"),
            Err(MatchError::InvalidFingerprint(_))
        ));
    }

    #[test]
    fn test_scenario_cutoff_three_returns_both_oldest_first() {
        let found = find_matches(&job("C", "u3", "0f0f"), &scenario(), 3).unwrap();
        assert_eq!(ids(&found), vec!["B", "A"]);
    }

    #[test]
    fn test_scenario_cutoff_one_returns_exact_only() {
        let found = find_matches(&job("C", "u3", "0f0f"), &scenario(), 1).unwrap();
        assert_eq!(ids(&found), vec!["A"]);
    }

    #[test]
    fn test_scenario_cutoff_two_returns_both() {
        let found = find_matches(&job("C", "u3", "0f0f"), &scenario(), 2).unwrap();
        assert_eq!(ids(&found), vec!["B", "A"]);
    }

    #[test]
    fn test_cutoff_boundary() {
        // Distances 2, 3 and 4 from the candidate.
        let snapshot: RecordSnapshot = vec![
            record("d2", "a", "f300", 0),
            record("d3", "b", "f700", 1),
            record("d4", "c", "ff00", 2),
        ]
        .into_iter()
        .collect();
        let candidate = job("q", "z", "f000");
        assert_eq!(hamming_distance("f000", "f300").unwrap(), 2);
        assert_eq!(hamming_distance("f000", "f700").unwrap(), 3);
        assert_eq!(hamming_distance("f000", "ff00").unwrap(), 4);

        // Cutoff 3 keeps the one below and drops equal and above.
        let found = find_matches(&candidate, &snapshot, 3).unwrap();
        assert_eq!(ids(&found), vec!["d2"]);

        // Cutoff 4 admits distance 3 but still not 4.
        let found = find_matches(&candidate, &snapshot, 4).unwrap();
        assert_eq!(ids(&found), vec!["d2", "d3"]);
    }

    #[test]
    fn test_same_id_and_author_excluded_at_distance_zero() {
        let snapshot: RecordSnapshot = vec![
            record("C", "other", "0f0f", 0),
            record("D", "u3", "0f0f", 1),
        ]
        .into_iter()
        .collect();
        let found = find_matches(&job("C", "u3", "0f0f"), &snapshot, 10).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_blank_candidate_matches_nothing() {
        let snapshot: RecordSnapshot = vec![record("A", "u1", "0000", 0)].into_iter().collect();
        let found = find_matches(&job("C", "u3", "0000"), &snapshot, 100).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_invalid_candidate_is_an_error() {
        let result = find_matches(&job("C", "u3", "xyz"), &scenario(), 3);
        assert!(matches!(result, Err(MatchError::InvalidFingerprint(_))));
    }

    #[test]
    fn test_unreadable_record_skipped() {
        let snapshot: RecordSnapshot = vec![
            record("bad", "u1", "not-hex!", 0),
            record("short", "u2", "0f", 1),
            record("good", "u4", "0f0f", 2),
        ]
        .into_iter()
        .collect();
        let found = find_matches(&job("C", "u3", "0f0f"), &snapshot, 3).unwrap();
        assert_eq!(ids(&found), vec!["good"]);
    }

    #[test]
    fn test_matches_on_configured_width() {
        let mut wide = record("W", "u1", "ffff", 0);
        wide.hash64 = "ab".repeat(32);
        let snapshot: RecordSnapshot = vec![wide].into_iter().collect();
        let found = find_matches(&job("C", "u3", &"ab".repeat(32)), &snapshot, 1).unwrap();
        assert_eq!(ids(&found), vec!["W"]);
    }
}
