//! Content fingerprint used as the dedup key.
//!
//! The hash input is `company|title|description-prefix`, case-normalized and
//! whitespace-collapsed. Keying on content rather than URL absorbs tracking
//! parameters across re-scrapes and catches reposted jobs; truncating the
//! description bounds hashing cost. A near-duplicate posting with a different
//! description hashes differently on purpose: false negatives are preferred
//! over merging unrelated jobs.

use sha2::{Digest, Sha256};

use crate::NormalizedJob;

/// Number of normalized description characters that participate in the hash.
pub const DESCRIPTION_PREFIX_CHARS: usize = 250;

/// Lowercase and collapse whitespace runs to single spaces.
pub fn normalize_fragment(input: &str) -> String {
    input
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Derive the dedup hash for a normalized job.
///
/// Deterministic: identical `(company, title, description prefix)` always
/// yields the identical hex digest. The exact rule (normalize first, then
/// truncate) is pinned by a regression test; changing it re-keys every
/// stored job.
pub fn fingerprint(job: &NormalizedJob) -> String {
    let prefix = normalize_fragment(&job.description)
        .chars()
        .take(DESCRIPTION_PREFIX_CHARS)
        .collect::<String>();
    let input = format!(
        "{}|{}|{}",
        normalize_fragment(&job.company),
        normalize_fragment(&job.title),
        prefix
    );
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}


#[cfg(test)]
mod tests {
    use super::tests_support::sample_job;
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let job = sample_job();
        assert_eq!(fingerprint(&job), fingerprint(&job.clone()));
    }

    // Pins the exact normalization + truncation rule: the digest of
    // "acme|senior engineer|build things".
    #[test]
    fn fingerprint_matches_pinned_digest() {
        let job = sample_job();
        assert_eq!(
            fingerprint(&job),
            "15c45413ab71569ed1149ab2627dc36e6b0817cb60b8a187aa6122f1af5a8ece"
        );
    }

    #[test]
    fn url_and_location_do_not_affect_the_hash() {
        let job = sample_job();
        let mut rescraped = job.clone();
        rescraped.url = "http://x/1?utm_source=tracking".to_string();
        rescraped.location = "Remote".to_string();
        rescraped.external_id = "9999".to_string();
        assert_eq!(fingerprint(&job), fingerprint(&rescraped));
    }

    #[test]
    fn case_and_whitespace_are_normalized() {
        let job = sample_job();
        let mut shouty = job.clone();
        shouty.title = "  SENIOR   ENGINEER ".to_string();
        shouty.company = "ACME".to_string();
        assert_eq!(fingerprint(&job), fingerprint(&shouty));
    }

    #[test]
    fn different_description_is_a_distinct_job() {
        let job = sample_job();
        let mut near_duplicate = job.clone();
        near_duplicate.description = "Build other things".to_string();
        assert_ne!(fingerprint(&job), fingerprint(&near_duplicate));
    }

    #[test]
    fn description_beyond_prefix_is_ignored() {
        let mut long_a = sample_job();
        let mut long_b = sample_job();
        let prefix = "x ".repeat(DESCRIPTION_PREFIX_CHARS);
        long_a.description = format!("{prefix} tail one");
        long_b.description = format!("{prefix} tail two");
        assert_eq!(fingerprint(&long_a), fingerprint(&long_b));
    }
}
