// verity-core/src/domain/hash.rs
//
// Content hashing for change detection (spec §3 / §4.5).

use sha2::{Digest, Sha256};

/// 16-hex-digit SHA-256 over the whitespace-normalized executable query.
/// Whitespace normalization collapses any run of whitespace to a single
/// space and trims the ends, so reformatting a query without changing its
/// meaning does not trigger a rebuild.
pub fn content_hash(query: &str) -> String {
    let normalized = normalize_whitespace(query);
    short_hex_digest(normalized.as_bytes())
}

/// SHA-256 over the sorted concatenation of upstream content hashes.
/// Empty string when `upstream_hashes` is empty.
pub fn combine_upstream_hash<I, S>(upstream_hashes: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hashes: Vec<String> = upstream_hashes
        .into_iter()
        .map(|h| h.as_ref().to_string())
        .collect();
    if hashes.is_empty() {
        return String::new();
    }
    hashes.sort();
    short_hex_digest(hashes.concat().as_bytes())
}

fn short_hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(digest)[..16].to_string()
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_stable_under_reformatting() {
        let a = content_hash("SELECT 1 AS id\nFROM bronze.e");
        let b = content_hash("SELECT   1 AS id FROM bronze.e");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn content_hash_changes_with_content() {
        let a = content_hash("SELECT 1 AS id");
        let b = content_hash("SELECT 2 AS id");
        assert_ne!(a, b);
    }

    #[test]
    fn combine_upstream_hash_is_order_independent() {
        let a = combine_upstream_hash(["aaaa111122223333", "bbbb111122223333"]);
        let b = combine_upstream_hash(["bbbb111122223333", "aaaa111122223333"]);
        assert_eq!(a, b);
    }

    #[test]
    fn combine_upstream_hash_empty_for_no_upstreams() {
        let empty: Vec<String> = vec![];
        assert_eq!(combine_upstream_hash(empty), "");
    }
}
