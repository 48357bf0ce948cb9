//! Content-derived keys for cache entries.

use sha2::{Digest, Sha256};

/// Hash the concatenation of `args`, optionally prefixed with `"{cache_type}:"`.
pub fn compute_args_hash(args: &[&str], cache_type: Option<&str>) -> String {
    let mut joined = args.concat();
    if let Some(cache_type) = cache_type {
        joined = format!("{cache_type}:{joined}");
    }
    hex_digest(&joined)
}

fn hex_digest(input: &str) -> String {
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_hash_is_deterministic() {
        let a = compute_args_hash(&["local", "who is alice?"], None);
        let b = compute_args_hash(&["local", "who is alice?"], None);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn cache_type_changes_hash() {
        let plain = compute_args_hash(&["q"], None);
        let typed = compute_args_hash(&["q"], Some("keywords"));
        assert_ne!(plain, typed);
    }
}
