//! Server-name hash table sizing.
//!
//! The worker cannot resize its server-name hash tables at runtime, so the
//! bucket size and max size must be large enough for every configured name
//! before the configuration is loaded. The arithmetic matches the worker's
//! own bucket layout on 64-bit hosts.

use crate::model::{BackendConfiguration, Server};

/// Pointer size assumed for the worker's hash bucket layout.
const WORD_SIZE: usize = 8;

/// Round `v` up to the next power of two.
///
/// `0` maps to `0`; values that are already powers of two are unchanged.
/// Only correct for `v <= 2^32`, like the worker's own computation.
pub fn next_pow2(v: usize) -> usize {
    let mut v = v.wrapping_sub(1);
    v |= v >> 1;
    v |= v >> 2;
    v |= v >> 4;
    v |= v >> 8;
    v |= v >> 16;
    v.wrapping_add(1)
}

/// Round `n` up to a multiple of `w` (`w` must be a power of two).
pub fn align(n: usize, w: usize) -> usize {
    (n + w - 1) & !(w - 1)
}

/// Bucket size needed to hold a name of `longest` bytes.
pub fn bucket_size(longest: usize) -> usize {
    let aligned = align(longest + 2, WORD_SIZE);
    next_pow2(WORD_SIZE + WORD_SIZE + aligned)
}

/// Name lengths relevant to hash sizing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NameStats {
    /// Longest server name or alias, counting the `www.` a redirect adds.
    pub longest: usize,
    /// Sum of server name lengths.
    pub total_bytes: usize,
}

impl NameStats {
    pub fn collect(servers: &[Server]) -> Self {
        let mut stats = Self::default();

        for srv in servers {
            let mut len = srv.hostname.len();
            if srv.redirect_from_to_www {
                len += 4;
            }
            stats.longest = stats.longest.max(len);

            for alias in &srv.aliases {
                stats.longest = stats.longest.max(alias.len());
            }

            stats.total_bytes += len;
        }

        stats
    }
}

/// Raise the configured hash sizes when the names need more room.
///
/// User-supplied values are never shrunk.
pub fn adjust_hash_sizes(cfg: &mut BackendConfiguration, servers: &[Server]) {
    let stats = NameStats::collect(servers);

    let bucket = bucket_size(stats.longest);
    if cfg.server_name_hash_bucket_size < bucket {
        tracing::debug!(value = bucket, "Adjusting server_name_hash_bucket_size");
        cfg.server_name_hash_bucket_size = bucket;
    }

    let max_size = next_pow2(stats.total_bytes);
    if cfg.server_name_hash_max_size < max_size {
        tracing::debug!(value = max_size, "Adjusting server_name_hash_max_size");
        cfg.server_name_hash_max_size = max_size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(hostname: &str) -> Server {
        Server {
            hostname: hostname.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn next_pow2_values() {
        assert_eq!(next_pow2(0), 0);
        assert_eq!(next_pow2(1), 1);
        assert_eq!(next_pow2(2), 2);
        assert_eq!(next_pow2(3), 4);
        assert_eq!(next_pow2(15), 16);
        assert_eq!(next_pow2(32), 32);
        assert_eq!(next_pow2(33), 64);
        assert_eq!(next_pow2(1000), 1024);
    }

    #[test]
    fn next_pow2_is_idempotent_and_tight() {
        for n in 0..5000usize {
            let p = next_pow2(n);
            assert_eq!(next_pow2(p), p, "n = {n}");
            assert!(p >= n, "n = {n}");
            if n > 1 {
                assert!(p < 2 * n, "n = {n}");
            }
        }
    }

    #[test]
    fn bucket_size_examples() {
        // 10 + 2 aligns to 16; 8 + 8 + 16 = 32.
        assert_eq!(align(12, 8), 16);
        assert_eq!(bucket_size(10), 32);
        // 15 + 2 aligns to 24; 8 + 8 + 24 = 40 -> 64.
        assert_eq!(bucket_size(15), 64);
        assert_eq!(bucket_size(0), 32);
    }

    #[test]
    fn bucket_size_is_monotonic() {
        let mut prev = 0;
        for longest in 0..2048 {
            let size = bucket_size(longest);
            assert!(size >= prev, "longest = {longest}");
            prev = size;
        }
    }

    #[test]
    fn redirect_and_alias_lengths_count() {
        let mut redirect = server("example.com");
        redirect.redirect_from_to_www = true;
        let mut aliased = server("a.io");
        aliased.aliases = vec!["a-very-long-alias.example.org".into()];

        let stats = NameStats::collect(&[redirect, aliased]);
        assert_eq!(stats.longest, "a-very-long-alias.example.org".len());
        assert_eq!(stats.total_bytes, "example.com".len() + 4 + "a.io".len());
    }

    #[test]
    fn adjust_never_shrinks_overrides() {
        let mut cfg = BackendConfiguration {
            server_name_hash_bucket_size: 256,
            server_name_hash_max_size: 4096,
            ..Default::default()
        };
        adjust_hash_sizes(&mut cfg, &[server("app.example.com")]);
        assert_eq!(cfg.server_name_hash_bucket_size, 256);
        assert_eq!(cfg.server_name_hash_max_size, 4096);
    }

    #[test]
    fn adjust_raises_unset_values() {
        let mut cfg = BackendConfiguration {
            server_name_hash_bucket_size: 0,
            server_name_hash_max_size: 0,
            ..Default::default()
        };
        adjust_hash_sizes(&mut cfg, &[server("app.example.com")]);
        assert_eq!(cfg.server_name_hash_bucket_size, bucket_size(15));
        assert_eq!(cfg.server_name_hash_max_size, 16);
    }
}
