//! Shared store key layout.
//!
//! ```text
//! storage_accessible:<storage>:<host>     failure info hash per (storage, host)
//! storage_accessible:known_keys_set       sorted set, member = key, score = expiry
//! storage_check:<failure info key>        lease guarding one check
//! ```

/// Prefix of every failure info key.
pub const KEY_PREFIX: &str = "storage_accessible:";

/// Sorted set indexing live failure info keys by expiry.
pub const KNOWN_KEYS: &str = "storage_accessible:known_keys_set";

/// Prefix of lease names.
pub const LEASE_PREFIX: &str = "storage_check:";

/// Returns the failure info key for a (storage, host) pair.
#[must_use]
pub fn cache_key(storage: &str, host: &str) -> String {
    format!("{}{host}", storage_prefix(storage))
}

/// Returns the prefix shared by all hosts' keys for a storage.
#[must_use]
pub fn storage_prefix(storage: &str) -> String {
    format!("{KEY_PREFIX}{storage}:")
}

/// Returns the lease name guarding checks for a (storage, host) pair.
#[must_use]
pub fn lease_name(storage: &str, host: &str) -> String {
    format!("{LEASE_PREFIX}{}", cache_key(storage, host))
}

/// Extracts the host from a failure info key of the given storage.
#[must_use]
pub fn host_from_key<'a>(storage: &str, key: &'a str) -> Option<&'a str> {
    key.strip_prefix(KEY_PREFIX)?
        .strip_prefix(storage)?
        .strip_prefix(':')
}
