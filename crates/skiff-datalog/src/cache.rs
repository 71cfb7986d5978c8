//! Per-client memoization of query responses.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

/// SHA-256 hex digest of `input`.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Response text keyed by the hash of the full request document.
///
/// Lives as long as its client; never shared between executions.
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: Mutex<HashMap<String, String>>,
    hits: AtomicU64,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached response for `request_body`, if any.
    pub fn get(&self, request_body: &str) -> Option<String> {
        let hit = self.entries.lock().get(&sha256_hex(request_body)).cloned();
        if hit.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    pub fn put(&self, request_body: &str, response: String) {
        self.entries.lock().insert(sha256_hex(request_body), response);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Number of lookups answered from the cache.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }
}
