//! Process-wide DN to login mapping, populated from observed search results
//! and consulted when a bind DN needs to be resolved to a login.
//!
//! Unbounded and without a TTL by design; see the open question this
//! decision is recorded against in DESIGN.md.

use std::collections::HashMap;
use std::sync::RwLock;

/// A concurrent, unbounded DN→login cache. Cloning shares the underlying map.
#[derive(Clone, Default)]
pub struct DnLoginCache {
    inner: std::sync::Arc<RwLock<HashMap<String, String>>>,
}

impl DnLoginCache {
    pub fn new() -> DnLoginCache {
        DnLoginCache::default()
    }

    /// Exact, case-sensitive lookup.
    pub fn get(&self, dn: &str) -> Option<String> {
        self.inner.read().expect("DN cache lock poisoned").get(dn).cloned()
    }

    /// Records or overwrites the login a DN resolves to.
    pub fn put(&self, dn: String, login: String) {
        self.inner.write().expect("DN cache lock poisoned").insert(dn, login);
    }
}
