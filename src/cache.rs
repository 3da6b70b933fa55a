use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::models::UserHeader;

/// Cache of [`UserHeader`]s keyed by account id.
///
/// Every write path that changes header data must call `put` or
/// `invalidate` itself; nothing refreshes entries implicitly.
#[async_trait]
pub trait HeaderCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<UserHeader>;
    async fn put(&self, key: &str, value: UserHeader);
    async fn invalidate(&self, key: &str);
}

struct Entry {
    value: UserHeader,
    stored_at: Instant,
}

/// Pod-local TTL cache.
#[derive(Clone)]
pub struct InMemHeaderCache {
    entries: Arc<DashMap<String, Entry>>,
    ttl: Duration,
}

impl InMemHeaderCache {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: Arc::new(DashMap::new()), ttl }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl HeaderCache for InMemHeaderCache {
    async fn get(&self, key: &str) -> Option<UserHeader> {
        let expired = match self.entries.get(key) {
            Some(e) if e.stored_at.elapsed() < self.ttl => return Some(e.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    async fn put(&self, key: &str, value: UserHeader) {
        self.entries.insert(key.to_string(), Entry { value, stored_at: Instant::now() });
    }

    async fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }
}
