//! Specialist response cache
//!
//! Keyed by customer and the first 50 characters of the message. Only
//! answers produced without tool calls are stored.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

const KEY_PREFIX_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    customer_id: String,
    prefix: String,
}

impl CacheKey {
    fn new(customer_id: &str, message: &str) -> Self {
        Self {
            customer_id: customer_id.to_string(),
            prefix: message.chars().take(KEY_PREFIX_CHARS).collect(),
        }
    }
}

struct CachedResponse {
    text: String,
    stored_at: Instant,
}

pub struct ResponseCache {
    ttl: Duration,
    entries: RwLock<HashMap<CacheKey, CachedResponse>>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, customer_id: &str, message: &str) -> Option<String> {
        let key = CacheKey::new(customer_id, message);
        let entries = self.entries.read().await;
        entries
            .get(&key)
            .filter(|entry| entry.stored_at.elapsed() < self.ttl)
            .map(|entry| entry.text.clone())
    }

    pub async fn put(&self, customer_id: &str, message: &str, text: &str) {
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.stored_at.elapsed() < self.ttl);
        entries.insert(
            CacheKey::new(customer_id, message),
            CachedResponse {
                text: text.to_string(),
                stored_at: Instant::now(),
            },
        );
    }

    /// Drop every entry for a customer after a write changed their data
    pub async fn invalidate_customer(&self, customer_id: &str) {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| key.customer_id != customer_id);
        debug!(
            customer_id = %customer_id,
            dropped = before - entries.len(),
            "Response cache invalidated"
        );
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
