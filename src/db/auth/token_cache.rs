use tokio::sync::Mutex;

use super::AccessToken;

/// Process-wide slot for the one cached database token.
///
/// Pure storage: expiry checks and refresh policy live with the caller. The
/// cache is created empty, shared between providers via `Arc`, and holds at
/// most one token at any instant. A single mutex covers every operation so a
/// read never observes a half-written token and concurrent writes serialize.
pub struct TokenCache {
    slot: Mutex<Option<AccessToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        let slot = Mutex::const_new(None);
        Self { slot }
    }

    /// The currently cached token, if any.
    pub async fn read(&self) -> Option<AccessToken> {
        self.slot.lock().await.clone()
    }

    /// Replace the cached token unconditionally. Last writer wins.
    pub async fn write(&self, token: AccessToken) {
        self.slot.lock().await.replace(token);
    }

    /// Drop the cached token.
    pub async fn clear(&self) {
        self.slot.lock().await.take();
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use super::*;

    fn token(value: &str) -> AccessToken {
        AccessToken {
            access_token: value.to_owned(),
            expires_on: Instant::now() + Duration::from_secs(3600),
        }
    }

    #[tokio::test]
    async fn starts_empty() {
        assert!(TokenCache::new().read().await.is_none());
    }

    #[tokio::test]
    async fn write_then_read() {
        let cache = TokenCache::new();
        cache.write(token("T1")).await;
        assert_eq!(cache.read().await.unwrap().access_token, "T1");
    }

    #[tokio::test]
    async fn overwrite_replaces_the_previous_token() {
        let cache = TokenCache::new();
        cache.write(token("T1")).await;
        cache.write(token("T2")).await;
        assert_eq!(cache.read().await.unwrap().access_token, "T2");
    }

    #[tokio::test]
    async fn clear_empties_the_slot() {
        let cache = TokenCache::new();
        cache.write(token("T1")).await;
        cache.clear().await;
        assert!(cache.read().await.is_none());
    }

    #[tokio::test]
    async fn written_token_is_visible_from_other_tasks() {
        let cache = Arc::new(TokenCache::new());
        let writer = Arc::clone(&cache);
        tokio::spawn(async move { writer.write(token("T1")).await })
            .await
            .unwrap();
        assert_eq!(cache.read().await.unwrap().access_token, "T1");
    }
}
