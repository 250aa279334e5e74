use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tollgate_application::AccessTokenReplayStore;
use tollgate_core::AppResult;

/// Process-local replay store for tests and single-node deployments.
#[derive(Default)]
pub struct InMemoryAccessTokenReplayStore {
    consumed: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl InMemoryAccessTokenReplayStore {
    /// Creates an empty replay store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccessTokenReplayStore for InMemoryAccessTokenReplayStore {
    async fn consume_once(&self, jti: &str, expires_at: DateTime<Utc>) -> AppResult<bool> {
        let now = Utc::now();
        let mut consumed = self.consumed.write().await;
        consumed.retain(|_, expiry| *expiry > now);

        if consumed.contains_key(jti) {
            return Ok(false);
        }

        consumed.insert(jti.to_owned(), expires_at);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use tollgate_application::AccessTokenReplayStore;

    use super::InMemoryAccessTokenReplayStore;

    #[tokio::test]
    async fn concurrent_consumers_have_one_winner() {
        let store = Arc::new(InMemoryAccessTokenReplayStore::new());
        let expires_at = Utc::now() + Duration::minutes(5);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.consume_once("jti-1", expires_at).await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if matches!(handle.await, Ok(Ok(true))) {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn expired_entries_are_forgotten() {
        let store = InMemoryAccessTokenReplayStore::new();

        let first = store
            .consume_once("jti-2", Utc::now() - Duration::seconds(1))
            .await;
        assert!(matches!(first, Ok(true)));

        let second = store
            .consume_once("jti-2", Utc::now() + Duration::minutes(1))
            .await;
        assert!(matches!(second, Ok(true)));

        let third = store
            .consume_once("jti-2", Utc::now() + Duration::minutes(1))
            .await;
        assert!(matches!(third, Ok(false)));
    }
}
