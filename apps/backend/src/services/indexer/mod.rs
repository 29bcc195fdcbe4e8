//! Indexer clients: an aggregator front-end, per-slot direct Newznab
//! endpoints, and the Easynews adapter, all behind one capability.
//!
//! Mirrors the torrent-indexer subsystem's polymorphic-provider shape
//! (trait + fan-out manager) generalized to `Search(plan) -> (releases,
//! errors)` per the system's indexer-client contract.

pub mod aggregator;
pub mod easynews;
pub mod newznab;

use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::models::{Release, SearchPlan};

/// Capability every indexer client satisfies: search one plan, return
/// whatever releases it found plus any per-item errors that didn't abort
/// the whole call.
#[async_trait]
pub trait IndexerClient: Send + Sync {
    fn id(&self) -> &str;
    fn display_name(&self) -> &str;
    fn is_paid(&self) -> bool {
        false
    }
    async fn search(&self, plan: &SearchPlan) -> (Vec<Release>, Vec<String>);
}

/// Single monotonic "unavailable until" deadline per upstream — spec §9
/// "Circuit breaker": no sliding window, a constant backoff after any
/// failure.
pub struct CircuitBreaker {
    unavailable_until_ms: AtomicI64,
    backoff_ms: i64,
}

impl CircuitBreaker {
    pub fn new(backoff_seconds: u64) -> Self {
        Self {
            unavailable_until_ms: AtomicI64::new(0),
            backoff_ms: backoff_seconds as i64 * 1000,
        }
    }

    pub fn is_open(&self) -> bool {
        now_ms() < self.unavailable_until_ms.load(Ordering::Relaxed)
    }

    pub fn trip(&self) {
        self.unavailable_until_ms
            .store(now_ms() + self.backoff_ms, Ordering::Relaxed);
    }
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Fans a search plan out to every registered client in parallel and
/// collects the combined result. Errors from one client never prevent
/// others from contributing releases (spec §7 propagation policy).
pub struct IndexerManager {
    clients: Vec<Arc<dyn IndexerClient>>,
}

impl IndexerManager {
    pub fn new(clients: Vec<Arc<dyn IndexerClient>>) -> Self {
        Self { clients }
    }

    pub fn new_shared(clients: Vec<Arc<dyn IndexerClient>>) -> Arc<Self> {
        Arc::new(Self::new(clients))
    }

    pub fn clients(&self) -> &[Arc<dyn IndexerClient>] {
        &self.clients
    }

    pub fn paid_client_ids(&self) -> Vec<String> {
        self.clients
            .iter()
            .filter(|c| c.is_paid())
            .map(|c| c.id().to_string())
            .collect()
    }

    /// Dispatches `plan` to every client concurrently and flattens the
    /// combined release list plus all collected per-client errors.
    pub async fn search_all(&self, plan: &SearchPlan) -> (Vec<Release>, Vec<String>) {
        let futures = self.clients.iter().map(|client| {
            let client = Arc::clone(client);
            let plan = plan.clone();
            async move { client.search(&plan).await }
        });

        let results = futures::future::join_all(futures).await;
        let mut releases = Vec::new();
        let mut errors = Vec::new();
        for (mut r, mut e) in results {
            releases.append(&mut r);
            errors.append(&mut e);
        }
        (releases, errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PlanTokens, PlanType};

    struct StubClient {
        id: String,
        paid: bool,
    }

    #[async_trait]
    impl IndexerClient for StubClient {
        fn id(&self) -> &str {
            &self.id
        }
        fn display_name(&self) -> &str {
            &self.id
        }
        fn is_paid(&self) -> bool {
            self.paid
        }
        async fn search(&self, _plan: &SearchPlan) -> (Vec<Release>, Vec<String>) {
            (Vec::new(), Vec::new())
        }
    }

    #[tokio::test]
    async fn search_all_collects_from_every_client() {
        let manager = IndexerManager::new(vec![
            Arc::new(StubClient { id: "a".into(), paid: true }),
            Arc::new(StubClient { id: "b".into(), paid: false }),
        ]);
        let plan = SearchPlan {
            plan_type: PlanType::Movie,
            query: "test".into(),
            tokens: PlanTokens::default(),
            strict_phrase: None,
            ascii_fallback_title: None,
        };
        let (releases, errors) = manager.search_all(&plan).await;
        assert!(releases.is_empty());
        assert!(errors.is_empty());
        assert_eq!(manager.paid_client_ids(), vec!["a".to_string()]);
    }

    #[test]
    fn circuit_breaker_trips_and_expires() {
        let breaker = CircuitBreaker::new(0);
        assert!(!breaker.is_open());
        breaker.trip();
        // backoff of 0s means it is already expired again
        assert!(!breaker.is_open());
    }
}
