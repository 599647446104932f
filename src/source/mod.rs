// src/source/mod.rs
pub mod github;
pub mod types;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::source::types::{PrQuery, UpstreamItem};

/// Read-only paged event source. Implementations must distinguish
/// unavailability/rate limiting (an `Err`) from "no items" (`Ok(vec![])`),
/// and fetching must be restartable with no upstream side effects.
#[async_trait::async_trait]
pub trait SourceApi: Send + Sync {
    async fn list_pull_requests(
        &self,
        owner: &str,
        name: &str,
        query: PrQuery,
        since: DateTime<Utc>,
    ) -> Result<Vec<UpstreamItem>>;

    async fn list_releases(
        &self,
        owner: &str,
        name: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<UpstreamItem>>;

    fn name(&self) -> &'static str;
}

// --- Test helper ---

/// In-memory source fed by tests. Serves whatever items were loaded, applying
/// the same state/since filtering a real backend would. Records every `since`
/// argument so tests can assert on fetch-window boundaries, and can be slowed
/// down to exercise timeouts.
pub struct MockSource {
    items: std::sync::Mutex<Vec<UpstreamItem>>,
    fail: std::sync::atomic::AtomicBool,
    delay: std::sync::Mutex<Option<std::time::Duration>>,
    since_seen: std::sync::Mutex<Vec<DateTime<Utc>>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self {
            items: std::sync::Mutex::new(Vec::new()),
            fail: std::sync::atomic::AtomicBool::new(false),
            delay: std::sync::Mutex::new(None),
            since_seen: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn set_items(&self, items: Vec<UpstreamItem>) {
        *self.items.lock().unwrap() = items;
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: std::time::Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Every `since` argument seen so far, in call order.
    pub fn since_seen(&self) -> Vec<DateTime<Utc>> {
        self.since_seen.lock().unwrap().clone()
    }

    async fn checked(&self, since: DateTime<Utc>) -> Result<Vec<UpstreamItem>> {
        self.since_seen.lock().unwrap().push(since);
        let delay = *self.delay.lock().unwrap();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            anyhow::bail!("mock source marked unavailable");
        }
        Ok(self.items.lock().unwrap().clone())
    }
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SourceApi for MockSource {
    async fn list_pull_requests(
        &self,
        _owner: &str,
        _name: &str,
        query: PrQuery,
        since: DateTime<Utc>,
    ) -> Result<Vec<UpstreamItem>> {
        use crate::source::types::{ItemKind, PrState};
        let items = self.checked(since).await?;
        Ok(items
            .into_iter()
            .filter(|i| i.kind == ItemKind::PullRequest && i.updated_at >= since)
            .filter(|i| match query {
                PrQuery::Open => i.state == Some(PrState::Open),
                PrQuery::Closed => {
                    matches!(i.state, Some(PrState::Merged) | Some(PrState::Closed))
                }
            })
            .collect())
    }

    async fn list_releases(
        &self,
        _owner: &str,
        _name: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<UpstreamItem>> {
        use crate::source::types::ItemKind;
        let items = self.checked(since).await?;
        Ok(items
            .into_iter()
            .filter(|i| i.kind == ItemKind::Release && i.updated_at >= since)
            .collect())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
