// src/fetch.rs
// Per-repository fetch pass: pulls candidate items from the source API
// according to the tracking level and sorts them chronologically. Restartable;
// callers may re-fetch the same window without upstream side effects.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::{RepoConfig, TrackingLevel};
use crate::error::{CycleError, CycleResult};
use crate::source::types::{ItemKind, PrQuery, PrState, UpstreamItem};
use crate::source::SourceApi;

/// True when the tracking level admits the item.
pub fn level_allows(level: TrackingLevel, item: &UpstreamItem) -> bool {
    match (level, item.kind) {
        (_, ItemKind::Release) => true,
        (TrackingLevel::All, ItemKind::PullRequest) => true,
        (TrackingLevel::MergedAndRelease, ItemKind::PullRequest) => {
            item.state == Some(PrState::Merged)
        }
        (TrackingLevel::ReleaseOnly, ItemKind::PullRequest) => false,
    }
}

pub struct ItemFetcher {
    source: Arc<dyn SourceApi>,
}

impl ItemFetcher {
    pub fn new(source: Arc<dyn SourceApi>) -> Self {
        Self { source }
    }

    /// Return all matching items created/updated since `since`, oldest first,
    /// or fail with an upstream error. Only the queries the level needs are
    /// issued; a `release_only` repository never touches the PR endpoints.
    pub async fn fetch(
        &self,
        repo: &RepoConfig,
        since: DateTime<Utc>,
    ) -> CycleResult<Vec<UpstreamItem>> {
        let mut items = Vec::new();

        match repo.level {
            TrackingLevel::All => {
                let open = self
                    .source
                    .list_pull_requests(&repo.owner, &repo.name, PrQuery::Open, since)
                    .await
                    .map_err(CycleError::Upstream)?;
                let closed = self
                    .source
                    .list_pull_requests(&repo.owner, &repo.name, PrQuery::Closed, since)
                    .await
                    .map_err(CycleError::Upstream)?;
                items.extend(open);
                items.extend(closed);
            }
            TrackingLevel::MergedAndRelease => {
                let closed = self
                    .source
                    .list_pull_requests(&repo.owner, &repo.name, PrQuery::Closed, since)
                    .await
                    .map_err(CycleError::Upstream)?;
                items.extend(
                    closed
                        .into_iter()
                        .filter(|pr| pr.state == Some(PrState::Merged)),
                );
            }
            TrackingLevel::ReleaseOnly => {}
        }

        let releases = self
            .source
            .list_releases(&repo.owner, &repo.name, since)
            .await
            .map_err(CycleError::Upstream)?;
        items.extend(releases);

        items.retain(|i| level_allows(repo.level, i));
        // Oldest first so downstream prompt ordering is deterministic.
        items.sort_by_key(|i| (i.updated_at, i.id));
        Ok(items)
    }

    /// Lightweight probe used by the `on_release` poll: releases only.
    pub async fn fetch_releases_only(
        &self,
        repo: &RepoConfig,
        since: DateTime<Utc>,
    ) -> CycleResult<Vec<UpstreamItem>> {
        let mut releases = self
            .source
            .list_releases(&repo.owner, &repo.name, since)
            .await
            .map_err(CycleError::Upstream)?;
        releases.sort_by_key(|i| (i.updated_at, i.id));
        Ok(releases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MockSource;
    use chrono::TimeZone;

    fn ts(min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, min, 0).unwrap()
    }

    fn sample_items() -> Vec<UpstreamItem> {
        vec![
            UpstreamItem::pull_request(1, 1, PrState::Open, "PR#1 open", ts(1)),
            UpstreamItem::pull_request(2, 2, PrState::Merged, "PR#2 merged", ts(2)),
            UpstreamItem::release(3, "v1.0.0", ts(3)),
        ]
    }

    fn repo(level: TrackingLevel) -> RepoConfig {
        RepoConfig {
            owner: "acme".into(),
            name: "widget".into(),
            level,
            frequency: Default::default(),
            keywords: vec![],
            notify: false,
        }
    }

    #[tokio::test]
    async fn release_only_yields_only_the_release() {
        let source = Arc::new(MockSource::new());
        source.set_items(sample_items());
        let fetcher = ItemFetcher::new(source);

        let got = fetcher
            .fetch(&repo(TrackingLevel::ReleaseOnly), ts(0))
            .await
            .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].kind, ItemKind::Release);
    }

    #[tokio::test]
    async fn merged_and_release_drops_open_pr() {
        let source = Arc::new(MockSource::new());
        source.set_items(sample_items());
        let fetcher = ItemFetcher::new(source);

        let got = fetcher
            .fetch(&repo(TrackingLevel::MergedAndRelease), ts(0))
            .await
            .unwrap();
        let titles: Vec<_> = got.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["PR#2 merged", "v1.0.0"]);
    }

    #[tokio::test]
    async fn all_yields_all_three_oldest_first() {
        let source = Arc::new(MockSource::new());
        source.set_items(sample_items());
        let fetcher = ItemFetcher::new(source);

        let got = fetcher.fetch(&repo(TrackingLevel::All), ts(0)).await.unwrap();
        let titles: Vec<_> = got.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["PR#1 open", "PR#2 merged", "v1.0.0"]);
    }

    #[tokio::test]
    async fn upstream_failure_maps_to_upstream_error() {
        let source = Arc::new(MockSource::new());
        source.set_failing(true);
        let fetcher = ItemFetcher::new(source);

        let err = fetcher
            .fetch(&repo(TrackingLevel::All), ts(0))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "upstream");
    }

    #[test]
    fn level_allows_table() {
        let open = UpstreamItem::pull_request(1, 1, PrState::Open, "a", ts(0));
        let merged = UpstreamItem::pull_request(2, 2, PrState::Merged, "b", ts(0));
        let closed = UpstreamItem::pull_request(3, 3, PrState::Closed, "c", ts(0));
        let rel = UpstreamItem::release(4, "v1", ts(0));

        assert!(level_allows(TrackingLevel::All, &open));
        assert!(level_allows(TrackingLevel::All, &closed));
        assert!(!level_allows(TrackingLevel::MergedAndRelease, &open));
        assert!(level_allows(TrackingLevel::MergedAndRelease, &merged));
        assert!(!level_allows(TrackingLevel::ReleaseOnly, &merged));
        assert!(level_allows(TrackingLevel::ReleaseOnly, &rel));
    }
}
