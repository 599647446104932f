// src/source/github.rs
// GitHub REST v3 client. Fetch caps follow the tracker's historical behavior:
// 50 closed PRs, 30 open PRs, 10 releases per fetch, newest first, cut off at
// the `since` watermark.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::source::types::{ItemKind, PrQuery, PrState, UpstreamItem};
use crate::source::SourceApi;

const CLOSED_PR_CAP: usize = 50;
const OPEN_PR_CAP: usize = 30;
const RELEASE_CAP: usize = 10;

pub struct GithubClient {
    http: reqwest::Client,
    token: Option<String>,
    api_base: String,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    pub limit: u64,
    pub remaining: u64,
    pub reset_epoch: u64,
}

impl GithubClient {
    pub fn new(token: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("repo-digest/0.1 (+https://github.com)")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            token,
            api_base: "https://api.github.com".to_string(),
        }
    }

    /// Point at a stub server in tests.
    pub fn with_base_url(mut self, base: String) -> Self {
        self.api_base = base.trim_end_matches('/').to_string();
        self
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path_and_query: &str) -> Result<T> {
        let url = format!("{}{}", self.api_base, path_and_query);
        let mut req = self
            .http
            .get(&url)
            .header("Accept", "application/vnd.github+json");
        if let Some(tok) = &self.token {
            req = req.bearer_auth(tok);
        }

        let resp = req.send().await.with_context(|| format!("GET {url}"))?;
        let status = resp.status();

        // Rate limiting must be distinguishable from "no items".
        if status == reqwest::StatusCode::FORBIDDEN
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        {
            let remaining = resp
                .headers()
                .get("x-ratelimit-remaining")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("?")
                .to_string();
            return Err(anyhow!(
                "github rate limited or forbidden (status {status}, remaining {remaining})"
            ));
        }
        if !status.is_success() {
            return Err(anyhow!("github returned {status} for {url}"));
        }

        resp.json::<T>()
            .await
            .with_context(|| format!("decoding body of {url}"))
    }

    /// Current core rate-limit window; logged after a full tracking run.
    pub async fn rate_limit(&self) -> Result<RateLimit> {
        #[derive(Deserialize)]
        struct Core {
            limit: u64,
            remaining: u64,
            reset: u64,
        }
        #[derive(Deserialize)]
        struct Resources {
            core: Core,
        }
        #[derive(Deserialize)]
        struct Body {
            resources: Resources,
        }

        let body: Body = self.get_json("/rate_limit").await?;
        Ok(RateLimit {
            limit: body.resources.core.limit,
            remaining: body.resources.core.remaining,
            reset_epoch: body.resources.core.reset,
        })
    }
}

#[derive(Debug, Deserialize)]
struct LabelRest {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PullRest {
    id: u64,
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    html_url: String,
    state: String,
    #[serde(default)]
    merged_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    labels: Vec<LabelRest>,
}

impl PullRest {
    fn into_item(self) -> UpstreamItem {
        let state = if self.merged_at.is_some() {
            PrState::Merged
        } else if self.state == "open" {
            PrState::Open
        } else {
            PrState::Closed
        };
        UpstreamItem {
            kind: ItemKind::PullRequest,
            id: self.id,
            number: Some(self.number),
            state: Some(state),
            title: self.title,
            body: self.body.unwrap_or_default(),
            url: self.html_url,
            updated_at: self.updated_at,
            labels: self.labels.into_iter().map(|l| l.name).collect(),
            prerelease: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReleaseRest {
    id: u64,
    tag_name: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    body: Option<String>,
    html_url: String,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    prerelease: bool,
}

impl ReleaseRest {
    fn into_item(self) -> UpstreamItem {
        let published = self.published_at.unwrap_or(self.created_at);
        let title = match self.name {
            Some(n) if !n.is_empty() => format!("{} ({n})", self.tag_name),
            _ => self.tag_name.clone(),
        };
        UpstreamItem {
            kind: ItemKind::Release,
            id: self.id,
            number: None,
            state: None,
            title,
            body: self.body.unwrap_or_default(),
            url: self.html_url,
            updated_at: published,
            labels: Vec::new(),
            prerelease: self.prerelease,
        }
    }
}

#[async_trait::async_trait]
impl SourceApi for GithubClient {
    async fn list_pull_requests(
        &self,
        owner: &str,
        name: &str,
        query: PrQuery,
        since: DateTime<Utc>,
    ) -> Result<Vec<UpstreamItem>> {
        let (state, cap) = match query {
            PrQuery::Open => ("open", OPEN_PR_CAP),
            PrQuery::Closed => ("closed", CLOSED_PR_CAP),
        };
        let path = format!(
            "/repos/{owner}/{name}/pulls?state={state}&sort=updated&direction=desc&per_page={cap}"
        );
        let pulls: Vec<PullRest> = self.get_json(&path).await?;

        // Newest first from the API; anything older than the watermark ends
        // the window.
        let mut out = Vec::new();
        for pr in pulls.into_iter().take(cap) {
            if pr.updated_at < since {
                break;
            }
            out.push(pr.into_item());
        }
        Ok(out)
    }

    async fn list_releases(
        &self,
        owner: &str,
        name: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<UpstreamItem>> {
        let path = format!("/repos/{owner}/{name}/releases?per_page={RELEASE_CAP}");
        let releases: Vec<ReleaseRest> = self.get_json(&path).await?;

        Ok(releases
            .into_iter()
            .take(RELEASE_CAP)
            .map(ReleaseRest::into_item)
            .filter(|r| r.updated_at >= since)
            .collect())
    }

    fn name(&self) -> &'static str {
        "github"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merged_pull_maps_to_merged_state() {
        let pr = PullRest {
            id: 7,
            number: 42,
            title: "Fix".into(),
            body: None,
            html_url: "https://github.com/a/b/pull/42".into(),
            state: "closed".into(),
            merged_at: Some(Utc::now()),
            updated_at: Utc::now(),
            labels: vec![LabelRest { name: "bug".into() }],
        };
        let item = pr.into_item();
        assert_eq!(item.state, Some(PrState::Merged));
        assert_eq!(item.labels, vec!["bug".to_string()]);
        assert_eq!(item.number, Some(42));
    }

    #[test]
    fn release_falls_back_to_created_at() {
        let rel = ReleaseRest {
            id: 1,
            tag_name: "v1.2.0".into(),
            name: Some("Big one".into()),
            body: None,
            html_url: "https://github.com/a/b/releases/v1.2.0".into(),
            published_at: None,
            created_at: Utc::now(),
            prerelease: true,
        };
        let item = rel.into_item();
        assert_eq!(item.kind, ItemKind::Release);
        assert!(item.prerelease);
        assert!(item.title.contains("v1.2.0"));
    }
}
