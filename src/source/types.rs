// src/source/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    PullRequest,
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrState {
    Open,
    Merged,
    Closed,
}

/// Which pull requests to ask the upstream for. Mirrors the upstream `state`
/// query parameter; merged detection happens on our side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrQuery {
    Open,
    Closed,
}

/// One upstream event as reported by the code-hosting service. Never mutated
/// locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamItem {
    pub kind: ItemKind,
    /// Stable upstream identifier.
    pub id: u64,
    /// PR number (display handle); absent for releases.
    pub number: Option<u64>,
    /// PR state; absent for releases.
    pub state: Option<PrState>,
    pub title: String,
    pub body: String,
    pub url: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub prerelease: bool,
}

impl UpstreamItem {
    /// Stable state token used in fingerprints: a PR transitioning from
    /// open to merged must hash differently so the merge is re-surfaced once.
    pub fn state_token(&self) -> &'static str {
        match (self.kind, self.state) {
            (ItemKind::Release, _) => "published",
            (_, Some(PrState::Open)) => "open",
            (_, Some(PrState::Merged)) => "merged",
            (_, Some(PrState::Closed)) => "closed",
            (ItemKind::PullRequest, None) => "unknown",
        }
    }

    pub fn pull_request(
        id: u64,
        number: u64,
        state: PrState,
        title: &str,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: ItemKind::PullRequest,
            id,
            number: Some(number),
            state: Some(state),
            title: title.to_string(),
            body: String::new(),
            url: format!("https://example.invalid/pull/{number}"),
            updated_at,
            labels: Vec::new(),
            prerelease: false,
        }
    }

    pub fn release(id: u64, tag: &str, published_at: DateTime<Utc>) -> Self {
        Self {
            kind: ItemKind::Release,
            id,
            number: None,
            state: None,
            title: tag.to_string(),
            body: String::new(),
            url: format!("https://example.invalid/releases/{tag}"),
            updated_at: published_at,
            labels: Vec::new(),
            prerelease: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_tokens_distinguish_pr_transitions() {
        let ts = Utc::now();
        let open = UpstreamItem::pull_request(1, 10, PrState::Open, "t", ts);
        let merged = UpstreamItem::pull_request(1, 10, PrState::Merged, "t", ts);
        assert_eq!(open.state_token(), "open");
        assert_eq!(merged.state_token(), "merged");
        assert_ne!(open.state_token(), merged.state_token());

        let rel = UpstreamItem::release(2, "v1.0.0", ts);
        assert_eq!(rel.state_token(), "published");
    }
}
