// src/summarize/mod.rs
pub mod ai;

use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::context::ContextEntry;
use crate::error::{CycleError, CycleResult};
use crate::source::types::{ItemKind, PrState, UpstreamItem};
use crate::summarize::ai::DynAiClient;

const PR_BODY_CAP: usize = 200;
const RELEASE_BODY_CAP: usize = 300;

/// Normalize an upstream body for prompt embedding: decode HTML entities,
/// strip tags, collapse whitespace, cap length.
pub fn normalize_body(s: &str, cap: usize) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    if out.chars().count() > cap {
        out = out.chars().take(cap).collect();
        out.push('…');
    }
    out
}

/// Case-insensitive substring match over title and body. A hit is a weighting
/// hint for the prompt, never a filter.
pub fn matches_keywords(item: &UpstreamItem, keywords: &[String]) -> bool {
    if keywords.is_empty() {
        return false;
    }
    let title = item.title.to_lowercase();
    let body = item.body.to_lowercase();
    keywords.iter().any(|k| {
        let k = k.to_lowercase();
        !k.is_empty() && (title.contains(&k) || body.contains(&k))
    })
}

/// Lightweight reference to an included item, carried by the Summary record
/// handed to sinks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRef {
    pub kind: ItemKind,
    pub id: u64,
    pub number: Option<u64>,
    pub state: Option<PrState>,
    pub title: String,
    pub url: String,
    pub labels: Vec<String>,
    pub prerelease: bool,
    pub high_priority: bool,
}

impl ItemRef {
    fn from_item(item: &UpstreamItem, high_priority: bool) -> Self {
        Self {
            kind: item.kind,
            id: item.id,
            number: item.number,
            state: item.state,
            title: item.title.clone(),
            url: item.url.clone(),
            labels: item.labels.clone(),
            prerelease: item.prerelease,
            high_priority,
        }
    }
}

/// Finished product of one successful cycle. Immutable; persisted and handed
/// to sinks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub repo: String,
    pub cycle_time: DateTime<Utc>,
    pub text: String,
    pub items: Vec<ItemRef>,
    pub weighted_keywords: Vec<String>,
    pub context_used: Vec<ContextEntry>,
    pub pr_count: usize,
    pub release_count: usize,
}

/// Compose the single prompt for one cycle. Releases first, then pull
/// requests, chronological within each group; prior summaries oldest first.
/// The ordering is deterministic and golden-tested.
pub fn build_prompt(
    repo: &str,
    items: &[UpstreamItem],
    keywords: &[String],
    context: &[ContextEntry],
) -> String {
    let mut lines: Vec<String> = Vec::new();
    lines.push(format!(
        "Summarize the latest activity of the GitHub project {repo}."
    ));
    lines.push(String::new());

    if !context.is_empty() {
        lines.push("## Previous updates".into());
        lines.push(
            "The last reports for this project, oldest first. Open the new summary \
             with a recap of at most 100 words distilled from them."
                .into(),
        );
        for entry in context {
            lines.push(format!(
                "[{}]",
                entry.generated_at.format("%Y-%m-%d %H:%M UTC")
            ));
            lines.push(entry.text.clone());
            lines.push("---".into());
        }
        lines.push(String::new());
    }

    if !keywords.is_empty() {
        lines.push(format!(
            "Focus keywords: {}. Items marked [high priority] below mention them; \
             give those the most weight, but cover every item.",
            keywords.join(", ")
        ));
        lines.push(String::new());
    }

    let releases: Vec<&UpstreamItem> = items
        .iter()
        .filter(|i| i.kind == ItemKind::Release)
        .collect();
    let pulls: Vec<&UpstreamItem> = items
        .iter()
        .filter(|i| i.kind == ItemKind::PullRequest)
        .collect();

    if !releases.is_empty() {
        lines.push(format!("## New releases ({})", releases.len()));
        for rel in &releases {
            let pre = if rel.prerelease { " (prerelease)" } else { "" };
            let flag = if matches_keywords(rel, keywords) {
                " [high priority]"
            } else {
                ""
            };
            lines.push(format!("- **{}**{pre}{flag}", rel.title));
            lines.push(format!("  URL: {}", rel.url));
            let body = normalize_body(&rel.body, RELEASE_BODY_CAP);
            if !body.is_empty() {
                lines.push(format!("  Notes: {body}"));
            }
        }
        lines.push(String::new());
    }

    if !pulls.is_empty() {
        lines.push(format!("## Pull requests ({})", pulls.len()));
        for pr in &pulls {
            let state = match pr.state {
                Some(PrState::Open) => "open",
                Some(PrState::Merged) => "merged",
                Some(PrState::Closed) => "closed",
                None => "unknown",
            };
            let labels = if pr.labels.is_empty() {
                String::new()
            } else {
                format!(" [{}]", pr.labels.join(", "))
            };
            let flag = if matches_keywords(pr, keywords) {
                " [high priority]"
            } else {
                ""
            };
            let number = pr.number.map(|n| format!("#{n} ")).unwrap_or_default();
            lines.push(format!("- **{number}{}** ({state}){labels}{flag}", pr.title));
            lines.push(format!("  URL: {}", pr.url));
            let body = normalize_body(&pr.body, PR_BODY_CAP);
            if !body.is_empty() {
                lines.push(format!("  Description: {body}"));
            }
        }
        lines.push(String::new());
    }

    lines.push("## Instructions".into());
    lines.push(
        "Write a concise, structured Markdown summary: notable changes first \
         (new features, major fixes, breaking changes), then a short overview of \
         merged and open pull requests, then releases if any, then one sentence \
         on the project's direction. Keep the original links."
            .into(),
    );

    lines.join("\n")
}

/// Builds the prompt and makes exactly one AI-backend call per cycle.
pub struct Summarizer {
    ai: DynAiClient,
    ai_timeout: Duration,
}

impl Summarizer {
    pub fn new(ai: DynAiClient, ai_timeout: Duration) -> Self {
        Self { ai, ai_timeout }
    }

    /// `items` must be non-empty; the scheduler short-circuits empty cycles
    /// before any backend contact.
    pub async fn summarize(
        &self,
        repo: &str,
        cycle_time: DateTime<Utc>,
        items: &[UpstreamItem],
        keywords: &[String],
        context: &[ContextEntry],
    ) -> CycleResult<Summary> {
        if items.is_empty() {
            return Err(CycleError::Summarization(anyhow::anyhow!(
                "summarize called with no items"
            )));
        }

        let prompt = build_prompt(repo, items, keywords, context);

        let text = tokio::time::timeout(self.ai_timeout, self.ai.complete(&prompt))
            .await
            .map_err(|_| {
                CycleError::Summarization(anyhow::anyhow!(
                    "AI backend timed out after {:?}",
                    self.ai_timeout
                ))
            })?
            .map_err(CycleError::Summarization)?;

        let mut refs: Vec<ItemRef> = Vec::with_capacity(items.len());
        // Releases first, matching the prompt ordering.
        for item in items.iter().filter(|i| i.kind == ItemKind::Release) {
            refs.push(ItemRef::from_item(item, matches_keywords(item, keywords)));
        }
        for item in items.iter().filter(|i| i.kind == ItemKind::PullRequest) {
            refs.push(ItemRef::from_item(item, matches_keywords(item, keywords)));
        }

        let release_count = refs.iter().filter(|r| r.kind == ItemKind::Release).count();
        let pr_count = refs.len() - release_count;

        Ok(Summary {
            repo: repo.to_string(),
            cycle_time,
            text,
            items: refs,
            weighted_keywords: keywords.to_vec(),
            context_used: context.to_vec(),
            pr_count,
            release_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::types::PrState;
    use crate::summarize::ai::MockAi;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn ts(min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, min, 0).unwrap()
    }

    fn items_mixed() -> Vec<UpstreamItem> {
        // Chronological: PR before release, but the prompt must list the
        // release group first.
        vec![
            UpstreamItem::pull_request(1, 11, PrState::Merged, "Speed up parser", ts(1)),
            UpstreamItem::pull_request(2, 12, PrState::Open, "Add async io layer", ts(2)),
            UpstreamItem::release(3, "v0.9.0", ts(3)),
        ]
    }

    #[test]
    fn releases_come_first_then_prs_chronologically() {
        let prompt = build_prompt("acme/widget", &items_mixed(), &[], &[]);
        let rel_pos = prompt.find("v0.9.0").unwrap();
        let pr1_pos = prompt.find("Speed up parser").unwrap();
        let pr2_pos = prompt.find("Add async io layer").unwrap();
        assert!(rel_pos < pr1_pos);
        assert!(pr1_pos < pr2_pos);
    }

    #[test]
    fn keyword_hits_are_flagged_not_filtered() {
        let keywords = vec!["ASYNC".to_string()];
        let prompt = build_prompt("acme/widget", &items_mixed(), &keywords, &[]);

        // The matching PR is flagged; the non-matching one is still present.
        let async_line = prompt
            .lines()
            .find(|l| l.contains("Add async io layer"))
            .unwrap();
        assert!(async_line.contains("[high priority]"));
        let other_line = prompt
            .lines()
            .find(|l| l.contains("Speed up parser"))
            .unwrap();
        assert!(!other_line.contains("[high priority]"));
    }

    #[test]
    fn context_is_oldest_first_in_preamble() {
        let context = vec![
            ContextEntry {
                repo: "acme/widget".into(),
                generated_at: ts(0),
                text: "older summary".into(),
            },
            ContextEntry {
                repo: "acme/widget".into(),
                generated_at: ts(5),
                text: "newer summary".into(),
            },
        ];
        let prompt = build_prompt("acme/widget", &items_mixed(), &[], &context);
        let older = prompt.find("older summary").unwrap();
        let newer = prompt.find("newer summary").unwrap();
        assert!(older < newer);
        assert!(prompt.find("Previous updates").unwrap() < older);
    }

    #[test]
    fn no_context_means_no_preamble() {
        let prompt = build_prompt("acme/widget", &items_mixed(), &[], &[]);
        assert!(!prompt.contains("Previous updates"));
    }

    #[test]
    fn normalize_body_strips_tags_and_caps() {
        let body = "<p>Hello&nbsp;&nbsp; <b>world</b></p>\n\n  twice";
        assert_eq!(normalize_body(body, 200), "Hello world twice");

        let long = "x".repeat(500);
        let capped = normalize_body(&long, 10);
        assert_eq!(capped.chars().count(), 11); // 10 + ellipsis
    }

    #[tokio::test]
    async fn summary_counts_and_refs_follow_prompt_order() {
        let ai = Arc::new(MockAi::fixed("ok"));
        let summarizer = Summarizer::new(ai.clone(), Duration::from_secs(5));

        let summary = summarizer
            .summarize("acme/widget", ts(9), &items_mixed(), &[], &[])
            .await
            .unwrap();

        assert_eq!(summary.pr_count, 2);
        assert_eq!(summary.release_count, 1);
        assert_eq!(summary.items[0].kind, ItemKind::Release);
        assert_eq!(ai.call_count(), 1);
    }

    #[tokio::test]
    async fn ai_failure_maps_to_summarization_error() {
        let ai = Arc::new(MockAi::fixed("ok"));
        ai.fail_next_calls(1);
        let summarizer = Summarizer::new(ai, Duration::from_secs(5));

        let err = summarizer
            .summarize("acme/widget", ts(9), &items_mixed(), &[], &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "summarization");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_backend_times_out_as_summarization_error() {
        let ai = Arc::new(MockAi::fixed("ok"));
        ai.set_delay(Duration::from_secs(30));
        let summarizer = Summarizer::new(ai.clone(), Duration::from_secs(1));

        let err = summarizer
            .summarize("acme/widget", ts(9), &items_mixed(), &[], &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "summarization");
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn empty_input_is_rejected_without_backend_contact() {
        let ai = Arc::new(MockAi::fixed("ok"));
        let summarizer = Summarizer::new(ai.clone(), Duration::from_secs(5));

        let err = summarizer
            .summarize("acme/widget", ts(9), &[], &[], &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "summarization");
        assert_eq!(ai.call_count(), 0);
    }
}
