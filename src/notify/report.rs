// src/notify/report.rs
// Markdown report sink: one file per repository per day under `reports_dir`.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::notify::Sink;
use crate::source::types::{ItemKind, PrState};
use crate::summarize::Summary;

pub struct ReportSink {
    reports_dir: PathBuf,
}

impl ReportSink {
    pub fn new(reports_dir: PathBuf) -> Self {
        Self { reports_dir }
    }

    fn sanitize_filename(name: &str) -> String {
        name.replace(['/', ' '], "_")
    }

    fn report_path(&self, summary: &Summary) -> PathBuf {
        let date = summary.cycle_time.format("%Y%m%d");
        let safe = Self::sanitize_filename(&summary.repo);
        self.reports_dir.join(format!("{safe}_{date}.md"))
    }

    fn render(summary: &Summary) -> String {
        let mut parts: Vec<String> = Vec::new();
        parts.push(format!("# {} update report", summary.repo));
        parts.push(format!(
            "\nGenerated: {}\n",
            summary.cycle_time.format("%Y-%m-%d %H:%M:%S UTC")
        ));

        let mut stats = Vec::new();
        let merged = summary
            .items
            .iter()
            .filter(|i| i.state == Some(PrState::Merged))
            .count();
        let open = summary
            .items
            .iter()
            .filter(|i| i.state == Some(PrState::Open))
            .count();
        if merged > 0 {
            stats.push(format!("merged PRs: {merged}"));
        }
        if open > 0 {
            stats.push(format!("open PRs: {open}"));
        }
        if summary.release_count > 0 {
            stats.push(format!("releases: {}", summary.release_count));
        }
        if !stats.is_empty() {
            parts.push(format!("**This run**: {}\n", stats.join(" | ")));
        }
        if !summary.weighted_keywords.is_empty() {
            parts.push(format!(
                "**Focus keywords**: {}\n",
                summary.weighted_keywords.join(", ")
            ));
        }

        parts.push("---\n".into());
        parts.push("## AI summary\n".into());
        parts.push(summary.text.clone());
        parts.push("\n---\n".into());

        parts.push("## Raw data\n".into());

        let releases: Vec<_> = summary
            .items
            .iter()
            .filter(|i| i.kind == ItemKind::Release)
            .collect();
        if !releases.is_empty() {
            parts.push("### Releases\n".into());
            for rel in releases {
                let pre = if rel.prerelease { " *(prerelease)*" } else { "" };
                parts.push(format!("- [{}]({}){pre}", rel.title, rel.url));
            }
            parts.push(String::new());
        }

        for (state, heading) in [
            (PrState::Merged, "### Merged pull requests\n"),
            (PrState::Open, "### Open pull requests\n"),
            (PrState::Closed, "### Closed pull requests\n"),
        ] {
            let prs: Vec<_> = summary
                .items
                .iter()
                .filter(|i| i.kind == ItemKind::PullRequest && i.state == Some(state))
                .collect();
            if prs.is_empty() {
                continue;
            }
            parts.push(heading.into());
            for pr in prs {
                let number = pr.number.map(|n| format!("#{n} ")).unwrap_or_default();
                let labels = if pr.labels.is_empty() {
                    String::new()
                } else {
                    format!(" `{}`", pr.labels.join(", "))
                };
                parts.push(format!("- [{number}{}]({}){labels}", pr.title, pr.url));
            }
            parts.push(String::new());
        }

        parts.join("\n")
    }
}

#[async_trait::async_trait]
impl Sink for ReportSink {
    async fn deliver(&self, summary: &Summary) -> Result<()> {
        fs::create_dir_all(&self.reports_dir)
            .with_context(|| format!("creating {}", self.reports_dir.display()))?;
        let path = self.report_path(summary);
        fs::write(&path, Self::render(summary))
            .with_context(|| format!("writing report {}", path.display()))?;
        tracing::info!(path = %path.display(), "report written");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "report"
    }
}
