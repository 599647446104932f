// src/notify/dashboard.rs
// Dashboard store sink: appends each summary as one JSON line. The dashboard
// reads this file; rendering it is out of scope here.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::notify::Sink;
use crate::summarize::Summary;

pub struct DashboardSink {
    path: PathBuf,
}

impl DashboardSink {
    /// `data_dir/summaries.jsonl`
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            path: data_dir.join("summaries.jsonl"),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait::async_trait]
impl Sink for DashboardSink {
    async fn deliver(&self, summary: &Summary) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let line = serde_json::to_string(summary).context("serializing summary record")?;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        writeln!(f, "{line}").context("appending summary record")?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "dashboard"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn appends_one_json_line_per_summary() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DashboardSink::new(dir.path().to_path_buf());

        let summary = Summary {
            repo: "acme/widget".into(),
            cycle_time: chrono::Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap(),
            text: "something happened".into(),
            items: vec![],
            weighted_keywords: vec![],
            context_used: vec![],
            pr_count: 0,
            release_count: 0,
        };
        sink.deliver(&summary).await.unwrap();
        sink.deliver(&summary).await.unwrap();

        let content = fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: Summary = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.repo, "acme/widget");
    }
}
