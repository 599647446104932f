// src/context.rs
// Bounded rolling history of prior summaries, used to give new summaries
// continuity ("what changed since last report") without unbounded growth.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// At most this many prior summaries are carried as context. Size-bounded,
/// not time-bounded: a long-silent repository still contributes its last
/// actual summaries, never stale entries beyond the cap.
pub const CONTEXT_CAP: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub repo: String,
    pub generated_at: DateTime<Utc>,
    pub text: String,
}

/// Strict FIFO window of the most recent summaries, oldest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextWindow {
    entries: VecDeque<ContextEntry>,
}

impl ContextWindow {
    pub fn push(&mut self, entry: ContextEntry) {
        self.entries.push_back(entry);
        while self.entries.len() > CONTEXT_CAP {
            self.entries.pop_front();
        }
    }

    /// 0..=3 entries, newest last.
    pub fn history(&self) -> Vec<ContextEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(i: u32) -> ContextEntry {
        ContextEntry {
            repo: "acme/widget".into(),
            generated_at: Utc.with_ymd_and_hms(2025, 6, 1, i, 0, 0).unwrap(),
            text: format!("summary {i}"),
        }
    }

    #[test]
    fn five_pushes_keep_last_three_oldest_first() {
        let mut win = ContextWindow::default();
        for i in 1..=5 {
            win.push(entry(i));
        }
        let hist = win.history();
        assert_eq!(hist.len(), 3);
        let texts: Vec<_> = hist.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["summary 3", "summary 4", "summary 5"]);
    }

    #[test]
    fn empty_window_yields_no_history() {
        let win = ContextWindow::default();
        assert!(win.history().is_empty());
        assert!(win.is_empty());
    }
}
