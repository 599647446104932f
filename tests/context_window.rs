// tests/context_window.rs
// After five successful cycles, exactly the three most recent summaries are
// carried as context, oldest first, and the composed prompt reflects them.

use std::sync::Arc;

use chrono::{Duration, Utc};
use repo_digest::config::{AppConfig, ConfigHandle, RepoEntry};
use repo_digest::fetch::ItemFetcher;
use repo_digest::notify::SinkMux;
use repo_digest::scheduler::{CycleOutcome, Scheduler};
use repo_digest::source::types::UpstreamItem;
use repo_digest::source::MockSource;
use repo_digest::store::StateStore;
use repo_digest::summarize::ai::MockAi;
use repo_digest::summarize::Summarizer;

#[tokio::test]
async fn five_cycles_keep_three_most_recent_summaries() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = AppConfig {
        github_token: None,
        ai: Default::default(),
        telegram: Default::default(),
        repos: vec![RepoEntry {
            owner: "acme".into(),
            name: "widget".into(),
            level: Some("all".into()),
            frequency: Some("1d".into()),
            keywords: vec![],
            notify: false,
        }],
        data_dir: dir.path().to_path_buf(),
        reports_dir: dir.path().join("reports"),
        scheduler: Default::default(),
        metrics_addr: None,
    };

    let source = Arc::new(MockSource::new());
    let ai = Arc::new(MockAi::fixed("cycle summary"));
    let store = Arc::new(StateStore::open(&dir.path().join("state.json")).unwrap());
    let scheduler = Scheduler::new(
        ConfigHandle::new(cfg),
        ItemFetcher::new(source.clone()),
        Summarizer::new(ai.clone(), std::time::Duration::from_secs(5)),
        store.clone(),
        Arc::new(SinkMux::new()),
    );

    let mut cycle_times = Vec::new();
    for i in 1..=5u64 {
        // A fresh release per cycle so every cycle produces a summary.
        source.set_items(vec![UpstreamItem::release(
            i,
            &format!("v0.{i}.0"),
            Utc::now() + Duration::hours(1),
        )]);
        match scheduler.run_repo_once("acme/widget").await.unwrap() {
            CycleOutcome::Summarized(summary) => cycle_times.push(summary.cycle_time),
            other => panic!("cycle {i} did not summarize: {other:?}"),
        }
    }

    let history = store.history("acme/widget");
    assert_eq!(history.len(), 3);
    // The three most recent, oldest first.
    assert_eq!(history[0].generated_at, cycle_times[2]);
    assert_eq!(history[1].generated_at, cycle_times[3]);
    assert_eq!(history[2].generated_at, cycle_times[4]);

    // The fourth cycle's prompt carried exactly the first three summaries.
    let prompts = ai.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 5);
    assert!(!prompts[0].contains("Previous updates"));
    assert!(prompts[3].contains("Previous updates"));
    let fifth = &prompts[4];
    assert_eq!(fifth.matches("cycle summary").count(), 3);
}
