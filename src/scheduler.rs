// src/scheduler.rs
// Tick-driven orchestration. Every tick evaluates due-ness for every tracked
// repository and dispatches eligible cycles; a cycle is one
// fetch → dedup → summarize → commit pass for a single repository. Cycles for
// one repository are strictly sequential (per-repo gate); distinct
// repositories run as independent tasks. All four error kinds are recovered
// here at the cycle boundary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;

use crate::config::{ConfigHandle, Frequency, RepoConfig};
use crate::context::ContextEntry;
use crate::error::{CycleError, CycleResult};
use crate::fetch::ItemFetcher;
use crate::notify::SinkMux;
use crate::store::{CycleCommit, StateStore};
use crate::summarize::{Summarizer, Summary};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("tracker_cycles_total", "Cycles started, by outcome.");
        describe_counter!(
            "tracker_cycle_failures_total",
            "Cycles aborted by an error, labelled by kind."
        );
        describe_counter!("tracker_items_fetched_total", "Items returned by fetches.");
        describe_counter!(
            "tracker_items_deduped_total",
            "Items dropped by the fingerprint ledger."
        );
        describe_counter!("tracker_summaries_total", "Summaries produced.");
        describe_counter!(
            "tracker_sink_failures_total",
            "Best-effort sink deliveries that failed."
        );
        describe_gauge!("tracker_last_tick_ts", "Unix ts of the last scheduler tick.");
    });
}

/// Level-triggered due check. Never-run repositories anchor on process start;
/// missed ticks self-correct on the next one. `on_release` repositories are
/// never due here — the release poll triggers them.
pub fn is_due(
    frequency: Frequency,
    last_success: Option<DateTime<Utc>>,
    process_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> bool {
    let interval = match frequency {
        Frequency::Daily => chrono::Duration::days(1),
        Frequency::EveryTwoDays => chrono::Duration::days(2),
        Frequency::OnRelease => return false,
    };
    let anchor = last_success.unwrap_or(process_start);
    now - anchor >= interval
}

#[derive(Debug)]
pub enum CycleOutcome {
    /// Another cycle for the same repository is in flight.
    Busy,
    /// Fetch succeeded but the ledger filtered everything out (or upstream
    /// had nothing). The watermark still advances.
    NoNewItems,
    Summarized(Summary),
}

struct RepoRuntime {
    /// Per-repository mutual exclusion.
    gate: tokio::sync::Mutex<()>,
    /// Set after an upstream failure; widens the next fetch window by the
    /// configured overlap so nothing is silently lost.
    fetch_failed: AtomicBool,
}

pub struct Scheduler {
    config: ConfigHandle,
    fetcher: ItemFetcher,
    summarizer: Summarizer,
    store: Arc<StateStore>,
    sinks: Arc<SinkMux>,
    runtimes: Mutex<HashMap<String, Arc<RepoRuntime>>>,
    process_start: DateTime<Utc>,
}

impl Scheduler {
    pub fn new(
        config: ConfigHandle,
        fetcher: ItemFetcher,
        summarizer: Summarizer,
        store: Arc<StateStore>,
        sinks: Arc<SinkMux>,
    ) -> Self {
        ensure_metrics_described();
        Self {
            config,
            fetcher,
            summarizer,
            store,
            sinks,
            runtimes: Mutex::new(HashMap::new()),
            process_start: Utc::now(),
        }
    }

    fn runtime_for(&self, full_name: &str) -> Arc<RepoRuntime> {
        let mut map = self.runtimes.lock().expect("runtime mutex poisoned");
        map.entry(full_name.to_string())
            .or_insert_with(|| {
                Arc::new(RepoRuntime {
                    gate: tokio::sync::Mutex::new(()),
                    fetch_failed: AtomicBool::new(false),
                })
            })
            .clone()
    }

    /// Run one complete cycle for `repo`, bypassing the due check but keeping
    /// the per-repo gate and the full fetch→summarize→commit sequence.
    pub async fn run_cycle(&self, repo: &RepoConfig) -> CycleResult<CycleOutcome> {
        let full_name = repo.full_name();
        let runtime = self.runtime_for(&full_name);
        let Ok(_guard) = runtime.gate.try_lock() else {
            tracing::debug!(repo = %full_name, "cycle already in flight; skipping");
            return Ok(CycleOutcome::Busy);
        };

        let scfg = self.config.snapshot().scheduler;
        let cycle_time = Utc::now();
        let state = self.store.repo_state(&full_name);

        let mut since = state
            .watermark
            .unwrap_or(cycle_time - chrono::Duration::seconds(scfg.initial_lookback_secs as i64));
        if runtime.fetch_failed.load(Ordering::SeqCst) {
            since -= chrono::Duration::seconds(scfg.fetch_overlap_secs as i64);
        }

        tracing::debug!(repo = %full_name, %since, "fetching");
        let fetch = tokio::time::timeout(
            Duration::from_secs(scfg.fetch_timeout_secs),
            self.fetcher.fetch(repo, since),
        )
        .await
        .map_err(|_| {
            CycleError::Upstream(anyhow::anyhow!(
                "fetch timed out after {}s",
                scfg.fetch_timeout_secs
            ))
        });

        let items = match fetch.and_then(|r| r) {
            Ok(items) => {
                runtime.fetch_failed.store(false, Ordering::SeqCst);
                items
            }
            Err(e) => {
                // Skipped, not retried within this tick; watermark preserved.
                runtime.fetch_failed.store(true, Ordering::SeqCst);
                return Err(e);
            }
        };
        counter!("tracker_items_fetched_total").increment(items.len() as u64);

        let fetched = items.len();
        let survivors = self.store.filter_new(&full_name, items);
        counter!("tracker_items_deduped_total").increment((fetched - survivors.len()) as u64);

        if survivors.is_empty() {
            // Successful no-op: the window was observed, so the watermark and
            // last-success advance, but no backend call and no Summary.
            self.store.commit_cycle(CycleCommit {
                repo: full_name.clone(),
                fingerprints: Vec::new(),
                context: None,
                watermark: cycle_time,
                completed_at: Utc::now(),
            })?;
            tracing::info!(repo = %full_name, fetched, "no new items this cycle");
            return Ok(CycleOutcome::NoNewItems);
        }

        let context = self.store.history(&full_name);
        let (new_items, fingerprints): (Vec<_>, Vec<_>) = survivors.into_iter().unzip();

        tracing::debug!(repo = %full_name, items = new_items.len(), "summarizing");
        let summary = self
            .summarizer
            .summarize(&full_name, cycle_time, &new_items, &repo.keywords, &context)
            .await?;

        tracing::debug!(repo = %full_name, "committing");
        self.store.commit_cycle(CycleCommit {
            repo: full_name.clone(),
            fingerprints,
            context: Some(ContextEntry {
                repo: full_name.clone(),
                generated_at: cycle_time,
                text: summary.text.clone(),
            }),
            watermark: cycle_time,
            completed_at: Utc::now(),
        })?;
        counter!("tracker_summaries_total").increment(1);

        // Delivery is best-effort and happens only after the commit; sink
        // failures never un-process items.
        self.sinks.deliver_all(&summary, repo.notify).await;

        tracing::info!(
            repo = %full_name,
            prs = summary.pr_count,
            releases = summary.release_count,
            "cycle summarized"
        );
        Ok(CycleOutcome::Summarized(summary))
    }

    async fn run_cycle_logged(&self, repo: &RepoConfig) {
        counter!("tracker_cycles_total").increment(1);
        if let Err(e) = self.run_cycle(repo).await {
            counter!("tracker_cycle_failures_total", "kind" => e.kind()).increment(1);
            tracing::warn!(repo = %repo.full_name(), kind = e.kind(), error = %e, "cycle failed");
        }
    }

    /// Manual single-shot for one repository, bypassing the due check.
    pub async fn run_repo_once(&self, full_name: &str) -> CycleResult<CycleOutcome> {
        let repo = self
            .config
            .snapshot()
            .repo_by_name(full_name)
            .ok_or_else(|| {
                CycleError::Config(format!("repository '{full_name}' is not configured"))
            })?;
        self.run_cycle(&repo).await
    }

    /// Manual single-shot over every configured repository.
    pub async fn run_all_once(&self) -> Vec<(String, CycleResult<CycleOutcome>)> {
        let repos = self.config.snapshot().valid_repos();
        let mut results = Vec::with_capacity(repos.len());
        for repo in repos {
            counter!("tracker_cycles_total").increment(1);
            let out = self.run_cycle(&repo).await;
            if let Err(e) = &out {
                counter!("tracker_cycle_failures_total", "kind" => e.kind()).increment(1);
                tracing::warn!(repo = %repo.full_name(), kind = e.kind(), error = %e, "cycle failed");
            }
            results.push((repo.full_name(), out));
        }
        results
    }

    /// Evaluate due-ness for every repository and dispatch eligible cycles as
    /// independent tasks.
    fn dispatch_due(self: &Arc<Self>, now: DateTime<Utc>) {
        let snapshot = self.config.snapshot();
        for repo in snapshot.valid_repos() {
            let state = self.store.repo_state(&repo.full_name());
            if !is_due(repo.frequency, state.last_success, self.process_start, now) {
                continue;
            }
            let sched = self.clone();
            tokio::spawn(async move {
                sched.run_cycle_logged(&repo).await;
            });
        }
    }

    /// Secondary lightweight poll for `on_release` repositories: a cycle fires
    /// only when at least one un-fingerprinted release exists. PR activity
    /// alone never triggers these repositories.
    fn dispatch_release_polls(self: &Arc<Self>) {
        let snapshot = self.config.snapshot();
        for repo in snapshot.valid_repos() {
            if repo.frequency != Frequency::OnRelease {
                continue;
            }
            let sched = self.clone();
            tokio::spawn(async move {
                if let Err(e) = sched.poll_release_repo(&repo).await {
                    tracing::warn!(repo = %repo.full_name(), error = %e, "release poll failed");
                }
            });
        }
    }

    /// One probe of the release poll: fetch releases only, and trigger a full
    /// cycle when at least one is not yet in the ledger.
    pub async fn poll_release_repo(&self, repo: &RepoConfig) -> CycleResult<()> {
        let full_name = repo.full_name();
        let runtime = self.runtime_for(&full_name);
        let scfg = self.config.snapshot().scheduler;
        let state = self.store.repo_state(&full_name);

        let mut since = state.watermark.unwrap_or_else(|| {
            Utc::now() - chrono::Duration::seconds(scfg.initial_lookback_secs as i64)
        });
        if runtime.fetch_failed.load(Ordering::SeqCst) {
            since -= chrono::Duration::seconds(scfg.fetch_overlap_secs as i64);
        }

        let poll = tokio::time::timeout(
            Duration::from_secs(scfg.fetch_timeout_secs),
            self.fetcher.fetch_releases_only(repo, since),
        )
        .await
        .map_err(|_| CycleError::Upstream(anyhow::anyhow!("release poll timed out")));

        let releases = match poll.and_then(|r| r) {
            Ok(releases) => releases,
            Err(e) => {
                runtime.fetch_failed.store(true, Ordering::SeqCst);
                return Err(e);
            }
        };

        let fresh = self.store.filter_new(&full_name, releases);
        if fresh.is_empty() {
            // The widened window was observed and held nothing new; the
            // triggered-cycle path instead leaves the flag for run_cycle,
            // whose own fetch must cover the same overlap.
            runtime.fetch_failed.store(false, Ordering::SeqCst);
            return Ok(());
        }
        tracing::info!(repo = %full_name, releases = fresh.len(), "new release; triggering cycle");
        self.run_cycle_logged(repo).await;
        Ok(())
    }

    /// Main loop. Tick and poll intervals are read from the config snapshot at
    /// startup; repository membership and parameters reload per tick.
    pub async fn run(self: Arc<Self>) {
        let scfg = self.config.snapshot().scheduler;
        let mut tick = tokio::time::interval(Duration::from_secs(scfg.tick_secs.max(1)));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut release_poll =
            tokio::time::interval(Duration::from_secs(scfg.release_poll_secs.max(1)));
        release_poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let now = Utc::now();
                    gauge!("tracker_last_tick_ts").set(now.timestamp() as f64);
                    self.dispatch_due(now);
                }
                _ = release_poll.tick() => {
                    self.dispatch_release_polls();
                }
            }
        }
    }
}
