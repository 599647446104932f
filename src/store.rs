// src/store.rs
// Durable tracker state: the append-only fingerprint ledger, the per-repository
// context windows, and the per-repository run/watermark record. Everything a
// cycle commits lands in one serialized state file written via tmp + rename,
// so a crash mid-cycle never leaves partial dedup state.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::context::{ContextEntry, ContextWindow};
use crate::error::{CycleError, CycleResult};
use crate::source::types::{ItemKind, UpstreamItem};

/// Deterministic identity of a processed item+state. The state is part of the
/// key: an open→merged transition hashes differently and is re-surfaced once.
pub fn fingerprint(repo: &str, item: &UpstreamItem) -> String {
    let kind = match item.kind {
        ItemKind::PullRequest => "pull_request",
        ItemKind::Release => "release",
    };
    let mut hasher = Sha256::new();
    hasher.update(repo.as_bytes());
    hasher.update(b"|");
    hasher.update(kind.as_bytes());
    hasher.update(b"|");
    hasher.update(item.id.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(item.state_token().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoState {
    pub last_success: Option<DateTime<Utc>>,
    pub watermark: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cycles_completed: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PersistedState {
    #[serde(default)]
    fingerprints: BTreeSet<String>,
    #[serde(default)]
    contexts: HashMap<String, ContextWindow>,
    #[serde(default)]
    repos: HashMap<String, RepoState>,
}

/// Everything one successful cycle writes, applied as a single transaction.
#[derive(Debug, Clone)]
pub struct CycleCommit {
    pub repo: String,
    pub fingerprints: Vec<String>,
    /// Present only when a Summary was produced (empty cycles advance the
    /// watermark without context).
    pub context: Option<ContextEntry>,
    pub watermark: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

pub struct StateStore {
    path: PathBuf,
    state: Mutex<PersistedState>,
}

impl StateStore {
    /// Open (or create) the state file at `path`.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating state dir {}", parent.display()))?;
        }
        let state = match fs::read_to_string(path) {
            Ok(s) => serde_json::from_str(&s)
                .with_context(|| format!("decoding state file {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PersistedState::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("reading state file {}", path.display()))
            }
        };
        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(state),
        })
    }

    pub fn has(&self, fp: &str) -> bool {
        let g = self.state.lock().expect("state mutex poisoned");
        g.fingerprints.contains(fp)
    }

    /// Drop items whose fingerprint is already in the ledger; returns the
    /// survivors paired with their fingerprints.
    pub fn filter_new(&self, repo: &str, items: Vec<UpstreamItem>) -> Vec<(UpstreamItem, String)> {
        let g = self.state.lock().expect("state mutex poisoned");
        items
            .into_iter()
            .filter_map(|item| {
                let fp = fingerprint(repo, &item);
                if g.fingerprints.contains(&fp) {
                    None
                } else {
                    Some((item, fp))
                }
            })
            .collect()
    }

    pub fn history(&self, repo: &str) -> Vec<ContextEntry> {
        let g = self.state.lock().expect("state mutex poisoned");
        g.contexts.get(repo).map(|w| w.history()).unwrap_or_default()
    }

    pub fn repo_state(&self, repo: &str) -> RepoState {
        let g = self.state.lock().expect("state mutex poisoned");
        g.repos.get(repo).cloned().unwrap_or_default()
    }

    /// Commit one cycle: fingerprints, context push, watermark and run record,
    /// all or nothing. The in-memory state is only swapped after the file hit
    /// disk, so a persistence failure leaves the store exactly as it was and
    /// the whole cycle is safe to retry.
    pub fn commit_cycle(&self, commit: CycleCommit) -> CycleResult<()> {
        let mut g = self.state.lock().expect("state mutex poisoned");

        let mut next = g.clone();
        for fp in &commit.fingerprints {
            next.fingerprints.insert(fp.clone());
        }
        if let Some(entry) = commit.context {
            next.contexts.entry(commit.repo.clone()).or_default().push(entry);
        }
        let repo_state = next.repos.entry(commit.repo.clone()).or_default();
        repo_state.last_success = Some(commit.completed_at);
        repo_state.watermark = Some(commit.watermark);
        repo_state.cycles_completed += 1;

        write_state(&self.path, &next).map_err(CycleError::Persistence)?;
        *g = next;
        Ok(())
    }

    pub fn fingerprint_count(&self) -> usize {
        let g = self.state.lock().expect("state mutex poisoned");
        g.fingerprints.len()
    }
}

fn write_state(path: &Path, state: &PersistedState) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(state).context("serializing state")?;
    let tmp = path.with_extension("json.tmp");
    let mut f = fs::File::create(&tmp)
        .with_context(|| format!("creating temp state file {}", tmp.display()))?;
    f.write_all(json.as_bytes()).context("writing state")?;
    fs::rename(&tmp, path)
        .with_context(|| format!("replacing state file {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::types::PrState;
    use chrono::TimeZone;

    fn ts(min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, min, 0).unwrap()
    }

    #[test]
    fn fingerprints_are_deterministic_and_state_sensitive() {
        let open = UpstreamItem::pull_request(1, 10, PrState::Open, "t", ts(0));
        let open_again = UpstreamItem::pull_request(1, 10, PrState::Open, "t", ts(5));
        let merged = UpstreamItem::pull_request(1, 10, PrState::Merged, "t", ts(5));

        // Timestamp and title play no part in identity.
        assert_eq!(fingerprint("a/b", &open), fingerprint("a/b", &open_again));
        assert_ne!(fingerprint("a/b", &open), fingerprint("a/b", &merged));
        assert_ne!(fingerprint("a/b", &open), fingerprint("a/c", &open));
    }

    #[test]
    fn commit_then_filter_drops_seen_items() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(&dir.path().join("state.json")).unwrap();

        let item = UpstreamItem::pull_request(1, 10, PrState::Open, "t", ts(0));
        let pairs = store.filter_new("a/b", vec![item.clone()]);
        assert_eq!(pairs.len(), 1);

        store
            .commit_cycle(CycleCommit {
                repo: "a/b".into(),
                fingerprints: vec![pairs[0].1.clone()],
                context: None,
                watermark: ts(1),
                completed_at: ts(1),
            })
            .unwrap();

        assert!(store.filter_new("a/b", vec![item]).is_empty());
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let item = UpstreamItem::release(9, "v2.0.0", ts(0));
        let fp = fingerprint("a/b", &item);

        {
            let store = StateStore::open(&path).unwrap();
            store
                .commit_cycle(CycleCommit {
                    repo: "a/b".into(),
                    fingerprints: vec![fp.clone()],
                    context: Some(ContextEntry {
                        repo: "a/b".into(),
                        generated_at: ts(1),
                        text: "first summary".into(),
                    }),
                    watermark: ts(1),
                    completed_at: ts(1),
                })
                .unwrap();
        }

        let reopened = StateStore::open(&path).unwrap();
        assert!(reopened.has(&fp));
        assert_eq!(reopened.history("a/b").len(), 1);
        assert_eq!(reopened.repo_state("a/b").watermark, Some(ts(1)));
    }

    #[test]
    fn failed_write_leaves_memory_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = StateStore::open(&path).unwrap();

        // Turn the target path into a directory so the rename must fail.
        fs::create_dir_all(&path).unwrap();

        let item = UpstreamItem::release(3, "v1.1.0", ts(0));
        let fp = fingerprint("a/b", &item);
        let err = store
            .commit_cycle(CycleCommit {
                repo: "a/b".into(),
                fingerprints: vec![fp.clone()],
                context: None,
                watermark: ts(1),
                completed_at: ts(1),
            })
            .unwrap_err();

        assert_eq!(err.kind(), "persistence");
        assert!(!store.has(&fp));
        assert!(store.repo_state("a/b").watermark.is_none());
    }
}
