// src/config.rs
// Tracker configuration: the repository list plus scheduling, AI and sink
// parameters. Supports TOML or JSON, env fallbacks for secrets, and a polling
// hot-reload thread that swaps an immutable snapshot. In-flight cycles keep
// the snapshot they started with.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::CycleError;

/// Which item kinds/states are eligible for summarization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrackingLevel {
    #[default]
    All,
    MergedAndRelease,
    ReleaseOnly,
}

impl FromStr for TrackingLevel {
    type Err = CycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(TrackingLevel::All),
            "merged_and_release" => Ok(TrackingLevel::MergedAndRelease),
            "release_only" => Ok(TrackingLevel::ReleaseOnly),
            other => Err(CycleError::Config(format!(
                "unknown tracking level '{other}'"
            ))),
        }
    }
}

/// How often a repository's cycle becomes due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Frequency {
    #[default]
    #[serde(rename = "1d")]
    Daily,
    #[serde(rename = "2d")]
    EveryTwoDays,
    #[serde(rename = "on_release")]
    OnRelease,
}

impl FromStr for Frequency {
    type Err = CycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1d" => Ok(Frequency::Daily),
            "2d" => Ok(Frequency::EveryTwoDays),
            "on_release" => Ok(Frequency::OnRelease),
            other => Err(CycleError::Config(format!("unknown frequency '{other}'"))),
        }
    }
}

/// Raw repository entry as written in the config file. Kept stringly-typed so
/// one malformed entry poisons only itself, not the whole file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoEntry {
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub notify: bool,
}

/// One tracked repository, validated. Immutable per cycle; the whole list is
/// replaced on config reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    pub owner: String,
    pub name: String,
    #[serde(default)]
    pub level: TrackingLevel,
    #[serde(default)]
    pub frequency: Frequency,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub notify: bool,
}

impl RepoConfig {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl TryFrom<&RepoEntry> for RepoConfig {
    type Error = CycleError;

    fn try_from(raw: &RepoEntry) -> Result<Self, Self::Error> {
        if raw.owner.trim().is_empty() || raw.name.trim().is_empty() {
            return Err(CycleError::Config(
                "repository entry needs non-empty owner and name".into(),
            ));
        }
        if raw.owner.contains('/') || raw.name.contains('/') {
            return Err(CycleError::Config(format!(
                "'{}/{}' contains a stray '/'",
                raw.owner, raw.name
            )));
        }
        let level = match raw.level.as_deref() {
            None | Some("") => TrackingLevel::default(),
            Some(s) => s.parse()?,
        };
        let frequency = match raw.frequency.as_deref() {
            None | Some("") => Frequency::default(),
            Some(s) => s.parse()?,
        };
        Ok(RepoConfig {
            owner: raw.owner.trim().to_string(),
            name: raw.name.trim().to_string(),
            level,
            frequency,
            keywords: raw
                .keywords
                .iter()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect(),
            notify: raw.notify,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_ai_base_url")]
    pub base_url: String,
    #[serde(default = "default_ai_model")]
    pub model: String,
}

fn default_ai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_ai_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_ai_base_url(),
            model: default_ai_model(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_id: String,
    #[serde(default)]
    pub enabled: bool,
}

/// Scheduling knobs. All durations in seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Main due-check tick.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Secondary lightweight poll for `on_release` repositories.
    #[serde(default = "default_release_poll_secs")]
    pub release_poll_secs: u64,
    /// Fixed backwards extension applied to the fetch window after an upstream
    /// failure, so no window is silently lost.
    #[serde(default = "default_fetch_overlap_secs")]
    pub fetch_overlap_secs: u64,
    /// Lookback for a repository that has never been fetched.
    #[serde(default = "default_initial_lookback_secs")]
    pub initial_lookback_secs: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_ai_timeout_secs")]
    pub ai_timeout_secs: u64,
}

fn default_tick_secs() -> u64 {
    60
}
fn default_release_poll_secs() -> u64 {
    900
}
fn default_fetch_overlap_secs() -> u64 {
    600
}
fn default_initial_lookback_secs() -> u64 {
    24 * 3600
}
fn default_fetch_timeout_secs() -> u64 {
    30
}
fn default_ai_timeout_secs() -> u64 {
    60
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            release_poll_secs: default_release_poll_secs(),
            fetch_overlap_secs: default_fetch_overlap_secs(),
            initial_lookback_secs: default_initial_lookback_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            ai_timeout_secs: default_ai_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub github_token: Option<String>,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub repos: Vec<RepoEntry>,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_reports_dir")]
    pub reports_dir: PathBuf,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Optional `host:port` for the Prometheus exporter; disabled when absent.
    #[serde(default)]
    pub metrics_addr: Option<String>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_reports_dir() -> PathBuf {
    PathBuf::from("./data/reports")
}

impl AppConfig {
    /// Load from an explicit path. Supports TOML or JSON, decided by extension
    /// with a content-sniffing fallback.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let mut cfg = parse_config(&content, &ext)?;
        cfg.apply_env_fallbacks();
        Ok(cfg)
    }

    /// Secrets may live in the environment instead of the config file.
    fn apply_env_fallbacks(&mut self) {
        if self.github_token.as_deref().unwrap_or("").is_empty() {
            self.github_token = std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty());
        }
        if self.ai.api_key.is_empty() {
            if let Ok(k) = std::env::var("OPENAI_API_KEY") {
                self.ai.api_key = k;
            }
        }
        if self.telegram.bot_token.is_empty() {
            if let Ok(t) = std::env::var("TG_BOT_TOKEN") {
                self.telegram.bot_token = t;
            }
        }
        if self.telegram.chat_id.is_empty() {
            if let Ok(c) = std::env::var("TG_CHAT_ID") {
                self.telegram.chat_id = c;
            }
        }
    }

    /// Repositories that pass validation. Malformed entries are logged and
    /// excluded from scheduling until corrected; the rest are unaffected.
    pub fn valid_repos(&self) -> Vec<RepoConfig> {
        let mut out = Vec::with_capacity(self.repos.len());
        for raw in &self.repos {
            match RepoConfig::try_from(raw) {
                Ok(repo) => out.push(repo),
                Err(e) => {
                    tracing::warn!(
                        owner = %raw.owner,
                        name = %raw.name,
                        error = %e,
                        "excluding malformed repository entry"
                    );
                }
            }
        }
        out
    }

    pub fn repo_by_name(&self, full_name: &str) -> Option<RepoConfig> {
        self.valid_repos()
            .into_iter()
            .find(|r| r.full_name() == full_name)
    }
}

fn parse_config(s: &str, hint_ext: &str) -> Result<AppConfig> {
    let json_first = hint_ext == "json" || s.trim_start().starts_with('{');
    if json_first {
        let json_err = match serde_json::from_str(s) {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };
        return toml::from_str(s).map_err(|toml_err| {
            anyhow!("config parses as neither JSON ({json_err}) nor TOML ({toml_err})")
        });
    }
    let toml_err = match toml::from_str(s) {
        Ok(v) => return Ok(v),
        Err(e) => e,
    };
    serde_json::from_str(s).map_err(|json_err| {
        anyhow!("config parses as neither TOML ({toml_err}) nor JSON ({json_err})")
    })
}

/* ----------------------------
Thread-safe handle + hot reload
---------------------------- */

/// Threadsafe handle over the current config snapshot. Readers clone the Arc;
/// reload swaps the whole snapshot atomically.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Arc<AppConfig>>>,
}

impl ConfigHandle {
    pub fn new(cfg: AppConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(cfg))),
        }
    }

    pub fn snapshot(&self) -> Arc<AppConfig> {
        self.inner
            .read()
            .map(|g| g.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    pub fn replace(&self, cfg: AppConfig) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = Arc::new(cfg);
        }
    }
}

/// Start a simple polling watcher on `path` that reloads the config when its
/// mtime advances. A file that fails to parse keeps the previous snapshot.
pub fn start_hot_reload_thread(handle: ConfigHandle, path: PathBuf) {
    thread::spawn(move || {
        let poll = Duration::from_secs(5);
        let mut last_mtime: Option<SystemTime> = None;

        loop {
            match fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(mtime) => {
                    let changed = match last_mtime {
                        None => {
                            last_mtime = Some(mtime);
                            false
                        }
                        Some(prev) => mtime > prev,
                    };
                    if changed {
                        match AppConfig::load(&path) {
                            Ok(new_cfg) => {
                                tracing::info!(repos = new_cfg.repos.len(), "config reloaded");
                                handle.replace(new_cfg);
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "config reload failed; keeping previous snapshot");
                            }
                        }
                        last_mtime = Some(mtime);
                    }
                }
                Err(_) => {
                    // File missing or unreadable; keep trying.
                }
            }
            thread::sleep(poll);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_and_json_both_parse() {
        let toml_src = r#"
github_token = "t"

[[repos]]
owner = "rust-lang"
name = "rust"
level = "merged_and_release"
frequency = "2d"
keywords = ["async"]
notify = true
"#;
        let cfg = parse_config(toml_src, "toml").unwrap();
        let repos = cfg.valid_repos();
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].level, TrackingLevel::MergedAndRelease);
        assert_eq!(repos[0].frequency, Frequency::EveryTwoDays);
        assert!(repos[0].notify);

        let json_src = r#"{"repos":[{"owner":"a","name":"b","frequency":"on_release"}]}"#;
        let cfg = parse_config(json_src, "json").unwrap();
        let repos = cfg.valid_repos();
        assert_eq!(repos[0].frequency, Frequency::OnRelease);
        assert_eq!(repos[0].level, TrackingLevel::All);
    }

    #[test]
    fn defaults_fill_in() {
        let cfg = parse_config("{}", "json").unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("./data"));
        assert_eq!(cfg.reports_dir, PathBuf::from("./data/reports"));
        assert_eq!(cfg.scheduler.tick_secs, 60);
        assert!(cfg.metrics_addr.is_none());
    }

    #[test]
    fn malformed_repo_is_excluded_others_kept() {
        let src = r#"{"repos":[
            {"owner":"", "name":"x"},
            {"owner":"a", "name":"b", "level":"everything"},
            {"owner":"rust-lang", "name":"rust"}
        ]}"#;
        let cfg = parse_config(src, "json").unwrap();
        let valid = cfg.valid_repos();
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].full_name(), "rust-lang/rust");
    }

    #[test]
    fn parse_error_carries_the_underlying_diagnostic() {
        // Unterminated value on line 1.
        let err = parse_config("github_token = \n", "toml").unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("neither TOML"));
        assert!(msg.contains("line 1"));
    }

    #[test]
    fn keywords_are_trimmed_and_emptied() {
        let raw = RepoEntry {
            owner: "a".into(),
            name: "b".into(),
            keywords: vec![" async ".into(), "".into(), "io".into()],
            ..Default::default()
        };
        let repo = RepoConfig::try_from(&raw).unwrap();
        assert_eq!(repo.keywords, vec!["async".to_string(), "io".to_string()]);
    }

    #[test]
    #[serial_test::serial]
    fn env_fallbacks_fill_missing_secrets() {
        std::env::set_var("GITHUB_TOKEN", "gh-token");
        std::env::set_var("OPENAI_API_KEY", "ai-key");

        let mut cfg = parse_config("{}", "json").unwrap();
        cfg.apply_env_fallbacks();
        assert_eq!(cfg.github_token.as_deref(), Some("gh-token"));
        assert_eq!(cfg.ai.api_key, "ai-key");

        // An explicit config value wins over the environment.
        let mut cfg = parse_config(r#"{"github_token":"from-file"}"#, "json").unwrap();
        cfg.apply_env_fallbacks();
        assert_eq!(cfg.github_token.as_deref(), Some("from-file"));

        std::env::remove_var("GITHUB_TOKEN");
        std::env::remove_var("OPENAI_API_KEY");
    }

    #[test]
    fn handle_swaps_snapshots() {
        let handle = ConfigHandle::new(parse_config("{}", "json").unwrap());
        assert!(handle.snapshot().repos.is_empty());

        let next = parse_config(r#"{"repos":[{"owner":"a","name":"b"}]}"#, "json").unwrap();
        handle.replace(next);
        assert_eq!(handle.snapshot().repos.len(), 1);
    }
}
