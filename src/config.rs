use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub tracker: TrackerConfig,
    pub hub: HubConfig,
    pub local: LocalConfig,
    #[serde(default)]
    pub stats: StatsConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TrackerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_rpc_path")]
    pub rpc_path: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://core.trac.wordpress.org".to_string()
}
fn default_rpc_path() -> String {
    "/login/xmlrpc".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

/// Source index holding the full ticket documents.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HubConfig {
    pub hosts: Vec<String>,
    #[serde(default = "default_hub_index")]
    pub index: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_hub_index() -> String {
    "wptrac".to_string()
}

/// Destination holding historical ticket copies and daily snapshots.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LocalConfig {
    pub hosts: Vec<String>,
    #[serde(default = "default_local_index")]
    pub index: String,
    #[serde(default = "default_stats_index")]
    pub stats_index: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_local_index() -> String {
    "trac".to_string()
}
fn default_stats_index() -> String {
    "trac-data".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StatsConfig {
    #[serde(default = "default_open_statuses")]
    pub open_statuses: Vec<String>,
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,
    #[serde(default = "default_ticket_page_size")]
    pub ticket_page_size: usize,
    #[serde(default = "default_update_page_size")]
    pub update_page_size: usize,
    /// Must match the hub index's `index.max_inner_result_window`, which
    /// caps `from + size` of the window-updates `top_hits` page.
    #[serde(default = "default_max_inner_result_window")]
    pub max_inner_result_window: usize,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            open_statuses: default_open_statuses(),
            keywords: default_keywords(),
            ticket_page_size: default_ticket_page_size(),
            update_page_size: default_update_page_size(),
            max_inner_result_window: default_max_inner_result_window(),
        }
    }
}

fn default_open_statuses() -> Vec<String> {
    ["new", "assigned", "reopened", "reviewing", "accepted"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_keywords() -> Vec<String> {
    [
        "has-patch",
        "needs-refresh",
        "needs-patch",
        "needs-unit-tests",
        "reporter-feedback",
        "dev-feedback",
        "close",
        "commit",
        "good-first-bug",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_ticket_page_size() -> usize {
    1000
}
fn default_update_page_size() -> usize {
    100
}
fn default_max_inner_result_window() -> usize {
    100
}

impl TrackerConfig {
    /// Full XML-RPC endpoint URL.
    pub fn rpc_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.rpc_path.trim_start_matches('/')
        )
    }
}

impl Config {
    /// Copy of the config with credentials masked, for display.
    pub fn redacted(&self) -> Config {
        let mut cfg = self.clone();
        if cfg.tracker.password.is_some() {
            cfg.tracker.password = Some("********".to_string());
        }
        cfg
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Credentials from the environment win over the file
    if let Ok(user) = std::env::var("TRAC_USERNAME") {
        config.tracker.username = Some(user);
    }
    if let Ok(pass) = std::env::var("TRAC_PASSWORD") {
        config.tracker.password = Some(pass);
    }

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    check_url("tracker.base_url", &config.tracker.base_url)?;
    if config.tracker.username.is_some() != config.tracker.password.is_some() {
        anyhow::bail!("tracker.username and tracker.password must be set together");
    }

    if config.hub.hosts.is_empty() {
        anyhow::bail!("hub.hosts must list at least one host");
    }
    for host in &config.hub.hosts {
        check_url("hub.hosts", host)?;
    }
    if config.local.hosts.is_empty() {
        anyhow::bail!("local.hosts must list at least one host");
    }
    for host in &config.local.hosts {
        check_url("local.hosts", host)?;
    }

    for (key, value) in [
        ("hub.index", &config.hub.index),
        ("local.index", &config.local.index),
        ("local.stats_index", &config.local.stats_index),
    ] {
        if value.trim().is_empty() {
            anyhow::bail!("{} must not be empty", key);
        }
    }

    if config.stats.open_statuses.is_empty() {
        anyhow::bail!("stats.open_statuses must not be empty");
    }
    if config.stats.ticket_page_size == 0 {
        anyhow::bail!("stats.ticket_page_size must be > 0");
    }
    if config.stats.update_page_size == 0 {
        anyhow::bail!("stats.update_page_size must be > 0");
    }
    if config.stats.update_page_size > config.stats.max_inner_result_window {
        anyhow::bail!(
            "stats.update_page_size ({}) must not exceed stats.max_inner_result_window ({})",
            config.stats.update_page_size,
            config.stats.max_inner_result_window
        );
    }

    Ok(())
}

fn check_url(key: &str, value: &str) -> Result<()> {
    if !(value.starts_with("http://") || value.starts_with("https://")) {
        anyhow::bail!("{} must be an http(s) URL, got '{}'", key, value);
    }
    Ok(())
}
