use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::paths::{expand_home, Paths};

/// Target site endpoints and the session cookie contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteConfig {
    #[serde(default = "default_root_url")]
    pub root_url: String,
    #[serde(default = "default_dashboard_url")]
    pub dashboard_url: String,
    #[serde(default = "default_integrations_url")]
    pub integrations_url: String,
    /// Host the site redirects to when the session cookie is not accepted.
    #[serde(default = "default_auth_challenge_host")]
    pub auth_challenge_host: String,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    #[serde(default = "default_cookie_domain")]
    pub cookie_domain: String,
    #[serde(default = "default_cookie_path")]
    pub cookie_path: String,
}

fn default_root_url() -> String {
    "https://cursor.com/".to_string()
}

fn default_dashboard_url() -> String {
    "https://www.cursor.com/dashboard".to_string()
}

fn default_integrations_url() -> String {
    "https://www.cursor.com/dashboard?tab=integrations".to_string()
}

fn default_auth_challenge_host() -> String {
    "authenticator.cursor.sh".to_string()
}

fn default_cookie_name() -> String {
    "WorkosCursorSessionToken".to_string()
}

fn default_cookie_domain() -> String {
    ".cursor.com".to_string()
}

fn default_cookie_path() -> String {
    "/".to_string()
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            root_url: default_root_url(),
            dashboard_url: default_dashboard_url(),
            integrations_url: default_integrations_url(),
            auth_challenge_host: default_auth_challenge_host(),
            cookie_name: default_cookie_name(),
            cookie_domain: default_cookie_domain(),
            cookie_path: default_cookie_path(),
        }
    }
}

/// Page selectors used while creating an API key. These track the
/// dashboard UI and are the first thing to update when it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarvestConfig {
    /// Labels of the "create key" button, tried in order.
    #[serde(default = "default_create_labels")]
    pub create_labels: Vec<String>,
    #[serde(default = "default_name_placeholder")]
    pub name_placeholder: String,
    /// Labels of the dialog's submit button, tried in order.
    #[serde(default = "default_submit_labels")]
    pub submit_labels: Vec<String>,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Minimum number of alphanumerics after `key_prefix`.
    #[serde(default = "default_key_min_body")]
    pub key_min_body: usize,
    #[serde(default = "default_key_name_prefix")]
    pub key_name_prefix: String,
    /// Element texts at or below this length are skipped by the text scan.
    #[serde(default = "default_text_scan_min_len")]
    pub text_scan_min_len: usize,
}

fn default_create_labels() -> Vec<String> {
    vec![
        "New User API Key".to_string(),
        "New API Key".to_string(),
        "User API Key".to_string(),
    ]
}

fn default_name_placeholder() -> String {
    "Enter User API Key Name...".to_string()
}

fn default_submit_labels() -> Vec<String> {
    ["Save", "Create", "确认", "保存", "创建"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_key_prefix() -> String {
    "key_".to_string()
}

fn default_key_min_body() -> usize {
    32
}

fn default_key_name_prefix() -> String {
    "auto_key_".to_string()
}

fn default_text_scan_min_len() -> usize {
    20
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            create_labels: default_create_labels(),
            name_placeholder: default_name_placeholder(),
            submit_labels: default_submit_labels(),
            key_prefix: default_key_prefix(),
            key_min_body: default_key_min_body(),
            key_name_prefix: default_key_name_prefix(),
            text_scan_min_len: default_text_scan_min_len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    /// Explicit browser binary. Auto-detected when unset.
    #[serde(default)]
    pub binary: Option<String>,
    #[serde(default = "default_window_size")]
    pub window_size: String,
    #[serde(default = "default_element_timeout_secs")]
    pub element_timeout_secs: u64,
    #[serde(default = "default_launch_timeout_secs")]
    pub launch_timeout_secs: u64,
    #[serde(default = "default_short_settle_ms")]
    pub short_settle_ms: u64,
    #[serde(default = "default_page_settle_ms")]
    pub page_settle_ms: u64,
    #[serde(default = "default_submit_settle_ms")]
    pub submit_settle_ms: u64,
    #[serde(default = "default_key_settle_ms")]
    pub key_settle_ms: u64,
}

fn default_window_size() -> String {
    "1920,1080".to_string()
}

fn default_element_timeout_secs() -> u64 {
    15
}

fn default_launch_timeout_secs() -> u64 {
    15
}

fn default_short_settle_ms() -> u64 {
    1000
}

fn default_page_settle_ms() -> u64 {
    2000
}

fn default_submit_settle_ms() -> u64 {
    1000
}

fn default_key_settle_ms() -> u64 {
    3000
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            binary: None,
            window_size: default_window_size(),
            element_timeout_secs: default_element_timeout_secs(),
            launch_timeout_secs: default_launch_timeout_secs(),
            short_settle_ms: default_short_settle_ms(),
            page_settle_ms: default_page_settle_ms(),
            submit_settle_ms: default_submit_settle_ms(),
            key_settle_ms: default_key_settle_ms(),
        }
    }
}

impl BrowserConfig {
    pub fn timings(&self) -> Timings {
        Timings {
            element_timeout: Duration::from_secs(self.element_timeout_secs),
            short_settle: Duration::from_millis(self.short_settle_ms),
            page_settle: Duration::from_millis(self.page_settle_ms),
            submit_settle: Duration::from_millis(self.submit_settle_ms),
            key_settle: Duration::from_millis(self.key_settle_ms),
        }
    }
}

/// Sleep and wait budgets around browser interactions.
#[derive(Debug, Clone, Copy)]
pub struct Timings {
    pub element_timeout: Duration,
    pub short_settle: Duration,
    pub page_settle: Duration,
    pub submit_settle: Duration,
    pub key_settle: Duration,
}

impl Timings {
    /// No waiting at all; element lookups get a single attempt.
    pub fn immediate() -> Self {
        Self {
            element_timeout: Duration::ZERO,
            short_settle: Duration::ZERO,
            page_settle: Duration::ZERO,
            submit_settle: Duration::ZERO,
            key_settle: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// Override for the desktop client's state database.
    #[serde(default)]
    pub db_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvConfig {
    /// Shell startup file. Defaults to `~/.zshrc`.
    #[serde(default)]
    pub rc_file: Option<String>,
    #[serde(default = "default_var_name")]
    pub var_name: String,
    #[serde(default = "default_comment")]
    pub comment: String,
}

fn default_var_name() -> String {
    "CURSOR_API_KEY".to_string()
}

fn default_comment() -> String {
    "# Cursor API Key (added automatically)".to_string()
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            rc_file: None,
            var_name: default_var_name(),
            comment: default_comment(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub harvest: HarvestConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub env: EnvConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn state_db_path(&self) -> PathBuf {
        match self.store.db_path.as_deref().map(str::trim) {
            Some(p) if !p.is_empty() => expand_home(p),
            _ => Paths::default_state_db(),
        }
    }

    pub fn rc_file_path(&self) -> PathBuf {
        match self.env.rc_file.as_deref().map(str::trim) {
            Some(p) if !p.is_empty() => expand_home(p),
            _ => Paths::default_shell_rc(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_object() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.site.cookie_name, "WorkosCursorSessionToken");
        assert_eq!(cfg.site.cookie_domain, ".cursor.com");
        assert_eq!(cfg.harvest.create_labels.len(), 3);
        assert_eq!(cfg.harvest.submit_labels[0], "Save");
        assert_eq!(cfg.browser.element_timeout_secs, 15);
        assert_eq!(cfg.env.var_name, "CURSOR_API_KEY");
    }

    #[test]
    fn test_partial_override() {
        let raw = r#"{
  "harvest": { "createLabels": ["Create key"], "keyPrefix": "sk_" },
  "env": { "rcFile": "/tmp/bashrc", "varName": "MY_KEY" }
}"#;
        let cfg: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.harvest.create_labels, vec!["Create key".to_string()]);
        assert_eq!(cfg.harvest.key_prefix, "sk_");
        assert_eq!(cfg.harvest.key_min_body, 32);
        assert_eq!(cfg.rc_file_path(), PathBuf::from("/tmp/bashrc"));
        assert_eq!(cfg.env.var_name, "MY_KEY");
        assert_eq!(cfg.site.root_url, "https://cursor.com/");
    }

    #[test]
    fn test_blank_overrides_fall_back() {
        let raw = r#"{ "store": { "dbPath": "  " }, "env": { "rcFile": "" } }"#;
        let cfg: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.state_db_path(), Paths::default_state_db());
        assert_eq!(cfg.rc_file_path(), Paths::default_shell_rc());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut cfg = Config::default();
        cfg.browser.binary = Some("/opt/chrome".to_string());
        cfg.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.browser.binary.as_deref(), Some("/opt/chrome"));

        let paths = Paths::with_base(dir.path().to_path_buf());
        let missing = Config::load_or_default(&paths).unwrap();
        assert!(missing.browser.binary.is_none());
    }

    #[test]
    fn test_timings() {
        let t = BrowserConfig::default().timings();
        assert_eq!(t.element_timeout, Duration::from_secs(15));
        assert_eq!(t.key_settle, Duration::from_millis(3000));
        assert_eq!(Timings::immediate().page_settle, Duration::ZERO);
    }
}
