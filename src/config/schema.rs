use anyhow::{Context, Result};
use directories::UserDirs;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

const CONFIG_DIR_NAME: &str = ".panelbot";
const CONFIG_FILE_NAME: &str = "config.toml";
/// Upper bound for the expiry default: one century.
const MAX_DEFAULT_EXPIRY_DAYS: u32 = 36_500;

// ── Top-level config ──────────────────────────────────────────────

/// Top-level console configuration, loaded from `config.toml`.
///
/// Resolution order: `--config` flag → `PANELBOT_CONFIG` env → `~/.panelbot/config.toml`.
/// Environment overrides are applied after the file is parsed.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    /// Path to config.toml - computed, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Operator identities (chat user ids) allowed to use the console.
    /// Overridden by `PANELBOT_ADMIN_IDS` (comma separated).
    #[serde(default)]
    pub admin_ids: Vec<i64>,

    /// Panel API connection (`[backend]`).
    #[serde(default)]
    pub backend: BackendConfig,

    /// Chat platform credentials and polling (`[bot]`).
    #[serde(default)]
    pub bot: BotConfig,

    /// Rendering and form defaults (`[console]`).
    #[serde(default)]
    pub console: ConsoleConfig,

    /// Session lifetime (`[sessions]`).
    #[serde(default)]
    pub sessions: SessionConfig,
}

// ── Backend ──────────────────────────────────────────────────────

/// Panel API configuration (`[backend]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BackendConfig {
    /// Base URL of the panel, e.g. `"https://panel.example.com"`. Overridden by `PANELBOT_BACKEND_URL`.
    #[serde(default)]
    pub base_url: String,
    /// Bearer token for the panel API. Overridden by `PANELBOT_BACKEND_TOKEN`.
    pub api_token: Option<String>,
    /// Per-request timeout. Default: `30`.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// TCP connect timeout. Default: `10`.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Timeout for each reachability probe request. Default: `5`.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    /// Cheap read endpoints tried in order by the reachability probe; first success wins.
    #[serde(default = "default_probe_paths")]
    pub probe_paths: Vec<String>,
    /// Headers sent with every request (proxy identification for panels behind a reverse proxy).
    #[serde(default = "default_forwarded_headers")]
    pub forwarded_headers: BTreeMap<String, String>,
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_probe_timeout_secs() -> u64 {
    5
}

fn default_probe_paths() -> Vec<String> {
    vec![
        "/api/system/stats".into(),
        "/api/nodes".into(),
        "/api/users?size=1".into(),
    ]
}

fn default_forwarded_headers() -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    headers.insert("X-Forwarded-For".into(), "127.0.0.1".into());
    headers.insert("X-Forwarded-Proto".into(), "https".into());
    headers
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_token: None,
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            probe_paths: default_probe_paths(),
            forwarded_headers: default_forwarded_headers(),
        }
    }
}

// ── Bot ──────────────────────────────────────────────────────────

/// Chat platform configuration (`[bot]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BotConfig {
    /// Bot credential. Overridden by `PANELBOT_BOT_TOKEN`.
    pub token: Option<String>,
    /// Bot API base URL. Default: `"https://api.telegram.org"`.
    #[serde(default = "default_bot_api_url")]
    pub api_url: String,
    /// Long-poll timeout for `getUpdates`. Default: `30`.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

fn default_bot_api_url() -> String {
    "https://api.telegram.org".into()
}

fn default_poll_timeout_secs() -> u64 {
    30
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_url: default_bot_api_url(),
            poll_timeout_secs: default_poll_timeout_secs(),
        }
    }
}

// ── Console ──────────────────────────────────────────────────────

/// Rendering and form defaults (`[console]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConsoleConfig {
    /// Entities per list page. Default: `8`. Overridden by `PANELBOT_PAGE_SIZE`.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Max characters of an entity label on a list button. Default: `32`.
    #[serde(default = "default_label_max_chars")]
    pub label_max_chars: usize,
    /// Expiry offset injected when a new user's expiry is skipped. Default: `30`.
    #[serde(default = "default_expiry_days")]
    pub default_expiry_days: u32,
}

fn default_page_size() -> usize {
    8
}

fn default_label_max_chars() -> usize {
    32
}

fn default_expiry_days() -> u32 {
    30
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            label_max_chars: default_label_max_chars(),
            default_expiry_days: default_expiry_days(),
        }
    }
}

// ── Sessions ─────────────────────────────────────────────────────

/// Session lifetime configuration (`[sessions]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionConfig {
    /// Sessions idle longer than this are discarded. Default: `1800`.
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,
    /// How often the sweeper evicts idle sessions. Default: `60`.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_idle_ttl_secs() -> u64 {
    1800
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_ttl_secs: default_idle_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: PathBuf::new(),
            admin_ids: Vec::new(),
            backend: BackendConfig::default(),
            bot: BotConfig::default(),
            console: ConsoleConfig::default(),
            sessions: SessionConfig::default(),
        }
    }
}

fn default_config_path() -> Result<PathBuf> {
    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .context("Could not find home directory")?;
    Ok(home.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Resolve the config file location from the flag, the env var, or the home directory.
pub fn resolve_config_path(explicit: Option<&str>) -> Result<PathBuf> {
    let raw = explicit
        .map(ToString::to_string)
        .or_else(|| std::env::var("PANELBOT_CONFIG").ok())
        .filter(|value| !value.trim().is_empty());

    match raw {
        Some(value) => Ok(PathBuf::from(shellexpand::tilde(value.trim()).into_owned())),
        None => default_config_path(),
    }
}

fn parse_admin_ids(raw: &str) -> Result<Vec<i64>> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<i64>()
                .with_context(|| format!("invalid admin id: {part}"))
        })
        .collect()
}

impl Config {
    /// Load the config file (if present), apply env overrides, and validate.
    ///
    /// A missing file is not an error: every required value may come from the
    /// environment. Missing values after overrides are fatal.
    pub async fn load(explicit_path: Option<&str>) -> Result<Self> {
        let config_path = resolve_config_path(explicit_path)?;
        let mut config = Self::load_file(&config_path).await?;
        config.apply_env_overrides()?;
        config.validate()?;
        tracing::info!(
            path = %config.config_path.display(),
            admins = config.admin_ids.len(),
            backend = %config.backend.base_url,
            "Config loaded"
        );
        Ok(config)
    }

    /// Parse the file at `path` without overrides or validation.
    pub async fn load_file(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            // Warn if config file is world-readable (holds tokens)
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Ok(meta) = fs::metadata(path).await {
                    if meta.permissions().mode() & 0o004 != 0 {
                        tracing::warn!(
                            "Config file {:?} is world-readable (mode {:o}). \
                             Consider restricting with: chmod 600 {:?}",
                            path,
                            meta.permissions().mode() & 0o777,
                            path,
                        );
                    }
                }
            }

            let contents = fs::read_to_string(path)
                .await
                .context("Failed to read config file")?;
            toml::from_str::<Config>(&contents).context("Failed to parse config file")?
        } else {
            tracing::debug!(path = %path.display(), "config file not found; using defaults");
            Config::default()
        };
        config.config_path = path.to_path_buf();
        Ok(config)
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(ids) = std::env::var("PANELBOT_ADMIN_IDS") {
            if !ids.trim().is_empty() {
                self.admin_ids = parse_admin_ids(&ids).context("PANELBOT_ADMIN_IDS")?;
            }
        }

        if let Ok(url) = std::env::var("PANELBOT_BACKEND_URL") {
            if !url.trim().is_empty() {
                self.backend.base_url = url.trim().to_string();
            }
        }

        if let Ok(token) = std::env::var("PANELBOT_BACKEND_TOKEN") {
            if !token.trim().is_empty() {
                self.backend.api_token = Some(token.trim().to_string());
            }
        }

        if let Ok(token) = std::env::var("PANELBOT_BOT_TOKEN") {
            if !token.trim().is_empty() {
                self.bot.token = Some(token.trim().to_string());
            }
        }

        if let Ok(size) = std::env::var("PANELBOT_PAGE_SIZE") {
            if let Ok(size) = size.trim().parse::<usize>() {
                self.console.page_size = size;
            }
        }

        Ok(())
    }

    /// Startup validation. Every failure here is fatal.
    pub fn validate(&self) -> Result<()> {
        if self.admin_ids.is_empty() {
            anyhow::bail!("admin_ids must list at least one operator id");
        }

        // Backend
        let base_url = self.backend.base_url.trim();
        if base_url.is_empty() {
            anyhow::bail!("backend.base_url must not be empty");
        }
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            anyhow::bail!("backend.base_url must start with http:// or https://");
        }
        if self
            .backend
            .api_token
            .as_deref()
            .map_or(true, |token| token.trim().is_empty())
        {
            anyhow::bail!("backend.api_token must be set");
        }
        if self.backend.request_timeout_secs == 0 || self.backend.probe_timeout_secs == 0 {
            anyhow::bail!("backend timeouts must be greater than 0");
        }
        if self.backend.probe_paths.is_empty() {
            anyhow::bail!("backend.probe_paths must list at least one endpoint");
        }

        // Bot
        if self
            .bot
            .token
            .as_deref()
            .map_or(true, |token| token.trim().is_empty())
        {
            anyhow::bail!("bot.token must be set");
        }

        // Console
        if self.console.page_size == 0 {
            anyhow::bail!("console.page_size must be greater than 0");
        }
        if self.console.label_max_chars < 4 {
            anyhow::bail!("console.label_max_chars must be at least 4");
        }
        if self.console.default_expiry_days > MAX_DEFAULT_EXPIRY_DAYS {
            anyhow::bail!("console.default_expiry_days must be at most {MAX_DEFAULT_EXPIRY_DAYS}");
        }

        if self.sessions.idle_ttl_secs == 0 {
            anyhow::bail!("sessions.idle_ttl_secs must be greater than 0");
        }

        Ok(())
    }
}
