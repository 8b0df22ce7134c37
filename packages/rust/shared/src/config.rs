//! Application configuration for lawledger.
//!
//! User config lives at `~/.lawledger/lawledger.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LawLedgerError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "lawledger.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".lawledger";

// ---------------------------------------------------------------------------
// Config structs (matching lawledger.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Output tree and ledger location.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Remote catalog endpoints.
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Per-request timeouts and retry policy.
    #[serde(default)]
    pub http: HttpConfig,

    /// Rate limiting and anti-bot cooldowns.
    #[serde(default)]
    pub throttle: ThrottleConfig,

    /// Worker pool ceilings.
    #[serde(default)]
    pub workers: WorkersConfig,

    /// Anti-automation cookie handshake.
    #[serde(default)]
    pub session: SessionConfig,

    /// Discovery pagination behaviour.
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Full-workflow batch limits.
    #[serde(default)]
    pub workflow: WorkflowConfig,
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of the classified document tree.
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Ledger database file.
    #[serde(default = "default_database")]
    pub database: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            database: default_database(),
        }
    }
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("laws")
}
fn default_database() -> PathBuf {
    PathBuf::from("laws").join("ledger.db")
}

/// `[remote]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Scheme + host of the catalog service.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Listing endpoint (POST).
    #[serde(default = "default_listing_path")]
    pub listing_path: String,

    /// Resolve-download endpoint (GET).
    #[serde(default = "default_download_path")]
    pub download_path: String,

    /// Page opened by the browser to obtain session cookies.
    #[serde(default = "default_handshake_path")]
    pub handshake_path: String,

    /// Items per listing page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            listing_path: default_listing_path(),
            download_path: default_download_path(),
            handshake_path: default_handshake_path(),
            page_size: default_page_size(),
        }
    }
}

impl RemoteConfig {
    /// Join an endpoint path onto the base URL.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

fn default_base_url() -> String {
    "https://flk.npc.gov.cn".into()
}
fn default_listing_path() -> String {
    "/law-search/search/list".into()
}
fn default_download_path() -> String {
    "/law-search/download/pc".into()
}
fn default_handshake_path() -> String {
    "/search".into()
}
fn default_page_size() -> u32 {
    10
}

/// `[http]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Attempt ceiling for the retrying executor.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Status codes treated as transient.
    #[serde(default = "default_retry_statuses")]
    pub retry_statuses: Vec<u16>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            retry_statuses: default_retry_statuses(),
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    3050
}
fn default_read_timeout_ms() -> u64 {
    10_000
}
fn default_max_attempts() -> u32 {
    6
}
fn default_backoff_base_ms() -> u64 {
    750
}
fn default_backoff_max_ms() -> u64 {
    30_000
}
fn default_retry_statuses() -> Vec<u16> {
    vec![429, 500, 502, 503, 504]
}

/// `[throttle]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Delay after each successful request, divided across pool workers.
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    /// Base cooldown after an anti-bot challenge; multiplied by attempt + 1.
    #[serde(default = "default_anti_bot_cooldown_ms")]
    pub anti_bot_cooldown_ms: u64,

    /// Attempts per page / item when challenged.
    #[serde(default = "default_anti_bot_attempts")]
    pub anti_bot_attempts: u32,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            request_delay_ms: default_request_delay_ms(),
            anti_bot_cooldown_ms: default_anti_bot_cooldown_ms(),
            anti_bot_attempts: default_anti_bot_attempts(),
        }
    }
}

impl ThrottleConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    /// Cooldown before retrying after the `attempt`-th (0-based) challenge.
    pub fn anti_bot_cooldown(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.anti_bot_cooldown_ms.saturating_mul(u64::from(attempt) + 1))
    }
}

fn default_request_delay_ms() -> u64 {
    5000
}
fn default_anti_bot_cooldown_ms() -> u64 {
    30_000
}
fn default_anti_bot_attempts() -> u32 {
    3
}

/// `[workers]` section: hard ceilings for each pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(default = "default_crawl_workers")]
    pub crawl: usize,
    #[serde(default = "default_download_workers")]
    pub download: usize,
    #[serde(default = "default_parse_workers")]
    pub parse: usize,
    /// Top-level fan-out across categories.
    #[serde(default = "default_category_workers")]
    pub categories: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            crawl: default_crawl_workers(),
            download: default_download_workers(),
            parse: default_parse_workers(),
            categories: default_category_workers(),
        }
    }
}

fn default_crawl_workers() -> usize {
    8
}
fn default_download_workers() -> usize {
    6
}
fn default_parse_workers() -> usize {
    10
}
fn default_category_workers() -> usize {
    2
}

/// `[session]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Launch a headless browser to obtain anti-automation cookies.
    #[serde(default = "default_true")]
    pub browser_handshake: bool,

    /// Cookie names kept from the handshake.
    #[serde(default = "default_required_cookies")]
    pub required_cookies: Vec<String>,

    /// Time to let the challenge script run before reading cookies.
    #[serde(default = "default_handshake_wait_ms")]
    pub handshake_wait_ms: u64,

    /// Explicit Chromium binary; autodetected when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_executable: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            browser_handshake: true,
            required_cookies: default_required_cookies(),
            handshake_wait_ms: default_handshake_wait_ms(),
            browser_executable: None,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_required_cookies() -> Vec<String> {
    vec!["_yfx_session".into(), "wzws_sessionid".into()]
}
fn default_handshake_wait_ms() -> u64 {
    2000
}

/// `[discovery]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Treat a title match as "already known".
    #[serde(default = "default_true")]
    pub title_check: bool,

    /// Stop paginating after the first page with zero new items.
    #[serde(default = "default_true")]
    pub stop_on_known_page: bool,

    /// Hard page limit; 0 means unbounded.
    #[serde(default)]
    pub max_pages: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            title_check: true,
            stop_on_known_page: true,
            max_pages: 0,
        }
    }
}

/// `[workflow]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Pending existing rows downloaded per category during the full workflow.
    #[serde(default = "default_existing_batch_limit")]
    pub existing_batch_limit: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            existing_batch_limit: default_existing_batch_limit(),
        }
    }
}

fn default_existing_batch_limit() -> usize {
    100
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.lawledger/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| LawLedgerError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.lawledger/lawledger.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| LawLedgerError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        LawLedgerError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| LawLedgerError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| LawLedgerError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| LawLedgerError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Reject values that would stall every pool or request.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.remote.page_size == 0 {
        return Err(LawLedgerError::config("remote.page_size must be positive"));
    }
    if config.http.max_attempts == 0 {
        return Err(LawLedgerError::config("http.max_attempts must be positive"));
    }
    if config.throttle.anti_bot_attempts == 0 {
        return Err(LawLedgerError::config(
            "throttle.anti_bot_attempts must be positive",
        ));
    }
    let w = &config.workers;
    if w.crawl == 0 || w.download == 0 || w.parse == 0 || w.categories == 0 {
        return Err(LawLedgerError::config("worker ceilings must be positive"));
    }
    Ok(())
}
