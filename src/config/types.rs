use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub intake: IntakeConfig,

    #[serde(default)]
    pub processing: ProcessingConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub delivery: DeliveryConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory holding the SQLite database (default: current directory)
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Require a bearer token on API requests
    #[serde(default)]
    pub enabled: bool,

    /// Bearer tokens and the caller identity each one authenticates
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenConfig {
    pub token: String,
    pub user_id: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: None,
            auth: AuthConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IntakeConfig {
    #[serde(default = "default_max_batch_files")]
    pub max_batch_files: usize,

    #[serde(default = "default_max_file_size_bytes")]
    pub max_file_size_bytes: u64,

    #[serde(default = "default_max_video_width")]
    pub max_video_width: u32,

    #[serde(default = "default_max_video_height")]
    pub max_video_height: u32,
}

fn default_max_batch_files() -> usize {
    10
}
fn default_max_file_size_bytes() -> u64 {
    200 * 1024 * 1024
}
fn default_max_video_width() -> u32 {
    1920
}
fn default_max_video_height() -> u32 {
    1080
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            max_batch_files: default_max_batch_files(),
            max_file_size_bytes: default_max_file_size_bytes(),
            max_video_width: default_max_video_width(),
            max_video_height: default_max_video_height(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessingConfig {
    /// Whether this host may transcode images and audio itself
    #[serde(default = "default_true")]
    pub local_transcode: bool,

    /// External transcoding tool, resolved on PATH
    #[serde(default = "default_tool")]
    pub tool: String,

    /// Maximum concurrent local jobs
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Bound on a local job, and on the wait for a remote callback
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// How often overdue remote jobs are swept
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(default)]
    pub remote: RemoteConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RemoteConfig {
    /// Job submission endpoint; remote delegation is configured iff set
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Shared secret for HMAC-SHA256 callback signatures
    #[serde(default)]
    pub callback_secret: Option<String>,
}

impl RemoteConfig {
    pub fn is_configured(&self) -> bool {
        self.url.as_deref().is_some_and(|url| !url.is_empty())
    }
}

fn default_true() -> bool {
    true
}
fn default_tool() -> String {
    "ffmpeg".to_string()
}
fn default_workers() -> usize {
    num_cpus::get().max(1)
}
fn default_timeout_secs() -> u64 {
    600
}
fn default_sweep_interval_secs() -> u64 {
    30
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            local_transcode: true,
            tool: default_tool(),
            workers: default_workers(),
            timeout_secs: default_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            remote: RemoteConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Directory holding stored objects
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,

    /// Base URL signed links are minted under
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// HMAC key for signed links (generate with `mediagate generate-secret`)
    #[serde(default)]
    pub signing_secret: String,

    #[serde(default = "default_url_ttl_secs")]
    pub url_ttl_secs: u64,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./storage")
}
fn default_public_base_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_url_ttl_secs() -> u64 {
    3600
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            public_base_url: default_public_base_url(),
            signing_secret: String::new(),
            url_ttl_secs: default_url_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_cache_max_age_secs")]
    pub cache_max_age_secs: u64,

    #[serde(default = "default_quality")]
    pub default_quality: u8,

    #[serde(default)]
    pub authorization: AuthorizationConfig,
}

fn default_cache_max_age_secs() -> u64 {
    300
}
fn default_quality() -> u8 {
    75
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            cache_max_age_secs: default_cache_max_age_secs(),
            default_quality: default_quality(),
            authorization: AuthorizationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationMode {
    /// Callers may read objects under their own prefix and under `public/`
    #[default]
    Owner,
    /// Ask an external decision service
    Http,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthorizationConfig {
    #[serde(default)]
    pub mode: AuthorizationMode,

    /// Decision endpoint for `http` mode
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,
}
