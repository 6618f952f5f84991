//! Configuration management using the prefer crate.
//!
//! A `Config` is what the file says; `Settings` is the resolved value built
//! once at startup and handed to every command.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::queue::QueueOptions;
use crate::repository::util::is_postgres_url;
use crate::repository::{DbContext, DbError};

/// Default database filename.
const DEFAULT_DATABASE_FILENAME: &str = "filingtext.db";

/// Default object store subdirectory name.
const OBJECTS_SUBDIR: &str = "objects";

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database filename.
    pub database_filename: String,
    /// Database URL (overrides data_dir/database_filename if set).
    pub database_url: Option<String>,
    /// Queue broker URL (None = local DB, "amqp://..." = RabbitMQ).
    pub broker_url: Option<String>,
    /// Region label of the hosted infrastructure, informational only.
    pub region: Option<String>,
    /// Queue carrying work messages to extraction workers.
    pub work_queue: String,
    /// Queue carrying result messages to the collector.
    pub results_queue: String,
    /// Bucket holding text artifacts and metadata objects.
    pub text_bucket: String,
    /// Bucket holding page images (None = text bucket).
    pub image_bucket: Option<String>,
    /// Root directory of the filesystem object store.
    pub object_store_dir: PathBuf,
    /// Extraction tool, a path or a name looked up on PATH.
    pub extract_tool: String,
    /// Kill the extraction tool after this many seconds.
    pub tool_timeout_secs: Option<u64>,
    /// Queued documents untouched for this long are requeued.
    pub stale_after_hours: u64,
    /// Collector wait before its final poll.
    pub collect_idle_wait_secs: u64,
    /// Long-poll duration of a queue receive.
    pub receive_wait_secs: u64,
    /// How long a received message stays hidden.
    pub visibility_timeout_secs: u64,
    /// Queue message retention.
    pub message_retention_days: u64,
    /// Inline object metadata ceiling in bytes.
    pub max_metadata_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        // Falls back gracefully: data dir -> home dir -> current dir
        let data_dir = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("filingtext");

        Self {
            object_store_dir: data_dir.join(OBJECTS_SUBDIR),
            data_dir,
            database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
            database_url: None,
            broker_url: None, // Local DB by default
            region: None,
            work_queue: "filingtext-work".to_string(),
            results_queue: "filingtext-results".to_string(),
            text_bucket: "filingtext-text".to_string(),
            image_bucket: None,
            extract_tool: "filingtext-extract".to_string(),
            tool_timeout_secs: None,
            stale_after_hours: 24,
            collect_idle_wait_secs: 20,
            receive_wait_secs: 20,
            visibility_timeout_secs: 300,
            message_retention_days: 4,
            max_metadata_bytes: crate::storage::DEFAULT_MAX_METADATA_BYTES,
        }
    }
}

impl Settings {
    /// Create settings with a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            object_store_dir: data_dir.join(OBJECTS_SUBDIR),
            data_dir,
            ..Default::default()
        }
    }

    /// Get the database URL, constructing from path if not explicitly set.
    pub fn database_url(&self) -> String {
        if let Some(ref url) = self.database_url {
            url.clone()
        } else {
            format!("sqlite:{}", self.database_path().display())
        }
    }

    /// Check if using PostgreSQL (vs SQLite).
    pub fn is_postgres(&self) -> bool {
        self.database_url
            .as_ref()
            .is_some_and(|url| is_postgres_url(url))
    }

    /// Get the full path to the database (for SQLite file-based databases).
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    pub fn image_bucket(&self) -> &str {
        self.image_bucket.as_deref().unwrap_or(&self.text_bucket)
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::hours(self.stale_after_hours as i64)
    }

    pub fn collect_idle_wait(&self) -> Duration {
        Duration::from_secs(self.collect_idle_wait_secs)
    }

    pub fn tool_timeout(&self) -> Option<Duration> {
        self.tool_timeout_secs.map(Duration::from_secs)
    }

    pub fn queue_options(&self) -> QueueOptions {
        QueueOptions {
            receive_wait: Duration::from_secs(self.receive_wait_secs),
            visibility_timeout: Duration::from_secs(self.visibility_timeout_secs),
            retention: Duration::from_secs(self.message_retention_days * 24 * 3600),
        }
    }

    /// Ensure the data and object store directories exist.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(&self.object_store_dir)?;
        Ok(())
    }

    /// Create a database context.
    pub fn create_db_context(&self) -> Result<DbContext, DbError> {
        DbContext::from_url(&self.database_url())
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, prefer::FromValue)]
pub struct Config {
    /// Data directory path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Database filename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Database URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    /// Queue broker URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_queue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results_queue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_bucket: Option<String>,
    /// Object store root directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_store_dir: Option<String>,
    /// Extraction tool path or name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract_tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_after_hours: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collect_idle_wait_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receive_wait_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_retention_days: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_metadata_bytes: Option<usize>,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    #[prefer(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer crate for discovery.
    pub async fn load() -> Self {
        match prefer::load("filingtext").await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => Self::load_from_path(path).await.unwrap_or_else(|e| {
                    tracing::warn!("{}", e);
                    Self::default()
                }),
                None => Self::default(),
            },
            // No config file found
            Err(_) => Self::default(),
        }
    }

    /// Load configuration from a specific file path.
    /// Supports JSON, TOML and YAML based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

        let mut config = Self::parse(&contents, path)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    fn parse(contents: &str, path: &Path) -> Result<Self, String> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        match ext {
            "toml" => {
                toml::from_str(contents).map_err(|e| format!("Failed to parse TOML config: {}", e))
            }
            "yaml" | "yml" => serde_yaml::from_str(contents)
                .map_err(|e| format!("Failed to parse YAML config: {}", e)),
            _ => serde_json::from_str(contents)
                .map_err(|e| format!("Failed to parse JSON config: {}", e)),
        }
    }

    /// Get the base directory for resolving relative paths.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            settings.data_dir = self.resolve_path(data_dir, base_dir);
            settings.object_store_dir = settings.data_dir.join(OBJECTS_SUBDIR);
        }
        if let Some(ref dir) = self.object_store_dir {
            settings.object_store_dir = self.resolve_path(dir, base_dir);
        }
        if let Some(ref database) = self.database {
            settings.database_filename = database.clone();
        }
        if let Some(ref url) = self.database_url {
            settings.database_url = Some(url.clone());
        }
        if let Some(ref broker) = self.broker_url {
            settings.broker_url = Some(broker.clone());
        }
        if let Some(ref region) = self.region {
            settings.region = Some(region.clone());
        }
        if let Some(ref name) = self.work_queue {
            settings.work_queue = name.clone();
        }
        if let Some(ref name) = self.results_queue {
            settings.results_queue = name.clone();
        }
        if let Some(ref name) = self.text_bucket {
            settings.text_bucket = name.clone();
        }
        if let Some(ref name) = self.image_bucket {
            settings.image_bucket = Some(name.clone());
        }
        if let Some(ref tool) = self.extract_tool {
            // Bare names are looked up on PATH later; only paths get resolved
            settings.extract_tool = if tool.contains('/') || tool.starts_with('~') {
                self.resolve_path(tool, base_dir).display().to_string()
            } else {
                tool.clone()
            };
        }
        if let Some(secs) = self.tool_timeout_secs {
            settings.tool_timeout_secs = Some(secs);
        }
        if let Some(hours) = self.stale_after_hours {
            settings.stale_after_hours = hours;
        }
        if let Some(secs) = self.collect_idle_wait_secs {
            settings.collect_idle_wait_secs = secs;
        }
        if let Some(secs) = self.receive_wait_secs {
            settings.receive_wait_secs = secs;
        }
        if let Some(secs) = self.visibility_timeout_secs {
            settings.visibility_timeout_secs = secs;
        }
        if let Some(days) = self.message_retention_days {
            settings.message_retention_days = days;
        }
        if let Some(bytes) = self.max_metadata_bytes {
            settings.max_metadata_bytes = bytes;
        }
    }
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides auto-discovery).
    pub config_path: Option<PathBuf>,
    /// Use CWD for relative paths instead of config file directory.
    pub use_cwd: bool,
    /// Data directory (--data flag).
    pub data: Option<PathBuf>,
}

fn env_override(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

/// Load settings with explicit options.
/// Returns (Settings, Config) tuple.
pub async fn load_settings_with_options(options: LoadOptions) -> Result<(Settings, Config), String> {
    let config = match options.config_path {
        Some(ref path) => Config::load_from_path(path).await?,
        None => Config::load().await,
    };

    let mut settings = Settings::default();

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let base_dir = if options.use_cwd {
        cwd.clone()
    } else {
        config.base_dir().unwrap_or_else(|| cwd.clone())
    };

    config.apply_to_settings(&mut settings, &base_dir);

    // --data override takes precedence over the config file
    if let Some(ref data) = options.data {
        let data_dir = if data.is_absolute() {
            data.clone()
        } else {
            cwd.join(data)
        };
        if config.object_store_dir.is_none() {
            settings.object_store_dir = data_dir.join(OBJECTS_SUBDIR);
        }
        settings.data_dir = data_dir;
    }

    // Environment variables take highest precedence
    if let Some(url) = env_override("DATABASE_URL") {
        tracing::debug!("Using DATABASE_URL from environment: {}", url);
        settings.database_url = Some(url);
    }
    if let Some(broker) = env_override("BROKER_URL") {
        tracing::debug!("Using BROKER_URL from environment: {}", broker);
        settings.broker_url = Some(broker);
    }
    if let Some(tool) = env_override("FILINGTEXT_EXTRACT_TOOL") {
        tracing::debug!("Using FILINGTEXT_EXTRACT_TOOL from environment: {}", tool);
        settings.extract_tool = tool;
    }

    Ok((settings, config))
}
