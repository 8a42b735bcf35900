use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_DIR_NAME: &str = ".llamarelay";
const CONFIG_FILE_NAME: &str = "config.toml";
const DEFAULT_MODES_FILE: &str = "chat_modes.yml";
const DEFAULT_DB_FILE: &str = "transcripts.db";

// ── Top-level config ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Workspace directory - computed from home, not serialized
    #[serde(skip)]
    pub workspace_dir: PathBuf,
    /// Path to config.toml - computed from home, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub ollama: OllamaConfig,

    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub menus: MenuConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    /// YAML mode catalog. Falls back to `<workspace>/chat_modes.yml`, then the
    /// built-in catalog.
    #[serde(default)]
    pub modes_path: Option<PathBuf>,
}

// ── Telegram ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Telegram usernames or numeric user ids. Empty = deny all, "*" = allow all
    #[serde(default = "default_allowed_users")]
    pub allowed_users: Vec<String>,
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,
    /// Long-poll timeout passed to `getUpdates`.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    /// Bounded total timeout for every Bot API call.
    #[serde(default = "default_telegram_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_allowed_users() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_poll_timeout_secs() -> u64 {
    30
}

fn default_telegram_request_timeout_secs() -> u64 {
    45
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            allowed_users: default_allowed_users(),
            api_base: default_telegram_api_base(),
            poll_timeout_secs: default_poll_timeout_secs(),
            request_timeout_secs: default_telegram_request_timeout_secs(),
        }
    }
}

// ── Ollama ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,
    /// Model used until a user picks one in /settings.
    #[serde(default = "default_ollama_model")]
    pub default_model: String,
    /// Bounded total timeout for one generation request, body included.
    #[serde(default = "default_ollama_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_ollama_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub temperature: Option<f64>,
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.2".to_string()
}

fn default_ollama_request_timeout_secs() -> u64 {
    300
}

fn default_ollama_connect_timeout_secs() -> u64 {
    10
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            default_model: default_ollama_model(),
            request_timeout_secs: default_ollama_request_timeout_secs(),
            connect_timeout_secs: default_ollama_connect_timeout_secs(),
            temperature: None,
        }
    }
}

// ── Relay ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Minimum number of new characters before an interim edit.
    #[serde(default = "default_buffer_threshold")]
    pub buffer_threshold: usize,
    /// Minimum spacing between interim edits of the same message.
    #[serde(default = "default_min_edit_interval_ms")]
    pub min_edit_interval_ms: u64,
    /// Longest wait for the next fragment before the turn fails.
    #[serde(default = "default_stream_idle_timeout_secs")]
    pub stream_idle_timeout_secs: u64,
    /// Prior message pairs replayed to the model as context.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
    /// Rate-limited attempts allowed for the final edit of a turn.
    #[serde(default = "default_max_flush_attempts")]
    pub max_flush_attempts: u32,
    /// Longest platform `retry_after` waited out inline; longer waits defer the edit.
    #[serde(default = "default_max_retry_after_secs")]
    pub max_retry_after_secs: u64,
    /// Visible length of one message, in UTF-16 code units. Longer replies continue
    /// in follow-up messages.
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,
    #[serde(default = "default_placeholder_text")]
    pub placeholder_text: String,
    #[serde(default = "default_apology_text")]
    pub apology_text: String,
    #[serde(default = "default_empty_response_text")]
    pub empty_response_text: String,
    /// Mode given to conversations created implicitly by a first message.
    #[serde(default = "default_mode")]
    pub default_mode: String,
}

fn default_buffer_threshold() -> usize {
    50
}

fn default_min_edit_interval_ms() -> u64 {
    1_000
}

fn default_stream_idle_timeout_secs() -> u64 {
    120
}

fn default_history_turns() -> usize {
    6
}

fn default_max_flush_attempts() -> u32 {
    3
}

fn default_max_retry_after_secs() -> u64 {
    30
}

fn default_max_message_len() -> usize {
    4_096
}

fn default_placeholder_text() -> String {
    "Processing...".to_string()
}

fn default_apology_text() -> String {
    "Something went wrong while processing your request.".to_string()
}

fn default_empty_response_text() -> String {
    "(the model returned an empty response)".to_string()
}

fn default_mode() -> String {
    "assistant".to_string()
}

impl RelayConfig {
    pub fn min_edit_interval(&self) -> Duration {
        Duration::from_millis(self.min_edit_interval_ms)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs.max(1))
    }

    pub fn max_retry_after(&self) -> Duration {
        Duration::from_secs(self.max_retry_after_secs)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            buffer_threshold: default_buffer_threshold(),
            min_edit_interval_ms: default_min_edit_interval_ms(),
            stream_idle_timeout_secs: default_stream_idle_timeout_secs(),
            history_turns: default_history_turns(),
            max_flush_attempts: default_max_flush_attempts(),
            max_retry_after_secs: default_max_retry_after_secs(),
            max_message_len: default_max_message_len(),
            placeholder_text: default_placeholder_text(),
            apology_text: default_apology_text(),
            empty_response_text: default_empty_response_text(),
            default_mode: default_mode(),
        }
    }
}

// ── Menus ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuConfig {
    #[serde(default = "default_settings_timeout_secs")]
    pub settings_timeout_secs: u64,
    #[serde(default = "default_mode_timeout_secs")]
    pub mode_timeout_secs: u64,
    #[serde(default = "default_modes_per_page")]
    pub modes_per_page: usize,
}

fn default_settings_timeout_secs() -> u64 {
    15
}

fn default_mode_timeout_secs() -> u64 {
    10
}

fn default_modes_per_page() -> usize {
    5
}

impl MenuConfig {
    pub fn settings_timeout(&self) -> Duration {
        Duration::from_secs(self.settings_timeout_secs)
    }

    pub fn mode_timeout(&self) -> Duration {
        Duration::from_secs(self.mode_timeout_secs)
    }
}

impl Default for MenuConfig {
    fn default() -> Self {
        Self {
            settings_timeout_secs: default_settings_timeout_secs(),
            mode_timeout_secs: default_mode_timeout_secs(),
            modes_per_page: default_modes_per_page(),
        }
    }
}

// ── Storage ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// "sqlite" | "memory"
    #[serde(default = "default_storage_backend")]
    pub backend: String,
    /// Defaults to `<workspace>/transcripts.db`.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

fn default_storage_backend() -> String {
    "sqlite".to_string()
}

impl StorageConfig {
    pub fn resolved_db_path(&self, workspace_dir: &Path) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| workspace_dir.join(DEFAULT_DB_FILE))
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            db_path: None,
        }
    }
}

// ── Config impl ──────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        let home =
            UserDirs::new().map_or_else(|| PathBuf::from("."), |u| u.home_dir().to_path_buf());
        let relay_dir = home.join(CONFIG_DIR_NAME);

        Self {
            workspace_dir: relay_dir.join("workspace"),
            config_path: relay_dir.join(CONFIG_FILE_NAME),
            telegram: TelegramConfig::default(),
            ollama: OllamaConfig::default(),
            relay: RelayConfig::default(),
            menus: MenuConfig::default(),
            storage: StorageConfig::default(),
            modes_path: None,
        }
    }
}

impl Config {
    pub fn load_or_init() -> Result<Self> {
        let home = UserDirs::new()
            .map(|u| u.home_dir().to_path_buf())
            .context("Could not find home directory")?;
        let mut config = Self::load_or_init_in(&home.join(CONFIG_DIR_NAME))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load `config.toml` from `dir`, writing a default one first if it is missing.
    pub fn load_or_init_in(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE_NAME);
        let workspace_dir = dir.join("workspace");

        if !workspace_dir.exists() {
            fs::create_dir_all(&workspace_dir).with_context(|| {
                format!(
                    "Failed to create workspace directory: {}",
                    workspace_dir.display()
                )
            })?;
        }

        if config_path.exists() {
            let contents =
                fs::read_to_string(&config_path).context("Failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            config.config_path = config_path;
            config.workspace_dir = workspace_dir;
            Ok(config)
        } else {
            let config = Config {
                config_path,
                workspace_dir,
                ..Config::default()
            };
            config.save()?;
            Ok(config)
        }
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        // Bot token: LLAMARELAY_BOT_TOKEN or BOT_TOKEN
        if let Some(token) = env_non_empty("LLAMARELAY_BOT_TOKEN").or_else(|| env_non_empty("BOT_TOKEN"))
        {
            self.telegram.bot_token = token;
        }

        // Endpoint: LLAMARELAY_OLLAMA_URL or OLLAMA_BASE_URL
        if let Some(url) =
            env_non_empty("LLAMARELAY_OLLAMA_URL").or_else(|| env_non_empty("OLLAMA_BASE_URL"))
        {
            self.ollama.base_url = normalize_base_url(&url);
        }

        // Model: LLAMARELAY_MODEL or OLLAMA_DEFAULT_MODEL
        if let Some(model) =
            env_non_empty("LLAMARELAY_MODEL").or_else(|| env_non_empty("OLLAMA_DEFAULT_MODEL"))
        {
            self.ollama.default_model = model;
        }

        if let Some(workspace) = env_non_empty("LLAMARELAY_WORKSPACE") {
            self.workspace_dir = PathBuf::from(workspace);
        }

        if let Some(db_path) = env_non_empty("LLAMARELAY_DB_PATH") {
            self.storage.db_path = Some(PathBuf::from(db_path));
        }
    }

    /// Mode catalog file to load, if any exists.
    pub fn resolved_modes_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.modes_path {
            return Some(path.clone());
        }
        let candidate = self.workspace_dir.join(DEFAULT_MODES_FILE);
        candidate.exists().then_some(candidate)
    }

    pub fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;

        let parent_dir = self
            .config_path
            .parent()
            .context("Config path must have a parent directory")?;
        fs::create_dir_all(parent_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                parent_dir.display()
            )
        })?;

        let file_name = self
            .config_path
            .file_name()
            .and_then(|v| v.to_str())
            .unwrap_or(CONFIG_FILE_NAME);
        let temp_path = parent_dir.join(format!(".{file_name}.tmp-{}", uuid::Uuid::new_v4()));
        let backup_path = parent_dir.join(format!("{file_name}.bak"));

        let mut temp_file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .with_context(|| {
                format!(
                    "Failed to create temporary config file: {}",
                    temp_path.display()
                )
            })?;
        temp_file
            .write_all(toml_str.as_bytes())
            .context("Failed to write temporary config contents")?;
        temp_file
            .sync_all()
            .context("Failed to fsync temporary config file")?;
        drop(temp_file);

        let had_existing_config = self.config_path.exists();
        if had_existing_config {
            fs::copy(&self.config_path, &backup_path).with_context(|| {
                format!(
                    "Failed to create config backup before atomic replace: {}",
                    backup_path.display()
                )
            })?;
        }

        if let Err(e) = fs::rename(&temp_path, &self.config_path) {
            let _ = fs::remove_file(&temp_path);
            if had_existing_config && backup_path.exists() {
                let _ = fs::copy(&backup_path, &self.config_path);
            }
            anyhow::bail!("Failed to atomically replace config file: {e}");
        }

        sync_directory(parent_dir)?;

        if had_existing_config {
            let _ = fs::remove_file(&backup_path);
        }

        Ok(())
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Accept bare hosts (`OLLAMA_BASE_URL=gpu-box`) as well as full URLs.
pub fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else if trimmed.contains(':') {
        format!("http://{trimmed}")
    } else {
        format!("http://{trimmed}:11434")
    }
}

#[cfg(unix)]
fn sync_directory(path: &Path) -> Result<()> {
    let dir = File::open(path)
        .with_context(|| format!("Failed to open directory for fsync: {}", path.display()))?;
    dir.sync_all()
        .with_context(|| format!("Failed to fsync directory metadata: {}", path.display()))?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_path: &Path) -> Result<()> {
    Ok(())
}
