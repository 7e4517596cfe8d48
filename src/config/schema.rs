use crate::channels::outbound::DEFAULT_MAX_LINE_LEN;
use crate::prompt::{DEFAULT_ASK_TEMPLATE, DEFAULT_CODE_TEMPLATE, QUERY_PLACEHOLDER};
use anyhow::{Context, Result, bail};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

// ── Top-level config ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to config.toml - computed, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,
    /// Bearer token for the completion API. Prefer the environment.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub irc: IrcConfig,

    #[serde(default)]
    pub limits: RateLimitConfig,

    #[serde(default)]
    pub prompts: PromptConfig,
}

// ── Completion provider ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API root; `/v1/chat/completions` is appended
    #[serde(default = "default_provider_base_url")]
    pub base_url: String,
    #[serde(default = "default_provider_model")]
    pub model: String,
    #[serde(default = "default_provider_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_provider_temperature")]
    pub temperature: f64,
    /// Upper bound for one completion call; exceeding it is a failure
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_provider_base_url() -> String {
    "https://api.mistral.ai".into()
}

fn default_provider_model() -> String {
    "mistral-tiny".into()
}

fn default_provider_max_tokens() -> u32 {
    300
}

fn default_provider_temperature() -> f64 {
    0.7
}

fn default_provider_timeout_secs() -> u64 {
    30
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_base_url(),
            model: default_provider_model(),
            max_tokens: default_provider_max_tokens(),
            temperature: default_provider_temperature(),
            timeout_secs: default_provider_timeout_secs(),
        }
    }
}

// ── IRC ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrcConfig {
    /// IRC server hostname
    #[serde(default = "default_irc_server")]
    pub server: String,
    /// IRC server port (default: 6697 for TLS)
    #[serde(default = "default_irc_port")]
    pub port: u16,
    /// Bot nickname
    #[serde(default = "default_irc_nickname")]
    pub nickname: String,
    /// Username (defaults to nickname if not set)
    #[serde(default)]
    pub username: Option<String>,
    /// Real name sent with USER
    #[serde(default = "default_irc_realname")]
    pub realname: String,
    /// Channels to join on connect
    #[serde(default = "default_irc_channels")]
    pub channels: Vec<String>,
    /// Server password (for bouncers like ZNC)
    #[serde(default)]
    pub server_password: Option<String>,
    /// NickServ IDENTIFY password
    #[serde(default)]
    pub nickserv_password: Option<String>,
    /// Verify the server's TLS certificate. Only disable for test networks.
    #[serde(default = "default_true")]
    pub verify_tls: bool,
    /// Pause between consecutive JOINs
    #[serde(default = "default_irc_join_delay_ms")]
    pub join_delay_ms: u64,
    /// Minimum spacing between outbound chat messages
    #[serde(default = "default_irc_send_delay_ms")]
    pub send_delay_ms: u64,
    /// Fixed wait before reconnecting after any disconnect
    #[serde(default = "default_irc_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    /// Ceiling for one outbound chat payload, prefix included
    #[serde(default = "default_irc_max_line_len")]
    pub max_line_len: usize,
}

fn default_irc_server() -> String {
    "irc.example.com".into()
}

fn default_irc_port() -> u16 {
    6697
}

fn default_irc_nickname() -> String {
    "ircbot".into()
}

fn default_irc_realname() -> String {
    "ircbot AI assistant".into()
}

fn default_irc_channels() -> Vec<String> {
    vec!["#help".into(), "#welcome".into()]
}

fn default_true() -> bool {
    true
}

fn default_irc_join_delay_ms() -> u64 {
    1000
}

fn default_irc_send_delay_ms() -> u64 {
    500
}

fn default_irc_reconnect_delay_secs() -> u64 {
    30
}

fn default_irc_max_line_len() -> usize {
    DEFAULT_MAX_LINE_LEN
}

impl Default for IrcConfig {
    fn default() -> Self {
        Self {
            server: default_irc_server(),
            port: default_irc_port(),
            nickname: default_irc_nickname(),
            username: None,
            realname: default_irc_realname(),
            channels: default_irc_channels(),
            server_password: None,
            nickserv_password: None,
            verify_tls: true,
            join_delay_ms: default_irc_join_delay_ms(),
            send_delay_ms: default_irc_send_delay_ms(),
            reconnect_delay_secs: default_irc_reconnect_delay_secs(),
            max_line_len: default_irc_max_line_len(),
        }
    }
}

impl IrcConfig {
    pub fn effective_username(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.nickname)
    }
}

// ── Rate limits ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Completion calls allowed across all users per minute
    #[serde(default = "default_limits_per_minute")]
    pub per_minute: usize,
    /// Completion calls allowed across all users per day
    #[serde(default = "default_limits_per_day")]
    pub per_day: usize,
    /// Completion calls allowed per nickname per day
    #[serde(default = "default_limits_per_identity_daily")]
    pub per_identity_daily: usize,
}

fn default_limits_per_minute() -> usize {
    10
}

fn default_limits_per_day() -> usize {
    1000
}

fn default_limits_per_identity_daily() -> usize {
    50
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: default_limits_per_minute(),
            per_day: default_limits_per_day(),
            per_identity_daily: default_limits_per_identity_daily(),
        }
    }
}

// ── Prompt templates ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    /// Template for `!ask`; `{query}` is replaced with the user's text
    #[serde(default = "default_ask_template")]
    pub ask: String,
    /// Template for `!code`; should ask for an explanation, then `CODE:`
    #[serde(default = "default_code_template")]
    pub code: String,
}

fn default_ask_template() -> String {
    DEFAULT_ASK_TEMPLATE.into()
}

fn default_code_template() -> String {
    DEFAULT_CODE_TEMPLATE.into()
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            ask: default_ask_template(),
            code: default_code_template(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: default_config_dir().join("config.toml"),
            api_key: None,
            provider: ProviderConfig::default(),
            irc: IrcConfig::default(),
            limits: RateLimitConfig::default(),
            prompts: PromptConfig::default(),
        }
    }
}

fn default_config_dir() -> PathBuf {
    let home =
        UserDirs::new().map_or_else(|| PathBuf::from("."), |u| u.home_dir().to_path_buf());
    home.join(".ircbot")
}

impl Config {
    /// Load `~/.ircbot/config.toml`, writing a default one first if missing.
    pub fn load_or_init() -> Result<Self> {
        let home = UserDirs::new()
            .map(|u| u.home_dir().to_path_buf())
            .context("Could not find home directory")?;
        let config_path = home.join(".ircbot").join("config.toml");

        if config_path.exists() {
            return Self::load_from(&config_path);
        }

        let mut config = Config {
            config_path,
            ..Config::default()
        };
        config.save()?;
        tracing::info!("Wrote default config to {}", config.config_path.display());
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load an explicit config file. The file must exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.config_path = path.to_path_buf();
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        // API Key: IRCBOT_API_KEY, MISTRAL_API_KEY or API_KEY (generic)
        if let Some(key) = non_empty("IRCBOT_API_KEY")
            .or_else(|| non_empty("MISTRAL_API_KEY"))
            .or_else(|| non_empty("API_KEY"))
        {
            self.api_key = Some(key.trim().to_string());
        }

        if let Some(model) = non_empty("IRCBOT_MODEL") {
            self.provider.model = model;
        }

        if let Some(server) = non_empty("IRCBOT_SERVER") {
            self.irc.server = server;
        }

        if let Some(nickname) = non_empty("IRCBOT_NICKNAME") {
            self.irc.nickname = nickname;
        }
    }

    /// Reject configurations the bot cannot run with. Called before the run
    /// loop so a bad credential aborts instead of reconnecting forever.
    pub fn validate(&self) -> Result<()> {
        if self.api_key.as_deref().is_none_or(|k| k.trim().is_empty()) {
            bail!(
                "No API key configured. Set IRCBOT_API_KEY (or MISTRAL_API_KEY) or `api_key` in {}",
                self.config_path.display()
            );
        }
        if self.irc.server.trim().is_empty() {
            bail!("irc.server must not be empty");
        }
        if self.irc.nickname.trim().is_empty() || self.irc.nickname.contains(' ') {
            bail!("irc.nickname must be a single non-empty word");
        }
        if let Some(chan) = self.irc.channels.iter().find(|c| c.trim().is_empty()) {
            bail!("irc.channels contains an empty entry: {chan:?}");
        }
        // Room for the nickname prefix plus a few bytes of text.
        if self.irc.max_line_len < self.irc.nickname.len() + 32 {
            bail!(
                "irc.max_line_len ({}) is too small for nickname `{}`",
                self.irc.max_line_len,
                self.irc.nickname
            );
        }
        for (name, template) in [("ask", &self.prompts.ask), ("code", &self.prompts.code)] {
            if !template.contains(QUERY_PLACEHOLDER) {
                bail!("prompts.{name} must contain {QUERY_PLACEHOLDER}");
            }
        }
        Ok(())
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
            .unwrap_or("config.toml");
        let temp_path = parent_dir.join(format!(".{file_name}.tmp-{}", uuid::Uuid::new_v4()));

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

        if let Err(e) = fs::rename(&temp_path, &self.config_path) {
            let _ = fs::remove_file(&temp_path);
            bail!("Failed to atomically replace config file: {e}");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn valid_config() -> Config {
        Config {
            api_key: Some("sk-test".into()),
            ..Config::default()
        }
    }

    // ── Defaults ─────────────────────────────────────────────

    #[test]
    fn config_default_has_sane_values() {
        let c = Config::default();
        assert!(c.api_key.is_none());
        assert_eq!(c.provider.base_url, "https://api.mistral.ai");
        assert_eq!(c.provider.model, "mistral-tiny");
        assert_eq!(c.provider.max_tokens, 300);
        assert!((c.provider.temperature - 0.7).abs() < f64::EPSILON);
        assert_eq!(c.provider.timeout_secs, 30);
        assert_eq!(c.irc.port, 6697);
        assert_eq!(c.irc.channels, vec!["#help", "#welcome"]);
        assert!(c.irc.verify_tls);
        assert_eq!(c.irc.reconnect_delay_secs, 30);
        assert_eq!(c.irc.max_line_len, 400);
        assert_eq!(c.limits.per_minute, 10);
        assert_eq!(c.limits.per_day, 1000);
        assert_eq!(c.limits.per_identity_daily, 50);
        assert!(c.config_path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn username_defaults_to_nickname() {
        let mut irc = IrcConfig::default();
        irc.nickname = "helper".into();
        assert_eq!(irc.effective_username(), "helper");
        irc.username = Some("ident".into());
        assert_eq!(irc.effective_username(), "ident");
    }

    // ── TOML ─────────────────────────────────────────────────

    #[test]
    fn irc_config_minimal_toml() {
        let toml_str = r##"
[irc]
server = "irc.example.net"
nickname = "bot"
channels = ["#help", "#welcome"]
"##;
        let parsed: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(parsed.irc.server, "irc.example.net");
        assert_eq!(parsed.irc.port, 6697);
        assert_eq!(parsed.irc.nickname, "bot");
        assert_eq!(parsed.irc.channels, vec!["#help", "#welcome"]);
        assert!(parsed.irc.username.is_none());
        assert!(parsed.irc.verify_tls);
        assert_eq!(parsed.irc.join_delay_ms, 1000);
        assert_eq!(parsed.irc.send_delay_ms, 500);
        assert_eq!(parsed.limits.per_identity_daily, 50);
        assert!(parsed.prompts.ask.contains(QUERY_PLACEHOLDER));
    }

    #[test]
    fn empty_toml_is_all_defaults() {
        let parsed: Config = toml::from_str("").unwrap();
        assert_eq!(parsed.irc.server, "irc.example.com");
        assert_eq!(parsed.irc.channels, vec!["#help", "#welcome"]);
        assert_eq!(parsed.provider.model, "mistral-tiny");
    }

    #[test]
    fn verify_tls_can_be_disabled() {
        let parsed: Config = toml::from_str("[irc]\nverify_tls = false\n").unwrap();
        assert!(!parsed.irc.verify_tls);
    }

    #[test]
    fn save_then_load_from_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("config.toml");
        let mut config = valid_config();
        config.config_path = path.clone();
        config.irc.channels = vec!["#rust".into()];
        config.limits.per_minute = 3;
        config.save().unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.config_path, path);
        assert_eq!(loaded.irc.channels, vec!["#rust"]);
        assert_eq!(loaded.limits.per_minute, 3);
    }

    #[test]
    fn load_from_missing_file_fails() {
        let tmp = TempDir::new().unwrap();
        let err = Config::load_from(&tmp.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn load_from_invalid_toml_fails() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "[irc\nserver = ").unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    // ── Env overrides ────────────────────────────────────────

    #[test]
    fn env_overrides_api_key_in_priority_order() {
        let mut c = Config::default();
        c.apply_overrides_from(env(&[("MISTRAL_API_KEY", "m"), ("API_KEY", "g")]));
        assert_eq!(c.api_key.as_deref(), Some("m"));

        let mut c = Config::default();
        c.apply_overrides_from(env(&[("IRCBOT_API_KEY", " i "), ("MISTRAL_API_KEY", "m")]));
        assert_eq!(c.api_key.as_deref(), Some("i"));
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let mut c = valid_config();
        c.apply_overrides_from(env(&[("IRCBOT_API_KEY", "  "), ("IRCBOT_MODEL", "")]));
        assert_eq!(c.api_key.as_deref(), Some("sk-test"));
        assert_eq!(c.provider.model, "mistral-tiny");
    }

    #[test]
    fn env_overrides_model_server_and_nickname() {
        let mut c = Config::default();
        c.apply_overrides_from(env(&[
            ("IRCBOT_MODEL", "mistral-small"),
            ("IRCBOT_SERVER", "irc.test"),
            ("IRCBOT_NICKNAME", "Helper"),
        ]));
        assert_eq!(c.provider.model, "mistral-small");
        assert_eq!(c.irc.server, "irc.test");
        assert_eq!(c.irc.nickname, "Helper");
    }

    // ── Validation ───────────────────────────────────────────

    #[test]
    fn validate_accepts_defaults_with_key() {
        valid_config().validate().unwrap();
    }

    #[test]
    fn validate_rejects_missing_api_key() {
        let err = Config::default().validate().unwrap_err();
        assert!(err.to_string().contains("No API key configured"));

        let blank = Config {
            api_key: Some("   ".into()),
            ..Config::default()
        };
        assert!(blank.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_irc_settings() {
        let mut c = valid_config();
        c.irc.server = " ".into();
        assert!(c.validate().is_err());

        let mut c = valid_config();
        c.irc.nickname = "two words".into();
        assert!(c.validate().is_err());

        let mut c = valid_config();
        c.irc.channels = vec!["#ok".into(), String::new()];
        assert!(c.validate().is_err());

        let mut c = valid_config();
        c.irc.max_line_len = 20;
        assert!(c.validate().is_err());
    }

    #[test]
    fn validate_rejects_template_without_placeholder() {
        let mut c = valid_config();
        c.prompts.code = "no placeholder here".into();
        let err = c.validate().unwrap_err();
        assert!(err.to_string().contains("prompts.code"));
    }
}
