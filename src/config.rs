use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub sink: SinkConfig,
    #[serde(default)]
    pub relay: Option<RelayConfig>,
    #[serde(default = "default_pipeline_config")]
    pub pipeline: PipelineConfig,
    #[serde(default = "default_logging_config")]
    pub logging: LoggingConfig,
    #[serde(default = "default_stats_config")]
    pub stats: StatsConfig,
    #[serde(default = "default_watch_config")]
    pub watch: WatchConfig,
    #[serde(default)]
    pub admin: Option<AdminConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Name used for this session in logs
    #[serde(default = "default_session_name")]
    pub session_name: String,
    #[serde(default, deserialize_with = "deserialize_channel_ids")]
    pub channel_ids: Vec<i64>,
    /// Display names keyed by channel id, e.g. `"-100111" = "News"`
    #[serde(default)]
    pub channel_names: BTreeMap<String, String>,
}

impl TelegramConfig {
    /// Names whose keys parse as ids. `Config::load` rejects the rest.
    pub fn channel_names(&self) -> impl Iterator<Item = (i64, &str)> {
        self.channel_names
            .iter()
            .filter_map(|(id, name)| Some((id.trim().parse::<i64>().ok()?, name.as_str())))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SinkConfig {
    pub url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_health_timeout_secs")]
    pub health_timeout_secs: u64,
}

/// Reroutes bot-relayed alerts to the channel they were meant for.
#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    pub target_id: i64,
    #[serde(default = "default_relay_target_name")]
    pub target_name: String,
    #[serde(default)]
    pub markers: Vec<String>,
    /// Also treat the target id written out in the text as a marker
    #[serde(default = "default_true")]
    pub match_target_id: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_true")]
    pub verify_sources: bool,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StatsConfig {
    #[serde(default = "default_summary_cron")]
    pub summary_cron: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatchConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_watch_cron")]
    pub cron: String,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AdminConfig {
    pub bind: SocketAddr,
}

fn default_session_name() -> String {
    "relaybot".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_health_timeout_secs() -> u64 {
    10
}

fn default_relay_target_name() -> String {
    "Relayed".to_string()
}

fn default_true() -> bool {
    true
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_summary_cron() -> String {
    "0 */5 * * * *".to_string()
}

fn default_watch_cron() -> String {
    "*/5 * * * * *".to_string()
}

fn default_settle_ms() -> u64 {
    500
}

fn default_pipeline_config() -> PipelineConfig {
    PipelineConfig {
        verify_sources: true,
        shutdown_grace_secs: default_shutdown_grace_secs(),
    }
}

fn default_logging_config() -> LoggingConfig {
    LoggingConfig {
        level: default_log_level(),
    }
}

fn default_stats_config() -> StatsConfig {
    StatsConfig {
        summary_cron: default_summary_cron(),
    }
}

fn default_watch_config() -> WatchConfig {
    WatchConfig {
        enabled: true,
        cron: default_watch_cron(),
        settle_ms: default_settle_ms(),
    }
}

/// Parse a comma-separated id list such as `-100111, -100222`.
pub fn parse_channel_ids(raw: &str) -> Result<Vec<i64>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>().map_err(|_| ConfigError::InvalidValue {
                key: "telegram.channel_ids".to_string(),
                message: format!("invalid channel id: {s}"),
            })
        })
        .collect()
}

/// Accepts either a TOML array of integers or a comma-separated string.
fn deserialize_channel_ids<'de, D>(deserializer: D) -> Result<Vec<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<i64>),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::List(ids) => Ok(ids),
        Raw::Text(text) => parse_channel_ids(&text).map_err(serde::de::Error::custom),
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = read_config(path)?;
        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.telegram.bot_token.trim().is_empty() {
            return Err(invalid("telegram.bot_token", "must not be empty"));
        }

        let url = self.sink.url.trim();
        if url.is_empty() {
            return Err(invalid("sink.url", "must not be empty"));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(invalid("sink.url", "must be an http:// or https:// URL"));
        }

        if let Some(bad) = self
            .telegram
            .channel_names
            .keys()
            .find(|k| k.trim().parse::<i64>().is_err())
        {
            return Err(ConfigError::InvalidValue {
                key: "telegram.channel_names".to_string(),
                message: format!("invalid channel id: {bad}"),
            });
        }

        if self.sink.timeout_secs == 0 {
            return Err(invalid("sink.timeout_secs", "must be greater than 0"));
        }
        if self.sink.health_timeout_secs == 0 {
            return Err(invalid("sink.health_timeout_secs", "must be greater than 0"));
        }

        if let Some(relay) = &self.relay {
            if relay.markers.iter().any(|m| m.is_empty()) {
                return Err(invalid("relay.markers", "markers must not be empty strings"));
            }
            if relay.markers.is_empty() && !relay.match_target_id {
                return Err(invalid(
                    "relay",
                    "needs at least one marker or match_target_id = true",
                ));
            }
        }

        Ok(())
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn read_config(path: &Path) -> Result<String, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads only `telegram.channel_ids`, for hot reload.
pub fn load_channel_ids(path: &Path) -> Result<Vec<i64>, ConfigError> {
    #[derive(Deserialize)]
    struct Partial {
        telegram: PartialTelegram,
    }
    #[derive(Deserialize)]
    struct PartialTelegram {
        #[serde(default, deserialize_with = "deserialize_channel_ids")]
        channel_ids: Vec<i64>,
    }

    let content = read_config(path)?;
    let partial: Partial = toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(partial.telegram.channel_ids)
}

/// Durable store for the monitored id list: the config file itself.
///
/// Only `telegram.channel_ids` is rewritten; every other key is carried over.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn channel_ids(&self) -> Result<Vec<i64>> {
        load_channel_ids(&self.path)
            .with_context(|| format!("Failed to load channel ids from {}", self.path.display()))
    }

    /// Write the id list back, sorted ascending and de-duplicated.
    pub fn save_channel_ids(&self, ids: &[i64]) -> Result<()> {
        let mut sorted = ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        self.edit_telegram(|telegram| {
            telegram.insert(
                "channel_ids".to_string(),
                toml::Value::Array(sorted.into_iter().map(toml::Value::Integer).collect()),
            );
            Ok(())
        })
    }

    /// Record a display name under `telegram.channel_names`.
    pub fn save_channel_name(&self, id: i64, name: &str) -> Result<()> {
        self.edit_telegram(|telegram| {
            let names = telegram
                .entry("channel_names")
                .or_insert(toml::Value::Table(toml::Table::new()))
                .as_table_mut()
                .context("telegram.channel_names in config file is not a table")?;
            names.insert(id.to_string(), toml::Value::String(name.to_string()));
            Ok(())
        })
    }

    /// Read the file, let `edit` change the `[telegram]` table, write it back.
    fn edit_telegram<F>(&self, edit: F) -> Result<()>
    where
        F: FnOnce(&mut toml::Table) -> Result<()>,
    {
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read config file: {}", self.path.display()))?;
        let mut doc: toml::Table = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", self.path.display()))?;

        let telegram = doc
            .entry("telegram")
            .or_insert(toml::Value::Table(toml::Table::new()))
            .as_table_mut()
            .context("[telegram] in config file is not a table")?;
        edit(telegram)?;

        let rendered = toml::to_string_pretty(&doc).context("Failed to render config file")?;
        std::fs::write(&self.path, rendered)
            .with_context(|| format!("Failed to write config file: {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
[telegram]
bot_token = "123:abc"
channel_ids = [-100111, -100222]

[sink]
url = "http://localhost:8080/api/v1/message"
"#;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_applied() {
        let file = write_config(MINIMAL);
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.telegram.channel_ids, vec![-100111, -100222]);
        assert_eq!(config.telegram.session_name, "relaybot");
        assert_eq!(config.sink.max_retries, 3);
        assert_eq!(config.sink.timeout_secs, 30);
        assert_eq!(config.sink.health_timeout_secs, 10);
        assert_eq!(config.logging.level, "info");
        assert!(config.pipeline.verify_sources);
        assert!(config.watch.enabled);
        assert!(config.relay.is_none());
        assert!(config.admin.is_none());
    }

    #[test]
    fn test_comma_separated_channel_ids() {
        let file = write_config(
            r#"
[telegram]
bot_token = "t"
channel_ids = "-100111, -100222,-100333"

[sink]
url = "http://localhost:8080/api/v1/message"
max_retries = 2
timeout_secs = 5
"#,
        );
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.telegram.channel_ids, vec![-100111, -100222, -100333]);
        assert_eq!(config.sink.max_retries, 2);
        assert_eq!(config.sink.timeout_secs, 5);
    }

    #[test]
    fn test_invalid_channel_id_rejected() {
        let file = write_config(
            r#"
[telegram]
bot_token = "t"
channel_ids = "-100111, abc"

[sink]
url = "http://localhost:8080/api/v1/message"
"#,
        );
        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load(Path::new("/nonexistent/relaybot.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_empty_sink_url_rejected() {
        let file = write_config(
            r#"
[telegram]
bot_token = "t"

[sink]
url = ""
"#,
        );
        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("sink.url"));
    }

    #[test]
    fn test_relay_section() {
        let file = write_config(
            r##"
[telegram]
bot_token = "t"

[sink]
url = "http://localhost:8080/api/v1/message"

[relay]
target_id = -100222
markers = ["#ALERT"]
"##,
        );
        let config = Config::load(file.path()).unwrap();
        let relay = config.relay.unwrap();
        assert_eq!(relay.target_id, -100222);
        assert_eq!(relay.target_name, "Relayed");
        assert_eq!(relay.markers, vec!["#ALERT".to_string()]);
        assert!(relay.match_target_id);
    }

    #[test]
    fn test_relay_without_any_marker_rejected() {
        let file = write_config(
            r#"
[telegram]
bot_token = "t"

[sink]
url = "http://localhost:8080/api/v1/message"

[relay]
target_id = -100222
match_target_id = false
"#,
        );
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_store_rewrites_only_channel_ids() {
        let file = write_config(MINIMAL);
        let store = ConfigStore::new(file.path());

        store.save_channel_ids(&[-100333, -100111, -100333]).unwrap();

        assert_eq!(store.channel_ids().unwrap(), vec![-100333, -100111]);
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.telegram.bot_token, "123:abc");
        assert_eq!(config.sink.url, "http://localhost:8080/api/v1/message");
    }

    #[test]
    fn test_store_saves_channel_names() {
        let file = write_config(MINIMAL);
        let store = ConfigStore::new(file.path());

        store.save_channel_name(-100111, "News").unwrap();
        store.save_channel_ids(&[-100111, -100222]).unwrap();

        let config = Config::load(file.path()).unwrap();
        let names: Vec<(i64, &str)> = config.telegram.channel_names().collect();
        assert_eq!(names, vec![(-100111, "News")]);
        assert_eq!(config.telegram.channel_ids, vec![-100222, -100111]);
    }

    #[test]
    fn test_bad_channel_name_key_rejected() {
        let file = write_config(
            r#"
[telegram]
bot_token = "t"

[telegram.channel_names]
news = "News"

[sink]
url = "http://localhost:8080/api/v1/message"
"#,
        );
        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("telegram.channel_names"));
    }

    #[test]
    fn test_parse_channel_ids_skips_blanks() {
        assert_eq!(parse_channel_ids(" -1, ,-2 ").unwrap(), vec![-1, -2]);
        assert!(parse_channel_ids("").unwrap().is_empty());
    }
}
