use std::path::{Path, PathBuf};
use std::time::Duration;

use adwatch_storage::{HttpClientConfig, RetryPolicy, DEFAULT_DATABASE_FILE};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_CONFIG_FILE: &str = "config.toml";
pub const DATABASE_ENV: &str = "ADWATCH_DATABASE";
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (compatible; KleinanzeigenBot/1.0; +https://example.com)";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Feed URLs polled in order each cycle.
    #[serde(default)]
    pub feeds: Vec<String>,
    #[serde(default = "default_poll_interval_minutes")]
    pub poll_interval_minutes: u64,
    #[serde(default = "default_database")]
    pub database: PathBuf,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    /// Pause between consecutive detail fetches of an enrichment pass.
    #[serde(default = "default_enrich_delay_secs")]
    pub enrich_delay_secs: u64,
}

fn default_poll_interval_minutes() -> u64 {
    15
}
fn default_database() -> PathBuf {
    PathBuf::from(DEFAULT_DATABASE_FILE)
}
fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}
fn default_http_timeout_secs() -> u64 {
    20
}
fn default_enrich_delay_secs() -> u64 {
    2
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            feeds: Vec::new(),
            poll_interval_minutes: default_poll_interval_minutes(),
            database: default_database(),
            user_agent: default_user_agent(),
            http_timeout_secs: default_http_timeout_secs(),
            enrich_delay_secs: default_enrich_delay_secs(),
        }
    }
}

impl AppConfig {
    /// Reads TOML, or YAML when the file ends in `.yaml`/`.yml`, then applies
    /// the `ADWATCH_DATABASE` override.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml" | "yml")
        );
        let mut config = if is_yaml {
            Self::from_yaml_str(&text)
        } else {
            Self::from_toml_str(&text)
        }
        .with_context(|| format!("parsing config file {}", path.display()))?;
        config.apply_env();
        Ok(config)
    }

    /// Like `load`, but a missing file yields the defaults instead of an
    /// error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }
        warn!(path = %path.display(), "config file not found, using defaults");
        let mut config = Self::default();
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(database) = std::env::var(DATABASE_ENV) {
            if !database.trim().is_empty() {
                self.database = PathBuf::from(database);
            }
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("invalid TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text).context("invalid YAML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval_minutes == 0 {
            bail!("poll_interval_minutes must be > 0");
        }
        if self.http_timeout_secs == 0 {
            bail!("http_timeout_secs must be > 0");
        }
        if self.feeds.is_empty() {
            warn!("no feeds configured; poll cycles will only sweep");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_minutes.saturating_mul(60))
    }

    pub fn enrich_delay(&self) -> Duration {
        Duration::from_secs(self.enrich_delay_secs)
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: self.user_agent.clone(),
            retry: RetryPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn minimal_toml_gets_documented_defaults() {
        let config = AppConfig::from_toml_str(
            r#"feeds = ["https://www.kleinanzeigen.de/s-berlin/fahrrad/k0l3331.rss"]"#,
        )
        .unwrap();
        assert_eq!(config.feeds.len(), 1);
        assert_eq!(config.poll_interval_minutes, 15);
        assert_eq!(config.database, PathBuf::from("ads.db"));
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(config.enrich_delay(), Duration::from_secs(2));
        assert_eq!(config.poll_interval(), Duration::from_secs(900));
    }

    #[test]
    fn yaml_is_accepted() {
        let config = AppConfig::from_yaml_str(
            "feeds:\n  - https://a.example/feed\n  - https://b.example/feed\npoll_interval_minutes: 5\ndatabase: data/ads.db\n",
        )
        .unwrap();
        assert_eq!(config.feeds, vec!["https://a.example/feed", "https://b.example/feed"]);
        assert_eq!(config.poll_interval_minutes, 5);
        assert_eq!(config.database, PathBuf::from("data/ads.db"));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = AppConfig::from_toml_str("feeds = []\npoll_interval_minutes = 0").unwrap_err();
        assert!(err.to_string().contains("poll_interval_minutes"));
    }

    #[test]
    fn load_picks_format_from_extension() {
        let dir = tempdir().unwrap();
        let toml_path = dir.path().join("config.toml");
        std::fs::write(&toml_path, "feeds = [\"https://a.example/feed\"]\n").unwrap();
        let yaml_path = dir.path().join("config.yml");
        std::fs::write(&yaml_path, "feeds: [\"https://a.example/feed\"]\n").unwrap();

        assert_eq!(
            AppConfig::load(&toml_path).unwrap().feeds,
            AppConfig::load(&yaml_path).unwrap().feeds
        );
    }

    #[test]
    fn missing_file_falls_back_to_defaults_when_optional() {
        let config = AppConfig::load_or_default(Path::new("/nonexistent/adwatch.toml")).unwrap();
        assert!(config.feeds.is_empty());
        assert_eq!(config.poll_interval_minutes, 15);
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = AppConfig::load(Path::new("/nonexistent/adwatch.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/adwatch.toml"));
    }
}
