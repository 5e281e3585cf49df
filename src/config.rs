use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_STATUS_INTERVAL_MS: u64 = 3_000;
const DEFAULT_QUEUE_INTERVAL_MS: u64 = 5_000;
const DEFAULT_PRINT_COMMAND: &str = "lp {file}";
const DEFAULT_RENDER_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_SETTLE_MS: u64 = 1_000;
const DEFAULT_CONFIRM_DELAY_MS: u64 = 1_000;

/// A validation error in the configuration
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.field, self.message)
    }
}

/// Where the print-shop API lives
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ApiConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl ApiConfig {
    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS))
    }
}

/// Intervals for the repeating status and queue fetches
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct PollingConfig {
    #[serde(default)]
    pub status_interval_ms: Option<u64>,
    #[serde(default)]
    pub queue_interval_ms: Option<u64>,
}

impl PollingConfig {
    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(
            self.status_interval_ms
                .unwrap_or(DEFAULT_STATUS_INTERVAL_MS),
        )
    }

    pub fn queue_interval(&self) -> Duration {
        Duration::from_millis(self.queue_interval_ms.unwrap_or(DEFAULT_QUEUE_INTERVAL_MS))
    }
}

/// How the desk hands documents to the printer
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct PrintingConfig {
    /// Shell-style command line; `{file}` is replaced by the spooled document
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub render_timeout_ms: Option<u64>,
    #[serde(default)]
    pub settle_ms: Option<u64>,
    #[serde(default)]
    pub confirm_delay_ms: Option<u64>,
}

impl PrintingConfig {
    pub fn command_line(&self) -> &str {
        self.command.as_deref().unwrap_or(DEFAULT_PRINT_COMMAND)
    }

    /// Split the command line into program and arguments
    pub fn argv(&self) -> Result<Vec<String>> {
        let argv = shell_words::split(self.command_line())?;
        if argv.is_empty() {
            return Err(anyhow::anyhow!("print command is empty"));
        }
        Ok(argv)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms.unwrap_or(DEFAULT_RENDER_TIMEOUT_MS))
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms.unwrap_or(DEFAULT_SETTLE_MS))
    }

    pub fn confirm_delay(&self) -> Duration {
        Duration::from_millis(self.confirm_delay_ms.unwrap_or(DEFAULT_CONFIRM_DELAY_MS))
    }
}

/// Fixed location used instead of device geolocation
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct LocationConfig {
    pub lat: f64,
    pub long: f64,
}

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub printing: PrintingConfig,
    #[serde(default)]
    pub location: Option<LocationConfig>,
}

impl Config {
    /// Load configuration from default paths
    /// Priority: local (.printdrop/config.local.toml) > project (.printdrop/config.toml)
    /// > user (~/.printdrop/config.toml) > built-in defaults
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".printdrop").join("config.toml");
            if user_config.exists() {
                let user = Self::load_from(&user_config)?;
                config.merge(user);
            }
        }

        let project_config = Path::new(".printdrop").join("config.toml");
        if project_config.exists() {
            let project = Self::load_from(&project_config)?;
            config.merge(project);
        }

        // Should be gitignored
        let local_config = Path::new(".printdrop").join("config.local.toml");
        if local_config.exists() {
            let local = Self::load_from(&local_config)?;
            config.merge(local);
        }

        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Merge another config into this one (other takes priority for every field it sets)
    pub fn merge(&mut self, other: Config) {
        if other.api.base_url.is_some() {
            self.api.base_url = other.api.base_url;
        }
        if other.api.timeout_ms.is_some() {
            self.api.timeout_ms = other.api.timeout_ms;
        }

        if other.polling.status_interval_ms.is_some() {
            self.polling.status_interval_ms = other.polling.status_interval_ms;
        }
        if other.polling.queue_interval_ms.is_some() {
            self.polling.queue_interval_ms = other.polling.queue_interval_ms;
        }

        if other.printing.command.is_some() {
            self.printing.command = other.printing.command;
        }
        if other.printing.render_timeout_ms.is_some() {
            self.printing.render_timeout_ms = other.printing.render_timeout_ms;
        }
        if other.printing.settle_ms.is_some() {
            self.printing.settle_ms = other.printing.settle_ms;
        }
        if other.printing.confirm_delay_ms.is_some() {
            self.printing.confirm_delay_ms = other.printing.confirm_delay_ms;
        }

        if other.location.is_some() {
            self.location = other.location;
        }
    }

    /// Validate configuration and return any errors found
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        let base_url = self.api.base_url();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            errors.push(ValidationError {
                field: "api.base_url".to_string(),
                message: format!("Expected an http:// or https:// URL, got '{}'", base_url),
            });
        }

        for (field, value) in [
            ("api.timeout_ms", self.api.timeout_ms),
            ("polling.status_interval_ms", self.polling.status_interval_ms),
            ("polling.queue_interval_ms", self.polling.queue_interval_ms),
            ("printing.render_timeout_ms", self.printing.render_timeout_ms),
        ] {
            if value == Some(0) {
                errors.push(ValidationError {
                    field: field.to_string(),
                    message: "Must be greater than 0".to_string(),
                });
            }
        }

        if let Err(e) = self.printing.argv() {
            errors.push(ValidationError {
                field: "printing.command".to_string(),
                message: format!("Invalid command '{}': {}", self.printing.command_line(), e),
            });
        }

        if let Some(loc) = &self.location {
            if !(-90.0..=90.0).contains(&loc.lat) {
                errors.push(ValidationError {
                    field: "location.lat".to_string(),
                    message: format!("Must be between -90 and 90, got {}", loc.lat),
                });
            }
            if !(-180.0..=180.0).contains(&loc.long) {
                errors.push(ValidationError {
                    field: "location.long".to_string(),
                    message: format!("Must be between -180 and 180, got {}", loc.long),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.api.base_url(), "http://localhost:8080");
        assert_eq!(config.polling.status_interval(), Duration::from_millis(3000));
        assert_eq!(config.polling.queue_interval(), Duration::from_millis(5000));
        assert_eq!(config.printing.argv().unwrap(), vec!["lp", "{file}"]);
        assert!(config.location.is_none());
    }

    #[test]
    fn test_parse_and_merge() {
        let mut config = Config::default();
        let other: Config = toml::from_str(
            r#"
            [api]
            base_url = "https://print.example.com"

            [polling]
            queue_interval_ms = 2000

            [printing]
            command = "lp -d 'Front Desk' {file}"

            [location]
            lat = 12.97
            long = 77.59
            "#,
        )
        .unwrap();
        config.merge(other);

        assert_eq!(config.api.base_url(), "https://print.example.com");
        assert_eq!(config.polling.queue_interval(), Duration::from_millis(2000));
        assert_eq!(config.polling.status_interval(), Duration::from_millis(3000));
        assert_eq!(
            config.printing.argv().unwrap(),
            vec!["lp", "-d", "Front Desk", "{file}"]
        );
        assert_eq!(config.location.unwrap().lat, 12.97);

        // A later layer without a key leaves the earlier value alone
        config.merge(toml::from_str("[polling]\nstatus_interval_ms = 4000").unwrap());
        assert_eq!(config.polling.queue_interval(), Duration::from_millis(2000));
        assert_eq!(config.polling.status_interval(), Duration::from_millis(4000));
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_bad_url() {
        let mut config = Config::default();
        config.api.base_url = Some("localhost:8080".to_string());
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].field.contains("base_url"));
    }

    #[test]
    fn test_validate_zero_interval_and_empty_command() {
        let mut config = Config::default();
        config.polling.status_interval_ms = Some(0);
        config.printing.command = Some("   ".to_string());
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors
            .iter()
            .any(|e| e.field == "polling.status_interval_ms"));
        assert!(errors.iter().any(|e| e.field == "printing.command"));
    }

    #[test]
    fn test_validate_location_range() {
        let mut config = Config::default();
        config.location = Some(LocationConfig {
            lat: 91.0,
            long: 200.0,
        });
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].message.contains("between -90 and 90"));
    }
}
