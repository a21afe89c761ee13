use super::{
    ClaimConfig, DatabaseConfig, LogConfig, SweeperConfig, CR_PREFIX,
    DEFAULT_CONFIG_FILE_PATH,
};
use crate::error::{ConfigError, Error};
use crate::Args;
use config::{Config, Environment};
use regex::Regex;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::OnceLock;

#[derive(Clone, Debug, Deserialize)]
pub struct RouterConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub claim: ClaimConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub prometheus: PrometheusConfig,
    pub development: Option<DevelopmentConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PrometheusConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "PrometheusConfig::default_port")]
    pub port: u16,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DevelopmentConfig {
    #[serde(default)]
    pub disable_database_tls: bool,
}

/// Config defaults to `caseroute.toml` in the current directory.
/// Variable names should match the struct field names.
///
/// ENV vars prefixed with `CR_` override file settings.
///
impl RouterConfig {
    pub fn default_path() -> String {
        DEFAULT_CONFIG_FILE_PATH.to_string()
    }

    pub fn load(args: &Args) -> Result<RouterConfig, Error> {
        if !PathBuf::from(&args.config_file_path).exists() {
            println!(
                "Configuration file was not found: {}",
                args.config_file_path
            );
            println!("Loading config values from environment variables.");
        }
        let mut config = RouterConfig::build(&args.config_file_path)?;

        // If log level is default, it has not been set by the user in config
        if config.log.level == LogConfig::default_log_level() {
            config.log.level = args.log_level;
        }

        // If log format is default, it has not been set by the user in config
        if config.log.format == LogConfig::default_log_format() {
            config.log.format = args.log_format;
        }

        Ok(config)
    }

    pub fn build(path: &str) -> Result<Self, Error> {
        // Top-level values such as CR_DEVELOPMENT
        // and nested values such as CR_DATABASE__HOST, CR_SWEEPER__INTERVAL
        let cr_env_source = Environment::with_prefix(CR_PREFIX)
            .try_parsing(true)
            .separator("__")
            .prefix_separator("_");

        let config: Self = Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(cr_env_source)
            .build()?
            .try_deserialize()
            .map_err(|err| match err {
                // Nested keys arrive as the dotted path, such as `database.name`
                config::ConfigError::NotFound(name) => ConfigError::MissingParameter { name },
                config::ConfigError::Message(ref s) => match s {
                    s if s.contains("missing field") => {
                        let mut name = extract_field_name(s).map_or("unknown".to_string(), |s| s);

                        if name == "name" {
                            name = "database.name".to_string();
                        }

                        ConfigError::MissingParameter { name }
                    }
                    s if s.contains("does not have variant constructor") => {
                        let (name, value) = extract_invalid_field(s);
                        ConfigError::InvalidParameter { name, value }
                    }
                    _ => err.into(),
                },
                _ => err.into(),
            })?;

        Ok(config)
    }

    pub fn database_tls_disabled(&self) -> bool {
        match &self.development {
            Some(dev) => dev.disable_database_tls,
            None => false,
        }
    }

    ///
    /// Returns true if Prometheus export is enabled
    ///
    pub fn prometheus_enabled(&self) -> bool {
        self.prometheus.enabled
    }
}

impl PrometheusConfig {
    pub fn default_port() -> u16 {
        9931
    }
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        PrometheusConfig {
            enabled: false,
            port: PrometheusConfig::default_port(),
        }
    }
}

fn field_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"`(\w+)`").unwrap_or_else(|_| unreachable!()))
}

///
/// Extracts a field name (if present) from a config::ConfigError::Message
/// Called in `build` if the message contains `missing field`
///
fn extract_field_name(input: &str) -> Option<String> {
    field_name_regex()
        .captures(input)
        .and_then(|caps| caps.get(1).map(|m| m.as_str().to_string()))
}

///
/// Extracts the enum name and the rejected value from a config::ConfigError::Message
///
/// Error string is `enum {name} does not have variant constructor {value}`
///
fn extract_invalid_field(input: &str) -> (String, String) {
    let words = input.split(" ").collect::<Vec<_>>();

    let default_name = "unknown".to_string();
    let default_val = "".to_string();

    if !input.starts_with("enum") {
        return (default_name, default_val);
    }

    let name = words
        .get(1)
        .map_or(default_name.to_owned(), |w| w.to_string());

    let value = words
        .last()
        .map_or(default_val.to_owned(), |w| w.to_string());

    (name, value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::test_helpers::with_no_cr_vars;
    use std::time::Duration;

    const TEST_CONFIG: &str = "tests/config/caseroute-test.toml";

    #[test]
    fn database_from_file() {
        with_no_cr_vars(|| {
            let config = RouterConfig::build(TEST_CONFIG).unwrap();
            assert_eq!(
                config.database.to_socket_address(),
                "localhost:5532".to_string()
            );
            assert_eq!(config.database.name, "caseroute");
        });
    }

    #[test]
    fn env_overrides_file() {
        with_no_cr_vars(|| {
            temp_env::with_vars(
                [
                    ("CR_DATABASE__PORT", Some("6432")),
                    ("CR_DATABASE__HOST", Some("db.internal")),
                ],
                || {
                    let config = RouterConfig::build(TEST_CONFIG).unwrap();
                    assert_eq!(config.database.to_socket_address(), "db.internal:6432");
                },
            );
        });
    }

    #[test]
    fn missing_database_password() {
        with_no_cr_vars(|| {
            temp_env::with_vars(
                [
                    ("CR_DATABASE__NAME", Some("caseroute")),
                    ("CR_DATABASE__USERNAME", Some("router")),
                ],
                || {
                    let err = RouterConfig::build("tests/config/does-not-exist.toml").unwrap_err();

                    assert!(matches!(
                        err,
                        Error::Config(ConfigError::MissingParameter { ref name }) if name == "database.password"
                    ));
                },
            );
        });
    }

    #[test]
    fn missing_database_name() {
        with_no_cr_vars(|| {
            temp_env::with_vars(
                [
                    ("CR_DATABASE__USERNAME", Some("router")),
                    ("CR_DATABASE__PASSWORD", Some("password")),
                ],
                || {
                    let config = RouterConfig::build("tests/config/does-not-exist.toml");

                    assert!(matches!(
                        config.unwrap_err(),
                        Error::Config(ConfigError::MissingParameter { ref name }) if name == "database.name"
                    ));
                },
            );
        });
    }

    #[test]
    fn claim_and_sweeper_defaults() {
        with_no_cr_vars(|| {
            let config = RouterConfig::build(TEST_CONFIG).unwrap();

            assert_eq!(
                config.claim.temp_claim_duration(),
                Duration::from_secs(15 * 60)
            );
            assert_eq!(
                config.claim.extension_duration(),
                Duration::from_secs(15 * 60)
            );
            assert!(config.sweeper.enabled);
            assert_eq!(config.sweeper.interval(), Duration::from_secs(60));
            assert_eq!(config.sweeper.batch_size, 100);
        });
    }

    #[test]
    fn claim_durations_from_env() {
        with_no_cr_vars(|| {
            temp_env::with_vars(
                [
                    ("CR_CLAIM__TEMP_CLAIM_DURATION", Some("600")),
                    ("CR_SWEEPER__ENABLED", Some("false")),
                    ("CR_SWEEPER__BATCH_SIZE", Some("25")),
                ],
                || {
                    let config = RouterConfig::build(TEST_CONFIG).unwrap();
                    assert_eq!(
                        config.claim.temp_claim_duration(),
                        Duration::from_secs(600)
                    );
                    assert!(!config.sweeper.enabled);
                    assert_eq!(config.sweeper.batch_size, 25);
                },
            );
        });
    }

    #[test]
    fn development_config() {
        with_no_cr_vars(|| {
            let config = RouterConfig::build(TEST_CONFIG).unwrap();
            assert!(!config.database_tls_disabled());

            temp_env::with_vars(
                [("CR_DEVELOPMENT__DISABLE_DATABASE_TLS", Some("true"))],
                || {
                    let config = RouterConfig::build(TEST_CONFIG).unwrap();
                    assert!(config.database_tls_disabled());
                },
            );
        });
    }

    #[test]
    fn prometheus_config() {
        with_no_cr_vars(|| {
            let config = RouterConfig::build(TEST_CONFIG).unwrap();
            assert!(!config.prometheus_enabled());

            temp_env::with_vars([("CR_PROMETHEUS__ENABLED", Some("true"))], || {
                let config = RouterConfig::build(TEST_CONFIG).unwrap();
                assert!(config.prometheus_enabled());
                assert_eq!(config.prometheus.port, 9931);
            });

            temp_env::with_vars([("CR_PROMETHEUS__PORT", Some("7777"))], || {
                let config = RouterConfig::build(TEST_CONFIG).unwrap();
                assert!(!config.prometheus_enabled());
                assert_eq!(config.prometheus.port, 7777);
            });
        });
    }

    #[test]
    fn invalid_field_is_extracted() {
        let (name, value) =
            extract_invalid_field("enum LogLevel does not have variant constructor loud");
        assert_eq!(name, "LogLevel");
        assert_eq!(value, "loud");

        let (name, value) = extract_invalid_field("something else");
        assert_eq!(name, "unknown");
        assert_eq!(value, "");
    }

    #[test]
    fn field_name_is_extracted() {
        assert_eq!(
            extract_field_name("missing field `password`"),
            Some("password".to_string())
        );
        assert_eq!(extract_field_name("missing field"), None);
    }
}
