use std::{fmt::Display, time::Duration};

use rustls_pki_types::ServerName;
use serde::Deserialize;

use crate::error::{ConfigError, Error};

#[derive(Clone, Debug, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "DatabaseConfig::default_host")]
    pub host: String,

    #[serde(default = "DatabaseConfig::default_port")]
    pub port: u16,

    pub name: String,
    pub username: String,
    pub password: String,

    /// Milliseconds
    #[serde(default = "DatabaseConfig::default_connection_timeout")]
    pub connection_timeout: u64,

    #[serde(default)]
    pub with_tls_verification: bool,
}

impl DatabaseConfig {
    pub fn default_host() -> String {
        "127.0.0.1".to_string()
    }

    pub const fn default_port() -> u16 {
        5432
    }

    // 30 seconds
    pub const fn default_connection_timeout() -> u64 {
        1000 * 30
    }

    pub fn to_socket_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout)
    }

    pub fn server_name(&self) -> Result<ServerName<'static>, Error> {
        let name = ServerName::try_from(self.host.to_owned()).map_err(|_| {
            ConfigError::InvalidServerName {
                name: self.host.to_owned(),
            }
        })?;
        Ok(name)
    }

    ///
    /// Connection parameters for tokio-postgres
    ///
    pub fn to_pg_config(&self) -> tokio_postgres::Config {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .dbname(&self.name)
            .user(&self.username)
            .password(&self.password)
            .application_name("caseroute")
            .connect_timeout(self.connection_timeout());
        config
    }
}

///
/// Password is NEVER EVER displayed
///
impl Display for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}@{}:{}/{}",
            self.username, self.host, self.port, self.name,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DatabaseConfig {
        DatabaseConfig {
            host: "db.internal".to_string(),
            port: 5532,
            name: "caseroute".to_string(),
            username: "router".to_string(),
            password: "sekrit".to_string(),
            connection_timeout: DatabaseConfig::default_connection_timeout(),
            with_tls_verification: false,
        }
    }

    #[test]
    fn display_hides_password() {
        let display = config().to_string();
        assert_eq!(display, "router@db.internal:5532/caseroute");
        assert!(!display.contains("sekrit"));
    }

    #[test]
    fn pg_config_carries_connection_parameters() {
        let pg = config().to_pg_config();

        assert_eq!(pg.get_dbname(), Some("caseroute"));
        assert_eq!(pg.get_user(), Some("router"));
        assert_eq!(pg.get_ports(), &[5532]);
        assert_eq!(pg.get_connect_timeout(), Some(&Duration::from_secs(30)));
    }

    #[test]
    fn server_name_from_host() {
        assert!(config().server_name().is_ok());

        let mut bad = config();
        bad.host = "not a host!".to_string();
        assert!(bad.server_name().is_err());
    }
}
