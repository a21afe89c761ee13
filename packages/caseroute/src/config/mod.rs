mod claim;
mod database;
mod log;
mod router;

pub use claim::{ClaimConfig, SweeperConfig};
pub use database::DatabaseConfig;
pub use log::{LogConfig, LogFormat, LogLevel, LogOutput};
pub use router::{DevelopmentConfig, PrometheusConfig, RouterConfig};

pub const CR_PREFIX: &str = "CR";
pub const DEFAULT_CONFIG_FILE_PATH: &str = "caseroute.toml";
