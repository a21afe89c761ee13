use serde::Deserialize;
use std::time::Duration;

///
/// Lengths of temporary claims, in seconds
///
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ClaimConfig {
    #[serde(default = "ClaimConfig::default_duration")]
    pub temp_claim_duration: u64,

    #[serde(default = "ClaimConfig::default_duration")]
    pub extension_duration: u64,
}

impl ClaimConfig {
    // 15 minutes
    pub const fn default_duration() -> u64 {
        15 * 60
    }

    pub fn temp_claim_duration(&self) -> Duration {
        Duration::from_secs(self.temp_claim_duration)
    }

    pub fn extension_duration(&self) -> Duration {
        Duration::from_secs(self.extension_duration)
    }
}

impl Default for ClaimConfig {
    fn default() -> Self {
        ClaimConfig {
            temp_claim_duration: ClaimConfig::default_duration(),
            extension_duration: ClaimConfig::default_duration(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SweeperConfig {
    #[serde(default = "SweeperConfig::default_enabled")]
    pub enabled: bool,

    /// Seconds between sweeps
    #[serde(default = "SweeperConfig::default_interval")]
    pub interval: u64,

    /// Expired claims revoked per sweep
    #[serde(default = "SweeperConfig::default_batch_size")]
    pub batch_size: u32,
}

impl SweeperConfig {
    pub const fn default_enabled() -> bool {
        true
    }

    pub const fn default_interval() -> u64 {
        60
    }

    pub const fn default_batch_size() -> u32 {
        100
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        SweeperConfig {
            enabled: SweeperConfig::default_enabled(),
            interval: SweeperConfig::default_interval(),
            batch_size: SweeperConfig::default_batch_size(),
        }
    }
}
