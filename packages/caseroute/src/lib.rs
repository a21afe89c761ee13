pub mod cli;
pub mod clock;
pub mod config;
pub mod connect;
pub mod coordinator;
pub mod doctor_queue;
pub mod eligibility;
pub mod error;
pub mod lifecycle;
pub mod log;
pub mod prometheus;
pub mod queue;
pub mod registry;
pub mod store;
pub mod sweeper;
pub mod tls;

pub use crate::cli::Args;
pub use crate::clock::Clock;
pub use crate::config::{DatabaseConfig, RouterConfig};
pub use crate::coordinator::{Revocation, Router, TempClaim};
pub use crate::log::init;
pub use crate::sweeper::{SweepReport, Sweeper};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
pub mod test_helpers;
