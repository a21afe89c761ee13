use crate::error::Error;
use crate::log::DEVELOPMENT;
use metrics::{describe_counter, describe_gauge, gauge, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{debug, info};

// See https://prometheus.io/docs/practices/naming/
pub const TEMP_CLAIMS_TOTAL: &str = "caseroute_temp_claims_total";
pub const CLAIMS_FORBIDDEN_TOTAL: &str = "caseroute_claims_forbidden_total";
pub const EXTENSIONS_TOTAL: &str = "caseroute_extensions_total";
pub const PROMOTIONS_TOTAL: &str = "caseroute_promotions_total";
pub const PERMANENT_ASSIGNMENTS_TOTAL: &str = "caseroute_permanent_assignments_total";
pub const REVOCATIONS_TOTAL: &str = "caseroute_revocations_total";
pub const ENQUEUED_TOTAL: &str = "caseroute_enqueued_total";

pub const SWEEPER_REVOCATIONS_TOTAL: &str = "caseroute_sweeper_revocations_total";
pub const SWEEPER_ERRORS_TOTAL: &str = "caseroute_sweeper_errors_total";

pub const QUEUE_OLDEST_AGE_SECONDS: &str = "caseroute_queue_oldest_age_seconds";
pub const QUEUE_LOCKED_ENTRIES: &str = "caseroute_queue_locked_entries";

pub fn start(host: String, port: u16) -> Result<(), Error> {
    let address = format!("{}:{}", host, port);
    let socket_address: SocketAddr = address
        .parse()
        .map_err(|_| Error::Prometheus(format!("invalid listen address {address}")))?;

    debug!(target: DEVELOPMENT, msg = "Starting Prometheus exporter", port);

    PrometheusBuilder::new()
        .with_http_listener(socket_address)
        .install()
        .map_err(|err| Error::Prometheus(err.to_string()))?;

    describe_counter!(TEMP_CLAIMS_TOTAL, "Number of temporary claims granted");
    describe_counter!(
        CLAIMS_FORBIDDEN_TOTAL,
        "Number of claims refused because another doctor got there first"
    );
    describe_counter!(EXTENSIONS_TOTAL, "Number of temporary claims extended");
    describe_counter!(
        PROMOTIONS_TOTAL,
        "Number of temporary claims promoted to permanent"
    );
    describe_counter!(
        PERMANENT_ASSIGNMENTS_TOTAL,
        "Number of cases assigned permanently without a temporary claim"
    );
    describe_counter!(REVOCATIONS_TOTAL, "Number of temporary claims revoked");
    describe_counter!(ENQUEUED_TOTAL, "Number of cases added to the queue");

    describe_counter!(
        SWEEPER_REVOCATIONS_TOTAL,
        "Number of expired claims revoked by the sweeper"
    );
    describe_counter!(SWEEPER_ERRORS_TOTAL, "Number of failed sweeps");

    describe_gauge!(
        QUEUE_OLDEST_AGE_SECONDS,
        Unit::Seconds,
        "Age of the oldest unlocked entry in the queue"
    );
    describe_gauge!(QUEUE_LOCKED_ENTRIES, "Current number of locked queue entries");

    // Prometheus endpoint is empty on startup and looks like an error
    // Explicitly set gauges to zero
    gauge!(QUEUE_OLDEST_AGE_SECONDS).set(0);
    gauge!(QUEUE_LOCKED_ENTRIES).set(0);

    info!(msg = "Prometheus exporter started", port);
    Ok(())
}
