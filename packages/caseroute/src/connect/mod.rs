use crate::error::{Error, StoreError};
use crate::log::{DEVELOPMENT, STORE};
use crate::{tls, RouterConfig};
use std::time::Duration;
use tokio::time;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error, warn};

const MAX_RETRY_DELAY: Duration = Duration::from_secs(2);
const MAX_RETRY_COUNT: u32 = 10;

///
/// Opens a connection to the database and drives it on a spawned task.
///
/// TLS is used unless disabled in the development config.
///
pub async fn database(config: &RouterConfig) -> Result<Client, Error> {
    let database = &config.database;
    let pg_config = database.to_pg_config();

    let connected = if config.database_tls_disabled() {
        debug!(target: DEVELOPMENT, msg = "Database TLS disabled");
        match pg_config.connect(NoTls).await {
            Ok((client, connection)) => {
                spawn_connection(connection);
                Ok(client)
            }
            Err(err) => Err(err),
        }
    } else {
        // Fail early on a host that can never be a TLS server name
        database.server_name()?;

        let tls_config = tls::configure_client(database);
        let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);

        match pg_config.connect(tls).await {
            Ok((client, connection)) => {
                spawn_connection(connection);
                Ok(client)
            }
            Err(err) => Err(err),
        }
    };

    match connected {
        Ok(client) => {
            debug!(target: STORE, msg = "Connected to database", database = database.name, host = database.host, port = database.port);
            Ok(client)
        }
        Err(err) => {
            error!(
                msg = "Could not connect to database",
                database = database.name,
                host = database.host,
                port = database.port,
                username = database.username,
                error = err.to_string(),
            );
            Err(err.into())
        }
    }
}

fn spawn_connection<C>(connection: C)
where
    C: std::future::Future<Output = Result<(), tokio_postgres::Error>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            error!(msg = "Connection error", error = err.to_string());
        }
    });
}

///
/// Connects, backing off between attempts.
///
/// Used where the database may still be starting, such as the sweeper ticks.
///
pub async fn database_with_retry(config: &RouterConfig) -> Result<Client, Error> {
    let mut retry_count = 0;

    loop {
        match database(config).await {
            Ok(client) => return Ok(client),
            Err(err) => {
                if retry_count >= MAX_RETRY_COUNT {
                    error!(msg = "Could not connect to database", retries = retry_count, error = err.to_string());
                    return Err(StoreError::DatabaseConnection {
                        retries: retry_count,
                    }
                    .into());
                }
                warn!(target: STORE, msg = "Retrying database connection", retry_count, error = err.to_string());
            }
        }

        time::sleep(backoff(retry_count)).await;
        retry_count += 1;
    }
}

/// 100ms doubling per attempt, capped at two seconds
pub fn backoff(retry_count: u32) -> Duration {
    let delay_ms = 100_u64.saturating_mul(2_u64.saturating_pow(retry_count));
    Duration::from_millis(delay_ms).min(MAX_RETRY_DELAY)
}
