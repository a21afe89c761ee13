use crate::config::SweeperConfig;
use crate::coordinator::Router;
use crate::error::Error;
use crate::log::SWEEPER;
use crate::prometheus::{
    QUEUE_LOCKED_ENTRIES, QUEUE_OLDEST_AGE_SECONDS, SWEEPER_ERRORS_TOTAL,
    SWEEPER_REVOCATIONS_TOTAL,
};
use crate::{connect, queue, RouterConfig};
use metrics::{counter, gauge};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_postgres::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const MAX_RETRY_COUNT: u32 = 10;

/// Outcome of one pass over the expired claims
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub revoked: usize,
    /// Extended or released after the scan
    pub skipped: usize,
    pub failed: usize,
}

impl SweepReport {
    fn record(&mut self, other: SweepReport) {
        self.scanned += other.scanned;
        self.revoked += other.revoked;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

///
/// Periodically revokes temporary claims whose expiry has passed.
///
/// At least once: a claim that was promoted, released or extended in the meantime is skipped.
///
#[derive(Clone, Debug)]
pub struct Sweeper {
    config: SweeperConfig,
    router: Router,
}

impl Sweeper {
    pub fn new(config: SweeperConfig, router: Router) -> Self {
        Sweeper { config, router }
    }

    ///
    /// Spawns the sweep loop. The first sweep runs one interval after start.
    ///
    pub fn init(config: &RouterConfig, router: Router, token: CancellationToken) -> JoinHandle<()> {
        let sweeper = Sweeper::new(config.sweeper.clone(), router);
        let config = config.clone();

        tokio::spawn(async move {
            let period = sweeper.config.interval();
            let mut interval = time::interval_at(time::Instant::now() + period, period);

            info!(target: SWEEPER, msg = "Sweeper started", interval = ?period, batch_size = sweeper.config.batch_size);

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!(target: SWEEPER, msg = "Sweeper stopped");
                        return;
                    }
                    _ = interval.tick() => {
                        match sweeper.sweep_with_retry(&config).await {
                            Ok(report) => {
                                debug!(target: SWEEPER, msg = "Sweep complete", ?report);
                            }
                            Err(err) => {
                                counter!(SWEEPER_ERRORS_TOTAL).increment(1);
                                warn!(target: SWEEPER, msg = "Sweep failed", error = err.to_string());
                            }
                        }
                    }
                }
            }
        })
    }

    /// Connects and sweeps, backing off on store errors
    async fn sweep_with_retry(&self, config: &RouterConfig) -> Result<SweepReport, Error> {
        let mut retry_count = 0;

        loop {
            let result = match connect::database(config).await {
                Ok(mut client) => self.sweep_once(&mut client).await,
                Err(err) => Err(err),
            };

            match result {
                Ok(report) => return Ok(report),
                Err(err) => {
                    if retry_count >= MAX_RETRY_COUNT {
                        return Err(err);
                    }
                    debug!(target: SWEEPER, msg = "Retrying sweep", retry_count, error = err.to_string());
                }
            }

            time::sleep(connect::backoff(retry_count)).await;
            retry_count += 1;
        }
    }

    ///
    /// Revokes every expired claim, one batch at a time.
    ///
    /// A revoke that fails is counted and left for the next sweep.
    /// Errors reading the queue are returned.
    ///
    pub async fn sweep_once(&self, client: &mut Client) -> Result<SweepReport, Error> {
        let mut report = SweepReport::default();
        let batch_size = i64::from(self.config.batch_size.max(1));

        loop {
            let batch = self.sweep_batch(client, batch_size).await?;
            report.record(batch);

            // Stop when the store ran dry or nothing in the batch could be revoked
            if (batch.scanned as i64) < batch_size || batch.revoked == 0 {
                break;
            }
        }

        self.record_gauges(client).await?;

        if report.revoked > 0 {
            info!(target: SWEEPER, msg = "Revoked expired claims", revoked = report.revoked, skipped = report.skipped, failed = report.failed);
        }

        Ok(report)
    }

    async fn sweep_batch(&self, client: &mut Client, batch_size: i64) -> Result<SweepReport, Error> {
        let now = self.router.clock().now();
        let expired = queue::expired((&*client).into(), now, batch_size).await?;

        let mut report = SweepReport {
            scanned: expired.len(),
            ..Default::default()
        };

        for entry in expired {
            let Some(doctor_id) = entry.holder_id else {
                report.skipped += 1;
                continue;
            };

            match self
                .router
                .revoke_expired(client, doctor_id, entry.patient_id, entry.case_id)
                .await
            {
                Ok(revocation) if revocation.released => {
                    counter!(SWEEPER_REVOCATIONS_TOTAL).increment(1);
                    report.revoked += 1;
                }
                Ok(_) => report.skipped += 1,
                Err(err) => {
                    counter!(SWEEPER_ERRORS_TOTAL).increment(1);
                    warn!(target: SWEEPER, msg = "Could not revoke expired claim", case_id = entry.case_id, doctor_id, error = err.to_string());
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    async fn record_gauges(&self, client: &Client) -> Result<(), Error> {
        let now = self.router.clock().now();

        let oldest = queue::oldest(client.into(), 1, now).await?;
        let age = oldest.first().map(|item| item.age.as_secs_f64()).unwrap_or(0.0);
        gauge!(QUEUE_OLDEST_AGE_SECONDS).set(age);

        let locked = queue::list_claimed(client.into()).await?;
        gauge!(QUEUE_LOCKED_ENTRIES).set(locked.len() as f64);

        Ok(())
    }
}
