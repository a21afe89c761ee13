//!
//! The claim coordinator.
//!
//! Every mutating operation runs as one transaction and takes row locks in the same order:
//! the case row, then its queue row, then the ownership edges.
//! Nothing about who holds a case is cached in process, the store is the source of truth.
//!
use crate::clock::Clock;
use crate::config::ClaimConfig;
use crate::doctor_queue::{self, DoctorQueueItem, InboxItem};
use crate::eligibility;
use crate::error::{ClaimError, Error};
use crate::lifecycle::{self, PatientCase};
use crate::log::CLAIM;
use crate::prometheus::{
    CLAIMS_FORBIDDEN_TOTAL, ENQUEUED_TOTAL, EXTENSIONS_TOTAL, PERMANENT_ASSIGNMENTS_TOTAL,
    PROMOTIONS_TOTAL, REVOCATIONS_TOTAL, TEMP_CLAIMS_TOTAL,
};
use crate::queue::{self, HolderOutcome, ItemAge, LockOutcome, NewEntry, QueueEntry};
use crate::registry::{self, Revoked};
use crate::store::{CaseStatus, Db, RoleTypes};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_postgres::{Client, Transaction};
use tracing::{debug, info, warn};

/// A temporary claim as committed
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TempClaim {
    pub case_id: i64,
    pub patient_id: i64,
    pub doctor_id: i64,
    pub expires_at: DateTime<Utc>,
}

/// What a revoke changed. All false when there was nothing to undo.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Revocation {
    pub released: bool,
    pub edges: Revoked,
}

impl Revocation {
    pub fn is_noop(&self) -> bool {
        !self.released && !self.edges.case_edge && !self.edges.file_edge
    }
}

///
/// Entry point for callers of the routing core.
///
/// Holds the frozen role map, the clock and the claim durations.
/// Cheap to clone, every operation takes the store handle explicitly.
///
#[derive(Clone, Debug)]
pub struct Router {
    roles: Arc<RoleTypes>,
    clock: Clock,
    claim: ClaimConfig,
}

impl Router {
    pub fn new(roles: RoleTypes, clock: Clock, claim: ClaimConfig) -> Self {
        Router {
            roles: Arc::new(roles),
            clock,
            claim,
        }
    }

    /// Loads the role map from the store
    pub async fn init(client: &Client, clock: Clock, claim: ClaimConfig) -> Result<Self, Error> {
        let roles = RoleTypes::load(client.into()).await?;
        Ok(Router::new(roles, clock, claim))
    }

    pub fn roles(&self) -> &RoleTypes {
        &self.roles
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn temp_claim_duration(&self) -> Duration {
        self.claim.temp_claim_duration()
    }

    pub fn extension_duration(&self) -> Duration {
        self.claim.extension_duration()
    }

    ///
    /// Adds the case to the queue, unlocked.
    ///
    /// The case must exist, be `UNCLAIMED` and belong to the entry's patient.
    ///
    pub async fn enqueue(&self, client: &mut Client, entry: &NewEntry) -> Result<i64, Error> {
        let tx = client.transaction().await?;

        let case = lifecycle::get_for_update(&tx, entry.case_id).await?;
        if !case.status.is_claimable() {
            return Err(ClaimError::CaseNotClaimable {
                case_id: case.id,
                status: case.status,
            }
            .into());
        }
        require_patient(&case, entry.patient_id)?;

        let id = queue::enqueue(&tx, entry, self.clock.now()).await?;
        tx.commit().await?;

        counter!(ENQUEUED_TOTAL).increment(1);
        info!(target: CLAIM, msg = "Case enqueued", id, case_id = entry.case_id, jurisdiction_id = entry.jurisdiction_id);
        Ok(id)
    }

    ///
    /// Entries in every jurisdiction the doctor serves, unlocked or held by the doctor.
    ///
    /// Not linearised with claims: an entry listed here may be taken by the time the doctor opens it.
    ///
    pub async fn list_eligible_for(
        &self,
        client: &Client,
        doctor_id: i64,
    ) -> Result<Vec<QueueEntry>, Error> {
        let db: Db = client.into();

        let jurisdictions = eligibility::jurisdictions_for(db, &self.roles, doctor_id).await?;
        if jurisdictions.is_empty() {
            return Err(ClaimError::NotEligibleAnywhere { doctor_id }.into());
        }

        queue::list_eligible(db, &jurisdictions, doctor_id).await
    }

    pub async fn list_claimed(&self, client: &Client) -> Result<Vec<QueueEntry>, Error> {
        queue::list_claimed(client.into()).await
    }

    pub async fn list_all(&self, client: &Client) -> Result<Vec<QueueEntry>, Error> {
        queue::list_all(client.into()).await
    }

    /// The `limit` longest waiting entries nobody is working on
    pub async fn oldest(&self, client: &Client, limit: usize) -> Result<Vec<ItemAge>, Error> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        queue::oldest(client.into(), limit, self.clock.now()).await
    }

    pub async fn temp_claimed_entry(
        &self,
        client: &Client,
        case_id: i64,
        doctor_id: i64,
    ) -> Result<Option<QueueEntry>, Error> {
        queue::temp_claimed_entry(client.into(), case_id, doctor_id).await
    }

    pub async fn jurisdictions_with_unclaimed(&self, client: &Client) -> Result<Vec<i64>, Error> {
        queue::jurisdictions_with_unclaimed(client.into()).await
    }

    pub async fn case(&self, client: &Client, case_id: i64) -> Result<Option<PatientCase>, Error> {
        lifecycle::get(client.into(), case_id).await
    }

    pub async fn inbox(
        &self,
        client: &Client,
        doctor_id: i64,
    ) -> Result<Vec<DoctorQueueItem>, Error> {
        doctor_queue::for_doctor(client.into(), doctor_id).await
    }

    ///
    /// Locks the queued case for the doctor until `now + duration`
    /// and grants the temporary patient file and case edges with the same expiry.
    ///
    /// Of two doctors claiming the same case, exactly one commits.
    /// The other sees `CaseClaimForbidden`.
    ///
    pub async fn temp_claim(
        &self,
        client: &mut Client,
        doctor_id: i64,
        case_id: i64,
        duration: Duration,
    ) -> Result<TempClaim, Error> {
        let result = self
            .try_temp_claim(client, doctor_id, case_id, duration)
            .await;

        match &result {
            Ok(claim) => {
                counter!(TEMP_CLAIMS_TOTAL).increment(1);
                info!(target: CLAIM, msg = "Temporary claim", case_id, doctor_id, expires_at = %claim.expires_at);
            }
            Err(err) if err.is_forbidden() => {
                counter!(CLAIMS_FORBIDDEN_TOTAL).increment(1);
                debug!(target: CLAIM, msg = "Temporary claim forbidden", case_id, doctor_id, error = %err);
            }
            Err(_) => {}
        }

        result
    }

    async fn try_temp_claim(
        &self,
        client: &mut Client,
        doctor_id: i64,
        case_id: i64,
        duration: Duration,
    ) -> Result<TempClaim, Error> {
        let tx = client.transaction().await?;

        let case = lifecycle::get_for_update(&tx, case_id).await?;
        match case.status {
            CaseStatus::Unclaimed => {}
            // Whoever locked the case row first won
            CaseStatus::TempClaimed => {
                return Err(ClaimError::CaseClaimForbidden {
                    case_id,
                    reason: "case is temporarily claimed",
                }
                .into())
            }
            status => return Err(ClaimError::CaseNotClaimable { case_id, status }.into()),
        }

        let expires_at = self.clock.after(duration);

        if queue::get_for_update(&tx, case_id).await?.is_none() {
            return Err(ClaimError::CaseClaimForbidden {
                case_id,
                reason: "case is not queued",
            }
            .into());
        }

        // One temporary claim per patient, so the file edge carries exactly one expiry
        let file_edge =
            registry::file_edge((&tx).into(), &self.roles, doctor_id, case.patient_id).await?;
        if file_edge.is_some_and(|edge| edge.is_temp()) {
            return Err(ClaimError::CaseClaimForbidden {
                case_id,
                reason: "doctor holds a temporary claim on another case of the patient",
            }
            .into());
        }

        if let LockOutcome::AlreadyLocked = queue::lock(&tx, case_id, doctor_id, expires_at).await? {
            return Err(ClaimError::CaseClaimForbidden {
                case_id,
                reason: "case is locked by another doctor",
            }
            .into());
        }

        // An existing file edge is left as it is, including an ACTIVE one
        registry::grant_temp_file_edge(
            &tx,
            &self.roles,
            doctor_id,
            case.patient_id,
            &case.clinical_pathway_tag,
            expires_at,
        )
        .await?;
        registry::grant_temp_case_edge(&tx, &self.roles, doctor_id, case_id, expires_at).await?;

        lifecycle::transition(&tx, case_id, CaseStatus::Unclaimed, CaseStatus::TempClaimed)
            .await?;

        tx.commit().await?;

        Ok(TempClaim {
            case_id,
            patient_id: case.patient_id,
            doctor_id,
            expires_at,
        })
    }

    ///
    /// Moves the expiry of the doctor's claim to `now + duration`.
    /// The queue row and both edges always carry the same expiry.
    ///
    pub async fn extend(
        &self,
        client: &mut Client,
        doctor_id: i64,
        patient_id: i64,
        case_id: i64,
        duration: Duration,
    ) -> Result<DateTime<Utc>, Error> {
        let tx = client.transaction().await?;

        let case = lifecycle::get_for_update(&tx, case_id).await?;
        self.require_holder(&tx, case_id, doctor_id).await?;
        require_patient(&case, patient_id)?;

        let expires_at = self.clock.after(duration);
        self.sync_expiry(&tx, doctor_id, patient_id, case_id, expires_at)
            .await?;

        tx.commit().await?;

        counter!(EXTENSIONS_TOTAL).increment(1);
        info!(target: CLAIM, msg = "Extended claim", case_id, doctor_id, %expires_at);
        Ok(expires_at)
    }

    ///
    /// Turns the doctor's temporary claim into a permanent assignment.
    ///
    /// The queue row is removed and both edges become `ACTIVE` with no expiry.
    ///
    pub async fn promote(
        &self,
        client: &mut Client,
        doctor_id: i64,
        case_id: i64,
    ) -> Result<(), Error> {
        let tx = client.transaction().await?;

        let case = lifecycle::get_for_update(&tx, case_id).await?;

        let case_edge = registry::case_edge((&tx).into(), &self.roles, doctor_id, case_id).await?;
        let file_edge =
            registry::file_edge((&tx).into(), &self.roles, doctor_id, case.patient_id).await?;

        if !case_edge.is_some_and(|edge| edge.is_temp()) || file_edge.is_none() {
            return Err(ClaimError::TempClaimMissing { case_id, doctor_id }.into());
        }

        self.require_holder(&tx, case_id, doctor_id).await?;

        if let HolderOutcome::NotHolder = queue::remove(&tx, case_id, doctor_id).await? {
            return Err(ClaimError::ClaimLost { case_id, doctor_id }.into());
        }

        lifecycle::transition(&tx, case_id, CaseStatus::TempClaimed, CaseStatus::Claimed).await?;

        if !registry::promote_file(&tx, &self.roles, doctor_id, case.patient_id).await? {
            return Err(ClaimError::InconsistentClaim {
                case_id,
                table: registry::FILE_EDGE_TABLE,
                affected: 0,
            }
            .into());
        }
        registry::promote_case(&tx, &self.roles, doctor_id, case_id).await?;

        tx.commit().await?;

        counter!(PROMOTIONS_TOTAL).increment(1);
        info!(target: CLAIM, msg = "Promoted claim", case_id, doctor_id);
        Ok(())
    }

    ///
    /// Claims the case for a doctor who already has permanent access to the patient file,
    /// without a temporary lock, and routes the item into the doctor's inbox.
    ///
    /// Rejected while any other doctor has an edge on the case.
    ///
    pub async fn assign_permanent(
        &self,
        client: &mut Client,
        doctor_id: i64,
        case_id: i64,
        item: &InboxItem,
    ) -> Result<(), Error> {
        let tx = client.transaction().await?;

        let case = lifecycle::get_for_update(&tx, case_id).await?;

        registry::require_active_file_edge(&tx, &self.roles, doctor_id, case.patient_id, case_id)
            .await?;

        if let Some(other) = registry::other_case_edge(&tx, &self.roles, case_id, doctor_id).await?
        {
            debug!(target: CLAIM, msg = "Case assigned to another doctor", case_id, doctor_id, other = other.provider_id);
            return Err(ClaimError::CaseClaimForbidden {
                case_id,
                reason: "case is assigned to another doctor",
            }
            .into());
        }

        if case.status != CaseStatus::Unclaimed {
            return Err(ClaimError::IllegalCaseTransition {
                case_id,
                from: case.status,
                to: CaseStatus::Claimed,
            }
            .into());
        }

        lifecycle::transition(&tx, case_id, CaseStatus::Unclaimed, CaseStatus::Claimed).await?;

        // A claimed case never stays in the queue
        let dequeued = queue::remove_unlocked(&tx, case_id).await?;

        registry::grant_active_case_edge(&tx, &self.roles, doctor_id, case_id).await?;
        doctor_queue::insert(&tx, doctor_id, case_id, item, self.clock.now()).await?;

        tx.commit().await?;

        counter!(PERMANENT_ASSIGNMENTS_TOTAL).increment(1);
        info!(target: CLAIM, msg = "Permanently assigned case", case_id, doctor_id, dequeued);
        Ok(())
    }

    ///
    /// Releases the doctor's temporary claim and deletes the doctor's `TEMP` edges.
    ///
    /// Idempotent: revoking a claim the doctor does not hold changes nothing and is not an error.
    /// `ACTIVE` edges are never touched.
    ///
    pub async fn revoke(
        &self,
        client: &mut Client,
        doctor_id: i64,
        patient_id: i64,
        case_id: i64,
    ) -> Result<Revocation, Error> {
        let tx = client.transaction().await?;

        let case = lifecycle::get_for_update(&tx, case_id).await?;
        require_patient(&case, patient_id)?;

        let released = queue::release(&tx, case_id, doctor_id).await?;
        let revocation = self
            .undo_claim(&tx, released, doctor_id, patient_id, case_id)
            .await?;

        tx.commit().await?;

        if !revocation.is_noop() {
            counter!(REVOCATIONS_TOTAL).increment(1);
        }
        info!(target: CLAIM, msg = "Revoked claim", case_id, doctor_id, released = revocation.released);
        Ok(revocation)
    }

    ///
    /// Revoke used by the sweeper.
    ///
    /// Only releases a lock that expired at or before `now`.
    /// A claim extended after the sweeper read it is left alone, edges included.
    ///
    pub async fn revoke_expired(
        &self,
        client: &mut Client,
        doctor_id: i64,
        patient_id: i64,
        case_id: i64,
    ) -> Result<Revocation, Error> {
        let tx = client.transaction().await?;

        let case = lifecycle::get_for_update(&tx, case_id).await?;
        require_patient(&case, patient_id)?;

        let now = self.clock.now();
        let released = queue::release_expired(&tx, case_id, doctor_id, now).await?;

        if let HolderOutcome::NotHolder = released {
            debug!(target: CLAIM, msg = "Claim no longer expired", case_id, doctor_id);
            return Ok(Revocation::default());
        }

        let revocation = self
            .undo_claim(&tx, released, doctor_id, patient_id, case_id)
            .await?;

        tx.commit().await?;

        info!(target: CLAIM, msg = "Revoked expired claim", case_id, doctor_id);
        Ok(revocation)
    }

    async fn undo_claim(
        &self,
        tx: &Transaction<'_>,
        released: HolderOutcome,
        doctor_id: i64,
        patient_id: i64,
        case_id: i64,
    ) -> Result<Revocation, Error> {
        let released = released == HolderOutcome::Done;

        if released {
            lifecycle::transition(tx, case_id, CaseStatus::TempClaimed, CaseStatus::Unclaimed)
                .await?;
        }

        let edges = registry::revoke(tx, &self.roles, doctor_id, patient_id, case_id).await?;

        if !released && (edges.case_edge || edges.file_edge) {
            warn!(target: CLAIM, msg = "Removed temporary edges without a lock", case_id, doctor_id, ?edges);
        }

        Ok(Revocation { released, edges })
    }

    ///
    /// The doctor must hold an unexpired lock on the case
    ///
    async fn require_holder(
        &self,
        tx: &Transaction<'_>,
        case_id: i64,
        doctor_id: i64,
    ) -> Result<QueueEntry, Error> {
        let entry = queue::get_for_update(tx, case_id).await?;

        match entry {
            Some(entry)
                if entry.is_held_by(doctor_id) && !entry.is_expired(self.clock.now()) =>
            {
                Ok(entry)
            }
            _ => Err(ClaimError::ClaimLost { case_id, doctor_id }.into()),
        }
    }

    ///
    /// Writes one expiry to the queue row and both edges.
    /// Each update must hit exactly one row or the transaction fails.
    ///
    async fn sync_expiry(
        &self,
        tx: &Transaction<'_>,
        doctor_id: i64,
        patient_id: i64,
        case_id: i64,
        expires_at: DateTime<Utc>,
    ) -> Result<(), Error> {
        let affected = queue::set_expiry(tx, case_id, doctor_id, expires_at).await?;
        if affected != 1 {
            return Err(ClaimError::InconsistentClaim {
                case_id,
                table: queue::QUEUE_TABLE,
                affected,
            }
            .into());
        }

        registry::extend(tx, &self.roles, doctor_id, patient_id, case_id, expires_at).await
    }
}

fn require_patient(case: &PatientCase, patient_id: i64) -> Result<(), Error> {
    if case.patient_id != patient_id {
        return Err(ClaimError::PatientMismatch {
            case_id: case.id,
            patient_id,
        }
        .into());
    }
    Ok(())
}
