//!
//! Ownership edges between doctors and patients or cases.
//!
//! A file edge grants access to the whole patient chart, a case edge to a single case.
//! Every write runs inside the caller's transaction.
//!
use crate::error::{ClaimError, Error};
use crate::log::REGISTRY;
use crate::store::{AssignmentStatus, Db, RoleTypes};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_postgres::{Row, Transaction};
use tracing::debug;

pub const FILE_EDGE_TABLE: &str = "patient_care_provider_assignment";
pub const CASE_EDGE_TABLE: &str = "patient_case_care_provider_assignment";

const INSERT_TEMP_FILE_EDGE: &str = r#"
    INSERT INTO patient_care_provider_assignment
        (role_type_id, provider_id, patient_id, clinical_pathway_tag, status, expires)
    VALUES ($1, $2, $3, $4, 'TEMP', $5)
    ON CONFLICT (provider_id, role_type_id, patient_id) DO NOTHING
"#;

const UPSERT_ACTIVE_FILE_EDGE: &str = r#"
    INSERT INTO patient_care_provider_assignment
        (role_type_id, provider_id, patient_id, clinical_pathway_tag, status, expires)
    VALUES ($1, $2, $3, $4, 'ACTIVE', NULL)
    ON CONFLICT (provider_id, role_type_id, patient_id)
    DO UPDATE SET status = 'ACTIVE', expires = NULL
"#;

// An ACTIVE edge for the same provider is never replaced by a TEMP one
const UPSERT_TEMP_CASE_EDGE: &str = r#"
    INSERT INTO patient_case_care_provider_assignment
        (role_type_id, provider_id, patient_case_id, status, expires)
    VALUES ($1, $2, $3, 'TEMP', $4)
    ON CONFLICT (provider_id, role_type_id, patient_case_id)
    DO UPDATE SET expires = EXCLUDED.expires
    WHERE patient_case_care_provider_assignment.status = 'TEMP'
"#;

const UPSERT_ACTIVE_CASE_EDGE: &str = r#"
    INSERT INTO patient_case_care_provider_assignment
        (role_type_id, provider_id, patient_case_id, status, expires)
    VALUES ($1, $2, $3, 'ACTIVE', NULL)
    ON CONFLICT (provider_id, role_type_id, patient_case_id)
    DO UPDATE SET status = 'ACTIVE', expires = NULL
"#;

const SELECT_FILE_EDGE: &str = r#"
    SELECT provider_id, status, expires
    FROM patient_care_provider_assignment
    WHERE role_type_id = $1 AND provider_id = $2 AND patient_id = $3
"#;

const SELECT_CASE_EDGE: &str = r#"
    SELECT provider_id, status, expires
    FROM patient_case_care_provider_assignment
    WHERE role_type_id = $1 AND provider_id = $2 AND patient_case_id = $3
"#;

const SELECT_CASE_EDGES: &str = r#"
    SELECT provider_id, status, expires
    FROM patient_case_care_provider_assignment
    WHERE role_type_id = $1 AND patient_case_id = $2
    ORDER BY provider_id
"#;

const SELECT_OTHER_CASE_EDGE: &str = r#"
    SELECT provider_id, status, expires
    FROM patient_case_care_provider_assignment
    WHERE role_type_id = $1 AND patient_case_id = $2 AND provider_id <> $3
    LIMIT 1
"#;

const EXTEND_FILE_EDGE: &str = r#"
    UPDATE patient_care_provider_assignment
    SET expires = $4
    WHERE role_type_id = $1 AND provider_id = $2 AND patient_id = $3 AND status = 'TEMP'
"#;

const EXTEND_CASE_EDGE: &str = r#"
    UPDATE patient_case_care_provider_assignment
    SET expires = $4
    WHERE role_type_id = $1 AND provider_id = $2 AND patient_case_id = $3 AND status = 'TEMP'
"#;

const PROMOTE_FILE_EDGE: &str = r#"
    UPDATE patient_care_provider_assignment
    SET status = 'ACTIVE', expires = NULL
    WHERE role_type_id = $1 AND provider_id = $2 AND patient_id = $3 AND status = 'TEMP'
"#;

const PROMOTE_CASE_EDGE: &str = r#"
    UPDATE patient_case_care_provider_assignment
    SET status = 'ACTIVE', expires = NULL
    WHERE role_type_id = $1 AND provider_id = $2 AND patient_case_id = $3 AND status = 'TEMP'
"#;

const DELETE_TEMP_CASE_EDGE: &str = r#"
    DELETE FROM patient_case_care_provider_assignment
    WHERE role_type_id = $1 AND provider_id = $2 AND patient_case_id = $3 AND status = 'TEMP'
"#;

// Kept while the provider's claim on another case of the patient still owns it
const DELETE_TEMP_FILE_EDGE: &str = r#"
    DELETE FROM patient_care_provider_assignment
    WHERE role_type_id = $1 AND provider_id = $2 AND patient_id = $3 AND status = 'TEMP'
      AND NOT EXISTS (
        SELECT 1
        FROM patient_case_care_provider_assignment edge
        JOIN patient_case ON patient_case.id = edge.patient_case_id
        WHERE edge.role_type_id = $1
          AND edge.provider_id = $2
          AND edge.status = 'TEMP'
          AND patient_case.patient_id = $3
      )
"#;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Edge {
    pub provider_id: i64,
    pub status: AssignmentStatus,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Edge {
    pub fn is_temp(&self) -> bool {
        self.status == AssignmentStatus::Temp
    }

    pub fn is_active(&self) -> bool {
        self.status == AssignmentStatus::Active
    }
}

impl TryFrom<&Row> for Edge {
    type Error = Error;

    fn try_from(row: &Row) -> Result<Self, Self::Error> {
        Ok(Edge {
            provider_id: row.try_get("provider_id")?,
            status: row.try_get("status")?,
            expires_at: row.try_get("expires")?,
        })
    }
}

/// Edges removed by a revoke
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Revoked {
    pub case_edge: bool,
    pub file_edge: bool,
}

pub async fn file_edge(
    db: Db<'_>,
    roles: &RoleTypes,
    provider_id: i64,
    patient_id: i64,
) -> Result<Option<Edge>, Error> {
    let row = db
        .query_opt(SELECT_FILE_EDGE, &[&roles.doctor(), &provider_id, &patient_id])
        .await?;
    row.as_ref().map(Edge::try_from).transpose()
}

pub async fn case_edge(
    db: Db<'_>,
    roles: &RoleTypes,
    provider_id: i64,
    case_id: i64,
) -> Result<Option<Edge>, Error> {
    let row = db
        .query_opt(SELECT_CASE_EDGE, &[&roles.doctor(), &provider_id, &case_id])
        .await?;
    row.as_ref().map(Edge::try_from).transpose()
}

/// Every doctor edge on the case
pub async fn case_edges(db: Db<'_>, roles: &RoleTypes, case_id: i64) -> Result<Vec<Edge>, Error> {
    let rows = db
        .query(SELECT_CASE_EDGES, &[&roles.doctor(), &case_id])
        .await?;

    rows.iter().map(Edge::try_from).collect()
}

///
/// Inserts a `TEMP` file edge unless any edge already exists for the pair.
/// An existing `ACTIVE` edge is never downgraded.
///
pub async fn grant_temp_file_edge(
    tx: &Transaction<'_>,
    roles: &RoleTypes,
    provider_id: i64,
    patient_id: i64,
    clinical_pathway_tag: &str,
    expires_at: DateTime<Utc>,
) -> Result<bool, Error> {
    let affected = tx
        .execute(
            INSERT_TEMP_FILE_EDGE,
            &[
                &roles.doctor(),
                &provider_id,
                &patient_id,
                &clinical_pathway_tag,
                &expires_at,
            ],
        )
        .await?;

    let granted = affected == 1;
    debug!(target: REGISTRY, msg = "Grant temporary file edge", provider_id, patient_id, granted);
    Ok(granted)
}

///
/// Inserts or refreshes the provider's `TEMP` case edge.
///
/// Rejected when another doctor already has an edge on the case,
/// or when the provider's own edge is already `ACTIVE`.
///
pub async fn grant_temp_case_edge(
    tx: &Transaction<'_>,
    roles: &RoleTypes,
    provider_id: i64,
    case_id: i64,
    expires_at: DateTime<Utc>,
) -> Result<(), Error> {
    if let Some(other) = other_case_edge(tx, roles, case_id, provider_id).await? {
        debug!(target: REGISTRY, msg = "Case already assigned", case_id, provider_id, other = other.provider_id);
        return Err(ClaimError::CaseClaimForbidden {
            case_id,
            reason: "case is assigned to another doctor",
        }
        .into());
    }

    let affected = tx
        .execute(
            UPSERT_TEMP_CASE_EDGE,
            &[&roles.doctor(), &provider_id, &case_id, &expires_at],
        )
        .await?;

    if affected != 1 {
        return Err(ClaimError::CaseClaimForbidden {
            case_id,
            reason: "doctor is already permanently assigned to the case",
        }
        .into());
    }

    debug!(target: REGISTRY, msg = "Grant temporary case edge", provider_id, case_id, %expires_at);
    Ok(())
}

/// Permanent file access, used when onboarding a patient with an existing doctor
pub async fn grant_active_file_edge(
    tx: &Transaction<'_>,
    roles: &RoleTypes,
    provider_id: i64,
    patient_id: i64,
    clinical_pathway_tag: &str,
) -> Result<(), Error> {
    tx.execute(
        UPSERT_ACTIVE_FILE_EDGE,
        &[
            &roles.doctor(),
            &provider_id,
            &patient_id,
            &clinical_pathway_tag,
        ],
    )
    .await?;

    debug!(target: REGISTRY, msg = "Grant active file edge", provider_id, patient_id);
    Ok(())
}

///
/// Inserts the `ACTIVE` case edge, replacing a `TEMP` edge of the same provider.
///
pub async fn grant_active_case_edge(
    tx: &Transaction<'_>,
    roles: &RoleTypes,
    provider_id: i64,
    case_id: i64,
) -> Result<(), Error> {
    tx.execute(
        UPSERT_ACTIVE_CASE_EDGE,
        &[&roles.doctor(), &provider_id, &case_id],
    )
    .await?;

    debug!(target: REGISTRY, msg = "Grant active case edge", provider_id, case_id);
    Ok(())
}

/// Any doctor edge on the case that does not belong to `provider_id`
pub async fn other_case_edge(
    tx: &Transaction<'_>,
    roles: &RoleTypes,
    case_id: i64,
    provider_id: i64,
) -> Result<Option<Edge>, Error> {
    let row = tx
        .query_opt(SELECT_OTHER_CASE_EDGE, &[&roles.doctor(), &case_id, &provider_id])
        .await?;
    row.as_ref().map(Edge::try_from).transpose()
}

///
/// Moves the expiry of the provider's `TEMP` edges for the patient and case.
///
/// The case edge must be `TEMP`. The file edge is either `TEMP`,
/// or an `ACTIVE` edge that predates the claim and carries no expiry.
///
pub async fn extend(
    tx: &Transaction<'_>,
    roles: &RoleTypes,
    provider_id: i64,
    patient_id: i64,
    case_id: i64,
    expires_at: DateTime<Utc>,
) -> Result<(), Error> {
    let role_type_id = roles.doctor();

    let affected = tx
        .execute(
            EXTEND_CASE_EDGE,
            &[&role_type_id, &provider_id, &case_id, &expires_at],
        )
        .await?;

    if affected != 1 {
        return Err(ClaimError::InconsistentClaim {
            case_id,
            table: CASE_EDGE_TABLE,
            affected,
        }
        .into());
    }

    let affected = tx
        .execute(
            EXTEND_FILE_EDGE,
            &[&role_type_id, &provider_id, &patient_id, &expires_at],
        )
        .await?;

    if affected != 1 {
        let active = file_edge(tx.into(), roles, provider_id, patient_id)
            .await?
            .is_some_and(|edge| edge.is_active());

        if !active {
            return Err(ClaimError::InconsistentClaim {
                case_id,
                table: FILE_EDGE_TABLE,
                affected,
            }
            .into());
        }
    }

    debug!(target: REGISTRY, msg = "Extended edges", provider_id, patient_id, case_id, %expires_at);
    Ok(())
}

///
/// Flips the case edge from `TEMP` to `ACTIVE` and clears its expiry.
///
pub async fn promote_case(
    tx: &Transaction<'_>,
    roles: &RoleTypes,
    provider_id: i64,
    case_id: i64,
) -> Result<(), Error> {
    let affected = tx
        .execute(PROMOTE_CASE_EDGE, &[&roles.doctor(), &provider_id, &case_id])
        .await?;

    if affected != 1 {
        return Err(ClaimError::InconsistentClaim {
            case_id,
            table: CASE_EDGE_TABLE,
            affected,
        }
        .into());
    }

    debug!(target: REGISTRY, msg = "Promoted case edge", provider_id, case_id);
    Ok(())
}

///
/// Flips the file edge from `TEMP` to `ACTIVE`.
/// Returns false when the provider has no file edge at all.
///
pub async fn promote_file(
    tx: &Transaction<'_>,
    roles: &RoleTypes,
    provider_id: i64,
    patient_id: i64,
) -> Result<bool, Error> {
    let affected = tx
        .execute(
            PROMOTE_FILE_EDGE,
            &[&roles.doctor(), &provider_id, &patient_id],
        )
        .await?;

    if affected == 1 {
        debug!(target: REGISTRY, msg = "Promoted file edge", provider_id, patient_id);
        return Ok(true);
    }

    let active = file_edge(tx.into(), roles, provider_id, patient_id)
        .await?
        .is_some_and(|edge| edge.is_active());
    Ok(active)
}

///
/// Deletes the provider's `TEMP` edges. Never touches `ACTIVE` edges.
///
pub async fn revoke(
    tx: &Transaction<'_>,
    roles: &RoleTypes,
    provider_id: i64,
    patient_id: i64,
    case_id: i64,
) -> Result<Revoked, Error> {
    let role_type_id = roles.doctor();

    // Case edge first so the file edge check no longer sees it
    let case_edge = tx
        .execute(
            DELETE_TEMP_CASE_EDGE,
            &[&role_type_id, &provider_id, &case_id],
        )
        .await?;

    let file_edge = tx
        .execute(
            DELETE_TEMP_FILE_EDGE,
            &[&role_type_id, &provider_id, &patient_id],
        )
        .await?;

    let revoked = Revoked {
        case_edge: case_edge > 0,
        file_edge: file_edge > 0,
    };

    debug!(target: REGISTRY, msg = "Revoked edges", provider_id, patient_id, case_id, ?revoked);
    Ok(revoked)
}

/// Guard used before a permanent assignment without a temporary claim
pub async fn require_active_file_edge(
    tx: &Transaction<'_>,
    roles: &RoleTypes,
    provider_id: i64,
    patient_id: i64,
    case_id: i64,
) -> Result<(), Error> {
    let active = file_edge(tx.into(), roles, provider_id, patient_id)
        .await?
        .is_some_and(|edge| edge.is_active());

    if !active {
        return Err(ClaimError::CaseClaimForbidden {
            case_id,
            reason: "doctor is not assigned to the patient file",
        }
        .into());
    }

    Ok(())
}
