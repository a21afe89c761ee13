use crate::error::{ClaimError, Error};
use crate::log::LIFECYCLE;
use crate::store::{CaseStatus, Db};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_postgres::{Row, Transaction};
use tracing::debug;

const SELECT_CASE: &str = r#"
    SELECT id, patient_id, clinical_pathway_tag, status, timeout
    FROM patient_case
    WHERE id = $1
"#;

const SELECT_CASE_FOR_UPDATE: &str = r#"
    SELECT id, patient_id, clinical_pathway_tag, status, timeout
    FROM patient_case
    WHERE id = $1
    FOR UPDATE
"#;

const INSERT_CASE: &str = r#"
    INSERT INTO patient_case (patient_id, clinical_pathway_tag, status)
    VALUES ($1, $2, 'UNCLAIMED')
    RETURNING id
"#;

const UPDATE_STATUS: &str = r#"
    UPDATE patient_case
    SET status = $3
    WHERE id = $1 AND status = $2
"#;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PatientCase {
    pub id: i64,
    pub patient_id: i64,
    pub clinical_pathway_tag: String,
    pub status: CaseStatus,
    pub timeout: Option<DateTime<Utc>>,
}

impl TryFrom<&Row> for PatientCase {
    type Error = Error;

    fn try_from(row: &Row) -> Result<Self, Self::Error> {
        Ok(PatientCase {
            id: row.try_get("id")?,
            patient_id: row.try_get("patient_id")?,
            clinical_pathway_tag: row.try_get("clinical_pathway_tag")?,
            status: row.try_get("status")?,
            timeout: row.try_get("timeout")?,
        })
    }
}

impl CaseStatus {
    ///
    /// Edges of the case state machine.
    ///
    /// `INACTIVE` is entered by the surrounding workflow and is terminal.
    ///
    pub fn can_transition_to(self, to: CaseStatus) -> bool {
        use CaseStatus::*;

        matches!(
            (self, to),
            (Unclaimed, TempClaimed)
                | (TempClaimed, Unclaimed)
                | (TempClaimed, Claimed)
                | (Unclaimed, Claimed)
                | (Unclaimed, Inactive)
                | (TempClaimed, Inactive)
                | (Claimed, Inactive)
        )
    }

    /// A case is offered to doctors only while unclaimed
    pub fn is_claimable(self) -> bool {
        self == CaseStatus::Unclaimed
    }
}

pub async fn get(db: Db<'_>, case_id: i64) -> Result<Option<PatientCase>, Error> {
    let row = db.query_opt(SELECT_CASE, &[&case_id]).await?;
    row.as_ref().map(PatientCase::try_from).transpose()
}

///
/// Reads the case and holds its row lock until the transaction ends.
///
/// Every mutating operation takes this lock first, then the queue row, then the edges.
///
pub async fn get_for_update(tx: &Transaction<'_>, case_id: i64) -> Result<PatientCase, Error> {
    let row = tx
        .query_opt(SELECT_CASE_FOR_UPDATE, &[&case_id])
        .await?
        .ok_or(ClaimError::CaseNotFound { case_id })?;

    PatientCase::try_from(&row)
}

/// New case in `UNCLAIMED`
pub async fn create(
    tx: &Transaction<'_>,
    patient_id: i64,
    clinical_pathway_tag: &str,
) -> Result<i64, Error> {
    let row = tx
        .query_one(INSERT_CASE, &[&patient_id, &clinical_pathway_tag])
        .await?;
    let case_id: i64 = row.try_get("id")?;

    debug!(target: LIFECYCLE, msg = "Created case", case_id, patient_id);
    Ok(case_id)
}

///
/// Moves the case from `from` to `to`.
///
/// Fails with `IllegalCaseTransition` when the edge is not in the state machine
/// or when the stored status is not `from`.
///
pub async fn transition(
    tx: &Transaction<'_>,
    case_id: i64,
    from: CaseStatus,
    to: CaseStatus,
) -> Result<(), Error> {
    if !from.can_transition_to(to) {
        return Err(ClaimError::IllegalCaseTransition { case_id, from, to }.into());
    }

    let affected = tx.execute(UPDATE_STATUS, &[&case_id, &from, &to]).await?;

    if affected != 1 {
        return Err(ClaimError::IllegalCaseTransition { case_id, from, to }.into());
    }

    debug!(target: LIFECYCLE, msg = "Case status changed", case_id, from = %from, to = %to);
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::store::CaseStatus::{self, *};

    #[test]
    fn transition_table() {
        let allowed = [
            (Unclaimed, TempClaimed),
            (TempClaimed, Unclaimed),
            (TempClaimed, Claimed),
            (Unclaimed, Claimed),
            (Unclaimed, Inactive),
            (TempClaimed, Inactive),
            (Claimed, Inactive),
        ];

        for from in CaseStatus::ALL {
            for to in CaseStatus::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn claimed_never_returns_to_the_queue() {
        assert!(!Claimed.can_transition_to(TempClaimed));
        assert!(!Claimed.can_transition_to(Unclaimed));
        assert!(!Inactive.can_transition_to(Unclaimed));
    }

    #[test]
    fn only_unclaimed_is_claimable() {
        let claimable = CaseStatus::ALL
            .into_iter()
            .filter(|s| s.is_claimable())
            .collect::<Vec<_>>();

        assert_eq!(claimable, vec![Unclaimed]);
    }
}
