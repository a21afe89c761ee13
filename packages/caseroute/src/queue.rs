use crate::error::Error;
use crate::log::QUEUE;
use crate::store::{Db, EventType, QueueItemStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio_postgres::{Row, Transaction};
use tracing::debug;

pub const QUEUE_TABLE: &str = "unclaimed_case_queue";

macro_rules! select_entries {
    ($($rest:literal),*) => {
        concat!(
            "SELECT id, care_providing_state_id, patient_case_id, patient_id, item_id, event_type, status, ",
            "description, short_description, action_url, enqueue_date, locked, doctor_id, expires ",
            "FROM unclaimed_case_queue ",
            $($rest),*
        )
    };
}

const INSERT_ENTRY: &str = r#"
    INSERT INTO unclaimed_case_queue
        (care_providing_state_id, patient_case_id, patient_id, item_id, event_type, status,
         description, short_description, action_url, enqueue_date)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
    RETURNING id
"#;

const SELECT_ELIGIBLE: &str = select_entries!(
    "WHERE care_providing_state_id = ANY($1) AND (NOT locked OR doctor_id = $2) ",
    "ORDER BY enqueue_date, id"
);

const SELECT_CLAIMED: &str = select_entries!("WHERE locked ORDER BY enqueue_date, id");

const SELECT_ALL: &str = select_entries!("ORDER BY enqueue_date, id");

const SELECT_OLDEST: &str = select_entries!("WHERE NOT locked ORDER BY enqueue_date, id LIMIT $1");

const SELECT_TEMP_CLAIMED: &str =
    select_entries!("WHERE patient_case_id = $1 AND locked AND doctor_id = $2");

const SELECT_EXPIRED: &str =
    select_entries!("WHERE locked AND expires <= $1 ORDER BY expires, id LIMIT $2");

const SELECT_FOR_UPDATE: &str = select_entries!("WHERE patient_case_id = $1 FOR UPDATE");

const SELECT_JURISDICTIONS_WITH_UNCLAIMED: &str = r#"
    SELECT DISTINCT care_providing_state_id
    FROM unclaimed_case_queue
    WHERE NOT locked
    ORDER BY care_providing_state_id
"#;

const LOCK: &str = r#"
    UPDATE unclaimed_case_queue
    SET locked = true, doctor_id = $2, expires = $3
    WHERE patient_case_id = $1 AND NOT locked
"#;

const RELEASE: &str = r#"
    UPDATE unclaimed_case_queue
    SET locked = false, doctor_id = NULL, expires = NULL
    WHERE patient_case_id = $1 AND locked AND doctor_id = $2
"#;

const RELEASE_EXPIRED: &str = r#"
    UPDATE unclaimed_case_queue
    SET locked = false, doctor_id = NULL, expires = NULL
    WHERE patient_case_id = $1 AND locked AND doctor_id = $2 AND expires <= $3
"#;

const REMOVE: &str = r#"
    DELETE FROM unclaimed_case_queue
    WHERE patient_case_id = $1 AND locked AND doctor_id = $2
"#;

const REMOVE_UNLOCKED: &str = r#"
    DELETE FROM unclaimed_case_queue
    WHERE patient_case_id = $1 AND NOT locked
"#;

const SET_EXPIRY: &str = r#"
    UPDATE unclaimed_case_queue
    SET expires = $3
    WHERE patient_case_id = $1 AND locked AND doctor_id = $2
"#;

///
/// A case waiting for a doctor.
/// While `locked`, the entry doubles as the temporary claim held by `holder_id` until `expires_at`.
///
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QueueEntry {
    pub id: i64,
    pub jurisdiction_id: i64,
    pub case_id: i64,
    pub patient_id: i64,
    pub item_id: i64,
    pub event_type: EventType,
    pub status: QueueItemStatus,
    pub description: String,
    pub short_description: String,
    pub action_url: String,
    pub enqueued_at: DateTime<Utc>,
    pub locked: bool,
    pub holder_id: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl QueueEntry {
    pub fn is_held_by(&self, doctor_id: i64) -> bool {
        self.locked && self.holder_id == Some(doctor_id)
    }

    /// Expiry is strict: the claim is valid while `expires_at > now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.locked && self.expires_at.is_some_and(|expires| expires <= now)
    }
}

impl TryFrom<&Row> for QueueEntry {
    type Error = Error;

    fn try_from(row: &Row) -> Result<Self, Self::Error> {
        Ok(QueueEntry {
            id: row.try_get("id")?,
            jurisdiction_id: row.try_get("care_providing_state_id")?,
            case_id: row.try_get("patient_case_id")?,
            patient_id: row.try_get("patient_id")?,
            item_id: row.try_get("item_id")?,
            event_type: row.try_get("event_type")?,
            status: row.try_get("status")?,
            description: row.try_get("description")?,
            short_description: row.try_get("short_description")?,
            action_url: row.try_get("action_url")?,
            enqueued_at: row.try_get("enqueue_date")?,
            locked: row.try_get("locked")?,
            holder_id: row.try_get("doctor_id")?,
            expires_at: row.try_get("expires")?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewEntry {
    pub jurisdiction_id: i64,
    pub case_id: i64,
    pub patient_id: i64,
    pub item_id: i64,
    pub event_type: EventType,
    pub status: QueueItemStatus,
    pub description: String,
    pub short_description: String,
    pub action_url: String,
}

impl NewEntry {
    pub fn new(
        jurisdiction_id: i64,
        case_id: i64,
        patient_id: i64,
        item_id: i64,
        event_type: EventType,
        status: QueueItemStatus,
    ) -> Self {
        NewEntry {
            jurisdiction_id,
            case_id,
            patient_id,
            item_id,
            event_type,
            status,
            description: String::new(),
            short_description: String::new(),
            action_url: String::new(),
        }
    }

    pub fn with_description(
        mut self,
        description: impl Into<String>,
        short_description: impl Into<String>,
    ) -> Self {
        self.description = description.into();
        self.short_description = short_description.into();
        self
    }

    pub fn with_action_url(mut self, action_url: impl Into<String>) -> Self {
        self.action_url = action_url.into();
        self
    }
}

/// Time an entry has been waiting
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ItemAge {
    pub id: i64,
    pub case_id: i64,
    pub jurisdiction_id: i64,
    pub locked: bool,
    pub age: Duration,
}

impl ItemAge {
    /// Clock skew never produces a negative age
    pub fn of(entry: &QueueEntry, now: DateTime<Utc>) -> Self {
        let age = (now - entry.enqueued_at).to_std().unwrap_or_default();

        ItemAge {
            id: entry.id,
            case_id: entry.case_id,
            jurisdiction_id: entry.jurisdiction_id,
            locked: entry.locked,
            age,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub enum LockOutcome {
    Acquired,
    AlreadyLocked,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub enum HolderOutcome {
    Done,
    NotHolder,
}

impl HolderOutcome {
    fn from_affected(affected: u64) -> Self {
        if affected == 1 {
            HolderOutcome::Done
        } else {
            HolderOutcome::NotHolder
        }
    }
}

fn entries(rows: Vec<Row>) -> Result<Vec<QueueEntry>, Error> {
    rows.iter().map(QueueEntry::try_from).collect()
}

/// Unlocked, with no holder and no expiry
pub async fn enqueue(
    tx: &Transaction<'_>,
    entry: &NewEntry,
    enqueued_at: DateTime<Utc>,
) -> Result<i64, Error> {
    let row = tx
        .query_one(
            INSERT_ENTRY,
            &[
                &entry.jurisdiction_id,
                &entry.case_id,
                &entry.patient_id,
                &entry.item_id,
                &entry.event_type,
                &entry.status,
                &entry.description,
                &entry.short_description,
                &entry.action_url,
                &enqueued_at,
            ],
        )
        .await?;
    let id: i64 = row.try_get("id")?;

    debug!(target: QUEUE, msg = "Enqueued case", id, case_id = entry.case_id, jurisdiction_id = entry.jurisdiction_id);
    Ok(id)
}

///
/// Entries in the given jurisdictions that are unlocked or held by the doctor.
/// Ordered by enqueue time, then id.
///
pub async fn list_eligible(
    db: Db<'_>,
    jurisdictions: &[i64],
    doctor_id: i64,
) -> Result<Vec<QueueEntry>, Error> {
    let rows = db.query(SELECT_ELIGIBLE, &[&jurisdictions, &doctor_id]).await?;
    entries(rows)
}

pub async fn list_claimed(db: Db<'_>) -> Result<Vec<QueueEntry>, Error> {
    let rows = db.query(SELECT_CLAIMED, &[]).await?;
    entries(rows)
}

pub async fn list_all(db: Db<'_>) -> Result<Vec<QueueEntry>, Error> {
    let rows = db.query(SELECT_ALL, &[]).await?;
    entries(rows)
}

pub async fn oldest(db: Db<'_>, limit: i64, now: DateTime<Utc>) -> Result<Vec<ItemAge>, Error> {
    let rows = db.query(SELECT_OLDEST, &[&limit]).await?;

    let ages = entries(rows)?
        .iter()
        .map(|entry| ItemAge::of(entry, now))
        .collect();
    Ok(ages)
}

pub async fn temp_claimed_entry(
    db: Db<'_>,
    case_id: i64,
    doctor_id: i64,
) -> Result<Option<QueueEntry>, Error> {
    let row = db.query_opt(SELECT_TEMP_CLAIMED, &[&case_id, &doctor_id]).await?;
    row.as_ref().map(QueueEntry::try_from).transpose()
}

pub async fn jurisdictions_with_unclaimed(db: Db<'_>) -> Result<Vec<i64>, Error> {
    let rows = db.query(SELECT_JURISDICTIONS_WITH_UNCLAIMED, &[]).await?;

    let jurisdictions = rows
        .iter()
        .map(|row| row.try_get("care_providing_state_id"))
        .collect::<Result<Vec<i64>, _>>()?;
    Ok(jurisdictions)
}

/// Locked entries whose expiry is at or before `now`, soonest first
pub async fn expired(
    db: Db<'_>,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<QueueEntry>, Error> {
    let rows = db.query(SELECT_EXPIRED, &[&now, &limit]).await?;
    entries(rows)
}

pub async fn get_for_update(
    tx: &Transaction<'_>,
    case_id: i64,
) -> Result<Option<QueueEntry>, Error> {
    let row = tx.query_opt(SELECT_FOR_UPDATE, &[&case_id]).await?;
    row.as_ref().map(QueueEntry::try_from).transpose()
}

///
/// Conditional on the entry being unlocked.
/// Of two concurrent lockers exactly one sees `Acquired`.
///
pub async fn lock(
    tx: &Transaction<'_>,
    case_id: i64,
    doctor_id: i64,
    expires_at: DateTime<Utc>,
) -> Result<LockOutcome, Error> {
    let affected = tx
        .execute(LOCK, &[&case_id, &doctor_id, &expires_at])
        .await?;

    if affected == 1 {
        debug!(target: QUEUE, msg = "Locked entry", case_id, doctor_id, %expires_at);
        Ok(LockOutcome::Acquired)
    } else {
        debug!(target: QUEUE, msg = "Entry already locked", case_id, doctor_id);
        Ok(LockOutcome::AlreadyLocked)
    }
}

pub async fn release(
    tx: &Transaction<'_>,
    case_id: i64,
    doctor_id: i64,
) -> Result<HolderOutcome, Error> {
    let affected = tx.execute(RELEASE, &[&case_id, &doctor_id]).await?;

    debug!(target: QUEUE, msg = "Release entry", case_id, doctor_id, affected);
    Ok(HolderOutcome::from_affected(affected))
}

///
/// Releases only when the lock expired at or before `now`.
/// A lock extended after the sweeper scanned it is left alone.
///
pub async fn release_expired(
    tx: &Transaction<'_>,
    case_id: i64,
    doctor_id: i64,
    now: DateTime<Utc>,
) -> Result<HolderOutcome, Error> {
    let affected = tx
        .execute(RELEASE_EXPIRED, &[&case_id, &doctor_id, &now])
        .await?;

    debug!(target: QUEUE, msg = "Release expired entry", case_id, doctor_id, affected);
    Ok(HolderOutcome::from_affected(affected))
}

pub async fn remove(
    tx: &Transaction<'_>,
    case_id: i64,
    doctor_id: i64,
) -> Result<HolderOutcome, Error> {
    let affected = tx.execute(REMOVE, &[&case_id, &doctor_id]).await?;

    debug!(target: QUEUE, msg = "Remove entry", case_id, doctor_id, affected);
    Ok(HolderOutcome::from_affected(affected))
}

pub async fn remove_unlocked(tx: &Transaction<'_>, case_id: i64) -> Result<u64, Error> {
    let affected = tx.execute(REMOVE_UNLOCKED, &[&case_id]).await?;
    Ok(affected)
}

/// Rows affected, for the caller to check
pub async fn set_expiry(
    tx: &Transaction<'_>,
    case_id: i64,
    doctor_id: i64,
    expires_at: DateTime<Utc>,
) -> Result<u64, Error> {
    let affected = tx
        .execute(SET_EXPIRY, &[&case_id, &doctor_id, &expires_at])
        .await?;
    Ok(affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    fn t() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn entry() -> QueueEntry {
        QueueEntry {
            id: 1,
            jurisdiction_id: 7,
            case_id: 100,
            patient_id: 42,
            item_id: 500,
            event_type: EventType::PatientVisit,
            status: QueueItemStatus::Pending,
            description: String::new(),
            short_description: String::new(),
            action_url: String::new(),
            enqueued_at: t(),
            locked: false,
            holder_id: None,
            expires_at: None,
        }
    }

    #[test]
    fn holder_requires_lock() {
        let mut entry = entry();
        assert!(!entry.is_held_by(11));

        entry.locked = true;
        entry.holder_id = Some(11);
        entry.expires_at = Some(t() + TimeDelta::minutes(15));

        assert!(entry.is_held_by(11));
        assert!(!entry.is_held_by(12));
    }

    #[test]
    fn expiry_is_strict() {
        let mut entry = entry();
        entry.locked = true;
        entry.holder_id = Some(11);
        entry.expires_at = Some(t() + TimeDelta::minutes(15));

        assert!(!entry.is_expired(t() + TimeDelta::minutes(14)));
        assert!(entry.is_expired(t() + TimeDelta::minutes(15)));
        assert!(entry.is_expired(t() + TimeDelta::minutes(16)));
    }

    #[test]
    fn unlocked_entries_never_expire() {
        assert!(!entry().is_expired(t() + TimeDelta::days(365)));
    }

    #[test]
    fn item_age() {
        let age = ItemAge::of(&entry(), t() + TimeDelta::minutes(3));
        assert_eq!(age.age, Duration::from_secs(180));
        assert_eq!(age.case_id, 100);

        let age = ItemAge::of(&entry(), t() - TimeDelta::minutes(3));
        assert_eq!(age.age, Duration::ZERO);
    }

    #[test]
    fn new_entry_builder() {
        let entry = NewEntry::new(
            7,
            100,
            42,
            500,
            EventType::PatientVisit,
            QueueItemStatus::Pending,
        )
        .with_description("New visit", "Visit")
        .with_action_url("spruce:///action/view_patient_visit?patient_visit_id=500");

        assert_eq!(entry.short_description, "Visit");
        assert!(entry.action_url.ends_with("500"));
    }
}
