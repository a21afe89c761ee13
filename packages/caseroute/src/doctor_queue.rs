use crate::error::Error;
use crate::log::QUEUE;
use crate::store::{Db, EventType, QueueItemStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_postgres::{Row, Transaction};
use tracing::debug;

const INSERT_IF_ABSENT: &str = r#"
    INSERT INTO doctor_queue
        (doctor_id, event_type, item_id, patient_case_id, status,
         description, short_description, action_url, enqueue_date)
    SELECT $1::bigint, $2::queue_event_type, $3::bigint, $4::bigint, $5::queue_item_status,
           $6::text, $7::text, $8::text, $9::timestamptz
    WHERE NOT EXISTS (
        SELECT 1 FROM doctor_queue
        WHERE doctor_id = $1 AND event_type = $2 AND item_id = $3 AND status = $5
    )
"#;

const SELECT_FOR_DOCTOR: &str = r#"
    SELECT id, doctor_id, event_type, item_id, patient_case_id, status,
           description, short_description, action_url, enqueue_date
    FROM doctor_queue
    WHERE doctor_id = $1
    ORDER BY enqueue_date, id
"#;

/// A row in a doctor's inbox
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DoctorQueueItem {
    pub id: i64,
    pub doctor_id: i64,
    pub event_type: EventType,
    pub item_id: i64,
    pub case_id: i64,
    pub status: QueueItemStatus,
    pub description: String,
    pub short_description: String,
    pub action_url: String,
    pub enqueued_at: DateTime<Utc>,
}

impl TryFrom<&Row> for DoctorQueueItem {
    type Error = Error;

    fn try_from(row: &Row) -> Result<Self, Self::Error> {
        Ok(DoctorQueueItem {
            id: row.try_get("id")?,
            doctor_id: row.try_get("doctor_id")?,
            event_type: row.try_get("event_type")?,
            item_id: row.try_get("item_id")?,
            case_id: row.try_get("patient_case_id")?,
            status: row.try_get("status")?,
            description: row.try_get("description")?,
            short_description: row.try_get("short_description")?,
            action_url: row.try_get("action_url")?,
            enqueued_at: row.try_get("enqueue_date")?,
        })
    }
}

///
/// Metadata routed into the inbox on permanent assignment.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboxItem {
    pub event_type: EventType,
    pub item_id: i64,
    pub status: QueueItemStatus,
    pub description: String,
    pub short_description: String,
    pub action_url: String,
}

impl InboxItem {
    pub fn new(event_type: EventType, item_id: i64, status: QueueItemStatus) -> Self {
        InboxItem {
            event_type,
            item_id,
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

///
/// Inserts the item unless the doctor already has one with the same item, event type and status.
/// Returns true when a row was inserted.
///
pub async fn insert(
    tx: &Transaction<'_>,
    doctor_id: i64,
    case_id: i64,
    item: &InboxItem,
    enqueued_at: DateTime<Utc>,
) -> Result<bool, Error> {
    let affected = tx
        .execute(
            INSERT_IF_ABSENT,
            &[
                &doctor_id,
                &item.event_type,
                &item.item_id,
                &case_id,
                &item.status,
                &item.description,
                &item.short_description,
                &item.action_url,
                &enqueued_at,
            ],
        )
        .await?;

    let inserted = affected == 1;
    debug!(target: QUEUE, msg = "Doctor queue insert", doctor_id, case_id, item_id = item.item_id, inserted);
    Ok(inserted)
}

pub async fn for_doctor(db: Db<'_>, doctor_id: i64) -> Result<Vec<DoctorQueueItem>, Error> {
    let rows = db.query(SELECT_FOR_DOCTOR, &[&doctor_id]).await?;
    rows.iter().map(DoctorQueueItem::try_from).collect()
}
