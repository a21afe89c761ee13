mod status;

use crate::error::{Error, StoreError};
use crate::log::STORE;
use std::collections::HashMap;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Row, Transaction};
use tracing::{debug, info};

pub use status::{AssignmentStatus, CaseStatus, EventType, QueueItemStatus};

/// Schema for every table the router reads or writes
pub const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

/// Serialises concurrent schema application across processes
const SCHEMA_LOCK_KEY: i64 = 0x6361_7365_726f_7574;

const ROLE_TYPES_QUERY: &str = "SELECT id, role_type_tag FROM role_type";

///
/// Handle to the store
///
/// Either the root client or an open transaction. Both expose the same reading/writing surface.
/// Read-only views accept a `Db`, anything that mutates state takes the `Transaction` directly.
///
#[derive(Clone, Copy)]
pub enum Db<'a> {
    Client(&'a Client),
    Transaction(&'a Transaction<'a>),
}

impl<'a> From<&'a Client> for Db<'a> {
    fn from(client: &'a Client) -> Self {
        Db::Client(client)
    }
}

impl<'a> From<&'a Transaction<'a>> for Db<'a> {
    fn from(tx: &'a Transaction<'a>) -> Self {
        Db::Transaction(tx)
    }
}

impl Db<'_> {
    pub async fn query(
        &self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, Error> {
        let rows = match self {
            Db::Client(client) => client.query(statement, params).await?,
            Db::Transaction(tx) => tx.query(statement, params).await?,
        };
        Ok(rows)
    }

    pub async fn query_opt(
        &self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Option<Row>, Error> {
        let row = match self {
            Db::Client(client) => client.query_opt(statement, params).await?,
            Db::Transaction(tx) => tx.query_opt(statement, params).await?,
        };
        Ok(row)
    }

    pub async fn query_one(
        &self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Row, Error> {
        let row = match self {
            Db::Client(client) => client.query_one(statement, params).await?,
            Db::Transaction(tx) => tx.query_one(statement, params).await?,
        };
        Ok(row)
    }

    pub async fn execute(
        &self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64, Error> {
        let affected = match self {
            Db::Client(client) => client.execute(statement, params).await?,
            Db::Transaction(tx) => tx.execute(statement, params).await?,
        };
        Ok(affected)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub enum RoleType {
    Doctor,
    MedicalAssistant,
}

impl RoleType {
    pub fn tag(&self) -> &'static str {
        match self {
            RoleType::Doctor => "DOCTOR",
            RoleType::MedicalAssistant => "MA",
        }
    }

    fn from_tag(tag: &str) -> Option<RoleType> {
        match tag {
            "DOCTOR" => Some(RoleType::Doctor),
            "MA" => Some(RoleType::MedicalAssistant),
            _ => None,
        }
    }
}

///
/// Role type ids keyed by role
///
/// Reference data loaded once at startup and never mutated afterwards.
///
#[derive(Clone, Debug)]
pub struct RoleTypes {
    ids: HashMap<RoleType, i64>,
}

impl RoleTypes {
    pub async fn load(db: Db<'_>) -> Result<Self, Error> {
        let rows = db.query(ROLE_TYPES_QUERY, &[]).await?;

        let mut tags = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("id")?;
            let tag: String = row.try_get("role_type_tag")?;
            tags.push((tag, id));
        }

        let role_types = RoleTypes::from_tags(tags)?;
        debug!(target: STORE, msg = "Loaded role types", role_types = ?role_types.ids);

        Ok(role_types)
    }

    ///
    /// Build the lookup from (tag, id) pairs
    /// Unknown tags are ignored, every role the router uses must be present.
    ///
    pub fn from_tags<I, S>(tags: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (S, i64)>,
        S: AsRef<str>,
    {
        let ids = tags
            .into_iter()
            .filter_map(|(tag, id)| RoleType::from_tag(tag.as_ref()).map(|role| (role, id)))
            .collect::<HashMap<_, _>>();

        for role in [RoleType::Doctor, RoleType::MedicalAssistant] {
            if !ids.contains_key(&role) {
                return Err(StoreError::UnknownRole {
                    tag: role.tag().to_string(),
                }
                .into());
            }
        }

        Ok(RoleTypes { ids })
    }

    pub fn id(&self, role: RoleType) -> i64 {
        // from_tags guarantees every role is present
        self.ids.get(&role).copied().unwrap_or_default()
    }

    pub fn doctor(&self) -> i64 {
        self.id(RoleType::Doctor)
    }

    pub fn role_for(&self, id: i64) -> Option<RoleType> {
        self.ids
            .iter()
            .find_map(|(role, role_id)| (*role_id == id).then_some(*role))
    }
}

///
/// Apply the schema inside a single transaction
/// Safe to run concurrently and repeatedly.
///
pub async fn apply_schema(client: &mut Client) -> Result<(), Error> {
    let tx = client.transaction().await?;
    tx.execute("SELECT pg_advisory_xact_lock($1)", &[&SCHEMA_LOCK_KEY])
        .await?;
    tx.batch_execute(SCHEMA_SQL).await?;
    tx.commit().await?;

    info!(target: STORE, msg = "Applied case routing schema");
    Ok(())
}
