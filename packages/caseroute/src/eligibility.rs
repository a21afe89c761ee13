use crate::error::Error;
use crate::log::ELIGIBILITY;
use crate::store::{Db, RoleType, RoleTypes};
use serde::Serialize;
use tokio_postgres::Transaction;
use tracing::debug;

const SELECT_JURISDICTION: &str = r#"
    SELECT id, state, clinical_pathway_tag
    FROM care_providing_state
    WHERE state = $1 AND clinical_pathway_tag = $2
"#;

const INSERT_JURISDICTION: &str = r#"
    INSERT INTO care_providing_state (state, long_state, clinical_pathway_tag)
    VALUES ($1, $2, $3)
    ON CONFLICT (state, clinical_pathway_tag) DO UPDATE SET long_state = EXCLUDED.long_state
    RETURNING id
"#;

const UPSERT_ELIGIBILITY: &str = r#"
    INSERT INTO care_provider_state_elligibility
        (role_type_id, provider_id, care_providing_state_id, notify, unavailable)
    VALUES ($1, $2, $3, $4, $5)
    ON CONFLICT (role_type_id, provider_id, care_providing_state_id)
    DO UPDATE SET notify = EXCLUDED.notify, unavailable = EXCLUDED.unavailable
"#;

const SELECT_PROVIDERS_TO_NOTIFY: &str = r#"
    SELECT provider_id, role_type_id
    FROM care_provider_state_elligibility
    WHERE care_providing_state_id = $1 AND notify AND NOT unavailable
"#;

const SELECT_PROVIDERS_IN: &str = r#"
    SELECT provider_id
    FROM care_provider_state_elligibility
    WHERE care_providing_state_id = $1 AND role_type_id = $2
    ORDER BY provider_id
"#;

const SELECT_JURISDICTIONS_FOR: &str = r#"
    SELECT care_providing_state_id
    FROM care_provider_state_elligibility
    WHERE provider_id = $1 AND role_type_id = $2
    ORDER BY care_providing_state_id
"#;

/// A state paired with a clinical pathway
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Jurisdiction {
    pub id: i64,
    pub state: String,
    pub clinical_pathway_tag: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProviderToNotify {
    pub provider_id: i64,
    pub role: RoleType,
}

///
/// Onboarding input for a provider in one jurisdiction
///
#[derive(Clone, Copy, Debug)]
pub struct Eligibility {
    pub jurisdiction_id: i64,
    pub provider_id: i64,
    pub role: RoleType,
    pub notify: bool,
    pub unavailable: bool,
}

pub async fn find_jurisdiction(
    db: Db<'_>,
    state: &str,
    clinical_pathway_tag: &str,
) -> Result<Option<Jurisdiction>, Error> {
    let row = db
        .query_opt(SELECT_JURISDICTION, &[&state, &clinical_pathway_tag])
        .await?;

    row.map(|row| -> Result<Jurisdiction, Error> {
        Ok(Jurisdiction {
            id: row.try_get("id")?,
            state: row.try_get("state")?,
            clinical_pathway_tag: row.try_get("clinical_pathway_tag")?,
        })
    })
    .transpose()
}

/// Registers a jurisdiction, returning the existing id when already present
pub async fn add_jurisdiction(
    tx: &Transaction<'_>,
    state: &str,
    long_state: &str,
    clinical_pathway_tag: &str,
) -> Result<i64, Error> {
    let row = tx
        .query_one(
            INSERT_JURISDICTION,
            &[&state, &long_state, &clinical_pathway_tag],
        )
        .await?;
    Ok(row.try_get("id")?)
}

/// Onboards a provider in a jurisdiction, or updates the flags of an existing entry
pub async fn make_eligible(
    tx: &Transaction<'_>,
    roles: &RoleTypes,
    eligibility: Eligibility,
) -> Result<(), Error> {
    let role_type_id = roles.id(eligibility.role);

    tx.execute(
        UPSERT_ELIGIBILITY,
        &[
            &role_type_id,
            &eligibility.provider_id,
            &eligibility.jurisdiction_id,
            &eligibility.notify,
            &eligibility.unavailable,
        ],
    )
    .await?;

    debug!(
        target: ELIGIBILITY,
        msg = "Provider eligible",
        provider_id = eligibility.provider_id,
        jurisdiction_id = eligibility.jurisdiction_id,
        role = eligibility.role.tag(),
    );
    Ok(())
}

///
/// Providers in the jurisdiction that want to hear about new cases right now.
/// Order is unspecified.
///
pub async fn providers_to_notify(
    db: Db<'_>,
    roles: &RoleTypes,
    jurisdiction_id: i64,
) -> Result<Vec<ProviderToNotify>, Error> {
    let rows = db
        .query(SELECT_PROVIDERS_TO_NOTIFY, &[&jurisdiction_id])
        .await?;

    let mut providers = Vec::with_capacity(rows.len());
    for row in rows {
        let role_type_id: i64 = row.try_get("role_type_id")?;

        // Roles the router does not know about are never notified
        if let Some(role) = roles.role_for(role_type_id) {
            providers.push(ProviderToNotify {
                provider_id: row.try_get("provider_id")?,
                role,
            });
        }
    }

    Ok(providers)
}

/// Every doctor registered in the jurisdiction, whatever their flags
pub async fn providers_in(
    db: Db<'_>,
    roles: &RoleTypes,
    jurisdiction_id: i64,
) -> Result<Vec<i64>, Error> {
    let rows = db
        .query(SELECT_PROVIDERS_IN, &[&jurisdiction_id, &roles.doctor()])
        .await?;

    let providers = rows
        .iter()
        .map(|row| row.try_get("provider_id"))
        .collect::<Result<Vec<i64>, _>>()?;

    Ok(providers)
}

///
/// Jurisdictions the doctor may serve. Empty is not an error.
///
pub async fn jurisdictions_for(
    db: Db<'_>,
    roles: &RoleTypes,
    provider_id: i64,
) -> Result<Vec<i64>, Error> {
    let rows = db
        .query(SELECT_JURISDICTIONS_FOR, &[&provider_id, &roles.doctor()])
        .await?;

    let jurisdictions = rows
        .iter()
        .map(|row| row.try_get("care_providing_state_id"))
        .collect::<Result<Vec<i64>, _>>()?;

    debug!(target: ELIGIBILITY, msg = "Jurisdictions for provider", provider_id, ?jurisdictions);
    Ok(jurisdictions)
}

pub async fn is_eligible(
    db: Db<'_>,
    roles: &RoleTypes,
    provider_id: i64,
    state: &str,
    clinical_pathway_tag: &str,
) -> Result<bool, Error> {
    let Some(jurisdiction) = find_jurisdiction(db, state, clinical_pathway_tag).await? else {
        return Ok(false);
    };

    let jurisdictions = jurisdictions_for(db, roles, provider_id).await?;
    Ok(jurisdictions.contains(&jurisdiction.id))
}
