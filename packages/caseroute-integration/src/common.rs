#![allow(dead_code)]

use caseroute::config::ClaimConfig;
use caseroute::coordinator::Router;
use caseroute::eligibility::{self, Eligibility};
use caseroute::queue::{NewEntry, QueueEntry};
use caseroute::registry::{self, Edge};
use caseroute::store::{self, CaseStatus, EventType, QueueItemStatus, RoleType};
use caseroute::{lifecycle, Clock};
use chrono::{DateTime, TimeZone, Utc};
use rand::{distr::Alphanumeric, Rng};
use std::sync::Once;
use std::time::Duration;
use tokio_postgres::{Client, NoTls};
use tracing_subscriber::{filter::Directive, EnvFilter, FmtSubscriber};

pub const PATHWAY: &str = "health_condition_acne";

pub const FIFTEEN_MINUTES: Duration = Duration::from_secs(15 * 60);

static INIT: Once = Once::new();

pub fn id() -> i64 {
    rand::rng().random_range(1..=i64::from(i32::MAX))
}

pub fn random_string() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect()
}

pub fn trace() {
    INIT.call_once(|| {
        let log_level: Directive = tracing::Level::DEBUG.into();

        let filter = EnvFilter::from_default_env().add_directive(log_level.to_owned());

        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .expect("setting default subscriber failed");
    });
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

pub fn connection_config() -> tokio_postgres::Config {
    let mut db_config = tokio_postgres::Config::new();

    let port = env_or("CR_DATABASE__PORT", "5532")
        .parse::<u16>()
        .expect("CR_DATABASE__PORT to be a port number");

    db_config
        .host(&env_or("CR_DATABASE__HOST", "localhost"))
        .port(port)
        .user(&env_or("CR_DATABASE__USERNAME", "postgres"))
        .password(env_or("CR_DATABASE__PASSWORD", "password"))
        .dbname(&env_or("CR_DATABASE__NAME", "caseroute"))
        .connect_timeout(Duration::from_secs(5));

    db_config
}

///
/// Connects to the test database.
/// Returns None, and the test is skipped, when no database is reachable.
///
pub async fn connect() -> Option<Client> {
    let (client, connection) = match connection_config().connect(NoTls).await {
        Ok(connected) => connected,
        Err(e) => {
            eprintln!("Skipping: test database is not reachable: {e}");
            return None;
        }
    };

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            eprintln!("connection error: {}", e);
        }
    });

    Some(client)
}

///
/// Connects, applies the schema and loads the router.
///
pub async fn setup(clock: Clock) -> Option<(Client, Router)> {
    trace();

    let mut client = connect().await?;
    store::apply_schema(&mut client).await.unwrap();

    let router = Router::init(&client, clock, ClaimConfig::default())
        .await
        .unwrap();

    Some((client, router))
}

pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
        .unwrap()
}

pub fn minutes(n: u64) -> Duration {
    Duration::from_secs(n * 60)
}

/// A jurisdiction no other test uses
pub async fn jurisdiction(client: &mut Client) -> i64 {
    let tx = client.transaction().await.unwrap();
    let state = random_string();
    let id = eligibility::add_jurisdiction(&tx, &state, "Test state", PATHWAY)
        .await
        .unwrap();
    tx.commit().await.unwrap();
    id
}

pub async fn eligible(client: &mut Client, router: &Router, doctor_id: i64, jurisdiction_id: i64) {
    let tx = client.transaction().await.unwrap();
    eligibility::make_eligible(
        &tx,
        router.roles(),
        Eligibility {
            jurisdiction_id,
            provider_id: doctor_id,
            role: RoleType::Doctor,
            notify: true,
            unavailable: false,
        },
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();
}

/// A new `UNCLAIMED` case, not queued
pub async fn case(client: &mut Client, patient_id: i64) -> i64 {
    let tx = client.transaction().await.unwrap();
    let case_id = lifecycle::create(&tx, patient_id, PATHWAY).await.unwrap();
    tx.commit().await.unwrap();
    case_id
}

pub fn visit(jurisdiction_id: i64, case_id: i64, patient_id: i64) -> NewEntry {
    NewEntry::new(
        jurisdiction_id,
        case_id,
        patient_id,
        id(),
        EventType::PatientVisit,
        QueueItemStatus::Pending,
    )
    .with_description("New visit", "Visit")
}

/// A new case for the patient, queued in the jurisdiction
pub async fn queued_case(
    client: &mut Client,
    router: &Router,
    jurisdiction_id: i64,
    patient_id: i64,
) -> i64 {
    let case_id = case(client, patient_id).await;
    router
        .enqueue(client, &visit(jurisdiction_id, case_id, patient_id))
        .await
        .unwrap();
    case_id
}

pub async fn active_file_edge(client: &mut Client, router: &Router, doctor_id: i64, patient_id: i64) {
    let tx = client.transaction().await.unwrap();
    registry::grant_active_file_edge(&tx, router.roles(), doctor_id, patient_id, PATHWAY)
        .await
        .unwrap();
    tx.commit().await.unwrap();
}

pub async fn file_edge(
    client: &Client,
    router: &Router,
    doctor_id: i64,
    patient_id: i64,
) -> Option<Edge> {
    registry::file_edge(client.into(), router.roles(), doctor_id, patient_id)
        .await
        .unwrap()
}

pub async fn case_edge(client: &Client, router: &Router, doctor_id: i64, case_id: i64) -> Option<Edge> {
    registry::case_edge(client.into(), router.roles(), doctor_id, case_id)
        .await
        .unwrap()
}

pub async fn status(client: &Client, router: &Router, case_id: i64) -> CaseStatus {
    router.case(client, case_id).await.unwrap().unwrap().status
}

/// Queue row for the case, whoever holds it
pub async fn queue_row(
    client: &Client,
    router: &Router,
    case_id: i64,
) -> Option<QueueEntry> {
    router
        .list_all(client)
        .await
        .unwrap()
        .into_iter()
        .find(|entry| entry.case_id == case_id)
}
