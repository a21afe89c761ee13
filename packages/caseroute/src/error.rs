use crate::store::CaseStatus;
use std::io;
use thiserror::Error;
use tokio_postgres::error::SqlState;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Claim(#[from] ClaimError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("Prometheus exporter could not be started: {0}")]
    Prometheus(String),

    #[error(transparent)]
    Tls(#[from] rustls::Error),
}

#[derive(Error, Debug)]
pub enum ClaimError {
    #[error("Doctor {doctor_id} is not eligible in any jurisdiction")]
    NotEligibleAnywhere { doctor_id: i64 },

    #[error("Case {case_id} does not exist")]
    CaseNotFound { case_id: i64 },

    #[error("Case {case_id} cannot be claimed while {status}")]
    CaseNotClaimable { case_id: i64, status: CaseStatus },

    #[error("Claim on case {case_id} is forbidden: {reason}")]
    CaseClaimForbidden { case_id: i64, reason: &'static str },

    #[error("Doctor {doctor_id} holds no temporary claim on case {case_id}")]
    TempClaimMissing { case_id: i64, doctor_id: i64 },

    #[error("Doctor {doctor_id} no longer holds the claim on case {case_id}")]
    ClaimLost { case_id: i64, doctor_id: i64 },

    #[error("Patient {patient_id} does not own case {case_id}")]
    PatientMismatch { case_id: i64, patient_id: i64 },

    #[error("Case {case_id} cannot move from {from} to {to}")]
    IllegalCaseTransition {
        case_id: i64,
        from: CaseStatus,
        to: CaseStatus,
    },

    #[error("Claim on case {case_id} is inconsistent: expected one row in {table}, found {affected}")]
    InconsistentClaim {
        case_id: i64,
        table: &'static str,
        affected: u64,
    },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Transient store error: {0}")]
    Transient(#[source] tokio_postgres::Error),

    #[error("Store rejected the statement: {0}")]
    Rejected(#[source] tokio_postgres::Error),

    #[error("Role type {tag} is missing from the role_type table")]
    UnknownRole { tag: String },

    #[error("Error creating connection after {retries} retries")]
    DatabaseConnection { retries: u32 },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Database host {name} is not a valid server name")]
    InvalidServerName { name: String },

    #[error("Invalid value {value} for {name}")]
    InvalidParameter { name: String, value: String },

    #[error("Missing field {name} from configuration file or environment")]
    MissingParameter { name: String },

    #[error(transparent)]
    FileOrEnvironment(#[from] config::ConfigError),
}

impl Error {
    ///
    /// True when the failure came from connectivity or concurrency in the store.
    /// The operation rolled back and may be issued again.
    ///
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Store(StoreError::Transient(_)))
    }

    ///
    /// True when another doctor got there first.
    /// Callers refresh and re-offer instead of retrying.
    ///
    pub fn is_forbidden(&self) -> bool {
        matches!(
            self,
            Error::Claim(ClaimError::CaseClaimForbidden { .. })
                | Error::Claim(ClaimError::ClaimLost { .. })
        )
    }
}

impl From<tokio_postgres::Error> for StoreError {
    fn from(e: tokio_postgres::Error) -> Self {
        if is_transient(&e) {
            StoreError::Transient(e)
        } else {
            StoreError::Rejected(e)
        }
    }
}

impl From<tokio_postgres::Error> for Error {
    fn from(e: tokio_postgres::Error) -> Self {
        Error::Store(e.into())
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e.into())
    }
}

fn is_transient(e: &tokio_postgres::Error) -> bool {
    if e.is_closed() {
        return true;
    }

    match e.code() {
        Some(code) => is_transient_state(code),
        // No SQLSTATE: the failure happened below the protocol
        None => std::error::Error::source(e)
            .is_some_and(|source| source.downcast_ref::<io::Error>().is_some()),
    }
}

///
/// Serialization failures, deadlocks, connection exceptions and server shutdown
///
pub fn is_transient_state(code: &SqlState) -> bool {
    let code = code.code();

    matches!(code, "40001" | "40P01" | "57P01" | "57P02" | "57P03") || code.starts_with("08")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_sql_states() {
        assert!(is_transient_state(&SqlState::T_R_SERIALIZATION_FAILURE));
        assert!(is_transient_state(&SqlState::T_R_DEADLOCK_DETECTED));
        assert!(is_transient_state(&SqlState::CONNECTION_FAILURE));
        assert!(is_transient_state(&SqlState::CONNECTION_EXCEPTION));
        assert!(is_transient_state(&SqlState::ADMIN_SHUTDOWN));
        assert!(is_transient_state(&SqlState::CANNOT_CONNECT_NOW));
    }

    #[test]
    fn rejected_sql_states() {
        assert!(!is_transient_state(&SqlState::UNIQUE_VIOLATION));
        assert!(!is_transient_state(&SqlState::FOREIGN_KEY_VIOLATION));
        assert!(!is_transient_state(&SqlState::CHECK_VIOLATION));
        assert!(!is_transient_state(&SqlState::UNDEFINED_TABLE));
    }

    #[test]
    fn forbidden_groups_lost_races() {
        let err: Error = ClaimError::CaseClaimForbidden {
            case_id: 100,
            reason: "locked by another doctor",
        }
        .into();
        assert!(err.is_forbidden());
        assert!(!err.is_retryable());

        let err: Error = ClaimError::ClaimLost {
            case_id: 100,
            doctor_id: 11,
        }
        .into();
        assert!(err.is_forbidden());

        let err: Error = ClaimError::TempClaimMissing {
            case_id: 100,
            doctor_id: 11,
        }
        .into();
        assert!(!err.is_forbidden());
    }

    #[test]
    fn error_messages() {
        let err = ClaimError::IllegalCaseTransition {
            case_id: 100,
            from: CaseStatus::Claimed,
            to: CaseStatus::TempClaimed,
        };
        assert_eq!(
            err.to_string(),
            "Case 100 cannot move from CLAIMED to TEMP_CLAIMED"
        );
    }
}
