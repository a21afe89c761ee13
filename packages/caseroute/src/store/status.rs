use postgres_types::{FromSql, ToSql};
use serde::Serialize;
use std::fmt::Display;

///
/// Status of a patient case
/// Mapped to the `case_status` enum type
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ToSql, FromSql, Serialize)]
#[postgres(name = "case_status")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseStatus {
    #[postgres(name = "UNCLAIMED")]
    Unclaimed,
    #[postgres(name = "TEMP_CLAIMED")]
    TempClaimed,
    #[postgres(name = "CLAIMED")]
    Claimed,
    #[postgres(name = "INACTIVE")]
    Inactive,
}

impl CaseStatus {
    pub const ALL: [CaseStatus; 4] = [
        CaseStatus::Unclaimed,
        CaseStatus::TempClaimed,
        CaseStatus::Claimed,
        CaseStatus::Inactive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::Unclaimed => "UNCLAIMED",
            CaseStatus::TempClaimed => "TEMP_CLAIMED",
            CaseStatus::Claimed => "CLAIMED",
            CaseStatus::Inactive => "INACTIVE",
        }
    }
}

impl Display for CaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

///
/// Status of a patient file or case assignment edge
/// Mapped to the `assignment_status` enum type
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ToSql, FromSql, Serialize)]
#[postgres(name = "assignment_status")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentStatus {
    #[postgres(name = "TEMP")]
    Temp,
    #[postgres(name = "ACTIVE")]
    Active,
}

impl Display for AssignmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AssignmentStatus::Temp => "TEMP",
            AssignmentStatus::Active => "ACTIVE",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ToSql, FromSql, Serialize)]
#[postgres(name = "queue_item_status")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueItemStatus {
    #[postgres(name = "PENDING")]
    Pending,
    #[postgres(name = "ONGOING")]
    Ongoing,
    #[postgres(name = "TREATED")]
    Treated,
    #[postgres(name = "TRIAGED")]
    Triaged,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ToSql, FromSql, Serialize)]
#[postgres(name = "queue_event_type")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    #[postgres(name = "PATIENT_VISIT")]
    PatientVisit,
    #[postgres(name = "TREATMENT_PLAN")]
    TreatmentPlan,
    #[postgres(name = "CASE_MESSAGE")]
    CaseMessage,
    #[postgres(name = "REFILL_REQUEST")]
    RefillRequest,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_status_display_matches_database_labels() {
        let labels = CaseStatus::ALL
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>();

        assert_eq!(
            labels,
            vec!["UNCLAIMED", "TEMP_CLAIMED", "CLAIMED", "INACTIVE"]
        );
    }

    #[test]
    fn serializes_with_database_labels() {
        let json = serde_json::to_string(&CaseStatus::TempClaimed).unwrap();
        assert_eq!(json, r#""TEMP_CLAIMED""#);

        let json = serde_json::to_string(&EventType::PatientVisit).unwrap();
        assert_eq!(json, r#""PATIENT_VISIT""#);

        let json = serde_json::to_string(&AssignmentStatus::Active).unwrap();
        assert_eq!(json, r#""ACTIVE""#);
    }
}
