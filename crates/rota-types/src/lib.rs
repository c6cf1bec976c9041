//! Shared data types for the Rota shift-coverage messaging pipeline.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Error returned when a coverage status transition is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusTransitionError {
    #[error("invalid coverage status transition: {from:?} -> {to:?}")]
    Invalid {
        from: CoverageStatus,
        to: CoverageStatus,
    },
}

/// Directory role attached to a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProfileRole {
    Admin,
    #[default]
    Employee,
    Manager,
    Hr,
}

impl ProfileRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Employee => "employee",
            Self::Manager => "manager",
            Self::Hr => "hr",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Self::Admin),
            "employee" => Some(Self::Employee),
            "manager" => Some(Self::Manager),
            "hr" => Some(Self::Hr),
            _ => None,
        }
    }
}

/// Directory profile. Owned by the external directory service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: ProfileRole,
    pub updated_at: DateTime<Utc>,
    /// Hidden from default visibility reads; only the privileged path returns it.
    #[serde(default)]
    pub restricted: bool,
}

impl Profile {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        email: impl Into<String>,
        role: ProfileRole,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: email.into(),
            role,
            updated_at: Utc::now(),
            restricted: false,
        }
    }

    pub fn is_administrator(&self) -> bool {
        self.role == ProfileRole::Admin
    }
}

/// Maps an employee to the single admin responsible for them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminAssignment {
    pub employee_id: String,
    pub admin_id: String,
}

/// Kind of direct message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommunicationType {
    General,
    ShiftCoverage,
    Urgent,
    SystemNotification,
    Announcement,
}

impl CommunicationType {
    /// Types that count toward unread badges and are cleared when a conversation is opened.
    pub const CONVERSATION_TRACKED: [Self; 3] = [Self::General, Self::ShiftCoverage, Self::Urgent];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::ShiftCoverage => "shift_coverage",
            Self::Urgent => "urgent",
            Self::SystemNotification => "system_notification",
            Self::Announcement => "announcement",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "general" => Some(Self::General),
            "shift_coverage" => Some(Self::ShiftCoverage),
            "urgent" => Some(Self::Urgent),
            "system_notification" => Some(Self::SystemNotification),
            "announcement" => Some(Self::Announcement),
            _ => None,
        }
    }

    pub fn is_conversation_tracked(self) -> bool {
        Self::CONVERSATION_TRACKED.contains(&self)
    }
}

/// Lifecycle state of a shift-coverage request and its communication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CoverageStatus {
    #[default]
    Pending,
    Accepted,
    Declined,
}

impl CoverageStatus {
    /// Returns true when this status can transition to `next`.
    ///
    /// Re-applying the current status is allowed so a half-applied response can be retried.
    pub fn can_transition_to(self, next: Self) -> bool {
        if self == next {
            return true;
        }

        matches!(
            (self, next),
            (Self::Pending, Self::Accepted) | (Self::Pending, Self::Declined)
        )
    }

    /// Returns an error if transitioning to `next` is not allowed.
    pub fn ensure_transition(self, next: Self) -> Result<(), StatusTransitionError> {
        if self.can_transition_to(next) {
            return Ok(());
        }

        Err(StatusTransitionError::Invalid {
            from: self,
            to: next,
        })
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Accepted | Self::Declined)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "declined" => Some(Self::Declined),
            _ => None,
        }
    }
}

/// Direct message between two profiles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Communication {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub message: String,
    pub communication_type: CommunicationType,
    /// Only meaningful for shift coverage.
    pub status: Option<CoverageStatus>,
    pub admin_cc: Option<String>,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

impl Communication {
    pub fn is_shift_coverage(&self) -> bool {
        self.communication_type == CommunicationType::ShiftCoverage
    }

    pub fn is_unread(&self) -> bool {
        self.read_at.is_none()
    }

    pub fn involves(&self, profile_id: &str) -> bool {
        self.sender_id == profile_id || self.recipient_id == profile_id
    }
}

/// Insert payload for a communication; the store assigns nothing, ids are minted here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCommunication {
    pub sender_id: String,
    pub recipient_id: String,
    pub message: String,
    pub communication_type: CommunicationType,
    pub admin_cc: Option<String>,
}

impl NewCommunication {
    /// Materializes the record with a fresh id and a creation timestamp.
    pub fn into_record(self) -> Communication {
        let status = (self.communication_type == CommunicationType::ShiftCoverage)
            .then_some(CoverageStatus::Pending);
        Communication {
            id: new_record_id(),
            sender_id: self.sender_id,
            recipient_id: self.recipient_id,
            message: self.message,
            communication_type: self.communication_type,
            status,
            admin_cc: self.admin_cc,
            created_at: Utc::now(),
            read_at: None,
        }
    }
}

/// Validated shift window attached to a coverage request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftDetails {
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// Shift fields as supplied by a caller, before presence validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftDetailsDraft {
    pub date: Option<NaiveDate>,
    pub start: Option<NaiveTime>,
    pub end: Option<NaiveTime>,
}

impl ShiftDetailsDraft {
    /// Returns the validated details or the name of the first missing field.
    pub fn complete(&self) -> Result<ShiftDetails, &'static str> {
        let date = self.date.ok_or("shift_date")?;
        let start = self.start.ok_or("shift_start")?;
        let end = self.end.ok_or("shift_end")?;
        Ok(ShiftDetails { date, start, end })
    }
}

impl From<ShiftDetails> for ShiftDetailsDraft {
    fn from(value: ShiftDetails) -> Self {
        Self {
            date: Some(value.date),
            start: Some(value.start),
            end: Some(value.end),
        }
    }
}

/// Structured shift-swap payload linked to a shift-coverage communication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftCoverageRequest {
    pub id: String,
    pub communication_id: String,
    pub original_employee_id: String,
    pub covering_employee_id: String,
    pub shift_date: NaiveDate,
    pub shift_start: NaiveTime,
    pub shift_end: NaiveTime,
    pub status: CoverageStatus,
    pub created_at: DateTime<Utc>,
}

impl ShiftCoverageRequest {
    pub fn shift(&self) -> ShiftDetails {
        ShiftDetails {
            date: self.shift_date,
            start: self.shift_start,
            end: self.shift_end,
        }
    }
}

/// Insert payload for a shift-coverage request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewShiftCoverageRequest {
    pub communication_id: String,
    pub original_employee_id: String,
    pub covering_employee_id: String,
    pub shift: ShiftDetails,
}

impl NewShiftCoverageRequest {
    pub fn into_record(self) -> ShiftCoverageRequest {
        ShiftCoverageRequest {
            id: new_record_id(),
            communication_id: self.communication_id,
            original_employee_id: self.original_employee_id,
            covering_employee_id: self.covering_employee_id,
            shift_date: self.shift.date,
            shift_start: self.shift.start,
            shift_end: self.shift.end,
            status: CoverageStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

/// A communication as seen by one viewer, joined with its coverage requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerCommunication {
    #[serde(flatten)]
    pub communication: Communication,
    /// Empty for every type other than shift coverage.
    pub shift_requests: Vec<ShiftCoverageRequest>,
    pub viewer_id: String,
}

impl ViewerCommunication {
    /// True when the viewer authored the message.
    pub fn is_mine(&self) -> bool {
        self.communication.sender_id == self.viewer_id
    }

    pub fn is_unread_for_viewer(&self) -> bool {
        self.communication.recipient_id == self.viewer_id
            && self.communication.is_unread()
            && self.communication.communication_type.is_conversation_tracked()
    }
}

/// Mints a new record id.
pub fn new_record_id() -> String {
    Uuid::new_v4().to_string()
}

/// True when `value` has the shape of a record identifier.
pub fn looks_like_identifier(value: &str) -> bool {
    Uuid::parse_str(value.trim()).is_ok()
}

/// True when `value` has the shape of an email address.
pub fn looks_like_email(value: &str) -> bool {
    let trimmed = value.trim();
    let Some((local, domain)) = trimmed.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
        && !trimmed.chars().any(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::{
        looks_like_email, looks_like_identifier, new_record_id, CommunicationType,
        CoverageStatus, NewCommunication, ShiftDetailsDraft, ViewerCommunication,
    };
    use chrono::{NaiveDate, NaiveTime};

    #[test]
    fn coverage_transitions_are_terminal_after_response() {
        assert!(CoverageStatus::Pending.can_transition_to(CoverageStatus::Accepted));
        assert!(CoverageStatus::Pending.can_transition_to(CoverageStatus::Declined));
        assert!(CoverageStatus::Accepted.can_transition_to(CoverageStatus::Accepted));
        assert!(!CoverageStatus::Accepted.can_transition_to(CoverageStatus::Declined));
        assert!(!CoverageStatus::Declined.can_transition_to(CoverageStatus::Pending));
        assert!(CoverageStatus::Declined
            .ensure_transition(CoverageStatus::Accepted)
            .is_err());
    }

    #[test]
    fn shift_draft_reports_first_missing_field() {
        let draft = ShiftDetailsDraft {
            date: NaiveDate::from_ymd_opt(2024, 6, 1),
            start: None,
            end: NaiveTime::from_hms_opt(17, 0, 0),
        };
        assert_eq!(draft.complete(), Err("shift_start"));
        assert_eq!(ShiftDetailsDraft::default().complete(), Err("shift_date"));
    }

    #[test]
    fn only_shift_coverage_records_start_pending() {
        let shift = NewCommunication {
            sender_id: "a".to_string(),
            recipient_id: "b".to_string(),
            message: "cover me".to_string(),
            communication_type: CommunicationType::ShiftCoverage,
            admin_cc: None,
        }
        .into_record();
        assert_eq!(shift.status, Some(CoverageStatus::Pending));

        let general = NewCommunication {
            sender_id: "a".to_string(),
            recipient_id: "b".to_string(),
            message: "hi".to_string(),
            communication_type: CommunicationType::General,
            admin_cc: None,
        }
        .into_record();
        assert_eq!(general.status, None);
        assert!(general.read_at.is_none());
    }

    #[test]
    fn identifier_and_email_shapes() {
        assert!(looks_like_identifier(&new_record_id()));
        assert!(!looks_like_identifier("admin@rota.local"));
        assert!(looks_like_email("admin@rota.local"));
        assert!(!looks_like_email("admin@"));
        assert!(!looks_like_email("not an@email.com"));
        assert!(!looks_like_email(&new_record_id()));
    }

    #[test]
    fn conversation_tracked_types_exclude_broadcasts() {
        assert!(CommunicationType::Urgent.is_conversation_tracked());
        assert!(!CommunicationType::Announcement.is_conversation_tracked());
        assert!(!CommunicationType::SystemNotification.is_conversation_tracked());
        assert_eq!(
            CommunicationType::parse("shift_coverage"),
            Some(CommunicationType::ShiftCoverage)
        );
    }

    #[test]
    fn viewer_rows_serialize_flat_with_snake_case_enums() {
        let communication = NewCommunication {
            sender_id: "emp-a".to_string(),
            recipient_id: "emp-b".to_string(),
            message: "cover me".to_string(),
            communication_type: CommunicationType::ShiftCoverage,
            admin_cc: Some("admin-1".to_string()),
        }
        .into_record();
        let row = ViewerCommunication {
            communication: communication.clone(),
            shift_requests: Vec::new(),
            viewer_id: "emp-b".to_string(),
        };

        let value = serde_json::to_value(&row).expect("serialize");
        assert_eq!(value["id"], communication.id.as_str());
        assert_eq!(value["communication_type"], "shift_coverage");
        assert_eq!(value["status"], "pending");
        assert_eq!(value["viewer_id"], "emp-b");
        assert!(value.get("communication").is_none());

        let decoded: ViewerCommunication = serde_json::from_value(value).expect("deserialize");
        assert_eq!(decoded, row);
    }
}
