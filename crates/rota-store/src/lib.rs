//! Record store abstractions and in-memory backend.
//!
//! The pipeline treats persistence as an external collaborator: four
//! collections (profiles, communications, shift-coverage requests, admin
//! assignments) reachable through the async [`RecordStore`] contract.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::RwLock;

mod sqlite;

pub use rota_types::{
    AdminAssignment, Communication, CommunicationType, CoverageStatus, Profile, ProfileRole,
    ShiftCoverageRequest,
};
pub use sqlite::SqliteRecordStore;

/// Result type for record store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },
    #[error("{kind} '{id}' already exists")]
    AlreadyExists { kind: &'static str, id: String },
    #[error("communication '{0}' already has a shift coverage request")]
    DuplicateShiftRequest(String),
    #[error("invalid coverage status transition for '{id}': {from:?} -> {to:?}")]
    InvalidStatusTransition {
        id: String,
        from: Option<CoverageStatus>,
        to: CoverageStatus,
    },
    #[error("record store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid persisted value for '{field}': {value}")]
    InvalidPersistedValue { field: &'static str, value: String },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Chrono(#[from] chrono::ParseError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Filter used when listing profiles through the default visibility path.
///
/// Results are ordered by `updated_at` descending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileQuery {
    /// Case-insensitive id equality.
    pub id_eq: Option<String>,
    /// Case-insensitive email equality.
    pub email_eq: Option<String>,
    /// Case-insensitive substring of the id.
    pub id_fragment: Option<String>,
    pub limit: Option<usize>,
}

/// Filter used when listing communications. Results are newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommunicationQuery {
    /// Matches rows where the profile is sender or recipient.
    pub participant_id: Option<String>,
    pub sender_id: Option<String>,
    pub recipient_id: Option<String>,
    /// Drops rows where the profile is sender or recipient.
    pub exclude_participant_id: Option<String>,
    pub types: Option<Vec<CommunicationType>>,
    pub ids: Option<Vec<String>>,
    pub exclude_ids: Option<Vec<String>>,
    pub unread_only: bool,
    pub limit: Option<usize>,
}

/// Filter used when listing shift-coverage requests. Results are newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShiftRequestQuery {
    pub communication_ids: Option<Vec<String>>,
    pub original_employee_id: Option<String>,
    pub shift_date: Option<NaiveDate>,
    pub limit: Option<usize>,
}

/// Async store contract used by the messaging pipeline.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Exact keyed lookup through the default visibility rules.
    async fn get_profile(&self, id: &str) -> StoreResult<Option<Profile>>;
    /// Keyed lookup that bypasses visibility rules.
    async fn get_profile_privileged(&self, id: &str) -> StoreResult<Option<Profile>>;
    async fn query_profiles(&self, query: ProfileQuery) -> StoreResult<Vec<Profile>>;
    async fn put_profile(&self, profile: Profile) -> StoreResult<()>;

    async fn get_admin_assignment(&self, employee_id: &str)
        -> StoreResult<Option<AdminAssignment>>;
    async fn put_admin_assignment(&self, assignment: AdminAssignment) -> StoreResult<()>;

    async fn insert_communication(&self, communication: Communication)
        -> StoreResult<Communication>;
    async fn get_communication(&self, id: &str) -> StoreResult<Option<Communication>>;
    async fn query_communications(
        &self,
        query: CommunicationQuery,
    ) -> StoreResult<Vec<Communication>>;
    async fn update_communication_status(
        &self,
        id: &str,
        status: CoverageStatus,
    ) -> StoreResult<()>;
    /// Sets `read_at` on every listed row that is still unread; returns the number updated.
    async fn mark_communications_read(
        &self,
        ids: &[String],
        read_at: DateTime<Utc>,
    ) -> StoreResult<usize>;

    async fn insert_shift_request(
        &self,
        request: ShiftCoverageRequest,
    ) -> StoreResult<ShiftCoverageRequest>;
    async fn get_shift_request(&self, id: &str) -> StoreResult<Option<ShiftCoverageRequest>>;
    async fn query_shift_requests(
        &self,
        query: ShiftRequestQuery,
    ) -> StoreResult<Vec<ShiftCoverageRequest>>;
    async fn update_shift_request_status(
        &self,
        id: &str,
        status: CoverageStatus,
    ) -> StoreResult<()>;
}

/// Store call kinds, used for fault injection and call accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    GetProfile,
    GetProfilePrivileged,
    QueryProfiles,
    PutProfile,
    GetAdminAssignment,
    PutAdminAssignment,
    InsertCommunication,
    GetCommunication,
    QueryCommunications,
    UpdateCommunicationStatus,
    MarkCommunicationsRead,
    InsertShiftRequest,
    GetShiftRequest,
    QueryShiftRequests,
    UpdateShiftRequestStatus,
}

impl StoreOperation {
    pub fn is_write(self) -> bool {
        matches!(
            self,
            Self::PutProfile
                | Self::PutAdminAssignment
                | Self::InsertCommunication
                | Self::UpdateCommunicationStatus
                | Self::MarkCommunicationsRead
                | Self::InsertShiftRequest
                | Self::UpdateShiftRequestStatus
        )
    }
}

#[derive(Debug, Default)]
struct FaultPlan {
    fail_before: HashMap<StoreOperation, usize>,
    fail_after_apply: HashMap<StoreOperation, usize>,
    calls: HashMap<StoreOperation, usize>,
}

impl FaultPlan {
    fn take(map: &mut HashMap<StoreOperation, usize>, operation: StoreOperation) -> bool {
        match map.get_mut(&operation) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

/// In-memory implementation for tests and local experimentation.
///
/// Supports injected failures so partial-write paths can be exercised.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    inner: RwLock<StoreInner>,
    faults: Mutex<FaultPlan>,
}

#[derive(Debug, Default)]
struct StoreInner {
    profiles: HashMap<String, Profile>,
    admin_assignments: HashMap<String, AdminAssignment>,
    communications: HashMap<String, Communication>,
    shift_requests: HashMap<String, ShiftCoverageRequest>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `times` calls of `operation` fail before touching any data.
    pub fn fail_next(&self, operation: StoreOperation, times: usize) {
        let mut faults = self.lock_faults();
        *faults.fail_before.entry(operation).or_default() += times;
    }

    /// Makes the next `times` calls of `operation` apply their write and then report failure.
    pub fn fail_next_after_apply(&self, operation: StoreOperation, times: usize) {
        let mut faults = self.lock_faults();
        *faults.fail_after_apply.entry(operation).or_default() += times;
    }

    /// Number of calls made for `operation`, including failed ones.
    pub fn operation_count(&self, operation: StoreOperation) -> usize {
        self.lock_faults()
            .calls
            .get(&operation)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_operations(&self) -> usize {
        self.lock_faults().calls.values().sum()
    }

    pub fn write_operations(&self) -> usize {
        self.lock_faults()
            .calls
            .iter()
            .filter(|(operation, _)| operation.is_write())
            .map(|(_, count)| count)
            .sum()
    }

    pub fn reset_operation_counts(&self) {
        self.lock_faults().calls.clear();
    }

    fn lock_faults(&self) -> std::sync::MutexGuard<'_, FaultPlan> {
        self.faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn enter(&self, operation: StoreOperation) -> StoreResult<()> {
        let mut faults = self.lock_faults();
        *faults.calls.entry(operation).or_default() += 1;
        if FaultPlan::take(&mut faults.fail_before, operation) {
            tracing::debug!(?operation, "injected store failure");
            return Err(StoreError::Unavailable(format!(
                "injected failure for {operation:?}"
            )));
        }
        Ok(())
    }

    fn leave(&self, operation: StoreOperation) -> StoreResult<()> {
        let mut faults = self.lock_faults();
        if FaultPlan::take(&mut faults.fail_after_apply, operation) {
            tracing::debug!(?operation, "injected store failure after apply");
            return Err(StoreError::Unavailable(format!(
                "injected failure after applying {operation:?}"
            )));
        }
        Ok(())
    }
}

fn eq_ignore_case(left: &str, right: &str) -> bool {
    left.trim().eq_ignore_ascii_case(right.trim())
}

fn newest_first(left: &DateTime<Utc>, right: &DateTime<Utc>, tie: Ordering) -> Ordering {
    right.cmp(left).then(tie)
}

fn apply_limit<T>(mut rows: Vec<T>, limit: Option<usize>) -> Vec<T> {
    if let Some(limit) = limit {
        rows.truncate(limit);
    }
    rows
}

fn communication_matches(row: &Communication, query: &CommunicationQuery) -> bool {
    query
        .participant_id
        .as_deref()
        .is_none_or(|id| row.involves(id))
        && query
            .sender_id
            .as_deref()
            .is_none_or(|id| row.sender_id == id)
        && query
            .recipient_id
            .as_deref()
            .is_none_or(|id| row.recipient_id == id)
        && query
            .exclude_participant_id
            .as_deref()
            .is_none_or(|id| !row.involves(id))
        && query
            .types
            .as_ref()
            .is_none_or(|types| types.contains(&row.communication_type))
        && query
            .ids
            .as_ref()
            .is_none_or(|ids| ids.iter().any(|id| id == &row.id))
        && query
            .exclude_ids
            .as_ref()
            .is_none_or(|ids| !ids.iter().any(|id| id == &row.id))
        && (!query.unread_only || row.is_unread())
}

fn shift_request_matches(row: &ShiftCoverageRequest, query: &ShiftRequestQuery) -> bool {
    query
        .communication_ids
        .as_ref()
        .is_none_or(|ids| ids.iter().any(|id| id == &row.communication_id))
        && query
            .original_employee_id
            .as_deref()
            .is_none_or(|id| row.original_employee_id == id)
        && query.shift_date.is_none_or(|date| row.shift_date == date)
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get_profile(&self, id: &str) -> StoreResult<Option<Profile>> {
        self.enter(StoreOperation::GetProfile)?;
        let inner = self.inner.read().await;
        Ok(inner
            .profiles
            .get(id.trim())
            .filter(|profile| !profile.restricted)
            .cloned())
    }

    async fn get_profile_privileged(&self, id: &str) -> StoreResult<Option<Profile>> {
        self.enter(StoreOperation::GetProfilePrivileged)?;
        let inner = self.inner.read().await;
        Ok(inner.profiles.get(id.trim()).cloned())
    }

    async fn query_profiles(&self, query: ProfileQuery) -> StoreResult<Vec<Profile>> {
        self.enter(StoreOperation::QueryProfiles)?;
        let inner = self.inner.read().await;
        let fragment = query
            .id_fragment
            .as_deref()
            .map(|value| value.trim().to_ascii_lowercase());
        let mut rows: Vec<Profile> = inner
            .profiles
            .values()
            .filter(|profile| !profile.restricted)
            .filter(|profile| {
                query
                    .id_eq
                    .as_deref()
                    .is_none_or(|id| eq_ignore_case(&profile.id, id))
            })
            .filter(|profile| {
                query
                    .email_eq
                    .as_deref()
                    .is_none_or(|email| eq_ignore_case(&profile.email, email))
            })
            .filter(|profile| {
                fragment
                    .as_deref()
                    .is_none_or(|fragment| profile.id.to_ascii_lowercase().contains(fragment))
            })
            .cloned()
            .collect();
        rows.sort_by(|left, right| {
            newest_first(&left.updated_at, &right.updated_at, left.id.cmp(&right.id))
        });
        Ok(apply_limit(rows, query.limit))
    }

    async fn put_profile(&self, profile: Profile) -> StoreResult<()> {
        self.enter(StoreOperation::PutProfile)?;
        let mut inner = self.inner.write().await;
        inner.profiles.insert(profile.id.clone(), profile);
        drop(inner);
        self.leave(StoreOperation::PutProfile)
    }

    async fn get_admin_assignment(
        &self,
        employee_id: &str,
    ) -> StoreResult<Option<AdminAssignment>> {
        self.enter(StoreOperation::GetAdminAssignment)?;
        let inner = self.inner.read().await;
        Ok(inner.admin_assignments.get(employee_id).cloned())
    }

    async fn put_admin_assignment(&self, assignment: AdminAssignment) -> StoreResult<()> {
        self.enter(StoreOperation::PutAdminAssignment)?;
        let mut inner = self.inner.write().await;
        inner
            .admin_assignments
            .insert(assignment.employee_id.clone(), assignment);
        drop(inner);
        self.leave(StoreOperation::PutAdminAssignment)
    }

    async fn insert_communication(
        &self,
        communication: Communication,
    ) -> StoreResult<Communication> {
        self.enter(StoreOperation::InsertCommunication)?;
        let mut inner = self.inner.write().await;
        if inner.communications.contains_key(&communication.id) {
            return Err(StoreError::AlreadyExists {
                kind: "communication",
                id: communication.id,
            });
        }
        inner
            .communications
            .insert(communication.id.clone(), communication.clone());
        drop(inner);
        self.leave(StoreOperation::InsertCommunication)?;
        Ok(communication)
    }

    async fn get_communication(&self, id: &str) -> StoreResult<Option<Communication>> {
        self.enter(StoreOperation::GetCommunication)?;
        let inner = self.inner.read().await;
        Ok(inner.communications.get(id).cloned())
    }

    async fn query_communications(
        &self,
        query: CommunicationQuery,
    ) -> StoreResult<Vec<Communication>> {
        self.enter(StoreOperation::QueryCommunications)?;
        let inner = self.inner.read().await;
        let mut rows: Vec<Communication> = inner
            .communications
            .values()
            .filter(|row| communication_matches(row, &query))
            .cloned()
            .collect();
        rows.sort_by(|left, right| {
            newest_first(&left.created_at, &right.created_at, left.id.cmp(&right.id))
        });
        Ok(apply_limit(rows, query.limit))
    }

    async fn update_communication_status(
        &self,
        id: &str,
        status: CoverageStatus,
    ) -> StoreResult<()> {
        self.enter(StoreOperation::UpdateCommunicationStatus)?;
        let mut inner = self.inner.write().await;
        let row = inner
            .communications
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound {
                kind: "communication",
                id: id.to_string(),
            })?;
        match row.status {
            Some(from) if from.can_transition_to(status) => row.status = Some(status),
            from => {
                return Err(StoreError::InvalidStatusTransition {
                    id: id.to_string(),
                    from,
                    to: status,
                })
            }
        }
        drop(inner);
        self.leave(StoreOperation::UpdateCommunicationStatus)
    }

    async fn mark_communications_read(
        &self,
        ids: &[String],
        read_at: DateTime<Utc>,
    ) -> StoreResult<usize> {
        self.enter(StoreOperation::MarkCommunicationsRead)?;
        let mut inner = self.inner.write().await;
        let mut updated = 0;
        for id in ids {
            if let Some(row) = inner.communications.get_mut(id) {
                if row.read_at.is_none() {
                    row.read_at = Some(read_at);
                    updated += 1;
                }
            }
        }
        drop(inner);
        self.leave(StoreOperation::MarkCommunicationsRead)?;
        Ok(updated)
    }

    async fn insert_shift_request(
        &self,
        request: ShiftCoverageRequest,
    ) -> StoreResult<ShiftCoverageRequest> {
        self.enter(StoreOperation::InsertShiftRequest)?;
        let mut inner = self.inner.write().await;
        if inner
            .shift_requests
            .values()
            .any(|existing| existing.communication_id == request.communication_id)
        {
            return Err(StoreError::DuplicateShiftRequest(request.communication_id));
        }
        if inner.shift_requests.contains_key(&request.id) {
            return Err(StoreError::AlreadyExists {
                kind: "shift_request",
                id: request.id,
            });
        }
        inner
            .shift_requests
            .insert(request.id.clone(), request.clone());
        drop(inner);
        self.leave(StoreOperation::InsertShiftRequest)?;
        Ok(request)
    }

    async fn get_shift_request(&self, id: &str) -> StoreResult<Option<ShiftCoverageRequest>> {
        self.enter(StoreOperation::GetShiftRequest)?;
        let inner = self.inner.read().await;
        Ok(inner.shift_requests.get(id).cloned())
    }

    async fn query_shift_requests(
        &self,
        query: ShiftRequestQuery,
    ) -> StoreResult<Vec<ShiftCoverageRequest>> {
        self.enter(StoreOperation::QueryShiftRequests)?;
        let inner = self.inner.read().await;
        let mut rows: Vec<ShiftCoverageRequest> = inner
            .shift_requests
            .values()
            .filter(|row| shift_request_matches(row, &query))
            .cloned()
            .collect();
        rows.sort_by(|left, right| {
            newest_first(&left.created_at, &right.created_at, left.id.cmp(&right.id))
        });
        Ok(apply_limit(rows, query.limit))
    }

    async fn update_shift_request_status(
        &self,
        id: &str,
        status: CoverageStatus,
    ) -> StoreResult<()> {
        self.enter(StoreOperation::UpdateShiftRequestStatus)?;
        let mut inner = self.inner.write().await;
        let row = inner
            .shift_requests
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound {
                kind: "shift_request",
                id: id.to_string(),
            })?;
        if !row.status.can_transition_to(status) {
            return Err(StoreError::InvalidStatusTransition {
                id: id.to_string(),
                from: Some(row.status),
                to: status,
            });
        }
        row.status = status;
        drop(inner);
        self.leave(StoreOperation::UpdateShiftRequestStatus)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CommunicationQuery, InMemoryRecordStore, ProfileQuery, RecordStore, ShiftRequestQuery,
        StoreError, StoreOperation,
    };
    use chrono::{Duration as ChronoDuration, NaiveDate, NaiveTime, Utc};
    use rota_types::{
        CommunicationType, CoverageStatus, NewCommunication, NewShiftCoverageRequest, Profile,
        ProfileRole, ShiftDetails,
    };

    fn message(sender: &str, recipient: &str, kind: CommunicationType) -> NewCommunication {
        NewCommunication {
            sender_id: sender.to_string(),
            recipient_id: recipient.to_string(),
            message: "hello".to_string(),
            communication_type: kind,
            admin_cc: None,
        }
    }

    fn shift() -> ShiftDetails {
        ShiftDetails {
            date: NaiveDate::from_ymd_opt(2024, 6, 1).expect("date"),
            start: NaiveTime::from_hms_opt(9, 0, 0).expect("start"),
            end: NaiveTime::from_hms_opt(17, 0, 0).expect("end"),
        }
    }

    #[tokio::test]
    async fn restricted_profiles_only_visible_through_privileged_path() {
        let store = InMemoryRecordStore::new();
        let mut hidden = Profile::new("p-hidden", "Hidden", "hidden@rota.local", ProfileRole::Hr);
        hidden.restricted = true;
        store.put_profile(hidden).await.expect("put");

        assert!(store.get_profile("p-hidden").await.expect("get").is_none());
        assert!(store
            .query_profiles(ProfileQuery {
                id_eq: Some("P-HIDDEN".to_string()),
                ..ProfileQuery::default()
            })
            .await
            .expect("query")
            .is_empty());
        let found = store
            .get_profile_privileged("p-hidden")
            .await
            .expect("privileged")
            .expect("profile");
        assert_eq!(found.name, "Hidden");
    }

    #[tokio::test]
    async fn keyed_profile_reads_ignore_surrounding_whitespace() {
        let store = InMemoryRecordStore::new();
        store
            .put_profile(Profile::new("p-padded", "Padded", "padded@rota.local", ProfileRole::Employee))
            .await
            .expect("put");

        let keyed = store.get_profile(" p-padded\t").await.expect("get");
        let privileged = store
            .get_profile_privileged(" p-padded\t")
            .await
            .expect("privileged");
        assert_eq!(keyed.map(|profile| profile.id), Some("p-padded".to_string()));
        assert_eq!(privileged.map(|profile| profile.id), Some("p-padded".to_string()));
    }

    #[tokio::test]
    async fn profile_queries_order_by_recent_update() {
        let store = InMemoryRecordStore::new();
        let mut older = Profile::new("p-older", "Older", "older@rota.local", ProfileRole::Employee);
        older.updated_at = Utc::now() - ChronoDuration::hours(1);
        store.put_profile(older).await.expect("put older");
        store
            .put_profile(Profile::new(
                "p-newer",
                "Newer",
                "newer@rota.local",
                ProfileRole::Employee,
            ))
            .await
            .expect("put newer");

        let rows = store
            .query_profiles(ProfileQuery {
                id_fragment: Some("P-".to_string()),
                limit: Some(1),
                ..ProfileQuery::default()
            })
            .await
            .expect("query");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "p-newer");
    }

    #[tokio::test]
    async fn communication_queries_support_exclusion_filters() {
        let store = InMemoryRecordStore::new();
        let own = store
            .insert_communication(message("admin", "b", CommunicationType::ShiftCoverage).into_record())
            .await
            .expect("own");
        let other = store
            .insert_communication(message("a", "b", CommunicationType::ShiftCoverage).into_record())
            .await
            .expect("other");
        store
            .insert_communication(message("a", "b", CommunicationType::General).into_record())
            .await
            .expect("general");

        let rows = store
            .query_communications(CommunicationQuery {
                exclude_participant_id: Some("admin".to_string()),
                types: Some(vec![CommunicationType::ShiftCoverage]),
                exclude_ids: Some(vec![own.id.clone()]),
                ..CommunicationQuery::default()
            })
            .await
            .expect("query");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, other.id);
    }

    #[tokio::test]
    async fn rejects_second_shift_request_for_same_communication() {
        let store = InMemoryRecordStore::new();
        let communication = store
            .insert_communication(message("a", "b", CommunicationType::ShiftCoverage).into_record())
            .await
            .expect("communication");
        let payload = NewShiftCoverageRequest {
            communication_id: communication.id.clone(),
            original_employee_id: "a".to_string(),
            covering_employee_id: "b".to_string(),
            shift: shift(),
        };
        store
            .insert_shift_request(payload.clone().into_record())
            .await
            .expect("first insert");
        let error = store
            .insert_shift_request(payload.into_record())
            .await
            .expect_err("duplicate");
        assert!(matches!(error, StoreError::DuplicateShiftRequest(id) if id == communication.id));

        let rows = store
            .query_shift_requests(ShiftRequestQuery {
                communication_ids: Some(vec![communication.id]),
                ..ShiftRequestQuery::default()
            })
            .await
            .expect("query");
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn injected_failures_are_counted_and_consumed() {
        let store = InMemoryRecordStore::new();
        store.fail_next(StoreOperation::InsertCommunication, 1);

        let first = store
            .insert_communication(message("a", "b", CommunicationType::General).into_record())
            .await;
        assert!(matches!(first, Err(StoreError::Unavailable(_))));
        store
            .insert_communication(message("a", "b", CommunicationType::General).into_record())
            .await
            .expect("second insert succeeds");

        assert_eq!(store.operation_count(StoreOperation::InsertCommunication), 2);
        assert_eq!(store.write_operations(), 2);
        let rows = store
            .query_communications(CommunicationQuery::default())
            .await
            .expect("query");
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn failure_after_apply_keeps_the_write() {
        let store = InMemoryRecordStore::new();
        store.fail_next_after_apply(StoreOperation::InsertCommunication, 1);
        let record = message("a", "b", CommunicationType::General).into_record();
        assert!(store.insert_communication(record.clone()).await.is_err());
        assert_eq!(
            store
                .get_communication(&record.id)
                .await
                .expect("get")
                .expect("row")
                .id,
            record.id
        );
    }

    #[tokio::test]
    async fn mark_read_sets_timestamp_once() {
        let store = InMemoryRecordStore::new();
        let row = store
            .insert_communication(message("a", "b", CommunicationType::General).into_record())
            .await
            .expect("insert");
        let first_at = Utc::now();
        let ids = vec![row.id.clone()];
        assert_eq!(
            store
                .mark_communications_read(&ids, first_at)
                .await
                .expect("first mark"),
            1
        );
        assert_eq!(
            store
                .mark_communications_read(&ids, first_at + ChronoDuration::minutes(5))
                .await
                .expect("second mark"),
            0
        );
        let stored = store
            .get_communication(&row.id)
            .await
            .expect("get")
            .expect("row");
        assert_eq!(stored.read_at, Some(first_at));
    }

    #[tokio::test]
    async fn status_updates_follow_coverage_transitions() {
        let store = InMemoryRecordStore::new();
        let general = store
            .insert_communication(message("a", "b", CommunicationType::General).into_record())
            .await
            .expect("general");
        assert!(matches!(
            store
                .update_communication_status(&general.id, CoverageStatus::Accepted)
                .await,
            Err(StoreError::InvalidStatusTransition { from: None, .. })
        ));

        let shift_row = store
            .insert_communication(message("a", "b", CommunicationType::ShiftCoverage).into_record())
            .await
            .expect("shift");
        store
            .update_communication_status(&shift_row.id, CoverageStatus::Declined)
            .await
            .expect("decline");
        assert!(store
            .update_communication_status(&shift_row.id, CoverageStatus::Accepted)
            .await
            .is_err());
    }
}
