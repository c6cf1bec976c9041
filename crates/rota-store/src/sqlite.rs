//! SQLite-backed `RecordStore` adapter.

use crate::{
    AdminAssignment, Communication, CommunicationQuery, CommunicationType, CoverageStatus,
    Profile, ProfileQuery, ProfileRole, RecordStore, ShiftCoverageRequest, ShiftRequestQuery,
    StoreError, StoreResult,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";
/// Largest `IN (...)` list bound in one statement; SQLite caps bound variables per statement.
const MAX_IN_LIST_PARAMS: usize = 500;

const PROFILE_COLUMNS: &str = "id, name, email, role, updated_at, restricted";
const COMMUNICATION_COLUMNS: &str =
    "id, sender_id, recipient_id, message, communication_type, status, admin_cc, created_at, read_at";
const SHIFT_REQUEST_COLUMNS: &str = "id, communication_id, original_employee_id, covering_employee_id, shift_date, shift_start, shift_end, status, created_at";

/// Persistent SQLite record store.
#[derive(Debug)]
pub struct SqliteRecordStore {
    db_path: PathBuf,
}

impl SqliteRecordStore {
    /// Opens a SQLite-backed store at `path`, creating schema if needed.
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let store = Self { db_path };
        let connection = store.open_connection()?;
        store.initialize_schema(&connection)?;
        tracing::debug!(path = %store.db_path.display(), "opened sqlite record store");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    fn open_connection(&self) -> StoreResult<Connection> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            "#,
        )?;
        Ok(connection)
    }

    fn initialize_schema(&self, connection: &Connection) -> StoreResult<()> {
        connection.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS profiles (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT NOT NULL,
                role TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                restricted INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_profiles_updated ON profiles (updated_at);
            CREATE INDEX IF NOT EXISTS idx_profiles_email ON profiles (email COLLATE NOCASE);

            CREATE TABLE IF NOT EXISTS admin_assignments (
                employee_id TEXT PRIMARY KEY,
                admin_id TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS communications (
                id TEXT PRIMARY KEY,
                sender_id TEXT NOT NULL,
                recipient_id TEXT NOT NULL,
                message TEXT NOT NULL,
                communication_type TEXT NOT NULL,
                status TEXT NULL,
                admin_cc TEXT NULL,
                created_at TEXT NOT NULL,
                read_at TEXT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_communications_sender ON communications (sender_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_communications_recipient ON communications (recipient_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_communications_type ON communications (communication_type, created_at);

            CREATE TABLE IF NOT EXISTS shift_coverage_requests (
                id TEXT PRIMARY KEY,
                communication_id TEXT NOT NULL UNIQUE,
                original_employee_id TEXT NOT NULL,
                covering_employee_id TEXT NOT NULL,
                shift_date TEXT NOT NULL,
                shift_start TEXT NOT NULL,
                shift_end TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_shift_requests_original
                ON shift_coverage_requests (original_employee_id, shift_date, created_at);
            "#,
        )?;
        Ok(())
    }

    fn load_communication(
        connection: &Connection,
        id: &str,
    ) -> StoreResult<Option<Communication>> {
        let sql = format!("SELECT {COMMUNICATION_COLUMNS} FROM communications WHERE id = ?1");
        let raw = connection
            .query_row(&sql, params![id], RawCommunication::from_row)
            .optional()?;
        raw.map(RawCommunication::into_record).transpose()
    }

    fn select_shift_requests(
        connection: &Connection,
        query: &ShiftRequestQuery,
        communication_ids: Option<&[String]>,
    ) -> StoreResult<Vec<ShiftCoverageRequest>> {
        let mut filter = SqlFilter::default();
        if let Some(ids) = communication_ids {
            filter.push_in("communication_id", false, ids.iter().cloned());
        }
        if let Some(id) = query.original_employee_id.as_deref() {
            filter.push("original_employee_id = ?", id);
        }
        if let Some(date) = query.shift_date {
            filter.push("shift_date = ?", date.format(DATE_FORMAT).to_string());
        }

        let sql = format!(
            "SELECT {SHIFT_REQUEST_COLUMNS} FROM shift_coverage_requests{} ORDER BY created_at DESC, id ASC{}",
            filter.where_clause(),
            limit_clause(query.limit)
        );
        let mut statement = connection.prepare(&sql)?;
        let rows = statement
            .query_map(params_from_iter(filter.values), RawShiftRequest::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawShiftRequest::into_record).collect()
    }

    fn load_shift_request(
        connection: &Connection,
        id: &str,
    ) -> StoreResult<Option<ShiftCoverageRequest>> {
        let sql =
            format!("SELECT {SHIFT_REQUEST_COLUMNS} FROM shift_coverage_requests WHERE id = ?1");
        let raw = connection
            .query_row(&sql, params![id], RawShiftRequest::from_row)
            .optional()?;
        raw.map(RawShiftRequest::into_record).transpose()
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn get_profile(&self, id: &str) -> StoreResult<Option<Profile>> {
        let connection = self.open_connection()?;
        let sql = format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = ?1 AND restricted = 0");
        let raw = connection
            .query_row(&sql, params![id.trim()], RawProfile::from_row)
            .optional()?;
        raw.map(RawProfile::into_record).transpose()
    }

    async fn get_profile_privileged(&self, id: &str) -> StoreResult<Option<Profile>> {
        let connection = self.open_connection()?;
        let sql = format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = ?1");
        let raw = connection
            .query_row(&sql, params![id.trim()], RawProfile::from_row)
            .optional()?;
        raw.map(RawProfile::into_record).transpose()
    }

    async fn query_profiles(&self, query: ProfileQuery) -> StoreResult<Vec<Profile>> {
        let connection = self.open_connection()?;
        let mut filter = SqlFilter::default();
        filter.push_raw("restricted = 0");
        if let Some(id) = query.id_eq.as_deref() {
            filter.push("id = ? COLLATE NOCASE", id.trim());
        }
        if let Some(email) = query.email_eq.as_deref() {
            filter.push("email = ? COLLATE NOCASE", email.trim());
        }
        if let Some(fragment) = query.id_fragment.as_deref() {
            filter.push(
                "instr(lower(id), ?) > 0",
                fragment.trim().to_ascii_lowercase(),
            );
        }

        let sql = format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles{} ORDER BY updated_at DESC, id ASC{}",
            filter.where_clause(),
            limit_clause(query.limit)
        );
        let mut statement = connection.prepare(&sql)?;
        let rows = statement
            .query_map(params_from_iter(filter.values), RawProfile::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawProfile::into_record).collect()
    }

    async fn put_profile(&self, profile: Profile) -> StoreResult<()> {
        let connection = self.open_connection()?;
        connection.execute(
            r#"
            INSERT INTO profiles (id, name, email, role, updated_at, restricted)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                email = excluded.email,
                role = excluded.role,
                updated_at = excluded.updated_at,
                restricted = excluded.restricted
            "#,
            params![
                profile.id,
                profile.name,
                profile.email,
                profile.role.as_str(),
                timestamp_to_db(profile.updated_at),
                profile.restricted,
            ],
        )?;
        Ok(())
    }

    async fn get_admin_assignment(
        &self,
        employee_id: &str,
    ) -> StoreResult<Option<AdminAssignment>> {
        let connection = self.open_connection()?;
        let assignment = connection
            .query_row(
                "SELECT employee_id, admin_id FROM admin_assignments WHERE employee_id = ?1",
                params![employee_id],
                |row| {
                    Ok(AdminAssignment {
                        employee_id: row.get(0)?,
                        admin_id: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(assignment)
    }

    async fn put_admin_assignment(&self, assignment: AdminAssignment) -> StoreResult<()> {
        let connection = self.open_connection()?;
        connection.execute(
            r#"
            INSERT INTO admin_assignments (employee_id, admin_id) VALUES (?1, ?2)
            ON CONFLICT(employee_id) DO UPDATE SET admin_id = excluded.admin_id
            "#,
            params![assignment.employee_id, assignment.admin_id],
        )?;
        Ok(())
    }

    async fn insert_communication(
        &self,
        communication: Communication,
    ) -> StoreResult<Communication> {
        let connection = self.open_connection()?;
        let inserted = connection.execute(
            r#"
            INSERT INTO communications (
                id, sender_id, recipient_id, message, communication_type,
                status, admin_cc, created_at, read_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                communication.id,
                communication.sender_id,
                communication.recipient_id,
                communication.message,
                communication.communication_type.as_str(),
                communication.status.map(CoverageStatus::as_str),
                communication.admin_cc,
                timestamp_to_db(communication.created_at),
                option_timestamp_to_db(communication.read_at),
            ],
        );
        match inserted {
            Ok(_) => Ok(communication),
            Err(error) if is_constraint_violation(&error) => Err(StoreError::AlreadyExists {
                kind: "communication",
                id: communication.id,
            }),
            Err(error) => Err(error.into()),
        }
    }

    async fn get_communication(&self, id: &str) -> StoreResult<Option<Communication>> {
        let connection = self.open_connection()?;
        Self::load_communication(&connection, id)
    }

    async fn query_communications(
        &self,
        query: CommunicationQuery,
    ) -> StoreResult<Vec<Communication>> {
        if query.ids.as_ref().is_some_and(Vec::is_empty)
            || query.types.as_ref().is_some_and(Vec::is_empty)
        {
            return Ok(Vec::new());
        }

        let connection = self.open_connection()?;
        let mut filter = SqlFilter::default();
        if let Some(id) = query.participant_id.as_deref() {
            filter.push_pair("(sender_id = ? OR recipient_id = ?)", id);
        }
        if let Some(id) = query.sender_id.as_deref() {
            filter.push("sender_id = ?", id);
        }
        if let Some(id) = query.recipient_id.as_deref() {
            filter.push("recipient_id = ?", id);
        }
        if let Some(id) = query.exclude_participant_id.as_deref() {
            filter.push_pair("(sender_id != ? AND recipient_id != ?)", id);
        }
        if let Some(types) = query.types.as_ref() {
            filter.push_in(
                "communication_type",
                false,
                types.iter().map(|kind| kind.as_str().to_string()),
            );
        }
        if let Some(ids) = query.ids.as_ref() {
            filter.push_in("id", false, ids.iter().cloned());
        }
        if let Some(ids) = query.exclude_ids.as_ref().filter(|ids| !ids.is_empty()) {
            filter.push_in("id", true, ids.iter().cloned());
        }
        if query.unread_only {
            filter.push_raw("read_at IS NULL");
        }

        let sql = format!(
            "SELECT {COMMUNICATION_COLUMNS} FROM communications{} ORDER BY created_at DESC, id ASC{}",
            filter.where_clause(),
            limit_clause(query.limit)
        );
        let mut statement = connection.prepare(&sql)?;
        let rows = statement
            .query_map(params_from_iter(filter.values), RawCommunication::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawCommunication::into_record).collect()
    }

    async fn update_communication_status(
        &self,
        id: &str,
        status: CoverageStatus,
    ) -> StoreResult<()> {
        let mut connection = self.open_connection()?;
        let transaction = connection.transaction()?;
        let current = Self::load_communication(&transaction, id)?.ok_or_else(|| {
            StoreError::NotFound {
                kind: "communication",
                id: id.to_string(),
            }
        })?;
        match current.status {
            Some(from) if from.can_transition_to(status) => {}
            from => {
                return Err(StoreError::InvalidStatusTransition {
                    id: id.to_string(),
                    from,
                    to: status,
                })
            }
        }
        transaction.execute(
            "UPDATE communications SET status = ?2 WHERE id = ?1",
            params![id, status.as_str()],
        )?;
        transaction.commit()?;
        Ok(())
    }

    async fn mark_communications_read(
        &self,
        ids: &[String],
        read_at: DateTime<Utc>,
    ) -> StoreResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut connection = self.open_connection()?;
        let transaction = connection.transaction()?;
        let read_at = timestamp_to_db(read_at);
        let mut updated = 0;
        for chunk in ids.chunks(MAX_IN_LIST_PARAMS) {
            let mut filter = SqlFilter::default();
            filter.push_raw("read_at IS NULL");
            filter.push_in("id", false, chunk.iter().cloned());
            let sql = format!(
                "UPDATE communications SET read_at = ?{}",
                filter.where_clause()
            );
            let mut values = vec![SqlValue::Text(read_at.clone())];
            values.extend(filter.values);
            updated += transaction.execute(&sql, params_from_iter(values))?;
        }
        transaction.commit()?;
        Ok(updated)
    }

    async fn insert_shift_request(
        &self,
        request: ShiftCoverageRequest,
    ) -> StoreResult<ShiftCoverageRequest> {
        let connection = self.open_connection()?;
        let existing: Option<String> = connection
            .query_row(
                "SELECT id FROM shift_coverage_requests WHERE communication_id = ?1",
                params![request.communication_id],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Err(StoreError::DuplicateShiftRequest(request.communication_id));
        }

        let inserted = connection.execute(
            r#"
            INSERT INTO shift_coverage_requests (
                id, communication_id, original_employee_id, covering_employee_id,
                shift_date, shift_start, shift_end, status, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                request.id,
                request.communication_id,
                request.original_employee_id,
                request.covering_employee_id,
                request.shift_date.format(DATE_FORMAT).to_string(),
                request.shift_start.format(TIME_FORMAT).to_string(),
                request.shift_end.format(TIME_FORMAT).to_string(),
                request.status.as_str(),
                timestamp_to_db(request.created_at),
            ],
        );
        match inserted {
            Ok(_) => Ok(request),
            Err(error) if is_constraint_violation(&error) => {
                Err(StoreError::DuplicateShiftRequest(request.communication_id))
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn get_shift_request(&self, id: &str) -> StoreResult<Option<ShiftCoverageRequest>> {
        let connection = self.open_connection()?;
        Self::load_shift_request(&connection, id)
    }

    async fn query_shift_requests(
        &self,
        query: ShiftRequestQuery,
    ) -> StoreResult<Vec<ShiftCoverageRequest>> {
        if query.communication_ids.as_ref().is_some_and(Vec::is_empty) {
            return Ok(Vec::new());
        }

        let connection = self.open_connection()?;
        let Some(ids) = query.communication_ids.as_deref() else {
            return Self::select_shift_requests(&connection, &query, None);
        };
        if ids.len() <= MAX_IN_LIST_PARAMS {
            return Self::select_shift_requests(&connection, &query, Some(ids));
        }

        let mut requests = Vec::new();
        for chunk in ids.chunks(MAX_IN_LIST_PARAMS) {
            requests.extend(Self::select_shift_requests(&connection, &query, Some(chunk))?);
        }
        requests.sort_by(|left, right| {
            right
                .created_at
                .cmp(&left.created_at)
                .then_with(|| left.id.cmp(&right.id))
        });
        if let Some(limit) = query.limit {
            requests.truncate(limit);
        }
        Ok(requests)
    }

    async fn update_shift_request_status(
        &self,
        id: &str,
        status: CoverageStatus,
    ) -> StoreResult<()> {
        let mut connection = self.open_connection()?;
        let transaction = connection.transaction()?;
        let current = Self::load_shift_request(&transaction, id)?.ok_or_else(|| {
            StoreError::NotFound {
                kind: "shift_request",
                id: id.to_string(),
            }
        })?;
        if !current.status.can_transition_to(status) {
            return Err(StoreError::InvalidStatusTransition {
                id: id.to_string(),
                from: Some(current.status),
                to: status,
            });
        }
        transaction.execute(
            "UPDATE shift_coverage_requests SET status = ?2 WHERE id = ?1",
            params![id, status.as_str()],
        )?;
        transaction.commit()?;
        Ok(())
    }
}

/// Accumulates `WHERE` conditions with positional parameters.
#[derive(Debug, Default)]
struct SqlFilter {
    conditions: Vec<String>,
    values: Vec<SqlValue>,
}

impl SqlFilter {
    fn push_raw(&mut self, condition: &str) {
        self.conditions.push(condition.to_string());
    }

    fn push(&mut self, condition: &str, value: impl Into<String>) {
        self.conditions.push(condition.to_string());
        self.values.push(SqlValue::Text(value.into()));
    }

    fn push_pair(&mut self, condition: &str, value: &str) {
        self.conditions.push(condition.to_string());
        self.values.push(SqlValue::Text(value.to_string()));
        self.values.push(SqlValue::Text(value.to_string()));
    }

    fn push_in(&mut self, column: &str, negate: bool, values: impl Iterator<Item = String>) {
        let values: Vec<SqlValue> = values.map(SqlValue::Text).collect();
        let placeholders = vec!["?"; values.len()].join(", ");
        let operator = if negate { "NOT IN" } else { "IN" };
        self.conditions
            .push(format!("{column} {operator} ({placeholders})"));
        self.values.extend(values);
    }

    fn where_clause(&self) -> String {
        if self.conditions.is_empty() {
            return String::new();
        }
        format!(" WHERE {}", self.conditions.join(" AND "))
    }
}

fn limit_clause(limit: Option<usize>) -> String {
    limit
        .map(|limit| format!(" LIMIT {limit}"))
        .unwrap_or_default()
}

fn is_constraint_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(inner, _) if inner.code == ErrorCode::ConstraintViolation
    )
}

struct RawProfile {
    id: String,
    name: String,
    email: String,
    role: String,
    updated_at: String,
    restricted: bool,
}

impl RawProfile {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            email: row.get(2)?,
            role: row.get(3)?,
            updated_at: row.get(4)?,
            restricted: row.get(5)?,
        })
    }

    fn into_record(self) -> StoreResult<Profile> {
        let role = ProfileRole::parse(&self.role).ok_or(StoreError::InvalidPersistedValue {
            field: "profile_role",
            value: self.role,
        })?;
        Ok(Profile {
            id: self.id,
            name: self.name,
            email: self.email,
            role,
            updated_at: timestamp_from_db(&self.updated_at)?,
            restricted: self.restricted,
        })
    }
}

struct RawCommunication {
    id: String,
    sender_id: String,
    recipient_id: String,
    message: String,
    communication_type: String,
    status: Option<String>,
    admin_cc: Option<String>,
    created_at: String,
    read_at: Option<String>,
}

impl RawCommunication {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            sender_id: row.get(1)?,
            recipient_id: row.get(2)?,
            message: row.get(3)?,
            communication_type: row.get(4)?,
            status: row.get(5)?,
            admin_cc: row.get(6)?,
            created_at: row.get(7)?,
            read_at: row.get(8)?,
        })
    }

    fn into_record(self) -> StoreResult<Communication> {
        let communication_type = CommunicationType::parse(&self.communication_type).ok_or(
            StoreError::InvalidPersistedValue {
                field: "communication_type",
                value: self.communication_type,
            },
        )?;
        let status = self
            .status
            .map(|value| coverage_status_from_db(&value))
            .transpose()?;
        Ok(Communication {
            id: self.id,
            sender_id: self.sender_id,
            recipient_id: self.recipient_id,
            message: self.message,
            communication_type,
            status,
            admin_cc: self.admin_cc,
            created_at: timestamp_from_db(&self.created_at)?,
            read_at: option_timestamp_from_db(self.read_at)?,
        })
    }
}

struct RawShiftRequest {
    id: String,
    communication_id: String,
    original_employee_id: String,
    covering_employee_id: String,
    shift_date: String,
    shift_start: String,
    shift_end: String,
    status: String,
    created_at: String,
}

impl RawShiftRequest {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            communication_id: row.get(1)?,
            original_employee_id: row.get(2)?,
            covering_employee_id: row.get(3)?,
            shift_date: row.get(4)?,
            shift_start: row.get(5)?,
            shift_end: row.get(6)?,
            status: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    fn into_record(self) -> StoreResult<ShiftCoverageRequest> {
        Ok(ShiftCoverageRequest {
            shift_date: NaiveDate::parse_from_str(&self.shift_date, DATE_FORMAT)?,
            shift_start: NaiveTime::parse_from_str(&self.shift_start, TIME_FORMAT)?,
            shift_end: NaiveTime::parse_from_str(&self.shift_end, TIME_FORMAT)?,
            status: coverage_status_from_db(&self.status)?,
            created_at: timestamp_from_db(&self.created_at)?,
            id: self.id,
            communication_id: self.communication_id,
            original_employee_id: self.original_employee_id,
            covering_employee_id: self.covering_employee_id,
        })
    }
}

fn timestamp_to_db(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn option_timestamp_to_db(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(timestamp_to_db)
}

fn timestamp_from_db(value: &str) -> StoreResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

fn option_timestamp_from_db(value: Option<String>) -> StoreResult<Option<DateTime<Utc>>> {
    value.as_deref().map(timestamp_from_db).transpose()
}

fn coverage_status_from_db(value: &str) -> StoreResult<CoverageStatus> {
    CoverageStatus::parse(value).ok_or_else(|| StoreError::InvalidPersistedValue {
        field: "coverage_status",
        value: value.to_string(),
    })
}
