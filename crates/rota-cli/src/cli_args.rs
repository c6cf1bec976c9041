use std::path::PathBuf;

use chrono::{NaiveDate, NaiveTime};
use clap::{Args, Parser, Subcommand};

use crate::cli_types::{
    CliCommunicationType, CliCoverageDecision, CliNotificationMode, CliProfileRole,
};

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_shift_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|error| format!("expected YYYY-MM-DD: {error}"))
}

fn parse_shift_time(value: &str) -> Result<NaiveTime, String> {
    let trimmed = value.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M"))
        .map_err(|error| format!("expected HH:MM or HH:MM:SS: {error}"))
}

#[derive(Debug, Parser)]
#[command(
    name = "rota",
    about = "Shift-coverage messaging for the Rota workplace directory",
    version
)]
pub struct Cli {
    #[arg(
        long = "db-path",
        env = "ROTA_DB_PATH",
        default_value = ".rota/rota.sqlite",
        help = "SQLite database backing profiles, messages, and shift coverage requests"
    )]
    pub db_path: PathBuf,

    #[arg(
        long = "log-level",
        env = "ROTA_LOG_LEVEL",
        help = "Tracing filter directive (overrides RUST_LOG), e.g. 'info' or 'rota_messaging=debug'"
    )]
    pub log_level: Option<String>,

    #[arg(
        long = "verification-delay-ms",
        env = "ROTA_VERIFICATION_DELAY_MS",
        default_value_t = 1_000,
        help = "Delay before verifying that a shift coverage request landed next to its message"
    )]
    pub verification_delay_ms: u64,

    #[arg(
        long = "verification-lookback",
        env = "ROTA_VERIFICATION_LOOKBACK",
        default_value_t = 5,
        value_parser = parse_positive_usize,
        help = "Recent requests scanned per employee and shift date during verification"
    )]
    pub verification_lookback: usize,

    #[arg(
        long = "refresh-min-interval-ms",
        env = "ROTA_REFRESH_MIN_INTERVAL_MS",
        default_value_t = 2_000,
        help = "Minimum interval between throttled feed refreshes"
    )]
    pub refresh_min_interval_ms: u64,

    #[arg(
        long = "recent-profile-scan-limit",
        env = "ROTA_RECENT_PROFILE_SCAN_LIMIT",
        default_value_t = 50,
        value_parser = parse_positive_usize,
        help = "Recently updated profiles scanned as the last recipient lookup fallback"
    )]
    pub recent_profile_scan_limit: usize,

    #[arg(
        long = "fallback-admin-email",
        env = "ROTA_FALLBACK_ADMIN_EMAIL",
        default_value = rota_messaging::DEFAULT_FALLBACK_ADMIN_EMAIL,
        help = "Administrator copied on shift coverage requests when no explicit admin is given"
    )]
    pub fallback_admin_email: String,

    #[arg(
        long = "dev-identity-fallback",
        env = "ROTA_DEV_IDENTITY_FALLBACK",
        default_value_t = false,
        help = "Resolve unknown recipients to any known profile (only in builds with the dev-identity-fallback feature)"
    )]
    pub dev_identity_fallback: bool,

    #[arg(
        long = "notification-mode",
        env = "ROTA_NOTIFICATION_MODE",
        value_enum,
        default_value = "dry-run",
        help = "Notification delivery mode (disabled, dry-run, webhook)"
    )]
    pub notification_mode: CliNotificationMode,

    #[arg(
        long = "notification-webhook-url",
        env = "ROTA_NOTIFICATION_WEBHOOK_URL",
        help = "Endpoint receiving JSON activity notifications in webhook mode"
    )]
    pub notification_webhook_url: Option<String>,

    #[arg(
        long = "notification-timeout-ms",
        env = "ROTA_NOTIFICATION_TIMEOUT_MS",
        default_value_t = 5_000,
        value_parser = parse_positive_u64,
        help = "HTTP timeout for webhook notifications"
    )]
    pub notification_timeout_ms: u64,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Create or replace a directory profile.
    PutProfile(PutProfileArgs),
    /// Assign the administrator responsible for an employee.
    AssignAdmin(AssignAdminArgs),
    /// Send a message or shift coverage request.
    Send(SendArgs),
    /// Accept or decline a shift coverage request.
    Respond(RespondArgs),
    /// List a viewer's messages.
    Inbox(InboxArgs),
    /// Mark a conversation as read.
    Read(ReadArgs),
}

#[derive(Debug, Args)]
pub struct PutProfileArgs {
    #[arg(long)]
    pub id: String,
    #[arg(long)]
    pub name: String,
    #[arg(long)]
    pub email: String,
    #[arg(long, value_enum, default_value = "employee")]
    pub role: CliProfileRole,
    #[arg(long, help = "Hide the profile from default visibility reads")]
    pub restricted: bool,
}

#[derive(Debug, Args)]
pub struct AssignAdminArgs {
    #[arg(long = "employee-id")]
    pub employee_id: String,
    #[arg(long = "admin-id")]
    pub admin_id: String,
}

#[derive(Debug, Args)]
pub struct SendArgs {
    #[arg(long)]
    pub sender: String,
    #[arg(long)]
    pub recipient: String,
    #[arg(long)]
    pub message: String,
    #[arg(long = "type", value_enum, default_value = "general")]
    pub communication_type: CliCommunicationType,
    #[arg(long = "admin-cc", help = "Explicit administrator id or email to copy")]
    pub admin_cc: Option<String>,
    #[arg(long = "shift-date", value_parser = parse_shift_date)]
    pub shift_date: Option<NaiveDate>,
    #[arg(long = "shift-start", value_parser = parse_shift_time)]
    pub shift_start: Option<NaiveTime>,
    #[arg(long = "shift-end", value_parser = parse_shift_time)]
    pub shift_end: Option<NaiveTime>,
    #[arg(
        long = "wait-verification",
        help = "Wait for the shift coverage write verification and report its outcome"
    )]
    pub wait_verification: bool,
}

#[derive(Debug, Args)]
pub struct RespondArgs {
    #[arg(long = "communication-id")]
    pub communication_id: String,
    #[arg(long = "shift-request-id")]
    pub shift_request_id: String,
    #[arg(long, value_enum)]
    pub decision: CliCoverageDecision,
    #[arg(long = "original-sender")]
    pub original_sender: String,
}

#[derive(Debug, Args)]
pub struct InboxArgs {
    #[arg(long)]
    pub viewer: String,
    #[arg(long = "exclude-shift-coverage")]
    pub exclude_shift_coverage: bool,
}

#[derive(Debug, Args)]
pub struct ReadArgs {
    #[arg(long)]
    pub viewer: String,
    #[arg(long)]
    pub counterpart: String,
}
