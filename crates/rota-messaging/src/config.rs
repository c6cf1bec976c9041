//! Runtime configuration for the messaging pipeline.

use std::time::Duration;

use crate::error::{MessagingError, MessagingResult};

pub const DEFAULT_FALLBACK_ADMIN_EMAIL: &str = "scheduling-admin@rota.local";
const DEFAULT_VERIFICATION_DELAY_MS: u64 = 1_000;
const DEFAULT_VERIFICATION_LOOKBACK: usize = 5;
const DEFAULT_REFRESH_MIN_INTERVAL_MS: u64 = 2_000;
const DEFAULT_ADMIN_POLL_INTERVAL_SECONDS: u64 = 15;
const DEFAULT_USER_POLL_INTERVAL_SECONDS: u64 = 30;
const DEFAULT_RECENT_PROFILE_SCAN_LIMIT: usize = 50;
const DEFAULT_NOTIFICATION_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Enumerates supported `NotificationMode` values.
pub enum NotificationMode {
    Disabled,
    #[default]
    DryRun,
    Webhook,
}

impl NotificationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::DryRun => "dry_run",
            Self::Webhook => "webhook",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "disabled" | "off" => Some(Self::Disabled),
            "dry_run" => Some(Self::DryRun),
            "webhook" => Some(Self::Webhook),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationConfig {
    pub mode: NotificationMode,
    pub webhook_url: Option<String>,
    pub http_timeout_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            mode: NotificationMode::DryRun,
            webhook_url: None,
            http_timeout_ms: DEFAULT_NOTIFICATION_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Tunables for identity resolution, write verification, and feed refresh.
pub struct MessagingConfig {
    /// Wait before checking that a shift request landed next to its communication.
    pub verification_delay: Duration,
    /// Requests scanned per (employee, shift date) when the direct link is missing.
    pub verification_lookback: usize,
    pub refresh_min_interval: Duration,
    pub admin_poll_interval: Duration,
    pub user_poll_interval: Duration,
    /// Extra refreshes scheduled for administrators after marking a conversation read.
    pub admin_refresh_pulses: Vec<Duration>,
    pub recent_profile_scan_limit: usize,
    pub fallback_admin_email: String,
    /// Only honoured when built with the `dev-identity-fallback` feature.
    pub dev_identity_fallback: bool,
    pub notification: NotificationConfig,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            verification_delay: Duration::from_millis(DEFAULT_VERIFICATION_DELAY_MS),
            verification_lookback: DEFAULT_VERIFICATION_LOOKBACK,
            refresh_min_interval: Duration::from_millis(DEFAULT_REFRESH_MIN_INTERVAL_MS),
            admin_poll_interval: Duration::from_secs(DEFAULT_ADMIN_POLL_INTERVAL_SECONDS),
            user_poll_interval: Duration::from_secs(DEFAULT_USER_POLL_INTERVAL_SECONDS),
            admin_refresh_pulses: vec![Duration::from_secs(1), Duration::from_secs(3)],
            recent_profile_scan_limit: DEFAULT_RECENT_PROFILE_SCAN_LIMIT,
            fallback_admin_email: DEFAULT_FALLBACK_ADMIN_EMAIL.to_string(),
            dev_identity_fallback: false,
            notification: NotificationConfig::default(),
        }
    }
}

impl MessagingConfig {
    pub fn validate(&self) -> MessagingResult<()> {
        if self.verification_lookback == 0 {
            return Err(MessagingError::validation(
                "verification_lookback",
                "must be greater than 0",
            ));
        }
        if self.recent_profile_scan_limit == 0 {
            return Err(MessagingError::validation(
                "recent_profile_scan_limit",
                "must be greater than 0",
            ));
        }
        if self.admin_poll_interval.is_zero() {
            return Err(MessagingError::validation(
                "admin_poll_interval",
                "must be greater than 0",
            ));
        }
        if self.user_poll_interval.is_zero() {
            return Err(MessagingError::validation(
                "user_poll_interval",
                "must be greater than 0",
            ));
        }
        if self.notification.mode == NotificationMode::Webhook {
            let has_url = self
                .notification
                .webhook_url
                .as_deref()
                .is_some_and(|url| !url.trim().is_empty());
            if !has_url {
                return Err(MessagingError::validation(
                    "notification.webhook_url",
                    "webhook mode requires a url",
                ));
            }
            if self.notification.http_timeout_ms == 0 {
                return Err(MessagingError::validation(
                    "notification.http_timeout_ms",
                    "webhook mode requires http timeout > 0",
                ));
            }
        }
        Ok(())
    }

    pub fn poll_interval_for(&self, administrator: bool) -> Duration {
        if administrator {
            self.admin_poll_interval
        } else {
            self.user_poll_interval
        }
    }
}
