//! Best-effort activity notifications.
//!
//! Payloads are handed to a [`NotificationChannel`]; every failure is logged
//! and folded into a [`NotificationReceipt`] so callers never see an error.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::{NotificationConfig, NotificationMode};
use crate::error::{MessagingError, MessagingResult};
use crate::scope::TaskScope;

pub const ACTION_SHIFT_COVERAGE_REQUESTED: &str = "shift_coverage_requested";
pub const ACTION_SHIFT_COVERAGE_ACCEPTED: &str = "shift_coverage_accepted";
pub const ACTION_SHIFT_COVERAGE_DECLINED: &str = "shift_coverage_declined";
pub const ACTION_URGENT_MESSAGE_SENT: &str = "urgent_message_sent";
pub const ACTION_MESSAGE_SENT: &str = "message_sent";

const REJECTED_BODY_MAX_CHARS: usize = 256;

/// Activity record delivered to the notification endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub action_type: String,
    pub actor: String,
    pub assigned_to: String,
    pub details: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotificationError {
    #[error("notifications are disabled")]
    Disabled,
    #[error("notification transport failed: {0}")]
    Transport(String),
    #[error("notification rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("notification timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// Transport seam for notifications.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &'static str;
    async fn deliver(&self, payload: &NotificationPayload) -> Result<(), NotificationError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationReceipt {
    Delivered {
        channel: &'static str,
    },
    Failed {
        channel: &'static str,
        error: NotificationError,
    },
}

impl NotificationReceipt {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledNotificationChannel;

#[async_trait]
impl NotificationChannel for DisabledNotificationChannel {
    fn name(&self) -> &'static str {
        NotificationMode::Disabled.as_str()
    }

    async fn deliver(&self, _payload: &NotificationPayload) -> Result<(), NotificationError> {
        Err(NotificationError::Disabled)
    }
}

/// Logs payloads instead of sending them.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunNotificationChannel;

#[async_trait]
impl NotificationChannel for DryRunNotificationChannel {
    fn name(&self) -> &'static str {
        NotificationMode::DryRun.as_str()
    }

    async fn deliver(&self, payload: &NotificationPayload) -> Result<(), NotificationError> {
        tracing::info!(
            action = %payload.action_type,
            actor = %payload.actor,
            assigned_to = %payload.assigned_to,
            details = %payload.details,
            "dry-run notification"
        );
        Ok(())
    }
}

/// Posts payloads as JSON to a fixed endpoint.
#[derive(Debug, Clone)]
pub struct WebhookNotificationChannel {
    client: reqwest::Client,
    url: String,
    timeout_ms: u64,
}

impl WebhookNotificationChannel {
    pub fn new(url: impl Into<String>, timeout_ms: u64) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|error| NotificationError::Transport(error.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            timeout_ms,
        })
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }
}

#[async_trait]
impl NotificationChannel for WebhookNotificationChannel {
    fn name(&self) -> &'static str {
        NotificationMode::Webhook.as_str()
    }

    async fn deliver(&self, payload: &NotificationPayload) -> Result<(), NotificationError> {
        let response = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|error| classify_transport_error(error, self.timeout_ms))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(NotificationError::Rejected {
            status: status.as_u16(),
            body: body.chars().take(REJECTED_BODY_MAX_CHARS).collect(),
        })
    }
}

fn classify_transport_error(error: reqwest::Error, timeout_ms: u64) -> NotificationError {
    if error.is_timeout() {
        NotificationError::Timeout { timeout_ms }
    } else {
        NotificationError::Transport(error.to_string())
    }
}

/// Fire-and-forget notification front end.
#[derive(Clone)]
pub struct NotificationDispatcher {
    channel: Arc<dyn NotificationChannel>,
}

impl fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("channel", &self.channel.name())
            .finish()
    }
}

impl NotificationDispatcher {
    pub fn new(channel: Arc<dyn NotificationChannel>) -> Self {
        Self { channel }
    }

    pub fn from_config(config: &NotificationConfig) -> MessagingResult<Self> {
        let channel: Arc<dyn NotificationChannel> = match config.mode {
            NotificationMode::Disabled => Arc::new(DisabledNotificationChannel),
            NotificationMode::DryRun => Arc::new(DryRunNotificationChannel),
            NotificationMode::Webhook => {
                let url = config
                    .webhook_url
                    .as_deref()
                    .map(str::trim)
                    .filter(|url| !url.is_empty())
                    .ok_or_else(|| {
                        MessagingError::validation(
                            "notification.webhook_url",
                            "webhook mode requires a url",
                        )
                    })?;
                let channel = WebhookNotificationChannel::new(url, config.http_timeout_ms)
                    .map_err(|error| {
                        MessagingError::validation("notification.webhook_url", error.to_string())
                    })?;
                Arc::new(channel)
            }
        };
        Ok(Self::new(channel))
    }

    pub fn channel_name(&self) -> &'static str {
        self.channel.name()
    }

    #[tracing::instrument(
        name = "rota_messaging.notify.send",
        skip(self, details),
        fields(channel = self.channel.name())
    )]
    pub async fn send(
        &self,
        action: &str,
        actor: &str,
        assigned_to: &str,
        details: Value,
    ) -> NotificationReceipt {
        let payload = NotificationPayload {
            action_type: action.to_string(),
            actor: actor.to_string(),
            assigned_to: assigned_to.to_string(),
            details,
        };
        let channel = self.channel.name();
        match self.channel.deliver(&payload).await {
            Ok(()) => {
                tracing::debug!(action, "notification delivered");
                NotificationReceipt::Delivered { channel }
            }
            Err(NotificationError::Disabled) => {
                tracing::debug!(action, "notification skipped; channel disabled");
                NotificationReceipt::Failed {
                    channel,
                    error: NotificationError::Disabled,
                }
            }
            Err(error) => {
                tracing::warn!(action, %error, "notification delivery failed");
                NotificationReceipt::Failed { channel, error }
            }
        }
    }

    /// Sends on `scope` without waiting for delivery.
    pub fn spawn_send(
        &self,
        scope: &TaskScope,
        action: &str,
        actor: &str,
        assigned_to: &str,
        details: Value,
    ) {
        let dispatcher = self.clone();
        let action = action.to_string();
        let actor = actor.to_string();
        let assigned_to = assigned_to.to_string();
        scope.spawn("notification", async move {
            dispatcher
                .send(&action, &actor, &assigned_to, details)
                .await;
        });
    }
}
