//! Accept/decline handling for shift-coverage requests.

use std::sync::Arc;

use rota_store::{CoverageStatus, RecordStore, StoreError};
use serde_json::json;

use crate::error::{require_non_blank, MessagingError, MessagingResult};
use crate::identity::IdentityResolver;
use crate::notify::{
    NotificationDispatcher, NotificationReceipt, ACTION_SHIFT_COVERAGE_ACCEPTED,
    ACTION_SHIFT_COVERAGE_DECLINED,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverageDecision {
    Accept,
    Decline,
}

impl CoverageDecision {
    pub fn status(self) -> CoverageStatus {
        match self {
            Self::Accept => CoverageStatus::Accepted,
            Self::Decline => CoverageStatus::Declined,
        }
    }

    pub fn notification_action(self) -> &'static str {
        match self {
            Self::Accept => ACTION_SHIFT_COVERAGE_ACCEPTED,
            Self::Decline => ACTION_SHIFT_COVERAGE_DECLINED,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "accept" | "accepted" => Some(Self::Accept),
            "decline" | "declined" => Some(Self::Decline),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseRequest {
    pub communication_id: String,
    pub shift_request_id: String,
    pub decision: CoverageDecision,
    pub original_sender_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseOutcome {
    pub communication_id: String,
    pub shift_request_id: String,
    pub status: CoverageStatus,
    pub notification: NotificationReceipt,
}

pub struct ResponseProcessor {
    store: Arc<dyn RecordStore>,
    resolver: Arc<IdentityResolver>,
    notifier: NotificationDispatcher,
}

impl ResponseProcessor {
    pub fn new(
        store: Arc<dyn RecordStore>,
        resolver: Arc<IdentityResolver>,
        notifier: NotificationDispatcher,
    ) -> Self {
        Self {
            store,
            resolver,
            notifier,
        }
    }

    /// Applies the decision to the communication, then to the shift request.
    ///
    /// The two writes are independent; a failure on the second leaves the
    /// communication updated and returns `InconsistentResponse`. Retrying the
    /// same decision converges because re-applying a status is allowed.
    #[tracing::instrument(
        name = "rota_messaging.response.respond",
        skip(self, request),
        fields(
            communication_id = %request.communication_id,
            shift_request_id = %request.shift_request_id,
            decision = ?request.decision
        )
    )]
    pub async fn respond(&self, request: ResponseRequest) -> MessagingResult<ResponseOutcome> {
        require_non_blank("communication_id", &request.communication_id)?;
        require_non_blank("shift_request_id", &request.shift_request_id)?;
        require_non_blank("original_sender_id", &request.original_sender_id)?;
        let target = request.decision.status();

        let original_sender = self
            .resolver
            .resolve_exact(&request.original_sender_id)
            .await?;
        let communication = self
            .store
            .get_communication(request.communication_id.trim())
            .await?
            .ok_or_else(|| MessagingError::not_found("communication", &request.communication_id))?;
        let shift_request = self
            .store
            .get_shift_request(request.shift_request_id.trim())
            .await?
            .ok_or_else(|| {
                MessagingError::not_found("shift_request", &request.shift_request_id)
            })?;

        if !communication.is_shift_coverage() {
            return Err(MessagingError::validation(
                "communication_id",
                "communication is not a shift coverage request",
            ));
        }
        if shift_request.communication_id != communication.id {
            return Err(MessagingError::validation(
                "shift_request_id",
                "shift request belongs to a different communication",
            ));
        }
        if communication.sender_id != original_sender.id {
            return Err(MessagingError::validation(
                "original_sender_id",
                "does not match the communication sender",
            ));
        }
        match communication.status {
            Some(from) if from.can_transition_to(target) => {}
            from => return Err(MessagingError::InvalidTransition { from, to: target }),
        }
        if !shift_request.status.can_transition_to(target) {
            return Err(MessagingError::InvalidTransition {
                from: Some(shift_request.status),
                to: target,
            });
        }

        self.store
            .update_communication_status(&communication.id, target)
            .await
            .map_err(transition_error)?;
        if let Err(source) = self
            .store
            .update_shift_request_status(&shift_request.id, target)
            .await
        {
            tracing::warn!(
                error = %source,
                "communication status updated but shift request status was not"
            );
            return Err(MessagingError::InconsistentResponse {
                communication_id: communication.id,
                shift_request_id: shift_request.id,
                source,
            });
        }
        tracing::info!(status = target.as_str(), "shift coverage response recorded");

        let notification = self
            .notifier
            .send(
                request.decision.notification_action(),
                &shift_request.covering_employee_id,
                &original_sender.id,
                json!({
                    "communicationId": communication.id,
                    "shiftRequestId": shift_request.id,
                    "status": target.as_str(),
                    "shiftDate": shift_request.shift_date.to_string(),
                    "shiftStart": shift_request.shift_start.format("%H:%M").to_string(),
                    "shiftEnd": shift_request.shift_end.format("%H:%M").to_string(),
                }),
            )
            .await;

        Ok(ResponseOutcome {
            communication_id: communication.id,
            shift_request_id: shift_request.id,
            status: target,
            notification,
        })
    }
}

fn transition_error(error: StoreError) -> MessagingError {
    match error {
        StoreError::InvalidStatusTransition { from, to, .. } => {
            MessagingError::InvalidTransition { from, to }
        }
        other => MessagingError::TransientStore(other),
    }
}
