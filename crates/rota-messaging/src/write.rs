//! Message creation, including the two-record shift-coverage write.

use std::sync::Arc;

use rota_store::{
    Communication, CommunicationType, RecordStore, ShiftCoverageRequest, ShiftRequestQuery,
    StoreError,
};
use rota_types::{
    NewCommunication, NewShiftCoverageRequest, Profile, ShiftDetails, ShiftDetailsDraft,
};
use serde_json::{json, Value};

use crate::config::MessagingConfig;
use crate::error::{require_non_blank, MessagingError, MessagingResult, PartialWriteError};
use crate::identity::IdentityResolver;
use crate::notify::{
    NotificationDispatcher, ACTION_MESSAGE_SENT, ACTION_SHIFT_COVERAGE_REQUESTED,
    ACTION_URGENT_MESSAGE_SENT,
};
use crate::scope::TaskScope;
use crate::verification::{ShiftRequestVerifier, VerificationHandle};

const SHIFT_REQUEST_INSERT_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessageRequest {
    pub sender_id: String,
    pub recipient_id: String,
    pub message: String,
    pub communication_type: CommunicationType,
    pub admin_cc: Option<String>,
    /// Required for shift coverage, ignored otherwise.
    pub shift: Option<ShiftDetailsDraft>,
}

/// Result of a successful communication write.
#[derive(Debug)]
pub struct MessageReceipt {
    pub communication: Communication,
    pub shift_request: Option<ShiftCoverageRequest>,
    pub partial_write: Option<PartialWriteError>,
    /// Present for shift coverage only.
    pub verification: Option<VerificationHandle>,
}

impl MessageReceipt {
    pub fn is_partial(&self) -> bool {
        self.partial_write.is_some()
    }
}

pub struct MessageWriteService {
    store: Arc<dyn RecordStore>,
    resolver: Arc<IdentityResolver>,
    notifier: NotificationDispatcher,
    verifier: ShiftRequestVerifier,
    scope: TaskScope,
}

impl MessageWriteService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        resolver: Arc<IdentityResolver>,
        notifier: NotificationDispatcher,
        scope: TaskScope,
        config: &MessagingConfig,
    ) -> Self {
        let verifier = ShiftRequestVerifier::new(
            Arc::clone(&store),
            config.verification_delay,
            config.verification_lookback,
        );
        Self {
            store,
            resolver,
            notifier,
            verifier,
            scope,
        }
    }

    #[tracing::instrument(
        name = "rota_messaging.write.create_message",
        skip(self, request),
        fields(
            sender_id = %request.sender_id,
            recipient_id = %request.recipient_id,
            communication_type = request.communication_type.as_str()
        )
    )]
    pub async fn create_message(&self, request: NewMessageRequest) -> MessagingResult<MessageReceipt> {
        let shift = validate_request(&request)?;
        let recipient = self.resolver.resolve_recipient(&request.recipient_id).await?;
        let sender_id = self.resolver.resolve_exact(&request.sender_id).await?.id;

        let admin_cc = if shift.is_some() {
            self.resolver
                .resolve_admin(
                    &sender_id,
                    request.communication_type,
                    request.admin_cc.as_deref(),
                )
                .await
                .map(|admin| admin.id)
        } else {
            request
                .admin_cc
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        let communication = self
            .store
            .insert_communication(
                NewCommunication {
                    sender_id: sender_id.clone(),
                    recipient_id: recipient.id.clone(),
                    message: request.message.trim().to_string(),
                    communication_type: request.communication_type,
                    admin_cc,
                }
                .into_record(),
            )
            .await?;
        tracing::info!(communication_id = %communication.id, "communication stored");

        let mut receipt = MessageReceipt {
            communication,
            shift_request: None,
            partial_write: None,
            verification: None,
        };

        if let Some(shift) = shift {
            let expected = NewShiftCoverageRequest {
                communication_id: receipt.communication.id.clone(),
                original_employee_id: sender_id.clone(),
                covering_employee_id: recipient.id.clone(),
                shift,
            }
            .into_record();
            match self.insert_shift_request(&expected).await {
                Ok(stored) => receipt.shift_request = Some(stored),
                Err(partial) => {
                    tracing::warn!(error = %partial, "shift coverage write incomplete");
                    receipt.partial_write = Some(partial);
                }
            }
            receipt.verification = Some(self.verifier.schedule(&self.scope, expected));
        }

        self.notifier.spawn_send(
            &self.scope,
            notification_action(request.communication_type),
            &sender_id,
            &recipient.id,
            notification_details(&receipt, &recipient),
        );
        Ok(receipt)
    }

    /// Inserts the request, retrying once with the same payload.
    async fn insert_shift_request(
        &self,
        expected: &ShiftCoverageRequest,
    ) -> Result<ShiftCoverageRequest, PartialWriteError> {
        let first_error = match self.store.insert_shift_request(expected.clone()).await {
            Ok(stored) => return Ok(stored),
            Err(error) => error,
        };
        tracing::warn!(
            communication_id = %expected.communication_id,
            error = %first_error,
            "shift request insert failed; retrying once"
        );

        let retry_error = match self.store.insert_shift_request(expected.clone()).await {
            Ok(stored) => return Ok(stored),
            Err(StoreError::DuplicateShiftRequest(_)) => {
                match self.adopt_existing(&expected.communication_id).await {
                    Some(existing) => {
                        tracing::info!(
                            shift_request_id = %existing.id,
                            "first shift request insert had landed; adopting stored row"
                        );
                        return Ok(existing);
                    }
                    None => StoreError::DuplicateShiftRequest(expected.communication_id.clone()),
                }
            }
            Err(error) => error,
        };

        Err(PartialWriteError {
            communication_id: expected.communication_id.clone(),
            attempts: SHIFT_REQUEST_INSERT_ATTEMPTS,
            reason: retry_error.to_string(),
        })
    }

    async fn adopt_existing(&self, communication_id: &str) -> Option<ShiftCoverageRequest> {
        self.store
            .query_shift_requests(ShiftRequestQuery {
                communication_ids: Some(vec![communication_id.to_string()]),
                limit: Some(1),
                ..ShiftRequestQuery::default()
            })
            .await
            .ok()
            .and_then(|rows| rows.into_iter().next())
    }
}

fn validate_request(request: &NewMessageRequest) -> MessagingResult<Option<ShiftDetails>> {
    require_non_blank("recipient_id", &request.recipient_id)?;
    require_non_blank("sender_id", &request.sender_id)?;
    require_non_blank("message", &request.message)?;
    if request.communication_type != CommunicationType::ShiftCoverage {
        return Ok(None);
    }
    request
        .shift
        .unwrap_or_default()
        .complete()
        .map(Some)
        .map_err(|field| MessagingError::validation(field, "required for shift coverage"))
}

fn notification_action(communication_type: CommunicationType) -> &'static str {
    match communication_type {
        CommunicationType::ShiftCoverage => ACTION_SHIFT_COVERAGE_REQUESTED,
        CommunicationType::Urgent => ACTION_URGENT_MESSAGE_SENT,
        _ => ACTION_MESSAGE_SENT,
    }
}

fn notification_details(receipt: &MessageReceipt, recipient: &Profile) -> Value {
    let communication = &receipt.communication;
    let mut details = json!({
        "communicationId": communication.id,
        "communicationType": communication.communication_type.as_str(),
        "recipientName": recipient.name,
        "message": communication.message,
    });
    if let Some(request) = receipt.shift_request.as_ref() {
        details["shiftRequestId"] = json!(request.id);
        details["shiftDate"] = json!(request.shift_date.to_string());
        details["shiftStart"] = json!(request.shift_start.format("%H:%M").to_string());
        details["shiftEnd"] = json!(request.shift_end.format("%H:%M").to_string());
    }
    details
}
