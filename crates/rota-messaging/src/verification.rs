//! Delayed read-repair check for the two-record shift-coverage write.

use std::sync::Arc;
use std::time::Duration;

use rota_store::{RecordStore, ShiftCoverageRequest, ShiftRequestQuery};
use tokio::sync::oneshot;

use crate::scope::TaskScope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// The request is linked to its communication.
    Confirmed,
    /// No linked row, but a request for the same employee and shift date exists.
    RecoveredByShift,
    Missing,
    Cancelled,
    /// The store could not be queried.
    Failed,
}

impl VerificationOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::RecoveredByShift => "recovered_by_shift",
            Self::Missing => "missing",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

/// Caller side of a scheduled verification.
#[derive(Debug)]
pub struct VerificationHandle {
    cancel_tx: Option<oneshot::Sender<()>>,
    outcome_rx: oneshot::Receiver<VerificationOutcome>,
}

impl VerificationHandle {
    /// Stops the check if it has not run yet.
    pub fn cancel(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }

    /// Waits for the check; a task torn down with its scope reports `Cancelled`.
    pub async fn outcome(self) -> VerificationOutcome {
        self.outcome_rx
            .await
            .unwrap_or(VerificationOutcome::Cancelled)
    }
}

/// Confirms that a shift request exists for a freshly written communication.
#[derive(Clone)]
pub struct ShiftRequestVerifier {
    store: Arc<dyn RecordStore>,
    delay: Duration,
    lookback: usize,
}

impl ShiftRequestVerifier {
    pub fn new(store: Arc<dyn RecordStore>, delay: Duration, lookback: usize) -> Self {
        Self {
            store,
            delay,
            lookback,
        }
    }

    /// Runs `verify` on `scope` after the configured delay.
    pub fn schedule(&self, scope: &TaskScope, expected: ShiftCoverageRequest) -> VerificationHandle {
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let verifier = self.clone();
        scope.spawn("shift_request_verification", async move {
            let outcome = tokio::select! {
                Ok(()) = &mut cancel_rx => {
                    tracing::debug!(
                        communication_id = %expected.communication_id,
                        "shift request verification cancelled"
                    );
                    VerificationOutcome::Cancelled
                }
                outcome = async {
                    tokio::time::sleep(verifier.delay).await;
                    verifier.verify(&expected).await
                } => outcome,
            };
            let _ = outcome_tx.send(outcome);
        });
        VerificationHandle {
            cancel_tx: Some(cancel_tx),
            outcome_rx,
        }
    }

    #[tracing::instrument(
        name = "rota_messaging.verification.verify",
        skip(self, expected),
        fields(communication_id = %expected.communication_id)
    )]
    pub async fn verify(&self, expected: &ShiftCoverageRequest) -> VerificationOutcome {
        let linked = self
            .store
            .query_shift_requests(ShiftRequestQuery {
                communication_ids: Some(vec![expected.communication_id.clone()]),
                ..ShiftRequestQuery::default()
            })
            .await;
        match linked {
            Ok(rows) if !rows.is_empty() => {
                tracing::info!(shift_request_id = %rows[0].id, "shift request verified");
                return VerificationOutcome::Confirmed;
            }
            Ok(_) => {}
            Err(error) => {
                tracing::warn!(%error, "shift request verification query failed");
                return VerificationOutcome::Failed;
            }
        }

        let recent = self
            .store
            .query_shift_requests(ShiftRequestQuery {
                original_employee_id: Some(expected.original_employee_id.clone()),
                shift_date: Some(expected.shift_date),
                limit: Some(self.lookback),
                ..ShiftRequestQuery::default()
            })
            .await;
        match recent {
            Ok(rows) if !rows.is_empty() => {
                tracing::warn!(
                    candidates = rows.len(),
                    shift_request_id = %rows[0].id,
                    "shift request not linked to communication; found request for same shift"
                );
                VerificationOutcome::RecoveredByShift
            }
            Ok(_) => {
                tracing::warn!(
                    original_employee_id = %expected.original_employee_id,
                    shift_date = %expected.shift_date,
                    "shift request missing after write"
                );
                VerificationOutcome::Missing
            }
            Err(error) => {
                tracing::warn!(%error, "shift request fallback query failed");
                VerificationOutcome::Failed
            }
        }
    }
}
