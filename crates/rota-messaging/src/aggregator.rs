//! Role-aware message aggregation for a single viewer.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rota_store::{
    CommunicationQuery, CommunicationType, RecordStore, ShiftCoverageRequest, ShiftRequestQuery,
};
use rota_types::ViewerCommunication;

use crate::error::{require_non_blank, MessagingResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    pub exclude_shift_coverage: bool,
    /// Adds every shift-coverage message, not just the viewer's own.
    pub admin_scheduling_surface: bool,
}

#[derive(Clone)]
pub struct MessageReadAggregator {
    store: Arc<dyn RecordStore>,
}

impl MessageReadAggregator {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Loads the viewer's communications joined with their shift requests.
    ///
    /// Any failed query aborts the whole fetch.
    #[tracing::instrument(name = "rota_messaging.aggregator.fetch", skip(self))]
    pub async fn fetch_communications(
        &self,
        user_id: &str,
        options: FetchOptions,
    ) -> MessagingResult<Vec<ViewerCommunication>> {
        require_non_blank("user_id", user_id)?;
        let user_id = user_id.trim();

        let mut rows = self
            .store
            .query_communications(CommunicationQuery {
                participant_id: Some(user_id.to_string()),
                ..CommunicationQuery::default()
            })
            .await?;
        if options.exclude_shift_coverage {
            rows.retain(|row| !row.is_shift_coverage());
        }

        let mut shift_ids: Vec<String> = rows
            .iter()
            .filter(|row| row.is_shift_coverage())
            .map(|row| row.id.clone())
            .collect();

        if options.admin_scheduling_surface && !options.exclude_shift_coverage {
            let others = self
                .store
                .query_communications(CommunicationQuery {
                    exclude_participant_id: Some(user_id.to_string()),
                    types: Some(vec![CommunicationType::ShiftCoverage]),
                    exclude_ids: Some(shift_ids.clone()),
                    ..CommunicationQuery::default()
                })
                .await?;
            let mut seen: HashSet<String> = rows.iter().map(|row| row.id.clone()).collect();
            for row in others {
                if seen.insert(row.id.clone()) {
                    shift_ids.push(row.id.clone());
                    rows.push(row);
                }
            }
        }

        let mut requests_by_communication: HashMap<String, Vec<ShiftCoverageRequest>> =
            HashMap::new();
        if !shift_ids.is_empty() {
            let requests = self
                .store
                .query_shift_requests(ShiftRequestQuery {
                    communication_ids: Some(shift_ids),
                    ..ShiftRequestQuery::default()
                })
                .await?;
            for request in requests {
                requests_by_communication
                    .entry(request.communication_id.clone())
                    .or_default()
                    .push(request);
            }
        }

        let mut merged: Vec<ViewerCommunication> = rows
            .into_iter()
            .map(|communication| ViewerCommunication {
                shift_requests: requests_by_communication
                    .remove(&communication.id)
                    .unwrap_or_default(),
                communication,
                viewer_id: user_id.to_string(),
            })
            .collect();
        merged.sort_by(|left, right| {
            right
                .communication
                .created_at
                .cmp(&left.communication.created_at)
                .then_with(|| left.communication.id.cmp(&right.communication.id))
        });
        tracing::debug!(rows = merged.len(), "communications aggregated");
        Ok(merged)
    }
}
