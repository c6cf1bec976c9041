use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use rota_messaging::{
    CoverageDecision, FetchOptions, MessagingConfig, MessagingService, NewMessageRequest,
    NotificationChannel, NotificationError, NotificationPayload, ResponseRequest,
    VerificationOutcome, ACTION_SHIFT_COVERAGE_ACCEPTED, ACTION_SHIFT_COVERAGE_REQUESTED,
    DEFAULT_FALLBACK_ADMIN_EMAIL,
};
use rota_store::{InMemoryRecordStore, Profile, ProfileRole, RecordStore, SqliteRecordStore};
use rota_types::{CommunicationType, CoverageStatus, ShiftDetailsDraft};
use tokio::sync::Mutex as AsyncMutex;

#[derive(Default)]
struct RecordingChannel {
    payloads: AsyncMutex<Vec<NotificationPayload>>,
}

impl RecordingChannel {
    async fn payloads(&self) -> Vec<NotificationPayload> {
        self.payloads.lock().await.clone()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn deliver(&self, payload: &NotificationPayload) -> Result<(), NotificationError> {
        self.payloads.lock().await.push(payload.clone());
        Ok(())
    }
}

fn fast_config() -> MessagingConfig {
    MessagingConfig {
        verification_delay: Duration::from_millis(10),
        refresh_min_interval: Duration::from_millis(10),
        ..MessagingConfig::default()
    }
}

async fn seed_directory(store: &dyn RecordStore) {
    for profile in [
        Profile::new("emp-a", "Avery", "avery@rota.local", ProfileRole::Employee),
        Profile::new("emp-b", "Blake", "blake@rota.local", ProfileRole::Employee),
        Profile::new(
            "admin-1",
            "Scheduling",
            DEFAULT_FALLBACK_ADMIN_EMAIL,
            ProfileRole::Admin,
        ),
    ] {
        store.put_profile(profile).await.expect("seed profile");
    }
}

fn saturday_shift() -> ShiftDetailsDraft {
    ShiftDetailsDraft {
        date: NaiveDate::from_ymd_opt(2024, 6, 1),
        start: NaiveTime::from_hms_opt(9, 0, 0),
        end: NaiveTime::from_hms_opt(17, 0, 0),
    }
}

fn coverage_request(sender: &str, recipient: &str) -> NewMessageRequest {
    NewMessageRequest {
        sender_id: sender.to_string(),
        recipient_id: recipient.to_string(),
        message: "Can you take my Saturday shift?".to_string(),
        communication_type: CommunicationType::ShiftCoverage,
        admin_cc: None,
        shift: Some(saturday_shift()),
    }
}

async fn build_service(
    store: Arc<dyn RecordStore>,
) -> (MessagingService, Arc<RecordingChannel>) {
    let channel = Arc::new(RecordingChannel::default());
    let service = MessagingService::with_notification_channel(
        store,
        fast_config(),
        Arc::clone(&channel) as Arc<dyn NotificationChannel>,
    )
    .expect("build messaging service");
    (service, channel)
}

#[tokio::test]
async fn integration_shift_coverage_accept_notifies_original_sender_once() {
    let store: Arc<dyn RecordStore> = Arc::new(InMemoryRecordStore::new());
    seed_directory(store.as_ref()).await;
    let (service, channel) = build_service(Arc::clone(&store)).await;

    let receipt = service
        .create_message(coverage_request("emp-a", "emp-b"))
        .await
        .expect("send coverage request");
    assert!(!receipt.is_partial());
    assert_eq!(receipt.communication.admin_cc.as_deref(), Some("admin-1"));
    let shift_request = receipt.shift_request.clone().expect("shift request");
    let verification = receipt.verification.expect("verification scheduled");
    assert_eq!(verification.outcome().await, VerificationOutcome::Confirmed);

    let outcome = service
        .respond(ResponseRequest {
            communication_id: receipt.communication.id.clone(),
            shift_request_id: shift_request.id.clone(),
            decision: CoverageDecision::Accept,
            original_sender_id: "emp-a".to_string(),
        })
        .await
        .expect("accept coverage");
    assert_eq!(outcome.status, CoverageStatus::Accepted);
    assert!(outcome.notification.is_delivered());

    service.drain().await;
    let payloads = channel.payloads().await;
    let requested = payloads
        .iter()
        .filter(|payload| payload.action_type == ACTION_SHIFT_COVERAGE_REQUESTED)
        .count();
    let accepted: Vec<_> = payloads
        .iter()
        .filter(|payload| payload.action_type == ACTION_SHIFT_COVERAGE_ACCEPTED)
        .collect();
    assert_eq!(requested, 1);
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].actor, "emp-b");
    assert_eq!(accepted[0].assigned_to, "emp-a");

    let stored = store
        .get_shift_request(&shift_request.id)
        .await
        .expect("load shift request")
        .expect("shift request exists");
    assert_eq!(stored.status, CoverageStatus::Accepted);

    service.shutdown().await;
}

#[tokio::test]
async fn integration_admin_surface_and_mark_read() {
    let store: Arc<dyn RecordStore> = Arc::new(InMemoryRecordStore::new());
    seed_directory(store.as_ref()).await;
    let (service, _channel) = build_service(Arc::clone(&store)).await;

    let receipt = service
        .create_message(coverage_request("emp-a", "emp-b"))
        .await
        .expect("send coverage request");
    service
        .create_message(NewMessageRequest {
            sender_id: "emp-a".to_string(),
            recipient_id: "emp-b".to_string(),
            message: "thanks in advance".to_string(),
            communication_type: CommunicationType::General,
            admin_cc: None,
            shift: None,
        })
        .await
        .expect("send general message");

    let admin_rows = service
        .fetch_communications(
            "admin-1",
            FetchOptions {
                exclude_shift_coverage: false,
                admin_scheduling_surface: true,
            },
        )
        .await
        .expect("admin fetch");
    assert_eq!(admin_rows.len(), 1);
    assert_eq!(admin_rows[0].communication.id, receipt.communication.id);
    assert_eq!(admin_rows[0].shift_requests.len(), 1);
    assert!(!admin_rows[0].is_mine());

    let employee_rows = service
        .fetch_communications(
            "emp-b",
            FetchOptions {
                exclude_shift_coverage: true,
                admin_scheduling_surface: false,
            },
        )
        .await
        .expect("employee fetch");
    assert_eq!(employee_rows.len(), 1);
    assert_eq!(
        employee_rows[0].communication.communication_type,
        CommunicationType::General
    );

    let first = service.mark_read("emp-b", "emp-a").await.expect("mark read");
    assert_eq!(first.marked, 2);
    assert_eq!(first.pulses_scheduled, 0);
    let feed = service.feed_for("emp-b").await.expect("feed");
    assert_eq!(feed.unread_count(), 0);

    let second = service.mark_read("emp-b", "emp-a").await.expect("mark read again");
    assert_eq!(second.marked, 0);

    service.shutdown().await;
}

#[tokio::test]
async fn integration_sqlite_store_survives_reopen() {
    let temp = tempfile::tempdir().expect("tempdir");
    let db_path = temp.path().join("rota.sqlite");

    let communication_id = {
        let store: Arc<dyn RecordStore> =
            Arc::new(SqliteRecordStore::new(&db_path).expect("open sqlite store"));
        seed_directory(store.as_ref()).await;
        let (service, _channel) = build_service(store).await;
        let receipt = service
            .create_message(coverage_request("emp-a", "emp-b"))
            .await
            .expect("send coverage request");
        let verification = receipt.verification.expect("verification scheduled");
        assert_eq!(verification.outcome().await, VerificationOutcome::Confirmed);
        service.drain().await;
        service.shutdown().await;
        receipt.communication.id
    };

    let store: Arc<dyn RecordStore> =
        Arc::new(SqliteRecordStore::new(&db_path).expect("reopen sqlite store"));
    let (service, _channel) = build_service(store).await;
    let rows = service
        .fetch_communications("emp-b", FetchOptions::default())
        .await
        .expect("fetch after reopen");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].communication.id, communication_id);
    assert_eq!(rows[0].shift_requests.len(), 1);
    assert!(rows[0].is_unread_for_viewer());
    service.shutdown().await;
}
