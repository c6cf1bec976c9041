use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rota_messaging::{
    FetchOptions, MessageReceipt, MessagingConfig, MessagingService, NotificationConfig,
    NewMessageRequest, ResponseRequest,
};
use rota_store::{AdminAssignment, Profile, RecordStore, SqliteRecordStore};
use rota_types::ShiftDetailsDraft;
use serde_json::{json, Value};

use crate::cli_args::{
    AssignAdminArgs, Cli, CliCommand, InboxArgs, PutProfileArgs, ReadArgs, RespondArgs, SendArgs,
};

pub(crate) fn messaging_config(cli: &Cli) -> MessagingConfig {
    MessagingConfig {
        verification_delay: Duration::from_millis(cli.verification_delay_ms),
        verification_lookback: cli.verification_lookback,
        refresh_min_interval: Duration::from_millis(cli.refresh_min_interval_ms),
        recent_profile_scan_limit: cli.recent_profile_scan_limit,
        fallback_admin_email: cli.fallback_admin_email.clone(),
        dev_identity_fallback: cli.dev_identity_fallback,
        notification: NotificationConfig {
            mode: cli.notification_mode.into(),
            webhook_url: cli.notification_webhook_url.clone(),
            http_timeout_ms: cli.notification_timeout_ms,
        },
        ..MessagingConfig::default()
    }
}

/// Runs one subcommand and returns its JSON report.
pub(crate) async fn execute(cli: Cli) -> Result<Value> {
    let store = SqliteRecordStore::new(&cli.db_path).with_context(|| {
        format!("failed to open record store at {}", cli.db_path.display())
    })?;
    let store: Arc<dyn RecordStore> = Arc::new(store);

    match &cli.command {
        CliCommand::PutProfile(args) => return put_profile(store.as_ref(), args).await,
        CliCommand::AssignAdmin(args) => return assign_admin(store.as_ref(), args).await,
        _ => {}
    }

    let service = MessagingService::new(store, messaging_config(&cli))
        .context("invalid messaging configuration")?;
    let report = run_messaging_command(&service, &cli.command).await;
    // Detached notifications and verification finish before the process exits.
    service.drain().await;
    service.shutdown().await;
    report
}

async fn run_messaging_command(service: &MessagingService, command: &CliCommand) -> Result<Value> {
    match command {
        CliCommand::Send(args) => send(service, args).await,
        CliCommand::Respond(args) => respond(service, args).await,
        CliCommand::Inbox(args) => inbox(service, args).await,
        CliCommand::Read(args) => read(service, args).await,
        CliCommand::PutProfile(_) | CliCommand::AssignAdmin(_) => {
            anyhow::bail!("directory commands do not use the messaging service")
        }
    }
}

async fn put_profile(store: &dyn RecordStore, args: &PutProfileArgs) -> Result<Value> {
    let mut profile = Profile::new(
        args.id.trim(),
        args.name.trim(),
        args.email.trim(),
        args.role.into(),
    );
    profile.restricted = args.restricted;
    store
        .put_profile(profile.clone())
        .await
        .context("failed to store profile")?;
    Ok(json!({ "profile": profile }))
}

async fn assign_admin(store: &dyn RecordStore, args: &AssignAdminArgs) -> Result<Value> {
    let assignment = AdminAssignment {
        employee_id: args.employee_id.trim().to_string(),
        admin_id: args.admin_id.trim().to_string(),
    };
    store
        .put_admin_assignment(assignment.clone())
        .await
        .context("failed to store admin assignment")?;
    Ok(json!({ "assignment": assignment }))
}

async fn send(service: &MessagingService, args: &SendArgs) -> Result<Value> {
    let shift = (args.shift_date.is_some() || args.shift_start.is_some() || args.shift_end.is_some())
        .then_some(ShiftDetailsDraft {
            date: args.shift_date,
            start: args.shift_start,
            end: args.shift_end,
        });
    let receipt = service
        .create_message(NewMessageRequest {
            sender_id: args.sender.clone(),
            recipient_id: args.recipient.clone(),
            message: args.message.clone(),
            communication_type: args.communication_type.into(),
            admin_cc: args.admin_cc.clone(),
            shift,
        })
        .await
        .context("failed to send message")?;
    Ok(receipt_report(receipt, args.wait_verification).await)
}

async fn receipt_report(receipt: MessageReceipt, wait_verification: bool) -> Value {
    let MessageReceipt {
        communication,
        shift_request,
        partial_write,
        verification,
    } = receipt;
    let verification = match verification {
        Some(handle) if wait_verification => json!(handle.outcome().await.as_str()),
        Some(_) => json!("scheduled"),
        None => Value::Null,
    };
    json!({
        "communication": communication,
        "shiftRequest": shift_request,
        "partialWrite": partial_write.map(|error| error.to_string()),
        "verification": verification,
    })
}

async fn respond(service: &MessagingService, args: &RespondArgs) -> Result<Value> {
    let outcome = service
        .respond(ResponseRequest {
            communication_id: args.communication_id.clone(),
            shift_request_id: args.shift_request_id.clone(),
            decision: args.decision.into(),
            original_sender_id: args.original_sender.clone(),
        })
        .await
        .context("failed to record response")?;
    Ok(json!({
        "communicationId": outcome.communication_id,
        "shiftRequestId": outcome.shift_request_id,
        "status": outcome.status,
        "notificationDelivered": outcome.notification.is_delivered(),
    }))
}

async fn inbox(service: &MessagingService, args: &InboxArgs) -> Result<Value> {
    let viewer = service
        .resolver()
        .resolve_exact(&args.viewer)
        .await
        .context("failed to resolve viewer")?;
    let rows = service
        .fetch_communications(
            &viewer.id,
            FetchOptions {
                exclude_shift_coverage: args.exclude_shift_coverage,
                admin_scheduling_surface: viewer.is_administrator(),
            },
        )
        .await
        .context("failed to load communications")?;
    let unread = rows.iter().filter(|row| row.is_unread_for_viewer()).count();
    Ok(json!({
        "viewer": viewer.id,
        "unread": unread,
        "communications": rows,
    }))
}

async fn read(service: &MessagingService, args: &ReadArgs) -> Result<Value> {
    let outcome = service
        .mark_read(&args.viewer, &args.counterpart)
        .await
        .context("failed to mark conversation read")?;
    Ok(json!({
        "marked": outcome.marked,
        "refresh": outcome.refresh.map(|refresh| refresh.as_str()),
        "pulsesScheduled": outcome.pulses_scheduled,
    }))
}
