use clap::ValueEnum;
use rota_messaging::{CoverageDecision, NotificationMode};
use rota_types::{CommunicationType, ProfileRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliNotificationMode {
    Disabled,
    DryRun,
    Webhook,
}

impl From<CliNotificationMode> for NotificationMode {
    fn from(value: CliNotificationMode) -> Self {
        match value {
            CliNotificationMode::Disabled => NotificationMode::Disabled,
            CliNotificationMode::DryRun => NotificationMode::DryRun,
            CliNotificationMode::Webhook => NotificationMode::Webhook,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliCommunicationType {
    General,
    ShiftCoverage,
    Urgent,
    SystemNotification,
    Announcement,
}

impl From<CliCommunicationType> for CommunicationType {
    fn from(value: CliCommunicationType) -> Self {
        match value {
            CliCommunicationType::General => CommunicationType::General,
            CliCommunicationType::ShiftCoverage => CommunicationType::ShiftCoverage,
            CliCommunicationType::Urgent => CommunicationType::Urgent,
            CliCommunicationType::SystemNotification => CommunicationType::SystemNotification,
            CliCommunicationType::Announcement => CommunicationType::Announcement,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliProfileRole {
    Admin,
    Employee,
    Manager,
    Hr,
}

impl From<CliProfileRole> for ProfileRole {
    fn from(value: CliProfileRole) -> Self {
        match value {
            CliProfileRole::Admin => ProfileRole::Admin,
            CliProfileRole::Employee => ProfileRole::Employee,
            CliProfileRole::Manager => ProfileRole::Manager,
            CliProfileRole::Hr => ProfileRole::Hr,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliCoverageDecision {
    Accept,
    Decline,
}

impl From<CliCoverageDecision> for CoverageDecision {
    fn from(value: CliCoverageDecision) -> Self {
        match value {
            CliCoverageDecision::Accept => CoverageDecision::Accept,
            CliCoverageDecision::Decline => CoverageDecision::Decline,
        }
    }
}
