//! Shift-coverage messaging pipeline.
//!
//! A send resolves identities, writes the communication (plus its
//! shift-coverage request when applicable), schedules a delayed verification
//! of the second write, and fires a best-effort notification. Viewers read
//! through per-viewer [`CommunicationFeed`]s; responses update both records
//! and notify the original sender.

mod aggregator;
mod config;
mod error;
mod feed;
mod identity;
mod notify;
mod read_status;
mod response;
mod scope;
mod service;
mod throttle;
mod verification;
mod write;

pub use aggregator::{FetchOptions, MessageReadAggregator};
pub use config::{
    MessagingConfig, NotificationConfig, NotificationMode, DEFAULT_FALLBACK_ADMIN_EMAIL,
};
pub use error::{MessagingError, MessagingResult, PartialWriteError};
pub use feed::{CommunicationFeed, FeedSnapshot, RefreshOutcome};
pub use identity::{
    default_admin_strategies, default_exact_strategies, default_recipient_strategies,
    AdminLookup, AdminStrategy, AssignedAdmin, EqualityQuery, ExplicitAdminEmail,
    ExplicitAdminId, IdentityResolver, KeyedLookup, NamedFallbackAdmin, PrivilegedRead,
    ProfileStrategy, RecentScan, SuffixMatch,
};
pub use notify::{
    DisabledNotificationChannel, DryRunNotificationChannel, NotificationChannel,
    NotificationDispatcher, NotificationError, NotificationPayload, NotificationReceipt,
    WebhookNotificationChannel, ACTION_MESSAGE_SENT, ACTION_SHIFT_COVERAGE_ACCEPTED,
    ACTION_SHIFT_COVERAGE_DECLINED, ACTION_SHIFT_COVERAGE_REQUESTED, ACTION_URGENT_MESSAGE_SENT,
};
pub use read_status::{MarkReadOutcome, ReadStatusTracker};
pub use response::{CoverageDecision, ResponseOutcome, ResponseProcessor, ResponseRequest};
pub use scope::{ShutdownSignal, TaskScope};
pub use service::MessagingService;
pub use throttle::{RefreshPermit, RefreshSkip, RefreshThrottle};
pub use verification::{ShiftRequestVerifier, VerificationHandle, VerificationOutcome};
pub use write::{MessageReceipt, MessageWriteService, NewMessageRequest};
