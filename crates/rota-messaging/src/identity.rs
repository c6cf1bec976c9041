//! Identity resolution through ordered fallback strategies.
//!
//! Recipient ids arriving from the UI are not always clean: they may be
//! truncated, differently cased, or point at a profile hidden from the
//! default visibility path. Each [`ProfileStrategy`] tries one way of finding
//! the profile; the resolver walks the chain until one hits.

use std::sync::Arc;

use async_trait::async_trait;
use rota_store::{
    CommunicationType, Profile, ProfileQuery, RecordStore, StoreError, StoreResult,
};
use rota_types::{looks_like_email, looks_like_identifier};

use crate::config::MessagingConfig;
use crate::error::{require_non_blank, MessagingError, MessagingResult};

const SUFFIX_FRAGMENT_CHARS: usize = 8;
const MIN_SUFFIX_FRAGMENT_CHARS: usize = 4;

/// One way of locating a profile by a caller-supplied id.
#[async_trait]
pub trait ProfileStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    async fn find(&self, store: &dyn RecordStore, id: &str) -> StoreResult<Option<Profile>>;
}

/// Exact keyed lookup.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyedLookup;

#[async_trait]
impl ProfileStrategy for KeyedLookup {
    fn name(&self) -> &'static str {
        "keyed_lookup"
    }

    async fn find(&self, store: &dyn RecordStore, id: &str) -> StoreResult<Option<Profile>> {
        store.get_profile(id).await
    }
}

/// Equality query on the trimmed id, ignoring case.
#[derive(Debug, Clone, Copy, Default)]
pub struct EqualityQuery;

#[async_trait]
impl ProfileStrategy for EqualityQuery {
    fn name(&self) -> &'static str {
        "equality_query"
    }

    async fn find(&self, store: &dyn RecordStore, id: &str) -> StoreResult<Option<Profile>> {
        let rows = store
            .query_profiles(ProfileQuery {
                id_eq: Some(id.trim().to_string()),
                limit: Some(1),
                ..ProfileQuery::default()
            })
            .await?;
        Ok(rows.into_iter().next())
    }
}

/// Keyed lookup through the store's privileged path.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrivilegedRead;

#[async_trait]
impl ProfileStrategy for PrivilegedRead {
    fn name(&self) -> &'static str {
        "privileged_read"
    }

    async fn find(&self, store: &dyn RecordStore, id: &str) -> StoreResult<Option<Profile>> {
        store.get_profile_privileged(id).await
    }
}

/// Matches on the trailing characters of the id, tolerating truncated prefixes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SuffixMatch;

impl SuffixMatch {
    fn fragment(id: &str) -> Option<String> {
        let chars: Vec<char> = id.trim().chars().collect();
        if chars.len() < MIN_SUFFIX_FRAGMENT_CHARS {
            return None;
        }
        let start = chars.len().saturating_sub(SUFFIX_FRAGMENT_CHARS);
        Some(chars[start..].iter().collect::<String>().to_ascii_lowercase())
    }
}

#[async_trait]
impl ProfileStrategy for SuffixMatch {
    fn name(&self) -> &'static str {
        "suffix_match"
    }

    async fn find(&self, store: &dyn RecordStore, id: &str) -> StoreResult<Option<Profile>> {
        let Some(fragment) = Self::fragment(id) else {
            return Ok(None);
        };
        let rows = store
            .query_profiles(ProfileQuery {
                id_fragment: Some(fragment.clone()),
                ..ProfileQuery::default()
            })
            .await?;
        Ok(rows
            .into_iter()
            .find(|profile| profile.id.to_ascii_lowercase().ends_with(&fragment)))
    }
}

/// Scans the most recently updated profiles for an exact, then partial, id match.
#[derive(Debug, Clone, Copy)]
pub struct RecentScan {
    pub limit: usize,
}

#[async_trait]
impl ProfileStrategy for RecentScan {
    fn name(&self) -> &'static str {
        "recent_scan"
    }

    async fn find(&self, store: &dyn RecordStore, id: &str) -> StoreResult<Option<Profile>> {
        let wanted = id.trim().to_ascii_lowercase();
        let rows = store
            .query_profiles(ProfileQuery {
                limit: Some(self.limit),
                ..ProfileQuery::default()
            })
            .await?;
        let candidates: Vec<(String, Profile)> = rows
            .into_iter()
            .map(|profile| (profile.id.trim().to_ascii_lowercase(), profile))
            .filter(|(key, _)| !key.is_empty())
            .collect();

        if let Some((_, profile)) = candidates.iter().find(|(key, _)| *key == wanted) {
            return Ok(Some(profile.clone()));
        }
        Ok(candidates
            .into_iter()
            .find(|(key, _)| key.contains(&wanted) || wanted.contains(key.as_str()))
            .map(|(_, profile)| profile))
    }
}

/// Inputs to administrator resolution.
#[derive(Debug, Clone, Copy)]
pub struct AdminLookup<'a> {
    pub requester_id: &'a str,
    pub explicit_admin: Option<&'a str>,
}

/// One way of choosing the administrator copied on a shift-coverage request.
#[async_trait]
pub trait AdminStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    async fn find(
        &self,
        resolver: &IdentityResolver,
        lookup: AdminLookup<'_>,
    ) -> MessagingResult<Option<Profile>>;
}

/// Explicit admin value shaped like a record id.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExplicitAdminId;

#[async_trait]
impl AdminStrategy for ExplicitAdminId {
    fn name(&self) -> &'static str {
        "explicit_admin_id"
    }

    async fn find(
        &self,
        resolver: &IdentityResolver,
        lookup: AdminLookup<'_>,
    ) -> MessagingResult<Option<Profile>> {
        let Some(value) = lookup.explicit_admin.filter(|value| looks_like_identifier(value))
        else {
            return Ok(None);
        };
        optional(resolver.resolve_exact(value.trim()).await)
    }
}

/// Explicit admin value shaped like an email address.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExplicitAdminEmail;

#[async_trait]
impl AdminStrategy for ExplicitAdminEmail {
    fn name(&self) -> &'static str {
        "explicit_admin_email"
    }

    async fn find(
        &self,
        resolver: &IdentityResolver,
        lookup: AdminLookup<'_>,
    ) -> MessagingResult<Option<Profile>> {
        let Some(email) = lookup.explicit_admin.filter(|value| looks_like_email(value)) else {
            return Ok(None);
        };
        Ok(resolver.find_by_email(email).await?)
    }
}

/// Configured scheduling administrator, looked up by email.
#[derive(Debug, Clone)]
pub struct NamedFallbackAdmin {
    pub email: String,
}

#[async_trait]
impl AdminStrategy for NamedFallbackAdmin {
    fn name(&self) -> &'static str {
        "named_fallback_admin"
    }

    async fn find(
        &self,
        resolver: &IdentityResolver,
        _lookup: AdminLookup<'_>,
    ) -> MessagingResult<Option<Profile>> {
        if self.email.trim().is_empty() {
            return Ok(None);
        }
        Ok(resolver.find_by_email(&self.email).await?)
    }
}

/// The admin assigned to the requester in the directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssignedAdmin;

#[async_trait]
impl AdminStrategy for AssignedAdmin {
    fn name(&self) -> &'static str {
        "assigned_admin"
    }

    async fn find(
        &self,
        resolver: &IdentityResolver,
        lookup: AdminLookup<'_>,
    ) -> MessagingResult<Option<Profile>> {
        let Some(assignment) = resolver
            .store
            .get_admin_assignment(lookup.requester_id)
            .await?
        else {
            return Ok(None);
        };
        optional(resolver.resolve_exact(&assignment.admin_id).await)
    }
}

fn optional(result: MessagingResult<Profile>) -> MessagingResult<Option<Profile>> {
    match result {
        Ok(profile) => Ok(Some(profile)),
        Err(MessagingError::NotFound { .. }) => Ok(None),
        Err(error) => Err(error),
    }
}

pub fn default_exact_strategies() -> Vec<Box<dyn ProfileStrategy>> {
    vec![
        Box::new(KeyedLookup),
        Box::new(EqualityQuery),
        Box::new(PrivilegedRead),
    ]
}

pub fn default_recipient_strategies(config: &MessagingConfig) -> Vec<Box<dyn ProfileStrategy>> {
    let mut strategies = default_exact_strategies();
    strategies.push(Box::new(SuffixMatch));
    strategies.push(Box::new(RecentScan {
        limit: config.recent_profile_scan_limit,
    }));
    strategies
}

pub fn default_admin_strategies(config: &MessagingConfig) -> Vec<Box<dyn AdminStrategy>> {
    vec![
        Box::new(ExplicitAdminId),
        Box::new(ExplicitAdminEmail),
        Box::new(NamedFallbackAdmin {
            email: config.fallback_admin_email.clone(),
        }),
        Box::new(AssignedAdmin),
    ]
}

/// Resolves recipients, exact identities, and copied administrators.
pub struct IdentityResolver {
    store: Arc<dyn RecordStore>,
    exact_strategies: Vec<Box<dyn ProfileStrategy>>,
    recipient_strategies: Vec<Box<dyn ProfileStrategy>>,
    admin_strategies: Vec<Box<dyn AdminStrategy>>,
    #[cfg(feature = "dev-identity-fallback")]
    dev_fallback: bool,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn RecordStore>, config: &MessagingConfig) -> Self {
        let resolver = Self::with_strategies(
            store,
            default_exact_strategies(),
            default_recipient_strategies(config),
            default_admin_strategies(config),
        );
        #[cfg(feature = "dev-identity-fallback")]
        let resolver = Self {
            dev_fallback: config.dev_identity_fallback,
            ..resolver
        };
        resolver
    }

    pub fn with_strategies(
        store: Arc<dyn RecordStore>,
        exact_strategies: Vec<Box<dyn ProfileStrategy>>,
        recipient_strategies: Vec<Box<dyn ProfileStrategy>>,
        admin_strategies: Vec<Box<dyn AdminStrategy>>,
    ) -> Self {
        Self {
            store,
            exact_strategies,
            recipient_strategies,
            admin_strategies,
            #[cfg(feature = "dev-identity-fallback")]
            dev_fallback: false,
        }
    }

    /// Finds the recipient profile, walking the full fallback chain.
    #[tracing::instrument(name = "rota_messaging.identity.resolve_recipient", skip(self))]
    pub async fn resolve_recipient(&self, id: &str) -> MessagingResult<Profile> {
        require_non_blank("recipient_id", id)?;
        match self.run_chain(&self.recipient_strategies, id).await {
            Err(MessagingError::NotFound { kind, id: missing }) => {
                #[cfg(feature = "dev-identity-fallback")]
                if self.dev_fallback {
                    if let Some(profile) = self.dev_fallback_profile().await {
                        tracing::warn!(
                            requested = %missing,
                            substituted = %profile.id,
                            "recipient not found; using development identity fallback"
                        );
                        return Ok(profile);
                    }
                }
                Err(MessagingError::NotFound { kind, id: missing })
            }
            other => other,
        }
    }

    /// Resolves without fuzzy matching: keyed, equality, then privileged.
    #[tracing::instrument(name = "rota_messaging.identity.resolve_exact", skip(self))]
    pub async fn resolve_exact(&self, id: &str) -> MessagingResult<Profile> {
        require_non_blank("profile_id", id)?;
        self.run_chain(&self.exact_strategies, id).await
    }

    /// Picks the administrator to copy on a shift-coverage request. Never fails.
    #[tracing::instrument(
        name = "rota_messaging.identity.resolve_admin",
        skip(self, communication_type),
        fields(communication_type = communication_type.as_str())
    )]
    pub async fn resolve_admin(
        &self,
        requester_id: &str,
        communication_type: CommunicationType,
        explicit_admin: Option<&str>,
    ) -> Option<Profile> {
        if communication_type != CommunicationType::ShiftCoverage {
            return None;
        }
        let lookup = AdminLookup {
            requester_id,
            explicit_admin: explicit_admin.filter(|value| !value.trim().is_empty()),
        };
        for strategy in &self.admin_strategies {
            match strategy.find(self, lookup).await {
                Ok(Some(profile)) => {
                    tracing::debug!(strategy = strategy.name(), admin_id = %profile.id, "admin resolved");
                    return Some(profile);
                }
                Ok(None) => {
                    tracing::debug!(strategy = strategy.name(), "admin strategy missed");
                }
                Err(error) => {
                    tracing::debug!(strategy = strategy.name(), %error, "admin strategy failed");
                }
            }
        }
        tracing::debug!("no administrator resolved");
        None
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<Profile>> {
        let rows = self
            .store
            .query_profiles(ProfileQuery {
                email_eq: Some(email.trim().to_string()),
                limit: Some(1),
                ..ProfileQuery::default()
            })
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn run_chain(
        &self,
        strategies: &[Box<dyn ProfileStrategy>],
        id: &str,
    ) -> MessagingResult<Profile> {
        let mut last_error: Option<StoreError> = None;
        for strategy in strategies {
            match strategy.find(self.store.as_ref(), id).await {
                Ok(Some(profile)) => {
                    tracing::debug!(strategy = strategy.name(), profile_id = %profile.id, "profile resolved");
                    return Ok(profile);
                }
                Ok(None) => {
                    tracing::debug!(strategy = strategy.name(), "profile strategy missed");
                }
                Err(error) => {
                    tracing::debug!(strategy = strategy.name(), %error, "profile strategy failed");
                    last_error = Some(error);
                }
            }
        }
        match last_error {
            Some(error) => Err(MessagingError::TransientStore(error)),
            None => Err(MessagingError::not_found("profile", id.trim())),
        }
    }

    #[cfg(feature = "dev-identity-fallback")]
    async fn dev_fallback_profile(&self) -> Option<Profile> {
        self.store
            .query_profiles(ProfileQuery {
                limit: Some(1),
                ..ProfileQuery::default()
            })
            .await
            .ok()
            .and_then(|rows| rows.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        AdminLookup, AdminStrategy, AssignedAdmin, IdentityResolver, ProfileStrategy, RecentScan,
        SuffixMatch,
    };
    use crate::config::MessagingConfig;
    use crate::MessagingError;
    use rota_store::{
        AdminAssignment, CommunicationType, InMemoryRecordStore, Profile, ProfileRole,
        RecordStore, StoreOperation,
    };
    use rota_types::new_record_id;
    use std::sync::Arc;

    fn resolver(store: &Arc<InMemoryRecordStore>) -> IdentityResolver {
        let store: Arc<dyn RecordStore> = store.clone();
        IdentityResolver::new(store, &MessagingConfig::default())
    }

    async fn seed(store: &InMemoryRecordStore, id: &str, email: &str, role: ProfileRole) -> Profile {
        let profile = Profile::new(id, id.to_uppercase(), email, role);
        store.put_profile(profile.clone()).await.expect("seed profile");
        profile
    }

    #[tokio::test]
    async fn blank_recipient_issues_no_queries() {
        let store = Arc::new(InMemoryRecordStore::new());
        let error = resolver(&store)
            .resolve_recipient("   ")
            .await
            .expect_err("blank id");
        assert!(matches!(
            error,
            MessagingError::Validation {
                field: "recipient_id",
                ..
            }
        ));
        assert_eq!(store.total_operations(), 0);
    }

    #[tokio::test]
    async fn repeated_resolution_is_stable() {
        let store = Arc::new(InMemoryRecordStore::new());
        seed(&store, "emp-bailey", "bailey@rota.local", ProfileRole::Employee).await;
        let resolver = resolver(&store);

        let first = resolver.resolve_recipient("emp-bailey").await.expect("first");
        let second = resolver.resolve_recipient("emp-bailey").await.expect("second");
        assert_eq!(first, second);
        assert_eq!(store.operation_count(StoreOperation::GetProfile), 2);
        assert_eq!(store.operation_count(StoreOperation::QueryProfiles), 0);
    }

    #[tokio::test]
    async fn falls_through_to_case_insensitive_equality() {
        let store = Arc::new(InMemoryRecordStore::new());
        seed(&store, "emp-bailey", "bailey@rota.local", ProfileRole::Employee).await;
        let found = resolver(&store)
            .resolve_recipient(" EMP-Bailey ")
            .await
            .expect("resolved");
        assert_eq!(found.id, "emp-bailey");
    }

    #[tokio::test]
    async fn privileged_path_finds_restricted_profiles() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mut hidden = Profile::new("emp-hidden", "Hidden", "hidden@rota.local", ProfileRole::Hr);
        hidden.restricted = true;
        store.put_profile(hidden).await.expect("seed");
        let found = resolver(&store)
            .resolve_exact("emp-hidden")
            .await
            .expect("resolved");
        assert_eq!(found.id, "emp-hidden");
        assert_eq!(store.operation_count(StoreOperation::GetProfilePrivileged), 1);
    }

    #[tokio::test]
    async fn suffix_match_recovers_truncated_ids() {
        let store = Arc::new(InMemoryRecordStore::new());
        let id = new_record_id();
        seed(&store, &id, "casey@rota.local", ProfileRole::Employee).await;
        let truncated = &id[6..];

        let found = SuffixMatch
            .find(store.as_ref(), truncated)
            .await
            .expect("query")
            .expect("match");
        assert_eq!(found.id, id);
        assert!(SuffixMatch
            .find(store.as_ref(), "abc")
            .await
            .expect("short fragment")
            .is_none());
        assert_eq!(store.operation_count(StoreOperation::QueryProfiles), 1);
    }

    #[tokio::test]
    async fn recent_scan_prefers_exact_then_partial_matches() {
        let store = Arc::new(InMemoryRecordStore::new());
        seed(&store, "emp-dana-2", "dana2@rota.local", ProfileRole::Employee).await;
        seed(&store, "emp-dana", "dana@rota.local", ProfileRole::Employee).await;
        let scan = RecentScan { limit: 50 };

        let exact = scan
            .find(store.as_ref(), "EMP-DANA")
            .await
            .expect("query")
            .expect("exact");
        assert_eq!(exact.id, "emp-dana");

        let partial = scan
            .find(store.as_ref(), "DANA-2")
            .await
            .expect("query")
            .expect("partial");
        assert_eq!(partial.id, "emp-dana-2");
    }

    #[tokio::test]
    async fn exhausted_chain_reports_not_found_or_transient() {
        let store = Arc::new(InMemoryRecordStore::new());
        let resolver = resolver(&store);
        assert!(matches!(
            resolver.resolve_recipient("emp-nobody").await,
            Err(MessagingError::NotFound { kind: "profile", .. })
        ));

        store.fail_next(StoreOperation::GetProfile, 1);
        assert!(matches!(
            resolver.resolve_recipient("emp-nobody").await,
            Err(MessagingError::TransientStore(_))
        ));
    }

    #[tokio::test]
    async fn store_failure_in_one_strategy_does_not_stop_the_chain() {
        let store = Arc::new(InMemoryRecordStore::new());
        seed(&store, "emp-erin", "erin@rota.local", ProfileRole::Employee).await;
        store.fail_next(StoreOperation::GetProfile, 1);
        let found = resolver(&store)
            .resolve_recipient("emp-erin")
            .await
            .expect("equality query still resolves");
        assert_eq!(found.id, "emp-erin");
    }

    #[tokio::test]
    async fn admin_resolution_only_for_shift_coverage() {
        let store = Arc::new(InMemoryRecordStore::new());
        seed(&store, "admin-1", "scheduling-admin@rota.local", ProfileRole::Admin).await;
        let resolver = resolver(&store);
        store.reset_operation_counts();

        assert!(resolver
            .resolve_admin("emp-a", CommunicationType::General, None)
            .await
            .is_none());
        assert_eq!(store.total_operations(), 0);

        let admin = resolver
            .resolve_admin("emp-a", CommunicationType::ShiftCoverage, None)
            .await
            .expect("named fallback admin");
        assert_eq!(admin.id, "admin-1");
    }

    #[tokio::test]
    async fn explicit_admin_wins_over_fallbacks() {
        let store = Arc::new(InMemoryRecordStore::new());
        seed(&store, "admin-1", "scheduling-admin@rota.local", ProfileRole::Admin).await;
        let explicit_id = new_record_id();
        seed(&store, &explicit_id, "lead@rota.local", ProfileRole::Admin).await;
        seed(&store, "admin-by-mail", "night-lead@rota.local", ProfileRole::Admin).await;
        let resolver = resolver(&store);

        let by_id = resolver
            .resolve_admin("emp-a", CommunicationType::ShiftCoverage, Some(&explicit_id))
            .await
            .expect("explicit id");
        assert_eq!(by_id.id, explicit_id);

        let by_email = resolver
            .resolve_admin(
                "emp-a",
                CommunicationType::ShiftCoverage,
                Some("NIGHT-LEAD@rota.local"),
            )
            .await
            .expect("explicit email");
        assert_eq!(by_email.id, "admin-by-mail");
    }

    #[tokio::test]
    async fn assigned_admin_is_last_resort_and_failures_are_misses() {
        let store = Arc::new(InMemoryRecordStore::new());
        seed(&store, "admin-7", "admin7@rota.local", ProfileRole::Admin).await;
        store
            .put_admin_assignment(AdminAssignment {
                employee_id: "emp-a".to_string(),
                admin_id: "admin-7".to_string(),
            })
            .await
            .expect("assignment");
        let resolver = resolver(&store);

        let admin = resolver
            .resolve_admin("emp-a", CommunicationType::ShiftCoverage, None)
            .await
            .expect("assigned admin");
        assert_eq!(admin.id, "admin-7");

        store.fail_next(StoreOperation::GetAdminAssignment, 1);
        let missed = AssignedAdmin
            .find(
                &resolver,
                AdminLookup {
                    requester_id: "emp-a",
                    explicit_admin: None,
                },
            )
            .await;
        assert!(missed.is_err());
        store.fail_next(StoreOperation::GetAdminAssignment, 1);
        assert!(resolver
            .resolve_admin("emp-a", CommunicationType::ShiftCoverage, None)
            .await
            .is_none());
    }

    #[cfg(feature = "dev-identity-fallback")]
    #[tokio::test]
    async fn dev_fallback_needs_the_config_flag() {
        let store = Arc::new(InMemoryRecordStore::new());
        seed(&store, "emp-a", "a@rota.local", ProfileRole::Employee).await;

        assert!(matches!(
            resolver(&store).resolve_recipient("ghost-123456").await,
            Err(MessagingError::NotFound { .. })
        ));

        let config = MessagingConfig {
            dev_identity_fallback: true,
            ..MessagingConfig::default()
        };
        let dyn_store: Arc<dyn RecordStore> = store.clone();
        let substituted = IdentityResolver::new(dyn_store, &config)
            .resolve_recipient("ghost-123456")
            .await
            .expect("fallback profile");
        assert_eq!(substituted.id, "emp-a");
    }
}
