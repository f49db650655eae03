/*
 * Responsibility
 * - Resolve provider credentials for one request from validated claims.
 * - Fallback order is an explicit plan: embedded -> cached -> exchange -> ambient.
 * - Exchanges are single-flight per role, run on their own task, and are bounded by a timeout.
 */
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::services::auth::AuthClaims;
use crate::services::cache::CredentialCache;
use crate::services::credentials::sts::{AssumeRoleRequest, ExchangeError, RoleAssumer};
use crate::services::credentials::types::{AmbientIdentity, DerivedCredentials, ResolvedCredentials};

/// Derivation failures. `reason` strings carry provider diagnostics, never key material.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("role exchange denied for {role}")]
    ExchangeDenied { role: String, reason: String },

    #[error("role exchange unreachable for {role}")]
    ExchangeUnreachable { role: String, reason: String },

    #[error("no credential source available")]
    NoCredentialSource,

    #[error("not an IAM role identifier: {0}")]
    InvalidRoleIdentifier(String),

    #[error("credentials expired at {expires_at}")]
    Expired { expires_at: DateTime<Utc> },
}

impl CredentialError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ExchangeDenied { .. } => "CREDENTIAL_EXCHANGE_DENIED",
            Self::ExchangeUnreachable { .. } => "CREDENTIAL_EXCHANGE_UNREACHABLE",
            Self::NoCredentialSource => "NO_CREDENTIAL_SOURCE",
            Self::InvalidRoleIdentifier(_) => "INVALID_ROLE_IDENTIFIER",
            Self::Expired { .. } => "CREDENTIAL_EXPIRED",
        }
    }

    fn from_exchange(role: &str, err: ExchangeError) -> Self {
        match err {
            ExchangeError::Denied(reason) => Self::ExchangeDenied {
                role: role.to_owned(),
                reason,
            },
            ExchangeError::Unreachable(reason) => Self::ExchangeUnreachable {
                role: role.to_owned(),
                reason,
            },
        }
    }
}

/// One attempt in the derivation plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DerivationStep {
    Embedded,
    Cached(String),
    Exchange(String),
    Ambient,
}

/// `arn:<partition>:iam::<12-digit account>:role/<path/name>`
pub fn is_role_arn(value: &str) -> bool {
    let parts: Vec<&str> = value.splitn(6, ':').collect();
    let [arn, partition, service, region, account, resource] = parts.as_slice() else {
        return false;
    };

    *arn == "arn"
        && partition.starts_with("aws")
        && *service == "iam"
        && region.is_empty()
        && account.len() == 12
        && account.bytes().all(|b| b.is_ascii_digit())
        && resource
            .strip_prefix("role/")
            .is_some_and(|name| !name.is_empty())
}

/// Ordered attempts for `claims`.
///
/// The explicitly requested role (legacy header) wins over the token's role claim.
/// A live embedded bundle comes first unless its role is known and differs from
/// the requested one. Ambient is planned only when no role is in play.
pub fn derivation_plan(
    claims: &AuthClaims,
    requested_role: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Vec<DerivationStep>, CredentialError> {
    let role = requested_role
        .or(claims.role_hint())
        .map(str::trim)
        .filter(|r| !r.is_empty());

    if let Some(role) = role
        && !is_role_arn(role)
    {
        return Err(CredentialError::InvalidRoleIdentifier(role.to_owned()));
    }

    let mut plan = Vec::with_capacity(3);

    if let Some(embedded) = claims.embedded()
        && !embedded.is_expired(now)
    {
        let differs = match (role, embedded.role_arn.as_deref()) {
            (Some(requested), Some(bundled)) => requested != bundled,
            _ => false,
        };
        if !differs {
            plan.push(DerivationStep::Embedded);
        }
    }

    match role {
        Some(role) => {
            plan.push(DerivationStep::Cached(role.to_owned()));
            plan.push(DerivationStep::Exchange(role.to_owned()));
        }
        None => plan.push(DerivationStep::Ambient),
    }

    Ok(plan)
}

#[derive(Debug, Clone)]
pub struct DeriverSettings {
    /// Fixed tag sent as the exchange's source identity and session name prefix.
    pub audit_identity: String,
    pub assume_duration: Duration,
    pub exchange_timeout: Duration,
    /// Cache entries expire this long before the credentials do.
    pub cache_margin: Duration,
}

impl Default for DeriverSettings {
    fn default() -> Self {
        Self {
            audit_identity: "catalog-gateway".to_owned(),
            assume_duration: Duration::from_secs(3600),
            exchange_timeout: Duration::from_secs(5),
            cache_margin: Duration::from_secs(300),
        }
    }
}

type InflightTable = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Credential resolution shared by all requests.
///
/// The cache and the per-role lock table are the only shared mutable state.
pub struct CredentialDeriver {
    assumer: Option<Arc<dyn RoleAssumer>>,
    ambient: Option<AmbientIdentity>,
    cache: Arc<dyn CredentialCache>,
    inflight: InflightTable,
    sequence: Arc<AtomicU64>,
    settings: DeriverSettings,
}

impl CredentialDeriver {
    pub fn new(cache: Arc<dyn CredentialCache>, settings: DeriverSettings) -> Self {
        Self {
            assumer: None,
            ambient: None,
            cache,
            inflight: Mutex::new(HashMap::new()),
            sequence: Arc::new(AtomicU64::new(0)),
            settings,
        }
    }

    /// Enables role exchange. The assumer's ambient identity becomes the fallback
    /// unless one was set explicitly.
    #[must_use]
    pub fn with_assumer(mut self, assumer: Arc<dyn RoleAssumer>) -> Self {
        if self.ambient.is_none() {
            self.ambient = assumer.ambient_identity();
        }
        self.assumer = Some(assumer);
        self
    }

    #[must_use]
    pub fn with_ambient(mut self, ambient: Option<AmbientIdentity>) -> Self {
        self.ambient = ambient;
        self
    }

    pub fn exchange_enabled(&self) -> bool {
        self.assumer.is_some()
    }

    pub fn ambient_identity(&self) -> Option<&AmbientIdentity> {
        self.ambient.as_ref()
    }

    pub fn cache_backend(&self) -> &'static str {
        self.cache.backend_name()
    }

    pub async fn derive(
        &self,
        claims: &AuthClaims,
        requested_role: Option<&str>,
    ) -> Result<ResolvedCredentials, CredentialError> {
        let now = Utc::now();
        let plan = derivation_plan(claims, requested_role, now)?;

        for step in plan {
            match step {
                DerivationStep::Embedded => {
                    if let Some(embedded) = claims.embedded() {
                        tracing::debug!(
                            identity = %claims.identity(),
                            "using embedded credentials"
                        );
                        let creds = DerivedCredentials::from_embedded(embedded, claims.identity());
                        return Ok(ResolvedCredentials::Derived(Arc::new(creds)));
                    }
                }
                DerivationStep::Cached(role) => {
                    if let Some(creds) = self.lookup(&role, now).await {
                        tracing::debug!(
                            identity = %claims.identity(),
                            role = %role,
                            "credential cache hit"
                        );
                        return Ok(ResolvedCredentials::Derived(creds));
                    }
                }
                DerivationStep::Exchange(role) => {
                    let creds = self.exchange(&role).await.inspect_err(|err| {
                        tracing::warn!(
                            identity = %claims.identity(),
                            role = %role,
                            code = err.code(),
                            error = %err,
                            "role exchange failed"
                        );
                    })?;
                    return Ok(ResolvedCredentials::Derived(creds));
                }
                DerivationStep::Ambient => {
                    let Some(ambient) = self.ambient.clone() else {
                        return Err(CredentialError::NoCredentialSource);
                    };
                    tracing::warn!(
                        identity = %claims.identity(),
                        ambient = %ambient.label(),
                        "no embedded credentials or role; falling back to ambient identity"
                    );
                    return Ok(ResolvedCredentials::Ambient(ambient));
                }
            }
        }

        Err(CredentialError::NoCredentialSource)
    }

    /// Roles with a live cache entry.
    pub async fn cached_roles(&self) -> Vec<String> {
        self.cache
            .live_keys(Utc::now())
            .await
            .unwrap_or_else(|err| {
                tracing::warn!(error = %err, "credential cache listing failed");
                Vec::new()
            })
    }

    /// Drops expired cache entries and idle role locks; returns how many cache
    /// entries were removed.
    pub async fn purge_expired(&self) -> usize {
        self.prune_role_locks();
        self.cache
            .purge_expired(Utc::now())
            .await
            .unwrap_or_else(|err| {
                tracing::warn!(error = %err, "credential cache purge failed");
                0
            })
    }

    async fn lookup(&self, role: &str, now: DateTime<Utc>) -> Option<Arc<DerivedCredentials>> {
        lookup(self.cache.as_ref(), role, now).await
    }

    fn role_lock(&self, role: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut table = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        table.entry(role.to_owned()).or_default().clone()
    }

    /// Forgets `role`'s lock once nobody holds or awaits it.
    fn release_role_lock(&self, role: &str) {
        let mut table = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        if table.get(role).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            table.remove(role);
        }
    }

    /// Sweeps locks left behind by exchanges that outlived their caller.
    fn prune_role_locks(&self) {
        let mut table = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        table.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    #[cfg(test)]
    fn tracked_roles(&self) -> usize {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn session_name(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        session_name(&self.settings.audit_identity, Utc::now().timestamp_millis(), seq)
    }

    async fn exchange(&self, role: &str) -> Result<Arc<DerivedCredentials>, CredentialError> {
        let Some(assumer) = self.assumer.clone() else {
            return Err(CredentialError::NoCredentialSource);
        };

        let job = ExchangeJob {
            assumer,
            cache: self.cache.clone(),
            request: AssumeRoleRequest {
                role_arn: role.to_owned(),
                session_name: self.session_name(),
                source_identity: sanitize(&self.settings.audit_identity, 64),
                duration: self.settings.assume_duration,
            },
            cache_margin: self.settings.cache_margin,
        };

        // The task owns the per-role lock, so a caller that gives up does not
        // abandon the exchange; its result still lands in the cache.
        let lock = self.role_lock(role);
        let handle = tokio::spawn(async move {
            let _guard = lock.lock_owned().await;
            job.run().await
        });

        let outcome = tokio::time::timeout(self.settings.exchange_timeout, handle).await;
        if outcome.is_ok() {
            self.release_role_lock(role);
        }

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(CredentialError::ExchangeUnreachable {
                role: role.to_owned(),
                reason: format!("exchange task failed: {join_err}"),
            }),
            Err(_) => Err(CredentialError::ExchangeUnreachable {
                role: role.to_owned(),
                reason: format!(
                    "timed out after {} ms",
                    self.settings.exchange_timeout.as_millis()
                ),
            }),
        }
    }
}

async fn lookup(
    cache: &dyn CredentialCache,
    role: &str,
    now: DateTime<Utc>,
) -> Option<Arc<DerivedCredentials>> {
    match cache.get(role, now).await {
        Ok(hit) => hit,
        Err(err) => {
            tracing::warn!(
                role = %role,
                error = %err,
                "credential cache read failed; treating as miss"
            );
            None
        }
    }
}

struct ExchangeJob {
    assumer: Arc<dyn RoleAssumer>,
    cache: Arc<dyn CredentialCache>,
    request: AssumeRoleRequest,
    cache_margin: Duration,
}

impl ExchangeJob {
    async fn run(self) -> Result<Arc<DerivedCredentials>, CredentialError> {
        let role = self.request.role_arn.as_str();

        // A concurrent exchange for this role may have finished while we waited on the lock.
        if let Some(creds) = lookup(self.cache.as_ref(), role, Utc::now()).await {
            return Ok(creds);
        }

        let assumed = self
            .assumer
            .assume_role(&self.request)
            .await
            .map_err(|err| CredentialError::from_exchange(role, err))?;

        let identity = assumed
            .assumed_role_arn
            .clone()
            .unwrap_or_else(|| role.to_owned());
        let creds = DerivedCredentials::assumed(
            role,
            assumed.access_key_id,
            assumed.secret_access_key,
            assumed.session_token,
            assumed.expires_at,
            identity,
        );

        let caller = self
            .assumer
            .caller_identity(&creds)
            .await
            .map_err(|err| CredentialError::from_exchange(role, err))?;
        let creds = Arc::new(creds.with_identity(caller));

        let now = Utc::now();
        if creds.is_expired(now) {
            tracing::warn!(
                role = %role,
                expires_at = %creds.expires_at(),
                "role exchange returned credentials that are already expired"
            );
            return Err(CredentialError::Expired {
                expires_at: creds.expires_at(),
            });
        }

        tracing::info!(
            role = %role,
            audit_identity = %creds.identity(),
            session = %self.request.session_name,
            expires_at = %creds.expires_at(),
            "role exchange succeeded"
        );

        let margin =
            chrono::Duration::from_std(self.cache_margin).unwrap_or(chrono::Duration::zero());
        let valid_until = creds.expires_at() - margin;
        if valid_until > now {
            if let Err(err) = self.cache.insert(role, creds.clone(), valid_until).await {
                tracing::warn!(role = %role, error = %err, "credential cache write failed");
            }
        } else {
            tracing::debug!(role = %role, "credentials too short-lived to cache");
        }

        Ok(creds)
    }
}

/// Keeps characters allowed in session names and source identities (`[\w+=,.@-]`).
fn sanitize(value: &str, max_len: usize) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || "_+=,.@-".contains(c) {
                c
            } else {
                '-'
            }
        })
        .take(max_len)
        .collect();

    if cleaned.len() < 2 {
        "catalog-gateway".to_owned()
    } else {
        cleaned
    }
}

fn session_name(audit_identity: &str, millis: i64, seq: u64) -> String {
    let suffix = format!("-{millis}-{seq}");
    let prefix = sanitize(audit_identity, 64 - suffix.len());
    format!("{prefix}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use secrecy::SecretString;

    use crate::services::auth::EmbeddedCredentials;
    use crate::services::cache::MemoryCredentialCache;
    use crate::services::cache::client::{CacheError, CacheResult};
    use crate::services::credentials::sts::AssumedRole;
    use crate::services::credentials::types::CredentialSource;

    const ROLE_X: &str = "arn:aws:iam::123456789012:role/roleX";
    const ROLE_Y: &str = "arn:aws:iam::123456789012:role/roleY";

    struct FakeAssumer {
        calls: AtomicUsize,
        delay: Duration,
        lifetime: chrono::Duration,
        deny: bool,
        sessions: Mutex<Vec<String>>,
    }

    impl FakeAssumer {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
                lifetime: chrono::Duration::hours(1),
                deny: false,
                sessions: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RoleAssumer for FakeAssumer {
        fn ambient_identity(&self) -> Option<AmbientIdentity> {
            Some(AmbientIdentity::new("instance-profile"))
        }

        async fn assume_role(
            &self,
            request: &AssumeRoleRequest,
        ) -> Result<AssumedRole, ExchangeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.sessions
                .lock()
                .unwrap()
                .push(request.session_name.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.deny {
                return Err(ExchangeError::Denied("AccessDenied".into()));
            }
            Ok(AssumedRole {
                access_key_id: "ASIAFAKE".into(),
                secret_access_key: SecretString::from("fake-secret"),
                session_token: SecretString::from("fake-token"),
                expires_at: Utc::now() + self.lifetime,
                assumed_role_arn: Some(format!("{}/{}", request.role_arn, request.session_name)),
            })
        }

        async fn caller_identity(
            &self,
            credentials: &DerivedCredentials,
        ) -> Result<String, ExchangeError> {
            Ok(format!("caller:{}", credentials.identity()))
        }
    }

    fn deriver(assumer: Arc<FakeAssumer>) -> CredentialDeriver {
        CredentialDeriver::new(Arc::new(MemoryCredentialCache::new()), DeriverSettings::default())
            .with_assumer(assumer)
    }

    fn embedded(role_arn: Option<&str>, expires_in: chrono::Duration) -> EmbeddedCredentials {
        EmbeddedCredentials {
            access_key_id: "AKIAALICE".into(),
            secret_access_key: SecretString::from("alice-secret"),
            session_token: None,
            expires_at: Utc::now() + expires_in,
            role_arn: role_arn.map(str::to_owned),
        }
    }

    #[test]
    fn role_arn_shapes() {
        assert!(is_role_arn(ROLE_X));
        assert!(is_role_arn("arn:aws-us-gov:iam::123456789012:role/path/to/role"));
        assert!(!is_role_arn("roleX"));
        assert!(!is_role_arn("arn:aws:iam::12345:role/x"));
        assert!(!is_role_arn("arn:aws:iam::123456789012:user/x"));
        assert!(!is_role_arn("arn:aws:s3:::bucket"));
    }

    #[test]
    fn plan_orders_attempts() {
        let now = Utc::now();
        let bare = AuthClaims::new("bob");
        assert_eq!(
            derivation_plan(&bare, None, now).unwrap(),
            vec![DerivationStep::Ambient]
        );
        assert_eq!(
            derivation_plan(&bare, Some(ROLE_X), now).unwrap(),
            vec![
                DerivationStep::Cached(ROLE_X.into()),
                DerivationStep::Exchange(ROLE_X.into())
            ]
        );

        let with_bundle = AuthClaims::new("alice")
            .with_embedded(embedded(Some(ROLE_X), chrono::Duration::hours(1)));
        assert_eq!(
            derivation_plan(&with_bundle, Some(ROLE_X), now).unwrap()[0],
            DerivationStep::Embedded
        );
        // A different requested role skips the bundle.
        assert_eq!(
            derivation_plan(&with_bundle, Some(ROLE_Y), now).unwrap()[0],
            DerivationStep::Cached(ROLE_Y.into())
        );

        // A bundle that names no role is still tried first.
        let unnamed = AuthClaims::new("alice")
            .with_embedded(embedded(None, chrono::Duration::hours(1)));
        assert_eq!(
            derivation_plan(&unnamed, Some(ROLE_Y), now).unwrap(),
            vec![
                DerivationStep::Embedded,
                DerivationStep::Cached(ROLE_Y.into()),
                DerivationStep::Exchange(ROLE_Y.into())
            ]
        );
    }

    #[test]
    fn header_role_wins_over_claim() {
        let claims = AuthClaims::new("bob").with_role_hint(ROLE_X);
        let plan = derivation_plan(&claims, Some(ROLE_Y), Utc::now()).unwrap();
        assert_eq!(plan[0], DerivationStep::Cached(ROLE_Y.into()));
    }

    #[test]
    fn expired_bundle_is_skipped() {
        let claims =
            AuthClaims::new("alice").with_embedded(embedded(None, chrono::Duration::seconds(-5)));
        assert_eq!(
            derivation_plan(&claims, None, Utc::now()).unwrap(),
            vec![DerivationStep::Ambient]
        );
    }

    #[tokio::test]
    async fn embedded_credentials_need_no_exchange() {
        let assumer = Arc::new(FakeAssumer::new());
        let deriver = deriver(assumer.clone());
        let claims = AuthClaims::new("alice-sub")
            .with_name("alice")
            .with_embedded(embedded(None, chrono::Duration::hours(1)));

        let resolved = deriver.derive(&claims, None).await.unwrap();
        let creds = resolved.derived().unwrap();

        assert_eq!(creds.access_key_id(), "AKIAALICE");
        assert_eq!(creds.source(), CredentialSource::Embedded);
        assert_eq!(resolved.audit_identity(), "alice");
        assert_eq!(assumer.calls(), 0);
    }

    #[tokio::test]
    async fn exchange_once_then_cache() {
        let assumer = Arc::new(FakeAssumer::new());
        let deriver = deriver(assumer.clone());
        let claims = AuthClaims::new("bob").with_role_hint(ROLE_X);

        let first = deriver.derive(&claims, None).await.unwrap();
        let creds = first.derived().unwrap();
        assert!(creds.expires_at() > Utc::now());
        assert_eq!(creds.source(), CredentialSource::AssumedRole);
        assert!(creds.identity().starts_with("caller:"));
        assert_eq!(deriver.cached_roles().await, vec![ROLE_X.to_owned()]);

        let second = deriver.derive(&claims, None).await.unwrap();
        assert!(Arc::ptr_eq(creds, second.derived().unwrap()));
        assert_eq!(assumer.calls(), 1);

        deriver.derive(&claims, Some(ROLE_Y)).await.unwrap();
        assert_eq!(assumer.calls(), 2);
    }

    #[tokio::test]
    async fn session_names_are_unique_and_tagged() {
        let assumer = Arc::new(FakeAssumer::new());
        let deriver = deriver(assumer.clone());
        let claims = AuthClaims::new("bob");

        deriver.derive(&claims, Some(ROLE_X)).await.unwrap();
        deriver.derive(&claims, Some(ROLE_Y)).await.unwrap();

        let sessions = assumer.sessions.lock().unwrap().clone();
        assert_eq!(sessions.len(), 2);
        assert_ne!(sessions[0], sessions[1]);
        assert!(sessions.iter().all(|s| s.starts_with("catalog-gateway-")));
        assert!(sessions.iter().all(|s| s.len() <= 64));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_same_role_exchanges_once() {
        let assumer = Arc::new(FakeAssumer {
            delay: Duration::from_millis(50),
            ..FakeAssumer::new()
        });
        let deriver = Arc::new(deriver(assumer.clone()));

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let deriver = deriver.clone();
                tokio::spawn(async move {
                    let claims = AuthClaims::new(format!("user-{i}"));
                    deriver.derive(&claims, Some(ROLE_X)).await
                })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }
        assert_eq!(assumer.calls(), 1);
    }

    #[tokio::test]
    async fn timeout_is_unreachable_and_cache_still_fills() {
        let assumer = Arc::new(FakeAssumer {
            delay: Duration::from_millis(200),
            ..FakeAssumer::new()
        });
        let settings = DeriverSettings {
            exchange_timeout: Duration::from_millis(20),
            ..DeriverSettings::default()
        };
        let deriver = CredentialDeriver::new(Arc::new(MemoryCredentialCache::new()), settings)
            .with_assumer(assumer.clone());

        let err = deriver
            .derive(&AuthClaims::new("bob"), Some(ROLE_X))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CredentialError::ExchangeUnreachable { ref role, .. } if role == ROLE_X
        ));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(deriver.cached_roles().await, vec![ROLE_X.to_owned()]);

        // The abandoned exchange's lock is swept with the cache.
        assert_eq!(deriver.tracked_roles(), 1);
        deriver.purge_expired().await;
        assert_eq!(deriver.tracked_roles(), 0);
    }

    #[tokio::test]
    async fn role_locks_do_not_accumulate() {
        let assumer = Arc::new(FakeAssumer::new());
        let deriver = deriver(assumer.clone());
        let claims = AuthClaims::new("bob");

        for i in 0..200 {
            let role = format!("arn:aws:iam::123456789012:role/generated-{i}");
            deriver.derive(&claims, Some(&role)).await.unwrap();
        }

        assert_eq!(assumer.calls(), 200);
        assert_eq!(deriver.tracked_roles(), 0);
    }

    #[tokio::test]
    async fn already_expired_exchange_result_is_rejected() {
        let assumer = Arc::new(FakeAssumer {
            lifetime: chrono::Duration::seconds(-5),
            ..FakeAssumer::new()
        });
        let deriver = deriver(assumer.clone());

        let err = deriver
            .derive(&AuthClaims::new("bob"), Some(ROLE_X))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CREDENTIAL_EXPIRED");
        assert!(deriver.cached_roles().await.is_empty());
    }

    struct BrokenCache;

    #[async_trait]
    impl CredentialCache for BrokenCache {
        fn backend_name(&self) -> &'static str {
            "broken"
        }

        async fn get(
            &self,
            _key: &str,
            _now: DateTime<Utc>,
        ) -> CacheResult<Option<Arc<DerivedCredentials>>> {
            Err(CacheError::Backend("connection refused".into()))
        }

        async fn insert(
            &self,
            _key: &str,
            _value: Arc<DerivedCredentials>,
            _valid_until: DateTime<Utc>,
        ) -> CacheResult<()> {
            Err(CacheError::Backend("connection refused".into()))
        }

        async fn purge_expired(&self, _now: DateTime<Utc>) -> CacheResult<usize> {
            Err(CacheError::Backend("connection refused".into()))
        }

        async fn live_keys(&self, _now: DateTime<Utc>) -> CacheResult<Vec<String>> {
            Err(CacheError::Backend("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn broken_cache_degrades_to_exchange() {
        let assumer = Arc::new(FakeAssumer::new());
        let deriver = CredentialDeriver::new(Arc::new(BrokenCache), DeriverSettings::default())
            .with_assumer(assumer.clone());
        let claims = AuthClaims::new("bob");

        deriver.derive(&claims, Some(ROLE_X)).await.unwrap();
        deriver.derive(&claims, Some(ROLE_X)).await.unwrap();

        assert_eq!(assumer.calls(), 2);
        assert!(deriver.cached_roles().await.is_empty());
        assert_eq!(deriver.purge_expired().await, 0);
    }

    #[tokio::test]
    async fn denied_exchange_is_reported() {
        let assumer = Arc::new(FakeAssumer {
            deny: true,
            ..FakeAssumer::new()
        });
        let deriver = deriver(assumer);

        let err = deriver
            .derive(&AuthClaims::new("bob"), Some(ROLE_X))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CREDENTIAL_EXCHANGE_DENIED");
        assert!(deriver.cached_roles().await.is_empty());
    }

    #[tokio::test]
    async fn invalid_role_is_rejected_before_exchange() {
        let assumer = Arc::new(FakeAssumer::new());
        let deriver = deriver(assumer.clone());

        let err = deriver
            .derive(&AuthClaims::new("bob"), Some("roleX"))
            .await
            .unwrap_err();
        assert_eq!(err, CredentialError::InvalidRoleIdentifier("roleX".into()));
        assert_eq!(assumer.calls(), 0);
    }

    #[tokio::test]
    async fn ambient_fallback_and_no_source() {
        let with_ambient = deriver(Arc::new(FakeAssumer::new()));
        let resolved = with_ambient.derive(&AuthClaims::new("bob"), None).await.unwrap();
        assert_eq!(resolved.source_label(), "ambient");
        assert_eq!(resolved.audit_identity(), "instance-profile");

        let bare = CredentialDeriver::new(
            Arc::new(MemoryCredentialCache::new()),
            DeriverSettings::default(),
        );
        assert_eq!(
            bare.derive(&AuthClaims::new("bob"), None).await.unwrap_err(),
            CredentialError::NoCredentialSource
        );
        assert_eq!(
            bare.derive(&AuthClaims::new("bob"), Some(ROLE_X))
                .await
                .unwrap_err(),
            CredentialError::NoCredentialSource
        );
    }

    #[tokio::test]
    async fn short_lived_credentials_are_not_cached() {
        let assumer = Arc::new(FakeAssumer {
            lifetime: chrono::Duration::minutes(2),
            ..FakeAssumer::new()
        });
        let deriver = deriver(assumer.clone());
        let claims = AuthClaims::new("bob");

        deriver.derive(&claims, Some(ROLE_X)).await.unwrap();
        deriver.derive(&claims, Some(ROLE_X)).await.unwrap();

        assert!(deriver.cached_roles().await.is_empty());
        assert_eq!(assumer.calls(), 2);
    }

    #[test]
    fn session_name_is_bounded() {
        let name = session_name(&"x".repeat(100), 1_700_000_000_000, 42);
        assert_eq!(name.len(), 64);
        assert!(name.ends_with("-1700000000000-42"));

        assert_eq!(sanitize("catalog gateway/prod", 64), "catalog-gateway-prod");
    }
}
