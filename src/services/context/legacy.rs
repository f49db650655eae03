/*
 * Responsibility
 * - Legacy compatibility bridge: exposes the current request's token / role / user id
 *   as process-wide state for consumers not yet reading the request context
 *
 * Notes
 * - Entries live in a stack-ordered registry. Each `publish` returns a guard that removes
 *   its own entry on drop, wherever it sits in the stack.
 * - The visible value is the newest live entry. Once a request's guard drops, its identity
 *   is gone even if other requests are still running.
 * - The process environment itself is never written.
 */
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use secrecy::{ExposeSecret, SecretString};

/// Names legacy consumers historically read these values from.
pub const ACCESS_TOKEN_VAR: &str = "CATALOG_ACCESS_TOKEN";
pub const ROLE_ARN_VAR: &str = "CATALOG_ROLE_ARN";
pub const USER_ID_VAR: &str = "CATALOG_USER_ID";

#[derive(Clone, Default)]
pub struct LegacyIdentity {
    pub access_token: Option<SecretString>,
    pub role_arn: Option<String>,
    pub user_id: Option<String>,
}

impl LegacyIdentity {
    /// `(variable name, value)` pairs as legacy consumers read them.
    ///
    /// This exposes the raw token; callers must not log the result.
    pub fn vars(&self) -> [(&'static str, Option<&str>); 3] {
        [
            (
                ACCESS_TOKEN_VAR,
                self.access_token.as_ref().map(|t| t.expose_secret()),
            ),
            (ROLE_ARN_VAR, self.role_arn.as_deref()),
            (USER_ID_VAR, self.user_id.as_deref()),
        ]
    }
}

impl fmt::Debug for LegacyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LegacyIdentity")
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("role_arn", &self.role_arn)
            .field("user_id", &self.user_id)
            .finish()
    }
}

struct Registry {
    next_id: u64,
    entries: Vec<(u64, LegacyIdentity)>,
}

static REGISTRY: Mutex<Registry> = Mutex::new(Registry {
    next_id: 0,
    entries: Vec::new(),
});

fn registry() -> MutexGuard<'static, Registry> {
    REGISTRY.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
        tracing::warn!("legacy bridge lock was poisoned; recovering");
        REGISTRY.clear_poison();
        poisoned.into_inner()
    })
}

/// Removes its registry entry on drop.
#[must_use = "the bridge entry is removed as soon as the guard is dropped"]
#[derive(Debug)]
pub struct BridgeGuard {
    id: u64,
}

impl Drop for BridgeGuard {
    fn drop(&mut self) {
        let mut registry = registry();
        if let Some(pos) = registry.entries.iter().position(|(id, _)| *id == self.id) {
            registry.entries.remove(pos);
        }
    }
}

/// Makes `identity` the visible legacy identity until the guard drops.
pub fn publish(identity: LegacyIdentity) -> BridgeGuard {
    let mut registry = registry();
    let id = registry.next_id;
    registry.next_id = registry.next_id.wrapping_add(1);
    tracing::trace!(bridge_entry = id, "legacy bridge published");
    registry.entries.push((id, identity));
    BridgeGuard { id }
}

/// Newest live identity, if any request is in flight.
pub fn current() -> Option<LegacyIdentity> {
    registry().entries.last().map(|(_, identity)| identity.clone())
}

/// Number of live entries.
pub fn depth() -> usize {
    registry().entries.len()
}

/// Serializes tests that assert on the process-wide registry.
#[cfg(test)]
pub(crate) static TEST_SERIAL: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(user: &str) -> LegacyIdentity {
        LegacyIdentity {
            access_token: Some(SecretString::from(format!("token-{user}"))),
            role_arn: Some(format!("arn:aws:iam::123456789012:role/{user}")),
            user_id: Some(user.to_owned()),
        }
    }

    fn visible_user() -> Option<String> {
        current().and_then(|i| i.user_id)
    }

    #[tokio::test]
    async fn nested_scopes_restore_prior_value() {
        let _serial = TEST_SERIAL.lock().await;

        let outer = publish(identity("outer"));
        assert_eq!(visible_user().as_deref(), Some("outer"));
        {
            let _inner = publish(identity("inner"));
            assert_eq!(visible_user().as_deref(), Some("inner"));
        }
        assert_eq!(visible_user().as_deref(), Some("outer"));
        drop(outer);
        assert_eq!(visible_user(), None);
    }

    #[tokio::test]
    async fn out_of_order_release_never_resurrects() {
        let _serial = TEST_SERIAL.lock().await;

        let first = publish(identity("first"));
        let second = publish(identity("second"));

        drop(first);
        assert_eq!(visible_user().as_deref(), Some("second"));
        drop(second);
        assert_eq!(visible_user(), None);
        assert_eq!(depth(), 0);
    }

    #[tokio::test]
    async fn cleared_on_panic() {
        let _serial = TEST_SERIAL.lock().await;

        let result = std::panic::catch_unwind(|| {
            let _guard = publish(identity("doomed"));
            panic!("tool blew up");
        });

        assert!(result.is_err());
        assert_eq!(visible_user(), None);
    }

    #[test]
    fn vars_and_debug() {
        let id = identity("alice");
        assert_eq!(
            id.vars(),
            [
                (ACCESS_TOKEN_VAR, Some("token-alice")),
                (ROLE_ARN_VAR, Some("arn:aws:iam::123456789012:role/alice")),
                (USER_ID_VAR, Some("alice")),
            ]
        );

        let debug = format!("{id:?}");
        assert!(!debug.contains("token-alice"));
    }
}
