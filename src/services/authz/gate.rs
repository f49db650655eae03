use std::sync::Arc;

use serde::Serialize;

use crate::services::auth::AuthClaims;
use crate::services::authz::catalog::{CatalogError, PermissionCatalog, RoleDefinition};

/// Role name reported when the admin flag grants access.
pub const ADMIN_OVERRIDE_ROLE: &str = "admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenialReason {
    ToolNotPermitted,
    ScopeNotPermitted,
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToolNotPermitted => "TOOL_NOT_PERMITTED",
            Self::ScopeNotPermitted => "SCOPE_NOT_PERMITTED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthzDecision {
    /// Carries the role that matched, for audit logging.
    Allowed { role: String },
    Denied(DenialReason),
}

impl AuthzDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Pure tool/scope decision over the permission catalog.
#[derive(Debug, Clone)]
pub struct AuthorizationGate {
    catalog: Arc<PermissionCatalog>,
}

impl AuthorizationGate {
    pub fn new(catalog: Arc<PermissionCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &PermissionCatalog {
        &self.catalog
    }

    pub fn authorize(&self, claims: &AuthClaims, tool: &str, scope: Option<&str>) -> AuthzDecision {
        if claims.is_admin() {
            return AuthzDecision::Allowed {
                role: ADMIN_OVERRIDE_ROLE.to_owned(),
            };
        }

        let matching: Vec<&RoleDefinition> = self
            .known_roles(claims)
            .filter(|role| role.tools.allows(tool))
            .collect();

        if matching.is_empty() {
            return AuthzDecision::Denied(DenialReason::ToolNotPermitted);
        }

        let chosen = match scope {
            None => matching.first(),
            Some(scope) => matching.iter().find(|role| role.scopes.allows(scope)),
        };

        match chosen {
            Some(role) => AuthzDecision::Allowed {
                role: role.name.clone(),
            },
            None => AuthzDecision::Denied(DenialReason::ScopeNotPermitted),
        }
    }

    /// Catalogued tools `claims` may invoke (ignoring scope).
    pub fn allowed_tools<'a>(&'a self, claims: &'a AuthClaims) -> impl Iterator<Item = &'a str> {
        self.catalog
            .tool_names()
            .filter(move |tool| self.authorize(claims, tool, None).is_allowed())
    }

    fn known_roles<'a>(
        &'a self,
        claims: &'a AuthClaims,
    ) -> impl Iterator<Item = &'a RoleDefinition> {
        claims
            .roles()
            .iter()
            .filter_map(|name| match self.catalog.role_definition(name) {
                Ok(role) => Some(role),
                Err(CatalogError::RoleNotFound(name)) => {
                    tracing::debug!(
                        identity = %claims.identity(),
                        role = %name,
                        "ignoring unknown role"
                    );
                    None
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::authz::catalog::{AccessLevel, Allowance};

    fn scenario_gate() -> AuthorizationGate {
        let catalog = PermissionCatalog::builder()
            .tool("browse", ["s3:ListBucket"])
            .tool("create", ["s3:PutObject"])
            .role(
                RoleDefinition::new("ReadOnly", AccessLevel::Read)
                    .with_tools(Allowance::only(["browse"]))
                    .with_scopes(Allowance::only(["bucket-a"])),
            )
            .role(
                RoleDefinition::new("Writer", AccessLevel::Write)
                    .with_tools(Allowance::only(["browse", "create"])),
            )
            .build();
        AuthorizationGate::new(Arc::new(catalog))
    }

    fn with_roles(roles: &[&str]) -> AuthClaims {
        AuthClaims::new("user").with_roles(roles.iter().map(|r| r.to_string()).collect())
    }

    #[test]
    fn read_only_tool_and_scope() {
        let gate = scenario_gate();
        let claims = with_roles(&["ReadOnly"]);

        assert_eq!(
            gate.authorize(&claims, "browse", Some("bucket-a")),
            AuthzDecision::Allowed {
                role: "ReadOnly".into()
            }
        );
        assert_eq!(
            gate.authorize(&claims, "create", None),
            AuthzDecision::Denied(DenialReason::ToolNotPermitted)
        );
        assert_eq!(
            gate.authorize(&claims, "browse", Some("bucket-b")),
            AuthzDecision::Denied(DenialReason::ScopeNotPermitted)
        );
    }

    #[test]
    fn any_matching_role_may_grant_the_scope() {
        let gate = scenario_gate();
        let claims = with_roles(&["ReadOnly", "Writer"]);

        assert_eq!(
            gate.authorize(&claims, "browse", Some("bucket-b")),
            AuthzDecision::Allowed {
                role: "Writer".into()
            }
        );
    }

    #[test]
    fn admin_flag_overrides_roles() {
        let gate = scenario_gate();
        let claims = AuthClaims::new("root").with_admin(true);

        assert_eq!(
            gate.authorize(&claims, "create", Some("anything")),
            AuthzDecision::Allowed {
                role: ADMIN_OVERRIDE_ROLE.into()
            }
        );
    }

    #[test]
    fn unknown_roles_are_ignored() {
        let gate = scenario_gate();

        assert_eq!(
            gate.authorize(&with_roles(&["Ghost"]), "browse", None),
            AuthzDecision::Denied(DenialReason::ToolNotPermitted)
        );
        assert!(
            gate.authorize(&with_roles(&["Ghost", "ReadOnly"]), "browse", None)
                .is_allowed()
        );
    }

    #[test]
    fn allowed_tools_follows_roles() {
        let gate = scenario_gate();
        let claims = with_roles(&["ReadOnly"]);
        assert_eq!(gate.allowed_tools(&claims).collect::<Vec<_>>(), ["browse"]);

        let none = with_roles(&[]);
        assert_eq!(gate.allowed_tools(&none).count(), 0);
    }
}
