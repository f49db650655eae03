pub mod catalog;
pub mod gate;

pub use catalog::{
    AccessLevel, Allowance, CatalogError, PermissionCatalog, PermissionCatalogBuilder,
    RoleDefinition,
};
pub use gate::{ADMIN_OVERRIDE_ROLE, AuthorizationGate, AuthzDecision, DenialReason};
