pub mod deriver;
pub mod sts;
pub mod types;

pub use deriver::{
    CredentialDeriver, CredentialError, DerivationStep, DeriverSettings, derivation_plan,
};
pub use sts::{AssumeRoleRequest, AssumedRole, ExchangeError, RoleAssumer, StsRoleAssumer};
pub use types::{AmbientIdentity, CredentialSource, DerivedCredentials, ResolvedCredentials};

#[cfg(test)]
pub(crate) use types::test_support;
