pub mod access_jwt;
pub mod claims;
pub mod factory;

pub use access_jwt::{
    KeyError, TokenError, TokenValidator, TokenValidatorConfig, VerificationKey, fingerprint,
};
pub use claims::{AuthClaims, EmbeddedCredentials};
pub use factory::build_token_validator;
