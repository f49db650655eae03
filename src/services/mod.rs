pub mod auth;
pub mod authz;
pub mod cache;
pub mod catalog_client;
pub mod context;
pub mod credentials;
pub mod orchestrator;
