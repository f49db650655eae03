//! Stateless tool gateway: bearer token → request-scoped provider credentials → authorized tool
//! calls, over HTTP or a local stdio transport.
pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod middleware;
pub mod services;
pub mod state;
pub mod stdio;
pub mod tools;
