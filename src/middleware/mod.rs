/*
 * Responsibility
 * - Public interface of the middleware layer
 * - `http`: transport concerns; `auth`: per-request identity and credential context
 * - `security_headers`: response hardening
 */
pub mod auth;
pub mod http;
pub mod security_headers;
