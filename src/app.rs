/*
 * Responsibility
 * - Config → dependency graph → transport (HTTP router or stdio loop)
 * - Tracing and panic hook installation
 * - Background cache janitor
 */
use std::{io, panic, process, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api;
use crate::config::{Config, Transport};
use crate::middleware;
use crate::services::auth::build_token_validator;
use crate::services::authz::{AuthorizationGate, PermissionCatalog};
use crate::services::cache::MemoryCredentialCache;
use crate::services::catalog_client::CatalogClient;
use crate::services::credentials::{
    CredentialDeriver, DeriverSettings, RoleAssumer, StsRoleAssumer,
};
use crate::services::orchestrator::{AmbientProfile, MiddlewareOrchestrator};
use crate::state::AppState;
use crate::stdio;
use crate::tools::{ToolDispatcher, builtin};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

fn init_tracing(transport: Transport) {
    // Prefer RUST_LOG if set; otherwise use a sensible default.
    // Ex:
    // RUST_LOG=info,catalog_gateway=debug,tower_http=debug cargo run
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=info"));

    // stdout belongs to the protocol on the stdio transport.
    let fmt = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(transport == Transport::Http);

    tracing_subscriber::registry().with(filter).with(fmt).init();
}

fn init_panic_hook(abort_on_panic: bool) {
    // Keep the default hook as a fallback (prints to stderr with location/payload).
    let default_hook = panic::take_hook();

    panic::set_hook(Box::new(move |info| {
        // Always surface panics via tracing so they don't get lost.
        tracing::error!(?info, "panic");

        // In development, fail fast. In production, fall back to the default behavior.
        if abort_on_panic {
            process::abort();
        } else {
            default_hook(info);
        }
    }))
}

pub async fn run() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(config.transport);
    init_panic_hook(!config.app_env.is_production());

    let sts = StsRoleAssumer::from_env().await;
    let state = build_state(&config, Arc::new(sts))?;
    spawn_cache_janitor(state.clone());

    match config.transport {
        Transport::Http => {
            tracing::info!(
                "starting gateway in {:?} mode on {}",
                config.app_env,
                config.addr
            );
            let app = build_router(state);
            let listener = tokio::net::TcpListener::bind(config.addr)
                .await
                .with_context(|| format!("binding {}", config.addr))?;
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
        Transport::Stdio => {
            tracing::info!("starting gateway in {:?} mode on stdio", config.app_env);
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            stdio::serve(state, stdin, tokio::io::stdout()).await?;
        }
    }

    tracing::info!("gateway stopped");
    Ok(())
}

/// Builds process-level services and injects them into the shared application state.
///
/// `assumer` is the role-exchange backend; with role exchange disabled it only
/// contributes its ambient identity.
pub fn build_state(config: &Config, assumer: Arc<dyn RoleAssumer>) -> Result<AppState> {
    let validator = build_token_validator(config).context("loading token verification key")?;

    let settings = DeriverSettings {
        audit_identity: config.audit_identity.clone(),
        assume_duration: config.assume_role_duration,
        exchange_timeout: config.role_exchange_timeout,
        cache_margin: config.credential_cache_margin,
    };
    let deriver = CredentialDeriver::new(Arc::new(MemoryCredentialCache::new()), settings);
    let deriver = if config.role_exchange_enabled {
        deriver.with_assumer(assumer)
    } else {
        tracing::info!("role exchange disabled");
        deriver.with_ambient(assumer.ambient_identity())
    };

    let ambient = AmbientProfile {
        identity: config.ambient_identity.clone(),
        roles: config.ambient_roles.clone(),
        is_admin: config.ambient_admin,
    };
    let orchestrator = MiddlewareOrchestrator::new(validator, Arc::new(deriver), ambient);

    let gate = AuthorizationGate::new(Arc::new(PermissionCatalog::builtin()));
    let client = CatalogClient::new(config.catalog_url.clone(), config.catalog_timeout)
        .context("building catalog client")?;
    let mut dispatcher = ToolDispatcher::new(gate);
    builtin::register_builtins(&mut dispatcher, client);

    Ok(AppState::new(Arc::new(orchestrator), Arc::new(dispatcher)))
}

pub fn build_router(state: AppState) -> Router {
    let v1 = api::v1::routes();
    let v1 = middleware::auth::access::apply(v1, state.clone());

    let router = Router::new()
        .route("/health", get(api::v1::handlers::health::health))
        .nest("/api/v1", v1)
        .with_state(state);

    let router = middleware::security_headers::apply(router);
    middleware::http::apply(router, REQUEST_TIMEOUT)
}

fn spawn_cache_janitor(state: AppState) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(CACHE_SWEEP_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            let purged = state.orchestrator.deriver().purge_expired().await;
            if purged > 0 {
                tracing::debug!(purged, "expired credentials purged");
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
