//! Corral control plane
//!
//! Serves the scheduler RPC surface over HTTP against the in-memory
//! scheduler backend.

use std::sync::Arc;

use anyhow::{bail, Result};
use corral_control_plane::{
    api,
    auth::{
        Capability, CapabilityPolicy, CredentialTable, CredentialValidator, SessionValidator,
        UnsecureValidator,
    },
    config::Config,
    service::{Collaborators, SchedulerService},
    state::AppState,
    store::MemStorage,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Prefer RUST_LOG, fall back to CORRAL_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting corral control plane");
    info!(
        listen_addr = %config.listen_addr,
        kill_initial_backoff_ms = config.kill.initial_backoff.as_millis() as u64,
        kill_max_backoff_ms = config.kill.max_backoff.as_millis() as u64,
        "Configuration loaded"
    );

    let validator = session_validator(&config)?;
    let storage = Arc::new(MemStorage::new());
    let shutdown = CancellationToken::new();

    let service = SchedulerService::new(
        Collaborators::in_memory(storage, validator),
        CapabilityPolicy::default(),
        config.kill.clone(),
        shutdown.clone(),
    );
    let app = api::create_router(AppState::new(service));

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let server = axum::serve(listener, app).with_graceful_shutdown({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Received shutdown signal");
            // In-flight kill polls observe child tokens of this one.
            shutdown.cancel();
        }
    });

    if let Err(e) = server.await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Control plane shutdown complete");
    Ok(())
}

fn session_validator(config: &Config) -> Result<Arc<dyn SessionValidator>> {
    if let Some(path) = &config.credentials_file {
        let table = CredentialTable::load(path)?;
        info!(path = %path.display(), users = table.users.len(), "Loaded credential table");
        return Ok(Arc::new(CredentialValidator::new(table)));
    }

    if !config.dev_mode {
        bail!("CORRAL_CREDENTIALS_FILE is required unless CORRAL_DEV is set");
    }

    warn!(admins = ?config.dev_admins, "Dev mode: every session is authenticated");
    let validator = config
        .dev_admins
        .iter()
        .fold(UnsecureValidator::new(), |validator, user| {
            validator.with_grant(user, &[Capability::Root, Capability::Provisioner])
        });
    Ok(Arc::new(validator))
}
