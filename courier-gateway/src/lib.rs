//! Courier gateway - HTTP surface over the conversation correlation
//! core.
//!
//! Wires the reference store, activity tracker, dispatcher, lifecycle
//! controller, and delivery executor together and serves the webhook
//! and lifecycle routes behind caller authentication.

pub mod auth;
pub mod deliver;
pub mod routes;

use anyhow::Result;
use auth::AuthState;
use courier_common::config::Config;
use courier_session::{
    ActivityTracker, CallerValidator, CapabilityTable, Dispatcher, LifecycleController,
    MemoryReferenceStore, ReferenceStore, SqliteReferenceStore,
};
use deliver::{ChannelAdapter, DeliveryExecutor};
use routes::GatewayState;
use std::sync::Arc;
use std::time::Duration;

/// Build the gateway state from configuration and the channel
/// adapters supplied by the embedding application.
pub fn build_state(
    config: &Config,
    adapters: Vec<Arc<dyn ChannelAdapter>>,
) -> Result<Arc<GatewayState>> {
    let store: Arc<dyn ReferenceStore> = match &config.session.store_path {
        Some(path) => Arc::new(SqliteReferenceStore::open(path)?),
        None => Arc::new(MemoryReferenceStore::new()),
    };

    let tracker = Arc::new(ActivityTracker::new(store.clone()));
    let lifecycle = Arc::new(LifecycleController::new(Duration::from_secs(
        config.session.edge_timeout_seconds,
    )));
    let capabilities =
        CapabilityTable::with_overrides(config.session.channel_capability_overrides.clone());
    let dispatcher = Arc::new(Dispatcher::new(
        tracker.clone(),
        capabilities,
        lifecycle.clone(),
    ));

    let mut delivery = DeliveryExecutor::new(dispatcher.clone(), tracker.clone(), &config.delivery);
    for adapter in adapters {
        delivery = delivery.with_adapter(adapter);
    }

    Ok(Arc::new(GatewayState {
        store,
        tracker,
        dispatcher,
        lifecycle,
        delivery: Arc::new(delivery),
    }))
}

/// Start the gateway server and serve until shutdown.
pub async fn start_server(config: &Config, adapters: Vec<Arc<dyn ChannelAdapter>>) -> Result<()> {
    let state = build_state(config, adapters)?;
    let auth = AuthState::new(
        config.auth.token_secret.clone(),
        CallerValidator::new(&config.auth.allowed_callers),
    );

    let app = routes::router(state, auth);

    let listener = tokio::net::TcpListener::bind(&config.server.listen_addr).await?;
    tracing::info!(addr = %config.server.listen_addr, "Courier gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
}
