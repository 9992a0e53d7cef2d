//! Gateway binary entry point: parses [`paramgate::config::AppConfig`], brings
//! up the process-wide [`paramgate::Service`], and drives the uplink session
//! loop until a shutdown signal arrives.
//!
//! Parse config, bring up shared state, run the receive loop under
//! `tokio::select!` against a shutdown signal, then tear down cleanly.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context as _, Result};
use ortho_config::OrthoConfig;
use tracing::{info, warn};

use paramgate::auth::AuthorizationHook;
use paramgate::config::{AppConfig, GatewayMode};
use paramgate::parambus::mock::MockParambusAdapter;
use paramgate::parambus::ParambusAdapter;
use paramgate::uplink::{MockTransport, UplinkSession};
use paramgate::Service;

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load_from_iter(std::env::args()).context("failed to load configuration")?;

    let mode = config.mode().context("invalid gateway mode")?;
    let adapter: Arc<dyn ParambusAdapter> = match mode {
        GatewayMode::Mock => Arc::new(MockParambusAdapter::new()),
        GatewayMode::Real => {
            warn!("mode=real requested but no real parambus client is wired into this binary; falling back to the mock adapter");
            Arc::new(MockParambusAdapter::new())
        }
    };

    // Authentication is an upstream middleware hook; this
    // reference binary carries no ACL rules, matching the default policy
    // (reads open, writes require an authenticated caller).
    let authz = AuthorizationHook::new(vec![]);

    let service = Service::init(config.clone(), adapter, authz)
        .await
        .context("failed to initialize gateway service")?;

    let outbound_receiver = service
        .take_outbound_receiver()
        .expect("outbound receiver is only ever taken once, here");
    let (event_pipeline, event_receiver) = service
        .take_event_pipeline()
        .expect("event pipeline is only ever taken once, here");

    let event_task = tokio::spawn(event_pipeline.run(event_receiver));

    let session = UplinkSession::new(
        MockTransport::new(),
        service.translator.clone(),
        service.config.service_name.clone(),
        service.config.events_endpoint.clone(),
        Duration::from_millis(250),
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_for_signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        shutdown_for_signal.store(true, Ordering::Relaxed);
    });

    info!(component = %service.config.component, service_name = %service.config.service_name, "paramgate starting");
    session
        .run(shutdown, outbound_receiver)
        .await
        .context("uplink session exited with an error")?;

    event_task.abort();
    service.shutdown().await.context("failed to shut down gateway service")?;
    Ok(())
}
