mod config;
mod coordination;
mod error;
mod functions;
mod schema;
mod services;
mod store;

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::coordination::Coordinator;
use crate::functions::AppState;
use crate::functions::assignment::AssignmentEngine;
use crate::functions::escalation::EscalationEngine;
use crate::functions::pipeline::Pipeline;
use crate::functions::tickets::TicketService;
use crate::services::{BroadcastBus, HttpMessagingGateway, OpenRouterResponder};
use crate::store::{MemoryStore, PgStore, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wadesk=info")),
        )
        .init();

    let config = Config::from_env();

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            let pg = PgStore::connect(url).await.context("connecting to postgres")?;
            pg.migrate().await.context("running migrations")?;
            tracing::info!("using postgres store");
            Arc::new(pg)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store; state is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let bus = Arc::new(BroadcastBus::new(256));
    let gateway = Arc::new(
        HttpMessagingGateway::new(&config.gateway).context("configuring messaging gateway")?,
    );
    let ai = Arc::new(OpenRouterResponder::new(&config.ai).context("configuring AI responder")?);

    let coordinator = Arc::new(Coordinator::new(
        config.dedup_ttl,
        config.burst_window,
        config.gate_timeout,
        config.sweep_interval,
    ));
    let escalation = EscalationEngine::new(config.escalation.clone());
    let assignment = Arc::new(AssignmentEngine::new(
        store.clone(),
        bus.clone(),
        gateway.clone(),
        coordinator.gate.clone(),
        escalation.clone(),
    ));
    let tickets = Arc::new(TicketService::new(
        store.clone(),
        bus.clone(),
        config.tickets.clone(),
    ));
    let pipeline = Arc::new(Pipeline::new(
        store.clone(),
        coordinator.clone(),
        coordinator.dedup.clone(),
        ai,
        gateway,
        bus.clone(),
        assignment.clone(),
        tickets.clone(),
        escalation,
        config.poll_interval,
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let sweeper = {
        let coordinator = coordinator.clone();
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { coordinator.run_sweeper(rx).await })
    };
    let pipeline_loop = {
        let pipeline = pipeline.clone();
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { pipeline.run(rx).await })
    };

    // event trail for operators; UI consumers take their own subscription
    {
        let mut events = bus.subscribe();
        let mut rx = shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = rx.changed() => break,
                    event = events.recv() => match event {
                        Ok(event) => tracing::debug!(topic = %event.topic, "event"),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(missed = n, "event logger lagged");
                        }
                        Err(_) => break,
                    }
                }
            }
        });
    }

    let state = AppState {
        store,
        bus,
        pipeline,
        assignment,
        tickets,
        verify_token: config.webhook_verify_token.clone(),
    };
    let app = functions::api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "wadesk listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = sweeper.await;
    let _ = pipeline_loop.await;
    tracing::info!("wadesk stopped");
    Ok(())
}
