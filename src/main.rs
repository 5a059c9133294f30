use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use axiom_core::config::NodeConfig;
use axiom_core::extractor::NoopExtractor;
use axiom_core::node::NodeContext;
use axiom_core::{chain, http, ledger, peer, scheduler, store::Store};
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = NodeConfig::from_env();
    config.validate()?;
    tracing::info!(port = config.port, db_path = %config.db_path, "starting node");

    let store = Store::open(&config.db_path)?;
    chain::initialize_chain(&store)?;
    ledger::migrate_fact_content_to_compressed(&store)?;

    if let Some(bootstrap) = &config.bootstrap_peer {
        peer::register_peer(&store, bootstrap, &config.advertised_url)?;
    }

    let ctx = Arc::new(NodeContext::new(config.clone(), store, Arc::new(NoopExtractor)));

    let scheduler_ctx = ctx.clone();
    tokio::spawn(async move {
        scheduler::run_scheduler(scheduler_ctx).await;
    });

    let http_ctx = ctx.clone();
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::from(http_ctx.clone()))
            .configure(http::configure)
    })
    .bind(("0.0.0.0", config.port))?
    .run()
    .await?;

    Ok(())
}
