use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use cmb_local::broker::Broker;
use cmb_local::config::Args;
use cmb_local::{cns, cqs, observability};

async fn serve(name: &'static str, addr: String, app: axum::Router) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {name} listener on {addr}"))?;
    tracing::info!(service = name, addr = %addr, "listening");
    axum::serve(listener, app)
        .await
        .with_context(|| format!("{name} server failed"))
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();
    let args = Args::parse();
    let config = args.broker_config();
    tracing::info!(
        region = %config.region,
        account_id = %config.account_id,
        "starting cmb-local"
    );
    let broker = Arc::new(Broker::new(config));

    let cns_handle = tokio::spawn(serve(
        "cns",
        args.cns_bind(),
        cns::create_router(broker.clone()),
    ));
    let cqs_handle = tokio::spawn(serve(
        "cqs",
        args.cqs_bind(),
        cqs::create_router(broker),
    ));

    tokio::select! {
        r = cns_handle => r.context("cns task panicked")??,
        r = cqs_handle => r.context("cqs task panicked")??,
        _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
    }
    Ok(())
}
