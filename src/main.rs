//! fedgate - GraphQL federation gateway.
//!
//! # Usage
//!
//! ```bash
//! # Subgraphs from a supergraph config
//! fedgate --supergraph-config schemas/supergraph.yaml
//!
//! # Subgraphs from the environment, re-introspected every minute
//! FEDERATED_SERVICES_PRODUCTS=http://localhost:8001/graphql \
//! FEDERATED_SERVICES_IMAGES=http://localhost:8002/graphql \
//! POLL_INTERVAL_SECS=60 fedgate
//! ```

use std::net::{Ipv4Addr, SocketAddr};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

use fedgate::config::{Args, GatewayConfig};
use fedgate::{
    FederatedQueryPlanner, FederationGateway, HttpQueryExecutor, HttpSchemaIntrospector,
    SchemaRegistry,
};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args = Args::parse();
    let config = match GatewayConfig::resolve(&args, std::env::vars()) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "gateway stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    for subgraph in &config.subgraphs {
        info!(
            subgraph = %subgraph.name,
            url = %subgraph.url,
            static_schema = subgraph.sdl.is_some(),
            "federating subgraph"
        );
    }

    let registry = SchemaRegistry::new(
        config.subgraphs.clone(),
        Box::new(HttpSchemaIntrospector::new(config.request_timeout)),
    );
    let gateway = Arc::new(
        FederationGateway::new(
            registry,
            Box::new(FederatedQueryPlanner::new()),
            Box::new(HttpQueryExecutor::new()),
        )
        .with_request_timeout(config.request_timeout)
        .with_query_plan_exposed(config.expose_query_plan),
    );

    gateway.recompose().await?;

    if let Some(interval) = config.poll_interval {
        info!(interval_secs = interval.as_secs(), "polling subgraph schemas");
        gateway.spawn_polling(interval);
    }
    spawn_reload_on_sighup(&gateway)?;

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port));
    let listener = TcpListener::bind(addr).await?;
    fedgate::server::serve(listener, gateway).await?;
    Ok(())
}

#[cfg(unix)]
fn spawn_reload_on_sighup(gateway: &Arc<FederationGateway>) -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangups = signal(SignalKind::hangup())?;
    let gateway = Arc::clone(gateway);
    tokio::spawn(async move {
        while hangups.recv().await.is_some() {
            info!("SIGHUP received, recomposing");
            let _ = gateway.recompose().await;
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_reload_on_sighup(_gateway: &Arc<FederationGateway>) -> std::io::Result<()> {
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).init();
}
