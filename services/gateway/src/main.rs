// protocol-gateway: ingests UDP/TCP/HTTP/WebSocket/MQTT traffic, parses
// binary frames, routes by priority rule, transforms and optionally
// encrypts per target, and forwards downstream with retry.

use tracing::info;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "protocol-gateway starting");

    let config = match protocol_gateway::config::load_config() {
        Ok(cfg) => {
            info!(
                frame_schemas = cfg.frame_schemas.len(),
                routing_rules = cfg.routing_rules.len(),
                target_systems = cfg.target_systems.len(),
                "config loaded"
            );
            cfg
        }
        Err(e) => {
            eprintln!("FATAL: failed to load config: {e}");
            std::process::exit(1);
        }
    };

    let runtime = tokio::runtime::Runtime::new().expect("failed to build tokio runtime");
    runtime.block_on(run(config));
}

async fn run(config: protocol_gateway::config::GatewayConfig) {
    let gateway = match protocol_gateway::build::build_gateway(config) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("FATAL: failed to build gateway: {e}");
            std::process::exit(1);
        }
    };

    gateway.start().await;
    info!("protocol-gateway running");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
    }

    info!("shutdown signal received, draining");
    gateway.shutdown().await;
    info!("protocol-gateway stopped");
}
