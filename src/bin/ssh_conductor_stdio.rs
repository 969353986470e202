#![deny(warnings)]
#![deny(clippy::unwrap_used)]

use std::sync::Arc;

use dotenv::dotenv;
use poem_mcpserver::McpServer;
use ssh_conductor::Conductor;
use ssh_conductor::config::ConductorConfig;
use ssh_conductor::mcp::ConductorTools;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    // stdout carries the protocol, so logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().expect("valid directive")),
        )
        .init();

    let config = ConductorConfig::load()?;
    let conductor = Arc::new(Conductor::from_config(&config)?);

    poem_mcpserver::stdio::stdio(McpServer::new().tools(ConductorTools::new(conductor.clone())))
        .await?;

    conductor.shutdown().await;
    Ok(())
}
