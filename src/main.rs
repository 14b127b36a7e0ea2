/// aiflow server entry point
///
/// Loads configuration from the environment and starts the HTTP server
/// with workflow management, execution and trigger endpoints.

use aiflow::{start_server, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
