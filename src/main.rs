/*
 * Responsibility
 * - tokio runtime startup
 * - app::run() only (no logic here)
 */
use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    catalog_gateway::app::run().await
}
