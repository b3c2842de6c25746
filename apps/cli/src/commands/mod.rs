//! Command implementations for the Pek CLI.

pub mod dataset;
pub mod info;
pub mod run;

use anyhow::Context;
use pek_client::{Client, ClientConfig};

/// Connect using the resolved configuration.
pub async fn connect(config: ClientConfig) -> anyhow::Result<Client> {
    let server_url = config.server_url.clone();
    Client::connect(config).await.with_context(|| format!("Failed to connect to {}", server_url))
}
