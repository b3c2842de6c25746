//! Dataset command implementation.

use anyhow::Context;
use pek_client::{ClientConfig, DatasetKey};

/// Execute the dataset command.
///
/// Prints the requested attribute as pretty JSON on stdout.
pub async fn execute(config: ClientConfig, name: &str, key: DatasetKey) -> anyhow::Result<()> {
    let client = super::connect(config).await?;
    let dataset = client.dataset(name)?;

    let value = dataset.get(key).await.with_context(|| format!("Failed to fetch {} of dataset '{}'", key, name))?;
    println!("{}", serde_json::to_string_pretty(&value)?);

    client.close().await?;
    Ok(())
}
