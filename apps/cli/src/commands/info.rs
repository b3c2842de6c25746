//! Info command implementation.

use colored::Colorize;
use pek_client::ClientConfig;
use serde_json::json;

/// Execute the info command.
pub async fn execute(config: ClientConfig, json_output: bool) -> anyhow::Result<()> {
    let client = super::connect(config).await?;

    if json_output {
        let info = json!({
            "clientId": client.id(),
            "server": {"url": client.server().url, "version": client.server().version},
            "datasets": client.dataset_names(),
        });
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        println!("{}", "Pek Server".bold().cyan());
        println!();
        println!("  URL:       {}", client.server().url.green());
        println!("  Version:   {}", client.server().version.green());
        println!("  Client id: {}", client.id().dimmed());
        println!();
        println!("{}", "Datasets:".bold());
        if client.dataset_names().is_empty() {
            println!("  {}", "(none)".yellow());
        }
        for name in client.dataset_names() {
            println!("  • {}", name);
        }
    }

    client.close().await?;
    Ok(())
}
