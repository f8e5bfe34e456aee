//! HTTP server command: `pmo serve`.

use anyhow::Result;

use pmo::config::PmoConfig;

pub async fn cmd_serve(config: &PmoConfig, open: bool) -> Result<()> {
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    // Spawn browser open before starting the server (which blocks)
    if open {
        let url = format!("http://localhost:{}", config.toml.server.port);
        tokio::spawn(async move {
            tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;
            if let Err(e) = open::that(&url) {
                tracing::warn!(error = %e, url, "failed to open browser");
            }
        });
    }

    pmo::office::server::start_server(config).await
}
