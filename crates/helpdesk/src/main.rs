use std::sync::Arc;

use helpdesk_core::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    helpdesk_core::logging::init("helpdesk")?;

    let cfg = Arc::new(Config::load()?);
    tracing::info!(
        "helpdesk starting (auto-close grace {}s)",
        cfg.auto_close_grace.as_secs()
    );

    helpdesk_discord::router::run(cfg).await
}
