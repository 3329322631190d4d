use imagegen_gateway::api::server::serve;
use imagegen_gateway::config::{GatewaySettings, API_KEY_ENV};
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let root = std::env::current_dir()?;
    let settings = GatewaySettings::load(root.as_path())?;
    info!(settings = ?settings, "gateway settings resolved");
    if settings.api_key.is_none() && !settings.auth_dev_bypass {
        warn!("{API_KEY_ENV} is not set; every authenticated request will be rejected");
    }

    serve(settings).await?;
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init();
}
