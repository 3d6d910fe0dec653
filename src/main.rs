use oxidis::cluster::Cluster;
use oxidis::config::Config;
use oxidis::server;
use oxidis::store::{DataStore, DbEngine};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "redis.conf".to_string());
    let config = if std::path::Path::new(&config_path).exists() {
        info!("loading configuration from {config_path}");
        Config::load(&config_path)?
    } else {
        Config::default()
    };
    let config = Arc::new(config);

    let engine: Arc<dyn DbEngine> = if config.cluster_enabled() {
        Cluster::new(config.clone()).await?
    } else {
        DataStore::new_standalone(config.clone()).await?
    };

    server::serve(config, engine).await
}
