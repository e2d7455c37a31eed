use clap::Parser;
use std::sync::Arc;
use storefront::config::{AppConfig, EmbeddingProviderKind};
use storefront::jobs::spawn_analytics_job;
use storefront_api::{AppState, CapabilityRegistry, RestApi};
use storefront_recommend::{AzureOpenAiEmbedder, EmbeddingProvider, HashingEmbedder};
use storefront_store::StorageManager;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// `RUST_LOG` wins over the configured level when it is set.
fn init_logging(level: Level) -> anyhow::Result<()> {
    let builder = FmtSubscriber::builder().with_max_level(level);
    match EnvFilter::try_from_default_env() {
        Ok(filter) => tracing::subscriber::set_global_default(builder.with_env_filter(filter).finish())?,
        Err(_) => tracing::subscriber::set_global_default(builder.finish())?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::parse();
    config.validate()?;
    if config.print_config {
        println!("{}", config.to_json()?);
        return Ok(());
    }
    init_logging(config.level())?;

    info!("Starting storefront v{}", env!("CARGO_PKG_VERSION"));
    info!("Data directory: {:?}", config.data_dir);
    info!("HTTP API port: {}", config.http_port);

    let storage = Arc::new(StorageManager::new(&config.data_dir, config.storage_settings())?);
    storage.start_background_save();
    info!("Storage initialized");

    let embedder: Arc<dyn EmbeddingProvider> = match config.embedding_provider {
        EmbeddingProviderKind::Hashing => Arc::new(HashingEmbedder::new(config.vector_dim)),
        EmbeddingProviderKind::Azure => {
            let settings = config
                .azure_settings()
                .ok_or_else(|| anyhow::anyhow!("Azure OpenAI settings are incomplete"))?;
            Arc::new(AzureOpenAiEmbedder::new(settings)?)
        }
    };
    info!("Embedding provider: {}", embedder.name());

    let state = AppState::new(storage.clone(), embedder, config.recommendation_settings())?;
    let registry = Arc::new(CapabilityRegistry::default());

    let analytics_job = config
        .segmentation_interval()
        .map(|period| spawn_analytics_job(storage.analytics().clone(), period));

    let http_port = config.http_port;
    let http_handle = std::thread::spawn(move || {
        let sys = actix_web::rt::System::new();
        sys.block_on(async {
            if let Err(e) = RestApi::start(state, registry, http_port).await {
                error!("HTTP server error: {}", e);
            }
        })
    });

    info!("storefront started successfully");
    info!("HTTP API: http://localhost:{}/", http_port);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
        _ = tokio::task::spawn_blocking(move || {
            http_handle.join().ok();
        }) => {
            info!("HTTP server stopped");
        }
    }

    if let Some(job) = analytics_job {
        job.abort();
    }

    info!("Shutting down...");
    match storage.save() {
        Ok(true) => info!("Final snapshot written"),
        Ok(false) => info!("Snapshot already in progress, skipping final save"),
        Err(e) => error!("Final snapshot failed: {}", e),
    }
    Ok(())
}
