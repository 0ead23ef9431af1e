use anyhow::{Context, Result};
use clap::Parser;
use infrastructure::{open_collections, HttpCatalogFetcher, HttpPluginDownloader, JsonParamStore, ManifestPluginLoader};
use provd_domain::Document;
use provd_engine::{ConfigureService, PluginManager};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use provd_facade::api;
use provd_facade::auth::PermissiveVerifier;
use provd_facade::config::ProvdConfig;
use provd_facade::state::AppState;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding `default.{toml,yaml,json}` and an optional
    /// `local.*` override (§2.1 ambient configuration layering).
    #[arg(long, default_value = "./config")]
    config_dir: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new("info,provd_facade=debug"))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = ProvdConfig::load(&args.config_dir).context("loading provd configuration")?;
    info!(config_dir = %args.config_dir, bind_addr = %config.bind_addr, "provd starting");

    let (devices, configs) = open_collections(&config.data_dir)
        .await
        .context("opening devices/configs collections")?;

    let base_raw_config = load_base_raw_config(&config.data_dir).await?;

    let catalog_fetcher = Arc::new(HttpCatalogFetcher::default());
    let downloader = Arc::new(HttpPluginDownloader::new(
        reqwest::Client::new(),
        config.plugin_server_url.clone(),
        config.plugin_root.clone(),
    ));
    // Vendor plugin bodies are out of scope for this workspace (§1); a
    // deployment registers its own `Plugin` constructors on this loader
    // before any `pg_mgr/plugins/{pid}/configure` request names them.
    let loader = Arc::new(ManifestPluginLoader::new(&config.plugin_root, &config.engine_version));
    let plugins = Arc::new(PluginManager::new(catalog_fetcher, downloader, loader));

    let param_store = JsonParamStore::open(format!("{}/configure.json", config.data_dir))
        .await
        .context("opening configure-service parameter store")?;
    let configure_service = Arc::new(ConfigureService::new(param_store));

    let state = Arc::new(AppState::new(
        devices,
        configs,
        plugins,
        configure_service,
        base_raw_config,
        "provd".to_string(),
        config.plugin_server_url.clone(),
        Arc::new(PermissiveVerifier),
    ));

    let app = api::create_router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Loads the process-wide base raw-config (§3) from `{data_dir}/base_raw_config.json`,
/// falling back to an empty document when the site has not provisioned one yet.
async fn load_base_raw_config(data_dir: &str) -> Result<Document> {
    let path = format!("{data_dir}/base_raw_config.json");
    match tokio::fs::read(&path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).with_context(|| format!("parsing {path}")),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Document::default()),
        Err(err) => Err(err).with_context(|| format!("reading {path}")),
    }
}
