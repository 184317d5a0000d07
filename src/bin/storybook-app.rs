use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;

use storybook::app::auth::{StaticTokenVerifier, TokenVerifier as _};
use storybook::app::book_store::{BookStore, InMemoryBookStore, LocalFsBookStore, StoreBackend};
use storybook::app::generator::{BookGenerator, GenerationSettings};
use storybook::app::http::{AppState, router};
use storybook::app::library_store::{InMemoryLibraryStore, LibraryStore, LocalFsLibraryStore};
use storybook::app::queue::InProcessQueue;
use storybook::app::samples::SampleBooks;
use storybook::config::ProviderConfig;
use storybook::image_client::HttpImageClient;
use storybook::narration::HttpSpeechClient;
use storybook::story_client::HttpStoryTextClient;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct AppArgs {
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    #[arg(long, default_value = "storybook-data")]
    data_dir: PathBuf,

    /// Books generated at the same time.
    #[arg(long, default_value_t = 2)]
    max_concurrency: usize,

    /// Directory holding the sample book `index.json`.
    #[arg(long, default_value = "data/sample-books")]
    samples_dir: PathBuf,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    storybook::logging::init()?;

    let args = AppArgs::parse();
    tracing::info!(?args, "starting storybook-app");

    let config = ProviderConfig::from_env()?;
    let backend = StoreBackend::from_env()?;
    let book_store: Arc<dyn BookStore>;
    let library_store: Arc<dyn LibraryStore>;
    match backend {
        StoreBackend::LocalFs => {
            tracing::info!(data_dir = %args.data_dir.display(), "using local filesystem store");
            book_store = Arc::new(LocalFsBookStore::new(&args.data_dir));
            library_store = Arc::new(LocalFsLibraryStore::new(&args.data_dir));
        }
        StoreBackend::InMemory => {
            tracing::warn!("using in-memory store; books are lost on restart");
            book_store = Arc::new(InMemoryBookStore::new());
            library_store = Arc::new(InMemoryLibraryStore::new());
        }
    }

    let auth = StaticTokenVerifier::from_env()?;
    if !auth.is_configured() {
        tracing::warn!("STORYBOOK_AUTH_TOKENS is empty; authenticated routes are disabled");
    }
    let samples = SampleBooks::load(&args.samples_dir).await?;

    let http = config.http_client()?;
    let generator = Arc::new(BookGenerator::new(
        book_store,
        Arc::new(HttpStoryTextClient::new(
            http.clone(),
            &config.base_url,
            config.api_key.clone(),
        )),
        Arc::new(HttpImageClient::new(
            http.clone(),
            &config.base_url,
            config.api_key.clone(),
        )),
        InProcessQueue::new(args.max_concurrency),
        GenerationSettings::from_provider(&config),
    ));

    let state = AppState {
        generator,
        library_store,
        samples: Arc::new(samples),
        auth: Arc::new(auth),
        speech: Arc::new(HttpSpeechClient::new(
            http,
            &config.base_url,
            config.api_key.clone(),
        )),
        tts_model: config.tts_model.clone(),
    };
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(args.addr)
        .await
        .with_context(|| format!("bind {}", args.addr))?;
    tracing::info!(addr = %args.addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(?err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
