mod error;
mod providers;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use scriptrag_core::EmbeddingProvider;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::EnvFilter;

use providers::{GitHubModelsProvider, OllamaProvider, OpenAiCompatibleProvider};
use state::{AppState, ServerConfig};

/// Build the provider chain from environment variables. Ollama is always
/// registered (it degrades to "unavailable" rather than erroring when
/// nothing is listening on its default port); the OpenAI-compatible and
/// GitHub Models providers only join the chain when their credentials
/// are present.
fn build_provider_chain() -> Vec<Arc<dyn EmbeddingProvider>> {
    let mut providers: Vec<Arc<dyn EmbeddingProvider>> = Vec::new();

    let ollama_url =
        std::env::var("SCRIPTRAG_OLLAMA_URL").unwrap_or_else(|_| "http://localhost:11434".to_owned());
    providers.push(Arc::new(OllamaProvider::new(ollama_url)));

    if let Ok(base_url) = std::env::var("SCRIPTRAG_OPENAI_BASE_URL") {
        let api_key = std::env::var("SCRIPTRAG_OPENAI_API_KEY").ok();
        providers.push(Arc::new(OpenAiCompatibleProvider::new(base_url, api_key)));
    }

    if let Ok(token) = std::env::var("SCRIPTRAG_GITHUB_MODELS_TOKEN") {
        providers.push(Arc::new(GitHubModelsProvider::new(token)));
    }

    providers
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig {
        database_path: std::env::var("SCRIPTRAG_DATABASE_PATH")
            .map(Into::into)
            .unwrap_or_else(|_| ServerConfig::default().database_path),
        ..ServerConfig::default()
    };

    let app_state =
        AppState::new(config, build_provider_chain()).expect("failed to open scriptrag store");

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .nest("/api", routes::api_router())
        .layer(cors)
        .with_state(app_state);

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    tracing::info!("listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
