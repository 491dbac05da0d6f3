use std::{net::SocketAddr, sync::Arc};

use moodflix_api::{
    config::Config,
    db::{create_redis_client, MemoryStore, RedisStore, StateStore},
    routes::{create_router, AppState},
    services::{
        analyzers::{EmotionAnalyzer, KeywordAnalyzer, OpenAiAnalyzer},
        cache::ResponseCache,
        clock::{Clock, SystemClock},
        governor::RequestGovernor,
        pipeline::RecommendationPipeline,
        providers::TmdbProvider,
    },
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "moodflix_api=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let store: Arc<dyn StateStore> = match &config.redis_url {
        Some(url) => {
            let client = create_redis_client(url)?;
            Arc::new(RedisStore::new(client).await?)
        }
        None => {
            tracing::warn!("REDIS_URL not set, rate counters and cache are process-local");
            Arc::new(MemoryStore::new())
        }
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let analyzer: Arc<dyn EmotionAnalyzer> = match &config.openai_api_key {
        Some(key) if !key.is_empty() => Arc::new(OpenAiAnalyzer::new(
            key.clone(),
            config.openai_api_url.clone(),
            config.openai_model.clone(),
            config.token_prices(),
        )),
        _ => {
            tracing::warn!("OPENAI_API_KEY not set, using keyword analysis");
            Arc::new(KeywordAnalyzer::new())
        }
    };
    let catalog = Arc::new(TmdbProvider::new(
        config.tmdb_api_key.clone(),
        config.tmdb_api_url.clone(),
        config.tmdb_language.clone(),
    ));

    let governor = Arc::new(RequestGovernor::new(
        store.clone(),
        clock.clone(),
        config.governor(),
    ));
    let pipeline = RecommendationPipeline::new(
        governor,
        ResponseCache::with_settings(store, clock.clone(), config.cache()),
        analyzer,
        catalog,
        clock,
        config.pipeline(),
    );

    let state = Arc::new(AppState {
        pipeline,
        scope_policy: config.rate_limit_scope,
        trust_forwarded_for: config.trust_forwarded_for,
        admin_token: config.admin_token.clone().filter(|token| !token.is_empty()),
        cors_origins: config.cors_origin_list(),
    });
    let app = create_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        address = %addr,
        emergency_stop = config.emergency_stop,
        monthly_limit = config.openai_monthly_limit,
        trust_forwarded_for = config.trust_forwarded_for,
        "Server running"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
