use std::sync::Arc;

use axum::{
    http::{Method, StatusCode},
    response::Json,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tutorhub_common::{ApiResponse, RedisService};
use tutorhub_marketplace::config::AppConfig;
use tutorhub_marketplace::postgres::PgStore;
use tutorhub_marketplace::realtime::{NullEmitter, RealtimeEmitter, RedisEmitter};
use tutorhub_marketplace::{routes, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tutorhub_marketplace=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = AppConfig::from_env();

    let store = PgStore::connect(&config.database).await?;
    store.run_migrations().await?;

    let emitter: Arc<dyn RealtimeEmitter> = if config.marketplace.realtime_channel.is_empty() {
        Arc::new(NullEmitter)
    } else {
        let redis = RedisService::new(&config.redis).await?;
        Arc::new(RedisEmitter::new(
            redis,
            config.marketplace.realtime_channel.clone(),
        ))
    };

    let state = AppState {
        store: Arc::new(store),
        emitter,
        config: config.clone(),
    };

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any)
        .allow_origin(Any);

    let app = routes::create_router(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
        .fallback(handler_404);

    let listener =
        tokio::net::TcpListener::bind(format!("{}:{}", config.server.host, config.server.port))
            .await?;

    tracing::info!(
        "Marketplace service listening on {}:{}",
        config.server.host,
        config.server.port
    );

    axum::serve(listener, app).await?;

    Ok(())
}

async fn handler_404() -> (StatusCode, Json<ApiResponse<()>>) {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::error("Endpoint not found".to_string())),
    )
}
