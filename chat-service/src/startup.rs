//! Application startup and lifecycle management.

use crate::config::ChatConfig;
use crate::handlers::{
    chats::{create_chat, delete_chat, list_chats, rename_chat},
    health::{health_check, readiness_check},
    messages::{
        create_assistant_message, create_user_message, list_messages, stream_assistant_message,
    },
    metrics::metrics,
    models::{create_model, list_models},
};
use crate::middleware::{auth::auth_middleware, metrics::metrics_middleware};
use crate::relay::{RelayCoordinator, RelaySettings};
use crate::services::providers::openrouter::OpenRouterProvider;
use crate::services::providers::ChatProvider;
use crate::services::store::{ChatStore, PgStore};
use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use service_core::auth::TokenVerifier;
use service_core::error::AppError;
use service_core::middleware::tracing::{request_id_middleware, REQUEST_ID_HEADER};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub service_name: String,
    pub store: Arc<dyn ChatStore>,
    pub provider: Arc<dyn ChatProvider>,
    pub relay: RelayCoordinator,
    pub verifier: TokenVerifier,
}

impl AppState {
    pub fn new(
        service_name: impl Into<String>,
        store: Arc<dyn ChatStore>,
        provider: Arc<dyn ChatProvider>,
        verifier: TokenVerifier,
        settings: RelaySettings,
    ) -> Self {
        let relay = RelayCoordinator::new(Arc::clone(&store), Arc::clone(&provider), settings);
        Self {
            service_name: service_name.into(),
            store,
            provider,
            relay,
            verifier,
        }
    }
}

fn cors_layer(client_url: Option<&str>) -> CorsLayer {
    let Some(origin) = client_url.and_then(|url| HeaderValue::from_str(url).ok()) else {
        return CorsLayer::new();
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(REQUEST_ID_HEADER),
        ])
}

pub fn build_router(state: AppState, client_url: Option<&str>) -> Router {
    let protected = Router::new()
        .route(
            "/api/chats",
            get(list_chats)
                .post(create_chat)
                .put(rename_chat)
                .delete(delete_chat),
        )
        .route("/api/messages", get(list_messages))
        .route("/api/messages/user", post(create_user_message))
        .route("/api/messages/assistant", post(create_assistant_message))
        .route(
            "/api/messages/assistant/stream",
            post(stream_assistant_message),
        )
        .route_layer(from_fn_with_state(state.verifier.clone(), auth_middleware));

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics))
        .route("/api/models", get(list_models).post(create_model))
        .merge(protected)
        .route_layer(from_fn(metrics_middleware))
        .layer(cors_layer(client_url))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: ChatConfig) -> Result<Self, AppError> {
        let store = PgStore::connect(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to PostgreSQL: {}", e);
            e
        })?;

        store.run_migrations().await.map_err(|e| {
            tracing::error!("Failed to run database migrations: {}", e);
            e
        })?;

        let provider = OpenRouterProvider::new(config.provider.clone()).map_err(|e| {
            tracing::error!("Failed to initialize provider: {}", e);
            AppError::ConfigError(anyhow::anyhow!("Provider initialization failed: {}", e))
        })?;
        tracing::info!(
            base_url = %config.provider.base_url,
            default_model = %config.provider.default_model,
            "Initialized OpenRouter provider"
        );

        let state = AppState::new(
            config.service_name.clone(),
            Arc::new(store),
            Arc::new(provider),
            TokenVerifier::new(&config.auth.jwt_secret),
            RelaySettings::from(&config.relay),
        );
        let router = build_router(state, config.client_url.as_deref());

        // Port 0 picks a random port for testing
        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(
            service = %config.service_name,
            checkpoint_interval_ms = config.relay.checkpoint_interval_ms,
            stream_timeout_secs = config.relay.stream_timeout_secs,
            "HTTP server listening on port {}",
            port
        );

        Ok(Self {
            port,
            listener,
            router,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run the application until a shutdown signal arrives.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| {
                tracing::error!("HTTP server error: {}", e);
                std::io::Error::other(format!("HTTP server error: {}", e))
            })
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
