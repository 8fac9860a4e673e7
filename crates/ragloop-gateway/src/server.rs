use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use ragloop_agent::{AgenticRag, ConversationStore};
use ragloop_core::config::GatewayConfig;

use crate::routes;
use crate::state::AppState;

/// HTTP gateway built on axum.
pub struct GatewayServer {
    config: GatewayConfig,
    workflow: Arc<AgenticRag>,
    conversations: Arc<ConversationStore>,
    history_messages: usize,
}

impl GatewayServer {
    pub fn new(
        config: GatewayConfig,
        workflow: Arc<AgenticRag>,
        conversations: Arc<ConversationStore>,
        history_messages: usize,
    ) -> Self {
        Self {
            config,
            workflow,
            conversations,
            history_messages,
        }
    }

    pub fn router(&self) -> Router {
        let state = Arc::new(AppState {
            workflow: self.workflow.clone(),
            conversations: self.conversations.clone(),
            history_messages: self.history_messages,
        });

        Router::new()
            .route("/health", get(routes::health))
            .route("/query", post(routes::query))
            .route("/conversations", get(routes::list_conversations))
            .route(
                "/conversations/{id}",
                get(routes::conversation_history).delete(routes::delete_conversation),
            )
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Run the gateway server until the cancellation token is triggered.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let app = self.router();

        let listener = TcpListener::bind(&self.config.bind).await?;
        info!(bind = %self.config.bind, "Gateway listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("Gateway shut down");
        Ok(())
    }
}
