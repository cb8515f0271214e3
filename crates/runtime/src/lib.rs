use std::sync::Arc;

use anyhow::{Context, Result};
use casa_chats::{ChatSession, HttpChatBackend, WebSocketTransport};
use casa_config::AppConfig;
use tracing::info;

pub mod telemetry {
    use anyhow::Result;
    use tracing::Level;
    use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

    pub fn init_tracing() -> Result<()> {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let subscriber = SubscriberBuilder::default()
            .with_max_level(Level::DEBUG)
            .with_env_filter(env_filter)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|error| anyhow::anyhow!("failed to set tracing subscriber: {error}"))
    }
}

/// Network clients shared by every session of the process
#[derive(Clone)]
pub struct ClientServices {
    pub config: AppConfig,
    pub backend: Arc<HttpChatBackend>,
    pub transport: Arc<WebSocketTransport>,
}

impl ClientServices {
    pub fn initialise(config: &AppConfig) -> Result<Self> {
        let backend = Arc::new(
            HttpChatBackend::from_config(&config.api).context("failed to build chat backend client")?,
        );
        let transport = Arc::new(WebSocketTransport::from_config(&config.realtime));

        info!(
            api = %config.api.base_url,
            realtime = %config.realtime.url,
            mode = ?config.realtime.mode,
            "chat clients ready"
        );

        Ok(Self {
            config: config.clone(),
            backend,
            transport,
        })
    }

    /// Log `user_id` in and initialize their chat session
    pub async fn connect(&self, user_id: &str) -> Result<ChatSession> {
        let session = ChatSession::builder(user_id, self.backend.clone(), self.transport.clone())
            .uploader(self.backend.clone())
            .realtime_config(&self.config.realtime)
            .chat_config(self.config.chat.clone())
            .connect()
            .await
            .with_context(|| format!("failed to connect chat session for {user_id}"))?;

        info!(
            user_id,
            conversations = session.conversations().len(),
            "chat session connected"
        );
        Ok(session)
    }
}

pub async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(?error, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}
