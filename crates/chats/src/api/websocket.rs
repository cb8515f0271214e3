//! WebSocket implementation of the publish/subscribe boundary.

use async_trait::async_trait;
use casa_config::RealtimeConfig;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, warn};

use super::{ChannelTransport, Subscription};
use crate::types::{ChannelEvent, ChatError, ChatResult, Topic};

/// Frames sent by the client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Start receiving events for a topic
    Subscribe { topic: Topic },
    /// Heartbeat
    Ping,
}

/// Frames sent by the realtime server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Subscription confirmation
    Subscribed { topic: Topic },
    /// An event published on a topic
    Event {
        topic: Topic,
        event: String,
        payload: serde_json::Value,
    },
    /// Subscription refused or broken
    Error {
        #[serde(default)]
        topic: Option<Topic>,
        message: String,
    },
    /// Heartbeat response
    Pong,
    #[serde(other)]
    Unknown,
}

/// One socket per topic; each socket is read by its own task
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: String,
    channel_capacity: usize,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>, channel_capacity: usize) -> Self {
        Self {
            url: url.into(),
            channel_capacity: channel_capacity.max(1),
        }
    }

    pub fn from_config(config: &RealtimeConfig) -> Self {
        Self::new(config.url.clone(), config.channel_capacity)
    }
}

#[async_trait]
impl ChannelTransport for WebSocketTransport {
    async fn subscribe(&self, topic: &Topic) -> ChatResult<Subscription> {
        let failure = |reason: String| ChatError::subscription(topic.as_str(), reason);

        let (mut socket, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| failure(e.to_string()))?;

        let frame = serde_json::to_string(&ClientFrame::Subscribe { topic: topic.clone() })?;
        socket
            .send(WsMessage::Text(frame))
            .await
            .map_err(|e| failure(e.to_string()))?;

        debug!(topic = %topic, url = %self.url, "websocket subscription opened");

        let (sender, subscription) = Subscription::channel(self.channel_capacity);
        let topic = topic.clone();

        let reader = tokio::spawn(async move {
            while let Some(frame) = socket.next().await {
                let text = match frame {
                    Ok(WsMessage::Text(text)) => text,
                    Ok(WsMessage::Close(_)) => {
                        let _ = sender
                            .send(Err(ChatError::subscription(topic.as_str(), "closed by server")))
                            .await;
                        return;
                    }
                    Ok(_) => continue,
                    Err(error) => {
                        let _ = sender
                            .send(Err(ChatError::subscription(topic.as_str(), error.to_string())))
                            .await;
                        return;
                    }
                };

                match serde_json::from_str::<ServerFrame>(&text) {
                    Ok(ServerFrame::Event { topic: event_topic, event, payload }) => {
                        if event_topic != topic {
                            debug!(topic = %topic, other = %event_topic, "ignoring event for another topic");
                            continue;
                        }
                        if sender.send(Ok(ChannelEvent { event, payload })).await.is_err() {
                            return;
                        }
                    }
                    Ok(ServerFrame::Error { message, .. }) => {
                        let _ = sender
                            .send(Err(ChatError::subscription(topic.as_str(), message)))
                            .await;
                        return;
                    }
                    Ok(ServerFrame::Subscribed { .. }) => {
                        debug!(topic = %topic, "subscription confirmed");
                    }
                    Ok(ServerFrame::Pong) | Ok(ServerFrame::Unknown) => {}
                    Err(error) => {
                        warn!(topic = %topic, %error, "ignoring unparseable frame");
                    }
                }
            }

            let _ = sender
                .send(Err(ChatError::subscription(topic.as_str(), "connection ended")))
                .await;
        });

        Ok(subscription.with_reader(reader.abort_handle()))
    }
}
