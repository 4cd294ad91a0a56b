//! Slack transport, speaking the Web API directly over `reqwest` (spec.md
//! §2 "Slack via `reqwest` against the Web API"). Socket Mode's websocket
//! event intake is bridged through an internal mpsc channel fed by
//! [`SlackTransport::ingest`] — a real deployment's Socket Mode reader task
//! calls it per inbound envelope; this adapter owns only the HTTP send side
//! and the event queue, matching spec.md §1's "only the contract matters".

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};

use crate::error::BotError;
use crate::types::{ArcKey, RoomMessage};

use super::{Transport, TransportEvent};

const POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    error: Option<String>,
}

pub struct SlackTransport {
    server_tag: String,
    bot_token: String,
    mynick: String,
    client: Client,
    sender: mpsc::UnboundedSender<TransportEvent>,
    receiver: Mutex<mpsc::UnboundedReceiver<TransportEvent>>,
}

impl SlackTransport {
    pub fn new(server_tag: impl Into<String>, bot_token: impl Into<String>, mynick: impl Into<String>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            server_tag: server_tag.into(),
            bot_token: bot_token.into(),
            mynick: mynick.into(),
            client: Client::new(),
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    /// Feed an inbound Socket Mode `message` event into this transport's
    /// queue. Called by the Socket Mode websocket reader task.
    pub fn ingest(&self, channel: &str, user: &str, text: &str, is_direct: bool) {
        let room_message = RoomMessage::new(ArcKey::new(self.server_tag.clone(), channel), user, self.mynick.clone(), text);
        let _ = self.sender.send(TransportEvent::Message { message: room_message, is_direct });
    }
}

#[async_trait]
impl Transport for SlackTransport {
    fn platform(&self) -> &'static str {
        "slack"
    }

    async fn connect(&self) -> Result<(), BotError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BotError> {
        Ok(())
    }

    async fn receive_event(&self) -> Result<TransportEvent, BotError> {
        self.receiver.lock().await.recv().await.ok_or_else(|| BotError::Transport {
            platform: "slack".into(),
            message: "event channel closed".into(),
        })
    }

    async fn send_message(&self, destination: &str, text: &str) -> Result<(), BotError> {
        let response = self
            .client
            .post(POST_MESSAGE_URL)
            .bearer_auth(&self.bot_token)
            .json(&serde_json::json!({ "channel": destination, "text": text }))
            .send()
            .await
            .map_err(|e| BotError::Network(e.to_string()))?;

        let status = response.status();
        let body: PostMessageResponse = response.json().await.map_err(|e| BotError::Network(e.to_string()))?;

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(BotError::RateLimited { retry_after_ms: None });
        }
        if !body.ok {
            return Err(BotError::Transport {
                platform: "slack".into(),
                message: body.error.unwrap_or_else(|| "unknown Slack API error".into()),
            });
        }
        Ok(())
    }
}
