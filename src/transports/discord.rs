//! Discord transport, backed by `serenity`'s gateway client.
//!
//! `connect()` spawns the gateway client's event loop as a background task;
//! the event handler forwards `Message` events across an internal mpsc
//! channel that `receive_event` reads from. Kept to the single event shape
//! the Coordinator needs — reactions, presence, and voice are out of scope
//! (spec.md §1).

use std::sync::Arc;

use async_trait::async_trait;
use serenity::all::{ChannelId, GatewayIntents};
use serenity::async_trait as serenity_async_trait;
use serenity::client::{Client, Context, EventHandler};
use serenity::model::channel::Message;
use tokio::sync::{mpsc, Mutex};

use crate::error::BotError;
use crate::types::{ArcKey, RoomMessage};

use super::{Transport, TransportEvent};

struct Forwarder {
    server_tag: String,
    sender: mpsc::UnboundedSender<TransportEvent>,
}

#[serenity_async_trait]
impl EventHandler for Forwarder {
    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let mynick = ctx.cache.current_user().name.clone();
        let is_direct = msg.mentions_user_id(ctx.cache.current_user().id) || msg.is_private();
        let content = strip_mention(&msg.content, &ctx.cache.current_user().id.to_string());

        let room_message = RoomMessage::new(
            ArcKey::new(self.server_tag.clone(), msg.channel_id.to_string()),
            msg.author.name.clone(),
            mynick,
            content,
        );
        let _ = self.sender.send(TransportEvent::Message { message: room_message, is_direct });
    }
}

fn strip_mention(content: &str, user_id: &str) -> String {
    content.replace(&format!("<@{user_id}>"), "").replace(&format!("<@!{user_id}>"), "").trim().to_string()
}

pub struct DiscordTransport {
    server_tag: String,
    token: String,
    http: Arc<serenity::http::Http>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl DiscordTransport {
    pub fn new(server_tag: impl Into<String>, token: impl Into<String>) -> Self {
        let token = token.into();
        Self {
            server_tag: server_tag.into(),
            http: Arc::new(serenity::http::Http::new(&token)),
            token,
            receiver: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Transport for DiscordTransport {
    fn platform(&self) -> &'static str {
        "discord"
    }

    async fn connect(&self) -> Result<(), BotError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.receiver.lock().await = Some(rx);

        let intents = GatewayIntents::GUILD_MESSAGES | GatewayIntents::DIRECT_MESSAGES | GatewayIntents::MESSAGE_CONTENT;
        let mut client = Client::builder(&self.token, intents)
            .event_handler(Forwarder { server_tag: self.server_tag.clone(), sender: tx })
            .await
            .map_err(|e| BotError::Transport { platform: "discord".into(), message: e.to_string() })?;

        tokio::spawn(async move {
            if let Err(e) = client.start().await {
                tracing::error!(error = %e, "discord gateway client exited");
            }
        });

        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BotError> {
        self.receiver.lock().await.take();
        Ok(())
    }

    async fn receive_event(&self) -> Result<TransportEvent, BotError> {
        let mut guard = self.receiver.lock().await;
        let receiver = guard.as_mut().ok_or_else(|| BotError::Transport {
            platform: "discord".into(),
            message: "receive_event called before connect".into(),
        })?;
        receiver.recv().await.ok_or_else(|| BotError::Transport {
            platform: "discord".into(),
            message: "event channel closed".into(),
        })
    }

    async fn send_message(&self, destination: &str, text: &str) -> Result<(), BotError> {
        let channel_id: ChannelId = destination
            .parse::<u64>()
            .map_err(|e| BotError::Configuration(format!("invalid discord channel id '{destination}': {e}")))?
            .into();
        channel_id
            .say(&self.http, text)
            .await
            .map_err(|e| BotError::Transport { platform: "discord".into(), message: e.to_string() })?;
        Ok(())
    }
}
