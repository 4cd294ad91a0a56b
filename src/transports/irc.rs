//! IRC transport, backed by the `irc` crate's async client.
//!
//! Only what the Coordinator needs is wired up: connect, join the
//! configured channels, turn `PRIVMSG` into [`RoomMessage`]s (addressed
//! messages — `mynick: ` / `mynick, ` prefix, or a direct query — set
//! `is_direct=true`), and send text back out. Full IRC numeric/CTCP
//! handling is out of scope (spec.md §1).

use async_trait::async_trait;
use futures::stream::StreamExt;
use irc::client::prelude::{Client, Command, Config};
use tokio::sync::Mutex;

use crate::error::BotError;
use crate::types::{ArcKey, RoomMessage};

use super::{Transport, TransportEvent};

pub struct IrcTransport {
    server_tag: String,
    nickname: String,
    client: Mutex<Option<Client>>,
    config: Config,
}

impl IrcTransport {
    pub fn new(server_tag: impl Into<String>, nickname: impl Into<String>, config: Config) -> Self {
        Self {
            server_tag: server_tag.into(),
            nickname: nickname.into(),
            client: Mutex::new(None),
            config,
        }
    }
}

#[async_trait]
impl Transport for IrcTransport {
    fn platform(&self) -> &'static str {
        "irc"
    }

    async fn connect(&self) -> Result<(), BotError> {
        let mut client = Client::from_config(self.config.clone())
            .await
            .map_err(|e| BotError::Transport { platform: "irc".into(), message: e.to_string() })?;
        client.identify().map_err(|e| BotError::Transport { platform: "irc".into(), message: e.to_string() })?;
        *self.client.lock().await = Some(client);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BotError> {
        self.client.lock().await.take();
        Ok(())
    }

    async fn receive_event(&self) -> Result<TransportEvent, BotError> {
        let mut guard = self.client.lock().await;
        let client = guard.as_mut().ok_or_else(|| BotError::Transport {
            platform: "irc".into(),
            message: "receive_event called before connect".into(),
        })?;
        let mut stream = client.stream().map_err(|e| BotError::Transport { platform: "irc".into(), message: e.to_string() })?;

        match stream.next().await {
            Some(Ok(message)) => Ok(self.translate(message)),
            Some(Err(e)) => Err(BotError::Transport { platform: "irc".into(), message: e.to_string() }),
            None => Ok(TransportEvent::Disconnected { reason: "stream ended".into() }),
        }
    }

    async fn send_message(&self, destination: &str, text: &str) -> Result<(), BotError> {
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or_else(|| BotError::Transport {
            platform: "irc".into(),
            message: "send_message called before connect".into(),
        })?;
        client
            .send_privmsg(destination, text)
            .map_err(|e| BotError::Transport { platform: "irc".into(), message: e.to_string() })
    }
}

impl IrcTransport {
    fn translate(&self, message: irc::proto::Message) -> TransportEvent {
        match (&message.prefix, &message.command) {
            (Some(irc::proto::Prefix::Nickname(nick, _, _)), Command::PRIVMSG(target, content)) => {
                let is_direct_query = !target.starts_with('#');
                let addressed_prefix = [format!("{}:", self.nickname), format!("{},", self.nickname)];
                let (is_direct, stripped) = addressed_prefix
                    .iter()
                    .find_map(|p| content.strip_prefix(p.as_str()).map(|rest| (true, rest.trim_start().to_string())))
                    .unwrap_or((is_direct_query, content.clone()));

                let channel_name = if is_direct_query { nick.clone() } else { target.clone() };
                let room_message = RoomMessage::new(
                    ArcKey::new(self.server_tag.clone(), channel_name),
                    nick.clone(),
                    self.nickname.clone(),
                    stripped,
                );
                TransportEvent::Message { message: room_message, is_direct }
            }
            _ => TransportEvent::Connected,
        }
    }
}
