//! `RoomMessage` and session-key identity (spec.md §3).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of a conversation stream: server + channel, or
/// platform + DM id. Two messages share an arc iff they were exchanged in
/// the same room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArcKey {
    pub server_tag: String,
    pub channel_name: String,
}

impl ArcKey {
    pub fn new(server_tag: impl Into<String>, channel_name: impl Into<String>) -> Self {
        Self {
            server_tag: server_tag.into(),
            channel_name: channel_name.into(),
        }
    }

    /// Lowercased `server/channel` used as a map key in config lookups
    /// (`channelModes`, `interjectingChannels`).
    pub fn channel_key(&self) -> String {
        format!(
            "{}/{}",
            self.server_tag.to_ascii_lowercase(),
            self.channel_name.to_ascii_lowercase()
        )
    }
}

impl fmt::Display for ArcKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.server_tag, self.channel_name)
    }
}

/// A message as it enters the core. Created at ingress, immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomMessage {
    pub arc: ArcKey,
    pub nick: String,
    pub mynick: String,
    pub content: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub thread_starter_id: Option<String>,
    #[serde(default)]
    pub platform_id: Option<String>,
    #[serde(default)]
    pub secrets: Option<serde_json::Value>,
}

impl RoomMessage {
    pub fn new(
        arc: ArcKey,
        nick: impl Into<String>,
        mynick: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            arc,
            nick: nick.into(),
            mynick: mynick.into(),
            content: content.into(),
            thread_id: None,
            thread_starter_id: None,
            platform_id: None,
            secrets: None,
        }
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    /// Format for steering-context / history injection: `"<nick> text"`.
    pub fn as_user_turn(&self) -> String {
        format!("<{}> {}", self.nick, self.content)
    }
}

/// Either a concrete nick, or the thread wildcard `*` — any user in a
/// threaded conversation steers the same session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NickOrWildcard {
    Nick(String),
    Wildcard,
}

impl fmt::Display for NickOrWildcard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nick(n) => write!(f, "{n}"),
            Self::Wildcard => write!(f, "*"),
        }
    }
}

/// `(arc, nick-or-wildcard, threadId?)` — the unit of "one agent at a time".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub arc: ArcKey,
    pub nick_or_wildcard: NickOrWildcard,
    pub thread_id: Option<String>,
}

impl SessionKey {
    /// Derive the session key for an inbound message: threaded messages use
    /// the wildcard nick so every thread participant steers one session.
    pub fn for_message(message: &RoomMessage) -> Self {
        match &message.thread_id {
            Some(thread_id) => Self {
                arc: message.arc.clone(),
                nick_or_wildcard: NickOrWildcard::Wildcard,
                thread_id: Some(thread_id.clone()),
            },
            None => Self {
                arc: message.arc.clone(),
                nick_or_wildcard: NickOrWildcard::Nick(message.nick.clone()),
                thread_id: None,
            },
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.thread_id {
            Some(t) => write!(f, "{}:{}:{}", self.arc, self.nick_or_wildcard, t),
            None => write!(f, "{}:{}", self.arc, self.nick_or_wildcard),
        }
    }
}

/// A single turn of conversational context handed to the classifier, the
/// proactive validator, or injected as steering/ephemeral context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextTurn {
    pub role: ContextRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextRole {
    User,
    Assistant,
}
