use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    commands::TicketCommand,
    domain::{ChannelId, GuildId, Member, UserId},
    Result,
};

/// Request to create a channel only the requester, the bot and operators can see.
#[derive(Clone, Debug)]
pub struct ChannelRequest {
    pub guild: GuildId,
    pub name: String,
    pub requester: UserId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ButtonStyle {
    Secondary,
    Danger,
}

/// A clickable affordance. Clicking it delivers `command` back to the core.
#[derive(Clone, Debug)]
pub struct Button {
    pub label: String,
    pub style: ButtonStyle,
    pub command: TicketCommand,
}

#[derive(Clone, Debug)]
pub struct FileAttachment {
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug, Default)]
pub struct OutgoingMessage {
    pub content: String,
    pub buttons: Vec<Button>,
    pub files: Vec<FileAttachment>,
}

impl OutgoingMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_button(mut self, button: Button) -> Self {
        self.buttons.push(button);
        self
    }

    pub fn with_file(mut self, file: FileAttachment) -> Self {
        self.files.push(file);
        self
    }
}

/// One message read back from a channel's history.
#[derive(Clone, Debug)]
pub struct HistoryMessage {
    pub author: Member,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub attachment_urls: Vec<String>,
    pub embed_summaries: Vec<String>,
}

/// Hexagonal port for the hosting chat platform.
///
/// Discord is the first implementation. Methods map to single platform capabilities;
/// lifecycle decisions (retries, idempotence, ordering) stay in the core.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Create an isolated channel. Must not leave a half-created channel behind on error.
    async fn create_private_channel(&self, req: ChannelRequest) -> Result<ChannelId>;

    /// Archive and lock a channel so it becomes read-only.
    async fn retire_channel(&self, channel: ChannelId) -> Result<()>;

    async fn send_message(&self, channel: ChannelId, msg: OutgoingMessage) -> Result<()>;

    /// Full channel history, oldest first.
    async fn fetch_history(&self, channel: ChannelId) -> Result<Vec<HistoryMessage>>;

    /// Whether `user` is currently a member of `channel`.
    async fn is_member(&self, channel: ChannelId, user: UserId) -> Result<bool>;
}

/// Per-guild template text keyed by setting name.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, guild: GuildId, name: &str) -> Result<Option<String>>;
    async fn set(&self, guild: GuildId, name: &str, text: &str) -> Result<()>;
}
