//! Discord adapter (serenity).
//!
//! This crate implements the `helpdesk-core` ChatPlatform port over the Discord
//! REST API and routes gateway events into the core's `TicketService`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use serenity::all::{
    AutoArchiveDuration, ButtonStyle as DiscordButtonStyle, ChannelId as DiscordChannelId,
    ChannelType, CreateActionRow, CreateAttachment, CreateButton, CreateMessage, CreateThread,
    EditThread, GetMessages, Http, HttpError, Message, MessageId, UserId as DiscordUserId,
};

pub mod commands;
pub mod router;

use helpdesk_core::{
    domain::{ChannelId, Member, UserId},
    errors::Error,
    ports::{Button, ButtonStyle, ChannelRequest, ChatPlatform, HistoryMessage, OutgoingMessage},
    Result,
};

/// Discord caps message content at this many characters.
pub const MAX_MESSAGE_LEN: usize = 2000;
const HISTORY_PAGE: u8 = 100;

#[derive(Clone)]
pub struct DiscordPlatform {
    http: Arc<Http>,
    ticket_parent: DiscordChannelId,
}

impl DiscordPlatform {
    pub fn new(http: Arc<Http>, ticket_parent: ChannelId) -> Self {
        Self {
            http,
            ticket_parent: Self::dc_channel(ticket_parent),
        }
    }

    fn http(&self) -> &Http {
        &self.http
    }

    fn dc_channel(channel: ChannelId) -> DiscordChannelId {
        DiscordChannelId::new(channel.0)
    }

    fn dc_user(user: UserId) -> DiscordUserId {
        DiscordUserId::new(user.0)
    }

    fn map_err(e: serenity::Error) -> Error {
        let retryable = match &e {
            serenity::Error::Http(http) => http_retryable(http),
            serenity::Error::Io(_) => true,
            _ => false,
        };
        Error::platform(format!("discord error: {e}"), retryable)
    }

    fn history_message(msg: Message) -> HistoryMessage {
        let name = msg
            .author
            .global_name
            .clone()
            .unwrap_or_else(|| msg.author.name.clone());
        let timestamp = DateTime::<Utc>::from_timestamp(msg.timestamp.unix_timestamp(), 0)
            .unwrap_or_else(Utc::now);
        let embed_summaries = msg
            .embeds
            .iter()
            .filter_map(|e| {
                let parts: Vec<&str> = [e.title.as_deref(), e.description.as_deref()]
                    .into_iter()
                    .flatten()
                    .filter(|s| !s.trim().is_empty())
                    .collect();
                (!parts.is_empty()).then(|| parts.join(" - "))
            })
            .collect();
        HistoryMessage {
            author: Member::new(msg.author.id.get(), name),
            content: msg.content,
            timestamp,
            attachment_urls: msg.attachments.into_iter().map(|a| a.url).collect(),
            embed_summaries,
        }
    }
}

fn http_retryable(e: &HttpError) -> bool {
    match e {
        HttpError::Request(_) => true,
        other => other
            .status_code()
            .map(|s| s.as_u16() == 429 || s.is_server_error())
            .unwrap_or(false),
    }
}

fn dc_button(b: &Button) -> CreateButton {
    let style = match b.style {
        ButtonStyle::Secondary => DiscordButtonStyle::Secondary,
        ButtonStyle::Danger => DiscordButtonStyle::Danger,
    };
    CreateButton::new(b.command.encode())
        .label(b.label.clone())
        .style(style)
}

/// Cut `s` to Discord's message limit on a char boundary.
pub fn clamp_message(s: &str) -> String {
    if s.chars().count() <= MAX_MESSAGE_LEN {
        return s.to_string();
    }
    let mut out: String = s.chars().take(MAX_MESSAGE_LEN - 1).collect();
    out.push('…');
    out
}

#[async_trait]
impl ChatPlatform for DiscordPlatform {
    async fn create_private_channel(&self, req: ChannelRequest) -> Result<ChannelId> {
        let thread = self
            .ticket_parent
            .create_thread(
                self.http(),
                CreateThread::new(req.name.clone())
                    .kind(ChannelType::PrivateThread)
                    .invitable(false)
                    .auto_archive_duration(AutoArchiveDuration::OneWeek),
            )
            .await
            .map_err(Self::map_err)?;

        if let Err(e) = thread
            .id
            .add_thread_member(self.http(), Self::dc_user(req.requester))
            .await
        {
            // Do not leave a thread behind that the requester cannot see.
            if let Err(del) = thread.id.delete(self.http()).await {
                tracing::error!("could not delete half-created thread {}: {del}", thread.id);
            }
            return Err(Self::map_err(e));
        }

        Ok(ChannelId(thread.id.get()))
    }

    async fn retire_channel(&self, channel: ChannelId) -> Result<()> {
        let ch = Self::dc_channel(channel);
        // Discord rejects edits to an archived thread unless they unarchive it.
        let current = ch.to_channel(self.http()).await.map_err(Self::map_err)?;
        let meta = current.guild().and_then(|g| g.thread_metadata);
        if meta.is_some_and(|m| m.archived && m.locked) {
            tracing::debug!("thread {channel} is already archived and locked");
            return Ok(());
        }
        ch.edit_thread(self.http(), EditThread::new().archived(true).locked(true))
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn send_message(&self, channel: ChannelId, msg: OutgoingMessage) -> Result<()> {
        let mut builder = CreateMessage::new().content(clamp_message(&msg.content));
        if !msg.buttons.is_empty() {
            let buttons = msg.buttons.iter().map(dc_button).collect();
            builder = builder.components(vec![CreateActionRow::Buttons(buttons)]);
        }
        for file in msg.files {
            builder = builder.add_file(CreateAttachment::bytes(file.bytes, file.filename));
        }

        Self::dc_channel(channel)
            .send_message(self.http(), builder)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn fetch_history(&self, channel: ChannelId) -> Result<Vec<HistoryMessage>> {
        let ch = Self::dc_channel(channel);
        let mut all: Vec<Message> = Vec::new();
        let mut cursor = MessageId::new(1);
        loop {
            let page = ch
                .messages(self.http(), GetMessages::new().after(cursor).limit(HISTORY_PAGE))
                .await
                .map_err(Self::map_err)?;
            let full = page.len() == HISTORY_PAGE as usize;
            let Some(newest) = page.iter().map(|m| m.id).max() else {
                break;
            };
            cursor = newest;
            all.extend(page);
            if !full {
                break;
            }
        }
        all.sort_by_key(|m| m.id);
        tracing::debug!("fetched {} message(s) from {channel}", all.len());
        Ok(all.into_iter().map(Self::history_message).collect())
    }

    async fn is_member(&self, channel: ChannelId, user: UserId) -> Result<bool> {
        let members = Self::dc_channel(channel)
            .get_thread_members(self.http())
            .await
            .map_err(Self::map_err)?;
        Ok(members.iter().any(|m| m.user_id.get() == user.0))
    }
}
