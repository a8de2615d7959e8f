use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::{
    domain::{ChannelId, GuildId, Member},
    errors::Error,
    ports::{ChannelRequest, ChatPlatform},
    registry::TicketRegistry,
    Result,
};

const MAX_CHANNEL_NAME: usize = 100;

/// Creates and retires the per-ticket channels.
///
/// Whether a ticket's channel is retired is read from and written to the
/// ticket record, so it holds across restarts.
pub struct ThreadProvisioner {
    platform: Arc<dyn ChatPlatform>,
    registry: Arc<TicketRegistry>,
}

impl ThreadProvisioner {
    pub fn new(platform: Arc<dyn ChatPlatform>, registry: Arc<TicketRegistry>) -> Self {
        Self { platform, registry }
    }

    /// Create a channel visible to `requester`, the bot and operators.
    ///
    /// Every failure surfaces as [`Error::Provision`]; nothing is recorded here on failure.
    pub async fn open(&self, guild: GuildId, requester: &Member, name_prefix: &str) -> Result<ChannelId> {
        let name = channel_name(name_prefix, &requester.name);
        let req = ChannelRequest {
            guild,
            name: name.clone(),
            requester: requester.id,
        };
        match self.platform.create_private_channel(req).await {
            Ok(channel) => {
                tracing::info!("provisioned channel {channel} ({name}) for {}", requester.id);
                Ok(channel)
            }
            Err(Error::Provision(msg)) => Err(Error::Provision(msg)),
            Err(Error::Platform { message, .. }) => Err(Error::Provision(message)),
            Err(other) => Err(Error::Provision(other.to_string())),
        }
    }

    /// Archive + lock the channel. Retiring twice is a no-op.
    pub async fn retire(&self, channel: ChannelId) -> Result<()> {
        if self
            .registry
            .get(channel)
            .await
            .is_some_and(|t| t.retired)
        {
            tracing::debug!("channel {channel} already retired");
            return Ok(());
        }
        self.platform.retire_channel(channel).await?;
        tracing::info!("retired channel {channel}");

        match self.registry.update(channel, |t| t.retired = true).await {
            Ok(_) | Err(Error::NotFound(_)) => {}
            // The flag is set in memory; the archive step reports the failed write.
            Err(e) => tracing::warn!("could not record retirement of {channel}: {e}"),
        }
        Ok(())
    }
}

fn slug_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("valid regex"))
}

/// `<prefix>-<slugged name>`, lowercase ASCII, at most 100 chars.
pub fn channel_name(prefix: &str, requester_name: &str) -> String {
    let lower = requester_name.to_lowercase();
    let slug = slug_re().replace_all(&lower, "-");
    let slug = slug.trim_matches('-');
    let slug = if slug.is_empty() { "user" } else { slug };
    let mut name = format!("{prefix}-{slug}");
    name.truncate(MAX_CHANNEL_NAME);
    name.trim_end_matches('-').to_string()
}
