use std::sync::Arc;

use chrono::Utc;

use crate::{
    audit::{AuditEvent, AuditLogger},
    commands::TicketCommand,
    domain::{GuildId, Member, Ticket, TicketKind, TicketState},
    errors::Error,
    kinds::{self, Fields},
    ports::{Button, ButtonStyle, ChatPlatform, OutgoingMessage, SettingsStore},
    provisioner::ThreadProvisioner,
    registry::TicketRegistry,
    retry::with_retry,
    Result,
};

/// Validates intake forms and opens tickets.
pub struct TicketIntake {
    platform: Arc<dyn ChatPlatform>,
    provisioner: Arc<ThreadProvisioner>,
    registry: Arc<TicketRegistry>,
    settings: Arc<dyn SettingsStore>,
    audit: Arc<AuditLogger>,
}

impl TicketIntake {
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        provisioner: Arc<ThreadProvisioner>,
        registry: Arc<TicketRegistry>,
        settings: Arc<dyn SettingsStore>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            platform,
            provisioner,
            registry,
            settings,
            audit,
        }
    }

    /// Open a new ticket of `kind` for `requester`.
    ///
    /// Validation happens before any platform call. Every successful submission
    /// gets its own channel, even if the requester already has open tickets.
    pub async fn submit(
        &self,
        guild: GuildId,
        kind: TicketKind,
        requester: Member,
        fields: &Fields,
    ) -> Result<Ticket> {
        let spec = kinds::spec(kind);
        let fields = match spec.validate(fields) {
            Ok(f) => f,
            Err(e) => {
                self.audit
                    .record(AuditEvent::intake_rejected(&requester, spec.name, &e.to_string()));
                return Err(e);
            }
        };

        let channel = match self
            .provisioner
            .open(guild, &requester, spec.channel_prefix)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                tracing::error!("intake for {} failed to provision: {e}", requester.id);
                self.audit
                    .record(AuditEvent::intake_rejected(&requester, spec.name, &e.to_string()));
                return Err(e);
            }
        };

        let ticket = Ticket {
            id: channel,
            guild,
            kind,
            requester,
            created_at: Utc::now(),
            state: TicketState::Open,
            fields,
            absent_since: None,
            retired: false,
            archive: None,
        };
        if let Err(e) = self.registry.insert(ticket.clone()).await {
            tracing::error!("ticket {channel} could not be recorded, retiring it: {e}");
            if let Err(retire) = self.provisioner.retire(channel).await {
                tracing::error!("could not retire unrecorded channel {channel}: {retire}");
            }
            let err = Error::Provision(format!("ticket not recorded: {e}"));
            self.audit.record(AuditEvent::intake_rejected(
                &ticket.requester,
                spec.name,
                &err.to_string(),
            ));
            return Err(err);
        }
        self.audit.record(AuditEvent::opened(&ticket));
        tracing::info!(
            "opened {} ticket {} for {}",
            spec.name,
            ticket.id,
            ticket.requester.id
        );

        let setting = match self.settings.get(guild, spec.setting).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("settings lookup {}/{} failed: {e}", guild, spec.setting);
                None
            }
        };
        let intro = spec.render_intro(&ticket.requester, &ticket.fields, setting.as_deref());
        let msg = OutgoingMessage::text(intro).with_button(Button {
            label: "Close ticket".to_string(),
            style: ButtonStyle::Danger,
            command: TicketCommand::Close { ticket: ticket.id },
        });

        if let Err(e) = with_retry("post intro", || {
            self.platform.send_message(ticket.id, msg.clone())
        })
        .await
        {
            tracing::warn!("could not post intro into {}: {e}", ticket.id);
        }

        Ok(ticket)
    }
}
