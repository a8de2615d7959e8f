//! OPEN -> CLOSING -> ARCHIVED.

use std::sync::Arc;

use chrono::Utc;

use crate::{
    access::OperatorPolicy,
    audit::{AuditEvent, AuditLogger},
    commands::TicketCommand,
    domain::{Actor, ArchivedTicket, ChannelId, Initiator, Ticket, TicketId, TicketState},
    errors::Error,
    kinds,
    ports::{Button, ButtonStyle, ChatPlatform, OutgoingMessage},
    provisioner::ThreadProvisioner,
    registry::TicketRegistry,
    retry::with_retry,
    transcript::{format_record, FormattedTranscript, TranscriptRecord, TranscriptStore},
    Result,
};

/// Reason recorded when the monitor closes a ticket.
pub const AUTO_CLOSE_REASON: &str = "owner inactivity";
/// Reason recorded when startup finishes a close a crash interrupted.
pub const RESUMED_CLOSE_REASON: &str = "close resumed after restart";
pub const DEFAULT_CLOSE_REASON: &str = "no reason given";

/// Who asked for the close.
#[derive(Clone, Debug)]
pub enum CloseBy {
    /// Auto-close and startup recovery. Always authorized.
    System,
    User(Actor),
}

impl CloseBy {
    pub fn initiator(&self) -> Initiator {
        match self {
            CloseBy::System => Initiator::System,
            CloseBy::User(actor) => Initiator::User {
                member: actor.member.clone(),
            },
        }
    }
}

pub struct CloseWorkflow {
    platform: Arc<dyn ChatPlatform>,
    registry: Arc<TicketRegistry>,
    transcripts: Arc<TranscriptStore>,
    provisioner: Arc<ThreadProvisioner>,
    policy: OperatorPolicy,
    audit: Arc<AuditLogger>,
    audit_channel: ChannelId,
}

impl CloseWorkflow {
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        registry: Arc<TicketRegistry>,
        transcripts: Arc<TranscriptStore>,
        provisioner: Arc<ThreadProvisioner>,
        policy: OperatorPolicy,
        audit: Arc<AuditLogger>,
        audit_channel: ChannelId,
    ) -> Self {
        Self {
            platform,
            registry,
            transcripts,
            provisioner,
            policy,
            audit,
            audit_channel,
        }
    }

    /// Close a ticket and return its archive.
    ///
    /// Holds the ticket's lifecycle lock for the whole sequence. A close that
    /// arrives while another is running waits, then returns the stored archive.
    pub async fn close(&self, id: TicketId, by: CloseBy, reason: &str) -> Result<ArchivedTicket> {
        let out = self.close_locked(id, by, reason).await;
        if out.is_ok() {
            self.registry.release_lifecycle_lock(id).await;
        }
        out
    }

    async fn close_locked(&self, id: TicketId, by: CloseBy, reason: &str) -> Result<ArchivedTicket> {
        let _guard = self.registry.lifecycle_lock(id).await;

        let ticket = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| Error::NotFound(format!("ticket {id}")))?;

        if ticket.state == TicketState::Archived {
            tracing::debug!("ticket {id} already archived");
            return ticket
                .archive
                .ok_or_else(|| Error::NotFound(format!("archive for ticket {id}")));
        }

        if let CloseBy::User(actor) = &by {
            if !self.policy.may_close(actor, &ticket) {
                tracing::warn!("user {} may not close ticket {id}", actor.member.id);
                self.audit
                    .record(AuditEvent::close_denied(&ticket, &actor.member));
                return Err(Error::Authorization(format!(
                    "user {} may not close ticket {id}",
                    actor.member.id
                )));
            }
        }

        let reason = match reason.trim() {
            "" => DEFAULT_CLOSE_REASON,
            r => r,
        };
        let initiator = by.initiator();

        let ticket = self
            .registry
            .update(id, |t| {
                t.state = TicketState::Closing;
                t.absent_since = None;
            })
            .await?;
        tracing::info!("closing ticket {id} ({}): {reason}", initiator.display());

        let mut warnings = Vec::new();

        let record = match with_retry("capture transcript", || self.transcripts.capture(&ticket)).await
        {
            Ok(r) => Some(r),
            Err(e) => {
                tracing::warn!("ticket {id}: {e}");
                warnings.push(format!("transcript unavailable: {e}"));
                None
            }
        };

        let summary = closure_summary(&ticket, &initiator, reason, record.as_ref());
        let mut post = OutgoingMessage::text(summary);
        if let Some(rec) = &record {
            let formatted = FormattedTranscript {
                ticket_id: id,
                text: format_record(rec),
            };
            post = post.with_file(formatted.attachment()).with_button(Button {
                label: "Transcript".to_string(),
                style: ButtonStyle::Secondary,
                command: TicketCommand::Transcript { ticket: id },
            });
        }
        if let Err(e) = with_retry("post audit summary", || {
            self.platform.send_message(self.audit_channel, post.clone())
        })
        .await
        {
            tracing::warn!("ticket {id}: audit post failed: {e}");
            warnings.push(format!("audit post failed: {e}"));
        }

        if let Err(e) = with_retry("retire channel", || self.provisioner.retire(id)).await {
            tracing::warn!("ticket {id}: could not retire channel: {e}");
            warnings.push(format!("channel not retired: {e}"));
        }

        let mut archive = ArchivedTicket {
            ticket_id: id,
            kind: ticket.kind,
            requester: ticket.requester.clone(),
            opened_at: ticket.created_at,
            closed_by: initiator.clone(),
            reason: reason.to_string(),
            closed_at: Utc::now(),
            transcript: record.as_ref().map(TranscriptRecord::summary),
            warnings,
        };

        let stored = archive.clone();
        match self
            .registry
            .update(id, move |t| {
                t.state = TicketState::Archived;
                t.archive = Some(stored);
            })
            .await
        {
            Ok(_) => {}
            Err(Error::NotFound(what)) => return Err(Error::NotFound(what)),
            Err(e) => {
                tracing::error!("ticket {id}: archive not persisted: {e}");
                archive.warnings.push(format!("archive not persisted: {e}"));
                // The transition is already in memory; this adds the warning to it.
                let stored = archive.clone();
                if let Err(e) = self
                    .registry
                    .update(id, move |t| t.archive = Some(stored))
                    .await
                {
                    tracing::debug!("ticket {id}: archive still not persisted: {e}");
                }
            }
        }

        self.audit.record(AuditEvent::closed(
            &ticket,
            &initiator,
            reason,
            &archive.warnings,
        ));
        if archive.warnings.is_empty() {
            tracing::info!("archived ticket {id}");
        } else {
            tracing::warn!(
                "archived ticket {id} with {} warning(s)",
                archive.warnings.len()
            );
        }
        Ok(archive)
    }
}

fn closure_summary(
    ticket: &Ticket,
    initiator: &Initiator,
    reason: &str,
    record: Option<&TranscriptRecord>,
) -> String {
    let messages = match record {
        Some(r) => format!("{} message(s)", r.entries.len()),
        None => "transcript unavailable".to_string(),
    };
    format!(
        "📁 **Ticket {} closed**\n\
         **Kind:** {}\n\
         **Opened by:** {} ({})\n\
         **Closed by:** {}\n\
         **Opened at:** {}\n\
         **Reason:** {}\n\
         **Transcript:** {}",
        ticket.id,
        kinds::spec(ticket.kind).title,
        ticket.requester.name,
        ticket.requester.id,
        initiator.display(),
        ticket.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
        reason,
        messages,
    )
}
