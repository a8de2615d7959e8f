//! Command façade used by platform adapters.
//!
//! Adapters turn platform events into explicit calls here (or into a
//! [`TicketCommand`] for [`TicketService::dispatch`]) and render the returned
//! [`Reply`]. No platform state lives in this layer.

use std::sync::Arc;

use crate::{
    access::OperatorPolicy,
    audit::{AuditEvent, AuditLogger},
    close::{CloseBy, CloseWorkflow, DEFAULT_CLOSE_REASON, RESUMED_CLOSE_REASON},
    commands::TicketCommand,
    config::Config,
    domain::{Actor, ArchivedTicket, ChannelId, GuildId, Ticket, TicketId, TicketKind, UserId},
    errors::Error,
    intake::TicketIntake,
    kinds::{self, Fields},
    monitor::AutoCloseMonitor,
    ports::{ChatPlatform, FileAttachment, SettingsStore},
    provisioner::ThreadProvisioner,
    registry::TicketRegistry,
    settings::JsonSettingsStore,
    transcript::{FormattedTranscript, TranscriptStore},
    Result,
};

/// What an adapter should show the user in response to a command.
#[derive(Clone, Debug)]
pub enum Reply {
    Text(String),
    File { text: String, file: FileAttachment },
}

impl Reply {
    fn error(e: &Error) -> Self {
        Reply::Text(e.user_message())
    }
}

/// Counts reported by [`TicketService::startup`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StartupReport {
    pub rearmed: usize,
    pub resumed: usize,
}

pub struct TicketService {
    policy: OperatorPolicy,
    registry: Arc<TicketRegistry>,
    transcripts: Arc<TranscriptStore>,
    settings: Arc<dyn SettingsStore>,
    audit: Arc<AuditLogger>,
    intake: TicketIntake,
    closer: Arc<CloseWorkflow>,
    monitor: AutoCloseMonitor,
}

/// Durable stores a [`TicketService`] is built on.
pub struct Stores {
    pub registry: Arc<TicketRegistry>,
    pub transcripts: Arc<TranscriptStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub audit: Arc<AuditLogger>,
}

impl TicketService {
    /// Load every store from the configured data directory.
    pub fn from_config(cfg: &Config, platform: Arc<dyn ChatPlatform>) -> Result<Self> {
        let stores = Stores {
            registry: Arc::new(TicketRegistry::load(cfg.registry_file())?),
            transcripts: Arc::new(TranscriptStore::new(platform.clone(), cfg.transcript_dir())?),
            settings: Arc::new(JsonSettingsStore::load(&cfg.settings_file)?),
            audit: Arc::new(AuditLogger::new(&cfg.audit_log_path, cfg.audit_log_json)),
        };
        Ok(Self::new(
            platform,
            stores,
            OperatorPolicy::from_config(cfg),
            cfg.audit_channel,
            cfg.auto_close_grace,
        ))
    }

    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        stores: Stores,
        policy: OperatorPolicy,
        audit_channel: ChannelId,
        grace: std::time::Duration,
    ) -> Self {
        let Stores {
            registry,
            transcripts,
            settings,
            audit,
        } = stores;
        let provisioner = Arc::new(ThreadProvisioner::new(platform.clone(), registry.clone()));
        let intake = TicketIntake::new(
            platform.clone(),
            provisioner.clone(),
            registry.clone(),
            settings.clone(),
            audit.clone(),
        );
        let closer = Arc::new(CloseWorkflow::new(
            platform.clone(),
            registry.clone(),
            transcripts.clone(),
            provisioner,
            policy.clone(),
            audit.clone(),
            audit_channel,
        ));
        let monitor = AutoCloseMonitor::new(
            platform,
            registry.clone(),
            closer.clone(),
            audit.clone(),
            grace,
        );
        Self {
            policy,
            registry,
            transcripts,
            settings,
            audit,
            intake,
            closer,
            monitor,
        }
    }

    /// Re-arm persisted auto-close watches and finish closes a crash interrupted.
    pub async fn startup(&self) -> StartupReport {
        let rearmed = self.monitor.rearm().await;
        let interrupted = self.registry.interrupted_closes().await;
        let resumed = interrupted.len();
        for ticket in interrupted {
            tracing::warn!("resuming interrupted close of ticket {}", ticket.id);
            let closer = self.closer.clone();
            tokio::spawn(async move {
                if let Err(e) = closer
                    .close(ticket.id, CloseBy::System, RESUMED_CLOSE_REASON)
                    .await
                {
                    tracing::error!("resumed close of {} failed: {e}", ticket.id);
                }
            });
        }
        StartupReport { rearmed, resumed }
    }

    pub fn shutdown(&self) {
        self.monitor.stop();
    }

    pub async fn submit(
        &self,
        guild: GuildId,
        kind: TicketKind,
        actor: &Actor,
        fields: &Fields,
    ) -> Result<Ticket> {
        self.intake
            .submit(guild, kind, actor.member.clone(), fields)
            .await
    }

    /// Close in a task of its own so the sequence finishes even if the caller goes away.
    pub async fn close(&self, id: TicketId, by: CloseBy, reason: &str) -> Result<ArchivedTicket> {
        let closer = self.closer.clone();
        let reason = reason.to_string();
        tokio::spawn(async move { closer.close(id, by, &reason).await })
            .await
            .map_err(|e| Error::Task(format!("close of {id}: {e}")))?
    }

    /// Operators only.
    pub async fn transcript(&self, actor: &Actor, id: TicketId) -> Result<FormattedTranscript> {
        if !self.policy.is_operator(actor) {
            return Err(Error::Authorization(format!(
                "user {} may not read transcripts",
                actor.member.id
            )));
        }
        self.transcripts.retrieve(id).await
    }

    /// Operators only.
    pub async fn set_setting(
        &self,
        actor: &Actor,
        guild: GuildId,
        name: &str,
        text: &str,
    ) -> Result<()> {
        if !self.policy.is_operator(actor) {
            return Err(Error::Authorization(format!(
                "user {} may not change settings",
                actor.member.id
            )));
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Validation {
                field: "name".to_string(),
            });
        }
        if text.trim().is_empty() {
            return Err(Error::Validation {
                field: "text".to_string(),
            });
        }
        self.settings.set(guild, name, text).await?;
        tracing::info!("setting {guild}/{name} updated by {}", actor.member.id);
        Ok(())
    }

    /// Run a command carried by a button and render the outcome.
    pub async fn dispatch(&self, cmd: TicketCommand, actor: &Actor) -> Reply {
        tracing::debug!("dispatch {} from {}", cmd.encode(), actor.member.id);
        match cmd {
            TicketCommand::Close { ticket } => {
                self.close_reply(ticket, actor, DEFAULT_CLOSE_REASON).await
            }
            TicketCommand::Transcript { ticket } => match self.transcript(actor, ticket).await {
                Ok(t) => Reply::File {
                    text: format!("📄 Transcript for ticket {ticket}"),
                    file: t.attachment(),
                },
                Err(e) => self.failed(Some(ticket), &e, "transcript"),
            },
        }
    }

    /// Modal submission for `kind`.
    pub async fn submit_reply(
        &self,
        guild: GuildId,
        kind: TicketKind,
        actor: &Actor,
        fields: &Fields,
    ) -> Reply {
        match self.submit(guild, kind, actor, fields).await {
            Ok(t) => Reply::Text(format!(
                "✅ Your {} ticket is open: <#{}>",
                kinds::spec(kind).title.to_lowercase(),
                t.id
            )),
            Err(e) => self.failed(None, &e, "intake"),
        }
    }

    pub async fn close_reply(&self, ticket: TicketId, actor: &Actor, reason: &str) -> Reply {
        match self.close(ticket, CloseBy::User(actor.clone()), reason).await {
            Ok(a) if a.warnings.is_empty() => {
                Reply::Text(format!("🔒 Ticket closed. Reason: {}", a.reason))
            }
            Ok(a) => Reply::Text(format!(
                "🔒 Ticket closed with {} warning(s): {}",
                a.warnings.len(),
                a.warnings.join("; ")
            )),
            Err(e) => self.failed(Some(ticket), &e, "close"),
        }
    }

    pub async fn setting_reply(&self, actor: &Actor, guild: GuildId, name: &str, text: &str) -> Reply {
        match self.set_setting(actor, guild, name, text).await {
            Ok(()) => Reply::Text(format!("✅ Setting `{}` saved.", name.trim())),
            Err(e) => self.failed(None, &e, "setting"),
        }
    }

    pub async fn on_member_left(&self, channel: ChannelId, user: UserId) {
        self.monitor.on_member_left(channel, user).await;
    }

    pub async fn on_member_joined(&self, channel: ChannelId, user: UserId) {
        self.monitor.on_member_joined(channel, user).await;
    }

    pub async fn on_guild_departure(&self, guild: GuildId, user: UserId) {
        self.monitor.on_guild_departure(guild, user).await;
    }

    fn failed(&self, ticket: Option<TicketId>, e: &Error, context: &str) -> Reply {
        match e {
            Error::Validation { .. } | Error::Authorization(_) | Error::NotFound(_) => {
                tracing::debug!("{context} rejected: {e}");
            }
            _ => {
                tracing::error!("{context} failed: {e}");
                self.audit
                    .record(AuditEvent::error(ticket, &e.to_string(), Some(context)));
            }
        }
        Reply::error(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Member, RoleId, TicketState};
    use crate::testing::{sample_ticket, temp_dir, FakePlatform, AUDIT_CHANNEL, OPERATOR};
    use std::time::Duration;

    struct Setup {
        platform: Arc<FakePlatform>,
        registry: Arc<TicketRegistry>,
        service: TicketService,
    }

    fn setup(name: &str) -> Setup {
        let dir = temp_dir(name);
        let platform = Arc::new(FakePlatform::default());
        let registry = Arc::new(TicketRegistry::load(dir.join("tickets.json")).unwrap());
        let stores = Stores {
            registry: registry.clone(),
            transcripts: Arc::new(
                TranscriptStore::new(platform.clone(), dir.join("transcripts")).unwrap(),
            ),
            settings: Arc::new(JsonSettingsStore::load(dir.join("settings.json")).unwrap()),
            audit: Arc::new(AuditLogger::new(dir.join("audit.log"), true)),
        };
        let policy = OperatorPolicy {
            operator_users: vec![],
            operator_roles: vec![RoleId(900)],
        };
        let service = TicketService::new(
            platform.clone(),
            stores,
            policy,
            AUDIT_CHANNEL,
            Duration::from_secs(60),
        );
        Setup {
            platform,
            registry,
            service,
        }
    }

    fn actor(id: u64, roles: &[u64]) -> Actor {
        Actor {
            member: Member::new(id, format!("user{id}")),
            roles: roles.iter().copied().map(RoleId).collect(),
        }
    }

    fn operator() -> Actor {
        actor(OPERATOR, &[900])
    }

    fn help_fields() -> Fields {
        [("topic".to_string(), "login broken".to_string())]
            .into_iter()
            .collect()
    }

    #[tokio::test]
    async fn submit_then_close_button_archives() {
        let s = setup("service-flow");
        let owner = actor(5, &[]);
        let reply = s
            .service
            .submit_reply(GuildId(1), TicketKind::Help, &owner, &help_fields())
            .await;
        let Reply::Text(text) = reply else {
            panic!("expected text reply");
        };
        assert!(text.contains("<#1000>"));

        let id = ChannelId(1000);
        let cmd = s.platform.sent_to(id)[0].buttons[0].command.clone();
        let reply = s.service.dispatch(cmd, &owner).await;
        assert!(matches!(reply, Reply::Text(ref t) if t.contains("Ticket closed")));
        assert_eq!(s.registry.get(id).await.unwrap().state, TicketState::Archived);
    }

    #[tokio::test]
    async fn invalid_intake_reply_names_the_field() {
        let s = setup("service-invalid");
        let reply = s
            .service
            .submit_reply(GuildId(1), TicketKind::Help, &actor(5, &[]), &Fields::new())
            .await;
        assert!(matches!(reply, Reply::Text(ref t) if t.contains("topic")));
        assert!(s.platform.created().is_empty());
    }

    #[tokio::test]
    async fn transcripts_are_for_operators_only() {
        let s = setup("service-transcript");
        let t = sample_ticket(300, 5);
        s.registry.insert(t.clone()).await.unwrap();
        s.platform.post(t.id, &t.requester, "hello there");
        s.service
            .close(t.id, CloseBy::User(operator()), "resolved")
            .await
            .unwrap();

        let err = s.service.transcript(&actor(5, &[]), t.id).await.unwrap_err();
        assert!(matches!(err, Error::Authorization(_)));

        let reply = s
            .service
            .dispatch(TicketCommand::Transcript { ticket: t.id }, &operator())
            .await;
        let Reply::File { file, .. } = reply else {
            panic!("expected file reply");
        };
        assert!(String::from_utf8(file.bytes).unwrap().contains("hello there"));
    }

    #[tokio::test]
    async fn settings_are_operator_only_and_feed_the_intro() {
        let s = setup("service-settings");
        let err = s
            .service
            .set_setting(&actor(5, &[]), GuildId(1), "help", "Read the FAQ first")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Authorization(_)));

        let reply = s
            .service
            .setting_reply(&operator(), GuildId(1), "help", "Read the FAQ first")
            .await;
        assert!(matches!(reply, Reply::Text(ref t) if t.contains("saved")));

        let ticket = s
            .service
            .submit(GuildId(1), TicketKind::Help, &actor(5, &[]), &help_fields())
            .await
            .unwrap();
        assert!(s.platform.sent_to(ticket.id)[0]
            .content
            .contains("Read the FAQ first"));
    }

    #[tokio::test]
    async fn close_outside_a_ticket_is_not_found() {
        let s = setup("service-notfound");
        let reply = s
            .service
            .close_reply(ChannelId(42), &operator(), "x")
            .await;
        assert!(matches!(reply, Reply::Text(ref t) if t.contains("Not found")));
    }

    #[tokio::test(start_paused = true)]
    async fn startup_resumes_interrupted_closes_and_rearms_watches() {
        let s = setup("service-startup");
        let mut closing = sample_ticket(310, 5);
        closing.state = TicketState::Closing;
        s.registry.insert(closing.clone()).await.unwrap();

        let mut watched = sample_ticket(311, 6);
        watched.absent_since = Some(chrono::Utc::now());
        s.registry.insert(watched.clone()).await.unwrap();

        let report = s.service.startup().await;
        assert_eq!(
            report,
            StartupReport {
                rearmed: 1,
                resumed: 1
            }
        );

        for _ in 0..50 {
            if s.registry.get(closing.id).await.unwrap().state == TicketState::Archived {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            s.registry.get(closing.id).await.unwrap().state,
            TicketState::Archived
        );
        assert_eq!(s.registry.get(watched.id).await.unwrap().state, TicketState::Open);
        s.service.shutdown();
    }
}
