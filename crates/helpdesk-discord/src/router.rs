use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context as _;
use serenity::all::{
    Command, CommandInteraction, ComponentInteraction, Context, CreateAttachment,
    CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse,
    GatewayIntents, GuildId as DiscordGuildId, Http, Interaction, Member as DiscordMember,
    ModalInteraction, Ready, ThreadMembersUpdateEvent, User,
};
use serenity::async_trait;
use serenity::prelude::EventHandler;
use serenity::Client;

use helpdesk_core::{
    commands::{parse_intake_form, TicketCommand},
    config::Config,
    domain::{Actor, ChannelId, GuildId, Member, RoleId, UserId},
    kinds,
    ports::ChatPlatform,
    service::{Reply, TicketService},
};

use crate::commands::{self, string_option};
use crate::{clamp_message, DiscordPlatform};

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub service: Arc<TicketService>,
}

struct Handler {
    state: Arc<AppState>,
    started: AtomicBool,
}

pub async fn run(cfg: Arc<Config>) -> anyhow::Result<()> {
    let http = Arc::new(Http::new(&cfg.discord_token));
    let platform: Arc<dyn ChatPlatform> =
        Arc::new(DiscordPlatform::new(http, cfg.ticket_parent_channel));
    let service = Arc::new(TicketService::from_config(&cfg, platform)?);

    tracing::info!("data directory: {}", cfg.data_dir.display());
    tracing::info!(
        "operators: {} user(s), {} role(s)",
        cfg.operator_users.len(),
        cfg.operator_roles.len()
    );

    let state = Arc::new(AppState {
        cfg: cfg.clone(),
        service: service.clone(),
    });
    let handler = Handler {
        state,
        started: AtomicBool::new(false),
    };

    let intents = GatewayIntents::non_privileged()
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::MESSAGE_CONTENT;
    let mut client = Client::builder(&cfg.discord_token, intents)
        .event_handler(handler)
        .await
        .context("failed to build Discord gateway client")?;

    let result = client
        .start()
        .await
        .context("Discord gateway client stopped unexpectedly");
    service.shutdown();
    result
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        tracing::info!("connected as {} ({})", ready.user.name, ready.user.id);

        let cmds = commands::slash_commands();
        let registered = match self.state.cfg.command_guild {
            Some(g) => DiscordGuildId::new(g.0)
                .set_commands(&ctx.http, cmds)
                .await
                .map(|c| c.len()),
            None => Command::set_global_commands(&ctx.http, cmds)
                .await
                .map(|c| c.len()),
        };
        match registered {
            Ok(n) => tracing::info!("registered {n} slash command(s)"),
            Err(e) => tracing::error!("failed to register slash commands: {e}"),
        }

        // Gateway reconnects fire `ready` again.
        if !self.started.swap(true, Ordering::SeqCst) {
            let report = self.state.service.startup().await;
            tracing::info!(
                "startup: {} watch(es) re-armed, {} interrupted close(s) resumed",
                report.rearmed,
                report.resumed
            );
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let result = match interaction {
            Interaction::Command(cmd) => self.on_command(&ctx, cmd).await,
            Interaction::Component(c) => self.on_component(&ctx, c).await,
            Interaction::Modal(m) => self.on_modal(&ctx, m).await,
            _ => Ok(()),
        };
        if let Err(e) = result {
            tracing::error!("interaction failed: {e}");
        }
    }

    async fn thread_members_update(&self, _ctx: Context, update: ThreadMembersUpdateEvent) {
        let channel = ChannelId(update.id.get());
        for user in &update.removed_member_ids {
            tracing::debug!("member {user} left thread {channel}");
            self.state
                .service
                .on_member_left(channel, UserId(user.get()))
                .await;
        }
        for member in &update.added_members {
            tracing::debug!("member {} joined thread {channel}", member.user_id);
            self.state
                .service
                .on_member_joined(channel, UserId(member.user_id.get()))
                .await;
        }
    }

    async fn guild_member_removal(
        &self,
        _ctx: Context,
        guild_id: DiscordGuildId,
        user: User,
        _member: Option<DiscordMember>,
    ) {
        tracing::debug!("member {} left guild {guild_id}", user.id);
        self.state
            .service
            .on_guild_departure(GuildId(guild_id.get()), UserId(user.id.get()))
            .await;
    }
}

impl Handler {
    async fn on_command(&self, ctx: &Context, cmd: CommandInteraction) -> serenity::Result<()> {
        let service = &self.state.service;
        let actor = actor(&cmd.user, cmd.member.as_deref());
        tracing::debug!("/{} from {}", cmd.data.name, actor.member.id);

        match cmd.data.name.as_str() {
            commands::TICKET => {
                let spec = string_option(&cmd.data.options, "kind")
                    .and_then(|k| kinds::by_name(&k));
                let response = match spec {
                    Some(spec) => CreateInteractionResponse::Modal(commands::intake_modal(spec)),
                    None => ephemeral("❌ Unknown ticket kind."),
                };
                cmd.create_response(&ctx.http, response).await
            }
            commands::CLOSE => {
                cmd.defer_ephemeral(&ctx.http).await?;
                let reason = string_option(&cmd.data.options, "reason").unwrap_or_default();
                let reply = service
                    .close_reply(ChannelId(cmd.channel_id.get()), &actor, &reason)
                    .await;
                cmd.edit_response(&ctx.http, edit_for(reply)).await?;
                Ok(())
            }
            commands::TRANSCRIPT => {
                cmd.defer_ephemeral(&ctx.http).await?;
                let reply = match string_option(&cmd.data.options, "ticket")
                    .and_then(|s| parse_ticket_id(&s))
                {
                    Some(ticket) => {
                        service
                            .dispatch(TicketCommand::Transcript { ticket }, &actor)
                            .await
                    }
                    None => Reply::Text("❌ That is not a ticket id.".to_string()),
                };
                cmd.edit_response(&ctx.http, edit_for(reply)).await?;
                Ok(())
            }
            commands::SETTING => {
                let Some(guild) = cmd.guild_id else {
                    return cmd
                        .create_response(&ctx.http, ephemeral("❌ Settings are per server."))
                        .await;
                };
                cmd.defer_ephemeral(&ctx.http).await?;
                let name = string_option(&cmd.data.options, "name").unwrap_or_default();
                let text = string_option(&cmd.data.options, "text").unwrap_or_default();
                let reply = service
                    .setting_reply(&actor, GuildId(guild.get()), &name, &text)
                    .await;
                cmd.edit_response(&ctx.http, edit_for(reply)).await?;
                Ok(())
            }
            other => {
                tracing::debug!("ignoring unknown command /{other}");
                Ok(())
            }
        }
    }

    async fn on_component(&self, ctx: &Context, c: ComponentInteraction) -> serenity::Result<()> {
        let Some(command) = TicketCommand::parse(&c.data.custom_id) else {
            tracing::debug!("ignoring component {}", c.data.custom_id);
            return Ok(());
        };
        let actor = actor(&c.user, c.member.as_ref());
        c.defer_ephemeral(&ctx.http).await?;
        let reply = self.state.service.dispatch(command, &actor).await;
        c.edit_response(&ctx.http, edit_for(reply)).await?;
        Ok(())
    }

    async fn on_modal(&self, ctx: &Context, m: ModalInteraction) -> serenity::Result<()> {
        let Some(kind) = parse_intake_form(&m.data.custom_id) else {
            tracing::debug!("ignoring modal {}", m.data.custom_id);
            return Ok(());
        };
        let Some(guild) = m.guild_id else {
            return m
                .create_response(&ctx.http, ephemeral("❌ Tickets can only be opened in a server."))
                .await;
        };

        let actor = actor(&m.user, m.member.as_ref());
        m.defer_ephemeral(&ctx.http).await?;
        let fields = commands::modal_fields(&m.data);
        let reply = self
            .state
            .service
            .submit_reply(GuildId(guild.get()), kind, &actor, &fields)
            .await;
        m.edit_response(&ctx.http, edit_for(reply)).await?;
        Ok(())
    }
}

fn actor(user: &User, member: Option<&DiscordMember>) -> Actor {
    let name = member
        .and_then(|m| m.nick.clone())
        .or_else(|| user.global_name.clone())
        .unwrap_or_else(|| user.name.clone());
    let roles = member
        .map(|m| m.roles.iter().map(|r| RoleId(r.get())).collect())
        .unwrap_or_default();
    Actor {
        member: Member::new(user.id.get(), name),
        roles,
    }
}

fn ephemeral(text: &str) -> CreateInteractionResponse {
    CreateInteractionResponse::Message(
        CreateInteractionResponseMessage::new()
            .content(text)
            .ephemeral(true),
    )
}

fn edit_for(reply: Reply) -> EditInteractionResponse {
    match reply {
        Reply::Text(text) => EditInteractionResponse::new().content(clamp_message(&text)),
        Reply::File { text, file } => EditInteractionResponse::new()
            .content(clamp_message(&text))
            .new_attachment(CreateAttachment::bytes(file.bytes, file.filename)),
    }
}

/// Accepts a bare id or a channel mention.
fn parse_ticket_id(raw: &str) -> Option<ChannelId> {
    let s = raw.trim();
    let s = s
        .strip_prefix("<#")
        .and_then(|rest| rest.strip_suffix('>'))
        .unwrap_or(s);
    s.parse::<u64>().ok().filter(|id| *id != 0).map(ChannelId)
}
