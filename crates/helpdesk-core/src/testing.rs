//! In-memory platform double and fixtures shared by the unit tests.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use chrono::Utc;

use crate::{
    access::OperatorPolicy,
    audit::AuditLogger,
    close::CloseWorkflow,
    domain::{ChannelId, GuildId, Member, Ticket, TicketKind, TicketState, UserId},
    errors::Error,
    ports::{ChannelRequest, ChatPlatform, HistoryMessage, OutgoingMessage},
    provisioner::ThreadProvisioner,
    registry::TicketRegistry,
    transcript::TranscriptStore,
    Result,
};

pub const BOT_ID: u64 = 1;
pub const OPERATOR: u64 = 9;
pub const AUDIT_CHANNEL: ChannelId = ChannelId(77);

pub fn temp_dir(prefix: &str) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    let ts = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let dir = PathBuf::from(format!(
        "/tmp/helpdesk-{prefix}-{}-{n}-{ts}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn sample_ticket(id: u64, requester: u64) -> Ticket {
    Ticket {
        id: ChannelId(id),
        guild: GuildId(1),
        kind: TicketKind::Help,
        requester: Member::new(requester, format!("user{requester}")),
        created_at: Utc::now(),
        state: TicketState::Open,
        fields: BTreeMap::new(),
        absent_since: None,
        retired: false,
        archive: None,
    }
}

/// The lifecycle components wired against one [`FakePlatform`].
pub struct Harness {
    pub platform: Arc<FakePlatform>,
    pub registry: Arc<TicketRegistry>,
    pub transcripts: Arc<TranscriptStore>,
    pub audit: Arc<AuditLogger>,
    pub closer: Arc<CloseWorkflow>,
}

impl Harness {
    pub fn new(name: &str) -> Self {
        Self::build(temp_dir(name), Arc::new(TicketRegistry::in_memory()))
    }

    /// Like [`Harness::new`], with the registry written to the returned file.
    pub fn persistent(name: &str) -> (Self, PathBuf) {
        let dir = temp_dir(name);
        let path = dir.join("tickets.json");
        let registry = Arc::new(TicketRegistry::load(&path).unwrap());
        (Self::build(dir, registry), path)
    }

    fn build(dir: PathBuf, registry: Arc<TicketRegistry>) -> Self {
        let platform = Arc::new(FakePlatform::default());
        let transcripts =
            Arc::new(TranscriptStore::new(platform.clone(), dir.join("transcripts")).unwrap());
        let provisioner = Arc::new(ThreadProvisioner::new(platform.clone(), registry.clone()));
        let audit = Arc::new(AuditLogger::new(dir.join("audit.log"), true));
        let policy = OperatorPolicy {
            operator_users: vec![UserId(OPERATOR)],
            operator_roles: vec![],
        };
        let closer = Arc::new(CloseWorkflow::new(
            platform.clone(),
            registry.clone(),
            transcripts.clone(),
            provisioner,
            policy,
            audit.clone(),
            AUDIT_CHANNEL,
        ));
        Self {
            platform,
            registry,
            transcripts,
            audit,
            closer,
        }
    }

    /// Register an OPEN ticket whose requester is a member of its channel.
    pub async fn open_ticket(&self, id: u64, requester: u64) -> Ticket {
        let ticket = sample_ticket(id, requester);
        self.platform.join(ticket.id, ticket.requester.id);
        self.registry.insert(ticket.clone()).await.unwrap();
        ticket
    }
}

type Hook = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
pub struct FakePlatform {
    next_id: AtomicU64,
    created: Mutex<Vec<(ChannelId, ChannelRequest)>>,
    retired: Mutex<Vec<ChannelId>>,
    sent: Mutex<Vec<(ChannelId, OutgoingMessage)>>,
    history: Mutex<HashMap<ChannelId, Vec<HistoryMessage>>>,
    members: Mutex<HashMap<ChannelId, HashSet<UserId>>>,
    retire_hook: Mutex<Option<Hook>>,

    pub fail_create: AtomicBool,
    pub fail_history: AtomicBool,
    pub fail_retire: AtomicBool,
    /// Number of upcoming `send_message` calls that fail with a retryable error.
    pub transient_send_failures: AtomicUsize,
    pub history_reads: AtomicUsize,
}

impl FakePlatform {
    pub fn created(&self) -> Vec<ChannelId> {
        self.created.lock().unwrap().iter().map(|(c, _)| *c).collect()
    }

    pub fn created_names(&self) -> Vec<String> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .map(|(_, r)| r.name.clone())
            .collect()
    }

    /// Run `f` after each successful retire.
    pub fn on_retire(&self, f: impl Fn() + Send + Sync + 'static) {
        *self.retire_hook.lock().unwrap() = Some(Box::new(f));
    }

    pub fn retired(&self) -> Vec<ChannelId> {
        self.retired.lock().unwrap().clone()
    }

    pub fn sent_to(&self, channel: ChannelId) -> Vec<OutgoingMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| *c == channel)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn post(&self, channel: ChannelId, author: &Member, content: &str) {
        self.post_with(channel, author, content, vec![], vec![]);
    }

    pub fn post_with(
        &self,
        channel: ChannelId,
        author: &Member,
        content: &str,
        attachment_urls: Vec<String>,
        embed_summaries: Vec<String>,
    ) {
        self.history
            .lock()
            .unwrap()
            .entry(channel)
            .or_default()
            .push(HistoryMessage {
                author: author.clone(),
                content: content.to_string(),
                timestamp: Utc::now(),
                attachment_urls,
                embed_summaries,
            });
    }

    pub fn leave(&self, channel: ChannelId, user: UserId) {
        if let Some(m) = self.members.lock().unwrap().get_mut(&channel) {
            m.remove(&user);
        }
    }

    pub fn join(&self, channel: ChannelId, user: UserId) {
        self.members
            .lock()
            .unwrap()
            .entry(channel)
            .or_default()
            .insert(user);
    }
}

#[async_trait]
impl ChatPlatform for FakePlatform {
    async fn create_private_channel(&self, req: ChannelRequest) -> Result<ChannelId> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Error::platform("missing permissions", false));
        }
        let id = ChannelId(1000 + self.next_id.fetch_add(1, Ordering::SeqCst));
        self.join(id, req.requester);
        self.created.lock().unwrap().push((id, req));
        Ok(id)
    }

    async fn retire_channel(&self, channel: ChannelId) -> Result<()> {
        if self.fail_retire.load(Ordering::SeqCst) {
            return Err(Error::platform("cannot archive thread", false));
        }
        self.retired.lock().unwrap().push(channel);
        if let Some(hook) = self.retire_hook.lock().unwrap().as_ref() {
            hook();
        }
        Ok(())
    }

    async fn send_message(&self, channel: ChannelId, msg: OutgoingMessage) -> Result<()> {
        let pending = self.transient_send_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.transient_send_failures
                .store(pending - 1, Ordering::SeqCst);
            return Err(Error::platform("502 bad gateway", true));
        }
        self.post(channel, &Member::new(BOT_ID, "helpdesk"), &msg.content);
        self.sent.lock().unwrap().push((channel, msg));
        Ok(())
    }

    async fn fetch_history(&self, channel: ChannelId) -> Result<Vec<HistoryMessage>> {
        self.history_reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(Error::platform("missing access", false));
        }
        Ok(self
            .history
            .lock()
            .unwrap()
            .get(&channel)
            .cloned()
            .unwrap_or_default())
    }

    async fn is_member(&self, channel: ChannelId, user: UserId) -> Result<bool> {
        Ok(self
            .members
            .lock()
            .unwrap()
            .get(&channel)
            .map(|m| m.contains(&user))
            .unwrap_or(false))
    }
}
