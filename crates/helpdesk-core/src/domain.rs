use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::transcript::TranscriptSummary;

/// Platform guild (server) id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GuildId(pub u64);

/// Platform user id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub u64);

/// Platform role id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleId(pub u64);

/// Channel handle assigned by the platform. Doubles as the ticket id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub u64);

pub type TicketId = ChannelId;

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for GuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A platform user as seen by the ticket subsystem.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: UserId,
    pub name: String,
}

impl Member {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id: UserId(id),
            name: name.into(),
        }
    }

    pub fn mention(&self) -> String {
        format!("<@{}>", self.id.0)
    }
}

/// The user acting on a command, with the roles the platform reported for them.
#[derive(Clone, Debug)]
pub struct Actor {
    pub member: Member,
    pub roles: Vec<RoleId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketKind {
    ScriptPurchase,
    CurrencyPurchase,
    Help,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketState {
    Open,
    Closing,
    Archived,
}

impl fmt::Display for TicketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TicketState::Open => "open",
            TicketState::Closing => "closing",
            TicketState::Archived => "archived",
        };
        f.write_str(s)
    }
}

/// Who initiated a close.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Initiator {
    System,
    User { member: Member },
}

impl Initiator {
    pub fn display(&self) -> String {
        match self {
            Initiator::System => "system".to_string(),
            Initiator::User { member } => format!("{} ({})", member.name, member.id),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub guild: GuildId,
    pub kind: TicketKind,
    pub requester: Member,
    pub created_at: DateTime<Utc>,
    pub state: TicketState,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    /// Set while an auto-close watch is pending for this ticket.
    #[serde(default)]
    pub absent_since: Option<DateTime<Utc>>,
    /// The channel was archived and locked on the platform.
    #[serde(default)]
    pub retired: bool,
    #[serde(default)]
    pub archive: Option<ArchivedTicket>,
}

impl Ticket {
    pub fn is_open(&self) -> bool {
        self.state == TicketState::Open
    }
}

/// Result of a completed close. Stored on the ticket so repeat closes can return it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArchivedTicket {
    pub ticket_id: TicketId,
    pub kind: TicketKind,
    pub requester: Member,
    pub opened_at: DateTime<Utc>,
    pub closed_by: Initiator,
    pub reason: String,
    pub closed_at: DateTime<Utc>,
    pub transcript: Option<TranscriptSummary>,
    #[serde(default)]
    pub warnings: Vec<String>,
}
