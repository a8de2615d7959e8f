//! Explicit command objects carried by platform affordances.
//!
//! Buttons encode a [`TicketCommand`] and intake forms encode their kind in
//! their custom id. The adapter decodes it on click/submit and hands it to the
//! service, so handlers never depend on state captured when the affordance was
//! created.

use crate::{
    domain::{ChannelId, TicketId, TicketKind},
    kinds,
};

const PREFIX: &str = "helpdesk";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TicketCommand {
    Close { ticket: TicketId },
    Transcript { ticket: TicketId },
}

impl TicketCommand {
    pub fn encode(&self) -> String {
        match self {
            TicketCommand::Close { ticket } => format!("{PREFIX}:close:{ticket}"),
            TicketCommand::Transcript { ticket } => format!("{PREFIX}:transcript:{ticket}"),
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let (action, arg) = split(raw)?;
        match action {
            "close" => parse_channel(arg).map(|ticket| TicketCommand::Close { ticket }),
            "transcript" => {
                parse_channel(arg).map(|ticket| TicketCommand::Transcript { ticket })
            }
            _ => None,
        }
    }
}

/// Custom id of the intake form for `kind`.
pub fn intake_form_id(kind: TicketKind) -> String {
    format!("{PREFIX}:intake:{}", kinds::spec(kind).name)
}

pub fn parse_intake_form(raw: &str) -> Option<TicketKind> {
    match split(raw)? {
        ("intake", name) => kinds::by_name(name).map(|k| k.kind),
        _ => None,
    }
}

fn split(raw: &str) -> Option<(&str, &str)> {
    let mut parts = raw.splitn(3, ':');
    if parts.next()? != PREFIX {
        return None;
    }
    Some((parts.next()?, parts.next()?))
}

fn parse_channel(s: &str) -> Option<ChannelId> {
    s.trim().parse::<u64>().ok().map(ChannelId)
}
