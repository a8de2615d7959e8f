use crate::{
    config::Config,
    domain::{Actor, RoleId, Ticket, UserId},
};

/// The single "privileged operator" check.
#[derive(Clone, Debug, Default)]
pub struct OperatorPolicy {
    pub operator_users: Vec<UserId>,
    pub operator_roles: Vec<RoleId>,
}

impl OperatorPolicy {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            operator_users: cfg.operator_users.clone(),
            operator_roles: cfg.operator_roles.clone(),
        }
    }

    pub fn is_operator(&self, actor: &Actor) -> bool {
        if self.operator_users.contains(&actor.member.id) {
            return true;
        }
        actor
            .roles
            .iter()
            .any(|role| self.operator_roles.contains(role))
    }

    /// Requester or operator.
    pub fn may_close(&self, actor: &Actor, ticket: &Ticket) -> bool {
        actor.member.id == ticket.requester.id || self.is_operator(actor)
    }
}
