use std::{collections::BTreeMap, path::PathBuf};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    domain::{Ticket, TicketId, TicketState, UserId},
    errors::Error,
    locks::KeyedLocks,
    persist::{load_json, save_json},
    Result,
};

/// Durable ticket records keyed by channel handle.
///
/// Record access is a short critical section on the map. Lifecycle operations
/// that span several platform calls take the ticket's own lock via
/// [`TicketRegistry::lifecycle_lock`] instead, so tickets never wait on each other.
pub struct TicketRegistry {
    path: Option<PathBuf>,
    tickets: Mutex<BTreeMap<TicketId, Ticket>>,
    locks: KeyedLocks<TicketId>,
}

impl TicketRegistry {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let saved: Vec<Ticket> = load_json(&path)?.unwrap_or_default();
        let open = saved.iter().filter(|t| t.state != TicketState::Archived).count();
        tracing::info!(
            "loaded {} ticket(s) ({open} live) from {}",
            saved.len(),
            path.display()
        );
        Ok(Self {
            path: Some(path),
            tickets: Mutex::new(saved.into_iter().map(|t| (t.id, t)).collect()),
            locks: KeyedLocks::default(),
        })
    }

    /// A registry that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            tickets: Mutex::new(BTreeMap::new()),
            locks: KeyedLocks::default(),
        }
    }

    pub async fn lifecycle_lock(&self, id: TicketId) -> OwnedMutexGuard<()> {
        self.locks.lock(&id).await
    }

    /// Drop the lifecycle lock of a finished ticket unless someone holds or awaits it.
    pub async fn release_lifecycle_lock(&self, id: TicketId) {
        self.locks.remove_idle(&id).await;
    }

    #[cfg(test)]
    pub async fn lifecycle_lock_count(&self) -> usize {
        self.locks.key_count().await
    }

    /// Add a ticket. If it cannot be written to disk it is not kept in memory either.
    pub async fn insert(&self, ticket: Ticket) -> Result<()> {
        let mut tickets = self.tickets.lock().await;
        let id = ticket.id;
        let previous = tickets.insert(id, ticket);
        if let Err(e) = self.persist(&tickets) {
            match previous {
                Some(p) => tickets.insert(id, p),
                None => tickets.remove(&id),
            };
            return Err(e);
        }
        Ok(())
    }

    pub async fn get(&self, id: TicketId) -> Option<Ticket> {
        self.tickets.lock().await.get(&id).cloned()
    }

    /// Apply `f` to the stored ticket, persist, and return the updated copy.
    ///
    /// A persist failure is returned, but the change stays in memory: it mirrors
    /// what already happened on the platform, and the next successful write
    /// carries it to disk.
    pub async fn update(&self, id: TicketId, f: impl FnOnce(&mut Ticket)) -> Result<Ticket> {
        let mut tickets = self.tickets.lock().await;
        let ticket = tickets
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("ticket {id}")))?;
        f(ticket);
        let out = ticket.clone();
        self.persist(&tickets)?;
        Ok(out)
    }

    pub async fn open_for_requester(&self, user: UserId) -> Vec<Ticket> {
        self.tickets
            .lock()
            .await
            .values()
            .filter(|t| t.is_open() && t.requester.id == user)
            .cloned()
            .collect()
    }

    /// Open tickets with a persisted auto-close watch.
    pub async fn pending_watches(&self) -> Vec<Ticket> {
        self.tickets
            .lock()
            .await
            .values()
            .filter(|t| t.is_open() && t.absent_since.is_some())
            .cloned()
            .collect()
    }

    /// Tickets a crash left half-closed.
    pub async fn interrupted_closes(&self) -> Vec<Ticket> {
        self.tickets
            .lock()
            .await
            .values()
            .filter(|t| t.state == TicketState::Closing)
            .cloned()
            .collect()
    }

    fn persist(&self, tickets: &BTreeMap<TicketId, Ticket>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let all: Vec<&Ticket> = tickets.values().collect();
        if let Err(e) = save_json(path, &all) {
            tracing::error!("failed to persist ticket registry to {}: {e}", path.display());
            return Err(e);
        }
        Ok(())
    }
}
