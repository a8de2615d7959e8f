//! Auto-close of tickets whose requester walked away.
//!
//! A departure arms one grace-period watch per ticket. A rejoin before expiry
//! cancels it. On expiry, membership is checked again and the ticket is closed
//! by the system if the requester is still gone.
//!
//! The watch table is the single point where cancellation and expiry meet:
//! whichever side removes the entry first wins, the other does nothing.
//! `absent_since` is persisted on the ticket so [`AutoCloseMonitor::rearm`] can
//! restore pending watches after a restart.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use chrono::Utc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{
    audit::{AuditEvent, AuditLogger},
    close::{CloseBy, CloseWorkflow, AUTO_CLOSE_REASON},
    domain::{GuildId, TicketId, UserId},
    errors::Error,
    ports::ChatPlatform,
    registry::TicketRegistry,
};

#[derive(Clone)]
pub struct AutoCloseMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    platform: Arc<dyn ChatPlatform>,
    registry: Arc<TicketRegistry>,
    closer: Arc<CloseWorkflow>,
    audit: Arc<AuditLogger>,
    grace: Duration,
    watches: Mutex<HashMap<TicketId, Watch>>,
    generation: AtomicU64,
    shutdown: CancellationToken,
}

struct Watch {
    generation: u64,
    cancel: CancellationToken,
}

impl AutoCloseMonitor {
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        registry: Arc<TicketRegistry>,
        closer: Arc<CloseWorkflow>,
        audit: Arc<AuditLogger>,
        grace: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                platform,
                registry,
                closer,
                audit,
                grace,
                watches: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Number of armed watches.
    pub fn pending(&self) -> usize {
        self.watches().len()
    }

    pub fn is_watching(&self, ticket: TicketId) -> bool {
        self.watches().contains_key(&ticket)
    }

    /// `user` left the ticket channel `channel`.
    pub async fn on_member_left(&self, channel: TicketId, user: UserId) {
        let Some(ticket) = self.inner.registry.get(channel).await else {
            tracing::debug!("member left untracked channel {channel}");
            return;
        };
        if !ticket.is_open() || ticket.requester.id != user {
            return;
        }

        let now = Utc::now();
        if let Err(e) = self
            .inner
            .registry
            .update(channel, |t| {
                if t.absent_since.is_none() {
                    t.absent_since = Some(now);
                }
            })
            .await
        {
            if matches!(e, Error::NotFound(_)) {
                return;
            }
            // Still armed: the absence is in memory, only a restart would lose it.
            tracing::warn!("could not persist absence on {channel}: {e}");
        }

        if self.arm(channel, self.inner.grace) {
            tracing::info!(
                "requester {user} left ticket {channel}; auto-close in {}s",
                self.inner.grace.as_secs()
            );
            self.inner
                .audit
                .record(AuditEvent::auto_close("auto_close_armed", &ticket));
        }
    }

    /// `user` (re)joined the ticket channel `channel`.
    pub async fn on_member_joined(&self, channel: TicketId, user: UserId) {
        let Some(ticket) = self.inner.registry.get(channel).await else {
            return;
        };
        if !ticket.is_open() || ticket.requester.id != user {
            return;
        }

        let cancelled = self.cancel(channel);
        if ticket.absent_since.is_some() {
            if let Err(e) = self
                .inner
                .registry
                .update(channel, |t| t.absent_since = None)
                .await
            {
                tracing::warn!("could not clear absence on {channel}: {e}");
            }
        }
        if cancelled {
            tracing::info!("requester {user} rejoined ticket {channel}; auto-close cancelled");
            self.inner
                .audit
                .record(AuditEvent::auto_close("auto_close_cancelled", &ticket));
        }
    }

    /// `user` left the guild: treat it as leaving every ticket they opened there.
    pub async fn on_guild_departure(&self, guild: GuildId, user: UserId) {
        let tickets = self.inner.registry.open_for_requester(user).await;
        for ticket in tickets.into_iter().filter(|t| t.guild == guild) {
            self.on_member_left(ticket.id, user).await;
        }
    }

    /// Restart the watches persisted before the last shutdown.
    ///
    /// Each watch gets the grace time that was left; watches that already ran
    /// out fire immediately.
    pub async fn rearm(&self) -> usize {
        let pending = self.inner.registry.pending_watches().await;
        let now = Utc::now();
        let mut armed = 0usize;
        for ticket in pending {
            let Some(since) = ticket.absent_since else {
                continue;
            };
            let elapsed = (now - since).to_std().unwrap_or(Duration::ZERO);
            let remaining = self.inner.grace.saturating_sub(elapsed);
            if self.arm(ticket.id, remaining) {
                armed += 1;
            }
        }
        if armed > 0 {
            tracing::info!("re-armed {armed} auto-close watch(es)");
        }
        armed
    }

    /// Cancel every pending watch. Persisted absences are kept for the next start.
    pub fn stop(&self) {
        self.inner.shutdown.cancel();
        self.watches().clear();
    }

    fn watches(&self) -> std::sync::MutexGuard<'_, HashMap<TicketId, Watch>> {
        self.inner
            .watches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Arm a watch unless one is already pending. Returns whether it armed.
    fn arm(&self, ticket: TicketId, delay: Duration) -> bool {
        let mut watches = self.watches();
        if watches.contains_key(&ticket) {
            return false;
        }
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst);
        let cancel = self.inner.shutdown.child_token();
        watches.insert(
            ticket,
            Watch {
                generation,
                cancel: cancel.clone(),
            },
        );
        drop(watches);

        let monitor = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = sleep(delay) => {
                    if monitor.claim(ticket, generation) {
                        monitor.expire(ticket).await;
                    }
                }
            }
        });
        true
    }

    /// Remove the watch entry from the rejoin side. Returns whether one was pending.
    fn cancel(&self, ticket: TicketId) -> bool {
        match self.watches().remove(&ticket) {
            Some(w) => {
                w.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove the watch entry from the expiry side, if it is still ours.
    fn claim(&self, ticket: TicketId, generation: u64) -> bool {
        let mut watches = self.watches();
        match watches.get(&ticket) {
            Some(w) if w.generation == generation => {
                watches.remove(&ticket);
                true
            }
            _ => false,
        }
    }

    async fn expire(&self, id: TicketId) {
        let Some(ticket) = self.inner.registry.get(id).await else {
            return;
        };
        if !ticket.is_open() {
            return;
        }

        match self.inner.platform.is_member(id, ticket.requester.id).await {
            Ok(true) => {
                tracing::info!("requester is back in {id}; not closing");
                if let Err(e) = self
                    .inner
                    .registry
                    .update(id, |t| t.absent_since = None)
                    .await
                {
                    tracing::warn!("could not clear absence on {id}: {e}");
                }
                return;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!("membership check for {id} failed, leaving ticket open: {e}");
                self.inner.audit.record(AuditEvent::error(
                    Some(id),
                    &e.to_string(),
                    Some("auto-close membership check"),
                ));
                return;
            }
        }

        tracing::info!("auto-closing ticket {id}: requester absent past grace period");
        self.inner
            .audit
            .record(AuditEvent::auto_close("auto_close_triggered", &ticket));
        if let Err(e) = self
            .inner
            .closer
            .close(id, CloseBy::System, AUTO_CLOSE_REASON)
            .await
        {
            tracing::error!("auto-close of {id} failed: {e}");
            self.inner.audit.record(AuditEvent::error(
                Some(id),
                &e.to_string(),
                Some("auto-close"),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChannelId, TicketState, UserId};
    use crate::testing::{sample_ticket, Harness, AUDIT_CHANNEL};

    const GRACE: Duration = Duration::from_secs(60);

    fn monitor(h: &Harness) -> AutoCloseMonitor {
        AutoCloseMonitor::new(
            h.platform.clone(),
            h.registry.clone(),
            h.closer.clone(),
            h.audit.clone(),
            GRACE,
        )
    }

    async fn settle(h: &Harness, id: TicketId) -> TicketState {
        for _ in 0..50 {
            let state = h.registry.get(id).await.unwrap().state;
            if state == TicketState::Archived {
                return state;
            }
            sleep(Duration::from_millis(10)).await;
        }
        h.registry.get(id).await.unwrap().state
    }

    #[tokio::test(start_paused = true)]
    async fn rejoin_within_grace_keeps_ticket_open() {
        let h = Harness::new("monitor-rejoin");
        let m = monitor(&h);
        let t = h.open_ticket(200, 5).await;

        h.platform.leave(t.id, UserId(5));
        m.on_member_left(t.id, UserId(5)).await;
        assert!(m.is_watching(t.id));
        assert!(h.registry.get(t.id).await.unwrap().absent_since.is_some());

        sleep(Duration::from_secs(30)).await;
        h.platform.join(t.id, UserId(5));
        m.on_member_joined(t.id, UserId(5)).await;
        assert_eq!(m.pending(), 0);

        sleep(GRACE * 2).await;
        let stored = h.registry.get(t.id).await.unwrap();
        assert_eq!(stored.state, TicketState::Open);
        assert!(stored.absent_since.is_none());
        assert!(h.platform.retired().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn absence_past_grace_closes_exactly_once() {
        let h = Harness::new("monitor-expire");
        let m = monitor(&h);
        let t = h.open_ticket(201, 5).await;

        h.platform.leave(t.id, UserId(5));
        m.on_member_left(t.id, UserId(5)).await;
        m.on_member_left(t.id, UserId(5)).await;
        assert_eq!(m.pending(), 1);

        sleep(GRACE + Duration::from_secs(1)).await;
        assert_eq!(settle(&h, t.id).await, TicketState::Archived);

        let archive = h.registry.get(t.id).await.unwrap().archive.unwrap();
        assert_eq!(archive.reason, AUTO_CLOSE_REASON);
        assert_eq!(archive.closed_by, crate::domain::Initiator::System);
        assert_eq!(h.platform.sent_to(AUDIT_CHANNEL).len(), 1);
        assert_eq!(h.platform.retired(), vec![t.id]);
        assert_eq!(m.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_rechecks_membership() {
        let h = Harness::new("monitor-recheck");
        let m = monitor(&h);
        let t = h.open_ticket(202, 5).await;

        // Departure signal without the platform agreeing the user is gone.
        m.on_member_left(t.id, UserId(5)).await;
        sleep(GRACE * 2).await;

        let stored = h.registry.get(t.id).await.unwrap();
        assert_eq!(stored.state, TicketState::Open);
        assert!(stored.absent_since.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn other_members_leaving_is_ignored() {
        let h = Harness::new("monitor-other");
        let m = monitor(&h);
        let t = h.open_ticket(203, 5).await;
        m.on_member_left(t.id, UserId(9)).await;
        m.on_member_left(ChannelId(999_999), UserId(5)).await;
        assert_eq!(m.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn guild_departure_watches_every_open_ticket() {
        let h = Harness::new("monitor-guild");
        let m = monitor(&h);
        let a = h.open_ticket(204, 5).await;
        let b = h.open_ticket(205, 5).await;
        let mut elsewhere = sample_ticket(206, 5);
        elsewhere.guild = GuildId(2);
        h.registry.insert(elsewhere.clone()).await.unwrap();

        h.platform.leave(a.id, UserId(5));
        h.platform.leave(b.id, UserId(5));
        m.on_guild_departure(GuildId(1), UserId(5)).await;
        assert!(m.is_watching(a.id));
        assert!(m.is_watching(b.id));
        assert!(!m.is_watching(elsewhere.id));

        sleep(GRACE + Duration::from_secs(1)).await;
        assert_eq!(settle(&h, a.id).await, TicketState::Archived);
        assert_eq!(settle(&h, b.id).await, TicketState::Archived);
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_resumes_with_remaining_grace() {
        let h = Harness::new("monitor-rearm");
        let overdue = h.open_ticket(207, 5).await;
        let fresh = h.open_ticket(208, 6).await;
        h.platform.leave(overdue.id, UserId(5));
        h.platform.leave(fresh.id, UserId(6));
        h.registry
            .update(overdue.id, |t| {
                t.absent_since = Some(Utc::now() - chrono::Duration::seconds(600))
            })
            .await
            .unwrap();
        h.registry
            .update(fresh.id, |t| t.absent_since = Some(Utc::now()))
            .await
            .unwrap();

        let m = monitor(&h);
        assert_eq!(m.rearm().await, 2);

        assert_eq!(settle(&h, overdue.id).await, TicketState::Archived);
        assert_eq!(h.registry.get(fresh.id).await.unwrap().state, TicketState::Open);
        assert!(m.is_watching(fresh.id));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_pending_watches() {
        let h = Harness::new("monitor-stop");
        let m = monitor(&h);
        let t = h.open_ticket(209, 5).await;
        h.platform.leave(t.id, UserId(5));
        m.on_member_left(t.id, UserId(5)).await;

        m.stop();
        sleep(GRACE * 2).await;
        let stored = h.registry.get(t.id).await.unwrap();
        assert_eq!(stored.state, TicketState::Open);
        assert!(stored.absent_since.is_some());
    }
}
