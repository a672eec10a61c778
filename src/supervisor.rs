//! Per-inbox tracker lifecycle.
//!
//! The [`TrackerSupervisor`] owns at most one subscription per inbox IRI. Each subscription is
//! a tokio task that selects a [`ChangeTracker`](crate::tracker::ChangeTracker), forwards its updates as
//! [`SupervisorEvent::Change`] and restarts it after a backoff delay whenever it closes.
//!
//! Reconnection attempts accumulate over the lifetime of a subscription and are never reset by
//! a successful reconnect. When the tracker closes once more after
//! [`ReconnectConfig::max_attempts`](crate::config::ReconnectConfig::max_attempts) restarts, the
//! subscription turns [`SubscriptionState::Exhausted`], a single
//! [`SupervisorEvent::Exhausted`] is emitted and nothing more follows until the inbox is
//! unsubscribed and subscribed again.
//!
//! An exhausted subscription keeps its table entry rather than being removed, so its state and
//! attempt count stay observable. While it is there [`TrackerSupervisor::subscribe`] returns
//! `false` for the inbox; [`TrackerSupervisor::unsubscribe`] removes it.
//!
//! Subscriptions are keyed by the inbox IRI without its fragment.
//!
//! Every event is forwarded while holding the subscription table lock after checking that the
//! emitting task still owns the entry, so no event for an inbox is observed once
//! [`TrackerSupervisor::unsubscribe`] has returned.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedSender},
    watch,
};
use tracing::Instrument;

use crate::{
    config::AgentConfig,
    fetch::ResourceFetcher,
    notification::strip_fragment,
    rdf::CodecMap,
    tracker::{select_tracker, TrackerEvent, TrackerKind},
};

/// "Inbox `inbox` may have changed", stamped with the time the tracker reported it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSignal {
    pub timestamp: DateTime<Utc>,
    pub inbox: String,
}

impl ChangeSignal {
    pub fn now(inbox: impl Into<String>) -> Self {
        ChangeSignal {
            timestamp: Utc::now(),
            inbox: inbox.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorEvent {
    Change(ChangeSignal),
    /// The tracker of `inbox` closed; a new one is selected after `delay`.
    Reconnecting {
        inbox: String,
        attempt: u32,
        delay: Duration,
    },
    /// The subscription of `inbox` gave up after `attempts` reconnections.
    Exhausted { inbox: String, attempts: u32 },
}

impl SupervisorEvent {
    pub fn inbox(&self) -> &str {
        match self {
            SupervisorEvent::Change(signal) => &signal.inbox,
            SupervisorEvent::Reconnecting { inbox, .. } => inbox,
            SupervisorEvent::Exhausted { inbox, .. } => inbox,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Selecting a tracker.
    Connecting,
    Active(TrackerKind),
    Reconnecting,
    Exhausted,
}

struct Subscription {
    generation: u64,
    state: SubscriptionState,
    attempts: u32,
    shutdown: watch::Sender<bool>,
}

type SubscriptionTable = Arc<Mutex<HashMap<String, Subscription>>>;

/// Shared by the supervisor and its subscription tasks.
#[derive(Clone)]
struct SubscriptionContext {
    fetcher: Arc<dyn ResourceFetcher>,
    codecs: CodecMap,
    config: AgentConfig,
    subscriptions: SubscriptionTable,
    event_tx: UnboundedSender<SupervisorEvent>,
}

impl SubscriptionContext {
    /// Runs `f` on the subscription entry if task `generation` still owns it.
    fn with_entry<T>(
        &self,
        inbox: &str,
        generation: u64,
        f: impl FnOnce(&mut Subscription, &UnboundedSender<SupervisorEvent>) -> T,
    ) -> Option<T> {
        let mut subscriptions = self.subscriptions.lock();
        match subscriptions.get_mut(inbox) {
            Some(entry) if entry.generation == generation => Some(f(entry, &self.event_tx)),
            _ => None,
        }
    }

    fn set_state(&self, inbox: &str, generation: u64, state: SubscriptionState) -> bool {
        self.with_entry(inbox, generation, |entry, _| entry.state = state)
            .is_some()
    }

    fn emit_change(&self, inbox: &str, generation: u64) -> bool {
        self.with_entry(inbox, generation, |_, tx| {
            let _ = tx.send(SupervisorEvent::Change(ChangeSignal::now(inbox)));
        })
        .is_some()
    }

    /// Counts a reconnection attempt. Returns the delay to wait before it, or `None` when the
    /// subscription is gone or has just been exhausted.
    fn begin_reconnect(&self, inbox: &str, generation: u64) -> Option<Duration> {
        let reconnect = &self.config.reconnect;
        self.with_entry(inbox, generation, |entry, tx| {
            if entry.attempts >= reconnect.max_attempts {
                entry.state = SubscriptionState::Exhausted;
                tracing::error!(
                    "[TrackerSupervisor] Giving up on {inbox} after {} reconnection attempts",
                    reconnect.max_attempts
                );
                let _ = tx.send(SupervisorEvent::Exhausted {
                    inbox: inbox.to_string(),
                    attempts: reconnect.max_attempts,
                });
                return None;
            }
            entry.attempts += 1;
            let delay = reconnect.delay(entry.attempts);
            entry.state = SubscriptionState::Reconnecting;
            tracing::info!(
                "[TrackerSupervisor] Reconnecting {inbox} in {delay:?} (attempt {}/{})",
                entry.attempts,
                reconnect.max_attempts
            );
            let _ = tx.send(SupervisorEvent::Reconnecting {
                inbox: inbox.to_string(),
                attempt: entry.attempts,
                delay,
            });
            Some(delay)
        })
        .flatten()
    }
}

pub struct TrackerSupervisor {
    ctx: SubscriptionContext,
    next_generation: AtomicU64,
}

impl TrackerSupervisor {
    pub fn new(
        fetcher: Arc<dyn ResourceFetcher>,
        codecs: CodecMap,
        config: AgentConfig,
        event_tx: UnboundedSender<SupervisorEvent>,
    ) -> Self {
        TrackerSupervisor {
            ctx: SubscriptionContext {
                fetcher,
                codecs,
                config,
                subscriptions: Arc::new(Mutex::new(HashMap::new())),
                event_tx,
            },
            next_generation: AtomicU64::new(1),
        }
    }

    /// Starts tracking `inbox`. Returns `false`, and does nothing, if a subscription for
    /// `inbox` already exists (exhausted ones included).
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(&self, inbox: &str) -> bool {
        let inbox = strip_fragment(inbox);
        let mut subscriptions = self.ctx.subscriptions.lock();
        if subscriptions.contains_key(inbox) {
            tracing::debug!("[TrackerSupervisor] Already subscribed to {inbox}");
            return false;
        }
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let span = tracing::info_span!("subscription", inbox = %inbox, generation);
        tokio::spawn(
            run_subscription(self.ctx.clone(), inbox.to_string(), generation, shutdown_rx)
                .instrument(span),
        );
        subscriptions.insert(
            inbox.to_string(),
            Subscription {
                generation,
                state: SubscriptionState::Connecting,
                attempts: 0,
                shutdown: shutdown_tx,
            },
        );
        tracing::info!("[TrackerSupervisor] Subscribed to {inbox}");
        true
    }

    /// Stops tracking `inbox`. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&self, inbox: &str) -> bool {
        let inbox = strip_fragment(inbox);
        let removed = self.ctx.subscriptions.lock().remove(inbox);
        match removed {
            Some(entry) => {
                let _ = entry.shutdown.send(true);
                tracing::info!("[TrackerSupervisor] Unsubscribed from {inbox}");
                true
            }
            None => false,
        }
    }

    pub fn unsubscribe_all(&self) {
        let drained: Vec<Subscription> = self
            .ctx
            .subscriptions
            .lock()
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        for entry in drained {
            let _ = entry.shutdown.send(true);
        }
    }

    pub fn is_subscribed(&self, inbox: &str) -> bool {
        self.ctx.subscriptions.lock().contains_key(strip_fragment(inbox))
    }

    pub fn state(&self, inbox: &str) -> Option<SubscriptionState> {
        self.ctx.subscriptions.lock().get(strip_fragment(inbox)).map(|e| e.state)
    }

    /// Reconnection attempts made so far for `inbox`.
    pub fn reconnect_attempts(&self, inbox: &str) -> Option<u32> {
        self.ctx.subscriptions.lock().get(strip_fragment(inbox)).map(|e| e.attempts)
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.ctx.subscriptions.lock().keys().cloned().collect()
    }
}

impl Drop for TrackerSupervisor {
    fn drop(&mut self) {
        self.unsubscribe_all();
    }
}

async fn run_subscription(
    ctx: SubscriptionContext,
    inbox: String,
    generation: u64,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let selection =
            select_tracker(ctx.fetcher.clone(), ctx.codecs.clone(), &inbox, &ctx.config);
        let mut tracker = tokio::select! {
            tracker = selection => tracker,
            _ = shutdown_rx.changed() => return,
        };
        if !ctx.set_state(&inbox, generation, SubscriptionState::Active(tracker.kind())) {
            return;
        }
        let (tracker_tx, mut tracker_rx) = unbounded_channel();
        tracker.start(tracker_tx);

        let reason = loop {
            tokio::select! {
                event = tracker_rx.recv() => match event {
                    Some(TrackerEvent::Update) => {
                        if !ctx.emit_change(&inbox, generation) {
                            tracker.stop();
                            return;
                        }
                    }
                    Some(TrackerEvent::Closed(reason)) => break reason,
                    None => break "tracker task ended".to_string(),
                },
                _ = shutdown_rx.changed() => {
                    tracker.stop();
                    return;
                }
            }
        };
        tracker.stop();
        tracing::warn!("[TrackerSupervisor] Tracker for {inbox} closed: {reason}");

        let Some(delay) = ctx.begin_reconnect(&inbox, generation) else {
            return;
        };
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.changed() => return,
        }
    }
}
