//! Turning change signals into delivered notifications.
//!
//! A [`NotificationSequence`] watches one inbox. It owns a [`TrackerSupervisor`] subscribed to
//! that inbox and a single processing task that handles the supervisor's signals one at a
//! time. For every change signal the task runs a batch:
//!
//! 1. read the container listing and keep the members not yet known,
//! 2. fetch those notifications concurrently,
//! 3. run the filters (every notification is delivered, tagged `default`, when none are
//!    configured),
//! 4. raise a system notification and delete the resource when requested,
//! 5. remember every new member, delivered or not, and buffer the delivered notifications.
//!
//! Because batches run on one task, a batch never diffs against a known-member set that an
//! earlier batch is still about to extend. A batch that fails as a whole is repeated after the
//! poll interval until it succeeds.
//!
//! The consumer side is pull based: [`NotificationSequence::read`] returns a buffered
//! notification or `None` right away, [`NotificationSequence::next`] waits for one.
//!
//! The buffer is unbounded. A consumer that reads slower than notifications arrive grows it
//! without limit.

use chrono::{DateTime, Utc};
use futures::{future::join_all, Stream};
use parking_lot::{Mutex, RwLock};
use std::{
    collections::{HashSet, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{
        mpsc::{unbounded_channel, UnboundedReceiver},
        watch, Notify,
    },
    time::Instant,
};
use tracing::Instrument;

use crate::{
    config::AgentConfig,
    error::AgentError,
    fetch::{self, ResourceFetcher},
    filter::{Filter, FilterPipeline},
    notification::{strip_fragment, Notification, DEFAULT_MATCH},
    notify::{compose_message, SystemNotification, SystemNotifier, NOTIFICATION_TITLE},
    rdf::{CodecMap, Quad},
    supervisor::{ChangeSignal, SubscriptionState, SupervisorEvent, TrackerSupervisor},
};

/// Result of one batch.
#[derive(Debug, Default)]
pub(crate) struct BatchOutcome {
    pub delivered: Vec<Notification>,
    /// IDs whose deletion failed.
    pub failed_deletions: Vec<String>,
    /// Every new member seen by the batch, delivered or not.
    pub processed: Vec<String>,
}

/// Everything a batch needs besides the known-member set.
#[derive(Clone)]
pub(crate) struct BatchProcessor {
    fetcher: Arc<dyn ResourceFetcher>,
    codecs: CodecMap,
    pipeline: FilterPipeline,
    notifier: Arc<dyn SystemNotifier>,
    content_type: String,
    filters: Vec<Filter>,
    delete: bool,
    notify: bool,
}

impl BatchProcessor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        fetcher: Arc<dyn ResourceFetcher>,
        codecs: CodecMap,
        pipeline: FilterPipeline,
        notifier: Arc<dyn SystemNotifier>,
        content_type: String,
        filters: Vec<Filter>,
        delete: bool,
        notify: bool,
    ) -> Self {
        BatchProcessor {
            fetcher,
            codecs,
            pipeline,
            notifier,
            content_type,
            filters,
            delete,
            notify,
        }
    }

    /// Processes the members of `inbox` missing from `known`.
    ///
    /// Failing to read the listing or to load the filter shapes fails the batch, leaving its
    /// members unprocessed. Failures that concern a single notification are logged and the
    /// batch moves on.
    pub(crate) async fn process(
        &self,
        inbox: &str,
        known: &HashSet<String>,
    ) -> Result<BatchOutcome, AgentError> {
        let members =
            fetch::get_container_members(self.fetcher.as_ref(), &self.codecs, inbox).await?;
        let mut unique = HashSet::new();
        let new_ids: Vec<String> = members
            .into_iter()
            .filter(|id| !known.contains(id) && unique.insert(id.clone()))
            .collect();
        if new_ids.is_empty() {
            tracing::debug!("[NotificationSequence] No new members in {inbox}");
            return Ok(BatchOutcome::default());
        }
        tracing::info!(
            "[NotificationSequence] {} new member(s) in {inbox}",
            new_ids.len()
        );

        let filters = self.pipeline.load(&self.filters).await?;
        let candidates = join_all(new_ids.iter().map(|id| self.fetch_notification(id))).await;

        let mut outcome = BatchOutcome {
            processed: new_ids.clone(),
            ..Default::default()
        };
        for (id, candidate) in new_ids.into_iter().zip(candidates) {
            let (quads, last_modified) = match candidate {
                Ok(candidate) => candidate,
                Err(e) => {
                    tracing::warn!("[NotificationSequence] Skipping {id}: {e}");
                    continue;
                }
            };
            let matched_filters = if filters.is_empty() {
                vec![DEFAULT_MATCH.to_string()]
            } else {
                match self.pipeline.evaluate(&quads, &filters).await {
                    Ok(matched) if !matched.is_empty() => matched,
                    Ok(_) => {
                        tracing::debug!("[NotificationSequence] No filter matched {id}");
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!("[NotificationSequence] Could not filter {id}: {e}");
                        continue;
                    }
                }
            };
            let notification = Notification {
                id,
                quads,
                last_modified,
                matched_filters,
            };

            if self.notify {
                self.raise(&notification, !filters.is_empty()).await;
            }
            if self.delete {
                if let Err(e) = fetch::delete_resource(
                    self.fetcher.as_ref(),
                    &notification.id,
                    "Notification removal",
                )
                .await
                {
                    tracing::warn!("[NotificationSequence] {e}");
                    outcome.failed_deletions.push(notification.id.clone());
                }
            }
            outcome.delivered.push(notification);
        }
        Ok(outcome)
    }

    async fn fetch_notification(
        &self,
        id: &str,
    ) -> Result<(Vec<Quad>, Option<DateTime<Utc>>), AgentError> {
        let (quads, response) = fetch::get_quads(
            self.fetcher.as_ref(),
            &self.codecs,
            id,
            "Notification retrieval",
        )
        .await?;
        Ok((quads, response.last_modified()))
    }

    async fn raise(&self, notification: &Notification, tag_filters: bool) {
        let filters: &[String] = if tag_filters {
            &notification.matched_filters
        } else {
            &[]
        };
        let message = match compose_message(
            &notification.quads,
            filters,
            notification.last_modified,
            &self.codecs,
            &self.content_type,
        ) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(
                    "[NotificationSequence] Could not compose a message for {}: {e}",
                    notification.id
                );
                return;
            }
        };
        let system_notification = SystemNotification {
            title: NOTIFICATION_TITLE.to_string(),
            message,
        };
        if let Err(e) = self.notifier.notify(system_notification).await {
            tracing::warn!(
                "[NotificationSequence] System notification for {} failed: {e}",
                notification.id
            );
        }
    }
}

#[derive(Default)]
struct SequenceState {
    buffer: Mutex<VecDeque<Notification>>,
    known: RwLock<HashSet<String>>,
    failed_deletions: Mutex<Vec<String>>,
    readable: Notify,
    closed: AtomicBool,
    exhausted: AtomicBool,
}

impl SequenceState {
    fn publish(&self, outcome: BatchOutcome) {
        self.known.write().extend(outcome.processed);
        if !outcome.failed_deletions.is_empty() {
            let error = AgentError::Deletion(outcome.failed_deletions.clone());
            tracing::error!("[NotificationSequence] {error}");
            self.failed_deletions.lock().extend(outcome.failed_deletions);
        }
        if !outcome.delivered.is_empty() {
            self.buffer.lock().extend(outcome.delivered);
            self.readable.notify_waiters();
        }
    }
}

/// Live view of the notifications arriving in an inbox.
pub struct NotificationSequence {
    inbox: String,
    state: Arc<SequenceState>,
    supervisor: TrackerSupervisor,
    shutdown: watch::Sender<bool>,
}

impl NotificationSequence {
    /// Subscribes to `inbox` and starts processing. `ignore` seeds the known members.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn start(
        processor: BatchProcessor,
        config: &AgentConfig,
        inbox: &str,
        ignore: impl IntoIterator<Item = String>,
    ) -> Self {
        let inbox = strip_fragment(inbox).to_string();
        let (event_tx, event_rx) = unbounded_channel();
        let supervisor = TrackerSupervisor::new(
            processor.fetcher.clone(),
            processor.codecs.clone(),
            config.clone(),
            event_tx,
        );
        let known: HashSet<String> = ignore.into_iter().collect();
        let state = Arc::new(SequenceState {
            known: RwLock::new(known.clone()),
            ..Default::default()
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let span = tracing::info_span!("notification_sequence", inbox = %inbox);
        tokio::spawn(
            run_sequence(
                processor,
                inbox.clone(),
                known,
                event_rx,
                state.clone(),
                config.poll_interval(),
                shutdown_rx,
            )
            .instrument(span),
        );
        supervisor.subscribe(&inbox);
        NotificationSequence {
            inbox,
            state,
            supervisor,
            shutdown: shutdown_tx,
        }
    }

    pub fn inbox(&self) -> &str {
        &self.inbox
    }

    /// The next buffered notification, without waiting.
    pub fn read(&self) -> Option<Notification> {
        if self.is_closed() {
            return None;
        }
        self.state.buffer.lock().pop_front()
    }

    /// Waits for the next notification. Returns `None` once the sequence is closed, or
    /// exhausted with an empty buffer.
    pub async fn next(&self) -> Option<Notification> {
        loop {
            let readable = self.state.readable.notified();
            if let Some(notification) = self.read() {
                return Some(notification);
            }
            if self.is_closed() || self.is_exhausted() {
                return None;
            }
            readable.await;
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Notification> {
        futures::stream::unfold(self, |sequence| async move {
            let notification = sequence.next().await?;
            Some((notification, sequence))
        })
    }

    /// Stops watching. A batch still running completes but its results are dropped.
    pub fn close(&self) {
        if self.state.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.supervisor.unsubscribe(&self.inbox);
        let _ = self.shutdown.send(true);
        self.state.buffer.lock().clear();
        self.state.readable.notify_waiters();
        tracing::info!("[NotificationSequence] Closed {}", self.inbox);
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// True once the supervisor gave up reconnecting; no further notifications will arrive.
    pub fn is_exhausted(&self) -> bool {
        self.state.exhausted.load(Ordering::SeqCst)
    }

    /// `Err(AgentError::ReconnectionExhausted)` once the inbox is no longer tracked.
    pub fn health(&self) -> Result<(), AgentError> {
        if self.is_exhausted() {
            Err(AgentError::ReconnectionExhausted(self.inbox.clone()))
        } else {
            Ok(())
        }
    }

    pub fn buffered(&self) -> usize {
        self.state.buffer.lock().len()
    }

    /// Every member processed so far, plus the ignored IDs.
    pub fn known_ids(&self) -> HashSet<String> {
        self.state.known.read().clone()
    }

    /// Drains the IDs whose deletion failed since the last call.
    pub fn take_failed_deletions(&self) -> Vec<String> {
        std::mem::take(&mut *self.state.failed_deletions.lock())
    }

    pub fn subscription_state(&self) -> Option<SubscriptionState> {
        self.supervisor.state(&self.inbox)
    }

    pub fn reconnect_attempts(&self) -> Option<u32> {
        self.supervisor.reconnect_attempts(&self.inbox)
    }
}

impl Drop for NotificationSequence {
    fn drop(&mut self) {
        self.close();
    }
}

/// Runs batches one at a time as change signals arrive.
///
/// A failed batch leaves its members unknown, but the tracker that signalled them has already
/// recorded them and will not signal again. The batch is therefore repeated after
/// `retry_delay` until it succeeds.
async fn run_sequence(
    processor: BatchProcessor,
    inbox: String,
    mut known: HashSet<String>,
    mut events: UnboundedReceiver<SupervisorEvent>,
    state: Arc<SequenceState>,
    retry_delay: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let retry = tokio::time::sleep(retry_delay);
    tokio::pin!(retry);
    let mut retry_pending = false;
    loop {
        let event = tokio::select! {
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
            () = &mut retry, if retry_pending => {
                tracing::debug!("[NotificationSequence] Retrying the failed batch for {inbox}");
                SupervisorEvent::Change(ChangeSignal::now(inbox.as_str()))
            }
            _ = shutdown_rx.changed() => break,
        };
        match event {
            SupervisorEvent::Change(signal) => {
                tracing::debug!(
                    "[NotificationSequence] Change in {} signalled at {}",
                    signal.inbox,
                    signal.timestamp
                );
                let result = processor.process(&inbox, &known).await;
                if state.closed.load(Ordering::SeqCst) {
                    tracing::debug!("[NotificationSequence] Closed during a batch, discarding it");
                    break;
                }
                match result {
                    Ok(outcome) => {
                        retry_pending = false;
                        known.extend(outcome.processed.iter().cloned());
                        state.publish(outcome);
                    }
                    Err(e) => {
                        tracing::warn!(
                            "[NotificationSequence] Batch for {inbox} failed, retrying in \
                             {retry_delay:?}: {e}"
                        );
                        retry.as_mut().reset(Instant::now() + retry_delay);
                        retry_pending = true;
                    }
                }
            }
            SupervisorEvent::Reconnecting { attempt, delay, .. } => {
                tracing::debug!(
                    "[NotificationSequence] Tracker reconnecting (attempt {attempt}, in {delay:?})"
                );
            }
            SupervisorEvent::Exhausted { attempts, .. } => {
                tracing::warn!(
                    "[NotificationSequence] {} after {attempts} attempts, no more updates",
                    AgentError::ReconnectionExhausted(inbox.clone())
                );
                state.exhausted.store(true, Ordering::SeqCst);
                state.readable.notify_waiters();
            }
        }
    }
}
