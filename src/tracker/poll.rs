use std::{collections::HashSet, sync::Arc, time::Duration};
use tokio::{
    sync::mpsc::UnboundedSender,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::Instrument;

use super::TrackerEvent;
use crate::{
    fetch::{self, ResourceFetcher},
    rdf::CodecMap,
};

/// Polls a container listing and signals when a member appears that it has not seen before.
///
/// The first poll happens one interval after [`PollTracker::start`]; every member present at
/// that point is new to the tracker and produces an update. Removals never signal. Failed polls
/// are logged and retried on the next tick, so a poll tracker never closes on its own.
pub struct PollTracker {
    fetcher: Arc<dyn ResourceFetcher>,
    codecs: CodecMap,
    inbox: String,
    interval: Duration,
    handle: Option<JoinHandle<()>>,
}

impl PollTracker {
    pub fn new(
        fetcher: Arc<dyn ResourceFetcher>,
        codecs: CodecMap,
        inbox: impl Into<String>,
        interval: Duration,
    ) -> Self {
        PollTracker {
            fetcher,
            codecs,
            inbox: inbox.into(),
            interval,
            handle: None,
        }
    }

    pub fn inbox(&self) -> &str {
        &self.inbox
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn start(&mut self, events: UnboundedSender<TrackerEvent>) {
        self.stop();
        let fetcher = self.fetcher.clone();
        let codecs = self.codecs.clone();
        let inbox = self.inbox.clone();
        let period = self.interval;
        let span = tracing::debug_span!("poll_tracker", inbox = %inbox);
        self.handle = Some(tokio::spawn(
            async move {
                tracing::info!("[PollTracker] Watching {inbox} every {period:?}");
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                let mut seen: HashSet<String> = HashSet::new();
                loop {
                    ticker.tick().await;
                    let listing = fetch::get_container_members(fetcher.as_ref(), &codecs, &inbox);
                    let members = match listing.await {
                        Ok(members) => members,
                        Err(e) => {
                            tracing::warn!("[PollTracker] Poll of {inbox} failed: {e}");
                            continue;
                        }
                    };
                    let mut changed = false;
                    for member in members {
                        changed |= seen.insert(member);
                    }
                    if changed {
                        tracing::debug!("[PollTracker] New members in {inbox}");
                        if events.send(TrackerEvent::Update).is_err() {
                            tracing::debug!("[PollTracker] Receiver dropped, stopping {inbox}");
                            break;
                        }
                    }
                }
            }
            .instrument(span),
        ));
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            tracing::debug!("[PollTracker] Stopped {}", self.inbox);
        }
    }
}

impl Drop for PollTracker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
