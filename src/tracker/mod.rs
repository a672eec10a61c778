//! Change trackers: background tasks that signal "the inbox may have changed".
//!
//! Two strategies exist:
//!
//! - [`PollTracker`] re-reads the container listing on a fixed interval and signals when an
//!   unseen member appears.
//! - [`PushTracker`] subscribes to a notification websocket advertised by the pod through the
//!   `Updates-Via` header and signals on every matching publication.
//!
//! Trackers report through an unbounded channel of [`TrackerEvent`]s handed to
//! [`ChangeTracker::start`]. An update carries no payload; consumers re-read the inbox. A push
//! tracker ends with a single [`TrackerEvent::Closed`] when its connection is lost. Stopping a
//! tracker never emits `Closed`.

use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

use crate::{config::AgentConfig, fetch::ResourceFetcher, rdf::CodecMap};

pub mod poll;
pub mod push;

pub use poll::PollTracker;
pub use push::PushTracker;

/// Header through which a pod advertises its websocket notification endpoint.
pub const UPDATES_VIA: &str = "updates-via";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerEvent {
    /// The inbox may have new members.
    Update,
    /// The tracker lost its source and will emit nothing more.
    Closed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerKind {
    Poll,
    Push,
}

pub enum ChangeTracker {
    Poll(PollTracker),
    Push(PushTracker),
}

impl ChangeTracker {
    pub fn kind(&self) -> TrackerKind {
        match self {
            ChangeTracker::Poll(_) => TrackerKind::Poll,
            ChangeTracker::Push(_) => TrackerKind::Push,
        }
    }

    pub fn inbox(&self) -> &str {
        match self {
            ChangeTracker::Poll(tracker) => tracker.inbox(),
            ChangeTracker::Push(tracker) => tracker.inbox(),
        }
    }

    /// Spawns the tracker task. Must be called from within a tokio runtime.
    pub fn start(&mut self, events: UnboundedSender<TrackerEvent>) {
        match self {
            ChangeTracker::Poll(tracker) => tracker.start(events),
            ChangeTracker::Push(tracker) => tracker.start(events),
        }
    }

    pub fn stop(&mut self) {
        match self {
            ChangeTracker::Poll(tracker) => tracker.stop(),
            ChangeTracker::Push(tracker) => tracker.stop(),
        }
    }
}

/// Chooses the tracking strategy for `inbox`.
///
/// The inbox is fetched once. A response carrying an `Updates-Via` header yields a push
/// tracker bound to the advertised socket; anything else, a failed request included, falls
/// back to polling.
pub async fn select_tracker(
    fetcher: Arc<dyn ResourceFetcher>,
    codecs: CodecMap,
    inbox: &str,
    config: &AgentConfig,
) -> ChangeTracker {
    let socket = match fetcher.get(inbox).await {
        Ok(response) => response
            .header(UPDATES_VIA)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        Err(e) => {
            tracing::warn!("[ChangeTracker] Could not probe {inbox} for push support: {e}");
            None
        }
    };
    match socket {
        Some(socket) => {
            tracing::debug!("[ChangeTracker] {inbox} advertises push updates via {socket}");
            ChangeTracker::Push(PushTracker::new(inbox, socket))
        }
        None => {
            tracing::debug!(
                "[ChangeTracker] Polling {inbox} every {:?}",
                config.poll_interval()
            );
            ChangeTracker::Poll(PollTracker::new(
                fetcher,
                codecs,
                inbox,
                config.poll_interval(),
            ))
        }
    }
}
