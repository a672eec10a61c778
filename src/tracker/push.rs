use futures::{SinkExt, StreamExt};
use regex::Regex;
use std::sync::OnceLock;
use tokio::{
    sync::{mpsc::UnboundedSender, watch},
    task::JoinHandle,
};
use tokio_tungstenite::tungstenite::Message;
use tracing::Instrument;

use super::TrackerEvent;

fn publication_regex() -> &'static Regex {
    static PUB: OnceLock<Regex> = OnceLock::new();
    PUB.get_or_init(|| Regex::new(r"^pub +(.+)").expect("publication pattern is valid"))
}

/// The resource named by a `pub <resource>` publication, if `message` is one.
pub fn publication(message: &str) -> Option<&str> {
    publication_regex()
        .captures(message)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
}

/// Subscription request for `inbox`.
pub fn subscription(inbox: &str) -> String {
    format!("sub {inbox}")
}

/// Follows the websocket advertised by an inbox's `Updates-Via` header.
///
/// Once connected the tracker signals an update (to catch anything posted before the
/// subscription took effect) and subscribes to the inbox. Every `pub` publication on the
/// socket then signals an update. The publication target is not compared with the inbox,
/// because pods publish container changes under varying IRIs.
///
/// A failed connection, read error or close frame from the server emits
/// [`TrackerEvent::Closed`] and ends the task.
pub struct PushTracker {
    inbox: String,
    socket: String,
    shutdown: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl PushTracker {
    pub fn new(inbox: impl Into<String>, socket: impl Into<String>) -> Self {
        PushTracker {
            inbox: inbox.into(),
            socket: socket.into(),
            shutdown: None,
            handle: None,
        }
    }

    pub fn inbox(&self) -> &str {
        &self.inbox
    }

    pub fn socket(&self) -> &str {
        &self.socket
    }

    pub fn start(&mut self, events: UnboundedSender<TrackerEvent>) {
        self.stop();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let inbox = self.inbox.clone();
        let socket = self.socket.clone();
        self.shutdown = Some(shutdown_tx);
        let span = tracing::debug_span!("push_tracker", inbox = %inbox, socket = %socket);
        self.handle = Some(tokio::spawn(
            async move {
                tracing::info!("[PushTracker] Connecting to {socket} for {inbox}");
                let connected = tokio::select! {
                    res = tokio_tungstenite::connect_async(socket.as_str()) => res,
                    _ = shutdown_rx.changed() => return,
                };
                let ws_stream = match connected {
                    Ok((stream, _response)) => stream,
                    Err(e) => {
                        tracing::warn!("[PushTracker] Connection to {socket} failed: {e}");
                        close(&events, &shutdown_rx, format!("connection to {socket} failed: {e}"));
                        return;
                    }
                };
                let (mut write, mut read) = ws_stream.split();

                if events.send(TrackerEvent::Update).is_err() {
                    return;
                }
                if let Err(e) = write.send(Message::Text(subscription(&inbox).into())).await {
                    tracing::warn!("[PushTracker] Subscription to {inbox} failed: {e}");
                    close(&events, &shutdown_rx, format!("subscription failed: {e}"));
                    return;
                }
                tracing::debug!("[PushTracker] Subscribed to {inbox}");

                let reason = loop {
                    tokio::select! {
                        msg = read.next() => match msg {
                            Some(Ok(Message::Text(text))) => {
                                if let Some(resource) = publication(text.as_str()) {
                                    tracing::debug!("[PushTracker] Publication for {resource}");
                                    if events.send(TrackerEvent::Update).is_err() {
                                        return;
                                    }
                                } else {
                                    tracing::trace!(
                                        "[PushTracker] Ignoring message: {}",
                                        text.as_str()
                                    );
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                let _ = write.send(Message::Pong(data)).await;
                            }
                            Some(Ok(Message::Close(_))) => {
                                break format!("{socket} sent a close frame")
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => break format!("read error on {socket}: {e}"),
                            None => break format!("{socket} stream ended"),
                        },
                        _ = shutdown_rx.changed() => {
                            let _ = write.send(Message::Close(None)).await;
                            return;
                        }
                    }
                };
                tracing::info!("[PushTracker] Connection closed: {reason}");
                close(&events, &shutdown_rx, reason);
            }
            .instrument(span),
        ));
    }

    /// Closes the socket without emitting [`TrackerEvent::Closed`].
    pub fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        // The detached task exits once it observes the shutdown.
        if self.handle.take().is_some() {
            tracing::debug!("[PushTracker] Stopped {}", self.inbox);
        }
    }
}

impl Drop for PushTracker {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
    }
}

fn close(
    events: &UnboundedSender<TrackerEvent>,
    shutdown_rx: &watch::Receiver<bool>,
    reason: String,
) {
    if !*shutdown_rx.borrow() {
        let _ = events.send(TrackerEvent::Closed(reason));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_publications() {
        assert_eq!(publication("pub https://pod/inbox/"), Some("https://pod/inbox/"));
        assert_eq!(publication("pub   https://pod/inbox/n1"), Some("https://pod/inbox/n1"));
        assert_eq!(publication("ack https://pod/inbox/"), None);
        assert_eq!(publication("pub"), None);
    }

    #[test]
    fn subscription_names_the_inbox() {
        assert_eq!(subscription("https://pod/inbox/"), "sub https://pod/inbox/");
    }
}
