//! Integration tests for change trackers and their supervisor.
//!
//! Push tracking runs against a websocket server bound to localhost; reconnection is exercised
//! by advertising a socket on a port nothing listens on.

mod common;

use common::MockFetcher;
use futures::{SinkExt, StreamExt};
use ldn_agent::{
    config::{AgentConfig, ReconnectConfig},
    rdf::CodecMap,
    supervisor::{SubscriptionState, SupervisorEvent, TrackerSupervisor},
    tracker::{select_tracker, PushTracker, TrackerEvent, TrackerKind, UPDATES_VIA},
};
use std::{sync::Arc, time::Duration};
use test_log::test;
use tokio::{
    net::TcpListener,
    sync::{
        mpsc::{unbounded_channel, UnboundedReceiver},
        oneshot,
    },
    time::timeout,
};
use tokio_tungstenite::tungstenite::Message;

const INBOX: &str = "https://bob.pod/inbox/";

fn config(poll_interval_ms: u64, base_delay_ms: u64) -> AgentConfig {
    AgentConfig {
        poll_interval_ms,
        reconnect: ReconnectConfig {
            base_delay_ms,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn supervisor(
    pod: &Arc<MockFetcher>,
    config: AgentConfig,
) -> (TrackerSupervisor, UnboundedReceiver<SupervisorEvent>) {
    let (tx, rx) = unbounded_channel();
    (
        TrackerSupervisor::new(pod.clone(), CodecMap::create(), config, tx),
        rx,
    )
}

async fn next_event(rx: &mut UnboundedReceiver<SupervisorEvent>) -> SupervisorEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("supervisor event within timeout")
        .expect("supervisor channel open")
}

/// A localhost port with no listener.
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Accepts one websocket client, reports its first message, publishes one change for the
/// inbox, then closes the connection.
async fn one_shot_server() -> (String, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (sub_tx, sub_rx) = oneshot::channel();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        if let Some(Ok(Message::Text(text))) = ws.next().await {
            let _ = sub_tx.send(text.as_str().to_string());
        }
        ws.send(Message::Text(format!("ack {INBOX}").into()))
            .await
            .unwrap();
        ws.send(Message::Text(format!("pub {INBOX}").into()))
            .await
            .unwrap();
        let _ = ws.close(None).await;
    });
    (url, sub_rx)
}

#[test(tokio::test)]
async fn test_tracker_selection_follows_updates_via() {
    let pod = MockFetcher::new();
    pod.create_inbox(INBOX);
    let config = AgentConfig::default();
    let tracker = select_tracker(pod.clone(), CodecMap::create(), INBOX, &config).await;
    assert_eq!(tracker.kind(), TrackerKind::Poll);

    pod.add_header(INBOX, UPDATES_VIA, "wss://bob.pod/");
    let tracker = select_tracker(pod.clone(), CodecMap::create(), INBOX, &config).await;
    assert_eq!(tracker.kind(), TrackerKind::Push);
    assert_eq!(tracker.inbox(), INBOX);
}

#[test(tokio::test)]
async fn test_subscribing_twice_is_a_no_op() {
    let pod = MockFetcher::new();
    pod.create_inbox(INBOX);
    let (supervisor, _rx) = supervisor(&pod, config(60_000, 1000));

    assert!(supervisor.subscribe(INBOX));
    assert!(!supervisor.subscribe(INBOX));
    assert!(!supervisor.subscribe(&format!("{INBOX}#fragment")));
    assert_eq!(supervisor.subscriptions(), vec![INBOX.to_string()]);

    assert!(supervisor.unsubscribe(INBOX));
    assert!(!supervisor.unsubscribe(INBOX));
    assert!(supervisor.subscriptions().is_empty());
}

#[test(tokio::test)]
async fn test_poll_tracker_signals_only_on_new_members() {
    let pod = MockFetcher::new();
    pod.add_member(INBOX, "https://bob.pod/inbox/a");
    let (supervisor, mut rx) = supervisor(&pod, config(20, 1000));
    supervisor.subscribe(INBOX);

    match next_event(&mut rx).await {
        SupervisorEvent::Change(signal) => assert_eq!(signal.inbox, INBOX),
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(
        supervisor.state(INBOX),
        Some(SubscriptionState::Active(TrackerKind::Poll))
    );

    // Unchanged listings stay silent.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err());

    pod.add_member(INBOX, "https://bob.pod/inbox/b");
    assert!(matches!(next_event(&mut rx).await, SupervisorEvent::Change(_)));
}

#[test(tokio::test)]
async fn test_no_signal_after_unsubscribe() {
    let pod = MockFetcher::new();
    pod.add_member(INBOX, "https://bob.pod/inbox/a");
    let (supervisor, mut rx) = supervisor(&pod, config(10, 1000));
    supervisor.subscribe(INBOX);
    assert!(matches!(next_event(&mut rx).await, SupervisorEvent::Change(_)));

    supervisor.unsubscribe(INBOX);
    while rx.try_recv().is_ok() {}

    for name in ["b", "c", "d"] {
        pod.add_member(INBOX, &format!("https://bob.pod/inbox/{name}"));
        tokio::time::sleep(Duration::from_millis(30)).await;
    }
    assert!(rx.try_recv().is_err());
    assert!(!supervisor.is_subscribed(INBOX));
}

#[test(tokio::test)]
async fn test_reconnection_is_exhausted_after_six_attempts() {
    let pod = MockFetcher::new();
    pod.create_inbox(INBOX);
    let port = closed_port().await;
    pod.add_header(INBOX, UPDATES_VIA, &format!("ws://127.0.0.1:{port}"));
    let (supervisor, mut rx) = supervisor(&pod, config(60_000, 5));
    supervisor.subscribe(INBOX);

    let mut attempts = Vec::new();
    loop {
        match next_event(&mut rx).await {
            SupervisorEvent::Reconnecting { attempt, delay, .. } => {
                assert_eq!(delay, Duration::from_millis(5));
                attempts.push(attempt);
            }
            SupervisorEvent::Exhausted { attempts: total, .. } => {
                assert_eq!(total, 6);
                break;
            }
            SupervisorEvent::Change(_) => panic!("no connection, no change"),
        }
    }
    assert_eq!(attempts, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(supervisor.state(INBOX), Some(SubscriptionState::Exhausted));
    assert_eq!(supervisor.reconnect_attempts(INBOX), Some(6));

    // Tracker selection ran once initially and once per restart, never after exhaustion.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(pod.get_count(INBOX), 7);
    assert!(rx.try_recv().is_err());

    // Subscribing again while exhausted changes nothing; a fresh subscription starts over.
    assert!(!supervisor.subscribe(INBOX));
    supervisor.unsubscribe(INBOX);
    assert!(supervisor.subscribe(INBOX));
    assert!(matches!(
        next_event(&mut rx).await,
        SupervisorEvent::Reconnecting { attempt: 1, .. }
    ));
}

#[test(tokio::test)]
async fn test_unsubscribe_cancels_pending_reconnect() {
    let pod = MockFetcher::new();
    pod.create_inbox(INBOX);
    let port = closed_port().await;
    pod.add_header(INBOX, UPDATES_VIA, &format!("ws://127.0.0.1:{port}"));
    let (supervisor, mut rx) = supervisor(&pod, config(60_000, 200));
    supervisor.subscribe(INBOX);

    assert!(matches!(
        next_event(&mut rx).await,
        SupervisorEvent::Reconnecting { attempt: 1, .. }
    ));
    assert_eq!(supervisor.state(INBOX), Some(SubscriptionState::Reconnecting));
    supervisor.unsubscribe(INBOX);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(pod.get_count(INBOX), 1);
    assert!(rx.try_recv().is_err());
}

#[test(tokio::test)]
async fn test_push_tracker_subscribes_and_signals_publications() {
    let pod = MockFetcher::new();
    pod.create_inbox(INBOX);
    let (url, sub_rx) = one_shot_server().await;
    pod.add_header(INBOX, UPDATES_VIA, &url);
    let (supervisor, mut rx) = supervisor(&pod, config(60_000, 60_000));
    supervisor.subscribe(INBOX);

    // One update on connect, one for the publication; the acknowledgement is ignored.
    assert!(matches!(next_event(&mut rx).await, SupervisorEvent::Change(_)));
    let subscription = timeout(Duration::from_secs(5), sub_rx).await.unwrap().unwrap();
    assert_eq!(subscription, format!("sub {INBOX}"));
    assert!(matches!(next_event(&mut rx).await, SupervisorEvent::Change(_)));

    // The server hangs up: the supervisor schedules a reconnect.
    assert!(matches!(
        next_event(&mut rx).await,
        SupervisorEvent::Reconnecting { attempt: 1, .. }
    ));
    supervisor.unsubscribe(INBOX);
}

#[test(tokio::test)]
async fn test_stopping_a_push_tracker_is_not_a_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let (tx, mut rx) = unbounded_channel();
    let mut tracker = PushTracker::new(INBOX, url);
    tracker.start(tx);
    let first = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
    assert_eq!(first, Some(TrackerEvent::Update));

    tracker.stop();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!matches!(rx.try_recv(), Ok(TrackerEvent::Closed(_))));
}

#[test(tokio::test)]
async fn test_push_tracker_reports_refused_connections() {
    let port = closed_port().await;
    let (tx, mut rx) = unbounded_channel();
    let mut tracker = PushTracker::new(INBOX, format!("ws://127.0.0.1:{port}"));
    tracker.start(tx);

    let event = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
    assert!(matches!(event, Some(TrackerEvent::Closed(_))));
}
