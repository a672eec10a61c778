//! Desktop style notifications raised for delivered inbox items.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::AgentError,
    rdf::{vocab, CodecMap, Quad},
};

pub const NOTIFICATION_TITLE: &str = "Solid notification";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemNotification {
    pub title: String,
    pub message: String,
}

/// Raises notifications on the host system. Failures are logged by the caller and never abort
/// the processing of an inbox.
#[async_trait]
pub trait SystemNotifier: Send + Sync {
    async fn notify(&self, notification: SystemNotification) -> Result<(), AgentError>;
}

/// Writes notifications to the log instead of a desktop notification service.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl SystemNotifier for TracingNotifier {
    async fn notify(&self, notification: SystemNotification) -> Result<(), AgentError> {
        tracing::info!(
            "[SystemNotifier] {}\n{}",
            notification.title,
            notification.message
        );
        Ok(())
    }
}

/// Builds the text of a system notification.
///
/// Lines appear in this order, each only when its value is known: the sender (`dct:creator`),
/// the matched filter names, the received date. The body follows: the `as:content` text when
/// present, otherwise the whole graph serialized as `content_type`.
pub fn compose_message(
    quads: &[Quad],
    filters: &[String],
    received: Option<DateTime<Utc>>,
    codecs: &CodecMap,
    content_type: &str,
) -> Result<String, AgentError> {
    let mut message = String::new();
    if let Some(sender) = quads.iter().find(|q| q.has_predicate(vocab::DCT_CREATOR)) {
        message.push_str(&format!("Sender: {}\n", sender.object.value()));
    }
    if !filters.is_empty() {
        message.push_str(&format!("Filter: {}\n", filters.join(", ")));
    }
    if let Some(received) = received {
        message.push_str(&format!("Received: {}\n", received.to_rfc2822()));
    }
    match quads.iter().find(|q| q.has_predicate(vocab::AS_CONTENT)) {
        Some(content) => message.push_str(content.object.value()),
        None => message.push_str(&codecs.serialize(content_type, quads)?),
    }
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rdf::{self, Term};

    fn statement(predicate: &str, object: Term) -> Quad {
        Quad::new(Term::iri("http://pod/inbox/n1"), Term::iri(predicate), object)
    }

    #[test]
    fn lines_follow_sender_filter_date_order() {
        let quads = vec![
            statement(vocab::AS_CONTENT, Term::literal("Hello Bob")),
            statement(vocab::DCT_CREATOR, Term::iri("https://alice.pod/profile#me")),
        ];
        let received = DateTime::parse_from_rfc3339("2024-02-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let message = compose_message(
            &quads,
            &["work".to_string()],
            Some(received),
            &CodecMap::create(),
            rdf::N_TRIPLES,
        )
        .unwrap();
        let lines: Vec<&str> = message.lines().collect();
        assert_eq!(lines[0], "Sender: https://alice.pod/profile#me");
        assert_eq!(lines[1], "Filter: work");
        assert!(lines[2].starts_with("Received: Thu,") && lines[2].contains("Feb 2024"));
        assert_eq!(lines[3], "Hello Bob");
    }

    #[test]
    fn graph_is_serialized_without_content() {
        let quads = vec![statement(vocab::AS_TO, Term::iri("https://bob.pod/profile#me"))];
        let message =
            compose_message(&quads, &[], None, &CodecMap::create(), rdf::N_TRIPLES).unwrap();
        assert_eq!(
            message.trim(),
            "<http://pod/inbox/n1> <https://www.w3.org/ns/activitystreams#to> <https://bob.pod/profile#me> ."
        );
    }
}
