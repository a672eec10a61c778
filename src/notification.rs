//! Notifications read from, and written to, LDN inboxes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    error::AgentError,
    fetch::{self, ResourceFetcher},
    rdf::{vocab, CodecMap, Quad, Term},
};

/// Tag carried by notifications delivered without any configured filter.
pub const DEFAULT_MATCH: &str = "default";

/// Subject of the statements of an outgoing notification. Receivers assign the final IRI.
pub const NOTIFICATION_SUBJECT: &str = "urn:Notification";

pub const TEXT_PLAIN: &str = "text/plain";

/// A notification delivered from an inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// IRI of the notification resource.
    pub id: String,
    pub quads: Vec<Quad>,
    /// `Last-Modified` of the resource, when the server reported one.
    pub last_modified: Option<DateTime<Utc>>,
    /// Names of the filters that matched, or [`DEFAULT_MATCH`] when none were configured.
    pub matched_filters: Vec<String>,
}

impl Notification {
    pub fn content(&self) -> Option<&str> {
        self.object_of(vocab::AS_CONTENT)
    }

    pub fn sender(&self) -> Option<&str> {
        self.object_of(vocab::DCT_CREATOR)
    }

    fn object_of(&self, predicate: &str) -> Option<&str> {
        self.quads
            .iter()
            .find(|q| q.has_predicate(predicate))
            .map(|q| q.object.value())
    }
}

/// Outgoing notification.
///
/// The body is taken from `body` or, failing that, from `file`, a local path or an IRI. Plain
/// text becomes a single `as:content` literal; any other `content_type` is parsed with the
/// registered codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NotificationData {
    pub body: Option<String>,
    pub file: Option<String>,
    /// Media type of the body.
    pub content_type: String,
    pub from: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
}

impl Default for NotificationData {
    fn default() -> Self {
        NotificationData {
            body: None,
            file: None,
            content_type: TEXT_PLAIN.to_string(),
            from: None,
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
        }
    }
}

impl NotificationData {
    pub fn text(body: impl Into<String>, to: impl Into<String>) -> Self {
        NotificationData {
            body: Some(body.into()),
            to: vec![to.into()],
            ..Default::default()
        }
    }

    pub fn check(&self) -> Result<(), AgentError> {
        if self.to.iter().all(|r| r.trim().is_empty()) {
            return Err(AgentError::Validation(
                "No notification receivers were given".to_string(),
            ));
        }
        if self.body.is_none() && self.file.is_none() {
            return Err(AgentError::Validation(
                "No notification body or file was given".to_string(),
            ));
        }
        Ok(())
    }

    /// Every receiver: `to`, then `cc`, then `bcc`.
    pub fn receivers(&self) -> impl Iterator<Item = &String> {
        self.to.iter().chain(&self.cc).chain(&self.bcc)
    }

    async fn load_body(&self, fetcher: &dyn ResourceFetcher) -> Result<String, AgentError> {
        if let Some(body) = &self.body {
            return Ok(body.clone());
        }
        let Some(file) = &self.file else {
            return Err(AgentError::Validation(
                "No notification body or file was given".to_string(),
            ));
        };
        if Url::parse(file).is_ok_and(|u| matches!(u.scheme(), "http" | "https")) {
            let response = fetch::get_resource(fetcher, file, "Notification body").await?;
            Ok(response.body)
        } else {
            Ok(tokio::fs::read_to_string(file).await?)
        }
    }

    /// Builds the statements of the notification.
    pub async fn to_quads(
        &self,
        fetcher: &dyn ResourceFetcher,
        codecs: &CodecMap,
    ) -> Result<Vec<Quad>, AgentError> {
        self.check()?;
        let body = self.load_body(fetcher).await?;
        let subject = || Term::iri(NOTIFICATION_SUBJECT);
        let mut quads = if crate::rdf::essence(&self.content_type) == TEXT_PLAIN {
            vec![Quad::new(
                subject(),
                Term::iri(vocab::AS_CONTENT),
                Term::typed_literal(body, vocab::XSD_STRING),
            )]
        } else {
            codecs.parse(&self.content_type, &body, NOTIFICATION_SUBJECT)?
        };
        if let Some(from) = self.from.as_ref().filter(|f| !f.is_empty()) {
            quads.push(Quad::new(
                subject(),
                Term::iri(vocab::DCT_CREATOR),
                Term::iri(from.as_str()),
            ));
        }
        for (predicate, receivers) in [
            (vocab::AS_TO, &self.to),
            (vocab::AS_CC, &self.cc),
            (vocab::AS_BCC, &self.bcc),
        ] {
            for receiver in receivers.iter().filter(|r| !r.is_empty()) {
                quads.push(Quad::new(
                    subject(),
                    Term::iri(predicate),
                    Term::iri(receiver.as_str()),
                ));
            }
        }
        Ok(quads)
    }
}

/// Removes the fragment of `iri`, if any.
pub fn strip_fragment(iri: &str) -> &str {
    iri.split_once('#').map_or(iri, |(base, _)| base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchResponse;
    use async_trait::async_trait;

    struct Offline;

    #[async_trait]
    impl ResourceFetcher for Offline {
        async fn get(&self, iri: &str) -> Result<FetchResponse, AgentError> {
            Err(AgentError::Transport(format!("offline: {iri}")))
        }
        async fn post(
            &self,
            iri: &str,
            _body: String,
            _ct: &str,
        ) -> Result<FetchResponse, AgentError> {
            Err(AgentError::Transport(format!("offline: {iri}")))
        }
        async fn delete(&self, iri: &str) -> Result<FetchResponse, AgentError> {
            Err(AgentError::Transport(format!("offline: {iri}")))
        }
    }

    #[test_log::test(tokio::test)]
    async fn plain_text_becomes_content() {
        let mut data = NotificationData::text("Hello Bob", "https://bob.pod/profile#me");
        data.from = Some("https://alice.pod/profile#me".to_string());
        data.cc = vec!["https://carol.pod/profile#me".to_string()];
        let quads = data.to_quads(&Offline, &CodecMap::create()).await.unwrap();
        assert_eq!(quads.len(), 4);
        assert!(quads
            .iter()
            .all(|q| q.subject.as_iri() == Some(NOTIFICATION_SUBJECT)));
        assert_eq!(quads[0].object, Term::typed_literal("Hello Bob", vocab::XSD_STRING));
        assert!(quads.iter().any(|q| q.has_predicate(vocab::DCT_CREATOR)));
        assert!(quads.iter().any(|q| q.has_predicate(vocab::AS_CC)));
    }

    #[test_log::test(tokio::test)]
    async fn rdf_bodies_are_parsed_against_the_notification_subject() {
        let data = NotificationData {
            body: Some("<> <https://www.w3.org/ns/activitystreams#summary> \"hi\" .".to_string()),
            content_type: crate::rdf::N_TRIPLES.to_string(),
            to: vec!["https://bob.pod/profile#me".to_string()],
            ..Default::default()
        };
        let quads = data.to_quads(&Offline, &CodecMap::create()).await.unwrap();
        assert_eq!(quads[0].subject.as_iri(), Some(NOTIFICATION_SUBJECT));
    }

    #[test]
    fn receivers_and_body_are_required() {
        assert!(NotificationData::default().check().is_err());
        let no_body = NotificationData {
            to: vec!["https://bob.pod/profile#me".to_string()],
            ..Default::default()
        };
        assert!(matches!(no_body.check(), Err(AgentError::Validation(_))));
        assert!(NotificationData::text("hi", "https://bob.pod/profile#me")
            .check()
            .is_ok());
    }

    #[test]
    fn fragments_are_stripped() {
        assert_eq!(strip_fragment("https://pod/inbox/n1#it"), "https://pod/inbox/n1");
        assert_eq!(strip_fragment("https://pod/inbox/n1"), "https://pod/inbox/n1");
    }
}
