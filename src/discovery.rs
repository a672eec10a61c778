//! LDN inbox discovery (<https://www.w3.org/TR/ldn/#discovery>).
//!
//! A resource advertises its inbox either with a `Link` header whose relation is
//! `ldp:inbox`, or with an `<resource> ldp:inbox <inbox>` statement in its body. The header
//! wins and short-circuits body parsing.

use http::{header::LINK, HeaderMap};
use regex::Regex;
use std::sync::OnceLock;

use crate::{
    error::AgentError,
    fetch::{self, ResourceFetcher},
    rdf::{vocab, CodecMap},
};

fn link_regex() -> &'static Regex {
    static LINK_VALUE: OnceLock<Regex> = OnceLock::new();
    LINK_VALUE.get_or_init(|| {
        Regex::new(r#"<([^>]*)>((?:\s*;\s*[A-Za-z*\-]+\s*=\s*(?:"[^"]*"|[^;,\s]*))*)"#)
            .expect("link pattern is valid")
    })
}

fn rel_regex() -> &'static Regex {
    static REL: OnceLock<Regex> = OnceLock::new();
    REL.get_or_init(|| {
        Regex::new(r#"(?i);\s*rel\s*=\s*(?:"([^"]*)"|([^;,\s]*))"#).expect("rel pattern is valid")
    })
}

/// Returns the target of the first `Link` header value carrying the `ldp:inbox` relation.
pub fn inbox_link(headers: &HeaderMap) -> Option<String> {
    for value in headers.get_all(LINK).iter() {
        let Ok(value) = value.to_str() else {
            continue;
        };
        for link in link_regex().captures_iter(value) {
            let params = link.get(2).map(|m| m.as_str()).unwrap_or_default();
            let is_inbox = rel_regex().captures_iter(params).any(|rel| {
                rel.get(1)
                    .or_else(|| rel.get(2))
                    .map(|m| m.as_str().split_whitespace().any(|r| r == vocab::LDP_INBOX))
                    .unwrap_or(false)
            });
            if is_inbox {
                return Some(link[1].to_string());
            }
        }
    }
    None
}

/// Resolves the inbox advertised by `resource`.
///
/// No caching is performed; callers that discover the same resource repeatedly may cache the
/// result themselves.
#[tracing::instrument(skip(fetcher, codecs))]
pub async fn discover_inbox(
    fetcher: &dyn ResourceFetcher,
    codecs: &CodecMap,
    resource: &str,
) -> Result<String, AgentError> {
    let response = fetch::get_resource(fetcher, resource, "Inbox discovery")
        .await
        .map_err(|e| AgentError::Discovery(format!("Could not retrieve {resource}: {e}")))?;

    if let Some(inbox) = inbox_link(&response.headers) {
        tracing::debug!("Inbox of {resource} advertised by link header: {inbox}");
        return Ok(inbox);
    }

    let quads = fetch::parse_response(codecs, resource, &response)
        .map_err(|e| AgentError::Discovery(format!("Could not read {resource}: {e}")))?;
    let mut candidates = quads
        .iter()
        .filter(|q| q.has_predicate(vocab::LDP_INBOX) && q.object.is_named());
    let first = candidates.clone().next();
    let inbox = candidates
        .find(|q| q.subject.as_iri() == Some(resource))
        .or(first)
        .and_then(|q| q.object.as_iri())
        .map(str::to_string);

    match inbox {
        Some(inbox) => {
            tracing::debug!("Inbox of {resource} advertised in body: {inbox}");
            Ok(inbox)
        }
        None => Err(AgentError::Discovery(format!(
            "Could not find an inbox for resource {resource}."
        ))),
    }
}
