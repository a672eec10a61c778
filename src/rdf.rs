//! In-memory RDF statements and the codec registry used to read and write them.
//!
//! Parsing and serialization of concrete RDF syntaxes is delegated to [`RdfCodec`]
//! implementations registered per media type in a [`CodecMap`]. The crate ships with an
//! N-Triples/N-Quads codec ([`NTriplesCodec`]); richer syntaxes (Turtle, JSON-LD) are
//! registered by the caller:
//!
//! ```rust
//! use ldn_agent::rdf::{CodecMap, NTriplesCodec};
//!
//! let codecs = CodecMap::create();
//! // Treat a server's turtle answers as n-triples (valid for the n-triples subset of turtle)
//! codecs.insert("text/turtle", NTriplesCodec);
//! assert!(codecs.get("text/turtle; charset=utf-8").is_some());
//! ```

use http::{header::CONTENT_TYPE, HeaderMap};
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter},
    sync::{Arc, OnceLock},
};
use url::Url;

use crate::error::AgentError;

/// Vocabulary terms used by the LDN protocol and the notification format.
pub mod vocab {
    pub const LDP_INBOX: &str = "http://www.w3.org/ns/ldp#inbox";
    pub const LDP_CONTAINS: &str = "http://www.w3.org/ns/ldp#contains";
    pub const DCT_CREATOR: &str = "http://purl.org/dc/terms/creator";
    pub const AS_CONTENT: &str = "https://www.w3.org/ns/activitystreams#content";
    pub const AS_TO: &str = "https://www.w3.org/ns/activitystreams#to";
    pub const AS_CC: &str = "https://www.w3.org/ns/activitystreams#cc";
    pub const AS_BCC: &str = "https://www.w3.org/ns/activitystreams#bcc";
    pub const XSD_STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
}

pub const N_TRIPLES: &str = "application/n-triples";
pub const N_QUADS: &str = "application/n-quads";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Term {
    Iri(String),
    BlankNode(String),
    Literal {
        value: String,
        datatype: Option<String>,
        language: Option<String>,
    },
}

impl Term {
    pub fn iri(value: impl Into<String>) -> Term {
        Term::Iri(value.into())
    }

    pub fn literal(value: impl Into<String>) -> Term {
        Term::Literal {
            value: value.into(),
            datatype: None,
            language: None,
        }
    }

    pub fn typed_literal(value: impl Into<String>, datatype: impl Into<String>) -> Term {
        Term::Literal {
            value: value.into(),
            datatype: Some(datatype.into()),
            language: None,
        }
    }

    /// The lexical value of the term: the IRI, the blank node label or the literal value.
    pub fn value(&self) -> &str {
        match self {
            Term::Iri(v) | Term::BlankNode(v) => v.as_str(),
            Term::Literal { value, .. } => value.as_str(),
        }
    }

    /// Returns the IRI if this term is a named node.
    pub fn as_iri(&self) -> Option<&str> {
        match self {
            Term::Iri(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn is_named(&self) -> bool {
        matches!(self, Term::Iri(_))
    }
}

impl Display for Term {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Term::Iri(iri) => write!(f, "<{iri}>"),
            Term::BlankNode(label) => write!(f, "_:{label}"),
            Term::Literal {
                value,
                datatype,
                language,
            } => {
                write!(f, "\"{}\"", escape_literal(value))?;
                if let Some(lang) = language {
                    write!(f, "@{lang}")
                } else if let Some(dt) = datatype.as_ref().filter(|dt| *dt != vocab::XSD_STRING) {
                    write!(f, "^^<{dt}>")
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// A single RDF statement, optionally scoped to a named graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Quad {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
    pub graph: Option<Term>,
}

impl Quad {
    pub fn new(subject: Term, predicate: Term, object: Term) -> Quad {
        Quad {
            subject,
            predicate,
            object,
            graph: None,
        }
    }

    pub fn has_predicate(&self, predicate: &str) -> bool {
        self.predicate.as_iri() == Some(predicate)
    }
}

impl Display for Quad {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{} {} {}", self.subject, self.predicate, self.object)?;
        if let Some(graph) = &self.graph {
            write!(f, " {graph}")?;
        }
        write!(f, " .")
    }
}

/// Returns the object IRIs of every `<subject> ldp:contains ?o` statement, in document order.
pub fn container_members(quads: &[Quad], container: &str) -> Vec<String> {
    quads
        .iter()
        .filter(|q| q.has_predicate(vocab::LDP_CONTAINS) && q.subject.as_iri() == Some(container))
        .filter_map(|q| q.object.as_iri().map(str::to_string))
        .collect()
}

/// Converts between a wire syntax and a statement sequence.
pub trait RdfCodec: Send + Sync {
    /// Parse `content`, resolving relative IRIs against `base_iri`.
    fn parse(&self, content: &str, base_iri: &str) -> Result<Vec<Quad>, AgentError>;

    fn serialize(&self, quads: &[Quad]) -> Result<String, AgentError>;
}

/// Registry of codecs keyed by media type.
#[allow(clippy::type_complexity)]
pub struct CodecMap(Arc<RwLock<Vec<(String, Arc<dyn RdfCodec>)>>>);

impl Clone for CodecMap {
    fn clone(&self) -> Self {
        CodecMap(self.0.clone())
    }
}

impl Default for CodecMap {
    fn default() -> Self {
        CodecMap::create()
    }
}

impl std::fmt::Debug for CodecMap {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CodecMap").field(&self.media_types()).finish()
    }
}

impl CodecMap {
    pub fn create() -> Self {
        CodecMap(Arc::new(RwLock::new(vec![
            (N_TRIPLES.to_string(), Arc::new(NTriplesCodec) as Arc<dyn RdfCodec>),
            (N_QUADS.to_string(), Arc::new(NTriplesCodec) as Arc<dyn RdfCodec>),
        ])))
    }

    pub fn insert<T: RdfCodec + 'static>(&self, media_type: &str, codec: T) {
        let media_type = essence(media_type);
        let mut writer = self.0.write();
        if let Some(entry) = writer.iter_mut().find(|(mt, _)| *mt == media_type) {
            entry.1 = Arc::new(codec);
        } else {
            writer.push((media_type, Arc::new(codec)));
        }
    }

    /// Looks up a codec, ignoring media type parameters such as `charset`.
    pub fn get(&self, media_type: &str) -> Option<Arc<dyn RdfCodec>> {
        let media_type = essence(media_type);
        self.0
            .read()
            .iter()
            .find(|(mt, _)| *mt == media_type)
            .map(|(_, codec)| codec.clone())
    }

    pub fn media_types(&self) -> Vec<String> {
        self.0.read().iter().map(|(mt, _)| mt.clone()).collect()
    }

    /// Value for an `Accept` header listing every registered media type.
    pub fn accept_header(&self) -> String {
        self.media_types().join(", ")
    }

    pub fn parse(
        &self,
        media_type: &str,
        content: &str,
        base_iri: &str,
    ) -> Result<Vec<Quad>, AgentError> {
        let codec = self.get(media_type).ok_or_else(|| {
            AgentError::Parse(format!("no RDF codec registered for media type '{media_type}'"))
        })?;
        codec.parse(content, base_iri)
    }

    pub fn serialize(&self, media_type: &str, quads: &[Quad]) -> Result<String, AgentError> {
        let codec = self.get(media_type).ok_or_else(|| {
            AgentError::Serialization(format!(
                "no RDF codec registered for media type '{media_type}'"
            ))
        })?;
        codec.serialize(quads)
    }
}

/// Strips parameters and normalizes case: `Text/Turtle; charset=utf-8` -> `text/turtle`.
pub fn essence(media_type: &str) -> String {
    media_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// The media type announced by a response's `Content-Type` header.
pub fn media_type(headers: &HeaderMap) -> Result<String, AgentError> {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(essence)
        .filter(|mt| !mt.is_empty())
        .ok_or_else(|| {
            AgentError::Parse(
                "Cannot parse server response. Server response did not contain a content-type header."
                    .to_string(),
            )
        })
}

/// Line based N-Triples / N-Quads codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct NTriplesCodec;

const TERM: &str = r#"<[^>]*>|_:[A-Za-z0-9_\-.]+"#;
const LITERAL: &str = r#""(?:[^"\\]|\\.)*"(?:\^\^<[^>]*>|@[A-Za-z]+(?:-[A-Za-z0-9]+)*)?"#;

fn statement_regex() -> &'static Regex {
    static STATEMENT: OnceLock<Regex> = OnceLock::new();
    STATEMENT.get_or_init(|| {
        Regex::new(&format!(
            r#"^\s*({TERM})\s+(<[^>]*>)\s+({TERM}|{LITERAL})\s*({TERM})?\s*\.\s*$"#
        ))
        .expect("statement pattern is valid")
    })
}

fn literal_regex() -> &'static Regex {
    static LIT: OnceLock<Regex> = OnceLock::new();
    LIT.get_or_init(|| {
        Regex::new(r#"^"((?:[^"\\]|\\.)*)"(?:\^\^<([^>]*)>|@([A-Za-z]+(?:-[A-Za-z0-9]+)*))?$"#)
            .expect("literal pattern is valid")
    })
}

impl NTriplesCodec {
    fn term(raw: &str, base: Option<&Url>) -> Result<Term, AgentError> {
        if let Some(iri) = raw.strip_prefix('<').and_then(|r| r.strip_suffix('>')) {
            return Ok(Term::Iri(resolve(iri, base)?));
        }
        if let Some(label) = raw.strip_prefix("_:") {
            return Ok(Term::BlankNode(label.to_string()));
        }
        let caps = literal_regex()
            .captures(raw)
            .ok_or_else(|| AgentError::Parse(format!("malformed term {raw}")))?;
        Ok(Term::Literal {
            value: unescape_literal(&caps[1])?,
            datatype: caps.get(2).map(|m| m.as_str().to_string()),
            language: caps.get(3).map(|m| m.as_str().to_string()),
        })
    }
}

impl RdfCodec for NTriplesCodec {
    fn parse(&self, content: &str, base_iri: &str) -> Result<Vec<Quad>, AgentError> {
        let base = Url::parse(base_iri).ok();
        let mut quads = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let caps = statement_regex().captures(trimmed).ok_or_else(|| {
                AgentError::Parse(format!("line {}: not an n-triples statement", idx + 1))
            })?;
            quads.push(Quad {
                subject: Self::term(&caps[1], base.as_ref())?,
                predicate: Self::term(&caps[2], base.as_ref())?,
                object: Self::term(&caps[3], base.as_ref())?,
                graph: caps
                    .get(4)
                    .map(|g| Self::term(g.as_str(), base.as_ref()))
                    .transpose()?,
            });
        }
        Ok(quads)
    }

    fn serialize(&self, quads: &[Quad]) -> Result<String, AgentError> {
        let mut out = String::new();
        for quad in quads {
            out.push_str(&quad.to_string());
            out.push('\n');
        }
        Ok(out)
    }
}

fn resolve(iri: &str, base: Option<&Url>) -> Result<String, AgentError> {
    if Url::parse(iri).is_ok() || iri.starts_with("urn:") {
        return Ok(iri.to_string());
    }
    match base {
        Some(base) if iri.is_empty() => Ok(base.to_string()),
        Some(base) => Ok(base.join(iri)?.to_string()),
        None => Ok(iri.to_string()),
    }
}

fn escape_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_literal(raw: &str) -> Result<String, AgentError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                let decoded = u32::from_str_radix(&hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| AgentError::Parse(format!("bad unicode escape \\u{hex}")))?;
                out.push(decoded);
            }
            other => {
                return Err(AgentError::Parse(format!("unknown escape \\{other:?}")));
            }
        }
    }
    Ok(out)
}
