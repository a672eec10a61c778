use std::{fmt, io};

use http::status::StatusCode;
use regex::Error as RegexError;
use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;
use url::ParseError as UrlParseError;

/// Classification of an unexpected HTTP status returned by a [`ResourceFetcher`].
///
/// [`ResourceFetcher`]: crate::fetch::ResourceFetcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchErrorKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Redirected,
    /// Any other 4xx status.
    Client,
    /// Any 5xx status.
    Server,
    /// A 2xx status other than the one the operation expects (e.g. a POST answered with 202).
    UnexpectedSuccess,
    /// Status codes outside of the 2xx-5xx range.
    Other,
}

impl FetchErrorKind {
    pub fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::BAD_REQUEST => FetchErrorKind::BadRequest,
            StatusCode::UNAUTHORIZED => FetchErrorKind::Unauthorized,
            StatusCode::FORBIDDEN => FetchErrorKind::Forbidden,
            StatusCode::NOT_FOUND => FetchErrorKind::NotFound,
            s if s.is_success() => FetchErrorKind::UnexpectedSuccess,
            s if s.is_redirection() => FetchErrorKind::Redirected,
            s if s.is_client_error() => FetchErrorKind::Client,
            s if s.is_server_error() => FetchErrorKind::Server,
            _ => FetchErrorKind::Other,
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            FetchErrorKind::BadRequest => "bad request sent by client",
            FetchErrorKind::Unauthorized => "client is unauthorized to access the resource",
            FetchErrorKind::Forbidden => "client is forbidden from accessing the resource",
            FetchErrorKind::NotFound => "resource was not found",
            FetchErrorKind::Redirected => "resource has been redirected",
            FetchErrorKind::Client => "error with client request",
            FetchErrorKind::Server => "internal server error",
            FetchErrorKind::UnexpectedSuccess => "unexpected success status",
            FetchErrorKind::Other => "unexpected status",
        }
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum AgentError {
    #[error("Inbox discovery error: {0}")]
    Discovery(String),
    #[error("{operation} of {iri} failed with status {status}: {kind}")]
    Fetch {
        kind: FetchErrorKind,
        iri: String,
        status: u16,
        operation: String,
    },
    #[error("RDF parse error: {0}")]
    Parse(String),
    #[error("Invalid configuration: {0}")]
    Validation(String),
    #[error("Failed to remove notifications: {}", .0.join(", "))]
    Deletion(Vec<String>),
    #[error("Reconnection attempts exhausted for {0}")]
    ReconnectionExhausted(String),
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("Custom error: {0}")]
    Custom(String),
}

impl AgentError {
    /// Builds the typed fetch error for `status` returned while running `operation` on `iri`.
    pub fn fetch(status: StatusCode, iri: &str, operation: &str) -> AgentError {
        AgentError::Fetch {
            kind: FetchErrorKind::from_status(status),
            iri: iri.to_string(),
            status: status.as_u16(),
            operation: operation.to_string(),
        }
    }

    pub fn fetch_kind(&self) -> Option<FetchErrorKind> {
        match self {
            AgentError::Fetch { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AgentError::Discovery(_) => StatusCode::NOT_FOUND,
            AgentError::Fetch { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            AgentError::Parse(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AgentError::Validation(_) => StatusCode::BAD_REQUEST,
            AgentError::Deletion(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AgentError::ReconnectionExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
            AgentError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AgentError::Transport(_) => StatusCode::BAD_GATEWAY,
            AgentError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AgentError::Custom(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<io::Error> for AgentError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => AgentError::Io(format!("not found: {x}")),
            _ => AgentError::Io(format!("IOError: {}", x.kind())),
        }
    }
}

impl From<UrlParseError> for AgentError {
    fn from(src: UrlParseError) -> AgentError {
        AgentError::Validation(format!("Invalid IRI: {src}"))
    }
}

impl From<JsonError> for AgentError {
    fn from(src: JsonError) -> AgentError {
        AgentError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<toml::de::Error> for AgentError {
    fn from(src: toml::de::Error) -> AgentError {
        AgentError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for AgentError {
    fn from(src: toml::ser::Error) -> AgentError {
        AgentError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<RegexError> for AgentError {
    fn from(x: RegexError) -> Self {
        AgentError::Serialization(format!("Regex parse failed: {x}"))
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(x: reqwest::Error) -> Self {
        AgentError::Transport(format!("http client: {x}"))
    }
}

impl From<WsError> for AgentError {
    fn from(x: WsError) -> Self {
        AgentError::Transport(format!("websocket: {x}"))
    }
}
