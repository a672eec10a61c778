//! Authenticated resource access.
//!
//! Every network interaction of the agent goes through a [`ResourceFetcher`], injected at
//! construction. Session establishment is the caller's concern: [`HttpFetcher`] accepts a
//! pre-configured [`reqwest::Client`] carrying whatever credentials the pod requires.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use http::{
    header::{ACCEPT, CONTENT_TYPE, LAST_MODIFIED},
    HeaderMap, StatusCode,
};

use crate::{
    error::AgentError,
    rdf::{self, CodecMap, Quad},
};

#[derive(Debug, Clone, Default)]
pub struct FetchResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl FetchResponse {
    pub fn new(status: StatusCode) -> Self {
        FetchResponse {
            status,
            ..Default::default()
        }
    }

    /// The first value of header `name`, if it is valid visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Value of the `Last-Modified` header parsed as an HTTP date.
    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.headers
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
            .map(|d| d.with_timezone(&Utc))
    }
}

#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn get(&self, iri: &str) -> Result<FetchResponse, AgentError>;

    async fn post(
        &self,
        iri: &str,
        body: String,
        content_type: &str,
    ) -> Result<FetchResponse, AgentError>;

    async fn delete(&self, iri: &str) -> Result<FetchResponse, AgentError>;
}

/// GET `iri`, failing with a typed fetch error unless the server answers 200.
pub async fn get_resource(
    fetcher: &dyn ResourceFetcher,
    iri: &str,
    operation: &str,
) -> Result<FetchResponse, AgentError> {
    tracing::debug!("[{operation}] GET {iri}");
    let response = fetcher.get(iri).await?;
    expect_status(response, StatusCode::OK, iri, operation)
}

/// POST `body` to `iri`. Only 201 counts as success; a 202 is reported as an anomaly.
pub async fn post_resource(
    fetcher: &dyn ResourceFetcher,
    iri: &str,
    body: String,
    content_type: &str,
    operation: &str,
) -> Result<FetchResponse, AgentError> {
    tracing::debug!("[{operation}] POST {iri} ({content_type}, {} bytes)", body.len());
    let response = fetcher.post(iri, body, content_type).await?;
    expect_status(response, StatusCode::CREATED, iri, operation)
}

pub async fn delete_resource(
    fetcher: &dyn ResourceFetcher,
    iri: &str,
    operation: &str,
) -> Result<FetchResponse, AgentError> {
    tracing::debug!("[{operation}] DELETE {iri}");
    let response = fetcher.delete(iri).await?;
    expect_status(response, StatusCode::OK, iri, operation)
}

fn expect_status(
    response: FetchResponse,
    expected: StatusCode,
    iri: &str,
    operation: &str,
) -> Result<FetchResponse, AgentError> {
    if response.status == expected {
        Ok(response)
    } else {
        if response.status == StatusCode::ACCEPTED {
            tracing::warn!("[{operation}] {iri} answered 202 Accepted, expected {expected}");
        }
        Err(AgentError::fetch(response.status, iri, operation))
    }
}

/// Parse a response body with the codec matching its `Content-Type`.
pub fn parse_response(
    codecs: &CodecMap,
    iri: &str,
    response: &FetchResponse,
) -> Result<Vec<Quad>, AgentError> {
    let media_type = rdf::media_type(&response.headers)?;
    codecs
        .parse(&media_type, &response.body, iri)
        .map_err(|e| AgentError::Parse(format!("Error parsing resource at {iri}: {e}")))
}

/// GET `iri` and parse it into statements.
pub async fn get_quads(
    fetcher: &dyn ResourceFetcher,
    codecs: &CodecMap,
    iri: &str,
    operation: &str,
) -> Result<(Vec<Quad>, FetchResponse), AgentError> {
    let response = get_resource(fetcher, iri, operation).await?;
    let quads = parse_response(codecs, iri, &response)?;
    Ok((quads, response))
}

/// The current `ldp:contains` members of the container at `inbox`.
pub async fn get_container_members(
    fetcher: &dyn ResourceFetcher,
    codecs: &CodecMap,
    inbox: &str,
) -> Result<Vec<String>, AgentError> {
    let (quads, _) = get_quads(fetcher, codecs, inbox, "Inbox retrieval").await?;
    Ok(rdf::container_members(&quads, inbox))
}

/// [`ResourceFetcher`] over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    accept: String,
}

impl HttpFetcher {
    /// Uses a default client and asks for every media type registered in `codecs`.
    pub fn new(codecs: &CodecMap) -> Self {
        HttpFetcher::with_client(reqwest::Client::new(), codecs)
    }

    pub fn with_client(client: reqwest::Client, codecs: &CodecMap) -> Self {
        HttpFetcher {
            client,
            accept: codecs.accept_header(),
        }
    }

    async fn convert(response: reqwest::Response) -> Result<FetchResponse, AgentError> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await?;
        Ok(FetchResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl ResourceFetcher for HttpFetcher {
    async fn get(&self, iri: &str) -> Result<FetchResponse, AgentError> {
        let response = self
            .client
            .get(iri)
            .header(ACCEPT, self.accept.as_str())
            .send()
            .await?;
        HttpFetcher::convert(response).await
    }

    async fn post(
        &self,
        iri: &str,
        body: String,
        content_type: &str,
    ) -> Result<FetchResponse, AgentError> {
        let response = self
            .client
            .post(iri)
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?;
        HttpFetcher::convert(response).await
    }

    async fn delete(&self, iri: &str) -> Result<FetchResponse, AgentError> {
        let response = self.client.delete(iri).send().await?;
        HttpFetcher::convert(response).await
    }
}
