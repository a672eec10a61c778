//! In-memory pod, validator and notifier shared by the integration tests.

use async_trait::async_trait;
use http::{header::CONTENT_TYPE, HeaderName, HeaderValue, StatusCode};
use ldn_agent::{
    fetch::{FetchResponse, ResourceFetcher},
    filter::{ShapeValidator, ValidationReport},
    notify::{SystemNotification, SystemNotifier},
    rdf::{vocab, Quad, N_TRIPLES},
    AgentError,
};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tokio::sync::Notify;

#[derive(Default)]
struct Container {
    members: Vec<String>,
    headers: Vec<(String, String)>,
}

/// In-memory pod.
///
/// Containers list their members as n-triples `ldp:contains` statements; deleting a resource
/// also removes it from every container.
#[derive(Default)]
pub struct MockFetcher {
    resources: Mutex<HashMap<String, FetchResponse>>,
    containers: Mutex<HashMap<String, Container>>,
    delete_failures: Mutex<HashMap<String, StatusCode>>,
    post_failures: Mutex<HashMap<String, StatusCode>>,
    deleted: Mutex<Vec<String>>,
    posted: Mutex<Vec<(String, String, String)>>,
    gets: Mutex<Vec<String>>,
    held: Mutex<HashMap<String, Arc<Notify>>>,
}

#[allow(dead_code)]
impl MockFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(MockFetcher::default())
    }

    /// Serves `body` as n-triples at `iri`.
    pub fn serve(&self, iri: &str, body: &str) {
        let mut response = FetchResponse::new(StatusCode::OK);
        response
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(N_TRIPLES));
        response.body = body.to_string();
        self.serve_response(iri, response);
    }

    pub fn serve_response(&self, iri: &str, response: FetchResponse) {
        self.resources.lock().insert(iri.to_string(), response);
    }

    pub fn add_header(&self, iri: &str, name: &str, value: &str) {
        if let Some(container) = self.containers.lock().get_mut(iri) {
            container.headers.push((name.to_string(), value.to_string()));
            return;
        }
        if let Some(response) = self.resources.lock().get_mut(iri) {
            response.headers.append(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
    }

    pub fn create_inbox(&self, inbox: &str) {
        self.containers
            .lock()
            .entry(inbox.to_string())
            .or_default();
    }

    /// Adds `id` to `inbox` and serves a notification whose content is `text`.
    pub fn add_notification(&self, inbox: &str, id: &str, text: &str) {
        self.serve(id, &notification_body(id, text));
        self.add_member(inbox, id);
    }

    /// Lists `id` in `inbox` without serving it.
    pub fn add_member(&self, inbox: &str, id: &str) {
        self.containers
            .lock()
            .entry(inbox.to_string())
            .or_default()
            .members
            .push(id.to_string());
    }

    pub fn fail_delete(&self, iri: &str, status: StatusCode) {
        self.delete_failures.lock().insert(iri.to_string(), status);
    }

    pub fn fail_post(&self, iri: &str, status: StatusCode) {
        self.post_failures.lock().insert(iri.to_string(), status);
    }

    /// GETs of `iri` wait until [`MockFetcher::release`] is called.
    pub fn hold(&self, iri: &str) {
        self.held
            .lock()
            .insert(iri.to_string(), Arc::new(Notify::new()));
    }

    pub fn release(&self, iri: &str) {
        if let Some(gate) = self.held.lock().remove(iri) {
            gate.notify_one();
        }
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }

    /// `(iri, body, content type)` of every POST.
    pub fn posted(&self) -> Vec<(String, String, String)> {
        self.posted.lock().clone()
    }

    pub fn get_count(&self, iri: &str) -> usize {
        self.gets.lock().iter().filter(|g| *g == iri).count()
    }

    fn listing(inbox: &str, container: &Container) -> FetchResponse {
        let mut response = FetchResponse::new(StatusCode::OK);
        response
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(N_TRIPLES));
        for (name, value) in &container.headers {
            response.headers.append(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        response.body = container
            .members
            .iter()
            .map(|m| format!("<{inbox}> <{}> <{m}> .\n", vocab::LDP_CONTAINS))
            .collect();
        response
    }
}

#[async_trait]
impl ResourceFetcher for MockFetcher {
    async fn get(&self, iri: &str) -> Result<FetchResponse, AgentError> {
        self.gets.lock().push(iri.to_string());
        let gate = self.held.lock().get(iri).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(container) = self.containers.lock().get(iri) {
            return Ok(MockFetcher::listing(iri, container));
        }
        Ok(self
            .resources
            .lock()
            .get(iri)
            .cloned()
            .unwrap_or_else(|| FetchResponse::new(StatusCode::NOT_FOUND)))
    }

    async fn post(
        &self,
        iri: &str,
        body: String,
        content_type: &str,
    ) -> Result<FetchResponse, AgentError> {
        if let Some(status) = self.post_failures.lock().get(iri) {
            return Ok(FetchResponse::new(*status));
        }
        self.posted
            .lock()
            .push((iri.to_string(), body, content_type.to_string()));
        Ok(FetchResponse::new(StatusCode::CREATED))
    }

    async fn delete(&self, iri: &str) -> Result<FetchResponse, AgentError> {
        if let Some(status) = self.delete_failures.lock().get(iri) {
            return Ok(FetchResponse::new(*status));
        }
        if self.resources.lock().remove(iri).is_none() {
            return Ok(FetchResponse::new(StatusCode::NOT_FOUND));
        }
        for container in self.containers.lock().values_mut() {
            container.members.retain(|m| m != iri);
        }
        self.deleted.lock().push(iri.to_string());
        Ok(FetchResponse::new(StatusCode::OK))
    }
}

/// N-Triples body of a notification `id` carrying `text` as its content.
#[allow(dead_code)]
pub fn notification_body(id: &str, text: &str) -> String {
    format!(
        "<{id}> <{}> \"{text}\" .\n<{id}> <{}> <https://alice.pod/profile/card#me> .\n",
        vocab::AS_CONTENT,
        vocab::DCT_CREATOR
    )
}

/// Reports conformance for notifications whose subject is in `conforming`.
#[derive(Default)]
pub struct ScriptedValidator {
    conforming: HashSet<String>,
}

#[allow(dead_code)]
impl ScriptedValidator {
    pub fn conforming(ids: &[&str]) -> Arc<Self> {
        Arc::new(ScriptedValidator {
            conforming: ids.iter().map(|s| s.to_string()).collect(),
        })
    }
}

#[async_trait]
impl ShapeValidator for ScriptedValidator {
    async fn validate(
        &self,
        data: &[Quad],
        _shapes: &[Quad],
    ) -> Result<ValidationReport, AgentError> {
        let conforms = data
            .iter()
            .any(|q| self.conforming.contains(q.subject.value()));
        Ok(ValidationReport {
            conforms,
            messages: if conforms {
                Vec::new()
            } else {
                vec!["shape violation".to_string()]
            },
        })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    received: Mutex<Vec<SystemNotification>>,
}

#[allow(dead_code)]
impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(RecordingNotifier::default())
    }

    pub fn received(&self) -> Vec<SystemNotification> {
        self.received.lock().clone()
    }
}

#[async_trait]
impl SystemNotifier for RecordingNotifier {
    async fn notify(&self, notification: SystemNotification) -> Result<(), AgentError> {
        self.received.lock().push(notification);
        Ok(())
    }
}
