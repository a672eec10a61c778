//! Shape filters deciding which notifications surface.
//!
//! A [`Filter`] names a shape resource. The [`FilterPipeline`] loads each shape graph, asks
//! the injected [`ShapeValidator`] whether a notification conforms to it, and converts the
//! verdict into a match under the configured [`FilterPolicy`].
//!
//! The default policy is [`FilterPolicy::MatchOnNonConformance`]: a filter matches a
//! notification whose graph does *not* conform to the shape. Shapes therefore describe what
//! to exclude unless the policy is switched to [`FilterPolicy::MatchOnConformance`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, path::Path, sync::Arc};
use url::Url;

use crate::{
    error::AgentError,
    fetch::{self, ResourceFetcher},
    rdf::{self, CodecMap, Quad},
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default)]
    pub name: String,
    /// Inline shape content. Not supported; present so configurations using it fail loudly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<String>,
    /// IRI (or local path) of the shape resource.
    #[serde(default, alias = "shapeFileURI", skip_serializing_if = "Option::is_none")]
    pub shape_iri: Option<String>,
}

impl Filter {
    pub fn new(name: impl Into<String>, shape_iri: impl Into<String>) -> Self {
        Filter {
            name: name.into(),
            shape: None,
            shape_iri: Some(shape_iri.into()),
        }
    }

    /// Checks the filter configuration and returns the shape location.
    pub fn shape_location(&self) -> Result<&str, AgentError> {
        if self.name.trim().is_empty() {
            return Err(AgentError::Validation(
                "Filter requires a name parameter".to_string(),
            ));
        }
        if self.shape.is_some() {
            return Err(AgentError::Validation(format!(
                "Filter '{}': inline shapes are not supported, reference a shape resource instead",
                self.name
            )));
        }
        self.shape_iri
            .as_deref()
            .filter(|iri| !iri.trim().is_empty())
            .ok_or_else(|| {
                AgentError::Validation(format!(
                    "Filter '{}' requires a shape resource IRI",
                    self.name
                ))
            })
    }
}

/// Validates every filter up front; a single malformed filter rejects the whole list.
pub fn validate_filters(filters: &[Filter]) -> Result<(), AgentError> {
    let mut names = HashSet::new();
    for filter in filters {
        filter.shape_location()?;
        if !names.insert(filter.name.as_str()) {
            return Err(AgentError::Validation(format!(
                "Filter name '{}' is used more than once",
                filter.name
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub conforms: bool,
    pub messages: Vec<String>,
}

/// Shape (SHACL) evaluation.
#[async_trait]
pub trait ShapeValidator: Send + Sync {
    async fn validate(
        &self,
        data: &[Quad],
        shapes: &[Quad],
    ) -> Result<ValidationReport, AgentError>;
}

/// Placeholder validator that rejects every evaluation. Used until a real one is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredValidator;

#[async_trait]
impl ShapeValidator for UnconfiguredValidator {
    async fn validate(
        &self,
        _data: &[Quad],
        _shapes: &[Quad],
    ) -> Result<ValidationReport, AgentError> {
        Err(AgentError::Validation(
            "Filters require a shape validator, none is configured".to_string(),
        ))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterPolicy {
    /// A filter matches when the notification does not conform to its shape.
    #[default]
    MatchOnNonConformance,
    /// A filter matches when the notification conforms to its shape.
    MatchOnConformance,
}

impl FilterPolicy {
    pub fn matches(&self, conforms: bool) -> bool {
        match self {
            FilterPolicy::MatchOnNonConformance => !conforms,
            FilterPolicy::MatchOnConformance => conforms,
        }
    }
}

/// A filter with its shape graph loaded.
#[derive(Debug, Clone)]
pub struct LoadedFilter {
    pub name: String,
    pub shapes: Arc<Vec<Quad>>,
}

#[derive(Clone)]
pub struct FilterPipeline {
    fetcher: Arc<dyn ResourceFetcher>,
    codecs: CodecMap,
    validator: Arc<dyn ShapeValidator>,
    policy: FilterPolicy,
}

impl FilterPipeline {
    pub fn new(
        fetcher: Arc<dyn ResourceFetcher>,
        codecs: CodecMap,
        validator: Arc<dyn ShapeValidator>,
        policy: FilterPolicy,
    ) -> Self {
        FilterPipeline {
            fetcher,
            codecs,
            validator,
            policy,
        }
    }

    pub fn policy(&self) -> FilterPolicy {
        self.policy
    }

    /// Validates `filters` and loads their shape graphs, in order.
    pub async fn load(&self, filters: &[Filter]) -> Result<Vec<LoadedFilter>, AgentError> {
        validate_filters(filters)?;
        let mut loaded = Vec::with_capacity(filters.len());
        for filter in filters {
            let location = filter.shape_location()?;
            let shapes = self.load_shape(location).await?;
            loaded.push(LoadedFilter {
                name: filter.name.clone(),
                shapes: Arc::new(shapes),
            });
        }
        Ok(loaded)
    }

    async fn load_shape(&self, location: &str) -> Result<Vec<Quad>, AgentError> {
        if Url::parse(location).is_ok() {
            let (quads, _) =
                fetch::get_quads(self.fetcher.as_ref(), &self.codecs, location, "Shape retrieval")
                    .await?;
            return Ok(quads);
        }
        let path = Path::new(location);
        let media_type = match path.extension().and_then(|e| e.to_str()) {
            Some("nq") => rdf::N_QUADS,
            Some("ttl") => "text/turtle",
            Some("jsonld") => "application/ld+json",
            _ => rdf::N_TRIPLES,
        };
        let content = tokio::fs::read_to_string(path).await?;
        let base = format!("file://{}", path.display());
        self.codecs.parse(media_type, &content, &base)
    }

    /// Names of the loaded filters matched by `quads`, in filter order.
    pub async fn evaluate(
        &self,
        quads: &[Quad],
        filters: &[LoadedFilter],
    ) -> Result<Vec<String>, AgentError> {
        let mut matched = Vec::new();
        for filter in filters {
            let report = self.validator.validate(quads, &filter.shapes).await?;
            tracing::debug!(
                "Filter '{}': shape conforms: {}, report length: {}",
                filter.name,
                report.conforms,
                report.messages.len()
            );
            for message in &report.messages {
                tracing::trace!("Filter '{}': {message}", filter.name);
            }
            if self.policy.matches(report.conforms) {
                matched.push(filter.name.clone());
            }
        }
        Ok(matched)
    }

    /// Loads `filters` and evaluates them against `quads`.
    pub async fn apply(
        &self,
        quads: &[Quad],
        filters: &[Filter],
    ) -> Result<Vec<String>, AgentError> {
        let loaded = self.load(filters).await?;
        self.evaluate(quads, &loaded).await
    }
}
