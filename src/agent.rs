//! The [`Agent`] facade: send, list, watch and clear inbox notifications.

use std::{collections::HashSet, sync::Arc};

use crate::{
    config::{AgentConfig, ListingOptions},
    discovery,
    error::AgentError,
    fetch::{self, FetchResponse, ResourceFetcher},
    filter::{validate_filters, FilterPipeline, ShapeValidator, UnconfiguredValidator},
    notification::{strip_fragment, Notification, NotificationData},
    notify::{SystemNotifier, TracingNotifier},
    rdf::CodecMap,
    sequence::{BatchProcessor, NotificationSequence},
};

/// Notifications read by a single [`Agent::list`] call.
#[must_use = "failed deletions are only reported through `deletion_result`"]
#[derive(Debug, Clone, Default)]
pub struct InboxListing {
    pub inbox: String,
    pub notifications: Vec<Notification>,
    /// IDs whose deletion failed. Empty unless deletion was requested.
    pub failed_deletions: Vec<String>,
}

impl InboxListing {
    /// `Err(AgentError::Deletion)` naming every notification that could not be removed.
    pub fn deletion_result(&self) -> Result<(), AgentError> {
        if self.failed_deletions.is_empty() {
            Ok(())
        } else {
            Err(AgentError::Deletion(self.failed_deletions.clone()))
        }
    }
}

/// Outcome of posting a notification to one receiver.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub receiver: String,
    pub inbox: String,
    pub result: Result<FetchResponse, AgentError>,
}

impl Delivery {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Entry point of the crate. Holds the injected collaborators shared by every operation.
#[derive(Clone)]
pub struct Agent {
    fetcher: Arc<dyn ResourceFetcher>,
    codecs: CodecMap,
    validator: Arc<dyn ShapeValidator>,
    notifier: Arc<dyn SystemNotifier>,
    config: AgentConfig,
}

impl Agent {
    /// An agent with the built-in codecs, no shape validator and log based system
    /// notifications.
    pub fn new(fetcher: Arc<dyn ResourceFetcher>) -> Self {
        Agent {
            fetcher,
            codecs: CodecMap::create(),
            validator: Arc::new(UnconfiguredValidator),
            notifier: Arc::new(TracingNotifier),
            config: AgentConfig::default(),
        }
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_codecs(mut self, codecs: CodecMap) -> Self {
        self.codecs = codecs;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn ShapeValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn SystemNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn codecs(&self) -> &CodecMap {
        &self.codecs
    }

    pub async fn discover_inbox(&self, resource: &str) -> Result<String, AgentError> {
        discovery::discover_inbox(self.fetcher.as_ref(), &self.codecs, resource).await
    }

    /// The inbox named by `options`: `inbox` as given, or the one advertised by `uri`.
    pub async fn resolve_inbox(&self, options: &ListingOptions) -> Result<String, AgentError> {
        if let Some(inbox) = options.inbox.as_ref().filter(|i| !i.is_empty()) {
            return Ok(strip_fragment(inbox).to_string());
        }
        match options.uri.as_ref().filter(|u| !u.is_empty()) {
            Some(uri) => Ok(strip_fragment(&self.discover_inbox(uri).await?).to_string()),
            None => Err(AgentError::Validation(
                "Neither an inbox nor a resource to discover it from was given".to_string(),
            )),
        }
    }

    fn processor(&self, options: &ListingOptions) -> BatchProcessor {
        BatchProcessor::new(
            self.fetcher.clone(),
            self.codecs.clone(),
            FilterPipeline::new(
                self.fetcher.clone(),
                self.codecs.clone(),
                self.validator.clone(),
                self.config.filter_policy,
            ),
            self.notifier.clone(),
            self.config.content_type.clone(),
            options.filters.clone(),
            options.delete,
            options.notify,
        )
    }

    /// Posts `data` to the inbox of every receiver.
    ///
    /// The request is checked and every receiver's inbox discovered before anything is posted;
    /// a failure in either step aborts the send. Failed posts are reported per receiver.
    #[tracing::instrument(skip_all)]
    pub async fn send(&self, data: &NotificationData) -> Result<Vec<Delivery>, AgentError> {
        data.check()?;
        let quads = data.to_quads(self.fetcher.as_ref(), &self.codecs).await?;
        let body = self.codecs.serialize(&self.config.content_type, &quads)?;

        let mut targets = Vec::new();
        for receiver in data.receivers().filter(|r| !r.is_empty()) {
            let inbox = self.discover_inbox(receiver).await.map_err(|e| {
                AgentError::Discovery(format!("Could not discover inbox of {receiver}: {e}"))
            })?;
            targets.push((receiver.clone(), inbox));
        }

        let mut deliveries = Vec::with_capacity(targets.len());
        for (receiver, inbox) in targets {
            let result = fetch::post_resource(
                self.fetcher.as_ref(),
                &inbox,
                body.clone(),
                &self.config.content_type,
                "Notification delivery",
            )
            .await;
            match &result {
                Ok(_) => tracing::info!("Delivered notification to {receiver} ({inbox})"),
                Err(e) => tracing::warn!("Could not deliver notification to {receiver}: {e}"),
            }
            deliveries.push(Delivery {
                receiver,
                inbox,
                result,
            });
        }
        Ok(deliveries)
    }

    /// Reads the inbox once.
    ///
    /// Deletion failures do not fail the call: it returns `Ok` and lists the IDs in
    /// [`InboxListing::failed_deletions`]. Check [`InboxListing::deletion_result`] to turn them
    /// into an [`AgentError::Deletion`].
    #[tracing::instrument(skip_all)]
    pub async fn list(&self, options: &ListingOptions) -> Result<InboxListing, AgentError> {
        validate_filters(&options.filters)?;
        let inbox = self.resolve_inbox(options).await?;
        let known: HashSet<String> = options.ignore.iter().cloned().collect();
        let outcome = self.processor(options).process(&inbox, &known).await?;
        Ok(InboxListing {
            inbox,
            notifications: outcome.delivered,
            failed_deletions: outcome.failed_deletions,
        })
    }

    /// Starts watching the inbox. Must be called from within a tokio runtime.
    #[tracing::instrument(skip_all)]
    pub async fn watch(
        &self,
        options: &ListingOptions,
    ) -> Result<NotificationSequence, AgentError> {
        validate_filters(&options.filters)?;
        let inbox = self.resolve_inbox(options).await?;
        Ok(NotificationSequence::start(
            self.processor(options),
            &self.config,
            &inbox,
            options.ignore.iter().cloned(),
        ))
    }

    /// Deletes `ids` from the inbox, or every member of the inbox when `ids` is empty.
    /// Returns the deleted IDs.
    #[tracing::instrument(skip_all)]
    pub async fn clear(
        &self,
        options: &ListingOptions,
        ids: &[String],
    ) -> Result<Vec<String>, AgentError> {
        let targets = if ids.is_empty() {
            let inbox = self.resolve_inbox(options).await?;
            fetch::get_container_members(self.fetcher.as_ref(), &self.codecs, &inbox).await?
        } else {
            ids.to_vec()
        };
        let mut deleted = Vec::with_capacity(targets.len());
        let mut failed = Vec::new();
        for id in targets {
            match fetch::delete_resource(self.fetcher.as_ref(), &id, "Notification removal").await {
                Ok(_) => deleted.push(id),
                Err(e) => {
                    tracing::warn!("{e}");
                    failed.push(id);
                }
            }
        }
        if failed.is_empty() {
            Ok(deleted)
        } else {
            Err(AgentError::Deletion(failed))
        }
    }
}
