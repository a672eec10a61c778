//! # ldn-agent
//!
//! A Linked Data Notifications (LDN) client: discover inboxes, send notifications, read them
//! once or watch an inbox for new ones.
//!
//! ## Overview
//!
//! An inbox is an LDP container whose `ldp:contains` members are notification resources. The
//! agent reads and writes those resources through an injected [`fetch::ResourceFetcher`], so
//! authentication and HTTP client configuration stay with the caller.
//!
//! Watching an inbox is layered:
//!
//! - **[`tracker`]**: a change tracker detects that the inbox *may* have changed, either by
//!   polling the container listing or by following the pod's websocket (`Updates-Via`).
//! - **[`supervisor`]**: the [`supervisor::TrackerSupervisor`] keeps one tracker per inbox,
//!   restarts it with backoff when it closes and gives up after a bounded number of attempts.
//! - **[`sequence`]**: the [`sequence::NotificationSequence`] turns change signals into
//!   notifications: it diffs the listing against the members it already knows, fetches the new
//!   ones, runs the [`filter`] pipeline, optionally raises system notifications and deletes the
//!   resources, then buffers the results for the consumer.
//!
//! ### Key Features
//!
//! - **Inbox discovery** via `Link` header or `ldp:inbox` statement ([`discovery`])
//! - **Push or poll** change tracking chosen per (re)connection
//! - **Shape filters** evaluated by an injected validator ([`filter::ShapeValidator`])
//! - **Pluggable RDF syntaxes** through the [`rdf::CodecMap`] registry
//! - **TOML configuration** of intervals, backoff and filter policy ([`config`])
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ldn_agent::{agent::Agent, config::ListingOptions, fetch::HttpFetcher, rdf::CodecMap};
//! use std::sync::Arc;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let codecs = CodecMap::create();
//!     let agent = Agent::new(Arc::new(HttpFetcher::new(&codecs))).with_codecs(codecs);
//!
//!     let options = ListingOptions::for_resource("https://alice.pod/profile/card#me");
//!     let sequence = agent.watch(&options).await?;
//!     while let Some(notification) = sequence.next().await {
//!         println!("{}: {:?}", notification.id, notification.content());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ### Sending
//!
//! ```rust,no_run
//! # use ldn_agent::{agent::Agent, fetch::HttpFetcher, notification::NotificationData};
//! # use ldn_agent::rdf::CodecMap;
//! # use std::sync::Arc;
//! # async fn example() -> Result<(), ldn_agent::AgentError> {
//! # let agent = Agent::new(Arc::new(HttpFetcher::new(&CodecMap::create())));
//! let mut data = NotificationData::text("Hello Bob", "https://bob.pod/profile/card#me");
//! data.from = Some("https://alice.pod/profile/card#me".to_string());
//! for delivery in agent.send(&data).await? {
//!     println!("{} -> {}: {}", delivery.receiver, delivery.inbox, delivery.is_success());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Logging
//!
//! Everything is reported through `tracing`; the crate never installs a subscriber. Spawned
//! tasks run inside spans carrying the inbox they serve.

pub mod agent;
pub mod config;
pub mod discovery;
pub mod error;
pub mod fetch;
pub mod filter;
pub mod notification;
pub mod notify;
pub mod rdf;
pub mod sequence;
pub mod supervisor;
pub mod tracker;

pub use error::*;
