//! fediwire - ActivityPub federation core
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Federation Layer                          │
//! │  - Inbox processing (verify, validate, store)               │
//! │  - Signed delivery                                          │
//! │  - WebFinger discovery, public key cache                    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Document Layer                            │
//! │  - Field metadata registry                                  │
//! │  - Schema-checked document wrapper                          │
//! │  - Wire forms with and without @context                     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Collaborators (traits)                      │
//! │  - HttpClient (reqwest)                                     │
//! │  - DocumentStore, KeyPairProvider                           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `activitypub`: Field contracts and the `Document` wrapper
//! - `federation`: HTTP Signatures, inbox, delivery, WebFinger, key cache
//! - `config`: Configuration management
//! - `logging`: Tracing subscriber setup
//! - `metrics`: Prometheus counters
//! - `error`: Error types

pub mod activitypub;
pub mod config;
pub mod error;
pub mod federation;
pub mod logging;
pub mod metrics;

use std::sync::Arc;
use std::time::Duration;

/// Federation services shared by inbound and outbound handlers
///
/// Cloning is cheap; every service is behind an `Arc`.
#[derive(Clone)]
pub struct Federation {
    /// Federation configuration
    pub config: Arc<config::FederationConfig>,

    /// Field contracts for every document kind
    pub registry: Arc<activitypub::Registry>,

    /// HTTP client for discovery, key fetches and delivery
    pub http_client: Arc<dyn federation::HttpClient>,

    /// Remote public keys (volatile, TTL from config)
    pub key_cache: Arc<federation::PublicKeyCache>,

    /// Where accepted documents go
    pub store: Arc<dyn federation::DocumentStore>,

    /// Key material for local actors
    pub keys: Arc<dyn federation::KeyPairProvider>,
}

impl Federation {
    /// Build federation services from configuration
    ///
    /// # Steps
    /// 1. Validate configuration
    /// 2. Build the HTTP client
    /// 3. Initialize the key cache
    ///
    /// # Errors
    /// Returns error if the configuration is invalid or the HTTP client
    /// cannot be built
    pub fn new(
        config: config::FederationConfig,
        store: Arc<dyn federation::DocumentStore>,
        keys: Arc<dyn federation::KeyPairProvider>,
    ) -> Result<Self, error::FederationError> {
        config.validate()?;
        let http_client = Arc::new(federation::build_http_client(&config.http)?);
        Ok(Self::with_client(config, http_client, store, keys))
    }

    /// Build federation services around an existing HTTP client
    pub fn with_client(
        config: config::FederationConfig,
        http_client: Arc<dyn federation::HttpClient>,
        store: Arc<dyn federation::DocumentStore>,
        keys: Arc<dyn federation::KeyPairProvider>,
    ) -> Self {
        let registry = Arc::new(activitypub::Registry::standard());
        let key_cache = Arc::new(federation::PublicKeyCache::new(
            http_client.clone(),
            registry.clone(),
            Some(Duration::from_secs(config.key_cache.ttl_seconds)),
        ));

        tracing::info!(
            domain = %config.instance.domain,
            protocol = %config.instance.protocol,
            "Federation initialized"
        );

        Self {
            config: Arc::new(config),
            registry,
            http_client,
            key_cache,
            store,
            keys,
        }
    }

    /// A new, empty document checked against this instance's registry
    pub fn document(&self, kind: activitypub::DocumentKind) -> activitypub::Document {
        activitypub::Document::new(kind, self.registry.clone())
    }

    /// Inbox pipeline for inbound deliveries
    pub fn inbox(&self) -> federation::InboxProcessor {
        federation::InboxProcessor::new(
            self.registry.clone(),
            self.key_cache.clone(),
            self.store.clone(),
        )
    }

    /// Delivery service signing as the local actor `username`
    pub fn delivery_for(&self, username: &str) -> federation::ActivityDelivery {
        federation::ActivityDelivery::new(
            self.http_client.clone(),
            self.keys.clone(),
            self.config.instance.actor_uri(username),
        )
    }

    /// Periodically drop stale public keys from the cache
    ///
    /// The task runs until the returned handle is aborted or the runtime
    /// shuts down.
    pub fn spawn_key_cache_pruning(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let key_cache = self.key_cache.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);

            loop {
                interval.tick().await;
                let removed = key_cache.prune_expired().await;
                tracing::debug!(removed, "Key cache pruning pass complete");
            }
        });

        tracing::info!(every_seconds = every.as_secs(), "Key cache pruning task spawned");
        handle
    }

    /// Resolve a remote identifier via WebFinger
    pub async fn finger(
        &self,
        identifier: &str,
    ) -> Result<federation::WebFingerResponse, error::FederationError> {
        federation::finger(
            self.http_client.as_ref(),
            identifier,
            self.config.webfinger.preserve_port,
        )
        .await
    }
}
