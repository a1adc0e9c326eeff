//! Persistence and key collaborators
//!
//! Relational persistence lives outside the federation core. The core only
//! needs to save accepted documents by URI, read them back, and obtain the
//! key pair of the local actor it is signing for.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use super::signature::KeyPair;
use crate::activitypub::Document;
use crate::error::FederationError;

/// Load/save documents by URI
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Internal wire form of the document stored at `uri`, if any
    async fn load(&self, uri: &str) -> Result<Option<Map<String, Value>>, FederationError>;

    /// Persist `document` under `uri`, replacing any previous version
    async fn save(&self, uri: &str, document: &Document) -> Result<(), FederationError>;
}

/// Key material for local actors
#[async_trait]
pub trait KeyPairProvider: Send + Sync {
    async fn key_pair(&self, actor: &str) -> Result<KeyPair, FederationError>;
}

/// In-memory document store (intended for tests and single-process tools).
#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: RwLock<HashMap<String, Map<String, Value>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn load(&self, uri: &str) -> Result<Option<Map<String, Value>>, FederationError> {
        Ok(self.documents.read().await.get(uri).cloned())
    }

    async fn save(&self, uri: &str, document: &Document) -> Result<(), FederationError> {
        self.documents
            .write()
            .await
            .insert(uri.to_string(), document.to_wire());
        tracing::debug!(uri, kind = %document.kind(), "Document stored");
        Ok(())
    }
}
