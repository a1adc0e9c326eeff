//! Inbound activity processing
//!
//! Every delivery runs the same pipeline:
//! 1. Resolve the signer's public key from the `Signature` keyId
//! 2. Verify the HTTP signature against what actually arrived
//! 3. Parse and validate the payload as a document
//! 4. Check the signer owns the document it sent
//! 5. Hand the document to the store
//!
//! A failure at any step rejects this one delivery only.

use std::sync::Arc;

use serde_json::Value;

use super::key_cache::PublicKeyCache;
use super::signature::{SignatureContext, key_id_matches_actor, verify};
use super::store::DocumentStore;
use crate::activitypub::{Document, DocumentKind, Registry};
use crate::error::FederationError;
use crate::metrics::ACTIVITIES_RECEIVED_TOTAL;

/// Verifies, validates and stores inbound documents
pub struct InboxProcessor {
    registry: Arc<Registry>,
    keys: Arc<PublicKeyCache>,
    store: Arc<dyn DocumentStore>,
}

impl InboxProcessor {
    pub fn new(
        registry: Arc<Registry>,
        keys: Arc<PublicKeyCache>,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            registry,
            keys,
            store,
        }
    }

    /// Process one inbound delivery
    ///
    /// # Arguments
    /// * `method` - HTTP method the request arrived with
    /// * `path` - Request path (and query) as received
    /// * `headers` - All request headers
    /// * `body` - Raw request body, exactly as received
    ///
    /// # Errors
    /// - `InvalidSignature` if the request is unsigned or does not verify
    /// - `Validation`/`BadRequest` if the payload is not a valid document
    /// - `Forbidden` if the signer is not the document's actor
    pub async fn receive(
        &self,
        method: &str,
        path: &str,
        headers: &http::HeaderMap,
        body: &[u8],
    ) -> Result<Document, FederationError> {
        // 1. Who claims to have signed this?
        let signature_header = headers
            .get("signature")
            .and_then(|value| value.to_str().ok())
            .ok_or(FederationError::InvalidSignature)?;
        let key_id = SignatureContext::parse(signature_header)
            .map_err(|_| FederationError::InvalidSignature)?
            .key_id;

        // 2. Verify, re-fetching once in case the actor rotated its key
        let was_cached = self.keys.contains(&key_id).await;
        let public_key_pem = self.keys.get(&key_id).await?;
        if !verify(&public_key_pem, headers, method, path, body) {
            if !was_cached {
                tracing::warn!(key_id = %key_id, path, "Rejected delivery with invalid signature");
                return Err(FederationError::InvalidSignature);
            }

            tracing::debug!(key_id = %key_id, "Cached key did not verify, re-fetching");
            self.keys.invalidate(&key_id).await;
            let refreshed = self.keys.get(&key_id).await?;
            if refreshed == public_key_pem || !verify(&refreshed, headers, method, path, body) {
                tracing::warn!(key_id = %key_id, path, "Rejected delivery with invalid signature");
                return Err(FederationError::InvalidSignature);
            }
        }

        // 3. Is it a document we accept?
        let document = Document::from_wire_bytes(self.registry.clone(), body)?;
        document.check()?;

        // 4. Did the signer author it?
        let claimed = claimed_actor(&document).ok_or_else(|| {
            FederationError::BadRequest("Document does not name its actor".to_string())
        })?;
        if !key_id_matches_actor(&key_id, claimed) {
            tracing::warn!(
                key_id = %key_id,
                actor = claimed,
                "Signer does not own the delivered document"
            );
            return Err(FederationError::Forbidden);
        }

        // 5. Persist
        let id = document
            .id()
            .ok_or_else(|| FederationError::BadRequest("Document has no id".to_string()))?;
        self.store.save(id, &document).await?;

        ACTIVITIES_RECEIVED_TOTAL
            .with_label_values(&[document.kind().as_str()])
            .inc();
        tracing::info!(
            id,
            kind = %document.kind(),
            activity_type = document.type_name().unwrap_or("<none>"),
            "Accepted inbound document"
        );

        Ok(document)
    }
}

/// The actor a document speaks for
fn claimed_actor(document: &Document) -> Option<&str> {
    match document.kind() {
        DocumentKind::Activity => document.get_str("actor"),
        DocumentKind::Actor => document.id(),
        DocumentKind::Object => match document.get("attributedTo")? {
            Value::String(actor) => Some(actor.as_str()),
            Value::Array(actors) => actors.first().and_then(Value::as_str),
            _ => None,
        },
    }
}
