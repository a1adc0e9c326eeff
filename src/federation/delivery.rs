//! Activity delivery
//!
//! Signs and POSTs documents to remote inboxes. Each call is a single
//! attempt; queueing and retry policy belong to the caller.

use std::collections::HashSet;
use std::sync::Arc;

use super::client::HttpClient;
use super::signature::sign_post;
use super::store::KeyPairProvider;
use crate::activitypub::Document;
use crate::error::FederationError;
use crate::metrics::ACTIVITIES_SENT_TOTAL;

/// Media type of ActivityPub payloads
pub const ACTIVITY_CONTENT_TYPE: &str = "application/activity+json";

/// Maximum concurrent deliveries for one fan-out
const MAX_CONCURRENT: usize = 10;

/// Outcome of delivering to one inbox
#[derive(Debug, Clone)]
pub struct DeliveryResult {
    pub inbox_uri: String,
    pub success: bool,
    pub error: Option<String>,
}

/// Activity delivery service for one local actor
#[derive(Clone)]
pub struct ActivityDelivery {
    client: Arc<dyn HttpClient>,
    keys: Arc<dyn KeyPairProvider>,
    /// Local actor URI
    actor_uri: String,
    /// Key ID for signatures
    key_id: String,
}

impl ActivityDelivery {
    /// Create a delivery service signing as `actor_uri#main-key`
    pub fn new(
        client: Arc<dyn HttpClient>,
        keys: Arc<dyn KeyPairProvider>,
        actor_uri: impl Into<String>,
    ) -> Self {
        let actor_uri = actor_uri.into();
        let key_id = format!("{}#main-key", actor_uri);
        Self {
            client,
            keys,
            actor_uri,
            key_id,
        }
    }

    /// Sign with a key id other than `#main-key`
    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = key_id.into();
        self
    }

    pub fn actor_uri(&self) -> &str {
        &self.actor_uri
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Deliver a document to a single inbox
    ///
    /// # Errors
    /// - `Validation` if the document breaks its contract (nothing is sent)
    /// - `Key` if the local key pair cannot sign
    /// - `Federation`/`HttpClient` if the inbox is unreachable or refuses
    pub async fn deliver(&self, inbox_uri: &str, document: &Document) -> Result<(), FederationError> {
        // 1. Never publish a document we would reject ourselves
        document.check()?;

        // 2. Serialize the published form
        let body = serde_json::to_vec(&document.to_federated_wire())
            .map_err(|e| FederationError::Internal(e.into()))?;

        self.deliver_body(inbox_uri, body).await?;

        ACTIVITIES_SENT_TOTAL
            .with_label_values(&[document.kind().as_str()])
            .inc();
        tracing::info!(
            inbox = inbox_uri,
            id = document.id().unwrap_or("<none>"),
            "Delivered document"
        );
        Ok(())
    }

    async fn deliver_body(&self, inbox_uri: &str, body: Vec<u8>) -> Result<(), FederationError> {
        // 3. Sign request
        let key_pair = self.keys.key_pair(&self.actor_uri).await?;
        let signed = sign_post(&key_pair.private_key_pem, &self.key_id, inbox_uri, &body)?;

        // 4. POST to inbox with signed headers
        let response = self
            .client
            .post(
                inbox_uri,
                &[
                    ("Host", signed.host.as_str()),
                    ("Date", signed.date.as_str()),
                    ("Digest", signed.digest.as_str()),
                    ("Signature", signed.signature.as_str()),
                    ("Content-Type", ACTIVITY_CONTENT_TYPE),
                    ("Accept", ACTIVITY_CONTENT_TYPE),
                ],
                body,
            )
            .await?;

        // 5. Handle response
        if !response.is_success() {
            return Err(FederationError::Federation(format!(
                "Inbox {} rejected activity: HTTP {}",
                inbox_uri, response.status
            )));
        }

        Ok(())
    }

    /// Deliver a document to many inboxes
    ///
    /// Identical inbox URIs are delivered once; up to ten deliveries run at
    /// a time. Failures are reported per inbox.
    pub async fn deliver_to_inboxes(
        &self,
        document: &Document,
        inbox_uris: Vec<String>,
    ) -> Result<Vec<DeliveryResult>, FederationError> {
        use tokio::sync::Semaphore;

        document.check()?;
        let body = serde_json::to_vec(&document.to_federated_wire())
            .map_err(|e| FederationError::Internal(e.into()))?;

        let total_targets = inbox_uris.len();
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT));
        let mut seen = HashSet::new();
        let mut tasks = Vec::new();

        // Shared inboxes repeat across recipients; personal inboxes on one
        // domain differ by path and are all kept
        for inbox_uri in inbox_uris {
            if !seen.insert(inbox_uri.clone()) {
                continue;
            }

            let semaphore = semaphore.clone();
            let body = body.clone();
            let delivery = self.clone();
            let target = inbox_uri.clone();

            let handle = tokio::spawn(async move {
                let result = match semaphore.acquire().await {
                    Ok(_permit) => delivery.deliver_body(&target, body).await,
                    Err(e) => Err(FederationError::Internal(e.into())),
                };

                DeliveryResult {
                    inbox_uri: target,
                    success: result.is_ok(),
                    error: result.err().map(|e| e.to_string()),
                }
            });
            tasks.push((inbox_uri, handle));
        }

        tracing::info!(
            unique = tasks.len(),
            total = total_targets,
            "Delivering to inboxes"
        );

        let mut results = Vec::with_capacity(tasks.len());
        for (inbox_uri, handle) in tasks {
            match handle.await {
                Ok(result) => results.push(result),
                Err(error) => {
                    tracing::error!(inbox = %inbox_uri, %error, "Delivery task failed");
                    results.push(DeliveryResult {
                        inbox_uri,
                        success: false,
                        error: Some(error.to_string()),
                    });
                }
            }
        }

        let success_count = results.iter().filter(|r| r.success).count();
        ACTIVITIES_SENT_TOTAL
            .with_label_values(&[document.kind().as_str()])
            .inc_by(success_count as u64);
        tracing::info!(
            succeeded = success_count,
            failed = results.len() - success_count,
            "Batch delivery complete"
        );

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activitypub::{DocumentKind, Registry};
    use crate::federation::client::HttpResponse;
    use crate::federation::signature::KeyPair;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const ALICE: &str = "https://lamia.social/users/alice";

    /// Accepts every POST except to `broken`, where the handler panics
    struct Inboxes {
        broken: &'static str,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl HttpClient for Inboxes {
        async fn get(
            &self,
            _url: &str,
            _query: &[(&str, &str)],
            _headers: &[(&str, &str)],
        ) -> Result<HttpResponse, FederationError> {
            Ok(HttpResponse {
                status: 404,
                body: Vec::new(),
            })
        }

        async fn post(
            &self,
            url: &str,
            _headers: &[(&str, &str)],
            _body: Vec<u8>,
        ) -> Result<HttpResponse, FederationError> {
            self.seen.lock().unwrap().push(url.to_string());
            if url == self.broken {
                panic!("connection handler crashed");
            }
            Ok(HttpResponse {
                status: 202,
                body: Vec::new(),
            })
        }
    }

    struct AliceKeys(KeyPair);

    #[async_trait]
    impl KeyPairProvider for AliceKeys {
        async fn key_pair(&self, _actor: &str) -> Result<KeyPair, FederationError> {
            Ok(self.0.clone())
        }
    }

    fn delivery(broken: &'static str) -> (ActivityDelivery, Arc<Inboxes>) {
        let inboxes = Arc::new(Inboxes {
            broken,
            seen: Mutex::new(Vec::new()),
        });
        let keys = AliceKeys(KeyPair::generate(1024).unwrap());
        let delivery = ActivityDelivery::new(inboxes.clone(), Arc::new(keys), ALICE);
        (delivery, inboxes)
    }

    fn like() -> Document {
        let serde_json::Value::Object(raw) = serde_json::json!({
            "id": "https://lamia.social/likes/1",
            "type": "Like",
            "actor": ALICE,
            "published": "2024-05-01T12:00:00Z",
            "object": "https://remote.example/notes/1",
        }) else {
            unreachable!()
        };
        Document::from_wire(DocumentKind::Activity, Arc::new(Registry::standard()), raw)
    }

    #[tokio::test]
    async fn duplicate_inboxes_are_delivered_once() {
        let (delivery, inboxes) = delivery("https://nowhere.example/inbox");
        let results = delivery
            .deliver_to_inboxes(
                &like(),
                vec![
                    "https://remote.example/users/bob/inbox".to_string(),
                    "https://remote.example/inbox".to_string(),
                    "https://remote.example/users/carol/inbox".to_string(),
                    "https://remote.example/inbox".to_string(),
                ],
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|result| result.success));

        let mut seen = inboxes.seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(
            seen,
            vec![
                "https://remote.example/inbox",
                "https://remote.example/users/bob/inbox",
                "https://remote.example/users/carol/inbox",
            ]
        );
    }

    #[tokio::test]
    async fn panicked_delivery_is_reported_as_failure() {
        let (delivery, _) = delivery("https://crashy.example/inbox");
        let results = delivery
            .deliver_to_inboxes(
                &like(),
                vec![
                    "https://remote.example/inbox".to_string(),
                    "https://crashy.example/inbox".to_string(),
                ],
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        let crashed = results
            .iter()
            .find(|result| result.inbox_uri == "https://crashy.example/inbox")
            .expect("crashed inbox still reported");
        assert!(!crashed.success);
        assert!(crashed.error.as_deref().unwrap_or_default().contains("panicked"));
        assert!(results.iter().any(|result| result.success));
    }

    #[tokio::test]
    async fn empty_inbox_list_delivers_nothing() {
        let (delivery, inboxes) = delivery("https://nowhere.example/inbox");
        let results = delivery.deliver_to_inboxes(&like(), Vec::new()).await.unwrap();
        assert!(results.is_empty());
        assert!(inboxes.seen.lock().unwrap().is_empty());
    }
}
