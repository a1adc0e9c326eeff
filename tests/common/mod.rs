//! Common test utilities for E2E tests
//!
//! Everything runs in-process: `FakeNetwork` stands in for the internet,
//! serving actor documents and JRDs and recording every request made.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fediwire::Federation;
use fediwire::config::{
    FederationConfig, HttpConfig, InstanceConfig, KeyCacheConfig, LoggingConfig, WebFingerConfig,
};
use fediwire::error::FederationError;
use fediwire::federation::{
    DocumentStore, HttpClient, HttpResponse, KeyPair, KeyPairProvider, MemoryDocumentStore,
    sign_post,
};
use http::{HeaderMap, HeaderName, HeaderValue};
use lazy_static::lazy_static;
use serde_json::{Value, json};

pub const LOCAL_DOMAIN: &str = "lamia.social";
pub const REMOTE_DOMAIN: &str = "remote.example";
pub const PUBLIC: &str = "https://www.w3.org/ns/activitystreams#Public";

lazy_static! {
    /// Key generation is slow in debug builds; share a few pairs
    static ref KEY_PAIRS: Vec<KeyPair> = (0..3)
        .map(|_| KeyPair::generate(1024).unwrap())
        .collect();
}

/// Pre-generated key pair `slot` (0..3)
pub fn key_pair(slot: usize) -> KeyPair {
    KEY_PAIRS[slot].clone()
}

/// A request seen by the fake network
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: &'static str,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Headers as a receiving server would see them
    pub fn header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            map.insert(
                HeaderName::from_bytes(name.to_ascii_lowercase().as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    /// Path (and query) of the request URL
    pub fn path(&self) -> String {
        let url = url::Url::parse(&self.url).unwrap();
        match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        }
    }
}

/// In-process stand-in for remote servers
#[derive(Default)]
pub struct FakeNetwork {
    /// url -> (status, body) served to GET
    pages: Mutex<HashMap<String, (u16, Vec<u8>)>>,
    /// url -> status answered to POST (default 202)
    post_status: Mutex<HashMap<String, u16>>,
    /// host -> addresses (default: one public address)
    dns: Mutex<HashMap<String, Vec<IpAddr>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl FakeNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve_json(&self, url: &str, document: &Value) {
        self.pages.lock().unwrap().insert(
            url.to_string(),
            (200, serde_json::to_vec(document).unwrap()),
        );
    }

    pub fn answer_posts(&self, url: &str, status: u16) {
        self.post_status
            .lock()
            .unwrap()
            .insert(url.to_string(), status);
    }

    /// Point `host` at `addresses` for the key fetch DNS check
    pub fn resolve_to(&self, host: &str, addresses: &[&str]) {
        let addresses = addresses
            .iter()
            .map(|address| address.parse().unwrap())
            .collect();
        self.dns.lock().unwrap().insert(host.to_string(), addresses);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn gets_to(&self, url: &str) -> usize {
        self.requests()
            .iter()
            .filter(|request| request.method == "GET" && request.url == url)
            .count()
    }

    pub fn posts(&self) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.method == "POST")
            .collect()
    }

    fn record(
        &self,
        method: &'static str,
        url: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
        body: Vec<u8>,
    ) {
        let owned = |pairs: &[(&str, &str)]| {
            pairs
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect()
        };
        self.requests.lock().unwrap().push(RecordedRequest {
            method,
            url: url.to_string(),
            query: owned(query),
            headers: owned(headers),
            body,
        });
    }
}

#[async_trait]
impl HttpClient for FakeNetwork {
    async fn get(
        &self,
        url: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse, FederationError> {
        self.record("GET", url, query, headers, Vec::new());
        let (status, body) = self
            .pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or((404, Vec::new()));
        Ok(HttpResponse { status, body })
    }

    async fn post(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: Vec<u8>,
    ) -> Result<HttpResponse, FederationError> {
        self.record("POST", url, &[], headers, body);
        let status = self
            .post_status
            .lock()
            .unwrap()
            .get(url)
            .copied()
            .unwrap_or(202);
        Ok(HttpResponse {
            status,
            body: Vec::new(),
        })
    }

    async fn resolve(&self, host: &str, _port: u16) -> Result<Vec<IpAddr>, FederationError> {
        Ok(self
            .dns
            .lock()
            .unwrap()
            .get(host)
            .cloned()
            .unwrap_or_else(|| vec!["93.184.215.14".parse().unwrap()]))
    }
}

/// Key pairs for local actors, by actor URI
#[derive(Default)]
pub struct StaticKeys {
    pairs: Mutex<HashMap<String, KeyPair>>,
}

impl StaticKeys {
    pub fn with(actor: &str, keys: KeyPair) -> Arc<Self> {
        let provider = Self::default();
        provider
            .pairs
            .lock()
            .unwrap()
            .insert(actor.to_string(), keys);
        Arc::new(provider)
    }
}

#[async_trait]
impl KeyPairProvider for StaticKeys {
    async fn key_pair(&self, actor: &str) -> Result<KeyPair, FederationError> {
        self.pairs
            .lock()
            .unwrap()
            .get(actor)
            .cloned()
            .ok_or(FederationError::NotFound)
    }
}

/// Test instance wired to a fake network and an in-memory store
pub struct TestInstance {
    pub federation: Federation,
    pub network: Arc<FakeNetwork>,
    pub store: Arc<MemoryDocumentStore>,
}

impl TestInstance {
    pub fn new(domain: &str, network: Arc<FakeNetwork>, keys: Arc<StaticKeys>) -> Self {
        Self::with_preserve_port(domain, network, keys, false)
    }

    pub fn with_preserve_port(
        domain: &str,
        network: Arc<FakeNetwork>,
        keys: Arc<StaticKeys>,
        preserve_port: bool,
    ) -> Self {
        let store = Arc::new(MemoryDocumentStore::new());
        let federation = Federation::with_client(
            test_config(domain, preserve_port),
            network.clone(),
            store.clone() as Arc<dyn DocumentStore>,
            keys,
        );

        Self {
            federation,
            network,
            store,
        }
    }
}

pub fn test_config(domain: &str, preserve_port: bool) -> FederationConfig {
    FederationConfig {
        instance: InstanceConfig {
            domain: domain.to_string(),
            protocol: "https".to_string(),
        },
        webfinger: WebFingerConfig { preserve_port },
        http: HttpConfig {
            user_agent: "fediwire-test/0.1".to_string(),
            timeout_seconds: 5,
        },
        key_cache: KeyCacheConfig { ttl_seconds: 3600 },
        logging: LoggingConfig {
            level: "debug".to_string(),
            format: "pretty".to_string(),
        },
    }
}

/// A remote actor that can sign deliveries
pub struct RemoteActor {
    pub uri: String,
    pub key_id: String,
    pub keys: KeyPair,
}

impl RemoteActor {
    pub fn new(domain: &str, username: &str, keys: KeyPair) -> Self {
        let uri = format!("https://{}/users/{}", domain, username);
        let key_id = format!("{}#main-key", uri);
        Self { uri, key_id, keys }
    }

    /// Publish this actor's document on the fake network
    pub fn publish(&self, network: &FakeNetwork) {
        network.serve_json(&self.uri, &actor_document(&self.uri, &self.keys.public_key_pem));
    }

    /// Headers for POSTing `body` to `inbox_url`, signed with this actor's key
    pub fn signed_headers(&self, inbox_url: &str, body: &[u8]) -> HeaderMap {
        let signed = sign_post(&self.keys.private_key_pem, &self.key_id, inbox_url, body).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_str(&signed.host).unwrap());
        headers.insert("date", HeaderValue::from_str(&signed.date).unwrap());
        headers.insert("digest", HeaderValue::from_str(&signed.digest).unwrap());
        headers.insert("signature", HeaderValue::from_str(&signed.signature).unwrap());
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/activity+json"),
        );
        headers
    }
}

pub fn actor_document(uri: &str, public_key_pem: &str) -> Value {
    let username = uri.rsplit('/').next().unwrap_or_default();
    json!({
        "@context": ["https://www.w3.org/ns/activitystreams", "https://w3id.org/security/v1"],
        "id": uri,
        "type": "Person",
        "url": uri,
        "followers": format!("{}/followers", uri),
        "following": format!("{}/following", uri),
        "inbox": format!("{}/inbox", uri),
        "outbox": format!("{}/outbox", uri),
        "name": username,
        "preferredUsername": username,
        "summary": "",
        "publicKey": {
            "id": format!("{}#main-key", uri),
            "owner": uri,
            "publicKeyPem": public_key_pem,
        },
        "endpoints": {"sharedInbox": format!("https://{}/inbox", url::Url::parse(uri).unwrap().host_str().unwrap())},
    })
}

pub fn note(actor: &str, id: &str) -> Value {
    json!({
        "id": id,
        "type": "Note",
        "url": id,
        "published": "2024-05-01T12:00:00Z",
        "attributedTo": actor,
        "to": [PUBLIC],
        "cc": [format!("{}/followers", actor)],
        "content": "<p>Hello, Fediverse!</p>",
        "sensitive": false,
        "tag": [{"type": "Hashtag", "name": "#test", "href": "https://remote.example/tags/test"}],
    })
}

pub fn create_activity(actor: &str, note_id: &str) -> Value {
    json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "id": format!("{}/activity", note_id),
        "type": "Create",
        "actor": actor,
        "published": "2024-05-01T12:00:00Z",
        "to": [PUBLIC],
        "cc": [format!("{}/followers", actor)],
        "object": note(actor, note_id),
    })
}

pub fn to_body(document: &Value) -> Vec<u8> {
    serde_json::to_vec(document).unwrap()
}
