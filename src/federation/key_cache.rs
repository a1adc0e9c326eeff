//! Public Key Retrieval and Caching
//!
//! Remote actors publish their public key inside the actor document. Keys
//! are fetched on demand and cached to reduce remote requests.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use super::client::HttpClient;
use crate::activitypub::{Document, DocumentKind, Registry};
use crate::error::FederationError;

fn is_disallowed_v4(v4: Ipv4Addr) -> bool {
    let [first, second, ..] = v4.octets();
    // 100.64.0.0/10 carrier-grade NAT
    let shared = first == 100 && (second & 0xc0) == 64;

    v4.is_loopback()
        || v4.is_private()
        || v4.is_link_local()
        || v4.is_multicast()
        || v4.is_broadcast()
        || v4.is_unspecified()
        || shared
}

fn is_disallowed_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_disallowed_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_disallowed_v4(v4),
            None => {
                v6.is_loopback()
                    || v6.is_unique_local()
                    || v6.is_unicast_link_local()
                    || v6.is_multicast()
                    || v6.is_unspecified()
            }
        },
    }
}

fn bare_host(host: &str) -> String {
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .trim_end_matches('.')
        .to_ascii_lowercase()
}

fn is_disallowed_host(host: &str) -> bool {
    let normalized = bare_host(host);
    if normalized == "localhost" || normalized.ends_with(".localhost") {
        return true;
    }

    normalized
        .parse::<IpAddr>()
        .map(is_disallowed_ip)
        .unwrap_or(false)
}

/// Reject hosts whose DNS records point at local or private addresses.
///
/// A name that looks public (`169.254.169.254.nip.io`) can still resolve
/// to an internal target.
async fn check_resolved_host(
    client: &dyn HttpClient,
    host: &str,
    port: u16,
) -> Result<(), FederationError> {
    let host = bare_host(host);
    if host.parse::<IpAddr>().is_ok() {
        // literal addresses were checked by extract_actor_domain
        return Ok(());
    }

    let addresses = client.resolve(&host, port).await?;
    if addresses.is_empty() {
        return Err(FederationError::Federation(format!(
            "No DNS records for actor host {}",
            host
        )));
    }

    if let Some(address) = addresses.iter().find(|ip| is_disallowed_ip(**ip)) {
        tracing::warn!(host = %host, %address, "Actor host resolves to a private address");
        return Err(FederationError::Forbidden);
    }

    Ok(())
}

/// Extract and validate remote actor domain from an actor URL or key ID URL.
///
/// Rejects non-HTTP(S) URLs and hosts that are literally local or private
/// (including IPv4-mapped IPv6). Names are checked again after resolution
/// by [`fetch_public_key`].
pub fn extract_actor_domain(actor_or_key_id: &str) -> Result<String, FederationError> {
    let actor_url = actor_or_key_id.split('#').next().unwrap_or(actor_or_key_id);
    let parsed = url::Url::parse(actor_url)
        .map_err(|e| FederationError::BadRequest(format!("Invalid actor URL: {}", e)))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(FederationError::BadRequest(format!(
                "Unsupported actor URL scheme: {}",
                scheme
            )));
        }
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| FederationError::BadRequest("Missing host in actor URL".to_string()))?
        .to_ascii_lowercase();

    if is_disallowed_host(&host) {
        return Err(FederationError::Forbidden);
    }

    Ok(host)
}

/// Fetch public key from key ID URL
///
/// # Arguments
/// * `client` - HTTP client (also used to resolve the actor host)
/// * `registry` - Field contracts used to check the actor document
/// * `key_id` - Full URL to the key (e.g., actor#main-key)
///
/// # Returns
/// PEM-encoded public key
pub async fn fetch_public_key(
    client: &dyn HttpClient,
    registry: &Arc<Registry>,
    key_id: &str,
) -> Result<String, FederationError> {
    let host = extract_actor_domain(key_id)?;
    let actor_url = key_id.split('#').next().unwrap_or(key_id);
    let port = url::Url::parse(actor_url)
        .ok()
        .and_then(|parsed| parsed.port_or_known_default())
        .ok_or_else(|| FederationError::BadRequest("Missing port in actor URL".to_string()))?;

    check_resolved_host(client, &host, port).await?;

    let response = client
        .get(actor_url, &[], &[("Accept", "application/activity+json")])
        .await?;

    if !response.is_success() {
        return Err(FederationError::Federation(format!(
            "Failed to fetch actor {}: HTTP {}",
            actor_url, response.status
        )));
    }

    let actor = Document::from_wire_bytes(registry.clone(), &response.body)
        .map_err(|e| FederationError::Federation(format!("Failed to parse actor: {}", e)))?;

    if actor.kind() != DocumentKind::Actor {
        return Err(FederationError::Federation(format!(
            "{} is not an actor",
            actor_url
        )));
    }
    actor.check()?;

    // A fragment names one specific key; the actor must advertise exactly it
    if key_id.contains('#') && actor.public_key_id() != Some(key_id) {
        return Err(FederationError::Federation(
            "Signature keyId does not match actor public key id".to_string(),
        ));
    }

    actor
        .public_key_pem()
        .map(str::to_string)
        .ok_or_else(|| FederationError::Federation("Missing publicKeyPem in actor".to_string()))
}

struct CachedKey {
    pem: String,
    fetched_at: Instant,
}

/// Remote public keys by key id, refreshed after `ttl`
pub struct PublicKeyCache {
    entries: RwLock<HashMap<String, CachedKey>>,
    client: Arc<dyn HttpClient>,
    registry: Arc<Registry>,
    ttl: Duration,
}

impl PublicKeyCache {
    /// `ttl` defaults to one hour
    pub fn new(
        client: Arc<dyn HttpClient>,
        registry: Arc<Registry>,
        ttl: Option<Duration>,
    ) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            client,
            registry,
            ttl: ttl.unwrap_or(Duration::from_secs(3600)),
        }
    }

    fn is_fresh(&self, entry: &CachedKey) -> bool {
        entry.fetched_at.elapsed() < self.ttl
    }

    /// PEM for `key_id`, fetching the actor when absent or stale
    pub async fn get(&self, key_id: &str) -> Result<String, FederationError> {
        if let Some(entry) = self.entries.read().await.get(key_id) {
            if self.is_fresh(entry) {
                tracing::debug!(key_id, "Public key cache hit");
                return Ok(entry.pem.clone());
            }
        }

        tracing::debug!(key_id, "Fetching public key");
        let pem = fetch_public_key(self.client.as_ref(), &self.registry, key_id).await?;

        self.entries.write().await.insert(
            key_id.to_string(),
            CachedKey {
                pem: pem.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(pem)
    }

    /// Whether a fresh entry exists for `key_id`
    pub async fn contains(&self, key_id: &str) -> bool {
        self.entries
            .read()
            .await
            .get(key_id)
            .is_some_and(|entry| self.is_fresh(entry))
    }

    /// Drop `key_id`, e.g. after the actor rotated it
    pub async fn invalidate(&self, key_id: &str) {
        self.entries.write().await.remove(key_id);
        tracing::debug!(key_id, "Invalidated public key");
    }

    /// Drop stale entries, returning how many were removed
    pub async fn prune_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.fetched_at.elapsed() < self.ttl);
        let removed = before - entries.len();

        if removed > 0 {
            tracing::info!(removed, "Pruned stale public keys");
        }
        removed
    }
}
