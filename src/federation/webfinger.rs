//! WebFinger protocol implementation
//!
//! Used to discover ActivityPub actor URIs from handles. Normalization is a
//! rough heuristic in the spirit of
//! https://openid.net/specs/openid-connect-discovery-1_0.html#NormalizationSteps;
//! a wrong guess is caught by the live lookup, not here.

use serde::{Deserialize, Serialize};

use super::client::HttpClient;
use crate::error::FederationError;

/// Path of the discovery endpoint on every origin
pub const WEBFINGER_PATH: &str = "/.well-known/webfinger";

/// We only want JRD back, plain JSON as a fallback
pub const JRD_ACCEPT: &str = "application/jrd+json, application/json;q=0.9";

const ACTIVITY_MEDIA_TYPES: &[&str] = &[
    "application/activity+json",
    "application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\"",
];

/// Canonical discovery target for an identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedIdentifier {
    /// Value of the `resource` query parameter
    pub resource: String,
    /// Scheme and authority to query, e.g. `https://lamia.social`
    pub origin: String,
}

impl NormalizedIdentifier {
    /// `{origin}/.well-known/webfinger`
    pub fn endpoint(&self) -> String {
        format!("{}{}", self.origin, WEBFINGER_PATH)
    }

    /// Full discovery URL including the `resource` query
    pub fn discovery_url(&self) -> Result<url::Url, FederationError> {
        let mut url = url::Url::parse(&self.endpoint())
            .map_err(|e| FederationError::BadRequest(format!("Invalid discovery origin: {}", e)))?;
        url.query_pairs_mut().append_pair("resource", &self.resource);
        Ok(url)
    }
}

/// Turn a handle or actor URL into a `(resource, origin)` pair.
///
/// Accepted forms:
/// - `acct:user@domain` or `user@domain`
/// - `http(s)://domain/path`
/// - `domain/path`, `domain/@user` (implicitly https)
///
/// Works on the text as written: case, default ports and anything after the
/// domain are kept. An explicit port is dropped unless `preserve_port` is
/// set, so discovery defaults to the standard HTTPS port. Never fails.
pub fn normalize(identifier: &str, preserve_port: bool) -> NormalizedIdentifier {
    let remainder = identifier.strip_prefix("acct:").unwrap_or(identifier);

    for scheme in ["https", "http"] {
        let prefix = format!("{}://", scheme);
        let has_scheme = remainder
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(&prefix));
        if has_scheme {
            let (authority, path) = split_authority(&remainder[prefix.len()..], preserve_port);
            return NormalizedIdentifier {
                resource: format!("{}{}", authority, path),
                origin: format!("{}://{}", scheme, authority),
            };
        }
    }

    // user@domain, but not domain/@user
    if !remainder.contains("/@") {
        if let Some((user, domain)) = remainder.split_once('@') {
            let (authority, rest) = split_authority(domain, preserve_port);
            return NormalizedIdentifier {
                resource: format!("{}@{}{}", user, authority, rest),
                origin: format!("https://{}", authority),
            };
        }
    }

    let (authority, path) = split_authority(remainder, preserve_port);
    NormalizedIdentifier {
        resource: format!("{}{}", authority, path),
        origin: format!("https://{}", authority),
    }
}

/// Split `host[:port]/rest` into the authority and everything after it,
/// dropping an explicit port unless asked to keep it
fn split_authority(text: &str, preserve_port: bool) -> (&str, &str) {
    let end = text.find(['/', '?', '#']).unwrap_or(text.len());
    let (authority, rest) = text.split_at(end);
    if preserve_port {
        return (authority, rest);
    }

    match authority.rsplit_once(':') {
        Some((host, port))
            if !port.is_empty()
                && port.bytes().all(|b| b.is_ascii_digit())
                && (!host.contains(':') || host.ends_with(']')) =>
        {
            (host, rest)
        }
        _ => (authority, rest),
    }
}

/// WebFinger JRD response
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebFingerResponse {
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aliases: Option<Vec<String>>,
    #[serde(default)]
    pub links: Vec<WebFingerLink>,
}

/// WebFinger link
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebFingerLink {
    pub rel: String,
    #[serde(rename = "type")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

impl WebFingerResponse {
    /// The ActivityPub actor behind this subject, if advertised
    pub fn actor_uri(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|link| {
                link.rel == "self"
                    && link
                        .link_type
                        .as_deref()
                        .is_some_and(|media| ACTIVITY_MEDIA_TYPES.contains(&media))
            })
            .and_then(|link| link.href.as_deref())
    }

    /// Human-facing profile page, if advertised
    pub fn profile_url(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|link| link.rel == "http://webfinger.net/rel/profile-page")
            .and_then(|link| link.href.as_deref())
    }
}

/// Look up an identifier via WebFinger
///
/// # Example
/// ```ignore
/// let jrd = finger(&client, "acct:lamia@lamia.social", false).await?;
/// println!("Actor: {:?}", jrd.actor_uri());
/// ```
pub async fn finger(
    client: &dyn HttpClient,
    identifier: &str,
    preserve_port: bool,
) -> Result<WebFingerResponse, FederationError> {
    let normalized = normalize(identifier, preserve_port);
    let endpoint = normalized.endpoint();

    tracing::debug!(
        resource = %normalized.resource,
        endpoint = %endpoint,
        "WebFinger lookup"
    );

    let response = client
        .get(
            &endpoint,
            &[("resource", normalized.resource.as_str())],
            &[("Accept", JRD_ACCEPT)],
        )
        .await?;

    if response.status == 404 {
        return Err(FederationError::NotFound);
    }
    if !response.is_success() {
        return Err(FederationError::Federation(format!(
            "WebFinger lookup for {} failed: HTTP {}",
            normalized.resource, response.status
        )));
    }

    response
        .json()
        .map_err(|e| FederationError::Federation(format!("Failed to parse JRD: {}", e)))
}
