//! HTTP Signatures for ActivityPub
//!
//! Implements the draft-cavage signing scheme as spoken by Mastodon:
//! https://docs.joinmastodon.org/spec/security/
//!
//! Signing and verification build the signing string the same way: one
//! `name: value` line per signed header, in the order listed in the
//! `headers` parameter, joined with `\n` and no trailing newline. Any change
//! to a signed header, the method, the path or (when `digest` is signed) the
//! body yields a different string and the signature no longer verifies.

use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs1v15::{Signature as Pkcs1v15Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::error::FederationError;
use crate::metrics::SIGNATURE_VERIFICATIONS_TOTAL;

/// The only algorithm we sign with
pub const ALGORITHM: &str = "rsa-sha256";

/// Pseudo-header binding the method and path into the signature
pub const REQUEST_TARGET: &str = "(request-target)";

/// Parsed or freshly built `Signature` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureContext {
    /// Key ID (URL to public key, usually `actor#main-key`)
    pub key_id: String,
    /// Algorithm name as sent on the wire
    pub algorithm: String,
    /// Signed header names, lowercased, in signing order
    pub headers_signed: Vec<String>,
    /// Raw signature bytes
    pub signature: Vec<u8>,
}

impl SignatureContext {
    /// Parse a `Signature` header value
    ///
    /// # Format
    /// ```text
    /// keyId="...",algorithm="...",headers="...",signature="..."
    /// ```
    ///
    /// Commas inside quoted values do not split parameters. Unknown
    /// parameters are ignored.
    pub fn parse(header: &str) -> Result<Self, FederationError> {
        let mut key_id = None;
        let mut algorithm = None;
        let mut headers = None;
        let mut signature = None;

        for part in split_parameters(header) {
            let Some((key, value)) = part.split_once('=') else {
                return Err(FederationError::BadRequest(format!(
                    "Malformed signature parameter: {}",
                    part.trim()
                )));
            };
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|inner| inner.strip_suffix('"'))
                .unwrap_or(value);

            match key.trim() {
                "keyId" => key_id = Some(value.to_string()),
                "algorithm" => algorithm = Some(value.to_string()),
                "headers" => {
                    headers = Some(
                        value
                            .split_whitespace()
                            .map(|name| name.to_ascii_lowercase())
                            .collect(),
                    )
                }
                "signature" => {
                    let bytes = BASE64.decode(value).map_err(|_| {
                        FederationError::BadRequest("Invalid signature encoding".to_string())
                    })?;
                    signature = Some(bytes);
                }
                _ => {}
            }
        }

        Ok(Self {
            key_id: key_id
                .ok_or_else(|| FederationError::BadRequest("Missing keyId".to_string()))?,
            algorithm: algorithm
                .ok_or_else(|| FederationError::BadRequest("Missing algorithm".to_string()))?,
            headers_signed: headers
                .ok_or_else(|| FederationError::BadRequest("Missing headers".to_string()))?,
            signature: signature
                .ok_or_else(|| FederationError::BadRequest("Missing signature".to_string()))?,
        })
    }
}

impl fmt::Display for SignatureContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "keyId=\"{}\",algorithm=\"{}\",headers=\"{}\",signature=\"{}\"",
            self.key_id,
            self.algorithm,
            self.headers_signed.join(" "),
            BASE64.encode(&self.signature)
        )
    }
}

/// Split on commas that sit outside double quotes
fn split_parameters(header: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;

    for (index, ch) in header.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&header[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    parts.push(&header[start..]);

    parts.into_iter().filter(|part| !part.trim().is_empty()).collect()
}

fn signing_string<'a>(lines: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    lines
        .into_iter()
        .map(|(name, value)| format!("{}: {}", name, value))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Sign an outgoing POST.
///
/// `headers` are signed in the order given, followed by the
/// `(request-target)` pseudo-header for `post {request_path}`. Header names
/// are lowercased. The caller's headers are not modified.
///
/// # Returns
/// The value for the `Signature` header
///
/// # Errors
/// `FederationError::Key` if the private key cannot be parsed or used
pub fn sign(
    private_key_pem: &str,
    key_id: &str,
    headers: &[(&str, &str)],
    request_path: &str,
) -> Result<String, FederationError> {
    let private_key = parse_private_key(private_key_pem)?;

    let request_target = format!("post {}", request_path);
    let mut signed: Vec<(String, &str)> = headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), *value))
        .collect();
    signed.push((REQUEST_TARGET.to_string(), request_target.as_str()));

    let text = signing_string(signed.iter().map(|(name, value)| (name.as_str(), *value)));

    let signing_key = SigningKey::<Sha256>::new(private_key);
    let signature = signing_key
        .try_sign(text.as_bytes())
        .map_err(|e| FederationError::Key(format!("Signing failed: {}", e)))?;

    let context = SignatureContext {
        key_id: key_id.to_string(),
        algorithm: ALGORITHM.to_string(),
        headers_signed: signed.into_iter().map(|(name, _)| name).collect(),
        signature: signature.to_vec(),
    };

    Ok(context.to_string())
}

/// Verify a received request's `Signature` header.
///
/// The signing string is rebuilt from what actually arrived: the real
/// method and path for `(request-target)`, a fresh SHA-256 of `body` for
/// `digest`, and the received value for every other header.
///
/// Never fails loudly: malformed headers, missing values, bad encodings and
/// cryptographic mismatches all yield `false`.
pub fn verify(
    public_key_pem: &str,
    headers: &http::HeaderMap,
    method: &str,
    request_path: &str,
    body: &[u8],
) -> bool {
    match try_verify(public_key_pem, headers, method, request_path, body) {
        Ok(()) => {
            SIGNATURE_VERIFICATIONS_TOTAL
                .with_label_values(&["valid"])
                .inc();
            true
        }
        Err(error) => {
            tracing::debug!(%error, method, path = request_path, "HTTP signature rejected");
            SIGNATURE_VERIFICATIONS_TOTAL
                .with_label_values(&["invalid"])
                .inc();
            false
        }
    }
}

fn try_verify(
    public_key_pem: &str,
    headers: &http::HeaderMap,
    method: &str,
    request_path: &str,
    body: &[u8],
) -> Result<(), FederationError> {
    let signature_header = header_value(headers, "signature")?;
    let parsed = SignatureContext::parse(signature_header)?;

    // hs2019 leaves the algorithm to the key, which is always RSA here
    if parsed.algorithm != ALGORITHM && parsed.algorithm != "hs2019" {
        return Err(FederationError::BadRequest(format!(
            "Unsupported signature algorithm: {}",
            parsed.algorithm
        )));
    }

    if !parsed.headers_signed.iter().any(|name| name == REQUEST_TARGET) {
        return Err(FederationError::BadRequest(
            "Signed headers must include: (request-target)".to_string(),
        ));
    }

    let mut lines = Vec::with_capacity(parsed.headers_signed.len());
    for name in &parsed.headers_signed {
        let value = match name.as_str() {
            REQUEST_TARGET => format!("{} {}", method.to_lowercase(), request_path),
            "digest" => generate_digest(body),
            other => header_value(headers, other)?.to_string(),
        };
        lines.push((name.as_str(), value));
    }
    let text = signing_string(lines.iter().map(|(name, value)| (*name, value.as_str())));

    let public_key = parse_public_key(public_key_pem)?;
    let verifying_key = VerifyingKey::<Sha256>::new(public_key);
    let signature = Pkcs1v15Signature::try_from(parsed.signature.as_slice())
        .map_err(|e| FederationError::BadRequest(format!("Invalid signature format: {}", e)))?;

    verifying_key
        .verify(text.as_bytes(), &signature)
        .map_err(|_| FederationError::InvalidSignature)
}

fn header_value<'a>(headers: &'a http::HeaderMap, name: &str) -> Result<&'a str, FederationError> {
    headers
        .get(name)
        .ok_or_else(|| FederationError::BadRequest(format!("Missing {} header", name)))?
        .to_str()
        .map_err(|_| FederationError::BadRequest(format!("Invalid {} header", name)))
}

/// Generate SHA-256 digest for body
///
/// # Returns
/// `SHA-256=base64(hash)`
pub fn generate_digest(body: &[u8]) -> String {
    let hash = Sha256::digest(body);
    format!("SHA-256={}", BASE64.encode(hash))
}

/// Headers to add to a signed delivery
#[derive(Debug, Clone)]
pub struct SignedHeaders {
    /// Host header value (with port when non-default)
    pub host: String,
    /// Date header value (RFC 1123, GMT)
    pub date: String,
    /// Digest header value
    pub digest: String,
    /// Signature header value
    pub signature: String,
}

/// Sign a POST of `body` to `inbox_url`.
///
/// Signs `host`, `date` and `digest` plus the request target, which is what
/// Mastodon-compatible inboxes require.
pub fn sign_post(
    private_key_pem: &str,
    key_id: &str,
    inbox_url: &str,
    body: &[u8],
) -> Result<SignedHeaders, FederationError> {
    let parsed_url = url::Url::parse(inbox_url)
        .map_err(|e| FederationError::BadRequest(format!("Invalid URL: {}", e)))?;

    let host = parsed_url
        .host_str()
        .ok_or_else(|| FederationError::BadRequest("Missing host in URL".to_string()))?;
    let host = match parsed_url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };

    let path_and_query = match parsed_url.query() {
        Some(query) => format!("{}?{}", parsed_url.path(), query),
        None => parsed_url.path().to_string(),
    };

    let date = chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    let digest = generate_digest(body);

    let signature = sign(
        private_key_pem,
        key_id,
        &[("host", &host), ("date", &date), ("digest", &digest)],
        &path_and_query,
    )?;

    Ok(SignedHeaders {
        host,
        date,
        digest,
        signature,
    })
}

/// Validate that signature keyId points to the same actor as the activity actor.
pub fn key_id_matches_actor(key_id: &str, actor_id: &str) -> bool {
    let key_actor = key_id.split('#').next().unwrap_or(key_id);
    let actor = actor_id.split('#').next().unwrap_or(actor_id);
    key_actor == actor
}

/// Parse an RSA private key from PKCS#8 or PKCS#1 PEM
pub fn parse_private_key(pem: &str) -> Result<RsaPrivateKey, FederationError> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| FederationError::Key(format!("Invalid private key: {}", e)))
}

/// Parse an RSA public key from SPKI or PKCS#1 PEM
pub fn parse_public_key(pem: &str) -> Result<RsaPublicKey, FederationError> {
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| FederationError::Key(format!("Invalid public key: {}", e)))
}

/// PEM-encoded RSA key pair of a local actor
#[derive(Clone)]
pub struct KeyPair {
    /// PKCS#8 private key
    pub private_key_pem: String,
    /// SPKI public key, as published in `publicKey.publicKeyPem`
    pub public_key_pem: String,
}

impl KeyPair {
    /// Generate a fresh key pair (4096 bits for real actors)
    pub fn generate(bits: usize) -> Result<Self, FederationError> {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, bits)
            .map_err(|e| FederationError::Key(format!("Key generation failed: {}", e)))?;
        let public_key = RsaPublicKey::from(&private_key);

        let private_key_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| FederationError::Key(e.to_string()))?
            .to_string();
        let public_key_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| FederationError::Key(e.to_string()))?;

        Ok(Self {
            private_key_pem,
            public_key_pem,
        })
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key_pem", &self.public_key_pem)
            .finish_non_exhaustive()
    }
}
