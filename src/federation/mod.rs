//! ActivityPub federation module
//!
//! Handles:
//! - HTTP Signatures (signing, parsing, verification)
//! - Inbound activity processing (inbox)
//! - Activity delivery (outbox)
//! - WebFinger identifier normalization and discovery
//! - Public key fetching and caching

mod client;
mod delivery;
mod inbox;
mod key_cache;
mod signature;
mod store;
mod webfinger;

pub use client::{HttpClient, HttpResponse, build_http_client};
pub use delivery::{ACTIVITY_CONTENT_TYPE, ActivityDelivery, DeliveryResult};
pub use inbox::InboxProcessor;
pub use key_cache::{PublicKeyCache, extract_actor_domain, fetch_public_key};
pub use signature::{
    ALGORITHM, KeyPair, REQUEST_TARGET, SignatureContext, SignedHeaders, generate_digest,
    key_id_matches_actor, parse_private_key, parse_public_key, sign, sign_post, verify,
};
pub use store::{DocumentStore, KeyPairProvider, MemoryDocumentStore};
pub use webfinger::{
    JRD_ACCEPT, NormalizedIdentifier, WEBFINGER_PATH, WebFingerLink, WebFingerResponse, finger,
    normalize,
};
