//! JSON-LD `@context` published with every outbound document

use lazy_static::lazy_static;
use serde_json::{Value, json};

pub const ACTIVITYSTREAMS_NAMESPACE: &str = "https://www.w3.org/ns/activitystreams";
pub const SECURITY_NAMESPACE: &str = "https://w3id.org/security/";

lazy_static! {
    /// The vocabulary we speak with peers.
    ///
    /// ActivityStreams first, the security vocabulary for `publicKey`, then
    /// the handful of extension terms Mastodon-compatible servers expect.
    pub static ref FEDERATION_CONTEXT: Value = json!([
        ACTIVITYSTREAMS_NAMESPACE,
        SECURITY_NAMESPACE,
        {
            "Hashtag": "as:Hashtag",
            "sensitive": "as:sensitive",
            // meaningless when false
            "manuallyApprovesFollowers": "as:manuallyApprovesFollowers",
            "toot": "http://joinmastodon.org/ns#",
            "focalPoint": {
                "@container": "@list",
                "@id": "toot:focalPoint"
            },
            // pinned objects collection
            "featured": {
                "@id": "toot:featured",
                "@type": "@id"
            },
            "schema": "http://schema.org#",
            "PropertyValue": "schema:PropertyValue",
            "value": "schema:value"
        }
    ]);
}
