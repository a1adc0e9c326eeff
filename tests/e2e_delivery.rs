//! E2E tests for outbound delivery
//!
//! A local actor signs and POSTs documents; the recorded requests are then
//! replayed into a second instance's inbox to prove they verify.

mod common;

use std::sync::Arc;

use common::{
    FakeNetwork, LOCAL_DOMAIN, PUBLIC, REMOTE_DOMAIN, StaticKeys, TestInstance, actor_document,
    key_pair,
};
use fediwire::activitypub::{ACTIVITYSTREAMS_NAMESPACE, Document, DocumentKind};
use fediwire::error::FederationError;
use serde_json::{Value, json};

const ALICE: &str = "https://lamia.social/users/alice";
const BOB_INBOX: &str = "https://remote.example/users/bob/inbox";

/// Local instance where alice has a key pair, and alice's actor is reachable
fn alice_instance(network: &Arc<FakeNetwork>) -> TestInstance {
    let keys = key_pair(0);
    network.serve_json(ALICE, &actor_document(ALICE, &keys.public_key_pem));
    TestInstance::new(LOCAL_DOMAIN, network.clone(), StaticKeys::with(ALICE, keys))
}

fn create_note(instance: &TestInstance, id: &str) -> Document {
    let mut activity = instance.federation.document(DocumentKind::Activity);
    activity.set_field("id", format!("{}/activity", id)).unwrap();
    activity.set_field("type", "Create").unwrap();
    activity.set_field("actor", ALICE).unwrap();
    activity.set_field("published", "2024-05-01T12:00:00Z").unwrap();
    activity.set_field("to", json!([PUBLIC])).unwrap();
    activity
        .set_field(
            "object",
            json!({
                "id": id,
                "type": "Note",
                "attributedTo": ALICE,
                "content": "<p>hello</p>",
            }),
        )
        .unwrap();
    activity
}

// =============================================================================
// Single delivery
// =============================================================================

#[tokio::test]
async fn test_delivery_is_signed_and_carries_context() {
    let network = FakeNetwork::new();
    let instance = alice_instance(&network);
    let activity = create_note(&instance, "https://lamia.social/notes/1");

    instance
        .federation
        .delivery_for("alice")
        .deliver(BOB_INBOX, &activity)
        .await
        .expect("delivered");

    let posts = network.posts();
    assert_eq!(posts.len(), 1);
    let post = &posts[0];
    assert_eq!(post.url, BOB_INBOX);
    assert_eq!(post.header("Content-Type"), Some("application/activity+json"));
    assert_eq!(post.header("Host"), Some(REMOTE_DOMAIN));
    assert!(post.header("Date").is_some());
    assert!(post.header("Digest").unwrap().starts_with("SHA-256="));

    let signature = post.header("Signature").expect("signed");
    assert!(signature.contains(r#"keyId="https://lamia.social/users/alice#main-key""#));
    assert!(signature.contains(r#"headers="host date digest (request-target)""#));

    let body: Value = serde_json::from_slice(&post.body).unwrap();
    let object = body.as_object().unwrap();
    assert_eq!(object.keys().next().map(String::as_str), Some("@context"));
    assert_eq!(body["@context"][0], ACTIVITYSTREAMS_NAMESPACE);
    assert_eq!(body["type"], "Create");
}

#[tokio::test]
async fn test_delivered_request_verifies_on_receiving_instance() {
    let network = FakeNetwork::new();
    let sender = alice_instance(&network);
    let receiver = TestInstance::new(
        REMOTE_DOMAIN,
        network.clone(),
        Arc::new(StaticKeys::default()),
    );

    let activity = create_note(&sender, "https://lamia.social/notes/1");
    sender
        .federation
        .delivery_for("alice")
        .deliver(BOB_INBOX, &activity)
        .await
        .expect("delivered");

    let post = network.posts().pop().expect("one post");
    let received = receiver
        .federation
        .inbox()
        .receive("POST", &post.path(), &post.header_map(), &post.body)
        .await
        .expect("receiver accepts the delivery");

    assert_eq!(received.id(), activity.id());
    assert_eq!(receiver.store.len().await, 1);
}

#[tokio::test]
async fn test_invalid_document_is_never_sent() {
    let network = FakeNetwork::new();
    let instance = alice_instance(&network);

    let mut activity = instance.federation.document(DocumentKind::Activity);
    activity.set_field("type", "Create").unwrap();
    activity.set_field("actor", ALICE).unwrap();

    let error = instance
        .federation
        .delivery_for("alice")
        .deliver(BOB_INBOX, &activity)
        .await
        .expect_err("missing id and published");
    match error {
        FederationError::Validation(violation) => assert_eq!(violation.field, "id"),
        other => panic!("expected validation error, got {other:?}"),
    }
    assert!(network.posts().is_empty());
}

#[tokio::test]
async fn test_inbox_refusal_is_a_federation_error() {
    let network = FakeNetwork::new();
    let instance = alice_instance(&network);
    network.answer_posts(BOB_INBOX, 401);

    let activity = create_note(&instance, "https://lamia.social/notes/1");
    let error = instance
        .federation
        .delivery_for("alice")
        .deliver(BOB_INBOX, &activity)
        .await
        .expect_err("refused");
    assert!(matches!(error, FederationError::Federation(message) if message.contains("401")));
}

#[tokio::test]
async fn test_missing_local_key_pair_fails_before_sending() {
    let network = FakeNetwork::new();
    let instance = alice_instance(&network);

    let activity = create_note(&instance, "https://lamia.social/notes/1");
    let error = instance
        .federation
        .delivery_for("nobody")
        .deliver(BOB_INBOX, &activity)
        .await
        .expect_err("no key pair for nobody");
    assert!(matches!(error, FederationError::NotFound));
    assert!(network.posts().is_empty());
}

// =============================================================================
// Fan-out
// =============================================================================

#[tokio::test]
async fn test_fan_out_deduplicates_and_reports_per_inbox() {
    let network = FakeNetwork::new();
    let instance = alice_instance(&network);
    network.answer_posts("https://down.example/inbox", 503);

    let activity = create_note(&instance, "https://lamia.social/notes/1");
    let results = instance
        .federation
        .delivery_for("alice")
        .deliver_to_inboxes(
            &activity,
            vec![
                "https://remote.example/inbox".to_string(),
                "https://down.example/inbox".to_string(),
                "https://remote.example/inbox".to_string(),
            ],
        )
        .await
        .expect("fan-out ran");

    assert_eq!(results.len(), 2);
    assert_eq!(network.posts().len(), 2);

    let failed: Vec<_> = results.iter().filter(|result| !result.success).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].inbox_uri, "https://down.example/inbox");
    assert!(failed[0].error.as_deref().unwrap_or_default().contains("503"));
}
