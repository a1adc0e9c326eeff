//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{IntCounterVec, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Schema Metrics
    pub static ref DOCUMENT_VALIDATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fediwire_document_validations_total", "Total number of document validations"),
        &["kind", "outcome"]
    ).expect("metric can be created");

    // Signature Metrics
    pub static ref SIGNATURE_VERIFICATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fediwire_signature_verifications_total", "Total number of HTTP signature verifications"),
        &["outcome"]
    ).expect("metric can be created");

    // Federation Metrics
    pub static ref ACTIVITIES_RECEIVED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fediwire_activities_received_total", "Total number of ActivityPub documents accepted from peers"),
        &["kind"]
    ).expect("metric can be created");
    pub static ref ACTIVITIES_SENT_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fediwire_activities_sent_total", "Total number of ActivityPub documents delivered to peers"),
        &["kind"]
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fediwire_errors_total", "Total number of errors"),
        &["error_type"]
    ).expect("metric can be created");
}

/// Initialize metrics registry.
///
/// Registering twice is reported as an error by prometheus; callers run this
/// once at startup.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    REGISTRY.register(Box::new(DOCUMENT_VALIDATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SIGNATURE_VERIFICATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ACTIVITIES_RECEIVED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ACTIVITIES_SENT_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ERRORS_TOTAL.clone()))?;

    tracing::info!("Metrics registry initialized");
    Ok(())
}
