//! ActivityPub document schemas
//!
//! Handles:
//! - Field contracts per document kind (activity, object, actor)
//! - Guarded construction and validation of documents
//! - Internal and federated (`@context`-bearing) wire forms

mod context;
mod document;
mod fields;
mod validation;

pub use context::{ACTIVITYSTREAMS_NAMESPACE, FEDERATION_CONTEXT, SECURITY_NAMESPACE};
pub use document::{CONTEXT_KEY, Document};
pub use fields::{DocumentKind, FieldSet, FieldSpec, FieldType, Registry, Validator};
pub use validation::{contains_only_strings, list_of_loose_structs, loose_struct, rfc3339_timestamp};
