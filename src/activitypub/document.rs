//! Schema-checked ActivityPub documents
//!
//! A [`Document`] wraps the JSON-LD mapping of one activity, object or actor
//! together with the [`Registry`] that describes its fields. Inbound payloads
//! are loaded unchecked (a document under inspection may be transiently
//! invalid) and judged with [`Document::validate`]; locally built documents go
//! through [`Document::set_field`], which refuses any write that breaks the
//! field contract.

use std::sync::Arc;

use serde_json::{Map, Value};

use super::context::FEDERATION_CONTEXT;
use super::fields::{DocumentKind, Registry};
use crate::error::{FederationError, ValidationError, ValidationFailure};
use crate::metrics::DOCUMENT_VALIDATIONS_TOTAL;

/// Key carrying the JSON-LD vocabulary descriptor
pub const CONTEXT_KEY: &str = "@context";

/// One protocol document and the contract it is held to
#[derive(Debug, Clone)]
pub struct Document {
    kind: DocumentKind,
    representation: Map<String, Value>,
    registry: Arc<Registry>,
}

impl Document {
    /// Empty document of the given kind
    pub fn new(kind: DocumentKind, registry: Arc<Registry>) -> Self {
        Self {
            kind,
            representation: Map::new(),
            registry,
        }
    }

    /// Wrap a received mapping without validating it
    pub fn from_wire(kind: DocumentKind, registry: Arc<Registry>, raw: Map<String, Value>) -> Self {
        Self {
            kind,
            representation: raw,
            registry,
        }
    }

    /// Parse a received body, detecting the kind from its `type` and shape.
    ///
    /// Only JSON syntax and the top-level shape are checked here; call
    /// [`Document::check`] before trusting the contents.
    pub fn from_wire_bytes(registry: Arc<Registry>, body: &[u8]) -> Result<Self, FederationError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| FederationError::BadRequest(format!("Invalid JSON body: {}", e)))?;

        let Value::Object(raw) = value else {
            return Err(FederationError::BadRequest(
                "Document must be a JSON object".to_string(),
            ));
        };

        let kind = DocumentKind::detect(&raw);

        Ok(Self::from_wire(kind, registry, raw))
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    /// Replace the representation wholesale. No validation is performed.
    pub fn load(&mut self, raw: Map<String, Value>) {
        self.representation = raw;
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.representation.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn id(&self) -> Option<&str> {
        self.get_str("id")
    }

    pub fn type_name(&self) -> Option<&str> {
        self.get_str("type")
    }

    /// Guarded write.
    ///
    /// Untracked fields are stored as given. Tracked fields must match one of
    /// their accepted types and pass that type's validator; on failure the
    /// document is left exactly as it was.
    pub fn set_field(&mut self, name: &str, value: impl Into<Value>) -> Result<(), ValidationError> {
        let value = value.into();

        if let Some(spec) = self.registry.spec_for(self.kind, name) {
            spec.check(name, &value).inspect_err(|error| {
                tracing::warn!(
                    kind = %self.kind,
                    field = name,
                    reason = ?error.reason,
                    "Rejected field write"
                );
            })?;
        }

        self.representation.insert(name.to_string(), value);
        Ok(())
    }

    /// True when every declared field honours its contract.
    ///
    /// Untracked fields are never inspected.
    pub fn validate(&self) -> bool {
        self.check().is_ok()
    }

    /// Like [`Document::validate`], reporting the first violation.
    ///
    /// Missing required fields are reported with a `null` value.
    pub fn check(&self) -> Result<(), ValidationError> {
        let result = self.first_violation();

        let outcome = match &result {
            Ok(()) => "valid",
            Err(error) => {
                let message = match error.reason {
                    ValidationFailure::Missing => "Required field is missing",
                    ValidationFailure::TypeMismatch => "Field has an unaccepted type",
                    ValidationFailure::Rejected => "Field failed validation",
                };
                tracing::warn!(
                    kind = %self.kind,
                    id = self.id().unwrap_or("<none>"),
                    field = %error.field,
                    "{}",
                    message
                );
                "invalid"
            }
        };

        DOCUMENT_VALIDATIONS_TOTAL
            .with_label_values(&[self.kind.as_str(), outcome])
            .inc();

        result
    }

    fn first_violation(&self) -> Result<(), ValidationError> {
        for (name, spec) in self.registry.field_set(self.kind).iter() {
            match self.representation.get(name) {
                None if spec.is_required() => return Err(ValidationError::missing(name)),
                None => {}
                Some(value) => spec.check(name, value)?,
            }
        }
        Ok(())
    }

    /// Internal form: a copy of the representation, no `@context`
    pub fn to_wire(&self) -> Map<String, Value> {
        let mut wire = self.representation.clone();
        wire.remove(CONTEXT_KEY);
        wire
    }

    /// Published form: a copy with our `@context` up front
    pub fn to_federated_wire(&self) -> Map<String, Value> {
        let mut wire = Map::with_capacity(self.representation.len() + 1);
        wire.insert(CONTEXT_KEY.to_string(), FEDERATION_CONTEXT.clone());
        for (key, value) in &self.representation {
            if key != CONTEXT_KEY {
                wire.insert(key.clone(), value.clone());
            }
        }
        wire
    }

    /// Append a `PropertyValue` profile field (e.g. "Pronouns": "they/them")
    pub fn add_property(&mut self, name: &str, value: &str) -> Result<(), ValidationError> {
        let mut entries = self.attachment_entries()?;
        entries.push(serde_json::json!({
            "type": "PropertyValue",
            "name": name,
            "value": value,
        }));
        self.set_field("attachment", entries)
    }

    /// Remove the profile field at `index`. Out-of-range indices are ignored.
    pub fn remove_property(&mut self, index: usize) -> Result<(), ValidationError> {
        if self.get("attachment").is_none() {
            return Ok(());
        }

        let mut entries = self.attachment_entries()?;
        if index < entries.len() {
            entries.remove(index);
            self.set_field("attachment", entries)?;
        }
        Ok(())
    }

    fn attachment_entries(&self) -> Result<Vec<Value>, ValidationError> {
        match self.get("attachment") {
            None => Ok(Vec::new()),
            Some(Value::Array(entries)) => Ok(entries.clone()),
            Some(other) => Err(ValidationError::new(
                "attachment",
                other.clone(),
                ValidationFailure::TypeMismatch,
            )),
        }
    }

    /// `publicKey.publicKeyPem` of an actor
    pub fn public_key_pem(&self) -> Option<&str> {
        self.get("publicKey")?.get("publicKeyPem")?.as_str()
    }

    /// `publicKey.id` of an actor
    pub fn public_key_id(&self) -> Option<&str> {
        self.get("publicKey")?.get("id")?.as_str()
    }
}
