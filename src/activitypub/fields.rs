//! Field contracts for ActivityPub documents
//!
//! Each document kind carries a [`FieldSet`]: the fields we track, the JSON
//! types each one accepts (in order of preference), whether it is required,
//! and an optional validator per accepted type. Fields that are not declared
//! are untracked and pass through untouched, since peers routinely attach
//! vendor extensions we do not know about.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::validation::{
    contains_only_strings, list_of_loose_structs, loose_struct, rfc3339_timestamp,
};
use crate::error::{ValidationError, ValidationFailure};

/// Predicate run against a value once its type has matched
pub type Validator = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// JSON type tag a field may accept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    List,
    Map,
    Bool,
}

impl FieldType {
    /// Runtime type check against a JSON value
    pub fn matches(self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::List => value.is_array(),
            FieldType::Map => value.is_object(),
            FieldType::Bool => value.is_boolean(),
        }
    }
}

/// The three document kinds exchanged between servers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Activity,
    Object,
    Actor,
}

const ACTOR_TYPES: &[&str] = &["Person", "Service", "Application", "Group", "Organization"];

/// ActivityStreams 2.0 activity vocabulary plus common extensions
const ACTIVITY_TYPES: &[&str] = &[
    "Accept",
    "Add",
    "Announce",
    "Arrive",
    "Block",
    "Create",
    "Delete",
    "Dislike",
    "Flag",
    "Follow",
    "Ignore",
    "Invite",
    "Join",
    "Leave",
    "Like",
    "Listen",
    "Move",
    "Offer",
    "Question",
    "Read",
    "Reject",
    "Remove",
    "TentativeAccept",
    "TentativeReject",
    "Travel",
    "Undo",
    "Update",
    "View",
    // Misskey and Pleroma reactions
    "EmojiReact",
    "EmojiReaction",
];

impl DocumentKind {
    /// Guess the kind from an ActivityStreams `type` value.
    ///
    /// Anything outside the actor and activity vocabularies is an object.
    pub fn infer(type_name: &str) -> Self {
        if ACTOR_TYPES.contains(&type_name) {
            DocumentKind::Actor
        } else if ACTIVITY_TYPES.contains(&type_name) {
            DocumentKind::Activity
        } else {
            DocumentKind::Object
        }
    }

    /// Kind of a received document, looking at its shape as well as `type`.
    ///
    /// `Question` is both an activity and the poll object Mastodon sends,
    /// so it is an activity only when it names an `actor`. An unknown type
    /// that has an `actor` and no `url` is treated as an activity.
    pub fn detect(raw: &Map<String, Value>) -> Self {
        let type_name = match raw.get("type") {
            Some(Value::String(name)) => Some(name.as_str()),
            // JSON-LD allows several types; the first known one wins
            Some(Value::Array(names)) => {
                let names: Vec<&str> = names.iter().filter_map(Value::as_str).collect();
                names
                    .iter()
                    .copied()
                    .find(|name| ACTOR_TYPES.contains(name) || ACTIVITY_TYPES.contains(name))
                    .or_else(|| names.first().copied())
            }
            _ => None,
        };
        let has_actor = raw.get("actor").is_some_and(Value::is_string);

        match type_name.map(Self::infer) {
            Some(DocumentKind::Activity) if type_name == Some("Question") && !has_actor => {
                DocumentKind::Object
            }
            Some(DocumentKind::Object) | None if has_actor && !raw.contains_key("url") => {
                DocumentKind::Activity
            }
            Some(kind) => kind,
            None => DocumentKind::Object,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentKind::Activity => "activity",
            DocumentKind::Object => "object",
            DocumentKind::Actor => "actor",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contract for a single field
#[derive(Clone)]
pub struct FieldSpec {
    /// Accepted types in declared order, each paired with its validator
    accepted: Vec<(FieldType, Option<Validator>)>,
    required: bool,
}

impl FieldSpec {
    pub fn required() -> Self {
        Self {
            accepted: Vec::new(),
            required: true,
        }
    }

    pub fn optional() -> Self {
        Self {
            accepted: Vec::new(),
            required: false,
        }
    }

    /// Accept `field_type` with no further validation
    pub fn accept(mut self, field_type: FieldType) -> Self {
        self.accepted.push((field_type, None));
        self
    }

    /// Accept `field_type` when `validator` also approves the value
    pub fn accept_with(
        mut self,
        field_type: FieldType,
        validator: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.accepted.push((field_type, Some(Arc::new(validator))));
        self
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn accepted_types(&self) -> Vec<FieldType> {
        self.accepted.iter().map(|(field_type, _)| *field_type).collect()
    }

    pub fn validators(&self) -> Vec<Option<&Validator>> {
        self.accepted
            .iter()
            .map(|(_, validator)| validator.as_ref())
            .collect()
    }

    /// Type and validator check shared by guarded writes and full validation.
    ///
    /// The first accepted type that matches picks the validator; later types
    /// are never consulted even if their validator would pass.
    pub fn check(&self, field: &str, value: &Value) -> Result<(), ValidationError> {
        let Some((_, validator)) = self
            .accepted
            .iter()
            .find(|(field_type, _)| field_type.matches(value))
        else {
            return Err(ValidationError::new(
                field,
                value.clone(),
                ValidationFailure::TypeMismatch,
            ));
        };

        match validator {
            Some(validator) if !validator(value) => Err(ValidationError::new(
                field,
                value.clone(),
                ValidationFailure::Rejected,
            )),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let accepted: Vec<_> = self
            .accepted
            .iter()
            .map(|(field_type, validator)| (field_type, validator.is_some()))
            .collect();
        f.debug_struct("FieldSpec")
            .field("accepted", &accepted)
            .field("required", &self.required)
            .finish()
    }
}

/// Declared fields of one document kind, in declaration order
#[derive(Debug, Clone, Default)]
pub struct FieldSet {
    fields: Vec<(String, FieldSpec)>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a field. Redeclaring a name replaces the earlier contract.
    pub fn field(mut self, name: &str, spec: FieldSpec) -> Self {
        self.fields.retain(|(existing, _)| existing != name);
        self.fields.push((name.to_string(), spec));
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, spec)| spec)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldSpec)> {
        self.fields.iter().map(|(name, spec)| (name.as_str(), spec))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Field contracts for every document kind.
///
/// Built once at startup and shared behind an `Arc`; never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Registry {
    activity: FieldSet,
    object: FieldSet,
    actor: FieldSet,
}

impl Registry {
    pub fn new(activity: FieldSet, object: FieldSet, actor: FieldSet) -> Self {
        Self {
            activity,
            object,
            actor,
        }
    }

    /// The contracts we hold peers (and ourselves) to
    pub fn standard() -> Self {
        Self::new(activity_fields(), object_fields(), actor_fields())
    }

    pub fn field_set(&self, kind: DocumentKind) -> &FieldSet {
        match kind {
            DocumentKind::Activity => &self.activity,
            DocumentKind::Object => &self.object,
            DocumentKind::Actor => &self.actor,
        }
    }

    /// `None` means the field is untracked and always valid
    pub fn spec_for(&self, kind: DocumentKind, field: &str) -> Option<&FieldSpec> {
        self.field_set(kind).get(field)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::standard()
    }
}

fn string() -> FieldSpec {
    FieldSpec::required().accept(FieldType::String)
}

fn optional(field_type: FieldType) -> FieldSpec {
    FieldSpec::optional().accept(field_type)
}

fn timestamp() -> FieldSpec {
    FieldSpec::required().accept_with(FieldType::String, rfc3339_timestamp)
}

/// Recipient lists: a list of addresses, or a single address
fn recipients() -> FieldSpec {
    FieldSpec::optional()
        .accept_with(FieldType::List, contains_only_strings)
        .accept(FieldType::String)
}

fn tags() -> FieldSpec {
    FieldSpec::optional().accept_with(
        FieldType::List,
        list_of_loose_structs(&[("type", FieldType::String)]),
    )
}

fn activity_fields() -> FieldSet {
    FieldSet::new()
        .field("id", string())
        // Create/Follow/Undo/...
        .field("type", string())
        .field("actor", string())
        .field("published", timestamp())
        .field("to", recipients())
        .field("cc", recipients())
        // inline object or a reference to one
        .field(
            "object",
            FieldSpec::optional()
                .accept(FieldType::String)
                .accept(FieldType::Map),
        )
}

fn object_fields() -> FieldSet {
    FieldSet::new()
        .field("id", string())
        // Note/Article/Tombstone/Event
        .field("type", string())
        .field("url", string())
        .field("published", timestamp())
        .field("to", recipients())
        .field("cc", recipients())
        .field("content", optional(FieldType::String))
        .field("replies", optional(FieldType::List))
        .field("inReplyTo", optional(FieldType::String))
        // content warning text
        .field("summary", optional(FieldType::String))
        .field("sensitive", optional(FieldType::Bool))
        .field("attachment", optional(FieldType::List))
        .field("tag", tags())
        // ISO language code -> content
        .field("contentMap", optional(FieldType::Map))
        .field(
            "attributedTo",
            FieldSpec::optional()
                .accept(FieldType::String)
                .accept_with(FieldType::List, contains_only_strings),
        )
}

fn actor_fields() -> FieldSet {
    FieldSet::new()
        .field("id", string())
        // Person/Service
        .field("type", string())
        .field("url", string())
        .field("followers", string())
        .field("following", string())
        .field("inbox", string())
        .field("outbox", string())
        // pinned objects collection
        .field("featured", optional(FieldType::String))
        .field("name", string())
        .field(
            "publicKey",
            FieldSpec::required().accept_with(
                FieldType::Map,
                loose_struct(&[
                    ("id", FieldType::String),
                    ("owner", FieldType::String),
                    ("publicKeyPem", FieldType::String),
                ]),
            ),
        )
        .field("preferredUsername", optional(FieldType::String))
        .field("summary", string())
        .field("manuallyApprovesFollowers", optional(FieldType::Bool))
        // PropertyValue entries
        .field("attachment", optional(FieldType::List))
        .field("tag", tags())
        // sharedInbox lives here
        .field("endpoints", optional(FieldType::Map))
        .field("icon", optional(FieldType::Map))
        .field("image", optional(FieldType::Map))
}
