//! Reusable field validators

use serde_json::Value;

use super::fields::FieldType;

/// True when every element of a list is a string.
///
/// Non-list values are rejected.
pub fn contains_only_strings(value: &Value) -> bool {
    value
        .as_array()
        .is_some_and(|items| items.iter().all(Value::is_string))
}

/// Build a validator for a map that must carry each `expected` key with a
/// value of the given type. Extra keys are allowed.
pub fn loose_struct(expected: &[(&str, FieldType)]) -> impl Fn(&Value) -> bool + Send + Sync + use<> {
    let expected: Vec<(String, FieldType)> = expected
        .iter()
        .map(|(key, field_type)| (key.to_string(), *field_type))
        .collect();

    move |value: &Value| matches_loose_struct(&expected, value)
}

/// Like [`loose_struct`], applied to every element of a list
pub fn list_of_loose_structs(
    expected: &[(&str, FieldType)],
) -> impl Fn(&Value) -> bool + Send + Sync + use<> {
    let expected: Vec<(String, FieldType)> = expected
        .iter()
        .map(|(key, field_type)| (key.to_string(), *field_type))
        .collect();

    move |value: &Value| {
        value.as_array().is_some_and(|items| {
            items
                .iter()
                .all(|item| matches_loose_struct(&expected, item))
        })
    }
}

fn matches_loose_struct(expected: &[(String, FieldType)], value: &Value) -> bool {
    let Some(map) = value.as_object() else {
        return false;
    };

    expected.iter().all(|(key, field_type)| {
        map.get(key)
            .is_some_and(|field_value| field_type.matches(field_value))
    })
}

/// `published`/`updated` values are RFC 3339 timestamps
pub fn rfc3339_timestamp(value: &Value) -> bool {
    value
        .as_str()
        .is_some_and(|text| chrono::DateTime::parse_from_rfc3339(text).is_ok())
}
