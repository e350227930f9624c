//! Entity contract: identity + attribute view over an application record.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::ModelError;
use crate::id::Identity;
use crate::validation::ValidationRegistry;

/// Application-defined record type managed by a model.
///
/// The model layer never looks inside an entity except through attribute names,
/// which are resolved against the entity's serialized JSON object form.
///
/// ```ignore
/// #[derive(Clone, Serialize, Deserialize)]
/// struct User { id: Option<u64>, name: String, age: i64 }
///
/// impl Entity for User {
///     type Id = u64;
///     const COLLECTION: &'static str = "users";
///     fn id(&self) -> Option<&u64> { self.id.as_ref() }
///     fn set_id(&mut self, id: u64) { self.id = Some(id); }
/// }
/// ```
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    type Id: Identity;

    /// Collection (table) name the records live in.
    const COLLECTION: &'static str;

    /// Name of the identity attribute.
    const IDENTITY: &'static str = "id";

    /// `None` until the driver has persisted the record.
    fn id(&self) -> Option<&Self::Id>;

    fn set_id(&mut self, id: Self::Id);

    /// Declares type-level validation rules; runs once per model construction.
    fn validations(_registry: &mut ValidationRegistry) {}
}

/// Attribute map of an entity.
///
/// Fails with `Serialization` when the entity does not serialize to a JSON object.
pub fn attributes<T: Entity>(entity: &T) -> Result<Map<String, Value>, ModelError> {
    match serde_json::to_value(entity)? {
        Value::Object(map) => Ok(map),
        other => Err(ModelError::Serialization(format!(
            "{} must serialize to an object, got {}",
            T::COLLECTION,
            kind_name(&other)
        ))),
    }
}

/// Single attribute lookup; a missing attribute reads as `None`.
pub fn attribute<'a>(attributes: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    attributes.get(name)
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Tag(String);

    impl Entity for Tag {
        type Id = String;
        const COLLECTION: &'static str = "tags";

        fn id(&self) -> Option<&String> {
            Some(&self.0)
        }

        fn set_id(&mut self, id: String) {
            self.0 = id;
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Note {
        id: Option<u64>,
        body: String,
    }

    impl Entity for Note {
        type Id = u64;
        const COLLECTION: &'static str = "notes";

        fn id(&self) -> Option<&u64> {
            self.id.as_ref()
        }

        fn set_id(&mut self, id: u64) {
            self.id = Some(id);
        }
    }

    #[test]
    fn object_entities_expose_attributes() {
        let note = Note {
            id: None,
            body: "hi".to_string(),
        };
        let attrs = attributes(&note).unwrap();
        assert_eq!(attribute(&attrs, "body"), Some(&Value::from("hi")));
        assert_eq!(attribute(&attrs, "id"), Some(&Value::Null));
        assert_eq!(attribute(&attrs, "missing"), None);
    }

    #[test]
    fn non_object_entities_are_rejected() {
        let err = attributes(&Tag("x".to_string())).unwrap_err();
        assert!(matches!(err, ModelError::Serialization(msg) if msg.contains("string")));
    }
}
