//! Type-tagged JSON encoding of template objects.
//!
//! Each object serializes to a JSON object whose `__type__` key names its
//! type, followed by its fields. Decoding checks the tag before reading the
//! fields, so an object of the wrong type is rejected instead of being
//! misread.

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::{SerializationError, Validate};

/// Key holding the type tag.
pub const TYPE_KEY: &str = "__type__";

/// A template object with a fixed type tag.
pub trait TypeTagged: Serialize + DeserializeOwned {
    /// Tag written under [`TYPE_KEY`].
    const TYPE_NAME: &'static str;

    /// Serializes the untagged fields.
    ///
    /// # Errors
    ///
    /// Returns the serializer's error.
    fn serialize_fields<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error>;

    /// Deserializes the untagged fields.
    ///
    /// # Errors
    ///
    /// Returns the deserializer's error.
    fn deserialize_fields<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error>;
}

/// Implements [`TypeTagged`], `Serialize` and `Deserialize` for a struct
/// deriving its fields' serde impls with `#[serde(remote = "Self")]`.
macro_rules! type_tagged {
    ($ty:ty, $name:literal) => {
        impl $crate::serialize::TypeTagged for $ty {
            const TYPE_NAME: &'static str = $name;

            fn serialize_fields<S: ::serde::Serializer>(
                &self,
                serializer: S,
            ) -> Result<S::Ok, S::Error> {
                Self::serialize(self, serializer)
            }

            fn deserialize_fields<'de, D: ::serde::Deserializer<'de>>(
                deserializer: D,
            ) -> Result<Self, D::Error> {
                Self::deserialize(deserializer)
            }
        }

        impl ::serde::Serialize for $ty {
            fn serialize<S: ::serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                $crate::serialize::serialize_tagged(self, serializer)
            }
        }

        impl<'de> ::serde::Deserialize<'de> for $ty {
            fn deserialize<D: ::serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                $crate::serialize::deserialize_tagged(deserializer)
            }
        }
    };
}

pub(crate) use type_tagged;

struct Fields<'a, T>(&'a T);

impl<T: TypeTagged> Serialize for Fields<'_, T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize_fields(serializer)
    }
}

#[derive(Serialize)]
struct Tagged<'a, T: TypeTagged> {
    #[serde(rename = "__type__")]
    type_name: &'static str,
    #[serde(flatten)]
    fields: Fields<'a, T>,
}

pub(crate) fn serialize_tagged<T: TypeTagged, S: Serializer>(
    value: &T,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    Tagged {
        type_name: T::TYPE_NAME,
        fields: Fields(value),
    }
    .serialize(serializer)
}

pub(crate) fn deserialize_tagged<'de, T: TypeTagged, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<T, D::Error> {
    let mut object = Map::<String, Value>::deserialize(deserializer)?;
    check_tag(&mut object, &[T::TYPE_NAME]).map_err(D::Error::custom)?;
    T::deserialize_fields(Value::Object(object)).map_err(D::Error::custom)
}

/// Removes the type tag from `object` and returns it if it is one of
/// `expected`.
pub(crate) fn check_tag(
    object: &mut Map<String, Value>,
    expected: &[&str],
) -> Result<String, SerializationError> {
    let mismatch = |found: String| SerializationError::TypeMismatch {
        expected: expected.join(" or "),
        found,
    };

    match object.remove(TYPE_KEY) {
        Some(Value::String(tag)) if expected.contains(&tag.as_str()) => Ok(tag),
        Some(Value::String(tag)) => Err(mismatch(tag)),
        Some(other) => Err(mismatch(other.to_string())),
        None => Err(mismatch("nothing".to_string())),
    }
}

/// Encodes an object as compact tagged JSON.
///
/// # Errors
///
/// Returns [`SerializationError::Json`] if encoding fails.
pub fn to_json<T: Serialize>(value: &T) -> Result<String, SerializationError> {
    Ok(serde_json::to_string(value)?)
}

/// Encodes an object as indented tagged JSON.
///
/// # Errors
///
/// Returns [`SerializationError::Json`] if encoding fails.
pub fn to_json_pretty<T: Serialize>(value: &T) -> Result<String, SerializationError> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Decodes and validates a tagged JSON object.
///
/// # Errors
///
/// * [`SerializationError::TypeMismatch`] if the top-level tag is not
///   `T`'s
/// * [`SerializationError::Json`] if the text or a nested object is
///   malformed or mistagged
/// * [`SerializationError::Validation`] if the decoded object is invalid
pub fn from_json<T: TypeTagged + Validate>(text: &str) -> Result<T, SerializationError> {
    let mut object: Map<String, Value> = serde_json::from_str(text)?;
    check_tag(&mut object, &[T::TYPE_NAME])?;
    let mut value = T::deserialize_fields(Value::Object(object))?;
    value.validate()?;
    Ok(value)
}
