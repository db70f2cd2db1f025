#![forbid(unsafe_code)]

//! Conversion between typed values and the store's native property bag.
//!
//! The store speaks [`PropertyValue`], a self-describing tree of strings,
//! numbers, booleans, dates, binary blobs, arrays and string-keyed
//! dictionaries. Any `Serialize + DeserializeOwned` type gets a
//! [`Persistable`] implementation for free: the value is serialized
//! structurally through `serde_json::Value` and mapped onto the property bag.
//!
//! # Invariants
//!
//! 1. `decode(encode(v)) == v` for every value that encodes successfully.
//! 2. There is no null in the property bag. Anything that serializes to null
//!    (`None`, `()`, non-finite floats) fails with [`CodecError::Encoding`].
//! 3. Both directions are pure: no I/O, no global state.
//!
//! # Decoding foreign values
//!
//! A store may hold values this crate never produced (another process, a
//! settings editor). `Date` decodes as seconds since the Unix epoch and
//! `Data` decodes as standard base64 text, so a field declared as `f64` or
//! `String` accepts them.

use std::collections::BTreeMap;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use web_time::{SystemTime, UNIX_EPOCH};

/// Native value understood by a [`Store`](crate::store::Store).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyValue {
    String(String),
    Integer(i64),
    Real(f64),
    Bool(bool),
    Date(#[serde(with = "epoch_seconds")] SystemTime),
    Data(#[serde(with = "base64_data")] Vec<u8>),
    Array(Vec<PropertyValue>),
    Dictionary(BTreeMap<String, PropertyValue>),
}

impl PropertyValue {
    /// Short name of the variant, for diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Integer(_) => "integer",
            Self::Real(_) => "real",
            Self::Bool(_) => "bool",
            Self::Date(_) => "date",
            Self::Data(_) => "data",
            Self::Array(_) => "array",
            Self::Dictionary(_) => "dictionary",
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Errors from converting values to or from [`PropertyValue`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    /// The value's structure cannot be expressed as a property bag.
    #[error("cannot encode value at `{path}`: {reason}")]
    Encoding { path: String, reason: String },
    /// The stored value does not have the shape the target type expects.
    #[error("cannot decode stored value: {0}")]
    Decoding(String),
}

/// A value that can be persisted in a [`Store`](crate::store::Store).
///
/// Implemented for every `Serialize + DeserializeOwned` type.
pub trait Persistable: Sized {
    /// Convert to the store's native representation.
    ///
    /// # Errors
    ///
    /// [`CodecError::Encoding`] when some part of the value has no
    /// property-bag equivalent.
    fn to_property_value(&self) -> Result<PropertyValue, CodecError>;

    /// Reconstruct from the store's native representation.
    ///
    /// # Errors
    ///
    /// [`CodecError::Decoding`] when the shape does not match `Self`.
    fn from_property_value(value: &PropertyValue) -> Result<Self, CodecError>;
}

impl<T: Serialize + DeserializeOwned> Persistable for T {
    fn to_property_value(&self) -> Result<PropertyValue, CodecError> {
        let json = serde_json::to_value(self).map_err(|e| CodecError::Encoding {
            path: "$".to_owned(),
            reason: e.to_string(),
        })?;
        from_json(json, "$")
    }

    fn from_property_value(value: &PropertyValue) -> Result<Self, CodecError> {
        let json = to_json(value)?;
        serde_json::from_value(json).map_err(|e| CodecError::Decoding(e.to_string()))
    }
}

/// Encode `value` into its native representation.
///
/// # Errors
///
/// See [`Persistable::to_property_value`].
pub fn encode<V: Persistable>(value: &V) -> Result<PropertyValue, CodecError> {
    value.to_property_value()
}

/// Decode a native representation into `V`.
///
/// # Errors
///
/// See [`Persistable::from_property_value`].
pub fn decode<V: Persistable>(native: &PropertyValue) -> Result<V, CodecError> {
    V::from_property_value(native)
}

fn from_json(value: Value, path: &str) -> Result<PropertyValue, CodecError> {
    let unsupported = |reason: &str| CodecError::Encoding {
        path: path.to_owned(),
        reason: reason.to_owned(),
    };
    match value {
        // serde_json also maps NaN and infinities to null.
        Value::Null => Err(unsupported("null has no property-list representation")),
        Value::Bool(b) => Ok(PropertyValue::Bool(b)),
        Value::String(s) => Ok(PropertyValue::String(s)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(PropertyValue::Integer(i))
            } else if n.is_u64() {
                Err(unsupported("integer exceeds the signed 64-bit range"))
            } else {
                n.as_f64()
                    .map(PropertyValue::Real)
                    .ok_or_else(|| unsupported("number is not representable"))
            }
        }
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| from_json(item, &format!("{path}[{i}]")))
            .collect::<Result<Vec<_>, _>>()
            .map(PropertyValue::Array),
        Value::Object(fields) => fields
            .into_iter()
            .map(|(k, v)| {
                let child = from_json(v, &format!("{path}.{k}"))?;
                Ok((k, child))
            })
            .collect::<Result<BTreeMap<_, _>, CodecError>>()
            .map(PropertyValue::Dictionary),
    }
}

fn to_json(value: &PropertyValue) -> Result<Value, CodecError> {
    Ok(match value {
        PropertyValue::String(s) => Value::String(s.clone()),
        PropertyValue::Integer(i) => Value::Number((*i).into()),
        PropertyValue::Real(r) => Number::from_f64(*r)
            .map(Value::Number)
            .ok_or_else(|| CodecError::Decoding(format!("non-finite real {r}")))?,
        PropertyValue::Bool(b) => Value::Bool(*b),
        PropertyValue::Date(t) => {
            let secs = epoch_seconds::to_secs(*t);
            Number::from_f64(secs)
                .map(Value::Number)
                .ok_or_else(|| CodecError::Decoding("date out of range".to_owned()))?
        }
        PropertyValue::Data(bytes) => Value::String(STANDARD.encode(bytes)),
        PropertyValue::Array(items) => {
            Value::Array(items.iter().map(to_json).collect::<Result<_, _>>()?)
        }
        PropertyValue::Dictionary(fields) => {
            let mut map = Map::with_capacity(fields.len());
            for (k, v) in fields {
                map.insert(k.clone(), to_json(v)?);
            }
            Value::Object(map)
        }
    })
}

mod epoch_seconds {
    use super::{Duration, SystemTime, UNIX_EPOCH};
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub(super) fn to_secs(t: SystemTime) -> f64 {
        match t.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs_f64(),
            Err(before) => -before.duration().as_secs_f64(),
        }
    }

    pub(super) fn from_secs(secs: f64) -> Option<SystemTime> {
        let magnitude = Duration::try_from_secs_f64(secs.abs()).ok()?;
        if secs >= 0.0 {
            UNIX_EPOCH.checked_add(magnitude)
        } else {
            UNIX_EPOCH.checked_sub(magnitude)
        }
    }

    pub(super) fn serialize<S: Serializer>(t: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(to_secs(*t))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SystemTime, D::Error> {
        let secs = f64::deserialize(d)?;
        from_secs(secs).ok_or_else(|| D::Error::custom(format!("date out of range: {secs}")))
    }
}

mod base64_data {
    use super::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        STANDARD.decode(text).map_err(D::Error::custom)
    }
}
