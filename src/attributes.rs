use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize};

use crate::toggle::Timestamp;

/// Type alias for a HashMap representing key-value pairs of attributes.
///
/// Keys are strings representing attribute names.
///
/// # Examples
/// ```
/// # use featureguards::{Attributes, AttributeValue};
/// let attributes = [
///     ("user_id".to_owned(), 123i64.into()),
///     ("is_admin".to_owned(), true.into()),
///     ("company_slug".to_owned(), "FeatureGuards".into()),
/// ].into_iter().collect::<Attributes>();
/// ```
pub type Attributes = HashMap<String, AttributeValue>;

/// Enum representing possible values of an attribute.
///
/// Values are untyped from the caller's perspective; they are checked against the type declared by
/// a toggle's rules at evaluation time.
///
/// Conveniently implements `From` conversions for `String`, `&str`, `i64`, `f64`, `bool`, and
/// [`Timestamp`].
///
/// ```
/// # use featureguards::AttributeValue;
/// let string_attr: AttributeValue = "example".into();
/// let int_attr: AttributeValue = 42i64.into();
/// let float_attr: AttributeValue = 42.5.into();
/// let bool_attr: AttributeValue = true.into();
/// ```
// Variant order matters for untagged deserialization: integers must be tried before floats and
// timestamps before plain strings.
#[derive(Debug, Serialize, Deserialize, PartialEq, From, Clone)]
#[serde(untagged)]
pub enum AttributeValue {
    /// A boolean value.
    Boolean(bool),
    /// A 64-bit integer value.
    Int(i64),
    /// A floating-point value.
    Float(f64),
    /// A point in time.
    DateTime(Timestamp),
    /// A string value.
    String(String),
}

impl AttributeValue {
    /// Return the integer this value represents, if any. Floats are accepted only when the
    /// conversion is lossless.
    pub(crate) fn as_integer(&self) -> Option<i64> {
        match *self {
            AttributeValue::Int(i) => Some(i),
            // i64::MAX as f64 rounds up to 2^63, which is out of range.
            AttributeValue::Float(f) if f >= i64::MIN as f64 && f < i64::MAX as f64 => {
                let i = f as i64;
                (i as f64 == f).then_some(i)
            }
            _ => None,
        }
    }
}

impl AttributeValue {
    /// Return the number this value represents, if any. Integers are accepted only when they
    /// convert to `f64` exactly.
    pub(crate) fn as_float(&self) -> Option<f64> {
        const MAX_SAFE_INTEGER: u64 = 1 << 53;
        match *self {
            AttributeValue::Float(f) => Some(f),
            AttributeValue::Int(i) if i.unsigned_abs() <= MAX_SAFE_INTEGER => Some(i as f64),
            _ => None,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}
