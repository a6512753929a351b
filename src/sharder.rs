//! Deterministic bucketing for sticky percentage rollouts.
use xxhash_rust::xxh64::xxh64;

use crate::{
    error::ValidationError,
    toggle::{Key, KeyType},
    AttributeValue, Attributes,
};

/// Number of buckets a percentage is divided into. Gives 0.0001% precision.
const TOTAL_BUCKETS: u64 = 1_000_000;

/// Hash the first of `keys` present in `attributes`, salted with `salt`.
///
/// The digest must stay bit-identical with other FeatureGuards SDKs and the server, so that a
/// caller lands in the same bucket everywhere.
pub(crate) fn bucket_hash(
    toggle: &str,
    keys: &[Key],
    salt: &str,
    attributes: Option<&Attributes>,
) -> Result<u64, ValidationError> {
    let attributes = attributes.ok_or_else(|| ValidationError::NoAttributes {
        toggle: toggle.to_owned(),
    })?;
    if keys.is_empty() {
        return Err(ValidationError::NoStickinessKeys {
            toggle: toggle.to_owned(),
        });
    }

    for key in keys {
        if key.key.is_empty() {
            return Err(ValidationError::EmptyKey {
                toggle: toggle.to_owned(),
            });
        }
        let Some(attribute) = attributes.get(&key.key) else {
            continue;
        };

        let value = stringify(toggle, key, attribute)?;
        let input = format!("{salt}{value}");
        return Ok(xxh64(input.as_bytes(), 0));
    }

    Err(ValidationError::NoMatchingAttribute {
        toggle: toggle.to_owned(),
    })
}

/// Return `true` if `hash` falls within the first `on_weight` percent of buckets.
pub(crate) fn is_in_bucket(hash: u64, on_weight: i32) -> bool {
    let threshold = u64::try_from(on_weight).unwrap_or(0) * (TOTAL_BUCKETS / 100);
    hash % TOTAL_BUCKETS < threshold
}

fn stringify(toggle: &str, key: &Key, attribute: &AttributeValue) -> Result<String, ValidationError> {
    let mismatch = || ValidationError::TypeMismatch {
        toggle: toggle.to_owned(),
        key: key.key.clone(),
        expected: key.key_type,
    };

    let value = match (key.key_type, attribute) {
        (KeyType::Boolean, AttributeValue::Boolean(b)) => b.to_string(),
        (KeyType::String, AttributeValue::String(s)) => s.clone(),
        (KeyType::Float, _) => format_float(attribute.as_float().ok_or_else(mismatch)?),
        (KeyType::Int, _) => attribute.as_integer().ok_or_else(mismatch)?.to_string(),
        (KeyType::DateTime, AttributeValue::DateTime(t)) => t.timestamp_millis().to_string(),
        (KeyType::Unknown, _) => {
            return Err(ValidationError::UnknownKeyType {
                toggle: toggle.to_owned(),
                key: key.key.clone(),
            })
        }
        (KeyType::Boolean | KeyType::String | KeyType::DateTime, _) => {
            return Err(mismatch())
        }
    };
    Ok(value)
}

/// Format `f` the way every other SDK does: shortest round-trip digits, no fractional part for
/// integral values, and exponent notation outside of `[1e-6, 1e21)`.
fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "NaN".to_owned();
    }
    if f.is_infinite() {
        return if f > 0.0 { "Infinity" } else { "-Infinity" }.to_owned();
    }

    let abs = f.abs();
    if abs == 0.0 {
        // Negative zero prints as "0" too.
        return "0".to_owned();
    }
    if !(1e-6..1e21).contains(&abs) {
        let s = format!("{f:e}");
        return match s.split_once('e') {
            Some((mantissa, exponent)) if !exponent.starts_with('-') => {
                format!("{mantissa}e+{exponent}")
            }
            _ => s,
        };
    }
    f.to_string()
}
