//! Feature toggle definitions as served by the FeatureGuards authority.
use std::fmt;

use serde::{Deserialize, Serialize};

#[allow(missing_docs)]
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// A named feature toggle.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Toggle {
    /// Unique name of the toggle. This is the lookup key used by [`Client::is_on`](crate::Client::is_on).
    pub name: String,
    /// Server-side identifier.
    #[serde(default)]
    pub id: String,
    /// Project the toggle belongs to.
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    #[allow(missing_docs)]
    pub description: String,
    /// Version at which the toggle was last changed.
    #[serde(default)]
    pub version: i64,
    /// Disabled toggles always evaluate to `false`.
    pub enabled: bool,
    #[allow(missing_docs)]
    pub toggle_type: ToggleType,
    /// Platforms the toggle is served to.
    #[serde(default)]
    pub platforms: Vec<Platform>,
    /// Set when the toggle has been deleted. Deleted toggles are never stored in the cache.
    #[serde(default)]
    pub deleted_at: Option<Timestamp>,
    /// Must match `toggle_type`.
    #[serde(default)]
    pub feature_definition: Option<FeatureDefinition>,
}

/// Kind of the toggle.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum ToggleType {
    OnOff,
    Percentage,
}

/// Platform a client runs on. Sent along with fetch and listen requests so the authority serves
/// only the toggles relevant for it.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum Platform {
    #[default]
    Default,
    Web,
    Ios,
    Android,
}

/// Kind-specific definition of a toggle.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub enum FeatureDefinition {
    OnOff(OnOffDefinition),
    Percentage(PercentageDefinition),
}

/// A plain on/off switch. Exactly one branch must carry weight 100.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct OnOffDefinition {
    /// Weight 100 turns the toggle on. Rules form an allow-list.
    #[serde(default)]
    pub on: Option<Branch>,
    /// Weight 100 turns the toggle off. Rules form a deny-list.
    #[serde(default)]
    pub off: Option<Branch>,
}

/// A percentage rollout.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PercentageDefinition {
    /// Percentage of callers the toggle is on for. Rules form an allow-list.
    #[serde(default)]
    pub on: Option<Branch>,
    /// Remaining percentage. Rules form a deny-list.
    #[serde(default)]
    pub off: Option<Branch>,
    /// Prepended to the stickiness attribute before hashing.
    #[serde(default)]
    pub salt: String,
    #[serde(default)]
    #[allow(missing_docs)]
    pub stickiness: Option<Stickiness>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Branch {
    pub weight: i32,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// How callers are assigned into a percentage bucket.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "stickinessType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stickiness {
    /// Every evaluation draws a new random number.
    Random,
    /// The first of `keys` present in the attributes is hashed, so the same caller always lands
    /// in the same bucket.
    Keys {
        #[allow(missing_docs)]
        keys: Vec<Key>,
    },
}

/// Attribute key descriptor.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Key {
    /// Attribute name.
    pub key: String,
    /// Declared type of the attribute.
    pub key_type: KeyType,
}

/// Declared type of an attribute.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum KeyType {
    Boolean,
    String,
    Float,
    Int,
    DateTime,
    /// Sent by a newer server. Evaluating a rule with an unknown key type is an error.
    #[serde(other)]
    Unknown,
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KeyType::Boolean => "boolean",
            KeyType::String => "string",
            KeyType::Float => "float",
            KeyType::Int => "int",
            KeyType::DateTime => "dateTime",
            KeyType::Unknown => "unknown",
        })
    }
}

/// A single allow/deny rule: an attribute key and a typed operation on it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    #[allow(missing_docs)]
    pub key: Key,
    /// Must be the operation variant for `key.key_type`.
    #[serde(default)]
    pub operation: Option<Operation>,
}

/// Typed operation of a [`Rule`].
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub enum Operation {
    BoolOp(BoolOp),
    StringOp(StringOp),
    FloatOp(FloatOp),
    IntOp(IntOp),
    DateTimeOp(DateTimeOp),
}

/// Attribute must equal `value`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct BoolOp {
    pub value: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct StringOp {
    pub op: StringOperator,
    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum StringOperator {
    Eq,
    Contains,
    In,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct FloatOp {
    pub op: NumericOperator,
    #[serde(default)]
    pub values: Vec<f64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct IntOp {
    pub op: NumericOperator,
    #[serde(default)]
    pub values: Vec<i64>,
}

/// Operators shared by float and int operations.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum NumericOperator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct DateTimeOp {
    pub op: DateTimeOperator,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum DateTimeOperator {
    After,
    Before,
}
