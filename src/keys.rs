//! Key reference normalization.
//!
//! Callers name encryption targets in several shapes: a bare fingerprint string, a key
//! handle carrying a `fingerprint`, or a key object whose `primaryKey` carries one.
//! [`normalize`] turns any mix of those into a [`CanonicalKeySet`] before anything is
//! sent to the engine.

use crate::error::{classify, BridgeError, BridgeResult, FailureSource, InputFault};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use tracing::debug;

pub const FINGERPRINT_LEN: usize = 40;
pub const LONG_ID_LEN: usize = 16;
pub const SHORT_ID_LEN: usize = 8;

fn hextest(candidate: &str, len: usize) -> bool {
    candidate.len() == len && candidate.bytes().all(|b| b.is_ascii_hexdigit())
}

/// `true` for exactly 40 hex characters, any case.
pub fn is_fingerprint(candidate: &str) -> bool {
    hextest(candidate, FINGERPRINT_LEN)
}

/// `true` for a 16-hex long key ID. Not accepted as an encryption target.
pub fn is_long_id(candidate: &str) -> bool {
    hextest(candidate, LONG_ID_LEN)
}

/// `true` for an 8-hex short key ID. Not accepted as an encryption target.
pub fn is_short_id(candidate: &str) -> bool {
    hextest(candidate, SHORT_ID_LEN)
}

/// A validated fingerprint in canonical (upper-case) form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn parse(candidate: &str) -> Option<Self> {
        is_fingerprint(candidate).then(|| Fingerprint(candidate.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryKey {
    pub fingerprint: Option<Value>,
}

/// One caller-supplied key reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyReference {
    Fingerprint(String),
    /// A key handle exposing `fingerprint` directly.
    Handle { fingerprint: Value },
    /// A key object exposing `primaryKey.fingerprint`.
    Nested { primary_key: PrimaryKey },
    /// An object exposing neither accessor.
    Opaque(serde_json::Map<String, Value>),
}

fn wrong_shape(value: &Value) -> BridgeError {
    let shape = match value {
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::Array(_) => "a nested list",
        Value::Null | Value::String(_) | Value::Object(_) => "an unsupported value",
    };
    classify(
        FailureSource::Input(InputFault::WrongShape),
        &format!("key reference is {shape}"),
    )
}

impl KeyReference {
    /// Classify one untrusted JSON element. Strings and objects are references, and
    /// `null` is an object with nothing to probe. Anything else is `PARAM_WRONG`.
    pub fn from_json(value: &Value) -> BridgeResult<Self> {
        match value {
            Value::String(s) => Ok(KeyReference::Fingerprint(s.clone())),
            Value::Null => Ok(KeyReference::Opaque(serde_json::Map::new())),
            Value::Object(obj) => Ok(if let Some(fpr) = obj.get("fingerprint") {
                KeyReference::Handle {
                    fingerprint: fpr.clone(),
                }
            } else if let Some(pk) = obj.get("primaryKey") {
                KeyReference::Nested {
                    primary_key: PrimaryKey {
                        fingerprint: pk.get("fingerprint").cloned(),
                    },
                }
            } else {
                KeyReference::Opaque(obj.clone())
            }),
            other => Err(wrong_shape(other)),
        }
    }

    pub fn handle(fingerprint: impl Into<String>) -> Self {
        KeyReference::Handle {
            fingerprint: Value::String(fingerprint.into()),
        }
    }

    pub fn nested(fingerprint: impl Into<String>) -> Self {
        KeyReference::Nested {
            primary_key: PrimaryKey {
                fingerprint: Some(Value::String(fingerprint.into())),
            },
        }
    }

    /// Extract the candidate fingerprint text, without validating it.
    pub fn probe(&self) -> Option<&str> {
        match self {
            KeyReference::Fingerprint(s) => Some(s),
            KeyReference::Handle { fingerprint } => fingerprint.as_str(),
            KeyReference::Nested { primary_key } => {
                primary_key.fingerprint.as_ref().and_then(Value::as_str)
            }
            KeyReference::Opaque(_) => None,
        }
    }

    /// Probe and validate.
    pub fn resolve(&self) -> Option<Fingerprint> {
        self.probe().and_then(Fingerprint::parse)
    }
}

impl From<&str> for KeyReference {
    fn from(s: &str) -> Self {
        KeyReference::Fingerprint(s.to_string())
    }
}

impl From<String> for KeyReference {
    fn from(s: String) -> Self {
        KeyReference::Fingerprint(s)
    }
}

impl From<Fingerprint> for KeyReference {
    fn from(fpr: Fingerprint) -> Self {
        KeyReference::Fingerprint(fpr.0)
    }
}

/// Whatever the caller passed as "keys".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum KeyInput {
    #[default]
    Absent,
    Many(Vec<KeyReference>),
    One(KeyReference),
}

impl KeyInput {
    /// Parse untrusted JSON. `null`, `false`, `0` and `""` mean no keys were given.
    /// Other shapes that are neither a reference nor a list of references fail with
    /// `PARAM_WRONG`.
    pub fn from_json(value: &Value) -> BridgeResult<Self> {
        match value {
            v if is_falsy(v) => Ok(KeyInput::Absent),
            Value::Array(items) => items
                .iter()
                .map(KeyReference::from_json)
                .collect::<BridgeResult<Vec<_>>>()
                .map(KeyInput::Many),
            single => KeyReference::from_json(single).map(KeyInput::One),
        }
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

impl<T: Into<KeyReference>> From<Option<T>> for KeyInput {
    fn from(value: Option<T>) -> Self {
        value.map_or(KeyInput::Absent, |r| KeyInput::One(r.into()))
    }
}

impl From<KeyReference> for KeyInput {
    fn from(r: KeyReference) -> Self {
        KeyInput::One(r)
    }
}

impl From<&str> for KeyInput {
    fn from(s: &str) -> Self {
        KeyInput::One(s.into())
    }
}

impl From<Vec<KeyReference>> for KeyInput {
    fn from(refs: Vec<KeyReference>) -> Self {
        KeyInput::Many(refs)
    }
}

impl From<&[&str]> for KeyInput {
    fn from(refs: &[&str]) -> Self {
        KeyInput::Many(refs.iter().map(|&s| s.into()).collect())
    }
}

/// Ordered, non-empty, duplicate-free fingerprints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalKeySet {
    fingerprints: Vec<Fingerprint>,
    discarded: Vec<BridgeError>,
}

impl CanonicalKeySet {
    pub fn fingerprints(&self) -> &[Fingerprint] {
        &self.fingerprints
    }

    /// One `MSG_NOT_A_FPR` record per input element that was dropped.
    pub fn discarded(&self) -> &[BridgeError] {
        &self.discarded
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fingerprint> {
        self.fingerprints.iter()
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.fingerprints.iter().map(|f| f.0.clone()).collect()
    }
}

/// Resolve key references into canonical fingerprints.
///
/// Invalid elements are dropped with a `MSG_NOT_A_FPR` record; if nothing survives the
/// whole call fails with `MSG_NO_KEYS`. Duplicates collapse onto their first occurrence.
pub fn normalize(input: &KeyInput) -> BridgeResult<CanonicalKeySet> {
    let refs: &[KeyReference] = match input {
        KeyInput::Absent => &[],
        KeyInput::One(r) => std::slice::from_ref(r),
        KeyInput::Many(refs) => refs,
    };

    let mut fingerprints: Vec<Fingerprint> = Vec::with_capacity(refs.len());
    let mut discarded = Vec::new();
    for (i, r) in refs.iter().enumerate() {
        match r.resolve() {
            Some(fpr) => {
                if !fingerprints.contains(&fpr) {
                    fingerprints.push(fpr);
                }
            }
            None => {
                debug!(index = i, "discarding key reference that is not a fingerprint");
                discarded.push(classify(
                    FailureSource::Input(InputFault::NotAFingerprint),
                    &format!("key reference #{i} is not a fingerprint"),
                ));
            }
        }
    }

    if fingerprints.is_empty() {
        return Err(classify(FailureSource::Input(InputFault::NoKeys), ""));
    }
    Ok(CanonicalKeySet {
        fingerprints,
        discarded,
    })
}

/// [`KeyInput::from_json`] followed by [`normalize`].
pub fn normalize_json(value: &Value) -> BridgeResult<CanonicalKeySet> {
    normalize(&KeyInput::from_json(value)?)
}
