//! Content-derived message identity.
//!
//! A fingerprint hashes everything in a [`Message`] except its attribute
//! bag, so re-pushing the same work with different bookkeeping lands on
//! the same queue entry. The set of accepted hashes carries every scheme
//! still in use, which lets a deployment change the hash scheme without
//! orphaning messages enqueued under the old one.

use std::collections::BTreeSet;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::QueueError;
use crate::message::Message;

/// Prefix mixed into the current hash scheme.
const V2_PREFIX: &str = "v2:";

/// The hashes of a message under every supported scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Hash under the current scheme. New entries are stored under this.
    pub latest: String,
    /// Every accepted hash, `latest` included.
    pub all: BTreeSet<String>,
}

impl Fingerprint {
    /// Compute the fingerprint of a message.
    pub fn of(message: &Message) -> Result<Self, QueueError> {
        let canonical = canonical_json(message)?;
        let latest = sha256_hex(&format!("{V2_PREFIX}{canonical}"));
        let legacy = sha256_hex(&canonical);

        let mut all = BTreeSet::new();
        all.insert(latest.clone());
        all.insert(legacy);

        Ok(Self { latest, all })
    }

    /// Hashes in lookup order: the current scheme first, then legacy ones.
    pub fn candidates(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.latest.as_str())
            .chain(self.all.iter().map(String::as_str).filter(|h| *h != self.latest))
    }

    /// Whether two fingerprints share any accepted hash.
    pub fn matches(&self, other: &Fingerprint) -> bool {
        self.all.iter().any(|h| other.all.contains(h))
    }

    /// Whether `hash` is one of the accepted hashes.
    pub fn accepts(&self, hash: &str) -> bool {
        self.all.contains(hash)
    }
}

/// JSON of the message without attributes, object keys sorted at every level.
fn canonical_json(message: &Message) -> Result<String, QueueError> {
    let mut value = serde_json::to_value(message)?;
    if let Value::Object(map) = &mut value {
        map.remove("attributes");
    }
    Ok(serde_json::to_string(&sorted(value))?)
}

fn sorted(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = Map::new();
            for (k, v) in entries {
                out.insert(k, sorted(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sorted).collect()),
        other => other,
    }
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}
