//! Tag sets and their canonical form.
//!
//! A [`TagSet`] distinguishes sub-streams within a series (one per player,
//! one per event kind, ...). Two tag sets denote the same stream iff their
//! canonical strings are byte-identical. The canonical string is hashed into
//! a short, fixed-width directory key, the *tag hash*.
//!
//! # Canonical form
//!
//! ```text
//! {"b": "2", "a": "1"}  ->  "a=1;b=2"  ->  sha1 -> first 8 bytes -> hex
//! ```
//!
//! The hash is truncated to 64 bits to keep paths short. Collisions are
//! accepted; the full tag set is stored next to the data in `labels.json`
//! so that a collision can at least be diagnosed.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// Number of digest bytes kept in a tag hash.
const TAG_HASH_BYTES: usize = 8;

/// An ordered set of `key=value` labels.
///
/// Backed by a `BTreeMap`, so iteration (and therefore the canonical string)
/// is always in ascending key order regardless of insertion order. Cloning is
/// a deep copy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeMap<String, String>);

impl TagSet {
    /// Creates an empty tag set.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Inserts a label, returning the previous value for the key if any.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    /// Returns the value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Number of labels.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set has no labels.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates labels in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the canonical `k=v;k=v` string, or `""` for an empty set.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use strata::TagSet;
    ///
    /// let tags = TagSet::from([("b", "2"), ("a", "1")]);
    /// assert_eq!(tags.canonical(), "a=1;b=2");
    /// assert_eq!(TagSet::new().canonical(), "");
    /// ```
    pub fn canonical(&self) -> String {
        let mut out = String::with_capacity(64);
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                out.push(';');
            }
            out.push_str(k);
            out.push('=');
            out.push_str(v);
        }
        out
    }

    /// Returns the 16-character lowercase hex tag hash: the first 8 bytes of
    /// SHA-1 over [`canonical`](Self::canonical).
    pub fn hash(&self) -> String {
        let digest = Sha1::digest(self.canonical().as_bytes());
        hex::encode(&digest[..TAG_HASH_BYTES])
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for TagSet {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TagSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl From<HashMap<String, String>> for TagSet {
    fn from(map: HashMap<String, String>) -> Self {
        Self(map.into_iter().collect())
    }
}

impl From<BTreeMap<String, String>> for TagSet {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}
