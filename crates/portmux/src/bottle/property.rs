// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Property: an ordered key/value map carried in bottle form.
//!
//! Properties back the port's user-defined property map and the
//! parameter blocks exchanged with carriers and modifiers. The bottle
//! form is a list of `(key value)` pairs, so a property round-trips
//! through both the text and binary bottle codecs.

use super::{Bottle, Value};
use std::fmt;

/// Ordered key/value map. Later `put`s of an existing key replace the
/// value in place, preserving the key's position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Property {
    entries: Vec<(String, Value)>,
}

impl Property {
    /// Create an empty property map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from the bottle text form, e.g. `(file out.log) (mode in)`.
    pub fn from_text(text: &str) -> Self {
        Self::from_bottle(&Bottle::from_text(text))
    }

    /// Extract `(key value)` pairs from a bottle; other elements are
    /// ignored.
    pub fn from_bottle(bottle: &Bottle) -> Self {
        let mut out = Self::new();
        for item in bottle.iter() {
            if let Value::List(pair) = item {
                let key = pair.get(0).as_str();
                if !key.is_empty() {
                    out.put(key, pair.get(1).clone());
                }
            }
        }
        out
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Store a value under a key.
    pub fn put(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    /// Store a string value.
    pub fn put_str(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.put(key, Value::Str(value.into()));
    }

    /// Store an integer value.
    pub fn put_int(&mut self, key: impl Into<String>, value: i32) {
        self.put(key, Value::Int(value));
    }

    /// Look up a key; [`Value::Null`] when absent.
    pub fn find(&self, key: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
            .unwrap_or(&NULL)
    }

    /// True when the key is present.
    pub fn check(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Remove a key, returning whether it was present.
    pub fn unput(&mut self, key: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| k != key);
        self.entries.len() != before
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Convert to the bottle form: a list of `(key value)` pairs.
    pub fn to_bottle(&self) -> Bottle {
        let mut out = Bottle::new();
        for (key, value) in &self.entries {
            let pair = out.add_list();
            pair.add_string(key.clone());
            pair.add(value.clone());
        }
        out
    }
}

// Display uses the bottle text form so properties print the way admin
// clients read them back.
impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_bottle())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_find() {
        let mut p = Property::new();
        p.put_str("name", "/a");
        p.put_int("count", 3);
        assert_eq!(p.find("name").as_str(), "/a");
        assert_eq!(p.find("count").as_int(), 3);
        assert!(p.find("missing").is_null());
    }

    #[test]
    fn test_put_replaces_in_place() {
        let mut p = Property::new();
        p.put_int("a", 1);
        p.put_int("b", 2);
        p.put_int("a", 10);
        let keys: Vec<&str> = p.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(p.find("a").as_int(), 10);
    }

    #[test]
    fn test_text_roundtrip() {
        let p = Property::from_text("(file out.log) (mode in) (level 2)");
        assert_eq!(p.find("file").as_str(), "out.log");
        assert_eq!(p.find("level").as_int(), 2);

        let again = Property::from_text(&p.to_string());
        assert_eq!(again, p);
    }

    #[test]
    fn test_unput() {
        let mut p = Property::new();
        p.put_int("a", 1);
        assert!(p.unput("a"));
        assert!(!p.unput("a"));
        assert!(p.is_empty());
    }
}
