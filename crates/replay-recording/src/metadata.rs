// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Replay metadata.
//!
//! A [`MetadataSnapshot`] is a flat, ordered key/value map. Values are a
//! closed set of JSON-compatible types so the `metaData` entry always
//! serializes. Keys keep insertion order on write.

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Magic tag written to `fileFormat`.
pub const FILE_FORMAT: &str = "BIMCPR";

/// Version written to `fileFormatVersion`.
pub const FILE_FORMAT_VERSION: i32 = 1;

pub const KEY_FILE_FORMAT: &str = "fileFormat";
pub const KEY_FILE_FORMAT_VERSION: &str = "fileFormatVersion";
pub const KEY_SINGLEPLAYER: &str = "singleplayer";
pub const KEY_SERVER_NAME: &str = "serverName";
pub const KEY_DATE: &str = "date";
pub const KEY_DURATION: &str = "duration";
pub const KEY_PLAYERS: &str = "players";
pub const KEY_PROTOCOL_VERSION: &str = "mcversion";
pub const KEY_GENERATOR: &str = "generator";

/// Scalar allowed inside a [`MetaValue::List`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaPrimitive {
    Bool(bool),
    Int(i32),
    Long(i64),
    String(String),
}

/// A metadata value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i32),
    Long(i64),
    String(String),
    List(Vec<MetaPrimitive>),
}

impl MetaValue {
    /// Collection with set semantics: duplicates removed, sorted for stable output.
    pub fn unordered<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<MetaPrimitive>,
    {
        let mut items: Vec<MetaPrimitive> = items.into_iter().map(Into::into).collect();
        items.sort();
        items.dedup();
        Self::List(items)
    }

    /// Collection that keeps the given order.
    pub fn ordered<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<MetaPrimitive>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer value regardless of its stored width.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(i64::from(*v)),
            Self::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[MetaPrimitive]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

macro_rules! impl_from {
    ($target:ident: $($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for $target {
            fn from(v: $ty) -> Self {
                Self::$variant(v.into())
            }
        })*
    };
}

impl_from!(MetaPrimitive: bool => Bool, i32 => Int, i64 => Long, String => String, &str => String);
impl_from!(MetaValue: bool => Bool, i32 => Int, i64 => Long, String => String, &str => String);

impl From<Vec<MetaPrimitive>> for MetaValue {
    fn from(v: Vec<MetaPrimitive>) -> Self {
        Self::List(v)
    }
}

/// Point-in-time metadata for one recording.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataSnapshot {
    entries: Vec<(String, MetaValue)>,
}

impl MetadataSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value. Replacing keeps the key's original position.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<MetaValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Builder-style [`set`](Self::set).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &str) -> Option<MetaValue> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetaValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn server_name(&self) -> Option<&str> {
        self.get(KEY_SERVER_NAME).and_then(MetaValue::as_str)
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.get(KEY_DURATION).and_then(MetaValue::as_i64)
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

impl Serialize for MetadataSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for MetadataSnapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SnapshotVisitor;

        impl<'de> Visitor<'de> for SnapshotVisitor {
            type Value = MetadataSnapshot;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a flat metadata object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut snapshot = MetadataSnapshot::new();
                while let Some((key, value)) = access.next_entry::<String, MetaValue>()? {
                    if snapshot.contains_key(&key) {
                        return Err(de::Error::custom(format_args!("duplicate key `{key}`")));
                    }
                    snapshot.entries.push((key, value));
                }
                Ok(snapshot)
            }
        }

        deserializer.deserialize_map(SnapshotVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_replaces_in_place() {
        let mut meta = MetadataSnapshot::new()
            .with(KEY_SERVER_NAME, "Unknown")
            .with(KEY_SINGLEPLAYER, false);
        meta.set(KEY_SERVER_NAME, "Lobby");

        assert_eq!(meta.len(), 2);
        assert_eq!(meta.keys().collect::<Vec<_>>(), [KEY_SERVER_NAME, KEY_SINGLEPLAYER]);
        assert_eq!(meta.server_name(), Some("Lobby"));
    }

    #[test]
    fn test_json_keeps_order_and_types() {
        let meta = MetadataSnapshot::new()
            .with(KEY_FILE_FORMAT, FILE_FORMAT)
            .with(KEY_FILE_FORMAT_VERSION, FILE_FORMAT_VERSION)
            .with(KEY_SINGLEPLAYER, false)
            .with(KEY_DATE, 1_700_000_000_000i64)
            .with(KEY_PLAYERS, MetaValue::unordered(["b", "a", "b"]));

        let json = String::from_utf8(meta.to_json().expect("json")).expect("utf8");
        assert_eq!(
            json,
            r#"{"fileFormat":"BIMCPR","fileFormatVersion":1,"singleplayer":false,"date":1700000000000,"players":["a","b"]}"#
        );

        let parsed = MetadataSnapshot::from_json(json.as_bytes()).expect("parse");
        assert_eq!(parsed, meta);
    }

    #[test]
    fn test_small_long_reads_back_as_int() {
        let meta = MetadataSnapshot::new().with(KEY_DURATION, 1500i64);
        let parsed = MetadataSnapshot::from_json(&meta.to_json().expect("json")).expect("parse");
        assert_eq!(parsed.get(KEY_DURATION), Some(&MetaValue::Int(1500)));
        assert_eq!(parsed.duration_ms(), Some(1500));
    }

    #[test]
    fn test_rejects_nested_and_duplicate() {
        assert!(MetadataSnapshot::from_json(br#"{"a":{"b":1}}"#).is_err());
        assert!(MetadataSnapshot::from_json(br#"{"a":[[1]]}"#).is_err());
        assert!(MetadataSnapshot::from_json(br#"{"a":1,"a":2}"#).is_err());
    }

    #[test]
    fn test_ordered_list_keeps_order() {
        let value = MetaValue::ordered([3i32, 1, 3]);
        assert_eq!(
            value.as_list().expect("list"),
            [MetaPrimitive::Int(3), MetaPrimitive::Int(1), MetaPrimitive::Int(3)]
        );
    }
}
