use std::fmt;
use std::time::SystemTime;

use chrono::{DateTime, Utc};

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Capture timestamps are rendered with second resolution in this format on
/// every backend.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Renders `time` in UTC using [`TIMESTAMP_FORMAT`].
pub fn format_timestamp(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).format(TIMESTAMP_FORMAT).to_string()
}

/// String to string mapping that keeps insertion order.
///
/// Serialized as a JSON object whose keys appear in insertion order, and
/// deserialized back in document order, so headers survive a storage round
/// trip exactly as they appeared on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderedMap {
    entries: Vec<(String, String)>,
}

impl OrderedMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces `key`, keeping the original position on replace.
    pub fn insert<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Appends a header value, folding repeated names (case-insensitive) into
    /// the first occurrence joined with `", "`.
    pub fn append_folded<K: Into<String>, V: AsRef<str>>(&mut self, key: K, value: V) {
        let key = key.into();
        match self
            .entries
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&key))
        {
            Some(entry) => {
                entry.1.push_str(", ");
                entry.1.push_str(value.as_ref());
            }
            None => self.entries.push((key, value.as_ref().to_string())),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for OrderedMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = OrderedMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl Serialize for OrderedMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

struct OrderedMapVisitor;

impl<'de> Visitor<'de> for OrderedMapVisitor {
    type Value = OrderedMap;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of strings to strings")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut map = OrderedMap::new();
        while let Some((k, v)) = access.next_entry::<String, String>()? {
            map.insert(k, v);
        }
        Ok(map)
    }
}

impl<'de> Deserialize<'de> for OrderedMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(OrderedMapVisitor)
    }
}

/// One side of a captured exchange.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpMessage {
    pub headers: OrderedMap,
    /// Decoded text body, empty when the payload was not valid text
    pub body: String,
    pub cookies: OrderedMap,
}

/// A captured request/response pair.
///
/// `id` is `None` until the storage layer assigns one on insert. The serde
/// field names are the live wire format sent to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub method: String,
    pub url: String,
    /// e.g. "200 OK"
    #[serde(rename = "status")]
    pub status_line: String,
    /// e.g. "125ms"
    #[serde(rename = "time")]
    pub duration_label: String,
    /// Capture time formatted with [`TIMESTAMP_FORMAT`]
    pub timestamp: String,
    pub request: HttpMessage,
    pub response: HttpMessage,
}

/// Aggregate statistics derived from the stored exchanges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total: i64,
    /// Status in `[200, 400)`
    pub success: i64,
    /// Status `>= 400`
    pub error: i64,
    #[serde(rename = "avg_latency")]
    pub avg_latency_label: String,
}

/// Paging and search parameters for history queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeQuery {
    pub limit: u64,
    pub offset: u64,
    pub search: Option<String>,
}

impl Default for ExchangeQuery {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
            search: None,
        }
    }
}

impl ExchangeQuery {
    pub fn page(limit: u64, offset: u64) -> Self {
        Self {
            limit,
            offset,
            search: None,
        }
    }

    pub fn search<S: Into<String>>(mut self, text: S) -> Self {
        let text = text.into();
        self.search = if text.is_empty() { None } else { Some(text) };
        self
    }
}
