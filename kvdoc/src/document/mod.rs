// Document model - tagged values, ordered field maps, JSON text codec

use crate::error::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Field holding the system-assigned document identifier.
pub const ID_FIELD: &str = "_id";
/// Field holding the system-assigned creation timestamp.
pub const CREATED_FIELD: &str = "_created";

/// Single-key object marking an encoded timestamp, e.g. `{"$date": "..."}`.
const DATE_TAG: &str = "$date";
/// Single-key object wrapping a nested map that would otherwise read as a
/// tag, e.g. `{"$map": {"$date": "not a timestamp"}}`.
const MAP_TAG: &str = "$map";

/// A dynamically-typed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    List(Vec<Value>),
    Map(Document),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<&DateTime<Utc>> {
        match self {
            Value::Timestamp(ts) => Some(ts),
            _ => None,
        }
    }

    /// The value rendered as plain text. Used by validation rules and as the
    /// key material of uniqueness index entries. Null renders as `""`.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s.clone(),
            Value::Timestamp(ts) => format_timestamp(ts),
            Value::List(_) | Value::Map(_) => serde_json::to_string(self).unwrap_or_default(),
        }
    }

    /// Numeric reading of the value for bound checks. Anything that has no
    /// sensible numeric form reads as zero.
    pub fn to_f64_lossy(&self) -> f64 {
        match self {
            Value::Int(i) => *i as f64,
            Value::Float(f) => *f,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Timestamp(_) => "timestamp",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            other => write!(f, "{} ({})", other.to_display_string(), other.type_name()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Value::Timestamp(ts)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Value::Map(doc)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

/// An ordered mapping of field name to value. Field order is insertion
/// order and survives encoding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    fields: Vec<(String, Value)>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.fields.iter_mut().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// True when the field is absent or explicitly null.
    pub fn is_absent(&self, name: &str) -> bool {
        self.get(name).map_or(true, Value::is_null)
    }

    /// Set a field. An existing field keeps its position; a new one is
    /// appended. Returns the previous value, if any.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(idx) => Some(std::mem::replace(&mut self.fields[idx].1, value)),
            None => {
                self.fields.push((name, value));
                None
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.position(name).map(|idx| self.fields.remove(idx).1)
    }

    /// Move the value stored under `from` to `to`, keeping the position of
    /// `from`. Any value previously under `to` is dropped. No-op when `from`
    /// is absent.
    pub fn rename(&mut self, from: &str, to: &str) {
        if from == to {
            return;
        }
        if !self.contains_key(from) {
            return;
        }
        if let Some(existing) = self.position(to) {
            self.fields.remove(existing);
        }
        if let Some(idx) = self.position(from) {
            self.fields[idx].0 = to.to_string();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    /// The system-assigned identifier, when present as a string.
    pub fn id(&self) -> Option<&str> {
        self.get(ID_FIELD).and_then(Value::as_str)
    }

    /// Encode to the self-describing text form used at rest.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a document previously produced by [`Document::encode`].
    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|(k, _)| k == name)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Document {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut doc = Document::new();
        for (k, v) in iter {
            doc.insert(k, v);
        }
        doc
    }
}

impl<K: Into<String>, V: Into<Value>, const N: usize> From<[(K, V); N]> for Document {
    fn from(entries: [(K, V); N]) -> Self {
        entries.into_iter().collect()
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub(crate) fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// ── Codec ───────────────────────────────────────────────────────

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(s),
            Value::Timestamp(ts) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(DATE_TAG, &format_timestamp(ts))?;
                map.end()
            }
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(doc) if needs_escape(doc) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(MAP_TAG, doc)?;
                map.end()
            }
            Value::Map(doc) => doc.serialize(serializer),
        }
    }
}

fn needs_escape(doc: &Document) -> bool {
    doc.contains_key(MAP_TAG) || (doc.len() == 1 && doc.contains_key(DATE_TAG))
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a document value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Value, E> {
        Ok(Value::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Value, E> {
        Ok(i64::try_from(v).map(Value::Int).unwrap_or(Value::Float(v as f64)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Value, E> {
        Ok(Value::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Value, E> {
        Ok(Value::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<Value, E> {
        Ok(Value::String(v))
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> std::result::Result<Value, D::Error> {
        Value::deserialize(d)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Value, A::Error> {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element::<Value>()? {
            items.push(item);
        }
        Ok(Value::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Value, A::Error> {
        let Some(first) = map.next_key::<String>()? else {
            return Ok(Value::Map(Document::new()));
        };
        if first == MAP_TAG {
            let inner: Document = map.next_value()?;
            if map.next_key::<String>()?.is_some() {
                return Err(de::Error::custom("escaped map must have a single entry"));
            }
            return Ok(Value::Map(inner));
        }

        let mut doc = Document::new();
        doc.insert(first, map.next_value::<Value>()?);
        while let Some((k, v)) = map.next_entry::<String, Value>()? {
            doc.insert(k, v);
        }
        if doc.len() == 1 {
            if let Some(Value::String(s)) = doc.get(DATE_TAG) {
                if let Some(ts) = parse_timestamp(s) {
                    return Ok(Value::Timestamp(ts));
                }
            }
        }
        Ok(Value::Map(doc))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        d.deserialize_any(ValueVisitor)
    }
}

struct DocumentVisitor;

impl<'de> Visitor<'de> for DocumentVisitor {
    type Value = Document;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a document mapping")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Document, A::Error> {
        let mut doc = Document::new();
        while let Some((k, v)) = map.next_entry::<String, Value>()? {
            doc.insert(k, v);
        }
        Ok(doc)
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        d.deserialize_map(DocumentVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_insert_keeps_position() {
        let mut doc = Document::from([("a", 1), ("b", 2), ("c", 3)]);
        doc.insert("b", 20);
        assert_eq!(doc.keys().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(doc.get("b"), Some(&Value::Int(20)));
    }

    #[test]
    fn test_rename_keeps_position() {
        let mut doc = Document::from([("a", 1), ("b", 2), ("c", 3)]);
        doc.rename("b", "beta");
        assert_eq!(doc.keys().collect::<Vec<_>>(), vec!["a", "beta", "c"]);
        assert!(!doc.contains_key("b"));
    }

    #[test]
    fn test_rename_over_existing_key() {
        let mut doc = Document::from([("a", 1), ("b", 2), ("c", 3)]);
        doc.rename("c", "a");
        assert_eq!(doc.keys().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(doc.get("a"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_encode_preserves_field_order() {
        let doc = Document::from([("zeta", 1), ("alpha", 2), ("mid", 3)]);
        let text = doc.encode().unwrap();
        assert_eq!(text, r#"{"zeta":1,"alpha":2,"mid":3}"#);
    }

    #[test]
    fn test_codec_preserves_value_kinds() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let mut nested = Document::new();
        nested.insert("city", "Recife");
        let mut doc = Document::new();
        doc.insert("name", "Ana");
        doc.insert("age", 31);
        doc.insert("score", 9.5);
        doc.insert("active", true);
        doc.insert("born", ts);
        doc.insert("address", nested);
        doc.insert("tags", vec![Value::from("a"), Value::Null]);
        doc.insert("nickname", Value::Null);

        let decoded = Document::decode(&doc.encode().unwrap()).unwrap();
        assert_eq!(decoded, doc);
        assert_eq!(decoded.get("born").and_then(Value::as_timestamp), Some(&ts));
    }

    #[test]
    fn test_tag_shaped_maps_round_trip() {
        let lookalike = Document::from([(DATE_TAG, "2024-03-01T12:30:00Z")]);
        let wrapper = Document::from([(MAP_TAG, Value::from(1)), ("b", Value::from(2))]);
        let mut doc = Document::new();
        doc.insert("lookalike", lookalike.clone());
        doc.insert("wrapper", wrapper.clone());
        doc.insert("nested", Document::from([("inner", Value::from(lookalike))]));

        let decoded = Document::decode(&doc.encode().unwrap()).unwrap();
        assert_eq!(decoded, doc);
        assert_eq!(decoded.get("wrapper"), Some(&Value::Map(wrapper)));
        assert!(decoded.get("lookalike").and_then(Value::as_timestamp).is_none());
    }

    #[test]
    fn test_display_string_coercion() {
        assert_eq!(Value::Null.to_display_string(), "");
        assert_eq!(Value::Int(42).to_display_string(), "42");
        assert_eq!(Value::Float(2.0).to_display_string(), "2");
        assert_eq!(Value::Float(1.5).to_display_string(), "1.5");
        assert_eq!(Value::Bool(true).to_display_string(), "true");
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(Value::Timestamp(ts).to_display_string(), "2024-01-02T03:04:05Z");
    }

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(Value::from("17").to_f64_lossy(), 17.0);
        assert_eq!(Value::from("abc").to_f64_lossy(), 0.0);
        assert_eq!(Value::Bool(true).to_f64_lossy(), 1.0);
        assert_eq!(Value::Null.to_f64_lossy(), 0.0);
    }

    #[test]
    fn test_decode_rejects_non_object() {
        assert!(Document::decode("[1, 2]").is_err());
    }

    #[test]
    fn test_id_accessor() {
        let doc = Document::from([(ID_FIELD, "01hx")]);
        assert_eq!(doc.id(), Some("01hx"));
        assert!(Document::new().id().is_none());
    }
}
