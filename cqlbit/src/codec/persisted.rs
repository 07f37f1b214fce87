//! Lazy wrappers around values that go through a [`Persister`] on their way to and from the store.
//!
//! A wrapper starts from either side (decoded domain value or encoded stored value) and computes the
//! other side at most once. Collection wrappers convert element by element, so reading one element
//! of a large list only pays for that element.

use crate::codec::CqlType;
use crate::error::CqlError;
use crate::value::Value;
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;

/// Bidirectional converter between a domain representation and its stored representation.
///
/// Implementations must be deterministic and free of side effects outside the conversion.
pub trait Persister: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// CQL type the encoded form is stored as.
    fn persisted_type(&self) -> CqlType;

    fn encode(&self, decoded: &Value) -> Result<Value, CqlError>;

    fn decode(&self, encoded: &Value) -> Result<Value, CqlError>;
}

/// Stores any value tree as JSON text.
///
/// Only JSON-native shapes survive a round trip unchanged: booleans, bigints, doubles, text, lists
/// and text-keyed maps.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonPersister;

impl JsonPersister {
    fn to_json(value: &Value) -> Result<serde_json::Value, CqlError> {
        use serde_json::Value as Json;
        Ok(match value.resolved()? {
            Value::Null => Json::Null,
            Value::Boolean(b) => Json::Bool(b),
            Value::TinyInt(i) => Json::from(i),
            Value::SmallInt(i) => Json::from(i),
            Value::Int(i) => Json::from(i),
            Value::BigInt(i) | Value::Counter(i) => Json::from(i),
            Value::Float(x) => Json::from(x as f64),
            Value::Double(x) => Json::from(x),
            Value::Text(s) | Value::Ascii(s) => Json::String(s),
            Value::List(items) | Value::Set(items) => {
                Json::Array(items.iter().map(Self::to_json).collect::<Result<_, _>>()?)
            }
            Value::Map(entries) => {
                let mut obj = serde_json::Map::with_capacity(entries.len());
                for (k, v) in entries.iter() {
                    let key = match k.resolved()? {
                        Value::Text(s) | Value::Ascii(s) => s,
                        other => other.to_string(),
                    };
                    obj.insert(key, Self::to_json(v)?);
                }
                Json::Object(obj)
            }
            Value::Udt(fields) => {
                let mut obj = serde_json::Map::with_capacity(fields.len());
                for (name, v) in fields.iter() {
                    obj.insert(name.clone(), Self::to_json(v)?);
                }
                Json::Object(obj)
            }
            other => Json::String(other.to_string().trim_matches('\'').to_string()),
        })
    }

    fn from_json(json: serde_json::Value) -> Value {
        use serde_json::Value as Json;
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Boolean(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::BigInt(i),
                None => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::Text(s),
            Json::Array(items) => Value::List(items.into_iter().map(Self::from_json).collect()),
            Json::Object(obj) => Value::Map(obj.into_iter().map(|(k, v)| (Value::Text(k), Self::from_json(v))).collect()),
        }
    }
}

impl Persister for JsonPersister {
    fn name(&self) -> &str {
        "json"
    }

    fn persisted_type(&self) -> CqlType {
        CqlType::Text
    }

    fn encode(&self, decoded: &Value) -> Result<Value, CqlError> {
        Ok(Value::Text(serde_json::to_string(&Self::to_json(decoded)?)?))
    }

    fn decode(&self, encoded: &Value) -> Result<Value, CqlError> {
        match encoded {
            Value::Text(s) | Value::Ascii(s) => Ok(Self::from_json(serde_json::from_str(s)?)),
            other => Err(CqlError::invalid_value(self.name(), format!("expected text, found {}", other.kind_name()))),
        }
    }
}

/// One value with a memoized decoded and encoded form.
#[derive(Clone)]
pub struct PersistedValue {
    persister: Arc<dyn Persister>,
    decoded: Box<OnceCell<Value>>,
    encoded: Box<OnceCell<Value>>,
}

impl PersistedValue {
    pub fn from_decoded(value: Value, persister: Arc<dyn Persister>) -> Self {
        Self { persister, decoded: Box::new(OnceCell::with_value(value)), encoded: Box::new(OnceCell::new()) }
    }

    pub fn from_encoded(value: Value, persister: Arc<dyn Persister>) -> Self {
        Self { persister, decoded: Box::new(OnceCell::new()), encoded: Box::new(OnceCell::with_value(value)) }
    }

    pub fn persister(&self) -> &Arc<dyn Persister> {
        &self.persister
    }

    pub fn is_decoded(&self) -> bool {
        self.decoded.get().is_some()
    }

    pub fn is_encoded(&self) -> bool {
        self.encoded.get().is_some()
    }

    /// Nulls bypass the persister in both directions.
    pub fn decoded(&self) -> Result<&Value, CqlError> {
        self.decoded.get_or_try_init(|| match self.encoded.get() {
            Some(Value::Null) => Ok(Value::Null),
            Some(encoded) => self.persister.decode(encoded),
            None => Err(CqlError::Custom("persisted value holds neither form".to_string())),
        })
    }

    pub fn encoded(&self) -> Result<&Value, CqlError> {
        self.encoded.get_or_try_init(|| match self.decoded.get() {
            Some(Value::Null) => Ok(Value::Null),
            Some(decoded) => self.persister.encode(decoded),
            None => Err(CqlError::Custom("persisted value holds neither form".to_string())),
        })
    }
}

impl PartialEq for PersistedValue {
    fn eq(&self, other: &Self) -> bool {
        match (self.decoded(), other.decoded()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for PersistedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistedValue")
            .field("persister", &self.persister.name())
            .field("decoded", &self.decoded.get())
            .field("encoded", &self.encoded.get())
            .finish()
    }
}

/// Ordered list of persisted elements.
#[derive(Clone, Debug)]
pub struct PersistedList {
    persister: Arc<dyn Persister>,
    elements: Vec<PersistedValue>,
}

impl PersistedList {
    pub fn from_decoded(items: Vec<Value>, persister: Arc<dyn Persister>) -> Self {
        let elements = items.into_iter().map(|v| PersistedValue::from_decoded(v, Arc::clone(&persister))).collect();
        Self { persister, elements }
    }

    pub fn from_encoded(items: Vec<Value>, persister: Arc<dyn Persister>) -> Self {
        let elements = items.into_iter().map(|v| PersistedValue::from_encoded(v, Arc::clone(&persister))).collect();
        Self { persister, elements }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Decodes only the requested element.
    pub fn get(&self, index: usize) -> Result<Option<&Value>, CqlError> {
        self.elements.get(index).map(PersistedValue::decoded).transpose()
    }

    pub fn elements(&self) -> &[PersistedValue] {
        &self.elements
    }

    pub fn push(&mut self, decoded: Value) {
        self.elements.push(PersistedValue::from_decoded(decoded, Arc::clone(&self.persister)));
    }

    pub fn decoded(&self) -> Result<Vec<Value>, CqlError> {
        self.elements.iter().map(|e| e.decoded().cloned()).collect()
    }

    pub fn encoded(&self) -> Result<Vec<Value>, CqlError> {
        self.elements.iter().map(|e| e.encoded().cloned()).collect()
    }
}

impl PartialEq for PersistedList {
    fn eq(&self, other: &Self) -> bool {
        self.elements == other.elements
    }
}

/// Set of persisted elements; uniqueness is judged on the decoded side.
#[derive(Clone, Debug)]
pub struct PersistedSet {
    persister: Arc<dyn Persister>,
    elements: Vec<PersistedValue>,
}

impl PersistedSet {
    pub fn from_decoded(items: Vec<Value>, persister: Arc<dyn Persister>) -> Self {
        let mut set = Self { persister, elements: Vec::with_capacity(items.len()) };
        for item in items {
            set.insert(item);
        }
        set
    }

    /// Stored sets are already unique, so duplicates are only dropped on the encoded side.
    pub fn from_encoded(items: Vec<Value>, persister: Arc<dyn Persister>) -> Self {
        let mut elements: Vec<PersistedValue> = Vec::with_capacity(items.len());
        for item in items {
            if !elements.iter().any(|e| e.encoded.get() == Some(&item)) {
                elements.push(PersistedValue::from_encoded(item, Arc::clone(&persister)));
            }
        }
        Self { persister, elements }
    }

    /// Returns false when an equal element is already present.
    pub fn insert(&mut self, decoded: Value) -> bool {
        if self.elements.iter().any(|e| e.decoded().map(|d| *d == decoded).unwrap_or(false)) {
            return false;
        }
        self.elements.push(PersistedValue::from_decoded(decoded, Arc::clone(&self.persister)));
        true
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn decoded(&self) -> Result<Vec<Value>, CqlError> {
        self.elements.iter().map(|e| e.decoded().cloned()).collect()
    }

    pub fn encoded(&self) -> Result<Vec<Value>, CqlError> {
        self.elements.iter().map(|e| e.encoded().cloned()).collect()
    }
}

impl PartialEq for PersistedSet {
    fn eq(&self, other: &Self) -> bool {
        self.elements.len() == other.elements.len() && self.elements.iter().all(|e| other.elements.contains(e))
    }
}

/// Map whose values are persisted; keys are stored as is and stay unique.
#[derive(Clone, Debug)]
pub struct PersistedMap {
    persister: Arc<dyn Persister>,
    entries: Vec<(Value, PersistedValue)>,
}

impl PersistedMap {
    pub fn from_decoded(entries: Vec<(Value, Value)>, persister: Arc<dyn Persister>) -> Self {
        let mut map = Self { persister, entries: Vec::with_capacity(entries.len()) };
        for (k, v) in entries {
            map.put(k, v);
        }
        map
    }

    pub fn from_encoded(entries: Vec<(Value, Value)>, persister: Arc<dyn Persister>) -> Self {
        let entries = entries
            .into_iter()
            .map(|(k, v)| (k, PersistedValue::from_encoded(v, Arc::clone(&persister))))
            .collect();
        Self { persister, entries }
    }

    /// Replaces the value of an existing key in place.
    pub fn put(&mut self, key: Value, decoded: Value) {
        let value = PersistedValue::from_decoded(decoded, Arc::clone(&self.persister));
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &Value) -> Result<Option<&Value>, CqlError> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v.decoded()).transpose()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn decoded(&self) -> Result<Vec<(Value, Value)>, CqlError> {
        self.entries.iter().map(|(k, v)| Ok((k.clone(), v.decoded()?.clone()))).collect()
    }

    pub fn encoded(&self) -> Result<Vec<(Value, Value)>, CqlError> {
        self.entries.iter().map(|(k, v)| Ok((k.clone(), v.encoded()?.clone()))).collect()
    }
}

impl PartialEq for PersistedMap {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len() && self.entries.iter().all(|e| other.entries.contains(e))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Persisted {
    Value(PersistedValue),
    List(PersistedList),
    Set(PersistedSet),
    Map(PersistedMap),
}

impl Persisted {
    pub fn decoded(&self) -> Result<Value, CqlError> {
        match self {
            Persisted::Value(v) => v.decoded().cloned(),
            Persisted::List(l) => Ok(Value::List(l.decoded()?)),
            Persisted::Set(s) => Ok(Value::Set(s.decoded()?)),
            Persisted::Map(m) => Ok(Value::Map(m.decoded()?)),
        }
    }

    pub fn encoded(&self) -> Result<Value, CqlError> {
        match self {
            Persisted::Value(v) => v.encoded().cloned(),
            Persisted::List(l) => Ok(Value::List(l.encoded()?)),
            Persisted::Set(s) => Ok(Value::Set(s.encoded()?)),
            Persisted::Map(m) => Ok(Value::Map(m.encoded()?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Upper-cases on the way in and counts every conversion.
    #[derive(Debug, Default)]
    struct Shouting {
        encodes: AtomicUsize,
        decodes: AtomicUsize,
    }

    impl Persister for Shouting {
        fn name(&self) -> &str { "shouting" }
        fn persisted_type(&self) -> CqlType { CqlType::Text }
        fn encode(&self, decoded: &Value) -> Result<Value, CqlError> {
            self.encodes.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Text(decoded.as_str().unwrap_or_default().to_uppercase()))
        }
        fn decode(&self, encoded: &Value) -> Result<Value, CqlError> {
            self.decodes.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Text(encoded.as_str().unwrap_or_default().to_lowercase()))
        }
    }

    #[test]
    fn value_converts_once_and_caches() {
        let p = Arc::new(Shouting::default());
        let v = PersistedValue::from_decoded(Value::text("quiet"), p.clone());
        assert!(!v.is_encoded());
        assert_eq!(v.encoded().unwrap(), &Value::text("QUIET"));
        assert_eq!(v.encoded().unwrap(), &Value::text("QUIET"));
        assert_eq!(p.encodes.load(Ordering::SeqCst), 1);
        assert_eq!(p.decodes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn null_bypasses_persister() {
        let p = Arc::new(Shouting::default());
        let v = PersistedValue::from_encoded(Value::Null, p.clone());
        assert_eq!(v.decoded().unwrap(), &Value::Null);
        assert_eq!(p.decodes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn list_decodes_only_touched_elements() {
        let p = Arc::new(Shouting::default());
        let list = PersistedList::from_encoded(vec![Value::text("A"), Value::text("B"), Value::text("C")], p.clone());
        assert_eq!(list.get(1).unwrap(), Some(&Value::text("b")));
        assert_eq!(p.decodes.load(Ordering::SeqCst), 1);
        assert!(!list.elements()[0].is_decoded());
        assert_eq!(list.decoded().unwrap(), vec![Value::text("a"), Value::text("b"), Value::text("c")]);
        assert_eq!(p.decodes.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn set_and_map_keep_uniqueness() {
        let p: Arc<dyn Persister> = Arc::new(Shouting::default());
        let mut set = PersistedSet::from_decoded(vec![Value::text("x"), Value::text("x")], p.clone());
        assert_eq!(set.len(), 1);
        assert!(!set.insert(Value::text("x")));
        assert!(set.insert(Value::text("y")));

        let mut map = PersistedMap::from_decoded(vec![(Value::Int(1), Value::text("a"))], p);
        map.put(Value::Int(1), Value::text("b"));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&Value::Int(1)).unwrap(), Some(&Value::text("b")));
        assert_eq!(map.encoded().unwrap(), vec![(Value::Int(1), Value::text("B"))]);
    }

    #[test]
    fn values_nest_persisted_wrappers() {
        let json: Arc<dyn Persister> = Arc::new(JsonPersister);
        let inner = Value::Map(vec![(Value::text("sku"), Value::text("w-1"))]);
        let wrapped = Value::Persisted(Persisted::Value(PersistedValue::from_decoded(inner.clone(), Arc::clone(&json))));
        let outer = Value::List(vec![wrapped.clone(), Value::Null]);
        assert_eq!(wrapped, inner);
        assert!(matches!(&outer, Value::List(items) if items[0] == inner));

        let stored = PersistedValue::from_encoded(Value::text(r#"{"sku":"w-1"}"#), json);
        assert_eq!(Value::Persisted(Persisted::Value(stored)), wrapped);
    }

    #[test]
    fn json_persister_round_trips_native_shapes() {
        let json = JsonPersister;
        let value = Value::Map(vec![
            (Value::text("name"), Value::text("widget")),
            (Value::text("sizes"), Value::List(vec![Value::BigInt(1), Value::BigInt(2)])),
            (Value::text("price"), Value::Double(9.5)),
            (Value::text("active"), Value::Boolean(true)),
        ]);
        let encoded = json.encode(&value).unwrap();
        assert!(matches!(encoded, Value::Text(_)));
        assert_eq!(json.decode(&encoded).unwrap(), value);
        assert!(json.decode(&Value::Int(1)).is_err());
    }
}
