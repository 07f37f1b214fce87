use crate::codec::persisted::Persisted;
use crate::error::CqlError;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::IpAddr;

/// A column value, either in its domain representation or as bound for / returned by the driver.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Boolean(bool),
    TinyInt(i8),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Counter(i64),
    Float(f32),
    Double(f64),
    Text(String),
    Ascii(String),
    Blob(Vec<u8>),
    Uuid(u128),
    TimeUuid(u128),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
    Inet(IpAddr),
    List(Vec<Value>),
    Set(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Udt(Vec<(String, Value)>),
    Persisted(Persisted),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    /// Builds a set value, dropping later duplicates while keeping first-seen order.
    pub fn set(items: impl IntoIterator<Item = Value>) -> Self {
        let mut out: Vec<Value> = Vec::new();
        for item in items {
            if !out.contains(&item) {
                out.push(item);
            }
        }
        Value::Set(out)
    }

    /// Builds a map value; a repeated key replaces the earlier entry in place.
    pub fn map(entries: impl IntoIterator<Item = (Value, Value)>) -> Self {
        let mut out: Vec<(Value, Value)> = Vec::new();
        for (k, v) in entries {
            match out.iter_mut().find(|(existing, _)| *existing == k) {
                Some(slot) => slot.1 = v,
                None => out.push((k, v)),
            }
        }
        Value::Map(out)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_collection(&self) -> bool {
        match self {
            Value::List(_) | Value::Set(_) | Value::Map(_) => true,
            Value::Persisted(p) => !matches!(p, Persisted::Value(_)),
            _ => false,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::TinyInt(_) => "tinyint",
            Value::SmallInt(_) => "smallint",
            Value::Int(_) => "int",
            Value::BigInt(_) => "bigint",
            Value::Counter(_) => "counter",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Text(_) => "text",
            Value::Ascii(_) => "ascii",
            Value::Blob(_) => "blob",
            Value::Uuid(_) => "uuid",
            Value::TimeUuid(_) => "timeuuid",
            Value::Timestamp(_) => "timestamp",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::Inet(_) => "inet",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
            Value::Udt(_) => "udt",
            Value::Persisted(_) => "persisted",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Ascii(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(b) => Some(b),
            _ => None,
        }
    }

    /// Renders the value as a keyspace suffix segment.
    pub fn suffix_segment(&self) -> Option<String> {
        match self.resolved().ok()? {
            Value::Text(s) | Value::Ascii(s) => Some(s.to_lowercase()),
            Value::TinyInt(i) => Some(i.to_string()),
            Value::SmallInt(i) => Some(i.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::BigInt(i) => Some(i.to_string()),
            Value::Boolean(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Domain view of the value: persisted wrappers are decoded, everything else is returned as is.
    pub fn resolved(&self) -> Result<Value, CqlError> {
        match self {
            Value::Persisted(p) => p.decoded(),
            other => Ok(other.clone()),
        }
    }

    /// Wire view of the value: persisted wrappers are encoded, recursively.
    pub fn to_raw(&self) -> Result<Value, CqlError> {
        match self {
            Value::Persisted(p) => p.encoded(),
            Value::List(items) => Ok(Value::List(items.iter().map(Value::to_raw).collect::<Result<_, _>>()?)),
            Value::Set(items) => Ok(Value::Set(items.iter().map(Value::to_raw).collect::<Result<_, _>>()?)),
            Value::Map(entries) => Ok(Value::Map(
                entries.iter().map(|(k, v)| Ok((k.to_raw()?, v.to_raw()?))).collect::<Result<_, CqlError>>()?,
            )),
            Value::Udt(fields) => Ok(Value::Udt(
                fields.iter().map(|(n, v)| Ok((n.clone(), v.to_raw()?))).collect::<Result<_, CqlError>>()?,
            )),
            other => Ok(other.clone()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Persisted(a), Persisted(b)) => a == b,
            (Persisted(a), v) | (v, Persisted(a)) => a.decoded().map(|d| &d == v).unwrap_or(false),
            (Null, Null) => true,
            (Boolean(a), Boolean(b)) => a == b,
            (TinyInt(a), TinyInt(b)) => a == b,
            (SmallInt(a), SmallInt(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (BigInt(a), BigInt(b)) => a == b,
            (Counter(a), Counter(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Double(a), Double(b)) => a == b,
            (Text(a), Text(b)) | (Ascii(a), Ascii(b)) => a == b,
            (Blob(a), Blob(b)) => a == b,
            (Uuid(a), Uuid(b)) | (TimeUuid(a), TimeUuid(b)) => a == b,
            (Timestamp(a), Timestamp(b)) => a == b,
            (Date(a), Date(b)) => a == b,
            (Time(a), Time(b)) => a == b,
            (Inet(a), Inet(b)) => a == b,
            (List(a), List(b)) => a == b,
            (Set(a), Set(b)) => a.len() == b.len() && a.iter().all(|x| b.contains(x)),
            (Map(a), Map(b)) => a.len() == b.len() && a.iter().all(|x| b.contains(x)),
            (Udt(a), Udt(b)) => a == b,
            _ => false,
        }
    }
}

fn write_uuid(f: &mut fmt::Formatter<'_>, u: u128) -> fmt::Result {
    let hex = format!("{:032x}", u);
    write!(f, "{}-{}-{}-{}-{}", &hex[0..8], &hex[8..12], &hex[12..16], &hex[16..20], &hex[20..32])
}

fn write_joined<'a, I>(f: &mut fmt::Formatter<'_>, items: I) -> fmt::Result
where
    I: IntoIterator<Item = &'a Value>,
{
    for (i, item) in items.into_iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

/// CQL literal rendering.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::TinyInt(i) => write!(f, "{}", i),
            Value::SmallInt(i) => write!(f, "{}", i),
            Value::Int(i) => write!(f, "{}", i),
            Value::BigInt(i) | Value::Counter(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Double(x) => write!(f, "{}", x),
            Value::Text(s) | Value::Ascii(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Value::Blob(bytes) => {
                f.write_str("0x")?;
                for b in bytes {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
            Value::Uuid(u) | Value::TimeUuid(u) => write_uuid(f, *u),
            Value::Timestamp(ts) => write!(f, "'{}'", ts.format("%Y-%m-%dT%H:%M:%S%.3fZ")),
            Value::Date(d) => write!(f, "'{}'", d.format("%Y-%m-%d")),
            Value::Time(t) => write!(f, "'{}'", t.format("%H:%M:%S%.9f")),
            Value::Inet(ip) => write!(f, "'{}'", ip),
            Value::List(items) => {
                f.write_str("[")?;
                write_joined(f, items)?;
                f.write_str("]")
            }
            Value::Set(items) => {
                f.write_str("{")?;
                write_joined(f, items)?;
                f.write_str("}")
            }
            Value::Map(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                f.write_str("}")
            }
            Value::Udt(fields) => {
                f.write_str("{")?;
                for (i, (n, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", n, v)?;
                }
                f.write_str("}")
            }
            Value::Persisted(p) => match p.encoded() {
                Ok(encoded) => write!(f, "{}", encoded),
                Err(_) => f.write_str("?"),
            },
        }
    }
}

/// Column name to value map, in column-name order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: BTreeMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &str, value: impl IntoValue) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: &str, value: impl IntoValue) -> Option<Value> {
        self.columns.insert(column.to_string(), value.into_value())
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    pub fn take(&mut self, column: &str) -> Option<Value> {
        self.columns.remove(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    /// Reads a column into a Rust value; an absent column reads as null.
    pub fn get_as<T: FromValue>(&self, column: &str) -> Result<T, CqlError> {
        let value = self.columns.get(column).cloned().unwrap_or(Value::Null);
        T::from_value(value).map_err(|reason| CqlError::invalid_value(column, reason))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.columns.iter()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Row { columns: iter.into_iter().collect() }
    }
}

impl IntoIterator for Row {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.into_iter()
    }
}

pub trait IntoValue {
    fn into_value(self) -> Value;
}

pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, String>;
}

fn unwrap_persisted(value: Value) -> Result<Value, String> {
    match value {
        Value::Persisted(p) => p.decoded().map_err(|e| e.to_string()),
        other => Ok(other),
    }
}

fn mismatch<T>(expected: &str, found: &Value) -> Result<T, String> {
    Err(format!("expected {}, found {}", expected, found.kind_name()))
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, String> {
        Ok(value)
    }
}

macro_rules! impl_scalar_value {
    ($t:ty, $expected:literal, $into:expr, $($pat:pat => $out:expr),+) => {
        impl IntoValue for $t {
            fn into_value(self) -> Value {
                $into(self)
            }
        }

        impl FromValue for $t {
            fn from_value(value: Value) -> Result<Self, String> {
                match unwrap_persisted(value)? {
                    $($pat => Ok($out),)+
                    other => mismatch($expected, &other),
                }
            }
        }
    };
}

impl_scalar_value!(bool, "boolean", Value::Boolean, Value::Boolean(b) => b);
impl_scalar_value!(i8, "tinyint", Value::TinyInt, Value::TinyInt(i) => i);
impl_scalar_value!(i16, "smallint", Value::SmallInt, Value::SmallInt(i) => i, Value::TinyInt(i) => i as i16);
impl_scalar_value!(i32, "int", Value::Int, Value::Int(i) => i, Value::SmallInt(i) => i as i32, Value::TinyInt(i) => i as i32);
impl_scalar_value!(i64, "bigint", Value::BigInt, Value::BigInt(i) => i, Value::Counter(i) => i, Value::Int(i) => i as i64);
impl_scalar_value!(f32, "float", Value::Float, Value::Float(x) => x);
impl_scalar_value!(f64, "double", Value::Double, Value::Double(x) => x, Value::Float(x) => x as f64);
impl_scalar_value!(String, "text", Value::Text, Value::Text(s) => s, Value::Ascii(s) => s);
impl_scalar_value!(DateTime<Utc>, "timestamp", Value::Timestamp, Value::Timestamp(ts) => ts);
impl_scalar_value!(NaiveDate, "date", Value::Date, Value::Date(d) => d);
impl_scalar_value!(NaiveTime, "time", Value::Time, Value::Time(t) => t);
impl_scalar_value!(IpAddr, "inet", Value::Inet, Value::Inet(ip) => ip);

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::Text(self.to_string())
    }
}

impl IntoValue for &[u8] {
    fn into_value(self) -> Value {
        Value::Blob(self.to_vec())
    }
}

impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value(self) -> Value {
        self.map(IntoValue::into_value).unwrap_or(Value::Null)
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: IntoValue> IntoValue for Vec<T> {
    fn into_value(self) -> Value {
        Value::List(self.into_iter().map(IntoValue::into_value).collect())
    }
}

/// A null collection reads as empty.
impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Result<Self, String> {
        match unwrap_persisted(value)? {
            Value::Null => Ok(Vec::new()),
            Value::List(items) | Value::Set(items) => items.into_iter().map(T::from_value).collect(),
            other => mismatch("list", &other),
        }
    }
}

impl<T: IntoValue> IntoValue for BTreeSet<T> {
    fn into_value(self) -> Value {
        Value::Set(self.into_iter().map(IntoValue::into_value).collect())
    }
}

impl<T: FromValue + Ord> FromValue for BTreeSet<T> {
    fn from_value(value: Value) -> Result<Self, String> {
        match unwrap_persisted(value)? {
            Value::Null => Ok(BTreeSet::new()),
            Value::Set(items) | Value::List(items) => items.into_iter().map(T::from_value).collect(),
            other => mismatch("set", &other),
        }
    }
}

impl<K: IntoValue, V: IntoValue> IntoValue for BTreeMap<K, V> {
    fn into_value(self) -> Value {
        Value::Map(self.into_iter().map(|(k, v)| (k.into_value(), v.into_value())).collect())
    }
}

impl<K: FromValue + Ord, V: FromValue> FromValue for BTreeMap<K, V> {
    fn from_value(value: Value) -> Result<Self, String> {
        match unwrap_persisted(value)? {
            Value::Null => Ok(BTreeMap::new()),
            Value::Map(entries) => entries.into_iter().map(|(k, v)| Ok((K::from_value(k)?, V::from_value(v)?))).collect(),
            other => mismatch("map", &other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_map_keep_uniqueness() {
        let set = Value::set(vec![Value::Int(1), Value::Int(2), Value::Int(1)]);
        assert_eq!(set, Value::Set(vec![Value::Int(1), Value::Int(2)]));

        let map = Value::map(vec![(Value::text("a"), Value::Int(1)), (Value::text("a"), Value::Int(2))]);
        assert_eq!(map, Value::Map(vec![(Value::text("a"), Value::Int(2))]));
    }

    #[test]
    fn sets_compare_without_order() {
        assert_eq!(Value::Set(vec![Value::Int(1), Value::Int(2)]), Value::Set(vec![Value::Int(2), Value::Int(1)]));
        assert_ne!(Value::List(vec![Value::Int(1), Value::Int(2)]), Value::List(vec![Value::Int(2), Value::Int(1)]));
    }

    #[test]
    fn renders_cql_literals() {
        assert_eq!(Value::text("it's").to_string(), "'it''s'");
        assert_eq!(Value::Blob(vec![0xca, 0xfe]).to_string(), "0xcafe");
        assert_eq!(Value::Uuid(0x123e4567_e89b_12d3_a456_426614174000).to_string(), "123e4567-e89b-12d3-a456-426614174000");
        assert_eq!(
            Value::Map(vec![(Value::text("k"), Value::List(vec![Value::Int(1), Value::Null]))]).to_string(),
            "{'k': [1, null]}"
        );
    }

    #[test]
    fn row_reads_typed_values() {
        let row = Row::new()
            .with("id", 42_i64)
            .with("name", "widget")
            .with("tags", vec!["a", "b"]);
        assert_eq!(row.get_as::<i64>("id").unwrap(), 42);
        assert_eq!(row.get_as::<String>("name").unwrap(), "widget");
        assert_eq!(row.get_as::<Vec<String>>("tags").unwrap(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(row.get_as::<Option<i32>>("missing").unwrap(), None);
        assert!(row.get_as::<Vec<String>>("missing").unwrap().is_empty());
        assert!(matches!(row.get_as::<bool>("name"), Err(CqlError::InvalidValue { .. })));
    }

    #[test]
    fn suffix_segments_are_lowercased() {
        assert_eq!(Value::text("ACME").suffix_segment().as_deref(), Some("acme"));
        assert_eq!(Value::Int(7).suffix_segment().as_deref(), Some("7"));
        assert_eq!(Value::Double(1.5).suffix_segment(), None);
    }
}
