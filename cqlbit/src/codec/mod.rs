pub mod persisted;

use crate::codec::persisted::{Persisted, PersistedList, PersistedMap, PersistedSet, PersistedValue, Persister};
use crate::error::CqlError;
use crate::value::Value;
use chrono::{DateTime, NaiveTime, Timelike, Utc};
use once_cell::sync::Lazy;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CqlType {
    Ascii,
    BigInt,
    Blob,
    Boolean,
    Counter,
    Date,
    Double,
    Float,
    Inet,
    Int,
    SmallInt,
    Text,
    Time,
    Timestamp,
    TimeUuid,
    TinyInt,
    Uuid,
    List,
    Set,
    Map,
    Udt,
}

impl CqlType {
    pub fn name(&self) -> &'static str {
        match self {
            CqlType::Ascii => "ascii",
            CqlType::BigInt => "bigint",
            CqlType::Blob => "blob",
            CqlType::Boolean => "boolean",
            CqlType::Counter => "counter",
            CqlType::Date => "date",
            CqlType::Double => "double",
            CqlType::Float => "float",
            CqlType::Inet => "inet",
            CqlType::Int => "int",
            CqlType::SmallInt => "smallint",
            CqlType::Text => "text",
            CqlType::Time => "time",
            CqlType::Timestamp => "timestamp",
            CqlType::TimeUuid => "timeuuid",
            CqlType::TinyInt => "tinyint",
            CqlType::Uuid => "uuid",
            CqlType::List => "list",
            CqlType::Set => "set",
            CqlType::Map => "map",
            CqlType::Udt => "udt",
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, CqlType::List | CqlType::Set | CqlType::Map)
    }
}

/// Resolved column type: a scalar, a user-defined type, or a collection of non-collection arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataTypeDefinition {
    pub main: CqlType,
    pub arguments: Vec<DataTypeDefinition>,
    pub udt: Option<String>,
}

impl DataTypeDefinition {
    pub fn scalar(main: CqlType) -> Self {
        Self { main, arguments: Vec::new(), udt: None }
    }

    pub fn udt(name: &str) -> Self {
        Self { main: CqlType::Udt, arguments: Vec::new(), udt: Some(name.to_string()) }
    }

    pub fn list(element: DataTypeDefinition) -> Self {
        Self { main: CqlType::List, arguments: vec![element], udt: None }
    }

    pub fn set(element: DataTypeDefinition) -> Self {
        Self { main: CqlType::Set, arguments: vec![element], udt: None }
    }

    pub fn map(key: DataTypeDefinition, value: DataTypeDefinition) -> Self {
        Self { main: CqlType::Map, arguments: vec![key, value], udt: None }
    }

    pub fn is_collection(&self) -> bool {
        self.main.is_collection()
    }

    pub fn is_counter(&self) -> bool {
        self.main == CqlType::Counter
    }

    /// Element type of a list or set; value type of a map.
    pub fn element(&self) -> Option<&DataTypeDefinition> {
        self.arguments.last()
    }

    fn check(&self, column: &str) -> Result<(), CqlError> {
        let arity = match self.main {
            CqlType::List | CqlType::Set => 1,
            CqlType::Map => 2,
            _ => 0,
        };
        if self.arguments.len() != arity {
            return Err(CqlError::UnsupportedColumnType {
                column: column.to_string(),
                declared: format!("{} expects {} type arguments", self.main.name(), arity),
            });
        }
        if self.arguments.iter().any(DataTypeDefinition::is_collection) {
            return Err(CqlError::UnsupportedColumnType { column: column.to_string(), declared: self.to_text() });
        }
        if self.main == CqlType::Udt && self.udt.is_none() {
            return Err(CqlError::UnsupportedColumnType { column: column.to_string(), declared: "udt without a name".to_string() });
        }
        Ok(())
    }

    /// CQL rendering, with user-defined types frozen.
    pub fn to_text(&self) -> String {
        match self.main {
            CqlType::Udt => format!("frozen<{}>", self.udt.as_deref().unwrap_or_default()),
            CqlType::List | CqlType::Set | CqlType::Map => {
                let args: Vec<String> = self.arguments.iter().map(DataTypeDefinition::to_text).collect();
                format!("{}<{}>", self.main.name(), args.join(", "))
            }
            scalar => scalar.name().to_string(),
        }
    }
}

impl fmt::Display for DataTypeDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

/// Domain-side type of a property, as declared by the entity descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclaredType {
    Bool,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    String,
    Bytes,
    Uuid,
    DateTime,
    Date,
    Time,
    Inet,
    Enum(&'static str),
    List(Box<DeclaredType>),
    Set(Box<DeclaredType>),
    Map(Box<DeclaredType>, Box<DeclaredType>),
    Udt(&'static str),
    /// A domain type with no structural mapping; only storable through a persister.
    Opaque(&'static str),
}

impl DeclaredType {
    pub fn list(element: DeclaredType) -> Self {
        DeclaredType::List(Box::new(element))
    }

    pub fn set(element: DeclaredType) -> Self {
        DeclaredType::Set(Box::new(element))
    }

    pub fn map(key: DeclaredType, value: DeclaredType) -> Self {
        DeclaredType::Map(Box::new(key), Box::new(value))
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, DeclaredType::List(_) | DeclaredType::Set(_) | DeclaredType::Map(_, _))
    }

    fn scalar_kind(&self) -> Option<Kind> {
        Some(match self {
            DeclaredType::Bool => Kind::Bool,
            DeclaredType::I8 => Kind::I8,
            DeclaredType::I16 => Kind::I16,
            DeclaredType::I32 => Kind::I32,
            DeclaredType::I64 => Kind::I64,
            DeclaredType::F32 => Kind::F32,
            DeclaredType::F64 => Kind::F64,
            DeclaredType::String => Kind::String,
            DeclaredType::Bytes => Kind::Bytes,
            DeclaredType::Uuid => Kind::Uuid,
            DeclaredType::DateTime => Kind::DateTime,
            DeclaredType::Date => Kind::Date,
            DeclaredType::Time => Kind::Time,
            DeclaredType::Inet => Kind::Inet,
            DeclaredType::Enum(_) => Kind::String,
            _ => return None,
        })
    }
}

impl fmt::Display for DeclaredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeclaredType::Enum(name) => write!(f, "enum {}", name),
            DeclaredType::List(e) => write!(f, "list<{}>", e),
            DeclaredType::Set(e) => write!(f, "set<{}>", e),
            DeclaredType::Map(k, v) => write!(f, "map<{}, {}>", k, v),
            DeclaredType::Udt(name) => write!(f, "udt {}", name),
            DeclaredType::Opaque(name) => f.write_str(name),
            scalar => write!(f, "{:?}", scalar),
        }
    }
}

/// Domain-side scalar representation a decoder produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Bool,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    String,
    Bytes,
    Uuid,
    DateTime,
    Date,
    Time,
    Inet,
}

/// Decodes a stored scalar of type `from` into the `produces` representation.
struct ScalarDecoder {
    from: CqlType,
    produces: Kind,
    decode: fn(Value) -> Option<Value>,
}

fn millis_to_timestamp(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
}

fn nanos_of_day(t: &NaiveTime) -> i64 {
    t.num_seconds_from_midnight() as i64 * 1_000_000_000 + t.nanosecond() as i64
}

fn time_from_nanos(nanos: i64) -> Option<NaiveTime> {
    if nanos < 0 {
        return None;
    }
    NaiveTime::from_num_seconds_from_midnight_opt((nanos / 1_000_000_000) as u32, (nanos % 1_000_000_000) as u32)
}

fn uuid_from_str(s: &str) -> Option<u128> {
    let hex: String = s.chars().filter(|c| *c != '-').collect();
    if hex.len() != 32 {
        return None;
    }
    u128::from_str_radix(&hex, 16).ok()
}

/// Registered decoders, searched in order; the first one producing the declared kind wins.
static DECODERS: Lazy<Vec<ScalarDecoder>> = Lazy::new(|| {
    vec![
        ScalarDecoder { from: CqlType::Ascii, produces: Kind::String, decode: |v| match v { Value::Ascii(s) | Value::Text(s) => Some(Value::Text(s)), _ => None } },
        ScalarDecoder { from: CqlType::Text, produces: Kind::String, decode: |v| match v { Value::Text(s) | Value::Ascii(s) => Some(Value::Text(s)), _ => None } },
        ScalarDecoder { from: CqlType::BigInt, produces: Kind::I64, decode: |v| match v { Value::BigInt(i) => Some(Value::BigInt(i)), _ => None } },
        ScalarDecoder { from: CqlType::Counter, produces: Kind::I64, decode: |v| match v { Value::Counter(i) | Value::BigInt(i) => Some(Value::BigInt(i)), _ => None } },
        ScalarDecoder { from: CqlType::Int, produces: Kind::I32, decode: |v| match v { Value::Int(i) => Some(Value::Int(i)), _ => None } },
        ScalarDecoder { from: CqlType::Int, produces: Kind::I64, decode: |v| match v { Value::Int(i) => Some(Value::BigInt(i as i64)), _ => None } },
        ScalarDecoder { from: CqlType::SmallInt, produces: Kind::I16, decode: |v| match v { Value::SmallInt(i) => Some(Value::SmallInt(i)), _ => None } },
        ScalarDecoder { from: CqlType::SmallInt, produces: Kind::I32, decode: |v| match v { Value::SmallInt(i) => Some(Value::Int(i as i32)), _ => None } },
        ScalarDecoder { from: CqlType::TinyInt, produces: Kind::I8, decode: |v| match v { Value::TinyInt(i) => Some(Value::TinyInt(i)), _ => None } },
        ScalarDecoder { from: CqlType::TinyInt, produces: Kind::I16, decode: |v| match v { Value::TinyInt(i) => Some(Value::SmallInt(i as i16)), _ => None } },
        ScalarDecoder { from: CqlType::Boolean, produces: Kind::Bool, decode: |v| match v { Value::Boolean(b) => Some(Value::Boolean(b)), _ => None } },
        ScalarDecoder { from: CqlType::Float, produces: Kind::F32, decode: |v| match v { Value::Float(x) => Some(Value::Float(x)), _ => None } },
        ScalarDecoder { from: CqlType::Float, produces: Kind::F64, decode: |v| match v { Value::Float(x) => Some(Value::Double(x as f64)), _ => None } },
        ScalarDecoder { from: CqlType::Double, produces: Kind::F64, decode: |v| match v { Value::Double(x) => Some(Value::Double(x)), _ => None } },
        ScalarDecoder { from: CqlType::Blob, produces: Kind::Bytes, decode: |v| match v { Value::Blob(b) => Some(Value::Blob(b)), _ => None } },
        ScalarDecoder { from: CqlType::Uuid, produces: Kind::Uuid, decode: |v| match v { Value::Uuid(u) | Value::TimeUuid(u) => Some(Value::Uuid(u)), _ => None } },
        ScalarDecoder { from: CqlType::Uuid, produces: Kind::String, decode: |v| match v { Value::Uuid(_) | Value::TimeUuid(_) => Some(Value::Text(v.to_string())), _ => None } },
        ScalarDecoder { from: CqlType::TimeUuid, produces: Kind::Uuid, decode: |v| match v { Value::TimeUuid(u) | Value::Uuid(u) => Some(Value::Uuid(u)), _ => None } },
        ScalarDecoder { from: CqlType::TimeUuid, produces: Kind::String, decode: |v| match v { Value::TimeUuid(_) | Value::Uuid(_) => Some(Value::Text(v.to_string())), _ => None } },
        ScalarDecoder { from: CqlType::Timestamp, produces: Kind::DateTime, decode: |v| match v { Value::Timestamp(ts) => Some(Value::Timestamp(ts)), _ => None } },
        ScalarDecoder { from: CqlType::Timestamp, produces: Kind::I64, decode: |v| match v { Value::Timestamp(ts) => Some(Value::BigInt(ts.timestamp_millis())), _ => None } },
        ScalarDecoder { from: CqlType::Date, produces: Kind::Date, decode: |v| match v { Value::Date(d) => Some(Value::Date(d)), _ => None } },
        ScalarDecoder { from: CqlType::Time, produces: Kind::Time, decode: |v| match v { Value::Time(t) => Some(Value::Time(t)), _ => None } },
        ScalarDecoder { from: CqlType::Time, produces: Kind::I64, decode: |v| match v { Value::Time(t) => Some(Value::BigInt(nanos_of_day(&t))), _ => None } },
        ScalarDecoder { from: CqlType::Inet, produces: Kind::Inet, decode: |v| match v { Value::Inet(ip) => Some(Value::Inet(ip)), _ => None } },
        ScalarDecoder { from: CqlType::Inet, produces: Kind::String, decode: |v| match v { Value::Inet(ip) => Some(Value::Text(ip.to_string())), _ => None } },
    ]
});

fn find_scalar_decoder(from: CqlType, produces: Kind) -> Option<&'static ScalarDecoder> {
    DECODERS.iter().find(|d| d.from == from && d.produces == produces)
}

/// Encodes a domain scalar into the stored representation of `to`.
fn encode_scalar(to: CqlType, value: Value) -> Option<Value> {
    match (to, value) {
        (CqlType::Ascii, Value::Text(s) | Value::Ascii(s)) if s.is_ascii() => Some(Value::Ascii(s)),
        (CqlType::Text, Value::Text(s) | Value::Ascii(s)) => Some(Value::Text(s)),
        (CqlType::BigInt, Value::BigInt(i)) => Some(Value::BigInt(i)),
        (CqlType::BigInt, Value::Int(i)) => Some(Value::BigInt(i as i64)),
        (CqlType::Counter, Value::Counter(i) | Value::BigInt(i)) => Some(Value::Counter(i)),
        (CqlType::Int, Value::Int(i)) => Some(Value::Int(i)),
        (CqlType::Int, Value::SmallInt(i)) => Some(Value::Int(i as i32)),
        (CqlType::Int, Value::BigInt(i)) => i32::try_from(i).ok().map(Value::Int),
        (CqlType::SmallInt, Value::SmallInt(i)) => Some(Value::SmallInt(i)),
        (CqlType::SmallInt, Value::TinyInt(i)) => Some(Value::SmallInt(i as i16)),
        (CqlType::SmallInt, Value::Int(i)) => i16::try_from(i).ok().map(Value::SmallInt),
        (CqlType::TinyInt, Value::TinyInt(i)) => Some(Value::TinyInt(i)),
        (CqlType::TinyInt, Value::SmallInt(i)) => i8::try_from(i).ok().map(Value::TinyInt),
        (CqlType::Boolean, Value::Boolean(b)) => Some(Value::Boolean(b)),
        (CqlType::Float, Value::Float(x)) => Some(Value::Float(x)),
        (CqlType::Float, Value::Double(x)) => Some(Value::Float(x as f32)),
        (CqlType::Double, Value::Double(x)) => Some(Value::Double(x)),
        (CqlType::Blob, Value::Blob(b)) => Some(Value::Blob(b)),
        (CqlType::Uuid, Value::Uuid(u) | Value::TimeUuid(u)) => Some(Value::Uuid(u)),
        (CqlType::Uuid, Value::Text(s)) => uuid_from_str(&s).map(Value::Uuid),
        (CqlType::TimeUuid, Value::TimeUuid(u) | Value::Uuid(u)) => Some(Value::TimeUuid(u)),
        (CqlType::TimeUuid, Value::Text(s)) => uuid_from_str(&s).map(Value::TimeUuid),
        (CqlType::Timestamp, Value::Timestamp(ts)) => Some(Value::Timestamp(ts)),
        (CqlType::Timestamp, Value::BigInt(ms)) => millis_to_timestamp(ms).map(Value::Timestamp),
        (CqlType::Date, Value::Date(d)) => Some(Value::Date(d)),
        (CqlType::Time, Value::Time(t)) => Some(Value::Time(t)),
        (CqlType::Time, Value::BigInt(nanos)) => time_from_nanos(nanos).map(Value::Time),
        (CqlType::Inet, Value::Inet(ip)) => Some(Value::Inet(ip)),
        (CqlType::Inet, Value::Text(s)) => s.parse().ok().map(Value::Inet),
        (CqlType::Udt, v @ Value::Udt(_)) => Some(v),
        _ => None,
    }
}

fn unsupported(column: &str, declared: &DeclaredType) -> CqlError {
    CqlError::UnsupportedColumnType { column: column.to_string(), declared: declared.to_string() }
}

fn infer_structural(column: &str, declared: &DeclaredType, nested: bool) -> Result<DataTypeDefinition, CqlError> {
    let element = |d: &DeclaredType| {
        if d.is_collection() {
            Err(unsupported(column, declared))
        } else {
            infer_structural(column, d, true)
        }
    };
    Ok(match declared {
        DeclaredType::Bool => DataTypeDefinition::scalar(CqlType::Boolean),
        DeclaredType::I8 => DataTypeDefinition::scalar(CqlType::TinyInt),
        DeclaredType::I16 => DataTypeDefinition::scalar(CqlType::SmallInt),
        DeclaredType::I32 => DataTypeDefinition::scalar(CqlType::Int),
        DeclaredType::I64 => DataTypeDefinition::scalar(CqlType::BigInt),
        DeclaredType::F32 => DataTypeDefinition::scalar(CqlType::Float),
        DeclaredType::F64 => DataTypeDefinition::scalar(CqlType::Double),
        DeclaredType::String => DataTypeDefinition::scalar(CqlType::Text),
        DeclaredType::Bytes => DataTypeDefinition::scalar(CqlType::Blob),
        DeclaredType::Uuid => DataTypeDefinition::scalar(CqlType::Uuid),
        DeclaredType::DateTime => DataTypeDefinition::scalar(CqlType::Timestamp),
        DeclaredType::Date => DataTypeDefinition::scalar(CqlType::Date),
        DeclaredType::Time => DataTypeDefinition::scalar(CqlType::Time),
        DeclaredType::Inet => DataTypeDefinition::scalar(CqlType::Inet),
        DeclaredType::Enum(_) => DataTypeDefinition::scalar(CqlType::Ascii),
        DeclaredType::Udt(name) => DataTypeDefinition::udt(name),
        DeclaredType::List(e) if !nested => DataTypeDefinition::list(element(&**e)?),
        DeclaredType::Set(e) if !nested => DataTypeDefinition::set(element(&**e)?),
        DeclaredType::Map(k, v) if !nested => DataTypeDefinition::map(element(&**k)?, element(&**v)?),
        _ => return Err(unsupported(column, declared)),
    })
}

/// Resolves a property's column type: explicit override first, then the persister's stored type
/// (keeping the collection shape), then structural inference from the declared type.
pub fn infer_type(
    column: &str,
    declared: &DeclaredType,
    explicit: Option<&DataTypeDefinition>,
    persister: Option<&Arc<dyn Persister>>,
) -> Result<DataTypeDefinition, CqlError> {
    if let Some(explicit) = explicit {
        explicit.check(column)?;
        if persister.is_none() {
            Decoder::build(column, explicit, declared, None, false)?;
        }
        return Ok(explicit.clone());
    }
    if let Some(persister) = persister {
        let stored = DataTypeDefinition::scalar(persister.persisted_type());
        return Ok(match declared {
            DeclaredType::List(_) => DataTypeDefinition::list(stored),
            DeclaredType::Set(_) => DataTypeDefinition::set(stored),
            DeclaredType::Map(k, _) => {
                if k.is_collection() {
                    return Err(unsupported(column, declared));
                }
                DataTypeDefinition::map(infer_structural(column, k, true)?, stored)
            }
            _ => stored,
        });
    }
    let inferred = infer_structural(column, declared, false)?;
    inferred.check(column)?;
    Ok(inferred)
}

#[derive(Clone)]
enum DecoderKind {
    Scalar(&'static ScalarDecoder),
    Udt,
    List(Box<DecoderKind>),
    Set(Box<DecoderKind>),
    Map(Box<DecoderKind>, Box<DecoderKind>),
    Persisted { persister: Arc<dyn Persister>, stored: Box<DecoderKind>, key: Option<Box<DecoderKind>> },
}

impl fmt::Debug for DecoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecoderKind::Scalar(d) => write!(f, "{}->{:?}", d.from.name(), d.produces),
            DecoderKind::Udt => f.write_str("udt"),
            DecoderKind::List(e) => write!(f, "list<{:?}>", e),
            DecoderKind::Set(e) => write!(f, "set<{:?}>", e),
            DecoderKind::Map(k, v) => write!(f, "map<{:?}, {:?}>", k, v),
            DecoderKind::Persisted { persister, stored, .. } => write!(f, "{}({:?})", persister.name(), stored),
        }
    }
}

/// Decodes stored values of one column into their domain representation.
#[derive(Clone, Debug)]
pub struct Decoder {
    column: String,
    kind: DecoderKind,
    mandatory: bool,
}

impl Decoder {
    fn scalar_for(column: &str, from: CqlType, declared: &DeclaredType) -> Result<DecoderKind, CqlError> {
        let kind = declared.scalar_kind().ok_or_else(|| unsupported(column, declared))?;
        find_scalar_decoder(from, kind).map(DecoderKind::Scalar).ok_or_else(|| CqlError::UnsupportedColumnType {
            column: column.to_string(),
            declared: format!("{} stored as {}", declared, from.name()),
        })
    }

    fn kind_for(column: &str, data_type: &DataTypeDefinition, declared: &DeclaredType) -> Result<DecoderKind, CqlError> {
        match (data_type.main, declared) {
            (CqlType::Udt, DeclaredType::Udt(_)) => Ok(DecoderKind::Udt),
            (CqlType::List, DeclaredType::List(e)) | (CqlType::List, DeclaredType::Set(e)) => {
                Ok(DecoderKind::List(Box::new(Self::kind_for(column, &data_type.arguments[0], e)?)))
            }
            (CqlType::Set, DeclaredType::Set(e)) | (CqlType::Set, DeclaredType::List(e)) => {
                Ok(DecoderKind::Set(Box::new(Self::kind_for(column, &data_type.arguments[0], e)?)))
            }
            (CqlType::Map, DeclaredType::Map(k, v)) => Ok(DecoderKind::Map(
                Box::new(Self::kind_for(column, &data_type.arguments[0], k)?),
                Box::new(Self::kind_for(column, &data_type.arguments[1], v)?),
            )),
            (main, declared) if !main.is_collection() && main != CqlType::Udt => Self::scalar_for(column, main, declared),
            _ => Err(CqlError::UnsupportedColumnType {
                column: column.to_string(),
                declared: format!("{} stored as {}", declared, data_type),
            }),
        }
    }

    /// Picks the decoder for a column. With a persister, decoding targets the persister's stored
    /// representation and the domain value is produced lazily by the persisted wrapper.
    pub fn build(
        column: &str,
        data_type: &DataTypeDefinition,
        declared: &DeclaredType,
        persister: Option<&Arc<dyn Persister>>,
        mandatory: bool,
    ) -> Result<Decoder, CqlError> {
        let kind = match persister {
            None => Self::kind_for(column, data_type, declared)?,
            Some(persister) => {
                let stored_type = if data_type.is_collection() { data_type.element().map(|e| e.main) } else { Some(data_type.main) };
                let stored_kind = match stored_type {
                    Some(CqlType::Blob) => DeclaredType::Bytes,
                    _ => DeclaredType::String,
                };
                let stored = Self::kind_for(column, &DataTypeDefinition::scalar(persister.persisted_type()), &stored_kind)?;
                let key = match (data_type.main, declared) {
                    (CqlType::Map, DeclaredType::Map(k, _)) => Some(Box::new(Self::kind_for(column, &data_type.arguments[0], k)?)),
                    _ => None,
                };
                DecoderKind::Persisted { persister: Arc::clone(persister), stored: Box::new(stored), key }
            }
        };
        Ok(Decoder { column: column.to_string(), kind, mandatory })
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    fn empty(kind: &DecoderKind) -> Option<Value> {
        match kind {
            DecoderKind::List(_) => Some(Value::List(Vec::new())),
            DecoderKind::Set(_) => Some(Value::Set(Vec::new())),
            DecoderKind::Map(_, _) => Some(Value::Map(Vec::new())),
            _ => None,
        }
    }

    fn decode_with(&self, kind: &DecoderKind, raw: Value) -> Result<Value, CqlError> {
        if raw.is_null() {
            return Ok(Value::Null);
        }
        let mismatch = |raw: &Value| CqlError::invalid_value(&self.column, format!("cannot decode {} with {:?}", raw.kind_name(), kind));
        match kind {
            DecoderKind::Scalar(d) => {
                let kind_name = raw.kind_name();
                (d.decode)(raw).ok_or_else(|| CqlError::invalid_value(&self.column, format!("cannot decode {} as {}", kind_name, d.from.name())))
            }
            DecoderKind::Udt => match raw {
                Value::Udt(_) => Ok(raw),
                other => Err(mismatch(&other)),
            },
            DecoderKind::List(e) => match raw {
                Value::List(items) | Value::Set(items) => Ok(Value::List(items.into_iter().map(|i| self.decode_with(e, i)).collect::<Result<_, _>>()?)),
                other => Err(mismatch(&other)),
            },
            DecoderKind::Set(e) => match raw {
                Value::Set(items) | Value::List(items) => Ok(Value::set(items.into_iter().map(|i| self.decode_with(e, i)).collect::<Result<Vec<_>, _>>()?)),
                other => Err(mismatch(&other)),
            },
            DecoderKind::Map(k, v) => match raw {
                Value::Map(entries) => Ok(Value::Map(
                    entries.into_iter().map(|(ek, ev)| Ok((self.decode_with(k, ek)?, self.decode_with(v, ev)?))).collect::<Result<_, CqlError>>()?,
                )),
                other => Err(mismatch(&other)),
            },
            DecoderKind::Persisted { persister, stored, key } => {
                let p = Arc::clone(persister);
                match raw {
                    Value::List(items) => Ok(Value::Persisted(Persisted::List(PersistedList::from_encoded(
                        items.into_iter().map(|i| self.decode_with(stored, i)).collect::<Result<_, _>>()?,
                        p,
                    )))),
                    Value::Set(items) => Ok(Value::Persisted(Persisted::Set(PersistedSet::from_encoded(
                        items.into_iter().map(|i| self.decode_with(stored, i)).collect::<Result<_, _>>()?,
                        p,
                    )))),
                    Value::Map(entries) => {
                        let key = key.as_deref().ok_or_else(|| mismatch(&Value::Map(Vec::new())))?;
                        Ok(Value::Persisted(Persisted::Map(PersistedMap::from_encoded(
                            entries
                                .into_iter()
                                .map(|(ek, ev)| Ok((self.decode_with(key, ek)?, self.decode_with(stored, ev)?)))
                                .collect::<Result<_, CqlError>>()?,
                            p,
                        ))))
                    }
                    scalar => Ok(Value::Persisted(Persisted::Value(PersistedValue::from_encoded(self.decode_with(stored, scalar)?, p)))),
                }
            }
        }
    }

    /// Decodes a stored value; a null mandatory collection decodes as empty.
    pub fn decode(&self, raw: Value) -> Result<Value, CqlError> {
        if raw.is_null() && self.mandatory {
            if let Some(empty) = Self::empty(&self.kind) {
                return Ok(empty);
            }
        }
        self.decode_with(&self.kind, raw)
    }
}

/// Encodes a domain value for a column of type `data_type`.
///
/// Nulls and values that are already persisted wrappers pass through unchanged. With a persister the
/// result is a lazy wrapper; the persister runs when the bound value is rendered for the driver.
pub fn encode(
    column: &str,
    data_type: &DataTypeDefinition,
    persister: Option<&Arc<dyn Persister>>,
    value: Value,
) -> Result<Value, CqlError> {
    if value.is_null() || matches!(value, Value::Persisted(_)) {
        return Ok(value);
    }
    if let Some(persister) = persister {
        let p = Arc::clone(persister);
        return Ok(Value::Persisted(match (data_type.main, value) {
            (CqlType::List, Value::List(items) | Value::Set(items)) => Persisted::List(PersistedList::from_decoded(items, p)),
            (CqlType::Set, Value::Set(items) | Value::List(items)) => Persisted::Set(PersistedSet::from_decoded(items, p)),
            (CqlType::Map, Value::Map(entries)) => {
                let key_type = &data_type.arguments[0];
                let entries = entries
                    .into_iter()
                    .map(|(k, v)| Ok((encode(column, key_type, None, k)?, v)))
                    .collect::<Result<Vec<_>, CqlError>>()?;
                Persisted::Map(PersistedMap::from_decoded(entries, p))
            }
            (main, v) if main.is_collection() => {
                return Err(CqlError::invalid_value(column, format!("expected {}, found {}", main.name(), v.kind_name())))
            }
            (_, v) => Persisted::Value(PersistedValue::from_decoded(v, p)),
        }));
    }
    let encode_items = |element: &DataTypeDefinition, items: Vec<Value>| {
        items.into_iter().map(|i| encode(column, element, None, i)).collect::<Result<Vec<_>, _>>()
    };
    match (data_type.main, value) {
        (CqlType::List, Value::List(items) | Value::Set(items)) => Ok(Value::List(encode_items(&data_type.arguments[0], items)?)),
        (CqlType::Set, Value::Set(items) | Value::List(items)) => Ok(Value::set(encode_items(&data_type.arguments[0], items)?)),
        (CqlType::Map, Value::Map(entries)) => Ok(Value::map(
            entries
                .into_iter()
                .map(|(k, v)| Ok((encode(column, &data_type.arguments[0], None, k)?, encode(column, &data_type.arguments[1], None, v)?)))
                .collect::<Result<Vec<_>, CqlError>>()?,
        )),
        (main, v) => {
            let kind_name = v.kind_name();
            encode_scalar(main, v).ok_or_else(|| CqlError::invalid_value(column, format!("cannot store {} as {}", kind_name, data_type)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn round_trip(declared: DeclaredType, value: Value) -> Value {
        let data_type = infer_type("c", &declared, None, None).unwrap();
        let decoder = Decoder::build("c", &data_type, &declared, None, false).unwrap();
        let raw = encode("c", &data_type, None, value).unwrap().to_raw().unwrap();
        decoder.decode(raw).unwrap()
    }

    /// Round trip through an explicitly chosen stored type.
    fn round_trip_as(declared: DeclaredType, stored: CqlType, value: Value) -> Value {
        let data_type = infer_type("c", &declared, Some(&DataTypeDefinition::scalar(stored)), None).unwrap();
        let decoder = Decoder::build("c", &data_type, &declared, None, false).unwrap();
        let raw = encode("c", &data_type, None, value).unwrap().to_raw().unwrap();
        decoder.decode(raw).unwrap()
    }

    #[test]
    fn infers_scalars_and_collections() {
        assert_eq!(infer_type("c", &DeclaredType::I64, None, None).unwrap().to_text(), "bigint");
        assert_eq!(infer_type("c", &DeclaredType::Enum("Color"), None, None).unwrap().to_text(), "ascii");
        assert_eq!(
            infer_type("c", &DeclaredType::map(DeclaredType::String, DeclaredType::list(DeclaredType::I32)), None, None)
                .map(|t| t.to_text())
                .unwrap_err()
                .to_string(),
            CqlError::UnsupportedColumnType { column: "c".into(), declared: "map<String, list<I32>>".into() }.to_string()
        );
        assert_eq!(
            infer_type("c", &DeclaredType::set(DeclaredType::Udt("address")), None, None).unwrap().to_text(),
            "set<frozen<address>>"
        );
    }

    #[test]
    fn opaque_types_need_a_persister() {
        let err = infer_type("blob", &DeclaredType::Opaque("Geometry"), None, None).unwrap_err();
        assert!(matches!(err, CqlError::UnsupportedColumnType { ref column, .. } if column == "blob"));

        let json: Arc<dyn Persister> = Arc::new(persisted::JsonPersister);
        let t = infer_type("blob", &DeclaredType::Opaque("Geometry"), None, Some(&json)).unwrap();
        assert_eq!(t.to_text(), "text");
        let t = infer_type("blobs", &DeclaredType::map(DeclaredType::I32, DeclaredType::Opaque("Geometry")), None, Some(&json)).unwrap();
        assert_eq!(t.to_text(), "map<int, text>");
    }

    #[test]
    fn explicit_override_wins_when_compatible() {
        let ts = DataTypeDefinition::scalar(CqlType::Timestamp);
        assert_eq!(infer_type("at", &DeclaredType::I64, Some(&ts), None).unwrap(), ts);
        let counter = DataTypeDefinition::scalar(CqlType::Counter);
        assert!(infer_type("hits", &DeclaredType::I64, Some(&counter), None).unwrap().is_counter());
        assert!(matches!(
            infer_type("flag", &DeclaredType::Bool, Some(&ts), None),
            Err(CqlError::UnsupportedColumnType { .. })
        ));
    }

    #[test]
    fn decoder_prefers_declared_representation() {
        let ts = DataTypeDefinition::scalar(CqlType::Timestamp);
        let millis = Decoder::build("at", &ts, &DeclaredType::I64, None, false).unwrap();
        let stamp = DateTime::<Utc>::from_timestamp_millis(1_700_000_000_123).unwrap();
        assert_eq!(millis.decode(Value::Timestamp(stamp)).unwrap(), Value::BigInt(1_700_000_000_123));
        let native = Decoder::build("at", &ts, &DeclaredType::DateTime, None, false).unwrap();
        assert_eq!(native.decode(Value::Timestamp(stamp)).unwrap(), Value::Timestamp(stamp));
    }

    #[test]
    fn round_trips_boundary_values() {
        let long_text = "x".repeat(65_535);
        assert_eq!(round_trip(DeclaredType::String, Value::Text(long_text.clone())), Value::Text(long_text));
        assert_eq!(round_trip(DeclaredType::I64, Value::Null), Value::Null);
        assert_eq!(round_trip(DeclaredType::I64, Value::BigInt(i64::MIN)), Value::BigInt(i64::MIN));
        assert_eq!(round_trip(DeclaredType::Enum("Color"), Value::text("RED")), Value::text("RED"));
        assert_eq!(round_trip(DeclaredType::list(DeclaredType::I32), Value::List(vec![])), Value::List(vec![]));
        assert_eq!(round_trip(DeclaredType::set(DeclaredType::String), Value::Set(vec![])), Value::Set(vec![]));
        assert_eq!(
            round_trip(DeclaredType::map(DeclaredType::String, DeclaredType::Date), Value::Map(vec![(
                Value::text("d"),
                Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())
            )])),
            Value::Map(vec![(Value::text("d"), Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()))])
        );
    }

    #[test]
    fn round_trips_every_scalar() {
        use std::net::{IpAddr, Ipv6Addr};
        assert_eq!(round_trip(DeclaredType::Bool, Value::Boolean(false)), Value::Boolean(false));
        assert_eq!(round_trip(DeclaredType::F32, Value::Float(f32::MIN_POSITIVE)), Value::Float(f32::MIN_POSITIVE));
        assert_eq!(round_trip(DeclaredType::F32, Value::Double(0.5)), Value::Float(0.5));
        assert_eq!(round_trip(DeclaredType::F64, Value::Double(-1.0e300)), Value::Double(-1.0e300));
        assert_eq!(round_trip(DeclaredType::Bytes, Value::Blob(vec![])), Value::Blob(vec![]));
        assert_eq!(round_trip(DeclaredType::Bytes, Value::Blob(vec![0, 255])), Value::Blob(vec![0, 255]));
        assert_eq!(round_trip(DeclaredType::I8, Value::TinyInt(i8::MIN)), Value::TinyInt(i8::MIN));
        assert_eq!(round_trip(DeclaredType::I16, Value::TinyInt(-3)), Value::SmallInt(-3));
        assert_eq!(round_trip(DeclaredType::I32, Value::SmallInt(i16::MAX)), Value::Int(i16::MAX as i32));

        let id = 0x123e4567_e89b_12d3_a456_426614174000_u128;
        let text = "123e4567-e89b-12d3-a456-426614174000";
        assert_eq!(round_trip(DeclaredType::Uuid, Value::Uuid(u128::MAX)), Value::Uuid(u128::MAX));
        assert_eq!(round_trip(DeclaredType::Uuid, Value::text(text)), Value::Uuid(id));
        assert_eq!(round_trip_as(DeclaredType::Uuid, CqlType::TimeUuid, Value::text(text)), Value::Uuid(id));
        assert_eq!(round_trip_as(DeclaredType::String, CqlType::Uuid, Value::text(text)), Value::text(text));
        assert_eq!(round_trip_as(DeclaredType::String, CqlType::TimeUuid, Value::TimeUuid(id)), Value::text(text));

        let last_nano = NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999).unwrap();
        assert_eq!(round_trip(DeclaredType::Time, Value::Time(last_nano)), Value::Time(last_nano));
        assert_eq!(round_trip(DeclaredType::Time, Value::BigInt(0)), Value::Time(NaiveTime::from_hms_opt(0, 0, 0).unwrap()));
        assert_eq!(round_trip_as(DeclaredType::I64, CqlType::Time, Value::BigInt(86_399_999_999_999)), Value::BigInt(86_399_999_999_999));

        let v6 = IpAddr::V6(Ipv6Addr::LOCALHOST);
        assert_eq!(round_trip(DeclaredType::Inet, Value::Inet(v6)), Value::Inet(v6));
        assert_eq!(round_trip(DeclaredType::Inet, Value::text("192.168.0.1")), Value::Inet("192.168.0.1".parse().unwrap()));
        assert_eq!(round_trip_as(DeclaredType::String, CqlType::Inet, Value::text("::1")), Value::text("::1"));

        assert_eq!(round_trip_as(DeclaredType::I32, CqlType::SmallInt, Value::Int(-32_768)), Value::Int(-32_768));
        assert_eq!(round_trip_as(DeclaredType::I16, CqlType::TinyInt, Value::SmallInt(127)), Value::SmallInt(127));
        assert_eq!(round_trip_as(DeclaredType::I64, CqlType::Int, Value::BigInt(i32::MIN as i64)), Value::BigInt(i32::MIN as i64));
        assert_eq!(round_trip_as(DeclaredType::I64, CqlType::Counter, Value::BigInt(i64::MAX)), Value::BigInt(i64::MAX));
    }

    #[test]
    fn rejects_values_outside_the_stored_range() {
        let stored = |t: CqlType| DataTypeDefinition::scalar(t);
        let out_of_range = |t: CqlType, v: Value| matches!(encode("n", &stored(t), None, v), Err(CqlError::InvalidValue { .. }));
        assert!(out_of_range(CqlType::Int, Value::BigInt(i32::MAX as i64 + 1)));
        assert!(out_of_range(CqlType::Int, Value::BigInt(i32::MIN as i64 - 1)));
        assert!(out_of_range(CqlType::SmallInt, Value::Int(i16::MAX as i32 + 1)));
        assert!(out_of_range(CqlType::SmallInt, Value::Int(i16::MIN as i32 - 1)));
        assert!(out_of_range(CqlType::TinyInt, Value::SmallInt(128)));
        assert!(out_of_range(CqlType::Time, Value::BigInt(-1)));
        assert!(out_of_range(CqlType::Time, Value::BigInt(86_400_000_000_000)));
        assert!(out_of_range(CqlType::Uuid, Value::text("123e4567-e89b")));
        assert!(out_of_range(CqlType::Inet, Value::text("300.1.1.1")));
        assert_eq!(encode("n", &stored(CqlType::Int), None, Value::BigInt(i32::MAX as i64)).unwrap(), Value::Int(i32::MAX));
    }

    #[test]
    fn mandatory_collections_decode_null_as_empty() {
        let declared = DeclaredType::list(DeclaredType::String);
        let t = infer_type("tags", &declared, None, None).unwrap();
        let mandatory = Decoder::build("tags", &t, &declared, None, true).unwrap();
        assert_eq!(mandatory.decode(Value::Null).unwrap(), Value::List(vec![]));
        let optional = Decoder::build("tags", &t, &declared, None, false).unwrap();
        assert_eq!(optional.decode(Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn persisted_values_encode_lazily_and_idempotently() {
        let json: Arc<dyn Persister> = Arc::new(persisted::JsonPersister);
        let declared = DeclaredType::list(DeclaredType::Opaque("Doc"));
        let t = infer_type("docs", &declared, None, Some(&json)).unwrap();
        let doc = Value::Map(vec![(Value::text("a"), Value::BigInt(1))]);

        let encoded = encode("docs", &t, Some(&json), Value::List(vec![doc.clone()])).unwrap();
        let Value::Persisted(Persisted::List(list)) = &encoded else { panic!("expected persisted list") };
        assert!(!list.elements()[0].is_encoded());
        let again = encode("docs", &t, Some(&json), encoded.clone()).unwrap();
        assert_eq!(again, encoded);

        let raw = encoded.to_raw().unwrap();
        assert_eq!(raw, Value::List(vec![Value::text("{\"a\":1}")]));
        let decoder = Decoder::build("docs", &t, &declared, Some(&json), false).unwrap();
        let decoded = decoder.decode(raw).unwrap();
        assert!(matches!(decoded, Value::Persisted(Persisted::List(_))));
        assert_eq!(decoded.resolved().unwrap(), Value::List(vec![doc]));
        assert_eq!(encode("docs", &t, Some(&json), Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn rejects_values_of_the_wrong_shape() {
        let t = DataTypeDefinition::scalar(CqlType::Int);
        assert!(matches!(encode("n", &t, None, Value::text("one")), Err(CqlError::InvalidValue { .. })));
        assert!(matches!(encode("n", &t, None, Value::BigInt(i64::MAX)), Err(CqlError::InvalidValue { .. })));
        let ascii = DataTypeDefinition::scalar(CqlType::Ascii);
        assert!(encode("a", &ascii, None, Value::text("naïve")).is_err());
    }
}
