//! Entity metadata: hand-written descriptors ([`EntityDef`]) and their resolved, validated form
//! ([`EntityType`]).
//!
//! Descriptors are plain values returned by [`Entity::definition`]. Resolution happens once per
//! type through the [`EntityRegistry`] and rejects malformed descriptors up front with
//! [`CqlError::InvalidEntityDefinition`], so that statements only ever see consistent metadata.

pub mod registry;

pub use registry::{registrations, EntityRegistration, EntityRegistry, EntityResolver};

use crate::codec::persisted::Persister;
use crate::codec::{self, CqlType, DataTypeDefinition, DeclaredType, Decoder};
use crate::error::CqlError;
use crate::value::{Row, Value};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Suffix type name to value.
pub type SuffixValues = BTreeMap<String, Value>;

/// Seed rows written when the schema of one keyspace (one suffix combination) is created.
pub type InitialObjects = fn(&SuffixValues) -> Vec<Row>;

const MAX_KEYSPACE_NAME: usize = 48;

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.len() <= MAX_KEYSPACE_NAME
}

/// A mapped domain type.
pub trait Entity: Send + Sync + Sized + 'static {
    fn definition() -> EntityDef;

    fn to_row(&self) -> Row;

    fn from_row(row: &Row) -> Result<Self, CqlError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusteringOrder {
    Asc,
    Desc,
}

impl ClusteringOrder {
    pub fn as_cql(&self) -> &'static str {
        match self {
            ClusteringOrder::Asc => "ASC",
            ClusteringOrder::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Replication {
    Simple(u32),
    NetworkTopology(Vec<(String, u32)>),
}

impl Replication {
    pub fn to_cql(&self) -> String {
        match self {
            Replication::Simple(factor) => {
                format!("{{'class': 'SimpleStrategy', 'replication_factor': {}}}", factor)
            }
            Replication::NetworkTopology(dcs) => {
                let dcs: Vec<String> = dcs.iter().map(|(dc, n)| format!(", '{}': {}", dc, n)).collect();
                format!("{{'class': 'NetworkTopologyStrategy'{}}}", dcs.concat())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexTarget {
    Values,
    Keys,
    Entries,
    Full,
}

#[derive(Debug, Clone, Default)]
pub struct KeyspaceDef {
    pub name: &'static str,
    pub suffixes: Vec<(&'static str, u32)>,
    pub replication: Option<Replication>,
    pub durable_writes: Option<bool>,
}

impl KeyspaceDef {
    pub fn new(name: &'static str) -> Self {
        Self { name, ..Self::default() }
    }

    /// Declares a suffix type; `arrangement` orders the suffix segments of the keyspace name.
    pub fn suffix(mut self, type_name: &'static str, arrangement: u32) -> Self {
        self.suffixes.push((type_name, arrangement));
        self
    }

    pub fn replication(mut self, replication: Replication) -> Self {
        self.replication = Some(replication);
        self
    }

    pub fn durable_writes(mut self, durable: bool) -> Self {
        self.durable_writes = Some(durable);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: &'static str,
    pub declared: DeclaredType,
    pub data_type: Option<DataTypeDefinition>,
    pub persister: Option<Arc<dyn Persister>>,
    pub mandatory: bool,
    pub suffix: Option<&'static str>,
    pub type_key: bool,
    pub is_final: bool,
    /// Tables holding the column; empty means every table.
    pub tables: Vec<&'static str>,
}

impl ColumnDef {
    pub fn new(name: &'static str, declared: DeclaredType) -> Self {
        Self {
            name,
            declared,
            data_type: None,
            persister: None,
            mandatory: false,
            suffix: None,
            type_key: false,
            is_final: false,
            tables: Vec::new(),
        }
    }

    pub fn data_type(mut self, data_type: DataTypeDefinition) -> Self {
        self.data_type = Some(data_type);
        self
    }

    pub fn counter(self) -> Self {
        self.data_type(DataTypeDefinition::scalar(CqlType::Counter))
    }

    pub fn persisted(mut self, persister: Arc<dyn Persister>) -> Self {
        self.persister = Some(persister);
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn suffix(mut self, type_name: &'static str) -> Self {
        self.suffix = Some(type_name);
        self
    }

    pub fn type_key(mut self) -> Self {
        self.type_key = true;
        self.mandatory = true;
        self
    }

    pub fn final_(mut self) -> Self {
        self.is_final = true;
        self
    }

    pub fn tables(mut self, tables: &[&'static str]) -> Self {
        self.tables = tables.to_vec();
        self
    }
}

#[derive(Debug, Clone)]
pub struct IndexDef {
    pub column: &'static str,
    pub name: Option<&'static str>,
    pub target: IndexTarget,
}

#[derive(Debug, Clone)]
pub struct TableDef {
    pub name: &'static str,
    pub partition_keys: Vec<&'static str>,
    pub clustering_keys: Vec<(&'static str, ClusteringOrder)>,
    pub indexes: Vec<IndexDef>,
}

impl TableDef {
    pub fn new(name: &'static str) -> Self {
        Self { name, partition_keys: Vec::new(), clustering_keys: Vec::new(), indexes: Vec::new() }
    }

    pub fn partition_key(mut self, column: &'static str) -> Self {
        self.partition_keys.push(column);
        self
    }

    pub fn clustering_key(mut self, column: &'static str, order: ClusteringOrder) -> Self {
        self.clustering_keys.push((column, order));
        self
    }

    pub fn index(self, column: &'static str) -> Self {
        self.index_on(column, None, IndexTarget::Values)
    }

    pub fn index_on(mut self, column: &'static str, name: Option<&'static str>, target: IndexTarget) -> Self {
        self.indexes.push(IndexDef { column, name, target });
        self
    }
}

#[derive(Clone)]
pub enum EntityKind {
    Standard,
    /// Owns the tables shared by its type entities; `types` lists the known discriminator values.
    Root { types: Vec<&'static str> },
    /// Stored in the root's tables, told apart by the root's type key.
    Type { root: EntityResolver, type_name: &'static str },
    /// User-defined type embedded in other entities' columns.
    Udt,
}

#[derive(Clone)]
pub struct EntityDef {
    pub name: &'static str,
    pub kind: EntityKind,
    pub keyspace: KeyspaceDef,
    pub tables: Vec<TableDef>,
    pub columns: Vec<ColumnDef>,
    pub udts: Vec<EntityResolver>,
    pub initial_objects: Option<InitialObjects>,
}

impl EntityDef {
    pub fn new(name: &'static str, keyspace: KeyspaceDef) -> Self {
        Self {
            name,
            kind: EntityKind::Standard,
            keyspace,
            tables: Vec::new(),
            columns: Vec::new(),
            udts: Vec::new(),
            initial_objects: None,
        }
    }

    pub fn udt(name: &'static str) -> Self {
        Self { kind: EntityKind::Udt, ..Self::new(name, KeyspaceDef::default()) }
    }

    pub fn type_of<R: Entity>(name: &'static str, type_name: &'static str) -> Self {
        Self {
            kind: EntityKind::Type { root: EntityRegistry::resolve::<R>, type_name },
            ..Self::new(name, KeyspaceDef::default())
        }
    }

    pub fn root(mut self, types: &[&'static str]) -> Self {
        self.kind = EntityKind::Root { types: types.to_vec() };
        self
    }

    pub fn table(mut self, table: TableDef) -> Self {
        self.tables.push(table);
        self
    }

    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn uses_udt<U: Entity>(mut self) -> Self {
        self.udts.push(EntityRegistry::resolve::<U>);
        self
    }

    pub fn initial_objects(mut self, objects: InitialObjects) -> Self {
        self.initial_objects = Some(objects);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuffixKeyInfo {
    pub type_name: String,
    pub column: String,
    pub arrangement: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyspaceInfo {
    pub name: String,
    pub suffixes: Vec<SuffixKeyInfo>,
    pub replication: Option<Replication>,
    pub durable_writes: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    pub name: String,
    pub table: String,
    pub column: String,
    pub target: IndexTarget,
}

impl IndexInfo {
    pub fn target_cql(&self) -> String {
        match self.target {
            IndexTarget::Values => self.column.clone(),
            IndexTarget::Keys => format!("KEYS({})", self.column),
            IndexTarget::Entries => format!("ENTRIES({})", self.column),
            IndexTarget::Full => format!("FULL({})", self.column),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ColumnInfo {
    pub name: String,
    pub declared: DeclaredType,
    pub data_type: DataTypeDefinition,
    pub persister: Option<Arc<dyn Persister>>,
    pub mandatory: bool,
    pub counter: bool,
    pub index: bool,
    pub partition_key: Option<usize>,
    pub clustering_key: Option<(usize, ClusteringOrder)>,
    pub suffix_key: Option<String>,
    pub type_key: bool,
    pub multi_key: bool,
    pub is_final: bool,
    pub tables: Vec<String>,
    decoder: Decoder,
}

impl ColumnInfo {
    fn resolve(def: &ColumnDef) -> Result<ColumnInfo, CqlError> {
        let data_type = codec::infer_type(def.name, &def.declared, def.data_type.as_ref(), def.persister.as_ref())?;
        let decoder = Decoder::build(def.name, &data_type, &def.declared, def.persister.as_ref(), def.mandatory)?;
        Ok(ColumnInfo {
            name: def.name.to_string(),
            declared: def.declared.clone(),
            counter: data_type.is_counter(),
            data_type,
            persister: def.persister.clone(),
            mandatory: def.mandatory,
            index: false,
            partition_key: None,
            clustering_key: None,
            suffix_key: def.suffix.map(str::to_string),
            type_key: def.type_key,
            multi_key: false,
            is_final: def.is_final,
            tables: def.tables.iter().map(|t| t.to_string()).collect(),
            decoder,
        })
    }

    /// Turns a set column into a multi-key: the table stores one row per element.
    fn into_multi_key(mut self) -> Result<ColumnInfo, CqlError> {
        let DeclaredType::Set(element) = &self.declared else {
            return Err(CqlError::invalid_definition(&self.name, "only set columns can be multi-keys"));
        };
        let element = (**element).clone();
        self.data_type = codec::infer_type(&self.name, &element, None, self.persister.as_ref())?;
        self.decoder = Decoder::build(&self.name, &self.data_type, &element, self.persister.as_ref(), true)?;
        self.declared = element;
        self.multi_key = true;
        Ok(self)
    }

    pub fn is_persisted(&self) -> bool {
        self.persister.is_some()
    }

    pub fn is_primary_key(&self) -> bool {
        self.partition_key.is_some() || self.clustering_key.is_some()
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    pub fn encode(&self, value: Value) -> Result<Value, CqlError> {
        codec::encode(&self.name, &self.data_type, self.persister.as_ref(), value)
    }

    pub fn decode(&self, raw: Value) -> Result<Value, CqlError> {
        self.decoder.decode(raw)
    }

    /// Encodes a single element of a list or set column, or a single value of a map column.
    pub fn encode_element(&self, value: Value) -> Result<Value, CqlError> {
        let element = match self.data_type.main {
            CqlType::List | CqlType::Set => &self.data_type.arguments[0],
            CqlType::Map => &self.data_type.arguments[1],
            _ => return Err(CqlError::invalid_value(&self.name, format!("{} holds no elements", self.data_type))),
        };
        codec::encode(&self.name, element, self.persister.as_ref(), value)
    }

    /// Map keys are stored as is, so the persister is not involved.
    pub fn encode_key(&self, value: Value) -> Result<Value, CqlError> {
        match self.data_type.main {
            CqlType::Map => codec::encode(&self.name, &self.data_type.arguments[0], None, value),
            _ => Err(CqlError::invalid_value(&self.name, format!("{} holds no keys", self.data_type))),
        }
    }
}

impl PartialEq for ColumnInfo {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.declared == other.declared
            && self.data_type == other.data_type
            && self.persister.as_ref().map(|p| p.name()) == other.persister.as_ref().map(|p| p.name())
            && self.mandatory == other.mandatory
            && self.counter == other.counter
            && self.index == other.index
            && self.partition_key == other.partition_key
            && self.clustering_key == other.clustering_key
            && self.suffix_key == other.suffix_key
            && self.type_key == other.type_key
            && self.multi_key == other.multi_key
            && self.is_final == other.is_final
            && self.tables == other.tables
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub indexes: Vec<IndexInfo>,
    pub counter: bool,
    partition_keys: Vec<String>,
    clustering_keys: Vec<String>,
}

impl TableInfo {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn partition_key(&self, ordinal: usize) -> Option<&ColumnInfo> {
        self.partition_keys.get(ordinal).and_then(|n| self.column(n))
    }

    pub fn clustering_key(&self, ordinal: usize) -> Option<&ColumnInfo> {
        self.clustering_keys.get(ordinal).and_then(|n| self.column(n))
    }

    pub fn partition_keys(&self) -> impl Iterator<Item = &ColumnInfo> {
        self.partition_keys.iter().filter_map(|n| self.column(n))
    }

    pub fn clustering_keys(&self) -> impl Iterator<Item = &ColumnInfo> {
        self.clustering_keys.iter().filter_map(|n| self.column(n))
    }

    pub fn primary_keys(&self) -> impl Iterator<Item = &ColumnInfo> {
        self.partition_keys().chain(self.clustering_keys())
    }

    pub fn multi_key(&self) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.multi_key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityTypeKind {
    Standard,
    Root { types: Vec<String> },
    Type { type_name: String },
    Udt,
}

/// Resolved metadata of one entity type.
#[derive(Clone)]
pub struct EntityType {
    pub name: String,
    pub kind: EntityTypeKind,
    pub keyspace: KeyspaceInfo,
    pub tables: Vec<TableInfo>,
    pub columns: Vec<ColumnInfo>,
    pub udts: Vec<Arc<EntityType>>,
    pub root: Option<Arc<EntityType>>,
    pub initial_objects: Option<InitialObjects>,
}

impl fmt::Debug for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityType")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("keyspace", &self.keyspace)
            .field("tables", &self.tables)
            .field("columns", &self.columns)
            .field("udts", &self.udts.iter().map(|u| u.name.as_str()).collect::<Vec<_>>())
            .field("root", &self.root.as_ref().map(|r| r.name.as_str()))
            .finish()
    }
}

impl PartialEq for EntityType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.kind == other.kind
            && self.keyspace == other.keyspace
            && self.tables == other.tables
            && self.columns == other.columns
            && self.udts == other.udts
            && self.root == other.root
    }
}

impl EntityType {
    pub(crate) fn resolve(def: EntityDef, registry: &EntityRegistry) -> Result<EntityType, CqlError> {
        match def.kind {
            EntityKind::Type { root, type_name } => Self::resolve_type(def.name, root(registry)?, type_name),
            _ => Self::resolve_own(def, registry),
        }
    }

    fn resolve_type(name: &str, root: Arc<EntityType>, type_name: &str) -> Result<EntityType, CqlError> {
        match &root.kind {
            EntityTypeKind::Root { types } if types.iter().any(|t| t == type_name) => {}
            EntityTypeKind::Root { .. } => {
                return Err(CqlError::invalid_definition(name, format!("type `{}` is not declared by root `{}`", type_name, root.name)))
            }
            _ => return Err(CqlError::invalid_definition(name, format!("`{}` is not a root entity", root.name))),
        }
        Ok(EntityType {
            name: name.to_string(),
            kind: EntityTypeKind::Type { type_name: type_name.to_string() },
            keyspace: root.keyspace.clone(),
            tables: root.tables.clone(),
            columns: root.columns.clone(),
            udts: root.udts.clone(),
            root: Some(root),
            initial_objects: None,
        })
    }

    fn resolve_own(def: EntityDef, registry: &EntityRegistry) -> Result<EntityType, CqlError> {
        let invalid = |reason: String| CqlError::invalid_definition(def.name, reason);
        let is_udt = matches!(def.kind, EntityKind::Udt);

        if !is_udt && !is_identifier(def.keyspace.name) {
            return Err(invalid(format!("invalid keyspace name `{}`", def.keyspace.name)));
        }

        let mut udts = Vec::with_capacity(def.udts.len());
        for resolver in &def.udts {
            let udt = resolver(registry)?;
            if udt.kind != EntityTypeKind::Udt {
                return Err(invalid(format!("`{}` is not a user-defined type", udt.name)));
            }
            udts.push(udt);
        }

        let mut columns: Vec<ColumnInfo> = Vec::with_capacity(def.columns.len());
        for column_def in &def.columns {
            if columns.iter().any(|c| c.name == column_def.name) {
                return Err(invalid(format!("duplicate column `{}`", column_def.name)));
            }
            for udt_name in Self::referenced_udts(&column_def.declared) {
                if !udts.iter().any(|u| u.name == udt_name) {
                    return Err(invalid(format!("column `{}` uses unregistered type `{}`", column_def.name, udt_name)));
                }
            }
            for table in &column_def.tables {
                if !def.tables.iter().any(|t| t.name == *table) {
                    return Err(invalid(format!("column `{}` refers to unknown table `{}`", column_def.name, table)));
                }
            }
            columns.push(ColumnInfo::resolve(column_def)?);
        }

        let keyspace = Self::resolve_keyspace(&def, &columns).map_err(&invalid)?;

        let type_keys: Vec<&ColumnInfo> = columns.iter().filter(|c| c.type_key).collect();
        match (&def.kind, type_keys.as_slice()) {
            (EntityKind::Root { types }, [key]) => {
                if !matches!(key.data_type.main, CqlType::Text | CqlType::Ascii) || key.is_persisted() {
                    return Err(invalid(format!("type key `{}` must be stored as text", key.name)));
                }
                if types.is_empty() {
                    return Err(invalid("a root entity must declare its types".to_string()));
                }
            }
            (EntityKind::Root { .. }, []) => return Err(invalid("a root entity needs a type key".to_string())),
            (_, []) => {}
            (EntityKind::Root { .. }, _) => return Err(invalid("only one type key is allowed".to_string())),
            (_, _) => return Err(invalid("type keys are only allowed on root entities".to_string())),
        }

        if is_udt {
            if !def.tables.is_empty() || columns.iter().any(|c| c.suffix_key.is_some()) {
                return Err(invalid("a user-defined type has neither tables nor suffix keys".to_string()));
            }
            if columns.is_empty() {
                return Err(invalid("a user-defined type needs at least one field".to_string()));
            }
        }

        let mut tables: Vec<TableInfo> = Vec::with_capacity(def.tables.len());
        for table_def in &def.tables {
            if tables.iter().any(|t| t.name == table_def.name) {
                return Err(invalid(format!("duplicate table `{}`", table_def.name)));
            }
            tables.push(Self::resolve_table(table_def, &columns).map_err(&invalid)?);
        }

        let kind = match def.kind {
            EntityKind::Standard => EntityTypeKind::Standard,
            EntityKind::Root { types } => EntityTypeKind::Root { types: types.iter().map(|t| t.to_string()).collect() },
            EntityKind::Udt => EntityTypeKind::Udt,
            EntityKind::Type { .. } => return Err(invalid("type entities resolve through their root".to_string())),
        };

        Ok(EntityType {
            name: def.name.to_string(),
            kind,
            keyspace,
            tables,
            columns,
            udts,
            root: None,
            initial_objects: def.initial_objects,
        })
    }

    fn referenced_udts(declared: &DeclaredType) -> Vec<&'static str> {
        match declared {
            DeclaredType::Udt(name) => vec![*name],
            DeclaredType::List(e) | DeclaredType::Set(e) => Self::referenced_udts(e),
            DeclaredType::Map(k, v) => {
                let mut names = Self::referenced_udts(k);
                names.extend(Self::referenced_udts(v));
                names
            }
            _ => Vec::new(),
        }
    }

    fn resolve_keyspace(def: &EntityDef, columns: &[ColumnInfo]) -> Result<KeyspaceInfo, String> {
        let mut suffixes = Vec::with_capacity(def.keyspace.suffixes.len());
        for (type_name, arrangement) in &def.keyspace.suffixes {
            let holders: Vec<&ColumnInfo> = columns.iter().filter(|c| c.suffix_key.as_deref() == Some(*type_name)).collect();
            match holders.as_slice() {
                [column] if !column.data_type.is_collection() => suffixes.push(SuffixKeyInfo {
                    type_name: type_name.to_string(),
                    column: column.name.clone(),
                    arrangement: *arrangement,
                }),
                [column] => return Err(format!("suffix key `{}` cannot be a collection", column.name)),
                [] => return Err(format!("suffix `{}` has no column", type_name)),
                _ => return Err(format!("suffix `{}` is held by more than one column", type_name)),
            }
        }
        if let Some(stray) = columns.iter().find(|c| c.suffix_key.as_ref().is_some_and(|s| !suffixes.iter().any(|k| &k.type_name == s))) {
            return Err(format!("column `{}` refers to an undeclared suffix", stray.name));
        }
        suffixes.sort_by_key(|s| s.arrangement);
        Ok(KeyspaceInfo {
            name: def.keyspace.name.to_string(),
            suffixes,
            replication: def.keyspace.replication.clone(),
            durable_writes: def.keyspace.durable_writes,
        })
    }

    fn resolve_table(def: &TableDef, columns: &[ColumnInfo]) -> Result<TableInfo, String> {
        if def.partition_keys.is_empty() {
            return Err(format!("table `{}` has no partition key", def.name));
        }
        let lookup = |name: &str| {
            columns.iter().find(|c| c.name == name).cloned().ok_or_else(|| format!("table `{}` keys unknown column `{}`", def.name, name))
        };
        let mut keyed: Vec<ColumnInfo> = Vec::new();
        let mut seen = HashSet::new();
        for (ordinal, name) in def.partition_keys.iter().enumerate() {
            if !seen.insert(*name) {
                return Err(format!("column `{}` is keyed twice in `{}`", name, def.name));
            }
            let mut column = lookup(name)?;
            column.partition_key = Some(ordinal);
            keyed.push(column);
        }
        for (ordinal, (name, order)) in def.clustering_keys.iter().enumerate() {
            if !seen.insert(*name) {
                return Err(format!("column `{}` is keyed twice in `{}`", name, def.name));
            }
            let mut column = lookup(name)?;
            column.clustering_key = Some((ordinal, *order));
            keyed.push(column);
        }
        let mut table_columns = Vec::with_capacity(columns.len());
        for column in keyed {
            if column.counter {
                return Err(format!("counter column `{}` cannot be a key", column.name));
            }
            let column = match &column.declared {
                DeclaredType::Set(_) => column.into_multi_key().map_err(|e| e.to_string())?,
                DeclaredType::List(_) | DeclaredType::Map(_, _) => {
                    return Err(format!("collection column `{}` cannot be a key", column.name));
                }
                _ => ColumnInfo { mandatory: true, ..column },
            };
            table_columns.push(column);
        }
        if table_columns.iter().filter(|c| c.multi_key).count() > 1 {
            return Err(format!("table `{}` has more than one multi-key", def.name));
        }
        for column in columns {
            let stored_here = column.tables.is_empty() || column.tables.iter().any(|t| *t == def.name);
            if seen.contains(column.name.as_str()) || column.suffix_key.is_some() || !stored_here {
                continue;
            }
            table_columns.push(column.clone());
        }

        let counter = table_columns.iter().any(|c| c.counter);
        if counter {
            if let Some(plain) = table_columns.iter().find(|c| !c.is_primary_key() && !c.counter) {
                return Err(format!("table `{}` mixes counter and non-counter column `{}`", def.name, plain.name));
            }
        }

        let mut indexes = Vec::with_capacity(def.indexes.len());
        for index in &def.indexes {
            let column = table_columns
                .iter_mut()
                .find(|c| c.name == index.column)
                .ok_or_else(|| format!("index on unknown column `{}` in `{}`", index.column, def.name))?;
            let is_map = column.data_type.main == CqlType::Map;
            match index.target {
                IndexTarget::Keys | IndexTarget::Entries if !is_map => {
                    return Err(format!("index on `{}` targets map entries of a non-map column", column.name));
                }
                IndexTarget::Full if !column.data_type.is_collection() => {
                    return Err(format!("full index on non-collection `{}`", column.name));
                }
                _ => {}
            }
            column.index = true;
            indexes.push(IndexInfo {
                name: index.name.map(str::to_string).unwrap_or_else(|| format!("{}_{}_idx", def.name, index.column)),
                table: def.name.to_string(),
                column: index.column.to_string(),
                target: index.target,
            });
        }

        Ok(TableInfo {
            name: def.name.to_string(),
            columns: table_columns,
            indexes,
            counter,
            partition_keys: def.partition_keys.iter().map(|s| s.to_string()).collect(),
            clustering_keys: def.clustering_keys.iter().map(|(s, _)| s.to_string()).collect(),
        })
    }

    pub fn is_udt(&self) -> bool {
        self.kind == EntityTypeKind::Udt
    }

    /// Discriminator value written and matched by a type entity.
    pub fn type_name(&self) -> Option<&str> {
        match &self.kind {
            EntityTypeKind::Type { type_name } => Some(type_name),
            _ => None,
        }
    }

    pub fn table(&self, name: &str) -> Result<&TableInfo, CqlError> {
        self.tables.iter().find(|t| t.name == name).ok_or_else(|| CqlError::UnknownTable {
            entity: self.name.clone(),
            table: name.to_string(),
        })
    }

    pub fn column(&self, name: &str) -> Result<&ColumnInfo, CqlError> {
        self.columns.iter().find(|c| c.name == name).ok_or_else(|| CqlError::unknown_column(&self.name, name))
    }

    pub fn suffix_key(&self, type_name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.suffix_key.as_deref() == Some(type_name))
    }

    pub fn type_key(&self) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.type_key)
    }

    pub fn is_counter(&self) -> bool {
        self.tables.iter().any(|t| t.counter)
    }

    /// Effective keyspace name: base name followed by the suffix values in arrangement order.
    pub fn keyspace_name(&self, suffixes: &SuffixValues) -> Result<String, CqlError> {
        let mut name = self.keyspace.name.clone();
        let mut missing = Vec::new();
        for suffix in &self.keyspace.suffixes {
            match suffixes.get(&suffix.type_name).filter(|v| !v.is_null()) {
                Some(value) => {
                    let segment = value.suffix_segment().ok_or_else(|| {
                        CqlError::invalid_value(&suffix.column, format!("{} cannot name a keyspace", value.kind_name()))
                    })?;
                    name.push('_');
                    name.push_str(&segment);
                }
                None => missing.push(suffix.column.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(CqlError::MissingKeyClause { entity: self.name.clone(), missing });
        }
        if !is_identifier(&name) {
            return Err(CqlError::invalid_value(&self.name, format!("`{}` is not a valid keyspace name", name)));
        }
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::persisted::JsonPersister;

    struct Order;

    impl Entity for Order {
        fn definition() -> EntityDef {
            EntityDef::new("Order", KeyspaceDef::new("shop").suffix("tenant", 0))
                .table(TableDef::new("orders").partition_key("region").clustering_key("id", ClusteringOrder::Desc).index("status"))
                .table(TableDef::new("orders_by_customer").partition_key("customer").clustering_key("id", ClusteringOrder::Asc))
                .column(ColumnDef::new("region", DeclaredType::String))
                .column(ColumnDef::new("id", DeclaredType::I64))
                .column(ColumnDef::new("tenant", DeclaredType::String).suffix("tenant"))
                .column(ColumnDef::new("customer", DeclaredType::String).mandatory())
                .column(ColumnDef::new("status", DeclaredType::Enum("Status")))
                .column(ColumnDef::new("notes", DeclaredType::Opaque("Notes")).persisted(Arc::new(JsonPersister)).tables(&["orders"]))
        }
        fn to_row(&self) -> Row { Row::new() }
        fn from_row(_row: &Row) -> Result<Self, CqlError> { Ok(Order) }
    }

    fn resolve(def: EntityDef) -> Result<EntityType, CqlError> {
        EntityType::resolve(def, &EntityRegistry::new())
    }

    fn reason(err: CqlError) -> String {
        match err {
            CqlError::InvalidEntityDefinition { reason, .. } => reason,
            other => panic!("expected an invalid definition, got {other}"),
        }
    }

    #[test]
    fn resolution_is_idempotent() {
        let first = EntityRegistry::new().resolve::<Order>().unwrap();
        for _ in 0..5 {
            let again = EntityRegistry::new().resolve::<Order>().unwrap();
            assert_eq!(*first, *again);
            assert_eq!(format!("{:?}", first), format!("{:?}", again));
        }
    }

    #[test]
    fn registry_caches_per_type() {
        let registry = EntityRegistry::new();
        let a = registry.resolve::<Order>().unwrap();
        let b = registry.resolve::<Order>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(registry.is_resolved::<Order>());
        assert_eq!(registry.resolved_count(), 1);
    }

    #[test]
    fn tables_carry_table_specific_key_flags() {
        let order = resolve(Order::definition()).unwrap();
        let orders = order.table("orders").unwrap();
        assert_eq!(orders.partition_key(0).unwrap().name, "region");
        assert_eq!(orders.clustering_key(0).unwrap().clustering_key, Some((0, ClusteringOrder::Desc)));
        assert!(orders.column("status").unwrap().index);
        assert!(orders.has_column("notes"));
        assert!(!orders.has_column("tenant"), "suffix-only columns live in the keyspace name");

        let by_customer = order.table("orders_by_customer").unwrap();
        assert_eq!(by_customer.partition_key(0).unwrap().name, "customer");
        assert!(by_customer.column("region").unwrap().partition_key.is_none());
        assert!(!by_customer.has_column("notes"));

        assert_eq!(order.suffix_key("tenant").unwrap().name, "tenant");
        assert!(order.type_key().is_none());
        assert!(matches!(order.table("missing"), Err(CqlError::UnknownTable { .. })));
        assert!(matches!(order.column("missing"), Err(CqlError::UnknownColumn { .. })));
    }

    #[test]
    fn keyspace_name_uses_suffix_values() {
        let order = resolve(Order::definition()).unwrap();
        let mut suffixes = SuffixValues::new();
        assert!(matches!(order.keyspace_name(&suffixes), Err(CqlError::MissingKeyClause { .. })));
        suffixes.insert("tenant".into(), Value::text("Acme"));
        assert_eq!(order.keyspace_name(&suffixes).unwrap(), "shop_acme");
        suffixes.insert("tenant".into(), Value::text("a-b"));
        assert!(matches!(order.keyspace_name(&suffixes), Err(CqlError::InvalidValue { .. })));
    }

    #[test]
    fn rejects_type_key_not_stored_as_text() {
        let def = EntityDef::new("Shape", KeyspaceDef::new("geo"))
            .root(&["circle"])
            .table(TableDef::new("shapes").partition_key("id"))
            .column(ColumnDef::new("id", DeclaredType::I64))
            .column(ColumnDef::new("kind", DeclaredType::I32).type_key());
        assert!(reason(resolve(def).unwrap_err()).contains("must be stored as text"));
    }

    #[test]
    fn rejects_counter_mixed_with_regular_columns() {
        let def = EntityDef::new("Stats", KeyspaceDef::new("stats"))
            .table(TableDef::new("page_views").partition_key("page"))
            .column(ColumnDef::new("page", DeclaredType::String))
            .column(ColumnDef::new("views", DeclaredType::I64).counter())
            .column(ColumnDef::new("title", DeclaredType::String));
        assert!(reason(resolve(def).unwrap_err()).contains("mixes counter"));
    }

    #[test]
    fn rejects_missing_partition_key_and_unknown_key_columns() {
        let no_key = EntityDef::new("Thing", KeyspaceDef::new("things"))
            .table(TableDef::new("things"))
            .column(ColumnDef::new("id", DeclaredType::I64));
        assert!(reason(resolve(no_key).unwrap_err()).contains("no partition key"));

        let unknown = EntityDef::new("Thing", KeyspaceDef::new("things"))
            .table(TableDef::new("things").partition_key("uuid"))
            .column(ColumnDef::new("id", DeclaredType::I64));
        assert!(reason(resolve(unknown).unwrap_err()).contains("unknown column"));

        let twice = EntityDef::new("Thing", KeyspaceDef::new("things"))
            .table(TableDef::new("things").partition_key("id").clustering_key("id", ClusteringOrder::Asc))
            .column(ColumnDef::new("id", DeclaredType::I64));
        assert!(reason(resolve(twice).unwrap_err()).contains("keyed twice"));
    }

    #[test]
    fn rejects_suffix_misconfiguration() {
        let orphan = EntityDef::new("Thing", KeyspaceDef::new("things").suffix("tenant", 0))
            .table(TableDef::new("things").partition_key("id"))
            .column(ColumnDef::new("id", DeclaredType::I64));
        assert!(reason(resolve(orphan).unwrap_err()).contains("has no column"));

        let undeclared = EntityDef::new("Thing", KeyspaceDef::new("things"))
            .table(TableDef::new("things").partition_key("id"))
            .column(ColumnDef::new("id", DeclaredType::I64))
            .column(ColumnDef::new("tenant", DeclaredType::String).suffix("tenant"));
        assert!(reason(resolve(undeclared).unwrap_err()).contains("undeclared suffix"));
    }

    #[test]
    fn set_partition_keys_become_multi_keys() {
        let def = EntityDef::new("Tagged", KeyspaceDef::new("tags"))
            .table(TableDef::new("by_tag").partition_key("tags").clustering_key("id", ClusteringOrder::Asc))
            .column(ColumnDef::new("id", DeclaredType::I64))
            .column(ColumnDef::new("tags", DeclaredType::set(DeclaredType::String)));
        let tagged = resolve(def).unwrap();
        let table = tagged.table("by_tag").unwrap();
        let tags = table.multi_key().unwrap();
        assert_eq!(tags.data_type.to_text(), "text");
        assert_eq!(tagged.column("tags").unwrap().data_type.to_text(), "set<text>");

        let list_key = EntityDef::new("Tagged", KeyspaceDef::new("tags"))
            .table(TableDef::new("by_tag").partition_key("tags"))
            .column(ColumnDef::new("tags", DeclaredType::list(DeclaredType::String)));
        assert!(reason(resolve(list_key).unwrap_err()).contains("cannot be a key"));
    }

    #[test]
    fn udt_entities_hold_no_tables() {
        let def = EntityDef::udt("address")
            .table(TableDef::new("addresses").partition_key("street"))
            .column(ColumnDef::new("street", DeclaredType::String));
        assert!(reason(resolve(def).unwrap_err()).contains("neither tables"));

        let unregistered = EntityDef::new("Customer", KeyspaceDef::new("crm"))
            .table(TableDef::new("customers").partition_key("id"))
            .column(ColumnDef::new("id", DeclaredType::I64))
            .column(ColumnDef::new("home", DeclaredType::Udt("address")));
        assert!(reason(resolve(unregistered).unwrap_err()).contains("unregistered type"));
    }

    #[test]
    fn unsupported_column_types_surface_at_resolution() {
        let def = EntityDef::new("Thing", KeyspaceDef::new("things"))
            .table(TableDef::new("things").partition_key("id"))
            .column(ColumnDef::new("id", DeclaredType::I64))
            .column(ColumnDef::new("shape", DeclaredType::Opaque("Polygon")));
        assert!(matches!(resolve(def), Err(CqlError::UnsupportedColumnType { column, .. }) if column == "shape"));
    }

    #[test]
    fn renders_replication() {
        assert_eq!(Replication::Simple(3).to_cql(), "{'class': 'SimpleStrategy', 'replication_factor': 3}");
        assert_eq!(
            Replication::NetworkTopology(vec![("dc1".into(), 3), ("dc2".into(), 2)]).to_cql(),
            "{'class': 'NetworkTopologyStrategy', 'dc1': 3, 'dc2': 2}"
        );
    }
}
