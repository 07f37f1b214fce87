//! Statement builders. Every builder renders one query per affected table, caches the rendering and
//! drops the cache on the next mutation.

macro_rules! ttl_option {
    () => {
        /// Time-to-live of the written cells, in seconds.
        pub fn ttl(mut self, seconds: u32) -> Self {
            self.clauses.options.ttl = Some(seconds);
            self.cache.touch();
            self
        }
    };
}

macro_rules! timestamp_option {
    () => {
        /// Write timestamp in microseconds.
        pub fn timestamp(mut self, micros: i64) -> Self {
            self.clauses.options.timestamp = Some(micros);
            self.cache.touch();
            self
        }
    };
}

macro_rules! request_options {
    () => {
        pub fn consistency(mut self, level: $crate::settings::Consistency) -> Self {
            self.clauses.options.consistency = Some(level);
            self.cache.touch();
            self
        }

        pub fn serial_consistency(mut self, level: $crate::settings::Consistency) -> Self {
            self.clauses.options.serial_consistency = Some(level);
            self.cache.touch();
            self
        }

        pub fn fetch_size(mut self, size: u32) -> Self {
            self.clauses.options.fetch_size = Some(size);
            self.cache.touch();
            self
        }

        pub fn tracing(mut self) -> Self {
            self.clauses.options.tracing = true;
            self.cache.touch();
            self
        }

        pub fn idempotent(mut self, idempotent: bool) -> Self {
            self.clauses.options.idempotent = Some(idempotent);
            self.cache.touch();
            self
        }

        pub fn options(&self) -> &$crate::statement::clause::Options {
            &self.clauses.options
        }
    };
}

macro_rules! suffix_binding {
    () => {
        /// Binds a suffix key, selecting the keyspace the statement runs in.
        pub fn suffix(mut self, type_name: &str, value: impl $crate::value::IntoValue) -> Self {
            self.context.bind_suffix(type_name, value.into_value());
            self.cache.touch();
            self
        }

        pub fn context(&self) -> &$crate::statement::StatementContext {
            &self.context
        }
    };
}

pub mod clause;
pub mod ddl;
pub mod delete;
pub mod group;
pub mod insert;
pub mod schema;
pub mod select;
pub mod update;

pub use clause::{contains, contains_key, eq, gt, gte, in_, lt, lte, Clause, Clauses, Condition, FilterOp, Operand, Options};
pub use ddl::{AlterTable, CreateIndex, CreateKeyspace, CreateTable, CreateType, Truncate};
pub use delete::Delete;
pub use group::{Batch, Sequence};
pub use insert::Insert;
pub use schema::CreateSchema;
pub use select::Select;
pub use update::{Assignment, Update};

use crate::error::CqlError;
use crate::exec::driver::{BatchKind, Expectation, Hop, Request};
use crate::model::{ColumnInfo, EntityType, SuffixValues, TableInfo};
use crate::value::{Row, Value};
use std::sync::Arc;

/// One rendered query against one table, with its bind values in marker order.
#[derive(Debug, Clone, PartialEq)]
pub struct TableQuery {
    pub keyspace: String,
    pub table: String,
    pub text: String,
    pub bindings: Vec<Value>,
}

impl TableQuery {
    pub(crate) fn new(keyspace: &str, table: &str, text: String, bindings: Vec<Value>) -> Self {
        TableQuery { keyspace: keyspace.to_string(), table: table.to_string(), text, bindings }
    }

    /// Bindings in their stored representation; persisted wrappers run their converter here.
    pub fn to_raw(&self) -> Result<TableQuery, CqlError> {
        Ok(TableQuery {
            bindings: self.bindings.iter().map(Value::to_raw).collect::<Result<_, _>>()?,
            ..self.clone()
        })
    }
}

/// Revision counter plus the rendering built at a given revision.
#[derive(Debug, Clone, Default)]
pub(crate) struct QueryCache {
    revision: u64,
    built: Option<(u64, Arc<[TableQuery]>)>,
}

impl QueryCache {
    pub fn touch(&mut self) {
        self.revision += 1;
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn cached(&self, token: u64) -> Option<Arc<[TableQuery]>> {
        match &self.built {
            Some((built_at, queries)) if *built_at == token => Some(Arc::clone(queries)),
            _ => None,
        }
    }

    fn store(&mut self, token: u64, queries: Vec<TableQuery>) -> Arc<[TableQuery]> {
        let queries: Arc<[TableQuery]> = queries.into();
        self.built = Some((token, Arc::clone(&queries)));
        queries
    }
}

pub(crate) trait Render {
    fn cache(&self) -> &QueryCache;

    fn cache_mut(&mut self) -> &mut QueryCache;

    fn render(&mut self) -> Result<Vec<TableQuery>, CqlError>;

    /// Version the cached rendering is valid for; groups fold in their children's tokens.
    fn token(&self) -> u64 {
        self.cache().revision()
    }

    fn build_cached(&mut self) -> Result<Arc<[TableQuery]>, CqlError> {
        let token = self.token();
        if let Some(hit) = self.cache().cached(token) {
            return Ok(hit);
        }
        let queries = self.render()?;
        Ok(self.cache_mut().store(token, queries))
    }
}

/// Binds an entity type to suffix values, and so to one concrete keyspace.
#[derive(Debug, Clone)]
pub struct StatementContext {
    entity: Arc<EntityType>,
    suffixes: SuffixValues,
}

impl StatementContext {
    pub fn new(entity: Arc<EntityType>) -> Self {
        StatementContext { entity, suffixes: SuffixValues::new() }
    }

    /// Takes suffix values from the object's own suffix columns.
    pub fn for_row(entity: Arc<EntityType>, row: &Row) -> Self {
        let mut context = StatementContext::new(entity);
        for suffix in &context.entity.keyspace.suffixes {
            if let Some(value) = row.get(&suffix.column).filter(|v| !v.is_null()) {
                context.suffixes.insert(suffix.type_name.clone(), value.clone());
            }
        }
        context
    }

    pub fn entity(&self) -> &Arc<EntityType> {
        &self.entity
    }

    pub fn suffixes(&self) -> &SuffixValues {
        &self.suffixes
    }

    pub fn bind_suffix(&mut self, type_name: &str, value: Value) {
        self.suffixes.insert(type_name.to_string(), value);
    }

    pub fn is_suffix_column(&self, column: &str) -> bool {
        self.entity.keyspace.suffixes.iter().any(|s| s.column == column)
    }

    /// Suffix values, extended with suffix columns pinned by WHERE relations.
    pub fn suffixes_with(&self, wheres: &[Clause]) -> SuffixValues {
        let mut suffixes = self.suffixes.clone();
        for suffix in &self.entity.keyspace.suffixes {
            if let Some(value) = wheres.iter().filter(|c| c.column == suffix.column).find_map(Clause::eq_value) {
                suffixes.insert(suffix.type_name.clone(), value.clone());
            }
        }
        suffixes
    }

    pub fn keyspace(&self) -> Result<String, CqlError> {
        self.entity.keyspace_name(&self.suffixes)
    }

    pub fn keyspace_with(&self, wheres: &[Clause]) -> Result<String, CqlError> {
        self.entity.keyspace_name(&self.suffixes_with(wheres))
    }

    /// Suffix column values to hand back with decoded rows.
    pub(crate) fn suffix_columns(&self, wheres: &[Clause]) -> Vec<(String, Value)> {
        let suffixes = self.suffixes_with(wheres);
        self.entity
            .keyspace
            .suffixes
            .iter()
            .filter_map(|s| suffixes.get(&s.type_name).map(|v| (s.column.clone(), v.clone())))
            .collect()
    }

    pub fn initial_objects(&self) -> Vec<Row> {
        match self.entity.initial_objects {
            Some(objects) => objects(&self.suffixes),
            None => Vec::new(),
        }
    }
}

/// Tables a statement touches: the named ones, or all of them.
pub(crate) fn target_tables<'a>(entity: &'a EntityType, only: &[String]) -> Result<Vec<&'a TableInfo>, CqlError> {
    if entity.tables.is_empty() {
        return Err(CqlError::UnknownTable { entity: entity.name.clone(), table: only.first().cloned().unwrap_or_default() });
    }
    if only.is_empty() {
        return Ok(entity.tables.iter().collect());
    }
    only.iter().map(|name| entity.table(name)).collect()
}

pub(crate) fn check_keys<'a>(
    entity: &EntityType,
    keys: impl Iterator<Item = &'a ColumnInfo>,
    bound: impl Fn(&ColumnInfo) -> bool,
) -> Result<(), CqlError> {
    let missing: Vec<String> = keys.filter(|c| !bound(c)).map(|c| c.name.clone()).collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(CqlError::MissingKeyClause { entity: entity.name.clone(), missing })
    }
}

pub(crate) fn encode_in(
    entity: &EntityType,
    table: &TableInfo,
    column: &str,
    operand: Operand,
    value: Value,
) -> Result<Value, CqlError> {
    let column = table.column(column).ok_or_else(|| CqlError::unknown_column(&entity.name, column))?;
    match operand {
        Operand::Column => column.encode(value),
        Operand::Element => column.encode_element(value),
        Operand::Key => column.encode_key(value),
    }
}

/// One row per element of the table's multi-key column; a single row otherwise.
pub(crate) fn expand_multi_key(table: &TableInfo, row: &Row) -> Result<Vec<Row>, CqlError> {
    let Some(multi) = table.multi_key() else {
        return Ok(vec![row.clone()]);
    };
    match row.get(&multi.name).map(Value::resolved).transpose()? {
        Some(Value::Set(items)) | Some(Value::List(items)) => Ok(items
            .into_iter()
            .map(|item| {
                let mut expanded = row.clone();
                expanded.insert(&multi.name, item);
                expanded
            })
            .collect()),
        _ => Ok(vec![row.clone()]),
    }
}

/// Key relations for one table: taken from the source object when there is one, with explicit
/// relations taking precedence. A multi-key table yields one relation set per element.
pub(crate) fn key_clauses(
    context: &StatementContext,
    source: Option<&Row>,
    wheres: &[Clause],
    table: &TableInfo,
) -> Result<Vec<Vec<Clause>>, CqlError> {
    let explicit: Vec<Clause> = wheres.iter().filter(|c| !context.is_suffix_column(&c.column)).cloned().collect();
    let Some(source) = source else {
        return Ok(vec![explicit]);
    };
    let mut expanded = Vec::new();
    for row in expand_multi_key(table, source)? {
        let mut clauses: Vec<Clause> = table
            .primary_keys()
            .filter(|k| !explicit.iter().any(|c| c.column == k.name))
            .filter_map(|k| row.get(&k.name).filter(|v| !v.is_null()).map(|v| eq(&k.name, v.clone())))
            .collect();
        clauses.extend(explicit.iter().cloned());
        expanded.push(clauses);
    }
    Ok(expanded)
}

/// Renders `AND`-joined relations for the clauses that apply to `table`.
pub(crate) fn render_wheres(
    entity: &EntityType,
    table: &TableInfo,
    wheres: &[Clause],
    bindings: &mut Vec<Value>,
) -> Result<String, CqlError> {
    let mut rendered = Vec::with_capacity(wheres.len());
    for clause in wheres {
        rendered.push(clause.render(|operand, v| encode_in(entity, table, &clause.column, operand, v), bindings)?);
    }
    Ok(if rendered.is_empty() { String::new() } else { format!(" WHERE {}", rendered.join(" AND ")) })
}

pub(crate) fn expectation_of(condition: &Condition) -> Expectation {
    match condition {
        Condition::None => Expectation::Plain,
        Condition::IfNotExists => Expectation::NotExists,
        Condition::IfExists => Expectation::Exists,
        Condition::Only(_) => Expectation::Condition,
    }
}

/// Writes touching several tables travel as one logged batch.
pub(crate) fn write_hops(
    queries: &[TableQuery],
    options: &Options,
    expectation: Expectation,
    counter: bool,
) -> Result<Vec<Hop>, CqlError> {
    let Some(first) = queries.first() else {
        return Ok(Vec::new());
    };
    let batch = match (queries.len(), counter) {
        (1, _) => None,
        (_, true) => Some(BatchKind::Counter),
        (_, false) => Some(BatchKind::Logged),
    };
    let request = Request {
        keyspace: first.keyspace.clone(),
        queries: queries.iter().map(TableQuery::to_raw).collect::<Result<_, _>>()?,
        batch,
        options: options.clone(),
    };
    Ok(vec![Hop { request, expectation, decoding: None }])
}

/// Schema statements cannot be batched: one hop per query.
pub(crate) fn schema_hops(queries: &[TableQuery]) -> Result<Vec<Hop>, CqlError> {
    queries
        .iter()
        .map(|q| {
            Ok(Hop {
                request: Request { keyspace: q.keyspace.clone(), queries: vec![q.to_raw()?], batch: None, options: Options::default() },
                expectation: Expectation::Plain,
                decoding: None,
            })
        })
        .collect()
}

#[derive(Debug, Clone)]
pub enum Statement {
    Insert(Insert),
    Update(Update),
    Delete(Delete),
    Select(Select),
    CreateKeyspace(CreateKeyspace),
    CreateType(CreateType),
    CreateTable(CreateTable),
    CreateIndex(CreateIndex),
    AlterTable(AlterTable),
    Truncate(Truncate),
    CreateSchema(CreateSchema),
    Batch(Batch),
    Sequence(Sequence),
}

macro_rules! each_statement {
    ($self:expr, $s:ident => $body:expr) => {
        match $self {
            Statement::Insert($s) => $body,
            Statement::Update($s) => $body,
            Statement::Delete($s) => $body,
            Statement::Select($s) => $body,
            Statement::CreateKeyspace($s) => $body,
            Statement::CreateType($s) => $body,
            Statement::CreateTable($s) => $body,
            Statement::CreateIndex($s) => $body,
            Statement::AlterTable($s) => $body,
            Statement::Truncate($s) => $body,
            Statement::CreateSchema($s) => $body,
            Statement::Batch($s) => $body,
            Statement::Sequence($s) => $body,
        }
    };
}

impl Statement {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Statement::Insert(_) => "insert",
            Statement::Update(_) => "update",
            Statement::Delete(_) => "delete",
            Statement::Select(_) => "select",
            Statement::CreateKeyspace(_) => "create keyspace",
            Statement::CreateType(_) => "create type",
            Statement::CreateTable(_) => "create table",
            Statement::CreateIndex(_) => "create index",
            Statement::AlterTable(_) => "alter table",
            Statement::Truncate(_) => "truncate",
            Statement::CreateSchema(_) => "create schema",
            Statement::Batch(_) => "batch",
            Statement::Sequence(_) => "sequence",
        }
    }

    /// Renders the per-table queries, reusing the cached rendering until the statement changes.
    pub fn build(&mut self) -> Result<Arc<[TableQuery]>, CqlError> {
        each_statement!(self, s => s.build_cached())
    }

    pub fn is_cached(&self) -> bool {
        each_statement!(self, s => s.cache().cached(s.token()).is_some())
    }

    pub(crate) fn token(&self) -> u64 {
        each_statement!(self, s => s.token())
    }

    /// Drops cached renderings, recursively for groups.
    pub fn invalidate(&mut self) {
        match self {
            Statement::Batch(b) => b.invalidate(),
            Statement::Sequence(s) => s.invalidate(),
            other => each_statement!(other, s => s.cache_mut().touch()),
        }
    }

    pub fn is_counter(&self) -> bool {
        match self {
            Statement::Insert(s) => s.context().entity().is_counter(),
            Statement::Update(s) => s.context().entity().is_counter(),
            Statement::Delete(s) => s.context().entity().is_counter(),
            Statement::Batch(b) => b.is_counter(),
            _ => false,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, Statement::Insert(_) | Statement::Update(_) | Statement::Delete(_))
    }

    /// Keyspace of the first rendered query.
    pub fn keyspace(&mut self) -> Result<Option<String>, CqlError> {
        Ok(self.build()?.first().map(|q| q.keyspace.clone()))
    }

    pub(crate) fn compile(&mut self) -> Result<Vec<Hop>, CqlError> {
        match self {
            Statement::Insert(s) => s.compile(),
            Statement::Update(s) => s.compile(),
            Statement::Delete(s) => s.compile(),
            Statement::Select(s) => s.compile(),
            Statement::CreateSchema(s) => s.compile(),
            Statement::Batch(s) => s.compile(),
            Statement::Sequence(s) => s.compile(),
            other => {
                let queries = other.build()?;
                schema_hops(&queries)
            }
        }
    }
}

macro_rules! statement_from {
    ($($variant:ident),+) => {
        $(impl From<$variant> for Statement {
            fn from(statement: $variant) -> Self {
                Statement::$variant(statement)
            }
        })+
    };
}

statement_from!(Insert, Update, Delete, Select, CreateKeyspace, CreateType, CreateTable, CreateIndex, AlterTable, Truncate, CreateSchema, Batch, Sequence);
