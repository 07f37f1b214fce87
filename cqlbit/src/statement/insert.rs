use crate::error::CqlError;
use crate::exec::driver::{Expectation, Hop};
use crate::model::{ColumnInfo, EntityType};
use crate::statement::clause::{Clauses, Condition};
use crate::statement::{
    check_keys, expand_multi_key, expectation_of, target_tables, write_hops, QueryCache, Render, StatementContext, TableQuery,
};
use crate::codec::CqlType;
use crate::value::{IntoValue, Row, Value};
use std::sync::Arc;

/// Writes a whole row into every table of its entity.
#[derive(Debug, Clone)]
pub struct Insert {
    context: StatementContext,
    row: Row,
    columns: Option<Vec<String>>,
    excluded: Vec<String>,
    tables: Vec<String>,
    clauses: Clauses,
    cache: QueryCache,
}

impl Insert {
    pub fn new(entity: Arc<EntityType>, mut row: Row) -> Self {
        if let (Some(type_name), Some(type_key)) = (entity.type_name(), entity.type_key()) {
            row.insert(&type_key.name, Value::text(type_name));
        }
        Insert {
            context: StatementContext::for_row(Arc::clone(&entity), &row),
            row,
            columns: None,
            excluded: Vec::new(),
            tables: Vec::new(),
            clauses: Clauses::default(),
            cache: QueryCache::default(),
        }
    }

    suffix_binding!();
    ttl_option!();
    timestamp_option!();
    request_options!();

    pub fn row(&self) -> &Row {
        &self.row
    }

    /// Writes only these columns, besides keys and mandatory columns.
    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = Some(columns.iter().map(|c| c.to_string()).collect());
        self.cache.touch();
        self
    }

    pub fn exclude(mut self, columns: &[&str]) -> Self {
        self.excluded.extend(columns.iter().map(|c| c.to_string()));
        self.cache.touch();
        self
    }

    pub fn table(mut self, table: &str) -> Self {
        self.tables.push(table.to_string());
        self.cache.touch();
        self
    }

    pub fn value(mut self, column: &str, value: impl IntoValue) -> Self {
        self.row.insert(column, value);
        self.cache.touch();
        self
    }

    pub fn if_not_exists(mut self) -> Self {
        self.clauses.set_condition(Condition::IfNotExists);
        self.cache.touch();
        self
    }

    fn includes(&self, column: &ColumnInfo) -> bool {
        if column.is_primary_key() || column.mandatory || column.type_key {
            return true;
        }
        match &self.columns {
            Some(selected) => selected.contains(&column.name),
            None => !self.excluded.contains(&column.name),
        }
    }

    fn value_for(column: &ColumnInfo, row: &Row) -> Result<Value, CqlError> {
        let value = row.get(&column.name).cloned().unwrap_or(Value::Null);
        if !value.is_null() || !column.mandatory || column.is_primary_key() {
            return Ok(value);
        }
        match column.data_type.main {
            CqlType::List => Ok(Value::List(Vec::new())),
            CqlType::Set => Ok(Value::Set(Vec::new())),
            CqlType::Map => Ok(Value::Map(Vec::new())),
            _ => Err(CqlError::invalid_value(&column.name, "mandatory column is null")),
        }
    }

    pub fn build(&mut self) -> Result<Arc<[TableQuery]>, CqlError> {
        self.build_cached()
    }

    pub(crate) fn expectation(&self) -> Expectation {
        expectation_of(&self.clauses.condition)
    }

    pub(crate) fn compile(&mut self) -> Result<Vec<Hop>, CqlError> {
        let queries = self.build_cached()?;
        write_hops(&queries, &self.clauses.options, self.expectation(), false)
    }
}

impl Render for Insert {
    fn cache(&self) -> &QueryCache {
        &self.cache
    }

    fn cache_mut(&mut self) -> &mut QueryCache {
        &mut self.cache
    }

    fn render(&mut self) -> Result<Vec<TableQuery>, CqlError> {
        self.clauses.check()?;
        if !matches!(self.clauses.condition, Condition::None | Condition::IfNotExists) {
            return Err(CqlError::ConflictingConditions("inserts only support IF NOT EXISTS".to_string()));
        }
        let entity = Arc::clone(self.context.entity());
        for name in self.columns.iter().flatten().chain(self.excluded.iter()) {
            entity.column(name)?;
        }
        let keyspace = self.context.keyspace()?;
        let mut queries = Vec::new();
        for table in target_tables(&entity, &self.tables)? {
            if table.counter {
                return Err(CqlError::invalid_value(&table.name, "counter tables are written by updates"));
            }
            let chosen: Vec<&ColumnInfo> = table.columns.iter().filter(|c| self.includes(c)).collect();
            let rows = expand_multi_key(table, &self.row)?;
            if rows.is_empty() {
                let missing = table.multi_key().map(|c| c.name.clone()).into_iter().collect();
                return Err(CqlError::MissingKeyClause { entity: entity.name.clone(), missing });
            }
            for row in rows {
                check_keys(&entity, table.primary_keys(), |c| row.get(&c.name).is_some_and(|v| !v.is_null()))?;
                let mut names = Vec::with_capacity(chosen.len());
                let mut bindings = Vec::with_capacity(chosen.len());
                for column in &chosen {
                    names.push(column.name.as_str());
                    bindings.push(column.encode(Self::value_for(column, &row)?)?);
                }
                let markers = vec!["?"; names.len()].join(", ");
                let condition = self.clauses.render_condition(|_, _, v| Ok(v), &mut bindings)?;
                let text = format!(
                    "INSERT INTO {}.{} ({}) VALUES ({}){}{}",
                    keyspace,
                    table.name,
                    names.join(", "),
                    markers,
                    condition,
                    self.clauses.options.using(true)
                );
                queries.push(TableQuery::new(&keyspace, &table.name, text, bindings));
            }
        }
        Ok(queries)
    }
}
