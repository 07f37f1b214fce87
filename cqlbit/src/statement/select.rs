use crate::error::CqlError;
use crate::exec::driver::{Expectation, Hop, Request};
use crate::exec::result::Decoding;
use crate::model::{ClusteringOrder, EntityType, TableInfo};
use crate::statement::clause::{Clause, Clauses};
use crate::statement::{check_keys, render_wheres, target_tables, QueryCache, Render, StatementContext, TableQuery};
use std::sync::Arc;

/// Reads rows of an entity. It is rendered for every table able to answer the relations and
/// executed against the first of them.
#[derive(Debug, Clone)]
pub struct Select {
    context: StatementContext,
    columns: Vec<String>,
    limit: Option<u32>,
    order_by: Vec<(String, ClusteringOrder)>,
    allow_filtering: bool,
    tables: Vec<String>,
    clauses: Clauses,
    cache: QueryCache,
}

impl Select {
    pub fn new(entity: Arc<EntityType>) -> Self {
        Select {
            context: StatementContext::new(entity),
            columns: Vec::new(),
            limit: None,
            order_by: Vec::new(),
            allow_filtering: false,
            tables: Vec::new(),
            clauses: Clauses::default(),
            cache: QueryCache::default(),
        }
    }

    suffix_binding!();
    request_options!();

    /// Projects these columns instead of `*`.
    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns.extend(columns.iter().map(|c| c.to_string()));
        self.cache.touch();
        self
    }

    pub fn where_(mut self, clause: Clause) -> Self {
        self.clauses.push_where(clause);
        self.cache.touch();
        self
    }

    pub fn and(self, clause: Clause) -> Self {
        self.where_(clause)
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self.cache.touch();
        self
    }

    pub fn order_by(mut self, column: &str, order: ClusteringOrder) -> Self {
        self.order_by.push((column.to_string(), order));
        self.cache.touch();
        self
    }

    pub fn allow_filtering(mut self) -> Self {
        self.allow_filtering = true;
        self.cache.touch();
        self
    }

    pub fn table(mut self, table: &str) -> Self {
        self.tables.push(table.to_string());
        self.cache.touch();
        self
    }

    pub fn build(&mut self) -> Result<Arc<[TableQuery]>, CqlError> {
        self.build_cached()
    }

    fn relations(&self) -> Vec<Clause> {
        self.clauses.wheres.iter().filter(|c| !self.context.is_suffix_column(&c.column)).cloned().collect()
    }

    fn answers(&self, table: &TableInfo, relations: &[Clause]) -> bool {
        relations.iter().all(|c| table.has_column(&c.column))
            && self.columns.iter().all(|c| table.has_column(c) || self.context.is_suffix_column(c))
            && self.order_by.iter().all(|(c, _)| table.column(c).is_some_and(|c| c.clustering_key.is_some()))
    }

    fn check_partition(&self, entity: &EntityType, table: &TableInfo, relations: &[Clause]) -> Result<(), CqlError> {
        if self.allow_filtering {
            return Ok(());
        }
        check_keys(entity, table.partition_keys(), |k| relations.iter().any(|c| c.column == k.name && c.binds_key()))
    }

    pub(crate) fn compile(&mut self) -> Result<Vec<Hop>, CqlError> {
        let queries = self.build_cached()?;
        let Some(first) = queries.first() else {
            return Ok(Vec::new());
        };
        let decoding = Decoding {
            entity: Arc::clone(self.context.entity()),
            table: first.table.clone(),
            suffixes: self.context.suffix_columns(&self.clauses.wheres),
        };
        let request =
            Request { keyspace: first.keyspace.clone(), queries: vec![first.to_raw()?], batch: None, options: self.clauses.options.clone() };
        Ok(vec![Hop { request, expectation: Expectation::Plain, decoding: Some(decoding) }])
    }
}

impl Render for Select {
    fn cache(&self) -> &QueryCache {
        &self.cache
    }

    fn cache_mut(&mut self) -> &mut QueryCache {
        &mut self.cache
    }

    fn render(&mut self) -> Result<Vec<TableQuery>, CqlError> {
        let entity = Arc::clone(self.context.entity());
        for name in self.clauses.wheres.iter().map(|c| &c.column).chain(&self.columns).chain(self.order_by.iter().map(|(c, _)| c)) {
            entity.column(name)?;
        }
        let keyspace = self.context.keyspace_with(&self.clauses.wheres)?;
        let relations = self.relations();
        let tables = target_tables(&entity, &self.tables)?;

        let candidates: Vec<&TableInfo> = tables
            .iter()
            .copied()
            .filter(|t| self.answers(t, &relations) && self.check_partition(&entity, t, &relations).is_ok())
            .collect();
        if candidates.is_empty() {
            return Err(match tables.iter().find(|t| self.answers(t, &relations)) {
                Some(table) => match self.check_partition(&entity, table, &relations) {
                    Err(missing) => missing,
                    Ok(()) => CqlError::invalid_value(&entity.name, "no table answers the select"),
                },
                None => CqlError::invalid_value(&entity.name, "no table holds every selected column and relation"),
            });
        }

        let projection = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns.iter().filter(|c| !self.context.is_suffix_column(c)).cloned().collect::<Vec<_>>().join(", ")
        };
        let mut queries = Vec::with_capacity(candidates.len());
        for table in candidates {
            let mut bindings = Vec::new();
            let mut text = format!("SELECT {} FROM {}.{}", projection, keyspace, table.name);
            text.push_str(&render_wheres(&entity, table, &relations, &mut bindings)?);
            if !self.order_by.is_empty() {
                let order: Vec<String> = self.order_by.iter().map(|(c, o)| format!("{} {}", c, o.as_cql())).collect();
                text.push_str(&format!(" ORDER BY {}", order.join(", ")));
            }
            if let Some(limit) = self.limit {
                text.push_str(&format!(" LIMIT {}", limit));
            }
            if self.allow_filtering {
                text.push_str(" ALLOW FILTERING");
            }
            queries.push(TableQuery::new(&keyspace, &table.name, text, bindings));
        }
        Ok(queries)
    }
}
