use crate::error::CqlError;
use crate::exec::driver::{Expectation, Hop};
use crate::model::EntityType;
use crate::statement::clause::{Clause, Clauses, Condition};
use crate::statement::{
    check_keys, encode_in, expectation_of, key_clauses, render_wheres, target_tables, write_hops, QueryCache, Render, StatementContext,
    TableQuery,
};
use crate::value::{Row, Value};
use std::sync::Arc;

/// Removes rows, or single columns of rows, from every table of an entity.
#[derive(Debug, Clone)]
pub struct Delete {
    context: StatementContext,
    source: Option<Row>,
    columns: Vec<String>,
    tables: Vec<String>,
    clauses: Clauses,
    cache: QueryCache,
}

impl Delete {
    pub fn for_object(entity: Arc<EntityType>, mut row: Row) -> Self {
        if let (Some(type_name), Some(type_key)) = (entity.type_name(), entity.type_key()) {
            row.insert(&type_key.name, Value::text(type_name));
        }
        let mut delete = Self::for_type(Arc::clone(&entity));
        delete.context = StatementContext::for_row(entity, &row);
        delete.source = Some(row);
        delete
    }

    pub fn for_type(entity: Arc<EntityType>) -> Self {
        Delete {
            context: StatementContext::new(entity),
            source: None,
            columns: Vec::new(),
            tables: Vec::new(),
            clauses: Clauses::default(),
            cache: QueryCache::default(),
        }
    }

    suffix_binding!();
    timestamp_option!();
    request_options!();

    /// Deletes only these columns instead of whole rows.
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

    pub fn table(mut self, table: &str) -> Self {
        self.tables.push(table.to_string());
        self.cache.touch();
        self
    }

    pub fn if_exists(mut self) -> Self {
        self.clauses.set_condition(Condition::IfExists);
        self.cache.touch();
        self
    }

    pub fn only_if(mut self, clause: Clause) -> Self {
        self.clauses.set_condition(Condition::Only(vec![clause]));
        self.cache.touch();
        self
    }

    pub fn build(&mut self) -> Result<Arc<[TableQuery]>, CqlError> {
        self.build_cached()
    }

    pub(crate) fn expectation(&self) -> Expectation {
        expectation_of(&self.clauses.condition)
    }

    pub(crate) fn compile(&mut self) -> Result<Vec<Hop>, CqlError> {
        let queries = self.build_cached()?;
        let counter = self.context.entity().is_counter();
        write_hops(&queries, &self.clauses.options, self.expectation(), counter)
    }
}

impl Render for Delete {
    fn cache(&self) -> &QueryCache {
        &self.cache
    }

    fn cache_mut(&mut self) -> &mut QueryCache {
        &mut self.cache
    }

    fn render(&mut self) -> Result<Vec<TableQuery>, CqlError> {
        self.clauses.check()?;
        if self.clauses.condition == Condition::IfNotExists {
            return Err(CqlError::ConflictingConditions("deletes do not support IF NOT EXISTS".to_string()));
        }
        let entity = Arc::clone(self.context.entity());
        for column in &self.columns {
            entity.column(column)?;
        }
        let keyspace = self.context.keyspace_with(&self.clauses.wheres)?;
        let using = self.clauses.options.using(false);
        let mut queries = Vec::new();
        for table in target_tables(&entity, &self.tables)? {
            let columns: Vec<&str> = self.columns.iter().filter(|c| table.has_column(c)).map(String::as_str).collect();
            if !self.columns.is_empty() && columns.is_empty() {
                continue;
            }
            for wheres in key_clauses(&self.context, self.source.as_ref(), &self.clauses.wheres, table)? {
                if self.tables.is_empty() && wheres.iter().any(|c| !table.has_column(&c.column)) {
                    continue;
                }
                check_keys(&entity, table.primary_keys(), |k| wheres.iter().any(|c| c.column == k.name && c.binds_key()))?;
                let mut bindings: Vec<Value> = Vec::new();
                let where_text = render_wheres(&entity, table, &wheres, &mut bindings)?;
                let condition = self.clauses.render_condition(|c, operand, v| encode_in(&entity, table, c, operand, v), &mut bindings)?;
                let targets = if columns.is_empty() { String::new() } else { format!(" {}", columns.join(", ")) };
                let text = format!("DELETE{} FROM {}.{}{}{}{}", targets, keyspace, table.name, using, where_text, condition);
                queries.push(TableQuery::new(&keyspace, &table.name, text, bindings));
            }
        }
        if queries.is_empty() {
            let stray = self.clauses.wheres.iter().find(|c| !entity.tables.iter().any(|t| t.has_column(&c.column)));
            return Err(match stray {
                Some(clause) => CqlError::unknown_column(&entity.name, &clause.column),
                None => CqlError::invalid_value(&entity.name, "no table holds every deleted column and relation"),
            });
        }
        Ok(queries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Entity;
    use crate::statement::eq;
    use crate::statement::fixtures::{order, resolve, Order};

    #[test]
    fn object_delete_targets_every_table() {
        let queries = Delete::for_object(resolve::<Order>(), order().to_row()).timestamp(99).build().unwrap();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].text, "DELETE FROM shop_acme.orders USING TIMESTAMP 99 WHERE region = ? AND id = ?");
        assert_eq!(queries[1].text, "DELETE FROM shop_acme.orders_by_status USING TIMESTAMP 99 WHERE region = ? AND status = ? AND id = ?");
    }

    #[test]
    fn typed_delete_requires_keys_and_suffixes() {
        let entity = resolve::<Order>();
        let no_tenant = Delete::for_type(Arc::clone(&entity)).where_(eq("region", "us")).and(eq("id", 1_i64)).table("orders").build();
        assert!(matches!(no_tenant, Err(CqlError::MissingKeyClause { missing, .. }) if missing == vec!["tenant".to_string()]));

        let no_id = Delete::for_type(Arc::clone(&entity)).suffix("tenant", "acme").where_(eq("region", "us")).table("orders").build();
        assert!(matches!(no_id, Err(CqlError::MissingKeyClause { missing, .. }) if missing == vec!["id".to_string()]));

        let queries = Delete::for_type(entity)
            .suffix("tenant", "acme")
            .columns(&["notes"])
            .where_(eq("region", "us"))
            .and(eq("id", 1_i64))
            .only_if(eq("status", "OPEN"))
            .build()
            .unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].text, "DELETE notes FROM shop_acme.orders WHERE region = ? AND id = ? IF status = ?");
        assert_eq!(queries[0].bindings.len(), 3);
    }
}
