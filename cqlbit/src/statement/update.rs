use crate::codec::{self, CqlType};
use crate::error::CqlError;
use crate::exec::driver::{Expectation, Hop};
use crate::model::{ColumnInfo, EntityType, TableInfo};
use crate::statement::clause::{Clause, Clauses, Condition};
use crate::statement::{
    check_keys, expectation_of, key_clauses, render_wheres, target_tables, write_hops, Delete, Insert, QueryCache, Render,
    StatementContext, TableQuery,
};
use crate::value::{IntoValue, Row, Value};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    Set(String, Value),
    Increment(String, i64),
    Decrement(String, i64),
    Append(String, Value),
    Prepend(String, Value),
    Add(String, Value),
    Remove(String, Value),
    Put(String, Value, Value),
}

impl Assignment {
    pub fn column(&self) -> &str {
        match self {
            Assignment::Set(c, _)
            | Assignment::Increment(c, _)
            | Assignment::Decrement(c, _)
            | Assignment::Append(c, _)
            | Assignment::Prepend(c, _)
            | Assignment::Add(c, _)
            | Assignment::Remove(c, _)
            | Assignment::Put(c, _, _) => c,
        }
    }

    fn as_collection(column: &ColumnInfo, value: Value) -> Value {
        match (column.data_type.main, value) {
            (_, v) if v.is_collection() || v.is_null() => v,
            (CqlType::Set, v) => Value::Set(vec![v]),
            (_, v) => Value::List(vec![v]),
        }
    }

    fn expect(column: &ColumnInfo, types: &[CqlType], operation: &str) -> Result<(), CqlError> {
        if types.contains(&column.data_type.main) {
            Ok(())
        } else {
            Err(CqlError::invalid_value(&column.name, format!("{} is not supported on {}", operation, column.data_type)))
        }
    }

    fn render(&self, column: &ColumnInfo, bindings: &mut Vec<Value>) -> Result<String, CqlError> {
        let name = &column.name;
        if column.counter != matches!(self, Assignment::Increment(..) | Assignment::Decrement(..)) {
            return Err(CqlError::invalid_value(name, "counters are only incremented or decremented"));
        }
        Ok(match self {
            Assignment::Set(_, v) => {
                bindings.push(column.encode(v.clone())?);
                format!("{} = ?", name)
            }
            Assignment::Increment(_, by) | Assignment::Decrement(_, by) => {
                bindings.push(Value::Counter(*by));
                let sign = if matches!(self, Assignment::Increment(..)) { '+' } else { '-' };
                format!("{} = {} {} ?", name, name, sign)
            }
            Assignment::Append(_, v) | Assignment::Prepend(_, v) => {
                Self::expect(column, &[CqlType::List], "append")?;
                bindings.push(column.encode(Self::as_collection(column, v.clone()))?);
                if matches!(self, Assignment::Append(..)) {
                    format!("{} = {} + ?", name, name)
                } else {
                    format!("{} = ? + {}", name, name)
                }
            }
            Assignment::Add(_, v) => {
                Self::expect(column, &[CqlType::Set], "add")?;
                bindings.push(column.encode(Self::as_collection(column, v.clone()))?);
                format!("{} = {} + ?", name, name)
            }
            Assignment::Remove(_, v) => {
                Self::expect(column, &[CqlType::List, CqlType::Set], "remove")?;
                bindings.push(column.encode(Self::as_collection(column, v.clone()))?);
                format!("{} = {} - ?", name, name)
            }
            Assignment::Put(_, key, value) => {
                Self::expect(column, &[CqlType::Map], "put")?;
                let (Some(key_type), Some(value_type)) = (column.data_type.arguments.first(), column.data_type.element()) else {
                    return Err(CqlError::invalid_value(name, "map without type arguments"));
                };
                bindings.push(codec::encode(name, key_type, None, key.clone())?);
                bindings.push(codec::encode(name, value_type, column.persister.as_ref(), value.clone())?);
                format!("{}[?] = ?", name)
            }
        })
    }
}

/// Changes columns of existing rows, either of a known object or of rows matched by WHERE relations.
#[derive(Debug, Clone)]
pub struct Update {
    context: StatementContext,
    source: Option<Row>,
    assignments: Vec<Assignment>,
    tables: Vec<String>,
    clauses: Clauses,
    cache: QueryCache,
}

impl Update {
    /// Updates the row of `row`; without explicit assignments every updatable column is written.
    pub fn for_object(entity: Arc<EntityType>, mut row: Row) -> Self {
        if let (Some(type_name), Some(type_key)) = (entity.type_name(), entity.type_key()) {
            row.insert(&type_key.name, Value::text(type_name));
        }
        let mut update = Self::for_type(Arc::clone(&entity));
        update.context = StatementContext::for_row(entity, &row);
        update.source = Some(row);
        update
    }

    pub fn for_type(entity: Arc<EntityType>) -> Self {
        Update {
            context: StatementContext::new(entity),
            source: None,
            assignments: Vec::new(),
            tables: Vec::new(),
            clauses: Clauses::default(),
            cache: QueryCache::default(),
        }
    }

    suffix_binding!();
    ttl_option!();
    timestamp_option!();
    request_options!();

    fn assign(mut self, assignment: Assignment) -> Self {
        self.assignments.push(assignment);
        self.cache.touch();
        self
    }

    pub fn set(self, column: &str, value: impl IntoValue) -> Self {
        self.assign(Assignment::Set(column.to_string(), value.into_value()))
    }

    pub fn increment(self, column: &str, by: i64) -> Self {
        self.assign(Assignment::Increment(column.to_string(), by))
    }

    pub fn decrement(self, column: &str, by: i64) -> Self {
        self.assign(Assignment::Decrement(column.to_string(), by))
    }

    pub fn append(self, column: &str, value: impl IntoValue) -> Self {
        self.assign(Assignment::Append(column.to_string(), value.into_value()))
    }

    pub fn prepend(self, column: &str, value: impl IntoValue) -> Self {
        self.assign(Assignment::Prepend(column.to_string(), value.into_value()))
    }

    pub fn add(self, column: &str, value: impl IntoValue) -> Self {
        self.assign(Assignment::Add(column.to_string(), value.into_value()))
    }

    pub fn remove(self, column: &str, value: impl IntoValue) -> Self {
        self.assign(Assignment::Remove(column.to_string(), value.into_value()))
    }

    pub fn put(self, column: &str, key: impl IntoValue, value: impl IntoValue) -> Self {
        self.assign(Assignment::Put(column.to_string(), key.into_value(), value.into_value()))
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

    pub fn assignments(&self) -> &[Assignment] {
        &self.assignments
    }

    fn default_assignments(table: &TableInfo, source: &Row) -> Vec<Assignment> {
        table
            .columns
            .iter()
            .filter(|c| !c.is_primary_key() && !c.is_final && !c.type_key && !c.counter)
            .map(|c| Assignment::Set(c.name.clone(), source.get(&c.name).cloned().unwrap_or(Value::Null)))
            .collect()
    }

    /// A primary key column is never updated in place: the old row is deleted and the new one inserted.
    fn assigns_key(&self, entity: &EntityType) -> bool {
        self.assignments.iter().any(|a| {
            matches!(a, Assignment::Set(..))
                && entity.tables.iter().any(|t| t.column(a.column()).is_some_and(ColumnInfo::is_primary_key))
        })
    }

    fn render_key_change(&self, entity: &Arc<EntityType>) -> Result<Vec<TableQuery>, CqlError> {
        if !self.clauses.condition.is_none() {
            return Err(CqlError::ConflictingConditions("a primary key change cannot be conditional".to_string()));
        }
        let old_row = match &self.source {
            Some(row) => row.clone(),
            None => {
                let mut row = Row::new();
                for clause in &self.clauses.wheres {
                    if let Some(value) = clause.eq_value() {
                        row.insert(&clause.column, value.clone());
                    }
                }
                for (type_name, value) in self.context.suffixes() {
                    if let Some(column) = entity.suffix_key(type_name) {
                        row.insert(&column.name, value.clone());
                    }
                }
                row
            }
        };
        let mut new_row = old_row.clone();
        for assignment in &self.assignments {
            match assignment {
                Assignment::Set(column, value) => {
                    new_row.insert(column, value.clone());
                }
                other => return Err(CqlError::invalid_value(other.column(), "only plain assignments may accompany a key change")),
            }
        }
        let mut delete = Delete::for_object(Arc::clone(entity), old_row);
        let mut insert = Insert::new(Arc::clone(entity), new_row);
        for table in &self.tables {
            delete = delete.table(table);
            insert = insert.table(table);
        }
        if let Some(ts) = self.clauses.options.timestamp {
            delete = delete.timestamp(ts);
            insert = insert.timestamp(ts);
        }
        if let Some(ttl) = self.clauses.options.ttl {
            insert = insert.ttl(ttl);
        }
        for (type_name, value) in self.context.suffixes() {
            delete = delete.suffix(type_name, value.clone());
            insert = insert.suffix(type_name, value.clone());
        }
        let mut queries = delete.build()?.to_vec();
        queries.extend(insert.build()?.iter().cloned());
        Ok(queries)
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

impl Render for Update {
    fn cache(&self) -> &QueryCache {
        &self.cache
    }

    fn cache_mut(&mut self) -> &mut QueryCache {
        &mut self.cache
    }

    fn render(&mut self) -> Result<Vec<TableQuery>, CqlError> {
        self.clauses.check()?;
        let entity = Arc::clone(self.context.entity());
        for assignment in &self.assignments {
            let column = entity.column(assignment.column())?;
            if column.is_final {
                return Err(CqlError::invalid_value(&column.name, "final columns cannot be updated"));
            }
        }
        if self.assigns_key(&entity) {
            return self.render_key_change(&entity);
        }
        let keyspace = self.context.keyspace_with(&self.clauses.wheres)?;
        let using = self.clauses.options.using(true);
        let mut queries = Vec::new();
        for table in target_tables(&entity, &self.tables)? {
            let assignments = match (&self.source, self.assignments.is_empty()) {
                (Some(source), true) => Self::default_assignments(table, source),
                _ => self.assignments.iter().filter(|a| table.column(a.column()).is_some()).cloned().collect(),
            };
            if assignments.is_empty() {
                continue;
            }
            for wheres in key_clauses(&self.context, self.source.as_ref(), &self.clauses.wheres, table)? {
                if self.tables.is_empty() && wheres.iter().any(|c| !table.has_column(&c.column)) {
                    continue;
                }
                check_keys(&entity, table.primary_keys(), |k| wheres.iter().any(|c| c.column == k.name && c.binds_key()))?;
                let mut bindings = Vec::new();
                let mut sets = Vec::with_capacity(assignments.len());
                for assignment in &assignments {
                    let column = table.column(assignment.column()).ok_or_else(|| CqlError::unknown_column(&entity.name, assignment.column()))?;
                    sets.push(assignment.render(column, &mut bindings)?);
                }
                let where_text = render_wheres(&entity, table, &wheres, &mut bindings)?;
                let condition = self.clauses.render_condition(|c, operand, v| crate::statement::encode_in(&entity, table, c, operand, v), &mut bindings)?;
                let text = format!("UPDATE {}.{}{} SET {}{}{}", keyspace, table.name, using, sets.join(", "), where_text, condition);
                queries.push(TableQuery::new(&keyspace, &table.name, text, bindings));
            }
        }
        if queries.is_empty() {
            return Err(CqlError::invalid_value(&entity.name, "the update assigns no column of the targeted tables"));
        }
        Ok(queries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Entity;
    use crate::statement::eq;
    use crate::statement::fixtures::{order, resolve, Order, PageViews};

    #[test]
    fn object_update_writes_updatable_columns() {
        let mut update = Update::for_object(resolve::<Order>(), order().to_row());
        let queries = update.build().unwrap();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].text, "UPDATE shop_acme.orders SET status = ?, tags = ?, notes = ? WHERE region = ? AND id = ?");
        assert_eq!(queries[1].text, "UPDATE shop_acme.orders_by_status SET tags = ? WHERE region = ? AND status = ? AND id = ?");
    }

    #[test]
    fn typed_update_needs_the_whole_primary_key() {
        let entity = resolve::<Order>();
        let missing = Update::for_type(Arc::clone(&entity))
            .set("tags", vec!["a"])
            .where_(eq("tenant", "acme"))
            .and(eq("region", "us"))
            .table("orders")
            .build();
        assert!(matches!(missing, Err(CqlError::MissingKeyClause { missing, .. }) if missing == vec!["id".to_string()]));

        let queries = Update::for_type(entity)
            .append("tags", "b")
            .where_(eq("tenant", "acme"))
            .and(eq("region", "us"))
            .and(eq("id", 42_i64))
            .table("orders")
            .if_exists()
            .build()
            .unwrap();
        assert_eq!(queries[0].text, "UPDATE shop_acme.orders SET tags = tags + ? WHERE region = ? AND id = ? IF EXISTS");
        assert_eq!(queries[0].bindings[0], Value::List(vec![Value::text("b")]));
    }

    #[test]
    fn key_assignment_becomes_delete_then_insert() {
        let queries = Update::for_object(resolve::<Order>(), order().to_row()).set("id", 43_i64).build().unwrap();
        let texts: Vec<&str> = queries.iter().map(|q| q.text.as_str()).collect();
        assert_eq!(texts.len(), 4);
        assert!(texts[0].starts_with("DELETE FROM shop_acme.orders WHERE"));
        assert!(texts[1].starts_with("DELETE FROM shop_acme.orders_by_status WHERE"));
        assert!(texts[2].starts_with("INSERT INTO shop_acme.orders "));
        assert_eq!(queries[2].bindings[1], Value::BigInt(43));
        assert_eq!(queries[0].bindings[1], Value::BigInt(42));
    }

    #[test]
    fn final_columns_and_counter_misuse_are_rejected() {
        let final_set = Update::for_object(resolve::<Order>(), order().to_row()).set("created", chrono::Utc::now()).build();
        assert!(matches!(final_set, Err(CqlError::InvalidValue { column, .. }) if column == "created"));

        let counter = resolve::<PageViews>();
        let queries = Update::for_type(Arc::clone(&counter)).increment("views", 3).where_(eq("page", "/")).build().unwrap();
        assert_eq!(queries[0].text, "UPDATE stats.page_views SET views = views + ? WHERE page = ?");
        let plain = Update::for_type(counter).set("views", 3_i64).where_(eq("page", "/")).build();
        assert!(matches!(plain, Err(CqlError::InvalidValue { .. })));
    }

    #[test]
    fn conflicting_conditions_fail_the_build() {
        let update = Update::for_object(resolve::<Order>(), order().to_row()).if_exists().only_if(eq("status", "OPEN"));
        assert!(matches!(update.clone().build(), Err(CqlError::ConflictingConditions(_))));
    }
}
