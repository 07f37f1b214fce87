use crate::error::CqlError;
use crate::model::{ColumnInfo, EntityType, Replication, TableInfo};
use crate::statement::{target_tables, QueryCache, Render, StatementContext, TableQuery};
use std::sync::Arc;

fn column_definitions<'a>(columns: impl Iterator<Item = &'a ColumnInfo>) -> Vec<String> {
    columns.map(|c| format!("{} {}", c.name, c.data_type.to_text())).collect()
}

fn primary_key(table: &TableInfo) -> String {
    let partition: Vec<&str> = table.partition_keys().map(|c| c.name.as_str()).collect();
    let mut key = format!("({})", partition.join(", "));
    for clustering in table.clustering_keys() {
        key.push_str(", ");
        key.push_str(&clustering.name);
    }
    key
}

macro_rules! ddl_render {
    ($statement:ident) => {
        impl $statement {
            pub fn build(&mut self) -> Result<Arc<[TableQuery]>, CqlError> {
                self.build_cached()
            }
        }

        impl Render for $statement {
            fn cache(&self) -> &QueryCache {
                &self.cache
            }

            fn cache_mut(&mut self) -> &mut QueryCache {
                &mut self.cache
            }

            fn render(&mut self) -> Result<Vec<TableQuery>, CqlError> {
                self.queries()
            }
        }
    };
}

#[derive(Debug, Clone)]
pub struct CreateKeyspace {
    context: StatementContext,
    replication: Option<Replication>,
    durable_writes: Option<bool>,
    fallback: (u32, bool),
    cache: QueryCache,
}

impl CreateKeyspace {
    pub fn new(entity: Arc<EntityType>) -> Self {
        CreateKeyspace { context: StatementContext::new(entity), replication: None, durable_writes: None, fallback: (1, true), cache: QueryCache::default() }
    }

    suffix_binding!();

    pub fn replication(mut self, replication: Replication) -> Self {
        self.replication = Some(replication);
        self.cache.touch();
        self
    }

    pub fn durable_writes(mut self, durable: bool) -> Self {
        self.durable_writes = Some(durable);
        self.cache.touch();
        self
    }

    /// Replication factor and durability used when neither the statement nor the entity declares them.
    pub(crate) fn defaults(mut self, replication_factor: u32, durable_writes: bool) -> Self {
        self.fallback = (replication_factor, durable_writes);
        self.cache.touch();
        self
    }

    fn queries(&self) -> Result<Vec<TableQuery>, CqlError> {
        let entity = self.context.entity();
        if entity.is_udt() {
            return Err(CqlError::invalid_definition(&entity.name, "a user-defined type owns no keyspace"));
        }
        let keyspace = self.context.keyspace()?;
        let replication = self
            .replication
            .clone()
            .or_else(|| entity.keyspace.replication.clone())
            .unwrap_or(Replication::Simple(self.fallback.0));
        let durable = self.durable_writes.or(entity.keyspace.durable_writes).unwrap_or(self.fallback.1);
        let text = format!(
            "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = {} AND durable_writes = {}",
            keyspace,
            replication.to_cql(),
            durable
        );
        Ok(vec![TableQuery::new(&keyspace, "", text, Vec::new())])
    }
}

ddl_render!(CreateKeyspace);

/// Creates a user-defined type inside the keyspace of the entity using it.
#[derive(Debug, Clone)]
pub struct CreateType {
    context: StatementContext,
    udt: Arc<EntityType>,
    cache: QueryCache,
}

impl CreateType {
    pub fn new(entity: Arc<EntityType>, udt: Arc<EntityType>) -> Self {
        CreateType { context: StatementContext::new(entity), udt, cache: QueryCache::default() }
    }

    suffix_binding!();

    fn queries(&self) -> Result<Vec<TableQuery>, CqlError> {
        if !self.udt.is_udt() {
            return Err(CqlError::invalid_definition(&self.udt.name, "not a user-defined type"));
        }
        let keyspace = self.context.keyspace()?;
        let fields = column_definitions(self.udt.columns.iter());
        let text = format!("CREATE TYPE IF NOT EXISTS {}.{} ({})", keyspace, self.udt.name, fields.join(", "));
        Ok(vec![TableQuery::new(&keyspace, "", text, Vec::new())])
    }
}

ddl_render!(CreateType);

#[derive(Debug, Clone)]
pub struct CreateTable {
    context: StatementContext,
    tables: Vec<String>,
    cache: QueryCache,
}

impl CreateTable {
    pub fn new(entity: Arc<EntityType>) -> Self {
        CreateTable { context: StatementContext::new(entity), tables: Vec::new(), cache: QueryCache::default() }
    }

    suffix_binding!();

    pub fn table(mut self, table: &str) -> Self {
        self.tables.push(table.to_string());
        self.cache.touch();
        self
    }

    fn queries(&self) -> Result<Vec<TableQuery>, CqlError> {
        let entity = self.context.entity();
        let keyspace = self.context.keyspace()?;
        let mut queries = Vec::new();
        for table in target_tables(entity, &self.tables)? {
            let mut definitions = column_definitions(table.columns.iter());
            definitions.push(format!("PRIMARY KEY ({})", primary_key(table)));
            let mut text = format!("CREATE TABLE IF NOT EXISTS {}.{} ({})", keyspace, table.name, definitions.join(", "));
            let ordering: Vec<String> = table
                .clustering_keys()
                .filter_map(|c| c.clustering_key.map(|(_, order)| format!("{} {}", c.name, order.as_cql())))
                .collect();
            if !ordering.is_empty() {
                text.push_str(&format!(" WITH CLUSTERING ORDER BY ({})", ordering.join(", ")));
            }
            queries.push(TableQuery::new(&keyspace, &table.name, text, Vec::new()));
        }
        Ok(queries)
    }
}

ddl_render!(CreateTable);

#[derive(Debug, Clone)]
pub struct CreateIndex {
    context: StatementContext,
    tables: Vec<String>,
    cache: QueryCache,
}

impl CreateIndex {
    pub fn new(entity: Arc<EntityType>) -> Self {
        CreateIndex { context: StatementContext::new(entity), tables: Vec::new(), cache: QueryCache::default() }
    }

    suffix_binding!();

    pub fn table(mut self, table: &str) -> Self {
        self.tables.push(table.to_string());
        self.cache.touch();
        self
    }

    fn queries(&self) -> Result<Vec<TableQuery>, CqlError> {
        let keyspace = self.context.keyspace()?;
        Ok(target_tables(self.context.entity(), &self.tables)?
            .into_iter()
            .flat_map(|t| t.indexes.iter())
            .map(|index| {
                let text = format!("CREATE INDEX IF NOT EXISTS {} ON {}.{} ({})", index.name, keyspace, index.table, index.target_cql());
                TableQuery::new(&keyspace, &index.table, text, Vec::new())
            })
            .collect())
    }
}

ddl_render!(CreateIndex);

/// Adds existing entity columns to an already created table.
#[derive(Debug, Clone)]
pub struct AlterTable {
    context: StatementContext,
    table: String,
    added: Vec<String>,
    cache: QueryCache,
}

impl AlterTable {
    pub fn new(entity: Arc<EntityType>, table: &str) -> Self {
        AlterTable { context: StatementContext::new(entity), table: table.to_string(), added: Vec::new(), cache: QueryCache::default() }
    }

    suffix_binding!();

    pub fn add(mut self, column: &str) -> Self {
        self.added.push(column.to_string());
        self.cache.touch();
        self
    }

    fn queries(&self) -> Result<Vec<TableQuery>, CqlError> {
        let entity = self.context.entity();
        let table = entity.table(&self.table)?;
        if self.added.is_empty() {
            return Err(CqlError::invalid_value(&table.name, "no column to add"));
        }
        let mut columns = Vec::with_capacity(self.added.len());
        for name in &self.added {
            let column = table.column(name).ok_or_else(|| CqlError::unknown_column(&entity.name, name))?;
            if column.is_primary_key() {
                return Err(CqlError::invalid_value(name, "primary key columns cannot be added"));
            }
            columns.push(column);
        }
        let keyspace = self.context.keyspace()?;
        let text = format!("ALTER TABLE {}.{} ADD ({})", keyspace, table.name, column_definitions(columns.into_iter()).join(", "));
        Ok(vec![TableQuery::new(&keyspace, &table.name, text, Vec::new())])
    }
}

ddl_render!(AlterTable);

#[derive(Debug, Clone)]
pub struct Truncate {
    context: StatementContext,
    tables: Vec<String>,
    cache: QueryCache,
}

impl Truncate {
    pub fn new(entity: Arc<EntityType>) -> Self {
        Truncate { context: StatementContext::new(entity), tables: Vec::new(), cache: QueryCache::default() }
    }

    suffix_binding!();

    pub fn table(mut self, table: &str) -> Self {
        self.tables.push(table.to_string());
        self.cache.touch();
        self
    }

    fn queries(&self) -> Result<Vec<TableQuery>, CqlError> {
        let keyspace = self.context.keyspace()?;
        Ok(target_tables(self.context.entity(), &self.tables)?
            .into_iter()
            .map(|t| TableQuery::new(&keyspace, &t.name, format!("TRUNCATE {}.{}", keyspace, t.name), Vec::new()))
            .collect())
    }
}

ddl_render!(Truncate);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::fixtures::{resolve, Order, PageViews};

    #[test]
    fn creates_keyspace_with_fallback_replication() {
        let queries = CreateKeyspace::new(resolve::<Order>()).suffix("tenant", "acme").defaults(3, false).build().unwrap();
        assert_eq!(
            queries[0].text,
            "CREATE KEYSPACE IF NOT EXISTS shop_acme WITH replication = {'class': 'SimpleStrategy', 'replication_factor': 3} AND durable_writes = false"
        );
        let unbound = CreateKeyspace::new(resolve::<Order>()).build();
        assert!(matches!(unbound, Err(CqlError::MissingKeyClause { .. })));
    }

    #[test]
    fn creates_tables_with_keys_and_ordering() {
        let queries = CreateTable::new(resolve::<Order>()).suffix("tenant", "acme").build().unwrap();
        assert_eq!(queries.len(), 2);
        assert_eq!(
            queries[0].text,
            "CREATE TABLE IF NOT EXISTS shop_acme.orders (region text, id bigint, status ascii, tags list<text>, created timestamp, notes text, \
             PRIMARY KEY ((region), id)) WITH CLUSTERING ORDER BY (id DESC)"
        );
        assert!(queries[1].text.ends_with("PRIMARY KEY ((region), status, id)) WITH CLUSTERING ORDER BY (status ASC, id ASC)"));

        let counters = CreateTable::new(resolve::<PageViews>()).build().unwrap();
        assert_eq!(counters[0].text, "CREATE TABLE IF NOT EXISTS stats.page_views (page text, views counter, PRIMARY KEY ((page)))");
    }

    #[test]
    fn alters_and_truncates_single_tables() {
        let entity = resolve::<Order>();
        let alter = AlterTable::new(Arc::clone(&entity), "orders").suffix("tenant", "acme").add("notes").build().unwrap();
        assert_eq!(alter[0].text, "ALTER TABLE shop_acme.orders ADD (notes text)");
        let key = AlterTable::new(Arc::clone(&entity), "orders").suffix("tenant", "acme").add("id").build();
        assert!(matches!(key, Err(CqlError::InvalidValue { .. })));

        let truncate = Truncate::new(entity).suffix("tenant", "acme").table("orders_by_status").build().unwrap();
        assert_eq!(truncate[0].text, "TRUNCATE shop_acme.orders_by_status");
    }
}
