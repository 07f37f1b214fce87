use crate::error::CqlError;
use crate::exec::driver::{Expectation, Hop};
use crate::model::{EntityType, EntityTypeKind, SuffixValues};
use crate::statement::{
    schema_hops, write_hops, CreateIndex, CreateKeyspace, CreateTable, CreateType, Insert, QueryCache, Render, StatementContext,
    TableQuery, Truncate,
};
use crate::value::{IntoValue, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Everything one keyspace needs, in dependency order.
#[derive(Debug)]
pub(crate) struct SchemaPlan {
    pub keyspace: String,
    pub hops: Vec<Hop>,
}

enum Step {
    Ddl(Vec<TableQuery>),
    Seed(Insert),
}

/// Creates (or resets) the whole schema of an entity: keyspace, user-defined types, tables, indexes
/// and initial objects, once per suffix combination. Nothing is rolled back when a step fails.
#[derive(Debug, Clone)]
pub struct CreateSchema {
    context: StatementContext,
    choices: BTreeMap<String, Vec<Value>>,
    reset: bool,
    fallback: (u32, bool),
    cache: QueryCache,
}

impl CreateSchema {
    pub fn new(entity: Arc<EntityType>) -> Self {
        let entity = match (&entity.kind, &entity.root) {
            (EntityTypeKind::Type { .. }, Some(root)) => Arc::clone(root),
            _ => entity,
        };
        CreateSchema {
            context: StatementContext::new(entity),
            choices: BTreeMap::new(),
            reset: false,
            fallback: (1, true),
            cache: QueryCache::default(),
        }
    }

    /// Truncates every table and writes the initial objects again.
    pub fn reset(entity: Arc<EntityType>) -> Self {
        CreateSchema { reset: true, ..Self::new(entity) }
    }

    suffix_binding!();

    /// Creates the schema for each of these suffix values, combined with every other suffix.
    pub fn suffix_values<V: IntoValue>(mut self, type_name: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.choices.entry(type_name.to_string()).or_default().extend(values.into_iter().map(IntoValue::into_value));
        self.cache.touch();
        self
    }

    pub(crate) fn defaults(mut self, replication_factor: u32, durable_writes: bool) -> Self {
        self.fallback = (replication_factor, durable_writes);
        self.cache.touch();
        self
    }

    pub fn is_reset(&self) -> bool {
        self.reset
    }

    pub fn build(&mut self) -> Result<Arc<[TableQuery]>, CqlError> {
        self.build_cached()
    }

    fn combinations(&self) -> Vec<SuffixValues> {
        let mut combinations = vec![self.context.suffixes().clone()];
        for (type_name, values) in &self.choices {
            combinations = combinations
                .into_iter()
                .flat_map(|base| {
                    values.iter().map(move |value| {
                        let mut combination = base.clone();
                        combination.insert(type_name.clone(), value.clone());
                        combination
                    })
                })
                .collect();
        }
        combinations
    }

    /// User-defined types, each after the types its own fields use.
    fn ordered_udts(entity: &EntityType) -> Vec<Arc<EntityType>> {
        fn visit(udt: &Arc<EntityType>, ordered: &mut Vec<Arc<EntityType>>) {
            if ordered.iter().any(|u| u.name == udt.name) {
                return;
            }
            for nested in &udt.udts {
                visit(nested, ordered);
            }
            ordered.push(Arc::clone(udt));
        }
        let mut ordered = Vec::new();
        for udt in &entity.udts {
            visit(udt, &mut ordered);
        }
        ordered
    }

    fn steps(&self, suffixes: &SuffixValues) -> Result<(String, Vec<Step>), CqlError> {
        let entity = Arc::clone(self.context.entity());
        if entity.is_udt() {
            return Err(CqlError::invalid_definition(&entity.name, "user-defined types are created with the entity using them"));
        }
        let keyspace = entity.keyspace_name(suffixes)?;
        let mut steps = Vec::new();
        macro_rules! bound {
            ($statement:expr) => {{
                let mut statement = $statement;
                for (type_name, value) in suffixes {
                    statement = statement.suffix(type_name, value.clone());
                }
                statement
            }};
        }
        if self.reset {
            steps.push(Step::Ddl(bound!(Truncate::new(Arc::clone(&entity))).build()?.to_vec()));
        } else {
            let (factor, durable) = self.fallback;
            steps.push(Step::Ddl(bound!(CreateKeyspace::new(Arc::clone(&entity)).defaults(factor, durable)).build()?.to_vec()));
            for udt in Self::ordered_udts(&entity) {
                steps.push(Step::Ddl(bound!(CreateType::new(Arc::clone(&entity), udt)).build()?.to_vec()));
            }
            steps.push(Step::Ddl(bound!(CreateTable::new(Arc::clone(&entity))).build()?.to_vec()));
            steps.push(Step::Ddl(bound!(CreateIndex::new(Arc::clone(&entity))).build()?.to_vec()));
        }
        if let Some(objects) = entity.initial_objects {
            for row in objects(suffixes) {
                steps.push(Step::Seed(bound!(Insert::new(Arc::clone(&entity), row))));
            }
        }
        Ok((keyspace, steps))
    }

    /// One plan per suffix combination.
    pub(crate) fn plans(&self) -> Result<Vec<SchemaPlan>, CqlError> {
        let mut plans = Vec::new();
        for suffixes in self.combinations() {
            let (keyspace, steps) = self.steps(&suffixes)?;
            let mut hops = Vec::new();
            for step in steps {
                match step {
                    Step::Ddl(queries) => hops.extend(schema_hops(&queries)?),
                    Step::Seed(mut insert) => {
                        let queries = insert.build()?;
                        hops.extend(write_hops(&queries, insert.options(), Expectation::Plain, false)?);
                    }
                }
            }
            plans.push(SchemaPlan { keyspace, hops });
        }
        Ok(plans)
    }

    pub(crate) fn compile(&mut self) -> Result<Vec<Hop>, CqlError> {
        Ok(self.plans()?.into_iter().flat_map(|p| p.hops).collect())
    }
}

impl Render for CreateSchema {
    fn cache(&self) -> &QueryCache {
        &self.cache
    }

    fn cache_mut(&mut self) -> &mut QueryCache {
        &mut self.cache
    }

    fn render(&mut self) -> Result<Vec<TableQuery>, CqlError> {
        let mut queries = Vec::new();
        for suffixes in self.combinations() {
            for step in self.steps(&suffixes)?.1 {
                match step {
                    Step::Ddl(ddl) => queries.extend(ddl),
                    Step::Seed(mut insert) => queries.extend(insert.build()?.iter().cloned()),
                }
            }
        }
        Ok(queries)
    }
}
