use crate::error::CqlError;
use crate::exec::driver::{Driver, Executor, Hop, StatementCapture};
use crate::exec::gate::{GateKind, SchemaGates};
use crate::exec::{ResultFuture, ResultSet, SequenceFuture};
use crate::model::{registrations, Entity, EntityRegistry, EntityType, SuffixValues};
use crate::settings::Settings;
use crate::statement::clause::Options;
use crate::statement::schema::SchemaPlan;
use crate::statement::{AlterTable, Batch, CreateSchema, Delete, Insert, Select, Sequence, Statement, Truncate, Update};
use crate::{info, warn};
use std::sync::Arc;

struct SessionInner {
    executor: Arc<Executor>,
    registry: EntityRegistry,
    gates: SchemaGates,
    settings: Settings,
}

/// Entry point: hands out statement builders for registered entities and executes them on the
/// driver. Cloning shares the same metadata cache, schema gates and capture hooks.
///
/// `execute` and the blocking getters of [`ResultFuture`] park the calling thread, so they are
/// meant for threads outside the driver's executor.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Also applies `settings.logging.debug` to the process-wide `debug!` switch.
    pub fn new(driver: Arc<dyn Driver>, settings: Settings) -> Self {
        crate::logger::set_debug(settings.logging.debug);
        Session {
            inner: Arc::new(SessionInner {
                executor: Arc::new(Executor::new(driver)),
                registry: EntityRegistry::new(),
                gates: SchemaGates::new(),
                settings,
            }),
        }
    }

    pub fn with_defaults(driver: Arc<dyn Driver>) -> Self {
        Self::new(driver, Settings::default())
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.inner.registry
    }

    pub fn entity<T: Entity>(&self) -> Result<Arc<EntityType>, CqlError> {
        self.inner.registry.resolve::<T>()
    }

    pub fn insert<T: Entity>(&self, object: &T) -> Result<Insert, CqlError> {
        Ok(Insert::new(self.entity::<T>()?, object.to_row()))
    }

    pub fn update<T: Entity>(&self, object: &T) -> Result<Update, CqlError> {
        Ok(Update::for_object(self.entity::<T>()?, object.to_row()))
    }

    pub fn update_type<T: Entity>(&self) -> Result<Update, CqlError> {
        Ok(Update::for_type(self.entity::<T>()?))
    }

    pub fn delete<T: Entity>(&self, object: &T) -> Result<Delete, CqlError> {
        Ok(Delete::for_object(self.entity::<T>()?, object.to_row()))
    }

    pub fn delete_type<T: Entity>(&self) -> Result<Delete, CqlError> {
        Ok(Delete::for_type(self.entity::<T>()?))
    }

    pub fn select<T: Entity>(&self) -> Result<Select, CqlError> {
        Ok(Select::new(self.entity::<T>()?))
    }

    pub fn batch(&self) -> Batch {
        Batch::logged().recommended_size(self.inner.settings.batch.recommended_size)
    }

    pub fn unlogged_batch(&self) -> Batch {
        Batch::unlogged().recommended_size(self.inner.settings.batch.recommended_size)
    }

    pub fn sequence(&self) -> Sequence {
        Sequence::new()
    }

    pub fn create_schema<T: Entity>(&self) -> Result<CreateSchema, CqlError> {
        let schema = &self.inner.settings.schema;
        Ok(CreateSchema::new(self.entity::<T>()?).defaults(schema.replication_factor, schema.durable_writes))
    }

    pub fn reset_schema<T: Entity>(&self) -> Result<CreateSchema, CqlError> {
        Ok(CreateSchema::reset(self.entity::<T>()?))
    }

    pub fn truncate<T: Entity>(&self) -> Result<Truncate, CqlError> {
        Ok(Truncate::new(self.entity::<T>()?))
    }

    pub fn alter_table<T: Entity>(&self, table: &str) -> Result<AlterTable, CqlError> {
        Ok(AlterTable::new(self.entity::<T>()?, table))
    }

    /// Creates the schema of every entity registered under `namespace` whose suffix keys are all
    /// bound by `suffixes`; returns how many entities were created.
    pub fn create_schemas(&self, namespace: &str, suffixes: &SuffixValues) -> Result<usize, CqlError> {
        let settings = &self.inner.settings.schema;
        let mut created = 0;
        for registration in registrations(namespace) {
            let entity = (registration.resolve)(&self.inner.registry)?;
            if entity.is_udt() {
                continue;
            }
            let unbound: Vec<&str> =
                entity.keyspace.suffixes.iter().filter(|s| !suffixes.contains_key(&s.type_name)).map(|s| s.column.as_str()).collect();
            if !unbound.is_empty() {
                warn!("skipping schema of {} in {}: {:?} not bound", entity.name, namespace, unbound);
                continue;
            }
            let mut schema = CreateSchema::new(Arc::clone(&entity)).defaults(settings.replication_factor, settings.durable_writes);
            for suffix in &entity.keyspace.suffixes {
                if let Some(value) = suffixes.get(&suffix.type_name) {
                    schema = schema.suffix(&suffix.type_name, value.clone());
                }
            }
            self.execute(schema)?;
            created += 1;
        }
        Ok(created)
    }

    fn defaults(&self) -> Options {
        let execution = &self.inner.settings.execution;
        Options {
            consistency: execution.consistency,
            serial_consistency: execution.serial_consistency,
            fetch_size: Some(execution.fetch_size),
            ..Options::default()
        }
    }

    fn apply_defaults(&self, mut hop: Hop) -> Hop {
        hop.request.options = hop.request.options.or(&self.defaults());
        hop
    }

    /// Runs a statement and waits for its outcome, at most the configured execution timeout.
    pub fn execute(&self, statement: impl Into<Statement>) -> Result<ResultSet, CqlError> {
        let mut future = self.execute_async(statement)?;
        future.get_timeout(self.inner.settings.execution.timeout)
    }

    /// Dispatches a statement. Build errors are returned here; execution errors come out of the future.
    pub fn execute_async(&self, statement: impl Into<Statement>) -> Result<ResultFuture, CqlError> {
        let mut statement = statement.into();
        if let Statement::CreateSchema(schema) = &statement {
            return self.schema_async(schema);
        }
        let mut hops: Vec<Hop> = statement.compile()?.into_iter().map(|hop| self.apply_defaults(hop)).collect();
        let executor = &self.inner.executor;
        if hops.len() > 1 {
            return Ok(ResultFuture::sequence(SequenceFuture::start(Arc::clone(executor), hops)));
        }
        Ok(match hops.pop() {
            Some(hop) => ResultFuture::pending(executor.handle(), executor.dispatch(hop)),
            None => ResultFuture::ready(Ok(ResultSet::empty())),
        })
    }

    fn schema_async(&self, schema: &CreateSchema) -> Result<ResultFuture, CqlError> {
        let plans = schema.plans()?;
        let entity = schema.context().entity().name.clone();
        let kind = if schema.is_reset() { GateKind::Reset } else { GateKind::Create };
        let session = self.clone();
        let handle = self.inner.executor.handle();
        let task = handle.spawn_blocking(move || session.run_schema(&entity, kind, plans));
        Ok(ResultFuture::pending(handle, task))
    }

    /// Runs every plan behind its gate; concurrent requests for the same keyspace wait for the first.
    fn run_schema(&self, entity: &str, kind: GateKind, plans: Vec<SchemaPlan>) -> Result<ResultSet, CqlError> {
        for SchemaPlan { keyspace, hops } in plans {
            self.inner.gates.run(entity, &keyspace, kind, || {
                info!("{} schema of {} in {}", if kind == GateKind::Reset { "resetting" } else { "creating" }, entity, keyspace);
                for hop in hops {
                    self.inner.executor.run_blocking(self.apply_defaults(hop))?;
                }
                Ok(())
            })?;
        }
        Ok(ResultSet::empty())
    }

    /// Lets `hook` see every request before dispatch; the first hook returning a result answers it.
    pub fn capture(&self, hook: impl StatementCapture + 'static) -> Result<(), CqlError> {
        self.inner.executor.add_capture(Arc::new(hook))
    }

    pub fn clear_captures(&self) -> Result<(), CqlError> {
        self.inner.executor.clear_captures()
    }

    /// Forgets which schemas were created, so the next request creates them again.
    pub fn reset_gates(&self) -> Result<(), CqlError> {
        self.inner.gates.reset()
    }
}
