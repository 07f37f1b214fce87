//! cqlbit maps plain Rust types onto wide-column tables and assembles the CQL statements that
//! persist and query them.
//!
//! An entity is described once, through [`Entity::definition`], as a set of tables sharing the same
//! columns. Every write fans out to all of the entity's tables, keyspace names are suffixed by
//! values carried in the objects themselves (one keyspace per tenant, for example), and reads pick
//! the table able to answer the given relations. Statements render to CQL text with bound values
//! and are dispatched through a [`Driver`] implementation, either alone, grouped into a [`Batch`]
//! or chained into a [`Sequence`] whose steps run strictly one after another.
//!

pub mod codec;
pub mod error;
pub mod exec;
pub mod logger;
pub mod model;
pub mod session;
pub mod settings;
pub mod statement;
pub mod testing;
pub mod value;

pub use async_trait;
pub use chrono;
pub use inventory;
pub use once_cell;
pub use codec::persisted::{JsonPersister, Persisted, Persister};
pub use codec::{CqlType, DataTypeDefinition, DeclaredType};
pub use error::{CqlError, DriverError};
pub use exec::{BatchKind, Driver, GateKind, RawResult, Request, ResultFuture, ResultSet, SequenceFuture, StatementCapture};
pub use model::{
    registrations, ClusteringOrder, ColumnDef, Entity, EntityDef, EntityRegistration, EntityRegistry, EntityType, IndexTarget,
    InitialObjects, KeyspaceDef, Replication, SuffixValues, TableDef,
};
pub use session::Session;
pub use settings::{Consistency, Settings};
pub use statement::{
    contains, contains_key, eq, gt, gte, in_, lt, lte, AlterTable, Assignment, Batch, Clause, CreateIndex, CreateKeyspace,
    CreateSchema, CreateTable, CreateType, Delete, Insert, Select, Sequence, Statement, TableQuery, Truncate, Update,
};
pub use value::{FromValue, IntoValue, Row, Value};
