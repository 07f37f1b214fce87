use crate::error::CqlError;
use crate::exec::driver::RawResult;
use crate::model::{Entity, EntityType};
use crate::value::{Row, Value};
use std::sync::Arc;

/// What a select needs to turn its raw rows back into domain objects.
#[derive(Debug, Clone)]
pub(crate) struct Decoding {
    pub entity: Arc<EntityType>,
    pub table: String,
    /// Suffix column values the rows were read under; they live in the keyspace name, not the row.
    pub suffixes: Vec<(String, Value)>,
}

#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    rows: Vec<Row>,
    applied: Option<bool>,
    decoding: Option<Decoding>,
}

impl ResultSet {
    pub(crate) fn new(raw: RawResult, decoding: Option<Decoding>) -> Self {
        ResultSet { rows: raw.rows, applied: raw.applied, decoding }
    }

    pub fn empty() -> Self {
        ResultSet::default()
    }

    /// Raw rows, as returned by the driver.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// False only when a conditional write was rejected.
    pub fn was_applied(&self) -> bool {
        self.applied.unwrap_or(true)
    }

    fn decode_row(&self, decoding: &Decoding, raw: &Row) -> Result<Option<Row>, CqlError> {
        let entity = &decoding.entity;
        let table = entity.table(&decoding.table)?;
        let mut row = Row::new();
        for (name, value) in raw.iter() {
            let decoded = match table.column(name) {
                Some(column) if column.multi_key => Value::Set(vec![column.decode(value.clone())?]),
                Some(column) => column.decode(value.clone())?,
                None => value.clone(),
            };
            row.insert(name, decoded);
        }
        let missing: Vec<_> = table.columns.iter().filter(|c| c.mandatory && !row.contains(&c.name)).collect();
        for column in missing {
            row.insert(&column.name, column.decode(Value::Null)?);
        }
        for (column, value) in &decoding.suffixes {
            if !row.contains(column) {
                row.insert(column, value.clone());
            }
        }
        if let (Some(type_name), Some(type_key)) = (entity.type_name(), entity.type_key()) {
            if row.get(&type_key.name).and_then(Value::as_str) != Some(type_name) {
                return Ok(None);
            }
        }
        Ok(Some(row))
    }

    /// Decodes the rows into domain objects; rows of other types in a shared table are skipped.
    pub fn objects<T: Entity>(&self) -> Result<Vec<T>, CqlError> {
        let Some(decoding) = &self.decoding else {
            return self.rows.iter().map(T::from_row).collect();
        };
        let mut objects = Vec::with_capacity(self.rows.len());
        for raw in &self.rows {
            if let Some(row) = self.decode_row(decoding, raw)? {
                objects.push(T::from_row(&row)?);
            }
        }
        Ok(objects)
    }

    pub fn one<T: Entity>(&self) -> Result<Option<T>, CqlError> {
        Ok(self.objects::<T>()?.into_iter().next())
    }
}
