use crate::error::CqlError;
use crate::settings::Consistency;
use crate::value::{IntoValue, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum FilterOp {
    Eq(Value),
    Lt(Value),
    Le(Value),
    Gt(Value),
    Ge(Value),
    In(Vec<Value>),
    Contains(Value),
    ContainsKey(Value),
}

impl FilterOp {
    fn operator(&self) -> &'static str {
        match self {
            FilterOp::Eq(_) => "=",
            FilterOp::Lt(_) => "<",
            FilterOp::Le(_) => "<=",
            FilterOp::Gt(_) => ">",
            FilterOp::Ge(_) => ">=",
            FilterOp::In(_) => "IN",
            FilterOp::Contains(_) => "CONTAINS",
            FilterOp::ContainsKey(_) => "CONTAINS KEY",
        }
    }
}

/// What a bound value of a relation is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Column,
    /// One element of a list or set, or one value of a map.
    Element,
    Key,
}

/// One relation of a WHERE or IF clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub column: String,
    pub op: FilterOp,
}

impl Clause {
    /// The bound value when the clause pins the column to exactly one value.
    pub fn eq_value(&self) -> Option<&Value> {
        match &self.op {
            FilterOp::Eq(v) => Some(v),
            FilterOp::In(values) if values.len() == 1 => values.first(),
            _ => None,
        }
    }

    /// Whether the clause restricts the column enough to address a partition.
    pub fn binds_key(&self) -> bool {
        matches!(self.op, FilterOp::Eq(_) | FilterOp::In(_))
    }

    /// Renders the clause with bind markers, appending the bound values to `bindings`.
    pub(crate) fn render(
        &self,
        encode: impl Fn(Operand, Value) -> Result<Value, CqlError>,
        bindings: &mut Vec<Value>,
    ) -> Result<String, CqlError> {
        let marker = match &self.op {
            FilterOp::In(values) => {
                let markers: Vec<&str> = values.iter().map(|_| "?").collect();
                for value in values {
                    bindings.push(encode(Operand::Column, value.clone())?);
                }
                format!("({})", markers.join(", "))
            }
            FilterOp::Contains(v) => {
                bindings.push(encode(Operand::Element, v.clone())?);
                "?".to_string()
            }
            FilterOp::ContainsKey(k) => {
                bindings.push(encode(Operand::Key, k.clone())?);
                "?".to_string()
            }
            FilterOp::Eq(v) | FilterOp::Lt(v) | FilterOp::Le(v) | FilterOp::Gt(v) | FilterOp::Ge(v) => {
                bindings.push(encode(Operand::Column, v.clone())?);
                "?".to_string()
            }
        };
        Ok(format!("{} {} {}", self.column, self.op.operator(), marker))
    }
}

pub fn eq(column: &str, value: impl IntoValue) -> Clause {
    Clause { column: column.to_string(), op: FilterOp::Eq(value.into_value()) }
}

pub fn lt(column: &str, value: impl IntoValue) -> Clause {
    Clause { column: column.to_string(), op: FilterOp::Lt(value.into_value()) }
}

pub fn lte(column: &str, value: impl IntoValue) -> Clause {
    Clause { column: column.to_string(), op: FilterOp::Le(value.into_value()) }
}

pub fn gt(column: &str, value: impl IntoValue) -> Clause {
    Clause { column: column.to_string(), op: FilterOp::Gt(value.into_value()) }
}

pub fn gte(column: &str, value: impl IntoValue) -> Clause {
    Clause { column: column.to_string(), op: FilterOp::Ge(value.into_value()) }
}

pub fn in_<V: IntoValue>(column: &str, values: impl IntoIterator<Item = V>) -> Clause {
    Clause { column: column.to_string(), op: FilterOp::In(values.into_iter().map(IntoValue::into_value).collect()) }
}

pub fn contains(column: &str, value: impl IntoValue) -> Clause {
    Clause { column: column.to_string(), op: FilterOp::Contains(value.into_value()) }
}

pub fn contains_key(column: &str, key: impl IntoValue) -> Clause {
    Clause { column: column.to_string(), op: FilterOp::ContainsKey(key.into_value()) }
}

/// Lightweight-transaction condition of a write.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Condition {
    #[default]
    None,
    IfExists,
    IfNotExists,
    Only(Vec<Clause>),
}

impl Condition {
    fn name(&self) -> &'static str {
        match self {
            Condition::None => "no condition",
            Condition::IfExists => "IF EXISTS",
            Condition::IfNotExists => "IF NOT EXISTS",
            Condition::Only(_) => "IF <clause>",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Condition::None)
    }
}

/// Per-statement execution options. TTL and timestamp are rendered into the query, the rest travel
/// with the request to the driver.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Options {
    pub ttl: Option<u32>,
    pub timestamp: Option<i64>,
    pub consistency: Option<Consistency>,
    pub serial_consistency: Option<Consistency>,
    pub fetch_size: Option<u32>,
    pub tracing: bool,
    pub idempotent: Option<bool>,
}

impl Options {
    pub(crate) fn using(&self, with_ttl: bool) -> String {
        let mut parts = Vec::new();
        if let Some(ttl) = self.ttl.filter(|_| with_ttl) {
            parts.push(format!("TTL {}", ttl));
        }
        if let Some(ts) = self.timestamp {
            parts.push(format!("TIMESTAMP {}", ts));
        }
        if parts.is_empty() {
            String::new()
        } else {
            format!(" USING {}", parts.join(" AND "))
        }
    }

    /// Fills options left unset here from `defaults`.
    pub(crate) fn or(&self, defaults: &Options) -> Options {
        Options {
            ttl: self.ttl.or(defaults.ttl),
            timestamp: self.timestamp.or(defaults.timestamp),
            consistency: self.consistency.or(defaults.consistency),
            serial_consistency: self.serial_consistency.or(defaults.serial_consistency),
            fetch_size: self.fetch_size.or(defaults.fetch_size),
            tracing: self.tracing || defaults.tracing,
            idempotent: self.idempotent.or(defaults.idempotent),
        }
    }
}

/// WHERE relations, the write condition and options shared by every statement kind.
#[derive(Debug, Clone, Default)]
pub struct Clauses {
    pub wheres: Vec<Clause>,
    pub condition: Condition,
    pub options: Options,
    conflict: Option<String>,
}

impl Clauses {
    pub fn push_where(&mut self, clause: Clause) {
        self.wheres.push(clause);
    }

    /// Records a condition; a second, different kind of condition is reported when the statement is built.
    pub fn set_condition(&mut self, condition: Condition) {
        if self.condition.is_none() {
            self.condition = condition;
            return;
        }
        if let (Condition::Only(existing), Condition::Only(more)) = (&mut self.condition, &condition) {
            existing.extend(more.iter().cloned());
            return;
        }
        if self.condition != condition {
            self.conflict = Some(format!("{} cannot be combined with {}", self.condition.name(), condition.name()));
        }
    }

    pub fn check(&self) -> Result<(), CqlError> {
        match &self.conflict {
            Some(conflict) => Err(CqlError::ConflictingConditions(conflict.clone())),
            None => Ok(()),
        }
    }

    pub fn where_value(&self, column: &str) -> Option<&Value> {
        self.wheres.iter().filter(|c| c.column == column).find_map(Clause::eq_value)
    }

    pub fn render_condition(
        &self,
        encode: impl Fn(&str, Operand, Value) -> Result<Value, CqlError>,
        bindings: &mut Vec<Value>,
    ) -> Result<String, CqlError> {
        Ok(match &self.condition {
            Condition::None => String::new(),
            Condition::IfExists => " IF EXISTS".to_string(),
            Condition::IfNotExists => " IF NOT EXISTS".to_string(),
            Condition::Only(clauses) => {
                let rendered = clauses
                    .iter()
                    .map(|c| c.render(|operand, v| encode(&c.column, operand, v), bindings))
                    .collect::<Result<Vec<_>, _>>()?;
                format!(" IF {}", rendered.join(" AND "))
            }
        })
    }
}
