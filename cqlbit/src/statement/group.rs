use crate::error::CqlError;
use crate::exec::driver::{BatchKind, Expectation, Hop, Request};
use crate::statement::clause::Clauses;
use crate::statement::{QueryCache, Render, Statement, TableQuery};
use std::sync::Arc;

pub const DEFAULT_RECOMMENDED_SIZE: usize = 100;

/// Writes sent together as one batch request.
#[derive(Debug, Clone)]
pub struct Batch {
    kind: BatchKind,
    children: Vec<Statement>,
    recommended_size: usize,
    clauses: Clauses,
    cache: QueryCache,
}

impl Batch {
    pub fn logged() -> Self {
        Self::new(BatchKind::Logged)
    }

    /// Best-effort batch: children may be applied partially.
    pub fn unlogged() -> Self {
        Self::new(BatchKind::Unlogged)
    }

    fn new(kind: BatchKind) -> Self {
        Batch {
            kind,
            children: Vec::new(),
            recommended_size: DEFAULT_RECOMMENDED_SIZE,
            clauses: Clauses::default(),
            cache: QueryCache::default(),
        }
    }

    timestamp_option!();
    request_options!();

    pub fn recommended_size(mut self, size: usize) -> Self {
        self.recommended_size = size;
        self
    }

    pub fn add(mut self, statement: impl Into<Statement>) -> Result<Self, CqlError> {
        let statement = statement.into();
        if !statement.is_write() {
            return Err(CqlError::UnsupportedStatementInGroup { group: "batch", statement: statement.kind_name() });
        }
        if self.children.first().is_some_and(|first| first.is_counter() != statement.is_counter()) {
            return Err(CqlError::MixedCounterOperation);
        }
        self.children.push(statement);
        self.cache.touch();
        Ok(self)
    }

    /// Past this many children the batch should be flushed; adding more still works.
    pub fn has_reached_recommended_size(&self) -> bool {
        self.children.len() >= self.recommended_size
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn statements(&self) -> &[Statement] {
        &self.children
    }

    pub fn is_counter(&self) -> bool {
        self.children.iter().any(Statement::is_counter)
    }

    pub fn invalidate(&mut self) {
        self.cache.touch();
        self.children.iter_mut().for_each(Statement::invalidate);
    }

    pub fn build(&mut self) -> Result<Arc<[TableQuery]>, CqlError> {
        self.build_cached()
    }

    fn expectation(&self) -> Expectation {
        self.children
            .iter()
            .map(|child| match child {
                Statement::Insert(s) => s.expectation(),
                Statement::Update(s) => s.expectation(),
                Statement::Delete(s) => s.expectation(),
                _ => Expectation::Plain,
            })
            .find(|e| *e != Expectation::Plain)
            .unwrap_or(Expectation::Plain)
    }

    pub(crate) fn compile(&mut self) -> Result<Vec<Hop>, CqlError> {
        let queries = self.build_cached()?;
        let Some(first) = queries.first() else {
            return Ok(Vec::new());
        };
        let batch = if self.is_counter() { BatchKind::Counter } else { self.kind };
        let request = Request {
            keyspace: first.keyspace.clone(),
            queries: queries.iter().map(TableQuery::to_raw).collect::<Result<_, _>>()?,
            batch: Some(batch),
            options: self.clauses.options.clone(),
        };
        Ok(vec![Hop { request, expectation: self.expectation(), decoding: None }])
    }
}

impl Render for Batch {
    fn cache(&self) -> &QueryCache {
        &self.cache
    }

    fn cache_mut(&mut self) -> &mut QueryCache {
        &mut self.cache
    }

    fn render(&mut self) -> Result<Vec<TableQuery>, CqlError> {
        let mut queries = Vec::new();
        for child in &mut self.children {
            queries.extend(child.build()?.iter().cloned());
        }
        Ok(queries)
    }

    fn token(&self) -> u64 {
        self.children.iter().fold(self.cache.revision(), |token, child| token.wrapping_add(child.token()))
    }
}

/// Statements run one after another, each only once the previous one succeeded.
#[derive(Debug, Clone, Default)]
pub struct Sequence {
    children: Vec<Statement>,
    cache: QueryCache,
}

impl Sequence {
    pub fn new() -> Self {
        Sequence::default()
    }

    /// Nested sequences are spliced in; a batch stays one step.
    pub fn add(mut self, statement: impl Into<Statement>) -> Self {
        match statement.into() {
            Statement::Sequence(nested) => self.children.extend(nested.children),
            other => self.children.push(other),
        }
        self.cache.touch();
        self
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn statements(&self) -> &[Statement] {
        &self.children
    }

    pub fn invalidate(&mut self) {
        self.cache.touch();
        self.children.iter_mut().for_each(Statement::invalidate);
    }

    pub fn build(&mut self) -> Result<Arc<[TableQuery]>, CqlError> {
        self.build_cached()
    }

    pub(crate) fn compile(&mut self) -> Result<Vec<Hop>, CqlError> {
        let mut hops = Vec::new();
        for child in &mut self.children {
            hops.extend(child.compile()?);
        }
        Ok(hops)
    }
}

impl Render for Sequence {
    fn cache(&self) -> &QueryCache {
        &self.cache
    }

    fn cache_mut(&mut self) -> &mut QueryCache {
        &mut self.cache
    }

    fn render(&mut self) -> Result<Vec<TableQuery>, CqlError> {
        let mut queries = Vec::new();
        for child in &mut self.children {
            queries.extend(child.build()?.iter().cloned());
        }
        Ok(queries)
    }

    fn token(&self) -> u64 {
        self.children.iter().fold(self.cache.revision(), |token, child| token.wrapping_add(child.token()))
    }
}
