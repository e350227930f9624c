//! Lazy result handles.
//!
//! Every query operation on a model returns a fresh handle owned by the caller.
//! Creating a handle performs no I/O; the driver is only called when the handle is
//! consumed (`next`, `collect`, `fetch`, ...).
//!
//! A [`Collection`] is a small state machine:
//!
//! ```text
//! Pending ──next()──▶ Open(cursor) ──end marker / error──▶ Exhausted
//!    │                    │
//!    └──── cancel() ──────┴──────────────────────────────▶ Cancelled
//! ```
//!
//! Leaving `Open` (or dropping the handle) drops the driver cursor, which releases
//! whatever the driver holds for it. Abandoning a half-read collection is safe.

use std::marker::PhantomData;
use std::sync::Arc;

use stratum_core::{Entity, ModelError};

use crate::driver::{BoxCursor, Driver, RawTarget};
use crate::query::{Direction, QueryDescriptor};

/// Observable state of a [`Collection`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HandleStatus {
    Pending,
    Open,
    Exhausted,
    Cancelled,
}

enum State<T> {
    Pending,
    Open(BoxCursor<T>),
    Exhausted,
    Cancelled,
}

/// Deferred, ordered sequence of records matching a descriptor.
pub struct Collection<T: Entity, D: Driver<T>> {
    driver: Arc<D>,
    query: QueryDescriptor,
    state: State<T>,
}

impl<T: Entity, D: Driver<T>> Collection<T, D> {
    pub(crate) fn new(driver: Arc<D>, query: QueryDescriptor) -> Self {
        Self {
            driver,
            query,
            state: State::Pending,
        }
    }

    pub fn query(&self) -> &QueryDescriptor {
        &self.query
    }

    pub fn status(&self) -> HandleStatus {
        match self.state {
            State::Pending => HandleStatus::Pending,
            State::Open(_) => HandleStatus::Open,
            State::Exhausted => HandleStatus::Exhausted,
            State::Cancelled => HandleStatus::Cancelled,
        }
    }

    /// Narrows the descriptor; the result is a new, unconsumed handle.
    ///
    /// Any cursor this handle already opened is released.
    pub fn filter(self, query: impl Into<QueryDescriptor>) -> Self {
        Self::new(self.driver.clone(), self.query.clone().and(query.into()))
    }

    pub fn order_by(self, field: impl Into<String>, direction: Direction) -> Self {
        Self::new(self.driver.clone(), self.query.clone().order_by(field, direction))
    }

    pub fn limit(self, limit: usize) -> Self {
        Self::new(self.driver.clone(), self.query.clone().limit(limit))
    }

    /// First record in driver order, tolerating any number of matches.
    pub fn first(self) -> Unique<T, D> {
        Unique::new(self.driver.clone(), Lookup::First(self.query.clone()))
    }

    /// Next record, or `Ok(None)` at the end of the collection.
    ///
    /// The first call opens the driver cursor. After the end marker, an error, or
    /// `cancel`, every call returns `Ok(None)` without touching the driver.
    pub async fn next(&mut self) -> Result<Option<T>, ModelError> {
        if let State::Pending = self.state {
            tracing::debug!(collection = T::COLLECTION, "opening cursor");
            match self.driver.open(&self.query).await {
                Ok(cursor) => self.state = State::Open(cursor),
                Err(e) => {
                    self.state = State::Exhausted;
                    return Err(e.into());
                }
            }
        }

        let State::Open(cursor) = &mut self.state else {
            return Ok(None);
        };

        let result = cursor.next().await;
        match result {
            Ok(Some(record)) => Ok(Some(record)),
            Ok(None) => {
                self.state = State::Exhausted;
                Ok(None)
            }
            Err(e) => {
                self.state = State::Exhausted;
                Err(e.into())
            }
        }
    }

    /// Stops consumption and releases the driver cursor.
    pub fn cancel(&mut self) {
        if !matches!(self.state, State::Exhausted) {
            self.state = State::Cancelled;
        }
    }

    /// Drains the remaining records.
    pub async fn collect(mut self) -> Result<Vec<T>, ModelError> {
        let mut out = Vec::new();
        while let Some(record) = self.next().await? {
            out.push(record);
        }
        Ok(out)
    }

    pub async fn count(mut self) -> Result<usize, ModelError> {
        let mut n = 0;
        while self.next().await?.is_some() {
            n += 1;
        }
        Ok(n)
    }
}

impl<T: Entity, D: Driver<T>> core::fmt::Debug for Collection<T, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Collection")
            .field("collection", &T::COLLECTION)
            .field("query", &self.query)
            .field("status", &self.status())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Lookup<Id> {
    /// Identity lookup through the driver's unique operation.
    Id(Id),
    /// First record whose identity attribute equals the id, in driver order.
    FirstById(Id),
    /// First record matching an arbitrary descriptor.
    First(QueryDescriptor),
}

/// Deferred lookup of at most one record.
///
/// `fetch` distinguishes the three outcomes: `Ok(Some(_))` found, `Ok(None)` not
/// found, `Err(_)` failure.
pub struct Unique<T: Entity, D: Driver<T>> {
    driver: Arc<D>,
    lookup: Lookup<T::Id>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity, D: Driver<T>> Unique<T, D> {
    pub(crate) fn new(driver: Arc<D>, lookup: Lookup<T::Id>) -> Self {
        Self {
            driver,
            lookup,
            _entity: PhantomData,
        }
    }

    pub async fn fetch(self) -> Result<Option<T>, ModelError> {
        let query = match self.lookup {
            Lookup::Id(id) => {
                tracing::debug!(collection = T::COLLECTION, %id, "fetching by identity");
                return Ok(self.driver.fetch(&id).await?);
            }
            Lookup::FirstById(id) => {
                QueryDescriptor::new().eq(T::IDENTITY, serde_json::to_value(&id)?)
            }
            Lookup::First(query) => query,
        };

        // Narrow the window to one record; an existing `limit(0)` stays empty.
        let limit = query.limit_value().map_or(1, |limit| limit.min(1));
        // The cursor is dropped (and released) as soon as the first record is read.
        let mut cursor = self.driver.open(&query.limit(limit)).await?;
        Ok(cursor.next().await?)
    }

    /// Like `fetch`, but "not found" becomes `ModelError::NotFound`.
    pub async fn require(self) -> Result<T, ModelError> {
        let missing = match &self.lookup {
            Lookup::Id(id) | Lookup::FirstById(id) => id.to_string(),
            Lookup::First(_) => "first match".to_string(),
        };
        self.fetch()
            .await?
            .ok_or_else(|| ModelError::not_found(T::COLLECTION, missing))
    }
}

impl<T: Entity, D: Driver<T>> core::fmt::Debug for Unique<T, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Unique")
            .field("collection", &T::COLLECTION)
            .field("lookup", &self.lookup)
            .finish()
    }
}

/// Deferred backend-native query result.
pub struct Raw<T: Entity, D: Driver<T>> {
    driver: Arc<D>,
    target: RawTarget<T::Id>,
}

impl<T: Entity, D: Driver<T>> Raw<T, D> {
    pub(crate) fn new(driver: Arc<D>, target: RawTarget<T::Id>) -> Self {
        Self { driver, target }
    }

    pub fn target(&self) -> &RawTarget<T::Id> {
        &self.target
    }

    pub async fn fetch(self) -> Result<D::Raw, ModelError> {
        tracing::debug!(collection = T::COLLECTION, "raw query");
        Ok(self.driver.raw(&self.target).await?)
    }
}

/// Driver-level query composition.
///
/// Returned by `Model::find`; carries the full descriptor vocabulary and direct
/// access to the driver for anything the typed surface does not cover.
pub struct Finder<T: Entity, D: Driver<T>> {
    driver: Arc<D>,
    query: QueryDescriptor,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity, D: Driver<T>> Finder<T, D> {
    pub(crate) fn new(driver: Arc<D>) -> Self {
        Self {
            driver,
            query: QueryDescriptor::new(),
            _entity: PhantomData,
        }
    }

    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    pub fn descriptor(&self) -> &QueryDescriptor {
        &self.query
    }

    /// Replaces the descriptor wholesale.
    pub fn with(mut self, f: impl FnOnce(QueryDescriptor) -> QueryDescriptor) -> Self {
        self.query = f(self.query);
        self
    }

    pub fn filter(self, query: impl Into<QueryDescriptor>) -> Self {
        let query = query.into();
        self.with(|q| q.and(query))
    }

    pub fn order_by(self, field: impl Into<String>, direction: Direction) -> Self {
        self.with(|q| q.order_by(field, direction))
    }

    pub fn limit(self, limit: usize) -> Self {
        self.with(|q| q.limit(limit))
    }

    pub fn offset(self, offset: usize) -> Self {
        self.with(|q| q.offset(offset))
    }

    pub fn all(self) -> Collection<T, D> {
        Collection::new(self.driver, self.query)
    }

    pub fn first(self) -> Unique<T, D> {
        Unique::new(self.driver, Lookup::First(self.query))
    }

    pub fn raw(self) -> Raw<T, D> {
        Raw::new(self.driver, RawTarget::Query(self.query))
    }
}
