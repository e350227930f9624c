//! Driver capability set: the seam a storage backend implements.
//!
//! The model facade only ever talks to storage through this trait. It exposes the
//! four result shapes the facade hands out as lazy handles:
//!
//! - **collection**: [`Driver::open`] returns a [`Cursor`]; the cursor yields
//!   records and then the end marker (`Ok(None)`)
//! - **unique**: [`Driver::fetch`] resolves one identity to a record or `None`
//! - **raw**: [`Driver::raw`] returns the backend-native result untouched
//!
//! plus the two writes, [`Driver::persist`] and [`Driver::remove`].
//!
//! ## Implementation Requirements
//!
//! - `open` must not hold resources the cursor cannot release: everything the
//!   cursor acquires is released in its `Drop`, so abandoning a cursor early is
//!   always safe
//! - `persist` inserts when `entity.id()` is `None` (assigning an identity) and
//!   updates otherwise
//! - `remove` returns `Ok(false)` when nothing matched; the facade turns that into
//!   `ModelError::NotFound`
//! - every failure is a `DriverError`; drivers never panic on backend errors

use std::sync::Arc;

use async_trait::async_trait;

use stratum_core::{DriverError, Entity};

use crate::query::QueryDescriptor;

/// Pull-based stream of records from an open collection query.
#[async_trait]
pub trait Cursor<T>: Send {
    /// Next record, or `Ok(None)` once the collection is exhausted.
    async fn next(&mut self) -> Result<Option<T>, DriverError>;
}

pub type BoxCursor<T> = Box<dyn Cursor<T>>;

/// What a raw query addresses.
#[derive(Debug, Clone, PartialEq)]
pub enum RawTarget<Id> {
    Id(Id),
    Query(QueryDescriptor),
}

/// Storage backend for entities of type `T`.
#[async_trait]
pub trait Driver<T: Entity>: Send + Sync + 'static {
    /// Backend-native result of a raw query (row, document, cursor, ...).
    type Raw: Send + 'static;

    async fn open(&self, query: &QueryDescriptor) -> Result<BoxCursor<T>, DriverError>;

    async fn fetch(&self, id: &T::Id) -> Result<Option<T>, DriverError>;

    async fn raw(&self, target: &RawTarget<T::Id>) -> Result<Self::Raw, DriverError>;

    async fn persist(&self, entity: T) -> Result<T, DriverError>;

    async fn remove(&self, id: &T::Id) -> Result<bool, DriverError>;
}

#[async_trait]
impl<T, D> Driver<T> for Arc<D>
where
    T: Entity,
    D: Driver<T> + ?Sized,
{
    type Raw = D::Raw;

    async fn open(&self, query: &QueryDescriptor) -> Result<BoxCursor<T>, DriverError> {
        (**self).open(query).await
    }

    async fn fetch(&self, id: &T::Id) -> Result<Option<T>, DriverError> {
        (**self).fetch(id).await
    }

    async fn raw(&self, target: &RawTarget<T::Id>) -> Result<Self::Raw, DriverError> {
        (**self).raw(target).await
    }

    async fn persist(&self, entity: T) -> Result<T, DriverError> {
        (**self).persist(entity).await
    }

    async fn remove(&self, id: &T::Id) -> Result<bool, DriverError> {
        (**self).remove(id).await
    }
}
