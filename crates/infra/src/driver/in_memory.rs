use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use stratum_core::{DriverError, Entity, Identity};
use stratum_model::{BoxCursor, Cursor, Driver, QueryDescriptor, RawTarget};

#[derive(Debug)]
struct Tables<Id> {
    /// Insertion sequence → (identity key, document). Iteration order is driver order.
    rows: BTreeMap<u64, (String, Value)>,
    /// Identity key → insertion sequence.
    index: HashMap<String, u64>,
    next_seq: u64,
    last_id: Option<Id>,
}

impl<Id> Default for Tables<Id> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            index: HashMap::new(),
            next_seq: 0,
            last_id: None,
        }
    }
}

#[derive(Debug, Default)]
struct CursorCounters {
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// Cursor bookkeeping, for leak checks.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DriverStats {
    pub cursors_opened: usize,
    pub cursors_closed: usize,
}

impl DriverStats {
    pub fn cursors_open(&self) -> usize {
        self.cursors_opened - self.cursors_closed
    }
}

/// In-memory document driver.
///
/// Intended for tests/dev. Not optimized for performance.
///
/// Records are stored as JSON documents in insertion order, which is the driver
/// order seen by unordered queries; updates keep a record's original position.
/// Each `open` evaluates the query against a snapshot, so concurrent writes never
/// change what an already-open cursor yields.
#[derive(Debug)]
pub struct InMemoryDriver<T: Entity> {
    tables: RwLock<Tables<T::Id>>,
    counters: Arc<CursorCounters>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Default for InMemoryDriver<T> {
    fn default() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            counters: Arc::new(CursorCounters::default()),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> InMemoryDriver<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> DriverStats {
        DriverStats {
            cursors_opened: self.counters.opened.load(Ordering::SeqCst),
            cursors_closed: self.counters.closed.load(Ordering::SeqCst),
        }
    }

    pub fn len(&self) -> usize {
        self.tables.read().map(|t| t.rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self, query: &QueryDescriptor) -> Result<Vec<Value>, DriverError> {
        let tables = self.tables.read().map_err(|_| DriverError::Poisoned)?;
        let matching: Vec<Value> = tables
            .rows
            .values()
            .filter(|(_, doc)| query.matches(doc))
            .map(|(_, doc)| doc.clone())
            .collect();
        Ok(query.window(matching))
    }
}

fn encode<T: Entity>(entity: &T) -> Result<Value, DriverError> {
    serde_json::to_value(entity)
        .map_err(|e| DriverError::backend(format!("encode {} failed: {e}", T::COLLECTION)))
}

fn decode<T: Entity>(document: Value) -> Result<T, DriverError> {
    serde_json::from_value(document)
        .map_err(|e| DriverError::decode(format!("{}: {e}", T::COLLECTION)))
}

/// Cursor over a query snapshot.
struct InMemoryCursor<T> {
    documents: std::vec::IntoIter<Value>,
    counters: Arc<CursorCounters>,
    _entity: PhantomData<fn() -> T>,
}

#[async_trait]
impl<T: Entity> Cursor<T> for InMemoryCursor<T> {
    async fn next(&mut self) -> Result<Option<T>, DriverError> {
        self.documents.next().map(decode::<T>).transpose()
    }
}

impl<T> Drop for InMemoryCursor<T> {
    fn drop(&mut self) {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl<T: Entity> Driver<T> for InMemoryDriver<T> {
    /// Stored documents: the record (or `null`) for an identity, an array of
    /// matching records for a query.
    type Raw = Value;

    async fn open(&self, query: &QueryDescriptor) -> Result<BoxCursor<T>, DriverError> {
        let documents = self.snapshot(query)?;
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            collection = T::COLLECTION,
            matched = documents.len(),
            "in-memory cursor opened"
        );

        Ok(Box::new(InMemoryCursor::<T> {
            documents: documents.into_iter(),
            counters: self.counters.clone(),
            _entity: PhantomData,
        }))
    }

    async fn fetch(&self, id: &T::Id) -> Result<Option<T>, DriverError> {
        let document = {
            let tables = self.tables.read().map_err(|_| DriverError::Poisoned)?;
            tables
                .index
                .get(&id.key())
                .and_then(|seq| tables.rows.get(seq))
                .map(|(_, doc)| doc.clone())
        };
        document.map(decode::<T>).transpose()
    }

    async fn raw(&self, target: &RawTarget<T::Id>) -> Result<Value, DriverError> {
        match target {
            RawTarget::Id(id) => {
                let tables = self.tables.read().map_err(|_| DriverError::Poisoned)?;
                Ok(tables
                    .index
                    .get(&id.key())
                    .and_then(|seq| tables.rows.get(seq))
                    .map(|(_, doc)| doc.clone())
                    .unwrap_or(Value::Null))
            }
            RawTarget::Query(query) => Ok(Value::Array(self.snapshot(query)?)),
        }
    }

    async fn persist(&self, mut entity: T) -> Result<T, DriverError> {
        let mut tables = self.tables.write().map_err(|_| DriverError::Poisoned)?;

        let id = match entity.id() {
            Some(id) => id.clone(),
            None => {
                // Skip identities already taken by caller-assigned records.
                let exhausted = || DriverError::identity_exhausted(T::COLLECTION);
                let mut candidate = T::Id::generate(tables.last_id.as_ref()).ok_or_else(exhausted)?;
                while tables.index.contains_key(&candidate.key()) {
                    candidate = T::Id::generate(Some(&candidate)).ok_or_else(exhausted)?;
                }
                tables.last_id = Some(candidate.clone());
                entity.set_id(candidate.clone());
                candidate
            }
        };

        let key = id.key();
        let document = encode(&entity)?;

        let existing = tables.index.get(&key).copied();
        match existing {
            Some(seq) => {
                tables.rows.insert(seq, (key, document));
            }
            None => {
                let seq = tables.next_seq;
                tables.next_seq += 1;
                tables.index.insert(key.clone(), seq);
                tables.rows.insert(seq, (key, document));
            }
        }

        Ok(entity)
    }

    async fn remove(&self, id: &T::Id) -> Result<bool, DriverError> {
        let mut tables = self.tables.write().map_err(|_| DriverError::Poisoned)?;
        let removed = tables.index.remove(&id.key());
        match removed {
            Some(seq) => {
                tables.rows.remove(&seq);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
