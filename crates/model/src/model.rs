//! `Model<T, D>`: typed CRUD, query building and validation over a driver.
//!
//! ## Calling convention
//!
//! Writes are `async` and resolve to a `Result` carrying either the persisted
//! entity or a [`ModelError`]; `save_with`/`destroy_with` spawn the same work and
//! report through a completion callback instead. Reads return lazy handles (see
//! [`crate::handle`]); nothing touches the driver until a handle is consumed.
//!
//! ## Validation
//!
//! Rules come from [`Entity::validations`] when the model is built, plus any
//! registered through [`Model::validate`]. `save` evaluates them before calling
//! the driver; error-severity failures reject the save and the driver is never
//! invoked. Registration takes `&mut self`, so the registry has a single writer;
//! clones share it read-only and copy it on their next registration.
//!
//! ## Ordering
//!
//! Writes against the same identity go through a [`WriteSequencer`] and reach the
//! driver in issue order. A write is issued when `save`/`destroy` is called (or
//! `save_with`/`destroy_with`); awaiting or spawning the returned future later
//! does not change its place.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use tokio::task::JoinHandle;

use stratum_core::{
    Attrs, Entity, Identity, ModelError, Rule, ValidationRegistry, ValidationReport, attributes,
};

use crate::driver::{Driver, RawTarget};
use crate::handle::{Collection, Finder, Lookup, Raw, Unique};
use crate::query::QueryDescriptor;
use crate::sequencer::{WriteSequencer, WriteTicket};

pub struct Model<T: Entity, D: Driver<T>> {
    driver: Arc<D>,
    validations: Arc<ValidationRegistry>,
    writes: Arc<WriteSequencer>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity, D: Driver<T>> Clone for Model<T, D> {
    fn clone(&self) -> Self {
        Self {
            driver: self.driver.clone(),
            validations: self.validations.clone(),
            writes: self.writes.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity, D: Driver<T>> Model<T, D> {
    pub fn new(driver: D) -> Self {
        Self::with_driver(Arc::new(driver))
    }

    /// Builds a model over a shared driver.
    pub fn with_driver(driver: Arc<D>) -> Self {
        let mut registry = ValidationRegistry::new();
        T::validations(&mut registry);

        Self {
            driver,
            validations: Arc::new(registry),
            writes: Arc::new(WriteSequencer::new()),
            _entity: PhantomData,
        }
    }

    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    // ---- validation -------------------------------------------------------

    /// Registers `rule` for one attribute (`"age"`) or a set of attributes
    /// (`["first_name", "last_name"]`).
    pub fn validate(&mut self, attrs: impl Into<Attrs>, rule: Rule) -> &mut Self {
        Arc::make_mut(&mut self.validations).register(attrs, rule);
        self
    }

    pub fn validations(&self) -> &ValidationRegistry {
        &self.validations
    }

    /// Drops every registered rule, including the type-level ones.
    pub fn clear_validations(&mut self) {
        Arc::make_mut(&mut self.validations).clear();
    }

    /// Runs validation without persisting; warnings are included in the report.
    pub fn check(&self, entity: &T) -> Result<ValidationReport, ModelError> {
        let attrs = attributes(entity)?;
        Ok(self.validations.evaluate(&attrs))
    }

    // ---- writes -----------------------------------------------------------

    /// Validates and persists `entity`: insert when it has no identity yet,
    /// update otherwise. Resolves to the entity as stored.
    ///
    /// The write takes its place in the identity's queue when `save` is called,
    /// not when the returned future is first polled.
    pub fn save(&self, entity: T) -> impl Future<Output = Result<T, ModelError>> + Send + use<T, D> {
        let ticket = entity.id().map(|id| self.writes.reserve(id.key()));
        let model = self.clone();
        async move { model.save_in_turn(entity, ticket).await }
    }

    async fn save_in_turn(&self, entity: T, ticket: Option<WriteTicket>) -> Result<T, ModelError> {
        let report = self.check(&entity)?;
        for warning in &report.warnings {
            tracing::warn!(collection = T::COLLECTION, %warning, "validation warning");
        }
        if let Err(errors) = report.into_result() {
            tracing::warn!(collection = T::COLLECTION, %errors, "save rejected by validation");
            return Err(ModelError::Validation(errors));
        }

        let _write = match ticket {
            Some(ticket) => Some(ticket.wait().await),
            None => None,
        };

        tracing::debug!(
            collection = T::COLLECTION,
            insert = entity.id().is_none(),
            "persisting"
        );
        Ok(self.driver.persist(entity).await?)
    }

    /// Removes the record backing `entity`.
    ///
    /// Fails with `NotFound` when the entity was never saved or the record is gone.
    pub fn destroy(&self, entity: &T) -> impl Future<Output = Result<(), ModelError>> + Send + use<T, D> {
        let queued = entity
            .id()
            .map(|id| (id.clone(), self.writes.reserve(id.key())));
        let model = self.clone();
        async move {
            let (id, ticket) =
                queued.ok_or_else(|| ModelError::not_found(T::COLLECTION, "<unsaved>"))?;
            model.destroy_in_turn(id, ticket).await
        }
    }

    pub fn destroy_id(&self, id: &T::Id) -> impl Future<Output = Result<(), ModelError>> + Send + use<T, D> {
        let ticket = self.writes.reserve(id.key());
        let id = id.clone();
        let model = self.clone();
        async move { model.destroy_in_turn(id, ticket).await }
    }

    async fn destroy_in_turn(&self, id: T::Id, ticket: WriteTicket) -> Result<(), ModelError> {
        let _write = ticket.wait().await;

        tracing::debug!(collection = T::COLLECTION, %id, "removing");
        if self.driver.remove(&id).await? {
            Ok(())
        } else {
            Err(ModelError::not_found(T::COLLECTION, id))
        }
    }

    /// Spawns `save` on the current tokio runtime and reports through `callback`.
    ///
    /// Ordering against other writes to the same identity is fixed here, before
    /// the task is spawned.
    pub fn save_with<F>(&self, entity: T, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<T, ModelError>) + Send + 'static,
    {
        let write = self.save(entity);
        tokio::spawn(async move { callback(write.await) })
    }

    /// Spawns `destroy` on the current tokio runtime and reports through `callback`.
    pub fn destroy_with<F>(&self, entity: T, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<(), ModelError>) + Send + 'static,
    {
        let write = self.destroy(&entity);
        tokio::spawn(async move { callback(write.await) })
    }

    // ---- reads ------------------------------------------------------------

    /// Every record, unfiltered. Same as `filter(QueryDescriptor::new())`.
    pub fn all(&self) -> Collection<T, D> {
        self.filter(QueryDescriptor::new())
    }

    /// Records matching `query`; evaluated lazily when the handle is consumed.
    pub fn filter(&self, query: impl Into<QueryDescriptor>) -> Collection<T, D> {
        Collection::new(self.driver.clone(), query.into())
    }

    /// Like `filter`, taking a JSON mapping such as
    /// `{"name": "Ann", "age": {"$gte": 18}}`.
    pub fn filter_json(&self, query: serde_json::Value) -> Result<Collection<T, D>, ModelError> {
        Ok(self.filter(QueryDescriptor::try_from(query)?))
    }

    /// Identity lookup.
    pub fn get(&self, id: T::Id) -> Unique<T, D> {
        Unique::new(self.driver.clone(), Lookup::Id(id))
    }

    /// First record whose identity attribute equals `id`, in driver order.
    ///
    /// Unlike `get`, this never assumes the identity is unique in storage.
    pub fn first(&self, id: T::Id) -> Unique<T, D> {
        Unique::new(self.driver.clone(), Lookup::FirstById(id))
    }

    /// Driver-level query composition.
    pub fn find(&self) -> Finder<T, D> {
        Finder::new(self.driver.clone())
    }

    /// Backend-native result for one identity.
    pub fn query(&self, id: T::Id) -> Raw<T, D> {
        Raw::new(self.driver.clone(), RawTarget::Id(id))
    }
}

impl<T: Entity, D: Driver<T>> core::fmt::Debug for Model<T, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Model")
            .field("collection", &T::COLLECTION)
            .field("validations", &self.validations)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    use stratum_core::DriverError;

    use super::*;
    use crate::driver::{BoxCursor, Cursor};
    use crate::handle::HandleStatus;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct User {
        id: Option<u64>,
        name: String,
        age: i64,
    }

    impl User {
        fn new(name: &str, age: i64) -> Self {
            Self {
                id: None,
                name: name.to_string(),
                age,
            }
        }
    }

    impl Entity for User {
        type Id = u64;
        const COLLECTION: &'static str = "users";

        fn id(&self) -> Option<&u64> {
            self.id.as_ref()
        }

        fn set_id(&mut self, id: u64) {
            self.id = Some(id);
        }

        fn validations(registry: &mut ValidationRegistry) {
            registry.register("name", Rule::required());
        }
    }

    #[derive(Debug, Default)]
    struct Counters {
        opened: AtomicUsize,
        closed: AtomicUsize,
        persisted: AtomicUsize,
        fetched: AtomicUsize,
    }

    /// Vec-backed driver that records every call it receives.
    #[derive(Debug, Default)]
    struct MockDriver {
        rows: Mutex<Vec<User>>,
        counters: Arc<Counters>,
        fail_with: Option<DriverError>,
    }

    struct MockCursor {
        rows: std::vec::IntoIter<User>,
        counters: Arc<Counters>,
    }

    #[async_trait]
    impl Cursor<User> for MockCursor {
        async fn next(&mut self) -> Result<Option<User>, DriverError> {
            Ok(self.rows.next())
        }
    }

    impl Drop for MockCursor {
        fn drop(&mut self) {
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Driver<User> for MockDriver {
        type Raw = serde_json::Value;

        async fn open(&self, query: &QueryDescriptor) -> Result<BoxCursor<User>, DriverError> {
            if let Some(e) = &self.fail_with {
                return Err(e.clone());
            }
            self.counters.opened.fetch_add(1, Ordering::SeqCst);
            let docs: Vec<serde_json::Value> = self
                .rows
                .lock()
                .unwrap()
                .iter()
                .map(|u| serde_json::to_value(u).unwrap())
                .filter(|d| query.matches(d))
                .collect();
            let rows: Vec<User> = query
                .window(docs)
                .into_iter()
                .map(|d| serde_json::from_value(d).unwrap())
                .collect();
            Ok(Box::new(MockCursor {
                rows: rows.into_iter(),
                counters: self.counters.clone(),
            }))
        }

        async fn fetch(&self, id: &u64) -> Result<Option<User>, DriverError> {
            self.counters.fetched.fetch_add(1, Ordering::SeqCst);
            Ok(self.rows.lock().unwrap().iter().find(|u| u.id == Some(*id)).cloned())
        }

        async fn raw(&self, target: &RawTarget<u64>) -> Result<serde_json::Value, DriverError> {
            match target {
                RawTarget::Id(id) => Ok(json!({ "raw_id": id })),
                RawTarget::Query(q) => Ok(json!({ "predicates": q.predicates().len() })),
            }
        }

        async fn persist(&self, mut entity: User) -> Result<User, DriverError> {
            if let Some(e) = &self.fail_with {
                return Err(e.clone());
            }
            self.counters.persisted.fetch_add(1, Ordering::SeqCst);
            let mut rows = self.rows.lock().unwrap();
            match entity.id {
                Some(id) => {
                    rows.retain(|u| u.id != Some(id));
                    rows.push(entity.clone());
                }
                None => {
                    let next = rows.iter().filter_map(|u| u.id).max();
                    entity.set_id(u64::generate(next.as_ref()).unwrap());
                    rows.push(entity.clone());
                }
            }
            Ok(entity)
        }

        async fn remove(&self, id: &u64) -> Result<bool, DriverError> {
            let mut rows = self.rows.lock().unwrap();
            let before = rows.len();
            rows.retain(|u| u.id != Some(*id));
            Ok(rows.len() != before)
        }
    }

    fn model() -> (Model<User, MockDriver>, Arc<Counters>) {
        let driver = MockDriver::default();
        let counters = driver.counters.clone();
        (Model::new(driver), counters)
    }

    #[tokio::test]
    async fn save_assigns_identity_and_get_round_trips() {
        let (users, _) = model();
        let saved = users.save(User::new("Ann", 30)).await.unwrap();
        assert_eq!(saved.id, Some(1));

        let loaded = users.get(1).fetch().await.unwrap();
        assert_eq!(loaded, Some(saved));
    }

    #[tokio::test]
    async fn save_with_existing_identity_updates() {
        let (users, _) = model();
        let mut ann = users.save(User::new("Ann", 30)).await.unwrap();
        ann.age = 31;
        users.save(ann.clone()).await.unwrap();

        let all = users.all().collect().await.unwrap();
        assert_eq!(all, vec![ann]);
    }

    #[tokio::test]
    async fn validation_failure_skips_the_driver() {
        let (mut users, counters) = model();
        users.validate("age", Rule::min(0.0));

        let err = users.save(User::new("Ann", -1)).await.unwrap_err();
        match err {
            ModelError::Validation(errors) => {
                assert_eq!(errors.failures().len(), 1);
                assert_eq!(errors.failures()[0].attribute, "age");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_eq!(counters.persisted.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn type_level_rules_apply() {
        let (users, counters) = model();
        let err = users.save(User::new("", 20)).await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(counters.persisted.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn warnings_do_not_block() {
        let (mut users, _) = model();
        users.validate("age", Rule::max(120.0).warning());
        let saved = users.save(User::new("Old", 130)).await.unwrap();
        assert_eq!(saved.id, Some(1));
    }

    #[tokio::test]
    async fn clones_share_rules_until_one_registers() {
        let (mut users, _) = model();
        users.validate("age", Rule::min(0.0));
        let mut other = users.clone();
        other.validate("age", Rule::max(10.0));

        assert_eq!(users.validations().rules_for("age").len(), 1);
        assert_eq!(other.validations().rules_for("age").len(), 2);

        other.clear_validations();
        assert!(other.validations().is_empty());
        assert!(!users.validations().is_empty());
    }

    #[tokio::test]
    async fn destroy_reports_not_found() {
        let (users, _) = model();
        let ann = users.save(User::new("Ann", 30)).await.unwrap();

        users.destroy(&ann).await.unwrap();
        assert_eq!(users.get(1).fetch().await.unwrap(), None);

        let err = users.destroy(&ann).await.unwrap_err();
        assert!(err.is_not_found());

        let err = users.destroy(&User::new("Never", 1)).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn handles_are_lazy() {
        let (users, counters) = model();
        let handle = users.all();
        let unique = users.get(7);
        let _raw = users.query(7);
        let _first = users.first(7);

        assert_eq!(handle.status(), HandleStatus::Pending);
        assert_eq!(counters.opened.load(Ordering::SeqCst), 0);
        assert_eq!(counters.fetched.load(Ordering::SeqCst), 0);

        assert_eq!(unique.fetch().await.unwrap(), None);
        assert_eq!(counters.fetched.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn abandoning_a_collection_releases_the_cursor() {
        let (users, counters) = model();
        for i in 0..5 {
            users.save(User::new(&format!("u{i}"), i)).await.unwrap();
        }

        let mut handle = users.all();
        assert!(handle.next().await.unwrap().is_some());
        assert_eq!(handle.status(), HandleStatus::Open);
        drop(handle);

        let mut cancelled = users.all();
        cancelled.next().await.unwrap();
        cancelled.cancel();
        assert_eq!(cancelled.status(), HandleStatus::Cancelled);
        assert_eq!(cancelled.next().await.unwrap(), None);

        assert_eq!(counters.opened.load(Ordering::SeqCst), 2);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausted_collection_stays_exhausted() {
        let (users, counters) = model();
        users.save(User::new("Ann", 30)).await.unwrap();

        let mut handle = users.all();
        assert!(handle.next().await.unwrap().is_some());
        assert_eq!(handle.next().await.unwrap(), None);
        assert_eq!(handle.status(), HandleStatus::Exhausted);
        assert_eq!(handle.next().await.unwrap(), None);
        assert_eq!(counters.opened.load(Ordering::SeqCst), 1);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn chained_filters_compose() {
        let (users, _) = model();
        for (name, age) in [("Ann", 30), ("Bob", 17), ("Cid", 45)] {
            users.save(User::new(name, age)).await.unwrap();
        }

        let adults = users
            .filter(QueryDescriptor::new().gte("age", 18))
            .filter(QueryDescriptor::new().lt("age", 40))
            .collect()
            .await
            .unwrap();
        assert_eq!(adults.len(), 1);
        assert_eq!(adults[0].name, "Ann");

        let by_json = users
            .filter_json(json!({"age": {"$gte": 18}}))
            .unwrap()
            .count()
            .await
            .unwrap();
        assert_eq!(by_json, 2);

        assert!(matches!(
            users.filter_json(json!("nope")),
            Err(ModelError::InvalidQuery(_))
        ));
    }

    #[tokio::test]
    async fn all_equals_unfiltered_filter() {
        let (users, _) = model();
        for (name, age) in [("Ann", 30), ("Bob", 17)] {
            users.save(User::new(name, age)).await.unwrap();
        }
        let a = users.all().collect().await.unwrap();
        let b = users.filter(QueryDescriptor::new()).collect().await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn first_tolerates_many_matches_and_get_is_identity() {
        let (users, _) = model();
        users.save(User::new("Ann", 30)).await.unwrap();
        users.save(User::new("Ann", 31)).await.unwrap();

        let first = users
            .filter(QueryDescriptor::new().eq("name", "Ann"))
            .first()
            .fetch()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.age, 30);

        let by_id = users.first(2).require().await.unwrap();
        assert_eq!(by_id.age, 31);

        let err = users.get(9).require().await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn find_and_query_reach_the_driver() {
        let (users, _) = model();
        let raw = users.query(3).fetch().await.unwrap();
        assert_eq!(raw, json!({"raw_id": 3}));

        let raw = users
            .find()
            .filter(QueryDescriptor::new().eq("name", "Ann"))
            .raw()
            .fetch()
            .await
            .unwrap();
        assert_eq!(raw, json!({"predicates": 1}));
    }

    #[tokio::test]
    async fn driver_errors_pass_through_unchanged() {
        let driver = MockDriver {
            fail_with: Some(DriverError::timeout("slow")),
            ..Default::default()
        };
        let users = Model::new(driver);

        let err = users.save(User::new("Ann", 1)).await.unwrap_err();
        assert_eq!(err, ModelError::Driver(DriverError::timeout("slow")));

        let mut handle = users.all();
        let err = handle.next().await.unwrap_err();
        assert!(err.is_driver());
        assert_eq!(handle.status(), HandleStatus::Exhausted);
    }

    #[tokio::test]
    async fn callback_variants_report_results() {
        let (users, _) = model();
        let (tx, rx) = tokio::sync::oneshot::channel();
        users
            .save_with(User::new("Ann", 30), move |res| {
                let _ = tx.send(res);
            })
            .await
            .unwrap();
        let saved = rx.await.unwrap().unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel();
        users
            .destroy_with(saved, move |res| {
                let _ = tx.send(res);
            })
            .await
            .unwrap();
        assert!(rx.await.unwrap().is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn save_with_applies_same_identity_writes_in_call_order() {
        let (users, _) = model();

        for round in 0..50 {
            let base = users.save(User::new("Ann", 0)).await.unwrap();

            let mut tasks = Vec::new();
            for age in 1..=5 {
                let mut next = base.clone();
                next.age = age;
                tasks.push(users.save_with(next, |res| {
                    res.unwrap();
                }));
            }
            for t in tasks {
                t.await.unwrap();
            }

            let stored = users.get(base.id.unwrap()).require().await.unwrap();
            assert_eq!(stored.age, 5, "round {round}: writes reached the driver out of order");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn spawned_saves_keep_call_order() {
        let (users, _) = model();
        let base = users.save(User::new("Ann", 0)).await.unwrap();

        // Futures are created in order but spawned last-first.
        let writes: Vec<_> = (1..=20)
            .map(|age| {
                let mut next = base.clone();
                next.age = age;
                users.save(next)
            })
            .collect();
        let tasks: Vec<_> = writes.into_iter().rev().map(tokio::spawn).collect();
        for t in tasks {
            t.await.unwrap().unwrap();
        }

        let stored = users.get(1).require().await.unwrap();
        assert_eq!(stored.age, 20);
    }

    #[tokio::test]
    async fn rejected_save_does_not_hold_up_the_queue() {
        let (users, _) = model();
        let mut ann = users.save(User::new("Ann", 1)).await.unwrap();

        ann.name = String::new();
        let rejected = users.save(ann.clone());
        ann.name = "Ann".to_string();
        ann.age = 2;
        let accepted = users.save(ann);

        assert!(rejected.await.unwrap_err().is_validation());
        assert_eq!(accepted.await.unwrap().age, 2);
    }

    #[tokio::test]
    async fn first_respects_an_empty_window() {
        let (users, _) = model();
        users.save(User::new("Ann", 30)).await.unwrap();

        let empty = QueryDescriptor::new().limit(0);
        assert!(users.filter(empty.clone()).collect().await.unwrap().is_empty());
        assert_eq!(users.filter(empty.clone()).first().fetch().await.unwrap(), None);
        assert_eq!(users.find().with(|_| empty).first().fetch().await.unwrap(), None);

        let windowed = QueryDescriptor::new().offset(0).limit(5);
        let first = users.filter(windowed).first().fetch().await.unwrap();
        assert_eq!(first.map(|u| u.name), Some("Ann".to_string()));
    }
}
