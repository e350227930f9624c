//! Integration tests for the full model pipeline.
//!
//! Tests: Model → validation → InMemoryDriver → lazy handles
//!
//! Verifies:
//! - save/get round-trips and destroy produces a clean not-found
//! - validation rejects writes before the driver sees them
//! - abandoned collections release their cursors
//! - writes to one identity keep issue order under concurrency

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde::{Deserialize, Serialize};
    use serde_json::json;

    use stratum_core::{Entity, ModelError, Rule, ValidationRegistry, ValueKind};
    use stratum_model::{Direction, HandleStatus, Model, QueryDescriptor};

    use crate::driver::InMemoryDriver;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct User {
        id: Option<u64>,
        name: String,
        age: i64,
        #[serde(default)]
        email: Option<String>,
    }

    impl User {
        fn new(name: &str, age: i64) -> Self {
            Self {
                id: None,
                name: name.to_string(),
                age,
                email: None,
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
            registry
                .register("name", Rule::required())
                .register("name", Rule::kind(ValueKind::String));
        }
    }

    type Users = Model<User, Arc<InMemoryDriver<User>>>;

    fn setup() -> (Users, Arc<InMemoryDriver<User>>) {
        let driver = Arc::new(InMemoryDriver::new());
        (Model::new(driver.clone()), driver)
    }

    async fn seed(users: &Users, rows: &[(&str, i64)]) -> Vec<User> {
        let mut out = Vec::new();
        for (name, age) in rows {
            out.push(users.save(User::new(name, *age)).await.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn save_then_get_round_trips_every_field() {
        let (users, _) = setup();
        let mut ann = User::new("Ann", 30);
        ann.email = Some("ann@example.com".to_string());

        let saved = users.save(ann.clone()).await.unwrap();
        let loaded = users.get(saved.id.unwrap()).fetch().await.unwrap().unwrap();

        assert_eq!(loaded, saved);
        assert_eq!(loaded.email, ann.email);
    }

    #[tokio::test]
    async fn destroy_then_get_is_not_found_not_an_error() {
        let (users, _) = setup();
        let ann = users.save(User::new("Ann", 30)).await.unwrap();

        users.destroy(&ann).await.unwrap();
        let outcome = users.get(ann.id.unwrap()).fetch().await;
        assert!(matches!(outcome, Ok(None)));
    }

    #[tokio::test]
    async fn all_and_unfiltered_filter_agree() {
        let (users, _) = setup();
        seed(&users, &[("Ann", 30), ("Bob", 17), ("Cid", 45)]).await;

        let all = users.all().collect().await.unwrap();
        let filtered = users
            .filter_json(json!({}))
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(all, filtered);
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn partial_consumption_does_not_leak_cursors() {
        let (users, driver) = setup();
        seed(&users, &[("Ann", 30), ("Bob", 17), ("Cid", 45)]).await;

        {
            let mut handle = users.all();
            assert!(handle.next().await.unwrap().is_some());
            assert_eq!(driver.stats().cursors_open(), 1);
        }
        assert_eq!(driver.stats().cursors_open(), 0);

        let mut handle = users.all();
        handle.next().await.unwrap();
        handle.cancel();
        assert_eq!(handle.status(), HandleStatus::Cancelled);

        users.filter(QueryDescriptor::new()).first().fetch().await.unwrap();

        let stats = driver.stats();
        assert_eq!(stats.cursors_opened, 3);
        assert_eq!(stats.cursors_open(), 0);
    }

    #[tokio::test]
    async fn negative_age_is_rejected_before_persistence() {
        let (mut users, driver) = setup();
        users.validate("age", Rule::min(0.0));

        let err = users.save(User::new("Ann", -1)).await.unwrap_err();
        let ModelError::Validation(errors) = err else {
            panic!("expected a validation error");
        };
        assert_eq!(errors.for_attribute("age").count(), 1);
        assert!(driver.is_empty());
    }

    #[tokio::test]
    async fn get_on_empty_store_is_not_found() {
        let (users, _) = setup();
        assert!(matches!(users.get(42).fetch().await, Ok(None)));
    }

    #[tokio::test]
    async fn fan_out_rules_apply_to_each_attribute() {
        let (mut users, _) = setup();
        users.validate(["name", "email"], Rule::max_length(3));

        let mut u = User::new("Annabel", 30);
        u.email = Some("a@b.example".to_string());
        let err = users.save(u).await.unwrap_err();
        let ModelError::Validation(errors) = err else {
            panic!("expected a validation error");
        };
        let attrs: Vec<_> = errors.failures().iter().map(|f| f.attribute.as_str()).collect();
        assert_eq!(attrs, vec!["name", "email"]);
    }

    #[tokio::test]
    async fn finder_composes_order_and_window() {
        let (users, _) = setup();
        seed(&users, &[("Ann", 30), ("Bob", 17), ("Cid", 45), ("Dee", 22)]).await;

        let names: Vec<_> = users
            .find()
            .filter(QueryDescriptor::new().gte("age", 18))
            .order_by("age", Direction::Desc)
            .offset(1)
            .limit(2)
            .all()
            .collect()
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.name)
            .collect();
        assert_eq!(names, vec!["Ann", "Dee"]);

        let raw = users
            .find()
            .filter(QueryDescriptor::new().eq("name", "Bob"))
            .raw()
            .fetch()
            .await
            .unwrap();
        assert_eq!(raw[0]["age"], json!(17));

        assert_eq!(users.query(1).fetch().await.unwrap()["name"], json!("Ann"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_updates_to_one_record_apply_in_issue_order() {
        let (users, _) = setup();
        let ann = users.save(User::new("Ann", 0)).await.unwrap();

        let mut tasks = Vec::new();
        for age in 1..=20 {
            let mut next = ann.clone();
            next.age = age;
            tasks.push(tokio::spawn(users.save(next)));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }

        let stored = users.get(ann.id.unwrap()).require().await.unwrap();
        assert_eq!(stored.age, 20);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn callback_writes_to_one_record_apply_in_issue_order() {
        let (users, driver) = setup();

        for _ in 0..25 {
            let ann = users.save(User::new("Ann", 0)).await.unwrap();
            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

            for age in 1..=5 {
                let mut next = ann.clone();
                next.age = age;
                let tx = tx.clone();
                users.save_with(next, move |res| {
                    let _ = tx.send(res);
                });
            }
            drop(tx);
            while let Some(res) = rx.recv().await {
                res.unwrap();
            }

            let stored = users.get(ann.id.unwrap()).require().await.unwrap();
            assert_eq!(stored.age, 5);
        }

        // A trailing destroy issued after the saves runs last.
        let ann = users.save(User::new("Bob", 0)).await.unwrap();
        let mut next = ann.clone();
        next.age = 1;
        let save = users.save_with(next, |res| {
            res.unwrap();
        });
        let destroy = users.destroy_with(ann.clone(), |res| res.unwrap());
        save.await.unwrap();
        destroy.await.unwrap();
        assert!(users.get(ann.id.unwrap()).fetch().await.unwrap().is_none());
        assert_eq!(driver.len(), 25);
    }

    #[tokio::test]
    async fn handle_created_before_write_sees_the_write() {
        let (users, _) = setup();
        let handle = users.filter(QueryDescriptor::new().eq("name", "Ann"));
        users.save(User::new("Ann", 30)).await.unwrap();

        // Lazy: the query runs at consumption time, not at creation time.
        assert_eq!(handle.count().await.unwrap(), 1);
    }
}
