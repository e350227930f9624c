//! Demo wiring: a `users` controller over an in-memory `User` model.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodRouter, get};
use axum::Json;
use serde::{Deserialize, Serialize};

use stratum_core::{Entity, Rule, ValidationRegistry, ValueKind};
use stratum_infra::InMemoryDriver;
use stratum_model::{Direction, Model, QueryDescriptor};

use crate::application::Application;
use crate::config::Configuration;
use crate::controller::Controller;
use crate::errors::{AppError, model_error_to_response};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: Option<u64>,
    pub name: String,
    pub age: i64,
    #[serde(default)]
    pub email: Option<String>,
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
            .register("name", Rule::max_length(64))
            .register("age", Rule::kind(ValueKind::Integer))
            .register("age", Rule::min(0.0))
            .register("email", Rule::max_length(254));
    }
}

pub type Users = Model<User, Arc<InMemoryDriver<User>>>;

#[derive(Debug, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub age: i64,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserFilter {
    pub name: Option<String>,
    pub min_age: Option<i64>,
    pub limit: Option<usize>,
}

impl UserFilter {
    fn descriptor(&self) -> QueryDescriptor {
        let mut query = QueryDescriptor::new().order_by("id", Direction::Asc);
        if let Some(name) = &self.name {
            query = query.eq("name", name.as_str());
        }
        if let Some(min_age) = self.min_age {
            query = query.gte("age", min_age);
        }
        if let Some(limit) = self.limit {
            query = query.limit(limit);
        }
        query
    }
}

pub struct UsersController {
    users: Users,
}

impl UsersController {
    pub fn new(users: Users) -> Self {
        Self { users }
    }
}

impl Controller for UsersController {
    fn name(&self) -> &str {
        "users"
    }

    fn actions(&self) -> Vec<(String, MethodRouter)> {
        vec![
            (
                "collection".to_string(),
                get(index).post(create).with_state(self.users.clone()),
            ),
            (
                "member".to_string(),
                get(show)
                    .put(update)
                    .delete(destroy)
                    .with_state(self.users.clone()),
            ),
        ]
    }

    fn routes(&self) -> Vec<(String, String)> {
        vec![
            ("/users".to_string(), "collection".to_string()),
            ("/users/:id".to_string(), "member".to_string()),
        ]
    }
}

async fn index(State(users): State<Users>, Query(filter): Query<UserFilter>) -> Response {
    match users.filter(filter.descriptor()).collect().await {
        Ok(list) => Json(list).into_response(),
        Err(e) => model_error_to_response(e),
    }
}

async fn create(State(users): State<Users>, Json(req): Json<NewUser>) -> Response {
    let user = User {
        id: None,
        name: req.name,
        age: req.age,
        email: req.email,
    };
    match users.save(user).await {
        Ok(saved) => (StatusCode::CREATED, Json(saved)).into_response(),
        Err(e) => model_error_to_response(e),
    }
}

async fn show(State(users): State<Users>, Path(id): Path<u64>) -> Response {
    match users.get(id).require().await {
        Ok(user) => Json(user).into_response(),
        Err(e) => model_error_to_response(e),
    }
}

async fn update(State(users): State<Users>, Path(id): Path<u64>, Json(req): Json<NewUser>) -> Response {
    if let Err(e) = users.get(id).require().await {
        return model_error_to_response(e);
    }
    let user = User {
        id: Some(id),
        name: req.name,
        age: req.age,
        email: req.email,
    };
    match users.save(user).await {
        Ok(saved) => Json(saved).into_response(),
        Err(e) => model_error_to_response(e),
    }
}

async fn destroy(State(users): State<Users>, Path(id): Path<u64>) -> Response {
    match users.destroy_id(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => model_error_to_response(e),
    }
}

/// The demo application with its `users` controller registered.
pub fn build_app(root: impl Into<PathBuf>, config: Configuration) -> Result<Application, AppError> {
    let users: Users = Model::new(Arc::new(InMemoryDriver::new()));
    let mut app = Application::with_config(root, config);
    app.register(UsersController::new(users))?;
    Ok(app)
}
