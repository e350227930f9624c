//! `stratum-app`: a thin HTTP application wrapper on axum.
//!
//! - `config`: dotted-key configuration with defaults and environment overlay
//! - `controller` / `routes`: named actions and the `path → controller#action` table
//! - `application`: builds the router and runs the server
//! - `demo`: a `users` controller over the in-memory model

pub mod application;
pub mod config;
pub mod controller;
pub mod demo;
pub mod errors;
pub mod routes;

pub use application::{Application, Server};
pub use config::{ConfigError, Configuration, DEFAULT_PORT};
pub use controller::Controller;
pub use errors::AppError;
pub use routes::{RouteTable, RouteTarget};
