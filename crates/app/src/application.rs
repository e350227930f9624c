use std::collections::BTreeMap;
use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use axum::routing::{MethodRouter, get};
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::config::{self, Configuration};
use crate::controller::Controller;
use crate::errors::AppError;
use crate::routes::{RouteTable, RouteTarget};

const HEALTH_PATH: &str = "/health";

/// HTTP application: configuration, registered controllers and a route table
/// turned into an axum router on demand.
pub struct Application {
    root: PathBuf,
    config: Configuration,
    controllers: BTreeMap<String, BTreeMap<String, MethodRouter>>,
    routes: RouteTable,
}

impl Application {
    pub const DEFAULT_PORT: u16 = config::DEFAULT_PORT;

    /// Application rooted at `root`, configured from defaults and the
    /// process environment.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_config(root, Configuration::load())
    }

    pub fn with_config(root: impl Into<PathBuf>, config: Configuration) -> Self {
        Self {
            root: root.into(),
            config,
            controllers: BTreeMap::new(),
            routes: RouteTable::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Configuration {
        &mut self.config
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Register a controller's actions and its default routes.
    pub fn register(&mut self, controller: impl Controller) -> Result<&mut Self, AppError> {
        let name = controller.name().to_string();
        if self.controllers.contains_key(&name) {
            return Err(AppError::DuplicateController(name));
        }

        let actions: BTreeMap<String, MethodRouter> = controller.actions().into_iter().collect();
        tracing::debug!(controller = %name, actions = actions.len(), "controller registered");
        self.controllers.insert(name.clone(), actions);

        for (path, action) in controller.routes() {
            self.routes.insert(path, RouteTarget::new(name.clone(), action));
        }
        Ok(self)
    }

    /// Add or override the route for `path`. `target` is `controller#action`;
    /// whether it exists is checked when the router is built.
    pub fn add_route(&mut self, path: impl Into<String>, target: &str) -> Result<&mut Self, AppError> {
        let target = RouteTarget::parse(target)?;
        self.routes.insert(path, target);
        Ok(self)
    }

    pub fn router(&self) -> Result<Router, AppError> {
        let mut router = Router::new();
        let mut has_health = false;

        for (path, target) in self.routes.iter() {
            let actions = self.controllers.get(&target.controller).ok_or_else(|| {
                AppError::UnknownController {
                    path: path.to_string(),
                    controller: target.controller.clone(),
                }
            })?;
            let action = actions.get(&target.action).ok_or_else(|| AppError::UnknownAction {
                path: path.to_string(),
                controller: target.controller.clone(),
                action: target.action.clone(),
            })?;
            has_health |= path == HEALTH_PATH;
            router = router.route(path, action.clone());
        }

        if !has_health {
            router = router.route(HEALTH_PATH, get(health));
        }

        let static_dir = self.root.join(self.config.get_str("static.path")?);
        Ok(router
            .fallback_service(ServeDir::new(static_dir))
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http())))
    }

    /// Port to listen on: the argument, then the configured `port`, then
    /// [`Application::DEFAULT_PORT`].
    pub fn resolve_port(&self, port: Option<u16>) -> Result<u16, AppError> {
        match port {
            Some(port) => Ok(port),
            None => Ok(self.config.port()?.unwrap_or(Self::DEFAULT_PORT)),
        }
    }

    /// Build the router and bind a listener without serving yet.
    pub async fn bind(&self, port: Option<u16>) -> Result<Server, AppError> {
        let router = self.router()?;
        let port = self.resolve_port(port)?;
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let addr = listener.local_addr()?;
        Ok(Server {
            listener,
            router,
            addr,
        })
    }

    /// Bind and serve until Ctrl-C.
    pub async fn start(&self, port: Option<u16>) -> Result<(), AppError> {
        let server = self.bind(port).await?;
        tracing::info!(
            env = self.config.environment(),
            routes = self.routes.len(),
            "stratum application started"
        );
        tracing::info!("server listening on port: {}", server.local_addr().port());

        server
            .serve_with_shutdown(async {
                tokio::signal::ctrl_c().await.ok();
            })
            .await
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("root", &self.root)
            .field("config", &self.config)
            .field("controllers", &self.controllers.keys().collect::<Vec<_>>())
            .field("routes", &self.routes)
            .finish()
    }
}

/// A bound listener plus the router it will serve.
pub struct Server {
    listener: TcpListener,
    router: Router,
    addr: SocketAddr,
}

impl Server {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn serve(self) -> Result<(), AppError> {
        axum::serve(self.listener, self.router).await?;
        Ok(())
    }

    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<(), AppError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(signal)
            .await?;
        tracing::info!("server stopped");
        Ok(())
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
