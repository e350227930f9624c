use axum::routing::MethodRouter;

/// A named group of HTTP actions.
///
/// Actions are axum method routers, so one action may answer several verbs
/// (`get(list).post(create)`). Handler state is bound by the controller
/// itself, typically with `MethodRouter::with_state`.
pub trait Controller: Send + Sync + 'static {
    /// Name used in route targets (`"users"` in `"users#show"`).
    fn name(&self) -> &str;

    fn actions(&self) -> Vec<(String, MethodRouter)>;

    /// Default routes as `(path, action)` pairs. Applied at registration and
    /// overridable with `Application::add_route`.
    fn routes(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}
