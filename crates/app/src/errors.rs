use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use stratum_core::ModelError;

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid route target `{0}` (expected `controller#action`)")]
    InvalidTarget(String),

    #[error("route `{path}` targets unknown controller `{controller}`")]
    UnknownController { path: String, controller: String },

    #[error("route `{path}` targets unknown action `{controller}#{action}`")]
    UnknownAction {
        path: String,
        controller: String,
        action: String,
    },

    #[error("controller `{0}` is already registered")]
    DuplicateController(String),

    #[error("server i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

pub fn model_error_to_response(err: ModelError) -> axum::response::Response {
    match err {
        ModelError::NotFound { collection, id } => json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("{collection} `{id}` not found"),
        ),
        ModelError::Validation(errors) => {
            let details: Vec<_> = errors
                .failures()
                .iter()
                .map(|f| {
                    json!({
                        "attribute": f.attribute,
                        "rule": f.rule,
                        "message": f.message,
                    })
                })
                .collect();
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                axum::Json(json!({
                    "error": "validation_error",
                    "message": errors.to_string(),
                    "details": details,
                })),
            )
                .into_response()
        }
        ModelError::InvalidQuery(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_query", msg),
        ModelError::Serialization(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "serialization_error", msg)
        }
        ModelError::Driver(e) => {
            tracing::error!(error = %e, "driver failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "driver_error", e.to_string())
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
