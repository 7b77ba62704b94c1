//! Health endpoint

use crate::core::traits::ModelAccess;
use axum::routing::get;
use axum::{Json, Router};
use di_axum::Inject;

pub fn router() -> Router {
    Router::new().route("/health", get(health))
}

/// Reports whether the model is loaded. Polled by clients before they send
/// completion requests, so it never goes through the logging gate path.
async fn health(Inject(model_access): Inject<dyn ModelAccess>) -> Json<schemas::Health> {
    let model_loaded = model_access.is_ready();

    Json(schemas::Health {
        status: if model_loaded { "ok" } else { "loading" },
        model_loaded,
        model: model_access.model_name(),
    })
}

pub mod schemas {
    use serde::Serialize;

    #[derive(Serialize, Debug)]
    pub struct Health {
        pub status: &'static str,
        pub model_loaded: bool,
        pub model: Option<String>,
    }
}
