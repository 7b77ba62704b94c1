use crate::core::traits::{LanguageModel, ModelAccess};
use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use di::Ref;
use di_axum::Inject;
use serde::Serialize;
use thiserror::Error;

pub mod completions;
pub mod health;

/// All public endpoints, mounted under `/v1`.
pub fn router() -> Router {
    Router::new().nest(
        "/v1",
        Router::new()
            .merge(health::router())
            .merge(completions::router()),
    )
}

/// The loaded model, resolved through [`ModelAccess`] before the handler runs.
///
/// Rejects the request with `503 Service Unavailable` while no model is loaded.
pub struct ReadyModel(pub Ref<dyn LanguageModel>);

#[async_trait]
impl<S> FromRequestParts<S> for ReadyModel
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Response> {
        let Inject(model_access) = Inject::<dyn ModelAccess>::from_request_parts(parts, state)
            .await
            .map_err(IntoResponse::into_response)?;

        model_access
            .acquire()
            .into_result()
            .map(ReadyModel)
            .map_err(IntoResponse::into_response)
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("inference failed")]
    Inference,
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Inference => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (
            status,
            Json(ErrorBody {
                detail: self.to_string(),
            }),
        )
            .into_response()
    }
}
