use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ControlError, ControlResult};
use crate::extractor::Caller;
use crate::requests::{ApprovalOutcome, RequestRegistry};

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedRequest {
    pub change_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RequestDetail {
    pub change_id: String,
    pub root_only: bool,
    pub request: Value,
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub unseal: String,
}

pub fn api_routes() -> Router {
    Router::new()
        .route("/v1/requests", post(create_request))
        .route(
            "/v1/requests/:id",
            get(get_request).delete(delete_request),
        )
        .route("/v1/requests/:id/approve", post(approve_request))
}

async fn create_request(
    Extension(registry): Extension<Arc<RequestRegistry>>,
    Caller(auth): Caller,
    Json(payload): Json<Value>,
) -> ControlResult<(StatusCode, Json<CreatedRequest>)> {
    let Value::Object(raw) = payload else {
        return Err(ControlError::InputValidation(
            "request body must be a JSON object".into(),
        ));
    };
    let change_id = registry.add(&auth, &raw).await?;
    Ok((StatusCode::CREATED, Json(CreatedRequest { change_id })))
}

async fn get_request(
    Extension(registry): Extension<Arc<RequestRegistry>>,
    Caller(auth): Caller,
    Path(change_id): Path<String>,
) -> ControlResult<Json<RequestDetail>> {
    let request = registry.get(&auth, &change_id).await?;
    Ok(Json(RequestDetail {
        root_only: RequestRegistry::is_root_only(request.as_ref()),
        request: request.fields()?,
        change_id,
    }))
}

async fn delete_request(
    Extension(registry): Extension<Arc<RequestRegistry>>,
    Caller(auth): Caller,
    Path(change_id): Path<String>,
) -> ControlResult<StatusCode> {
    registry.remove(&auth, &change_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn approve_request(
    Extension(registry): Extension<Arc<RequestRegistry>>,
    Caller(auth): Caller,
    Path(change_id): Path<String>,
    Json(payload): Json<ApproveRequest>,
) -> ControlResult<Json<ApprovalOutcome>> {
    if payload.unseal.trim().is_empty() {
        return Err(ControlError::InputValidation("unseal is required".into()));
    }
    registry
        .approve(&auth, &change_id, payload.unseal.trim())
        .await
        .map(Json)
}
