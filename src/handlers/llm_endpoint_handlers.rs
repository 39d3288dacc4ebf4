//! HTTP handlers for `v1/llm/model-endpoints`.
//!
//! The caller is identified by the basic-auth username, which is both the
//! `created_by` and the `owner` of what they create. Every lookup is scoped
//! to that owner.

use crate::{
    api::{
        CreateLlmModelEndpointV1Request, CreateLlmModelEndpointV1Response,
        DeleteLlmEndpointResponse, GetLlmEndpointResponse, ListLlmEndpointsResponse,
    },
    errors::AppError,
    models::endpoint::{CreateEndpoint, Endpoint, EndpointStatus, EndpointType, LlmDescriptor},
    routes::AppState,
    services::{
        endpoints::{EndpointFilter, EndpointRepository},
        scope::Scope,
    },
};
use axum::{
    Json,
    extract::{FromRequestParts, Path, State},
    http::{StatusCode, header, request::Parts},
};
use base64::{Engine as _, engine::general_purpose};
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal(pub String);

impl Principal {
    fn scope(&self) -> Scope {
        Scope::owner(self.0.clone())
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Principal {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(basic_auth_username)
            .map(Principal)
            .ok_or_else(|| AppError::unauthorized("missing or malformed basic auth credentials"))
    }
}

/// The username of a `Basic` authorization header, if present and non-empty.
fn basic_auth_username(header: &str) -> Option<String> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = general_purpose::STANDARD.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let username = credentials
        .split_once(':')
        .map_or(credentials.as_str(), |(user, _)| user);
    (!username.is_empty()).then(|| username.to_string())
}

/// `POST /v1/llm/model-endpoints`
pub async fn create_llm_endpoint(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<CreateLlmModelEndpointV1Request>,
) -> Result<Json<CreateLlmModelEndpointV1Response>, AppError> {
    let model_name = request.model_name.trim();
    if model_name.is_empty() {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "model_name must not be empty",
        ));
    }

    let task_id = Uuid::new_v4().to_string();
    let mut new = CreateEndpoint::new(model_name, principal.0.clone(), principal.0.clone())
        .with_llm(&LlmDescriptor::new(model_name));
    new.endpoint_type = EndpointType::Streaming;
    new.endpoint_status = EndpointStatus::UpdatePending;
    new.creation_task_id = Some(task_id.clone());

    let endpoint = EndpointRepository::create(&*state.db, new).await?;
    info!(
        endpoint_id = %endpoint.id,
        principal = %principal.0,
        task_id = %task_id,
        "accepted llm endpoint creation"
    );

    Ok(Json(CreateLlmModelEndpointV1Response {
        endpoint_creation_task_id: task_id,
    }))
}

/// `GET /v1/llm/model-endpoints/{model_name}`
pub async fn get_llm_endpoint(
    State(state): State<AppState>,
    principal: Principal,
    Path(model_name): Path<String>,
) -> Result<Json<GetLlmEndpointResponse>, AppError> {
    let endpoint = find_llm_endpoint(&state.db, &principal, &model_name).await?;
    GetLlmEndpointResponse::from_endpoint(&endpoint)
        .map(Json)
        .ok_or_else(|| not_found(&model_name))
}

/// `GET /v1/llm/model-endpoints`
pub async fn list_llm_endpoints(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<ListLlmEndpointsResponse>, AppError> {
    let endpoints = EndpointRepository::select_all_by_filters(
        &*state.db,
        &principal.scope(),
        &[EndpointFilter::Llm(true)],
        None,
        None,
    )
    .await?;

    Ok(Json(ListLlmEndpointsResponse {
        model_endpoints: endpoints
            .iter()
            .filter_map(GetLlmEndpointResponse::from_endpoint)
            .collect(),
    }))
}

/// `DELETE /v1/llm/model-endpoints/{model_name}`
pub async fn delete_llm_endpoint(
    State(state): State<AppState>,
    principal: Principal,
    Path(model_name): Path<String>,
) -> Result<Json<DeleteLlmEndpointResponse>, AppError> {
    let endpoint = find_llm_endpoint(&state.db, &principal, &model_name).await?;
    let deleted = EndpointRepository::delete(&*state.db, &endpoint.id).await?;
    Ok(Json(DeleteLlmEndpointResponse { deleted }))
}

async fn find_llm_endpoint(
    db: &SqlitePool,
    principal: &Principal,
    model_name: &str,
) -> Result<Endpoint, AppError> {
    EndpointRepository::select_by_name(db, model_name, &principal.scope())
        .await?
        .filter(Endpoint::is_llm)
        .ok_or_else(|| not_found(model_name))
}

fn not_found(model_name: &str) -> AppError {
    AppError::not_found(format!("llm endpoint `{model_name}` not found"))
}
