use axum::{
    extract::{FromRequest, FromRequestParts, Path, Query, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::{
    auth::{expired_session_cookie, session_cookie, session_token},
    catalog::{AuthStatus, FileFilter, FileInput, Principal},
    error::CatalogError,
    store::{CatalogStats, FileRecord},
    AppState,
};

type ApiResult<T> = Result<T, CatalogError>;

// ── Extractors ───────────────────────────────────────────────────────────────

/// `Json` whose rejection is reported as [`CatalogError::MalformedRequest`].
#[derive(FromRequest)]
#[from_request(via(Json), rejection(CatalogError))]
pub struct ApiJson<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(Query), rejection(CatalogError))]
pub struct ApiQuery<T>(pub T);

/// Numeric `{id}` path segment.
#[derive(FromRequestParts, Deserialize)]
#[from_request(via(Path), rejection(CatalogError))]
pub struct FileId(pub u64);

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

// ── Session ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub password: Option<String>,
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<LoginRequest>,
) -> ApiResult<Response> {
    let grant = state.catalog.login(
        body.username.as_deref().unwrap_or_default(),
        body.password.as_deref().unwrap_or_default(),
    )?;
    Ok((
        [(header::SET_COOKIE, session_cookie(&grant.token))],
        Json(json!({
            "success": true,
            "sessionId": grant.token,
            "username": grant.username,
        })),
    )
        .into_response())
}

pub async fn auth_status(State(state): State<AppState>, headers: HeaderMap) -> Json<AuthStatus> {
    let token = session_token(&headers);
    Json(state.catalog.auth_status(token.as_deref()))
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let token = session_token(&headers);
    state.catalog.logout(token.as_deref());
    (
        [(header::SET_COOKIE, expired_session_cookie())],
        Json(json!({"success": true})),
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: Option<String>,
    pub new_password: Option<String>,
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    ApiJson(body): ApiJson<ChangePasswordRequest>,
) -> ApiResult<Response> {
    state.catalog.change_password(
        &principal,
        body.current_password.as_deref().unwrap_or_default(),
        body.new_password.as_deref().unwrap_or_default(),
    )?;
    Ok((
        [(header::SET_COOKIE, expired_session_cookie())],
        Json(json!({
            "success": true,
            "message": "password changed, please log in again",
        })),
    )
        .into_response())
}

// ── Files ─────────────────────────────────────────────────────────────────────

pub async fn list_files(
    State(state): State<AppState>,
    ApiQuery(filter): ApiQuery<FileFilter>,
) -> ApiResult<Json<Vec<FileRecord>>> {
    Ok(Json(state.catalog.list_files(&filter)?))
}

pub async fn get_file(
    State(state): State<AppState>,
    FileId(id): FileId,
) -> ApiResult<Json<FileRecord>> {
    Ok(Json(state.catalog.get_file(id)?))
}

pub async fn create_file(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    ApiJson(input): ApiJson<FileInput>,
) -> ApiResult<impl IntoResponse> {
    let file = state.catalog.create_file(&principal, input)?;
    Ok(Json(json!({"success": true, "file": file})))
}

pub async fn update_file(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    FileId(id): FileId,
    ApiJson(input): ApiJson<FileInput>,
) -> ApiResult<impl IntoResponse> {
    let file = state.catalog.update_file(&principal, id, input)?;
    Ok(Json(json!({"success": true, "file": file})))
}

pub async fn delete_file(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    FileId(id): FileId,
) -> ApiResult<impl IntoResponse> {
    state.catalog.delete_file(&principal, id)?;
    Ok(Json(json!({"success": true})))
}

pub async fn record_download(
    State(state): State<AppState>,
    FileId(id): FileId,
) -> ApiResult<impl IntoResponse> {
    let downloads = state.catalog.record_download(id)?;
    Ok(Json(json!({"success": true, "downloads": downloads})))
}

// ── Catalog ───────────────────────────────────────────────────────────────────

pub async fn list_categories(State(state): State<AppState>) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(state.catalog.list_categories()?))
}

pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<CatalogStats>> {
    Ok(Json(state.catalog.stats()?))
}

pub async fn init_database(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let report = state.catalog.initialize()?;
    Ok(Json(json!({
        "success": true,
        "message": "database initialized",
        "adminSeeded": report.admin_seeded,
        "filesSeeded": report.files_seeded,
    })))
}
