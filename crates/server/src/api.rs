//! Routes for signed-in users: sessions, listing, search and download.

use crate::error::{ApiError, ApiResult};
use crate::state::{bearer_token, blocking, AppState};
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sheetfind_core::{Document, DocumentId, User};
use sheetfind_search::{export_results, SearchResult};
use sheetfind_sheet::{DocumentFormat, Metadata};

const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Health check response.
#[derive(Serialize, Deserialize)]
pub struct Health {
    /// Server status ("ok" when healthy).
    pub status: String,
    /// Server version from Cargo.toml.
    pub version: String,
}

/// Health check endpoint handler.
pub async fn health() -> Json<Health> {
    Json(Health {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let registry = state.registry.clone();
    let user = blocking(move || {
        registry
            .authenticate(&request.username, &request.password)
            .map_err(ApiError::from)
    })
    .await?
    .ok_or_else(|| ApiError::Unauthorized("invalid username or password".into()))?;

    if !user.is_active {
        return Err(ApiError::Forbidden("account is disabled".into()));
    }

    let issued = state.sessions.create(user.id);
    tracing::info!(user = %user.username, "signed in");
    Ok(Json(LoginResponse {
        token: issued.token,
        expires_at: issued.expires_at,
        user,
    }))
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> StatusCode {
    if let Some(token) = bearer_token(&headers) {
        state.sessions.revoke(token);
    }
    StatusCode::NO_CONTENT
}

pub async fn me(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<User>> {
    Ok(Json(state.require_user(&headers)?))
}

#[derive(Debug, Deserialize)]
pub struct PasswordChange {
    pub current_password: String,
    pub new_password: String,
}

/// Change the caller's own password. The current one must verify.
pub async fn change_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<PasswordChange>,
) -> ApiResult<Json<User>> {
    let user = state.require_user(&headers)?;
    let registry = state.registry.clone();
    let updated = blocking(move || {
        registry
            .change_password(user.id, &request.current_password, &request.new_password)
            .map_err(ApiError::from)
    })
    .await?;
    Ok(Json(updated))
}

/// A document as listed to a user, with what they may do with it.
#[derive(Debug, Serialize, Deserialize)]
pub struct FileEntry {
    #[serde(flatten)]
    pub document: Document,
    pub can_download: bool,
}

pub async fn list_files(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<FileEntry>>> {
    let user = state.require_user(&headers)?;
    let visible = state
        .access
        .visible_documents(&user, state.registry.active_documents())?;

    let mut entries = Vec::with_capacity(visible.len());
    for document in visible {
        let can_download = state.access.is_downloadable(&user, &document)?;
        entries.push(FileEntry {
            document,
            can_download,
        });
    }
    Ok(Json(entries))
}

/// Load a document the user may see; inactive documents look missing to
/// non-administrators.
fn visible_document(state: &AppState, user: &User, id: u64) -> ApiResult<Document> {
    let document = state.registry.get_document(DocumentId(id))?;
    if !document.is_active && !user.is_admin {
        return Err(ApiError::NotFound(format!("Document not found: {id}")));
    }
    if !state.access.is_visible(user, &document)? {
        return Err(ApiError::Forbidden("no permission to view this file".into()));
    }
    Ok(document)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileInfo {
    pub document: Document,
    pub metadata: Metadata,
}

pub async fn file_info(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> ApiResult<Json<FileInfo>> {
    let user = state.require_user(&headers)?;
    let document = visible_document(&state, &user, id)?;

    let search = state.search.clone();
    let doc = document.clone();
    let metadata = blocking(move || Ok(search.peek_metadata(&doc))).await?;
    Ok(Json(FileInfo { document, metadata }))
}

#[derive(Debug, Deserialize)]
pub struct FileSearchQuery {
    #[serde(default)]
    pub keyword: String,
    pub sheet_name: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub keyword: String,
    /// Matching rows across all results, before truncation
    pub total_matches: usize,
    pub results: Vec<SearchResult>,
}

impl SearchResponse {
    fn new(keyword: String, results: Vec<SearchResult>) -> Self {
        Self {
            keyword,
            total_matches: results.iter().map(|r| r.total_rows).sum(),
            results,
        }
    }
}

async fn run_file_search(
    state: &AppState,
    document: Document,
    keyword: String,
    sheet_name: Option<String>,
    limit: Option<usize>,
) -> ApiResult<Vec<SearchResult>> {
    let search = state.search.clone();
    blocking(move || {
        let sheet = sheet_name.as_deref().filter(|s| !s.is_empty());
        search
            .search_one_document(&document, &keyword, sheet, limit)
            .map_err(ApiError::from)
    })
    .await
}

pub async fn search_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<u64>,
    Query(query): Query<FileSearchQuery>,
) -> ApiResult<Json<SearchResponse>> {
    let user = state.require_user(&headers)?;
    let document = visible_document(&state, &user, id)?;

    let results = run_file_search(
        &state,
        document,
        query.keyword.clone(),
        query.sheet_name,
        query.limit,
    )
    .await?;
    Ok(Json(SearchResponse::new(query.keyword, results)))
}

#[derive(Debug, Deserialize)]
pub struct CorpusQuery {
    #[serde(default)]
    pub keyword: String,
}

pub async fn search_corpus(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CorpusQuery>,
) -> ApiResult<Json<SearchResponse>> {
    let user = state.require_user(&headers)?;
    let documents = state
        .access
        .visible_documents(&user, state.registry.active_documents())?;

    let search = state.search.clone();
    let keyword = query.keyword.clone();
    let results = blocking(move || {
        search
            .search_corpus(&documents, &keyword)
            .map_err(ApiError::from)
    })
    .await?;
    Ok(Json(SearchResponse::new(query.keyword, results)))
}

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    pub file_id: u64,
    pub keyword: String,
    pub sheet_name: Option<String>,
    pub limit: Option<usize>,
}

pub async fn export_search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ExportRequest>,
) -> ApiResult<Response> {
    let user = state.require_user(&headers)?;
    let document = visible_document(&state, &user, request.file_id)?;
    let stem = file_stem(&document.display_name).to_string();

    let results = run_file_search(
        &state,
        document,
        request.keyword,
        request.sheet_name,
        request.limit,
    )
    .await?;
    if results.is_empty() {
        return Err(ApiError::NotFound("no matching rows to export".into()));
    }

    let bytes = blocking(move || export_results(&results).map_err(ApiError::from)).await?;
    Ok(attachment(bytes, XLSX_CONTENT_TYPE, &format!("{stem}-results.xlsx")))
}

pub async fn download_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> ApiResult<Response> {
    let user = state.require_user(&headers)?;
    let document = visible_document(&state, &user, id)?;
    if !state.access.is_downloadable(&user, &document)? {
        return Err(ApiError::Forbidden("no permission to download this file".into()));
    }

    let search = state.search.clone();
    let doc = document.clone();
    let bytes = blocking(move || search.read_document(&doc).map_err(ApiError::from)).await?;
    state.registry.record_download(document.id)?;
    tracing::info!(user = %user.username, document = %document.id, "downloaded file");

    let content_type = match DocumentFormat::from_path(&document.display_name) {
        Some(DocumentFormat::Xlsx) => XLSX_CONTENT_TYPE,
        Some(DocumentFormat::Xls) => "application/vnd.ms-excel",
        Some(DocumentFormat::Csv) => "text/csv",
        None => "application/octet-stream",
    };
    Ok(attachment(bytes, content_type, &document.display_name))
}

fn file_stem(name: &str) -> &str {
    std::path::Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("export")
}

/// Bytes served as a file download.
fn attachment(bytes: Vec<u8>, content_type: &'static str, file_name: &str) -> Response {
    // header values must be visible ASCII
    let safe_name: String = file_name
        .chars()
        .map(|c| {
            if c == ' ' || (c.is_ascii_graphic() && c != '"' && c != '\\') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{safe_name}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    (
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(content_type)),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from(bytes),
    )
        .into_response()
}
