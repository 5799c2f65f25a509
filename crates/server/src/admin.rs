//! Administrator routes: uploads, grants, users and the dashboard.

use crate::error::{ApiError, ApiResult};
use crate::state::{blocking, AppState};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use sheetfind_core::storage::new_key;
use sheetfind_core::{
    CoreError, Document, DocumentId, Grant, GrantId, GrantSubject, NewDocument, NewUser, Page,
    PermissionStore, Registry, Stats, User, UserId, UserUpdate,
};
use sheetfind_sheet::{Loader, Sheet, SheetError};

pub async fn stats(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<Stats>> {
    state.require_admin(&headers)?;
    Ok(Json(state.registry.stats()))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub search: Option<String>,
    pub page: Option<usize>,
}

pub async fn list_files(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Page<Document>>> {
    state.require_admin(&headers)?;
    Ok(Json(state.registry.list_documents(
        query.search.as_deref(),
        query.page.unwrap_or(1),
    )))
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub filename: String,
    pub description: Option<String>,
}

/// Store an uploaded document.
///
/// The request body is the raw file. It must carry an accepted extension,
/// fit the size cap and parse as a spreadsheet.
pub async fn upload_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Document>)> {
    let admin = state.require_admin(&headers)?;
    let filename = check_upload(&state, &query.filename, &body)?;

    let storage = state.storage.clone();
    let key = new_key(&filename);
    let (name, stored_key, bytes) = (filename.clone(), key.clone(), body.clone());
    blocking(move || {
        let loader = Loader::for_document(&name, &bytes).map_err(unreadable)?;
        loader.try_peek_metadata(&bytes).map_err(unreadable)?;
        storage
            .write_bytes(&stored_key, &bytes)
            .map_err(|e| ApiError::Unavailable(format!("could not store file: {e}")))
    })
    .await?;

    let registered = state.registry.register_document(NewDocument {
        storage_key: key.clone(),
        display_name: filename,
        byte_size: body.len() as u64,
        uploaded_by: admin.id,
        description: query.description,
    });
    match registered {
        Ok(document) => Ok((StatusCode::CREATED, Json(document))),
        Err(e) => {
            if let Err(cleanup) = state.storage.delete(&key) {
                tracing::warn!(key = %key, error = %cleanup, "could not remove orphaned upload");
            }
            Err(e.into())
        }
    }
}

/// Validate an uploaded file's name and size, in that order.
///
/// Returns the trimmed file name.
fn check_upload(state: &AppState, filename: &str, body: &[u8]) -> ApiResult<String> {
    let filename = filename.trim().to_string();
    if filename.is_empty() {
        return Err(ApiError::BadRequest("filename is required".into()));
    }
    if !state.config.accepts_file(&filename) {
        return Err(ApiError::BadRequest(format!(
            "unsupported file type; allowed: {}",
            state.config.allowed_extensions.join(", ")
        )));
    }
    if body.is_empty() {
        return Err(ApiError::BadRequest("file is empty".into()));
    }
    let limit = state.config.max_upload_bytes;
    if body.len() as u64 > limit {
        return Err(ApiError::PayloadTooLarge { limit });
    }
    Ok(filename)
}

fn unreadable(err: SheetError) -> ApiError {
    ApiError::Unprocessable(err.to_string())
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub hard: bool,
}

/// Soft delete hides a document; hard delete also removes its bytes.
pub async fn delete_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<u64>,
    Query(query): Query<DeleteQuery>,
) -> ApiResult<Json<Document>> {
    state.require_admin(&headers)?;
    let id = DocumentId(id);
    if !query.hard {
        return Ok(Json(state.registry.deactivate_document(id)?));
    }

    let document = state.registry.remove_document(id)?;
    let storage = state.storage.clone();
    let key = document.storage_key.clone();
    let removed = blocking(move || Ok(storage.delete(&key))).await?;
    if let Err(e) = removed {
        tracing::warn!(key = %document.storage_key, error = %e, "could not remove document bytes");
    }
    Ok(Json(document))
}

pub async fn file_grants(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> ApiResult<Json<Vec<Grant>>> {
    state.require_admin(&headers)?;
    let document = state.registry.get_document(DocumentId(id))?;
    Ok(Json(state.registry.grants_for_document(document.id)?))
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct GrantRequest {
    pub subject: GrantSubject,
    pub document_id: u64,
    #[serde(default = "default_true")]
    pub can_view: bool,
    #[serde(default)]
    pub can_download: bool,
}

pub async fn set_grant(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<GrantRequest>,
) -> ApiResult<Json<Grant>> {
    let admin = state.require_admin(&headers)?;
    let grant = state.registry.set_grant(
        request.subject,
        DocumentId(request.document_id),
        request.can_view,
        request.can_download,
        Some(admin.id),
    )?;
    Ok(Json(grant))
}

pub async fn revoke_grant(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> ApiResult<Json<Grant>> {
    state.require_admin(&headers)?;
    Ok(Json(state.registry.revoke_grant(GrantId(id))?))
}

pub async fn list_users(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Page<User>>> {
    state.require_admin(&headers)?;
    Ok(Json(
        state
            .registry
            .list_users(query.search.as_deref(), query.page.unwrap_or(1)),
    ))
}

pub async fn create_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<NewUser>,
) -> ApiResult<(StatusCode, Json<User>)> {
    state.require_admin(&headers)?;
    let registry = state.registry.clone();
    let user = blocking(move || registry.create_user(request).map_err(ApiError::from)).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

const IMPORT_COLUMNS: [&str; 3] = ["username", "email", "password"];

#[derive(Debug, Deserialize)]
pub struct ImportQuery {
    pub filename: String,
}

/// A row the import could not turn into an account.
#[derive(Debug, Serialize, Deserialize)]
pub struct ImportFailure {
    /// Spreadsheet row number, counting the header as row 1
    pub row: usize,
    pub reason: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ImportReport {
    pub created: usize,
    pub failed: usize,
    pub errors: Vec<ImportFailure>,
}

/// Create accounts from the first sheet of an uploaded spreadsheet.
///
/// The sheet needs `username`, `email` and `password` columns;
/// `department` and `is_admin` are optional. Rows that are invalid or
/// clash with an existing account are skipped and reported.
pub async fn import_users(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ImportQuery>,
    body: Bytes,
) -> ApiResult<Json<ImportReport>> {
    state.require_admin(&headers)?;
    let filename = check_upload(&state, &query.filename, &body)?;

    let registry = state.registry.clone();
    let report = blocking(move || {
        let loader = Loader::for_document(&filename, &body).map_err(unreadable)?;
        let sheet = loader.load_sheet(&body, None).map_err(unreadable)?;
        import_rows(&registry, user_rows(&sheet)?)
    })
    .await?;

    tracing::info!(created = report.created, failed = report.failed, "imported users");
    Ok(Json(report))
}

/// Account requests keyed by spreadsheet row number. Blank rows are dropped.
fn user_rows(sheet: &Sheet) -> ApiResult<Vec<(usize, NewUser)>> {
    let columns: Vec<String> = sheet.columns().iter().map(|c| c.to_lowercase()).collect();
    let find = |name: &str| columns.iter().position(|c| c == name);

    let missing: Vec<&str> = IMPORT_COLUMNS
        .into_iter()
        .filter(|name| find(*name).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(ApiError::BadRequest(format!(
            "import file must have columns {}; missing: {}",
            IMPORT_COLUMNS.join(", "),
            missing.join(", ")
        )));
    }

    let (username, email, password) = (find("username"), find("email"), find("password"));
    let (department, is_admin) = (find("department"), find("is_admin"));

    Ok(sheet
        .rows()
        .enumerate()
        .filter(|(_, row)| row.iter().any(|cell| !cell.display_text().trim().is_empty()))
        .map(|(i, row)| {
            let text = |col: Option<usize>| {
                col.and_then(|c| row.get(c))
                    .map(|cell| cell.display_text().trim().to_string())
                    .unwrap_or_default()
            };
            let department = text(department);
            let new_user = NewUser {
                username: text(username),
                email: text(email),
                password: text(password),
                department: (!department.is_empty()).then_some(department),
                is_admin: is_truthy(&text(is_admin)),
            };
            (i + 2, new_user)
        })
        .collect())
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "y")
}

/// Create each account in turn. Storage and hashing failures abort the
/// import; anything else only fails its row.
fn import_rows(registry: &Registry, rows: Vec<(usize, NewUser)>) -> ApiResult<ImportReport> {
    let mut report = ImportReport::default();
    for (row, new_user) in rows {
        match registry.create_user(new_user) {
            Ok(_) => report.created += 1,
            Err(e @ (CoreError::Io(_) | CoreError::PasswordHash(_) | CoreError::Json(_))) => {
                return Err(e.into());
            }
            Err(e) => {
                report.failed += 1;
                report.errors.push(ImportFailure {
                    row,
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok(report)
}

pub async fn update_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<u64>,
    Json(update): Json<UserUpdate>,
) -> ApiResult<Json<User>> {
    let admin = state.require_admin(&headers)?;
    if id == admin.id.0 && update.is_admin == Some(false) {
        return Err(ApiError::BadRequest(
            "cannot remove your own administrator rights".into(),
        ));
    }
    let registry = state.registry.clone();
    let user = blocking(move || {
        registry
            .update_user(UserId(id), update)
            .map_err(ApiError::from)
    })
    .await?;
    Ok(Json(user))
}

pub async fn toggle_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> ApiResult<Json<User>> {
    let admin = state.require_admin(&headers)?;
    let user = state.registry.toggle_user(UserId(id), admin.id)?;
    if !user.is_active {
        state.sessions.revoke_user(user.id);
    }
    Ok(Json(user))
}

pub async fn delete_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> ApiResult<Json<User>> {
    let admin = state.require_admin(&headers)?;
    let user = state.registry.delete_user(UserId(id), admin.id)?;
    state.sessions.revoke_user(user.id);
    Ok(Json(user))
}
