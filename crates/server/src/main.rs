//! # sheetfind-server
//!
//! JSON API for searching uploaded spreadsheets.

mod admin;
mod api;
mod error;
mod session;
mod state;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post, put};
use axum::Router;
use clap::Parser;
use sheetfind_core::Config;
use state::AppState;
use std::path::PathBuf;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

/// sheetfind-server - keyword search over uploaded spreadsheets
#[derive(Parser)]
#[command(name = "sheetfind-server")]
#[command(author, version, about = "Spreadsheet keyword search API", long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(short, long, env = "SHEETFIND_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Address to listen on (overrides the configuration)
    #[arg(long)]
    bind: Option<String>,

    /// Data directory (overrides the configuration)
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,
}

/// Create the application router.
///
/// This is separated from `main()` to allow testing.
pub fn create_router(state: AppState) -> Router {
    let upload_limit = usize::try_from(state.config.max_upload_bytes).unwrap_or(usize::MAX);

    let admin = Router::new()
        .route("/stats", get(admin::stats))
        .route("/files", get(admin::list_files).post(admin::upload_file))
        .route("/files/:id", delete(admin::delete_file))
        .route("/files/:id/grants", get(admin::file_grants))
        .route("/grants", post(admin::set_grant))
        .route("/grants/:id", delete(admin::revoke_grant))
        .route("/users", get(admin::list_users).post(admin::create_user))
        .route("/users/import", post(admin::import_users))
        .route(
            "/users/:id",
            put(admin::update_user).delete(admin::delete_user),
        )
        .route("/users/:id/toggle", post(admin::toggle_user))
        .layer(DefaultBodyLimit::max(upload_limit));

    let api = Router::new()
        .route("/login", post(api::login))
        .route("/logout", post(api::logout))
        .route("/me", get(api::me))
        .route("/me/password", post(api::change_password))
        .route("/files", get(api::list_files))
        .route("/files/:id/info", get(api::file_info))
        .route("/files/:id/search", get(api::search_file))
        .route("/files/:id/download", get(api::download_file))
        .route("/search", get(api::search_corpus))
        .route("/search/export", post(api::export_search))
        .nest("/admin", admin);

    Router::new()
        .route("/health", get(api::health))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "could not listen for ctrl-c; running until killed");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config =
        Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }

    let bind = config.bind.clone();
    let state = AppState::open(config).context("Failed to open data directory")?;
    state
        .bootstrap_admin()
        .context("Failed to create bootstrap administrator")?;
    if !state.registry.has_admin() {
        tracing::warn!(
            "no administrator account exists; set SHEETFIND_ADMIN_USERNAME and SHEETFIND_ADMIN_PASSWORD"
        );
    }

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    tracing::info!(addr = %bind, "sheetfind-server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Health;
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use sheetfind_core::{MemoryStorage, NewUser, Registry, User};
    use std::sync::Arc;
    use tower::ServiceExt;

    const SALES_CSV: &str = "Region,Rep,Amount\nNorth,Ann,120\nSouth,Bob,80\nnorth-east,Cy,42\n";

    fn test_state() -> AppState {
        let config = Config {
            max_upload_bytes: 4096,
            ..Config::default()
        };
        AppState::new(
            config,
            Arc::new(Registry::in_memory()),
            Arc::new(MemoryStorage::new()),
        )
    }

    fn add_user(state: &AppState, name: &str, department: Option<&str>, is_admin: bool) -> User {
        state
            .registry
            .create_user(NewUser {
                username: name.to_string(),
                email: format!("{name}@example.com"),
                password: format!("{name}-pw"),
                department: department.map(str::to_string),
                is_admin,
            })
            .unwrap()
    }

    async fn call(state: &AppState, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = create_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    async fn call_json(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = call(state, request).await;
        let value = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, value)
    }

    fn request(method: Method, uri: &str, token: Option<&str>, body: Body) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(body).unwrap()
    }

    fn get_req(uri: &str, token: Option<&str>) -> Request<Body> {
        request(Method::GET, uri, token, Body::empty())
    }

    fn json_req(method: Method, uri: &str, token: Option<&str>, value: &Value) -> Request<Body> {
        let mut req = request(method, uri, token, Body::from(value.to_string()));
        req.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        req
    }

    async fn login(state: &AppState, username: &str) -> String {
        let (status, body) = call_json(
            state,
            json_req(
                Method::POST,
                "/api/login",
                None,
                &json!({"username": username, "password": format!("{username}-pw")}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "login failed: {body}");
        body["token"].as_str().unwrap().to_string()
    }

    async fn upload(state: &AppState, token: &str, filename: &str, bytes: &[u8]) -> (StatusCode, Value) {
        call_json(
            state,
            request(
                Method::POST,
                &format!("/api/admin/files?filename={filename}&description=test"),
                Some(token),
                Body::from(bytes.to_vec()),
            ),
        )
        .await
    }

    #[tokio::test]
    async fn test_health_endpoint_body() {
        let (status, body) = call(&test_state(), get_req("/health", None)).await;
        assert_eq!(status, StatusCode::OK);
        let health: Health = serde_json::from_slice(&body).unwrap();
        assert_eq!(health.status, "ok");
        assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_not_found() {
        let (status, _) = call(&test_state(), get_req("/nonexistent", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_login_and_me() {
        let state = test_state();
        add_user(&state, "ann", Some("Sales"), false);

        let (status, _) = call_json(
            &state,
            json_req(
                Method::POST,
                "/api/login",
                None,
                &json!({"username": "ann", "password": "wrong"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let token = login(&state, "ann").await;
        let (status, me) = call_json(&state, get_req("/api/me", Some(&token))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["username"], "ann");
        assert_eq!(me["department"], "Sales");

        let (status, _) = call(
            &state,
            request(Method::POST, "/api/logout", Some(&token), Body::empty()),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&state, get_req("/api/me", Some(&token))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_disabled_account_cannot_sign_in() {
        let state = test_state();
        let admin = add_user(&state, "root", None, true);
        let ann = add_user(&state, "ann", None, false);
        state.registry.toggle_user(ann.id, admin.id).unwrap();

        let (status, _) = call_json(
            &state,
            json_req(
                Method::POST,
                "/api/login",
                None,
                &json!({"username": "ann", "password": "ann-pw"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_admin_routes_require_admin() {
        let state = test_state();
        add_user(&state, "ann", None, false);
        let token = login(&state, "ann").await;

        let (status, _) = call(&state, get_req("/api/admin/stats", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, body) = call_json(&state, get_req("/api/admin/stats", Some(&token))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body["error"].as_str().unwrap().contains("administrator"));
    }

    #[tokio::test]
    async fn test_department_visibility_end_to_end() {
        let state = test_state();
        add_user(&state, "root", None, true);
        add_user(&state, "ann", Some("Sales"), false);
        add_user(&state, "eve", Some("Eng"), false);
        let root = login(&state, "root").await;
        let ann = login(&state, "ann").await;
        let eve = login(&state, "eve").await;

        let (status, doc) = upload(&state, &root, "sales.csv", SALES_CSV.as_bytes()).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = doc["id"].as_u64().unwrap();

        let (status, _) = call_json(
            &state,
            json_req(
                Method::POST,
                "/api/admin/grants",
                Some(&root),
                &json!({"subject": {"department": "Sales"}, "document_id": id, "can_view": true}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, files) = call_json(&state, get_req("/api/files", Some(&ann))).await;
        assert_eq!(files.as_array().unwrap().len(), 1);
        assert_eq!(files[0]["can_download"], false);
        let (_, files) = call_json(&state, get_req("/api/files", Some(&eve))).await;
        assert!(files.as_array().unwrap().is_empty());
        let (_, files) = call_json(&state, get_req("/api/files", Some(&root))).await;
        assert_eq!(files.as_array().unwrap().len(), 1);

        let uri = format!("/api/files/{id}/search?keyword=NORTH&limit=1");
        let (status, found) = call_json(&state, get_req(&uri, Some(&ann))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(found["total_matches"], 2);
        assert_eq!(found["results"][0]["sheet_name"], "sales");
        assert_eq!(found["results"][0]["total_rows"], 2);
        assert_eq!(found["results"][0]["rows"].as_array().unwrap().len(), 1);
        assert_eq!(found["results"][0]["rows"][0]["Rep"], "Ann");

        let (status, _) = call_json(&state, get_req(&uri, Some(&eve))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(
            &state,
            get_req(&format!("/api/files/{id}/download"), Some(&ann)),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_download_counts() {
        let state = test_state();
        add_user(&state, "root", None, true);
        let ann_user = add_user(&state, "ann", None, false);
        let root = login(&state, "root").await;
        let ann = login(&state, "ann").await;

        let (_, doc) = upload(&state, &root, "sales.csv", SALES_CSV.as_bytes()).await;
        let id = doc["id"].as_u64().unwrap();
        call_json(
            &state,
            json_req(
                Method::POST,
                "/api/admin/grants",
                Some(&root),
                &json!({"subject": {"user": ann_user.id.0}, "document_id": id, "can_download": true}),
            ),
        )
        .await;

        let response = create_router(state.clone())
            .oneshot(get_req(&format!("/api/files/{id}/download"), Some(&ann)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/csv");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"sales.csv\""
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], SALES_CSV.as_bytes());

        let (_, stats) = call_json(&state, get_req("/api/admin/stats", Some(&root))).await;
        assert_eq!(stats["total_downloads"], 1);
        assert_eq!(stats["active_files"], 1);
    }

    #[tokio::test]
    async fn test_file_info_and_missing_sheet() {
        let state = test_state();
        add_user(&state, "root", None, true);
        let root = login(&state, "root").await;
        let (_, doc) = upload(&state, &root, "sales.csv", SALES_CSV.as_bytes()).await;
        let id = doc["id"].as_u64().unwrap();

        let (status, info) =
            call_json(&state, get_req(&format!("/api/files/{id}/info"), Some(&root))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(info["metadata"]["columns"], json!(["Region", "Rep", "Amount"]));
        assert_eq!(info["metadata"]["row_count"], 3);
        assert_eq!(info["document"]["description"], "test");

        let uri = format!("/api/files/{id}/search?keyword=north&sheet_name=Nope");
        let (status, _) = call_json(&state, get_req(&uri, Some(&root))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = call_json(&state, get_req("/api/files/999/info", Some(&root))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_upload_validation() {
        let state = test_state();
        add_user(&state, "root", None, true);
        let root = login(&state, "root").await;

        let (status, _) = upload(&state, &root, "notes.txt", b"hello").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = upload(&state, &root, "broken.xlsx", b"not a workbook").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = upload(&state, &root, "huge.csv", &vec![b'a'; 5000]).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

        assert_eq!(state.registry.stats().total_files, 0);
    }

    #[tokio::test]
    async fn test_corpus_search_and_soft_delete() {
        let state = test_state();
        add_user(&state, "root", None, true);
        let root = login(&state, "root").await;
        let (_, a) = upload(&state, &root, "a.csv", b"name\nalpha\n").await;
        upload(&state, &root, "b.csv", b"name\nalphabet\nbeta\n").await;

        let (status, found) =
            call_json(&state, get_req("/api/search?keyword=alpha", Some(&root))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(found["results"].as_array().unwrap().len(), 2);

        let id = a["id"].as_u64().unwrap();
        let (status, _) = call_json(
            &state,
            request(Method::DELETE, &format!("/api/admin/files/{id}"), Some(&root), Body::empty()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, found) = call_json(&state, get_req("/api/search?keyword=alpha", Some(&root))).await;
        assert_eq!(found["results"].as_array().unwrap().len(), 1);
        assert_eq!(found["results"][0]["document_name"], "b.csv");

        // soft-deleted files still appear in the admin listing
        let (_, listing) = call_json(&state, get_req("/api/admin/files", Some(&root))).await;
        assert_eq!(listing["total"], 2);

        let (status, _) = call_json(
            &state,
            request(
                Method::DELETE,
                &format!("/api/admin/files/{id}?hard=true"),
                Some(&root),
                Body::empty(),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (_, listing) = call_json(&state, get_req("/api/admin/files", Some(&root))).await;
        assert_eq!(listing["total"], 1);
    }

    #[tokio::test]
    async fn test_export_returns_workbook() {
        let state = test_state();
        add_user(&state, "root", None, true);
        let root = login(&state, "root").await;
        let (_, doc) = upload(&state, &root, "sales.csv", SALES_CSV.as_bytes()).await;

        let response = create_router(state.clone())
            .oneshot(json_req(
                Method::POST,
                "/api/search/export",
                Some(&root),
                &json!({"file_id": doc["id"], "keyword": "north"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"sales-results.xlsx\""
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..2], b"PK");
    }

    #[tokio::test]
    async fn test_user_management() {
        let state = test_state();
        let admin = add_user(&state, "root", None, true);
        let root = login(&state, "root").await;

        let (status, created) = call_json(
            &state,
            json_req(
                Method::POST,
                "/api/admin/users",
                Some(&root),
                &json!({"username": "ann", "email": "ann@example.com", "password": "ann-pw", "department": "Sales"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let ann_id = created["id"].as_u64().unwrap();

        let (status, _) = call_json(
            &state,
            json_req(
                Method::POST,
                "/api/admin/users",
                Some(&root),
                &json!({"username": "ANN", "email": "other@example.com", "password": "x"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let ann = login(&state, "ann").await;
        let (_, toggled) = call_json(
            &state,
            request(
                Method::POST,
                &format!("/api/admin/users/{ann_id}/toggle"),
                Some(&root),
                Body::empty(),
            ),
        )
        .await;
        assert_eq!(toggled["is_active"], false);
        // disabling revokes live sessions
        let (status, _) = call(&state, get_req("/api/me", Some(&ann))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call_json(
            &state,
            request(
                Method::POST,
                &format!("/api/admin/users/{}/toggle", admin.id),
                Some(&root),
                Body::empty(),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, page) =
            call_json(&state, get_req("/api/admin/users?search=sales", Some(&root))).await;
        assert_eq!(page["total"], 1);

        let (status, _) = call_json(
            &state,
            request(
                Method::DELETE,
                &format!("/api/admin/users/{ann_id}"),
                Some(&root),
                Body::empty(),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(state.registry.stats().total_users, 1);
    }

    #[tokio::test]
    async fn test_import_users_from_csv() {
        let state = test_state();
        add_user(&state, "root", None, true);
        add_user(&state, "ann", None, false);
        let root = login(&state, "root").await;

        let roster = "Username,Email,Password,Department,is_admin\n\
                      bob,bob@example.com,bob-pw,Sales,\n\
                      ANN,ann2@example.com,x,,\n\
                      ,nobody@example.com,x,,\n\
                      cy,cy@example.com,cy-pw,,yes\n";
        let (status, report) = call_json(
            &state,
            request(
                Method::POST,
                "/api/admin/users/import?filename=roster.csv",
                Some(&root),
                Body::from(roster),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{report}");
        assert_eq!(report["created"], 2);
        assert_eq!(report["failed"], 2);
        assert_eq!(report["errors"][0]["row"], 3);
        assert_eq!(report["errors"][1]["row"], 4);
        assert_eq!(state.registry.stats().total_users, 4);

        let bob = login(&state, "bob").await;
        let (_, me) = call_json(&state, get_req("/api/me", Some(&bob))).await;
        assert_eq!(me["department"], "Sales");
        assert_eq!(me["is_admin"], false);
        let (_, page) = call_json(&state, get_req("/api/admin/users?search=cy", Some(&root))).await;
        assert_eq!(page["items"][0]["is_admin"], true);
    }

    #[tokio::test]
    async fn test_import_users_requires_columns() {
        let state = test_state();
        add_user(&state, "root", None, true);
        add_user(&state, "ann", None, false);
        let root = login(&state, "root").await;
        let ann = login(&state, "ann").await;

        let import = |token: &str, filename: &str, body: &'static str| {
            request(
                Method::POST,
                &format!("/api/admin/users/import?filename={filename}"),
                Some(token),
                Body::from(body),
            )
        };

        let (status, body) =
            call_json(&state, import(&root, "roster.csv", "username,email\nbob,b@x.io\n")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("password"));

        let (status, _) = call_json(&state, import(&root, "roster.txt", "username\n")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call_json(&state, import(&ann, "roster.csv", "username\n")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(state.registry.stats().total_users, 2);
    }

    #[tokio::test]
    async fn test_change_own_password() {
        let state = test_state();
        add_user(&state, "ann", None, false);
        let token = login(&state, "ann").await;

        let change = |current: &str, new: &str| {
            json_req(
                Method::POST,
                "/api/me/password",
                Some(&token),
                &json!({"current_password": current, "new_password": new}),
            )
        };

        let (status, _) = call_json(&state, change("wrong", "brand-new-pw")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = call_json(&state, change("ann-pw", "tiny")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call_json(&state, change("ann-pw", "brand-new-pw")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], "ann");
        assert!(state.registry.authenticate("ann", "ann-pw").unwrap().is_none());
        assert!(state
            .registry
            .authenticate("ann", "brand-new-pw")
            .unwrap()
            .is_some());

        let (status, _) = call_json(
            &state,
            json_req(
                Method::POST,
                "/api/me/password",
                None,
                &json!({"current_password": "x", "new_password": "yyyyyyy"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
