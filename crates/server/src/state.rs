//! Shared application state and request guards.

use crate::error::{ApiError, ApiResult};
use crate::session::SessionStore;
use axum::http::{header, HeaderMap};
use sheetfind_core::{
    access, AccessFilter, Config, CoreResult, FsStorage, NewUser, Registry, Storage, User,
};
use sheetfind_search::SearchService;
use std::sync::Arc;

/// Everything a handler needs, cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<Registry>,
    pub storage: Arc<dyn Storage>,
    pub search: SearchService,
    pub access: AccessFilter,
    pub sessions: Arc<SessionStore>,
}

impl AppState {
    /// Wire state from parts; used directly by tests.
    pub fn new(config: Config, registry: Arc<Registry>, storage: Arc<dyn Storage>) -> Self {
        let search = SearchService::new(storage.clone())
            .with_limits(config.api_row_limit, config.quick_row_limit);
        let access = AccessFilter::new(registry.clone());
        let sessions = Arc::new(SessionStore::new(config.session_ttl_secs));
        Self {
            config: Arc::new(config),
            registry,
            storage,
            search,
            access,
            sessions,
        }
    }

    /// Open filesystem storage and the registry snapshot under `data_dir`.
    pub fn open(config: Config) -> CoreResult<Self> {
        let storage = FsStorage::open(config.upload_dir())?;
        let registry = Registry::open(config.registry_path())?.with_page_size(config.page_size);
        Ok(Self::new(config, Arc::new(registry), Arc::new(storage)))
    }

    /// Create the configured administrator if no administrator exists yet.
    pub fn bootstrap_admin(&self) -> CoreResult<Option<User>> {
        let Some(seed) = &self.config.bootstrap_admin else {
            return Ok(None);
        };
        if self.registry.has_admin() {
            return Ok(None);
        }
        let admin = self.registry.create_user(NewUser {
            username: seed.username.clone(),
            email: seed.email.clone(),
            password: seed.password.clone(),
            department: None,
            is_admin: true,
        })?;
        tracing::info!(user = %admin.username, "created bootstrap administrator");
        Ok(Some(admin))
    }

    /// User behind the request's bearer token, if any
    pub fn current_user(&self, headers: &HeaderMap) -> Option<User> {
        let token = bearer_token(headers)?;
        let user_id = self.sessions.resolve(token)?;
        self.registry.get_user(user_id).ok()
    }

    /// Require a signed-in, active user.
    pub fn require_user(&self, headers: &HeaderMap) -> ApiResult<User> {
        let user = self.current_user(headers);
        Ok(access::require_user(user.as_ref())?.clone())
    }

    /// Require a signed-in, active administrator.
    pub fn require_admin(&self, headers: &HeaderMap) -> ApiResult<User> {
        let user = self.current_user(headers);
        Ok(access::require_admin(user.as_ref())?.clone())
    }
}

/// Token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Run CPU-bound or blocking work off the async executor.
pub async fn blocking<T, F>(work: F) -> ApiResult<T>
where
    F: FnOnce() -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(ApiError::from)?
}
