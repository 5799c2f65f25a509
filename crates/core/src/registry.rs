//! In-memory registry of users, documents and grants.
//!
//! All state sits behind one `RwLock`. When opened with a snapshot path,
//! every mutation rewrites the JSON snapshot atomically before returning.

use crate::access::PermissionStore;
use crate::error::{CoreError, CoreResult};
use crate::model::{Document, DocumentId, Grant, GrantId, GrantSubject, Stats, User, UserId};
use crate::password::{hash_password, verify_password};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Default number of entries per listing page.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Shortest password accepted by [`Registry::change_password`].
pub const MIN_PASSWORD_LEN: usize = 6;

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// 1-based page number actually returned
    pub page: usize,
    pub page_size: usize,
    /// Number of entries across all pages
    pub total: usize,
}

impl<T> Page<T> {
    fn slice(all: Vec<T>, page: usize, page_size: usize) -> Self {
        let page = page.max(1);
        let total = all.len();
        let items = all
            .into_iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .collect();
        Self {
            items,
            page,
            page_size,
            total,
        }
    }

    /// Number of pages needed for `total` entries
    #[must_use]
    pub fn pages(&self) -> usize {
        self.total.div_ceil(self.page_size.max(1))
    }
}

/// Input for [`Registry::create_user`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
}

/// Editable account fields for [`Registry::update_user`]; `None` leaves a field alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub department: Option<String>,
    pub is_admin: Option<bool>,
    pub password: Option<String>,
}

/// Input for [`Registry::register_document`].
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub storage_key: String,
    pub display_name: String,
    pub byte_size: u64,
    pub uploaded_by: UserId,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Account {
    #[serde(flatten)]
    user: User,
    password_hash: String,
}

#[derive(Debug, Clone, Default)]
struct State {
    users: BTreeMap<UserId, Account>,
    documents: BTreeMap<DocumentId, Document>,
    grants: BTreeMap<GrantId, Grant>,
    next_id: u64,
}

impl State {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn account_mut(&mut self, id: UserId) -> CoreResult<&mut Account> {
        self.users.get_mut(&id).ok_or(CoreError::UserNotFound(id.0))
    }

    fn document_mut(&mut self, id: DocumentId) -> CoreResult<&mut Document> {
        self.documents
            .get_mut(&id)
            .ok_or(CoreError::DocumentNotFound(id.0))
    }

    fn email_in_use(&self, email: &str, except: Option<UserId>) -> bool {
        self.users
            .values()
            .any(|a| Some(a.user.id) != except && a.user.email.eq_ignore_ascii_case(email))
    }

    fn drop_grants_where(&mut self, pred: impl Fn(&Grant) -> bool) -> usize {
        let before = self.grants.len();
        self.grants.retain(|_, g| !pred(g));
        before - self.grants.len()
    }
}

/// On-disk form of the registry.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    next_id: u64,
    #[serde(default)]
    users: Vec<Account>,
    #[serde(default)]
    documents: Vec<Document>,
    #[serde(default)]
    grants: Vec<Grant>,
}

impl From<&State> for Snapshot {
    fn from(state: &State) -> Self {
        Self {
            next_id: state.next_id,
            users: state.users.values().cloned().collect(),
            documents: state.documents.values().cloned().collect(),
            grants: state.grants.values().cloned().collect(),
        }
    }
}

impl From<Snapshot> for State {
    fn from(snapshot: Snapshot) -> Self {
        let mut state = State {
            next_id: snapshot.next_id,
            ..State::default()
        };
        for account in snapshot.users {
            state.next_id = state.next_id.max(account.user.id.0);
            state.users.insert(account.user.id, account);
        }
        for document in snapshot.documents {
            state.next_id = state.next_id.max(document.id.0);
            state.documents.insert(document.id, document);
        }
        for grant in snapshot.grants {
            state.next_id = state.next_id.max(grant.id.0);
            state.grants.insert(grant.id, grant);
        }
        state
    }
}

/// Users, documents and grants.
#[derive(Debug)]
pub struct Registry {
    state: RwLock<State>,
    snapshot_path: Option<PathBuf>,
    page_size: usize,
}

impl Default for Registry {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl Registry {
    /// A registry that is never written to disk.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(State::default()),
            snapshot_path: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Load a registry from `path`, starting empty if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> CoreResult<Self> {
        let path = path.into();
        let state = if path.exists() {
            let text = fs::read_to_string(&path)?;
            let snapshot: Snapshot = serde_json::from_str(&text)?;
            State::from(snapshot)
        } else {
            State::default()
        };
        debug!(
            path = %path.display(),
            users = state.users.len(),
            documents = state.documents.len(),
            "opened registry"
        );
        Ok(Self {
            state: RwLock::new(state),
            snapshot_path: Some(path),
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Override the listing page size.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a mutation against a copy of the state, persist the copy, then
    /// install it. If the closure or the snapshot write fails the live state
    /// is left untouched.
    fn mutate<T>(&self, f: impl FnOnce(&mut State) -> CoreResult<T>) -> CoreResult<T> {
        let mut state = self.write();
        let mut next = state.clone();
        let out = f(&mut next)?;
        if let Some(path) = &self.snapshot_path {
            write_snapshot(path, &Snapshot::from(&next))?;
        }
        *state = next;
        Ok(out)
    }

    // ---- users ----

    /// Create an account; usernames and e-mails are unique (case-insensitive).
    pub fn create_user(&self, new: NewUser) -> CoreResult<User> {
        let username = new.username.trim().to_string();
        let email = new.email.trim().to_string();
        if username.is_empty() {
            return Err(CoreError::validation("username is required"));
        }
        if !email.contains('@') {
            return Err(CoreError::validation("a valid email is required"));
        }
        if new.password.is_empty() {
            return Err(CoreError::validation("password is required"));
        }
        // hash before taking the lock; argon2 is slow on purpose
        let password_hash = hash_password(&new.password)?;

        let user = self.mutate(|state| {
            if state
                .users
                .values()
                .any(|a| a.user.username.eq_ignore_ascii_case(&username))
            {
                return Err(CoreError::UsernameTaken(username.clone()));
            }
            if state.email_in_use(&email, None) {
                return Err(CoreError::EmailTaken(email.clone()));
            }
            let user = User {
                id: UserId(state.allocate()),
                username: username.clone(),
                email: email.clone(),
                department: clean_optional(new.department.as_deref()),
                is_admin: new.is_admin,
                is_active: true,
                created_at: Utc::now(),
                last_login: None,
            };
            state.users.insert(
                user.id,
                Account {
                    user: user.clone(),
                    password_hash,
                },
            );
            Ok(user)
        })?;
        info!(user = %user.username, id = %user.id, admin = user.is_admin, "created user");
        Ok(user)
    }

    /// Check credentials.
    ///
    /// Returns `None` for an unknown user or a wrong password. Disabled
    /// accounts are returned so the caller can report them; only active ones
    /// get `last_login` stamped.
    pub fn authenticate(&self, username: &str, password: &str) -> CoreResult<Option<User>> {
        let username = username.trim();
        let candidate = {
            let state = self.read();
            state
                .users
                .values()
                .find(|a| a.user.username.eq_ignore_ascii_case(username))
                .map(|a| (a.user.id, a.password_hash.clone()))
        };
        let Some((id, hash)) = candidate else {
            return Ok(None);
        };
        if !verify_password(password, &hash) {
            debug!(user = username, "password rejected");
            return Ok(None);
        }
        self.mutate(|state| {
            let account = state.account_mut(id)?;
            if account.user.is_active {
                account.user.last_login = Some(Utc::now());
            }
            Ok(Some(account.user.clone()))
        })
    }

    pub fn get_user(&self, id: UserId) -> CoreResult<User> {
        self.read()
            .users
            .get(&id)
            .map(|a| a.user.clone())
            .ok_or(CoreError::UserNotFound(id.0))
    }

    /// Whether any administrator account exists
    #[must_use]
    pub fn has_admin(&self) -> bool {
        self.read().users.values().any(|a| a.user.is_admin)
    }

    /// Edit an account's mutable fields.
    pub fn update_user(&self, id: UserId, update: UserUpdate) -> CoreResult<User> {
        let password_hash = match update.password.as_deref() {
            Some("") => return Err(CoreError::validation("password must not be empty")),
            Some(pw) => Some(hash_password(pw)?),
            None => None,
        };
        self.mutate(|state| {
            if let Some(email) = update.email.as_deref().map(str::trim) {
                if !email.contains('@') {
                    return Err(CoreError::validation("a valid email is required"));
                }
                if state.email_in_use(email, Some(id)) {
                    return Err(CoreError::EmailTaken(email.to_string()));
                }
            }
            let account = state.account_mut(id)?;
            if let Some(email) = update.email {
                account.user.email = email.trim().to_string();
            }
            if let Some(department) = update.department {
                account.user.department = clean_optional(Some(&department));
            }
            if let Some(is_admin) = update.is_admin {
                account.user.is_admin = is_admin;
            }
            if let Some(hash) = password_hash {
                account.password_hash = hash;
            }
            Ok(account.user.clone())
        })
    }

    /// Replace a user's own password after checking the current one.
    ///
    /// New passwords need at least [`MIN_PASSWORD_LEN`] characters.
    pub fn change_password(
        &self,
        id: UserId,
        current: &str,
        new_password: &str,
    ) -> CoreResult<User> {
        if new_password.chars().count() < MIN_PASSWORD_LEN {
            return Err(CoreError::validation(format!(
                "new password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        let hash = self
            .read()
            .users
            .get(&id)
            .map(|a| a.password_hash.clone())
            .ok_or(CoreError::UserNotFound(id.0))?;
        if !verify_password(current, &hash) {
            return Err(CoreError::WrongPassword);
        }
        let user = self.update_user(
            id,
            UserUpdate {
                password: Some(new_password.to_string()),
                ..UserUpdate::default()
            },
        )?;
        info!(user = %user.username, "changed password");
        Ok(user)
    }

    /// Flip an account between active and disabled. Nobody can toggle themselves.
    pub fn toggle_user(&self, id: UserId, acting: UserId) -> CoreResult<User> {
        if id == acting {
            return Err(CoreError::validation("cannot disable your own account"));
        }
        let user = self.mutate(|state| {
            let account = state.account_mut(id)?;
            account.user.is_active = !account.user.is_active;
            Ok(account.user.clone())
        })?;
        info!(user = %user.username, active = user.is_active, "toggled user");
        Ok(user)
    }

    /// Remove an account and every grant naming it.
    pub fn delete_user(&self, id: UserId, acting: UserId) -> CoreResult<User> {
        if id == acting {
            return Err(CoreError::validation("cannot delete your own account"));
        }
        let (user, dropped) = self.mutate(|state| {
            let account = state.users.remove(&id).ok_or(CoreError::UserNotFound(id.0))?;
            let dropped = state.drop_grants_where(|g| g.subject == GrantSubject::User(id));
            Ok((account.user, dropped))
        })?;
        info!(user = %user.username, grants = dropped, "deleted user");
        Ok(user)
    }

    /// Users matching `search` in username, e-mail or department, oldest first.
    pub fn list_users(&self, search: Option<&str>, page: usize) -> Page<User> {
        let needle = search
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());
        let all: Vec<User> = self
            .read()
            .users
            .values()
            .map(|a| &a.user)
            .filter(|u| match &needle {
                Some(n) => {
                    u.username.to_lowercase().contains(n)
                        || u.email.to_lowercase().contains(n)
                        || u.department().is_some_and(|d| d.to_lowercase().contains(n))
                }
                None => true,
            })
            .cloned()
            .collect();
        Page::slice(all, page, self.page_size)
    }

    // ---- documents ----

    pub fn register_document(&self, new: NewDocument) -> CoreResult<Document> {
        crate::storage::validate_key(&new.storage_key)?;
        let display_name = new.display_name.trim().to_string();
        if display_name.is_empty() {
            return Err(CoreError::validation("file name is required"));
        }
        let document = self.mutate(|state| {
            if !state.users.contains_key(&new.uploaded_by) {
                return Err(CoreError::UserNotFound(new.uploaded_by.0));
            }
            let document = Document {
                id: DocumentId(state.allocate()),
                storage_key: new.storage_key.clone(),
                display_name: display_name.clone(),
                byte_size: new.byte_size,
                uploaded_by: new.uploaded_by,
                description: clean_optional(new.description.as_deref()),
                is_active: true,
                created_at: Utc::now(),
                download_count: 0,
            };
            state.documents.insert(document.id, document.clone());
            Ok(document)
        })?;
        info!(document = %document.display_name, id = %document.id, bytes = document.byte_size, "registered document");
        Ok(document)
    }

    pub fn get_document(&self, id: DocumentId) -> CoreResult<Document> {
        self.read()
            .documents
            .get(&id)
            .cloned()
            .ok_or(CoreError::DocumentNotFound(id.0))
    }

    /// Documents whose name contains `search`, newest first.
    pub fn list_documents(&self, search: Option<&str>, page: usize) -> Page<Document> {
        let needle = search
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());
        let mut all: Vec<Document> = self
            .read()
            .documents
            .values()
            .filter(|d| match &needle {
                Some(n) => d.display_name.to_lowercase().contains(n),
                None => true,
            })
            .cloned()
            .collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Page::slice(all, page, self.page_size)
    }

    /// Every active document, newest first.
    pub fn active_documents(&self) -> Vec<Document> {
        let mut active: Vec<Document> = self
            .read()
            .documents
            .values()
            .filter(|d| d.is_active)
            .cloned()
            .collect();
        active.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        active
    }

    /// Hide a document without removing its bytes or grants.
    pub fn deactivate_document(&self, id: DocumentId) -> CoreResult<Document> {
        let document = self.mutate(|state| {
            let document = state.document_mut(id)?;
            document.is_active = false;
            Ok(document.clone())
        })?;
        info!(document = %document.display_name, "deactivated document");
        Ok(document)
    }

    /// Remove a document record and its grants.
    ///
    /// Returns the removed record; deleting the backing bytes is up to the caller.
    pub fn remove_document(&self, id: DocumentId) -> CoreResult<Document> {
        let (document, dropped) = self.mutate(|state| {
            let document = state
                .documents
                .remove(&id)
                .ok_or(CoreError::DocumentNotFound(id.0))?;
            let dropped = state.drop_grants_where(|g| g.document_id == id);
            Ok((document, dropped))
        })?;
        info!(document = %document.display_name, grants = dropped, "removed document");
        Ok(document)
    }

    /// Bump the download counter after a successful retrieval.
    pub fn record_download(&self, id: DocumentId) -> CoreResult<u64> {
        self.mutate(|state| {
            let document = state.document_mut(id)?;
            document.download_count += 1;
            Ok(document.download_count)
        })
    }

    // ---- grants ----

    /// Create or update the grant for (subject, document).
    pub fn set_grant(
        &self,
        subject: GrantSubject,
        document_id: DocumentId,
        can_view: bool,
        can_download: bool,
        granted_by: Option<UserId>,
    ) -> CoreResult<Grant> {
        let subject = subject.normalized();
        if matches!(&subject, GrantSubject::Department(d) if d.is_empty()) {
            return Err(CoreError::validation("department name is required"));
        }
        let grant = self.mutate(|state| {
            if !state.documents.contains_key(&document_id) {
                return Err(CoreError::DocumentNotFound(document_id.0));
            }
            if let GrantSubject::User(user) = &subject {
                if !state.users.contains_key(user) {
                    return Err(CoreError::UserNotFound(user.0));
                }
            }
            let existing = state
                .grants
                .values_mut()
                .find(|g| g.document_id == document_id && g.subject == subject);
            let grant = match existing {
                Some(grant) => {
                    grant.can_view = can_view;
                    grant.can_download = can_download;
                    grant.granted_by = granted_by;
                    grant.granted_at = Utc::now();
                    grant.clone()
                }
                None => {
                    let grant = Grant {
                        id: GrantId(state.allocate()),
                        subject: subject.clone(),
                        document_id,
                        can_view,
                        can_download,
                        granted_by,
                        granted_at: Utc::now(),
                    };
                    state.grants.insert(grant.id, grant.clone());
                    grant
                }
            };
            Ok(grant)
        })?;
        info!(grant = %grant.id, document = %document_id, view = can_view, download = can_download, "set grant");
        Ok(grant)
    }

    pub fn revoke_grant(&self, id: GrantId) -> CoreResult<Grant> {
        let grant = self.mutate(|state| {
            state.grants.remove(&id).ok_or(CoreError::GrantNotFound(id.0))
        })?;
        info!(grant = %grant.id, document = %grant.document_id, "revoked grant");
        Ok(grant)
    }

    // ---- dashboard ----

    pub fn stats(&self) -> Stats {
        let state = self.read();
        Stats {
            total_users: state.users.len(),
            active_users: state.users.values().filter(|a| a.user.is_active).count(),
            total_files: state.documents.len(),
            active_files: state.documents.values().filter(|d| d.is_active).count(),
            total_downloads: state.documents.values().map(|d| d.download_count).sum(),
        }
    }

    /// Write the current state to `path` regardless of the configured snapshot path.
    pub fn save_to(&self, path: &Path) -> CoreResult<()> {
        let snapshot = Snapshot::from(&*self.read());
        write_snapshot(path, &snapshot)
    }
}

impl PermissionStore for Registry {
    fn grants_for_document(&self, document: DocumentId) -> CoreResult<Vec<Grant>> {
        Ok(self
            .read()
            .grants
            .values()
            .filter(|g| g.document_id == document)
            .cloned()
            .collect())
    }

    fn grants_for_user(&self, user: UserId) -> CoreResult<Vec<Grant>> {
        Ok(self
            .read()
            .grants
            .values()
            .filter(|g| g.subject == GrantSubject::User(user))
            .cloned()
            .collect())
    }
}

fn clean_optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn write_snapshot(path: &Path, snapshot: &Snapshot) -> CoreResult<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, snapshot)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessFilter;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn new_user(name: &str, department: Option<&str>, is_admin: bool) -> NewUser {
        NewUser {
            username: name.to_string(),
            email: format!("{name}@example.com"),
            password: "pw".to_string(),
            department: department.map(str::to_string),
            is_admin,
        }
    }

    fn new_doc(name: &str, by: UserId) -> NewDocument {
        NewDocument {
            storage_key: crate::storage::new_key(name),
            display_name: name.to_string(),
            byte_size: 10,
            uploaded_by: by,
            description: None,
        }
    }

    #[test]
    fn test_create_user_uniqueness() {
        let registry = Registry::in_memory();
        registry.create_user(new_user("alice", None, false)).unwrap();

        let dup = registry.create_user(new_user("ALICE", None, false));
        assert!(matches!(dup, Err(CoreError::UsernameTaken(_))));

        let mut other = new_user("bob", None, false);
        other.email = "Alice@Example.com".into();
        assert!(matches!(
            registry.create_user(other),
            Err(CoreError::EmailTaken(_))
        ));

        assert!(matches!(
            registry.create_user(new_user(" ", None, false)),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn test_authenticate() {
        let registry = Registry::in_memory();
        let alice = registry.create_user(new_user("alice", None, false)).unwrap();

        assert!(registry.authenticate("alice", "nope").unwrap().is_none());
        assert!(registry.authenticate("mallory", "pw").unwrap().is_none());

        let signed_in = registry.authenticate("alice", "pw").unwrap().unwrap();
        assert_eq!(signed_in.id, alice.id);
        assert!(signed_in.last_login.is_some());
    }

    #[test]
    fn test_toggle_and_delete_self_refused() {
        let registry = Registry::in_memory();
        let admin = registry.create_user(new_user("root", None, true)).unwrap();
        let bob = registry.create_user(new_user("bob", None, false)).unwrap();

        assert!(registry.toggle_user(admin.id, admin.id).is_err());
        assert!(registry.delete_user(admin.id, admin.id).is_err());

        assert!(!registry.toggle_user(bob.id, admin.id).unwrap().is_active);
        assert!(registry.toggle_user(bob.id, admin.id).unwrap().is_active);
    }

    #[test]
    fn test_update_user() {
        let registry = Registry::in_memory();
        let alice = registry.create_user(new_user("alice", None, false)).unwrap();
        registry.create_user(new_user("bob", None, false)).unwrap();

        let updated = registry
            .update_user(
                alice.id,
                UserUpdate {
                    department: Some(" Sales ".into()),
                    password: Some("new".into()),
                    ..UserUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(updated.department.as_deref(), Some("Sales"));
        assert!(registry.authenticate("alice", "new").unwrap().is_some());

        let taken = registry.update_user(
            alice.id,
            UserUpdate {
                email: Some("bob@example.com".into()),
                ..UserUpdate::default()
            },
        );
        assert!(matches!(taken, Err(CoreError::EmailTaken(_))));
    }

    #[test]
    fn test_change_password_checks_current() {
        let registry = Registry::in_memory();
        let alice = registry.create_user(new_user("alice", None, false)).unwrap();

        assert!(matches!(
            registry.change_password(alice.id, "wrong", "longer-secret"),
            Err(CoreError::WrongPassword)
        ));
        assert!(matches!(
            registry.change_password(alice.id, "pw", "short"),
            Err(CoreError::Validation(_))
        ));
        assert!(registry.authenticate("alice", "pw").unwrap().is_some());

        registry.change_password(alice.id, "pw", "longer-secret").unwrap();
        assert!(registry.authenticate("alice", "pw").unwrap().is_none());
        assert!(registry.authenticate("alice", "longer-secret").unwrap().is_some());
        assert!(matches!(
            registry.change_password(UserId(99), "pw", "longer-secret"),
            Err(CoreError::UserNotFound(99))
        ));
    }

    #[test]
    fn test_list_users_search_and_pages() {
        let registry = Registry::in_memory().with_page_size(2);
        registry.create_user(new_user("ann", Some("Sales"), false)).unwrap();
        registry.create_user(new_user("ben", Some("Eng"), false)).unwrap();
        registry.create_user(new_user("cat", Some("Sales"), false)).unwrap();

        let first = registry.list_users(None, 1);
        assert_eq!(first.total, 3);
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.pages(), 2);
        assert_eq!(registry.list_users(None, 2).items[0].username, "cat");
        assert!(registry.list_users(None, 9).items.is_empty());

        let sales = registry.list_users(Some("sales"), 1);
        assert_eq!(sales.total, 2);
    }

    #[test]
    fn test_documents_newest_first_and_search() {
        let registry = Registry::in_memory();
        let admin = registry.create_user(new_user("root", None, true)).unwrap();
        let a = registry.register_document(new_doc("alpha.xlsx", admin.id)).unwrap();
        let b = registry.register_document(new_doc("beta.csv", admin.id)).unwrap();

        let page = registry.list_documents(None, 1);
        assert_eq!(page.items[0].id, b.id);
        assert_eq!(page.items[1].id, a.id);

        let found = registry.list_documents(Some("ALP"), 1);
        assert_eq!(found.items.len(), 1);
        assert_eq!(found.items[0].id, a.id);

        registry.deactivate_document(a.id).unwrap();
        let active = registry.active_documents();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, b.id);
        // soft delete keeps the record
        assert!(!registry.get_document(a.id).unwrap().is_active);
    }

    #[test]
    fn test_register_document_rejects_bad_key() {
        let registry = Registry::in_memory();
        let admin = registry.create_user(new_user("root", None, true)).unwrap();
        let mut doc = new_doc("a.xlsx", admin.id);
        doc.storage_key = "../a.xlsx".into();
        assert!(matches!(
            registry.register_document(doc),
            Err(CoreError::InvalidStorageKey(_))
        ));
    }

    #[test]
    fn test_grant_upsert_and_cascade() {
        let registry = Registry::in_memory();
        let admin = registry.create_user(new_user("root", None, true)).unwrap();
        let bob = registry.create_user(new_user("bob", None, false)).unwrap();
        let doc = registry.register_document(new_doc("a.xlsx", admin.id)).unwrap();

        let first = registry
            .set_grant(GrantSubject::User(bob.id), doc.id, true, false, Some(admin.id))
            .unwrap();
        let second = registry
            .set_grant(GrantSubject::User(bob.id), doc.id, true, true, Some(admin.id))
            .unwrap();
        assert_eq!(first.id, second.id);
        assert!(second.can_download);
        assert_eq!(registry.grants_for_document(doc.id).unwrap().len(), 1);

        registry
            .set_grant(GrantSubject::Department(" Sales ".into()), doc.id, true, false, None)
            .unwrap();
        registry
            .set_grant(GrantSubject::Department("Sales".into()), doc.id, true, true, None)
            .unwrap();
        assert_eq!(registry.grants_for_document(doc.id).unwrap().len(), 2);

        registry.delete_user(bob.id, admin.id).unwrap();
        assert_eq!(registry.grants_for_document(doc.id).unwrap().len(), 1);

        let removed = registry.remove_document(doc.id).unwrap();
        assert_eq!(removed.id, doc.id);
        assert!(registry.grants_for_document(doc.id).unwrap().is_empty());
        assert!(matches!(
            registry.get_document(doc.id),
            Err(CoreError::DocumentNotFound(_))
        ));
    }

    #[test]
    fn test_grant_requires_known_targets() {
        let registry = Registry::in_memory();
        assert!(matches!(
            registry.set_grant(GrantSubject::Department("Ops".into()), DocumentId(99), true, true, None),
            Err(CoreError::DocumentNotFound(99))
        ));
        assert!(matches!(
            registry.revoke_grant(GrantId(5)),
            Err(CoreError::GrantNotFound(5))
        ));
    }

    #[test]
    fn test_registry_drives_access_filter() {
        let registry = Arc::new(Registry::in_memory());
        let admin = registry.create_user(new_user("root", None, true)).unwrap();
        let sales = registry.create_user(new_user("sam", Some("Sales"), false)).unwrap();
        let eng = registry.create_user(new_user("eve", Some("Eng"), false)).unwrap();
        let doc = registry.register_document(new_doc("q.xlsx", admin.id)).unwrap();
        registry
            .set_grant(GrantSubject::Department("Sales".into()), doc.id, true, false, None)
            .unwrap();

        let filter = AccessFilter::new(registry.clone());
        assert!(filter.is_visible(&sales, &doc).unwrap());
        assert!(!filter.is_downloadable(&sales, &doc).unwrap());
        assert!(!filter.is_visible(&eng, &doc).unwrap());
        assert!(filter.is_visible(&admin, &doc).unwrap());
    }

    #[test]
    fn test_stats_and_downloads() {
        let registry = Registry::in_memory();
        let admin = registry.create_user(new_user("root", None, true)).unwrap();
        let bob = registry.create_user(new_user("bob", None, false)).unwrap();
        let doc = registry.register_document(new_doc("a.xlsx", admin.id)).unwrap();
        registry.register_document(new_doc("b.xlsx", admin.id)).unwrap();

        assert_eq!(registry.record_download(doc.id).unwrap(), 1);
        assert_eq!(registry.record_download(doc.id).unwrap(), 2);
        registry.toggle_user(bob.id, admin.id).unwrap();
        registry.deactivate_document(doc.id).unwrap();

        assert_eq!(
            registry.stats(),
            Stats {
                total_users: 2,
                active_users: 1,
                total_files: 2,
                active_files: 1,
                total_downloads: 2,
            }
        );
    }

    #[test]
    fn test_snapshot_persists_across_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("registry.json");

        let (admin_id, doc_id) = {
            let registry = Registry::open(&path).unwrap();
            let admin = registry.create_user(new_user("root", None, true)).unwrap();
            let doc = registry.register_document(new_doc("a.xlsx", admin.id)).unwrap();
            registry
                .set_grant(GrantSubject::Department("Ops".into()), doc.id, true, true, Some(admin.id))
                .unwrap();
            (admin.id, doc.id)
        };
        assert!(path.exists());

        let reopened = Registry::open(&path).unwrap();
        assert!(reopened.has_admin());
        assert!(reopened.authenticate("root", "pw").unwrap().is_some());
        assert_eq!(reopened.get_document(doc_id).unwrap().uploaded_by, admin_id);
        assert_eq!(reopened.grants_for_document(doc_id).unwrap().len(), 1);

        // ids keep increasing after reload
        let next = reopened.create_user(new_user("bob", None, false)).unwrap();
        assert!(next.id.0 > doc_id.0);
    }

    #[test]
    fn test_failed_mutation_does_not_persist() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let registry = Registry::open(&path).unwrap();
        assert!(registry.revoke_grant(GrantId(1)).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_unwritable_snapshot_leaves_state_unchanged() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let registry = Registry::open(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        assert!(registry.create_user(new_user("alice", None, false)).is_err());
        assert_eq!(registry.stats().total_users, 0);
        assert!(!registry.has_admin());

        std::fs::remove_dir(&path).unwrap();
        let alice = registry.create_user(new_user("alice", None, false)).unwrap();
        assert_eq!(registry.stats().total_users, 1);
        assert_eq!(Registry::open(&path).unwrap().get_user(alice.id).unwrap().username, "alice");
    }
}
