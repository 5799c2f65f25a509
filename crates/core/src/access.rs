//! Access filter and authorization guards.
//!
//! Visibility is decided by exactly three checks, in order: administrator,
//! explicit per-user grant, department grant. Nothing else makes a document
//! visible.

use crate::error::CoreResult;
use crate::model::{Capability, Document, DocumentId, Grant, GrantSubject, User, UserId};
use std::sync::Arc;
use thiserror::Error;

/// Source of grants consumed by the access filter.
pub trait PermissionStore: Send + Sync {
    /// All grants attached to a document
    fn grants_for_document(&self, document: DocumentId) -> CoreResult<Vec<Grant>>;

    /// All explicit grants naming a user
    fn grants_for_user(&self, user: UserId) -> CoreResult<Vec<Grant>>;
}

/// Decide a capability from the grants attached to one document.
#[must_use]
pub fn is_allowed(
    user: &User,
    document: DocumentId,
    grants: &[Grant],
    capability: Capability,
) -> bool {
    if user.is_admin {
        return true;
    }

    let relevant = || {
        grants
            .iter()
            .filter(move |g| g.document_id == document && g.allows(capability))
    };

    if relevant().any(|g| g.subject == GrantSubject::User(user.id)) {
        return true;
    }

    match user.department() {
        Some(dept) => relevant()
            .any(|g| matches!(&g.subject, GrantSubject::Department(d) if d.trim() == dept)),
        None => false,
    }
}

/// Whether `user` may see `document`, given the document's grants
#[must_use]
pub fn is_visible(user: &User, document: DocumentId, grants: &[Grant]) -> bool {
    is_allowed(user, document, grants, Capability::View)
}

/// Whether `user` may download `document`, given the document's grants
#[must_use]
pub fn is_downloadable(user: &User, document: DocumentId, grants: &[Grant]) -> bool {
    is_allowed(user, document, grants, Capability::Download)
}

/// Access checks backed by an injected permission store.
#[derive(Clone)]
pub struct AccessFilter {
    store: Arc<dyn PermissionStore>,
}

impl AccessFilter {
    pub fn new(store: Arc<dyn PermissionStore>) -> Self {
        Self { store }
    }

    /// Inactive documents are hidden from everyone but administrators.
    pub fn is_visible(&self, user: &User, document: &Document) -> CoreResult<bool> {
        self.check(user, document, Capability::View)
    }

    pub fn is_downloadable(&self, user: &User, document: &Document) -> CoreResult<bool> {
        self.check(user, document, Capability::Download)
    }

    /// Keep only the documents `user` may see, preserving order.
    pub fn visible_documents(
        &self,
        user: &User,
        documents: Vec<Document>,
    ) -> CoreResult<Vec<Document>> {
        if user.is_admin {
            return Ok(documents);
        }

        let explicit = self.store.grants_for_user(user.id)?;
        let mut visible = Vec::with_capacity(documents.len());
        for document in documents {
            if !document.is_active {
                continue;
            }
            // department grants live on the document, not the user
            if is_visible(user, document.id, &explicit) || self.is_visible(user, &document)? {
                visible.push(document);
            }
        }
        Ok(visible)
    }

    fn check(&self, user: &User, document: &Document, capability: Capability) -> CoreResult<bool> {
        if user.is_admin {
            return Ok(true);
        }
        if !document.is_active {
            return Ok(false);
        }
        let grants = self.store.grants_for_document(document.id)?;
        Ok(is_allowed(user, document.id, &grants, capability))
    }
}

/// Why a guard refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Denied {
    #[error("authentication required")]
    Unauthenticated,
    #[error("account is disabled")]
    Inactive,
    #[error("administrator privileges required")]
    Forbidden,
}

/// Require a signed-in, active user.
pub fn require_user(user: Option<&User>) -> Result<&User, Denied> {
    let user = user.ok_or(Denied::Unauthenticated)?;
    if !user.is_active {
        return Err(Denied::Inactive);
    }
    Ok(user)
}

/// Require a signed-in, active administrator.
pub fn require_admin(user: Option<&User>) -> Result<&User, Denied> {
    let user = require_user(user)?;
    if !user.is_admin {
        return Err(Denied::Forbidden);
    }
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    fn user(id: u64, department: Option<&str>, is_admin: bool) -> User {
        User {
            id: UserId(id),
            username: format!("user{id}"),
            email: format!("user{id}@example.com"),
            department: department.map(str::to_string),
            is_admin,
            is_active: true,
            created_at: Utc::now(),
            last_login: None,
        }
    }

    fn grant(
        id: u64,
        subject: GrantSubject,
        doc: u64,
        can_view: bool,
        can_download: bool,
    ) -> Grant {
        Grant {
            id: crate::model::GrantId(id),
            subject,
            document_id: DocumentId(doc),
            can_view,
            can_download,
            granted_by: None,
            granted_at: Utc::now(),
        }
    }

    fn document(id: u64, is_active: bool) -> Document {
        Document {
            id: DocumentId(id),
            storage_key: format!("doc{id}.xlsx"),
            display_name: format!("doc{id}.xlsx"),
            byte_size: 0,
            uploaded_by: UserId(1),
            description: None,
            is_active,
            created_at: Utc::now(),
            download_count: 0,
        }
    }

    #[derive(Default)]
    struct FixedStore {
        by_document: HashMap<DocumentId, Vec<Grant>>,
    }

    impl PermissionStore for FixedStore {
        fn grants_for_document(&self, document: DocumentId) -> CoreResult<Vec<Grant>> {
            Ok(self.by_document.get(&document).cloned().unwrap_or_default())
        }

        fn grants_for_user(&self, user: UserId) -> CoreResult<Vec<Grant>> {
            Ok(self
                .by_document
                .values()
                .flatten()
                .filter(|g| g.subject == GrantSubject::User(user))
                .cloned()
                .collect())
        }
    }

    #[test]
    fn test_department_scenario() {
        let grants = vec![grant(1, GrantSubject::Department("Sales".into()), 10, true, false)];
        let doc = DocumentId(10);

        assert!(is_visible(&user(2, Some("Sales"), false), doc, &grants));
        assert!(!is_visible(&user(3, Some("Eng"), false), doc, &grants));
        assert!(is_visible(&user(4, None, true), doc, &grants));
        assert!(is_visible(&user(5, Some("Eng"), true), doc, &[]));
    }

    #[test]
    fn test_explicit_user_grant() {
        let grants = vec![grant(1, GrantSubject::User(UserId(7)), 10, true, true)];
        assert!(is_visible(&user(7, None, false), DocumentId(10), &grants));
        assert!(!is_visible(&user(8, None, false), DocumentId(10), &grants));
        // grant on a different document does not leak
        assert!(!is_visible(&user(7, None, false), DocumentId(11), &grants));
    }

    #[test]
    fn test_view_and_download_are_independent() {
        let grants = vec![grant(1, GrantSubject::User(UserId(7)), 10, true, false)];
        let u = user(7, None, false);
        assert!(is_visible(&u, DocumentId(10), &grants));
        assert!(!is_downloadable(&u, DocumentId(10), &grants));
    }

    #[test]
    fn test_view_false_user_grant_falls_through_to_department() {
        let grants = vec![
            grant(1, GrantSubject::User(UserId(7)), 10, false, false),
            grant(2, GrantSubject::Department("Ops".into()), 10, true, true),
        ];
        assert!(is_visible(&user(7, Some("Ops"), false), DocumentId(10), &grants));
        assert!(!is_visible(&user(7, Some("Eng"), false), DocumentId(10), &grants));
    }

    #[test]
    fn test_department_match_ignores_padding() {
        let grants = vec![grant(1, GrantSubject::Department(" Sales ".into()), 10, true, true)];
        assert!(is_downloadable(&user(2, Some("Sales"), false), DocumentId(10), &grants));
    }

    #[test]
    fn test_filter_hides_inactive_documents() {
        let mut store = FixedStore::default();
        store.by_document.insert(
            DocumentId(1),
            vec![grant(1, GrantSubject::Department("Sales".into()), 1, true, true)],
        );
        store.by_document.insert(
            DocumentId(2),
            vec![grant(2, GrantSubject::Department("Sales".into()), 2, true, true)],
        );
        let filter = AccessFilter::new(Arc::new(store));
        let sales = user(2, Some("Sales"), false);

        assert!(filter.is_visible(&sales, &document(1, true)).unwrap());
        assert!(!filter.is_visible(&sales, &document(2, false)).unwrap());
        assert!(filter.is_visible(&user(1, None, true), &document(2, false)).unwrap());

        let visible = filter
            .visible_documents(
                &sales,
                vec![document(1, true), document(2, false), document(3, true)],
            )
            .unwrap();
        assert_eq!(visible.iter().map(|d| d.id.0).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_guards() {
        let admin = user(1, None, true);
        let member = user(2, Some("Sales"), false);
        let mut disabled = user(3, None, true);
        disabled.is_active = false;

        assert_eq!(require_admin(Some(&admin)).map(|u| u.id), Ok(UserId(1)));
        assert_eq!(require_admin(Some(&member)).err(), Some(Denied::Forbidden));
        assert_eq!(require_admin(None).err(), Some(Denied::Unauthenticated));
        assert_eq!(require_user(Some(&disabled)).err(), Some(Denied::Inactive));
        assert!(require_user(Some(&member)).is_ok());
    }
}
