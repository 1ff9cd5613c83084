//! # Access Control Boundary
//!
//! The dispatcher consults an `AccessControl` implementation with the
//! connection, the resolved command, its category set, and the keys it
//! touches. User lookup, rule editing, and persistence live behind this
//! trait; the engine only needs an allow/deny answer.

use std::collections::HashSet;

use ckv_common::{KvError, KvResult};

use crate::dispatch::ConnContext;

/// Allow/deny decision point invoked before every command executes.
pub trait AccessControl: Send + Sync {
    fn authorize(
        &self,
        conn: &ConnContext,
        command: &str,
        categories: &[&str],
        keys: &[String],
    ) -> KvResult<()>;
}

/// Default policy: every command is allowed.
pub struct AllowAll;

impl AccessControl for AllowAll {
    fn authorize(
        &self,
        _conn: &ConnContext,
        _command: &str,
        _categories: &[&str],
        _keys: &[String],
    ) -> KvResult<()> {
        Ok(())
    }
}

/// Denies any command carrying one of the listed categories.
///
/// Small enough for tests and single-tenant deployments; richer rule
/// engines implement `AccessControl` outside this crate.
pub struct DenyCategories {
    denied: HashSet<String>,
}

impl DenyCategories {
    pub fn new(denied: impl IntoIterator<Item = String>) -> Self {
        DenyCategories {
            denied: denied.into_iter().collect(),
        }
    }
}

impl AccessControl for DenyCategories {
    fn authorize(
        &self,
        conn: &ConnContext,
        command: &str,
        categories: &[&str],
        _keys: &[String],
    ) -> KvResult<()> {
        for category in categories {
            if self.denied.contains(*category) {
                return Err(KvError::PolicyDenied(format!(
                    "user '{}' cannot run '{}' (category '{}')",
                    conn.user, command, category
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_all_allows() {
        let acl = AllowAll;
        let conn = ConnContext::internal("test", 1);
        assert!(acl
            .authorize(&conn, "set", &["write"], &["k".to_string()])
            .is_ok());
    }

    #[test]
    fn deny_categories_blocks_matching_commands() {
        let acl = DenyCategories::new(["dangerous".to_string()]);
        let conn = ConnContext::internal("test", 1);
        assert!(acl.authorize(&conn, "get", &["read", "fast"], &[]).is_ok());
        let err = acl
            .authorize(&conn, "flushall", &["write", "dangerous"], &[])
            .unwrap_err();
        assert!(matches!(err, KvError::PolicyDenied(_)));
    }
}
