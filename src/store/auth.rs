//! Admin rights from the configured id list and the `users.is_admin` flag.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::gateway::AuthorizationProvider;

use super::LibSqlStore;

/// A user is an admin if either source says so.
pub struct AdminAuthorization {
    configured: HashSet<i64>,
    store: Arc<LibSqlStore>,
}

impl AdminAuthorization {
    pub fn new(configured: impl IntoIterator<Item = i64>, store: Arc<LibSqlStore>) -> Self {
        Self {
            configured: configured.into_iter().collect(),
            store,
        }
    }
}

#[async_trait]
impl AuthorizationProvider for AdminAuthorization {
    async fn is_admin(&self, user_id: i64) -> bool {
        if self.configured.contains(&user_id) {
            return true;
        }
        match self.store.is_admin_flag(user_id).await {
            Ok(flag) => flag,
            Err(e) => {
                warn!(user_id, error = %e, "Admin lookup failed, treating as non-admin");
                false
            }
        }
    }
}
