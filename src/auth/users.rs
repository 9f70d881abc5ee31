//! User Directory: in-memory operator-account store backing the Access
//! Controller's active-flag check (spec §4.10 step 5).
//!
//! The Token Provider signs claims from whatever `User` it is handed and
//! never checks whether that user still exists; this directory is the one
//! place an id can be looked up and deactivated after its tokens were
//! issued, the same single-owned-`Inner`-behind-a-mutex shape every other
//! stateful component here uses.

use crate::model::User;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

struct Inner {
    by_id: HashMap<String, User>,
}

pub struct UserDirectory {
    inner: Mutex<Inner>,
}

impl UserDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(UserDirectory {
            inner: Mutex::new(Inner { by_id: HashMap::new() }),
        })
    }

    /// Records or replaces a user's directory entry, called whenever a new
    /// token pair is issued for them.
    pub async fn upsert(&self, user: User) {
        self.inner.lock().await.by_id.insert(user.id.clone(), user);
    }

    pub async fn get(&self, id: &str) -> Option<User> {
        self.inner.lock().await.by_id.get(id).cloned()
    }

    /// A user this directory has never heard of is treated as active — it
    /// predates this store (e.g. a token issued before the user was ever
    /// upserted) and has no recorded reason to be denied.
    pub async fn is_active(&self, id: &str) -> bool {
        self.inner.lock().await.by_id.get(id).map(|u| u.active).unwrap_or(true)
    }

    /// Flips a user's active flag. Returns `false` if no such user is on
    /// file. Does not revoke any token already issued to them; the Token
    /// Provider's revocation ledger is the place for that.
    pub async fn set_active(&self, id: &str, active: bool) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.by_id.get_mut(id) {
            Some(user) => {
                user.active = active;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;

    fn user(id: &str) -> User {
        User {
            id: id.to_string(),
            username: "alice".to_string(),
            role: Role::Operator,
            active: true,
        }
    }

    #[tokio::test]
    async fn unknown_user_is_treated_as_active() {
        let users = UserDirectory::new();
        assert!(users.is_active("ghost").await);
    }

    #[tokio::test]
    async fn deactivating_a_known_user_is_observable() {
        let users = UserDirectory::new();
        users.upsert(user("u1")).await;
        assert!(users.is_active("u1").await);

        assert!(users.set_active("u1", false).await);
        assert!(!users.is_active("u1").await);
    }

    #[tokio::test]
    async fn deactivating_an_unknown_user_fails() {
        let users = UserDirectory::new();
        assert!(!users.set_active("ghost", false).await);
    }
}
