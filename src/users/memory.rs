//! In-memory user store for development and tests.

use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use super::repo::UserRepository;
use super::repo_types::{User, UserCredentials, UserField, UserPatch};
use crate::error::{AccountError, AccountResult};

#[derive(Default)]
pub struct InMemoryUserRepository {
    users: DashMap<Uuid, User>,
    // Serializes uniqueness check + insert.
    save_lock: Mutex<()>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn matches(user: &User, field: &UserField) -> bool {
        match field {
            UserField::Id(id) => user.id == *id,
            UserField::Username(v) => user.username == *v,
            UserField::Email(v) => user.email == *v,
            UserField::ResetTokenHash(v) => user.password_reset_token.as_deref() == Some(v),
        }
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_user_by_field(&self, field: &UserField) -> AccountResult<Option<User>> {
        if let UserField::Id(id) = field {
            return Ok(self.users.get(id).map(|u| u.clone()));
        }
        Ok(self
            .users
            .iter()
            .find(|e| Self::matches(e.value(), field))
            .map(|e| e.value().clone()))
    }

    async fn save_user(&self, user: &User) -> AccountResult<()> {
        let _guard = self
            .save_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("user store lock poisoned"))?;

        for other in self.users.iter().filter(|e| *e.key() != user.id) {
            if other.username == user.username {
                return Err(AccountError::Conflict("username is already taken".into()));
            }
            if other.email == user.email {
                return Err(AccountError::Conflict("email is already taken".into()));
            }
        }
        self.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn update_credentials(
        &self,
        id: Uuid,
        credentials: &UserCredentials,
        expected_reset_token: Option<&str>,
    ) -> AccountResult<bool> {
        // The entry guard holds the shard lock across the check and the write.
        let Some(mut entry) = self.users.get_mut(&id) else {
            return Ok(false);
        };
        if let Some(expected) = expected_reset_token {
            if entry.password_reset_token.as_deref() != Some(expected) {
                return Ok(false);
            }
        }
        credentials.clone().apply(entry.value_mut());
        Ok(true)
    }

    async fn update_user(&self, id: Uuid, patch: UserPatch) -> AccountResult<Option<User>> {
        Ok(self.users.get_mut(&id).map(|mut entry| {
            patch.apply(entry.value_mut());
            entry.clone()
        }))
    }

    async fn list_users(&self, limit: i64, offset: i64) -> AccountResult<Vec<User>> {
        let mut all: Vec<User> = self.users.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(all
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }
}
