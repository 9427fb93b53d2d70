use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::models::user::{NewUser, User};

/// Key-value view of the account records.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, user: NewUser) -> Result<User, UserStoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, UserStoreError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, UserStoreError>;

    /// Replace the stored (encrypted) motto. Returns `false` if the user no longer exists.
    async fn update_motto(&self, id: Uuid, encrypted_motto: &str) -> Result<bool, UserStoreError>;

    async fn health_check(&self) -> Result<(), UserStoreError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UserStoreError {
    #[error("Username already taken")]
    UsernameTaken,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// In-process user store for local runs and tests.
#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a user record, returning whether it existed.
    pub fn remove(&self, id: Uuid) -> bool {
        self.lock().remove(&id).is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, User>> {
        self.users.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, user: NewUser) -> Result<User, UserStoreError> {
        let mut users = self.lock();
        if users.values().any(|u| u.username == user.username) {
            return Err(UserStoreError::UsernameTaken);
        }

        let record = User {
            id: Uuid::new_v4(),
            username: user.username,
            password_hash: user.password_hash,
            motto: user.motto,
        };
        users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, UserStoreError> {
        Ok(self.lock().get(&id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, UserStoreError> {
        Ok(self
            .lock()
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn update_motto(&self, id: Uuid, encrypted_motto: &str) -> Result<bool, UserStoreError> {
        match self.lock().get_mut(&id) {
            Some(user) => {
                user.motto = Some(encrypted_motto.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
