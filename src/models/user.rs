// User model and the contract of the external user store. The core only
// depends on this contract; the relational schema lives with the owning
// service.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Role granted to freshly registered accounts.
pub const DEFAULT_ROLE_ID: i32 = 1;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_email_verified: bool,
    pub role_id: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub role_id: i32,
}

#[derive(Debug, Error)]
pub enum UserStoreError {
    #[error("user not found")]
    NotFound,

    #[error("email or username already registered")]
    Duplicate,

    #[error("user store error: {0}")]
    Backend(String),
}

/// Capability consumed from the external user store. Emails are compared
/// case-insensitively; not-found is signalled distinctly from backend
/// failures.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_by_email(&self, email: &str) -> Result<User, UserStoreError>;
    async fn get_by_id(&self, id: i64) -> Result<User, UserStoreError>;
    async fn create(&self, user: NewUser) -> Result<User, UserStoreError>;
    async fn update(&self, user: &User) -> Result<(), UserStoreError>;
}

/// Reference implementation backed by a process-local map. Tests substitute
/// it for the relational store; the standalone binary uses it so the service
/// can run without external collaborators.
pub struct MemoryUserStore {
    users: Mutex<HashMap<i64, User>>,
    next_id: AtomicI64,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

impl Default for MemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn get_by_email(&self, email: &str) -> Result<User, UserStoreError> {
        let users = self.users.lock().expect("user store poisoned");
        users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned()
            .ok_or(UserStoreError::NotFound)
    }

    async fn get_by_id(&self, id: i64) -> Result<User, UserStoreError> {
        let users = self.users.lock().expect("user store poisoned");
        users.get(&id).cloned().ok_or(UserStoreError::NotFound)
    }

    async fn create(&self, user: NewUser) -> Result<User, UserStoreError> {
        let mut users = self.users.lock().expect("user store poisoned");
        let duplicate = users
            .values()
            .any(|u| u.email.eq_ignore_ascii_case(&user.email) || u.username == user.username);
        if duplicate {
            return Err(UserStoreError::Duplicate);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let created = User {
            id,
            email: user.email.to_lowercase(),
            username: user.username,
            password_hash: user.password_hash,
            is_email_verified: false,
            role_id: user.role_id,
            created_at: Utc::now(),
        };
        users.insert(id, created.clone());
        Ok(created)
    }

    async fn update(&self, user: &User) -> Result<(), UserStoreError> {
        let mut users = self.users.lock().expect("user store poisoned");
        match users.get_mut(&user.id) {
            Some(existing) => {
                *existing = user.clone();
                Ok(())
            }
            None => Err(UserStoreError::NotFound),
        }
    }
}
