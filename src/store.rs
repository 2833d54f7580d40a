//! Users and tasks.
//!
//! Handlers reach persistence through [`TaskStore`]. Every task operation is
//! scoped by the owning [`UserId`]; a task that exists but belongs to someone
//! else is indistinguishable from one that does not exist.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::handler::BoxFuture;
use crate::identity::UserId;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub managed_at: DateTime<Utc>,
    pub user_id: UserId,
}

/// Client-supplied task fields for create and update.
#[derive(Clone, Debug, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

impl NewTask {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.title.trim().is_empty() {
            return Err("title must not be empty");
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct User {
    pub id: UserId,
    pub username: String,
    /// bcrypt hash; the plain password is never stored.
    pub password_hash: String,
}

#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("username `{0}` already exists")]
    Conflict(String),
    #[error("not found")]
    NotFound,
}

pub trait TaskStore: Send + Sync + 'static {
    /// Stores a new user. Fails with [`StoreError::Conflict`] if the
    /// username is taken.
    fn create_user<'a>(&'a self, username: &'a str, password_hash: String) -> BoxFuture<'a, Result<User, StoreError>>;

    fn find_user<'a>(&'a self, username: &'a str) -> BoxFuture<'a, Result<Option<User>, StoreError>>;

    /// The owner's tasks, oldest first.
    fn list_tasks(&self, owner: UserId) -> BoxFuture<'_, Result<Vec<Task>, StoreError>>;

    fn create_task(&self, owner: UserId, task: NewTask) -> BoxFuture<'_, Result<Task, StoreError>>;

    fn get_task(&self, owner: UserId, id: i64) -> BoxFuture<'_, Result<Task, StoreError>>;

    fn update_task(&self, owner: UserId, id: i64, task: NewTask) -> BoxFuture<'_, Result<Task, StoreError>>;

    fn delete_task(&self, owner: UserId, id: i64) -> BoxFuture<'_, Result<(), StoreError>>;
}

/// Process-local store. State is lost on restart.
#[derive(Debug)]
pub struct MemoryTaskStore {
    users: DashMap<String, User>,
    tasks: DashMap<i64, Task>,
    next_user: AtomicI64,
    next_task: AtomicI64,
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self {
            users: DashMap::new(),
            tasks: DashMap::new(),
            next_user: AtomicI64::new(1),
            next_task: AtomicI64::new(1),
        }
    }
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_user(&self, username: &str, password_hash: String) -> Result<User, StoreError> {
        match self.users.entry(username.to_owned()) {
            Entry::Occupied(_) => Err(StoreError::Conflict(username.to_owned())),
            Entry::Vacant(slot) => {
                let user = User {
                    id: UserId(self.next_user.fetch_add(1, Ordering::Relaxed)),
                    username: username.to_owned(),
                    password_hash,
                };
                slot.insert(user.clone());
                Ok(user)
            }
        }
    }

    fn owned(&self, owner: UserId, id: i64) -> Result<Task, StoreError> {
        self.tasks
            .get(&id)
            .filter(|t| t.user_id == owner)
            .map(|t| t.value().clone())
            .ok_or(StoreError::NotFound)
    }

    fn insert_task(&self, owner: UserId, new: NewTask) -> Task {
        let now = Utc::now();
        let task = Task {
            id: self.next_task.fetch_add(1, Ordering::Relaxed),
            title: new.title,
            description: new.description,
            created_at: now,
            managed_at: now,
            user_id: owner,
        };
        self.tasks.insert(task.id, task.clone());
        task
    }

    fn replace_task(&self, owner: UserId, id: i64, new: NewTask) -> Result<Task, StoreError> {
        let mut task = self
            .tasks
            .get_mut(&id)
            .filter(|t| t.user_id == owner)
            .ok_or(StoreError::NotFound)?;
        task.title = new.title;
        task.description = new.description;
        task.managed_at = Utc::now();
        Ok(task.value().clone())
    }
}

impl TaskStore for MemoryTaskStore {
    fn create_user<'a>(&'a self, username: &'a str, password_hash: String) -> BoxFuture<'a, Result<User, StoreError>> {
        Box::pin(async move { self.insert_user(username, password_hash) })
    }

    fn find_user<'a>(&'a self, username: &'a str) -> BoxFuture<'a, Result<Option<User>, StoreError>> {
        Box::pin(async move { Ok(self.users.get(username).map(|u| u.value().clone())) })
    }

    fn list_tasks(&self, owner: UserId) -> BoxFuture<'_, Result<Vec<Task>, StoreError>> {
        Box::pin(async move {
            let mut tasks: Vec<Task> = self
                .tasks
                .iter()
                .filter(|t| t.user_id == owner)
                .map(|t| t.value().clone())
                .collect();
            tasks.sort_by_key(|t| t.id);
            Ok(tasks)
        })
    }

    fn create_task(&self, owner: UserId, task: NewTask) -> BoxFuture<'_, Result<Task, StoreError>> {
        Box::pin(async move { Ok(self.insert_task(owner, task)) })
    }

    fn get_task(&self, owner: UserId, id: i64) -> BoxFuture<'_, Result<Task, StoreError>> {
        Box::pin(async move { self.owned(owner, id) })
    }

    fn update_task(&self, owner: UserId, id: i64, task: NewTask) -> BoxFuture<'_, Result<Task, StoreError>> {
        Box::pin(async move { self.replace_task(owner, id, task) })
    }

    fn delete_task(&self, owner: UserId, id: i64) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            self.tasks
                .remove_if(&id, |_, t| t.user_id == owner)
                .map(|_| ())
                .ok_or(StoreError::NotFound)
        })
    }
}
