//! Persistence seam.
//!
//! The datastore itself is an external collaborator; this module defines the
//! interface the engine consumes plus an in-memory reference implementation.
//!
//! The interface is split in two on purpose. [`Store`] is a connection
//! factory shared across the app; [`StoreConn`] is a connection owned by
//! exactly one execution unit. A unit must read everything it needs and
//! close its connection *before* opening a browser context, and may only
//! open a fresh connection *after* the browser context is torn down. The
//! browser's cooperative single-threaded driver and the store's pooled
//! synchronous connections corrupt each other when interleaved, so the
//! hand-off is part of the contract, not a convention.

mod memory;

pub use memory::MemStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{
    Account, AccountStatus, ContentAssignment, CookieSnapshot, Proxy, SubTask, Task, TaskStatus,
};

/// Store-level errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Connection factory. Cheap to clone behind an `Arc`, shared across units.
#[async_trait]
pub trait Store: Send + Sync {
    /// Open a fresh connection for the calling execution unit.
    async fn open(&self) -> Result<Box<dyn StoreConn>, StoreError>;
}

/// One execution unit's connection. Not shared, not reused across the
/// browser-context boundary; dropped or closed when the unit hands off.
#[async_trait]
pub trait StoreConn: Send {
    async fn load_task(&mut self, task_id: &str) -> Result<Task, StoreError>;
    async fn load_account(&mut self, account_id: &str) -> Result<Account, StoreError>;
    async fn load_proxies(&mut self) -> Result<Vec<Proxy>, StoreError>;
    async fn load_subtasks(&mut self, task_id: &str) -> Result<Vec<SubTask>, StoreError>;
    async fn load_assignment(
        &mut self,
        subtask_id: &str,
    ) -> Result<Option<ContentAssignment>, StoreError>;

    /// Bind the next unassigned content item of the task to the given
    /// sub-task and return it. Content already bound elsewhere stays put;
    /// `None` means the task has no content left for this sub-task.
    async fn take_unassigned_content(
        &mut self,
        task_id: &str,
        subtask_id: &str,
    ) -> Result<Option<ContentAssignment>, StoreError>;

    /// Whether any task currently has a RUNNING sub-task for this account.
    async fn account_has_running_subtask(&mut self, account_id: &str)
        -> Result<bool, StoreError>;

    async fn insert_subtask(&mut self, subtask: &SubTask) -> Result<(), StoreError>;
    async fn update_subtask(&mut self, subtask: &SubTask) -> Result<(), StoreError>;
    async fn update_task_status(
        &mut self,
        task_id: &str,
        status: TaskStatus,
        log_line: Option<String>,
    ) -> Result<(), StoreError>;
    async fn update_account_status(
        &mut self,
        account_id: &str,
        status: AccountStatus,
    ) -> Result<(), StoreError>;
    async fn update_account_session_marks(
        &mut self,
        account_id: &str,
        account: &Account,
    ) -> Result<(), StoreError>;
    async fn save_cookie_snapshot(&mut self, snapshot: &CookieSnapshot)
        -> Result<(), StoreError>;

    /// Explicitly close the connection. Consumes the box so a closed
    /// connection cannot be touched again on this unit.
    async fn close(self: Box<Self>) -> Result<(), StoreError>;
}
