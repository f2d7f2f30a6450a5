//! In-memory store.
//!
//! Reference implementation of the persistence interface, used by the
//! standalone daemon and the test suite. Entities live in maps behind one
//! lock; each `open()` hands out a connection view with its own open/closed
//! state so the per-unit connection discipline is still exercised.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::model::{
    Account, AccountStatus, ContentAssignment, CookieSnapshot, Proxy, SubTask, SubTaskStatus,
    Task, TaskStatus,
};

use super::{Store, StoreConn, StoreError};

#[derive(Default)]
struct Tables {
    accounts: HashMap<String, Account>,
    proxies: HashMap<String, Proxy>,
    tasks: HashMap<String, Task>,
    subtasks: HashMap<String, SubTask>,
    assignments: HashMap<String, ContentAssignment>,
    cookie_snapshots: Vec<CookieSnapshot>,
    open_connections: usize,
}

/// Shared in-memory tables.
#[derive(Clone, Default)]
pub struct MemStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_account(&self, account: Account) {
        self.tables.lock().accounts.insert(account.id.clone(), account);
    }

    pub fn insert_proxy(&self, proxy: Proxy) {
        self.tables.lock().proxies.insert(proxy.id.clone(), proxy);
    }

    pub fn insert_task(&self, task: Task) {
        self.tables.lock().tasks.insert(task.id.clone(), task);
    }

    pub fn insert_assignment(&self, assignment: ContentAssignment) {
        self.tables
            .lock()
            .assignments
            .insert(assignment.id.clone(), assignment);
    }

    pub fn account(&self, account_id: &str) -> Option<Account> {
        self.tables.lock().accounts.get(account_id).cloned()
    }

    pub fn task(&self, task_id: &str) -> Option<Task> {
        self.tables.lock().tasks.get(task_id).cloned()
    }

    pub fn subtasks_of(&self, task_id: &str) -> Vec<SubTask> {
        let mut rows: Vec<SubTask> = self
            .tables
            .lock()
            .subtasks
            .values()
            .filter(|s| s.task_id == task_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.account_id.cmp(&b.account_id));
        rows
    }

    pub fn cookie_snapshots(&self, account_id: &str) -> Vec<CookieSnapshot> {
        self.tables
            .lock()
            .cookie_snapshots
            .iter()
            .filter(|c| c.account_id == account_id)
            .cloned()
            .collect()
    }

    pub fn pending_task_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .tables
            .lock()
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .map(|t| t.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Connections currently open across all units. The runner tests assert
    /// this stays bounded by the concurrency limit.
    pub fn open_connection_count(&self) -> usize {
        self.tables.lock().open_connections
    }
}

#[async_trait]
impl Store for MemStore {
    async fn open(&self) -> Result<Box<dyn StoreConn>, StoreError> {
        self.tables.lock().open_connections += 1;
        Ok(Box::new(MemConn {
            tables: self.tables.clone(),
            closed: false,
        }))
    }
}

struct MemConn {
    tables: Arc<Mutex<Tables>>,
    closed: bool,
}

impl MemConn {
    fn guard(&self) -> Result<(), StoreError> {
        if self.closed {
            return Err(StoreError::Connection("connection already closed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreConn for MemConn {
    async fn load_task(&mut self, task_id: &str) -> Result<Task, StoreError> {
        self.guard()?;
        self.tables
            .lock()
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("task {}", task_id)))
    }

    async fn load_account(&mut self, account_id: &str) -> Result<Account, StoreError> {
        self.guard()?;
        self.tables
            .lock()
            .accounts
            .get(account_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("account {}", account_id)))
    }

    async fn load_proxies(&mut self) -> Result<Vec<Proxy>, StoreError> {
        self.guard()?;
        let mut proxies: Vec<Proxy> = self.tables.lock().proxies.values().cloned().collect();
        proxies.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(proxies)
    }

    async fn load_subtasks(&mut self, task_id: &str) -> Result<Vec<SubTask>, StoreError> {
        self.guard()?;
        let mut rows: Vec<SubTask> = self
            .tables
            .lock()
            .subtasks
            .values()
            .filter(|s| s.task_id == task_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rows)
    }

    async fn load_assignment(
        &mut self,
        subtask_id: &str,
    ) -> Result<Option<ContentAssignment>, StoreError> {
        self.guard()?;
        Ok(self
            .tables
            .lock()
            .assignments
            .values()
            .find(|a| a.subtask_id.as_deref() == Some(subtask_id))
            .cloned())
    }

    async fn take_unassigned_content(
        &mut self,
        task_id: &str,
        subtask_id: &str,
    ) -> Result<Option<ContentAssignment>, StoreError> {
        self.guard()?;
        let mut tables = self.tables.lock();

        let mut candidate_ids: Vec<String> = tables
            .assignments
            .values()
            .filter(|a| a.task_id == task_id && a.subtask_id.is_none())
            .map(|a| a.id.clone())
            .collect();
        candidate_ids.sort();

        let Some(id) = candidate_ids.into_iter().next() else {
            return Ok(None);
        };

        if let Some(assignment) = tables.assignments.get_mut(&id) {
            assignment.subtask_id = Some(subtask_id.to_string());
            return Ok(Some(assignment.clone()));
        }
        Ok(None)
    }

    async fn account_has_running_subtask(
        &mut self,
        account_id: &str,
    ) -> Result<bool, StoreError> {
        self.guard()?;
        Ok(self
            .tables
            .lock()
            .subtasks
            .values()
            .any(|s| s.account_id == account_id && s.status == SubTaskStatus::Running))
    }

    async fn insert_subtask(&mut self, subtask: &SubTask) -> Result<(), StoreError> {
        self.guard()?;
        let mut tables = self.tables.lock();
        if tables.subtasks.contains_key(&subtask.id) {
            return Err(StoreError::Conflict(format!("subtask {}", subtask.id)));
        }
        tables.subtasks.insert(subtask.id.clone(), subtask.clone());
        Ok(())
    }

    async fn update_subtask(&mut self, subtask: &SubTask) -> Result<(), StoreError> {
        self.guard()?;
        let mut tables = self.tables.lock();
        if !tables.subtasks.contains_key(&subtask.id) {
            return Err(StoreError::NotFound(format!("subtask {}", subtask.id)));
        }
        tables.subtasks.insert(subtask.id.clone(), subtask.clone());
        Ok(())
    }

    async fn update_task_status(
        &mut self,
        task_id: &str,
        status: TaskStatus,
        log_line: Option<String>,
    ) -> Result<(), StoreError> {
        self.guard()?;
        let mut tables = self.tables.lock();
        let task = tables
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| StoreError::NotFound(format!("task {}", task_id)))?;
        task.status = status;
        task.updated_at = chrono::Utc::now();
        if let Some(line) = log_line {
            task.log.push(line);
        }
        Ok(())
    }

    async fn update_account_status(
        &mut self,
        account_id: &str,
        status: AccountStatus,
    ) -> Result<(), StoreError> {
        self.guard()?;
        let mut tables = self.tables.lock();
        let account = tables
            .accounts
            .get_mut(account_id)
            .ok_or_else(|| StoreError::NotFound(format!("account {}", account_id)))?;
        account.status = status;
        Ok(())
    }

    async fn update_account_session_marks(
        &mut self,
        account_id: &str,
        updated: &Account,
    ) -> Result<(), StoreError> {
        self.guard()?;
        let mut tables = self.tables.lock();
        let account = tables
            .accounts
            .get_mut(account_id)
            .ok_or_else(|| StoreError::NotFound(format!("account {}", account_id)))?;
        account.proxy_id = updated.proxy_id.clone();
        account.profile_id = updated.profile_id.clone();
        account.last_used = updated.last_used;
        account.last_warmed = updated.last_warmed;
        account.follow_cursor = updated.follow_cursor.clone();
        Ok(())
    }

    async fn save_cookie_snapshot(
        &mut self,
        snapshot: &CookieSnapshot,
    ) -> Result<(), StoreError> {
        self.guard()?;
        self.tables.lock().cookie_snapshots.push(snapshot.clone());
        Ok(())
    }

    async fn close(mut self: Box<Self>) -> Result<(), StoreError> {
        self.guard()?;
        self.closed = true;
        let mut tables = self.tables.lock();
        tables.open_connections = tables.open_connections.saturating_sub(1);
        Ok(())
    }
}

impl Drop for MemConn {
    fn drop(&mut self) {
        if !self.closed {
            let mut tables = self.tables.lock();
            tables.open_connections = tables.open_connections.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closed_connection_rejects_reads() {
        let store = MemStore::new();
        store.insert_account(Account::new("a1", "user", "pass"));

        let mut conn = store.open().await.unwrap();
        assert!(conn.load_account("a1").await.is_ok());
        conn.close().await.unwrap();

        let mut conn2 = store.open().await.unwrap();
        assert!(conn2.load_account("a1").await.is_ok());
        conn2.close().await.unwrap();
        assert_eq!(store.open_connection_count(), 0);
    }

    #[tokio::test]
    async fn running_subtask_lookup_spans_tasks() {
        let store = MemStore::new();
        let mut st = SubTask::new("t1", "a1");
        st.advance(SubTaskStatus::Running);

        let mut conn = store.open().await.unwrap();
        conn.insert_subtask(&st).await.unwrap();
        assert!(conn.account_has_running_subtask("a1").await.unwrap());
        assert!(!conn.account_has_running_subtask("a2").await.unwrap());
        conn.close().await.unwrap();
    }
}
