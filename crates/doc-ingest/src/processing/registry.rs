//! Process-wide registry of live tasks plus a bounded cache of finished ones

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use super::task::{Task, TaskStatus};
use crate::error::{Error, Result};

/// Default number of finished statuses kept queryable
pub const DEFAULT_FINISHED_CAPACITY: usize = 256;

pub(crate) struct RegistryInner {
    live: Mutex<HashMap<String, Arc<Task>>>,
    finished: DashMap<String, TaskStatus>,
    finished_order: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl RegistryInner {
    /// Move a terminal task out of the live map
    pub(crate) fn retire(&self, id: &str, status: TaskStatus) {
        self.live.lock().remove(id);

        if self.capacity == 0 {
            return;
        }
        let mut order = self.finished_order.lock();
        if self.finished.insert(id.to_string(), status).is_none() {
            order.push_back(id.to_string());
        }
        while order.len() > self.capacity {
            if let Some(oldest) = order.pop_front() {
                self.finished.remove(&oldest);
            }
        }
    }
}

/// Map of task id to task, guarded by one coarse lock
#[derive(Clone)]
pub struct TaskRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_FINISHED_CAPACITY)
    }
}

impl TaskRegistry {
    pub fn new(finished_capacity: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                live: Mutex::new(HashMap::new()),
                finished: DashMap::new(),
                finished_order: Mutex::new(VecDeque::new()),
                capacity: finished_capacity,
            }),
        }
    }

    /// Add a task; duplicate ids are rejected
    pub fn register(&self, task: Arc<Task>) -> Result<()> {
        let id = task.id().to_string();
        {
            let mut live = self.inner.live.lock();
            if live.contains_key(&id) || self.inner.finished.contains_key(&id) {
                return Err(Error::InvalidInput(format!("Task id already in use: {}", id)));
            }
            if !task.attach_registry(Arc::downgrade(&self.inner)) {
                return Err(Error::InvalidInput(format!(
                    "Task {} is already registered elsewhere",
                    id
                )));
            }
            live.insert(id.clone(), task.clone());
        }

        // A task that finished before registration never deregisters itself
        if task.is_terminal() {
            self.inner.retire(&id, task.status());
        }
        tracing::debug!("[{}] registered", id);
        Ok(())
    }

    /// Live task by id
    pub fn get(&self, id: &str) -> Option<Arc<Task>> {
        self.inner.live.lock().get(id).cloned()
    }

    /// Status of a live task, falling back to the finished cache
    pub fn status(&self, id: &str) -> Option<TaskStatus> {
        if let Some(task) = self.get(id) {
            return Some(task.status());
        }
        self.inner.finished.get(id).map(|s| s.value().clone())
    }

    /// Request cancellation; false when the task has already finished
    pub fn cancel(&self, id: &str) -> Result<bool> {
        if let Some(task) = self.get(id) {
            return Ok(task.cancel());
        }
        if self.inner.finished.contains_key(id) {
            return Ok(false);
        }
        Err(Error::NotFound(format!("Task {}", id)))
    }

    /// Every known task, newest first
    pub fn list(&self) -> Vec<TaskStatus> {
        // Collect under the registry lock, snapshot outside it
        let live: Vec<Arc<Task>> = self.inner.live.lock().values().cloned().collect();
        let mut statuses: Vec<TaskStatus> = live.iter().map(|t| t.status()).collect();
        let finished: Vec<TaskStatus> = self
            .inner
            .finished
            .iter()
            .filter(|entry| !statuses.iter().any(|s| &s.task_id == entry.key()))
            .map(|entry| entry.value().clone())
            .collect();
        statuses.extend(finished);
        statuses.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        statuses
    }

    pub fn active_count(&self) -> usize {
        self.inner.live.lock().len()
    }

    pub fn finished_count(&self) -> usize {
        self.inner.finished.len()
    }

    /// Cancel every live task (used on shutdown)
    pub fn cancel_all(&self) -> usize {
        let live: Vec<Arc<Task>> = self.inner.live.lock().values().cloned().collect();
        live.iter().filter(|t| t.cancel()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::events::NullSink;
    use crate::processing::state::{TaskKind, TaskState};

    fn task(id: &str) -> Arc<Task> {
        Arc::new(Task::new(id, TaskKind::FileProcessing, Arc::new(NullSink)))
    }

    #[test]
    fn test_register_and_duplicate() {
        let registry = TaskRegistry::default();
        registry.register(task("a")).unwrap();
        let err = registry.register(task("a")).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn test_terminal_task_moves_to_finished_cache() {
        let registry = TaskRegistry::default();
        let t = task("a");
        registry.register(t.clone()).unwrap();
        assert!(registry.cancel("a").unwrap());

        assert_eq!(registry.active_count(), 0);
        assert!(registry.get("a").is_none());
        let status = registry.status("a").unwrap();
        assert_eq!(status.state, TaskState::Cancelled);
        assert!(!registry.cancel("a").unwrap());
        assert!(matches!(registry.cancel("zzz"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_finished_cache_evicts_oldest() {
        let registry = TaskRegistry::new(2);
        for id in ["a", "b", "c"] {
            registry.register(task(id)).unwrap();
            registry.cancel(id).unwrap();
        }
        assert_eq!(registry.finished_count(), 2);
        assert!(registry.status("a").is_none());
        assert!(registry.status("c").is_some());
    }

    #[test]
    fn test_already_finished_task_is_retired_on_register() {
        let registry = TaskRegistry::default();
        let t = task("early");
        t.cancel();
        registry.register(t).unwrap();
        assert_eq!(registry.active_count(), 0);
        assert_eq!(registry.status("early").unwrap().state, TaskState::Cancelled);
    }

    #[test]
    fn test_list_contains_live_and_finished() {
        let registry = TaskRegistry::default();
        registry.register(task("live")).unwrap();
        registry.register(task("done")).unwrap();
        registry.cancel("done").unwrap();
        let ids: Vec<_> = registry.list().into_iter().map(|s| s.task_id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"live".to_string()));
        assert!(ids.contains(&"done".to_string()));
    }
}
