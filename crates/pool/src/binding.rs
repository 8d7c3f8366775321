//! Per-task lease bindings.
//!
//! When a pool binds leases to tasks, a second borrow from a task that
//! already holds a lease gets that same lease again instead of a new
//! resource. Bindings are reference counted: the entry goes back to the
//! pool when the last lease sharing it is released.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::task::Id as TaskId;

use crate::entry::EntryId;

#[derive(Debug, Clone, Copy)]
struct Binding {
    entry: EntryId,
    holders: usize,
}

/// Outcome of releasing one bound lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unbind {
    /// Other leases of the same task still share the entry.
    Shared {
        /// Leases still outstanding.
        remaining: usize,
    },
    /// That was the last lease; the binding is gone.
    Last,
    /// The task had no binding for this entry.
    NotBound,
}

/// Task id to bound entry map.
#[derive(Debug, Default)]
pub struct TaskBindings {
    inner: Mutex<HashMap<TaskId, Binding>>,
}

impl TaskBindings {
    /// Create an empty binding map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `task` now holds `entry`.
    pub fn bind(&self, task: TaskId, entry: EntryId) {
        self.inner.lock().insert(task, Binding { entry, holders: 1 });
    }

    /// Add one more holder to `task`'s binding and return its entry.
    pub fn rebind(&self, task: TaskId) -> Option<EntryId> {
        let mut bindings = self.inner.lock();
        let binding = bindings.get_mut(&task)?;
        binding.holders += 1;
        Some(binding.entry)
    }

    /// Drop one holder of `task`'s binding to `entry`.
    pub fn release(&self, task: TaskId, entry: EntryId) -> Unbind {
        let mut bindings = self.inner.lock();
        match bindings.get_mut(&task) {
            Some(binding) if binding.entry == entry => {
                binding.holders = binding.holders.saturating_sub(1);
                if binding.holders == 0 {
                    bindings.remove(&task);
                    Unbind::Last
                } else {
                    Unbind::Shared {
                        remaining: binding.holders,
                    }
                }
            }
            _ => Unbind::NotBound,
        }
    }

    /// Forget `task`'s binding regardless of holder count.
    pub fn forget(&self, task: TaskId) -> Option<EntryId> {
        self.inner.lock().remove(&task).map(|b| b.entry)
    }

    /// Entry currently bound to `task`.
    #[must_use]
    pub fn get(&self, task: TaskId) -> Option<EntryId> {
        self.inner.lock().get(&task).map(|b| b.entry)
    }

    /// Number of tasks with a binding.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether no task has a binding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn some_task_id() -> TaskId {
        tokio::spawn(async { tokio::task::id() }).await.unwrap()
    }

    #[tokio::test]
    async fn rebind_counts_holders() {
        let bindings = TaskBindings::new();
        let task = some_task_id().await;
        let entry = EntryId::new();

        assert_eq!(bindings.rebind(task), None);
        bindings.bind(task, entry);
        assert_eq!(bindings.rebind(task), Some(entry));

        assert_eq!(bindings.release(task, entry), Unbind::Shared { remaining: 1 });
        assert_eq!(bindings.release(task, entry), Unbind::Last);
        assert!(bindings.is_empty());
    }

    #[tokio::test]
    async fn release_of_other_entry_is_not_bound() {
        let bindings = TaskBindings::new();
        let task = some_task_id().await;
        bindings.bind(task, EntryId::new());
        assert_eq!(bindings.release(task, EntryId::new()), Unbind::NotBound);
        assert_eq!(bindings.len(), 1);
    }

    #[tokio::test]
    async fn forget_drops_binding() {
        let bindings = TaskBindings::new();
        let task = some_task_id().await;
        let entry = EntryId::new();
        bindings.bind(task, entry);
        bindings.rebind(task);
        assert_eq!(bindings.forget(task), Some(entry));
        assert_eq!(bindings.get(task), None);
    }
}
