use serde_json::Value;
use std::collections::HashMap;

use crate::protocol::error::{GearmanError, Result};
use crate::protocol::task::Task;

/// An ordered group of tasks run together.
///
/// Insertion order is submission order. The set tracks how many tasks are
/// still waiting for a terminal reply; every terminal transition goes through
/// the set so that count drops exactly once per task.
#[derive(Debug, Default)]
pub struct TaskSet {
    tasks: Vec<Task>,
    tasks_count: usize,
    /// handle -> uniq, for correlating out-of-band status queries.
    handles: HashMap<String, String>,
    by_handle: HashMap<String, usize>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a task and returns its position in the set.
    pub fn add_task(&mut self, task: Task) -> usize {
        if !task.is_finished() {
            self.tasks_count += 1;
        }
        self.tasks.push(task);
        self.tasks.len() - 1
    }

    /// Number of tasks still waiting for a terminal reply.
    pub fn tasks_count(&self) -> usize {
        self.tasks_count
    }

    pub fn finished(&self) -> bool {
        self.tasks_count == 0
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    pub fn task(&self, index: usize) -> Option<&Task> {
        self.tasks.get(index)
    }

    pub fn into_tasks(self) -> Vec<Task> {
        self.tasks
    }

    /// handle -> uniq for every acknowledged task.
    pub fn handles(&self) -> &HashMap<String, String> {
        &self.handles
    }

    pub fn index_of(&self, handle: &str) -> Option<usize> {
        self.by_handle.get(handle).copied()
    }

    pub fn get_task(&self, handle: &str) -> Result<&Task> {
        self.index_of(handle)
            .and_then(|index| self.tasks.get(index))
            .ok_or_else(|| GearmanError::TaskNotFound(handle.to_string()))
    }

    /// Records the server acknowledgment for the task at `index`.
    pub fn assign_handle(&mut self, index: usize, handle: &str, server: &str) -> Result<()> {
        let task = self
            .tasks
            .get_mut(index)
            .ok_or_else(|| GearmanError::TaskNotFound(format!("index {}", index)))?;

        task.assign_handle(handle, server);
        self.handles.insert(handle.to_string(), task.uniq.clone());
        self.by_handle.insert(handle.to_string(), index);
        Ok(())
    }

    /// Completes the task at `index`. Returns `true` if this finished it.
    pub fn complete(&mut self, index: usize, result: Value) -> bool {
        let done = self
            .tasks
            .get_mut(index)
            .is_some_and(|task| task.complete(result));
        self.settle(done)
    }

    /// Fails the task at `index`. Returns `true` if this finished it.
    pub fn fail(&mut self, index: usize) -> bool {
        let done = self.tasks.get_mut(index).is_some_and(Task::fail);
        self.settle(done)
    }

    /// Finishes the task at `index` without a result. Returns `true` if this
    /// finished it.
    pub fn finish(&mut self, index: usize) -> bool {
        let done = self.tasks.get_mut(index).is_some_and(Task::finish);
        self.settle(done)
    }

    pub fn status(&mut self, index: usize, numerator: u64, denominator: u64) {
        if let Some(task) = self.tasks.get_mut(index) {
            task.status(numerator, denominator);
        }
    }

    fn settle(&mut self, done: bool) -> bool {
        if done {
            self.tasks_count = self.tasks_count.saturating_sub(1);
        }
        done
    }
}

impl FromIterator<Task> for TaskSet {
    fn from_iter<I: IntoIterator<Item = Task>>(iter: I) -> Self {
        let mut set = TaskSet::new();
        for task in iter {
            set.add_task(task);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::task::TaskState;
    use serde_json::json;

    fn sample_set() -> TaskSet {
        vec![
            Task::new("a", json!(1)),
            Task::new("b", json!(2)),
            Task::new("c", json!(3)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_add_task_counts() {
        let set = sample_set();
        assert_eq!(set.len(), 3);
        assert_eq!(set.tasks_count(), 3);
        assert!(!set.finished());
        assert_eq!(set.task(1).unwrap().func, "b");
    }

    #[test]
    fn test_empty_set_is_finished() {
        let set = TaskSet::new();
        assert!(set.is_empty());
        assert!(set.finished());
    }

    #[test]
    fn test_assign_handle_registers_lookup() {
        let mut set = sample_set();
        set.assign_handle(2, "H:x:9", "srv1").unwrap();

        let task = set.get_task("H:x:9").unwrap();
        assert_eq!(task.func, "c");
        assert_eq!(task.server.as_deref(), Some("srv1"));
        assert_eq!(set.handles().get("H:x:9"), Some(&task.uniq));
        assert_eq!(set.index_of("H:x:9"), Some(2));
    }

    #[test]
    fn test_get_task_unknown_handle() {
        let set = sample_set();
        assert!(matches!(
            set.get_task("H:nope"),
            Err(GearmanError::TaskNotFound(_))
        ));
    }

    #[test]
    fn test_assign_handle_out_of_range() {
        let mut set = sample_set();
        assert!(set.assign_handle(10, "H:1", "srv").is_err());
    }

    #[test]
    fn test_terminal_decrements_exactly_once() {
        let mut set = sample_set();

        assert!(set.complete(0, json!("done")));
        assert_eq!(set.tasks_count(), 2);

        // duplicate terminal replies for the same task
        assert!(!set.complete(0, json!("again")));
        assert!(!set.fail(0));
        assert!(!set.finish(0));
        assert_eq!(set.tasks_count(), 2);

        assert!(set.fail(1));
        assert!(set.finish(2));
        assert_eq!(set.tasks_count(), 0);
        assert!(set.finished());

        assert_eq!(set.task(0).unwrap().state(), TaskState::Complete);
        assert_eq!(set.task(1).unwrap().state(), TaskState::Failed);
        assert_eq!(set.task(2).unwrap().state(), TaskState::Finished);
    }

    #[test]
    fn test_status_does_not_decrement() {
        let mut set = sample_set();
        set.status(0, 1, 3);
        set.status(0, 2, 3);
        assert_eq!(set.tasks_count(), 3);
        assert_eq!(set.task(0).unwrap().progress(), (2, 3));
    }

    #[test]
    fn test_out_of_range_transitions_are_noops() {
        let mut set = sample_set();
        assert!(!set.complete(7, json!(null)));
        assert!(!set.fail(7));
        set.status(7, 1, 1);
        assert_eq!(set.tasks_count(), 3);
    }
}
