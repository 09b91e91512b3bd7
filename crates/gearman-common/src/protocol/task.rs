use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::protocol::error::GearmanError;

/// Priority and background class of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    #[default]
    Normal,
    High,
    Low,
    Background,
    HighBackground,
    LowBackground,
}

impl TaskType {
    /// Background jobs are done, from the client's point of view, as soon as
    /// the server acknowledges them.
    pub fn is_background(self) -> bool {
        matches!(
            self,
            TaskType::Background | TaskType::HighBackground | TaskType::LowBackground
        )
    }

    /// The background variant with the same priority.
    pub fn to_background(self) -> Self {
        match self {
            TaskType::Normal | TaskType::Background => TaskType::Background,
            TaskType::High | TaskType::HighBackground => TaskType::HighBackground,
            TaskType::Low | TaskType::LowBackground => TaskType::LowBackground,
        }
    }
}

impl FromStr for TaskType {
    type Err = GearmanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(TaskType::Normal),
            "high" => Ok(TaskType::High),
            "low" => Ok(TaskType::Low),
            "background" | "bg" => Ok(TaskType::Background),
            "high-background" | "high_bg" => Ok(TaskType::HighBackground),
            "low-background" | "low_bg" => Ok(TaskType::LowBackground),
            other => Err(GearmanError::InvalidTaskType(other.to_string())),
        }
    }
}

/// Where a task is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Not yet acknowledged by a server.
    Pending,
    /// Has a handle, no terminal reply yet.
    Submitted,
    /// `work_complete` received.
    Complete,
    /// `work_fail` received.
    Failed,
    /// Finished without a result: a background job, or a job the server no
    /// longer knows about.
    Finished,
}

type CompleteCallback = Box<dyn FnMut(&Task, &Value) + Send + Sync>;
type FailCallback = Box<dyn FnMut(&Task) + Send + Sync>;
type StatusCallback = Box<dyn FnMut(&Task, u64, u64) + Send + Sync>;

/// A single job to run on a Gearman server.
///
/// The caller builds tasks, groups them in a [`TaskSet`](crate::TaskSet) and
/// hands the set to the client, which fills in `handle` and `server` and
/// drives the task to a terminal state.
///
/// Terminal transitions ([`complete`](Self::complete), [`fail`](Self::fail),
/// [`finish`](Self::finish)) are one-shot: only the first one takes effect.
///
/// # Example
///
/// ```
/// use gearman_common::{Task, TaskType};
/// use serde_json::json;
///
/// let task = Task::new("thumbnail", json!({"path": "/tmp/cat.png"}))
///     .with_type(TaskType::High)
///     .on_complete(|task, result| println!("{} done: {}", task.func, result));
///
/// assert!(task.handle.is_none());
/// assert!(!task.is_finished());
/// ```
pub struct Task {
    /// Name of the function a worker registered for.
    pub func: String,
    /// Workload; scalars are sent as text, everything else as JSON.
    pub arg: Value,
    /// Client-side unique id; identical ids let the server coalesce jobs.
    pub uniq: String,
    pub task_type: TaskType,
    /// Job handle assigned by the server.
    pub handle: Option<String>,
    /// Server the job was acknowledged by.
    pub server: Option<String>,
    state: TaskState,
    result: Option<Value>,
    numerator: u64,
    denominator: u64,
    complete_callback: Option<CompleteCallback>,
    fail_callback: Option<FailCallback>,
    status_callback: Option<StatusCallback>,
}

impl Task {
    pub fn new(func: impl Into<String>, arg: Value) -> Self {
        Self {
            func: func.into(),
            arg,
            uniq: uuid::Uuid::new_v4().to_string(),
            task_type: TaskType::Normal,
            handle: None,
            server: None,
            state: TaskState::Pending,
            result: None,
            numerator: 0,
            denominator: 0,
            complete_callback: None,
            fail_callback: None,
            status_callback: None,
        }
    }

    /// Shorthand for a normal-priority background task.
    pub fn background(func: impl Into<String>, arg: Value) -> Self {
        Self::new(func, arg).with_type(TaskType::Background)
    }

    pub fn with_type(mut self, task_type: TaskType) -> Self {
        self.task_type = task_type;
        self
    }

    pub fn with_uniq(mut self, uniq: impl Into<String>) -> Self {
        self.uniq = uniq.into();
        self
    }

    /// Runs `callback` once when the job completes.
    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&Task, &Value) + Send + Sync + 'static,
    {
        self.complete_callback = Some(Box::new(callback));
        self
    }

    /// Runs `callback` once when the job fails.
    pub fn on_fail<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&Task) + Send + Sync + 'static,
    {
        self.fail_callback = Some(Box::new(callback));
        self
    }

    /// Runs `callback` on every progress update.
    pub fn on_status<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&Task, u64, u64) + Send + Sync + 'static,
    {
        self.status_callback = Some(Box::new(callback));
        self
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.state,
            TaskState::Complete | TaskState::Failed | TaskState::Finished
        )
    }

    /// Result of a completed job.
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Last reported `(numerator, denominator)`.
    pub fn progress(&self) -> (u64, u64) {
        (self.numerator, self.denominator)
    }

    /// Records the server acknowledgment.
    pub fn assign_handle(&mut self, handle: impl Into<String>, server: impl Into<String>) {
        self.handle = Some(handle.into());
        self.server = Some(server.into());
        if self.state == TaskState::Pending {
            self.state = TaskState::Submitted;
        }
    }

    /// Marks the job complete. Returns `false` if it was already finished.
    pub fn complete(&mut self, result: Value) -> bool {
        if self.is_finished() {
            return false;
        }
        self.state = TaskState::Complete;
        self.result = Some(result);

        if let Some(mut callback) = self.complete_callback.take() {
            if let Some(result) = &self.result {
                callback(&*self, result);
            }
            self.complete_callback = Some(callback);
        }
        true
    }

    /// Marks the job failed. Returns `false` if it was already finished.
    pub fn fail(&mut self) -> bool {
        if self.is_finished() {
            return false;
        }
        self.state = TaskState::Failed;

        if let Some(mut callback) = self.fail_callback.take() {
            callback(&*self);
            self.fail_callback = Some(callback);
        }
        true
    }

    /// Marks the job finished without a result. Returns `false` if it was
    /// already finished.
    pub fn finish(&mut self) -> bool {
        if self.is_finished() {
            return false;
        }
        self.state = TaskState::Finished;
        true
    }

    /// Records progress. Ignored once the task is finished.
    pub fn status(&mut self, numerator: u64, denominator: u64) {
        if self.is_finished() {
            return;
        }
        self.numerator = numerator;
        self.denominator = denominator;

        if let Some(mut callback) = self.status_callback.take() {
            callback(&*self, numerator, denominator);
            self.status_callback = Some(callback);
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("func", &self.func)
            .field("uniq", &self.uniq)
            .field("task_type", &self.task_type)
            .field("handle", &self.handle)
            .field("server", &self.server)
            .field("state", &self.state)
            .field("result", &self.result)
            .finish_non_exhaustive()
    }
}
