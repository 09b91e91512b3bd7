// Copyright 2025 gearman-rs Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Gearman CLI
//!
//! Command-line interface for submitting jobs to Gearman job servers.
//!
//! ## Key Commands
//!
//! - `gearman submit`: Run a foreground job and print its result as JSON
//! - `gearman background`: Fire a background job and print its handle
//!
//! ## Server Selection
//!
//! Servers come from repeated `-s` options, then the `GEARMAN_SERVERS`
//! environment variable (comma-separated), then `127.0.0.1:4730`.

use anyhow::{anyhow, Result};
use gearman_common::{Task, TaskState, TaskType};
use serde_json::Value;

/// Environment variable holding a comma-separated server list.
pub const SERVERS_ENV: &str = "GEARMAN_SERVERS";

/// Server used when none is configured.
pub const DEFAULT_SERVER: &str = "127.0.0.1:4730";

/// Picks the server list: explicit options, then `env`, then the default.
pub fn resolve_servers(options: Vec<String>, env: Option<String>) -> Vec<String> {
    if !options.is_empty() {
        return options;
    }

    let from_env: Vec<String> = env
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();

    if from_env.is_empty() {
        vec![DEFAULT_SERVER.to_string()]
    } else {
        from_env
    }
}

/// Parses a job argument: JSON if it parses, a plain string otherwise.
///
/// A missing argument is sent as the empty string.
pub fn parse_arg(raw: Option<&str>) -> Value {
    match raw {
        None => Value::String(String::new()),
        Some(raw) => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())),
    }
}

/// Maps `normal`, `high` or `low` to a task type.
pub fn parse_priority(priority: &str, background: bool) -> Result<TaskType> {
    let task_type: TaskType = priority
        .parse()
        .map_err(|e| anyhow!("Invalid priority '{}': {}", priority, e))?;

    if task_type.is_background() {
        return Err(anyhow!(
            "Invalid priority '{}': expected normal, high or low",
            priority
        ));
    }

    Ok(if background {
        task_type.to_background()
    } else {
        task_type
    })
}

/// Turns a finished foreground task into its printable result.
///
/// # Errors
///
/// Fails unless the job completed: it failed, the server lost track of it,
/// or the run timed out first.
pub fn task_outcome(task: &Task) -> Result<String> {
    match task.state() {
        TaskState::Complete => {
            let result = task.result().cloned().unwrap_or(Value::Null);
            Ok(serde_json::to_string(&result)?)
        }
        TaskState::Failed => Err(anyhow!("Job '{}' failed", task.func)),
        TaskState::Finished => Err(anyhow!(
            "Job '{}' finished without a result",
            task.func
        )),
        TaskState::Pending | TaskState::Submitted => {
            Err(anyhow!("Timed out waiting for job '{}'", task.func))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_servers_prefers_options() {
        let servers = resolve_servers(
            vec!["10.0.0.1:4730".into()],
            Some("10.0.0.2,10.0.0.3".into()),
        );
        assert_eq!(servers, vec!["10.0.0.1:4730"]);
    }

    #[test]
    fn test_resolve_servers_from_env() {
        let servers = resolve_servers(Vec::new(), Some(" a:1 , ,b ".into()));
        assert_eq!(servers, vec!["a:1", "b"]);
    }

    #[test]
    fn test_resolve_servers_default() {
        assert_eq!(resolve_servers(Vec::new(), None), vec![DEFAULT_SERVER]);
        assert_eq!(
            resolve_servers(Vec::new(), Some(" , ".into())),
            vec![DEFAULT_SERVER]
        );
    }

    #[test]
    fn test_parse_arg() {
        assert_eq!(parse_arg(Some(r#"{"a": 1}"#)), json!({"a": 1}));
        assert_eq!(parse_arg(Some("42")), json!(42));
        assert_eq!(parse_arg(Some("hello world")), json!("hello world"));
        assert_eq!(parse_arg(None), json!(""));
    }

    #[test]
    fn test_parse_priority() {
        assert_eq!(parse_priority("normal", false).unwrap(), TaskType::Normal);
        assert_eq!(parse_priority("high", false).unwrap(), TaskType::High);
        assert_eq!(parse_priority("low", true).unwrap(), TaskType::LowBackground);
        assert_eq!(parse_priority("normal", true).unwrap(), TaskType::Background);
        assert!(parse_priority("urgent", false).is_err());
        assert!(parse_priority("background", false).is_err());
    }

    #[test]
    fn test_task_outcome() {
        let mut task = Task::new("f", json!(1));
        assert!(task_outcome(&task).is_err());

        task.complete(json!({"ok": true}));
        assert_eq!(task_outcome(&task).unwrap(), r#"{"ok":true}"#);

        let mut failed = Task::new("f", json!(1));
        failed.fail();
        let err = task_outcome(&failed).unwrap_err();
        assert!(err.to_string().contains("failed"));
    }
}
