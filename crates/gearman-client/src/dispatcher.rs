use gearman_common::protocol::error::{GearmanError, Result};
use gearman_common::{ServerMessage, TaskSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use tracing::{debug, warn};

use crate::pool::Pending;

/// What to do with a reply that matches no task in the running set.
///
/// Replies for jobs from an earlier run, or a `JOB_CREATED` with nothing
/// pending on its connection, are common after a reconnect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownHandlePolicy {
    /// Log and drop the reply.
    #[default]
    Ignore,
    /// Abort the run with `UnknownHandle`.
    Fail,
}

/// Decodes a `WORK_COMPLETE` payload: JSON when it parses, text otherwise.
pub fn decode_result(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

/// Applies one server message to the running set.
///
/// `pending` is the acknowledgment queue of the connection `message` arrived
/// on. Server `ERROR` packets and packets a client never expects abort the
/// run.
pub fn dispatch(
    set: &mut TaskSet,
    server: &str,
    pending: &mut VecDeque<Pending>,
    message: ServerMessage,
    policy: UnknownHandlePolicy,
) -> Result<()> {
    match message {
        ServerMessage::JobCreated { handle } => {
            let index = match pending.pop_front() {
                Some(Pending::Task(index)) => index,
                Some(Pending::Retired) => {
                    debug!(server = %server, handle = %handle, "Late acknowledgment from an earlier run");
                    return Ok(());
                }
                None => return unknown(policy, &handle, "job_created"),
            };
            set.assign_handle(index, &handle, server)?;
            debug!(server = %server, handle = %handle, index, "Job created");

            if set.task(index).is_some_and(|task| task.task_type.is_background()) {
                set.finish(index);
            }
        }
        ServerMessage::WorkComplete { handle, result } => {
            if let Some(index) = locate(set, &handle, "work_complete", policy)? {
                set.complete(index, decode_result(&result));
            }
        }
        ServerMessage::WorkStatus {
            handle,
            numerator,
            denominator,
        } => {
            if let Some(index) = locate(set, &handle, "work_status", policy)? {
                set.status(index, numerator, denominator);
            }
        }
        ServerMessage::WorkFail { handle } => {
            if let Some(index) = locate(set, &handle, "work_fail", policy)? {
                set.fail(index);
            }
        }
        ServerMessage::StatusRes {
            handle,
            known,
            numerator,
            denominator,
            ..
        } => {
            if let Some(index) = locate(set, &handle, "status_res", policy)? {
                if known {
                    set.status(index, numerator, denominator);
                } else {
                    // The server no longer knows the job; nothing more will arrive.
                    set.finish(index);
                }
            }
        }
        ServerMessage::Error { code, text } => {
            return Err(GearmanError::Server {
                code,
                message: text,
            });
        }
        ServerMessage::Other { function } => {
            return Err(GearmanError::UnrecognizedFunction(function));
        }
    }
    Ok(())
}

fn locate(
    set: &TaskSet,
    handle: &str,
    function: &str,
    policy: UnknownHandlePolicy,
) -> Result<Option<usize>> {
    match set.index_of(handle) {
        Some(index) => Ok(Some(index)),
        None => unknown(policy, handle, function).map(|()| None),
    }
}

fn unknown(policy: UnknownHandlePolicy, handle: &str, function: &str) -> Result<()> {
    match policy {
        UnknownHandlePolicy::Ignore => {
            warn!(handle = %handle, function, "Dropping reply for unknown job handle");
            Ok(())
        }
        UnknownHandlePolicy::Fail => Err(GearmanError::UnknownHandle(handle.to_string())),
    }
}
