//! Translation of tasks into Gearman client packets.

use gearman_common::protocol::error::Result;
use gearman_common::transport::Connector;
use gearman_common::{PacketType, Request, Task, TaskType};
use serde_json::Value;
use tracing::debug;

use crate::pool::{ConnectionPool, Pending};

/// The `SUBMIT_JOB*` command for a task type.
pub fn command_for(task_type: TaskType) -> PacketType {
    match task_type {
        TaskType::Normal => PacketType::SubmitJob,
        TaskType::High => PacketType::SubmitJobHigh,
        TaskType::Low => PacketType::SubmitJobLow,
        TaskType::Background => PacketType::SubmitJobBg,
        TaskType::HighBackground => PacketType::SubmitJobHighBg,
        TaskType::LowBackground => PacketType::SubmitJobLowBg,
    }
}

/// Wire form of a task argument.
///
/// Strings travel as-is and numbers as their decimal text, so plain workers
/// see plain values. Booleans become `"1"` or the empty string. Anything
/// structured (and `null`) is sent as JSON.
pub fn encode_argument(arg: &Value) -> Result<Vec<u8>> {
    Ok(match arg {
        Value::String(s) => s.as_bytes().to_vec(),
        Value::Number(n) => n.to_string().into_bytes(),
        Value::Bool(true) => b"1".to_vec(),
        Value::Bool(false) => Vec::new(),
        Value::Null | Value::Array(_) | Value::Object(_) => serde_json::to_vec(arg)?,
    })
}

/// Builds the submission packet for `task`.
pub fn submit_request(task: &Task) -> Result<Request> {
    Ok(Request::SubmitJob {
        command: command_for(task.task_type),
        func: task.func.clone(),
        uniq: task.uniq.clone(),
        arg: encode_argument(&task.arg)?,
    })
}

/// Sends `task` to `server` and queues `index` for acknowledgment.
///
/// A send failure is returned unchanged; the caller decides whether the
/// server goes to backoff. Nothing is queued unless the send succeeded.
pub async fn submit<K: Connector>(
    pool: &mut ConnectionPool<K>,
    server: &str,
    task: &Task,
    index: usize,
) -> Result<()> {
    let request = submit_request(task)?;
    pool.send(server, &request).await?;

    if let Some(pooled) = pool.connection_mut(server) {
        pooled.pending_mut().push_back(Pending::Task(index));
    }
    debug!(
        server = %server,
        func = %task.func,
        command = request.packet_type().name(),
        index,
        "Submitted task"
    );
    Ok(())
}

/// Asks `server` for the status of `handle`.
pub async fn request_status<K: Connector>(
    pool: &mut ConnectionPool<K>,
    server: &str,
    handle: &str,
) -> Result<()> {
    pool.send(
        server,
        &Request::GetStatus {
            handle: handle.to_string(),
        },
    )
    .await?;
    debug!(server = %server, handle = %handle, "Requested job status");
    Ok(())
}
