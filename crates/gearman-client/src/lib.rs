//! Gearman job submission client.
//!
//! [`GearmanClient`] keeps one connection per job server in a
//! [`ConnectionPool`], submits the tasks of a [`TaskSet`](gearman_common::TaskSet)
//! across them, and applies the servers' replies to the set until every task
//! is finished or the caller's deadline passes.

pub mod client;
pub mod dispatcher;
pub mod pool;
pub mod submit;

#[cfg(test)]
mod mock;

pub use client::{ClientConfig, GearmanClient};
pub use dispatcher::{decode_result, dispatch, UnknownHandlePolicy};
pub use pool::{ConnectionId, ConnectionPool, Pending, PooledConnection};
pub use submit::{command_for, encode_argument, request_status, submit};
