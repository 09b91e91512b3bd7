//! Gearman Common Types and Transport
//!
//! This crate provides the protocol definitions, task model and TCP transport
//! shared by the gearman-rs client and command-line tool.
//!
//! # Overview
//!
//! Gearman is a job queue protocol: clients submit named jobs to one or more
//! job servers, and workers attached to those servers run them. This crate
//! holds everything a client needs below the execution engine:
//!
//! - **Protocol Layer**: packet types, decoded server messages, errors, and the
//!   [`Task`]/[`TaskSet`] model the engine drives
//! - **Transport Layer**: the binary packet codec and the [`Connection`] /
//!   [`Connector`] seam with its TCP implementation
//!
//! # Architecture
//!
//! The wire protocol is the Gearman binary protocol:
//! - **Transport**: TCP, one long-lived connection per job server
//! - **Header**: `[4-byte magic] [u32 big-endian type] [u32 big-endian length]`
//! - **Payload**: arguments separated by NUL bytes; the last one is opaque
//! - **Max Packet Size**: 64 MiB (prevents memory exhaustion)
//!
//! # Components
//!
//! - [`protocol`] - Packet types, server messages, tasks and errors
//! - [`transport`] - Codec, connection traits and TCP transport
//!
//! # Example
//!
//! ```
//! use gearman_common::{Task, TaskSet, TaskType};
//! use serde_json::json;
//!
//! let mut set = TaskSet::new();
//! set.add_task(Task::new("resize_image", json!({"width": 640})));
//! set.add_task(Task::new("send_mail", json!("hello")).with_type(TaskType::Background));
//!
//! assert_eq!(set.tasks_count(), 2);
//! assert!(!set.finished());
//! ```
//!
//! [`Connection`]: transport::Connection
//! [`Connector`]: transport::Connector

pub mod protocol;
pub mod transport;

pub use protocol::*;
