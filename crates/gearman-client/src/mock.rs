//! Scripted in-memory job servers for engine tests.

use async_trait::async_trait;
use gearman_common::protocol::error::{GearmanError, Result};
use gearman_common::transport::{Connection, Connector};
use gearman_common::{PacketType, Request, ServerMessage};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How a mock server answers a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// `JOB_CREATED`, then `WORK_COMPLETE` echoing the argument for
    /// foreground jobs.
    Echo,
    /// `JOB_CREATED`, then `WORK_FAIL` for foreground jobs.
    Fail,
    /// `JOB_CREATED` only.
    Ack,
    /// Nothing at all.
    Silent,
}

#[derive(Default)]
struct State {
    reachable: HashSet<String>,
    replies: HashMap<String, Reply>,
    inbox: HashMap<String, VecDeque<ServerMessage>>,
    sent: Vec<(String, Request)>,
    fail_sends: HashSet<String>,
    broken: HashSet<String>,
    unknown_status: bool,
    connect_delays: HashMap<String, Duration>,
    connects: HashMap<String, usize>,
    closes: HashMap<String, usize>,
    next_handle: usize,
}

impl State {
    fn handle_request(&mut self, server: &str, request: &Request) {
        let reply = self.replies.get(server).copied().unwrap_or(Reply::Echo);
        let messages = match request {
            Request::SubmitJob { command, arg, .. } => {
                if reply == Reply::Silent {
                    return;
                }
                self.next_handle += 1;
                let handle = format!("H:{}:{}", server, self.next_handle);
                let background = matches!(
                    command,
                    PacketType::SubmitJobBg | PacketType::SubmitJobHighBg | PacketType::SubmitJobLowBg
                );

                let mut messages = vec![ServerMessage::JobCreated {
                    handle: handle.clone(),
                }];
                if !background {
                    match reply {
                        Reply::Echo => messages.push(ServerMessage::WorkComplete {
                            handle,
                            result: arg.clone(),
                        }),
                        Reply::Fail => messages.push(ServerMessage::WorkFail { handle }),
                        Reply::Ack | Reply::Silent => {}
                    }
                }
                messages
            }
            Request::GetStatus { handle } => vec![ServerMessage::StatusRes {
                handle: handle.clone(),
                known: !self.unknown_status,
                running: true,
                numerator: 1,
                denominator: 2,
            }],
            Request::EchoReq { .. } => vec![ServerMessage::Other {
                function: PacketType::EchoRes.name().to_string(),
            }],
        };
        self.inbox
            .entry(server.to_string())
            .or_default()
            .extend(messages);
    }
}

/// Connector over shared scripted state. Clones share the same servers.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<State>>,
}

impl MockConnector {
    pub fn new<I, S>(reachable: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let connector = Self::default();
        connector.lock().reachable = reachable.into_iter().map(Into::into).collect();
        connector
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn set_reachable(&self, server: &str, reachable: bool) {
        let mut state = self.lock();
        if reachable {
            state.reachable.insert(server.to_string());
        } else {
            state.reachable.remove(server);
        }
    }

    pub fn set_reply(&self, server: &str, reply: Reply) {
        self.lock().replies.insert(server.to_string(), reply);
    }

    /// Makes every send to `server` fail until cleared.
    pub fn fail_sends(&self, server: &str, fail: bool) {
        let mut state = self.lock();
        if fail {
            state.fail_sends.insert(server.to_string());
        } else {
            state.fail_sends.remove(server);
        }
    }

    /// Makes the next read on `server` report a lost connection.
    pub fn break_connection(&self, server: &str) {
        self.lock().broken.insert(server.to_string());
    }

    /// Makes connecting to `server` take `delay`, whatever timeout the
    /// caller asks for.
    pub fn set_connect_delay(&self, server: &str, delay: Duration) {
        self.lock().connect_delays.insert(server.to_string(), delay);
    }

    /// Answers `GET_STATUS` with `known = false`.
    pub fn forget_jobs(&self) {
        self.lock().unknown_status = true;
    }

    /// Queues a packet as if `server` had sent it.
    pub fn push(&self, server: &str, message: ServerMessage) {
        self.lock()
            .inbox
            .entry(server.to_string())
            .or_default()
            .push_back(message);
    }

    pub fn sent(&self) -> Vec<(String, Request)> {
        self.lock().sent.clone()
    }

    pub fn sent_to(&self, server: &str) -> Vec<Request> {
        self.lock()
            .sent
            .iter()
            .filter(|(s, _)| s == server)
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn connects(&self, server: &str) -> usize {
        self.lock().connects.get(server).copied().unwrap_or(0)
    }

    pub fn closes(&self, server: &str) -> usize {
        self.lock().closes.get(server).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Connection = MockConnection;

    async fn connect(&self, server: &str, _timeout: Duration) -> Result<MockConnection> {
        let delay = self.lock().connect_delays.get(server).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        *state.connects.entry(server.to_string()).or_default() += 1;
        if !state.reachable.contains(server) {
            return Err(GearmanError::Connection(format!("{} refused", server)));
        }
        state.broken.remove(server);
        state.inbox.remove(server);
        Ok(MockConnection {
            server: server.to_string(),
            state: Arc::clone(&self.state),
            connected: true,
        })
    }
}

pub struct MockConnection {
    server: String,
    state: Arc<Mutex<State>>,
    connected: bool,
}

impl MockConnection {
    fn has_input(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.broken.contains(&self.server)
            || state
                .inbox
                .get(&self.server)
                .is_some_and(|inbox| !inbox.is_empty())
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn send(&mut self, request: &Request) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !self.connected || state.fail_sends.contains(&self.server) {
            return Err(GearmanError::Connection(format!("{} send failed", self.server)));
        }
        state.sent.push((self.server.clone(), request.clone()));
        state.handle_request(&self.server, request);
        Ok(())
    }

    async fn readable(&self) -> Result<()> {
        while !self.has_input() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        Ok(())
    }

    fn try_read(&mut self) -> Result<Option<ServerMessage>> {
        let mut state = self.state.lock().unwrap();
        if state.broken.remove(&self.server) {
            self.connected = false;
            return Err(GearmanError::Connection(format!(
                "{} closed the connection",
                self.server
            )));
        }
        Ok(state
            .inbox
            .get_mut(&self.server)
            .and_then(VecDeque::pop_front))
    }

    async fn close(&mut self) {
        if self.connected {
            self.connected = false;
            *self
                .state
                .lock()
                .unwrap()
                .closes
                .entry(self.server.clone())
                .or_default() += 1;
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
