use gearman_common::protocol::error::{GearmanError, Result};
use gearman_common::transport::{Connection, Connector, TcpConnector};
use gearman_common::{Task, TaskSet};
use rand::RngCore;
use serde_json::Value;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::dispatcher::{dispatch, UnknownHandlePolicy};
use crate::pool::ConnectionPool;
use crate::submit::{request_status, submit};

/// Client configuration.
///
/// # Default Configuration
///
/// - `connect_timeout`: 1 second
/// - `max_wait`: 10 seconds
/// - `retry_interval`: 5 seconds
/// - `status_poll_interval`: 5 seconds
/// - `idle_sleep`: 1 second
/// - `unknown_handle_policy`: [`UnknownHandlePolicy::Ignore`]
///
/// # Example
///
/// ```rust
/// use gearman_client::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig {
///     retry_interval: Duration::from_secs(30),
///     ..ClientConfig::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Limit on each connection attempt.
    pub connect_timeout: Duration,
    /// Longest single wait for a server to become readable.
    pub max_wait: Duration,
    /// How long a failed server stays in backoff before it is retried.
    pub retry_interval: Duration,
    /// How often submitted jobs are polled with `GET_STATUS`.
    pub status_poll_interval: Duration,
    /// Sleep between iterations while no server is connected.
    pub idle_sleep: Duration,
    /// Whether replies for job handles outside the running set are dropped
    /// or abort the run.
    pub unknown_handle_policy: UnknownHandlePolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(1),
            max_wait: Duration::from_secs(10),
            retry_interval: Duration::from_secs(5),
            status_poll_interval: Duration::from_secs(5),
            idle_sleep: Duration::from_secs(1),
            unknown_handle_policy: UnknownHandlePolicy::Ignore,
        }
    }
}

/// Gearman client for submitting jobs to a set of job servers.
///
/// Jobs are spread over the connected servers at random. A server that fails
/// is moved to backoff and retried later; its in-flight jobs are not
/// resubmitted.
///
/// # Example
///
/// ```rust,no_run
/// use gearman_client::GearmanClient;
/// use gearman_common::{Task, TaskSet};
/// use serde_json::json;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut client = GearmanClient::new(["127.0.0.1:4730"]).await?;
///
/// let mut set: TaskSet = (1..=3)
///     .map(|n| Task::new("square", json!(n)))
///     .collect();
/// client.run_set(&mut set, Some(Duration::from_secs(30))).await?;
///
/// for task in set.iter() {
///     println!("{:?} -> {:?}", task.arg, task.result());
/// }
/// # Ok(())
/// # }
/// ```
pub struct GearmanClient<K: Connector = TcpConnector> {
    pool: ConnectionPool<K>,
    config: ClientConfig,
}

impl GearmanClient<TcpConnector> {
    /// Connects to `servers` with the default configuration.
    pub async fn new<I, S>(servers: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_config(servers, ClientConfig::default()).await
    }

    pub async fn with_config<I, S>(servers: I, config: ClientConfig) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_connector(TcpConnector, servers, config).await
    }
}

impl<K: Connector> GearmanClient<K> {
    /// Connects to `servers` through `connector`.
    ///
    /// # Errors
    ///
    /// - `InvalidServers` if the list is empty or an address is blank
    /// - `NoServersAvailable` if none of the servers could be reached
    pub async fn with_connector<I, S>(connector: K, servers: I, config: ClientConfig) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let servers: Vec<String> = servers.into_iter().map(Into::into).collect();
        let pool = ConnectionPool::connect(connector, &servers, config.connect_timeout).await?;
        Ok(Self { pool, config })
    }

    /// Uses `rng` to choose servers, e.g. a seeded generator in tests.
    pub fn with_rng(mut self, rng: impl RngCore + Send + Sync + 'static) -> Self {
        self.pool.set_rng(rng);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn pool(&self) -> &ConnectionPool<K> {
        &self.pool
    }

    /// Number of live server connections.
    pub fn connection_count(&self) -> usize {
        self.pool.connection_count()
    }

    /// Runs every task in `set` until all are finished or `timeout` passes.
    ///
    /// Tasks are submitted one per iteration in insertion order. Each
    /// iteration also reads at most one packet per connection, retries
    /// servers in backoff and, every `status_poll_interval`, polls the
    /// status of submitted jobs.
    ///
    /// Reaching the deadline is not an error: the call returns `Ok(())` and
    /// unfinished tasks stay unfinished. Every blocking step, reconnects
    /// included, is cut short at the deadline. Lost connections are not
    /// errors either; the server goes to backoff and the jobs it held are
    /// not resubmitted.
    ///
    /// Submissions still unacknowledged from an earlier run keep their place
    /// on their connection, so their late `JOB_CREATED` is consumed without
    /// being mistaken for one of this run's tasks.
    ///
    /// # Errors
    ///
    /// - `Server` when a server sends an `ERROR` packet
    /// - `UnrecognizedFunction` for a packet a client never expects
    /// - `UnknownHandle` under [`UnknownHandlePolicy::Fail`]
    /// - `NoServersAvailable` after [`disconnect`](Self::disconnect)
    pub async fn run_set(&mut self, set: &mut TaskSet, timeout: Option<Duration>) -> Result<()> {
        if self.pool.is_exhausted() {
            return Err(GearmanError::NoServersAvailable);
        }

        self.pool.retire_pending();
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut next = 0;
        let mut last_poll = Instant::now();

        debug!(tasks = set.len(), unfinished = set.tasks_count(), "Running task set");

        while !set.finished() {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                info!(unfinished = set.tasks_count(), "Task set timed out");
                return Ok(());
            }

            // Submit the next task
            while set.task(next).is_some_and(Task::is_finished) {
                next += 1;
            }
            if let Some(task) = set.task(next) {
                if let Some(server) = self.pool.pick(None) {
                    match before(deadline, submit(&mut self.pool, &server, task, next)).await {
                        Ok(()) => next += 1,
                        Err(e) if e.is_connection_error() => {
                            warn!(server = %server, error = %e, "Submit failed");
                            self.pool.drop_and_backoff(&server).await;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }

            // Wait for any server to have something for us
            if self.pool.connection_count() > 0 {
                let wait = bounded(self.config.max_wait, deadline);
                if let Some(id) = self.pool.wait_readable(wait).await {
                    if let Some(server) = self.pool.server_for(id) {
                        debug!(server = %server, "Connection readable");
                    }
                }
            }

            // One packet per connection
            for server in self.pool.live_servers() {
                let Some(pooled) = self.pool.connection_mut(&server) else {
                    continue;
                };
                let id = pooled.id();
                match pooled.connection_mut().try_read() {
                    Ok(Some(message)) => {
                        debug!(server = %server, ?id, packet = message.function(), "Received packet");
                        dispatch(
                            set,
                            &server,
                            pooled.pending_mut(),
                            message,
                            self.config.unknown_handle_policy,
                        )?;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(server = %server, error = %e, "Read failed");
                        self.pool.drop_and_backoff(&server).await;
                    }
                }
            }

            self.pool
                .retry_backoffs(self.config.retry_interval, Instant::now(), deadline)
                .await;

            if self.pool.connection_count() == 0 {
                tokio::time::sleep(bounded(self.config.idle_sleep, deadline)).await;
            } else if last_poll.elapsed() >= self.config.status_poll_interval {
                last_poll = Instant::now();
                self.poll_status(set, next, deadline).await;
            }
        }

        debug!("Task set finished");
        Ok(())
    }

    /// Sends `GET_STATUS` for every unfinished task among the first
    /// `submitted` whose server is still connected.
    async fn poll_status(&mut self, set: &TaskSet, submitted: usize, deadline: Option<Instant>) {
        let targets: Vec<(String, String)> = set
            .iter()
            .take(submitted)
            .filter(|task| !task.is_finished())
            .filter_map(|task| Some((task.server.clone()?, task.handle.clone()?)))
            .collect();

        for (server, handle) in targets {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                break;
            }
            if !self.pool.is_live(&server) {
                continue;
            }
            if let Err(e) = before(deadline, request_status(&mut self.pool, &server, &handle)).await {
                warn!(server = %server, error = %e, "Status poll failed");
                self.pool.drop_and_backoff(&server).await;
            }
        }
    }

    /// Runs a single task and returns it once finished or timed out.
    pub async fn run_task(&mut self, task: Task, timeout: Option<Duration>) -> Result<Task> {
        let mut set = TaskSet::new();
        set.add_task(task);
        self.run_set(&mut set, timeout).await?;
        set.into_tasks()
            .pop()
            .ok_or_else(|| GearmanError::TaskNotFound("task set is empty".to_string()))
    }

    /// Fires a normal-priority background job and returns its handle.
    ///
    /// Waits until a server acknowledges the job; this does not time out.
    pub async fn submit_background(
        &mut self,
        func: impl Into<String>,
        arg: Value,
    ) -> Result<Option<String>> {
        let task = self.run_task(Task::background(func, arg), None).await?;
        Ok(task.handle)
    }

    /// Closes every connection. Safe to call more than once.
    pub async fn disconnect(&mut self) {
        if !self.pool.is_exhausted() {
            info!(connections = self.pool.connection_count(), "Disconnecting");
        }
        self.pool.close().await;
    }
}

/// Awaits `send`, giving up with `Timeout` if `deadline` passes first.
async fn before<T>(deadline: Option<Instant>, send: impl Future<Output = Result<T>>) -> Result<T> {
    let Some(deadline) = deadline else {
        return send.await;
    };
    let remaining = deadline.saturating_duration_since(Instant::now());
    tokio::time::timeout(remaining, send)
        .await
        .unwrap_or_else(|_| Err(GearmanError::Timeout(remaining.as_millis() as u64)))
}

/// `limit`, shortened to what is left before `deadline`.
fn bounded(limit: Duration, deadline: Option<Instant>) -> Duration {
    match deadline {
        Some(deadline) => limit.min(deadline.saturating_duration_since(Instant::now())),
        None => limit,
    }
}
