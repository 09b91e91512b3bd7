use futures::future::select_all;
use gearman_common::protocol::error::{GearmanError, Result};
use gearman_common::transport::{Connection, Connector};
use gearman_common::Request;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Pool-assigned identity of one connection.
///
/// A reconnect to the same server gets a fresh id, so an id observed before a
/// drop never resolves to the replacement connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

/// One submission waiting for its `JOB_CREATED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pending {
    /// Index of a task in the running set.
    Task(usize),
    /// Sent during an earlier run. Its acknowledgment is still owed and
    /// must be consumed without touching the current set.
    Retired,
}

/// A live connection and the submissions it has yet to acknowledge.
///
/// The pending queue is in send order. Job servers answer `SUBMIT_JOB*` in
/// order on a connection, so the front of the queue is the submission the
/// next `JOB_CREATED` belongs to.
pub struct PooledConnection<C> {
    id: ConnectionId,
    server: String,
    connection: C,
    pending: VecDeque<Pending>,
}

impl<C: Connection> PooledConnection<C> {
    fn new(id: ConnectionId, server: String, connection: C) -> Self {
        Self {
            id,
            server,
            connection,
            pending: VecDeque::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.connection
    }

    /// Unacknowledged submissions, oldest first.
    pub fn pending(&self) -> &VecDeque<Pending> {
        &self.pending
    }

    pub fn pending_mut(&mut self) -> &mut VecDeque<Pending> {
        &mut self.pending
    }
}

/// Connections to a fixed set of job servers.
///
/// Every configured server is in exactly one of two places: `live`, holding
/// its open connection, or `backoff`, holding the time of the last failed
/// attempt. Servers in backoff are reconnected by
/// [`retry_backoffs`](Self::retry_backoffs) once the retry interval has
/// passed.
///
/// # Example
///
/// ```rust,no_run
/// use gearman_client::ConnectionPool;
/// use gearman_common::transport::TcpConnector;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let servers = vec!["10.0.0.1:4730".to_string(), "10.0.0.2".to_string()];
/// let mut pool = ConnectionPool::connect(TcpConnector, &servers, Duration::from_secs(1)).await?;
///
/// if let Some(server) = pool.pick(None) {
///     println!("submitting to {}", server);
/// }
/// pool.close().await;
/// # Ok(())
/// # }
/// ```
pub struct ConnectionPool<K: Connector> {
    connector: K,
    connect_timeout: Duration,
    live: BTreeMap<String, PooledConnection<K::Connection>>,
    backoff: BTreeMap<String, Instant>,
    next_id: u64,
    rng: Box<dyn RngCore + Send + Sync>,
}

impl<K: Connector> ConnectionPool<K> {
    /// Connects to every server in `servers`.
    ///
    /// All addresses are validated before any connection is attempted.
    /// Servers that cannot be reached start in backoff.
    ///
    /// # Errors
    ///
    /// - `InvalidServers` if the list is empty or an address is blank
    /// - `NoServersAvailable` if no server could be reached
    pub async fn connect(connector: K, servers: &[String], connect_timeout: Duration) -> Result<Self> {
        if servers.is_empty() {
            return Err(GearmanError::InvalidServers(
                "at least one server is required".to_string(),
            ));
        }
        let servers = servers
            .iter()
            .map(|server| {
                let server = server.trim();
                if server.is_empty() {
                    Err(GearmanError::InvalidServers(
                        "server address must not be blank".to_string(),
                    ))
                } else {
                    Ok(server.to_string())
                }
            })
            .collect::<Result<Vec<_>>>()?;

        let mut pool = Self {
            connector,
            connect_timeout,
            live: BTreeMap::new(),
            backoff: BTreeMap::new(),
            next_id: 0,
            rng: Box::new(StdRng::from_entropy()),
        };

        for server in servers {
            if pool.live.contains_key(&server) || pool.backoff.contains_key(&server) {
                continue;
            }
            match pool.connector.connect(&server, connect_timeout).await {
                Ok(connection) => pool.insert_live(server, connection),
                Err(e) => {
                    warn!(server = %server, error = %e, "Job server unreachable, backing off");
                    pool.backoff.insert(server, Instant::now());
                }
            }
        }

        if pool.live.is_empty() {
            return Err(GearmanError::NoServersAvailable);
        }

        info!(
            live = pool.live.len(),
            backoff = pool.backoff.len(),
            "Connection pool ready"
        );
        Ok(pool)
    }

    /// Replaces the generator used for server selection.
    pub fn set_rng(&mut self, rng: impl RngCore + Send + Sync + 'static) {
        self.rng = Box::new(rng);
    }

    /// Chooses a live server.
    ///
    /// `preferred` wins when it is live. Otherwise a single live server is
    /// returned as is, and with several one is picked uniformly at random.
    pub fn pick(&mut self, preferred: Option<&str>) -> Option<String> {
        if let Some(server) = preferred {
            if self.live.contains_key(server) {
                return Some(server.to_string());
            }
        }

        match self.live.len() {
            0 => None,
            1 => self.live.keys().next().cloned(),
            n => {
                let index = self.rng.gen_range(0..n);
                self.live.keys().nth(index).cloned()
            }
        }
    }

    /// Reverse lookup from a connection to its server.
    pub fn server_for(&self, id: ConnectionId) -> Option<&str> {
        self.live
            .values()
            .find(|pooled| pooled.id == id)
            .map(|pooled| pooled.server.as_str())
    }

    pub fn connection_mut(&mut self, server: &str) -> Option<&mut PooledConnection<K::Connection>> {
        self.live.get_mut(server)
    }

    /// Sends `request` to a live server.
    pub async fn send(&mut self, server: &str, request: &Request) -> Result<()> {
        let pooled = self
            .live
            .get_mut(server)
            .ok_or_else(|| GearmanError::Connection(format!("{} is not connected", server)))?;
        pooled.connection.send(request).await
    }

    /// Waits until any live connection may have a packet, for at most `max`.
    ///
    /// Returns the first connection that became ready, or `None` on timeout
    /// or when nothing is live.
    pub async fn wait_readable(&self, max: Duration) -> Option<ConnectionId> {
        if self.live.is_empty() {
            return None;
        }

        let (ids, waits): (Vec<_>, Vec<_>) = self
            .live
            .values()
            .map(|pooled| (pooled.id, pooled.connection.readable()))
            .unzip();

        match tokio::time::timeout(max, select_all(waits)).await {
            Ok((result, index, _)) => {
                if let Err(e) = result {
                    debug!(error = %e, "Readiness wait failed");
                }
                ids.get(index).copied()
            }
            Err(_) => None,
        }
    }

    /// Closes the connection to `server` and moves it to backoff.
    ///
    /// Submissions still pending on that connection are discarded with it;
    /// their tasks stay unfinished.
    pub async fn drop_and_backoff(&mut self, server: &str) {
        if let Some(mut pooled) = self.live.remove(server) {
            pooled.connection.close().await;
            if !pooled.pending.is_empty() {
                warn!(
                    server = %server,
                    pending = pooled.pending.len(),
                    "Discarding unacknowledged submissions"
                );
            }
        }
        warn!(server = %server, "Job server dropped, backing off");
        self.backoff.insert(server.to_string(), Instant::now());
    }

    /// Reconnects every backed-off server whose last attempt is older than
    /// `interval`. Returns the servers that came back.
    ///
    /// Each attempt is cut short at `deadline`; once it has passed, the
    /// remaining servers are left for a later sweep.
    pub async fn retry_backoffs(
        &mut self,
        interval: Duration,
        now: Instant,
        deadline: Option<Instant>,
    ) -> Vec<String> {
        let due: Vec<String> = self
            .backoff
            .iter()
            .filter(|(_, last)| now.saturating_duration_since(**last) > interval)
            .map(|(server, _)| server.clone())
            .collect();

        let mut recovered = Vec::new();
        for server in due {
            let limit = match deadline {
                Some(deadline) => self
                    .connect_timeout
                    .min(deadline.saturating_duration_since(Instant::now())),
                None => self.connect_timeout,
            };
            if deadline.is_some() && limit.is_zero() {
                debug!(server = %server, "Run deadline reached, reconnect deferred");
                break;
            }

            let attempt = tokio::time::timeout(limit, self.connector.connect(&server, limit))
                .await
                .unwrap_or_else(|_| Err(GearmanError::Timeout(limit.as_millis() as u64)));
            match attempt {
                Ok(connection) => {
                    self.backoff.remove(&server);
                    info!(server = %server, "Job server back online");
                    self.insert_live(server.clone(), connection);
                    recovered.push(server);
                }
                Err(e) => {
                    debug!(server = %server, error = %e, "Reconnect failed");
                    self.backoff.insert(server, now);
                }
            }
        }
        recovered
    }

    /// Marks every pending submission as belonging to an earlier run.
    ///
    /// The entries keep their place in the queue, so acknowledgments that
    /// arrive late still line up with the submissions that caused them.
    pub fn retire_pending(&mut self) {
        for pooled in self.live.values_mut() {
            for entry in pooled.pending.iter_mut() {
                *entry = Pending::Retired;
            }
        }
    }

    /// Closes every connection and forgets every server.
    pub async fn close(&mut self) {
        for (server, mut pooled) in std::mem::take(&mut self.live) {
            pooled.connection.close().await;
            debug!(server = %server, "Connection closed");
        }
        self.backoff.clear();
    }

    pub fn connection_count(&self) -> usize {
        self.live.len()
    }

    pub fn live_servers(&self) -> Vec<String> {
        self.live.keys().cloned().collect()
    }

    pub fn backoff_servers(&self) -> Vec<String> {
        self.backoff.keys().cloned().collect()
    }

    pub fn is_live(&self, server: &str) -> bool {
        self.live.contains_key(server)
    }

    /// When `server` last failed, if it is in backoff.
    pub fn last_attempt(&self, server: &str) -> Option<Instant> {
        self.backoff.get(server).copied()
    }

    /// `true` once the pool has nothing to connect to, i.e. after
    /// [`close`](Self::close).
    pub fn is_exhausted(&self) -> bool {
        self.live.is_empty() && self.backoff.is_empty()
    }

    fn insert_live(&mut self, server: String, connection: K::Connection) {
        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        debug!(server = %server, ?id, "Connection added to pool");
        self.live
            .insert(server.clone(), PooledConnection::new(id, server, connection));
    }
}
