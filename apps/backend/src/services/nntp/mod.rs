//! NNTP connection pool: a fixed-capacity set of authenticated
//! [`nntp_proto::NntpConnection`]s with FIFO waiter queueing, keep-alive,
//! and drop-and-replace on transport errors.
//!
//! Structurally grounded on the Soulseek connection handle in this
//! codebase (background task + shutdown signal, `Arc<Mutex<..>>` around
//! the writer half) but generalized to a fixed-size *pool* of such
//! connections rather than a single persistent one.

use rand::Rng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};
use tokio::time::timeout;

use nntp_proto::{decode_yenc, NntpConnection, NntpError};

const STAT_TIMEOUT: Duration = Duration::from_secs(5);
const REPLACEMENT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Boxed so plaintext and TLS-wrapped sockets share one pool slot type.
type BoxedRead = ReadHalf<Box<dyn AsyncReadWrite>>;
type BoxedWrite = WriteHalf<Box<dyn AsyncReadWrite>>;
type Connection = NntpConnection<BoxedRead, BoxedWrite>;

trait AsyncReadWrite: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncReadWrite for T {}

#[derive(Debug, Clone)]
pub struct NntpPoolConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub tls: bool,
    pub capacity: usize,
    pub keep_alive: Duration,
}

impl NntpPoolConfig {
    fn identity(&self) -> (String, u16, Option<String>, bool, usize, u64) {
        (
            self.host.clone(),
            self.port,
            self.user.clone(),
            self.tls,
            self.capacity,
            self.keep_alive.as_millis() as u64,
        )
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PoolError {
    #[error("nntp transport error: {0}")]
    Transport(#[from] NntpError),
    #[error("pool is shutting down")]
    ShuttingDown,
    #[error("article missing")]
    MissingArticle,
    #[error("stat call exceeded 5s watchdog")]
    StatTimeout,
}

struct PooledConnection {
    conn: Connection,
    last_touch_ms: i64,
}

enum PoolSlot {
    Idle(PooledConnection),
    BeingReplaced,
}

struct PoolInner {
    slots: Mutex<VecDeque<PoolSlot>>,
    notify: Notify,
    config: NntpPoolConfig,
    shutdown: AtomicI64,
}

/// Process-wide handle; acquiring a client waits FIFO if every slot is
/// currently checked out.
#[derive(Clone)]
pub struct NntpPool {
    inner: Arc<PoolInner>,
}

type PoolIdentity = (String, u16, Option<String>, bool, usize, u64);

/// Keeps exactly one pool alive per `(host, port, user, tls, capacity,
/// keep_alive)` identity; a mismatched config tears down the old pool and
/// builds a new one. Concurrent warm-up requests await the same build.
#[derive(Default)]
pub struct NntpPoolRegistry {
    current: Mutex<Option<(PoolIdentity, NntpPool)>>,
}

impl NntpPoolRegistry {
    pub fn new() -> Self {
        Self { current: Mutex::new(None) }
    }

    pub async fn get_or_build(&self, config: NntpPoolConfig) -> Result<NntpPool, PoolError> {
        let identity = config.identity();
        let mut guard = self.current.lock().await;

        if let Some((existing_identity, pool)) = guard.as_ref() {
            if existing_identity == &identity {
                return Ok(pool.clone());
            }
        }

        if let Some((_, stale_pool)) = guard.take() {
            stale_pool.shutdown().await;
        }

        let pool = NntpPool::new(config).await?;
        *guard = Some((identity, pool.clone()));
        Ok(pool)
    }
}

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

impl NntpPool {
    pub async fn new(config: NntpPoolConfig) -> Result<Self, PoolError> {
        let mut slots = VecDeque::with_capacity(config.capacity);
        for _ in 0..config.capacity {
            let conn = connect(&config).await?;
            slots.push_back(PoolSlot::Idle(PooledConnection { conn, last_touch_ms: now_ms() }));
        }

        let inner = Arc::new(PoolInner {
            slots: Mutex::new(slots),
            notify: Notify::new(),
            config,
            shutdown: AtomicI64::new(0),
        });

        spawn_keep_alive_task(Arc::clone(&inner));

        Ok(Self { inner })
    }

    pub fn identity(&self) -> (String, u16, Option<String>, bool, usize, u64) {
        self.inner.config.identity()
    }

    pub async fn shutdown(&self) {
        self.inner.shutdown.store(1, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// FIFO acquire: pops the first idle slot, or waits for the next
    /// release/replacement notification.
    async fn acquire(&self) -> Result<PooledConnection, PoolError> {
        loop {
            {
                let mut slots = self.inner.slots.lock().await;
                if let Some(pos) = slots.iter().position(|s| matches!(s, PoolSlot::Idle(_))) {
                    if let PoolSlot::Idle(pooled) = slots.remove(pos).unwrap() {
                        return Ok(pooled);
                    }
                }
            }
            if self.inner.shutdown.load(Ordering::SeqCst) != 0 {
                return Err(PoolError::ShuttingDown);
            }
            self.inner.notify.notified().await;
        }
    }

    async fn release(&self, pooled: PooledConnection) {
        let mut slots = self.inner.slots.lock().await;
        slots.push_back(PoolSlot::Idle(pooled));
        drop(slots);
        self.inner.notify.notify_one();
    }

    /// Drops the checked-out slot and spawns an async replacement that
    /// retries every second until it succeeds or the pool shuts down.
    async fn drop_and_replace(&self) {
        {
            let mut slots = self.inner.slots.lock().await;
            slots.push_back(PoolSlot::BeingReplaced);
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            loop {
                if inner.shutdown.load(Ordering::SeqCst) != 0 {
                    return;
                }
                match connect(&inner.config).await {
                    Ok(conn) => {
                        let mut slots = inner.slots.lock().await;
                        if let Some(pos) = slots.iter().position(|s| matches!(s, PoolSlot::BeingReplaced)) {
                            slots[pos] = PoolSlot::Idle(PooledConnection { conn, last_touch_ms: now_ms() });
                        }
                        drop(slots);
                        inner.notify.notify_one();
                        return;
                    }
                    Err(_) => tokio::time::sleep(REPLACEMENT_RETRY_INTERVAL).await,
                }
            }
        });
    }

    /// `STAT <message-id>`: ok/missing/transport-error, 5s watchdog.
    pub async fn stat(&self, message_id: &str) -> Result<bool, PoolError> {
        let mut pooled = self.acquire().await?;
        let result = timeout(STAT_TIMEOUT, pooled.conn.stat(message_id)).await;
        match result {
            Ok(Ok(exists)) => {
                pooled.last_touch_ms = now_ms();
                self.release(pooled).await;
                Ok(exists)
            }
            Ok(Err(NntpError::ArticleMissing)) => {
                pooled.last_touch_ms = now_ms();
                self.release(pooled).await;
                Err(PoolError::MissingArticle)
            }
            Ok(Err(e)) => {
                self.drop_and_replace().await;
                Err(PoolError::Transport(e))
            }
            Err(_) => {
                self.drop_and_replace().await;
                Err(PoolError::StatTimeout)
            }
        }
    }

    /// `BODY <message-id>`, optionally yEnc-decoded and bounded by
    /// `max_decoded_bytes`.
    pub async fn body(&self, message_id: &str, max_decoded_bytes: usize) -> Result<Vec<u8>, PoolError> {
        let mut pooled = self.acquire().await?;
        match pooled.conn.body(message_id).await {
            Ok(raw) => {
                pooled.last_touch_ms = now_ms();
                self.release(pooled).await;
                match decode_yenc(&raw, max_decoded_bytes) {
                    Ok(decoded) => Ok(decoded),
                    Err(_) => Ok(raw),
                }
            }
            Err(NntpError::ArticleMissing) => {
                pooled.last_touch_ms = now_ms();
                self.release(pooled).await;
                Err(PoolError::MissingArticle)
            }
            Err(e) => {
                self.drop_and_replace().await;
                Err(PoolError::Transport(e))
            }
        }
    }
}

async fn connect(config: &NntpPoolConfig) -> Result<Connection, PoolError> {
    let addr = format!("{}:{}", config.host, config.port);
    let stream = TcpStream::connect(&addr).await.map_err(NntpError::Io)?;

    let boxed: Box<dyn AsyncReadWrite> = if config.tls {
        let connector = native_tls::TlsConnector::new().map_err(|e| {
            NntpError::Io(std::io::Error::other(format!("tls connector setup failed: {e}")))
        })?;
        let connector = tokio_native_tls::TlsConnector::from(connector);
        let tls_stream = connector
            .connect(&config.host, stream)
            .await
            .map_err(|e| NntpError::Io(std::io::Error::other(format!("tls handshake failed: {e}"))))?;
        Box::new(tls_stream)
    } else {
        Box::new(stream)
    };

    let (read_half, write_half) = tokio::io::split(boxed);
    let mut conn = NntpConnection::new(read_half, write_half);
    conn.read_greeting().await?;
    if let Some(ref user) = config.user {
        conn.authinfo_user(user).await?;
        if let Some(ref pass) = config.pass {
            conn.authinfo_pass(pass).await?;
        }
    }
    Ok(conn)
}

/// Periodic benign STAT against a randomized bogus message-id; the
/// expected 430 proves liveness without resetting staleness. Idle slots
/// untouched past the keep-alive window are eagerly replaced instead.
fn spawn_keep_alive_task(inner: Arc<PoolInner>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(inner.config.keep_alive);
        loop {
            interval.tick().await;
            if inner.shutdown.load(Ordering::SeqCst) != 0 {
                return;
            }

            let stale_threshold_ms = inner.config.keep_alive.as_millis() as i64;
            let mut stale = Vec::new();
            let mut live = Vec::new();
            {
                let slots = inner.slots.lock().await;
                for (idx, slot) in slots.iter().enumerate() {
                    if let PoolSlot::Idle(pooled) = slot {
                        if now_ms() - pooled.last_touch_ms > stale_threshold_ms {
                            stale.push(idx);
                        } else {
                            live.push(idx);
                        }
                    }
                }
            }

            for idx in stale {
                let mut slots = inner.slots.lock().await;
                if matches!(slots.get(idx), Some(PoolSlot::Idle(_))) {
                    slots[idx] = PoolSlot::BeingReplaced;
                }
                drop(slots);
                spawn_slot_replacement(Arc::clone(&inner), idx);
            }

            for idx in live {
                let mut slots = inner.slots.lock().await;
                if let Some(PoolSlot::Idle(pooled)) = slots.get_mut(idx) {
                    let bogus_id = format!("<keepalive-{}@pool.invalid>", rand::thread_rng().gen::<u64>());
                    let _ = pooled.conn.stat(&bogus_id).await;
                }
            }
        }
    });
}

/// Reconnects the slot at `idx` in place, retrying every second until it
/// succeeds or the pool shuts down. Mirrors [`NntpPool::drop_and_replace`]
/// but targets a slot still sitting idle rather than one vacated by
/// `acquire`.
fn spawn_slot_replacement(inner: Arc<PoolInner>, idx: usize) {
    tokio::spawn(async move {
        loop {
            if inner.shutdown.load(Ordering::SeqCst) != 0 {
                return;
            }
            match connect(&inner.config).await {
                Ok(conn) => {
                    let mut slots = inner.slots.lock().await;
                    if let Some(slot @ PoolSlot::BeingReplaced) = slots.get_mut(idx) {
                        *slot = PoolSlot::Idle(PooledConnection { conn, last_touch_ms: now_ms() });
                    }
                    drop(slots);
                    inner.notify.notify_one();
                    return;
                }
                Err(_) => tokio::time::sleep(REPLACEMENT_RETRY_INTERVAL).await,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_distinguishes_by_capacity_and_tls() {
        let base = NntpPoolConfig {
            host: "news.example".into(),
            port: 119,
            user: None,
            pass: None,
            tls: false,
            capacity: 4,
            keep_alive: Duration::from_secs(60),
        };
        let mut tls_variant = base.clone();
        tls_variant.tls = true;
        assert_ne!(base.identity(), tls_variant.identity());
    }

    /// A connection over an in-memory duplex pipe, never actually
    /// talking to a server; enough to occupy a pool slot for the
    /// bookkeeping tests below.
    fn fake_connection() -> Connection {
        let (half, _peer) = tokio::io::duplex(64);
        let boxed: Box<dyn AsyncReadWrite> = Box::new(half);
        let (read_half, write_half) = tokio::io::split(boxed);
        Connection::new(read_half, write_half)
    }

    fn test_pool(capacity: usize) -> NntpPool {
        let mut slots = VecDeque::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push_back(PoolSlot::Idle(PooledConnection {
                conn: fake_connection(),
                last_touch_ms: now_ms(),
            }));
        }
        let inner = Arc::new(PoolInner {
            slots: Mutex::new(slots),
            notify: Notify::new(),
            config: NntpPoolConfig {
                host: "pool.invalid".into(),
                port: 119,
                user: None,
                pass: None,
                tls: false,
                capacity,
                keep_alive: Duration::from_secs(3600),
            },
            shutdown: AtomicI64::new(0),
        });
        NntpPool { inner }
    }

    async fn total_slots(pool: &NntpPool, checked_out: usize) -> usize {
        pool.inner.slots.lock().await.len() + checked_out
    }

    /// Repeated acquire/release/drop-and-replace cycles never change the
    /// total of idle + in-use + being-replaced slots.
    #[tokio::test]
    async fn slot_count_invariant_holds_across_acquire_release_and_replace() {
        let capacity = 3;
        let pool = test_pool(capacity);

        let mut checked_out = Vec::new();
        for _ in 0..capacity {
            checked_out.push(pool.acquire().await.unwrap());
        }
        assert_eq!(total_slots(&pool, checked_out.len()).await, capacity);

        let pooled = checked_out.pop().unwrap();
        pool.release(pooled).await;
        assert_eq!(total_slots(&pool, checked_out.len()).await, capacity);

        // simulate a transport error on one of the still-checked-out
        // connections: it's dropped rather than released, and the pool
        // replaces it in place.
        checked_out.pop().unwrap();
        pool.drop_and_replace().await;
        assert_eq!(total_slots(&pool, checked_out.len()).await, capacity);

        while let Some(pooled) = checked_out.pop() {
            pool.release(pooled).await;
        }
        assert_eq!(total_slots(&pool, checked_out.len()).await, capacity);

        // one more full acquire/release lap for good measure
        for _ in 0..capacity {
            let pooled = pool.acquire().await.unwrap();
            pool.release(pooled).await;
            assert_eq!(total_slots(&pool, 0).await, capacity);
        }
    }
}
