//! Networked counter store backed by Redis.
//!
//! Counters are plain Redis integers keyed `{client}:{second}`, so every
//! process pointed at the same server shares one view of each client.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use tokio::sync::OnceCell;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use super::{CounterStore, Counts, Increment};
use crate::config::TurnstileConfig;
use crate::error::{Result, StoreError, TurnstileError};
use crate::ratelimit::BucketKey;

/// Tuning for [`RedisStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedisOptions {
    /// Bound on one store call, including connecting
    pub timeout: Duration,
}

impl Default for RedisOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(250),
        }
    }
}

impl From<&TurnstileConfig> for RedisOptions {
    fn from(config: &TurnstileConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.redis_timeout_ms),
        }
    }
}

/// Counter store backed by a Redis server.
///
/// The connection is opened on first use and shared by every call; the
/// connection manager reconnects on its own after the server drops it.
pub struct RedisStore {
    client: Client,
    connection: OnceCell<ConnectionManager>,
    timeout: Duration,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("server", &self.server())
            .field("timeout", &self.timeout)
            .field("connected", &self.connection.initialized())
            .finish()
    }
}

impl RedisStore {
    /// Create a store for the server at `target`: either `host:port` or a
    /// `redis://` URL.
    ///
    /// No connection is made until the first call.
    pub fn connect(target: &str, options: RedisOptions) -> Result<Self> {
        let url = if target.contains("://") {
            target.to_string()
        } else {
            format!("redis://{}", target)
        };
        let client = Client::open(url.as_str()).map_err(|e| {
            TurnstileError::Config(format!("invalid redis address '{}': {}", target, e))
        })?;

        Ok(Self {
            client,
            connection: OnceCell::new(),
            timeout: options.timeout,
        })
    }

    /// `host:port` of the server, as parsed from the connection string.
    pub fn server(&self) -> String {
        self.client.get_connection_info().addr.to_string()
    }

    async fn connection(&self) -> std::result::Result<ConnectionManager, StoreError> {
        let manager = self
            .connection
            .get_or_try_init(|| async {
                let manager = self.client.get_connection_manager().await?;
                debug!(server = %self.server(), "Opened redis connection");
                Ok::<_, StoreError>(manager)
            })
            .await?;
        Ok(manager.clone())
    }

    async fn try_get_many(
        &self,
        keys: &[BucketKey],
    ) -> std::result::Result<HashMap<BucketKey, u64>, StoreError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let names: Vec<String> = keys.iter().map(BucketKey::to_storage_key).collect();
        let mut conn = self.connection().await?;
        let replies: Vec<Option<u64>> = redis::cmd("MGET").arg(&names).query_async(&mut conn).await?;

        if replies.len() != keys.len() {
            return Err(StoreError::BackendProtocolError(format!(
                "MGET returned {} values for {} keys",
                replies.len(),
                keys.len()
            )));
        }

        Ok(keys
            .iter()
            .zip(replies)
            .filter_map(|(key, count)| count.map(|count| (key.clone(), count)))
            .collect())
    }

    // SET NX creates the bucket with its TTL only when absent; INCR keeps an
    // existing TTL. MULTI keeps both in one transaction so a bucket expiring
    // between them cannot come back without a TTL.
    async fn try_increment(
        &self,
        key: &BucketKey,
        ttl: Duration,
    ) -> std::result::Result<u64, StoreError> {
        let name = key.to_storage_key();
        let mut conn = self.connection().await?;
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(&name)
            .arg(0)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .arg("NX")
            .ignore()
            .incr(&name, 1)
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn get_many(&self, keys: &[BucketKey]) -> Counts {
        match timeout(self.timeout, self.try_get_many(keys)).await {
            Ok(Ok(values)) => {
                trace!(requested = keys.len(), found = values.len(), "Read buckets from redis");
                Counts::Values(values)
            }
            Ok(Err(e)) => {
                warn!(server = %self.server(), error = %e, "Redis read failed, failing open");
                Counts::Unavailable
            }
            Err(_) => {
                warn!(server = %self.server(), timeout = ?self.timeout, "Redis read timed out, failing open");
                Counts::Unavailable
            }
        }
    }

    async fn increment(&self, key: &BucketKey, ttl: Duration) -> Increment {
        match timeout(self.timeout, self.try_increment(key, ttl)).await {
            Ok(Ok(count)) => Increment::Recorded(count),
            Ok(Err(e)) => {
                warn!(server = %self.server(), key = %key, error = %e, "Redis increment failed, failing open");
                Increment::Unavailable
            }
            Err(_) => {
                warn!(server = %self.server(), key = %key, timeout = ?self.timeout, "Redis increment timed out, failing open");
                Increment::Unavailable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    fn key(client: &str, second: u64) -> BucketKey {
        BucketKey::new(client.into(), second)
    }

    fn options(millis: u64) -> RedisOptions {
        RedisOptions {
            timeout: Duration::from_millis(millis),
        }
    }

    /// Read one RESP array command, e.g. `*2\r\n$4\r\nINCR\r\n$3\r\na:1\r\n`.
    async fn read_command<R: AsyncBufRead + Unpin>(reader: &mut R) -> Option<Vec<String>> {
        let mut line = String::new();
        if reader.read_line(&mut line).await.ok()? == 0 {
            return None;
        }
        let count: usize = line.trim_end().strip_prefix('*')?.parse().ok()?;

        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            line.clear();
            reader.read_line(&mut line).await.ok()?;
            line.clear();
            reader.read_line(&mut line).await.ok()?;
            args.push(line.trim_end().to_string());
        }
        Some(args)
    }

    fn execute(data: &Mutex<HashMap<String, u64>>, args: &[String], mget_reply: Option<&str>) -> String {
        let mut data = data.lock().unwrap();
        match args[0].to_ascii_uppercase().as_str() {
            "SET" => {
                if data.contains_key(&args[1]) {
                    "$-1\r\n".to_string()
                } else {
                    data.insert(args[1].clone(), args[2].parse().unwrap());
                    "+OK\r\n".to_string()
                }
            }
            "INCR" => {
                let count = data.entry(args[1].clone()).or_insert(0);
                *count += 1;
                format!(":{}\r\n", count)
            }
            "MGET" => {
                if let Some(reply) = mget_reply {
                    return reply.to_string();
                }
                let mut reply = format!("*{}\r\n", args.len() - 1);
                for name in &args[1..] {
                    match data.get(name) {
                        Some(count) => {
                            let value = count.to_string();
                            reply.push_str(&format!("${}\r\n{}\r\n", value.len(), value));
                        }
                        None => reply.push_str("$-1\r\n"),
                    }
                }
                reply
            }
            "PING" => "+PONG\r\n".to_string(),
            // CLIENT SETINFO and anything else sent while connecting
            _ => "+OK\r\n".to_string(),
        }
    }

    /// Minimal redis server keeping counters in a map. When `mget_reply` is
    /// set, MGET answers with those raw bytes instead.
    async fn spawn_fake_redis(mget_reply: Option<&'static str>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let data = Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let data = data.clone();
                tokio::spawn(async move {
                    let (read, mut write) = stream.into_split();
                    let mut reader = BufReader::new(read);
                    let mut queued: Option<Vec<Vec<String>>> = None;

                    while let Some(args) = read_command(&mut reader).await {
                        let command = args[0].to_ascii_uppercase();
                        let reply = if command == "MULTI" {
                            queued = Some(Vec::new());
                            "+OK\r\n".to_string()
                        } else if command == "EXEC" {
                            let commands = queued.take().unwrap_or_default();
                            let mut reply = format!("*{}\r\n", commands.len());
                            for queued_args in &commands {
                                reply.push_str(&execute(&data, queued_args, mget_reply));
                            }
                            reply
                        } else if let Some(commands) = queued.as_mut() {
                            commands.push(args);
                            "+QUEUED\r\n".to_string()
                        } else {
                            execute(&data, &args, mget_reply)
                        };
                        if write.write_all(reply.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        addr
    }

    #[test]
    fn test_connect_accepts_host_port_and_url() {
        let store = RedisStore::connect("127.0.0.1:6379", RedisOptions::default()).unwrap();
        assert_eq!(store.server(), "127.0.0.1:6379");

        let store = RedisStore::connect("redis://cache.internal:6380/", RedisOptions::default()).unwrap();
        assert_eq!(store.server(), "cache.internal:6380");
    }

    #[test]
    fn test_connect_rejects_bad_address() {
        assert!(matches!(
            RedisStore::connect("127.0.0.1:notaport", RedisOptions::default()),
            Err(TurnstileError::Config(_))
        ));
        assert!(RedisStore::connect("ftp://127.0.0.1:6379", RedisOptions::default()).is_err());
    }

    #[tokio::test]
    async fn test_store_against_server() {
        let addr = spawn_fake_redis(None).await;
        let store = RedisStore::connect(&addr.to_string(), options(2000)).unwrap();
        let ttl = Duration::from_secs(60);

        assert_eq!(store.get_many(&[key("a", 1)]).await, Counts::Values(HashMap::new()));

        assert_eq!(store.increment(&key("a", 1), ttl).await, Increment::Recorded(1));
        assert_eq!(store.increment(&key("a", 1), ttl).await, Increment::Recorded(2));
        assert_eq!(store.increment(&key("a", 3), ttl).await, Increment::Recorded(1));

        let Counts::Values(values) = store.get_many(&[key("a", 1), key("a", 2), key("a", 3)]).await
        else {
            panic!("fake server should be reachable");
        };
        assert_eq!(values.len(), 2);
        assert_eq!(values[&key("a", 1)], 2);
        assert_eq!(values[&key("a", 3)], 1);
    }

    #[tokio::test]
    async fn test_get_many_without_keys_skips_server() {
        let store = RedisStore::connect("127.0.0.1:1", options(50)).unwrap();
        assert_eq!(store.get_many(&[]).await, Counts::Values(HashMap::new()));
    }

    #[tokio::test]
    async fn test_concurrent_increments_share_one_connection() {
        let addr = spawn_fake_redis(None).await;
        let store = Arc::new(RedisStore::connect(&addr.to_string(), options(2000)).unwrap());

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.increment(&key("shared", 7), Duration::from_secs(60)).await })
            })
            .collect();
        for task in tasks {
            assert!(matches!(task.await.unwrap(), Increment::Recorded(_)));
        }

        assert_eq!(store.get_many(&[key("shared", 7)]).await.total(), 20);
    }

    #[tokio::test]
    async fn test_unreachable_backend_fails_open() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let store = RedisStore::connect(&addr.to_string(), options(250)).unwrap();
        assert_eq!(store.get_many(&[key("a", 1)]).await, Counts::Unavailable);
        assert_eq!(
            store.increment(&key("a", 1), Duration::from_secs(60)).await,
            Increment::Unavailable
        );
    }

    #[tokio::test]
    async fn test_silent_backend_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let store = RedisStore::connect(&addr.to_string(), options(100)).unwrap();
        let started = std::time::Instant::now();
        assert_eq!(store.get_many(&[key("a", 1)]).await, Counts::Unavailable);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_oversized_bulk_length_fails_open() {
        let addr = spawn_fake_redis(Some("*1\r\n$18446744073709551615\r\n")).await;
        let store = RedisStore::connect(&addr.to_string(), options(500)).unwrap();

        let outcome = tokio::spawn(async move { store.get_many(&[key("c", 1)]).await })
            .await
            .expect("a malformed reply must not panic the store");
        assert_eq!(outcome, Counts::Unavailable);
    }

    #[tokio::test]
    async fn test_non_integer_counter_fails_open() {
        let addr = spawn_fake_redis(Some("*1\r\n$3\r\nabc\r\n")).await;
        let store = RedisStore::connect(&addr.to_string(), options(500)).unwrap();

        assert_eq!(store.get_many(&[key("c", 1)]).await, Counts::Unavailable);
    }

    #[tokio::test]
    async fn test_short_mget_reply_fails_open() {
        let addr = spawn_fake_redis(Some("*1\r\n$1\r\n5\r\n")).await;
        let store = RedisStore::connect(&addr.to_string(), options(500)).unwrap();

        assert_eq!(
            store.get_many(&[key("c", 1), key("c", 2)]).await,
            Counts::Unavailable
        );
    }
}
