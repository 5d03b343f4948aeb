use crate::error::{Result, RingError};
use crate::store::RingStore;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::Mutex;
use ulid::Ulid;

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Compare-and-delete: release the lock only if we still hold it.
const UNLOCK_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
"#;

/// Redis-backed ring store.
///
/// Buckets live in a sorted set keyed by the ring identifier; each member is
/// the JSON-encoded raw-key list at its score. The replica map is a hash, the
/// per-node ownership sets are JSON strings, and the ring lock is a TTL'd
/// `SET NX` with a ULID holder token.
pub struct RedisRingStore {
    conn: Mutex<redis::aio::MultiplexedConnection>,
    ring: String,
    lock_token: Mutex<Option<String>>,
}

impl RedisRingStore {
    pub async fn new(url: &str, ring: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|error| RingError::Config(format!("invalid redis url: {}", error)))?;

        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| RingError::Config(format!("failed to connect to redis: {}", error)))?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|error| RingError::Config(format!("redis ping failed: {}", error)))?;

        Ok(Self {
            conn: Mutex::new(conn),
            ring: ring.to_string(),
            lock_token: Mutex::new(None),
        })
    }

    fn ring_key(&self) -> String {
        format!("consistent_hash:ring:{}", self.ring)
    }

    fn replica_key(&self) -> String {
        format!("consistent_hash:ring:node:replica:{}", self.ring)
    }

    fn data_key(&self, node_id: &str) -> String {
        format!("consistent_hash:ring:node:data:{}", node_id)
    }

    fn lock_key(&self) -> String {
        format!("consistent_hash:ring:lock:{}", self.ring)
    }

    /// Zset members at exactly `score`. A well-formed ring has zero or one.
    async fn score_members(&self, score: i64) -> Result<Vec<String>> {
        let mut conn = self.conn.lock().await;
        let members: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(self.ring_key())
            .arg(score)
            .arg(score)
            .query_async(&mut *conn)
            .await
            .map_err(|error| RingError::Store(format!("ring zrangebyscore failed: {}", error)))?;
        Ok(members)
    }

    async fn replace_score(&self, score: i64, payload: Option<&str>) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let _: i64 = redis::cmd("ZREMRANGEBYSCORE")
            .arg(self.ring_key())
            .arg(score)
            .arg(score)
            .query_async(&mut *conn)
            .await
            .map_err(|error| RingError::Store(format!("ring zremrangebyscore failed: {}", error)))?;

        if let Some(payload) = payload {
            let _: i64 = redis::cmd("ZADD")
                .arg(self.ring_key())
                .arg(score)
                .arg(payload)
                .query_async(&mut *conn)
                .await
                .map_err(|error| RingError::Store(format!("ring zadd failed: {}", error)))?;
        }
        Ok(())
    }

    async fn edge_score(&self, smallest: bool) -> Result<Option<i64>> {
        let mut conn = self.conn.lock().await;
        let command = if smallest { "ZRANGEBYSCORE" } else { "ZREVRANGEBYSCORE" };
        let (start, stop) = if smallest { ("-inf", "+inf") } else { ("+inf", "-inf") };
        let entries: Vec<(String, i64)> = redis::cmd(command)
            .arg(self.ring_key())
            .arg(start)
            .arg(stop)
            .arg("WITHSCORES")
            .arg("LIMIT")
            .arg(0)
            .arg(1)
            .query_async(&mut *conn)
            .await
            .map_err(|error| RingError::Store(format!("ring edge lookup failed: {}", error)))?;
        Ok(entries.first().map(|(_, score)| *score))
    }

    async fn read_data_keys(&self, node_id: &str) -> Result<HashSet<String>> {
        let mut conn = self.conn.lock().await;
        let payload: Option<String> = redis::cmd("GET")
            .arg(self.data_key(node_id))
            .query_async(&mut *conn)
            .await
            .map_err(|error| RingError::Store(format!("data keys get failed: {}", error)))?;

        match payload {
            Some(payload) => Ok(serde_json::from_str(&payload)?),
            None => Ok(HashSet::new()),
        }
    }

    async fn write_data_keys(&self, node_id: &str, owned: &HashSet<String>) -> Result<()> {
        let mut conn = self.conn.lock().await;
        if owned.is_empty() {
            let _: i64 = redis::cmd("DEL")
                .arg(self.data_key(node_id))
                .query_async(&mut *conn)
                .await
                .map_err(|error| RingError::Store(format!("data keys del failed: {}", error)))?;
            return Ok(());
        }

        let payload = serde_json::to_string(owned)?;
        let _: String = redis::cmd("SET")
            .arg(self.data_key(node_id))
            .arg(payload)
            .query_async(&mut *conn)
            .await
            .map_err(|error| RingError::Store(format!("data keys set failed: {}", error)))?;
        Ok(())
    }
}

#[async_trait]
impl RingStore for RedisRingStore {
    async fn lock(&self, ttl_seconds: u64) -> Result<()> {
        let token = Ulid::new().to_string();
        loop {
            let acquired: Option<String> = {
                let mut conn = self.conn.lock().await;
                redis::cmd("SET")
                    .arg(self.lock_key())
                    .arg(&token)
                    .arg("NX")
                    .arg("EX")
                    .arg(ttl_seconds)
                    .query_async(&mut *conn)
                    .await
                    .map_err(|error| RingError::Store(format!("ring lock set failed: {}", error)))?
            };

            if acquired.is_some() {
                *self.lock_token.lock().await = Some(token);
                return Ok(());
            }

            tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
        }
    }

    async fn unlock(&self) -> Result<()> {
        let token = match self.lock_token.lock().await.take() {
            Some(token) => token,
            None => return Ok(()),
        };

        let script = redis::Script::new(UNLOCK_SCRIPT);
        let mut conn = self.conn.lock().await;
        let released: i64 = script
            .key(self.lock_key())
            .arg(&token)
            .invoke_async(&mut *conn)
            .await
            .map_err(|error| RingError::Store(format!("ring unlock failed: {}", error)))?;

        if released == 0 {
            tracing::warn!(ring = %self.ring, "ring lock expired before release");
        }
        Ok(())
    }

    async fn add_virtual_node(&self, score: i64, raw_key: &str) -> Result<()> {
        let members = self.score_members(score).await?;
        if members.len() > 1 {
            return Err(RingError::Corrupted(format!(
                "score {} holds {} payloads",
                score,
                members.len()
            )));
        }

        let mut raw_keys: Vec<String> = match members.first() {
            Some(payload) => serde_json::from_str(payload)?,
            None => Vec::new(),
        };

        if raw_keys.iter().any(|key| key == raw_key) {
            return Ok(());
        }

        raw_keys.push(raw_key.to_string());
        let payload = serde_json::to_string(&raw_keys)?;
        self.replace_score(score, Some(&payload)).await
    }

    async fn remove_virtual_node(&self, score: i64, raw_key: &str) -> Result<()> {
        let members = self.score_members(score).await?;
        if members.len() != 1 {
            return Err(RingError::Corrupted(format!(
                "expected one payload at score {}, found {}",
                score,
                members.len()
            )));
        }

        let mut raw_keys: Vec<String> = serde_json::from_str(&members[0])?;
        let before = raw_keys.len();
        raw_keys.retain(|key| key != raw_key);
        if raw_keys.len() == before {
            return Ok(());
        }

        if raw_keys.is_empty() {
            self.replace_score(score, None).await
        } else {
            let payload = serde_json::to_string(&raw_keys)?;
            self.replace_score(score, Some(&payload)).await
        }
    }

    async fn ceiling(&self, score: i64) -> Result<Option<i64>> {
        let found = {
            let mut conn = self.conn.lock().await;
            let entries: Vec<(String, i64)> = redis::cmd("ZRANGEBYSCORE")
                .arg(self.ring_key())
                .arg(score)
                .arg("+inf")
                .arg("WITHSCORES")
                .arg("LIMIT")
                .arg(0)
                .arg(1)
                .query_async(&mut *conn)
                .await
                .map_err(|error| RingError::Store(format!("ring ceiling failed: {}", error)))?;
            entries.first().map(|(_, found)| *found)
        };

        match found {
            Some(found) => Ok(Some(found)),
            None => self.edge_score(true).await,
        }
    }

    async fn floor(&self, score: i64) -> Result<Option<i64>> {
        let found = {
            let mut conn = self.conn.lock().await;
            let entries: Vec<(String, i64)> = redis::cmd("ZREVRANGEBYSCORE")
                .arg(self.ring_key())
                .arg(score)
                .arg("-inf")
                .arg("WITHSCORES")
                .arg("LIMIT")
                .arg(0)
                .arg(1)
                .query_async(&mut *conn)
                .await
                .map_err(|error| RingError::Store(format!("ring floor failed: {}", error)))?;
            entries.first().map(|(_, found)| *found)
        };

        match found {
            Some(found) => Ok(Some(found)),
            None => self.edge_score(false).await,
        }
    }

    async fn bucket(&self, score: i64) -> Result<Vec<String>> {
        let members = self.score_members(score).await?;
        if members.len() != 1 {
            return Err(RingError::Corrupted(format!(
                "expected one payload at score {}, found {}",
                score,
                members.len()
            )));
        }
        Ok(serde_json::from_str(&members[0])?)
    }

    async fn replica_counts(&self) -> Result<HashMap<String, usize>> {
        let raw: HashMap<String, String> = {
            let mut conn = self.conn.lock().await;
            redis::cmd("HGETALL")
                .arg(self.replica_key())
                .query_async(&mut *conn)
                .await
                .map_err(|error| RingError::Store(format!("replica hgetall failed: {}", error)))?
        };

        let mut counts = HashMap::with_capacity(raw.len());
        for (node_id, value) in raw {
            let replicas = value.parse::<usize>().map_err(|_| {
                RingError::Corrupted(format!("replica count for {} is not a number: {}", node_id, value))
            })?;
            counts.insert(node_id, replicas);
        }
        Ok(counts)
    }

    async fn set_replica_count(&self, node_id: &str, replicas: usize) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let _: i64 = redis::cmd("HSET")
            .arg(self.replica_key())
            .arg(node_id)
            .arg(replicas)
            .query_async(&mut *conn)
            .await
            .map_err(|error| RingError::Store(format!("replica hset failed: {}", error)))?;
        Ok(())
    }

    async fn delete_replica_count(&self, node_id: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let _: i64 = redis::cmd("HDEL")
            .arg(self.replica_key())
            .arg(node_id)
            .query_async(&mut *conn)
            .await
            .map_err(|error| RingError::Store(format!("replica hdel failed: {}", error)))?;
        Ok(())
    }

    async fn data_keys(&self, node_id: &str) -> Result<HashSet<String>> {
        self.read_data_keys(node_id).await
    }

    async fn add_data_keys(&self, node_id: &str, keys: &HashSet<String>) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut owned = self.read_data_keys(node_id).await?;
        owned.extend(keys.iter().cloned());
        self.write_data_keys(node_id, &owned).await
    }

    async fn remove_data_keys(&self, node_id: &str, keys: &HashSet<String>) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut owned = self.read_data_keys(node_id).await?;
        for key in keys {
            owned.remove(key);
        }
        self.write_data_keys(node_id, &owned).await
    }
}
