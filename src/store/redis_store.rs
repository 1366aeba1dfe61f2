use super::{LockStore, PubSubStore, QueueStore};
use crate::Result;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use uuid::Uuid;

/// Redis-backed implementation of the queue, lock, and pub/sub primitives.
///
/// The running slot is a `SET NX EX` key, the wait list an RPUSH/LPOP list,
/// and the per-agent lock a token-fenced `SET NX EX` key released through a
/// compare-and-delete script. Record access stays with the control-plane
/// database and is not served from here.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
}

fn slot_key(agent: &str) -> String {
    format!("fleet:queue:{agent}:running")
}

fn wait_key(agent: &str) -> String {
    format!("fleet:queue:{agent}:wait")
}

fn lock_key(key: &str) -> String {
    format!("fleet:lock:{key}")
}

/// Delete the lock only while the caller's token still owns it.
const RELEASE_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
"#;

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl QueueStore for RedisStore {
    async fn slot_set_if_empty(&self, agent: &str, entry: &str, ttl_secs: u64) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(slot_key(agent))
            .arg(entry)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn slot_get(&self, agent: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(slot_key(agent)).await?;
        Ok(value)
    }

    async fn slot_clear(&self, agent: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(slot_key(agent)).await?;
        Ok(removed > 0)
    }

    async fn wait_push(&self, agent: &str, entry: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        let len: usize = conn.rpush(wait_key(agent), entry).await?;
        Ok(len)
    }

    async fn wait_pop(&self, agent: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.lpop(wait_key(agent), None).await?;
        Ok(value)
    }

    async fn wait_push_front(&self, agent: &str, entry: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        let len: usize = conn.lpush(wait_key(agent), entry).await?;
        Ok(len)
    }

    async fn wait_len(&self, agent: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        let len: usize = conn.llen(wait_key(agent)).await?;
        Ok(len)
    }

    async fn wait_entries(&self, agent: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let entries: Vec<String> = conn.lrange(wait_key(agent), 0, -1).await?;
        Ok(entries)
    }

    async fn wait_clear(&self, agent: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        let (len, _removed): (usize, i64) = redis::pipe()
            .atomic()
            .llen(wait_key(agent))
            .del(wait_key(agent))
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }
}

#[async_trait]
impl LockStore for RedisStore {
    async fn try_acquire(&self, key: &str, lease_secs: u64) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let token = Uuid::new_v4().to_string();
        let reply: Option<String> = redis::cmd("SET")
            .arg(lock_key(key))
            .arg(&token)
            .arg("NX")
            .arg("EX")
            .arg(lease_secs)
            .query_async(&mut conn)
            .await?;
        Ok(reply.map(|_| token))
    }

    async fn release(&self, key: &str, token: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let released: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(lock_key(key))
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(released > 0)
    }
}

#[async_trait]
impl PubSubStore for RedisStore {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _subscribers: i64 = conn.publish(channel, payload).await?;
        Ok(())
    }
}
