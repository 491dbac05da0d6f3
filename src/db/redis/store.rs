use chrono::{DateTime, TimeZone, Utc};
use redis::{aio::ConnectionManager, AsyncCommands, Client, Script};
use std::time::Duration;

use crate::{
    db::store::{MonthlyUsage, StateStore, WindowSlot, WindowState},
    error::{AppError, AppResult},
};

/// Rolls a fixed window over and takes a slot if one is left, in one
/// server-side step.
///
/// KEYS[1] = window hash, ARGV[1] = now (ms), ARGV[2] = window length (ms),
/// ARGV[3] = limit. Returns `{count, window_start_ms, granted}`.
const RESERVE_WINDOW_SCRIPT: &str = r#"
local start = tonumber(redis.call('HGET', KEYS[1], 'start'))
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
if (not start) or (now - start >= window) then
  redis.call('HSET', KEYS[1], 'start', now, 'count', 0)
  start = now
end
local count = tonumber(redis.call('HGET', KEYS[1], 'count'))
local granted = 0
if count < limit then
  count = redis.call('HINCRBY', KEYS[1], 'count', 1)
  granted = 1
end
redis.call('PEXPIRE', KEYS[1], window * 2)
return {count, start, granted}
"#;

/// KEYS[1] = window hash, ARGV[1] = window start (ms) the slot came from
const RELEASE_WINDOW_SCRIPT: &str = r#"
local start = tonumber(redis.call('HGET', KEYS[1], 'start'))
if start and start == tonumber(ARGV[1]) then
  local count = tonumber(redis.call('HGET', KEYS[1], 'count'))
  if count and count > 0 then
    return redis.call('HINCRBY', KEYS[1], 'count', -1)
  end
end
return -1
"#;

/// KEYS[1] = claim key, ARGV[1] = token of the holder
const RELEASE_CLAIM_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Creates a Redis client for the shared store
///
/// Establishes a connection to Redis for counters and cached responses.
/// Uses connection pooling via the connection-manager feature.
pub fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    let client = Client::open(redis_url)?;
    Ok(client)
}

/// Cluster-wide store backed by Redis
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    reserve_script: Script,
    release_window_script: Script,
    release_claim_script: Script,
}

impl RedisStore {
    pub async fn new(client: Client) -> AppResult<Self> {
        let conn = ConnectionManager::new(client).await?;
        tracing::info!("Connected to Redis state store");
        Ok(Self {
            conn,
            reserve_script: Script::new(RESERVE_WINDOW_SCRIPT),
            release_window_script: Script::new(RELEASE_WINDOW_SCRIPT),
            release_claim_script: Script::new(RELEASE_CLAIM_SCRIPT),
        })
    }
}

fn from_millis(ms: i64) -> AppResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| AppError::Internal(format!("Invalid window start in store: {}", ms)))
}

fn window_millis(window: Duration) -> i64 {
    i64::try_from(window.as_millis()).unwrap_or(i64::MAX)
}

#[async_trait::async_trait]
impl StateStore for RedisStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await.map_err(|e| {
            tracing::warn!(error = %e, key = %key, "Redis get failed");
            e
        })?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> AppResult<()> {
        let mut conn = self.conn.clone();
        match ttl {
            Some(ttl) => {
                let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn reserve_window(
        &self,
        key: &str,
        window: Duration,
        limit: u64,
        now: DateTime<Utc>,
    ) -> AppResult<WindowSlot> {
        let mut conn = self.conn.clone();
        let (count, start, granted): (u64, i64, u8) = self
            .reserve_script
            .key(key)
            .arg(now.timestamp_millis())
            .arg(window_millis(window))
            .arg(limit)
            .invoke_async(&mut conn)
            .await?;

        Ok(WindowSlot {
            state: WindowState {
                count,
                window_start: from_millis(start)?,
            },
            granted: granted == 1,
        })
    }

    async fn release_window(&self, key: &str, window_start: DateTime<Utc>) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .release_window_script
            .key(key)
            .arg(window_start.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn read_usage(&self, key: &str) -> AppResult<MonthlyUsage> {
        let mut conn = self.conn.clone();
        let (cost, tokens, requests): (Option<f64>, Option<u64>, Option<u64>) =
            redis::cmd("HMGET")
                .arg(key)
                .arg("cost")
                .arg("tokens")
                .arg("requests")
                .query_async(&mut conn)
                .await?;

        Ok(MonthlyUsage {
            accumulated_cost_usd: cost.unwrap_or(0.0),
            token_count: tokens.unwrap_or(0),
            request_count: requests.unwrap_or(0),
        })
    }

    async fn add_usage(
        &self,
        key: &str,
        cost_usd: f64,
        tokens: u64,
        ttl: Duration,
    ) -> AppResult<MonthlyUsage> {
        let mut conn = self.conn.clone();
        let (cost, tokens, requests): (f64, u64, u64) = redis::pipe()
            .atomic()
            .cmd("HINCRBYFLOAT")
            .arg(key)
            .arg("cost")
            .arg(cost_usd)
            .cmd("HINCRBY")
            .arg(key)
            .arg("tokens")
            .arg(tokens)
            .cmd("HINCRBY")
            .arg(key)
            .arg("requests")
            .arg(1)
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs())
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(MonthlyUsage {
            accumulated_cost_usd: cost,
            token_count: tokens,
            request_count: requests,
        })
    }

    async fn claim(&self, key: &str, token: &str, ttl: Duration) -> AppResult<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(window_millis(ttl).max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn release_claim(&self, key: &str, token: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .release_claim_script
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn ping(&self) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_millis_round_trip() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        assert_eq!(from_millis(now.timestamp_millis()).unwrap(), now);
    }

    #[test]
    fn test_window_millis() {
        assert_eq!(window_millis(Duration::from_secs(60)), 60_000);
        assert_eq!(window_millis(Duration::from_secs(86_400)), 86_400_000);
    }

    #[test]
    fn test_create_redis_client_rejects_bad_url() {
        assert!(create_redis_client("not a url").is_err());
        assert!(create_redis_client("redis://127.0.0.1:6379").is_ok());
    }

    async fn connect() -> RedisStore {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        RedisStore::new(create_redis_client(&redis_url).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    #[ignore = "requires a running Redis at REDIS_URL"]
    async fn test_reserve_window_against_redis() {
        let store = connect().await;
        let key = "rate:test:reserve_window";
        store.delete(key).await.unwrap();

        let now = Utc::now();
        let minute = Duration::from_secs(60);
        let first = store.reserve_window(key, minute, 2, now).await.unwrap();
        store.reserve_window(key, minute, 2, now).await.unwrap();
        let refused = store.reserve_window(key, minute, 2, now).await.unwrap();
        assert!(!refused.granted);
        assert_eq!(refused.state.count, 2);

        store.release_window(key, first.state.window_start).await.unwrap();
        assert!(store.reserve_window(key, minute, 2, now).await.unwrap().granted);

        let later = now + chrono::Duration::seconds(61);
        let rolled = store.reserve_window(key, minute, 2, later).await.unwrap();
        assert_eq!(rolled.state.count, 1);

        store.delete(key).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running Redis at REDIS_URL"]
    async fn test_claim_against_redis() {
        let store = connect().await;
        let key = "claim:test";
        store.delete(key).await.unwrap();

        let lease = Duration::from_secs(5);
        assert!(store.claim(key, "a", lease).await.unwrap());
        assert!(!store.claim(key, "b", lease).await.unwrap());
        store.release_claim(key, "b").await.unwrap();
        assert!(!store.claim(key, "b", lease).await.unwrap());
        store.release_claim(key, "a").await.unwrap();
        assert!(store.claim(key, "b", lease).await.unwrap());

        store.delete(key).await.unwrap();
    }
}
