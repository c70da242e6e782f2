use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use tokio::sync::Mutex;

/// 共享状态原子操作的抽象：令牌桶、计数器、各类锁都走这里。
/// 具体实现：Redis（跨进程原子），或进程内内存版（纸面模式与测试用）。
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    async fn set_string(&self, key: &str, val: &str) -> Result<()>;

    async fn set_string_ex(&self, key: &str, val: &str, ttl_secs: i64) -> Result<()>;

    /// SET NX EX：抢锁/幂等占位。返回是否抢到
    async fn set_nx_ex(&self, key: &str, val: &str, ttl_secs: i64) -> Result<bool>;

    async fn del(&self, key: &str) -> Result<()>;

    /// 带上限的计数自增：当前值 < cap 时 +1 并返回 true，否则不动返回 false。
    /// 首次创建时设置 ttl（秒），cap<=0 视为无上限
    async fn incr_if_below(&self, key: &str, cap: i64, ttl_secs: i64) -> Result<bool>;

    /// 双计数联动自增：两个计数都未到上限时同时 +1（单票限额与全局限额必须一起记）
    async fn incr_two_if_below(
        &self,
        key1: &str,
        cap1: i64,
        key2: &str,
        cap2: i64,
        ttl_secs: i64,
    ) -> Result<bool>;

    async fn get_i64(&self, key: &str) -> Result<Option<i64>>;

    /// 浮点累加（LLM 月度成本等），返回累加后的值
    async fn incr_f64(&self, key: &str, delta: f64) -> Result<f64>;

    /// 令牌桶原子消费：惰性补给后扣减。
    /// 状态编码为 "tokens:last_refill_ms"。返回是否成功
    async fn token_try_consume(
        &self,
        key: &str,
        capacity: i64,
        refill_per_period: i64,
        period_ms: i64,
        now_ms: i64,
        n: i64,
    ) -> Result<bool>;
}

/// 令牌桶惰性补给的纯函数：tokens 封顶 capacity，last_refill 只按实际应用的整周期推进
pub fn lazy_refill(
    tokens: i64,
    last_refill_ms: i64,
    capacity: i64,
    refill_per_period: i64,
    period_ms: i64,
    now_ms: i64,
) -> (i64, i64) {
    if period_ms <= 0 || now_ms <= last_refill_ms {
        return (tokens, last_refill_ms);
    }
    let periods = (now_ms - last_refill_ms) / period_ms;
    if periods <= 0 {
        return (tokens, last_refill_ms);
    }
    let new_tokens = (tokens + periods * refill_per_period).min(capacity);
    (new_tokens, last_refill_ms + periods * period_ms)
}

// ---------------------------------------------------------------------------
// Redis 实现
// ---------------------------------------------------------------------------

pub struct RedisKvStore {
    conn: Mutex<MultiplexedConnection>,
}

impl RedisKvStore {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }
}

// 上限计数自增（原子）
const INCR_IF_BELOW_LUA: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
local cap = tonumber(ARGV[1])
if cap > 0 and current >= cap then
    return 0
end
local v = redis.call('INCR', KEYS[1])
if v == 1 and tonumber(ARGV[2]) > 0 then
    redis.call('EXPIRE', KEYS[1], ARGV[2])
end
return 1
"#;

// 双计数联动自增（原子）：任一到顶则都不动
const INCR_TWO_IF_BELOW_LUA: &str = r#"
local c1 = tonumber(redis.call('GET', KEYS[1]) or '0')
local c2 = tonumber(redis.call('GET', KEYS[2]) or '0')
local cap1 = tonumber(ARGV[1])
local cap2 = tonumber(ARGV[2])
if (cap1 > 0 and c1 >= cap1) or (cap2 > 0 and c2 >= cap2) then
    return 0
end
local v1 = redis.call('INCR', KEYS[1])
local v2 = redis.call('INCR', KEYS[2])
local ttl = tonumber(ARGV[3])
if ttl > 0 then
    if v1 == 1 then redis.call('EXPIRE', KEYS[1], ttl) end
    if v2 == 1 then redis.call('EXPIRE', KEYS[2], ttl) end
end
return 1
"#;

// 令牌桶惰性补给+扣减（原子）。状态格式 tokens:last_refill_ms
const TOKEN_CONSUME_LUA: &str = r#"
local raw = redis.call('GET', KEYS[1])
local capacity = tonumber(ARGV[1])
local refill = tonumber(ARGV[2])
local period = tonumber(ARGV[3])
local now = tonumber(ARGV[4])
local want = tonumber(ARGV[5])
local tokens = capacity
local last = now
if raw then
    local sep = string.find(raw, ':')
    tokens = tonumber(string.sub(raw, 1, sep - 1))
    last = tonumber(string.sub(raw, sep + 1))
    if now > last and period > 0 then
        local periods = math.floor((now - last) / period)
        if periods > 0 then
            tokens = math.min(capacity, tokens + periods * refill)
            last = last + periods * period
        end
    end
end
local ok = 0
if tokens >= want then
    tokens = tokens - want
    ok = 1
end
redis.call('SETEX', KEYS[1], 120, tokens .. ':' .. last)
return ok
"#;

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.lock().await;
        let v: Option<String> = conn.get(key).await?;
        Ok(v)
    }

    async fn set_string(&self, key: &str, val: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let _: () = conn.set(key, val).await?;
        Ok(())
    }

    async fn set_string_ex(&self, key: &str, val: &str, ttl_secs: i64) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let _: () = conn.set_ex(key, val, ttl_secs as u64).await?;
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, val: &str, ttl_secs: i64) -> Result<bool> {
        let mut conn = self.conn.lock().await;
        // SET key val NX EX ttl
        let res: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(val)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut *conn)
            .await?;
        Ok(res.is_some())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn incr_if_below(&self, key: &str, cap: i64, ttl_secs: i64) -> Result<bool> {
        let mut conn = self.conn.lock().await;
        let script = Script::new(INCR_IF_BELOW_LUA);
        let res: i64 = script
            .key(key)
            .arg(cap)
            .arg(ttl_secs)
            .invoke_async(&mut *conn)
            .await?;
        Ok(res == 1)
    }

    async fn incr_two_if_below(
        &self,
        key1: &str,
        cap1: i64,
        key2: &str,
        cap2: i64,
        ttl_secs: i64,
    ) -> Result<bool> {
        let mut conn = self.conn.lock().await;
        let script = Script::new(INCR_TWO_IF_BELOW_LUA);
        let res: i64 = script
            .key(key1)
            .key(key2)
            .arg(cap1)
            .arg(cap2)
            .arg(ttl_secs)
            .invoke_async(&mut *conn)
            .await?;
        Ok(res == 1)
    }

    async fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        let mut conn = self.conn.lock().await;
        let v: Option<i64> = conn.get(key).await?;
        Ok(v)
    }

    async fn incr_f64(&self, key: &str, delta: f64) -> Result<f64> {
        let mut conn = self.conn.lock().await;
        let v: f64 = redis::cmd("INCRBYFLOAT")
            .arg(key)
            .arg(delta)
            .query_async(&mut *conn)
            .await?;
        Ok(v)
    }

    async fn token_try_consume(
        &self,
        key: &str,
        capacity: i64,
        refill_per_period: i64,
        period_ms: i64,
        now_ms: i64,
        n: i64,
    ) -> Result<bool> {
        let mut conn = self.conn.lock().await;
        let script = Script::new(TOKEN_CONSUME_LUA);
        let res: i64 = script
            .key(key)
            .arg(capacity)
            .arg(refill_per_period)
            .arg(period_ms)
            .arg(now_ms)
            .arg(n)
            .invoke_async(&mut *conn)
            .await?;
        Ok(res == 1)
    }
}

// ---------------------------------------------------------------------------
// 进程内实现（DashMap）：纸面模式与确定性测试用
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct MemEntry {
    val: String,
    expire_at_ms: Option<i64>,
}

pub struct MemoryKvStore {
    map: Arc<DashMap<String, MemEntry>>,
    clock: Arc<dyn crate::time_util::Clock>,
}

impl MemoryKvStore {
    pub fn new(clock: Arc<dyn crate::time_util::Clock>) -> Self {
        Self {
            map: Arc::new(DashMap::new()),
            clock,
        }
    }

    fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    fn live_entry(&self, key: &str) -> Option<MemEntry> {
        let now = self.now_ms();
        if let Some(e) = self.map.get(key) {
            if let Some(exp) = e.expire_at_ms {
                if now >= exp {
                    drop(e);
                    self.map.remove(key);
                    return None;
                }
            }
            return Some(e.clone());
        }
        None
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        Ok(self.live_entry(key).map(|e| e.val))
    }

    async fn set_string(&self, key: &str, val: &str) -> Result<()> {
        self.map.insert(
            key.to_string(),
            MemEntry {
                val: val.to_string(),
                expire_at_ms: None,
            },
        );
        Ok(())
    }

    async fn set_string_ex(&self, key: &str, val: &str, ttl_secs: i64) -> Result<()> {
        self.map.insert(
            key.to_string(),
            MemEntry {
                val: val.to_string(),
                expire_at_ms: Some(self.now_ms() + ttl_secs * 1000),
            },
        );
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, val: &str, ttl_secs: i64) -> Result<bool> {
        if self.live_entry(key).is_some() {
            return Ok(false);
        }
        self.set_string_ex(key, val, ttl_secs).await?;
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.map.remove(key);
        Ok(())
    }

    async fn incr_if_below(&self, key: &str, cap: i64, ttl_secs: i64) -> Result<bool> {
        let current = self
            .live_entry(key)
            .and_then(|e| e.val.parse::<i64>().ok())
            .unwrap_or(0);
        if cap > 0 && current >= cap {
            return Ok(false);
        }
        let expire = if current == 0 && ttl_secs > 0 {
            Some(self.now_ms() + ttl_secs * 1000)
        } else {
            self.live_entry(key).and_then(|e| e.expire_at_ms)
        };
        self.map.insert(
            key.to_string(),
            MemEntry {
                val: (current + 1).to_string(),
                expire_at_ms: expire,
            },
        );
        Ok(true)
    }

    async fn incr_two_if_below(
        &self,
        key1: &str,
        cap1: i64,
        key2: &str,
        cap2: i64,
        ttl_secs: i64,
    ) -> Result<bool> {
        let c1 = self
            .live_entry(key1)
            .and_then(|e| e.val.parse::<i64>().ok())
            .unwrap_or(0);
        let c2 = self
            .live_entry(key2)
            .and_then(|e| e.val.parse::<i64>().ok())
            .unwrap_or(0);
        if (cap1 > 0 && c1 >= cap1) || (cap2 > 0 && c2 >= cap2) {
            return Ok(false);
        }
        // 进程内实现天然串行（同一调用内完成两次写入）
        let expire = Some(self.now_ms() + ttl_secs * 1000);
        self.map.insert(
            key1.to_string(),
            MemEntry {
                val: (c1 + 1).to_string(),
                expire_at_ms: if c1 == 0 { expire } else { self.live_entry(key1).and_then(|e| e.expire_at_ms).or(expire) },
            },
        );
        self.map.insert(
            key2.to_string(),
            MemEntry {
                val: (c2 + 1).to_string(),
                expire_at_ms: if c2 == 0 { expire } else { self.live_entry(key2).and_then(|e| e.expire_at_ms).or(expire) },
            },
        );
        Ok(true)
    }

    async fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.live_entry(key).and_then(|e| e.val.parse::<i64>().ok()))
    }

    async fn incr_f64(&self, key: &str, delta: f64) -> Result<f64> {
        let current = self
            .live_entry(key)
            .and_then(|e| e.val.parse::<f64>().ok())
            .unwrap_or(0.0);
        let next = current + delta;
        self.map.insert(
            key.to_string(),
            MemEntry {
                val: next.to_string(),
                expire_at_ms: None,
            },
        );
        Ok(next)
    }

    async fn token_try_consume(
        &self,
        key: &str,
        capacity: i64,
        refill_per_period: i64,
        period_ms: i64,
        now_ms: i64,
        n: i64,
    ) -> Result<bool> {
        let (mut tokens, mut last) = match self.live_entry(key) {
            Some(e) => {
                let mut parts = e.val.splitn(2, ':');
                let t = parts.next().and_then(|s| s.parse::<i64>().ok()).unwrap_or(capacity);
                let l = parts.next().and_then(|s| s.parse::<i64>().ok()).unwrap_or(now_ms);
                (t, l)
            }
            None => (capacity, now_ms),
        };
        let (t, l) = lazy_refill(tokens, last, capacity, refill_per_period, period_ms, now_ms);
        tokens = t;
        last = l;
        let ok = tokens >= n;
        if ok {
            tokens -= n;
        }
        self.map.insert(
            key.to_string(),
            MemEntry {
                val: format!("{}:{}", tokens, last),
                expire_at_ms: Some(self.now_ms() + 120_000),
            },
        );
        Ok(ok)
    }
}
