use std::env;

use anyhow::Result;
use redis::aio::MultiplexedConnection;
use redis::Client;

/// Get a Redis multiplexed async connection using REDIS_HOST from env
pub async fn get_redis_connection() -> Result<MultiplexedConnection> {
    let url = env::var("REDIS_HOST").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
    let client = Client::open(url)?;
    let conn = client.get_multiplexed_async_connection().await?;
    Ok(conn)
}

/// 令牌桶键：api_tokens:{tier}
pub fn token_bucket_key(tier: &str) -> String {
    format!("api_tokens:{}", tier)
}

/// 预留桶兜底记录键：api_tokens:fallback:{tier}:{minute}
pub fn token_fallback_key(tier: &str, minute: i64) -> String {
    format!("api_tokens:fallback:{}:{}", tier, minute)
}

/// 当日计数键：counters:{name}:{day_key}
pub fn daily_counter_key(name: &str, day_key: &str) -> String {
    format!("counters:{}:{}", name, day_key)
}

/// 方向锁键：dir_lock:{ticker}
pub fn direction_lock_key(ticker: &str) -> String {
    format!("dir_lock:{}", ticker)
}

/// 反向ETF单飞锁键：etf_lock:{symbol}
pub fn etf_lock_key(symbol: &str) -> String {
    format!("etf_lock:{}", symbol)
}

/// 信号冷却键：cooldown:{ticker}:{sign}
pub fn cooldown_key(ticker: &str, sign: &str) -> String {
    format!("cooldown:{}:{}", ticker, sign)
}

/// 重复事件去重键：dup:{day_key}:{fingerprint}
pub fn dup_event_key(day_key: &str, fingerprint: &str) -> String {
    format!("dup:{}:{}", day_key, fingerprint)
}

/// 下单幂等键：idem:{fingerprint}
pub fn idempotency_key(fingerprint: &str) -> String {
    format!("idem:{}", fingerprint)
}

/// LLM 结果缓存键：llm_cache:{event_type}:{ticker}
pub fn llm_cache_key(event_type: &str, ticker: &str) -> String {
    format!("llm_cache:{}:{}", event_type, ticker)
}

/// 信号动态阈值键（运维可在线调参）
pub fn cutoff_key(session: &str) -> String {
    format!("cfg:signal_cutoff:{}", session)
}

/// EOD 报表键：reports:eod:{ymd}
pub fn eod_report_key(ymd: &str) -> String {
    format!("reports:eod:{}", ymd)
}
