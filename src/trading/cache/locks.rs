use std::sync::Arc;

use anyhow::Result;
use uuid::Uuid;

use crate::app_config::redis as keys;
use crate::time_util::{self, Clock};
use crate::trading::cache::kv::KvStore;

/// 方向锁：同一标的在锁定期内禁止反向发射，TTL 到期自动解锁
pub struct DirectionLockGuard {
    kv: Arc<dyn KvStore>,
}

impl DirectionLockGuard {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// 是否被反方向锁住。side 取 "buy"/"sell"
    pub async fn is_locked_opposing(&self, ticker: &str, side: &str) -> Result<bool> {
        let key = keys::direction_lock_key(ticker);
        match self.kv.get_string(&key).await? {
            Some(locked_side) => Ok(locked_side != side),
            None => Ok(false),
        }
    }

    /// 发射成功后上锁（同向重复设置是幂等的）
    pub async fn lock(&self, ticker: &str, side: &str, ttl_secs: i64) -> Result<()> {
        let key = keys::direction_lock_key(ticker);
        self.kv.set_string_ex(&key, side, ttl_secs).await
    }
}

/// 冷却门：同 (ticker, 方向) 在冷却期内的重复信号拦下，
/// 但分数显著改善（>= improve_min）的允许放行
pub struct CooldownGate {
    kv: Arc<dyn KvStore>,
}

impl CooldownGate {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    fn sign_str(score: f64) -> &'static str {
        if score >= 0.0 {
            "pos"
        } else {
            "neg"
        }
    }

    /// 冷却中且分数没有足够改善 → true（应拦截）
    pub async fn is_cooling(&self, ticker: &str, score: f64, improve_min: f64) -> Result<bool> {
        let key = keys::cooldown_key(ticker, Self::sign_str(score));
        match self.kv.get_string(&key).await? {
            Some(last) => {
                let last_score = last.parse::<f64>().unwrap_or(0.0);
                Ok(score.abs() - last_score.abs() < improve_min)
            }
            None => Ok(false),
        }
    }

    /// 发射成功后记录，TTL 即冷却时长
    pub async fn mark_emitted(&self, ticker: &str, score: f64, cooldown_secs: i64) -> Result<()> {
        let key = keys::cooldown_key(ticker, Self::sign_str(score));
        self.kv
            .set_string_ex(&key, &format!("{:.4}", score), cooldown_secs)
            .await
    }
}

/// 反向ETF单飞锁：同一 exec_symbol 同时最多一个未过期持有者
pub struct EtfLockGuard {
    kv: Arc<dyn KvStore>,
}

impl EtfLockGuard {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// 抢锁成功返回持有者token；失败返回 None
    pub async fn acquire(&self, symbol: &str, ttl_secs: i64) -> Result<Option<String>> {
        let key = keys::etf_lock_key(symbol);
        let token = Uuid::new_v4().to_string();
        if self.kv.set_nx_ex(&key, &token, ttl_secs).await? {
            Ok(Some(token))
        } else {
            Ok(None)
        }
    }

    pub async fn is_locked(&self, symbol: &str) -> Result<bool> {
        let key = keys::etf_lock_key(symbol);
        Ok(self.kv.get_string(&key).await?.is_some())
    }

    /// 显式释放：只有持有者本人能释放（token 不匹配则留给TTL）
    pub async fn release(&self, symbol: &str, token: &str) -> Result<()> {
        let key = keys::etf_lock_key(symbol);
        if let Some(holder) = self.kv.get_string(&key).await? {
            if holder == token {
                self.kv.del(&key).await?;
            }
        }
        Ok(())
    }
}

/// 重复事件去重：同会话内相同 (ticker, side, 四舍五入分数, bar_ts) 只处理一次
pub struct DupEventGate {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
}

impl DupEventGate {
    pub fn new(kv: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self { kv, clock }
    }

    pub fn fingerprint(ticker: &str, side: &str, score: f64, bar_ts: i64) -> String {
        format!("{}:{}:{:.2}:{}", ticker, side, score, bar_ts)
    }

    /// 首见返回 true 并占位；重复返回 false
    pub async fn check_and_mark(&self, fingerprint: &str) -> Result<bool> {
        let now = self.clock.now_ms();
        let day = time_util::day_key(now);
        let key = keys::dup_event_key(&day, fingerprint);
        let ttl = time_util::secs_until_next_eastern_midnight(now);
        self.kv.set_nx_ex(&key, "1", ttl).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_util::FixedClock;
    use crate::trading::cache::kv::MemoryKvStore;

    fn kv_and_clock() -> (Arc<MemoryKvStore>, Arc<FixedClock>) {
        let clock = FixedClock::new(1_900_000_000_000);
        (Arc::new(MemoryKvStore::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn direction_lock_blocks_opposing_until_expiry() {
        let (kv, clock) = kv_and_clock();
        let guard = DirectionLockGuard::new(kv);

        guard.lock("NVDA", "buy", 300).await.unwrap();
        assert!(!guard.is_locked_opposing("NVDA", "buy").await.unwrap());
        assert!(guard.is_locked_opposing("NVDA", "sell").await.unwrap());

        // 锁到期后反向放行
        clock.advance_secs(301);
        assert!(!guard.is_locked_opposing("NVDA", "sell").await.unwrap());
    }

    #[tokio::test]
    async fn cooldown_allows_improved_score() {
        let (kv, _clock) = kv_and_clock();
        let gate = CooldownGate::new(kv);

        gate.mark_emitted("AAPL", 0.25, 180).await.unwrap();
        // 冷却内同向同等强度 → 拦
        assert!(gate.is_cooling("AAPL", 0.27, 0.10).await.unwrap());
        // 改善超过 0.10 → 放
        assert!(!gate.is_cooling("AAPL", 0.36, 0.10).await.unwrap());
        // 反向不受这个键影响
        assert!(!gate.is_cooling("AAPL", -0.30, 0.10).await.unwrap());
    }

    #[tokio::test]
    async fn etf_lock_single_flight() {
        let (kv, clock) = kv_and_clock();
        let guard = EtfLockGuard::new(kv);

        let token = guard.acquire("SQQQ", 90).await.unwrap();
        assert!(token.is_some());
        assert!(guard.acquire("SQQQ", 90).await.unwrap().is_none());
        assert!(guard.is_locked("SQQQ").await.unwrap());

        // 非持有者释放无效
        guard.release("SQQQ", "not-the-holder").await.unwrap();
        assert!(guard.is_locked("SQQQ").await.unwrap());

        // 持有者释放
        guard.release("SQQQ", &token.unwrap()).await.unwrap();
        assert!(!guard.is_locked("SQQQ").await.unwrap());

        // TTL 过期自动可重入
        let t2 = guard.acquire("SQQQ", 90).await.unwrap();
        assert!(t2.is_some());
        clock.advance_secs(91);
        assert!(guard.acquire("SQQQ", 90).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn dup_event_marked_once() {
        let (kv, clock) = kv_and_clock();
        let gate = DupEventGate::new(kv, clock);

        let fp = DupEventGate::fingerprint("AAPL", "buy", 0.234, 1_900_000_020_000);
        assert!(gate.check_and_mark(&fp).await.unwrap());
        assert!(!gate.check_and_mark(&fp).await.unwrap());

        // 分数舍入到2位：0.234 与 0.2349 同指纹
        let fp2 = DupEventGate::fingerprint("AAPL", "buy", 0.2349, 1_900_000_020_000);
        assert_eq!(fp, fp2);
    }
}
