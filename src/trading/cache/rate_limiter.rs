use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::app_config::redis as keys;
use crate::app_config::settings::Settings;
use crate::time_util::{self, Clock};
use crate::trading::cache::kv::KvStore;

/// 令牌 Tier 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenTier {
    TierA,
    TierB,
    Reserve,
}

impl TokenTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenTier::TierA => "tier_a",
            TokenTier::TierB => "tier_b",
            TokenTier::Reserve => "reserve",
        }
    }
}

/// API 令牌桶限流器。三个桶的分钟容量之和等于行情商的配额。
/// 消费永不阻塞：拿不到令牌的调用方直接跳过本tick
pub struct ApiRateLimiter {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    tier_a_capacity: i64,
    tier_b_capacity: i64,
    reserve_capacity: i64,
    period_ms: i64,
}

impl ApiRateLimiter {
    pub fn new(kv: Arc<dyn KvStore>, clock: Arc<dyn Clock>, settings: &Settings) -> Self {
        info!(
            "API 限流器初始化: A={}, B={}, 预留={}",
            settings.api_tier_a_allocation,
            settings.api_tier_b_allocation,
            settings.api_reserve_allocation
        );
        Self {
            kv,
            clock,
            tier_a_capacity: settings.api_tier_a_allocation,
            tier_b_capacity: settings.api_tier_b_allocation,
            reserve_capacity: settings.api_reserve_allocation,
            period_ms: settings.token_refill_period_sec * 1000,
        }
    }

    fn capacity(&self, tier: TokenTier) -> i64 {
        match tier {
            TokenTier::TierA => self.tier_a_capacity,
            TokenTier::TierB => self.tier_b_capacity,
            TokenTier::Reserve => self.reserve_capacity,
        }
    }

    /// 原子消费 n 个令牌，失败返回 false（不重试、不阻塞）
    pub async fn try_consume(&self, tier: TokenTier, n: i64) -> Result<bool> {
        let now = self.clock.now_ms();
        let key = keys::token_bucket_key(tier.as_str());
        let capacity = self.capacity(tier);
        let ok = self
            .kv
            .token_try_consume(&key, capacity, capacity, self.period_ms, now, n)
            .await?;

        if ok {
            debug!("令牌消费成功: {} -{}个", tier.as_str(), n);
            return Ok(true);
        }

        // 兜底：分钟边界后10秒内 Tier A 打空，允许从预留桶借一次（每 tier+分钟 限一次）
        if tier == TokenTier::TierA && time_util::secs_into_minute(now) < 10 {
            let minute = time_util::minute_bucket(now);
            let fallback_key = keys::token_fallback_key(tier.as_str(), minute);
            if self.kv.set_nx_ex(&fallback_key, "1", 120).await? {
                let reserve_key = keys::token_bucket_key(TokenTier::Reserve.as_str());
                let reserve_ok = self
                    .kv
                    .token_try_consume(
                        &reserve_key,
                        self.reserve_capacity,
                        self.reserve_capacity,
                        self.period_ms,
                        now,
                        n,
                    )
                    .await?;
                if reserve_ok {
                    info!("Fallback 令牌使用: {} -> reserve (minute={})", tier.as_str(), minute);
                    return Ok(true);
                }
                warn!("预留桶也已打空: {} (minute={})", tier.as_str(), minute);
            }
        }

        debug!("令牌不足: {} (请求: {}个)", tier.as_str(), n);
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_util::FixedClock;
    use crate::trading::cache::kv::MemoryKvStore;

    fn test_settings() -> Settings {
        Settings::from_env()
    }

    fn minute_start_ms() -> i64 {
        // 任取一个分钟边界
        1_900_000_080_000 / 60_000 * 60_000
    }

    #[tokio::test]
    async fn consume_up_to_capacity_then_deny() {
        let clock = FixedClock::new(minute_start_ms());
        let kv = Arc::new(MemoryKvStore::new(clock.clone()));
        let settings = test_settings();
        let limiter = ApiRateLimiter::new(kv, clock.clone(), &settings);

        // 桶容量内全部成功
        for _ in 0..settings.api_tier_b_allocation {
            assert!(limiter.try_consume(TokenTier::TierB, 1).await.unwrap());
        }
        // TierB 没有预留兜底，超额直接拒绝
        assert!(!limiter.try_consume(TokenTier::TierB, 1).await.unwrap());
    }

    #[tokio::test]
    async fn tier_a_reserve_fallback_once_per_minute() {
        let clock = FixedClock::new(minute_start_ms() + 2_000);
        let kv = Arc::new(MemoryKvStore::new(clock.clone()));
        let settings = test_settings();
        let limiter = ApiRateLimiter::new(kv, clock.clone(), &settings);

        // 打空 Tier A
        for _ in 0..settings.api_tier_a_allocation {
            assert!(limiter.try_consume(TokenTier::TierA, 1).await.unwrap());
        }
        // 第一次超额消费走预留桶兜底
        assert!(limiter.try_consume(TokenTier::TierA, 1).await.unwrap());
        // 同一分钟内第二次兜底被拒
        assert!(!limiter.try_consume(TokenTier::TierA, 1).await.unwrap());
    }

    #[tokio::test]
    async fn fallback_denied_after_ten_seconds() {
        let clock = FixedClock::new(minute_start_ms() + 11_000);
        let kv = Arc::new(MemoryKvStore::new(clock.clone()));
        let settings = test_settings();
        let limiter = ApiRateLimiter::new(kv, clock.clone(), &settings);

        for _ in 0..settings.api_tier_a_allocation {
            assert!(limiter.try_consume(TokenTier::TierA, 1).await.unwrap());
        }
        // 超过分钟边界10秒，不允许借预留桶
        assert!(!limiter.try_consume(TokenTier::TierA, 1).await.unwrap());
    }

    #[tokio::test]
    async fn tokens_refill_on_next_minute() {
        let start = minute_start_ms();
        let clock = FixedClock::new(start);
        let kv = Arc::new(MemoryKvStore::new(clock.clone()));
        let settings = test_settings();
        let limiter = ApiRateLimiter::new(kv, clock.clone(), &settings);

        for _ in 0..settings.api_tier_a_allocation {
            assert!(limiter.try_consume(TokenTier::TierA, 1).await.unwrap());
        }
        // 下一分钟惰性补满
        clock.set(start + 60_000);
        assert!(limiter.try_consume(TokenTier::TierA, 1).await.unwrap());
    }
}
