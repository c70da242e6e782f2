use std::sync::Arc;

use anyhow::Result;

use crate::app_config::redis as keys;
use crate::time_util::{self, Clock};
use crate::trading::cache::kv::KvStore;

/// 当日计数器：单票/全局日内限额、LLM 当日调用数。
/// 键按美东日历日拆分，TTL 到下一个美东零点，日界翻转恰好清零一次
pub struct DailyCounters {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
}

impl DailyCounters {
    pub fn new(kv: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self { kv, clock }
    }

    fn day_ttl(&self) -> i64 {
        time_util::secs_until_next_eastern_midnight(self.clock.now_ms())
    }

    fn day_key(&self) -> String {
        time_util::day_key(self.clock.now_ms())
    }

    /// 记一笔可执行信号：单票限额与全局限额联动，任一到顶则整体拒绝。
    /// 只有通过截断与风控之后才允许调用，限额统计的是可执行信号而非噪声
    pub async fn try_count_emission(
        &self,
        ticker: &str,
        per_ticker_cap: i64,
        global_cap: i64,
    ) -> Result<bool> {
        let day = self.day_key();
        let ticker_key = keys::daily_counter_key(&format!("emit:{}", ticker), &day);
        let global_key = keys::daily_counter_key("emit:__global__", &day);
        self.kv
            .incr_two_if_below(&ticker_key, per_ticker_cap, &global_key, global_cap, self.day_ttl())
            .await
    }

    /// 当前某票的当日已执行信号数（运维看板用）
    pub async fn emission_count(&self, ticker: &str) -> Result<i64> {
        let day = self.day_key();
        let key = keys::daily_counter_key(&format!("emit:{}", ticker), &day);
        Ok(self.kv.get_i64(&key).await?.unwrap_or(0))
    }

    pub async fn global_emission_count(&self) -> Result<i64> {
        let day = self.day_key();
        let key = keys::daily_counter_key("emit:__global__", &day);
        Ok(self.kv.get_i64(&key).await?.unwrap_or(0))
    }

    /// LLM 当日调用预算：到顶返回 false
    pub async fn try_count_llm_call(&self, daily_limit: i64) -> Result<bool> {
        let day = self.day_key();
        let key = keys::daily_counter_key("llm_calls", &day);
        self.kv.incr_if_below(&key, daily_limit, self.day_ttl()).await
    }

    pub async fn llm_call_count(&self) -> Result<i64> {
        let day = self.day_key();
        let key = keys::daily_counter_key("llm_calls", &day);
        Ok(self.kv.get_i64(&key).await?.unwrap_or(0))
    }

    /// 通用事件计数（EOD 汇总：signals_raw / orders_submitted / fills 等）
    pub async fn bump_stat(&self, name: &str) -> Result<()> {
        let day = self.day_key();
        let key = keys::daily_counter_key(&format!("stat:{}", name), &day);
        let _ = self.kv.incr_if_below(&key, 0, self.day_ttl()).await?;
        Ok(())
    }

    pub async fn stat(&self, name: &str) -> Result<i64> {
        let day = self.day_key();
        let key = keys::daily_counter_key(&format!("stat:{}", name), &day);
        Ok(self.kv.get_i64(&key).await?.unwrap_or(0))
    }

    /// LLM 月度成本累计（KRW），返回累计后的值
    pub async fn add_llm_monthly_cost(&self, cost_krw: f64) -> Result<f64> {
        let month = time_util::month_key(self.clock.now_ms());
        let key = format!("llm_cost_krw:{}", month);
        self.kv.incr_f64(&key, cost_krw).await
    }

    pub async fn llm_monthly_cost(&self) -> Result<f64> {
        let month = time_util::month_key(self.clock.now_ms());
        let key = format!("llm_cost_krw:{}", month);
        Ok(self
            .kv
            .get_string(&key)
            .await?
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_util::FixedClock;
    use crate::trading::cache::kv::MemoryKvStore;
    use chrono::TimeZone;

    fn counters() -> (Arc<crate::time_util::FixedClock>, DailyCounters) {
        // 2026-03-06 10:00 美东
        let ts = chrono_tz::America::New_York
            .with_ymd_and_hms(2026, 3, 6, 10, 0, 0)
            .unwrap()
            .timestamp_millis();
        let clock = FixedClock::new(ts);
        let kv = Arc::new(MemoryKvStore::new(clock.clone()));
        (clock.clone(), DailyCounters::new(kv, clock))
    }

    #[tokio::test]
    async fn per_ticker_cap_blocks_fourth_emission() {
        let (_clock, counters) = counters();
        for _ in 0..3 {
            assert!(counters.try_count_emission("AAPL", 3, 40).await.unwrap());
        }
        assert!(!counters.try_count_emission("AAPL", 3, 40).await.unwrap());
        assert_eq!(counters.emission_count("AAPL").await.unwrap(), 3);
        // 其他票不受影响
        assert!(counters.try_count_emission("MSFT", 3, 40).await.unwrap());
    }

    #[tokio::test]
    async fn counters_reset_after_eastern_midnight() {
        let (clock, counters) = counters();
        for _ in 0..3 {
            assert!(counters.try_count_emission("AAPL", 3, 40).await.unwrap());
        }
        assert!(!counters.try_count_emission("AAPL", 3, 40).await.unwrap());
        // 推进到次日美东零点之后
        clock.advance_secs(15 * 3600);
        assert!(counters.try_count_emission("AAPL", 3, 40).await.unwrap());
        assert_eq!(counters.emission_count("AAPL").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn global_cap_applies_across_tickers() {
        let (_clock, counters) = counters();
        assert!(counters.try_count_emission("AAPL", 10, 2).await.unwrap());
        assert!(counters.try_count_emission("MSFT", 10, 2).await.unwrap());
        assert!(!counters.try_count_emission("NVDA", 10, 2).await.unwrap());
        // 拒绝时单票计数不会被污染
        assert_eq!(counters.emission_count("NVDA").await.unwrap(), 0);
    }
}
