use std::collections::HashMap;

use crate::app_config::settings::Settings;
use crate::trading::cache::rate_limiter::TokenTier;

/// Universe 分层：A=高波动高频轮询，B=稳定标的低频轮询，Bench=只在事件时拉取
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TickerTier {
    A,
    B,
    Bench,
}

impl TickerTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            TickerTier::A => "tier_a",
            TickerTier::B => "tier_b",
            TickerTier::Bench => "bench",
        }
    }

    /// 对应的令牌桶
    pub fn token_tier(&self) -> TokenTier {
        match self {
            TickerTier::A => TokenTier::TierA,
            TickerTier::B => TokenTier::TierB,
            TickerTier::Bench => TokenTier::Reserve,
        }
    }
}

/// 标的分层表与轮询节奏
#[derive(Debug, Clone)]
pub struct UniversePartition {
    tiers: HashMap<String, TickerTier>,
    tier_a_interval_sec: i64,
    tier_b_interval_sec: i64,
}

impl UniversePartition {
    pub fn from_settings(settings: &Settings) -> Self {
        let mut tiers = HashMap::new();
        for t in &settings.tier_a_tickers {
            tiers.insert(t.clone(), TickerTier::A);
        }
        for t in &settings.tier_b_tickers {
            tiers.insert(t.clone(), TickerTier::B);
        }
        for t in &settings.bench_tickers {
            tiers.insert(t.clone(), TickerTier::Bench);
        }
        Self {
            tiers,
            tier_a_interval_sec: settings.tier_a_interval_sec,
            tier_b_interval_sec: settings.tier_b_interval_sec,
        }
    }

    pub fn tier_of(&self, ticker: &str) -> Option<TickerTier> {
        self.tiers.get(ticker).copied()
    }

    /// 轮询周期；Bench 不参与周期轮询
    pub fn cadence_secs(&self, tier: TickerTier) -> Option<i64> {
        match tier {
            TickerTier::A => Some(self.tier_a_interval_sec),
            TickerTier::B => Some(self.tier_b_interval_sec),
            TickerTier::Bench => None,
        }
    }

    /// 周期轮询的标的（A+B）
    pub fn polled_tickers(&self) -> Vec<(String, TickerTier)> {
        let mut list: Vec<(String, TickerTier)> = self
            .tiers
            .iter()
            .filter(|(_, tier)| **tier != TickerTier::Bench)
            .map(|(t, tier)| (t.clone(), *tier))
            .collect();
        list.sort_by(|a, b| a.0.cmp(&b.0));
        list
    }

    /// 指定层的标的列表
    pub fn tickers_in(&self, tier: TickerTier) -> Vec<String> {
        let mut list: Vec<String> = self
            .tiers
            .iter()
            .filter(|(_, t)| **t == tier)
            .map(|(name, _)| name.clone())
            .collect();
        list.sort();
        list
    }

    pub fn all_tickers(&self) -> Vec<String> {
        let mut list: Vec<String> = self.tiers.keys().cloned().collect();
        list.sort();
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_from_default_settings() {
        let settings = Settings::from_env();
        let universe = UniversePartition::from_settings(&settings);
        assert_eq!(universe.tier_of("NVDA"), Some(TickerTier::A));
        assert_eq!(universe.tier_of("SQQQ"), Some(TickerTier::B));
        assert_eq!(universe.tier_of("SOXS"), Some(TickerTier::Bench));
        assert_eq!(universe.tier_of("UNKNOWN"), None);
        assert!(universe.cadence_secs(TickerTier::Bench).is_none());
        // Bench 不进入周期轮询
        assert!(universe
            .polled_tickers()
            .iter()
            .all(|(t, _)| t != "SOXS" && t != "AMD"));
    }
}
