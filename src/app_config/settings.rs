use std::collections::HashSet;

use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::app_config::env::{env_csv, env_f64, env_i64, env_is_true, env_or_default};
use crate::app_config::redis as app_redis;

// 信号阈值安全范围：在线调参越界时强制收回
pub const SAFE_RTH_RANGE: (f64, f64) = (0.12, 0.30);
pub const SAFE_EXT_RANGE: (f64, f64) = (0.18, 0.38);

fn clamp(v: f64, lo: f64, hi: f64) -> f64 {
    v.max(lo).min(hi)
}

/// 单个篮子配置：成员集体走弱 → 买入对应反向ETF
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasketConfig {
    pub basket_id: String,
    pub members: Vec<String>,
    pub target_etf: String,
    pub min_signals: usize,
    pub neg_fraction: f64,
    pub mean_threshold: f64,
    pub window_seconds: i64,
}

/// 中央集中式配置，启动时从环境变量构建一次，显式注入各组件
#[derive(Debug, Clone)]
pub struct Settings {
    // --- 会话级信号阈值 ---
    pub signal_cutoff_rth: f64,
    pub signal_cutoff_ext: f64,
    /// 阈值单一来源：mixer 发射阈值与 RTH 截断必须一致
    pub mixer_threshold: f64,

    pub edgar_bonus: f64,
    pub cooldown_seconds: i64,
    /// 冷却期内同向信号分数改善超过该值时放行
    pub cool_improve_min: f64,
    pub direction_lock_seconds: i64,

    // EXT 时段流动性门槛
    pub ext_min_dollar_vol_5m: f64,
    pub ext_max_spread_bp: f64,

    // --- Universe 分层 ---
    pub tier_a_tickers: Vec<String>,
    pub tier_b_tickers: Vec<String>,
    pub bench_tickers: Vec<String>,
    pub tier_a_interval_sec: i64,
    pub tier_b_interval_sec: i64,

    // --- API 限流 ---
    pub api_calls_per_minute: i64,
    pub api_tier_a_allocation: i64,
    pub api_tier_b_allocation: i64,
    pub api_reserve_allocation: i64,
    pub token_refill_period_sec: i64,

    // --- LLM 门控 ---
    pub llm_daily_call_limit: i64,
    pub llm_call_cost_krw: i64,
    pub llm_monthly_cap_krw: f64,
    pub llm_gating_enabled: bool,
    pub llm_min_signal_score: f64,
    pub llm_required_events: HashSet<String>,
    pub llm_cache_duration_min: i64,

    // --- 仓位与风险 ---
    pub risk_per_trade: f64,
    pub max_concurrent_risk: f64,
    pub daily_loss_limit: f64,
    pub max_positions: usize,
    pub position_min_slots: usize,
    pub position_max_equity_pct: f64,
    pub max_price_per_share: f64,
    pub fractional_enabled: bool,
    pub leveraged_etf_size_shrink: f64,

    // 预算一元化：override 模式下以固定预算而非账户权益计算仓位
    pub sizing_equity_mode: String,
    pub sizing_equity_krw: f64,
    pub usd_krw_rate: f64,
    pub max_notional_per_trade_krw: f64,

    // --- EDGAR ---
    pub edgar_override_items: Vec<String>,
    pub regulatory_block_words: Vec<String>,

    // --- 反向ETF 专用护栏 ---
    pub inverse_etfs: Vec<String>,
    pub leveraged_etfs: Vec<String>,
    pub inverse_entry_min_score: f64,
    pub cooldown_inverse_sec: i64,
    pub direction_lock_inverse_sec: i64,
    pub stop_loss_pct_inverse: f64,
    pub etf_lock_ttl_seconds: i64,

    // --- 篮子路由 ---
    pub baskets: Vec<BasketConfig>,

    // --- 日内限额 ---
    pub session_daily_cap_per_ticker: i64,
    pub session_daily_cap_global: i64,

    // --- EOD ---
    pub eod_flatten_minutes: i64,

    // --- 运行模式 ---
    pub auto_mode: bool,
    pub test_mode_enabled: bool,

    // --- 交易日历 ---
    pub market_holidays: HashSet<String>,
}

impl Settings {
    pub fn from_env() -> Self {
        let mixer_threshold = env_f64("MIXER_THRESHOLD", 0.20);
        let mut signal_cutoff_rth = env_f64("SIGNAL_CUTOFF_RTH", mixer_threshold);

        // 阈值单一来源：两者不一致时以 mixer 阈值为准
        if (signal_cutoff_rth - mixer_threshold).abs() > f64::EPSILON {
            warn!(
                "SIGNAL_CUTOFF_RTH({}) != MIXER_THRESHOLD({})，以 MIXER_THRESHOLD 为准",
                signal_cutoff_rth, mixer_threshold
            );
            signal_cutoff_rth = mixer_threshold;
        }

        let default_required_events =
            "edgar,vol_spike,fed_speech,rate_decision,market_news,tech_earnings,basket_inverse_entry";

        Self {
            signal_cutoff_rth,
            signal_cutoff_ext: env_f64("SIGNAL_CUTOFF_EXT", 0.28),
            mixer_threshold,

            edgar_bonus: env_f64("EDGAR_BONUS", 0.10),
            cooldown_seconds: env_i64("COOLDOWN_SECONDS", 180),
            cool_improve_min: env_f64("COOL_IMPROVE_MIN", 0.10),
            direction_lock_seconds: env_i64("DIRECTION_LOCK_SECONDS", 300),

            ext_min_dollar_vol_5m: env_f64("EXT_MIN_DOLLAR_VOL_5M", 100000.0),
            ext_max_spread_bp: env_f64("EXT_MAX_SPREAD_BP", 200.0),

            tier_a_tickers: env_csv("TIER_A_TICKERS", "NVDA,AAPL,MSFT,TSLA"),
            tier_b_tickers: env_csv("TIER_B_TICKERS", "AMZN,GOOGL,META,SQQQ"),
            bench_tickers: env_csv("BENCH_TICKERS", "AMD,AVGO,NFLX,SOXS"),
            tier_a_interval_sec: env_i64("TIER_A_INTERVAL_SEC", 30),
            tier_b_interval_sec: env_i64("TIER_B_INTERVAL_SEC", 60),

            api_calls_per_minute: env_i64("API_CALLS_PER_MINUTE", 10),
            api_tier_a_allocation: env_i64("API_TIER_A_ALLOCATION", 6),
            api_tier_b_allocation: env_i64("API_TIER_B_ALLOCATION", 3),
            api_reserve_allocation: env_i64("API_RESERVE_ALLOCATION", 1),
            token_refill_period_sec: env_i64("TOKEN_REFILL_PERIOD_SEC", 60),

            llm_daily_call_limit: env_i64("LLM_DAILY_CALL_LIMIT", 120),
            llm_call_cost_krw: env_i64("LLM_CALL_COST_KRW", 667),
            llm_monthly_cap_krw: env_f64("LLM_MONTHLY_CAP_KRW", 80000.0),
            llm_gating_enabled: env_is_true("LLM_GATING_ENABLED", true),
            llm_min_signal_score: env_f64("LLM_MIN_SIGNAL_SCORE", 0.25),
            llm_required_events: env_csv("LLM_REQUIRED_EVENTS", default_required_events)
                .into_iter()
                .collect(),
            llm_cache_duration_min: env_i64("LLM_CACHE_DURATION_MIN", 30),

            risk_per_trade: env_f64("RISK_PER_TRADE", 0.008),
            max_concurrent_risk: env_f64("MAX_CONCURRENT_RISK", 0.04),
            daily_loss_limit: env_f64("DAILY_LOSS_LIMIT", 0.02),
            max_positions: env_i64("MAX_POSITIONS", 4) as usize,
            position_min_slots: env_i64("POSITION_MIN_SLOTS", 3) as usize,
            position_max_equity_pct: env_f64("POSITION_MAX_EQUITY_PCT", 0.8),
            max_price_per_share: env_f64("MAX_PRICE_PER_SHARE_USD", 120.0),
            fractional_enabled: env_is_true("FRACTIONAL_ENABLED", false),
            leveraged_etf_size_shrink: env_f64("LEVERAGED_ETF_SIZE_SHRINK", 0.5),

            sizing_equity_mode: env_or_default("SIZING_EQUITY_MODE", "override"),
            sizing_equity_krw: env_f64("SIZING_EQUITY_KRW", 1000000.0),
            usd_krw_rate: env_f64("USD_KRW_RATE", 1350.0),
            max_notional_per_trade_krw: env_f64("MAX_NOTIONAL_PER_TRADE_KRW", 250000.0),

            edgar_override_items: env_csv("EDGAR_OVERRIDE_ITEMS", "1.01,2.02,2.03,8.01"),
            regulatory_block_words: env_csv(
                "REGULATORY_BLOCK_WORDS",
                "regulatory,litigation,FTC,DoJ,antitrust",
            ),

            inverse_etfs: env_csv(
                "INVERSE_ETFS",
                "SOXS,SQQQ,SPXS,TZA,SDOW,TECS,DRV,SARK,UVXY",
            ),
            leveraged_etfs: env_csv("LEVERAGED_ETFS", "SOXS,SQQQ,SPXS,TZA,SDOW,TECS,DRV"),
            inverse_entry_min_score: env_f64("INVERSE_ENTRY_MIN_SCORE", 0.30),
            cooldown_inverse_sec: env_i64("COOLDOWN_INVERSE_SEC", 300),
            direction_lock_inverse_sec: env_i64("DIRECTION_LOCK_INVERSE_SEC", 300),
            stop_loss_pct_inverse: env_f64("STOP_LOSS_PCT_INVERSE", 0.03),
            etf_lock_ttl_seconds: env_i64("ETF_LOCK_TTL_SECONDS", 90),

            baskets: Self::baskets_from_env(),

            session_daily_cap_per_ticker: env_i64("SESSION_DAILY_CAP_PER_TICKER", 3),
            session_daily_cap_global: env_i64("SESSION_DAILY_CAP_GLOBAL", 40),

            eod_flatten_minutes: env_i64("EOD_FLATTEN_MINUTES", 5),

            auto_mode: env_is_true("AUTO_MODE", false),
            test_mode_enabled: env_is_true("TEST_MODE_ENABLED", false),

            market_holidays: env_csv("MARKET_HOLIDAYS", "").into_iter().collect(),
        }
    }

    /// 篮子配置：优先 BASKETS_JSON，否则内置 MEGATECH/SEMIS 两个篮子
    fn baskets_from_env() -> Vec<BasketConfig> {
        if let Ok(raw) = std::env::var("BASKETS_JSON") {
            match serde_json::from_str::<Vec<BasketConfig>>(&raw) {
                Ok(list) => return list,
                Err(e) => warn!("BASKETS_JSON 解析失败: {}，使用内置篮子", e),
            }
        }
        let window_seconds = env_i64("BASKET_WINDOW_SEC", 300);
        let min_signals = env_i64("BASKET_MIN_SIGNALS", 3) as usize;
        let neg_fraction = env_f64("BASKET_NEG_FRACTION", 0.45);
        let mean_threshold = env_f64("BASKET_MEAN_THRESHOLD", -0.12);
        vec![
            BasketConfig {
                basket_id: "MEGATECH".to_string(),
                members: env_csv(
                    "BASKET_MEGATECH_MEMBERS",
                    "AAPL,MSFT,TSLA,AMZN,META,GOOGL",
                ),
                target_etf: env_or_default("BASKET_MEGATECH_ETF", "SQQQ"),
                min_signals,
                neg_fraction,
                mean_threshold,
                window_seconds,
            },
            BasketConfig {
                basket_id: "SEMIS".to_string(),
                members: env_csv("BASKET_SEMIS_MEMBERS", "NVDA,AMD,AVGO"),
                target_etf: env_or_default("BASKET_SEMIS_ETF", "SOXS"),
                min_signals,
                neg_fraction,
                mean_threshold,
                window_seconds,
            },
        ]
    }

    pub fn is_inverse_etf(&self, symbol: &str) -> bool {
        self.inverse_etfs.iter().any(|s| s == symbol)
    }

    pub fn is_leveraged_etf(&self, symbol: &str) -> bool {
        self.leveraged_etfs.iter().any(|s| s == symbol)
    }

    /// override 模式下的名义权益（USD）
    pub fn sizing_equity_usd(&self) -> Option<f64> {
        if self.sizing_equity_mode == "override" && self.usd_krw_rate > 0.0 {
            Some(self.sizing_equity_krw / self.usd_krw_rate)
        } else {
            None
        }
    }
}

/// 阈值钳制：测试加速的临时 delta 也不允许越过安全范围
pub fn clamp_cutoffs(rth: f64, ext: f64) -> (f64, f64) {
    (
        clamp(rth, SAFE_RTH_RANGE.0, SAFE_RTH_RANGE.1),
        clamp(ext, SAFE_EXT_RANGE.0, SAFE_EXT_RANGE.1),
    )
}

/// KvStore 版本：在线调参值优先，其次配置默认，最后钳到安全范围
pub async fn get_signal_cutoffs_kv(
    settings: &Settings,
    kv: &dyn crate::trading::cache::kv::KvStore,
) -> (f64, f64) {
    use crate::trading::cache::kv::KvStore as _;

    let mut rth = settings.signal_cutoff_rth;
    let mut ext = settings.signal_cutoff_ext;

    if let Ok(Some(v)) = kv.get_string(&app_redis::cutoff_key("rth")).await {
        if let Ok(parsed) = v.parse::<f64>() {
            rth = parsed;
        }
    }
    if let Ok(Some(v)) = kv.get_string(&app_redis::cutoff_key("ext")).await {
        if let Ok(parsed) = v.parse::<f64>() {
            ext = parsed;
        }
    }

    rth += env_f64("SIGNAL_CUTOFF_RTH_DELTA", 0.0);
    ext += env_f64("SIGNAL_CUTOFF_EXT_DELTA", 0.0);

    clamp_cutoffs(rth, ext)
}

/// Redis 值优先，没有则用配置默认值；最后统一钳到安全范围
pub async fn get_signal_cutoffs(settings: &Settings) -> (f64, f64) {
    let mut rth = settings.signal_cutoff_rth;
    let mut ext = settings.signal_cutoff_ext;

    if let Ok(mut conn) = app_redis::get_redis_connection().await {
        if let Ok(Some(v)) = conn
            .get::<_, Option<String>>(app_redis::cutoff_key("rth"))
            .await
        {
            if let Ok(parsed) = v.parse::<f64>() {
                rth = parsed;
            }
        }
        if let Ok(Some(v)) = conn
            .get::<_, Option<String>>(app_redis::cutoff_key("ext"))
            .await
        {
            if let Ok(parsed) = v.parse::<f64>() {
                ext = parsed;
            }
        }
    }

    // 临时 delta（测试加速用）
    rth += env_f64("SIGNAL_CUTOFF_RTH_DELTA", 0.0);
    ext += env_f64("SIGNAL_CUTOFF_EXT_DELTA", 0.0);

    clamp_cutoffs(rth, ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cutoff_clamped_to_safe_range() {
        let (rth, ext) = clamp_cutoffs(0.05, 0.9);
        assert_eq!(rth, SAFE_RTH_RANGE.0);
        assert_eq!(ext, SAFE_EXT_RANGE.1);

        let (rth, ext) = clamp_cutoffs(0.2, 0.28);
        assert_eq!(rth, 0.2);
        assert_eq!(ext, 0.28);
    }
}
