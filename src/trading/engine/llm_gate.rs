use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::app_config::redis as keys;
use crate::app_config::settings::Settings;
use crate::time_util::{self, Clock};
use crate::trading::adapter::{InsightContext, InsightProvider, InsightResult};
use crate::trading::cache::daily_counter::DailyCounters;
use crate::trading::cache::kv::KvStore;

/// LLM 调用被拒的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LlmDenyReason {
    GatingDisabled,
    EventNotEligible,
    OutsideRth,
    DailyBudgetExhausted,
    MonthlyCostCapped,
    ProviderUnavailable,
    ProviderError,
}

impl LlmDenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmDenyReason::GatingDisabled => "gating_disabled",
            LlmDenyReason::EventNotEligible => "event_not_eligible",
            LlmDenyReason::OutsideRth => "outside_rth",
            LlmDenyReason::DailyBudgetExhausted => "daily_budget_exhausted",
            LlmDenyReason::MonthlyCostCapped => "monthly_cost_capped",
            LlmDenyReason::ProviderUnavailable => "provider_unavailable",
            LlmDenyReason::ProviderError => "provider_error",
        }
    }
}

/// LLM 洞察门控。调用条件：事件在白名单内或信号够强；
/// 再叠加 RTH 时段、当日调用预算、月度成本上限与30分钟结果缓存。
/// 被拒时信号继续走，只是情绪按中性0处理
pub struct LlmInsightGate {
    settings: Settings,
    kv: Arc<dyn KvStore>,
    counters: Arc<DailyCounters>,
    clock: Arc<dyn Clock>,
    provider: Option<Arc<dyn InsightProvider>>,
}

impl LlmInsightGate {
    pub fn new(
        settings: Settings,
        kv: Arc<dyn KvStore>,
        counters: Arc<DailyCounters>,
        clock: Arc<dyn Clock>,
        provider: Option<Arc<dyn InsightProvider>>,
    ) -> Self {
        info!(
            "LLM 门控初始化: 日限{}次, 月上限{}KRW, 缓存{}分钟",
            settings.llm_daily_call_limit,
            settings.llm_monthly_cap_krw,
            settings.llm_cache_duration_min
        );
        Self {
            settings,
            kv,
            counters,
            clock,
            provider,
        }
    }

    /// 调用资格检查（不消耗预算）
    pub async fn should_call(
        &self,
        event_type: &str,
        signal_score: f64,
    ) -> (bool, Option<LlmDenyReason>) {
        if !self.settings.llm_gating_enabled {
            return (false, Some(LlmDenyReason::GatingDisabled));
        }

        let event_eligible = self.settings.llm_required_events.contains(event_type);
        let score_eligible = signal_score.abs() >= self.settings.llm_min_signal_score;
        if !event_eligible && !score_eligible {
            return (false, Some(LlmDenyReason::EventNotEligible));
        }

        // 只在正规交易时段调用
        let now = self.clock.now_ms();
        if !time_util::is_rth(now, &self.settings.market_holidays) {
            return (false, Some(LlmDenyReason::OutsideRth));
        }

        // 月度成本自动断路
        match self.counters.llm_monthly_cost().await {
            Ok(cost) if cost >= self.settings.llm_monthly_cap_krw => {
                return (false, Some(LlmDenyReason::MonthlyCostCapped));
            }
            _ => {}
        }

        // 当日预算只查不扣，真正调用时原子扣减
        match self.counters.llm_call_count().await {
            Ok(count) if count >= self.settings.llm_daily_call_limit => {
                (false, Some(LlmDenyReason::DailyBudgetExhausted))
            }
            _ => (true, None),
        }
    }

    /// 门控后的分析入口。缓存命中直接返回，不耗预算
    pub async fn analyze_gated(
        &self,
        ticker: &str,
        event_type: &str,
        text: &str,
        signal_score: f64,
    ) -> (Option<InsightResult>, Option<LlmDenyReason>) {
        // 1. 结果缓存（TTL 约30分钟），命中不算新调用
        let cache_key = keys::llm_cache_key(event_type, ticker);
        if let Ok(Some(raw)) = self.kv.get_string(&cache_key).await {
            if let Ok(cached) = serde_json::from_str::<InsightResult>(&raw) {
                debug!("LLM 缓存命中: {} {}", ticker, event_type);
                return (Some(cached), None);
            }
        }

        // 2. 资格检查
        let (allow, reason) = self.should_call(event_type, signal_score).await;
        if !allow {
            debug!(
                "LLM 调用被拒: {} {} ({:?})",
                ticker,
                event_type,
                reason.map(|r| r.as_str())
            );
            return (None, reason);
        }

        let provider = match &self.provider {
            Some(p) => Arc::clone(p),
            None => return (None, Some(LlmDenyReason::ProviderUnavailable)),
        };

        // 3. 原子扣当日预算
        match self
            .counters
            .try_count_llm_call(self.settings.llm_daily_call_limit)
            .await
        {
            Ok(true) => {}
            _ => return (None, Some(LlmDenyReason::DailyBudgetExhausted)),
        }

        // 4. 调用并缓存
        let ctx = InsightContext {
            ticker: ticker.to_string(),
            event_type: event_type.to_string(),
        };
        match provider.analyze(text, &ctx).await {
            Ok(result) => {
                if let Ok(raw) = serde_json::to_string(&result) {
                    let ttl = self.settings.llm_cache_duration_min * 60;
                    let _ = self.kv.set_string_ex(&cache_key, &raw, ttl).await;
                }
                let cost = self.settings.llm_call_cost_krw as f64;
                if let Ok(total) = self.counters.add_llm_monthly_cost(cost).await {
                    if total >= self.settings.llm_monthly_cap_krw {
                        warn!(
                            "LLM 月度成本达到上限: {:.0}/{:.0} KRW，本月剩余时间自动停用",
                            total, self.settings.llm_monthly_cap_krw
                        );
                    }
                }
                (Some(result), None)
            }
            Err(e) => {
                warn!("LLM 分析失败: {} {}", ticker, e);
                (None, Some(LlmDenyReason::ProviderError))
            }
        }
    }
}
