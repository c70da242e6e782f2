use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::app_config::settings::Settings;
use crate::time_util::SessionLabel;
use crate::trading::cache::daily_counter::DailyCounters;
use crate::trading::cache::locks::{CooldownGate, DirectionLockGuard, DupEventGate};
use crate::trading::engine::mixer::CandidateSignal;
use crate::trading::indicator::snapshot::IndicatorSnapshot;

/// 抑制原因（首个命中者记账，一个候选恰好一个原因）。
/// 字符串形式进看板与审计表，用类型化枚举避免拼写漂移
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuppressReason {
    BelowCutoff,
    ExtLiquidity,
    MixerCooldown,
    DirectionLock,
    DupEvent,
    SessionDailyCap,
    LlmGate,
    RiskFeasibility,
    EtfLock,
    ConflictingPosition,
    BasketConditions,
    RateLimit,
    MarketClosed,
    ExternalError,
    KillSwitch,
    InsufficientHistory,
}

impl SuppressReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuppressReason::BelowCutoff => "below_cutoff",
            SuppressReason::ExtLiquidity => "ext_liquidity",
            SuppressReason::MixerCooldown => "mixer_cooldown",
            SuppressReason::DirectionLock => "dir_lock",
            SuppressReason::DupEvent => "dup",
            SuppressReason::SessionDailyCap => "daily_cap",
            SuppressReason::LlmGate => "llm_gate",
            SuppressReason::RiskFeasibility => "risk",
            SuppressReason::EtfLock => "etf_lock",
            SuppressReason::ConflictingPosition => "conflicting_position",
            SuppressReason::BasketConditions => "basket_conditions",
            SuppressReason::RateLimit => "rate_limit",
            SuppressReason::MarketClosed => "market_closed",
            SuppressReason::ExternalError => "external_error",
            SuppressReason::KillSwitch => "kill_switch",
            SuppressReason::InsufficientHistory => "insufficient_history",
        }
    }
}

/// 抑制链。严格按固定顺序评估，第一个命中的门决定原因并短路：
/// cutoff → 冷却 → 方向锁 → 去重 → 日限额 → LLM门控。
/// 风控可行性由风控器单独判定；日限额计数在截断与风控都通过后才落账
pub struct SuppressionChain {
    settings: Settings,
    cooldown: CooldownGate,
    direction_lock: DirectionLockGuard,
    dup_gate: DupEventGate,
    counters: Arc<DailyCounters>,
}

impl SuppressionChain {
    pub fn new(
        settings: Settings,
        cooldown: CooldownGate,
        direction_lock: DirectionLockGuard,
        dup_gate: DupEventGate,
        counters: Arc<DailyCounters>,
    ) -> Self {
        Self {
            settings,
            cooldown,
            direction_lock,
            dup_gate,
            counters,
        }
    }

    fn cutoff_for(&self, session: SessionLabel, cutoffs: (f64, f64)) -> Option<f64> {
        match session {
            SessionLabel::Rth => Some(cutoffs.0),
            SessionLabel::Ext => Some(cutoffs.1),
            SessionLabel::Closed => None,
        }
    }

    /// 前置门（1~6）。None = 放行进风控
    pub async fn evaluate(
        &self,
        candidate: &CandidateSignal,
        session: SessionLabel,
        cutoffs: (f64, f64),
        snap: &IndicatorSnapshot,
        llm_cost_denied: bool,
    ) -> anyhow::Result<Option<SuppressReason>> {
        // 1. 会话截断（等号放行）
        let cutoff = match self.cutoff_for(session, cutoffs) {
            Some(c) => c,
            None => return Ok(Some(SuppressReason::MarketClosed)),
        };
        if candidate.score.abs() < cutoff {
            debug!(
                "截断拦截: {} |{:.3}| < {:.3}",
                candidate.ticker, candidate.score, cutoff
            );
            return Ok(Some(SuppressReason::BelowCutoff));
        }

        // 1b. EXT 流动性门槛：成交额太薄或点差太宽不碰
        if session == SessionLabel::Ext {
            if snap.dollar_vol_5m < self.settings.ext_min_dollar_vol_5m
                || snap.spread_bp > self.settings.ext_max_spread_bp
            {
                return Ok(Some(SuppressReason::ExtLiquidity));
            }
        }

        // 2. 混合器冷却（分数显著改善可突破）
        if self
            .cooldown
            .is_cooling(
                &candidate.ticker,
                candidate.score,
                self.settings.cool_improve_min,
            )
            .await?
        {
            return Ok(Some(SuppressReason::MixerCooldown));
        }

        // 3. 方向锁
        if self
            .direction_lock
            .is_locked_opposing(&candidate.ticker, candidate.side.as_str())
            .await?
        {
            return Ok(Some(SuppressReason::DirectionLock));
        }

        // 4. 重复事件去重
        let fp = DupEventGate::fingerprint(
            &candidate.ticker,
            candidate.side.as_str(),
            candidate.score,
            candidate.bar_ts,
        );
        if !self.dup_gate.check_and_mark(&fp).await? {
            return Ok(Some(SuppressReason::DupEvent));
        }

        // 5. 日限额只读检查（真正计数在风控通过后）
        let per_cap = self.settings.session_daily_cap_per_ticker;
        let global_cap = self.settings.session_daily_cap_global;
        if per_cap > 0 && self.counters.emission_count(&candidate.ticker).await? >= per_cap {
            return Ok(Some(SuppressReason::SessionDailyCap));
        }
        if global_cap > 0 && self.counters.global_emission_count().await? >= global_cap {
            return Ok(Some(SuppressReason::SessionDailyCap));
        }

        // 6. LLM 成本门控（必需事件被拒时信号不放行）
        if llm_cost_denied {
            return Ok(Some(SuppressReason::LlmGate));
        }

        Ok(None)
    }

    /// 截断与风控都过了才落日限额账。原子双计数，并发挤兑时后来者拿 SessionDailyCap
    pub async fn count_actionable(
        &self,
        candidate: &CandidateSignal,
    ) -> anyhow::Result<Option<SuppressReason>> {
        let ok = self
            .counters
            .try_count_emission(
                &candidate.ticker,
                self.settings.session_daily_cap_per_ticker,
                self.settings.session_daily_cap_global,
            )
            .await?;
        if ok {
            Ok(None)
        } else {
            Ok(Some(SuppressReason::SessionDailyCap))
        }
    }

    /// 发射成功后的状态回写：冷却与方向锁（幂等）
    pub async fn mark_emitted(&self, candidate: &CandidateSignal) -> anyhow::Result<()> {
        let is_inverse = self.settings.is_inverse_etf(&candidate.ticker);
        let cooldown_secs = if is_inverse {
            self.settings.cooldown_inverse_sec
        } else {
            self.settings.cooldown_seconds
        };
        let lock_secs = if is_inverse {
            self.settings.direction_lock_inverse_sec
        } else {
            self.settings.direction_lock_seconds
        };
        self.cooldown
            .mark_emitted(&candidate.ticker, candidate.score, cooldown_secs)
            .await?;
        self.direction_lock
            .lock(&candidate.ticker, candidate.side.as_str(), lock_secs)
            .await?;
        Ok(())
    }
}
