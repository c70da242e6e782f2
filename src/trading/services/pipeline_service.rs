use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::app_config::settings::{self, Settings};
use crate::time_util::{self, Clock};
use crate::trading::adapter::{Bracket, Side, TradingAdapter};
use crate::trading::cache::daily_counter::DailyCounters;
use crate::trading::cache::kv::KvStore;
use crate::trading::engine::basket::{BasketAggregator, BasketOutcome};
use crate::trading::engine::llm_gate::{LlmDenyReason, LlmInsightGate};
use crate::trading::engine::mixer::{CandidateSignal, EdgarFiling, SignalMixer};
use crate::trading::engine::regime::{RegimeDetector, RegimeType};
use crate::trading::engine::risk_manager::RiskManager;
use crate::trading::engine::suppression::{SuppressReason, SuppressionChain};
use crate::trading::engine::tech_score::TechScoreEngine;
use crate::trading::market::bar_store::BarStore;
use crate::trading::model::fill_log::{FillLog, FillLogModel};
use crate::trading::model::order_log::{OrderLog, OrderLogModel};
use crate::trading::model::signal_log::{SignalLog, SignalLogModel};
use crate::trading::order::dispatcher::{DispatchOutcome, OrderDispatcher, OrderIntent};
use crate::trading::services::notify::Notifier;

/// 一轮信号pass的汇总
#[derive(Debug, Default, Clone)]
pub struct PassSummary {
    pub candidates: usize,
    pub emitted: usize,
    pub suppressed: usize,
    pub basket_fires: usize,
}

/// 信号主管线：K线 → 状态/技术分 → (LLM) → 混合 → 抑制链 → 路由(多头直通/空头进篮子) →
/// 风控 → 派发 → 审计。同一票内严格串行，票间并发由上层任务池控制
pub struct SignalPipeline {
    settings: Settings,
    clock: Arc<dyn Clock>,
    kv: Arc<dyn KvStore>,
    bar_store: Arc<BarStore>,
    regime_detector: RegimeDetector,
    tech_engine: TechScoreEngine,
    mixer: SignalMixer,
    llm_gate: Arc<LlmInsightGate>,
    suppression: Arc<SuppressionChain>,
    basket: Arc<BasketAggregator>,
    risk: Arc<RiskManager>,
    dispatcher: Arc<OrderDispatcher>,
    broker: Arc<dyn TradingAdapter>,
    counters: Arc<DailyCounters>,
    notifier: Arc<Notifier>,
    /// 同键互斥：同一票的处理不允许交错
    key_mutexes: DashMap<String, Arc<Mutex<()>>>,
    /// 外部喂进来的最近EDGAR公告（news任务写入，消费后移除）
    pending_filings: DashMap<String, EdgarFiling>,
}

impl SignalPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Settings,
        clock: Arc<dyn Clock>,
        kv: Arc<dyn KvStore>,
        bar_store: Arc<BarStore>,
        llm_gate: Arc<LlmInsightGate>,
        suppression: Arc<SuppressionChain>,
        basket: Arc<BasketAggregator>,
        risk: Arc<RiskManager>,
        dispatcher: Arc<OrderDispatcher>,
        broker: Arc<dyn TradingAdapter>,
        counters: Arc<DailyCounters>,
        notifier: Arc<Notifier>,
    ) -> Self {
        let mixer = SignalMixer::new(settings.clone(), Arc::clone(&clock));
        Self {
            settings,
            clock,
            kv,
            bar_store,
            regime_detector: RegimeDetector::new(),
            tech_engine: TechScoreEngine::new(),
            mixer,
            llm_gate,
            suppression,
            basket,
            risk,
            dispatcher,
            broker,
            counters,
            notifier,
            key_mutexes: DashMap::new(),
            pending_filings: DashMap::new(),
        }
    }

    /// news 扫描任务投递公告；下一轮信号pass消费
    pub fn put_filing(&self, ticker: &str, filing: EdgarFiling) {
        self.pending_filings.insert(ticker.to_string(), filing);
    }

    fn key_mutex(&self, ticker: &str) -> Arc<Mutex<()>> {
        self.key_mutexes
            .entry(ticker.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// 信号生成pass：逐票处理后统一做一次篮子评估
    pub async fn run_signal_pass(&self, tickers: &[String]) -> PassSummary {
        let mut summary = PassSummary::default();
        let tick_ts = self.clock.now_ms();
        let cutoffs = settings::get_signal_cutoffs_kv(&self.settings, self.kv.as_ref()).await;

        // 本tick喂进篮子的空头候选，pass末尾统一归因
        let mut basket_shorts: Vec<CandidateSignal> = Vec::new();

        for ticker in tickers {
            match self.process_ticker(ticker, tick_ts, cutoffs).await {
                Ok(TickerOutcome::Emitted) => {
                    summary.candidates += 1;
                    summary.emitted += 1;
                }
                Ok(TickerOutcome::Suppressed) => {
                    summary.candidates += 1;
                    summary.suppressed += 1;
                }
                Ok(TickerOutcome::RoutedToBasket(candidate)) => {
                    summary.candidates += 1;
                    basket_shorts.push(candidate);
                }
                Ok(TickerOutcome::NoSignal) => {}
                Err(e) => {
                    // 单票故障不拖垮其他票
                    error!("信号pass单票失败: {} {}", ticker, e);
                }
            }
        }

        // 篮子聚合评估
        let fires = self.evaluate_baskets(tick_ts, &basket_shorts).await;
        summary.basket_fires = fires;
        summary.emitted += fires;

        info!(
            "信号pass完成: 候选{} 发射{} 抑制{} 篮子发射{}",
            summary.candidates, summary.emitted, summary.suppressed, summary.basket_fires
        );
        summary
    }

    async fn process_ticker(
        &self,
        ticker: &str,
        tick_ts: i64,
        cutoffs: (f64, f64),
    ) -> anyhow::Result<TickerOutcome> {
        let mutex = self.key_mutex(ticker);
        let _guard = mutex.lock().await;

        // 1. 窗口与指标
        let snap = match self.bar_store.indicators(ticker) {
            Some(s) => s,
            None => {
                // 历史不足：不产生候选，只计数
                let _ = self.counters.bump_stat("insufficient_history").await;
                debug!("历史不足，跳过: {}", ticker);
                return Ok(TickerOutcome::NoSignal);
            }
        };

        // 2. 状态与技术分
        let regime = self.regime_detector.detect(&snap);
        let tech = self.tech_engine.calculate(&snap);

        // 3. 事件上下文与LLM
        let filing = self.pending_filings.remove(ticker).map(|(_, f)| f);
        let event_type = if filing.is_some() {
            "edgar"
        } else if regime.regime == RegimeType::VolSpike {
            "vol_spike"
        } else {
            "technical"
        };
        let text = filing
            .as_ref()
            .map(|f| f.snippet.clone())
            .unwrap_or_else(|| {
                format!(
                    "Volatility spike detected for {} in {} regime",
                    ticker,
                    regime.regime.as_str()
                )
            });
        // 事件白名单之外的纯技术信号按分数资格走门控
        let (insight, llm_deny) = self
            .llm_gate
            .analyze_gated(ticker, event_type, &text, tech.score)
            .await;
        // LLM必需事件被预算/成本拒掉时信号不放行
        let llm_cost_denied = self.settings.llm_required_events.contains(event_type)
            && matches!(
                llm_deny,
                Some(LlmDenyReason::DailyBudgetExhausted)
                    | Some(LlmDenyReason::MonthlyCostCapped)
            );

        // 4. 混合
        let candidate = match self.mixer.mix(
            ticker,
            &regime,
            &tech,
            insight.as_ref(),
            filing.as_ref(),
            snap.current_price,
            snap.bar_ts,
        ) {
            Some(c) => c,
            None => {
                let _ = self.counters.bump_stat("signals_raw").await;
                return Ok(TickerOutcome::NoSignal);
            }
        };
        let _ = self.counters.bump_stat("signals_raw").await;

        // 5. 不变式：坏候选只作废自己
        if let Err(e) = candidate.validate() {
            error!("候选违反约束: {}", e);
            self.write_signal_audit(&candidate, "contract_violation").await;
            return Ok(TickerOutcome::Suppressed);
        }

        // 5b. 反向ETF直接做多的更严门槛
        if self.settings.is_inverse_etf(ticker)
            && candidate.side == Side::Buy
            && candidate.score.abs() < self.settings.inverse_entry_min_score
        {
            self.record_suppressed(&candidate, SuppressReason::BelowCutoff)
                .await;
            return Ok(TickerOutcome::Suppressed);
        }

        // 6. 抑制链前置门
        let session = time_util::session_label(tick_ts, &self.settings.market_holidays);
        if let Some(reason) = self
            .suppression
            .evaluate(&candidate, session, cutoffs, &snap, llm_cost_denied)
            .await?
        {
            self.record_suppressed(&candidate, reason).await;
            return Ok(TickerOutcome::Suppressed);
        }

        // 7. 路由：空头不直接下单，进篮子窗口
        if candidate.side == Side::Sell {
            if self.basket.is_basket_member(ticker) {
                self.basket
                    .observe_short(ticker, candidate.score, tick_ts)
                    .await;
                return Ok(TickerOutcome::RoutedToBasket(candidate));
            }
            // 非篮子成员的空头没有去处
            self.record_suppressed(&candidate, SuppressReason::BasketConditions)
                .await;
            return Ok(TickerOutcome::Suppressed);
        }

        // 8. 多头直通：风控 → 限额计数 → 派发
        match self.execute_candidate(&candidate).await? {
            true => Ok(TickerOutcome::Emitted),
            false => Ok(TickerOutcome::Suppressed),
        }
    }

    /// 风控、限额与派发（多头与篮子ETF共用）。true = 实际发射
    async fn execute_candidate(&self, candidate: &CandidateSignal) -> anyhow::Result<bool> {
        // 风控可行性 + 风险预留（原子）
        let sized = match self.risk.check_and_reserve(candidate).await {
            Ok(s) => s,
            Err(reason) => {
                self.record_suppressed(candidate, reason).await;
                return Ok(false);
            }
        };

        // 截断与风控都过了，落日限额账
        if let Some(reason) = self.suppression.count_actionable(candidate).await? {
            self.risk.release_reservation(&candidate.id).await;
            self.record_suppressed(candidate, reason).await;
            return Ok(false);
        }

        let intent = OrderIntent {
            source_id: candidate.id.clone(),
            exec_symbol: candidate.ticker.clone(),
            side: candidate.side,
            qty: sized.qty,
            entry_ref_price: candidate.entry_ref_price,
            bracket: Some(Bracket {
                stop: candidate.stop_price,
                target: candidate.target_price,
            }),
        };

        match self.dispatcher.dispatch(&intent).await? {
            DispatchOutcome::Submitted(ack) => {
                let fill_price = ack.fill_price.unwrap_or(candidate.entry_ref_price);
                let filled_qty = if ack.filled_qty > 0.0 {
                    ack.filled_qty
                } else {
                    sized.qty
                };
                self.risk.on_fill(&candidate.id, fill_price, filled_qty).await;
                self.suppression.mark_emitted(candidate).await?;
                let _ = self.counters.bump_stat("orders_submitted").await;
                let _ = self.counters.bump_stat("fills").await;
                self.write_signal_audit(candidate, "emit").await;
                self.write_order_audit(candidate, sized.qty, "accepted").await;
                self.write_fill_audit(&ack.order_id, fill_price, filled_qty).await;
                self.notifier
                    .send_order_fill(
                        &candidate.ticker,
                        candidate.side.as_str(),
                        filled_qty,
                        fill_price,
                    )
                    .await;
                Ok(true)
            }
            DispatchOutcome::LoggedOnly => {
                // 干跑模式：冷却/方向锁照常落，风险预留回滚
                self.risk.release_reservation(&candidate.id).await;
                self.suppression.mark_emitted(candidate).await?;
                self.write_signal_audit(candidate, "emit_dry_run").await;
                self.write_order_audit(candidate, sized.qty, "logged_only").await;
                Ok(true)
            }
            DispatchOutcome::Duplicate => {
                self.risk.release_reservation(&candidate.id).await;
                self.record_suppressed(candidate, SuppressReason::DupEvent).await;
                Ok(false)
            }
            DispatchOutcome::MarketClosed => {
                self.risk.release_reservation(&candidate.id).await;
                self.record_suppressed(candidate, SuppressReason::MarketClosed)
                    .await;
                Ok(false)
            }
            DispatchOutcome::Failed(err) => {
                warn!("派发失败: {} {}", candidate.ticker, err);
                self.risk.release_reservation(&candidate.id).await;
                self.record_suppressed(candidate, SuppressReason::ExternalError)
                    .await;
                Ok(false)
            }
        }
    }

    /// pass 末尾的篮子评估与ETF下单。返回发射数
    async fn evaluate_baskets(&self, tick_ts: i64, shorts: &[CandidateSignal]) -> usize {
        let positions = match self.broker.get_positions().await {
            Ok(p) => p,
            Err(e) => {
                // 查不到持仓就不敢发射，等下个tick
                warn!("篮子评估取持仓失败: {}", e);
                for c in shorts {
                    self.record_suppressed(c, SuppressReason::ExternalError).await;
                }
                return 0;
            }
        };

        let outcomes = self.basket.evaluate_tick(tick_ts, &positions).await;
        let mut fires = 0;

        for (basket_id, outcome) in &outcomes {
            match outcome {
                BasketOutcome::Fired(fire) => {
                    if self.fire_basket_entry(fire, tick_ts).await {
                        fires += 1;
                        self.audit_basket_shorts(shorts, basket_id, "aggregated").await;
                    } else {
                        self.audit_basket_shorts(shorts, basket_id, "risk").await;
                    }
                }
                BasketOutcome::Blocked(reason) => {
                    self.audit_basket_shorts(shorts, basket_id, reason.as_str())
                        .await;
                }
                BasketOutcome::Waiting | BasketOutcome::Idle => {
                    self.audit_basket_shorts(shorts, basket_id, SuppressReason::BasketConditions.as_str())
                        .await;
                }
            }
        }
        fires
    }

    /// 聚合发射：给目标ETF构造买入候选并走共用的风控/派发路径
    async fn fire_basket_entry(
        &self,
        fire: &crate::trading::engine::basket::BasketFire,
        tick_ts: i64,
    ) -> bool {
        let entry = match self.bar_store.latest_price(&fire.exec_symbol) {
            Some(p) if p > 0.0 => p,
            _ => {
                warn!("目标ETF无行情，放弃发射: {}", fire.exec_symbol);
                return false;
            }
        };
        let stop_pct = self.settings.stop_loss_pct_inverse;
        let candidate = CandidateSignal {
            // 聚合键：日期+篮子，同日同篮子的重复发射会被幂等拒绝
            id: format!("basket-{}-{}", fire.basket_id, time_util::day_key(tick_ts)),
            ticker: fire.exec_symbol.clone(),
            side: Side::Buy,
            score: fire.mean_score.abs(),
            tech_score: fire.mean_score,
            sentiment_score: 0.0,
            confidence: 0.7,
            regime: RegimeType::VolSpike,
            horizon_minutes: 120,
            entry_ref_price: entry,
            stop_price: entry * (1.0 - stop_pct),
            target_price: entry * (1.0 + stop_pct * 2.0),
            trigger_tag: format!(
                "basket_{}({})",
                fire.basket_id.to_lowercase(),
                fire.contributing.join(",")
            ),
            edgar_override: false,
            bar_ts: tick_ts,
            created_at: self.clock.now_ms(),
        };

        match self.execute_candidate(&candidate).await {
            Ok(true) => true,
            Ok(false) => false,
            Err(e) => {
                error!("篮子发射失败: {} {}", fire.basket_id, e);
                false
            }
        }
    }

    async fn audit_basket_shorts(
        &self,
        shorts: &[CandidateSignal],
        basket_id: &str,
        reason: &str,
    ) {
        for c in shorts {
            if self.basket.is_member_of(basket_id, &c.ticker) {
                self.write_signal_audit(c, reason).await;
            }
        }
    }

    async fn record_suppressed(&self, candidate: &CandidateSignal, reason: SuppressReason) {
        debug!(
            "候选被抑制: {} {} ({})",
            candidate.ticker,
            candidate.side.as_str(),
            reason.as_str()
        );
        let _ = self
            .counters
            .bump_stat(&format!("suppress:{}", reason.as_str()))
            .await;
        self.write_signal_audit(candidate, reason.as_str()).await;
    }

    // --- 审计落库（只写；库未配置时静默跳过） ---

    async fn write_signal_audit(&self, candidate: &CandidateSignal, reason_or_emit: &str) {
        if let Some(model) = SignalLogModel::new() {
            let row = SignalLog {
                ts: candidate.created_at,
                ticker: candidate.ticker.clone(),
                regime: candidate.regime.as_str().to_string(),
                tech: format!("{:.4}", candidate.tech_score),
                sentiment: format!("{:.4}", candidate.sentiment_score),
                score: format!("{:.4}", candidate.score),
                reason_or_emit: reason_or_emit.to_string(),
                horizon_min: candidate.horizon_minutes,
                override_flag: candidate.edgar_override as i32,
            };
            if let Err(e) = model.add(&row).await {
                warn!("signal_log 落库失败: {}", e);
            }
        }
    }

    async fn write_order_audit(&self, candidate: &CandidateSignal, qty: f64, status: &str) {
        if let Some(model) = OrderLogModel::new() {
            let row = OrderLog {
                ts: self.clock.now_ms(),
                ticker: candidate.ticker.clone(),
                side: candidate.side.as_str().to_string(),
                qty: format!("{}", qty),
                entry: format!("{:.4}", candidate.entry_ref_price),
                stop: format!("{:.4}", candidate.stop_price),
                target: format!("{:.4}", candidate.target_price),
                idem_key: candidate.id.clone(),
                status: status.to_string(),
            };
            if let Err(e) = model.add(&row).await {
                warn!("order_log 落库失败: {}", e);
            }
        }
    }

    async fn write_fill_audit(&self, order_id: &str, price: f64, qty: f64) {
        if let Some(model) = FillLogModel::new() {
            let row = FillLog {
                order_id: order_id.to_string(),
                ts: self.clock.now_ms(),
                price: format!("{:.4}", price),
                qty: format!("{}", qty),
            };
            if let Err(e) = model.add(&row).await {
                warn!("fill_log 落库失败: {}", e);
            }
        }
    }

    /// 快tick：止损/止盈轮询。触发即平仓并登记已实现盈亏
    pub async fn check_stop_targets(&self) -> usize {
        let mut closed = 0;
        for position in self.risk.open_positions().await {
            let price = match self.bar_store.latest_price(&position.ticker) {
                Some(p) => p,
                None => continue,
            };
            let (hit_stop, hit_target) = match position.side {
                Side::Buy => (
                    price <= position.stop_price,
                    price >= position.entry_price + (position.entry_price - position.stop_price) * 2.0,
                ),
                Side::Sell => (
                    price >= position.stop_price,
                    price <= position.entry_price - (position.stop_price - position.entry_price) * 2.0,
                ),
            };
            if !hit_stop && !hit_target {
                continue;
            }

            let kind = if hit_stop { "stop" } else { "target" };
            let close_side = position.side.opposite();
            let intent = OrderIntent {
                source_id: format!("exit-{}-{}", kind, position.ticker),
                exec_symbol: position.ticker.clone(),
                side: close_side,
                qty: position.qty,
                entry_ref_price: price,
                bracket: None,
            };
            match self.dispatcher.dispatch(&intent).await {
                Ok(DispatchOutcome::Submitted(ack)) => {
                    let exit_price = ack.fill_price.unwrap_or(price);
                    let signed = match position.side {
                        Side::Buy => exit_price - position.entry_price,
                        Side::Sell => position.entry_price - exit_price,
                    };
                    let realized = signed * position.qty;
                    self.risk.on_close(&position.ticker, realized).await;
                    let _ = self.counters.bump_stat("fills").await;
                    info!(
                        "{}触发平仓: {} {}股 @ {:.2} (pnl {:+.2})",
                        kind, position.ticker, position.qty, exit_price, realized
                    );
                    closed += 1;
                }
                Ok(DispatchOutcome::Duplicate) => {
                    // 本日同类退出已提交过，无需重复
                }
                Ok(other) => {
                    debug!("平仓派发未成交: {} {:?}", position.ticker, other);
                }
                Err(e) => {
                    warn!("平仓派发失败: {} {}", position.ticker, e);
                }
            }
        }
        closed
    }
}

enum TickerOutcome {
    /// 实际发射了订单（或干跑等价物）
    Emitted,
    /// 被某个门拦下并已记录原因
    Suppressed,
    /// 空头进了篮子窗口，归因在pass末尾统一处理
    RoutedToBasket(CandidateSignal),
    /// 无候选（历史不足/分数不到发射线）
    NoSignal,
}
