use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::app_config::settings::Settings;
use crate::trading::adapter::Side;
use crate::trading::engine::mixer::CandidateSignal;
use crate::trading::engine::suppression::SuppressReason;

/// 在途/持仓风险登记
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRisk {
    pub ticker: String,
    pub side: Side,
    pub qty: f64,
    pub entry_price: f64,
    pub stop_price: f64,
    pub risk_pct: f64,
}

/// 风险台账快照（看板与EOD报表用）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSnapshot {
    pub equity: f64,
    pub current_risk_pct: f64,
    pub open_positions: usize,
    pub daily_realized_pnl_pct: f64,
    pub kill_switch: bool,
}

/// 风控通过后的下单尺寸
#[derive(Debug, Clone)]
pub struct SizedOrder {
    pub qty: f64,
    pub risk_pct: f64,
    pub risk_amount: f64,
    pub notional: f64,
}

struct LedgerState {
    equity: f64,
    current_risk_pct: f64,
    open: HashMap<String, PositionRisk>,
    reserved: HashMap<String, PositionRisk>, // signal_id -> 预留
    daily_realized_pnl: f64,
    kill_switch: bool,
}

/// 仓位尺寸纯函数。risk_amount / 止损距离 给出风险约束的数量，
/// 再叠加槽位敞口上限、杠杆ETF缩量、单笔名义上限、最小1股底线
pub fn compute_position_size(
    settings: &Settings,
    equity: f64,
    entry_price: f64,
    stop_price: f64,
    confidence_adj: f64,
    current_open_positions: usize,
    is_leveraged_etf: bool,
) -> Option<SizedOrder> {
    let stop_distance = (entry_price - stop_price).abs();
    if equity <= 0.0 || entry_price <= 0.0 || stop_distance <= 0.0 {
        return None;
    }

    let risk_amount = equity * settings.risk_per_trade * confidence_adj.max(0.1).min(1.0);
    let size_risk = risk_amount / stop_distance;

    let remaining_slots = settings
        .position_min_slots
        .saturating_sub(current_open_positions)
        .max(1);
    let size_cap =
        equity * settings.position_max_equity_pct / remaining_slots as f64 / entry_price;

    let mut size = size_risk.min(size_cap);

    // 杠杆/反向ETF缩量
    if is_leveraged_etf {
        size *= settings.leveraged_etf_size_shrink;
    }

    // 单笔名义上限（KRW预算换算）
    if settings.usd_krw_rate > 0.0 {
        let max_notional_usd = settings.max_notional_per_trade_krw / settings.usd_krw_rate;
        if max_notional_usd > 0.0 {
            size = size.min(max_notional_usd / entry_price);
        }
    }

    let qty = if settings.fractional_enabled {
        (size * 10_000.0).floor() / 10_000.0
    } else {
        // 整股：高价票买不起就是买不起
        if entry_price > settings.max_price_per_share && size < 1.0 {
            return None;
        }
        size.floor().max(1.0)
    };
    if qty <= 0.0 {
        return None;
    }

    let risk_amount_actual = qty * stop_distance;
    Some(SizedOrder {
        qty,
        risk_pct: risk_amount_actual / equity,
        risk_amount: risk_amount_actual,
        notional: qty * entry_price,
    })
}

/// 风控管理器。风险台账唯一属主：可行性检查、预留、成交/平仓回写、
/// 日亏断路开关都走这里，检查与预留在同一把锁内完成
pub struct RiskManager {
    settings: Settings,
    state: Mutex<LedgerState>,
}

impl RiskManager {
    pub fn new(settings: Settings, initial_equity: f64) -> Self {
        info!(
            "风控初始化: 单笔{:.2}%, 并发上限{:.1}%, 日亏断路{:.1}%, 最多{}仓",
            settings.risk_per_trade * 100.0,
            settings.max_concurrent_risk * 100.0,
            settings.daily_loss_limit * 100.0,
            settings.max_positions
        );
        Self {
            settings,
            state: Mutex::new(LedgerState {
                equity: initial_equity,
                current_risk_pct: 0.0,
                open: HashMap::new(),
                reserved: HashMap::new(),
                daily_realized_pnl: 0.0,
                kill_switch: false,
            }),
        }
    }

    pub async fn kill_switch_active(&self) -> bool {
        self.state.lock().await.kill_switch
    }

    pub async fn snapshot(&self) -> RiskSnapshot {
        let state = self.state.lock().await;
        RiskSnapshot {
            equity: state.equity,
            current_risk_pct: state.current_risk_pct,
            open_positions: state.open.len(),
            daily_realized_pnl_pct: if state.equity > 0.0 {
                state.daily_realized_pnl / state.equity
            } else {
                0.0
            },
            kill_switch: state.kill_switch,
        }
    }

    /// 同步券商侧权益（override 模式下以配置预算为准）
    pub async fn sync_equity(&self, broker_equity: f64) {
        let mut state = self.state.lock().await;
        state.equity = self
            .settings
            .sizing_equity_usd()
            .unwrap_or(broker_equity)
            .max(0.0);
    }

    /// 可行性检查 + 尺寸计算 + 风险预留，单锁内原子完成。
    /// 并发提交合计超限时后来者被拒
    pub async fn check_and_reserve(
        &self,
        candidate: &CandidateSignal,
    ) -> Result<SizedOrder, SuppressReason> {
        let mut state = self.state.lock().await;

        // (i) 断路开关
        if state.kill_switch {
            return Err(SuppressReason::KillSwitch);
        }

        let equity = state.equity;
        if equity <= 0.0 {
            return Err(SuppressReason::RiskFeasibility);
        }
        let daily_pnl_pct = state.daily_realized_pnl / equity;

        // (ii) 日亏限度：已亏穿不开新仓
        if daily_pnl_pct <= -self.settings.daily_loss_limit {
            return Err(SuppressReason::RiskFeasibility);
        }

        // (iii) 仓位数上限（含预留）
        let open_count = state.open.len() + state.reserved.len();
        if open_count >= self.settings.max_positions {
            return Err(SuppressReason::RiskFeasibility);
        }

        // (v) 止损距离必须为正
        if candidate.risk_per_share() <= 0.0 {
            return Err(SuppressReason::RiskFeasibility);
        }

        let is_lev = self.settings.is_leveraged_etf(&candidate.ticker)
            || self.settings.is_inverse_etf(&candidate.ticker);
        let sized = compute_position_size(
            &self.settings,
            equity,
            candidate.entry_ref_price,
            candidate.stop_price,
            candidate.confidence,
            state.open.len(),
            is_lev,
        )
        .ok_or(SuppressReason::RiskFeasibility)?;

        // (ii-b) 本单风险叠加后仍不能把当日亏损推穿限度
        if daily_pnl_pct - sized.risk_pct < -self.settings.daily_loss_limit {
            return Err(SuppressReason::RiskFeasibility);
        }

        // (iv) 并发风险上限，等号放行
        let total = state.current_risk_pct + sized.risk_pct;
        if total > self.settings.max_concurrent_risk + 1e-12 {
            warn!(
                "并发风险超限: {} {:.3}% + {:.3}% > {:.3}%",
                candidate.ticker,
                state.current_risk_pct * 100.0,
                sized.risk_pct * 100.0,
                self.settings.max_concurrent_risk * 100.0
            );
            return Err(SuppressReason::RiskFeasibility);
        }

        // 预留
        state.current_risk_pct = total;
        state.reserved.insert(
            candidate.id.clone(),
            PositionRisk {
                ticker: candidate.ticker.clone(),
                side: candidate.side,
                qty: sized.qty,
                entry_price: candidate.entry_ref_price,
                stop_price: candidate.stop_price,
                risk_pct: sized.risk_pct,
            },
        );
        Ok(sized)
    }

    /// 下单失败/放弃时回滚预留
    pub async fn release_reservation(&self, signal_id: &str) {
        let mut state = self.state.lock().await;
        if let Some(r) = state.reserved.remove(signal_id) {
            state.current_risk_pct = (state.current_risk_pct - r.risk_pct).max(0.0);
        }
    }

    /// 成交回报：预留转正式持仓
    pub async fn on_fill(&self, signal_id: &str, fill_price: f64, filled_qty: f64) {
        let mut state = self.state.lock().await;
        if let Some(mut r) = state.reserved.remove(signal_id) {
            r.entry_price = fill_price;
            if filled_qty > 0.0 {
                r.qty = filled_qty;
            }
            info!(
                "持仓建立: {} {} {}股 @ {:.2} (风险 {:.3}%)",
                r.ticker,
                r.side.as_str(),
                r.qty,
                fill_price,
                r.risk_pct * 100.0
            );
            state.open.insert(r.ticker.clone(), r);
        }
    }

    /// 平仓回报：释放风险、累计当日已实现盈亏；亏穿限度跳断路器
    pub async fn on_close(&self, ticker: &str, realized_pnl: f64) {
        let mut state = self.state.lock().await;
        if let Some(p) = state.open.remove(ticker) {
            state.current_risk_pct = (state.current_risk_pct - p.risk_pct).max(0.0);
        }
        state.daily_realized_pnl += realized_pnl;
        let pnl_pct = if state.equity > 0.0 {
            state.daily_realized_pnl / state.equity
        } else {
            0.0
        };
        if pnl_pct <= -self.settings.daily_loss_limit && !state.kill_switch {
            state.kill_switch = true;
            warn!(
                "日亏断路器触发: {:.2}% <= -{:.2}%，今日停止新开仓",
                pnl_pct * 100.0,
                self.settings.daily_loss_limit * 100.0
            );
        }
    }

    /// 直接登记已实现盈亏（止损/止盈轮询路径）
    pub async fn add_realized_pnl(&self, pnl: f64) {
        self.on_close("__pnl_only__", pnl).await;
    }

    pub async fn open_position_for(&self, ticker: &str) -> Option<PositionRisk> {
        self.state.lock().await.open.get(ticker).cloned()
    }

    pub async fn open_positions(&self) -> Vec<PositionRisk> {
        self.state.lock().await.open.values().cloned().collect()
    }

    /// 日界重置：计数清零、断路器闭合（美东午夜任务调用）
    pub async fn reset_daily(&self, equity: f64) {
        let mut state = self.state.lock().await;
        state.daily_realized_pnl = 0.0;
        state.kill_switch = false;
        if equity > 0.0 {
            state.equity = self.settings.sizing_equity_usd().unwrap_or(equity);
        }
        info!("风控日界重置完成, equity=${:.0}", state.equity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading::engine::regime::RegimeType;

    fn candidate(ticker: &str, id: &str, entry: f64, stop: f64) -> CandidateSignal {
        CandidateSignal {
            id: id.to_string(),
            ticker: ticker.to_string(),
            side: if stop < entry { Side::Buy } else { Side::Sell },
            score: 0.4,
            tech_score: 0.4,
            sentiment_score: 0.0,
            confidence: 1.0,
            regime: RegimeType::Trend,
            horizon_minutes: 120,
            entry_ref_price: entry,
            stop_price: stop,
            target_price: entry + (entry - stop) * 2.0,
            trigger_tag: "test".to_string(),
            edgar_override: false,
            bar_ts: 0,
            created_at: 0,
        }
    }

    fn settings_plain() -> Settings {
        let mut s = Settings::from_env();
        // 测试里用账户权益直接做基数
        s.sizing_equity_mode = "account".to_string();
        s.max_notional_per_trade_krw = f64::MAX;
        s
    }

    #[test]
    fn sizing_respects_risk_and_slot_caps() {
        let settings = settings_plain();
        // equity=100k, risk 0.8% => $800, 止损距离 $2 => 400股
        let sized =
            compute_position_size(&settings, 100_000.0, 100.0, 98.0, 1.0, 0, false).unwrap();
        // 槽位上限: 100k*0.8/3/100 ≈ 266股，比风险约束更紧
        assert_eq!(sized.qty, 266.0);
        assert!(sized.risk_pct > 0.0);

        // 已有2仓时剩余槽位=1，敞口反而放宽
        let sized2 =
            compute_position_size(&settings, 100_000.0, 100.0, 98.0, 1.0, 2, false).unwrap();
        assert_eq!(sized2.qty, 400.0);
    }

    #[test]
    fn leveraged_etf_size_shrunk() {
        let settings = settings_plain();
        let normal =
            compute_position_size(&settings, 100_000.0, 20.0, 19.4, 1.0, 2, false).unwrap();
        let shrunk = compute_position_size(&settings, 100_000.0, 20.0, 19.4, 1.0, 2, true).unwrap();
        assert!(shrunk.qty < normal.qty);
        assert!((shrunk.qty - (normal.qty * 0.5).floor()).abs() <= 1.0);
    }

    #[tokio::test]
    async fn concurrent_risk_exact_cap_accepted_above_rejected() {
        let mut settings = settings_plain();
        settings.max_concurrent_risk = 0.02;
        settings.risk_per_trade = 0.01;
        settings.max_positions = 10;
        settings.position_min_slots = 1;
        let rm = RiskManager::new(settings, 100_000.0);

        // 每单风险恰好1%：两单到上限，第三单被拒
        let c1 = candidate("AAPL", "s1", 100.0, 99.0); // size_risk=1000*? risk 0.01*100k=1000/1=1000股 → cap 敞口 0.8*100k/1/100=800股 → risk_pct=800*1/100k=0.8%
        let s1 = rm.check_and_reserve(&c1).await.unwrap();
        let c2 = candidate("MSFT", "s2", 100.0, 99.0);
        let s2 = rm.check_and_reserve(&c2).await.unwrap();
        let used = s1.risk_pct + s2.risk_pct;
        assert!(used <= 0.02 + 1e-9);

        let c3 = candidate("NVDA", "s3", 100.0, 99.0);
        let res = rm.check_and_reserve(&c3).await;
        assert!(matches!(res, Err(SuppressReason::RiskFeasibility)));
    }

    #[tokio::test]
    async fn daily_loss_projection_blocks_new_risk() {
        let mut settings = settings_plain();
        settings.daily_loss_limit = 0.02;
        settings.position_min_slots = 1;
        let rm = RiskManager::new(settings, 100_000.0);

        // 当日已亏1.98%
        rm.add_realized_pnl(-1_980.0).await;
        assert!(!rm.kill_switch_active().await);

        // 新候选约0.5%风险：潜在亏损穿透2%限度 → 拒
        let c = candidate("AAPL", "s1", 100.0, 99.2);
        let res = rm.check_and_reserve(&c).await;
        assert!(matches!(res, Err(SuppressReason::RiskFeasibility)));

        // 再亏到 -2.00%：断路器触发
        rm.add_realized_pnl(-20.0).await;
        assert!(rm.kill_switch_active().await);
        let c2 = candidate("MSFT", "s2", 100.0, 99.9);
        assert!(matches!(
            rm.check_and_reserve(&c2).await,
            Err(SuppressReason::KillSwitch)
        ));
    }

    #[tokio::test]
    async fn reservation_released_on_failure_and_confirmed_on_fill() {
        let settings = settings_plain();
        let rm = RiskManager::new(settings, 100_000.0);

        let c = candidate("AAPL", "s1", 100.0, 98.0);
        let sized = rm.check_and_reserve(&c).await.unwrap();
        assert!(rm.snapshot().await.current_risk_pct > 0.0);

        rm.release_reservation("s1").await;
        assert_eq!(rm.snapshot().await.current_risk_pct, 0.0);

        // 再预留并确认成交
        let c2 = candidate("AAPL", "s2", 100.0, 98.0);
        let _ = rm.check_and_reserve(&c2).await.unwrap();
        rm.on_fill("s2", 100.1, sized.qty).await;
        let snap = rm.snapshot().await;
        assert_eq!(snap.open_positions, 1);
        assert!(snap.current_risk_pct > 0.0);

        // 平仓释放风险
        rm.on_close("AAPL", 50.0).await;
        let snap = rm.snapshot().await;
        assert_eq!(snap.open_positions, 0);
        assert_eq!(snap.current_risk_pct, 0.0);
    }

    #[tokio::test]
    async fn max_positions_enforced() {
        let mut settings = settings_plain();
        settings.max_positions = 1;
        let rm = RiskManager::new(settings, 100_000.0);

        let c1 = candidate("AAPL", "s1", 100.0, 99.0);
        rm.check_and_reserve(&c1).await.unwrap();
        let c2 = candidate("MSFT", "s2", 100.0, 99.0);
        assert!(matches!(
            rm.check_and_reserve(&c2).await,
            Err(SuppressReason::RiskFeasibility)
        ));
    }
}
