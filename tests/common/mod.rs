#![allow(dead_code)]

use std::sync::Arc;

use chrono::TimeZone;

use equity_quant::app_config::settings::Settings;
use equity_quant::time_util::{Clock, FixedClock};
use equity_quant::trading::adapter::paper_ledger::PaperLedgerAdapter;
use equity_quant::trading::cache::daily_counter::DailyCounters;
use equity_quant::trading::cache::kv::MemoryKvStore;
use equity_quant::trading::cache::locks::{
    CooldownGate, DirectionLockGuard, DupEventGate, EtfLockGuard,
};
use equity_quant::trading::engine::basket::BasketAggregator;
use equity_quant::trading::engine::llm_gate::LlmInsightGate;
use equity_quant::trading::engine::risk_manager::RiskManager;
use equity_quant::trading::engine::suppression::SuppressionChain;
use equity_quant::trading::market::bar_store::BarStore;
use equity_quant::trading::order::dispatcher::OrderDispatcher;
use equity_quant::trading::services::eod_service::EodService;
use equity_quant::trading::services::notify::Notifier;
use equity_quant::trading::services::pipeline_service::SignalPipeline;
use equity_quant::Bar;

/// 确定性测试装置：固定时钟 + 进程内KV + 纸面券商，全链路不出进程
pub struct Harness {
    pub settings: Settings,
    pub clock: Arc<FixedClock>,
    pub kv: Arc<MemoryKvStore>,
    pub bar_store: Arc<BarStore>,
    pub broker: Arc<PaperLedgerAdapter>,
    pub risk: Arc<RiskManager>,
    pub counters: Arc<DailyCounters>,
    pub dispatcher: Arc<OrderDispatcher>,
    pub pipeline: Arc<SignalPipeline>,
    pub eod: Arc<EodService>,
}

/// 2026-03-06（周五）10:00 美东，RTH 时段
pub fn rth_ts() -> i64 {
    chrono_tz::America::New_York
        .with_ymd_and_hms(2026, 3, 6, 10, 0, 0)
        .unwrap()
        .timestamp_millis()
}

/// 收盘前5分钟
pub fn eod_window_ts() -> i64 {
    chrono_tz::America::New_York
        .with_ymd_and_hms(2026, 3, 6, 15, 55, 30)
        .unwrap()
        .timestamp_millis()
}

pub fn build_harness(mutate: impl FnOnce(&mut Settings)) -> Harness {
    let mut settings = Settings::from_env();
    // 测试基线：真实派发到纸面台账，权益按账户计，名义上限不干扰
    settings.auto_mode = true;
    settings.sizing_equity_mode = "account".to_string();
    settings.max_notional_per_trade_krw = f64::MAX;
    mutate(&mut settings);

    let clock = FixedClock::new(rth_ts());
    let kv = Arc::new(MemoryKvStore::new(clock.clone()));
    let bar_store = BarStore::new();
    let broker = Arc::new(PaperLedgerAdapter::new(clock.clone(), 100_000.0));
    let counters = Arc::new(DailyCounters::new(kv.clone(), clock.clone()));
    let notifier = Arc::new(Notifier::from_env());

    let llm_gate = Arc::new(LlmInsightGate::new(
        settings.clone(),
        kv.clone(),
        counters.clone(),
        clock.clone(),
        None,
    ));
    let suppression = Arc::new(SuppressionChain::new(
        settings.clone(),
        CooldownGate::new(kv.clone()),
        DirectionLockGuard::new(kv.clone()),
        DupEventGate::new(kv.clone(), clock.clone()),
        counters.clone(),
    ));
    let basket = Arc::new(BasketAggregator::new(
        &settings,
        EtfLockGuard::new(kv.clone()),
        clock.clone(),
    ));
    let risk = Arc::new(RiskManager::new(settings.clone(), 100_000.0));
    let dispatcher = Arc::new(OrderDispatcher::new(
        broker.clone(),
        kv.clone(),
        clock.clone(),
        settings.auto_mode,
    ));
    let pipeline = Arc::new(SignalPipeline::new(
        settings.clone(),
        clock.clone(),
        kv.clone(),
        bar_store.clone(),
        llm_gate,
        suppression,
        basket,
        risk.clone(),
        dispatcher.clone(),
        broker.clone(),
        counters.clone(),
        notifier.clone(),
    ));
    let eod = Arc::new(EodService::new(
        settings.clone(),
        clock.clone(),
        broker.clone(),
        dispatcher.clone(),
        risk.clone(),
        counters.clone(),
        kv.clone(),
        notifier,
    ));

    Harness {
        settings,
        clock,
        kv,
        bar_store,
        broker,
        risk,
        counters,
        dispatcher,
        pipeline,
        eod,
    }
}

/// 以当前时钟为终点回填 n 根30秒K线，价格按 step 单调变化
pub fn seed_bars(h: &Harness, ticker: &str, n: usize, start_price: f64, step: f64) {
    let end_ts = h.clock.now_ms() / 30_000 * 30_000;
    let start_ts = end_ts - (n as i64 - 1) * 30_000;
    for i in 0..n {
        let price = start_price + step * i as f64;
        let bar = Bar::builder()
            .ts(start_ts + i as i64 * 30_000)
            .o(price)
            .h(price + price.abs() * 0.001 + 0.05)
            .l(price - price.abs() * 0.001 - 0.05)
            .c(price)
            .v(1_000.0 + (i % 3) as f64 * 100.0)
            .spread_est(0.02)
            .build()
            .unwrap();
        h.bar_store.append_bar(ticker, bar);
    }
}

/// 推进一个tick并给每票补一根延续趋势的新K线
pub fn advance_tick(h: &Harness, tickers: &[(&str, f64)], secs: i64) {
    h.clock.advance_secs(secs);
    let ts = h.clock.now_ms() / 30_000 * 30_000;
    for (ticker, price) in tickers {
        let bar = Bar::builder()
            .ts(ts)
            .o(*price)
            .h(price + 0.1)
            .l(price - 0.1)
            .c(*price)
            .v(1_100.0)
            .spread_est(0.02)
            .build()
            .unwrap();
        h.bar_store.append_bar(ticker, bar);
    }
}
