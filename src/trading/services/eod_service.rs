use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use crate::app_config::redis as keys;
use crate::app_config::settings::Settings;
use crate::time_util::{self, Clock};
use crate::trading::adapter::{Side, TradingAdapter};
use crate::trading::cache::daily_counter::DailyCounters;
use crate::trading::cache::kv::KvStore;
use crate::trading::engine::risk_manager::RiskManager;
use crate::trading::model::metrics_daily::{MetricsDaily, MetricsDailyModel};
use crate::trading::order::dispatcher::{DispatchOutcome, OrderDispatcher, OrderIntent};
use crate::trading::services::notify::Notifier;

/// 收盘平仓与日终汇总。窗口内可重复执行：
/// 幂等键按 (日期, 标的) 派发，已平仓位的重复平仓是空操作。
/// 断路器触发不影响本服务，该平的仓照平
pub struct EodService {
    settings: Settings,
    clock: Arc<dyn Clock>,
    broker: Arc<dyn TradingAdapter>,
    dispatcher: Arc<OrderDispatcher>,
    risk: Arc<RiskManager>,
    counters: Arc<DailyCounters>,
    kv: Arc<dyn KvStore>,
    notifier: Arc<Notifier>,
}

impl EodService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Settings,
        clock: Arc<dyn Clock>,
        broker: Arc<dyn TradingAdapter>,
        dispatcher: Arc<OrderDispatcher>,
        risk: Arc<RiskManager>,
        counters: Arc<DailyCounters>,
        kv: Arc<dyn KvStore>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            settings,
            clock,
            broker,
            dispatcher,
            risk,
            counters,
            kv,
            notifier,
        }
    }

    /// 收盘前窗口内平掉所有持仓。窗口外调用是空操作
    pub async fn run_eod_flatten(&self) -> anyhow::Result<usize> {
        let now = self.clock.now_ms();
        if !time_util::is_eod_flatten_window(
            now,
            self.settings.eod_flatten_minutes,
            &self.settings.market_holidays,
        ) {
            return Ok(0);
        }
        info!("进入EOD平仓窗口");
        self.flatten_all("eod").await
    }

    /// 开盘竞价窗口清理隔夜残留
    pub async fn run_opg_cleanup(&self) -> anyhow::Result<usize> {
        let now = self.clock.now_ms();
        if !time_util::is_opg_cleanup_window(now, &self.settings.market_holidays) {
            return Ok(0);
        }
        info!("进入OPG清理窗口");
        self.flatten_all("opg").await
    }

    /// 枚举券商持仓逐一市价平掉。重复调用由幂等键挡住
    async fn flatten_all(&self, prefix: &str) -> anyhow::Result<usize> {
        let positions = self.broker.get_positions().await?;
        let mut closed = 0;

        for position in positions {
            if position.qty == 0.0 {
                continue;
            }
            let side = if position.qty > 0.0 {
                Side::Sell
            } else {
                Side::Buy
            };
            let intent = OrderIntent {
                source_id: format!("{}-{}", prefix, position.ticker),
                exec_symbol: position.ticker.clone(),
                side,
                qty: position.qty.abs(),
                entry_ref_price: position.avg_price,
                bracket: None,
            };
            match self.dispatcher.dispatch(&intent).await? {
                DispatchOutcome::Submitted(ack) => {
                    let exit = ack.fill_price.unwrap_or(position.avg_price);
                    let realized = (exit - position.avg_price) * position.qty;
                    self.risk.on_close(&position.ticker, realized).await;
                    info!(
                        "{}平仓: {} {}股 @ {:.2}",
                        prefix,
                        position.ticker,
                        position.qty.abs(),
                        exit
                    );
                    closed += 1;
                }
                DispatchOutcome::Duplicate => {
                    // 本窗口已平过，空操作
                }
                other => {
                    warn!("{}平仓未成交: {} {:?}", prefix, position.ticker, other);
                }
            }
        }
        Ok(closed)
    }

    /// 日终汇总：计数 + 组合快照，写 KV 与审计表，并播报
    pub async fn write_eod_summary(&self) -> anyhow::Result<()> {
        let now = self.clock.now_ms();
        let ymd = time_util::day_key(now);

        let signals_raw = self.counters.stat("signals_raw").await.unwrap_or(0);
        let orders_submitted = self.counters.stat("orders_submitted").await.unwrap_or(0);
        let fills = self.counters.stat("fills").await.unwrap_or(0);
        let llm_calls = self.counters.llm_call_count().await.unwrap_or(0);
        let risk = self.risk.snapshot().await;

        let summary = json!({
            "date": ymd,
            "counts": {
                "signals_raw": signals_raw,
                "orders_submitted": orders_submitted,
                "fills": fills,
                "llm_calls": llm_calls,
            },
            "portfolio": {
                "equity": risk.equity,
                "open_positions": risk.open_positions,
                "daily_realized_pnl_pct": risk.daily_realized_pnl_pct,
                "kill_switch": risk.kill_switch,
            },
        });

        self.kv
            .set_string(&keys::eod_report_key(&ymd), &summary.to_string())
            .await?;
        self.kv.set_string("reports:eod:last", &ymd).await?;

        if let Some(model) = MetricsDailyModel::new() {
            let row = MetricsDaily {
                date: ymd.clone(),
                trades: fills,
                winrate: String::new(),
                pnl: format!("{:.4}", risk.daily_realized_pnl_pct),
                drawdown: String::new(),
                llm_calls,
            };
            if let Err(e) = model.add(&row).await {
                warn!("metrics_daily 落库失败: {}", e);
            }
        }

        self.notifier
            .send_text(&format!(
                "📅 日终汇总 {}: 信号{} 下单{} 成交{} LLM{}次, 当日盈亏 {:+.2}%",
                ymd,
                signals_raw,
                orders_submitted,
                fills,
                llm_calls,
                risk.daily_realized_pnl_pct * 100.0
            ))
            .await;
        Ok(())
    }
}
