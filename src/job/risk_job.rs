// 风险监控任务

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::trading::adapter::TradingAdapter;
use crate::trading::engine::risk_manager::RiskManager;
use crate::trading::services::notify::Notifier;

/// 周期风险巡检：同步权益、输出台账快照，接近限度时告警
pub struct RiskJob {
    broker: Arc<dyn TradingAdapter>,
    risk: Arc<RiskManager>,
    notifier: Arc<Notifier>,
    daily_loss_limit: f64,
}

impl RiskJob {
    pub fn new(
        broker: Arc<dyn TradingAdapter>,
        risk: Arc<RiskManager>,
        notifier: Arc<Notifier>,
        daily_loss_limit: f64,
    ) -> Self {
        Self {
            broker,
            risk,
            notifier,
            daily_loss_limit,
        }
    }

    pub async fn run(&self) -> Result<()> {
        // 获取当前账户资产
        match self.broker.get_account().await {
            Ok(account) => {
                self.risk.sync_equity(account.equity).await;
            }
            Err(e) => {
                warn!("获取账户资产失败: {}", e);
            }
        }

        let snapshot = self.risk.snapshot().await;
        info!(
            "风险快照: equity=${:.0} 并发风险{:.2}% 持仓{} 当日盈亏{:+.2}% 断路器{}",
            snapshot.equity,
            snapshot.current_risk_pct * 100.0,
            snapshot.open_positions,
            snapshot.daily_realized_pnl_pct * 100.0,
            if snapshot.kill_switch { "开" } else { "关" }
        );

        // 接近日亏限度80%时提前告警
        let warning_level = self.daily_loss_limit * 0.8;
        if snapshot.daily_realized_pnl_pct <= -warning_level && !snapshot.kill_switch {
            self.notifier
                .send_risk_alert(&format!(
                    "当日亏损接近限度: {:.2}% (限度 {:.2}%)",
                    snapshot.daily_realized_pnl_pct * 100.0,
                    self.daily_loss_limit * 100.0
                ))
                .await;
        }
        if snapshot.kill_switch {
            self.notifier
                .send_risk_alert("日亏断路器已触发，今日停止新开仓")
                .await;
        }
        Ok(())
    }
}
