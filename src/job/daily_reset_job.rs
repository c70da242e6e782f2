// 日界重置任务

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::info;

use crate::time_util::{self, Clock};
use crate::trading::adapter::TradingAdapter;
use crate::trading::engine::risk_manager::RiskManager;

/// 美东日历日翻转时恰好重置一次：风控台账清零、断路器闭合。
/// 当日计数键本身带TTL，翻转时自动过期
pub struct DailyResetJob {
    clock: Arc<dyn Clock>,
    broker: Arc<dyn TradingAdapter>,
    risk: Arc<RiskManager>,
    last_day: Mutex<String>,
}

impl DailyResetJob {
    pub fn new(
        clock: Arc<dyn Clock>,
        broker: Arc<dyn TradingAdapter>,
        risk: Arc<RiskManager>,
    ) -> Self {
        let today = time_util::day_key(clock.now_ms());
        Self {
            clock,
            broker,
            risk,
            last_day: Mutex::new(today),
        }
    }

    /// 每分钟巡检一次日界。返回是否触发了重置
    pub async fn run(&self) -> Result<bool> {
        let today = time_util::day_key(self.clock.now_ms());
        let mut last = self.last_day.lock().await;
        if *last == today {
            return Ok(false);
        }
        info!("美东日界翻转: {} -> {}，执行日重置", *last, today);
        *last = today;
        drop(last);

        let equity = self
            .broker
            .get_account()
            .await
            .map(|a| a.equity)
            .unwrap_or(0.0);
        self.risk.reset_daily(equity).await;
        Ok(true)
    }
}
