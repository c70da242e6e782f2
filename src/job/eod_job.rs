// 收盘平仓与日终任务

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::info;

use crate::time_util::{self, Clock};
use crate::trading::services::eod_service::EodService;

/// EOD 编排：窗口内平仓（可重复执行），收盘后补一次日终汇总
pub struct EodJob {
    service: Arc<EodService>,
    clock: Arc<dyn Clock>,
    summary_written_day: Mutex<String>,
}

impl EodJob {
    pub fn new(service: Arc<EodService>, clock: Arc<dyn Clock>) -> Self {
        Self {
            service,
            clock,
            summary_written_day: Mutex::new(String::new()),
        }
    }

    /// 每分钟巡检：EOD窗口 → 平仓；OPG窗口 → 清残留
    pub async fn run(&self) -> Result<()> {
        let closed = self.service.run_eod_flatten().await?;
        if closed > 0 {
            info!("EOD平仓完成: {}笔", closed);
        }
        let cleaned = self.service.run_opg_cleanup().await?;
        if cleaned > 0 {
            info!("OPG清理完成: {}笔", cleaned);
        }

        // 收盘后（美东16:05之后）写一次日终汇总
        let now = self.clock.now_ms();
        let et = time_util::to_eastern(now);
        use chrono::Timelike;
        let minutes = et.hour() * 60 + et.minute();
        if minutes >= 16 * 60 + 5 {
            let today = time_util::day_key(now);
            let mut written = self.summary_written_day.lock().await;
            if *written != today {
                *written = today;
                drop(written);
                self.service.write_eod_summary().await?;
            }
        }
        Ok(())
    }
}
