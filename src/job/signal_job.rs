// 信号生成任务（按层节奏触发）

use std::sync::Arc;

use anyhow::Result;
use tokio::time::{timeout, Duration};
use tracing::{info, warn};

use crate::trading::services::pipeline_service::SignalPipeline;

/// 信号生成软超时
const SIGNAL_PASS_SOFT_LIMIT_SECS: u64 = 90;

pub struct SignalJob {
    pipeline: Arc<SignalPipeline>,
}

impl SignalJob {
    pub fn new(pipeline: Arc<SignalPipeline>) -> Self {
        Self { pipeline }
    }

    /// 对给定标的跑一轮信号pass
    pub async fn run(&self, tickers: &[String]) -> Result<()> {
        if tickers.is_empty() {
            return Ok(());
        }
        let started = std::time::Instant::now();
        match timeout(
            Duration::from_secs(SIGNAL_PASS_SOFT_LIMIT_SECS),
            self.pipeline.run_signal_pass(tickers),
        )
        .await
        {
            Ok(summary) => {
                info!(
                    "信号任务完成: {}票, 发射{}, 耗时{}ms",
                    tickers.len(),
                    summary.emitted,
                    started.elapsed().as_millis()
                );
            }
            Err(_) => {
                warn!(
                    "信号任务超时({}秒)，放弃本轮: {}票",
                    SIGNAL_PASS_SOFT_LIMIT_SECS,
                    tickers.len()
                );
            }
        }
        Ok(())
    }
}
