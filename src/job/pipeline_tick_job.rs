// 快tick任务：止损/止盈轮询

use std::sync::Arc;

use anyhow::Result;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use crate::trading::services::pipeline_service::SignalPipeline;

const FAST_TICK_SOFT_LIMIT_SECS: u64 = 12;

pub struct PipelineTickJob {
    pipeline: Arc<SignalPipeline>,
}

impl PipelineTickJob {
    pub fn new(pipeline: Arc<SignalPipeline>) -> Self {
        Self { pipeline }
    }

    pub async fn run(&self) -> Result<()> {
        match timeout(
            Duration::from_secs(FAST_TICK_SOFT_LIMIT_SECS),
            self.pipeline.check_stop_targets(),
        )
        .await
        {
            Ok(closed) => {
                if closed > 0 {
                    debug!("快tick平仓{}笔", closed);
                }
            }
            Err(_) => {
                warn!("快tick超时({}秒)", FAST_TICK_SOFT_LIMIT_SECS);
            }
        }
        Ok(())
    }
}
