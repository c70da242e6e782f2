// 行情轮询任务

use std::sync::Arc;

use anyhow::Result;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use crate::trading::market::quote_ingestor::QuoteIngestor;

/// 单tick软超时：超时任务被取消，下个tick干净重入
const QUOTE_TICK_SOFT_LIMIT_SECS: u64 = 12;

pub struct QuoteJob {
    ingestor: Arc<QuoteIngestor>,
}

impl QuoteJob {
    pub fn new(ingestor: Arc<QuoteIngestor>) -> Self {
        Self { ingestor }
    }

    pub async fn run(&self) -> Result<()> {
        match timeout(
            Duration::from_secs(QUOTE_TICK_SOFT_LIMIT_SECS),
            self.ingestor.poll_tick(),
        )
        .await
        {
            Ok(updated) => {
                debug!("行情tick完成: {}票更新", updated);
            }
            Err(_) => {
                warn!("行情tick超时({}秒)，放弃本轮", QUOTE_TICK_SOFT_LIMIT_SECS);
            }
        }
        Ok(())
    }
}
