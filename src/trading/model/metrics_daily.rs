extern crate rbatis;

use rbatis::{crud, RBatis};
use rbatis::rbdc::db::ExecResult;
use serde_json::json;
use tracing::debug;

use crate::app_config::db;

/// CREATE TABLE `metrics_daily` (
//   `id` int NOT NULL AUTO_INCREMENT,
//   `date` varchar(16) NOT NULL,
//   `trades` int NOT NULL,
//   `winrate` varchar(32) NOT NULL,
//   `pnl` varchar(32) NOT NULL,
//   `drawdown` varchar(32) NOT NULL,
//   `llm_calls` int NOT NULL,
//   PRIMARY KEY (`id`)
// ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4;
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct MetricsDaily {
    pub date: String,
    pub trades: i64,
    pub winrate: String,
    pub pnl: String,
    pub drawdown: String,
    pub llm_calls: i64,
}

crud!(MetricsDaily {});

pub struct MetricsDailyModel {
    db: &'static RBatis,
}

impl MetricsDailyModel {
    pub fn new() -> Option<MetricsDailyModel> {
        db::get_db_client().map(|db| Self { db })
    }

    pub async fn add(&self, row: &MetricsDaily) -> anyhow::Result<ExecResult> {
        let data = MetricsDaily::insert(self.db, row).await?;
        debug!("insert_metrics_daily_result = {}", json!(data));
        Ok(data)
    }
}
