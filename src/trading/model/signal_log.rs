extern crate rbatis;

use rbatis::{crud, RBatis};
use rbatis::rbdc::db::ExecResult;
use serde_json::json;
use tracing::debug;

use crate::app_config::db;

/// CREATE TABLE `signal_log` (
//   `id` int NOT NULL AUTO_INCREMENT,
//   `ts` bigint NOT NULL,
//   `ticker` varchar(16) NOT NULL,
//   `regime` varchar(16) NOT NULL,
//   `tech` varchar(32) NOT NULL,
//   `sentiment` varchar(32) NOT NULL,
//   `score` varchar(32) NOT NULL,
//   `reason_or_emit` varchar(32) NOT NULL,
//   `horizon_min` int NOT NULL,
//   `override_flag` tinyint NOT NULL,
//   `created_at` datetime NOT NULL DEFAULT CURRENT_TIMESTAMP,
//   PRIMARY KEY (`id`)
// ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4;
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct SignalLog {
    pub ts: i64,
    pub ticker: String,
    pub regime: String,
    pub tech: String,
    pub sentiment: String,
    pub score: String,
    pub reason_or_emit: String,
    pub horizon_min: i64,
    pub override_flag: i32,
}

crud!(SignalLog {});

pub struct SignalLogModel {
    db: &'static RBatis,
}

impl SignalLogModel {
    /// 审计库未配置时返回 None，调用方跳过
    pub fn new() -> Option<SignalLogModel> {
        db::get_db_client().map(|db| Self { db })
    }

    pub async fn add(&self, row: &SignalLog) -> anyhow::Result<ExecResult> {
        let data = SignalLog::insert(self.db, row).await?;
        debug!("insert_signal_log_result = {}", json!(data));
        Ok(data)
    }
}
