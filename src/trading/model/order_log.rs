extern crate rbatis;

use rbatis::{crud, RBatis};
use rbatis::rbdc::db::ExecResult;
use serde_json::json;
use tracing::debug;

use crate::app_config::db;

/// CREATE TABLE `order_log` (
//   `id` int NOT NULL AUTO_INCREMENT,
//   `ts` bigint NOT NULL,
//   `ticker` varchar(16) NOT NULL,
//   `side` varchar(8) NOT NULL,
//   `qty` varchar(32) NOT NULL,
//   `entry` varchar(32) NOT NULL,
//   `stop` varchar(32) NOT NULL,
//   `target` varchar(32) NOT NULL,
//   `idem_key` varchar(128) NOT NULL,
//   `status` varchar(32) NOT NULL,
//   PRIMARY KEY (`id`)
// ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4;
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct OrderLog {
    pub ts: i64,
    pub ticker: String,
    pub side: String,
    pub qty: String,
    pub entry: String,
    pub stop: String,
    pub target: String,
    pub idem_key: String,
    pub status: String,
}

crud!(OrderLog {});

pub struct OrderLogModel {
    db: &'static RBatis,
}

impl OrderLogModel {
    pub fn new() -> Option<OrderLogModel> {
        db::get_db_client().map(|db| Self { db })
    }

    pub async fn add(&self, row: &OrderLog) -> anyhow::Result<ExecResult> {
        let data = OrderLog::insert(self.db, row).await?;
        debug!("insert_order_log_result = {}", json!(data));
        Ok(data)
    }
}
