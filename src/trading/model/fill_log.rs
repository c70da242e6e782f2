extern crate rbatis;

use rbatis::{crud, RBatis};
use rbatis::rbdc::db::ExecResult;

use crate::app_config::db;

/// CREATE TABLE `fill_log` (
//   `id` int NOT NULL AUTO_INCREMENT,
//   `order_id` varchar(64) NOT NULL,
//   `ts` bigint NOT NULL,
//   `price` varchar(32) NOT NULL,
//   `qty` varchar(32) NOT NULL,
//   PRIMARY KEY (`id`)
// ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4;
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct FillLog {
    pub order_id: String,
    pub ts: i64,
    pub price: String,
    pub qty: String,
}

crud!(FillLog {});

pub struct FillLogModel {
    db: &'static RBatis,
}

impl FillLogModel {
    pub fn new() -> Option<FillLogModel> {
        db::get_db_client().map(|db| Self { db })
    }

    pub async fn add(&self, row: &FillLog) -> anyhow::Result<ExecResult> {
        let data = FillLog::insert(self.db, row).await?;
        Ok(data)
    }
}
