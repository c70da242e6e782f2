use once_cell::sync::OnceCell;
use rbatis::RBatis;
use rbdc_mysql::MysqlDriver;
use std::env;
use std::time::Duration;
use tracing::{error, info, warn};

static DB_CLIENT: OnceCell<RBatis> = OnceCell::new();

pub async fn init_db() -> Option<&'static RBatis> {
    info!("Initializing audit database connection pool...");
    // 审计库可选：未配置 DB_HOST 时核心照常运行，只是不落审计表
    let db_host = match env::var("DB_HOST") {
        Ok(v) => v,
        Err(_) => {
            warn!("DB_HOST 未配置，审计表写入停用");
            return None;
        }
    };
    let rb = RBatis::new();
    let max_connections = env::var("DB_MAX_CONNECTIONS")
        .unwrap_or_else(|_| "50".to_string())
        .parse::<u32>()
        .expect("DB_MAX_CONNECTIONS must be a number");
    // 连接数据库
    match rb.link(MysqlDriver {}, &db_host).await {
        Ok(_) => info!("Successfully connected to database"),
        Err(e) => {
            error!("Failed to connect to database: {}", e);
            return None;
        }
    }

    // 配置连接池
    if let Ok(pool) = rb.get_pool() {
        pool.set_max_open_conns(max_connections as u64).await;
        pool.set_max_idle_conns(max_connections as u64 / 2).await;
        pool.set_conn_max_lifetime(Some(Duration::from_secs(3600))).await;
        info!(
            "Connection pool configured with {} max connections",
            max_connections
        );
    }

    match DB_CLIENT.set(rb) {
        Ok(_) => info!("DB_CLIENT initialized successfully"),
        Err(_) => {
            warn!("DB_CLIENT already initialized");
        }
    }

    DB_CLIENT.get()
}

/// 取审计库连接；未初始化时返回 None，调用方跳过落库
pub fn get_db_client() -> Option<&'static RBatis> {
    DB_CLIENT.get()
}
