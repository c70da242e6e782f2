pub mod fill_log;
pub mod metrics_daily;
pub mod order_log;
pub mod signal_log;
