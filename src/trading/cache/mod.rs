pub mod daily_counter;
pub mod kv;
pub mod locks;
pub mod rate_limiter;
