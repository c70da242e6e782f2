pub mod daily_reset_job;
pub mod eod_job;
pub mod pipeline_tick_job;
pub mod quote_job;
pub mod risk_job;
pub mod signal_job;

pub use daily_reset_job::DailyResetJob;
pub use eod_job::EodJob;
pub use pipeline_tick_job::PipelineTickJob;
pub use quote_job::QuoteJob;
pub use risk_job::RiskJob;
pub use signal_job::SignalJob;
