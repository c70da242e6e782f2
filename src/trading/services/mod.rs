pub mod eod_service;
pub mod notify;
pub mod pipeline_service;
