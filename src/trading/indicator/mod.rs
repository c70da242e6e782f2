pub mod adx;
pub mod atr;
pub mod rma;
pub mod rsi_indicator;
pub mod snapshot;
pub mod volume_indicator;
pub mod vwap_indicator;
