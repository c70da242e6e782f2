pub mod bar_store;
pub mod quote_ingestor;
pub mod tier;
