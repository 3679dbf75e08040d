pub mod aggregator;
pub mod conversion;
pub mod pipeline;
pub mod scheduler;
pub mod storage;
pub mod transcoder;
