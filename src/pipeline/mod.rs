// Lakehouse pipeline: ingestion -> normalization -> storage -> analysis

pub mod analysis;
pub mod ingestion;
pub mod processing;
pub mod storage;
