pub mod export_use_case;
pub mod ingest_use_case;
pub mod ports;

pub use export_use_case::{ExportReport, ExportUseCase};
pub use ingest_use_case::{FileFailure, IngestReport, IngestUseCase};
