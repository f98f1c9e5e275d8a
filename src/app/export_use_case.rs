use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument};

use crate::app::ports::ExportSinkPort;
use crate::error::Result;
use crate::pipeline::analysis::{AnalysisEngine, AnalysisFilters, SummaryEnvelope};

#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    pub path: PathBuf,
    pub groups: usize,
    pub bytes: usize,
}

/// Publish the unfiltered quarter-level analysis as a static document in the
/// same shape the HTTP API returns.
pub struct ExportUseCase {
    engine: AnalysisEngine,
    sink: Arc<dyn ExportSinkPort>,
}

impl ExportUseCase {
    pub fn new(engine: AnalysisEngine, sink: Arc<dyn ExportSinkPort>) -> Self {
        Self { engine, sink }
    }

    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<ExportReport> {
        let result = self.engine.analyze(&AnalysisFilters::default()).await?;
        let bytes = serde_json::to_vec_pretty(&SummaryEnvelope::success(&result))?;
        let size = bytes.len();
        let path = self.sink.publish(bytes).await?;
        info!("Exported {} group(s) to {}", result.len(), path.display());
        Ok(ExportReport {
            path,
            groups: result.len(),
            bytes: size,
        })
    }
}
