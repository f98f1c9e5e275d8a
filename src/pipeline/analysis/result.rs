use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::filters::AnalysisFilters;

/// One analytical group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub province: String,
    /// `None` above municipality granularity
    pub municipality: Option<String>,
    /// `None` above year granularity and for registry-only groups
    pub year: Option<i64>,
    pub quarter: Option<i64>,
    pub incident_count: usize,
    pub total_farmers_affected: i64,
    pub total_registered_farmers: i64,
    /// affected / registered; `None` when nothing is registered
    pub percentage_farmers_affected: Option<f64>,
    pub losses_php_grand_total: f64,
    pub area_total_affected_ha: f64,
    pub total_declared_rice_area_ha: f64,
    /// Whether any municipality of the group has registry rows
    pub registry_matched: bool,
}

/// Ordered groups plus the context they were computed in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateResult {
    pub generated_at: DateTime<Utc>,
    pub filters: AnalysisFilters,
    pub incident_table_version: u64,
    /// `None` when the registry table does not exist yet
    pub registry_table_version: Option<u64>,
    pub groups: Vec<AggregateRecord>,
}

impl AggregateResult {
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Response document shared by the HTTP API and the static export.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryEnvelope<'a> {
    pub status: &'static str,
    pub count: usize,
    pub data: &'a AggregateResult,
}

impl<'a> SummaryEnvelope<'a> {
    pub fn success(result: &'a AggregateResult) -> Self {
        Self {
            status: "success",
            count: result.len(),
            data: result,
        }
    }
}
