//! Join/aggregation over the incident and registry tables.
//!
//! Incidents are the anchor of a left join on (province, municipality). The
//! registry side is pre-aggregated per municipality, so a group counts each
//! joined municipality's registered farmers once no matter how many incidents
//! it has. Join keys are compared as stored; a key that is not in normalized
//! form fails the query instead of being silently re-normalized.
//!
//! Registry-only groups (no incidents, zero affected) are produced only when
//! the caller names a province or municipality, applies no year, quarter,
//! category or date filter, and groups at municipality level or finer. They
//! carry no year or quarter, which keeps `F + {year}` a subset of `F`. At
//! province level they would fold into incident groups and change their
//! registered totals.

pub mod filters;
pub mod result;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::constants::{INCIDENT_TABLE, MUNICIPALITY_COLUMN, PROVINCE_COLUMN, REGISTRY_TABLE};
use crate::error::{LakehouseError, Result};
use crate::pipeline::processing::normalize::is_normalized;
use crate::pipeline::storage::{Row, TableStore};

pub use filters::{AnalysisFilters, FilterParams, Granularity};
pub use result::{AggregateRecord, AggregateResult, SummaryEnvelope};

type GroupKey = (String, Option<String>, Option<i64>, Option<i64>);
type MunicipalityKey = (String, String);

#[derive(Debug, Default, Clone, Copy)]
struct RegistryTotals {
    farmers: i64,
    declared_area_ha: f64,
}

#[derive(Debug, Default)]
struct GroupAccumulator {
    incident_count: usize,
    farmers_affected: i64,
    losses_php_grand_total: f64,
    area_total_affected_ha: f64,
    municipalities: BTreeSet<MunicipalityKey>,
}

/// Runs analyses against a [`TableStore`].
#[derive(Clone)]
pub struct AnalysisEngine {
    store: Arc<dyn TableStore>,
    incident_table: String,
    registry_table: String,
}

impl AnalysisEngine {
    pub fn new(store: Arc<dyn TableStore>) -> Self {
        Self::with_tables(store, INCIDENT_TABLE, REGISTRY_TABLE)
    }

    pub fn with_tables(store: Arc<dyn TableStore>, incident_table: &str, registry_table: &str) -> Self {
        Self {
            store,
            incident_table: incident_table.to_string(),
            registry_table: registry_table.to_string(),
        }
    }

    pub async fn analyze(&self, filters: &AnalysisFilters) -> Result<AggregateResult> {
        filters.validate()?;

        let incidents = self
            .store
            .read(&self.incident_table, &filters.incident_read_filter())
            .await?;

        let registry = match self
            .store
            .read(&self.registry_table, &filters.registry_read_filter())
            .await
        {
            Ok(scan) => Some(scan),
            Err(LakehouseError::TableNotFound(table)) => {
                warn!("Registry table {} not found; percentages will be null", table);
                None
            }
            Err(e) => return Err(e),
        };

        let groups = aggregate(
            &self.incident_table,
            &incidents.rows,
            &self.registry_table,
            registry.as_ref().map(|s| s.rows.as_slice()),
            filters,
        )?;
        debug!(
            "Analysis over {} incidents produced {} groups",
            incidents.rows.len(),
            groups.len()
        );

        Ok(AggregateResult {
            generated_at: Utc::now(),
            filters: filters.clone(),
            incident_table_version: incidents.version,
            registry_table_version: registry.map(|s| s.version),
            groups,
        })
    }
}

fn join_key(table: &str, row: &Row, column: &str) -> Result<String> {
    let value = row.get(column).and_then(Value::as_str).unwrap_or_default();
    if !is_normalized(value) {
        return Err(LakehouseError::JoinKeyMismatch {
            table: table.to_string(),
            column: column.to_string(),
            value: value.to_string(),
        });
    }
    Ok(value.to_string())
}

fn float(row: &Row, column: &str) -> f64 {
    row.get(column).and_then(Value::as_f64).unwrap_or(0.0)
}

fn event_date(row: &Row) -> Option<NaiveDate> {
    row.get("event_date_start")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
}

fn integer(row: &Row, column: &str) -> Option<i64> {
    let value = row.get(column)?;
    value.as_i64().or_else(|| value.as_f64().map(|f| f.round() as i64))
}

fn registry_totals(table: &str, rows: &[Row]) -> Result<BTreeMap<MunicipalityKey, RegistryTotals>> {
    let mut totals: BTreeMap<MunicipalityKey, RegistryTotals> = BTreeMap::new();
    for row in rows {
        let key = (
            join_key(table, row, PROVINCE_COLUMN)?,
            join_key(table, row, MUNICIPALITY_COLUMN)?,
        );
        let entry = totals.entry(key).or_default();
        entry.farmers += integer(row, "registered_rice_farmers").unwrap_or(0);
        entry.declared_area_ha += float(row, "total_declared_rice_area_ha");
    }
    Ok(totals)
}

fn group_key(
    granularity: Granularity,
    municipality: &MunicipalityKey,
    year: Option<i64>,
    quarter: Option<i64>,
) -> GroupKey {
    (
        municipality.0.clone(),
        granularity
            .keeps_municipality()
            .then(|| municipality.1.clone()),
        year.filter(|_| granularity.keeps_year()),
        quarter.filter(|_| granularity.keeps_quarter()),
    )
}

/// Join and aggregate already-filtered rows. Output is ordered by
/// (province, municipality, year, quarter) with missing fields first.
pub fn aggregate(
    incident_table: &str,
    incidents: &[Row],
    registry_table: &str,
    registry: Option<&[Row]>,
    filters: &AnalysisFilters,
) -> Result<Vec<AggregateRecord>> {
    let registry = match registry {
        Some(rows) => Some(registry_totals(registry_table, rows)?),
        None => None,
    };
    let granularity = filters.granularity;

    let mut groups: BTreeMap<GroupKey, GroupAccumulator> = BTreeMap::new();
    let mut with_incidents: BTreeSet<MunicipalityKey> = BTreeSet::new();
    for row in incidents {
        if !filters.accepts_event_date(event_date(row)) {
            continue;
        }
        let municipality = (
            join_key(incident_table, row, PROVINCE_COLUMN)?,
            join_key(incident_table, row, MUNICIPALITY_COLUMN)?,
        );
        let key = group_key(
            granularity,
            &municipality,
            integer(row, "year"),
            integer(row, "quarter"),
        );
        let group = groups.entry(key).or_default();
        group.incident_count += 1;
        group.farmers_affected += integer(row, "farmers_affected").unwrap_or(0);
        group.losses_php_grand_total += float(row, "losses_php_grand_total");
        group.area_total_affected_ha += float(row, "area_total_affected_ha");
        group.municipalities.insert(municipality.clone());
        with_incidents.insert(municipality);
    }

    if let Some(registry) = &registry {
        if filters.names_location()
            && !filters.narrows_incidents()
            && granularity.keeps_municipality()
        {
            for municipality in registry.keys().filter(|m| !with_incidents.contains(*m)) {
                let key = group_key(granularity, municipality, None, None);
                groups
                    .entry(key)
                    .or_default()
                    .municipalities
                    .insert(municipality.clone());
            }
        }
    }

    let records = groups
        .into_iter()
        .take(filters.limit.unwrap_or(usize::MAX))
        .map(|((province, municipality, year, quarter), group)| {
            let matched: Vec<RegistryTotals> = group
                .municipalities
                .iter()
                .filter_map(|m| registry.as_ref().and_then(|r| r.get(m)).copied())
                .collect();
            let total_registered_farmers: i64 = matched.iter().map(|t| t.farmers).sum();
            let percentage_farmers_affected = (total_registered_farmers > 0)
                .then(|| group.farmers_affected as f64 / total_registered_farmers as f64);
            AggregateRecord {
                province,
                municipality,
                year,
                quarter,
                incident_count: group.incident_count,
                total_farmers_affected: group.farmers_affected,
                total_registered_farmers,
                percentage_farmers_affected,
                losses_php_grand_total: group.losses_php_grand_total,
                area_total_affected_ha: group.area_total_affected_ha,
                total_declared_rice_area_ha: matched.iter().map(|t| t.declared_area_ha).sum(),
                registry_matched: !matched.is_empty(),
            }
        })
        .collect();
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(values: Value) -> Vec<Row> {
        values
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    fn incident(province: &str, municipality: &str, year: i64, quarter: i64, affected: i64) -> Value {
        json!({
            "province": province, "municipality": municipality, "year": year,
            "quarter": quarter, "farmers_affected": affected,
            "losses_php_grand_total": 1000.0, "area_total_affected_ha": 2.5
        })
    }

    fn registry_row(province: &str, municipality: &str, farmers: i64) -> Value {
        json!({
            "province": province, "municipality": municipality,
            "registered_rice_farmers": farmers, "total_declared_rice_area_ha": 10.0
        })
    }

    #[test]
    fn test_join_computes_percentage() {
        let incidents = rows(json!([incident("AKLAN", "IBAJAY", 2023, 1, 50)]));
        let registry = rows(json!([
            registry_row("AKLAN", "IBAJAY", 120),
            registry_row("AKLAN", "IBAJAY", 80)
        ]));
        let filters = AnalysisFilters::new().province("AKLAN");
        let out = aggregate("i", &incidents, "r", Some(registry.as_slice()), &filters).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].total_registered_farmers, 200);
        assert_eq!(out[0].percentage_farmers_affected, Some(0.25));
        assert_eq!(out[0].total_declared_rice_area_ha, 20.0);
        assert!(out[0].registry_matched);
    }

    #[test]
    fn test_zero_registered_yields_null_percentage() {
        let incidents = rows(json!([incident("AKLAN", "IBAJAY", 2023, 1, 50)]));
        let out = aggregate("i", &incidents, "r", Some(Vec::<Row>::new().as_slice()), &AnalysisFilters::new()).unwrap();
        assert_eq!(out[0].percentage_farmers_affected, None);
        assert!(!out[0].registry_matched);

        let zero = rows(json!([registry_row("AKLAN", "IBAJAY", 0)]));
        let out = aggregate("i", &incidents, "r", Some(zero.as_slice()), &AnalysisFilters::new()).unwrap();
        assert_eq!(out[0].percentage_farmers_affected, None);
        assert!(out[0].registry_matched);
    }

    #[test]
    fn test_registered_total_counts_each_municipality_once() {
        let incidents = rows(json!([
            incident("AKLAN", "IBAJAY", 2023, 1, 10),
            incident("AKLAN", "IBAJAY", 2023, 2, 20),
            incident("AKLAN", "KALIBO", 2023, 1, 5)
        ]));
        let registry = rows(json!([
            registry_row("AKLAN", "IBAJAY", 100),
            registry_row("AKLAN", "KALIBO", 100)
        ]));
        let filters = AnalysisFilters::new().granularity(Granularity::Province);
        let out = aggregate("i", &incidents, "r", Some(registry.as_slice()), &filters).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].municipality, None);
        assert_eq!(out[0].incident_count, 3);
        assert_eq!(out[0].total_farmers_affected, 35);
        assert_eq!(out[0].total_registered_farmers, 200);
        assert_eq!(out[0].percentage_farmers_affected, Some(0.175));
    }

    #[test]
    fn test_registry_only_groups_need_location_filter() {
        let incidents = rows(json!([incident("AKLAN", "IBAJAY", 2023, 1, 50)]));
        let registry = rows(json!([
            registry_row("AKLAN", "IBAJAY", 200),
            registry_row("AKLAN", "BANGA", 300)
        ]));

        let unfiltered =
            aggregate("i", &incidents, "r", Some(registry.as_slice()), &AnalysisFilters::new()).unwrap();
        assert_eq!(unfiltered.len(), 1);

        let by_province = AnalysisFilters::new().province("AKLAN");
        let out = aggregate("i", &incidents, "r", Some(registry.as_slice()), &by_province).unwrap();
        assert_eq!(out.len(), 2);
        // Registry-only group sorts first (BANGA) and has no period
        assert_eq!(out[0].municipality.as_deref(), Some("BANGA"));
        assert_eq!(out[0].year, None);
        assert_eq!(out[0].total_farmers_affected, 0);
        assert_eq!(out[0].percentage_farmers_affected, Some(0.0));

        let with_year = by_province.clone().year(2023);
        let out = aggregate("i", &incidents, "r", Some(registry.as_slice()), &with_year).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_province_rollup_ignores_registry_only_municipalities() {
        let incidents = rows(json!([incident("AKLAN", "IBAJAY", 2023, 1, 50)]));
        let registry = rows(json!([
            registry_row("AKLAN", "IBAJAY", 200),
            registry_row("AKLAN", "BANGA", 300)
        ]));
        let wide = AnalysisFilters::new().granularity(Granularity::Province);
        let narrowed = wide.clone().province("AKLAN");
        for filters in [wide, narrowed] {
            let out = aggregate("i", &incidents, "r", Some(registry.as_slice()), &filters).unwrap();
            assert_eq!(out.len(), 1);
            assert_eq!(out[0].total_registered_farmers, 200);
            assert_eq!(out[0].percentage_farmers_affected, Some(0.25));
        }
    }

    #[test]
    fn test_date_range_filters_on_event_start() {
        let mut early = incident("AKLAN", "IBAJAY", 2023, 1, 10);
        early["event_date_start"] = json!("2023-01-15");
        let mut late = incident("AKLAN", "KALIBO", 2023, 3, 20);
        late["event_date_start"] = json!("2023-08-02");
        let undated = incident("AKLAN", "BANGA", 2023, 2, 30);
        let incidents = rows(json!([early, late, undated]));
        let registry = rows(json!([registry_row("AKLAN", "NUMANCIA", 100)]));

        let start = NaiveDate::from_ymd_opt(2023, 1, 1);
        let end = NaiveDate::from_ymd_opt(2023, 6, 30);
        let filters = AnalysisFilters::new().province("AKLAN").date_range(start, end);
        let out = aggregate("i", &incidents, "r", Some(registry.as_slice()), &filters).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].municipality.as_deref(), Some("IBAJAY"));

        let open_ended = AnalysisFilters::new().date_range(NaiveDate::from_ymd_opt(2023, 8, 2), None);
        let out = aggregate("i", &incidents, "r", None, &open_ended).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].municipality.as_deref(), Some("KALIBO"));
    }

    #[test]
    fn test_limit_keeps_leading_groups() {
        let incidents = rows(json!([
            incident("CAPIZ", "ROXAS CITY", 2022, 4, 1),
            incident("AKLAN", "KALIBO", 2023, 1, 1),
            incident("AKLAN", "IBAJAY", 2024, 1, 1)
        ]));
        let out = aggregate("i", &incidents, "r", None, &AnalysisFilters::new().limit(2)).unwrap();
        let names: Vec<&str> = out.iter().filter_map(|g| g.municipality.as_deref()).collect();
        assert_eq!(names, vec!["IBAJAY", "KALIBO"]);
    }

    #[test]
    fn test_unnormalized_join_key_fails() {
        let incidents = rows(json!([incident("Aklan", "IBAJAY", 2023, 1, 50)]));
        let err = aggregate("i", &incidents, "r", None, &AnalysisFilters::new()).unwrap_err();
        match err {
            LakehouseError::JoinKeyMismatch { table, column, .. } => {
                assert_eq!(table, "i");
                assert_eq!(column, "province");
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let incidents = rows(json!([incident("AKLAN", "IBAJAY", 2023, 1, 50)]));
        let registry = rows(json!([registry_row("AKLAN", " ibajay", 200)]));
        assert!(matches!(
            aggregate("i", &incidents, "r", Some(registry.as_slice()), &AnalysisFilters::new()),
            Err(LakehouseError::JoinKeyMismatch { .. })
        ));
    }

    #[test]
    fn test_groups_are_ordered() {
        let incidents = rows(json!([
            incident("CAPIZ", "ROXAS CITY", 2022, 4, 1),
            incident("AKLAN", "KALIBO", 2023, 2, 1),
            incident("AKLAN", "KALIBO", 2023, 1, 1),
            incident("AKLAN", "IBAJAY", 2024, 1, 1)
        ]));
        let out = aggregate("i", &incidents, "r", None, &AnalysisFilters::new()).unwrap();
        let keys: Vec<(String, Option<String>, Option<i64>, Option<i64>)> = out
            .into_iter()
            .map(|g| (g.province, g.municipality, g.year, g.quarter))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("AKLAN".into(), Some("IBAJAY".into()), Some(2024), Some(1)),
                ("AKLAN".into(), Some("KALIBO".into()), Some(2023), Some(1)),
                ("AKLAN".into(), Some("KALIBO".into()), Some(2023), Some(2)),
                ("CAPIZ".into(), Some("ROXAS CITY".into()), Some(2022), Some(4)),
            ]
        );
    }

    #[test]
    fn test_empty_incidents_give_empty_result() {
        let out = aggregate("i", &[], "r", None, &AnalysisFilters::new().year(2020)).unwrap();
        assert!(out.is_empty());
    }
}
