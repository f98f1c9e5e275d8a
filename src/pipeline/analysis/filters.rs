use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::constants::{MUNICIPALITY_COLUMN, PROVINCE_COLUMN};
use crate::error::{LakehouseError, Result};
use crate::pipeline::processing::normalize::normalize_key;
use crate::pipeline::storage::ReadFilter;

pub const MIN_YEAR: i64 = 1900;
pub const MAX_YEAR: i64 = 2100;
pub const MAX_LIMIT: usize = 5000;
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Grouping level of an analysis, coarsest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Province,
    Municipality,
    Year,
    #[default]
    Quarter,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Province => "province",
            Granularity::Municipality => "municipality",
            Granularity::Year => "year",
            Granularity::Quarter => "quarter",
        }
    }

    pub fn keeps_municipality(&self) -> bool {
        *self >= Granularity::Municipality
    }

    pub fn keeps_year(&self) -> bool {
        *self >= Granularity::Year
    }

    pub fn keeps_quarter(&self) -> bool {
        *self >= Granularity::Quarter
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = LakehouseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "province" => Ok(Granularity::Province),
            "municipality" => Ok(Granularity::Municipality),
            "year" => Ok(Granularity::Year),
            "quarter" => Ok(Granularity::Quarter),
            other => Err(invalid(
                "granularity",
                format!(
                    "unknown granularity '{}' (expected province, municipality, year or quarter)",
                    other
                ),
            )),
        }
    }
}

fn invalid(field: &str, message: impl Into<String>) -> LakehouseError {
    LakehouseError::InvalidFilter {
        field: field.to_string(),
        message: message.into(),
    }
}

/// Raw filter parameters as received from a caller, all optional strings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterParams {
    pub province: Option<String>,
    pub municipality: Option<String>,
    pub year: Option<String>,
    pub quarter: Option<String>,
    pub disaster_category: Option<String>,
    pub granularity: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub limit: Option<String>,
}

/// Validated analysis filters. Location and category values are stored in
/// normalized key form so they compare equal to stored keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisFilters {
    pub province: Option<String>,
    pub municipality: Option<String>,
    pub year: Option<i64>,
    pub quarter: Option<i64>,
    pub disaster_category: Option<String>,
    pub granularity: Granularity,
    /// Inclusive bounds on an incident's `event_date_start`.
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Maximum number of groups returned, applied after ordering.
    pub limit: Option<usize>,
}

fn key_param(value: Option<&str>) -> Option<String> {
    value.map(normalize_key).filter(|v| !v.is_empty())
}

fn int_param(field: &str, value: Option<&str>) -> Result<Option<i64>> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => v
            .parse::<i64>()
            .map(Some)
            .map_err(|_| invalid(field, format!("'{}' is not an integer", v))),
    }
}

fn date_param(field: &str, value: Option<&str>) -> Result<Option<NaiveDate>> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => NaiveDate::parse_from_str(v, DATE_FORMAT)
            .map(Some)
            .map_err(|_| invalid(field, format!("'{}' is not a YYYY-MM-DD date", v))),
    }
}

fn limit_param(value: Option<&str>) -> Result<Option<usize>> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => v
            .parse::<usize>()
            .map(Some)
            .map_err(|_| invalid("limit", format!("'{}' is not a positive integer", v))),
    }
}

impl AnalysisFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn province(mut self, province: &str) -> Self {
        self.province = key_param(Some(province));
        self
    }

    pub fn municipality(mut self, municipality: &str) -> Self {
        self.municipality = key_param(Some(municipality));
        self
    }

    pub fn year(mut self, year: i64) -> Self {
        self.year = Some(year);
        self
    }

    pub fn quarter(mut self, quarter: i64) -> Self {
        self.quarter = Some(quarter);
        self
    }

    pub fn disaster_category(mut self, category: &str) -> Self {
        self.disaster_category = key_param(Some(category));
        self
    }

    pub fn granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn date_range(mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        self.start_date = start;
        self.end_date = end;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Parse and validate caller-supplied parameters.
    pub fn from_params(params: &FilterParams) -> Result<Self> {
        let filters = AnalysisFilters {
            province: key_param(params.province.as_deref()),
            municipality: key_param(params.municipality.as_deref()),
            year: int_param("year", params.year.as_deref())?,
            quarter: int_param("quarter", params.quarter.as_deref())?,
            disaster_category: key_param(params.disaster_category.as_deref()),
            granularity: match params.granularity.as_deref().map(str::trim) {
                None | Some("") => Granularity::default(),
                Some(g) => g.parse()?,
            },
            start_date: date_param("start_date", params.start_date.as_deref())?,
            end_date: date_param("end_date", params.end_date.as_deref())?,
            limit: limit_param(params.limit.as_deref())?,
        };
        filters.validate()?;
        Ok(filters)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(year) = self.year {
            if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
                return Err(invalid(
                    "year",
                    format!("year {} is outside {}-{}", year, MIN_YEAR, MAX_YEAR),
                ));
            }
        }
        if let Some(quarter) = self.quarter {
            if !(1..=4).contains(&quarter) {
                return Err(invalid("quarter", format!("quarter {} is outside 1-4", quarter)));
            }
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(invalid(
                    "start_date",
                    format!("start_date {} is after end_date {}", start, end),
                ));
            }
        }
        if let Some(limit) = self.limit {
            if !(1..=MAX_LIMIT).contains(&limit) {
                return Err(invalid("limit", format!("limit {} is outside 1-{}", limit, MAX_LIMIT)));
            }
        }
        Ok(())
    }

    /// Whether the caller named a province or municipality.
    pub fn names_location(&self) -> bool {
        self.province.is_some() || self.municipality.is_some()
    }

    /// Whether any filter narrows incidents beyond their location.
    pub fn narrows_incidents(&self) -> bool {
        self.year.is_some()
            || self.quarter.is_some()
            || self.disaster_category.is_some()
            || self.has_date_range()
    }

    pub fn has_date_range(&self) -> bool {
        self.start_date.is_some() || self.end_date.is_some()
    }

    /// Whether an incident with this `event_date_start` passes the date
    /// bounds. Undated incidents pass only when no bound is set.
    pub fn accepts_event_date(&self, date: Option<NaiveDate>) -> bool {
        if !self.has_date_range() {
            return true;
        }
        let Some(date) = date else {
            return false;
        };
        self.start_date.map_or(true, |start| date >= start)
            && self.end_date.map_or(true, |end| date <= end)
    }

    fn location_filter(&self) -> ReadFilter {
        let mut filter = ReadFilter::all();
        if let Some(p) = &self.province {
            filter = filter.eq(PROVINCE_COLUMN, p.as_str());
        }
        if let Some(m) = &self.municipality {
            filter = filter.eq(MUNICIPALITY_COLUMN, m.as_str());
        }
        filter
    }

    /// Pushdown predicates for the incident table.
    pub fn incident_read_filter(&self) -> ReadFilter {
        let mut filter = self.location_filter();
        if let Some(y) = self.year {
            filter = filter.eq("year", y);
        }
        if let Some(q) = self.quarter {
            filter = filter.eq("quarter", q);
        }
        if let Some(c) = &self.disaster_category {
            filter = filter.eq("disaster_category", c.as_str());
        }
        filter
    }

    /// Pushdown predicates for the registry table (prunes by province).
    pub fn registry_read_filter(&self) -> ReadFilter {
        self.location_filter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(pairs: &[(&str, &str)]) -> FilterParams {
        let mut p = FilterParams::default();
        for (k, v) in pairs {
            let v = Some(v.to_string());
            match *k {
                "province" => p.province = v,
                "municipality" => p.municipality = v,
                "year" => p.year = v,
                "quarter" => p.quarter = v,
                "disaster_category" => p.disaster_category = v,
                "granularity" => p.granularity = v,
                "start_date" => p.start_date = v,
                "end_date" => p.end_date = v,
                "limit" => p.limit = v,
                _ => unreachable!(),
            }
        }
        p
    }

    #[test]
    fn test_from_params_normalizes_keys() {
        let filters = AnalysisFilters::from_params(&params(&[
            ("province", " negros  occidental"),
            ("municipality", "bago city"),
            ("year", "2023"),
            ("granularity", "Municipality"),
        ]))
        .unwrap();
        assert_eq!(filters.province.as_deref(), Some("NEGROS OCCIDENTAL"));
        assert_eq!(filters.municipality.as_deref(), Some("BAGO CITY"));
        assert_eq!(filters.year, Some(2023));
        assert_eq!(filters.granularity, Granularity::Municipality);
    }

    #[test]
    fn test_from_params_rejects_out_of_range_values() {
        for bad in [
            ("quarter", "5"),
            ("quarter", "0"),
            ("quarter", "Q1"),
            ("year", "1800"),
            ("year", "twenty"),
            ("granularity", "week"),
            ("start_date", "2023/01/01"),
            ("end_date", "2023-02-30"),
            ("limit", "0"),
            ("limit", "-3"),
            ("limit", "5001"),
        ] {
            let err = AnalysisFilters::from_params(&params(&[bad])).unwrap_err();
            match err {
                LakehouseError::InvalidFilter { field, .. } => assert_eq!(field, bad.0),
                other => panic!("unexpected error: {:?}", other),
            }
        }
    }

    #[test]
    fn test_blank_params_are_ignored() {
        let filters =
            AnalysisFilters::from_params(&params(&[("province", "  "), ("year", "")])).unwrap();
        assert_eq!(filters, AnalysisFilters::default());
        assert!(!filters.names_location());
    }

    #[test]
    fn test_read_filters() {
        let filters = AnalysisFilters::new()
            .province("aklan")
            .year(2023)
            .disaster_category("typhoon");
        let incident = filters.incident_read_filter();
        assert_eq!(incident.get("province"), Some(&json!("AKLAN")));
        assert_eq!(incident.get("year"), Some(&json!(2023)));
        assert_eq!(incident.get("disaster_category"), Some(&json!("TYPHOON")));
        let registry = filters.registry_read_filter();
        assert_eq!(registry.get("province"), Some(&json!("AKLAN")));
        assert!(registry.get("year").is_none());
    }

    #[test]
    fn test_date_range_and_limit() {
        let filters = AnalysisFilters::from_params(&params(&[
            ("start_date", "2023-01-01"),
            ("end_date", "2023-03-31"),
            ("limit", "10"),
        ]))
        .unwrap();
        assert_eq!(filters.limit, Some(10));
        assert!(filters.narrows_incidents());

        let date = |s: &str| NaiveDate::parse_from_str(s, DATE_FORMAT).ok();
        assert!(filters.accepts_event_date(date("2023-01-01")));
        assert!(filters.accepts_event_date(date("2023-03-31")));
        assert!(!filters.accepts_event_date(date("2023-04-01")));
        assert!(!filters.accepts_event_date(None));
        assert!(AnalysisFilters::new().accepts_event_date(None));

        let reversed = AnalysisFilters::from_params(&params(&[
            ("start_date", "2023-05-01"),
            ("end_date", "2023-01-01"),
        ]));
        assert!(matches!(reversed, Err(LakehouseError::InvalidFilter { field, .. }) if field == "start_date"));
    }

    #[test]
    fn test_granularity_levels() {
        assert!(!Granularity::Province.keeps_municipality());
        assert!(Granularity::Year.keeps_municipality());
        assert!(!Granularity::Year.keeps_quarter());
        assert!(Granularity::Quarter.keeps_quarter());
    }
}
