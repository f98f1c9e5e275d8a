//! Write planning shared by every store implementation.
//!
//! Given the prior snapshot's partitions and the incoming batch grouped by
//! partition value, compute the next live partition map for a write mode.
//! Unpartitioned tables use the single key `""`.

use std::collections::BTreeMap;

use super::{partition_value, Row, WriteMode};
use crate::error::{LakehouseError, Result};

/// Partition key used by unpartitioned tables.
pub const UNPARTITIONED: &str = "";

/// Decide the effective partition column for a write.
///
/// `existing` is `None` for a table that does not exist yet, otherwise the
/// partition column recorded in its latest snapshot.
pub fn resolve_partition_column(
    table: &str,
    existing: Option<Option<&str>>,
    requested: Option<&str>,
    mode: WriteMode,
) -> Result<Option<String>> {
    let effective = match (mode, existing) {
        (WriteMode::Overwrite, Some(current)) => requested.or(current),
        (_, None) => requested,
        (_, Some(current)) => {
            if let Some(req) = requested {
                if Some(req) != current {
                    return Err(LakehouseError::mode_constraint(
                        table,
                        format!(
                            "{} cannot repartition by '{}' (table is partitioned by {:?}); use overwrite",
                            mode, req, current
                        ),
                    ));
                }
            }
            current
        }
    };

    if mode == WriteMode::DynamicOverwrite && effective.is_none() {
        return Err(LakehouseError::mode_constraint(
            table,
            "dynamic_overwrite requires a partitioned table (no partition key)",
        ));
    }
    Ok(effective.map(str::to_string))
}

/// Split a batch by partition value. Every row of a partitioned write must
/// carry a non-empty scalar in the partition column.
pub fn group_rows(
    table: &str,
    rows: Vec<Row>,
    partition_column: Option<&str>,
) -> Result<BTreeMap<String, Vec<Row>>> {
    let mut groups: BTreeMap<String, Vec<Row>> = BTreeMap::new();
    let Some(column) = partition_column else {
        if !rows.is_empty() {
            groups.insert(UNPARTITIONED.to_string(), rows);
        }
        return Ok(groups);
    };

    for (index, row) in rows.into_iter().enumerate() {
        let key = row.get(column).and_then(partition_value).ok_or_else(|| {
            LakehouseError::mode_constraint(
                table,
                format!(
                    "row {} has no usable value for partition column '{}'",
                    index, column
                ),
            )
        })?;
        groups.entry(key).or_default().push(row);
    }
    Ok(groups)
}

/// Compute the live partition map after a write.
///
/// - append: incoming segments are added next to the prior ones
/// - overwrite: the prior map is discarded
/// - dynamic_overwrite: each incoming partition replaces its prior segments;
///   partitions absent from the batch keep theirs
pub fn apply_mode<S: Clone>(
    prior: &BTreeMap<String, Vec<S>>,
    incoming: BTreeMap<String, S>,
    mode: WriteMode,
) -> BTreeMap<String, Vec<S>> {
    match mode {
        WriteMode::Overwrite => incoming.into_iter().map(|(k, s)| (k, vec![s])).collect(),
        WriteMode::Append => {
            let mut next = prior.clone();
            for (key, segment) in incoming {
                next.entry(key).or_default().push(segment);
            }
            next
        }
        WriteMode::DynamicOverwrite => {
            let mut next = prior.clone();
            for (key, segment) in incoming {
                next.insert(key, vec![segment]);
            }
            next
        }
    }
}
