//! Live Range Types
//!
//! A live range is a named matrix of the freshest known values: one row per
//! security, one column per field. Ticks update cells in place; snapshots
//! copy the matrix out for rendering.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::streaming::{FieldValue, SecurityKey, Tick};

// =============================================================================
// Identity
// =============================================================================

/// Caller-chosen identifier of a live range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RangeId(String);

impl RangeId {
    /// Create a range id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RangeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RangeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// =============================================================================
// Cells
// =============================================================================

/// Latest value for one (security, field) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cell {
    /// Most recently applied value.
    pub value: FieldValue,
    /// Timestamp of the tick that produced `value`.
    pub updated_at: DateTime<Utc>,
}

/// A live range and its cell table.
#[derive(Debug, Clone)]
pub struct LiveRange {
    id: RangeId,
    securities: Vec<SecurityKey>,
    fields: Vec<String>,
    period: Duration,
    /// One map per row, parallel to `securities`.
    rows: Vec<BTreeMap<String, Cell>>,
}

impl LiveRange {
    /// Create an empty live range.
    #[must_use]
    pub fn new(
        id: RangeId,
        securities: Vec<SecurityKey>,
        fields: Vec<String>,
        period: Duration,
    ) -> Self {
        let rows = vec![BTreeMap::new(); securities.len()];
        Self {
            id,
            securities,
            fields,
            period,
            rows,
        }
    }

    /// Range identifier.
    #[must_use]
    pub const fn id(&self) -> &RangeId {
        &self.id
    }

    /// Row securities in creation order.
    #[must_use]
    pub fn securities(&self) -> &[SecurityKey] {
        &self.securities
    }

    /// Column fields in creation order.
    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Flush period.
    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Current cell for a row and field.
    #[must_use]
    pub fn cell(&self, security: &SecurityKey, field: &str) -> Option<&Cell> {
        let row = self.securities.iter().position(|key| key == security)?;
        self.rows[row].get(field)
    }

    /// Apply a tick, returning the names of the fields it updated.
    ///
    /// Every row whose security matches the tick is updated. Fields the range
    /// does not track and fields absent from the tick are left alone.
    pub fn apply(&mut self, tick: &Tick) -> Vec<String> {
        let mut updated = Vec::new();

        for (row, key) in self.securities.iter().enumerate() {
            if !key.matches(tick.security()) {
                continue;
            }

            for field in &self.fields {
                let Some(value) = tick.field(field) else {
                    continue;
                };

                self.rows[row].insert(
                    field.clone(),
                    Cell {
                        value: value.clone(),
                        updated_at: tick.timestamp(),
                    },
                );

                if !updated.contains(field) {
                    updated.push(field.clone());
                }
            }
        }

        updated
    }

    /// Copy the current values into a snapshot.
    #[must_use]
    pub fn snapshot(&self, taken_at: DateTime<Utc>) -> Snapshot {
        let rows = self
            .securities
            .iter()
            .zip(&self.rows)
            .map(|(security, cells)| SnapshotRow {
                security: security.clone(),
                cells: self
                    .fields
                    .iter()
                    .map(|field| cells.get(field).map(|cell| cell.value.clone()))
                    .collect(),
            })
            .collect();

        Snapshot {
            range_id: self.id.clone(),
            taken_at,
            fields: self.fields.clone(),
            rows,
        }
    }
}

// =============================================================================
// Snapshots
// =============================================================================

/// Point-in-time copy of a live range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    /// Range the snapshot was taken from.
    pub range_id: RangeId,
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
    /// Column headers.
    pub fields: Vec<String>,
    /// One row per security.
    pub rows: Vec<SnapshotRow>,
}

/// One security's row in a snapshot. Missing values are `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotRow {
    /// Row security.
    pub security: SecurityKey,
    /// Cells in column order.
    pub cells: Vec<Option<FieldValue>>,
}

impl Snapshot {
    /// Value at a row and column, by security and field name.
    #[must_use]
    pub fn value(&self, security: &SecurityKey, field: &str) -> Option<&FieldValue> {
        let column = self.fields.iter().position(|f| f == field)?;
        self.rows
            .iter()
            .find(|row| &row.security == security)
            .and_then(|row| row.cells[column].as_ref())
    }
}
