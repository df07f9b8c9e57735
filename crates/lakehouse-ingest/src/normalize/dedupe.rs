//! Natural-key deduplication
//!
//! Rows must arrive oldest capture first. For each natural key the last row
//! seen wins and takes the position of the key's first occurrence, so the
//! output order is a pure function of the input.

use std::collections::HashMap;

use super::cast::{Cell, KeyPart};
use super::shape::ShapedRow;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DedupeStats {
    pub duplicates_removed: u64,
    /// Rows whose natural key failed to cast
    pub dropped: u64,
}

/// Deduplicate on `key_columns`. With no key columns every row is kept.
///
/// Rows whose natural key failed to cast are dropped. Rows with a null or
/// absent key component cannot be identified and are all kept.
pub fn dedupe(rows: Vec<ShapedRow>, key_columns: &[usize]) -> (Vec<Vec<Cell>>, DedupeStats) {
    let mut stats = DedupeStats::default();
    if key_columns.is_empty() {
        return (rows.into_iter().map(|r| r.cells).collect(), stats);
    }

    let mut out: Vec<Vec<Cell>> = Vec::with_capacity(rows.len());
    let mut positions: HashMap<Vec<KeyPart>, usize> = HashMap::new();

    for row in rows {
        if row.key_cast_failed {
            stats.dropped += 1;
            continue;
        }

        let key: Option<Vec<KeyPart>> = key_columns
            .iter()
            .map(|idx| row.cells.get(*idx).and_then(Cell::key_part))
            .collect();

        match key {
            None => out.push(row.cells),
            Some(key) => match positions.get(&key) {
                Some(&position) => {
                    out[position] = row.cells;
                    stats.duplicates_removed += 1;
                }
                None => {
                    positions.insert(key, out.len());
                    out.push(row.cells);
                }
            },
        }
    }

    (out, stats)
}
