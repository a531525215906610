//! PE-array reshaping search
//!
//! Looks for the rows, columns and lanes split of a fixed multiplier budget
//! that minimizes the ideal cycle count of a layer. Lanes stay at 16 or
//! more, every dimension is a power of two, and either rows or columns keep
//! their configured value. Candidates are visited rows first, then columns,
//! and the first minimum wins.

use serde::{Deserialize, Serialize};

use crate::architecture::PeArrayConfig;
use crate::error::{SimError, SimResult};

const MIN_LANES: u32 = 16;

/// Dimension left untouched by the search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FixedAxis {
    #[default]
    Rows,
    Columns,
}

/// Work of one layer as seen by the array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerShape {
    pub windows: u64,
    pub channels: u64,
    pub filters: u64,
    pub kx: u64,
    pub ky: u64,
}

impl LayerShape {
    pub fn ideal_cycles(&self, array: &PeArrayConfig) -> u64 {
        array.ideal_cycles(self.windows, self.channels, self.filters, self.kx, self.ky)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub array: PeArrayConfig,
    pub ideal_cycles: u64,
}

fn powers_of_two(max: u32) -> impl Iterator<Item = u32> {
    (0..u32::BITS).map(|p| 1u32 << p).take_while(move |&v| v <= max)
}

/// Every split of the budget of `array` the search may pick, in visiting
/// order
pub fn candidates(array: &PeArrayConfig, fixed: FixedAxis) -> Vec<PeArrayConfig> {
    let budget = array.lanes as u64 * array.columns as u64 * array.rows as u64;
    let max = u32::try_from(budget).unwrap_or(u32::MAX);

    let mut found = Vec::new();
    for rows in powers_of_two(max) {
        if fixed == FixedAxis::Rows && rows != array.rows {
            continue;
        }
        for columns in powers_of_two(max) {
            if fixed == FixedAxis::Columns && columns != array.columns {
                continue;
            }
            let rc = rows as u64 * columns as u64;
            if rc == 0 || budget % rc != 0 {
                continue;
            }
            let lanes = budget / rc;
            if lanes < MIN_LANES as u64 || !lanes.is_power_of_two() {
                continue;
            }
            found.push(PeArrayConfig {
                lanes: lanes as u32,
                columns,
                rows,
                ..*array
            });
        }
    }
    found
}

/// Lowest ideal cycle split for `layer`, ties keep the first visited
pub fn search(array: &PeArrayConfig, fixed: FixedAxis, layer: &LayerShape) -> SimResult<Candidate> {
    let mut best: Option<Candidate> = None;
    for candidate in candidates(array, fixed) {
        let ideal_cycles = layer.ideal_cycles(&candidate);
        match best {
            Some(b) if b.ideal_cycles <= ideal_cycles => {}
            _ => {
                best = Some(Candidate {
                    array: candidate,
                    ideal_cycles,
                })
            }
        }
    }
    best.ok_or_else(|| {
        SimError::config(format!(
            "no power-of-two split of {} multipliers keeps {} lanes",
            array.lanes as u64 * array.columns as u64 * array.rows as u64,
            MIN_LANES
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_candidates_preserve_budget() {
        let array = PeArrayConfig::new(16, 16, 16, 1, 16);
        let rows_fixed = candidates(&array, FixedAxis::Rows);
        assert!(rows_fixed.iter().all(|c| c.rows == 16 && c.lanes >= 16));
        assert!(rows_fixed.iter().all(|c| c.lanes * c.columns * c.rows == 4096));
        let columns: Vec<u32> = rows_fixed.iter().map(|c| c.columns).collect();
        assert_eq!(columns, vec![1, 2, 4, 8, 16]);

        let columns_fixed = candidates(&array, FixedAxis::Columns);
        assert!(columns_fixed.iter().all(|c| c.columns == 16));
        assert_eq!(columns_fixed.len(), 5);
    }

    #[test]
    fn test_search_prefers_lanes_for_deep_layers() {
        let array = PeArrayConfig::new(16, 16, 16, 1, 16);
        // One window with many channels: columns are wasted
        let layer = LayerShape {
            windows: 1,
            channels: 256,
            filters: 16,
            kx: 1,
            ky: 1,
        };
        let best = search(&array, FixedAxis::Rows, &layer).unwrap();
        assert_eq!(best.array.columns, 1);
        assert_eq!(best.array.lanes, 256);
        assert_eq!(best.ideal_cycles, 1);
    }

    #[test]
    fn test_ties_keep_first_candidate() {
        let array = PeArrayConfig::new(16, 2, 1, 1, 16);
        // Every split costs one cycle
        let layer = LayerShape {
            windows: 1,
            channels: 1,
            filters: 1,
            kx: 1,
            ky: 1,
        };
        let best = search(&array, FixedAxis::Rows, &layer).unwrap();
        assert_eq!(best.array.columns, 1);
        assert_eq!(best.array.lanes, 32);
    }

    #[test]
    fn test_search_without_candidates() {
        let array = PeArrayConfig::new(4, 2, 2, 1, 16);
        let layer = LayerShape {
            windows: 1,
            channels: 1,
            filters: 1,
            kx: 1,
            ky: 1,
        };
        assert!(matches!(
            search(&array, FixedAxis::Rows, &layer),
            Err(SimError::Config { .. })
        ));
    }
}
