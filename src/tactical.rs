//! Structured-sparsity weight scheduler
//!
//! Zero weight slots are filled by promoting a nonzero weight of the same
//! filter from a later time step. Candidates come from a lookahead of `H`
//! steps in the same lane and a lookaside of `D` neighbouring lanes one step
//! ahead. A promoted weight keeps its original time and lane so it is still
//! paired with the right activation.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::buffer::{BufferEntry, WeightBuffer};

/// Neighbourhood searched for promotion candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchShape {
    /// Lookaside only towards higher lanes
    L,
    /// Lookaside alternating on both sides
    T,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitTactical {
    pub lookahead_h: u32,
    pub lookaside_d: u32,
    pub search_shape: SearchShape,
}

/// One promoted nonzero weight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledWeight {
    /// Row of the filter within its filter set
    pub row: usize,
    pub channel: usize,
    pub kernel_x: usize,
    pub kernel_y: usize,
    pub bits: u16,
}

/// One non-empty buffer time step of a filter set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleStep {
    pub buffer_time: usize,
    pub weights: Vec<ScheduledWeight>,
}

/// Compacted timeline per filter set
pub type Schedule = Vec<VecDeque<ScheduleStep>>;

/// How buffer slots map back onto weight coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleLayout {
    pub lanes: usize,
    pub kx: usize,
    /// Channel blocks per kernel position
    pub blocks: usize,
    pub depthwise: bool,
}

impl BitTactical {
    pub fn new(lookahead_h: u32, lookaside_d: u32, search_shape: SearchShape) -> Self {
        Self {
            lookahead_h,
            lookaside_d,
            search_shape,
        }
    }

    /// Candidate offsets `(steps ahead, lane offset)` in preference order
    pub fn search_space(&self) -> Vec<(usize, isize)> {
        let mut space: Vec<(usize, isize)> = (1..=self.lookahead_h as usize).map(|h| (h, 0)).collect();
        let d = self.lookaside_d as isize;
        match self.search_shape {
            SearchShape::L => space.extend((1..=d).map(|lane| (1, lane))),
            SearchShape::T => space.extend((0..d).map(|i| {
                let distance = i / 2 + 1;
                if i % 2 == 0 {
                    (1, distance)
                } else {
                    (1, -distance)
                }
            })),
        }
        space
    }

    /// Bits per weight needed to encode the chosen candidate
    pub fn metadata_bits(&self) -> u32 {
        let options = self.search_space().len() + 1;
        usize::BITS - (options - 1).leading_zeros()
    }

    pub fn lookahead(&self) -> usize {
        self.lookahead_h as usize
    }

    /// True if no weight of the row is nonzero
    pub fn check_zero_line(&self, line: &[BufferEntry]) -> bool {
        line.iter().all(|e| e.value == 0)
    }

    /// Promote weights into zero slots in place
    pub fn schedule(&self, buffer: &mut WeightBuffer, lanes: usize) {
        let space = self.search_space();
        let lanes = lanes.max(1);
        let rows = buffer.width() / lanes;

        for set in 0..buffer.sets() {
            for time in 0..buffer.time() {
                for row in 0..rows {
                    for lane in 0..lanes {
                        let pos = row * lanes + lane;
                        if buffer.get(set, time, pos).value != 0 {
                            continue;
                        }
                        self.promote(buffer, &space, set, time, row, lane, lanes);
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn promote(
        &self,
        buffer: &mut WeightBuffer,
        space: &[(usize, isize)],
        set: usize,
        time: usize,
        row: usize,
        lane: usize,
        lanes: usize,
    ) {
        for &(ahead, side) in space {
            let from_time = time + ahead;
            if from_time >= buffer.time() {
                continue;
            }
            let from_lane = (lane as isize + side).rem_euclid(lanes as isize) as usize;
            let from_pos = row * lanes + from_lane;
            let candidate = buffer.get(set, from_time, from_pos);
            if candidate.value == 0 || candidate.time as usize - time > self.lookahead() {
                continue;
            }

            buffer.set(set, time, row * lanes + lane, candidate);
            buffer.set(
                set,
                from_time,
                from_pos,
                BufferEntry::new(0, from_time as u32, from_lane as u16),
            );
            return;
        }
    }

    /// Drop every all-zero step, keeping the nonzero weights of each set
    pub fn dense_scheduler(&self, buffer: &WeightBuffer, layout: ScheduleLayout) -> Schedule {
        let lanes = layout.lanes.max(1);
        let blocks = layout.blocks.max(1);
        (0..buffer.sets())
            .map(|set| {
                (0..buffer.time())
                    .filter_map(|time| {
                        let line = buffer.row(set, time);
                        let weights: Vec<ScheduledWeight> = line
                            .iter()
                            .enumerate()
                            .filter(|(_, e)| e.value != 0)
                            .map(|(pos, e)| {
                                let t = e.time as usize;
                                let channel = if layout.depthwise {
                                    0
                                } else {
                                    (t % blocks) * lanes + e.lane as usize
                                };
                                ScheduledWeight {
                                    row: pos / lanes,
                                    channel,
                                    kernel_x: (t / blocks) % layout.kx.max(1),
                                    kernel_y: t / (layout.kx.max(1) * blocks),
                                    bits: e.value,
                                }
                            })
                            .collect();
                        (!weights.is_empty()).then_some(ScheduleStep {
                            buffer_time: time,
                            weights,
                        })
                    })
                    .collect()
            })
            .collect()
    }
}

/// True while any set in `init..max` still has steps pending
pub fn check_schedule(schedule: &Schedule, init: usize, max: usize) -> bool {
    schedule[init..max.min(schedule.len())]
        .iter()
        .any(|steps| !steps.is_empty())
}

/// Retire the step just processed by every set in `init..max`
pub fn update_schedule(schedule: &mut Schedule, init: usize, max: usize) {
    let end = max.min(schedule.len());
    for steps in schedule[init..end].iter_mut() {
        steps.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn buffer_from(sets: &[Vec<Vec<u16>>], lanes: usize) -> WeightBuffer {
        let time = sets[0].len();
        let width = sets[0][0].len();
        let mut wb = WeightBuffer::new(sets.len(), time, width);
        for (s, set) in sets.iter().enumerate() {
            for (t, line) in set.iter().enumerate() {
                for (p, &v) in line.iter().enumerate() {
                    wb.set(s, t, p, BufferEntry::new(v, t as u32, (p % lanes) as u16));
                }
            }
        }
        wb
    }

    fn layout() -> ScheduleLayout {
        ScheduleLayout {
            lanes: 1,
            kx: 1,
            blocks: 1,
            depthwise: false,
        }
    }

    #[test]
    fn test_promotes_within_lookahead() {
        let tactical = BitTactical::new(2, 0, SearchShape::L);
        let mut wb = buffer_from(&[vec![vec![0], vec![0], vec![5], vec![0]]], 1);
        tactical.schedule(&mut wb, 1);

        assert_eq!(wb.get(0, 0, 0), BufferEntry::new(5, 2, 0));
        assert_eq!(wb.nonzero(), 1);

        let dense = tactical.dense_scheduler(&wb, layout());
        assert_eq!(dense[0].len(), 1);
        assert_eq!(dense[0][0].buffer_time, 0);
        assert_eq!(dense[0][0].weights[0].bits, 5);
        assert_eq!(dense[0][0].weights[0].kernel_y, 2);
    }

    #[test]
    fn test_lookahead_bounds_promotion() {
        let tactical = BitTactical::new(1, 0, SearchShape::L);
        let mut wb = buffer_from(&[vec![vec![0], vec![0], vec![5], vec![0]]], 1);
        tactical.schedule(&mut wb, 1);
        // Moves one step at a time, never more than H ahead of its origin
        assert_eq!(wb.get(0, 1, 0).value, 5);
        assert_eq!(wb.get(0, 0, 0).value, 0);
    }

    #[test]
    fn test_lookaside_uses_neighbour_lane() {
        let tactical = BitTactical::new(1, 1, SearchShape::L);
        let mut wb = buffer_from(&[vec![vec![3, 0], vec![4, 0]]], 2);
        tactical.schedule(&mut wb, 2);
        assert_eq!(wb.get(0, 0, 1), BufferEntry::new(4, 1, 0));
        assert_eq!(wb.get(0, 0, 0).value, 3);
        assert!(tactical.check_zero_line(wb.row(0, 1)));
    }

    #[test]
    fn test_conservation_and_monotonicity() {
        let tactical = BitTactical::new(2, 2, SearchShape::T);
        let sets = vec![
            vec![vec![0, 1, 0, 0], vec![2, 0, 0, 3], vec![0, 0, 4, 0], vec![5, 6, 0, 7]],
            vec![vec![0, 0, 0, 0], vec![0, 0, 0, 0], vec![0, 9, 0, 0], vec![0, 0, 0, 8]],
        ];
        let mut wb = buffer_from(&sets, 2);
        let before = wb.nonzero();
        let mut values_before: Vec<u16> = sets.iter().flatten().flatten().copied().filter(|&v| v != 0).collect();
        tactical.schedule(&mut wb, 2);
        assert_eq!(wb.nonzero(), before);

        let mut values_after = Vec::new();
        for s in 0..wb.sets() {
            for t in 0..wb.time() {
                for e in wb.row(s, t).iter().filter(|e| e.value != 0) {
                    assert!(e.time as usize >= t);
                    values_after.push(e.value);
                }
            }
        }
        values_before.sort();
        values_after.sort();
        assert_eq!(values_before, values_after);

        let dense = tactical.dense_scheduler(&wb, ScheduleLayout { lanes: 2, kx: 1, blocks: 1, depthwise: false });
        for (s, steps) in dense.iter().enumerate() {
            assert!(steps.len() <= wb.time());
            let count: usize = steps.iter().map(|st| st.weights.len()).sum();
            let expected = (0..wb.time())
                .map(|t| wb.row(s, t).iter().filter(|e| e.value != 0).count())
                .sum::<usize>();
            assert_eq!(count, expected);
        }
    }

    #[test]
    fn test_search_space_shapes() {
        let l = BitTactical::new(2, 2, SearchShape::L);
        assert_eq!(l.search_space(), vec![(1, 0), (2, 0), (1, 1), (1, 2)]);
        let t = BitTactical::new(1, 3, SearchShape::T);
        assert_eq!(t.search_space(), vec![(1, 0), (1, 1), (1, -1), (1, 2)]);
    }

    #[test]
    fn test_metadata_bits() {
        assert_eq!(BitTactical::new(2, 0, SearchShape::L).metadata_bits(), 2);
        assert_eq!(BitTactical::new(2, 5, SearchShape::T).metadata_bits(), 3);
        assert_eq!(BitTactical::new(0, 0, SearchShape::L).metadata_bits(), 0);
    }

    #[test]
    fn test_check_and_update_schedule() {
        let tactical = BitTactical::new(2, 0, SearchShape::L);
        let mut wb = buffer_from(&[vec![vec![1], vec![0], vec![0]], vec![vec![1], vec![2], vec![0]]], 1);
        tactical.schedule(&mut wb, 1);
        let mut dense = tactical.dense_scheduler(&wb, layout());
        assert!(check_schedule(&dense, 0, 2));
        update_schedule(&mut dense, 0, 2);
        assert!(!check_schedule(&dense, 0, 1));
        assert!(check_schedule(&dense, 0, 2));
        update_schedule(&mut dense, 0, 2);
        assert!(!check_schedule(&dense, 0, 2));
    }

    #[test]
    fn test_zero_line() {
        let tactical = BitTactical::new(1, 0, SearchShape::L);
        assert!(tactical.check_zero_line(&[BufferEntry::default(); 3]));
        assert!(!tactical.check_zero_line(&[BufferEntry::new(1, 0, 0)]));
    }
}
