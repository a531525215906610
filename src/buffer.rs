//! Flat on-chip buffers
//!
//! Every buffer is one contiguous arena indexed by computed offsets while
//! keeping the logical `[set][time][position]` shape.

use crate::memory::NULL_ADDR;

/// One buffered value with the slot it originally came from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferEntry {
    pub value: u16,
    /// Original time step
    pub time: u32,
    /// Original lane
    pub lane: u16,
}

impl BufferEntry {
    pub fn new(value: u16, time: u32, lane: u16) -> Self {
        Self { value, time, lane }
    }
}

/// Weights laid out as `[filter set][time][row * lanes + lane]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightBuffer {
    sets: usize,
    time: usize,
    width: usize,
    entries: Vec<BufferEntry>,
}

impl WeightBuffer {
    pub fn new(sets: usize, time: usize, width: usize) -> Self {
        Self {
            sets,
            time,
            width,
            entries: vec![BufferEntry::default(); sets * time * width],
        }
    }

    pub fn sets(&self) -> usize {
        self.sets
    }

    pub fn time(&self) -> usize {
        self.time
    }

    pub fn width(&self) -> usize {
        self.width
    }

    fn offset(&self, set: usize, time: usize) -> usize {
        (set * self.time + time) * self.width
    }

    pub fn row(&self, set: usize, time: usize) -> &[BufferEntry] {
        let start = self.offset(set, time);
        &self.entries[start..start + self.width]
    }

    pub fn get(&self, set: usize, time: usize, pos: usize) -> BufferEntry {
        self.entries[self.offset(set, time) + pos]
    }

    pub fn set(&mut self, set: usize, time: usize, pos: usize, entry: BufferEntry) {
        let idx = self.offset(set, time) + pos;
        self.entries[idx] = entry;
    }

    pub fn nonzero(&self) -> usize {
        self.entries.iter().filter(|e| e.value != 0).count()
    }
}

/// One group of windows laid out as `[time][column * lanes + lane]`, with
/// the on-chip address, bank and row of every activation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowBuffer {
    time: usize,
    width: usize,
    accesses: usize,
    entries: Vec<BufferEntry>,
    rows: Vec<u64>,
    addresses: Vec<u64>,
    banks: Vec<Option<u32>>,
}

impl WindowBuffer {
    /// `accesses` is the number of address slots per time step
    pub fn new(time: usize, width: usize, accesses: usize) -> Self {
        Self {
            time,
            width,
            accesses,
            entries: vec![BufferEntry::default(); time * width],
            rows: vec![NULL_ADDR; time * width],
            addresses: vec![NULL_ADDR; time * accesses],
            banks: vec![None; time * accesses],
        }
    }

    pub fn time(&self) -> usize {
        self.time
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn get(&self, time: usize, pos: usize) -> BufferEntry {
        self.entries[time * self.width + pos]
    }

    /// On-chip row holding the activation, `NULL_ADDR` for padding lanes
    pub fn nm_row(&self, time: usize, pos: usize) -> u64 {
        self.rows[time * self.width + pos]
    }

    pub fn set(&mut self, time: usize, pos: usize, entry: BufferEntry, nm_row: u64) {
        self.entries[time * self.width + pos] = entry;
        self.rows[time * self.width + pos] = nm_row;
    }

    pub fn set_access(&mut self, time: usize, slot: usize, address: u64, bank: u32) {
        self.addresses[time * self.accesses + slot] = address;
        self.banks[time * self.accesses + slot] = Some(bank);
    }

    pub fn addresses(&self, time: usize) -> &[u64] {
        &self.addresses[time * self.accesses..(time + 1) * self.accesses]
    }

    pub fn banks(&self, time: usize) -> &[Option<u32>] {
        &self.banks[time * self.accesses..(time + 1) * self.accesses]
    }
}

/// Addresses or banks laid out as `[filter set][time][access]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessBuffer<T> {
    time: usize,
    width: usize,
    slots: Vec<T>,
}

impl<T: Copy> AccessBuffer<T> {
    pub fn new(sets: usize, time: usize, width: usize, fill: T) -> Self {
        Self {
            time,
            width,
            slots: vec![fill; sets * time * width],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    fn offset(&self, set: usize, time: usize) -> usize {
        (set * self.time + time) * self.width
    }

    pub fn row(&self, set: usize, time: usize) -> &[T] {
        let start = self.offset(set, time);
        &self.slots[start..start + self.width]
    }

    pub fn set(&mut self, set: usize, time: usize, slot: usize, value: T) {
        let idx = self.offset(set, time) + slot;
        self.slots[idx] = value;
    }
}

/// Accesses beyond the first that land on an already busy bank
pub fn bank_conflicts<'a>(banks: impl IntoIterator<Item = &'a Option<u32>>) -> u64 {
    let mut seen: Vec<u32> = Vec::new();
    let mut conflicts = 0;
    for bank in banks.into_iter().flatten() {
        if seen.contains(bank) {
            conflicts += 1;
        } else {
            seen.push(*bank);
        }
    }
    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_weight_buffer_layout() {
        let mut wb = WeightBuffer::new(2, 3, 4);
        wb.set(1, 2, 3, BufferEntry::new(7, 2, 3));
        assert_eq!(wb.get(1, 2, 3).value, 7);
        assert_eq!(wb.row(1, 2)[3], BufferEntry::new(7, 2, 3));
        assert_eq!(wb.row(0, 2), &[BufferEntry::default(); 4]);
        assert_eq!(wb.nonzero(), 1);
    }

    #[test]
    fn test_window_buffer_accesses() {
        let mut wb = WindowBuffer::new(2, 4, 2);
        wb.set(1, 1, BufferEntry::new(3, 1, 1), 5);
        wb.set_access(1, 0, 64, 2);
        assert_eq!(wb.get(1, 1).value, 3);
        assert_eq!(wb.nm_row(1, 1), 5);
        assert_eq!(wb.nm_row(0, 0), NULL_ADDR);
        assert_eq!(wb.addresses(1), &[64, NULL_ADDR]);
        assert_eq!(wb.banks(0), &[None::<u32>, None]);
    }

    #[test]
    fn test_bank_conflicts() {
        let banks = [Some(0), Some(1), Some(0), None, Some(0)];
        assert_eq!(bank_conflicts(&banks), 2);
    }
}
