//! Bit-level lookup tables and window iteration
//!
//! The tables are computed once per process and shared read-only between
//! all simulation threads:
//! - radix-4 (booth-like) recoding of every 16-bit value
//! - effectual (set) bit count of every 16-bit value
//! - lowest and highest set-bit position of every 16-bit value

use std::sync::LazyLock;

/// Width of the simulated data words
pub const DATA_WIDTH: u32 = 16;

static BOOTH_TABLE: LazyLock<Vec<u32>> =
    LazyLock::new(|| (0..=u16::MAX).map(generate_booth_encoding).collect());

static EFFECTUAL_BITS_TABLE: LazyLock<Vec<u8>> =
    LazyLock::new(|| (0..=u16::MAX).map(count_set_bits).collect());

static MIN_MAX_TABLE: LazyLock<Vec<(u8, u8)>> =
    LazyLock::new(|| (0..=u16::MAX).map(generate_min_max).collect());

/// Recode a value scanning overlapping 3-bit windows from the MSB.
///
/// Only values that shrink are recoded; a run of ones collapses into one
/// leading digit plus one closing digit. The result can carry a digit at
/// bit 16, hence the wider return type.
fn generate_booth_encoding(n: u16) -> u32 {
    let padded = (n as u32) << 2;
    let mut encoding: u32 = 0;
    let mut in_run = false;

    for i in 0..DATA_WIDTH {
        let window = (padded >> (DATA_WIDTH - 1 - i)) & 0b111;
        encoding <<= 1;
        match window {
            0b000 | 0b001 => {}
            0b010 | 0b011 => {
                if in_run {
                    encoding |= 0x1;
                }
            }
            0b100 => {
                encoding |= 0x1;
                in_run = false;
            }
            0b101 | 0b110 => {
                if !in_run {
                    encoding |= 0x1;
                }
            }
            _ => {
                if !in_run {
                    encoding |= 0x2;
                    in_run = true;
                }
            }
        }
    }

    encoding
}

fn count_set_bits(n: u16) -> u8 {
    let mut bits = n;
    let mut count = 0u8;
    while bits != 0 {
        count += (bits & 1) as u8;
        bits >>= 1;
    }
    count
}

fn generate_min_max(n: u16) -> (u8, u8) {
    if n == 0 {
        return (DATA_WIDTH as u8, 0);
    }
    (n.trailing_zeros() as u8, (15 - n.leading_zeros()) as u8)
}

/// Booth-like recoding of `value`
pub fn booth_encoding(value: u16) -> u32 {
    BOOTH_TABLE[value as usize]
}

/// Number of set bits of `value`
pub fn effectual_bits(value: u16) -> u8 {
    EFFECTUAL_BITS_TABLE[value as usize]
}

/// Lowest and highest set-bit positions of `value`; zero maps to `(16, 0)`
pub fn min_max(value: u16) -> (u8, u8) {
    MIN_MAX_TABLE[value as usize]
}

/// Positions of the set bits of `bits`, lowest first
pub fn bit_offsets(bits: u32) -> impl Iterator<Item = u8> {
    (0..32u8).filter(move |b| bits & (1u32 << b) != 0)
}

/// Mask of the sign bit for a value of `prec` bits
pub fn sign_mask(prec: u32) -> u16 {
    match prec {
        0 => 0,
        p if p >= DATA_WIDTH => 1 << (DATA_WIDTH - 1),
        p => 1 << (p - 1),
    }
}

/// Mask of the magnitude bits for a value of `prec` bits
pub fn magnitude_mask(prec: u32) -> u16 {
    sign_mask(prec).wrapping_sub(1)
}

/// Lazily partitions an `out_x` by `out_y` output map into batches of at
/// most `columns` window coordinates, x fastest.
///
/// Batch `k` holds windows `k * columns ..` in row-major order, so it is also
/// window set `k`. Once exhausted the iterator returns `None` a single time
/// and then starts again from the first window.
#[derive(Debug, Clone)]
pub struct WindowIterator {
    out_x: usize,
    out_y: usize,
    columns: usize,
    x: usize,
    y: usize,
}

impl WindowIterator {
    pub fn new(out_x: usize, out_y: usize, columns: usize) -> Self {
        Self {
            out_x,
            out_y,
            columns: columns.max(1),
            x: 0,
            y: 0,
        }
    }

    /// Restart from the first window
    pub fn reset(&mut self) {
        self.x = 0;
        self.y = 0;
    }
}

impl Iterator for WindowIterator {
    type Item = Vec<(usize, usize)>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut batch = Vec::with_capacity(self.columns);
        while self.y < self.out_y && batch.len() < self.columns {
            batch.push((self.x, self.y));
            self.x += 1;
            if self.x >= self.out_x {
                self.x = 0;
                self.y += 1;
            }
        }

        if batch.is_empty() {
            self.reset();
            None
        } else {
            Some(batch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    #[test]
    fn test_booth_known_values() {
        assert_eq!(booth_encoding(0), 0);
        assert_eq!(booth_encoding(1), 0b1);
        assert_eq!(booth_encoding(3), 0b11);
        assert_eq!(booth_encoding(7), 0b1001);
        assert_eq!(booth_encoding(15), 0b10001);
        assert_eq!(booth_encoding(0x7fff), 0x8001);
        assert_eq!(booth_encoding(0xffff), 0x10001);
    }

    #[test]
    fn test_booth_never_adds_digits() {
        for n in 0..=u16::MAX {
            assert!(booth_encoding(n).count_ones() <= n.count_ones(), "value {}", n);
        }
    }

    /// Digit positions and signed value of the recoding, one bit at a time
    /// from the MSB. A run of three or more ones becomes a leading digit
    /// above it, minus one digit per inner zero and one at its lowest bit.
    fn reference_booth(n: u16) -> (u32, i64) {
        let bit = |q: i32| q >= 0 && (n >> q) & 1 == 1;
        let mut digits = 0u32;
        let mut value = 0i64;
        let mut in_run = false;
        for q in (0..DATA_WIDTH as i32).rev() {
            if in_run {
                if !bit(q) {
                    digits |= 1u32 << q;
                    value -= 1i64 << q;
                } else if !bit(q - 1) && !bit(q - 2) {
                    digits |= 1u32 << q;
                    value -= 1i64 << q;
                    in_run = false;
                }
            } else if bit(q) && bit(q - 1) && bit(q - 2) {
                digits |= 1u32 << (q + 1);
                value += 1i64 << (q + 1);
                in_run = true;
            } else if bit(q) {
                digits |= 1u32 << q;
                value += 1i64 << q;
            }
        }
        (digits, value)
    }

    #[test]
    fn test_booth_matches_bitwise_recoding() {
        for n in 0..=u16::MAX {
            let (digits, value) = reference_booth(n);
            assert_eq!(value, n as i64, "value {}", n);
            assert_eq!(booth_encoding(n), digits, "value {}", n);
        }
    }

    #[test]
    fn test_effectual_bits_matches_popcount() {
        for n in 0..=u16::MAX {
            assert_eq!(effectual_bits(n) as u32, n.count_ones());
        }
    }

    #[test]
    fn test_min_max_matches_scan() {
        assert_eq!(min_max(0), (16, 0));
        for n in 1..=u16::MAX {
            let offsets: Vec<u8> = bit_offsets(n as u32).collect();
            assert_eq!(min_max(n), (offsets[0], offsets[offsets.len() - 1]));
        }
    }

    #[test]
    fn test_masks() {
        assert_eq!(sign_mask(8), 0x80);
        assert_eq!(magnitude_mask(8), 0x7f);
        assert_eq!(sign_mask(16), 0x8000);
        assert_eq!(magnitude_mask(0), 0xffff);
    }

    #[test]
    fn test_window_iterator_covers_once() {
        let mut it = WindowIterator::new(5, 3, 4);
        let mut seen = HashSet::new();
        let mut batches = 0;
        for batch in it.by_ref() {
            assert!(batch.len() <= 4);
            for w in batch {
                assert!(seen.insert(w));
            }
            batches += 1;
        }
        assert_eq!(batches, 4);
        assert_eq!(seen.len(), 15);
    }

    #[test]
    fn test_window_iterator_restarts() {
        let mut it = WindowIterator::new(3, 3, 1);
        let first: Vec<_> = it.by_ref().collect();
        let second: Vec<_> = it.by_ref().collect();
        assert_eq!(first, second);
        assert_eq!(first[4], vec![(1, 1)]);
    }
}
