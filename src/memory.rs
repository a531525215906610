//! Off-chip DRAM and on-chip global buffer collaborators

use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};

/// Marker for an unused address slot
pub const NULL_ADDR: u64 = u64::MAX;

/// Inclusive range of block addresses `(first, last)`
pub type AddressRange = (u64, u64);

/// Simulated DRAM address space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dram {
    pub start_act_address: u64,
    pub start_wgt_address: u64,
    /// Bytes moved per transfer
    pub width: u64,
    /// Bits per activation value
    pub act_data_size: u32,
    /// Bits per weight value
    pub wgt_data_size: u32,
}

impl Default for Dram {
    fn default() -> Self {
        Self {
            start_act_address: 0x0000_0000,
            start_wgt_address: 0x8000_0000,
            width: 8,
            act_data_size: 16,
            wgt_data_size: 16,
        }
    }
}

impl Dram {
    pub fn validate(&self) -> SimResult<()> {
        if self.width == 0 {
            return Err(SimError::config("DRAM width must be positive"));
        }
        if self.act_data_size == 0 || self.wgt_data_size == 0 {
            return Err(SimError::config("DRAM data sizes must be positive"));
        }
        if self.act_values_per_block() == 0 || self.wgt_values_per_block() == 0 {
            return Err(SimError::config("DRAM width is narrower than one value"));
        }
        Ok(())
    }

    pub fn act_values_per_block(&self) -> u64 {
        self.width * 8 / self.act_data_size as u64
    }

    pub fn wgt_values_per_block(&self) -> u64 {
        self.width * 8 / self.wgt_data_size as u64
    }

    /// Merge addresses into ranges of consecutive blocks.
    ///
    /// Null slots are dropped and duplicates collapse, so the result is
    /// sorted and disjoint.
    pub fn compress_addresses(&self, addresses: &[u64]) -> Vec<AddressRange> {
        let mut sorted: Vec<u64> = addresses.iter().copied().filter(|&a| a != NULL_ADDR).collect();
        sorted.sort_unstable();
        sorted.dedup();

        let mut ranges: Vec<AddressRange> = Vec::new();
        for address in sorted {
            match ranges.last_mut() {
                Some(last) if last.1 + self.width == address => last.1 = address,
                _ => ranges.push((address, address)),
            }
        }
        ranges
    }

    /// Number of transfers needed to move `ranges`
    pub fn transfers(&self, ranges: &[AddressRange]) -> u64 {
        ranges
            .iter()
            .map(|&(first, last)| (last - first) / self.width + 1)
            .sum()
    }
}

/// On-chip global buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalBuffer {
    /// Activation capacity in bytes
    pub act_size: u64,
    /// Weight capacity in bytes
    pub wgt_size: u64,
    pub act_banks: u32,
    pub wgt_banks: u32,
    /// Bytes per on-chip row
    pub row_size: u64,
}

impl Default for GlobalBuffer {
    fn default() -> Self {
        Self {
            act_size: 4 * 1024 * 1024,
            wgt_size: 4 * 1024 * 1024,
            act_banks: 16,
            wgt_banks: 16,
            row_size: 64,
        }
    }
}

impl GlobalBuffer {
    pub fn validate(&self) -> SimResult<()> {
        if self.act_size == 0 || self.wgt_size == 0 {
            return Err(SimError::config("global buffer capacity must be positive"));
        }
        if self.act_banks == 0 || self.wgt_banks == 0 {
            return Err(SimError::config("global buffer needs at least one bank"));
        }
        if self.row_size == 0 {
            return Err(SimError::config("global buffer row size must be positive"));
        }
        Ok(())
    }
}
