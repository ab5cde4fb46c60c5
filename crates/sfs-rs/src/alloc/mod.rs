//! Free-space bitmap allocator: one bit per volume block, bit set = free.
//!
//! The bitmap lives in the final blocks of the volume and is written back
//! whole after every allocate/release. With no journal, immediate persistence
//! is the volume's only consistency story, so there is no batching and no
//! dirty tracking.


use tracing::debug;

use crate::device::BlockDevice;
use crate::error::{FsError, FsResult};
use crate::layout::Geometry;

pub struct BlockBitmap {
    bits: Vec<u8>,
    block_count: u32,
    data_start: u32,
    bitmap_start: u32,
}

impl BlockBitmap {
    /// Build and persist the bitmap for a fresh volume: every block free
    /// except the reserved regions (superblock, inode table, directory, the
    /// bitmap itself) and the padding bits past the last block.
    pub fn format(device: &mut impl BlockDevice, geom: &Geometry) -> Self {
        let mut bitmap = Self {
            bits: vec![0xFF; Self::region_bytes(geom)],
            block_count: geom.block_count,
            data_start: geom.data_start(),
            bitmap_start: geom.bitmap_start(),
        };
        for block in 0..geom.data_start() {
            bitmap.set(block, false);
        }
        for block in geom.bitmap_start()..geom.block_count {
            bitmap.set(block, false);
        }
        // Mark the padding past the last real block in use so a scan can
        // never hand it out.
        let capacity = u32::try_from(bitmap.bits.len() * 8).unwrap_or(u32::MAX);
        for bit in geom.block_count..capacity {
            bitmap.set(bit, false);
        }
        bitmap.persist(device);
        bitmap
    }

    /// Load the persisted bitmap region from the device.
    #[must_use]
    pub fn load(device: &impl BlockDevice, geom: &Geometry) -> Self {
        let mut bits = vec![0u8; Self::region_bytes(geom)];
        device.read_blocks(geom.bitmap_start(), &mut bits);
        Self {
            bits,
            block_count: geom.block_count,
            data_start: geom.data_start(),
            bitmap_start: geom.bitmap_start(),
        }
    }

    /// Claim the lowest-numbered free block, persist the bitmap, and hand the
    /// block back zero-filled.
    ///
    /// # Errors
    /// Returns `NoSpace` when no free bit remains.
    pub fn allocate(&mut self, device: &mut impl BlockDevice) -> FsResult<u32> {
        let Some(block) = self.first_free() else {
            debug!("block allocation failed: volume is full");
            return Err(FsError::NoSpace);
        };
        self.set(block, false);
        self.persist(device);
        let zero = vec![0u8; device.block_size() as usize];
        device.write_blocks(block, &zero);
        Ok(block)
    }

    /// Return a data block to the free pool and persist the bitmap.
    ///
    /// # Errors
    /// Returns `InvalidInput` for a block outside the data region.
    pub fn release(&mut self, device: &mut impl BlockDevice, block: u32) -> FsResult<()> {
        if block < self.data_start || block >= self.bitmap_start {
            return Err(FsError::InvalidInput);
        }
        self.set(block, true);
        self.persist(device);
        Ok(())
    }

    #[must_use]
    pub fn is_free(&self, block: u32) -> bool {
        self.get(block)
    }

    /// Number of free blocks left in the data region.
    #[must_use]
    pub fn free_blocks(&self) -> u32 {
        (self.data_start..self.bitmap_start)
            .filter(|&b| self.get(b))
            .count() as u32
    }

    /// Lowest free bit, byte order then LSB first within each byte.
    fn first_free(&self) -> Option<u32> {
        for (i, byte) in self.bits.iter().enumerate() {
            if *byte == 0 {
                continue;
            }
            let bit = i as u32 * 8 + byte.trailing_zeros();
            if bit >= self.block_count {
                return None;
            }
            return Some(bit);
        }
        None
    }

    fn persist(&self, device: &mut impl BlockDevice) {
        device.write_blocks(self.bitmap_start, &self.bits);
    }

    fn get(&self, block: u32) -> bool {
        let (byte, bit) = (block as usize >> 3, block & 7);
        (self.bits[byte] >> bit) & 1 == 1
    }

    fn set(&mut self, block: u32, free: bool) {
        let (byte, bit) = (block as usize >> 3, block & 7);
        let m = 1u8 << bit;
        if free {
            self.bits[byte] |= m;
        } else {
            self.bits[byte] &= !m;
        }
    }

    /// The bitmap occupies whole blocks on disk; the in-memory mirror keeps
    /// the same length so it can be written back verbatim.
    fn region_bytes(geom: &Geometry) -> usize {
        geom.bitmap_blocks() as usize * geom.block_size as usize
    }
}
