#[cfg(test)]
mod device_tests;

use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};

/// Block-granular access to a fixed-size volume.
///
/// Every transfer moves whole blocks: buffer lengths must be a multiple of
/// the block size. Transfers reaching past the last block are truncated and
/// the number of bytes actually moved is returned, the same way a real device
/// simply stops at its final sector.
pub trait BlockDevice {
    fn block_size(&self) -> u32;

    fn block_count(&self) -> u32;

    /// Read `buf.len() / block_size` blocks starting at `first_block`.
    /// Returns the number of bytes copied.
    fn read_blocks(&self, first_block: u32, buf: &mut [u8]) -> usize;

    /// Write `data.len() / block_size` blocks starting at `first_block`.
    /// Returns the number of bytes written.
    fn write_blocks(&mut self, first_block: u32, data: &[u8]) -> usize;
}

/// A volume backed by a memory-mapped image file on the host file system.
pub struct DiskImage {
    path: PathBuf,
    map: MmapMut,
    block_size: u32,
    block_count: u32,
}

impl DiskImage {
    /// Create a fresh, zero-filled image, replacing any existing file.
    ///
    /// # Errors
    /// Returns an error if the image cannot be created, sized, or mapped.
    pub fn create(path: &Path, block_size: u32, block_count: u32) -> anyhow::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Self::map_file(file, path, block_size, block_count)
    }

    /// Open an existing image. The file must already hold exactly
    /// `block_size * block_count` bytes.
    ///
    /// # Errors
    /// Returns an error if the image is missing, has the wrong length, or
    /// cannot be mapped.
    pub fn open(path: &Path, block_size: u32, block_count: u32) -> anyhow::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)?;
        let expected = u64::from(block_size) * u64::from(block_count);
        let actual = file.metadata()?.len();
        if actual != expected {
            anyhow::bail!(
                "image {} holds {actual} bytes, expected {expected}",
                path.display()
            );
        }
        Self::map_file(file, path, block_size, block_count)
    }

    fn map_file(
        file: std::fs::File,
        path: &Path,
        block_size: u32,
        block_count: u32,
    ) -> anyhow::Result<Self> {
        let len = u64::from(block_size) * u64::from(block_count);
        file.set_len(len)?;
        let map_len = usize::try_from(len)
            .map_err(|_| anyhow::anyhow!("image length {len} exceeds addressable size"))?;
        let map = unsafe { MmapOptions::new().len(map_len).map_mut(&file)? };
        Ok(Self {
            path: path.to_path_buf(),
            map,
            block_size,
            block_count,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn len(&self) -> u64 {
        self.block_size as u64 * self.block_count as u64
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.block_count == 0
    }
}

impl BlockDevice for DiskImage {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn block_count(&self) -> u32 {
        self.block_count
    }

    fn read_blocks(&self, first_block: u32, buf: &mut [u8]) -> usize {
        debug_assert_eq!(buf.len() % self.block_size as usize, 0);
        let off = first_block as usize * self.block_size as usize;
        if off >= self.map.len() {
            return 0;
        }
        let end = off.saturating_add(buf.len()).min(self.map.len());
        let src = &self.map[off..end];
        let n = src.len();
        buf[..n].copy_from_slice(src);
        n
    }

    fn write_blocks(&mut self, first_block: u32, data: &[u8]) -> usize {
        debug_assert_eq!(data.len() % self.block_size as usize, 0);
        let off = first_block as usize * self.block_size as usize;
        if off >= self.map.len() {
            return 0;
        }
        let end = off.saturating_add(data.len()).min(self.map.len());
        let dst = &mut self.map[off..end];
        let n = dst.len();
        dst.copy_from_slice(&data[..n]);
        n
    }
}
