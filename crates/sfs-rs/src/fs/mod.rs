//! The mount session and the read/write storage engine.
//!
//! A [`SimpleFs`] owns every volume table (superblock, inode table,
//! directory, free-space bitmap, open-file table) and drives all file
//! operations through them. Exactly one operation is ever in flight; every
//! structural mutation is written back to the device before the call returns,
//! but two persists inside one call are not atomic with respect to each
//! other. A crash between them can leave the bitmap and inode table
//! disagreeing; that window is accepted, not mitigated.

mod dir;
#[cfg(test)]
mod fs_tests;

use tracing::{debug, info};

use crate::alloc::BlockBitmap;
use crate::device::BlockDevice;
use crate::error::{FsError, FsResult};
use crate::layout::{
    BLOCK_PTR_SIZE, DIRECT_PTRS, DirEntry, Geometry, INODE_SIZE, Inode, MAX_NAME_LEN, SuperBlock,
};
use self::dir::Directory;

/// Handle to an open file. Only valid against the session that issued it,
/// and only until the file is closed or removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fd(usize);

#[derive(Debug, Clone, Copy)]
struct OpenFile {
    inode: u32,
    /// Current read/write position in bytes.
    offset: u64,
}

/// A mounted volume.
pub struct SimpleFs<B: BlockDevice> {
    device: B,
    geom: Geometry,
    superblock: SuperBlock,
    inodes: Vec<Inode>,
    directory: Directory,
    bitmap: BlockBitmap,
    open_files: Vec<Option<OpenFile>>,
}

impl<B: BlockDevice> SimpleFs<B> {
    /// Write a fresh, empty file system onto the device.
    ///
    /// # Errors
    /// Returns `InvalidInput` when the geometry is unusable or does not match
    /// the device.
    pub fn format(mut device: B, geom: Geometry) -> FsResult<Self> {
        geom.validate()?;
        if device.block_size() != geom.block_size || device.block_count() != geom.block_count {
            return Err(FsError::InvalidInput);
        }

        let superblock = SuperBlock::for_geometry(&geom);
        let mut block = vec![0u8; geom.block_size as usize];
        superblock.write_bytes(&mut block);
        device.write_blocks(0, &block);

        let bitmap = BlockBitmap::format(&mut device, &geom);
        let mut fs = Self {
            device,
            geom,
            superblock,
            inodes: vec![Inode::free(); geom.inode_count as usize],
            directory: Directory::empty(&geom),
            bitmap,
            open_files: vec![None; geom.inode_count as usize],
        };
        fs.persist_inode_table();
        fs.directory.persist(&mut fs.device);
        info!(
            "formatted volume: blocks={}, block_size={}, inodes={}",
            geom.block_count, geom.block_size, geom.inode_count
        );
        Ok(fs)
    }

    /// Mount an existing volume, validating the persisted superblock against
    /// the expected geometry.
    ///
    /// # Errors
    /// Returns `Corrupt` when the magic is wrong or the superblock disagrees
    /// with `geom`.
    pub fn mount(device: B, geom: Geometry) -> FsResult<Self> {
        geom.validate()?;
        if device.block_size() != geom.block_size || device.block_count() != geom.block_count {
            return Err(FsError::InvalidInput);
        }

        let mut block = vec![0u8; geom.block_size as usize];
        device.read_blocks(0, &mut block);
        let superblock = SuperBlock::from_bytes(&block).ok_or(FsError::Corrupt)?;
        if !superblock.matches(&geom) {
            return Err(FsError::Corrupt);
        }

        let inodes = Self::load_inode_table(&device, &geom)?;
        let directory = Directory::load(&device, &geom, &inodes)?;
        let bitmap = BlockBitmap::load(&device, &geom);
        let fs = Self {
            device,
            geom,
            superblock,
            inodes,
            directory,
            bitmap,
            open_files: vec![None; geom.inode_count as usize],
        };
        info!(
            "mounted volume: blocks={}, inodes={}, files={}",
            geom.block_count,
            geom.inode_count,
            fs.directory.len()
        );
        Ok(fs)
    }

    /// Open `name`, creating the file when it does not exist. The offset
    /// starts at the current file size (append position). Opening a file
    /// that is already open reuses its handle.
    ///
    /// # Errors
    /// Returns `InvalidInput` for an unusable name and `NoSpace` when the
    /// inode table is full.
    pub fn open(&mut self, name: &str) -> FsResult<Fd> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(FsError::InvalidInput);
        }
        let inode_id = match self.directory.lookup(name) {
            Some(id) => id,
            None => self.create_file(name)?,
        };
        let size = self.inodes[inode_id as usize].size;

        if let Some(slot) = self
            .open_files
            .iter()
            .position(|slot| matches!(slot, Some(open) if open.inode == inode_id))
        {
            if let Some(open) = self.open_files[slot].as_mut() {
                open.offset = size;
            }
            return Ok(Fd(slot));
        }

        let Some(slot) = self.open_files.iter().position(Option::is_none) else {
            return Err(FsError::NoSpace);
        };
        self.open_files[slot] = Some(OpenFile {
            inode: inode_id,
            offset: size,
        });
        Ok(Fd(slot))
    }

    /// Release a handle. Closing a handle that is not open is an error, not
    /// a crash.
    ///
    /// # Errors
    /// Returns `NotFound` for a closed or unknown handle.
    pub fn close(&mut self, fd: Fd) -> FsResult<()> {
        let slot = self.open_files.get_mut(fd.0).ok_or(FsError::NotFound)?;
        if slot.take().is_none() {
            return Err(FsError::NotFound);
        }
        Ok(())
    }

    /// Move a handle's read/write position. Seeking past the end of the file
    /// is legal: the next write extends the file, and the skipped range
    /// carries no zero-fill guarantee.
    ///
    /// # Errors
    /// Returns `InvalidInput` for a negative position and `NotFound` for a
    /// handle that is not open.
    pub fn seek(&mut self, fd: Fd, pos: i64) -> FsResult<()> {
        if pos < 0 {
            return Err(FsError::InvalidInput);
        }
        self.open_slot_mut(fd)?.offset = pos as u64;
        Ok(())
    }

    /// Read up to `max_len` bytes from the handle's current position,
    /// advancing it. Running out of data is not an error: the result is
    /// simply shorter than requested, possibly empty.
    ///
    /// # Errors
    /// Returns `NotFound` for a handle that is not open.
    pub fn read(&mut self, fd: Fd, max_len: usize) -> FsResult<Vec<u8>> {
        let open = self.open_slot(fd)?;
        let inode_id = open.inode as usize;
        let inode = *self.inodes.get(inode_id).ok_or(FsError::NotFound)?;
        if !inode.is_allocated() {
            return Err(FsError::NotFound);
        }

        let block_size = u64::from(self.geom.block_size);
        let mut offset = open.offset;
        // Never observe bytes past the file size, even inside an allocated
        // block.
        let want = (max_len as u64).min(inode.size.saturating_sub(offset));
        let mut out = Vec::with_capacity(want as usize);
        while (out.len() as u64) < want {
            let logical = offset / block_size;
            let in_block = (offset % block_size) as usize;
            let Ok(block) = self.resolve_block(inode_id, logical, false) else {
                break; // end of data
            };
            let mut buf = vec![0u8; block_size as usize];
            self.device.read_blocks(block, &mut buf);
            let take = (block_size as usize - in_block).min((want - out.len() as u64) as usize);
            out.extend_from_slice(&buf[in_block..in_block + take]);
            offset += take as u64;
        }
        self.open_slot_mut(fd)?.offset = offset;
        Ok(out)
    }

    /// Write `data` at the handle's current position, allocating blocks as
    /// needed and advancing the position. The file size grows to the final
    /// position whenever the write moves past it. Returns how many bytes
    /// landed, which is less than `data.len()` when the volume fills up
    /// mid-write.
    ///
    /// # Errors
    /// Returns `NotFound` for a handle that is not open; `NoSpace` or
    /// `OutOfRange` when not a single byte could be placed.
    pub fn write(&mut self, fd: Fd, data: &[u8]) -> FsResult<usize> {
        let open = self.open_slot(fd)?;
        let inode_id = open.inode as usize;
        if !self
            .inodes
            .get(inode_id)
            .ok_or(FsError::NotFound)?
            .is_allocated()
        {
            return Err(FsError::NotFound);
        }

        let block_size = self.geom.block_size as usize;
        let mut offset = open.offset;
        let mut written = 0usize;
        while written < data.len() {
            let logical = offset / block_size as u64;
            let in_block = (offset % block_size as u64) as usize;
            let block = match self.resolve_block(inode_id, logical, true) {
                Ok(block) => block,
                // Nothing landed yet: surface the failure. Afterwards,
                // report the partial count instead.
                Err(err) if written == 0 => return Err(err),
                Err(_) => break,
            };
            let take = (block_size - in_block).min(data.len() - written);
            let mut buf = vec![0u8; block_size];
            if in_block != 0 || take != block_size {
                // Partial block: preserve the bytes outside the window.
                self.device.read_blocks(block, &mut buf);
            }
            buf[in_block..in_block + take].copy_from_slice(&data[written..written + take]);
            self.device.write_blocks(block, &buf);
            offset += take as u64;
            written += take;
            if offset > self.inodes[inode_id].size {
                self.inodes[inode_id].size = offset;
            }
        }
        self.open_slot_mut(fd)?.offset = offset;
        self.persist_inode_table();
        Ok(written)
    }

    /// File size by name.
    ///
    /// # Errors
    /// Returns `InvalidInput` for an unusable name, `NotFound` when absent.
    pub fn size_of(&self, name: &str) -> FsResult<u64> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(FsError::InvalidInput);
        }
        let inode_id = self.directory.lookup(name).ok_or(FsError::NotFound)?;
        Ok(self.inodes[inode_id as usize].size)
    }

    /// Delete a file: release every block it owns (direct, the indirect
    /// block, and each block the indirect block names), clear its directory
    /// entry, and reset the inode. Any handle still open on the file becomes
    /// invalid immediately.
    ///
    /// # Errors
    /// Returns `InvalidInput` for an unusable name, `NotFound` when absent.
    pub fn remove(&mut self, name: &str) -> FsResult<()> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(FsError::InvalidInput);
        }
        let inode_id = self.directory.remove(name).ok_or(FsError::NotFound)?;
        let inode = self.inodes[inode_id as usize];
        for block in inode.direct {
            if block != 0 {
                self.bitmap.release(&mut self.device, block)?;
            }
        }
        if inode.indirect != 0 {
            let mut entries = vec![0u8; self.geom.block_size as usize];
            self.device.read_blocks(inode.indirect, &mut entries);
            for index in 0..self.geom.ptrs_per_block() as usize {
                let block = read_ptr(&entries, index);
                if block != 0 {
                    self.bitmap.release(&mut self.device, block)?;
                }
            }
            self.bitmap.release(&mut self.device, inode.indirect)?;
        }
        self.inodes[inode_id as usize] = Inode::free();
        self.persist_inode_table();
        self.directory.persist(&mut self.device);
        for slot in &mut self.open_files {
            if matches!(slot, Some(open) if open.inode == inode_id) {
                *slot = None;
            }
        }
        debug!("removed {name:?}, freed inode {inode_id}");
        Ok(())
    }

    /// Next file name in enumeration order. Each full pass yields every file
    /// exactly once; after returning `None` the pass restarts from the
    /// beginning.
    pub fn next_file_name(&mut self) -> Option<String> {
        self.directory.next_name()
    }

    #[must_use]
    pub fn file_count(&self) -> usize {
        self.directory.len()
    }

    #[must_use]
    pub fn free_blocks(&self) -> u32 {
        self.bitmap.free_blocks()
    }

    #[must_use]
    pub fn geometry(&self) -> &Geometry {
        &self.geom
    }

    #[must_use]
    pub fn superblock(&self) -> &SuperBlock {
        &self.superblock
    }

    /// Map a logical block index to a physical block number. With `allocate`
    /// set, an unmapped index gets a fresh block (and the indirect block
    /// itself when first needed) and every touched structure is persisted;
    /// without it, an unmapped index is `OutOfRange`. Resolution is
    /// idempotent: once mapped, the same logical block always yields the
    /// same physical block.
    fn resolve_block(&mut self, inode_id: usize, logical: u64, allocate: bool) -> FsResult<u32> {
        if logical < DIRECT_PTRS as u64 {
            let slot = logical as usize;
            let mapped = self.inodes[inode_id].direct[slot];
            if mapped != 0 {
                return Ok(mapped);
            }
            if !allocate {
                return Err(FsError::OutOfRange);
            }
            let block = self.bitmap.allocate(&mut self.device)?;
            self.inodes[inode_id].direct[slot] = block;
            self.persist_inode_table();
            return Ok(block);
        }

        let index = logical - DIRECT_PTRS as u64;
        if index >= u64::from(self.geom.ptrs_per_block()) {
            // Hard ceiling on file size: there is no double-indirect tier.
            return Err(FsError::OutOfRange);
        }
        let index = index as usize;

        let indirect = self.inodes[inode_id].indirect;
        if indirect == 0 {
            if !allocate {
                return Err(FsError::OutOfRange);
            }
            let indirect_block = self.bitmap.allocate(&mut self.device)?;
            let data_block = match self.bitmap.allocate(&mut self.device) {
                Ok(block) => block,
                Err(err) => {
                    // Leave no half-built mapping behind.
                    self.bitmap.release(&mut self.device, indirect_block)?;
                    return Err(err);
                }
            };
            self.write_indirect_entry(indirect_block, index, data_block);
            self.inodes[inode_id].indirect = indirect_block;
            self.persist_inode_table();
            return Ok(data_block);
        }

        let mut entries = vec![0u8; self.geom.block_size as usize];
        self.device.read_blocks(indirect, &mut entries);
        let mapped = read_ptr(&entries, index);
        if mapped != 0 {
            return Ok(mapped);
        }
        if !allocate {
            return Err(FsError::OutOfRange);
        }
        let block = self.bitmap.allocate(&mut self.device)?;
        self.write_indirect_entry(indirect, index, block);
        Ok(block)
    }

    fn write_indirect_entry(&mut self, indirect_block: u32, index: usize, value: u32) {
        let mut entries = vec![0u8; self.geom.block_size as usize];
        self.device.read_blocks(indirect_block, &mut entries);
        let at = index * BLOCK_PTR_SIZE as usize;
        entries[at..at + 4].copy_from_slice(&value.to_le_bytes());
        self.device.write_blocks(indirect_block, &entries);
    }

    fn create_file(&mut self, name: &str) -> FsResult<u32> {
        let Some(idx) = self.inodes.iter().position(|inode| !inode.is_allocated()) else {
            debug!("inode allocation failed: table is full");
            return Err(FsError::NoSpace);
        };
        self.inodes[idx] = Inode::allocated();
        let inode_id = idx as u32;
        self.directory.insert(DirEntry::new(inode_id, name)?)?;
        self.persist_inode_table();
        self.directory.persist(&mut self.device);
        debug!("created {name:?} at inode {inode_id}");
        Ok(inode_id)
    }

    fn load_inode_table(device: &B, geom: &Geometry) -> FsResult<Vec<Inode>> {
        let region = geom.inode_table_blocks() as usize * geom.block_size as usize;
        let mut buf = vec![0u8; region];
        device.read_blocks(geom.inode_table_start(), &mut buf);
        let mut inodes = Vec::with_capacity(geom.inode_count as usize);
        for i in 0..geom.inode_count as usize {
            let record: &[u8; INODE_SIZE] = buf[i * INODE_SIZE..(i + 1) * INODE_SIZE]
                .try_into()
                .map_err(|_| FsError::Corrupt)?;
            inodes.push(Inode::from_bytes(record)?);
        }
        Ok(inodes)
    }

    fn persist_inode_table(&mut self) {
        let region = self.geom.inode_table_blocks() as usize * self.geom.block_size as usize;
        let mut buf = vec![0u8; region];
        for (i, inode) in self.inodes.iter().enumerate() {
            let record: &mut [u8; INODE_SIZE] = (&mut buf[i * INODE_SIZE..(i + 1) * INODE_SIZE])
                .try_into()
                .expect("inode table region sized to hold every record");
            inode.write_bytes(record);
        }
        self.device.write_blocks(self.geom.inode_table_start(), &buf);
    }

    fn open_slot(&self, fd: Fd) -> FsResult<OpenFile> {
        self.open_files
            .get(fd.0)
            .copied()
            .flatten()
            .ok_or(FsError::NotFound)
    }

    fn open_slot_mut(&mut self, fd: Fd) -> FsResult<&mut OpenFile> {
        self.open_files
            .get_mut(fd.0)
            .and_then(Option::as_mut)
            .ok_or(FsError::NotFound)
    }
}

fn read_ptr(entries: &[u8], index: usize) -> u32 {
    let at = index * BLOCK_PTR_SIZE as usize;
    u32::from_le_bytes(
        entries[at..at + 4]
            .try_into()
            .expect("pointer entry is 4 bytes"),
    )
}
