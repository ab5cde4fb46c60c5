//! On-disk format: fixed little-endian record codecs and the block-region
//! arithmetic that places each table inside the volume.
//!
//! Layout in block order:
//!
//! - block 0: superblock
//! - `[1, 1 + inode_table_blocks)`: inode table, packed 80-byte records
//! - next `dir_blocks`: directory region, packed 32-byte slots
//! - data blocks (file contents and indirect pointer blocks)
//! - final `bitmap_blocks`: free-space bitmap, one bit per volume block


use crate::error::{FsError, FsResult};

pub const SFS_MAGIC: u32 = 0xACBD_0005;

/// Direct block pointers per inode.
pub const DIRECT_PTRS: usize = 12;

/// Maximum file name length in bytes.
pub const MAX_NAME_LEN: usize = 20;

/// Width of one entry in an indirect pointer block.
pub const BLOCK_PTR_SIZE: u32 = 4;

pub const SUPERBLOCK_SIZE: usize = 32;
pub const INODE_SIZE: usize = 80;
pub const DIR_ENTRY_SIZE: usize = 32;

/// Volume geometry fixed at format time and validated against the persisted
/// superblock on every later mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub block_size: u32,
    pub block_count: u32,
    pub inode_count: u32,
}

impl Geometry {
    #[must_use]
    pub const fn new(block_size: u32, block_count: u32, inode_count: u32) -> Self {
        Self {
            block_size,
            block_count,
            inode_count,
        }
    }

    /// # Errors
    /// Returns `InvalidInput` when the regions do not fit the volume or the
    /// block size cannot hold the fixed records.
    pub fn validate(&self) -> FsResult<()> {
        if (self.block_size as usize) < SUPERBLOCK_SIZE
            || self.block_size % BLOCK_PTR_SIZE != 0
            || self.inode_count == 0
        {
            return Err(FsError::InvalidInput);
        }
        // At least one data block must remain between the directory region
        // and the bitmap region.
        if self.data_start() >= self.bitmap_start() {
            return Err(FsError::InvalidInput);
        }
        Ok(())
    }

    #[must_use]
    pub const fn inode_table_start(&self) -> u32 {
        1
    }

    #[must_use]
    pub fn inode_table_blocks(&self) -> u32 {
        bytes_to_blocks(self.inode_count as u64 * INODE_SIZE as u64, self.block_size)
    }

    #[must_use]
    pub fn dir_start(&self) -> u32 {
        self.inode_table_start() + self.inode_table_blocks()
    }

    /// One directory slot per inode is always enough: at most `inode_count`
    /// files can exist.
    #[must_use]
    pub fn dir_blocks(&self) -> u32 {
        bytes_to_blocks(
            self.inode_count as u64 * DIR_ENTRY_SIZE as u64,
            self.block_size,
        )
    }

    #[must_use]
    pub fn data_start(&self) -> u32 {
        self.dir_start() + self.dir_blocks()
    }

    #[must_use]
    pub fn bitmap_blocks(&self) -> u32 {
        let bitmap_bytes = u64::from(self.block_count).div_ceil(8);
        bytes_to_blocks(bitmap_bytes, self.block_size)
    }

    #[must_use]
    pub fn bitmap_start(&self) -> u32 {
        self.block_count - self.bitmap_blocks()
    }

    #[must_use]
    pub const fn ptrs_per_block(&self) -> u32 {
        self.block_size / BLOCK_PTR_SIZE
    }

    /// Hard ceiling on file length in blocks: 12 direct pointers plus one
    /// single-indirect block. There is no double-indirect tier.
    #[must_use]
    pub const fn max_file_blocks(&self) -> u64 {
        DIRECT_PTRS as u64 + self.ptrs_per_block() as u64
    }
}

fn bytes_to_blocks(bytes: u64, block_size: u32) -> u32 {
    u32::try_from(bytes.div_ceil(u64::from(block_size))).unwrap_or(u32::MAX)
}

/// Volume metadata held in block 0, written once at format time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperBlock {
    pub block_size: u32,
    pub block_count: u32,
    pub inode_count: u32,
    pub inode_table_blocks: u32,
    pub dir_blocks: u32,
    pub bitmap_blocks: u32,
    pub root_dir_inode: u32,
}

impl SuperBlock {
    #[must_use]
    pub fn for_geometry(geom: &Geometry) -> Self {
        Self {
            block_size: geom.block_size,
            block_count: geom.block_count,
            inode_count: geom.inode_count,
            inode_table_blocks: geom.inode_table_blocks(),
            dir_blocks: geom.dir_blocks(),
            bitmap_blocks: geom.bitmap_blocks(),
            root_dir_inode: 0,
        }
    }

    #[must_use]
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < SUPERBLOCK_SIZE {
            return None;
        }
        let magic = u32::from_le_bytes(buf[0..4].try_into().ok()?);
        if magic != SFS_MAGIC {
            return None;
        }
        Some(Self {
            block_size: u32::from_le_bytes(buf[4..8].try_into().ok()?),
            block_count: u32::from_le_bytes(buf[8..12].try_into().ok()?),
            inode_count: u32::from_le_bytes(buf[12..16].try_into().ok()?),
            inode_table_blocks: u32::from_le_bytes(buf[16..20].try_into().ok()?),
            dir_blocks: u32::from_le_bytes(buf[20..24].try_into().ok()?),
            bitmap_blocks: u32::from_le_bytes(buf[24..28].try_into().ok()?),
            root_dir_inode: u32::from_le_bytes(buf[28..32].try_into().ok()?),
        })
    }

    pub fn write_bytes(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&SFS_MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&self.block_size.to_le_bytes());
        buf[8..12].copy_from_slice(&self.block_count.to_le_bytes());
        buf[12..16].copy_from_slice(&self.inode_count.to_le_bytes());
        buf[16..20].copy_from_slice(&self.inode_table_blocks.to_le_bytes());
        buf[20..24].copy_from_slice(&self.dir_blocks.to_le_bytes());
        buf[24..28].copy_from_slice(&self.bitmap_blocks.to_le_bytes());
        buf[28..32].copy_from_slice(&self.root_dir_inode.to_le_bytes());
    }

    /// Whether the persisted metadata agrees with a mount-time geometry.
    #[must_use]
    pub fn matches(&self, geom: &Geometry) -> bool {
        self.block_size == geom.block_size
            && self.block_count == geom.block_count
            && self.inode_count == geom.inode_count
            && self.inode_table_blocks == geom.inode_table_blocks()
            && self.dir_blocks == geom.dir_blocks()
            && self.bitmap_blocks == geom.bitmap_blocks()
    }
}

/// Allocation state of an inode slot. An explicit discriminant, not an
/// overloaded mode value: allocation scans test this tag and nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeState {
    Free,
    Allocated,
}

/// One fixed-size inode record. The slot index is the file's permanent
/// identity; records are never relocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inode {
    pub state: InodeState,
    pub link_count: u32,
    /// Carried but unenforced, like `gid`.
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    /// Physical block numbers; 0 = unset (block 0 is the superblock and can
    /// never hold file data).
    pub direct: [u32; DIRECT_PTRS],
    pub indirect: u32,
}

impl Inode {
    #[must_use]
    pub const fn free() -> Self {
        Self {
            state: InodeState::Free,
            link_count: 0,
            uid: 0,
            gid: 0,
            size: 0,
            direct: [0; DIRECT_PTRS],
            indirect: 0,
        }
    }

    #[must_use]
    pub const fn allocated() -> Self {
        Self {
            state: InodeState::Allocated,
            link_count: 1,
            uid: 0,
            gid: 0,
            size: 0,
            direct: [0; DIRECT_PTRS],
            indirect: 0,
        }
    }

    #[must_use]
    pub const fn is_allocated(&self) -> bool {
        matches!(self.state, InodeState::Allocated)
    }

    /// # Errors
    /// Returns `Corrupt` on an unknown state tag.
    pub fn from_bytes(buf: &[u8; INODE_SIZE]) -> FsResult<Self> {
        let state = match buf[0] {
            0 => InodeState::Free,
            1 => InodeState::Allocated,
            _ => return Err(FsError::Corrupt),
        };
        let link_count = u32::from_le_bytes(buf[1..5].try_into().map_err(|_| FsError::Corrupt)?);
        let uid = u32::from_le_bytes(buf[5..9].try_into().map_err(|_| FsError::Corrupt)?);
        let gid = u32::from_le_bytes(buf[9..13].try_into().map_err(|_| FsError::Corrupt)?);
        let size = u64::from_le_bytes(buf[13..21].try_into().map_err(|_| FsError::Corrupt)?);
        let mut direct = [0u32; DIRECT_PTRS];
        let mut offset = 21;
        for slot in &mut direct {
            let end = offset + 4;
            *slot = u32::from_le_bytes(buf[offset..end].try_into().map_err(|_| FsError::Corrupt)?);
            offset = end;
        }
        let indirect = u32::from_le_bytes(
            buf[offset..offset + 4]
                .try_into()
                .map_err(|_| FsError::Corrupt)?,
        );
        Ok(Self {
            state,
            link_count,
            uid,
            gid,
            size,
            direct,
            indirect,
        })
    }

    pub fn write_bytes(&self, buf: &mut [u8; INODE_SIZE]) {
        buf.fill(0);
        buf[0] = match self.state {
            InodeState::Free => 0,
            InodeState::Allocated => 1,
        };
        buf[1..5].copy_from_slice(&self.link_count.to_le_bytes());
        buf[5..9].copy_from_slice(&self.uid.to_le_bytes());
        buf[9..13].copy_from_slice(&self.gid.to_le_bytes());
        buf[13..21].copy_from_slice(&self.size.to_le_bytes());
        let mut offset = 21;
        for slot in self.direct {
            let end = offset + 4;
            buf[offset..end].copy_from_slice(&slot.to_le_bytes());
            offset = end;
        }
        buf[offset..offset + 4].copy_from_slice(&self.indirect.to_le_bytes());
    }
}

/// One live directory entry: a file name bound to an inode slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub inode: u32,
    pub name: String,
}

impl DirEntry {
    /// # Errors
    /// Returns `InvalidInput` for an empty name or one longer than
    /// [`MAX_NAME_LEN`] bytes.
    pub fn new(inode: u32, name: &str) -> FsResult<Self> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(FsError::InvalidInput);
        }
        Ok(Self {
            inode,
            name: name.to_string(),
        })
    }

    /// Encode one directory slot; `None` writes a hole.
    pub fn encode_slot(slot: Option<&Self>, buf: &mut [u8; DIR_ENTRY_SIZE]) {
        buf.fill(0);
        let Some(entry) = slot else {
            return;
        };
        buf[0] = 1;
        buf[1..5].copy_from_slice(&entry.inode.to_le_bytes());
        let name = entry.name.as_bytes();
        buf[5] = name.len() as u8;
        buf[6..6 + name.len()].copy_from_slice(name);
    }

    /// Decode one directory slot; `Ok(None)` is a hole.
    ///
    /// # Errors
    /// Returns `Corrupt` on an unknown tag, an oversized name length, or a
    /// name that is not UTF-8.
    pub fn decode_slot(buf: &[u8; DIR_ENTRY_SIZE]) -> FsResult<Option<Self>> {
        match buf[0] {
            0 => Ok(None),
            1 => {
                let inode = u32::from_le_bytes(buf[1..5].try_into().map_err(|_| FsError::Corrupt)?);
                let name_len = buf[5] as usize;
                if name_len == 0 || name_len > MAX_NAME_LEN {
                    return Err(FsError::Corrupt);
                }
                let name = std::str::from_utf8(&buf[6..6 + name_len])
                    .map_err(|_| FsError::Corrupt)?
                    .to_string();
                Ok(Some(Self { inode, name }))
            }
            _ => Err(FsError::Corrupt),
        }
    }
}
