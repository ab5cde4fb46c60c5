//! The single flat directory: a fixed-capacity name→inode table mirrored in
//! memory and persisted whole after every mutation.

use crate::device::BlockDevice;
use crate::error::{FsError, FsResult};
use crate::layout::{DIR_ENTRY_SIZE, DirEntry, Geometry, Inode};

pub(crate) struct Directory {
    /// One slot per inode; `None` is a hole left by a removal.
    slots: Vec<Option<DirEntry>>,
    /// Enumeration position for [`Self::next_name`].
    cursor: usize,
    dir_start: u32,
    region_bytes: usize,
}

impl Directory {
    pub(crate) fn empty(geom: &Geometry) -> Self {
        Self {
            slots: vec![None; geom.inode_count as usize],
            cursor: 0,
            dir_start: geom.dir_start(),
            region_bytes: geom.dir_blocks() as usize * geom.block_size as usize,
        }
    }

    /// Load the persisted directory region. Entries pointing at an out-of-range
    /// or free inode are dropped as holes: a slot is only valid while its
    /// inode is allocated.
    pub(crate) fn load(
        device: &impl BlockDevice,
        geom: &Geometry,
        inodes: &[Inode],
    ) -> FsResult<Self> {
        let mut dir = Self::empty(geom);
        let mut buf = vec![0u8; dir.region_bytes];
        device.read_blocks(dir.dir_start, &mut buf);
        for (i, slot) in dir.slots.iter_mut().enumerate() {
            let record: &[u8; DIR_ENTRY_SIZE] = buf[i * DIR_ENTRY_SIZE..(i + 1) * DIR_ENTRY_SIZE]
                .try_into()
                .map_err(|_| FsError::Corrupt)?;
            let decoded = DirEntry::decode_slot(record)?;
            *slot = decoded.filter(|entry| {
                inodes
                    .get(entry.inode as usize)
                    .is_some_and(Inode::is_allocated)
            });
        }
        Ok(dir)
    }

    pub(crate) fn persist(&self, device: &mut impl BlockDevice) {
        let mut buf = vec![0u8; self.region_bytes];
        for (i, slot) in self.slots.iter().enumerate() {
            let record: &mut [u8; DIR_ENTRY_SIZE] = (&mut buf
                [i * DIR_ENTRY_SIZE..(i + 1) * DIR_ENTRY_SIZE])
                .try_into()
                .expect("directory region sized to hold every slot");
            DirEntry::encode_slot(slot.as_ref(), record);
        }
        device.write_blocks(self.dir_start, &buf);
    }

    /// Linear scan for an exact name match.
    pub(crate) fn lookup(&self, name: &str) -> Option<u32> {
        self.slots
            .iter()
            .flatten()
            .find(|entry| entry.name == name)
            .map(|entry| entry.inode)
    }

    /// Insert into the first hole. The caller guarantees the name is absent.
    ///
    /// # Errors
    /// Returns `NoSpace` when every slot is occupied.
    pub(crate) fn insert(&mut self, entry: DirEntry) -> FsResult<()> {
        let Some(slot) = self.slots.iter_mut().find(|slot| slot.is_none()) else {
            return Err(FsError::NoSpace);
        };
        *slot = Some(entry);
        Ok(())
    }

    /// Clear the slot holding `name`, returning its inode.
    pub(crate) fn remove(&mut self, name: &str) -> Option<u32> {
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(|entry| entry.name == name) {
                return slot.take().map(|entry| entry.inode);
            }
        }
        None
    }

    /// Next name in enumeration order, skipping holes. Returns `None` once
    /// per full pass and rewinds, so the following call starts over from the
    /// beginning.
    pub(crate) fn next_name(&mut self) -> Option<String> {
        while self.cursor < self.slots.len() {
            let slot = self.slots[self.cursor].as_ref();
            self.cursor += 1;
            if let Some(entry) = slot {
                return Some(entry.name.clone());
            }
        }
        self.cursor = 0;
        None
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }
}
