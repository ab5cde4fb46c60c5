//! Single-volume inode file system over a virtual block device.
//!
//! The volume is a flat array of equal-size blocks, addressed only through
//! block-granular reads and writes. On top of it sit the classic UNIX-style
//! structures: a superblock, a contiguous inode table, a single flat
//! directory, and a free-space bitmap kept in the final blocks of the volume.
//! Files are addressed through 12 direct pointers plus one single-indirect
//! pointer block.
//!
//! Everything is single-threaded and write-through: each structural mutation
//! (inode table, directory, bitmap) is written back to the device before the
//! operation returns. There is no cache to flush and no journal.

pub mod alloc;
pub mod device;
pub mod error;
pub mod fs;
pub mod layout;

pub use device::{BlockDevice, DiskImage};
pub use error::{FsError, FsResult};
pub use fs::{Fd, SimpleFs};
pub use layout::Geometry;
