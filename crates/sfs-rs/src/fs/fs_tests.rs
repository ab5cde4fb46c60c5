use rand::RngCore;
use tempfile::TempDir;

use super::*;
use crate::device::DiskImage;
use crate::layout::DIRECT_PTRS;

const GEOM: Geometry = Geometry::new(1024, 100, 10);
const BS: usize = 1024;

fn fresh_fs(dir: &TempDir) -> SimpleFs<DiskImage> {
    let image = DiskImage::create(
        &dir.path().join("volume.img"),
        GEOM.block_size,
        GEOM.block_count,
    )
    .expect("create image");
    SimpleFs::format(image, GEOM).expect("format")
}

fn remount(dir: &TempDir) -> SimpleFs<DiskImage> {
    let image = DiskImage::open(
        &dir.path().join("volume.img"),
        GEOM.block_size,
        GEOM.block_count,
    )
    .expect("open image");
    SimpleFs::mount(image, GEOM).expect("mount")
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::rng().fill_bytes(&mut data);
    data
}

#[test]
fn two_block_file_roundtrips_across_remount() {
    let dir = TempDir::new().expect("tempdir");
    let payload = random_bytes(2 * BS);

    {
        let mut fs = fresh_fs(&dir);
        let fd = fs.open("x.txt").expect("open");
        assert_eq!(fs.write(fd, &payload).expect("write"), payload.len());
        assert_eq!(fs.size_of("x.txt").expect("size"), 2 * BS as u64);

        // Exactly two direct blocks, nothing indirect.
        let inode_id = fs.directory.lookup("x.txt").expect("entry") as usize;
        let inode = &fs.inodes[inode_id];
        assert!(inode.direct[0] != 0 && inode.direct[1] != 0);
        assert!(inode.direct[2..].iter().all(|&b| b == 0));
        assert_eq!(inode.indirect, 0);

        fs.close(fd).expect("close");
    }

    let mut fs = remount(&dir);
    let fd = fs.open("x.txt").expect("reopen");
    fs.seek(fd, 0).expect("seek");
    assert_eq!(fs.read(fd, payload.len()).expect("read"), payload);
}

#[test]
fn append_grows_size_by_exactly_the_written_length() {
    let dir = TempDir::new().expect("tempdir");
    let mut fs = fresh_fs(&dir);

    let fd = fs.open("log").expect("open");
    assert_eq!(fs.write(fd, &[7u8; 100]).expect("write"), 100);
    assert_eq!(fs.size_of("log").expect("size"), 100);
    assert_eq!(fs.write(fd, &[8u8; 50]).expect("write"), 50);
    assert_eq!(fs.size_of("log").expect("size"), 150);
}

#[test]
fn reopening_positions_the_handle_at_end_of_file() {
    let dir = TempDir::new().expect("tempdir");
    let mut fs = fresh_fs(&dir);

    let fd = fs.open("a").expect("open");
    fs.write(fd, b"hello").expect("write");
    fs.close(fd).expect("close");

    // Open-for-append: the fresh handle continues where the file ends.
    let fd = fs.open("a").expect("reopen");
    fs.write(fd, b" world").expect("write");
    fs.seek(fd, 0).expect("seek");
    assert_eq!(fs.read(fd, 64).expect("read"), b"hello world");
}

#[test]
fn double_open_reuses_the_handle() {
    let dir = TempDir::new().expect("tempdir");
    let mut fs = fresh_fs(&dir);

    let first = fs.open("a.txt").expect("open");
    let second = fs.open("a.txt").expect("open again");
    assert_eq!(first, second, "same file must not occupy two handles");
    assert_eq!(fs.file_count(), 1, "and must not create a second inode");
}

#[test]
fn oversized_names_are_rejected_before_lookup() {
    let dir = TempDir::new().expect("tempdir");
    let mut fs = fresh_fs(&dir);

    let long = "n".repeat(MAX_NAME_LEN + 1);
    assert_eq!(fs.open(&long), Err(FsError::InvalidInput));
    assert_eq!(fs.size_of(&long), Err(FsError::InvalidInput));
    assert_eq!(fs.remove(&long), Err(FsError::InvalidInput));
    assert_eq!(fs.open(""), Err(FsError::InvalidInput));

    let exact = "n".repeat(MAX_NAME_LEN);
    assert!(fs.open(&exact).is_ok());
}

#[test]
fn handle_lifecycle_is_closed_open_closed() {
    let dir = TempDir::new().expect("tempdir");
    let mut fs = fresh_fs(&dir);

    let fd = fs.open("f").expect("open");
    fs.close(fd).expect("close");
    assert_eq!(fs.close(fd), Err(FsError::NotFound), "double close");
    assert_eq!(fs.read(fd, 1), Err(FsError::NotFound));
    assert_eq!(fs.write(fd, b"x"), Err(FsError::NotFound));
    assert_eq!(fs.seek(fd, 0), Err(FsError::NotFound));
    assert_eq!(fs.close(Fd(99)), Err(FsError::NotFound), "unknown handle");
}

#[test]
fn seek_rejects_negative_positions_only() {
    let dir = TempDir::new().expect("tempdir");
    let mut fs = fresh_fs(&dir);

    let fd = fs.open("f").expect("open");
    assert_eq!(fs.seek(fd, -1), Err(FsError::InvalidInput));
    // Past EOF is legal; the bound is only checked on use.
    fs.seek(fd, 1 << 40).expect("seek far past EOF");
}

#[test]
fn seek_past_eof_then_write_extends_the_file() {
    let dir = TempDir::new().expect("tempdir");
    let mut fs = fresh_fs(&dir);

    let fd = fs.open("sparse").expect("open");
    fs.write(fd, &[1u8; 10]).expect("write");
    fs.seek(fd, 5000).expect("seek");
    assert_eq!(fs.write(fd, &[2u8; 10]).expect("write"), 10);
    assert_eq!(fs.size_of("sparse").expect("size"), 5010);

    fs.seek(fd, 5000).expect("seek back");
    assert_eq!(fs.read(fd, 10).expect("read"), [2u8; 10]);
}

#[test]
fn reads_stop_at_end_of_data() {
    let dir = TempDir::new().expect("tempdir");
    let mut fs = fresh_fs(&dir);

    let fd = fs.open("short").expect("open");
    fs.write(fd, &[9u8; 10]).expect("write");

    // At EOF: empty, not an error.
    assert_eq!(fs.read(fd, 100).expect("read"), Vec::<u8>::new());

    // A request larger than the file is clamped to the file size.
    fs.seek(fd, 0).expect("seek");
    assert_eq!(fs.read(fd, 100).expect("read").len(), 10);
}

#[test]
fn write_then_read_share_one_offset() {
    let dir = TempDir::new().expect("tempdir");
    let mut fs = fresh_fs(&dir);
    let payload = random_bytes(2 * BS);

    let fd = fs.open("f").expect("open");
    fs.write(fd, &payload).expect("write");
    fs.seek(fd, BS as i64).expect("seek");
    assert_eq!(fs.read(fd, 2 * BS).expect("read"), payload[BS..]);
}

#[test]
fn indirect_file_roundtrips() {
    let dir = TempDir::new().expect("tempdir");
    let payload = random_bytes(20 * BS + 123);

    {
        let mut fs = fresh_fs(&dir);
        let fd = fs.open("big.bin").expect("open");
        assert_eq!(fs.write(fd, &payload).expect("write"), payload.len());

        let inode_id = fs.directory.lookup("big.bin").expect("entry") as usize;
        assert_ne!(
            fs.inodes[inode_id].indirect, 0,
            "21 blocks must spill into the indirect tier"
        );
    }

    let mut fs = remount(&dir);
    let fd = fs.open("big.bin").expect("reopen");
    fs.seek(fd, 0).expect("seek");
    assert_eq!(fs.read(fd, payload.len()).expect("read"), payload);
}

#[test]
fn addressing_ceiling_is_hard() {
    let dir = TempDir::new().expect("tempdir");
    let mut fs = fresh_fs(&dir);
    let ceiling = GEOM.max_file_blocks() * BS as u64;

    let fd = fs.open("f").expect("open");
    fs.seek(fd, ceiling as i64).expect("seek");
    assert_eq!(fs.write(fd, b"x"), Err(FsError::OutOfRange));
    assert_eq!(fs.size_of("f").expect("size"), 0, "nothing may land");

    // A write crossing the ceiling stops at it and reports the partial count.
    fs.seek(fd, (ceiling - 512) as i64).expect("seek");
    assert_eq!(fs.write(fd, &[3u8; BS]).expect("write"), 512);
    assert_eq!(fs.size_of("f").expect("size"), ceiling);
}

#[test]
fn inode_exhaustion_leaves_existing_files_alone() {
    let dir = TempDir::new().expect("tempdir");
    let mut fs = fresh_fs(&dir);

    for i in 0..GEOM.inode_count {
        let fd = fs.open(&format!("file-{i}")).expect("open");
        fs.write(fd, &[i as u8; 16]).expect("write");
        fs.close(fd).expect("close");
    }
    assert_eq!(fs.open("one-too-many"), Err(FsError::NoSpace));

    assert_eq!(fs.file_count(), GEOM.inode_count as usize);
    for i in 0..GEOM.inode_count {
        assert_eq!(fs.size_of(&format!("file-{i}")).expect("size"), 16);
    }
}

#[test]
fn enumeration_is_complete_and_restartable() {
    let dir = TempDir::new().expect("tempdir");
    let mut fs = fresh_fs(&dir);

    for name in ["a", "b", "c"] {
        let fd = fs.open(name).expect("open");
        fs.close(fd).expect("close");
    }
    // Leave a hole so enumeration has to skip it.
    let fd = fs.open("gone").expect("open");
    fs.close(fd).expect("close");
    fs.remove("gone").expect("remove");

    let mut pass1 = Vec::new();
    while let Some(name) = fs.next_file_name() {
        pass1.push(name);
    }
    let mut sorted = pass1.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(sorted, ["a", "b", "c"], "each name exactly once");

    let mut pass2 = Vec::new();
    while let Some(name) = fs.next_file_name() {
        pass2.push(name);
    }
    assert_eq!(pass2, pass1, "a new pass restarts from the beginning");
}

#[test]
fn remove_returns_every_owned_block_to_the_free_pool() {
    let dir = TempDir::new().expect("tempdir");
    let mut fs = fresh_fs(&dir);
    let baseline = fs.free_blocks();

    // 15 data blocks: 12 direct plus 3 through the indirect block.
    let fd = fs.open("doomed").expect("open");
    fs.write(fd, &random_bytes(15 * BS)).expect("write");
    assert_eq!(fs.free_blocks(), baseline - 15 - 1, "15 data + 1 indirect");

    fs.remove("doomed").expect("remove");
    assert_eq!(fs.free_blocks(), baseline, "every block must come back");
    assert_eq!(fs.size_of("doomed"), Err(FsError::NotFound));
    // The handle left open on the removed file is dead.
    assert_eq!(fs.read(fd, 1), Err(FsError::NotFound));
    assert_eq!(fs.write(fd, b"x"), Err(FsError::NotFound));
}

#[test]
fn create_after_remove_reuses_the_freed_inode() {
    let dir = TempDir::new().expect("tempdir");
    let mut fs = fresh_fs(&dir);

    for i in 0..GEOM.inode_count {
        fs.open(&format!("file-{i}")).expect("open");
    }
    fs.remove("file-3").expect("remove");
    assert!(fs.open("replacement").is_ok(), "freed slot must be reusable");
    assert_eq!(fs.open("another"), Err(FsError::NoSpace));
}

#[test]
fn full_volume_write_reports_partial_count() {
    let dir = TempDir::new().expect("tempdir");
    let mut fs = fresh_fs(&dir);
    let data_blocks = fs.free_blocks() as usize;

    // One block goes to the indirect block itself, the rest hold data.
    let fd = fs.open("huge").expect("open");
    let attempt = (data_blocks + 1) * BS;
    let landed = fs.write(fd, &random_bytes(attempt)).expect("write");
    assert_eq!(landed, (data_blocks - 1) * BS);
    assert_eq!(fs.free_blocks(), 0);

    assert_eq!(fs.write(fd, b"more"), Err(FsError::NoSpace));

    // What landed is still fully readable.
    fs.seek(fd, 0).expect("seek");
    assert_eq!(fs.read(fd, attempt).expect("read").len(), landed);
}

#[test]
fn failed_indirect_allocation_leaves_nothing_dangling() {
    let dir = TempDir::new().expect("tempdir");
    let mut fs = fresh_fs(&dir);

    // Fill the volume until exactly one free block remains.
    let filler = fs.open("filler").expect("open");
    let free = fs.free_blocks() as usize;
    // Writing n data blocks past the direct tier costs n + 1 blocks.
    fs.write(filler, &random_bytes((free - 2) * BS)).expect("write");
    assert_eq!(fs.free_blocks(), 1);

    // The next file needs an indirect block AND a data block at once.
    let fd = fs.open("unlucky").expect("open");
    fs.seek(fd, (DIRECT_PTRS * BS) as i64).expect("seek");
    assert_eq!(fs.write(fd, b"x"), Err(FsError::NoSpace));
    assert_eq!(
        fs.free_blocks(),
        1,
        "the provisional indirect block must be released"
    );
}

#[test]
fn mount_rejects_bad_magic_and_wrong_geometry() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("volume.img");
    drop(fresh_fs(&dir));

    // Wrong inode count: the superblock no longer matches.
    let image = DiskImage::open(&path, GEOM.block_size, GEOM.block_count).expect("open");
    assert_eq!(
        SimpleFs::mount(image, Geometry::new(1024, 100, 20)).err(),
        Some(FsError::Corrupt)
    );

    // Scribbled magic: the volume is rejected outright.
    let mut image = DiskImage::open(&path, GEOM.block_size, GEOM.block_count).expect("open");
    image.write_blocks(0, &vec![0xFFu8; BS]);
    assert_eq!(SimpleFs::mount(image, GEOM).err(), Some(FsError::Corrupt));
}

#[test]
fn allocator_stays_exact_over_a_create_write_remove_cycle() {
    let dir = TempDir::new().expect("tempdir");
    let mut fs = fresh_fs(&dir);
    let baseline = fs.free_blocks();

    for round in 0..3 {
        for i in 0..4 {
            let fd = fs.open(&format!("r{round}-f{i}")).expect("open");
            fs.write(fd, &random_bytes((i + 1) * 3 * BS + 17)).expect("write");
            fs.close(fd).expect("close");
        }
        for i in 0..4 {
            fs.remove(&format!("r{round}-f{i}")).expect("remove");
        }
        assert_eq!(
            fs.free_blocks(),
            baseline,
            "round {round}: in-use bits must equal live references"
        );
    }
}

#[test]
fn directory_state_survives_remount() {
    let dir = TempDir::new().expect("tempdir");

    {
        let mut fs = fresh_fs(&dir);
        for name in ["one", "two", "three"] {
            let fd = fs.open(name).expect("open");
            fs.write(fd, name.as_bytes()).expect("write");
            fs.close(fd).expect("close");
        }
        fs.remove("two").expect("remove");
    }

    let mut fs = remount(&dir);
    assert_eq!(fs.file_count(), 2);
    assert_eq!(fs.size_of("one").expect("size"), 3);
    assert_eq!(fs.size_of("two"), Err(FsError::NotFound));
    assert_eq!(fs.size_of("three").expect("size"), 5);

    let fd = fs.open("three").expect("open");
    fs.seek(fd, 0).expect("seek");
    assert_eq!(fs.read(fd, 16).expect("read"), b"three");
}
