use rand::RngCore;
use tempfile::TempDir;

use super::{BlockDevice, DiskImage};

const BLOCK_SIZE: u32 = 1024;
const BLOCK_COUNT: u32 = 100;

fn image_path(dir: &TempDir) -> std::path::PathBuf {
    dir.path().join("volume.img")
}

#[test]
fn create_presizes_image() {
    let dir = TempDir::new().expect("tempdir");
    let path = image_path(&dir);

    let image = DiskImage::create(&path, BLOCK_SIZE, BLOCK_COUNT).expect("create");
    assert_eq!(image.len(), u64::from(BLOCK_SIZE) * u64::from(BLOCK_COUNT));
    assert_eq!(
        std::fs::metadata(&path).expect("metadata").len(),
        image.len(),
        "backing file must be pre-sized"
    );
}

#[test]
fn fresh_image_reads_zero() {
    let dir = TempDir::new().expect("tempdir");
    let image = DiskImage::create(&image_path(&dir), BLOCK_SIZE, BLOCK_COUNT).expect("create");

    let mut buf = vec![0xAAu8; 4 * BLOCK_SIZE as usize];
    let n = image.read_blocks(17, &mut buf);
    assert_eq!(n, buf.len());
    assert!(
        buf.iter().all(|&b| b == 0),
        "fresh image must read as zeros"
    );
}

#[test]
fn write_then_read_roundtrip() {
    let dir = TempDir::new().expect("tempdir");
    let mut image = DiskImage::create(&image_path(&dir), BLOCK_SIZE, BLOCK_COUNT).expect("create");

    let mut data = vec![0u8; 3 * BLOCK_SIZE as usize];
    rand::rng().fill_bytes(&mut data);
    let wn = image.write_blocks(42, &data);
    assert_eq!(wn, data.len(), "must write every block");

    let mut back = vec![0u8; data.len()];
    let rn = image.read_blocks(42, &mut back);
    assert_eq!(rn, data.len());
    assert_eq!(back, data, "roundtrip must match");
}

#[test]
fn reopen_preserves_contents() {
    let dir = TempDir::new().expect("tempdir");
    let path = image_path(&dir);

    let payload = vec![0x5Au8; BLOCK_SIZE as usize];
    {
        let mut image = DiskImage::create(&path, BLOCK_SIZE, BLOCK_COUNT).expect("create");
        image.write_blocks(7, &payload);
    }

    let reopened = DiskImage::open(&path, BLOCK_SIZE, BLOCK_COUNT).expect("reopen");
    let mut back = vec![0u8; BLOCK_SIZE as usize];
    reopened.read_blocks(7, &mut back);
    assert_eq!(back, payload);
}

#[test]
fn open_rejects_wrong_length() {
    let dir = TempDir::new().expect("tempdir");
    let path = image_path(&dir);
    drop(DiskImage::create(&path, BLOCK_SIZE, BLOCK_COUNT).expect("create"));

    assert!(
        DiskImage::open(&path, BLOCK_SIZE, BLOCK_COUNT + 1).is_err(),
        "length mismatch must be rejected"
    );
    assert!(DiskImage::open(&path, BLOCK_SIZE, BLOCK_COUNT).is_ok());
}

#[test]
fn transfers_past_end_are_truncated() {
    let dir = TempDir::new().expect("tempdir");
    let mut image = DiskImage::create(&image_path(&dir), BLOCK_SIZE, BLOCK_COUNT).expect("create");

    let data = vec![0xCCu8; 3 * BLOCK_SIZE as usize];
    let wn = image.write_blocks(BLOCK_COUNT - 1, &data);
    assert_eq!(wn, BLOCK_SIZE as usize, "only the in-range block is written");

    let mut buf = vec![0u8; 2 * BLOCK_SIZE as usize];
    let rn = image.read_blocks(BLOCK_COUNT - 1, &mut buf);
    assert_eq!(rn, BLOCK_SIZE as usize, "read must truncate at the last block");
    assert!(buf[..BLOCK_SIZE as usize].iter().all(|&b| b == 0xCC));

    assert_eq!(image.read_blocks(BLOCK_COUNT, &mut buf), 0);
    assert_eq!(image.write_blocks(BLOCK_COUNT, &data), 0);
}
