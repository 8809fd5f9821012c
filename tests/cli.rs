//! Exercises the `mkfs` binary as a subprocess: this is the one place
//! an end-to-end CLI invocation is worth the process-spawn cost.

use assert_cmd::Command;
use tempfile::NamedTempFile;
use wfs::layout::Superblock;

#[test]
fn mkfs_formats_a_fresh_image() {
    let tmp = NamedTempFile::new().unwrap();
    let mut cmd = Command::cargo_bin("mkfs").unwrap();
    cmd.args(["--image", tmp.path().to_str().unwrap(), "--inodes", "32", "--blocks", "64"]);
    cmd.assert().success();

    let image = wfs::image::Image::open(tmp.path()).unwrap();
    let sb: Superblock = image.read(0).unwrap();
    assert_eq!(sb.num_inodes, 32);
    assert_eq!(sb.num_data_blocks, 64);
}

#[test]
fn mkfs_rounds_small_counts_up_to_32() {
    let tmp = NamedTempFile::new().unwrap();
    let mut cmd = Command::cargo_bin("mkfs").unwrap();
    cmd.args(["--image", tmp.path().to_str().unwrap(), "--inodes", "1", "--blocks", "1"]);
    cmd.assert().success();

    let image = wfs::image::Image::open(tmp.path()).unwrap();
    let sb: Superblock = image.read(0).unwrap();
    assert_eq!(sb.num_inodes, 32);
    assert_eq!(sb.num_data_blocks, 32);
}
