//! 完整清理循环

use super::*;
use crate::consts::*;
use crate::fs::fsck;
use crate::testutil::*;
use crate::types::Daddr;
use alloc::vec;
use alloc::vec::Vec;

/// 用户态清理器的一轮：扫描、解析、保留地址未变的块、重写、回收
fn clean_segment(fs: &TestFs, sn: u32) -> (MarkvReport, SegCleanOutcome) {
    let scanned = fs.scan_segment(sn).unwrap();
    let mut resolved = scanned.clone();
    fs.bmapv(&mut resolved).unwrap();
    let live: Vec<BlockInfo> = scanned
        .into_iter()
        .zip(&resolved)
        .filter(|(s, r)| r.daddr == s.daddr)
        .map(|(s, _)| s)
        .collect();
    let report = fs.markv(&live).unwrap();
    (report, fs.segclean(sn).unwrap())
}

#[test]
fn test_clean_cycle_empties_segment() {
    let (fs, dev) = new_fs(&small_opts());
    fs.roll_segment().unwrap();
    let sn = fs.current_segment();

    let mut files = Vec::new();
    for i in 0..3u8 {
        let ino = fs.create(S_IFREG | 0o644).unwrap();
        let data = pattern(2500 + i as usize * 700, i);
        fs.write(ino, 0, &data).unwrap();
        fs.fsync(ino).unwrap();
        files.push((ino, data));
    }
    // 第二个文件的块 0 被覆盖：段中那个旧副本已死
    fs.write(files[1].0, 0, &pattern(1024, 77)).unwrap();
    files[1].1[..1024].copy_from_slice(&pattern(1024, 77));
    fs.sync().unwrap();
    fs.roll_segment().unwrap();
    fs.sync().unwrap();
    assert!(fs.ifile_snapshot().seguse(sn).unwrap().nbytes > 0);

    let (report, outcome) = clean_segment(&fs, sn);
    assert_eq!(report.status, MarkvStatus::Ok);
    assert_eq!(report.count(MarkOutcome::Stale), 0);
    assert_eq!(fs.ifile_snapshot().seguse(sn).unwrap().nbytes, 0);
    assert_eq!(outcome, SegCleanOutcome::Cleaned);
    assert!(fsck::check(&fs).unwrap().is_clean());

    for (ino, data) in &files {
        let first = fs.bmap(*ino, 0).unwrap();
        assert_ne!(fs.geometry().dtosn(first), sn);
        let mut buf = vec![0u8; data.len()];
        fs.read(*ino, 0, &mut buf).unwrap();
        assert_eq!(&buf, data);
    }

    // 清理结果在重新挂载后仍然成立
    drop(fs);
    let fs = TestFs::mount(dev, crate::fs::FsConfig::default()).unwrap();
    assert!(fsck::check(&fs).unwrap().is_clean());
    let (ino, data) = &files[2];
    let mut buf = vec![0u8; data.len()];
    fs.read(*ino, 0, &mut buf).unwrap();
    assert_eq!(&buf, data);
}

#[test]
fn test_cleaned_segment_not_reused_before_checkpoint() {
    let (fs, _dev) = new_fs(&small_opts());
    for _ in 0..3 {
        fs.roll_segment().unwrap();
    }
    fs.sync().unwrap();
    assert_eq!(fs.segclean(1).unwrap(), SegCleanOutcome::Cleaned);

    // 段 4..=31 之后唯一的干净段是 1，但检查点之前不能复用
    for _ in 4..32 {
        fs.roll_segment().unwrap();
    }
    assert_eq!(fs.roll_segment().unwrap_err().kind(), crate::error::ErrorKind::NoSpace);

    fs.sync().unwrap();
    assert_eq!(fs.roll_segment().unwrap(), 1);
    fs.sync().unwrap();
    assert!(fsck::check(&fs).unwrap().is_clean());
}

#[test]
fn test_markv_flushes_midway() {
    let dev = device_for(&small_opts());
    let config = crate::fs::FsConfig {
        markv_flush_blocks: 2,
        ..crate::fs::FsConfig::default()
    };
    let fs = TestFs::mkfs(dev, &small_opts(), config).unwrap();
    let ino = fs.create(S_IFREG | 0o644).unwrap();
    fs.write(ino, 0, &pattern(8 * 1024, 2)).unwrap();
    fs.sync().unwrap();

    // 检查点可能让日志进入下一个段：按块 0 的地址找文件所在段
    let sn = fs.geometry().dtosn(fs.bmap(ino, 0).unwrap());
    let blocks: Vec<BlockInfo> = fs
        .scan_segment(sn)
        .unwrap()
        .into_iter()
        .filter(|b| b.inode == ino && b.lbn >= 0)
        .collect();
    assert_eq!(blocks.len(), 8);
    let old: Vec<Daddr> = blocks.iter().map(|b| b.daddr).collect();
    let writes = fs.io_stats().writes;

    let report = fs.markv(&blocks).unwrap();
    assert_eq!(report.count(MarkOutcome::Rewritten), 8);
    // 至少两次中途写出 + 检查点
    assert!(fs.io_stats().writes >= writes + 4);
    for (lbn, daddr) in old.iter().enumerate() {
        assert_ne!(fs.bmap(ino, lbn as i64).unwrap(), *daddr);
    }
    assert!(fsck::check(&fs).unwrap().is_clean());
}
