//! 文件截断
//!
//! 收缩时维护两个计数：
//!
//! - `count`：释放的片段总数，从 `effnblks` 扣除并归还 `bfree`
//! - `real`：其中已经写入日志的片段，从 `blocks` 扣除
//!
//! 占位块只计入前者：它们在分配时已经从 `bfree` 扣除，但从未进入任何段。

use super::filesystem::Lfs;
use super::types::{LfsHal, TruncFlags};
use crate::balloc::SegDeltas;
use crate::block::BlockDevice;
use crate::consts::*;
use crate::error::{Error, ErrorKind, ErrorSlot, Result};
use crate::indirect::{IndirTrunc, Released};
use crate::inode::{Inode, InodeFlags};
use crate::segment::SegmFlags;
use crate::types::{Ino, Lbn};
use alloc::vec::Vec;

impl<D: BlockDevice, H: LfsHal> Lfs<D, H> {
    /// 把文件长度改为 `len`
    ///
    /// 变长时分配并清零新的最后一块；变短时释放 `len` 之后的所有块并把 inode 写入日志。
    /// 收缩开始前按最坏情况预留空间，空间不足在修改任何状态之前报告。
    ///
    /// # 参数
    ///
    /// * `ino` - inode 号
    /// * `len` - 新长度（字节）
    /// * `flags` - `TruncFlags::SYNC` 表示完成后立即做检查点
    ///
    /// # 错误
    ///
    /// - `ErrorKind::InvalidInput` - 超过最大文件大小
    /// - `ErrorKind::NoSpace` - 无法预留所需空间
    /// - `ErrorKind::Io` - 读取尾块或间接块失败，此时文件与记账都未改变；
    ///   或写入失败，此时空闲计数仍已更新
    pub fn truncate(&self, ino: Ino, len: u64, flags: TruncFlags) -> Result<()> {
        if len > self.geom.maxfilesize() {
            return Err(Error::new(ErrorKind::InvalidInput, "file too large"));
        }
        let vp = self.vget(ino)?;
        let mut ip = vp.lock();
        let osize = ip.size;
        if len == osize {
            ip.mtime = Self::now_secs();
            return Ok(());
        }
        if len > osize {
            return self.truncate_grow(&mut ip, len);
        }
        self.truncate_shrink(&mut ip, len, flags)
    }

    fn truncate_grow(&self, ip: &mut Inode, len: u64) -> Result<()> {
        let g = &self.geom;
        let res = self.reserve(LFS_NRESERVE_GROW as i64 * g.blockfrags())?;
        let osize = ip.size;
        self.extend_tail(ip, osize, len, res.frags())?;

        let lbn = g.lblkno(len - 1);
        self.balloc(ip, lbn, g.blksize(len, lbn), res.frags())?;
        ip.size = len;
        ip.mtime = Self::now_secs();
        ip.flags |= InodeFlags::MODIFIED;
        log::debug!("[TRUNC] ino {} grown {} -> {}", ip.ino, osize, len);
        Ok(())
    }

    fn truncate_shrink(&self, ip: &mut Inode, len: u64, flags: TruncFlags) -> Result<()> {
        let g = self.geom;
        let frag = g.blockfrags();
        let _res = self.reserve(LFS_NRESERVE_TRUNC as i64 * frag)?;

        let mode = if flags.contains(TruncFlags::SYNC) {
            SegmFlags::SYNC
        } else {
            SegmFlags::empty()
        };
        let mut seg = self.seglock.lock(mode);
        let mut deltas = SegDeltas::new();
        let osize = ip.size;

        let n = self.mapper.nindir();
        let lastblock = g.lblkno(len + g.bsize as u64 - 1) - 1;
        let mut lastiblock = [0 as Lbn; NIADDR];
        lastiblock[SINGLE] = lastblock - NDADDR as Lbn;
        lastiblock[DOUBLE] = lastiblock[SINGLE] - n;
        lastiblock[TRIPLE] = lastiblock[DOUBLE] - n * n;
        for last in lastiblock.iter_mut() {
            if *last < 0 {
                *last = -1;
            }
        }

        // 先完成全部读取：任何读取失败都在修改 inode 与记账之前返回
        let offset = g.blkoff(len);
        let tail = if offset != 0 {
            let lbn = g.lblkno(len);
            self.load_block(ip, lbn)?.map(|buf| (lbn, buf))
        } else {
            None
        };
        let mut walker = IndirTrunc::new(&self.mapper, &g, &mut deltas);
        let mut levels = Vec::with_capacity(NIADDR);
        {
            let mut dev = self.dev.lock();
            for level in (SINGLE..=TRIPLE).rev() {
                let bn = ip.ib[level];
                if bn != LFS_UNUSED_DADDR {
                    let ilbn = self.mapper.indir_lbn(level);
                    walker.gather(&mut *dev, ip, ilbn, bn, lastiblock[level], level)?;
                    levels.push((level, ilbn, bn));
                }
                if lastiblock[level] >= 0 {
                    break;
                }
            }
        }

        // 新的最后一块是部分块：清零尾部并标记重写
        if let Some((lbn, mut buf)) = tail {
            if !ip.is_dir() && (offset as usize) < buf.len() {
                buf[offset as usize..].fill(0);
            }
            if lbn < NDADDR as Lbn {
                buf.resize(g.blksize(len, lbn) as usize, 0);
            }
            ip.dirty.insert(lbn, buf);
        }

        let dropped = ip.drop_dirty_data_from(lastblock + 1);
        log::debug!(
            "[TRUNC] ino {} {} -> {} lastblock {} ({} dirty blocks dropped)",
            ip.ino, osize, len, lastblock, dropped
        );

        let mut rel = Released::default();
        for &(level, ilbn, bn) in &levels {
            rel.add(walker.run(ip, ilbn, lastiblock[level], level));
            if lastiblock[level] < 0 {
                ip.ib[level] = LFS_UNUSED_DADDR;
                ip.dirty.remove(&ilbn);
                walker.free(bn);
                if bn > 0 {
                    rel.real += frag;
                }
                rel.count += frag;
            }
        }
        drop(walker);
        let done = lastiblock.iter().any(|&last| last >= 0);

        if !done {
            for i in ((lastblock + 1).max(0) as usize..NDADDR).rev() {
                let bn = ip.db[i];
                if bn == LFS_UNUSED_DADDR {
                    continue;
                }
                rel.count += g.numfrags(g.blksize(osize, i as Lbn) as u64);
                let obsize = if bn > 0 {
                    rel.real += g.numfrags(ip.fragsize[i] as u64);
                    ip.fragsize[i] as u64
                } else {
                    0
                };
                deltas.free(&g, bn, obsize);
                ip.fragsize[i] = 0;
                ip.db[i] = LFS_UNUSED_DADDR;
            }

            // 最后一块变成更小的片段：释放多出的片段
            if (0..NDADDR as Lbn).contains(&lastblock) && ip.db[lastblock as usize] != LFS_UNUSED_DADDR {
                let oldspace = g.numfrags(g.blksize(osize, lastblock) as u64);
                let newspace = g.numfrags(g.blksize(len, lastblock) as u64);
                rel.count += oldspace - newspace;
            }
        }

        ip.size = len;
        ip.effnblks -= rel.count;
        ip.blocks -= rel.real;
        self.ifile.write().cleaner.bfree += rel.count;
        if len == 0 && (ip.blocks != 0 || ip.effnblks != 0) {
            log::error!(
                "[TRUNC] ino {} truncated to 0 with blocks={} effnblks={}",
                ip.ino, ip.blocks, ip.effnblks
            );
            panic!("truncate to zero left blocks allocated");
        }
        ip.mtime = Self::now_secs();
        ip.flags |= InodeFlags::MODIFIED;
        log::debug!("[TRUNC] ino {} released {} frags ({} on disk)", ip.ino, rel.count, rel.real);

        let mut errors = ErrorSlot::new();
        errors.record(self.write_vnode(&mut seg, ip, &mut deltas));
        deltas.finalize(&seg, &mut self.ifile.write());
        if flags.contains(TruncFlags::SYNC) {
            errors.record(self.checkpoint(&mut seg));
        }
        errors.finish(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::fsck;
    use crate::fs::FsConfig;
    use crate::testutil::*;
    use crate::types::SegUseFlags;
    use alloc::vec;

    fn file_with(fs: &TestFs, len: usize, seed: u8) -> Ino {
        let ino = fs.create(S_IFREG | 0o644).unwrap();
        fs.write(ino, 0, &pattern(len, seed)).unwrap();
        ino
    }

    #[test]
    fn test_truncate_same_size_is_noop() {
        let (fs, _dev) = new_fs(&small_opts());
        let ino = file_with(&fs, 3000, 1);
        fs.fsync(ino).unwrap();
        let before = fs.statfs();
        fs.truncate(ino, 3000, TruncFlags::empty()).unwrap();
        assert_eq!(fs.statfs(), before);
    }

    #[test]
    fn test_truncate_within_block_zeroes_tail() {
        let (fs, _dev) = new_fs(&small_opts());
        let ino = file_with(&fs, 1024, 3);
        fs.fsync(ino).unwrap();

        fs.truncate(ino, 100, TruncFlags::empty()).unwrap();
        let st = fs.stat(ino).unwrap();
        assert_eq!(st.size, 100);
        assert_eq!(st.blocks, 1);
        assert_eq!(st.effnblks, 1);

        fs.truncate(ino, 1024, TruncFlags::empty()).unwrap();
        let mut buf = vec![0u8; 1024];
        fs.read(ino, 0, &mut buf).unwrap();
        assert_eq!(&buf[..100], &pattern(1024, 3)[..100]);
        assert!(buf[100..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_truncate_then_extend_reads_zeros() {
        let (fs, _dev) = new_fs(&small_opts());
        let len = 40 * 1024;
        let ino = file_with(&fs, len, 9);
        fs.sync().unwrap();

        fs.truncate(ino, 0, TruncFlags::empty()).unwrap();
        assert_eq!(fs.stat(ino).unwrap().blocks, 0);
        fs.truncate(ino, 2 * len as u64, TruncFlags::empty()).unwrap();
        fs.fsync(ino).unwrap();

        let mut buf = vec![0xaau8; 2 * len];
        assert_eq!(fs.read(ino, 0, &mut buf).unwrap(), 2 * len);
        assert!(buf.iter().all(|&b| b == 0));
        fs.sync().unwrap();
        assert!(fsck::check(&fs).unwrap().is_clean());
    }

    #[test]
    fn test_truncate_placeholders_not_counted_real() {
        let (fs, _dev) = new_fs(&small_opts());
        let bfree = fs.statfs().bfree;
        // 一级间接范围内的块都还是占位
        let ino = file_with(&fs, 20 * 1024, 4);
        let st = fs.stat(ino).unwrap();
        assert_eq!(st.blocks, 0);
        assert_eq!(st.effnblks, 20 * 2 + 2);

        fs.truncate(ino, 0, TruncFlags::empty()).unwrap();
        let st = fs.stat(ino).unwrap();
        assert_eq!(st.effnblks, 0);
        // 只剩 inode 写入的摘要与 inode 片段
        assert_eq!(fs.statfs().bfree, bfree - 2);
    }

    #[test]
    fn test_truncate_to_zero_empties_segment() {
        let (fs, _dev) = new_fs(&small_opts());
        fs.roll_segment().unwrap();
        fs.roll_segment().unwrap();
        fs.roll_segment().unwrap();
        assert_eq!(fs.roll_segment().unwrap(), 4);

        let ino = file_with(&fs, 14 * 1024, 6);
        fs.fsync(ino).unwrap();
        let st = fs.stat(ino).unwrap();
        let seg4 = fs.ifile_snapshot().seguse(4).unwrap().nbytes as i64;
        assert_eq!(seg4, st.blocks * 512 + 512);

        fs.roll_segment().unwrap();
        fs.sync().unwrap();
        fs.truncate(ino, 0, TruncFlags::empty()).unwrap();

        // 数据块、间接块和被搬走的 inode 全部离开段 4
        let su = fs.ifile_snapshot().seguse(4).unwrap();
        assert_eq!(su.nbytes, 0);
        assert!(su.flags.contains(SegUseFlags::EMPTY));
        assert!(!su.flags.contains(SegUseFlags::ACTIVE));
        assert_eq!(
            fs.segclean(4).unwrap(),
            crate::cleaner::SegCleanOutcome::Cleaned
        );
        fs.sync().unwrap();
        assert!(fsck::check(&fs).unwrap().is_clean());
    }

    #[test]
    fn test_truncate_io_failure_still_updates_bfree() {
        let (fs, dev) = new_fs(&small_opts());
        let ino = file_with(&fs, 8 * 1024, 2);
        fs.fsync(ino).unwrap();
        let bfree = fs.statfs().bfree;

        dev.set_fail_writes(true);
        let err = fs.truncate(ino, 0, TruncFlags::empty()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        dev.set_fail_writes(false);

        // 16 个数据片段归还；失败的 inode 写入仍按已写记账
        assert_eq!(fs.statfs().bfree, bfree + 16 - 2);
        let st = fs.stat(ino).unwrap();
        assert_eq!(st.size, 0);
        assert_eq!(st.effnblks, 0);
    }

    #[test]
    fn test_truncate_read_failure_changes_nothing() {
        let (fs, dev) = new_fs_uncached(&small_opts());
        let ino = file_with(&fs, 20 * 1024, 8);
        fs.fsync(ino).unwrap();
        fs.sync().unwrap();
        let before = fs.statfs();
        let st = fs.stat(ino).unwrap();

        for len in [1024, 0, 13 * 1024 + 100] {
            dev.set_fail_reads(true);
            let err = fs.truncate(ino, len, TruncFlags::empty()).unwrap_err();
            dev.set_fail_reads(false);
            assert_eq!(err.kind(), ErrorKind::Io);
            assert_eq!(fs.stat(ino).unwrap(), st);
            assert_eq!(fs.statfs(), before);
        }
        fs.sync().unwrap();
        assert!(fsck::check(&fs).unwrap().is_clean());

        let mut buf = vec![0u8; 20 * 1024];
        fs.read(ino, 0, &mut buf).unwrap();
        assert_eq!(buf, pattern(20 * 1024, 8));

        // 读取恢复后同一截断正常完成
        fs.truncate(ino, 1024, TruncFlags::empty()).unwrap();
        fs.sync().unwrap();
        assert_eq!(fs.stat(ino).unwrap().blocks, 2);
        assert!(fsck::check(&fs).unwrap().is_clean());
    }

    #[test]
    fn test_shrink_refused_without_reserve() {
        let (fs, _dev) = new_fs(&small_opts());
        let ino = file_with(&fs, 2048, 2);
        fs.fsync(ino).unwrap();
        let st = fs.statfs();
        let hog = fs.reserve(st.bfree.min(st.avail) - 5).unwrap();
        let err = fs.truncate(ino, 0, TruncFlags::empty()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoSpace);
        assert_eq!(fs.stat(ino).unwrap().size, 2048);
        drop(hog);
        fs.truncate(ino, 0, TruncFlags::empty()).unwrap();
    }

    #[test]
    fn test_crash_during_triple_indirect_truncate() {
        let opts = narrow_opts();
        let n = 128u64;
        let bsize = 512u64;
        // 直接块、一级、二级和三级间接范围里各放几个块
        let offsets = [
            0,
            (12 + 5) * bsize,
            (12 + n + 3 * n + 7) * bsize,
            (12 + n + n * n + 2 * n * n + 5 * n + 1) * bsize,
        ];

        let template = device_for(&opts);
        {
            let fs = TestFs::mkfs(template.clone(), &opts, FsConfig::default()).unwrap();
            let ino = fs.create(S_IFREG | 0o644).unwrap();
            for (i, off) in offsets.iter().enumerate() {
                fs.write(ino, *off, &pattern(bsize as usize, i as u8)).unwrap();
            }
            fs.sync().unwrap();
            assert!(fsck::check(&fs).unwrap().is_clean());
        }

        let mut cut = 0;
        loop {
            let dev = template.snapshot();
            let fs = TestFs::mount(dev.clone(), FsConfig::default()).unwrap();
            dev.crash_after(cut);
            fs.truncate(LFS_FIRST_INUM, 0, TruncFlags::SYNC).unwrap();
            let finished = dev.writes() <= cut;
            drop(fs);

            let fs = TestFs::mount(dev, FsConfig::default()).unwrap();
            let report = fsck::check(&fs).unwrap();
            assert!(report.is_clean(), "crash after {} writes: {:?}", cut, report);
            if finished {
                assert_eq!(fs.stat(LFS_FIRST_INUM).unwrap().size, 0);
                break;
            }
            cut += 1;
        }
    }
}
