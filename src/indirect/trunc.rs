//! 间接块树的截断
//!
//! 从某个间接块出发，释放所有位于保留边界之后的子树。保留边界 `lastbn` 是相对于
//! 该间接块覆盖范围的最后一个保留块下标；负数表示整个子树都要释放。
//!
//! 分两步进行：[`IndirTrunc::gather`] 先读出所有会被访问的间接块快照，读取失败时
//! 什么都没有改变；[`IndirTrunc::run`] 只在快照上计算，不再做 I/O。
//! 需要保留部分内容的间接块，把清零后的副本放进脏缓冲区，由下一次段写入整体重写；
//! 要整体释放的间接块直接丢弃缓冲区。

use super::mapper::{read_ptr, write_ptr, BlockMapper};
use crate::balloc::SegDeltas;
use crate::block::{BlockDev, BlockDevice};
use crate::consts::*;
use crate::error::Result;
use crate::inode::{Inode, InodeFlags};
use crate::superblock::Geometry;
use crate::types::{Daddr, Lbn};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

/// 截断释放的片段数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Released {
    /// 从 `effnblks` 扣除的片段（含占位块）
    pub(crate) count: i64,
    /// 从 `blocks` 扣除的片段（只计已写入日志的块）
    pub(crate) real: i64,
}

impl Released {
    pub(crate) fn add(&mut self, other: Released) {
        self.count += other.count;
        self.real += other.real;
    }
}

/// 间接块截断的上下文
pub(crate) struct IndirTrunc<'a> {
    mapper: &'a BlockMapper,
    geom: &'a Geometry,
    deltas: &'a mut SegDeltas,
    snaps: BTreeMap<Lbn, Vec<u8>>,
}

impl<'a> IndirTrunc<'a> {
    pub(crate) fn new(mapper: &'a BlockMapper, geom: &'a Geometry, deltas: &'a mut SegDeltas) -> Self {
        Self {
            mapper,
            geom,
            deltas,
            snaps: BTreeMap::new(),
        }
    }

    /// 记录子树根自身的释放：旧位置的整块字节进入待落账批次
    pub(crate) fn free(&mut self, daddr: Daddr) {
        self.deltas.free(self.geom, daddr, self.geom.bsize as u64);
    }

    /// 读取截断以 `lbn` 为根的子树时要访问的全部间接块
    ///
    /// 参数与 [`run`](Self::run) 相同。
    ///
    /// # 错误
    ///
    /// 任一间接块读取失败。此时 inode 与记账都没有被修改。
    pub(crate) fn gather<D: BlockDevice>(
        &mut self,
        bdev: &mut BlockDev<D>,
        ip: &Inode,
        lbn: Lbn,
        daddr: Daddr,
        lastbn: i64,
        level: usize,
    ) -> Result<()> {
        let bap = match self.mapper.read_meta(bdev, ip, lbn, daddr) {
            Ok(buf) => buf,
            Err(e) => {
                log::warn!("[INDIR] ino {} lbn {} unreadable: {}", ip.ino, lbn, e);
                return Err(e);
            }
        };
        if level > SINGLE {
            let n = self.mapper.nindir();
            let factor = n.pow(level as u32);
            let last = if lastbn > 0 { lastbn / factor } else { lastbn };
            let mut i = n - 1;
            let mut nlbn = lbn + 1 - i * factor;
            while i > last {
                let nb = read_ptr(&bap, i as usize);
                if nb != LFS_UNUSED_DADDR {
                    self.gather(bdev, ip, nlbn, nb, -1, level - 1)?;
                }
                i -= 1;
                nlbn += factor;
            }
            if lastbn >= 0 && i >= 0 {
                let nb = read_ptr(&bap, i as usize);
                if nb != LFS_UNUSED_DADDR {
                    self.gather(bdev, ip, nlbn, nb, lastbn % factor, level - 1)?;
                }
            }
        }
        self.snaps.insert(lbn, bap);
        Ok(())
    }

    /// 截断以 `lbn` 为根的间接子树
    ///
    /// 必须先对同一子树调用 [`gather`](Self::gather)。
    ///
    /// # 参数
    ///
    /// * `ip` - inode
    /// * `lbn` - 间接块的逻辑块号
    /// * `daddr` - 间接块的指针值（可以是占位指针）
    /// * `lastbn` - 子树内最后一个保留的数据块下标，负数表示全部释放
    /// * `level` - `SINGLE`、`DOUBLE` 或 `TRIPLE`
    ///
    /// # 返回
    ///
    /// 子树中释放的片段数，不含 `lbn` 自身
    ///
    /// # Panics
    ///
    /// 子树中有间接块没有快照
    pub(crate) fn run(&mut self, ip: &mut Inode, lbn: Lbn, lastbn: i64, level: usize) -> Released {
        let n = self.mapper.nindir();
        let factor = n.pow(level as u32);
        let last = if lastbn > 0 { lastbn / factor } else { lastbn };
        let frag = self.geom.blockfrags();
        let bsize = self.geom.bsize as u64;

        let Some(bap) = self.snaps.remove(&lbn) else {
            log::error!("[INDIR] ino {} lbn {} truncated without snapshot", ip.ino, lbn);
            panic!("indirect block not gathered before truncation");
        };

        if lastbn >= 0 {
            let mut kept = bap.clone();
            for i in (last + 1) as usize..n as usize {
                write_ptr(&mut kept, i, LFS_UNUSED_DADDR);
            }
            ip.dirty.insert(lbn, kept);
            ip.flags |= InodeFlags::MODIFIED;
        } else {
            ip.dirty.remove(&lbn);
        }

        let mut rel = Released::default();
        let mut i = n - 1;
        let mut nlbn = lbn + 1 - i * factor;
        while i > last {
            let nb = read_ptr(&bap, i as usize);
            if nb != LFS_UNUSED_DADDR {
                if level > SINGLE {
                    let sub = self.run(ip, nlbn, -1, level - 1);
                    rel.add(sub);
                }
                self.deltas.free(self.geom, nb, bsize);
                if nb > 0 {
                    rel.real += frag;
                }
                rel.count += frag;
            }
            i -= 1;
            nlbn += factor;
        }

        if level > SINGLE && lastbn >= 0 && i >= 0 {
            let nb = read_ptr(&bap, i as usize);
            if nb != LFS_UNUSED_DADDR {
                let sub = self.run(ip, nlbn, lastbn % factor, level - 1);
                rel.add(sub);
            }
        }

        log::trace!(
            "[INDIR] ino {} lbn {} level {} keep<={} released {}/{}",
            ip.ino, lbn, level, lastbn, rel.count, rel.real
        );
        rel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testutil::*;

    #[test]
    fn test_single_level_partial() {
        let (fs, _dev) = new_fs(&small_opts());
        let g = *fs.geometry();
        let mapper = *fs.mapper();
        let ino = fs.create(crate::consts::S_IFREG | 0o644).unwrap();
        let vp = fs.vget(ino).unwrap();
        let mut ip = vp.lock();
        for lbn in 12..17 {
            fs.balloc(&mut ip, lbn, g.bsize, 0).unwrap();
        }

        let mut dev = fs.dev.lock();
        let mut deltas = SegDeltas::new();
        let mut t = IndirTrunc::new(&mapper, &g, &mut deltas);
        // 保留前两个指针
        let ib = ip.ib[SINGLE];
        t.gather(&mut *dev, &ip, -12, ib, 1, SINGLE).unwrap();
        let rel = t.run(&mut ip, -12, 1, SINGLE);
        assert_eq!(rel, Released { count: 3 * g.blockfrags(), real: 0 });
        let kept = ip.dirty_block(-12).unwrap();
        assert_eq!(read_ptr(kept, 1), UNWRITTEN);
        assert_eq!(read_ptr(kept, 2), 0);
        assert!(deltas.is_empty());
    }

    #[test]
    fn test_whole_double_subtree() {
        let (fs, _dev) = new_fs(&small_opts());
        let g = *fs.geometry();
        let mapper = *fs.mapper();
        let n = mapper.nindir();
        let ino = fs.create(crate::consts::S_IFREG | 0o644).unwrap();
        let vp = fs.vget(ino).unwrap();
        let mut ip = vp.lock();
        // 两个一级子块各一个数据块
        fs.balloc(&mut ip, 12 + n, g.bsize, 0).unwrap();
        fs.balloc(&mut ip, 12 + n + n, g.bsize, 0).unwrap();
        let root = mapper.indir_lbn(DOUBLE);

        let mut dev = fs.dev.lock();
        let mut deltas = SegDeltas::new();
        let mut t = IndirTrunc::new(&mapper, &g, &mut deltas);
        let ib = ip.ib[DOUBLE];
        t.gather(&mut *dev, &ip, root, ib, -1, DOUBLE).unwrap();
        let rel = t.run(&mut ip, root, -1, DOUBLE);
        // 两个子块 + 两个数据块，根块自身由调用者计算
        assert_eq!(rel.count, 4 * g.blockfrags());
        assert!(!ip.has_dirty(root));
        assert!(!ip.has_dirty(root + 1));
        assert!(!ip.has_dirty(root + 1 - n));
    }

    #[test]
    fn test_gather_read_error_changes_nothing() {
        let (fs, dev) = new_fs_uncached(&small_opts());
        let g = *fs.geometry();
        let mapper = *fs.mapper();
        let ino = fs.create(crate::consts::S_IFREG | 0o644).unwrap();
        fs.write(ino, 0, &pattern(20 * 1024, 5)).unwrap();
        fs.fsync(ino).unwrap();

        let vp = fs.vget(ino).unwrap();
        let ip = vp.lock();
        assert!(ip.ib[SINGLE] > 0);
        let mut bdev = fs.dev.lock();
        let mut deltas = SegDeltas::new();
        let mut t = IndirTrunc::new(&mapper, &g, &mut deltas);
        dev.set_fail_reads(true);
        let err = t.gather(&mut *bdev, &ip, -12, ip.ib[SINGLE], -1, SINGLE).unwrap_err();
        dev.set_fail_reads(false);
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(t.snaps.is_empty());
        drop(t);
        assert!(deltas.is_empty());
        assert_eq!(ip.dirty_count(), 0);
    }
}
