//! 文件系统几何参数与单位换算

use crate::consts::*;
use crate::error::{Error, ErrorKind, Result};
use crate::types::{CleanerInfo, Daddr, IfileEntry, Lbn, SegUse};

/// ifile 镜像头部大小（magic, nseg, ninodes, cksum）
pub(crate) const IMAGE_HDR_SIZE: usize = 16;

/// 文件系统几何参数
///
/// 所有磁盘地址以片段为单位，段 0 从地址 0 开始。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// 片段大小（字节）
    pub fsize: u32,
    /// 块大小（字节）
    pub bsize: u32,
    /// 每块片段数
    pub frag: u32,
    /// 段大小（字节）
    pub ssize: u32,
    /// 每段片段数
    pub fsbpseg: u32,
    /// 段数
    pub nseg: u32,
    /// inode 总数（含保留 inode）
    pub ninodes: u32,
    /// 每个间接块中的指针数
    pub nindir: u32,
    /// 段摘要大小（字节，片段对齐）
    pub sumsize: u32,
    /// superblock 副本地址
    pub sboffs: [Daddr; LFS_MAXNUMSB],
}

impl Geometry {
    /// 根据格式化参数构造并验证几何参数
    ///
    /// # 错误
    ///
    /// - `ErrorKind::InvalidInput` - 参数不是 2 的幂、超出范围或段太小
    pub fn new(fsize: u32, bsize: u32, ssize: u32, nseg: u32, ninodes: u32) -> Result<Self> {
        if !fsize.is_power_of_two() || fsize < LFS_MIN_FSIZE {
            return Err(Error::new(ErrorKind::InvalidInput, "bad fragment size"));
        }
        if !bsize.is_power_of_two() || bsize < fsize || bsize > LFS_MAX_BSIZE {
            return Err(Error::new(ErrorKind::InvalidInput, "bad block size"));
        }
        if bsize / fsize > LFS_MAXFRAG {
            return Err(Error::new(ErrorKind::InvalidInput, "too many fragments per block"));
        }
        if ssize == 0 || ssize % bsize != 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "segment size must be a multiple of block size"));
        }
        if nseg < LFS_MIN_SEGS {
            return Err(Error::new(ErrorKind::InvalidInput, "too few segments"));
        }
        if ninodes <= LFS_FIRST_INUM {
            return Err(Error::new(ErrorKind::InvalidInput, "too few inodes"));
        }

        let fsbpseg = ssize / fsize;
        if (nseg as i64) * (fsbpseg as i64) > LFS_MAX_DADDR {
            return Err(Error::new(ErrorKind::InvalidInput, "file system too large"));
        }

        let sumsize = (LFS_SUMMARY_SIZE + fsize - 1) / fsize * fsize;
        let mut geom = Self {
            fsize,
            bsize,
            frag: bsize / fsize,
            ssize,
            fsbpseg,
            nseg,
            ninodes,
            nindir: bsize / LFS_DADDR_SIZE as u32,
            sumsize,
            sboffs: [0; LFS_MAXNUMSB],
        };
        geom.sboffs[0] = geom.btofsb(LFS_LABELPAD);
        geom.sboffs[1] = geom.sntod(nseg / 2);

        // 段 0 最小：放得下一次检查点（摘要 + ifile 镜像），
        // 以及一个只有一块数据和一个 inode 的部分段
        let smallest = geom.seg_usable(0);
        if smallest < geom.sumfrags() + geom.image_frags()
            || smallest < geom.sumfrags() + geom.frag as i64 + 1
        {
            return Err(Error::new(ErrorKind::InvalidInput, "segment too small"));
        }
        Ok(geom)
    }

    // ===== 单位换算 =====

    /// 字节数换算为片段数（向下取整，调用者传入片段对齐的值）
    #[inline]
    pub fn btofsb(&self, bytes: u64) -> i64 {
        (bytes / self.fsize as u64) as i64
    }

    /// 片段数换算为字节数
    #[inline]
    pub fn fsbtob(&self, frags: i64) -> u64 {
        frags as u64 * self.fsize as u64
    }

    /// 容纳 `bytes` 字节所需的片段数
    #[inline]
    pub fn numfrags(&self, bytes: u64) -> i64 {
        bytes.div_ceil(self.fsize as u64) as i64
    }

    /// 向上取整到片段边界
    #[inline]
    pub fn fragroundup(&self, bytes: u64) -> u64 {
        bytes.div_ceil(self.fsize as u64) * self.fsize as u64
    }

    /// 向上取整到块边界
    #[inline]
    pub fn blkroundup(&self, bytes: u64) -> u64 {
        bytes.div_ceil(self.bsize as u64) * self.bsize as u64
    }

    /// 字节偏移所在的逻辑块号
    #[inline]
    pub fn lblkno(&self, off: u64) -> Lbn {
        (off / self.bsize as u64) as Lbn
    }

    /// 逻辑块的起始字节偏移
    #[inline]
    pub fn lblktosize(&self, lbn: Lbn) -> u64 {
        lbn as u64 * self.bsize as u64
    }

    /// 字节偏移在块内的偏移
    #[inline]
    pub fn blkoff(&self, off: u64) -> u64 {
        off % self.bsize as u64
    }

    /// 一个整块对应的片段数
    #[inline]
    pub fn blockfrags(&self) -> i64 {
        self.frag as i64
    }

    /// 大小为 `size` 的文件中逻辑块 `lbn` 的字节数
    ///
    /// 只有直接块中的最后一块可以是片段；块完全位于 EOF 之后时返回 0。
    pub fn blksize(&self, size: u64, lbn: Lbn) -> u32 {
        if lbn >= NDADDR as Lbn || size >= self.lblktosize(lbn + 1) {
            self.bsize
        } else if size <= self.lblktosize(lbn) {
            0
        } else {
            self.fragroundup(self.blkoff(size)) as u32
        }
    }

    /// 文件大小上限
    pub fn maxfilesize(&self) -> u64 {
        let n = self.nindir as u64;
        let blocks = NDADDR as u64 + n + n * n + n * n * n;
        blocks.saturating_mul(self.bsize as u64)
    }

    // ===== 段换算 =====

    /// 磁盘地址所在的段号
    #[inline]
    pub fn dtosn(&self, daddr: Daddr) -> u32 {
        (daddr / self.fsbpseg as Daddr) as u32
    }

    /// 段的起始磁盘地址
    #[inline]
    pub fn sntod(&self, sn: u32) -> Daddr {
        sn as Daddr * self.fsbpseg as Daddr
    }

    /// `n` 个段对应的片段数
    #[inline]
    pub fn segtod(&self, n: u32) -> i64 {
        n as i64 * self.fsbpseg as i64
    }

    /// 段的结束地址（不含）
    #[inline]
    pub fn seg_end(&self, sn: u32) -> Daddr {
        self.sntod(sn + 1)
    }

    /// 段是否包含 superblock 副本
    pub fn is_sb_seg(&self, sn: u32) -> bool {
        self.sboffs.iter().any(|&d| self.dtosn(d) == sn)
    }

    /// 段开头不可用于日志的片段数
    ///
    /// 段 0 前部是标签预留区和第一个 superblock；第二个 superblock 段前部是
    /// superblock 预留区。
    pub fn seg_overhead(&self, sn: u32) -> i64 {
        if sn == 0 {
            self.btofsb(LFS_LABELPAD + LFS_SBPAD)
        } else if self.is_sb_seg(sn) {
            self.btofsb(LFS_SBPAD)
        } else {
            0
        }
    }

    /// 段中第一个可写入日志的地址
    #[inline]
    pub fn seg_data_start(&self, sn: u32) -> Daddr {
        self.sntod(sn) + self.seg_overhead(sn)
    }

    /// 段中可用于日志的片段数
    #[inline]
    pub fn seg_usable(&self, sn: u32) -> i64 {
        self.segtod(1) - self.seg_overhead(sn)
    }

    /// 所有段的可用片段总数
    pub fn total_usable(&self) -> i64 {
        (0..self.nseg).map(|sn| self.seg_usable(sn)).sum()
    }

    // ===== 摘要与 ifile 镜像 =====

    /// 段摘要占用的片段数
    #[inline]
    pub fn sumfrags(&self) -> i64 {
        self.btofsb(self.sumsize as u64)
    }

    /// 每个段摘要最多容纳的块条目数
    #[inline]
    pub fn max_finfo(&self) -> usize {
        (self.sumsize as usize - LFS_SUMMARY_HDR_SIZE) / LFS_FINFO_SIZE
    }

    /// ifile 镜像的有效字节数
    pub fn image_bytes(&self) -> usize {
        IMAGE_HDR_SIZE
            + CleanerInfo::DISK_SIZE
            + self.nseg as usize * SegUse::DISK_SIZE
            + self.ninodes as usize * IfileEntry::DISK_SIZE
    }

    /// ifile 镜像占用的块数
    pub fn image_blocks(&self) -> i64 {
        self.image_bytes().div_ceil(self.bsize as usize) as i64
    }

    /// ifile 镜像占用的片段数
    pub fn image_frags(&self) -> i64 {
        self.image_blocks() * self.frag as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geom() -> Geometry {
        Geometry::new(512, 1024, 32 * 1024, 32, 64).unwrap()
    }

    #[test]
    fn test_basic_units() {
        let g = geom();
        assert_eq!(g.frag, 2);
        assert_eq!(g.fsbpseg, 64);
        assert_eq!(g.nindir, 256);
        assert_eq!(g.sumfrags(), 1);
        assert_eq!(g.numfrags(1), 1);
        assert_eq!(g.numfrags(513), 2);
        assert_eq!(g.fragroundup(700), 1024);
        assert_eq!(g.lblkno(2047), 1);
        assert_eq!(g.blkoff(2047), 1023);
    }

    #[test]
    fn test_blksize_fragments() {
        let g = geom();
        // 最后一个直接块可以是片段
        assert_eq!(g.blksize(1500, 1), 512);
        assert_eq!(g.blksize(1500, 0), 1024);
        assert_eq!(g.blksize(2048, 1), 1024);
        // 完全在 EOF 之后
        assert_eq!(g.blksize(1024, 1), 0);
        // 间接块范围内总是整块
        let big = g.lblktosize(NDADDR as Lbn) + 10;
        assert_eq!(g.blksize(big, NDADDR as Lbn), 1024);
    }

    #[test]
    fn test_segment_layout() {
        let g = geom();
        assert_eq!(g.sboffs[0], 16);
        assert_eq!(g.sboffs[1], g.sntod(16));
        assert!(g.is_sb_seg(0));
        assert!(g.is_sb_seg(16));
        assert!(!g.is_sb_seg(4));
        assert_eq!(g.seg_data_start(0), 32);
        assert_eq!(g.seg_data_start(16), g.sntod(16) + 16);
        assert_eq!(g.seg_data_start(4), g.sntod(4));
        assert_eq!(g.dtosn(g.sntod(5) + 63), 5);
        assert_eq!(g.total_usable(), 32 * 64 - 32 - 16);
    }

    #[test]
    fn test_rejects_bad_parameters() {
        assert!(Geometry::new(500, 1024, 32 * 1024, 32, 64).is_err());
        assert!(Geometry::new(512, 256, 32 * 1024, 32, 64).is_err());
        assert!(Geometry::new(512, 8192, 32 * 1024, 32, 64).is_err());
        assert!(Geometry::new(512, 1024, 32 * 1024, 2, 64).is_err());
        // 段 0 放不下标签区、superblock 和检查点
        assert!(Geometry::new(512, 1024, 16 * 1024, 32, 64).is_err());
    }
}
