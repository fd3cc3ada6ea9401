//! 一致性检查
//!
//! 独立于记账代码，从 ifile 中的 inode 地址出发遍历所有块树，重新计算
//! 每个段的活跃字节、每个 inode 的片段数以及全局空闲计数，再与记录值比较。
//! 只在没有未写入修改的时刻有意义（例如检查点之后或刚挂载时）。

use super::filesystem::Lfs;
use super::types::LfsHal;
use crate::block::{BlockDev, BlockDevice};
use crate::consts::*;
use crate::error::{Error, ErrorKind, Result};
use crate::indirect::read_ptr;
use crate::inode::Inode;
use crate::segment::SegmFlags;
use crate::superblock::Geometry;
use crate::types::{Daddr, Ino, SegUseFlags};
use alloc::vec;
use alloc::vec::Vec;

/// 检查发现的不一致
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mismatch {
    /// 段的活跃字节数不符
    SegBytes {
        seg: u32,
        recorded: u32,
        computed: u64,
    },
    /// inode 的片段数不符
    InodeBlocks {
        ino: Ino,
        recorded: i64,
        computed: i64,
    },
    /// 块指针指向无效地址
    BadPointer { ino: Ino, daddr: Daddr },
    /// 空闲片段数不符
    Bfree { recorded: i64, computed: i64 },
    /// 可写片段数不符
    Avail { recorded: i64, computed: i64 },
    /// 干净/脏段计数与段标志不符
    SegCounts { clean: u32, dirty: u32, flagged_dirty: u32 },
}

/// 检查报告
#[derive(Debug, Clone, Default)]
pub struct FsckReport {
    /// 检查的 inode 数
    pub inodes: u32,
    /// 发现的不一致
    pub mismatches: Vec<Mismatch>,
}

impl FsckReport {
    /// 是否没有发现不一致
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty()
    }
}

struct Walk<'a> {
    geom: &'a Geometry,
    seg_bytes: Vec<u64>,
    frags: i64,
    bad: Vec<(Ino, Daddr)>,
}

impl Walk<'_> {
    fn charge(&mut self, ino: Ino, daddr: Daddr, bytes: u64) -> bool {
        let g = self.geom;
        if daddr <= 0 || daddr >= g.segtod(g.nseg) {
            self.bad.push((ino, daddr));
            return false;
        }
        self.seg_bytes[g.dtosn(daddr) as usize] += bytes;
        true
    }

    fn meta<D: BlockDevice>(&mut self, dev: &mut BlockDev<D>, ino: Ino, daddr: Daddr, level: usize) -> Result<()> {
        let bsize = self.geom.bsize as u64;
        if !self.charge(ino, daddr, bsize) {
            return Ok(());
        }
        self.frags += self.geom.blockfrags();
        let mut buf = vec![0u8; bsize as usize];
        dev.read_frags(daddr, &mut buf)?;
        for i in 0..self.geom.nindir as usize {
            let p = read_ptr(&buf, i);
            if p == LFS_UNUSED_DADDR {
                continue;
            }
            if level > 1 {
                self.meta(dev, ino, p, level - 1)?;
            } else if self.charge(ino, p, bsize) {
                self.frags += self.geom.blockfrags();
            }
        }
        Ok(())
    }
}

/// 检查文件系统一致性
///
/// # 错误
///
/// - `ErrorKind::InvalidState` - 还有未写入日志的修改
/// - `ErrorKind::Io` / `ErrorKind::Corrupted` - 读取失败或 inode 无效
pub fn check<D: BlockDevice, H: LfsHal>(fs: &Lfs<D, H>) -> Result<FsckReport> {
    for vp in fs.vnode_list() {
        let busy = match vp.try_lock() {
            Some(ip) => ip.needs_write(),
            None => true,
        };
        if busy {
            return Err(Error::new(ErrorKind::InvalidState, "unwritten changes present"));
        }
    }

    let seg = fs.seglock.lock(SegmFlags::PROT);
    if seg.has_partial() {
        return Err(Error::new(ErrorKind::InvalidState, "partial segment not flushed"));
    }
    let g = fs.geom;
    let ifile = fs.ifile.read();
    let mut dev = fs.dev.lock();
    let mut report = FsckReport::default();
    let mut walk = Walk {
        geom: &g,
        seg_bytes: vec![0; g.nseg as usize],
        frags: 0,
        bad: Vec::new(),
    };

    if seg.idaddr > 0 {
        walk.charge(LFS_IFILE_INUM, seg.idaddr, g.image_blocks() as u64 * g.bsize as u64);
    }

    let mut effnblks = 0i64;
    for (ino, ent) in ifile.live_inodes() {
        report.inodes += 1;
        if !walk.charge(ino, ent.daddr, g.fsize as u64) {
            continue;
        }
        let mut buf = vec![0u8; g.fsize as usize];
        dev.read_frags(ent.daddr, &mut buf)?;
        let ip = Inode::decode(&buf, &g, ino)?;

        walk.frags = 0;
        for (i, &d) in ip.db.iter().enumerate() {
            if d == LFS_UNUSED_DADDR {
                continue;
            }
            let bytes = g.fragroundup(g.blksize(ip.size, i as i64) as u64);
            if walk.charge(ino, d, bytes) {
                walk.frags += g.numfrags(bytes);
            }
        }
        for (level, &d) in ip.ib.iter().enumerate() {
            if d != LFS_UNUSED_DADDR {
                walk.meta(&mut *dev, ino, d, level + 1)?;
            }
        }
        if walk.frags != ip.blocks {
            report.mismatches.push(Mismatch::InodeBlocks {
                ino,
                recorded: ip.blocks,
                computed: walk.frags,
            });
        }
        effnblks += walk.frags;
    }

    for &(ino, daddr) in &walk.bad {
        report.mismatches.push(Mismatch::BadPointer { ino, daddr });
    }

    let mut flagged_dirty = 0;
    let mut consumed = 0i64;
    for (sn, su) in ifile.segments() {
        if su.nbytes as u64 != walk.seg_bytes[sn as usize] {
            report.mismatches.push(Mismatch::SegBytes {
                seg: sn,
                recorded: su.nbytes,
                computed: walk.seg_bytes[sn as usize],
            });
        }
        if su.flags.contains(SegUseFlags::DIRTY) {
            flagged_dirty += 1;
            if sn != seg.curseg {
                consumed += g.seg_usable(sn);
            }
        }
    }
    consumed += seg.offset - g.seg_data_start(seg.curseg);

    let ci = ifile.cleaner;
    if ci.dirty != flagged_dirty || ci.clean + ci.dirty != g.nseg {
        report.mismatches.push(Mismatch::SegCounts {
            clean: ci.clean,
            dirty: ci.dirty,
            flagged_dirty,
        });
    }

    let bfree = g.total_usable() - g.image_frags() - effnblks - ci.dmeta;
    if bfree != ci.bfree {
        report.mismatches.push(Mismatch::Bfree {
            recorded: ci.bfree,
            computed: bfree,
        });
    }
    let avail = g.total_usable() - consumed;
    if avail != ci.avail {
        report.mismatches.push(Mismatch::Avail {
            recorded: ci.avail,
            computed: avail,
        });
    }

    if report.is_clean() {
        log::info!("[FSCK] {} inodes, no mismatches", report.inodes);
    } else {
        log::warn!("[FSCK] {} mismatches: {:?}", report.mismatches.len(), report.mismatches);
    }
    Ok(report)
}
