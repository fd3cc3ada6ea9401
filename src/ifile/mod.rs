//! Ifile：段使用表、全局清理器信息与 inode 映射表
//!
//! 三张表常驻内存，每次检查点整体序列化为一个镜像写入日志（从不原地更新），
//! superblock 记录最新镜像的地址。段使用表与清理器信息只在持有段锁时修改；
//! `bfree` 例外，块分配在 vnode 锁下直接扣减。

mod image;

use crate::consts::*;
use crate::error::{Error, ErrorKind, Result};
use crate::superblock::Geometry;
use crate::types::{CleanerInfo, Daddr, IfileEntry, Ino, SegUse, SegUseFlags};
use alloc::vec;
use alloc::vec::Vec;

/// 内存中的 ifile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ifile {
    /// 全局清理器信息
    pub cleaner: CleanerInfo,
    segs: Vec<SegUse>,
    inodes: Vec<IfileEntry>,
}

impl Ifile {
    /// 格式化时创建：所有段干净，inode 空闲链表包含全部可分配 inode
    pub fn format(geom: &Geometry) -> Self {
        let mut segs = vec![SegUse::default(); geom.nseg as usize];
        for (sn, su) in segs.iter_mut().enumerate() {
            su.flags = SegUseFlags::EMPTY;
            if geom.is_sb_seg(sn as u32) {
                su.flags |= SegUseFlags::SUPERBLOCK;
            }
        }

        let mut inodes = vec![IfileEntry::default(); geom.ninodes as usize];
        let last = geom.ninodes - 1;
        for ino in LFS_FIRST_INUM..geom.ninodes {
            inodes[ino as usize].nextfree = if ino == last { LFS_UNUSED_INUM } else { ino + 1 };
        }

        let cleaner = CleanerInfo {
            clean: geom.nseg,
            dirty: 0,
            bfree: geom.total_usable() - geom.image_frags(),
            avail: geom.total_usable(),
            dmeta: 0,
            free_head: LFS_FIRST_INUM,
            free_tail: last,
            flags: 0,
        };

        Self { cleaner, segs, inodes }
    }

    /// 段数
    pub fn nseg(&self) -> u32 {
        self.segs.len() as u32
    }

    /// inode 总数
    pub fn ninodes(&self) -> u32 {
        self.inodes.len() as u32
    }

    // ===== 段使用表 =====

    /// 读取段使用记录
    ///
    /// # 错误
    ///
    /// - `ErrorKind::InvalidInput` - 段号越界
    pub fn seguse(&self, sn: u32) -> Result<SegUse> {
        self.segs
            .get(sn as usize)
            .copied()
            .ok_or(Error::new(ErrorKind::InvalidInput, "segment number out of range"))
    }

    /// 写回段使用记录
    ///
    /// 活跃字节为 0 时自动设置 EMPTY，否则清除。
    pub fn write_seguse(&mut self, sn: u32, mut su: SegUse) -> Result<()> {
        if su.nbytes == 0 {
            su.flags |= SegUseFlags::EMPTY;
        } else {
            su.flags -= SegUseFlags::EMPTY;
        }
        let slot = self
            .segs
            .get_mut(sn as usize)
            .ok_or(Error::new(ErrorKind::InvalidInput, "segment number out of range"))?;
        *slot = su;
        Ok(())
    }

    /// 遍历段使用表
    pub fn segments(&self) -> impl Iterator<Item = (u32, &SegUse)> {
        self.segs.iter().enumerate().map(|(sn, su)| (sn as u32, su))
    }

    /// 清除除 `keep` 之外所有段的 ACTIVE 标志
    pub(crate) fn clear_active_except(&mut self, keep: u32) {
        for (sn, su) in self.segs.iter_mut().enumerate() {
            if sn as u32 != keep {
                su.flags -= SegUseFlags::ACTIVE;
            }
        }
    }

    // ===== inode 映射表 =====

    /// 读取 inode 映射表项
    ///
    /// # 错误
    ///
    /// - `ErrorKind::InvalidInput` - inode 号越界
    pub fn ientry(&self, ino: Ino) -> Result<IfileEntry> {
        self.inodes
            .get(ino as usize)
            .copied()
            .ok_or(Error::new(ErrorKind::InvalidInput, "inode number out of range"))
    }

    /// 更新 inode 的磁盘地址，返回旧地址
    pub(crate) fn set_iaddr(&mut self, ino: Ino, daddr: Daddr) -> Result<Daddr> {
        let ent = self
            .inodes
            .get_mut(ino as usize)
            .ok_or(Error::new(ErrorKind::InvalidInput, "inode number out of range"))?;
        Ok(core::mem::replace(&mut ent.daddr, daddr))
    }

    /// 从空闲链表头分配一个 inode
    ///
    /// # 返回
    ///
    /// `(inode 号, 版本号)`
    ///
    /// # 错误
    ///
    /// - `ErrorKind::NoSpace` - 没有空闲 inode
    pub(crate) fn alloc_ino(&mut self) -> Result<(Ino, u32)> {
        let ino = self.cleaner.free_head;
        if ino == LFS_UNUSED_INUM {
            return Err(Error::new(ErrorKind::NoSpace, "no free inodes"));
        }
        let ent = self.ientry(ino)?;
        self.cleaner.free_head = ent.nextfree;
        if ent.nextfree == LFS_UNUSED_INUM {
            self.cleaner.free_tail = LFS_UNUSED_INUM;
        }
        let slot = &mut self.inodes[ino as usize];
        slot.nextfree = LFS_UNUSED_INUM;
        slot.daddr = LFS_UNUSED_DADDR;
        Ok((ino, slot.version))
    }

    /// 释放 inode：版本号递增，地址清零，挂到空闲链表尾
    ///
    /// # 返回
    ///
    /// inode 释放前的磁盘地址
    pub(crate) fn free_ino(&mut self, ino: Ino) -> Result<Daddr> {
        if ino < LFS_FIRST_INUM || ino >= self.ninodes() {
            return Err(Error::new(ErrorKind::InvalidInput, "cannot free reserved inode"));
        }
        let old = {
            let slot = &mut self.inodes[ino as usize];
            slot.version = slot.version.wrapping_add(1);
            slot.nextfree = LFS_UNUSED_INUM;
            core::mem::replace(&mut slot.daddr, LFS_UNUSED_DADDR)
        };

        let tail = self.cleaner.free_tail;
        if tail == LFS_UNUSED_INUM {
            self.cleaner.free_head = ino;
        } else {
            self.inodes[tail as usize].nextfree = ino;
        }
        self.cleaner.free_tail = ino;
        Ok(old)
    }

    /// 空闲 inode 数（遍历空闲链表）
    pub fn free_inodes(&self) -> u32 {
        let mut n = 0;
        let mut ino = self.cleaner.free_head;
        while ino != LFS_UNUSED_INUM && n < self.ninodes() {
            n += 1;
            ino = self.inodes[ino as usize].nextfree;
        }
        n
    }

    /// 已写入磁盘的 inode
    pub fn live_inodes(&self) -> impl Iterator<Item = (Ino, &IfileEntry)> {
        self.inodes
            .iter()
            .enumerate()
            .skip(LFS_ROOT_INUM as usize)
            .filter(|(_, e)| e.daddr > 0)
            .map(|(ino, e)| (ino as Ino, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geom() -> Geometry {
        Geometry::new(512, 1024, 32 * 1024, 32, 64).unwrap()
    }

    #[test]
    fn test_format_counters() {
        let g = geom();
        let ifile = Ifile::format(&g);
        assert_eq!(ifile.cleaner.clean, 32);
        assert_eq!(ifile.cleaner.avail, g.total_usable());
        assert_eq!(ifile.cleaner.bfree, g.total_usable() - g.image_frags());
        assert!(ifile.seguse(0).unwrap().flags.contains(SegUseFlags::SUPERBLOCK));
        assert!(ifile.seguse(16).unwrap().flags.contains(SegUseFlags::SUPERBLOCK));
        assert!(!ifile.seguse(3).unwrap().flags.contains(SegUseFlags::SUPERBLOCK));
        assert_eq!(ifile.free_inodes(), 64 - LFS_FIRST_INUM);
    }

    #[test]
    fn test_write_seguse_tracks_empty() {
        let mut ifile = Ifile::format(&geom());
        let mut su = ifile.seguse(5).unwrap();
        su.nbytes = 100;
        ifile.write_seguse(5, su).unwrap();
        assert!(!ifile.seguse(5).unwrap().flags.contains(SegUseFlags::EMPTY));
        su.nbytes = 0;
        ifile.write_seguse(5, su).unwrap();
        assert!(ifile.seguse(5).unwrap().flags.contains(SegUseFlags::EMPTY));
        assert!(ifile.seguse(32).is_err());
    }

    #[test]
    fn test_inode_free_list_cycle() {
        let mut ifile = Ifile::format(&geom());
        let (a, va) = ifile.alloc_ino().unwrap();
        let (b, _) = ifile.alloc_ino().unwrap();
        assert_eq!(a, LFS_FIRST_INUM);
        assert_eq!(b, LFS_FIRST_INUM + 1);
        assert_eq!(va, 0);

        ifile.set_iaddr(a, 77).unwrap();
        assert_eq!(ifile.free_ino(a).unwrap(), 77);
        assert_eq!(ifile.ientry(a).unwrap().version, 1);
        assert_eq!(ifile.cleaner.free_tail, a);
        assert!(ifile.free_ino(LFS_ROOT_INUM).is_err());

        // 耗尽空闲链表
        let mut n = 0;
        while ifile.alloc_ino().is_ok() {
            n += 1;
        }
        assert_eq!(n, 64 - LFS_FIRST_INUM - 1);
        assert_eq!(ifile.alloc_ino().unwrap_err().kind(), ErrorKind::NoSpace);
    }
}
