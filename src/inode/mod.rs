//! Inode 操作模块
//!
//! 内存中的 inode 除了磁盘上的字段外，还携带：
//! - `effnblks`：包含占位块在内的片段数（`blocks` 只统计已写入日志的片段）
//! - `fragsize`：每个直接块在磁盘上的实际字节数
//! - 脏缓冲区：尚未写入日志的数据块和间接块，按逻辑块号索引
//!
//! 块指针为 [`UNWRITTEN`](crate::consts::UNWRITTEN) 时，对应的脏缓冲区一定存在。

mod read;
mod write;

pub use read::DINODE_CKSUM_OFF;

use crate::consts::*;
use crate::types::{Daddr, Ino, Lbn};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use bitflags::bitflags;

bitflags! {
    /// 内存 inode 状态标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InodeFlags: u32 {
        /// inode 字段被修改，需要重写
        const MODIFIED = 0x01;
        /// 清理器要求搬移 inode 本身
        const CLEANING = 0x02;
        /// inode 已被删除
        const DELETED = 0x04;
    }
}

/// 内存中的 inode
#[derive(Debug, Clone)]
pub struct Inode {
    /// inode 号
    pub ino: Ino,
    /// 版本号（与 ifile 表项一致，每次释放递增）
    pub version: u32,
    /// 文件模式（类型 + 权限）
    pub mode: u16,
    /// 硬链接数
    pub nlink: u16,
    /// 文件大小（字节）
    pub size: u64,
    /// 已写入日志的片段数（持久化）
    pub blocks: i64,
    /// 包括占位块在内的片段数
    pub effnblks: i64,
    /// 修改时间（秒）
    pub mtime: u64,
    /// 直接块指针
    pub db: [Daddr; NDADDR],
    /// 一级、二级、三级间接块指针
    pub ib: [Daddr; NIADDR],
    /// 直接块在磁盘上的字节数（未写入时为 0）
    pub fragsize: [u32; NDADDR],
    /// 状态标志
    pub flags: InodeFlags,
    /// 脏缓冲区：逻辑块号 → 块内容
    pub(crate) dirty: BTreeMap<Lbn, Vec<u8>>,
}

impl Inode {
    /// 创建一个空 inode
    pub fn new(ino: Ino, version: u32, mode: u16) -> Self {
        Self {
            ino,
            version,
            mode,
            nlink: 1,
            size: 0,
            blocks: 0,
            effnblks: 0,
            mtime: 0,
            db: [0; NDADDR],
            ib: [0; NIADDR],
            fragsize: [0; NDADDR],
            flags: InodeFlags::MODIFIED,
            dirty: BTreeMap::new(),
        }
    }

    /// 文件类型位
    #[inline]
    pub fn file_type(&self) -> u16 {
        self.mode & S_IFMT
    }

    /// 是否目录
    #[inline]
    pub fn is_dir(&self) -> bool {
        self.file_type() == S_IFDIR
    }

    /// 是否普通文件
    #[inline]
    pub fn is_reg(&self) -> bool {
        self.file_type() == S_IFREG
    }

    /// 是否有待写入日志的内容
    pub fn needs_write(&self) -> bool {
        !self.dirty.is_empty()
            || self.flags.intersects(InodeFlags::MODIFIED | InodeFlags::CLEANING)
    }

    /// 逻辑块是否有脏缓冲区
    #[inline]
    pub fn has_dirty(&self, lbn: Lbn) -> bool {
        self.dirty.contains_key(&lbn)
    }

    /// 脏缓冲区中的块
    pub fn dirty_block(&self, lbn: Lbn) -> Option<&[u8]> {
        self.dirty.get(&lbn).map(|b| b.as_slice())
    }

    /// 脏缓冲区数量
    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    /// 丢弃 `from` 及之后的脏数据块，返回丢弃数量
    pub(crate) fn drop_dirty_data_from(&mut self, from: Lbn) -> usize {
        let doomed: Vec<Lbn> = self.dirty.range(from.max(0)..).map(|(&lbn, _)| lbn).collect();
        for lbn in &doomed {
            self.dirty.remove(lbn);
        }
        doomed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_inode_is_modified() {
        let ip = Inode::new(5, 2, S_IFREG | 0o644);
        assert!(ip.is_reg());
        assert!(!ip.is_dir());
        assert!(ip.needs_write());
        assert_eq!(ip.blocks, 0);
    }

    #[test]
    fn test_drop_dirty_data_keeps_metadata() {
        let mut ip = Inode::new(5, 0, S_IFREG);
        ip.dirty.insert(-12, alloc::vec![0; 4]);
        ip.dirty.insert(0, alloc::vec![1; 4]);
        ip.dirty.insert(3, alloc::vec![2; 4]);
        ip.dirty.insert(7, alloc::vec![3; 4]);

        assert_eq!(ip.drop_dirty_data_from(3), 2);
        assert!(ip.has_dirty(-12));
        assert!(ip.has_dirty(0));
        assert!(!ip.has_dirty(3));
    }
}
