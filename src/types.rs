//! LFS 数据结构定义
//!
//! 这个模块包含了直接对应磁盘格式的数据结构。
//!
//! ## 设计原则
//!
//! 1. **磁盘格式结构** - 字段顺序与偏移写在注释里，所有字段小端存放
//! 2. **编解码** - 使用 `byteorder` 显式读写，不依赖内存布局
//! 3. **辅助方法** - 提供 Rust 风格的访问器和工具函数

use crate::error::{Error, ErrorKind, Result};
use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian};

/// 磁盘地址（以片段为单位）
///
/// 内存中使用 i64 便于运算，磁盘上以 i32 存放。
/// 0 表示空洞，负值是哨兵（见 [`crate::consts::UNWRITTEN`]）。
pub type Daddr = i64;

/// 逻辑块号；负值表示间接块（元数据块）
pub type Lbn = i64;

/// inode 号
pub type Ino = u32;

/// 文件系统标识（清理器用它选择目标文件系统）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FsId(pub u64);

bitflags! {
    /// 段使用标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SegUseFlags: u32 {
        /// 当前正在追加的段，不可清理
        const ACTIVE = 0x01;
        /// 段中含有数据（非干净）
        const DIRTY = 0x02;
        /// 段中包含 superblock 副本
        const SUPERBLOCK = 0x04;
        /// 清理器处理该段时出错
        const ERROR = 0x08;
        /// 活跃字节为 0
        const EMPTY = 0x10;
        /// 段不可用
        const INVAL = 0x20;
    }
}

//=============================================================================
// 段使用记录
//=============================================================================

/// 段使用记录
///
/// 磁盘布局（24 字节）：
///
/// ```text
/// 0:  nbytes   u32  活跃字节数
/// 4:  olastmod u32  上次修改时间（秒，旧字段）
/// 8:  lastmod  u64  上次修改时间（秒）
/// 16: nsums    u16  段摘要数量
/// 18: ninos    u16  inode 块数量
/// 20: flags    u32  SegUseFlags
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegUse {
    /// 活跃字节数
    pub nbytes: u32,
    /// 上次修改时间（秒，截断为 32 位）
    pub olastmod: u32,
    /// 上次修改时间（秒）
    pub lastmod: u64,
    /// 已写入的部分段摘要数量
    pub nsums: u16,
    /// 已写入的 inode 数量
    pub ninos: u16,
    /// 段标志
    pub flags: SegUseFlags,
}

impl SegUse {
    /// 磁盘大小
    pub const DISK_SIZE: usize = 24;

    /// 从字节解码
    pub fn decode(buf: &[u8]) -> Self {
        Self {
            nbytes: LittleEndian::read_u32(&buf[0..4]),
            olastmod: LittleEndian::read_u32(&buf[4..8]),
            lastmod: LittleEndian::read_u64(&buf[8..16]),
            nsums: LittleEndian::read_u16(&buf[16..18]),
            ninos: LittleEndian::read_u16(&buf[18..20]),
            flags: SegUseFlags::from_bits_truncate(LittleEndian::read_u32(&buf[20..24])),
        }
    }

    /// 编码到字节
    pub fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..4], self.nbytes);
        LittleEndian::write_u32(&mut buf[4..8], self.olastmod);
        LittleEndian::write_u64(&mut buf[8..16], self.lastmod);
        LittleEndian::write_u16(&mut buf[16..18], self.nsums);
        LittleEndian::write_u16(&mut buf[18..20], self.ninos);
        LittleEndian::write_u32(&mut buf[20..24], self.flags.bits());
    }

    /// 段是否可被清理器回收
    pub fn is_cleanable(&self) -> bool {
        self.flags.contains(SegUseFlags::DIRTY)
            && !self.flags.contains(SegUseFlags::ACTIVE)
            && self.nbytes == 0
    }
}

//=============================================================================
// 全局清理器信息
//=============================================================================

/// 清理器信息（全局计数）
///
/// 磁盘布局（48 字节）：
///
/// ```text
/// 0:  clean     u32  干净段数
/// 4:  dirty     u32  脏段数
/// 8:  bfree     i64  空闲片段数（未分配给任何文件）
/// 16: avail     i64  日志中仍可写入的片段数
/// 24: dmeta     i64  摘要与 inode 占用的片段数
/// 32: free_head u32  空闲 inode 链表头
/// 36: free_tail u32  空闲 inode 链表尾
/// 40: flags     u32
/// 44: reserved
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CleanerInfo {
    /// 干净段数
    pub clean: u32,
    /// 脏段数
    pub dirty: u32,
    /// 空闲片段数
    pub bfree: i64,
    /// 可写片段数
    pub avail: i64,
    /// 元数据片段数（摘要 + inode）
    pub dmeta: i64,
    /// 空闲 inode 链表头（0 表示空）
    pub free_head: Ino,
    /// 空闲 inode 链表尾
    pub free_tail: Ino,
    /// 标志
    pub flags: u32,
}

impl CleanerInfo {
    /// 磁盘大小
    pub const DISK_SIZE: usize = 48;

    /// 从字节解码
    pub fn decode(buf: &[u8]) -> Self {
        Self {
            clean: LittleEndian::read_u32(&buf[0..4]),
            dirty: LittleEndian::read_u32(&buf[4..8]),
            bfree: LittleEndian::read_i64(&buf[8..16]),
            avail: LittleEndian::read_i64(&buf[16..24]),
            dmeta: LittleEndian::read_i64(&buf[24..32]),
            free_head: LittleEndian::read_u32(&buf[32..36]),
            free_tail: LittleEndian::read_u32(&buf[36..40]),
            flags: LittleEndian::read_u32(&buf[40..44]),
        }
    }

    /// 编码到字节
    pub fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..4], self.clean);
        LittleEndian::write_u32(&mut buf[4..8], self.dirty);
        LittleEndian::write_i64(&mut buf[8..16], self.bfree);
        LittleEndian::write_i64(&mut buf[16..24], self.avail);
        LittleEndian::write_i64(&mut buf[24..32], self.dmeta);
        LittleEndian::write_u32(&mut buf[32..36], self.free_head);
        LittleEndian::write_u32(&mut buf[36..40], self.free_tail);
        LittleEndian::write_u32(&mut buf[40..44], self.flags);
        LittleEndian::write_u32(&mut buf[44..48], 0);
    }
}

//=============================================================================
// Inode 映射表项
//=============================================================================

/// Ifile 中的 inode 映射表项
///
/// 磁盘布局（20 字节）：
///
/// ```text
/// 0:  version  u32  inode 版本（每次释放递增）
/// 4:  daddr    i32  inode 所在磁盘地址，0 表示未使用
/// 8:  nextfree u32  空闲链表中的下一个 inode
/// 12: atime    u64  访问时间
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IfileEntry {
    /// inode 版本
    pub version: u32,
    /// inode 磁盘地址
    pub daddr: Daddr,
    /// 下一个空闲 inode
    pub nextfree: Ino,
    /// 访问时间
    pub atime: u64,
}

impl IfileEntry {
    /// 磁盘大小
    pub const DISK_SIZE: usize = 20;

    /// 从字节解码
    pub fn decode(buf: &[u8]) -> Self {
        Self {
            version: LittleEndian::read_u32(&buf[0..4]),
            daddr: LittleEndian::read_i32(&buf[4..8]) as Daddr,
            nextfree: LittleEndian::read_u32(&buf[8..12]),
            atime: LittleEndian::read_u64(&buf[12..20]),
        }
    }

    /// 编码到字节
    pub fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..4], self.version);
        LittleEndian::write_i32(&mut buf[4..8], self.daddr as i32);
        LittleEndian::write_u32(&mut buf[8..12], self.nextfree);
        LittleEndian::write_u64(&mut buf[12..20], self.atime);
    }
}

//=============================================================================
// 段摘要
//=============================================================================

/// 段摘要中的块条目
///
/// 磁盘布局（16 字节）：
///
/// ```text
/// 0:  ino     u32
/// 4:  lbn     i32  LFS_UNUSED_LBN 表示 inode 块
/// 8:  version u32
/// 12: size    u32  块字节数
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FInfo {
    /// 所属 inode
    pub ino: Ino,
    /// 逻辑块号
    pub lbn: Lbn,
    /// inode 版本
    pub version: u32,
    /// 块大小（字节）
    pub size: u32,
}

impl FInfo {
    /// 从字节解码
    pub fn decode(buf: &[u8]) -> Self {
        Self {
            ino: LittleEndian::read_u32(&buf[0..4]),
            lbn: LittleEndian::read_i32(&buf[4..8]) as Lbn,
            version: LittleEndian::read_u32(&buf[8..12]),
            size: LittleEndian::read_u32(&buf[12..16]),
        }
    }

    /// 编码到字节
    pub fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..4], self.ino);
        LittleEndian::write_i32(&mut buf[4..8], self.lbn as i32);
        LittleEndian::write_u32(&mut buf[8..12], self.version);
        LittleEndian::write_u32(&mut buf[12..16], self.size);
    }
}

/// 部分段摘要头
///
/// 磁盘布局（40 字节，后跟 `nfinfo` 个 [`FInfo`]）：
///
/// ```text
/// 0:  magic    u32  SS_MAGIC
/// 4:  sumsum   u32  摘要校验和（从偏移 8 开始到摘要末尾）
/// 8:  datasum  u32  数据校验和
/// 12: nfinfo   u16  块条目数
/// 14: ninos    u16  inode 数
/// 16: create   u64  段创建戳
/// 24: serial   u64  部分段序号
/// 32: next     i32  下一个部分段地址
/// 36: reserved
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegSummary {
    /// 数据校验和
    pub datasum: u32,
    /// 块条目数
    pub nfinfo: u16,
    /// inode 数
    pub ninos: u16,
    /// 段创建戳
    pub create: u64,
    /// 部分段序号
    pub serial: u64,
    /// 下一个部分段地址
    pub next: Daddr,
}

impl SegSummary {
    /// 解码并校验摘要头（`buf` 为整个摘要块）
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if LittleEndian::read_u32(&buf[0..4]) != crate::consts::SS_MAGIC {
            return Err(Error::new(ErrorKind::Corrupted, "bad summary magic"));
        }
        let sumsum = LittleEndian::read_u32(&buf[4..8]);
        if sumsum != crate::crc::lfs_cksum(&buf[8..]) {
            return Err(Error::new(ErrorKind::Corrupted, "summary checksum mismatch"));
        }
        Ok(Self {
            datasum: LittleEndian::read_u32(&buf[8..12]),
            nfinfo: LittleEndian::read_u16(&buf[12..14]),
            ninos: LittleEndian::read_u16(&buf[14..16]),
            create: LittleEndian::read_u64(&buf[16..24]),
            serial: LittleEndian::read_u64(&buf[24..32]),
            next: LittleEndian::read_i32(&buf[32..36]) as Daddr,
        })
    }

    /// 编码摘要头；调用者写完条目后调用 [`SegSummary::seal`]
    pub fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..4], crate::consts::SS_MAGIC);
        LittleEndian::write_u32(&mut buf[8..12], self.datasum);
        LittleEndian::write_u16(&mut buf[12..14], self.nfinfo);
        LittleEndian::write_u16(&mut buf[14..16], self.ninos);
        LittleEndian::write_u64(&mut buf[16..24], self.create);
        LittleEndian::write_u64(&mut buf[24..32], self.serial);
        LittleEndian::write_i32(&mut buf[32..36], self.next as i32);
        LittleEndian::write_u32(&mut buf[36..40], 0);
    }

    /// 计算并写入摘要校验和
    pub fn seal(buf: &mut [u8]) {
        let sum = crate::crc::lfs_cksum(&buf[8..]);
        LittleEndian::write_u32(&mut buf[4..8], sum);
    }
}
