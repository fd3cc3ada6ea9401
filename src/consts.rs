//! LFS 常量定义

use crate::types::{Daddr, Ino, Lbn};

// ===== 魔数与版本 =====

/// Superblock 魔数
pub const LFS_MAGIC: u32 = 0x070162;

/// 段摘要魔数
pub const SS_MAGIC: u32 = 0x061561;

/// 磁盘格式版本
pub const LFS_VERSION: u32 = 2;

// ===== 块指针哨兵值 =====

/// bmapv 无法解析的磁盘地址
pub const UNASSIGNED: Daddr = -1;

/// 已预留但尚未写入日志的块（占位指针）
pub const UNWRITTEN: Daddr = -2;

/// 未使用的磁盘地址（空洞）
pub const LFS_UNUSED_DADDR: Daddr = 0;

/// 描述符逻辑块号哨兵：表示 inode 自身所在的块
pub const LFS_UNUSED_LBN: Lbn = -1;

// ===== inode 号 =====

/// 无效 inode 号
pub const LFS_UNUSED_INUM: Ino = 0;

/// Ifile 的 inode 号
pub const LFS_IFILE_INUM: Ino = 1;

/// 根 inode 号
pub const LFS_ROOT_INUM: Ino = 2;

/// 第一个可分配的 inode 号
pub const LFS_FIRST_INUM: Ino = 3;

// ===== 块寻址 =====

/// 直接块数量
pub const NDADDR: usize = 12;

/// 间接块层数
pub const NIADDR: usize = 3;

/// 一级间接
pub const SINGLE: usize = 0;

/// 二级间接
pub const DOUBLE: usize = 1;

/// 三级间接
pub const TRIPLE: usize = 2;

/// 块指针在磁盘上的大小
pub const LFS_DADDR_SIZE: usize = 4;

// ===== 磁盘布局 =====

/// 段 0 开头为磁盘标签预留的字节数
pub const LFS_LABELPAD: u64 = 8192;

/// 为 superblock 预留的字节数
pub const LFS_SBPAD: u64 = 8192;

/// 默认段摘要大小（按片段大小向上取整）
pub const LFS_SUMMARY_SIZE: u32 = 512;

/// 段摘要头部大小
pub const LFS_SUMMARY_HDR_SIZE: usize = 40;

/// 段摘要中每个块条目的大小
pub const LFS_FINFO_SIZE: usize = 16;

/// 磁盘 inode 大小
pub const LFS_DINODE_SIZE: usize = 128;

/// superblock 副本数
pub const LFS_MAXNUMSB: usize = 2;

/// 最小片段大小
pub const LFS_MIN_FSIZE: u32 = 512;

/// 最大块大小
pub const LFS_MAX_BSIZE: u32 = 65536;

/// 每块最多片段数
pub const LFS_MAXFRAG: u32 = 8;

/// 最少段数
pub const LFS_MIN_SEGS: u32 = 4;

/// 磁盘地址上限（磁盘上以 i32 存放）
pub const LFS_MAX_DADDR: Daddr = i32::MAX as Daddr;

/// 收缩截断需要预留的块数（最坏情况下复制的间接块）
pub const LFS_NRESERVE_TRUNC: u64 = 2 * NIADDR as u64 + 3;

/// 增长截断需要预留的块数
pub const LFS_NRESERVE_GROW: u64 = NIADDR as u64 + 2;

// ===== 清理器协议 =====

/// 单次 markv / bmapv 的描述符上限
pub const LFS_MARKV_MAXBLKCNT: usize = 65536;

/// markv 中途刷写的阈值（已暂存块数）
pub const LFS_MARKV_MAX_BLOCKS: usize = 127;

// ===== inode 模式 =====

/// 文件类型掩码
pub const S_IFMT: u16 = 0o170000;

/// 普通文件
pub const S_IFREG: u16 = 0o100000;

/// 目录
pub const S_IFDIR: u16 = 0o040000;

/// 符号链接
pub const S_IFLNK: u16 = 0o120000;
