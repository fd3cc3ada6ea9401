//! lfs_core: 日志结构文件系统（LFS）的段管理核心
//!
//! 这是一个纯 Rust 实现的 LFS 段管理子系统，包括：
//! - **截断**：按层释放间接块树，精确维护段活跃字节与 inode 块计数
//! - **段记账**：按段批量累积释放量，持有段锁时一次性落账
//! - **清理器协议**：bmapv / markv / segclean / segwait 的内核侧实现
//!
//! # 示例
//!
//! ```rust,ignore
//! use lfs_core::{BlockDevice, FsConfig, Lfs, MkfsOptions, TruncFlags};
//!
//! let fs: Lfs<MyDevice, MyHal> = Lfs::mkfs(device, &MkfsOptions::default(), FsConfig::default())?;
//! let ino = fs.create(lfs_core::consts::S_IFREG | 0o644)?;
//! fs.write(ino, 0, &data)?;
//! fs.truncate(ino, 0, TruncFlags::SYNC)?;
//! ```
//!
//! # 模块结构
//!
//! - [`error`] - 错误类型定义
//! - [`block`] - 块设备抽象和片段 I/O
//! - [`superblock`] - 几何参数与 superblock（检查点锚点）
//! - [`ifile`] - 段使用表、清理器信息与 inode 映射
//! - [`inode`] - 内存 inode 与磁盘编码
//! - [`indirect`] - 块映射与间接块树截断
//! - [`balloc`] - 占位块分配与段记账批处理
//! - [`segment`] - 段锁、部分段写入与检查点
//! - [`fs`] - 文件系统高级 API
//! - [`cleaner`] - 清理器协议

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

#[cfg(any(test, feature = "std"))]
extern crate std;

// ===== 核心模块 =====

/// 错误处理
pub mod error;

/// 块设备抽象
pub mod block;

/// 常量定义
pub mod consts;

/// 数据结构定义
pub mod types;

/// Superblock 与几何参数
pub mod superblock;

/// Ifile 表
pub mod ifile;

/// Inode 操作
pub mod inode;

/// 间接块寻址与截断
pub mod indirect;

/// 块分配与段记账
pub mod balloc;

/// 段锁与段写入
pub mod segment;

/// 文件系统高级 API
pub mod fs;

/// 清理器协议
pub mod cleaner;

/// 片段读缓存
pub mod cache;

/// CRC32 校验和计算
pub(crate) mod crc;

#[cfg(test)]
pub(crate) mod testutil;

// ===== 公共导出 =====

// 错误处理
pub use error::{Error, ErrorKind, Result};

// 块设备
pub use block::{BlockDev, BlockDevice, IoStats};

// Superblock
pub use superblock::{probe_superblock, Geometry, Superblock};

// Ifile
pub use ifile::Ifile;

// Inode
pub use inode::{Inode, InodeFlags};

// 块映射
pub use indirect::BlockMapper;

// 段记账
pub use balloc::SegDeltas;

// 段锁
pub use segment::{SegGuard, SegLock, SegmFlags};

// FileSystem
pub use fs::{FileAttr, FsConfig, FsckReport, Lfs, LfsHal, MkfsOptions, Reservation, StatFs, TruncFlags};
#[cfg(feature = "std")]
pub use fs::StdHal;

// 清理器
pub use cleaner::{
    BlockInfo, CleanerCaps, Credentials, MarkOutcome, MarkvReport, MarkvStatus, MountTable,
    SegCleanOutcome, SegWaitOutcome, WireAbi,
};

// Cache
pub use cache::{CacheStats, FragCache, DEFAULT_CACHE_FRAGS};
