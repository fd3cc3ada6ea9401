//! 文件系统 API 所需的类型定义

use crate::consts::*;
use crate::error::{Error, ErrorKind, Result};
use crate::superblock::Geometry;
use crate::types::Ino;
use bitflags::bitflags;
use core::time::Duration;

/// 系统硬件抽象层 trait
///
/// 提供文件系统所需的系统级功能：时间戳、等待时的让出，以及 `segwait`
/// 判断是否被信号打断。
pub trait LfsHal {
    /// 获取当前系统时间
    ///
    /// # 返回
    ///
    /// - `Some(Duration)` - 当前时间（从 UNIX 纪元开始）
    /// - `None` - 时间不可用（例如在没有RTC的嵌入式系统中）
    ///
    /// # 示例
    ///
    /// ```ignore
    /// struct MyHal;
    /// impl LfsHal for MyHal {
    ///     fn now() -> Option<Duration> {
    ///         Some(Duration::from_secs(get_unix_timestamp()))
    ///     }
    /// }
    /// ```
    fn now() -> Option<Duration>;

    /// 自旋等待中的一次让出
    fn relax() {
        core::hint::spin_loop();
    }

    /// 当前执行流是否有待处理的信号
    fn signal_pending() -> bool {
        false
    }
}

/// 基于标准库的 HAL
#[cfg(feature = "std")]
pub struct StdHal;

#[cfg(feature = "std")]
impl LfsHal for StdHal {
    fn now() -> Option<Duration> {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .ok()
    }

    fn relax() {
        std::thread::yield_now();
    }
}

/// 文件系统配置
#[derive(Debug, Clone, Copy)]
pub struct FsConfig {
    /// 片段读缓存大小（片段数），0 表示不缓存
    pub cache_frags: usize,
    /// 每写满多少个段做一次检查点，0 表示只在显式同步时做
    pub ckp_segments: u32,
    /// markv 暂存多少块后中途刷写
    pub markv_flush_blocks: usize,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            cache_frags: crate::cache::DEFAULT_CACHE_FRAGS,
            ckp_segments: 8,
            markv_flush_blocks: LFS_MARKV_MAX_BLOCKS,
        }
    }
}

/// 格式化参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MkfsOptions {
    /// 片段大小（字节）
    pub fsize: u32,
    /// 块大小（字节）
    pub bsize: u32,
    /// 段大小（字节）
    pub ssize: u32,
    /// 段数；`None` 表示按设备容量计算
    pub nseg: Option<u32>,
    /// inode 总数（含保留 inode）
    pub ninodes: u32,
}

impl Default for MkfsOptions {
    fn default() -> Self {
        Self {
            fsize: 1024,
            bsize: 8192,
            ssize: 1024 * 1024,
            nseg: None,
            ninodes: 4096,
        }
    }
}

impl MkfsOptions {
    /// 根据设备容量验证参数并计算几何参数
    ///
    /// # 参数
    ///
    /// * `device_bytes` - 设备容量（字节）
    ///
    /// # 错误
    ///
    /// - `ErrorKind::InvalidInput` - 参数无效或设备容量不足
    pub fn geometry(&self, device_bytes: u64) -> Result<Geometry> {
        if self.ssize == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "segment size is zero"));
        }
        let fit = (device_bytes / self.ssize as u64).min(u32::MAX as u64) as u32;
        let nseg = match self.nseg {
            Some(n) if n > fit => {
                return Err(Error::new(ErrorKind::InvalidInput, "device too small for segment count"))
            }
            Some(n) => n,
            None => fit,
        };
        Geometry::new(self.fsize, self.bsize, self.ssize, nseg, self.ninodes)
    }
}

/// 文件系统统计信息
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatFs {
    /// 片段大小（字节）
    pub fsize: u32,
    /// 块大小（字节）
    pub bsize: u32,
    /// 可用于日志的片段总数
    pub blocks: i64,
    /// 空闲片段数
    pub bfree: i64,
    /// 日志中仍可写入的片段数
    pub avail: i64,
    /// 段数
    pub nseg: u32,
    /// 干净段数
    pub clean: u32,
    /// 脏段数
    pub dirty: u32,
    /// inode 总数
    pub files: u32,
    /// 空闲 inode 数
    pub ffree: u32,
}

/// 文件属性
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileAttr {
    /// inode 号
    pub ino: Ino,
    /// 版本号
    pub version: u32,
    /// 文件模式（权限 + 类型）
    pub mode: u16,
    /// Inode 类型
    pub node_type: InodeType,
    /// 硬链接数
    pub nlink: u16,
    /// 文件大小（字节）
    pub size: u64,
    /// 已写入日志的片段数
    pub blocks: i64,
    /// 包括占位块在内的片段数
    pub effnblks: i64,
    /// 修改时间（秒）
    pub mtime: u64,
}

/// Inode 类型枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum InodeType {
    /// 未知类型
    #[default]
    Unknown = 0,
    /// 目录
    Directory = 1,
    /// 普通文件
    RegularFile = 2,
    /// 符号链接
    Symlink = 3,
}

impl InodeType {
    /// 从 mode 中提取 inode 类型
    pub fn from_mode(mode: u16) -> Self {
        match mode & S_IFMT {
            S_IFDIR => InodeType::Directory,
            S_IFREG => InodeType::RegularFile,
            S_IFLNK => InodeType::Symlink,
            _ => InodeType::Unknown,
        }
    }
}

bitflags! {
    /// 截断选项
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TruncFlags: u32 {
        /// 截断完成后立即做检查点
        const SYNC = 0x01;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inode_type_from_mode() {
        assert_eq!(InodeType::from_mode(S_IFREG | 0o644), InodeType::RegularFile);
        assert_eq!(InodeType::from_mode(S_IFDIR | 0o755), InodeType::Directory);
        assert_eq!(InodeType::from_mode(S_IFLNK), InodeType::Symlink);
        assert_eq!(InodeType::from_mode(0o644), InodeType::Unknown);
    }

    #[test]
    fn test_fs_config_default() {
        let config = FsConfig::default();
        assert_eq!(config.markv_flush_blocks, 127);
        assert_eq!(config.cache_frags, 256);
    }

    #[test]
    fn test_mkfs_options_geometry() {
        let opts = MkfsOptions {
            fsize: 512,
            bsize: 1024,
            ssize: 32 * 1024,
            nseg: None,
            ninodes: 64,
        };
        let g = opts.geometry(40 * 32 * 1024 + 100).unwrap();
        assert_eq!(g.nseg, 40);

        let too_many = MkfsOptions { nseg: Some(50), ..opts };
        assert!(too_many.geometry(40 * 32 * 1024).is_err());
    }
}
