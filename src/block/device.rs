//! 块设备核心类型

use crate::cache::{CacheStats, FragCache};
use crate::error::{Error, ErrorKind, Result};
use crate::types::Daddr;

/// 块设备接口
///
/// 实现此 trait 以提供底层扇区访问。文件系统以片段（fragment）为单位寻址，
/// 片段大小必须是扇区大小的整数倍。
///
/// # 示例
///
/// ```rust,ignore
/// use lfs_core::{BlockDevice, Result};
///
/// struct RamDisk {
///     data: Vec<u8>,
/// }
///
/// impl BlockDevice for RamDisk {
///     fn sector_size(&self) -> u32 {
///         512
///     }
///
///     fn total_sectors(&self) -> u64 {
///         self.data.len() as u64 / 512
///     }
///
///     fn read_sectors(&mut self, lba: u64, buf: &mut [u8]) -> Result<()> {
///         let off = lba as usize * 512;
///         buf.copy_from_slice(&self.data[off..off + buf.len()]);
///         Ok(())
///     }
///
///     fn write_sectors(&mut self, lba: u64, buf: &[u8]) -> Result<()> {
///         let off = lba as usize * 512;
///         self.data[off..off + buf.len()].copy_from_slice(buf);
///         Ok(())
///     }
/// }
/// ```
pub trait BlockDevice {
    /// 物理扇区大小（通常 512）
    fn sector_size(&self) -> u32;

    /// 总扇区数
    fn total_sectors(&self) -> u64;

    /// 读取扇区
    ///
    /// # 参数
    ///
    /// * `lba` - 起始扇区号
    /// * `buf` - 目标缓冲区，长度为扇区大小的整数倍
    fn read_sectors(&mut self, lba: u64, buf: &mut [u8]) -> Result<()>;

    /// 写入扇区
    ///
    /// # 参数
    ///
    /// * `lba` - 起始扇区号
    /// * `buf` - 源缓冲区，长度为扇区大小的整数倍
    fn write_sectors(&mut self, lba: u64, buf: &[u8]) -> Result<()>;

    /// 刷新设备写缓存
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// 是否只读
    fn is_read_only(&self) -> bool {
        false
    }
}

/// I/O 统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoStats {
    /// 逻辑读取次数（包括缓存命中）
    pub reads: u64,
    /// 逻辑写入次数
    pub writes: u64,
    /// 物理读取次数（实际设备操作）
    pub physical_reads: u64,
    /// 物理写入次数（实际设备操作）
    pub physical_writes: u64,
    /// 写入的片段总数
    pub frags_written: u64,
}

/// 块设备包装器
///
/// 以片段为单位访问设备，带统计信息和可选的片段读缓存。
/// 日志只追加写，从不原地覆盖活跃数据，所以缓存采用写穿策略，
/// 没有脏块回写。
///
/// BlockDev 本身不包含内部锁，文件系统把它放在 `spin::Mutex` 里使用。
pub struct BlockDev<D> {
    /// 底层设备
    device: D,
    /// 片段大小（字节）
    fsize: u32,
    /// 每个片段包含的扇区数
    sectors_per_frag: u64,
    /// 设备总片段数
    total_frags: u64,
    /// 统计信息
    pub(super) stats: IoStats,
    /// 片段缓存（可选）
    pub(super) cache: Option<FragCache>,
}

impl<D: BlockDevice> BlockDev<D> {
    /// 创建新的块设备包装器（无缓存）
    ///
    /// # 参数
    ///
    /// * `device` - 底层块设备
    /// * `fsize` - 片段大小（字节）
    pub fn new(device: D, fsize: u32) -> Result<Self> {
        let sector_size = device.sector_size();
        if sector_size == 0 || fsize == 0 || fsize % sector_size != 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "fragment size must be a multiple of sector size",
            ));
        }

        let sectors_per_frag = (fsize / sector_size) as u64;
        let total_frags = device.total_sectors() / sectors_per_frag;

        Ok(Self {
            device,
            fsize,
            sectors_per_frag,
            total_frags,
            stats: IoStats::default(),
            cache: None,
        })
    }

    /// 创建带缓存的块设备包装器
    ///
    /// # 参数
    ///
    /// * `device` - 底层块设备
    /// * `fsize` - 片段大小（字节）
    /// * `cache_frags` - 缓存片段数量，0 表示不使用缓存
    pub fn with_cache(device: D, fsize: u32, cache_frags: usize) -> Result<Self> {
        let mut bd = Self::new(device, fsize)?;
        bd.cache = FragCache::new(cache_frags, fsize as usize);
        Ok(bd)
    }

    /// 获取底层设备的引用
    pub fn device(&self) -> &D {
        &self.device
    }

    /// 获取底层设备的可变引用
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// 取回底层设备
    pub fn into_inner(self) -> D {
        self.device
    }

    /// 片段大小
    pub fn fsize(&self) -> u32 {
        self.fsize
    }

    /// 设备总片段数
    pub fn total_frags(&self) -> u64 {
        self.total_frags
    }

    /// I/O 统计
    pub fn stats(&self) -> IoStats {
        self.stats
    }

    /// 缓存统计（未启用缓存时返回 None）
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|c| c.stats())
    }

    /// 使一段连续片段的缓存失效
    ///
    /// 段被重新使用前调用，丢弃旧内容的缓存。
    ///
    /// # 返回
    ///
    /// 失效的片段数
    pub fn invalidate_range(&mut self, from: Daddr, count: u64) -> usize {
        match &mut self.cache {
            Some(cache) => cache.invalidate_range(from, count),
            None => 0,
        }
    }

    /// 刷新设备
    pub fn flush(&mut self) -> Result<()> {
        self.device.flush()
    }

    // 内部辅助方法

    /// 检查片段范围并转换为扇区号
    pub(super) fn frag_to_lba(&self, daddr: Daddr, nfrags: u64) -> Result<u64> {
        if daddr < 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "negative disk address"));
        }
        if daddr as u64 + nfrags > self.total_frags {
            return Err(Error::new(ErrorKind::InvalidInput, "disk address beyond device"));
        }
        Ok(daddr as u64 * self.sectors_per_frag)
    }

    /// 直接读取扇区（绕过缓存）
    pub(super) fn raw_read(&mut self, lba: u64, buf: &mut [u8]) -> Result<()> {
        self.stats.physical_reads += 1;
        self.device.read_sectors(lba, buf)
    }

    /// 直接写入扇区（绕过缓存）
    pub(super) fn raw_write(&mut self, lba: u64, buf: &[u8]) -> Result<()> {
        if self.device.is_read_only() {
            return Err(Error::new(ErrorKind::PermissionDenied, "device is read-only"));
        }
        self.stats.physical_writes += 1;
        self.device.write_sectors(lba, buf)
    }
}
