//! 片段 I/O 操作实现

use super::{BlockDev, BlockDevice};
use crate::error::{Error, ErrorKind, Result};
use crate::types::Daddr;

impl<D: BlockDevice> BlockDev<D> {
    /// 读取连续片段
    ///
    /// 如果启用了缓存且所有片段都命中，直接从缓存复制；
    /// 否则整段从设备读取并填充缓存。
    ///
    /// # 参数
    ///
    /// * `daddr` - 起始片段地址
    /// * `buf` - 目标缓冲区（长度为片段大小的整数倍）
    pub fn read_frags(&mut self, daddr: Daddr, buf: &mut [u8]) -> Result<()> {
        let fsize = self.fsize() as usize;
        if buf.is_empty() || buf.len() % fsize != 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "buffer is not a whole number of fragments",
            ));
        }
        let nfrags = (buf.len() / fsize) as u64;
        let lba = self.frag_to_lba(daddr, nfrags)?;

        self.stats.reads += 1;

        if let Some(cache) = &mut self.cache {
            if cache.read_range(daddr, buf) {
                log::trace!("[CACHE] read daddr={:#x} frags={} HIT", daddr, nfrags);
                return Ok(());
            }
        }

        self.raw_read(lba, buf)?;

        if let Some(cache) = &mut self.cache {
            log::trace!("[CACHE] read daddr={:#x} frags={} MISS", daddr, nfrags);
            cache.fill_range(daddr, buf);
        }
        Ok(())
    }

    /// 写入连续片段
    ///
    /// 写穿：先写设备，成功后更新缓存；失败时丢弃对应缓存项。
    ///
    /// # 参数
    ///
    /// * `daddr` - 起始片段地址
    /// * `buf` - 源缓冲区（长度为片段大小的整数倍）
    pub fn write_frags(&mut self, daddr: Daddr, buf: &[u8]) -> Result<()> {
        let fsize = self.fsize() as usize;
        if buf.is_empty() || buf.len() % fsize != 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "buffer is not a whole number of fragments",
            ));
        }
        let nfrags = (buf.len() / fsize) as u64;
        let lba = self.frag_to_lba(daddr, nfrags)?;

        self.stats.writes += 1;
        self.stats.frags_written += nfrags;

        match self.raw_write(lba, buf) {
            Ok(()) => {
                if let Some(cache) = &mut self.cache {
                    cache.fill_range(daddr, buf);
                }
                Ok(())
            }
            Err(e) => {
                log::warn!("[BLOCK] write daddr={:#x} frags={} failed: {}", daddr, nfrags, e);
                self.invalidate_range(daddr, nfrags);
                Err(e)
            }
        }
    }

    /// 读取字节（不足一个片段的部分会被丢弃）
    ///
    /// 用于读取大小不是片段整数倍的结构（例如 superblock）。
    pub fn read_bytes(&mut self, daddr: Daddr, buf: &mut [u8]) -> Result<()> {
        let fsize = self.fsize() as usize;
        let nfrags = buf.len().div_ceil(fsize).max(1);
        let mut temp = alloc::vec![0u8; nfrags * fsize];
        self.read_frags(daddr, &mut temp)?;
        buf.copy_from_slice(&temp[..buf.len()]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::block::BlockDev;
    use crate::testutil::MemDevice;

    #[test]
    fn test_fragment_round_trip() {
        let dev = MemDevice::new(64 * 1024);
        let mut bd = BlockDev::new(dev, 1024).unwrap();
        assert_eq!(bd.total_frags(), 64);

        let data = alloc::vec![0x5au8; 2048];
        bd.write_frags(10, &data).unwrap();

        let mut back = alloc::vec![0u8; 2048];
        bd.read_frags(10, &mut back).unwrap();
        assert_eq!(back, data);
        assert_eq!(bd.stats().physical_writes, 1);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let dev = MemDevice::new(8 * 1024);
        let mut bd = BlockDev::new(dev, 1024).unwrap();
        let mut buf = alloc::vec![0u8; 1024];
        assert!(bd.read_frags(8, &mut buf).is_err());
        assert!(bd.read_frags(-1, &mut buf).is_err());
        assert!(bd.read_frags(0, &mut buf[..100]).is_err());
    }

    #[test]
    fn test_cache_serves_repeat_reads() {
        let dev = MemDevice::new(64 * 1024);
        let mut bd = BlockDev::with_cache(dev, 1024, 16).unwrap();
        bd.write_frags(4, &alloc::vec![1u8; 1024]).unwrap();

        let mut buf = alloc::vec![0u8; 1024];
        bd.read_frags(4, &mut buf).unwrap();
        bd.read_frags(4, &mut buf).unwrap();
        assert_eq!(bd.stats().physical_reads, 0);
        assert_eq!(buf[0], 1);

        assert_eq!(bd.invalidate_range(0, 8), 1);
        bd.read_frags(4, &mut buf).unwrap();
        assert_eq!(bd.stats().physical_reads, 1);
    }

    #[test]
    fn test_failed_write_drops_cache() {
        let dev = MemDevice::new(64 * 1024);
        let handle = dev.clone();
        let mut bd = BlockDev::with_cache(dev, 1024, 16).unwrap();
        bd.write_frags(2, &alloc::vec![7u8; 1024]).unwrap();

        handle.set_fail_writes(true);
        assert!(bd.write_frags(2, &alloc::vec![9u8; 1024]).is_err());
        handle.set_fail_writes(false);

        let mut buf = alloc::vec![0u8; 1024];
        bd.read_frags(2, &mut buf).unwrap();
        assert_eq!(buf[0], 7);
    }
}
