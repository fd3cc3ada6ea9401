//! Superblock 编码与写入

use super::{Superblock, SB_DISK_SIZE};
use crate::block::{BlockDev, BlockDevice};
use crate::consts::*;
use crate::crc::lfs_cksum;
use crate::error::Result;
use alloc::vec;
use alloc::vec::Vec;
use byteorder::{ByteOrder, LittleEndian};

impl Superblock {
    /// 编码为一个片段大小的缓冲区
    pub fn encode(&self) -> Vec<u8> {
        let g = &self.geom;
        let mut buf = vec![0u8; g.fsize as usize];
        LittleEndian::write_u32(&mut buf[0..4], LFS_MAGIC);
        LittleEndian::write_u32(&mut buf[4..8], LFS_VERSION);
        LittleEndian::write_u32(&mut buf[8..12], g.fsize);
        LittleEndian::write_u32(&mut buf[12..16], g.bsize);
        LittleEndian::write_u32(&mut buf[16..20], g.ssize);
        LittleEndian::write_u32(&mut buf[20..24], g.nseg);
        LittleEndian::write_u32(&mut buf[24..28], g.ninodes);
        LittleEndian::write_u32(&mut buf[28..32], g.sumsize);
        LittleEndian::write_i32(&mut buf[32..36], g.sboffs[0] as i32);
        LittleEndian::write_i32(&mut buf[36..40], g.sboffs[1] as i32);
        LittleEndian::write_u64(&mut buf[40..48], self.serial);
        LittleEndian::write_u64(&mut buf[48..56], self.tstamp);
        LittleEndian::write_i32(&mut buf[56..60], self.idaddr as i32);
        LittleEndian::write_u32(&mut buf[60..64], self.curseg);
        LittleEndian::write_i32(&mut buf[64..68], self.offset as i32);
        LittleEndian::write_u64(&mut buf[72..80], self.fsid.0);
        LittleEndian::write_u64(&mut buf[80..88], self.create);
        LittleEndian::write_u64(&mut buf[88..96], self.seg_create);
        LittleEndian::write_u64(&mut buf[96..104], self.psserial);
        let cksum = lfs_cksum(&buf[0..108]);
        LittleEndian::write_u32(&mut buf[108..SB_DISK_SIZE], cksum);
        buf
    }

    /// 本次检查点应写入的副本编号
    #[inline]
    pub fn copy_index(&self) -> usize {
        (self.serial % LFS_MAXNUMSB as u64) as usize
    }

    /// 写入一个 superblock 副本
    ///
    /// # 参数
    ///
    /// * `bdev` - 块设备
    /// * `which` - 副本编号（0 或 1）
    pub fn write_copy<D: BlockDevice>(&self, bdev: &mut BlockDev<D>, which: usize) -> Result<()> {
        let daddr = self.geom.sboffs[which % LFS_MAXNUMSB];
        log::debug!(
            "[CKPT] superblock copy {} at {:#x}: serial={} idaddr={:#x} curseg={} offset={:#x}",
            which, daddr, self.serial, self.idaddr, self.curseg, self.offset
        );
        bdev.write_frags(daddr, &self.encode())
    }
}
