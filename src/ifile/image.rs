//! Ifile 检查点镜像的序列化
//!
//! ```text
//! 0:  magic    u32
//! 4:  nseg     u32
//! 8:  ninodes  u32
//! 12: cksum    u32  对头部之后全部有效字节的校验和
//! 16: CleanerInfo
//!     SegUse[nseg]
//!     IfileEntry[ninodes]
//! ```
//!
//! 镜像按块对齐，尾部填零。

use super::Ifile;
use crate::crc::lfs_cksum;
use crate::error::{Error, ErrorKind, Result};
use crate::superblock::{Geometry, IMAGE_HDR_SIZE};
use crate::types::{CleanerInfo, IfileEntry, SegUse};
use alloc::vec;
use alloc::vec::Vec;
use byteorder::{ByteOrder, LittleEndian};

const IFILE_IMAGE_MAGIC: u32 = 0x1f11e;

impl Ifile {
    /// 编码为检查点镜像（`image_blocks` 个整块）
    pub fn encode_image(&self, geom: &Geometry) -> Vec<u8> {
        let mut buf = vec![0u8; geom.image_blocks() as usize * geom.bsize as usize];
        LittleEndian::write_u32(&mut buf[0..4], IFILE_IMAGE_MAGIC);
        LittleEndian::write_u32(&mut buf[4..8], self.nseg());
        LittleEndian::write_u32(&mut buf[8..12], self.ninodes());

        let mut off = IMAGE_HDR_SIZE;
        self.cleaner.encode(&mut buf[off..off + CleanerInfo::DISK_SIZE]);
        off += CleanerInfo::DISK_SIZE;
        for su in &self.segs {
            su.encode(&mut buf[off..off + SegUse::DISK_SIZE]);
            off += SegUse::DISK_SIZE;
        }
        for ent in &self.inodes {
            ent.encode(&mut buf[off..off + IfileEntry::DISK_SIZE]);
            off += IfileEntry::DISK_SIZE;
        }

        let cksum = lfs_cksum(&buf[IMAGE_HDR_SIZE..off]);
        LittleEndian::write_u32(&mut buf[12..16], cksum);
        buf
    }

    /// 从检查点镜像解码
    ///
    /// # 错误
    ///
    /// - `ErrorKind::Corrupted` - 魔数、尺寸或校验和不匹配
    pub fn decode_image(geom: &Geometry, buf: &[u8]) -> Result<Self> {
        let len = geom.image_bytes();
        if buf.len() < len {
            return Err(Error::new(ErrorKind::InvalidInput, "ifile image buffer too small"));
        }
        if LittleEndian::read_u32(&buf[0..4]) != IFILE_IMAGE_MAGIC {
            return Err(Error::new(ErrorKind::Corrupted, "bad ifile image magic"));
        }
        if LittleEndian::read_u32(&buf[4..8]) != geom.nseg
            || LittleEndian::read_u32(&buf[8..12]) != geom.ninodes
        {
            return Err(Error::new(ErrorKind::Corrupted, "ifile image size mismatch"));
        }
        if LittleEndian::read_u32(&buf[12..16]) != lfs_cksum(&buf[IMAGE_HDR_SIZE..len]) {
            return Err(Error::new(ErrorKind::Corrupted, "ifile image checksum mismatch"));
        }

        let mut off = IMAGE_HDR_SIZE;
        let cleaner = CleanerInfo::decode(&buf[off..off + CleanerInfo::DISK_SIZE]);
        off += CleanerInfo::DISK_SIZE;

        let segs = buf[off..off + geom.nseg as usize * SegUse::DISK_SIZE]
            .chunks_exact(SegUse::DISK_SIZE)
            .map(SegUse::decode)
            .collect();
        off += geom.nseg as usize * SegUse::DISK_SIZE;

        let inodes = buf[off..len]
            .chunks_exact(IfileEntry::DISK_SIZE)
            .map(IfileEntry::decode)
            .collect();

        Ok(Self { cleaner, segs, inodes })
    }
}
