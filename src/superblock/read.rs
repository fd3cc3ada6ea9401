//! Superblock 结构与读取

use super::Geometry;
use crate::block::BlockDevice;
use crate::consts::*;
use crate::crc::lfs_cksum;
use crate::error::{Error, ErrorKind, Result};
use crate::types::{Daddr, FsId};
use alloc::vec;
use byteorder::{ByteOrder, LittleEndian};

/// superblock 编码后的字节数
///
/// 磁盘布局：
///
/// ```text
/// 0:   magic      u32
/// 4:   version    u32
/// 8:   fsize      u32
/// 12:  bsize      u32
/// 16:  ssize      u32
/// 20:  nseg       u32
/// 24:  ninodes    u32
/// 28:  sumsize    u32
/// 32:  sboffs[0]  i32
/// 36:  sboffs[1]  i32
/// 40:  serial     u64  检查点序号
/// 48:  tstamp     u64  检查点时间
/// 56:  idaddr     i32  ifile 镜像地址
/// 60:  curseg     u32  当前段
/// 64:  offset     i32  当前段中下一个可写地址
/// 68:  reserved
/// 72:  fsid       u64
/// 80:  create     u64  段创建计数器
/// 88:  seg_create u64  当前段的创建戳
/// 96:  psserial   u64  部分段序号
/// 104: reserved
/// 108: cksum      u32  对 0..108 的校验和
/// ```
pub const SB_DISK_SIZE: usize = 112;

/// 内存中的 superblock
///
/// 几何参数之外，记录最近一次检查点时的日志位置。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Superblock {
    /// 几何参数
    pub geom: Geometry,
    /// 检查点序号（单调递增，决定写哪个副本）
    pub serial: u64,
    /// 检查点时间（秒）
    pub tstamp: u64,
    /// ifile 镜像地址
    pub idaddr: Daddr,
    /// 当前段
    pub curseg: u32,
    /// 当前段中下一个可写地址
    pub offset: Daddr,
    /// 文件系统标识
    pub fsid: FsId,
    /// 段创建计数器
    pub create: u64,
    /// 当前段的创建戳
    pub seg_create: u64,
    /// 部分段序号
    pub psserial: u64,
}

impl Superblock {
    /// 从字节解码并验证
    ///
    /// # 错误
    ///
    /// - `ErrorKind::Corrupted` - 魔数、版本、校验和或几何参数无效
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < SB_DISK_SIZE {
            return Err(Error::new(ErrorKind::InvalidInput, "superblock buffer too small"));
        }
        if LittleEndian::read_u32(&buf[0..4]) != LFS_MAGIC {
            return Err(Error::new(ErrorKind::Corrupted, "bad superblock magic"));
        }
        if LittleEndian::read_u32(&buf[4..8]) != LFS_VERSION {
            return Err(Error::new(ErrorKind::Unsupported, "unsupported format version"));
        }
        let cksum = LittleEndian::read_u32(&buf[108..112]);
        if cksum != lfs_cksum(&buf[0..108]) {
            return Err(Error::new(ErrorKind::Corrupted, "superblock checksum mismatch"));
        }

        let geom = Geometry::new(
            LittleEndian::read_u32(&buf[8..12]),
            LittleEndian::read_u32(&buf[12..16]),
            LittleEndian::read_u32(&buf[16..20]),
            LittleEndian::read_u32(&buf[20..24]),
            LittleEndian::read_u32(&buf[24..28]),
        )
        .map_err(|_| Error::new(ErrorKind::Corrupted, "superblock geometry invalid"))?;

        if geom.sumsize != LittleEndian::read_u32(&buf[28..32])
            || geom.sboffs[0] != LittleEndian::read_i32(&buf[32..36]) as Daddr
            || geom.sboffs[1] != LittleEndian::read_i32(&buf[36..40]) as Daddr
        {
            return Err(Error::new(ErrorKind::Corrupted, "superblock layout mismatch"));
        }

        let sb = Self {
            geom,
            serial: LittleEndian::read_u64(&buf[40..48]),
            tstamp: LittleEndian::read_u64(&buf[48..56]),
            idaddr: LittleEndian::read_i32(&buf[56..60]) as Daddr,
            curseg: LittleEndian::read_u32(&buf[60..64]),
            offset: LittleEndian::read_i32(&buf[64..68]) as Daddr,
            fsid: FsId(LittleEndian::read_u64(&buf[72..80])),
            create: LittleEndian::read_u64(&buf[80..88]),
            seg_create: LittleEndian::read_u64(&buf[88..96]),
            psserial: LittleEndian::read_u64(&buf[96..104]),
        };

        if sb.curseg >= geom.nseg
            || geom.dtosn(sb.offset) != sb.curseg && sb.offset != geom.seg_end(sb.curseg)
        {
            return Err(Error::new(ErrorKind::Corrupted, "superblock log position invalid"));
        }
        if sb.idaddr <= 0 || sb.idaddr + geom.image_frags() > geom.segtod(geom.nseg) {
            return Err(Error::new(ErrorKind::Corrupted, "superblock ifile address invalid"));
        }
        Ok(sb)
    }
}

/// 从设备上的一个字节偏移读取 superblock 副本
fn read_copy<D: BlockDevice>(device: &mut D, byte_off: u64) -> Result<Superblock> {
    let ss = device.sector_size() as u64;
    if ss == 0 || byte_off % ss != 0 {
        return Err(Error::new(ErrorKind::InvalidInput, "superblock not sector aligned"));
    }
    let len = (SB_DISK_SIZE as u64).div_ceil(ss) * ss;
    let mut buf = vec![0u8; len as usize];
    device.read_sectors(byte_off / ss, &mut buf)?;
    Superblock::decode(&buf)
}

/// 探测设备上的 superblock
///
/// 先读段 0 中的第一个副本，再根据其中的几何参数读第二个副本，
/// 返回两者中检查点序号较大的有效副本。
///
/// # 错误
///
/// - `ErrorKind::Corrupted` - 第一个副本无效
/// - `ErrorKind::Io` - 设备读取失败
pub fn probe_superblock<D: BlockDevice>(device: &mut D) -> Result<Superblock> {
    let first = read_copy(device, LFS_LABELPAD)?;
    let second_off = first.geom.fsbtob(first.geom.sboffs[1]);

    match read_copy(device, second_off) {
        Ok(second) if second.geom == first.geom && second.serial > first.serial => {
            log::debug!("[MOUNT] using superblock copy 1 (serial {})", second.serial);
            Ok(second)
        }
        Ok(_) => {
            log::debug!("[MOUNT] using superblock copy 0 (serial {})", first.serial);
            Ok(first)
        }
        Err(e) => {
            log::warn!("[MOUNT] superblock copy 1 unreadable ({}), using copy 0", e);
            Ok(first)
        }
    }
}
