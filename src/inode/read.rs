//! 磁盘 inode 解码
//!
//! 磁盘布局（128 字节）：
//!
//! ```text
//! 0:   mode     u16
//! 2:   nlink    u16
//! 4:   inumber  u32
//! 8:   size     u64
//! 16:  blocks   u32  已写入日志的片段数
//! 20:  version  u32
//! 24:  mtime    u64
//! 32:  db[12]   i32
//! 80:  ib[3]    i32
//! 92:  reserved
//! 124: cksum    u32  对 0..124 的校验和
//! ```

use super::{Inode, InodeFlags};
use crate::consts::*;
use crate::crc::lfs_cksum;
use crate::error::{Error, ErrorKind, Result};
use crate::superblock::Geometry;
use crate::types::{Daddr, Ino, Lbn};
use alloc::collections::BTreeMap;
use byteorder::{ByteOrder, LittleEndian};

/// 校验和在磁盘 inode 中的偏移
pub const DINODE_CKSUM_OFF: usize = LFS_DINODE_SIZE - 4;

impl Inode {
    /// 从磁盘 inode 解码
    ///
    /// 直接块的 `fragsize` 由文件大小推出：写回日志时总是按当时的块大小写入。
    ///
    /// # 参数
    ///
    /// * `buf` - 至少 128 字节
    /// * `geom` - 几何参数
    /// * `expect` - 期望的 inode 号
    ///
    /// # 错误
    ///
    /// - `ErrorKind::Corrupted` - 校验和不匹配或 inode 号不符
    pub fn decode(buf: &[u8], geom: &Geometry, expect: Ino) -> Result<Self> {
        if buf.len() < LFS_DINODE_SIZE {
            return Err(Error::new(ErrorKind::InvalidInput, "dinode buffer too small"));
        }
        let cksum = LittleEndian::read_u32(&buf[DINODE_CKSUM_OFF..LFS_DINODE_SIZE]);
        if cksum != lfs_cksum(&buf[..DINODE_CKSUM_OFF]) {
            return Err(Error::new(ErrorKind::Corrupted, "dinode checksum mismatch"));
        }
        let ino = LittleEndian::read_u32(&buf[4..8]);
        if ino != expect {
            return Err(Error::new(ErrorKind::Corrupted, "dinode number mismatch"));
        }

        let size = LittleEndian::read_u64(&buf[8..16]);
        let blocks = LittleEndian::read_u32(&buf[16..20]) as i64;

        let mut db = [0 as Daddr; NDADDR];
        for (i, d) in db.iter_mut().enumerate() {
            let off = 32 + i * LFS_DADDR_SIZE;
            *d = LittleEndian::read_i32(&buf[off..off + 4]) as Daddr;
        }
        let mut ib = [0 as Daddr; NIADDR];
        for (i, d) in ib.iter_mut().enumerate() {
            let off = 80 + i * LFS_DADDR_SIZE;
            *d = LittleEndian::read_i32(&buf[off..off + 4]) as Daddr;
        }
        if db.iter().chain(ib.iter()).any(|&d| d < 0) {
            return Err(Error::new(ErrorKind::Corrupted, "placeholder pointer in dinode"));
        }

        let mut fragsize = [0u32; NDADDR];
        for (i, fs) in fragsize.iter_mut().enumerate() {
            if db[i] != 0 {
                *fs = geom.blksize(size, i as Lbn);
            }
        }

        Ok(Self {
            ino,
            version: LittleEndian::read_u32(&buf[20..24]),
            mode: LittleEndian::read_u16(&buf[0..2]),
            nlink: LittleEndian::read_u16(&buf[2..4]),
            size,
            blocks,
            effnblks: blocks,
            mtime: LittleEndian::read_u64(&buf[24..32]),
            db,
            ib,
            fragsize,
            flags: InodeFlags::empty(),
            dirty: BTreeMap::new(),
        })
    }
}
