//! 磁盘 inode 编码

use super::{Inode, DINODE_CKSUM_OFF};
use crate::consts::*;
use crate::crc::lfs_cksum;
use alloc::vec;
use alloc::vec::Vec;
use byteorder::{ByteOrder, LittleEndian};

impl Inode {
    /// 编码为一个片段大小的磁盘 inode
    ///
    /// 调用者保证所有指针都已写入日志（没有占位指针）。
    pub fn encode(&self, fsize: usize) -> Vec<u8> {
        let mut buf = vec![0u8; fsize.max(LFS_DINODE_SIZE)];
        LittleEndian::write_u16(&mut buf[0..2], self.mode);
        LittleEndian::write_u16(&mut buf[2..4], self.nlink);
        LittleEndian::write_u32(&mut buf[4..8], self.ino);
        LittleEndian::write_u64(&mut buf[8..16], self.size);
        LittleEndian::write_u32(&mut buf[16..20], self.blocks as u32);
        LittleEndian::write_u32(&mut buf[20..24], self.version);
        LittleEndian::write_u64(&mut buf[24..32], self.mtime);
        for (i, &d) in self.db.iter().enumerate() {
            let off = 32 + i * LFS_DADDR_SIZE;
            LittleEndian::write_i32(&mut buf[off..off + 4], d as i32);
        }
        for (i, &d) in self.ib.iter().enumerate() {
            let off = 80 + i * LFS_DADDR_SIZE;
            LittleEndian::write_i32(&mut buf[off..off + 4], d as i32);
        }
        let cksum = lfs_cksum(&buf[..DINODE_CKSUM_OFF]);
        LittleEndian::write_u32(&mut buf[DINODE_CKSUM_OFF..LFS_DINODE_SIZE], cksum);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::superblock::Geometry;

    fn geom() -> Geometry {
        Geometry::new(512, 1024, 32 * 1024, 32, 64).unwrap()
    }

    #[test]
    fn test_dinode_encode_decode() {
        let g = geom();
        let mut ip = Inode::new(9, 4, S_IFREG | 0o600);
        ip.size = 1500;
        ip.blocks = 3;
        ip.db[0] = 100;
        ip.db[1] = 102;
        ip.ib[0] = 300;

        let buf = ip.encode(512);
        assert_eq!(buf.len(), 512);
        let back = Inode::decode(&buf, &g, 9).unwrap();
        assert_eq!(back.size, 1500);
        assert_eq!(back.blocks, 3);
        assert_eq!(back.effnblks, 3);
        assert_eq!(back.db[..2], [100, 102]);
        assert_eq!(back.ib[0], 300);
        assert_eq!(back.version, 4);
        // 末块是 476 字节的尾部，按片段取整
        assert_eq!(back.fragsize[0], 1024);
        assert_eq!(back.fragsize[1], 512);
        assert_eq!(back.fragsize[2], 0);
        assert!(back.flags.is_empty());
    }

    #[test]
    fn test_dinode_rejects_wrong_number_and_damage() {
        let g = geom();
        let ip = Inode::new(9, 0, S_IFREG);
        let mut buf = ip.encode(512);
        assert_eq!(Inode::decode(&buf, &g, 10).unwrap_err().kind(), ErrorKind::Corrupted);
        buf[9] ^= 0xff;
        assert_eq!(Inode::decode(&buf, &g, 9).unwrap_err().kind(), ErrorKind::Corrupted);
    }
}
