//! 块描述符的线格式
//!
//! 内部只使用 [`BlockInfo`]；两种线格式只在系统调用边界编解码。
//!
//! 当前格式（48 字节）：
//!
//! ```text
//! 0:  inode     u32
//! 4:  lbn       i32
//! 8:  daddr     i64
//! 16: segcreate u64
//! 24: version   u32
//! 28: size      u32
//! 32: bp        u64
//! 40: reserved  u64
//! ```
//!
//! 旧格式（28 字节，32 位字段）：
//!
//! ```text
//! 0:  inode     u32
//! 4:  lbn       i32
//! 8:  daddr     i32
//! 12: segcreate u32
//! 16: version   u32
//! 20: bp        u32
//! 24: size      u32
//! ```

use super::BlockInfo;
use crate::error::{Error, ErrorKind, Result};
use alloc::vec::Vec;
use byteorder::{ByteOrder, LittleEndian};

/// 描述符线格式版本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireAbi {
    /// 64 位字段的当前格式
    #[default]
    Current,
    /// 32 位字段的旧格式
    Legacy15,
}

impl WireAbi {
    /// 单个记录的字节数
    pub const fn record_size(self) -> usize {
        match self {
            WireAbi::Current => 48,
            WireAbi::Legacy15 => 28,
        }
    }

    /// 解码一个记录
    pub fn decode(self, buf: &[u8]) -> BlockInfo {
        match self {
            WireAbi::Current => BlockInfo {
                inode: LittleEndian::read_u32(&buf[0..4]),
                lbn: LittleEndian::read_i32(&buf[4..8]) as i64,
                daddr: LittleEndian::read_i64(&buf[8..16]),
                segcreate: LittleEndian::read_u64(&buf[16..24]),
                version: LittleEndian::read_u32(&buf[24..28]),
                size: LittleEndian::read_u32(&buf[28..32]),
                bp: LittleEndian::read_u64(&buf[32..40]),
                data: Vec::new(),
            },
            WireAbi::Legacy15 => BlockInfo {
                inode: LittleEndian::read_u32(&buf[0..4]),
                lbn: LittleEndian::read_i32(&buf[4..8]) as i64,
                daddr: LittleEndian::read_i32(&buf[8..12]) as i64,
                segcreate: LittleEndian::read_u32(&buf[12..16]) as u64,
                version: LittleEndian::read_u32(&buf[16..20]),
                bp: LittleEndian::read_u32(&buf[20..24]) as u64,
                size: LittleEndian::read_u32(&buf[24..28]),
                data: Vec::new(),
            },
        }
    }

    /// 编码一个记录
    ///
    /// # 错误
    ///
    /// - `ErrorKind::InvalidInput` - 字段超出旧格式的 32 位范围
    pub fn encode(self, bi: &BlockInfo, buf: &mut [u8]) -> Result<()> {
        let lbn = i32::try_from(bi.lbn)
            .map_err(|_| Error::new(ErrorKind::InvalidInput, "logical block number out of range"))?;
        match self {
            WireAbi::Current => {
                LittleEndian::write_u32(&mut buf[0..4], bi.inode);
                LittleEndian::write_i32(&mut buf[4..8], lbn);
                LittleEndian::write_i64(&mut buf[8..16], bi.daddr);
                LittleEndian::write_u64(&mut buf[16..24], bi.segcreate);
                LittleEndian::write_u32(&mut buf[24..28], bi.version);
                LittleEndian::write_u32(&mut buf[28..32], bi.size);
                LittleEndian::write_u64(&mut buf[32..40], bi.bp);
                LittleEndian::write_u64(&mut buf[40..48], 0);
            }
            WireAbi::Legacy15 => {
                let narrow = |v: i64| {
                    i32::try_from(v).map_err(|_| Error::new(ErrorKind::InvalidInput, "field exceeds legacy record"))
                };
                let wide = |v: u64| {
                    u32::try_from(v).map_err(|_| Error::new(ErrorKind::InvalidInput, "field exceeds legacy record"))
                };
                LittleEndian::write_u32(&mut buf[0..4], bi.inode);
                LittleEndian::write_i32(&mut buf[4..8], lbn);
                LittleEndian::write_i32(&mut buf[8..12], narrow(bi.daddr)?);
                LittleEndian::write_u32(&mut buf[12..16], wide(bi.segcreate)?);
                LittleEndian::write_u32(&mut buf[16..20], bi.version);
                LittleEndian::write_u32(&mut buf[20..24], wide(bi.bp)?);
                LittleEndian::write_u32(&mut buf[24..28], bi.size);
            }
        }
        Ok(())
    }

    /// 解码一组连续的记录
    ///
    /// # 错误
    ///
    /// - `ErrorKind::InvalidInput` - 长度不是记录大小的整数倍
    pub fn decode_all(self, buf: &[u8]) -> Result<Vec<BlockInfo>> {
        let size = self.record_size();
        if buf.len() % size != 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "descriptor buffer has partial record"));
        }
        Ok(buf.chunks_exact(size).map(|rec| self.decode(rec)).collect())
    }

    /// 把描述符写回连续的记录
    pub fn encode_all(self, blocks: &[BlockInfo], buf: &mut [u8]) -> Result<()> {
        let size = self.record_size();
        if buf.len() != blocks.len() * size {
            return Err(Error::new(ErrorKind::InvalidInput, "descriptor buffer size mismatch"));
        }
        for (bi, rec) in blocks.iter().zip(buf.chunks_exact_mut(size)) {
            self.encode(bi, rec)?;
        }
        Ok(())
    }
}
