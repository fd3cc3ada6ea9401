//! 块映射器实现
//!
//! 将文件的逻辑块号映射到磁盘地址，支持直接块和三级间接块。
//!
//! 间接块本身也有逻辑块号（负数）：一级间接块为 `-NDADDR`，
//! 二级间接块为 `-(NDADDR + NINDIR + 1)`，三级间接块为
//! `-(NDADDR + NINDIR + NINDIR² + 2)`；子块号按 `父块号 + 1 - 下标 * 子树块数` 排列。

use crate::block::{BlockDev, BlockDevice};
use crate::consts::*;
use crate::error::{Error, ErrorKind, Result};
use crate::inode::Inode;
use crate::superblock::Geometry;
use crate::types::{Daddr, Lbn};
use alloc::vec;
use alloc::vec::Vec;
use byteorder::{ByteOrder, LittleEndian};

/// 间接路径中的一步
///
/// 第一项的 `off` 是 inode 中 `ib[]` 的下标，之后每项是
/// 间接块 `lbn` 中的指针下标。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Indir {
    /// 间接块的逻辑块号
    pub lbn: Lbn,
    /// 指针下标
    pub off: usize,
}

/// 读取间接块中的第 `i` 个指针
#[inline]
pub fn read_ptr(buf: &[u8], i: usize) -> Daddr {
    let off = i * LFS_DADDR_SIZE;
    LittleEndian::read_i32(&buf[off..off + LFS_DADDR_SIZE]) as Daddr
}

/// 写入间接块中的第 `i` 个指针
#[inline]
pub fn write_ptr(buf: &mut [u8], i: usize, daddr: Daddr) {
    let off = i * LFS_DADDR_SIZE;
    LittleEndian::write_i32(&mut buf[off..off + LFS_DADDR_SIZE], daddr as i32);
}

/// 块映射器
///
/// 只依赖几何参数，可以自由复制。
#[derive(Debug, Clone, Copy)]
pub struct BlockMapper {
    /// 每个间接块中的指针数
    nindir: i64,
    /// 块大小
    bsize: usize,
}

impl BlockMapper {
    /// 创建块映射器
    pub fn new(geom: &Geometry) -> Self {
        Self {
            nindir: geom.nindir as i64,
            bsize: geom.bsize as usize,
        }
    }

    /// 每个间接块中的指针数
    #[inline]
    pub fn nindir(&self) -> i64 {
        self.nindir
    }

    /// 某一层顶层间接块的逻辑块号
    ///
    /// # 参数
    ///
    /// * `level` - `SINGLE`、`DOUBLE` 或 `TRIPLE`
    pub fn indir_lbn(&self, level: usize) -> Lbn {
        let n = self.nindir;
        match level {
            SINGLE => -(NDADDR as Lbn),
            DOUBLE => -(NDADDR as Lbn) - n - 1,
            _ => -(NDADDR as Lbn) - n - 1 - n * n - 1,
        }
    }

    /// 计算到达逻辑块 `lbn` 需要经过的间接块
    ///
    /// 直接块返回空路径。数据块的路径长度为 `ib 下标 + 2`；
    /// 间接块的路径到它的父块为止（顶层间接块只有 inode 中的那一项）。
    ///
    /// # 错误
    ///
    /// - `ErrorKind::InvalidInput` - 超出三级间接的范围，或负数不是间接块号
    pub fn getlbns(&self, lbn: Lbn) -> Result<Vec<Indir>> {
        let n = self.nindir;
        let realbn = lbn;
        let mut bn = lbn.abs();
        if bn < NDADDR as Lbn {
            if realbn < 0 {
                return Err(Error::new(ErrorKind::InvalidInput, "not an indirect block number"));
            }
            return Ok(Vec::new());
        }

        // 确定间接层数
        let niaddr = NIADDR as i64;
        let mut blockcnt: i64 = 1;
        let mut i = niaddr;
        bn -= NDADDR as i64;
        loop {
            if i == 0 {
                return Err(Error::new(ErrorKind::InvalidInput, "logical block beyond triple indirect"));
            }
            blockcnt *= n;
            if bn < blockcnt {
                break;
            }
            i -= 1;
            bn -= blockcnt;
        }

        let mut metalbn = -(realbn.abs() - bn + niaddr - i);
        let mut path = vec![Indir {
            lbn: metalbn,
            off: (niaddr - i) as usize,
        }];

        let mut found = metalbn == realbn;
        while i <= niaddr && !found {
            blockcnt /= n;
            let off = (bn / blockcnt) % n;
            path.push(Indir {
                lbn: metalbn,
                off: off as usize,
            });
            metalbn -= -1 + off * blockcnt;
            found = metalbn == realbn;
            i += 1;
        }

        if realbn < 0 && !found {
            return Err(Error::new(ErrorKind::InvalidInput, "not an indirect block number"));
        }
        Ok(path)
    }

    /// 间接块的层级：1 表示直接指向数据块
    pub fn meta_level(&self, lbn: Lbn) -> Result<usize> {
        if lbn >= 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "not an indirect block number"));
        }
        let path = self.getlbns(lbn)?;
        Ok(path[0].off + 2 - path.len())
    }

    /// 读取间接块快照
    ///
    /// 脏缓冲区优先；否则从磁盘读取。占位指针没有对应缓冲区说明内存状态已损坏。
    pub fn read_meta<D: BlockDevice>(
        &self,
        bdev: &mut BlockDev<D>,
        ip: &Inode,
        lbn: Lbn,
        daddr: Daddr,
    ) -> Result<Vec<u8>> {
        if let Some(buf) = ip.dirty_block(lbn) {
            return Ok(buf.to_vec());
        }
        if daddr <= 0 {
            log::error!("[INDIR] ino {} lbn {} has pointer {:#x} but no buffer", ip.ino, lbn, daddr);
            return Err(Error::new(ErrorKind::Corrupted, "indirect block pointer without buffer"));
        }
        let mut buf = vec![0u8; self.bsize];
        bdev.read_frags(daddr, &mut buf)?;
        Ok(buf)
    }

    /// 将逻辑块号映射到磁盘地址
    ///
    /// 返回原始指针值：0 表示空洞，[`UNWRITTEN`] 表示占位块。
    /// 对间接块号返回间接块自身的地址。
    ///
    /// # 参数
    ///
    /// * `bdev` - 块设备引用
    /// * `ip` - inode
    /// * `lbn` - 逻辑块号
    pub fn bmap<D: BlockDevice>(&self, bdev: &mut BlockDev<D>, ip: &Inode, lbn: Lbn) -> Result<Daddr> {
        if (0..NDADDR as Lbn).contains(&lbn) {
            return Ok(ip.db[lbn as usize]);
        }
        let path = self.getlbns(lbn)?;
        let mut daddr = ip.ib[path[0].off];
        for step in &path[1..] {
            if daddr == 0 {
                return Ok(0);
            }
            let buf = self.read_meta(bdev, ip, step.lbn, daddr)?;
            daddr = read_ptr(&buf, step.off);
        }
        Ok(daddr)
    }

    /// 把间接块放入脏缓冲区（已在其中则不变）
    ///
    /// 修改指针前调用：被修改的间接块会在下一次段写入时整体重写。
    pub fn load_meta_dirty<D: BlockDevice>(
        &self,
        bdev: &mut BlockDev<D>,
        ip: &mut Inode,
        lbn: Lbn,
    ) -> Result<()> {
        if ip.has_dirty(lbn) {
            return Ok(());
        }
        let daddr = self.bmap(bdev, ip, lbn)?;
        let buf = self.read_meta(bdev, ip, lbn, daddr)?;
        ip.dirty.insert(lbn, buf);
        Ok(())
    }

    /// 设置逻辑块 `lbn` 的指针，返回旧值
    ///
    /// 父间接块不在脏缓冲区时先从磁盘载入。
    pub fn set_ptr<D: BlockDevice>(
        &self,
        bdev: &mut BlockDev<D>,
        ip: &mut Inode,
        lbn: Lbn,
        daddr: Daddr,
    ) -> Result<Daddr> {
        if (0..NDADDR as Lbn).contains(&lbn) {
            return Ok(core::mem::replace(&mut ip.db[lbn as usize], daddr));
        }
        let path = self.getlbns(lbn)?;
        if path.len() == 1 {
            return Ok(core::mem::replace(&mut ip.ib[path[0].off], daddr));
        }
        let Some(parent) = path.last().copied() else {
            return Err(Error::new(ErrorKind::InvalidInput, "empty indirect path"));
        };
        self.load_meta_dirty(bdev, ip, parent.lbn)?;
        let buf = ip
            .dirty
            .get_mut(&parent.lbn)
            .ok_or(Error::new(ErrorKind::InvalidState, "parent indirect block not loaded"))?;
        let old = read_ptr(buf, parent.off);
        write_ptr(buf, parent.off, daddr);
        Ok(old)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper() -> BlockMapper {
        // 每个间接块 256 个指针
        BlockMapper::new(&Geometry::new(512, 1024, 32 * 1024, 32, 64).unwrap())
    }

    #[test]
    fn test_direct_blocks_have_no_path() {
        let m = mapper();
        assert!(m.getlbns(0).unwrap().is_empty());
        assert!(m.getlbns(11).unwrap().is_empty());
        assert!(m.getlbns(-5).is_err());
    }

    #[test]
    fn test_single_indirect_path() {
        let m = mapper();
        let p = m.getlbns(12).unwrap();
        assert_eq!(p, vec![Indir { lbn: -12, off: 0 }, Indir { lbn: -12, off: 0 }]);
        let p = m.getlbns(12 + 255).unwrap();
        assert_eq!(p[1], Indir { lbn: -12, off: 255 });
        // 一级间接块本身只需要 inode 中的指针
        assert_eq!(m.getlbns(-12).unwrap(), vec![Indir { lbn: -12, off: 0 }]);
        assert_eq!(m.meta_level(-12).unwrap(), 1);
    }

    #[test]
    fn test_double_indirect_path() {
        let m = mapper();
        let n = 256;
        let root = m.indir_lbn(DOUBLE);
        assert_eq!(root, -(12 + n + 1));

        // 二级间接范围内第 n + 3 个数据块：第 1 个子块，第 3 个指针
        let p = m.getlbns(12 + n + n + 3).unwrap();
        assert_eq!(p.len(), 3);
        assert_eq!(p[0], Indir { lbn: root, off: 1 });
        assert_eq!(p[1], Indir { lbn: root, off: 1 });
        let child = root + 1 - n;
        assert_eq!(p[2], Indir { lbn: child, off: 3 });

        assert_eq!(m.meta_level(root).unwrap(), 2);
        assert_eq!(m.meta_level(child).unwrap(), 1);
        let cp = m.getlbns(child).unwrap();
        assert_eq!(cp, vec![Indir { lbn: root, off: 1 }, Indir { lbn: root, off: 1 }]);
    }

    #[test]
    fn test_triple_indirect_levels() {
        let m = mapper();
        let n = 256;
        let root = m.indir_lbn(TRIPLE);
        assert_eq!(root, -(12 + n + n * n + 2));
        assert_eq!(m.meta_level(root).unwrap(), 3);

        let first = 12 + n + n * n;
        let p = m.getlbns(first).unwrap();
        assert_eq!(p.len(), 4);
        assert_eq!(p[0], Indir { lbn: root, off: 2 });
        assert_eq!(m.meta_level(p[2].lbn).unwrap(), 2);
        assert_eq!(m.meta_level(p[3].lbn).unwrap(), 1);

        assert!(m.getlbns(first + n * n * n).is_err());
    }

    #[test]
    fn test_bogus_negative_rejected() {
        let m = mapper();
        // -13 落在一级间接块的范围里，但不是任何间接块的块号
        assert!(m.getlbns(-13).is_err());
    }

    #[test]
    fn test_ptr_helpers() {
        let mut buf = vec![0u8; 1024];
        write_ptr(&mut buf, 7, 0x1234);
        write_ptr(&mut buf, 8, UNWRITTEN);
        assert_eq!(read_ptr(&buf, 7), 0x1234);
        assert_eq!(read_ptr(&buf, 8), UNWRITTEN);
    }
}
