//! 块分配
//!
//! 分配不选择磁盘位置：新块得到 [`UNWRITTEN`] 占位指针和一个清零的脏缓冲区，
//! 段写入时才换成真实地址。占位指针与脏缓冲区总是成对存在。

use crate::block::BlockDevice;
use crate::consts::*;
use crate::error::{Error, ErrorKind, Result};
use crate::fs::{Lfs, LfsHal};
use crate::inode::Inode;
use crate::types::Lbn;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::Ordering;

impl<D: BlockDevice, H: LfsHal> Lfs<D, H> {
    /// 确保逻辑块 `lbn` 有一个至少 `size` 字节的脏缓冲区
    ///
    /// 缺失的间接块和数据块挂上占位指针；已有的块从磁盘载入；直接块中的尾部片段
    /// 需要变大时按片段扩展。新增的片段计入 `effnblks` 并从 `bfree` 扣除。
    ///
    /// # 参数
    ///
    /// * `ip` - inode（调用者持有 vnode 锁）
    /// * `lbn` - 数据块的逻辑块号
    /// * `size` - 需要的字节数；间接范围内的块总是整块
    /// * `held` - 调用者自己持有的预留片段，可用于这次分配
    ///
    /// # 错误
    ///
    /// - `ErrorKind::NoSpace` - 空闲片段不足
    /// - `ErrorKind::InvalidInput` - 逻辑块号超出范围
    pub(crate) fn balloc(&self, ip: &mut Inode, lbn: Lbn, size: u32, held: i64) -> Result<()> {
        if lbn < 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "balloc on indirect block number"));
        }
        let g = &self.geom;
        let bsize = g.bsize as usize;
        let direct = lbn < NDADDR as Lbn;
        let mut dev = self.dev.lock();

        // 第一遍：找出缺失的间接块并计算需要的片段数
        let path = self.mapper.getlbns(lbn)?;
        let mut missing: Vec<Lbn> = Vec::new();
        for step in path.iter().skip(1) {
            if self.mapper.bmap(&mut *dev, ip, step.lbn)? == LFS_UNUSED_DADDR {
                missing.push(step.lbn);
            }
        }
        let ptr = self.mapper.bmap(&mut *dev, ip, lbn)?;

        let osize = if ptr == LFS_UNUSED_DADDR {
            0
        } else if let Some(buf) = ip.dirty_block(lbn) {
            buf.len()
        } else if direct {
            ip.fragsize[lbn as usize] as usize
        } else {
            bsize
        };
        let nsize = if direct {
            osize.max(g.fragroundup(size as u64) as usize)
        } else {
            bsize
        };
        let need = missing.len() as i64 * g.blockfrags() + g.numfrags(nsize as u64) - g.numfrags(osize as u64);

        if need > 0 {
            let mut ifile = self.ifile.write();
            let others = self.reserved.load(Ordering::Acquire) - held;
            if ifile.cleaner.bfree - others < need {
                log::debug!(
                    "[RESERVE] ino {} lbn {} needs {} frags, bfree={} reserved={}",
                    ip.ino, lbn, need, ifile.cleaner.bfree, others
                );
                return Err(Error::new(ErrorKind::NoSpace, "no free fragments"));
            }
            ifile.cleaner.bfree -= need;
            ip.effnblks += need;
        }

        // 第二遍：自顶向下挂上占位指针
        for meta in missing {
            self.mapper.set_ptr(&mut *dev, ip, meta, UNWRITTEN)?;
            ip.dirty.insert(meta, vec![0u8; bsize]);
        }

        if ptr == LFS_UNUSED_DADDR {
            self.mapper.set_ptr(&mut *dev, ip, lbn, UNWRITTEN)?;
            ip.dirty.insert(lbn, vec![0u8; nsize]);
        } else {
            if !ip.has_dirty(lbn) {
                let mut buf = vec![0u8; osize];
                dev.read_frags(ptr, &mut buf)?;
                ip.dirty.insert(lbn, buf);
            }
            if let Some(buf) = ip.dirty.get_mut(&lbn) {
                if buf.len() < nsize {
                    log::trace!("[RESERVE] ino {} lbn {} extends {} -> {}", ip.ino, lbn, buf.len(), nsize);
                    buf.resize(nsize, 0);
                }
            }
        }
        ip.flags |= crate::inode::InodeFlags::MODIFIED;
        Ok(())
    }
}
