//! bmapv：批量解析块描述符的当前地址

use super::BlockInfo;
use crate::block::BlockDevice;
use crate::consts::*;
use crate::error::{Error, ErrorKind, Result};
use crate::fs::{Lfs, LfsHal};
use core::sync::atomic::Ordering;

impl<D: BlockDevice, H: LfsHal> Lfs<D, H> {
    /// 为每个描述符填入块的当前磁盘地址和大小
    ///
    /// 不持有段锁，可能与写入者竞争；结果只作为 markv 的输入，markv 会重新校验。
    /// inode 已删除、版本不符或无法读取时，该项的地址置为 [`UNASSIGNED`]，
    /// 不影响其余描述符。
    ///
    /// # 参数
    ///
    /// * `blocks` - 描述符，原地更新 `daddr` 与 `size`
    ///
    /// # 错误
    ///
    /// - `ErrorKind::InvalidInput` - 描述符过多或 inode 号无效（此时不修改任何描述符）
    pub fn bmapv(&self, blocks: &mut [BlockInfo]) -> Result<()> {
        if blocks.len() > LFS_MARKV_MAXBLKCNT {
            return Err(Error::new(ErrorKind::InvalidInput, "too many block descriptors"));
        }
        if blocks
            .iter()
            .any(|bi| bi.inode == LFS_UNUSED_INUM || bi.inode >= self.geom.ninodes)
        {
            return Err(Error::new(ErrorKind::InvalidInput, "bad inode number in descriptor"));
        }

        let mut unresolved = 0usize;
        for bi in blocks.iter_mut() {
            let resolved = self.bmapv_one(bi);
            if resolved.is_none() {
                unresolved += 1;
            }
            bi.daddr = resolved.unwrap_or(UNASSIGNED);
        }
        log::debug!("[BMAPV] {} descriptors, {} unresolved", blocks.len(), unresolved);
        Ok(())
    }

    fn bmapv_one(&self, bi: &mut BlockInfo) -> Option<crate::types::Daddr> {
        let g = &self.geom;
        if bi.inode == LFS_IFILE_INUM {
            bi.size = g.bsize;
            if !(0..g.image_blocks()).contains(&bi.lbn) {
                return None;
            }
            let idaddr = self.idaddr.load(Ordering::Acquire);
            return Some(idaddr + bi.lbn * g.blockfrags());
        }

        let ent = self.ifile.read().ientry(bi.inode).ok()?;
        if ent.daddr == LFS_UNUSED_DADDR || ent.version != bi.version {
            return None;
        }
        if bi.lbn == LFS_UNUSED_LBN {
            bi.size = g.fsize;
            return Some(ent.daddr);
        }

        let vp = match self.vget(bi.inode) {
            Ok(vp) => vp,
            Err(e) => {
                log::trace!("[BMAPV] ino {} unavailable: {}", bi.inode, e);
                return None;
            }
        };
        let ip = vp.lock();
        let daddr = self.mapper.bmap(&mut *self.dev.lock(), &ip, bi.lbn).ok()?;
        bi.size = if bi.lbn >= 0 {
            g.blksize(ip.size, bi.lbn)
        } else {
            g.bsize
        };
        Some(daddr)
    }
}
