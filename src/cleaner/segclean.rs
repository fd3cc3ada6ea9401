//! segclean：把没有活跃字节的段归还为干净段

use super::SegCleanOutcome;
use crate::block::BlockDevice;
use crate::error::{Error, ErrorKind, Result};
use crate::fs::{Lfs, LfsHal};
use crate::segment::SegmFlags;
use crate::types::SegUseFlags;

impl<D: BlockDevice, H: LfsHal> Lfs<D, H> {
    /// 回收段 `sn`
    ///
    /// 段的可用片段回到 `avail`，它的摘要与 inode 片段回到 `bfree`。
    /// 回收的段在下一次检查点之前不会被再次写入：磁盘上的上一个检查点可能
    /// 还引用着其中的块。
    ///
    /// # 返回
    ///
    /// - [`SegCleanOutcome::Busy`] - 段是当前段、带有 ACTIVE 标志或仍有活跃字节
    /// - [`SegCleanOutcome::AlreadyClean`] - 段本来就干净，计数不变
    ///
    /// # 错误
    ///
    /// - `ErrorKind::InvalidInput` - 段号越界
    pub fn segclean(&self, sn: u32) -> Result<SegCleanOutcome> {
        if sn >= self.geom.nseg {
            return Err(Error::new(ErrorKind::InvalidInput, "segment number out of range"));
        }
        let mut seg = self.seglock.lock(SegmFlags::PROT);
        let mut ifile = self.ifile.write();
        let mut su = ifile.seguse(sn)?;

        if sn == seg.curseg || su.flags.contains(SegUseFlags::ACTIVE) {
            log::debug!("[SEGCLEAN] segment {} is active", sn);
            return Ok(SegCleanOutcome::Busy);
        }
        if !su.flags.contains(SegUseFlags::DIRTY) {
            return Ok(SegCleanOutcome::AlreadyClean);
        }
        if su.nbytes > 0 {
            log::debug!("[SEGCLEAN] segment {} still has {} live bytes", sn, su.nbytes);
            return Ok(SegCleanOutcome::Busy);
        }

        let g = &self.geom;
        let meta = su.nsums as i64 * g.sumfrags() + su.ninos as i64;
        ifile.cleaner.avail += g.seg_usable(sn);
        ifile.cleaner.bfree += meta;
        ifile.cleaner.dmeta -= meta;
        ifile.cleaner.clean += 1;
        ifile.cleaner.dirty -= 1;

        su.flags -= SegUseFlags::DIRTY | SegUseFlags::ERROR;
        su.nsums = 0;
        su.ninos = 0;
        ifile.write_seguse(sn, su)?;
        drop(ifile);

        seg.cleaned.insert(sn);
        log::info!(
            "[SEGCLEAN] segment {} cleaned: +{} avail, +{} bfree",
            sn,
            g.seg_usable(sn),
            meta
        );
        self.wakeup();
        Ok(SegCleanOutcome::Cleaned)
    }
}
