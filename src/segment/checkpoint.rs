//! 检查点
//!
//! 检查点是唯一的持久化边界：挂载总是回到最近一次写出的 superblock 所描述的状态。
//! 一次检查点依次完成：
//!
//! 1. 写出所有脏 inode（vnode 锁用 `try_lock`，忙的跳过）
//! 2. 刷写未完成的部分段
//! 3. 把 ifile 镜像作为一个部分段写入日志
//! 4. 写 superblock（两个副本交替）

use super::{LogState, Partial, SegGuard};
use crate::balloc::SegDeltas;
use crate::block::BlockDevice;
use crate::consts::*;
use crate::error::{ErrorSlot, Result};
use crate::fs::{Lfs, LfsHal};
use crate::superblock::Superblock;
use crate::types::FInfo;
use core::sync::atomic::Ordering;

impl<D: BlockDevice, H: LfsHal> Lfs<D, H> {
    /// 写出所有脏 inode 并落账
    fn segwrite_vnodes(&self, seg: &mut SegGuard<'_, LogState>, errors: &mut ErrorSlot) {
        let mut deltas = SegDeltas::new();
        for vp in self.vnode_list() {
            let Some(mut ip) = vp.try_lock() else {
                log::debug!("[CKPT] vnode busy, left for its owner");
                continue;
            };
            if ip.needs_write() {
                errors.record(self.write_vnode(seg, &mut ip, &mut deltas));
            }
        }
        deltas.finalize(seg, &mut self.ifile.write());
    }

    /// 做一次检查点
    ///
    /// # 返回
    ///
    /// 新写入的 superblock
    ///
    /// # 错误
    ///
    /// - `ErrorKind::Io` - 段写入失败；此时不写 superblock，磁盘上仍是上一个检查点
    /// - `ErrorKind::NoSpace` - 镜像放不进当前段且没有干净段
    pub(crate) fn checkpoint(&self, seg: &mut SegGuard<'_, LogState>) -> Result<Superblock> {
        let g = self.geom;
        let mut errors = ErrorSlot::new();

        self.segwrite_vnodes(seg, &mut errors);
        errors.record(self.flush_partial(seg));
        if errors.is_err() {
            log::warn!("[CKPT] skipped: segment writes failed");
        }
        errors.finish(())?;

        if seg.offset + g.sumfrags() + g.image_frags() > g.seg_end(seg.curseg) {
            self.newseg(seg)?;
        }

        let start = seg.offset;
        let idaddr = start + g.sumfrags();
        let mut p = Partial::new(start);
        p.finfos = (0..g.image_blocks())
            .map(|lbn| FInfo {
                ino: LFS_IFILE_INUM,
                lbn,
                version: 0,
                size: g.bsize,
            })
            .collect();

        // 镜像记录的是包含自身写入在内的记账，所以先记账再编码
        {
            let mut ifile = self.ifile.write();
            self.account_partial(seg, &mut ifile, &p, g.image_frags())?;
            let mut deltas = SegDeltas::new();
            deltas.free(&g, seg.idaddr, g.image_blocks() as u64 * g.bsize as u64);
            deltas.finalize(seg, &mut ifile);
            ifile.clear_active_except(seg.curseg);
            p.data = ifile.encode_image(&g);
        }
        seg.idaddr = idaddr;
        self.idaddr.store(idaddr, Ordering::Release);

        let out = self.seal_partial(seg, &p);
        let mut dev = self.dev.lock();
        dev.write_frags(start, &out)?;

        seg.serial += 1;
        let sb = Superblock {
            geom: g,
            serial: seg.serial,
            tstamp: Self::now_secs(),
            idaddr,
            curseg: seg.curseg,
            offset: seg.offset,
            fsid: self.fsid,
            create: seg.create,
            seg_create: seg.seg_create,
            psserial: seg.psserial,
        };
        sb.write_copy(&mut *dev, sb.copy_index())?;
        dev.flush()?;
        drop(dev);

        seg.cleaned.clear();
        seg.segs_since_ckp = 0;
        log::info!(
            "[CKPT] serial {} image at {:#x} curseg {} offset {:#x}",
            sb.serial, idaddr, sb.curseg, sb.offset
        );
        self.wakeup();
        Ok(sb)
    }

    /// 写满的段数达到配置阈值时做检查点
    pub(crate) fn maybe_checkpoint(&self, seg: &mut SegGuard<'_, LogState>) -> Result<()> {
        let every = self.config.ckp_segments;
        if every > 0 && seg.segs_since_ckp >= every {
            log::debug!("[CKPT] {} segments since last checkpoint", seg.segs_since_ckp);
            self.checkpoint(seg)?;
        }
        Ok(())
    }
}
