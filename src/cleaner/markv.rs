//! markv：校验描述符并把仍然活跃的块重写到日志尾部

use super::{BlockInfo, MarkOutcome, MarkvStatus};
use crate::balloc::SegDeltas;
use crate::block::BlockDevice;
use crate::consts::*;
use crate::error::{Error, ErrorKind, ErrorSlot, Result};
use crate::fs::{Lfs, LfsHal, Vnode};
use crate::inode::InodeFlags;
use crate::segment::{LogState, SegGuard, SegmFlags};
use crate::types::Ino;
use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;

/// markv 的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkvReport {
    /// 整体状态
    pub status: MarkvStatus,
    /// 与输入描述符一一对应的处理结果
    pub outcomes: Vec<MarkOutcome>,
}

impl MarkvReport {
    /// 某种结果的数量
    pub fn count(&self, outcome: MarkOutcome) -> usize {
        self.outcomes.iter().filter(|&&o| o == outcome).count()
    }
}

/// 一次 markv 的暂存状态
struct Batch {
    touched: BTreeMap<Ino, Vnode>,
    staged: usize,
    deltas: SegDeltas,
    errors: ErrorSlot,
}

impl<D: BlockDevice, H: LfsHal> Lfs<D, H> {
    /// 校验描述符，把仍然活跃的块暂存为脏缓冲区并写入日志
    ///
    /// 每个描述符的地址和大小都在段锁下重新计算，与描述符不符时不碰这个块，
    /// 结果为 [`MarkOutcome::Stale`]。匹配的数据块使用描述符携带的内容；
    /// 间接块总是从磁盘读取当前内容。暂存的块超过 `markv_flush_blocks`
    /// 时中途写出一次，最后做一次检查点，让搬移和相关元数据一起持久化。
    ///
    /// # 返回
    ///
    /// 有过期描述符时状态为 [`MarkvStatus::RetryStale`]
    ///
    /// # 错误
    ///
    /// - `ErrorKind::InvalidInput` - 描述符过多或 inode 号无效（此时不修改任何状态）
    /// - `ErrorKind::Io` - 写入失败；其余描述符仍被处理完
    pub fn markv(&self, blocks: &[BlockInfo]) -> Result<MarkvReport> {
        let (report, errors) = self.markv_collect(blocks)?;
        errors.finish(report)
    }

    /// 同 [`markv`](Self::markv)，但处理过程中的 I/O 错误与结果一起返回
    ///
    /// 外层错误只有参数校验失败，此时没有处理任何描述符。
    pub(crate) fn markv_collect(&self, blocks: &[BlockInfo]) -> Result<(MarkvReport, ErrorSlot)> {
        if blocks.len() > LFS_MARKV_MAXBLKCNT {
            return Err(Error::new(ErrorKind::InvalidInput, "too many block descriptors"));
        }
        if blocks
            .iter()
            .any(|bi| bi.inode == LFS_UNUSED_INUM || bi.inode >= self.geom.ninodes)
        {
            return Err(Error::new(ErrorKind::InvalidInput, "bad inode number in descriptor"));
        }

        let mut seg = self.seglock.lock(SegmFlags::CLEAN | SegmFlags::CKP | SegmFlags::SYNC);
        let mut batch = Batch {
            touched: BTreeMap::new(),
            staged: 0,
            deltas: SegDeltas::new(),
            errors: ErrorSlot::new(),
        };

        let mut outcomes = Vec::with_capacity(blocks.len());
        for bi in blocks {
            let outcome = self.mark_one(&seg, bi, &mut batch);
            log::trace!("[MARKV] ino {} lbn {} daddr {:#x}: {:?}", bi.inode, bi.lbn, bi.daddr, outcome);
            outcomes.push(outcome);
            if batch.staged > self.config.markv_flush_blocks {
                self.flush_batch(&mut seg, &mut batch);
            }
        }
        self.flush_batch(&mut seg, &mut batch);
        batch.deltas.finalize(&seg, &mut self.ifile.write());
        batch.errors.record(self.checkpoint(&mut seg));

        let report = MarkvReport {
            status: if outcomes.contains(&MarkOutcome::Stale) {
                MarkvStatus::RetryStale
            } else {
                MarkvStatus::Ok
            },
            outcomes,
        };
        log::info!(
            "[MARKV] {} descriptors: {} rewritten, {} stale, {} dead, {} error",
            blocks.len(),
            report.count(MarkOutcome::Rewritten),
            report.count(MarkOutcome::Stale),
            report.count(MarkOutcome::Dead),
            report.count(MarkOutcome::Error)
        );
        Ok((report, batch.errors))
    }

    /// 写出已暂存的 inode
    fn flush_batch(&self, seg: &mut SegGuard<'_, LogState>, batch: &mut Batch) {
        for (ino, vp) in core::mem::take(&mut batch.touched) {
            match vp.try_lock() {
                Some(mut ip) => {
                    batch.errors.record(self.write_vnode(seg, &mut ip, &mut batch.deltas));
                }
                None => log::debug!("[MARKV] ino {} busy, left for the next checkpoint", ino),
            }
        }
        batch.errors.record(self.flush_partial(seg));
        batch.staged = 0;
    }

    fn mark_one(&self, seg: &SegGuard<'_, LogState>, bi: &BlockInfo, batch: &mut Batch) -> MarkOutcome {
        let g = &self.geom;
        if bi.inode == LFS_IFILE_INUM {
            // ifile 镜像由结尾的检查点整体重写
            let live = (0..g.image_blocks()).contains(&bi.lbn)
                && bi.daddr == seg.idaddr + bi.lbn * g.blockfrags();
            return if live { MarkOutcome::Rewritten } else { MarkOutcome::Dead };
        }

        let ent = match self.ifile.read().ientry(bi.inode) {
            Ok(ent) => ent,
            Err(_) => return MarkOutcome::Error,
        };
        if ent.daddr == LFS_UNUSED_DADDR || ent.version != bi.version {
            return MarkOutcome::Dead;
        }
        let vp = match self.vget(bi.inode) {
            Ok(vp) => vp,
            Err(e) if e.kind() == ErrorKind::NotFound => return MarkOutcome::Dead,
            Err(e) => {
                batch.errors.note(e);
                return MarkOutcome::Error;
            }
        };
        let Some(mut ip) = vp.try_lock() else {
            return MarkOutcome::Stale;
        };
        if ip.flags.contains(InodeFlags::DELETED) {
            return MarkOutcome::Dead;
        }

        if bi.lbn == LFS_UNUSED_LBN {
            if ent.daddr != bi.daddr {
                return MarkOutcome::Stale;
            }
            ip.flags |= InodeFlags::CLEANING | InodeFlags::MODIFIED;
        } else {
            if ip.has_dirty(bi.lbn) {
                return MarkOutcome::Stale;
            }
            let mut dev = self.dev.lock();
            let cur = match self.mapper.bmap(&mut *dev, &ip, bi.lbn) {
                Ok(d) => d,
                Err(e) => {
                    batch.errors.note(e);
                    return MarkOutcome::Error;
                }
            };
            if cur != bi.daddr || cur <= 0 {
                return MarkOutcome::Stale;
            }
            let size = if (0..NDADDR as i64).contains(&bi.lbn) {
                ip.fragsize[bi.lbn as usize]
            } else {
                g.bsize
            };
            if bi.size != size {
                return MarkOutcome::Stale;
            }

            let buf = if bi.lbn >= 0 {
                if bi.data.len() < size as usize {
                    log::warn!(
                        "[MARKV] ino {} lbn {}: {} bytes supplied, {} expected",
                        bi.inode, bi.lbn, bi.data.len(), size
                    );
                    return MarkOutcome::Error;
                }
                bi.data[..size as usize].to_vec()
            } else {
                let mut buf = vec![0u8; size as usize];
                if let Err(e) = dev.read_frags(cur, &mut buf) {
                    batch.errors.note(e);
                    return MarkOutcome::Error;
                }
                buf
            };
            ip.dirty.insert(bi.lbn, buf);
            ip.flags |= InodeFlags::MODIFIED;
        }

        drop(ip);
        batch.touched.insert(bi.inode, vp);
        batch.staged += 1;
        MarkOutcome::Rewritten
    }
}
