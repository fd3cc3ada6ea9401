//! 部分段写入

use super::{LogState, Partial, SegGuard};
use crate::balloc::SegDeltas;
use crate::block::BlockDevice;
use crate::consts::*;
use crate::crc::lfs_cksum;
use crate::error::{Error, ErrorKind, Result};
use crate::fs::{Lfs, LfsHal};
use crate::ifile::Ifile;
use crate::inode::{Inode, InodeFlags};
use crate::types::{Daddr, FInfo, Lbn, SegSummary, SegUseFlags};
use alloc::vec;
use alloc::vec::Vec;

impl<D: BlockDevice, H: LfsHal> Lfs<D, H> {
    /// 向当前部分段追加一个块，返回它的磁盘地址
    ///
    /// 当前部分段放不下时先刷写它；当前段放不下一个新部分段时切换到下一个段。
    /// `data` 的长度必须是片段大小的整数倍。
    pub(crate) fn append(
        &self,
        seg: &mut SegGuard<'_, LogState>,
        finfo: FInfo,
        data: &[u8],
    ) -> Result<Daddr> {
        if !seg.may_append() {
            return Err(Error::new(ErrorKind::InvalidState, "log append under protected segment lock"));
        }
        let g = &self.geom;
        let fsize = g.fsize as usize;
        if data.is_empty() || data.len() % fsize != 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "block is not a whole number of fragments"));
        }
        let nfrags = (data.len() / fsize) as i64;

        let full = match &seg.partial {
            Some(p) => {
                p.finfos.len() >= g.max_finfo()
                    || p.start + g.sumfrags() + (p.data.len() / fsize) as i64 + nfrags > g.seg_end(seg.curseg)
            }
            None => false,
        };
        if full {
            self.flush_partial(seg)?;
        }

        if seg.partial.is_none() {
            if seg.offset + g.sumfrags() + nfrags > g.seg_end(seg.curseg) {
                self.newseg(seg)?;
            }
            let start = seg.offset;
            seg.partial = Some(Partial::new(start));
        }

        let Some(p) = seg.partial.as_mut() else {
            return Err(Error::new(ErrorKind::InvalidState, "no partial segment"));
        };
        let daddr = p.start + g.sumfrags() + (p.data.len() / fsize) as i64;
        p.data.extend_from_slice(data);
        if finfo.lbn == LFS_UNUSED_LBN {
            p.ninos += 1;
        }
        p.finfos.push(finfo);
        log::trace!(
            "[SEGWRITE] ino {} lbn {} size {} -> {:#x}",
            finfo.ino, finfo.lbn, finfo.size, daddr
        );
        Ok(daddr)
    }

    /// 部分段的空间记账
    ///
    /// 块字节计入当前段的活跃字节；摘要与 inode 片段从 `bfree` 扣除并计入 `dmeta`；
    /// 写入的每个片段都从 `avail` 扣除。日志位置前移到部分段之后。
    pub(crate) fn account_partial(
        &self,
        seg: &mut SegGuard<'_, LogState>,
        ifile: &mut Ifile,
        p: &Partial,
        datafrags: i64,
    ) -> Result<()> {
        let g = &self.geom;
        let bytes: u64 = p.finfos.iter().map(|f| f.size as u64).sum();
        let now = Self::now_secs();

        let mut su = ifile.seguse(seg.curseg)?;
        su.nbytes += bytes as u32;
        su.nsums += 1;
        su.ninos += p.ninos;
        su.lastmod = now;
        su.olastmod = now as u32;
        su.flags |= SegUseFlags::DIRTY | SegUseFlags::ACTIVE;
        ifile.write_seguse(seg.curseg, su)?;

        let meta = g.sumfrags() + p.ninos as i64;
        ifile.cleaner.avail -= g.sumfrags() + datafrags;
        ifile.cleaner.bfree -= meta;
        ifile.cleaner.dmeta += meta;

        seg.psserial += 1;
        seg.offset = p.start + g.sumfrags() + datafrags;
        Ok(())
    }

    /// 组装摘要 + 数据
    pub(crate) fn seal_partial(&self, log: &LogState, p: &Partial) -> Vec<u8> {
        let g = &self.geom;
        let sumsize = g.sumsize as usize;
        let mut out = vec![0u8; sumsize + p.data.len()];
        let datafrags = (p.data.len() / g.fsize as usize) as i64;
        let ss = SegSummary {
            datasum: lfs_cksum(&p.data),
            nfinfo: p.finfos.len() as u16,
            ninos: p.ninos,
            create: log.seg_create,
            serial: log.psserial,
            next: p.start + g.sumfrags() + datafrags,
        };
        ss.encode(&mut out[..sumsize]);
        for (i, fi) in p.finfos.iter().enumerate() {
            let off = LFS_SUMMARY_HDR_SIZE + i * LFS_FINFO_SIZE;
            fi.encode(&mut out[off..off + LFS_FINFO_SIZE]);
        }
        SegSummary::seal(&mut out[..sumsize]);
        out[sumsize..].copy_from_slice(&p.data);
        out
    }

    /// 刷写正在组装的部分段
    ///
    /// 记账先于写入完成：写入失败时空间仍按已写计算，返回错误。
    pub(crate) fn flush_partial(&self, seg: &mut SegGuard<'_, LogState>) -> Result<()> {
        let Some(p) = seg.partial.take() else {
            return Ok(());
        };
        if p.finfos.is_empty() {
            return Ok(());
        }
        let datafrags = (p.data.len() / self.geom.fsize as usize) as i64;
        self.account_partial(seg, &mut self.ifile.write(), &p, datafrags)?;
        let out = self.seal_partial(seg, &p);

        log::debug!(
            "[SEGWRITE] partial at {:#x}: {} blocks, {} inodes, {} frags (seg {})",
            p.start,
            p.finfos.len(),
            p.ninos,
            datafrags + self.geom.sumfrags(),
            seg.curseg
        );
        self.dev.lock().write_frags(p.start, &out)
    }

    /// 切换到下一个干净段
    ///
    /// 旧段剩余的空间从 `avail` 扣除；新段标记为 `DIRTY | ACTIVE`。
    /// 自上次检查点以来被清理的段不参与选择。
    ///
    /// # 错误
    ///
    /// - `ErrorKind::NoSpace` - 没有可用的干净段
    pub(crate) fn newseg(&self, seg: &mut SegGuard<'_, LogState>) -> Result<()> {
        self.flush_partial(seg)?;
        let g = &self.geom;
        let old = seg.curseg;

        let mut ifile = self.ifile.write();
        let mut next = None;
        for k in 1..g.nseg {
            let sn = (old + k) % g.nseg;
            let su = ifile.seguse(sn)?;
            if su.flags.intersects(SegUseFlags::DIRTY | SegUseFlags::ACTIVE | SegUseFlags::INVAL)
                || seg.cleaned.contains(&sn)
            {
                continue;
            }
            next = Some((sn, su));
            break;
        }
        let Some((sn, mut su)) = next else {
            log::warn!(
                "[SEGWRITE] no clean segment (clean={} pending reuse={})",
                ifile.cleaner.clean,
                seg.cleaned.len()
            );
            return Err(Error::new(ErrorKind::NoSpace, "no clean segments"));
        };

        let leftover = g.seg_end(old) - seg.offset;
        ifile.cleaner.avail -= leftover;
        ifile.cleaner.clean -= 1;
        ifile.cleaner.dirty += 1;

        su.flags |= SegUseFlags::DIRTY | SegUseFlags::ACTIVE;
        su.nsums = 0;
        su.ninos = 0;
        su.lastmod = Self::now_secs();
        ifile.write_seguse(sn, su)?;
        drop(ifile);

        seg.curseg = sn;
        seg.offset = g.seg_data_start(sn);
        seg.create += 1;
        seg.seg_create = seg.create;
        seg.segs_since_ckp += 1;

        let dropped = self.dev.lock().invalidate_range(g.sntod(sn), g.fsbpseg as u64);
        log::debug!(
            "[SEGWRITE] segment {} -> {} (create {}, leftover {} frags, {} cached frags dropped)",
            old, sn, seg.seg_create, leftover, dropped
        );
        self.wakeup();
        Ok(())
    }

    /// 块写入新位置后更新指针与记账
    ///
    /// - 旧指针是空洞或占位：`blocks` 加上整块片段数
    /// - 旧指针是直接块的真实地址：按片段大小的变化调整 `blocks`
    /// - 旧指针是真实地址：旧位置的字节记为待落账减量
    pub(crate) fn update_single(
        &self,
        ip: &mut Inode,
        lbn: Lbn,
        ndaddr: Daddr,
        size: u32,
        deltas: &mut SegDeltas,
    ) -> Result<()> {
        let g = &self.geom;
        let bb = g.numfrags(size as u64);
        let old = self.mapper.set_ptr(&mut *self.dev.lock(), ip, lbn, ndaddr)?;
        let direct = (0..NDADDR as Lbn).contains(&lbn);

        if old == UNWRITTEN || old == LFS_UNUSED_DADDR {
            ip.blocks += bb;
        } else if direct {
            let obb = g.numfrags(ip.fragsize[lbn as usize] as u64);
            ip.blocks += bb - obb;
        }

        if old > 0 {
            let osize = if direct {
                ip.fragsize[lbn as usize] as u64
            } else {
                g.bsize as u64
            };
            deltas.free(g, old, osize);
        }
        if direct {
            ip.fragsize[lbn as usize] = size;
        }
        Ok(())
    }

    /// 写出一个块的脏缓冲区
    fn write_dirty_block(
        &self,
        seg: &mut SegGuard<'_, LogState>,
        ip: &mut Inode,
        lbn: Lbn,
        deltas: &mut SegDeltas,
    ) -> Result<()> {
        let Some(buf) = ip.dirty.remove(&lbn) else {
            return Ok(());
        };
        let size = buf.len() as u32;
        let finfo = FInfo {
            ino: ip.ino,
            lbn,
            version: ip.version,
            size,
        };
        match self.append(seg, finfo, &buf) {
            Ok(daddr) => self.update_single(ip, lbn, daddr, size, deltas),
            Err(e) => {
                ip.dirty.insert(lbn, buf);
                Err(e)
            }
        }
    }

    /// 把 inode 的全部脏内容写入日志
    ///
    /// 顺序：数据块（按逻辑块号）→ 一级、二级、三级间接块 → inode 本身。
    /// 每写出一个块都会修改它父块中的指针，所以父块总是在子块之后写出。
    /// 旧位置的失效字节记入 `deltas`，由调用者落账。
    pub(crate) fn write_vnode(
        &self,
        seg: &mut SegGuard<'_, LogState>,
        ip: &mut Inode,
        deltas: &mut SegDeltas,
    ) -> Result<()> {
        if !ip.needs_write() || ip.flags.contains(InodeFlags::DELETED) {
            return Ok(());
        }

        let data: Vec<Lbn> = ip.dirty.range(0..).map(|(&lbn, _)| lbn).collect();
        for lbn in data {
            self.write_dirty_block(seg, ip, lbn, deltas)?;
        }

        for level in 1..=NIADDR {
            let metas: Vec<Lbn> = ip
                .dirty
                .range(..0)
                .map(|(&lbn, _)| lbn)
                .filter(|&lbn| self.mapper.meta_level(lbn).ok() == Some(level))
                .collect();
            for lbn in metas {
                self.write_dirty_block(seg, ip, lbn, deltas)?;
            }
        }

        if !ip.dirty.is_empty() {
            log::error!("[SEGWRITE] ino {} has unwritable buffers {:?}", ip.ino, ip.dirty.keys());
            return Err(Error::new(ErrorKind::Corrupted, "dirty buffer with invalid block number"));
        }
        if ip.db.iter().chain(ip.ib.iter()).any(|&d| d < 0) {
            return Err(Error::new(ErrorKind::Corrupted, "placeholder pointer without buffer"));
        }

        self.write_inode(seg, ip, deltas)?;
        self.flush_partial(seg)
    }

    /// 把 inode 本身追加到日志并更新 ifile 中的地址
    fn write_inode(
        &self,
        seg: &mut SegGuard<'_, LogState>,
        ip: &mut Inode,
        deltas: &mut SegDeltas,
    ) -> Result<()> {
        let fsize = self.geom.fsize;
        let buf = ip.encode(fsize as usize);
        let finfo = FInfo {
            ino: ip.ino,
            lbn: LFS_UNUSED_LBN,
            version: ip.version,
            size: fsize,
        };
        let daddr = self.append(seg, finfo, &buf)?;
        let old = self.ifile.write().set_iaddr(ip.ino, daddr)?;
        deltas.free(&self.geom, old, fsize as u64);
        ip.flags -= InodeFlags::MODIFIED | InodeFlags::CLEANING;
        log::debug!("[SEGWRITE] ino {} written at {:#x} (was {:#x})", ip.ino, daddr, old);
        Ok(())
    }
}
