//! 系统调用入口
//!
//! 清理器通过文件系统标识选择目标。每个入口先检查调用者的能力位，
//! 再解析文件系统标识，最后才接触文件系统状态。

use super::markv::MarkvReport;
use super::segwait::segwait_any;
use super::{MarkOutcome, MarkvStatus, SegCleanOutcome, SegWaitOutcome, WireAbi};
use crate::block::BlockDevice;
use crate::consts::UNASSIGNED;
use crate::error::{Error, ErrorKind, Result};
use crate::fs::{Lfs, LfsHal};
use crate::types::FsId;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use bitflags::bitflags;
use core::time::Duration;

bitflags! {
    /// 清理器操作能力
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CleanerCaps: u32 {
        /// 允许 bmapv
        const BMAPV = 0x01;
        /// 允许 markv
        const MARKV = 0x02;
        /// 允许 segclean
        const SEGCLEAN = 0x04;
        /// 允许 segwait
        const SEGWAIT = 0x08;
    }
}

/// 调用者凭据
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    /// 用户标识
    pub uid: u32,
    /// 能力位
    pub caps: CleanerCaps,
}

impl Credentials {
    /// 拥有全部能力的超级用户
    pub const fn root() -> Self {
        Self {
            uid: 0,
            caps: CleanerCaps::all(),
        }
    }

    /// 没有任何能力的普通用户
    pub const fn user(uid: u32) -> Self {
        Self {
            uid,
            caps: CleanerCaps::empty(),
        }
    }

    /// 附加能力
    pub const fn with_caps(self, caps: CleanerCaps) -> Self {
        Self {
            uid: self.uid,
            caps: self.caps.union(caps),
        }
    }

    fn check(&self, cap: CleanerCaps) -> Result<()> {
        if self.caps.contains(cap) {
            Ok(())
        } else {
            log::debug!("[CLEANER] uid {} lacks {:?}", self.uid, cap);
            Err(Error::new(ErrorKind::PermissionDenied, "missing cleaner capability"))
        }
    }
}

/// 已挂载文件系统表
pub struct MountTable<D: BlockDevice, H: LfsHal> {
    mounts: spin::RwLock<BTreeMap<FsId, Arc<Lfs<D, H>>>>,
}

impl<D: BlockDevice, H: LfsHal> Default for MountTable<D, H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: BlockDevice, H: LfsHal> MountTable<D, H> {
    /// 创建空表
    pub fn new() -> Self {
        Self {
            mounts: spin::RwLock::new(BTreeMap::new()),
        }
    }

    /// 登记一个已挂载的文件系统
    ///
    /// # 错误
    ///
    /// - `ErrorKind::AlreadyExists` - 同一标识已登记
    pub fn mount(&self, fs: Lfs<D, H>) -> Result<Arc<Lfs<D, H>>> {
        let fsid = fs.fsid();
        let mut mounts = self.mounts.write();
        if mounts.contains_key(&fsid) {
            return Err(Error::new(ErrorKind::AlreadyExists, "file system already mounted"));
        }
        let fs = Arc::new(fs);
        mounts.insert(fsid, fs.clone());
        log::info!("[MOUNT] registered fsid={:#x}", fsid.0);
        Ok(fs)
    }

    /// 按标识查找
    pub fn get(&self, fsid: FsId) -> Option<Arc<Lfs<D, H>>> {
        self.mounts.read().get(&fsid).cloned()
    }

    /// 已登记的文件系统标识
    pub fn fsids(&self) -> Vec<FsId> {
        self.mounts.read().keys().copied().collect()
    }

    /// 卸载：标记正在卸载、唤醒等待者，最后一个引用释放后写最终检查点并取回设备
    ///
    /// # 错误
    ///
    /// - `ErrorKind::NotFound` - 标识未登记
    /// - `ErrorKind::Busy` - 仍有调用者持有该文件系统；它保持登记并处于卸载状态，
    ///   新的 segwait 会被拒绝，可以稍后重试
    pub fn unmount(&self, fsid: FsId) -> Result<D> {
        let mut mounts = self.mounts.write();
        let fs = mounts
            .remove(&fsid)
            .ok_or(Error::new(ErrorKind::NotFound, "no such file system"))?;
        fs.begin_shutdown();
        match Arc::try_unwrap(fs) {
            Ok(fs) => {
                drop(mounts);
                fs.unmount()
            }
            Err(fs) => {
                log::warn!("[MOUNT] fsid={:#x} still referenced", fsid.0);
                mounts.insert(fsid, fs);
                Err(Error::new(ErrorKind::Busy, "file system still in use"))
            }
        }
    }

    fn lookup(&self, fsid: FsId) -> Result<Arc<Lfs<D, H>>> {
        self.get(fsid)
            .ok_or(Error::new(ErrorKind::NotFound, "no such file system"))
    }

    /// bmapv：解析线格式描述符并原地写回
    ///
    /// # 错误
    ///
    /// - `ErrorKind::PermissionDenied` - 缺少 `BMAPV` 能力
    /// - `ErrorKind::NotFound` - 文件系统标识未登记
    /// - `ErrorKind::InvalidInput` - 缓冲区不是整数个记录，或描述符无效
    pub fn sys_bmapv(&self, cred: &Credentials, fsid: FsId, abi: WireAbi, records: &mut [u8]) -> Result<()> {
        cred.check(CleanerCaps::BMAPV)?;
        let fs = self.lookup(fsid)?;
        let mut blocks = abi.decode_all(records)?;
        fs.bmapv(&mut blocks)?;
        abi.encode_all(&blocks, records)
    }

    /// markv：解析线格式描述符，经 `copyin` 取得数据块内容
    ///
    /// `copyin(bp, size)` 从调用者地址空间复制块内容，只对数据块调用。
    /// 没有被重写的描述符地址写回为 [`UNASSIGNED`]。
    ///
    /// # 错误
    ///
    /// - `ErrorKind::PermissionDenied` - 缺少 `MARKV` 能力
    /// - `ErrorKind::NotFound` - 文件系统标识未登记
    /// - `copyin` 返回的错误（此时没有任何描述符被处理）
    /// - `ErrorKind::Io` - 写入失败；描述符仍已原地更新
    pub fn sys_markv<F>(
        &self,
        cred: &Credentials,
        fsid: FsId,
        abi: WireAbi,
        records: &mut [u8],
        mut copyin: F,
    ) -> Result<MarkvStatus>
    where
        F: FnMut(u64, usize) -> Result<Vec<u8>>,
    {
        cred.check(CleanerCaps::MARKV)?;
        let fs = self.lookup(fsid)?;
        let mut blocks = abi.decode_all(records)?;
        for bi in blocks.iter_mut().filter(|bi| bi.lbn >= 0) {
            bi.data = copyin(bi.bp, bi.size as usize)?;
        }

        // 处理中途的 I/O 错误也先写回每个描述符的结果
        let (MarkvReport { status, outcomes }, errors) = fs.markv_collect(&blocks)?;
        for (bi, outcome) in blocks.iter_mut().zip(&outcomes) {
            if *outcome != MarkOutcome::Rewritten {
                bi.daddr = UNASSIGNED;
            }
        }
        abi.encode_all(&blocks, records)?;
        errors.finish(status)
    }

    /// segclean
    ///
    /// # 错误
    ///
    /// - `ErrorKind::PermissionDenied` - 缺少 `SEGCLEAN` 能力
    /// - `ErrorKind::NotFound` - 文件系统标识未登记
    pub fn sys_segclean(&self, cred: &Credentials, fsid: FsId, sn: u32) -> Result<SegCleanOutcome> {
        cred.check(CleanerCaps::SEGCLEAN)?;
        self.lookup(fsid)?.segclean(sn)
    }

    /// segwait；`fsid` 为 `None` 时等待任意文件系统
    ///
    /// # 错误
    ///
    /// - `ErrorKind::PermissionDenied` - 缺少 `SEGWAIT` 能力
    /// - `ErrorKind::NotFound` - 文件系统标识未登记
    /// - `ErrorKind::Shutdown` - 文件系统正在卸载
    pub fn sys_segwait(&self, cred: &Credentials, fsid: Option<FsId>, timeout: Duration) -> Result<SegWaitOutcome> {
        cred.check(CleanerCaps::SEGWAIT)?;
        match fsid {
            Some(fsid) => self.lookup(fsid)?.segwait(timeout),
            None => segwait_any::<H>(timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleaner::BlockInfo;
    use crate::consts::*;
    use crate::testutil::*;
    use alloc::vec;

    #[test]
    fn test_capability_checked_before_lookup() {
        let table: MountTable<MemDevice, TestHal> = MountTable::new();
        let nobody = Credentials::user(100);
        // 即使标识不存在，也先报告权限错误
        assert_eq!(
            table.sys_segclean(&nobody, FsId(1), 0).unwrap_err().kind(),
            ErrorKind::PermissionDenied
        );
        assert_eq!(
            table.sys_segclean(&Credentials::root(), FsId(1), 0).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_each_entry_has_its_own_capability() {
        let table = MountTable::new();
        let (fs, _dev) = new_fs(&small_opts());
        let fsid = table.mount(fs).unwrap().fsid();
        let waiter = Credentials::user(5).with_caps(CleanerCaps::SEGWAIT);

        let mut records = vec![0u8; 48];
        assert_eq!(
            table.sys_bmapv(&waiter, fsid, WireAbi::Current, &mut records).unwrap_err().kind(),
            ErrorKind::PermissionDenied
        );
        assert_eq!(
            table.sys_segwait(&waiter, Some(fsid), Duration::from_millis(5)).unwrap(),
            SegWaitOutcome::TimedOut
        );
    }

    #[test]
    fn test_wire_bmapv_then_markv() {
        let table = MountTable::new();
        let (fs, _dev) = new_fs(&small_opts());
        let fs = table.mount(fs).unwrap();
        let fsid = fs.fsid();
        let ino = fs.create(S_IFREG | 0o644).unwrap();
        fs.write(ino, 0, &pattern(1024, 6)).unwrap();
        fs.sync().unwrap();

        let sn = fs.geometry().dtosn(fs.bmap(ino, 0).unwrap());
        let scanned: Vec<_> = fs
            .scan_segment(sn)
            .unwrap()
            .into_iter()
            .filter(|b| b.inode == ino)
            .collect();
        let abi = WireAbi::Legacy15;
        let mut records = vec![0u8; scanned.len() * abi.record_size()];
        abi.encode_all(&scanned, &mut records).unwrap();

        let root = Credentials::root();
        table.sys_bmapv(&root, fsid, abi, &mut records).unwrap();
        let resolved = abi.decode_all(&records).unwrap();
        assert!(resolved.iter().zip(&scanned).all(|(r, s)| r.daddr == s.daddr));

        let content = scanned[0].data.clone();
        let status = table
            .sys_markv(&root, fsid, abi, &mut records, |_, size| Ok(content[..size].to_vec()))
            .unwrap();
        assert_eq!(status, MarkvStatus::Ok);
        // 块已搬到新位置
        assert_ne!(fs.bmap(ino, 0).unwrap(), scanned[0].daddr);
        let mut buf = vec![0u8; 1024];
        fs.read(ino, 0, &mut buf).unwrap();
        assert_eq!(buf, pattern(1024, 6));
    }

    #[test]
    fn test_markv_write_failure_still_updates_records() {
        let table = MountTable::new();
        let (fs, dev) = new_fs(&small_opts());
        let fs = table.mount(fs).unwrap();
        let fsid = fs.fsid();
        let ino = fs.create(S_IFREG | 0o644).unwrap();
        fs.write(ino, 0, &pattern(2048, 3)).unwrap();
        fs.sync().unwrap();

        let sn = fs.geometry().dtosn(fs.bmap(ino, 0).unwrap());
        let mut blocks: Vec<BlockInfo> = fs
            .scan_segment(sn)
            .unwrap()
            .into_iter()
            .filter(|b| b.inode == ino && b.lbn >= 0)
            .collect();
        assert_eq!(blocks.len(), 2);
        let live = blocks[0].daddr;
        // 第二个描述符的地址已经过期
        blocks[1].daddr += 1;
        for (i, bi) in blocks.iter_mut().enumerate() {
            bi.bp = i as u64;
        }
        let abi = WireAbi::Current;
        let mut records = vec![0u8; blocks.len() * abi.record_size()];
        abi.encode_all(&blocks, &mut records).unwrap();

        dev.set_fail_writes(true);
        let err = table
            .sys_markv(&Credentials::root(), fsid, abi, &mut records, |bp, size| {
                Ok(blocks[bp as usize].data[..size].to_vec())
            })
            .unwrap_err();
        dev.set_fail_writes(false);
        assert_eq!(err.kind(), ErrorKind::Io);

        let written = abi.decode_all(&records).unwrap();
        assert_eq!(written[0].daddr, live);
        assert_eq!(written[1].daddr, UNASSIGNED);
    }

    #[test]
    fn test_unmount_busy_while_referenced() {
        let table = MountTable::new();
        let (fs, _dev) = new_fs(&small_opts());
        let held = table.mount(fs).unwrap();
        let fsid = held.fsid();
        assert_eq!(table.unmount(fsid).unwrap_err().kind(), ErrorKind::Busy);
        assert!(held.is_shutting_down());
        assert_eq!(
            table.sys_segwait(&Credentials::root(), Some(fsid), Duration::ZERO).unwrap_err().kind(),
            ErrorKind::Shutdown
        );
        drop(held);
        table.unmount(fsid).unwrap();
        assert!(table.fsids().is_empty());
        assert_eq!(table.unmount(fsid).unwrap_err().kind(), ErrorKind::NotFound);
    }
}
