//! LFS 文件系统主结构

use super::types::{FileAttr, FsConfig, InodeType, LfsHal, MkfsOptions, StatFs};
use crate::balloc::SegDeltas;
use crate::block::{BlockDev, BlockDevice, IoStats};
use crate::consts::*;
use crate::error::{Error, ErrorKind, Result};
use crate::ifile::Ifile;
use crate::indirect::BlockMapper;
use crate::inode::Inode;
use crate::segment::{LogState, SegLock, SegmFlags};
use crate::superblock::{probe_superblock, Geometry, Superblock};
use crate::types::{Daddr, FsId, Ino, SegUseFlags};
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};

/// 内存 inode 句柄
pub type Vnode = Arc<spin::Mutex<Inode>>;

static FSID_SEQ: AtomicU64 = AtomicU64::new(1);

/// LFS 文件系统
///
/// 所有操作通过 `&self` 进行，内部状态由以下锁保护（按加锁顺序）：
///
/// 1. 每个 inode 的 vnode 锁
/// 2. 段锁（[`SegLock`]），保护日志位置和正在组装的部分段
/// 3. vnode 表
/// 4. ifile 读写锁
/// 5. 块设备
pub struct Lfs<D: BlockDevice, H: LfsHal> {
    pub(crate) geom: Geometry,
    pub(crate) mapper: BlockMapper,
    pub(crate) config: FsConfig,
    pub(crate) fsid: FsId,
    pub(crate) dev: spin::Mutex<BlockDev<D>>,
    pub(crate) ifile: spin::RwLock<Ifile>,
    pub(crate) seglock: SegLock<LogState>,
    pub(crate) vnodes: spin::Mutex<BTreeMap<Ino, Vnode>>,
    /// 已预留的片段数
    pub(crate) reserved: AtomicI64,
    /// 最近检查点的 ifile 镜像地址（bmapv 无锁读取）
    pub(crate) idaddr: AtomicI64,
    /// 段状态变化的代数，segwait 据此判断是否被唤醒
    pub(crate) wake_gen: AtomicU64,
    /// 正在 segwait 中等待的调用者数
    pub(crate) sleepers: AtomicU32,
    pub(crate) unmounting: AtomicBool,
    _hal: PhantomData<fn() -> H>,
}

/// 空间预留
///
/// 释放时自动归还。
#[must_use]
pub struct Reservation<'a> {
    reserved: &'a AtomicI64,
    frags: i64,
}

impl Reservation<'_> {
    /// 预留的片段数
    pub fn frags(&self) -> i64 {
        self.frags
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.reserved.fetch_sub(self.frags, Ordering::AcqRel);
    }
}

impl<D: BlockDevice, H: LfsHal> Lfs<D, H> {
    fn build(geom: Geometry, bdev: BlockDev<D>, ifile: Ifile, log: LogState, fsid: FsId, config: FsConfig) -> Self {
        let idaddr = log.idaddr;
        Self {
            geom,
            mapper: BlockMapper::new(&geom),
            config,
            fsid,
            dev: spin::Mutex::new(bdev),
            ifile: spin::RwLock::new(ifile),
            seglock: SegLock::new(log),
            vnodes: spin::Mutex::new(BTreeMap::new()),
            reserved: AtomicI64::new(0),
            idaddr: AtomicI64::new(idaddr),
            wake_gen: AtomicU64::new(0),
            sleepers: AtomicU32::new(0),
            unmounting: AtomicBool::new(false),
            _hal: PhantomData,
        }
    }

    /// 格式化设备并挂载
    ///
    /// 段 0 成为第一个当前段；根目录 inode 与第一份 ifile 镜像由首个检查点写入，
    /// 两个 superblock 副本都写成这次检查点的内容。
    ///
    /// # 参数
    ///
    /// * `device` - 块设备
    /// * `opts` - 格式化参数
    /// * `config` - 运行时配置
    ///
    /// # 错误
    ///
    /// - `ErrorKind::InvalidInput` - 参数无效或设备太小
    /// - `ErrorKind::Io` - 写入失败
    pub fn mkfs(device: D, opts: &MkfsOptions, config: FsConfig) -> Result<Self> {
        let bytes = device.total_sectors() * device.sector_size() as u64;
        let geom = opts.geometry(bytes)?;
        let bdev = BlockDev::with_cache(device, geom.fsize, config.cache_frags)?;

        let mut ifile = Ifile::format(&geom);
        let mut su = ifile.seguse(0)?;
        su.flags |= SegUseFlags::DIRTY | SegUseFlags::ACTIVE;
        ifile.write_seguse(0, su)?;
        ifile.cleaner.clean -= 1;
        ifile.cleaner.dirty += 1;

        let log = LogState {
            curseg: 0,
            offset: geom.seg_data_start(0),
            create: 1,
            seg_create: 1,
            ..LogState::default()
        };

        let secs = H::now().map(|d| d.as_secs()).unwrap_or(0);
        let fsid = FsId((secs << 20) | (FSID_SEQ.fetch_add(1, Ordering::Relaxed) & 0xf_ffff));

        log::info!(
            "[MKFS] fsid={:#x} fsize={} bsize={} ssize={} nseg={} ninodes={}",
            fsid.0, geom.fsize, geom.bsize, geom.ssize, geom.nseg, geom.ninodes
        );

        let fs = Self::build(geom, bdev, ifile, log, fsid, config);

        let mut root = Inode::new(LFS_ROOT_INUM, 0, S_IFDIR | 0o755);
        root.nlink = 2;
        root.mtime = secs;
        fs.vnodes
            .lock()
            .insert(LFS_ROOT_INUM, Arc::new(spin::Mutex::new(root)));

        let sb = {
            let mut seg = fs.seglock.lock(SegmFlags::CKP);
            fs.checkpoint(&mut seg)?
        };
        let other = (sb.copy_index() + 1) % LFS_MAXNUMSB;
        sb.write_copy(&mut *fs.dev.lock(), other)?;
        Ok(fs)
    }

    /// 挂载已有文件系统
    ///
    /// 从最新的有效 superblock 恢复到最近一次检查点：读取 ifile 镜像，
    /// 日志从检查点记录的位置继续追加。
    ///
    /// # 错误
    ///
    /// - `ErrorKind::Corrupted` - superblock 或 ifile 镜像无效
    /// - `ErrorKind::Io` - 读取失败
    pub fn mount(mut device: D, config: FsConfig) -> Result<Self> {
        let sb = probe_superblock(&mut device)?;
        let geom = sb.geom;
        let mut bdev = BlockDev::with_cache(device, geom.fsize, config.cache_frags)?;
        if bdev.total_frags() < geom.segtod(geom.nseg) as u64 {
            return Err(Error::new(ErrorKind::InvalidInput, "device smaller than file system"));
        }

        let mut image = vec![0u8; geom.image_blocks() as usize * geom.bsize as usize];
        bdev.read_frags(sb.idaddr, &mut image)?;
        let ifile = Ifile::decode_image(&geom, &image)?;

        let log = LogState {
            curseg: sb.curseg,
            offset: sb.offset,
            idaddr: sb.idaddr,
            serial: sb.serial,
            create: sb.create,
            seg_create: sb.seg_create,
            psserial: sb.psserial,
            ..LogState::default()
        };
        log::info!(
            "[MOUNT] fsid={:#x} serial={} curseg={} offset={:#x} clean={} bfree={}",
            sb.fsid.0, sb.serial, sb.curseg, sb.offset, ifile.cleaner.clean, ifile.cleaner.bfree
        );
        Ok(Self::build(geom, bdev, ifile, log, sb.fsid, config))
    }

    /// 卸载：做最后一次检查点并取回设备
    ///
    /// 之后到达的 segwait 调用者会收到 `ErrorKind::Shutdown`。
    pub fn unmount(self) -> Result<D> {
        self.begin_shutdown();
        self.sync()?;
        let mut bdev = self.dev.into_inner();
        bdev.flush()?;
        log::info!("[MOUNT] unmounted fsid={:#x}", self.fsid.0);
        Ok(bdev.into_inner())
    }

    /// 标记文件系统即将卸载并唤醒所有等待者
    pub fn begin_shutdown(&self) {
        self.unmounting.store(true, Ordering::Release);
        self.wakeup();
    }

    /// 是否正在卸载
    pub fn is_shutting_down(&self) -> bool {
        self.unmounting.load(Ordering::Acquire)
    }

    // ===== 访问器 =====

    /// 文件系统标识
    pub fn fsid(&self) -> FsId {
        self.fsid
    }

    /// 几何参数
    pub fn geometry(&self) -> &Geometry {
        &self.geom
    }

    /// 运行时配置
    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    /// 块映射器
    pub fn mapper(&self) -> &BlockMapper {
        &self.mapper
    }

    /// 当前 ifile 的拷贝
    pub fn ifile_snapshot(&self) -> Ifile {
        self.ifile.read().clone()
    }

    /// I/O 统计
    pub fn io_stats(&self) -> IoStats {
        self.dev.lock().stats()
    }

    /// 当前段号
    pub fn current_segment(&self) -> u32 {
        self.seglock.lock(SegmFlags::PROT).curseg
    }

    /// 唤醒 segwait 等待者
    pub(crate) fn wakeup(&self) {
        self.wake_gen.fetch_add(1, Ordering::AcqRel);
        crate::cleaner::wakeup_all();
    }

    // ===== vnode 表 =====

    /// 取得 inode 的内存句柄，不在表中时从磁盘读取
    ///
    /// # 错误
    ///
    /// - `ErrorKind::InvalidInput` - inode 号越界或是保留 inode
    /// - `ErrorKind::NotFound` - inode 未使用
    /// - `ErrorKind::Corrupted` - 磁盘 inode 无效
    pub fn vget(&self, ino: Ino) -> Result<Vnode> {
        if ino < LFS_ROOT_INUM || ino >= self.geom.ninodes {
            return Err(Error::new(ErrorKind::InvalidInput, "inode number out of range"));
        }
        let mut table = self.vnodes.lock();
        if let Some(vp) = table.get(&ino) {
            return Ok(vp.clone());
        }

        let ent = self.ifile.read().ientry(ino)?;
        if ent.daddr == LFS_UNUSED_DADDR {
            return Err(Error::new(ErrorKind::NotFound, "inode not in use"));
        }
        let mut buf = vec![0u8; self.geom.fsize as usize];
        self.dev.lock().read_frags(ent.daddr, &mut buf)?;
        let mut ip = Inode::decode(&buf, &self.geom, ino)?;
        if ip.version != ent.version {
            log::warn!(
                "[VGET] ino {} dinode version {} != ifile version {}",
                ino, ip.version, ent.version
            );
            ip.version = ent.version;
        }
        log::trace!("[VGET] loaded ino {} from {:#x}", ino, ent.daddr);

        let vp = Arc::new(spin::Mutex::new(ip));
        table.insert(ino, vp.clone());
        Ok(vp)
    }

    /// 从 vnode 表中移除
    pub(crate) fn vdrop(&self, ino: Ino) {
        self.vnodes.lock().remove(&ino);
    }

    /// vnode 表的快照（按 inode 号排序）
    pub(crate) fn vnode_list(&self) -> alloc::vec::Vec<Vnode> {
        self.vnodes.lock().values().cloned().collect()
    }

    // ===== 空间预留 =====

    /// 预留 `frags` 个片段
    ///
    /// 多块释放操作在修改任何状态前调用，保证空间不足在动手之前暴露。
    ///
    /// # 错误
    ///
    /// - `ErrorKind::NoSpace` - 空闲或可写片段不足
    pub fn reserve(&self, frags: i64) -> Result<Reservation<'_>> {
        let limit = {
            let ifile = self.ifile.read();
            ifile.cleaner.bfree.min(ifile.cleaner.avail)
        };
        let mut cur = self.reserved.load(Ordering::Acquire);
        loop {
            if limit - cur < frags {
                log::debug!("[RESERVE] {} frags refused: limit={} reserved={}", frags, limit, cur);
                return Err(Error::new(ErrorKind::NoSpace, "cannot reserve space"));
            }
            match self.reserved.compare_exchange_weak(cur, cur + frags, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => break,
                Err(now) => cur = now,
            }
        }
        Ok(Reservation {
            reserved: &self.reserved,
            frags,
        })
    }

    /// 当前预留总量
    pub fn reserved_frags(&self) -> i64 {
        self.reserved.load(Ordering::Acquire)
    }

    // ===== 同步 =====

    /// 把 inode 的脏内容写入日志
    ///
    /// # 错误
    ///
    /// - `ErrorKind::Io` - 写入失败（记账仍已更新）
    pub fn fsync(&self, ino: Ino) -> Result<()> {
        let vp = self.vget(ino)?;
        let mut ip = vp.lock();
        let mut seg = self.seglock.lock(SegmFlags::SYNC);
        let mut deltas = SegDeltas::new();
        let res = self.write_vnode(&mut seg, &mut ip, &mut deltas);
        deltas.finalize(&seg, &mut self.ifile.write());
        res?;
        self.maybe_checkpoint(&mut seg)
    }

    /// 写出所有脏 inode 并做检查点
    pub fn sync(&self) -> Result<()> {
        let mut seg = self.seglock.lock(SegmFlags::CKP);
        self.checkpoint(&mut seg).map(|_| ())
    }

    /// 结束当前段，切换到下一个干净段
    ///
    /// # 错误
    ///
    /// - `ErrorKind::NoSpace` - 没有可用的干净段
    pub fn roll_segment(&self) -> Result<u32> {
        let mut seg = self.seglock.lock(SegmFlags::empty());
        self.flush_partial(&mut seg)?;
        self.newseg(&mut seg)?;
        Ok(seg.curseg)
    }

    // ===== 统计 =====

    /// 文件系统统计信息
    pub fn statfs(&self) -> StatFs {
        let ifile = self.ifile.read();
        let ci = ifile.cleaner;
        StatFs {
            fsize: self.geom.fsize,
            bsize: self.geom.bsize,
            blocks: self.geom.total_usable(),
            bfree: ci.bfree,
            avail: ci.avail,
            nseg: self.geom.nseg,
            clean: ci.clean,
            dirty: ci.dirty,
            files: self.geom.ninodes,
            ffree: ifile.free_inodes(),
        }
    }

    /// 文件属性
    pub fn stat(&self, ino: Ino) -> Result<FileAttr> {
        let vp = self.vget(ino)?;
        let ip = vp.lock();
        Ok(FileAttr {
            ino,
            version: ip.version,
            mode: ip.mode,
            node_type: InodeType::from_mode(ip.mode),
            nlink: ip.nlink,
            size: ip.size,
            blocks: ip.blocks,
            effnblks: ip.effnblks,
            mtime: ip.mtime,
        })
    }

    /// inode 当前在磁盘上的地址（未写入时为 0）
    pub fn inode_daddr(&self, ino: Ino) -> Result<Daddr> {
        Ok(self.ifile.read().ientry(ino)?.daddr)
    }

    /// 逻辑块的磁盘地址（原始指针值）
    pub fn bmap(&self, ino: Ino, lbn: crate::types::Lbn) -> Result<Daddr> {
        let vp = self.vget(ino)?;
        let ip = vp.lock();
        self.mapper.bmap(&mut *self.dev.lock(), &ip, lbn)
    }

    /// 当前时间（秒）
    pub(crate) fn now_secs() -> u64 {
        H::now().map(|d| d.as_secs()).unwrap_or(0)
    }
}
