//! 测试辅助：内存块设备与测试 HAL

use crate::block::BlockDevice;
use crate::error::{Error, ErrorKind, Result};
use crate::fs::{FsConfig, Lfs, LfsHal, MkfsOptions};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::Cell;
use core::time::Duration;

#[derive(Debug)]
struct MemState {
    storage: Vec<u8>,
    /// 已执行（或被丢弃）的写次数
    writes: usize,
    /// 只允许前 N 次写落盘，之后的写被静默丢弃（模拟崩溃）
    crash_after: Option<usize>,
    fail_writes: bool,
    fail_reads: bool,
}

/// 内存块设备
///
/// `clone()` 得到共享同一块存储的句柄，用于在文件系统持有设备时注入故障。
#[derive(Clone, Debug)]
pub struct MemDevice {
    state: Arc<spin::Mutex<MemState>>,
}

impl MemDevice {
    pub const SECTOR: u32 = 512;

    pub fn new(bytes: usize) -> Self {
        Self {
            state: Arc::new(spin::Mutex::new(MemState {
                storage: vec![0u8; bytes],
                writes: 0,
                crash_after: None,
                fail_writes: false,
                fail_reads: false,
            })),
        }
    }

    /// 独立拷贝当前存储内容
    pub fn snapshot(&self) -> Self {
        let st = self.state.lock();
        let copy = Self::new(st.storage.len());
        copy.state.lock().storage.copy_from_slice(&st.storage);
        copy
    }

    pub fn writes(&self) -> usize {
        self.state.lock().writes
    }

    pub fn crash_after(&self, n: usize) {
        let mut st = self.state.lock();
        st.writes = 0;
        st.crash_after = Some(n);
    }

    pub fn set_fail_writes(&self, on: bool) {
        self.state.lock().fail_writes = on;
    }

    pub fn set_fail_reads(&self, on: bool) {
        self.state.lock().fail_reads = on;
    }

    pub fn peek(&self, byte_off: usize, len: usize) -> Vec<u8> {
        self.state.lock().storage[byte_off..byte_off + len].to_vec()
    }
}

impl BlockDevice for MemDevice {
    fn sector_size(&self) -> u32 {
        Self::SECTOR
    }

    fn total_sectors(&self) -> u64 {
        (self.state.lock().storage.len() / Self::SECTOR as usize) as u64
    }

    fn read_sectors(&mut self, lba: u64, buf: &mut [u8]) -> Result<()> {
        let st = self.state.lock();
        if st.fail_reads {
            return Err(Error::new(ErrorKind::Io, "injected read failure"));
        }
        let start = lba as usize * Self::SECTOR as usize;
        buf.copy_from_slice(&st.storage[start..start + buf.len()]);
        Ok(())
    }

    fn write_sectors(&mut self, lba: u64, buf: &[u8]) -> Result<()> {
        let mut st = self.state.lock();
        if st.fail_writes {
            return Err(Error::new(ErrorKind::Io, "injected write failure"));
        }
        st.writes += 1;
        if let Some(limit) = st.crash_after {
            if st.writes > limit {
                return Ok(());
            }
        }
        let start = lba as usize * Self::SECTOR as usize;
        st.storage[start..start + buf.len()].copy_from_slice(buf);
        Ok(())
    }
}

std::thread_local! {
    static SIGNAL: Cell<bool> = const { Cell::new(false) };
}

/// 测试 HAL：墙钟时间，线程局部的信号标志
pub struct TestHal;

impl TestHal {
    /// 给当前线程“投递”一个信号
    pub fn raise_signal(on: bool) {
        SIGNAL.with(|s| s.set(on));
    }
}

impl LfsHal for TestHal {
    fn now() -> Option<Duration> {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .ok()
    }

    fn relax() {
        std::thread::yield_now();
    }

    fn signal_pending() -> bool {
        SIGNAL.with(|s| s.get())
    }
}

pub type TestFs = Lfs<MemDevice, TestHal>;

/// 小型文件系统参数：512 字节片段，1 KiB 块，32 KiB 段
pub fn small_opts() -> MkfsOptions {
    MkfsOptions {
        fsize: 512,
        bsize: 1024,
        ssize: 32 * 1024,
        nseg: Some(32),
        ninodes: 64,
    }
}

/// 整块等于片段的参数，间接树更窄（每块 128 个指针）
pub fn narrow_opts() -> MkfsOptions {
    MkfsOptions {
        fsize: 512,
        bsize: 512,
        ssize: 32 * 1024,
        nseg: Some(64),
        ninodes: 64,
    }
}

pub fn device_for(opts: &MkfsOptions) -> MemDevice {
    let nseg = opts.nseg.unwrap_or(32) as usize;
    MemDevice::new(nseg * opts.ssize as usize)
}

/// 格式化并返回文件系统和共享设备句柄
pub fn new_fs(opts: &MkfsOptions) -> (TestFs, MemDevice) {
    let dev = device_for(opts);
    let handle = dev.clone();
    let fs = Lfs::mkfs(dev, opts, FsConfig::default()).unwrap();
    (fs, handle)
}

/// 同 [`new_fs`]，但不启用读缓存，读故障注入对每次读取都生效
pub fn new_fs_uncached(opts: &MkfsOptions) -> (TestFs, MemDevice) {
    let dev = device_for(opts);
    let handle = dev.clone();
    let config = FsConfig {
        cache_frags: 0,
        ..FsConfig::default()
    };
    let fs = Lfs::mkfs(dev, opts, config).unwrap();
    (fs, handle)
}

/// 可预测的测试数据
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}
