//! segwait：等待段状态变化

use super::{SegWaitOutcome, GLOBAL_WAKE};
use crate::block::BlockDevice;
use crate::error::{Error, ErrorKind, Result};
use crate::fs::{Lfs, LfsHal};
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use core::time::Duration;

/// 等待者计数，离开作用域时减一
struct Sleeper<'a>(&'a AtomicU32);

impl<'a> Sleeper<'a> {
    fn enter(count: &'a AtomicU32) -> Self {
        count.fetch_add(1, Ordering::AcqRel);
        Self(count)
    }
}

impl Drop for Sleeper<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// 自旋等待 `wake` 离开 `gen`
///
/// `timeout` 为零表示一直等待；HAL 没有时钟时非零超时立即到期。
/// `shutdown` 返回 true 时以 `ErrorKind::Shutdown` 结束。
pub(crate) fn wait_on<H: LfsHal>(
    wake: &AtomicU64,
    gen: u64,
    timeout: Duration,
    shutdown: impl Fn() -> bool,
) -> Result<SegWaitOutcome> {
    let start = H::now();
    loop {
        if wake.load(Ordering::Acquire) != gen {
            return Ok(SegWaitOutcome::Woken);
        }
        if shutdown() {
            return Err(Error::new(ErrorKind::Shutdown, "file system is unmounting"));
        }
        if H::signal_pending() {
            return Ok(SegWaitOutcome::Interrupted);
        }
        if !timeout.is_zero() {
            let expired = match (start, H::now()) {
                (Some(start), Some(now)) => now.saturating_sub(start) >= timeout,
                _ => true,
            };
            if expired {
                return Ok(SegWaitOutcome::TimedOut);
            }
        }
        H::relax();
    }
}

/// 等待任意文件系统的段状态变化
pub(crate) fn segwait_any<H: LfsHal>(timeout: Duration) -> Result<SegWaitOutcome> {
    let gen = GLOBAL_WAKE.load(Ordering::Acquire);
    let outcome = wait_on::<H>(&GLOBAL_WAKE, gen, timeout, || false)?;
    log::debug!("[SEGWAIT] any fs: {:?}", outcome);
    Ok(outcome)
}

impl<D: BlockDevice, H: LfsHal> Lfs<D, H> {
    /// 阻塞直到有段状态变化（写满、清理或检查点）或超时
    ///
    /// 只是被动等待，从不触发清理。
    ///
    /// # 参数
    ///
    /// * `timeout` - 超时时间，零表示一直等待
    ///
    /// # 错误
    ///
    /// - `ErrorKind::Shutdown` - 文件系统正在卸载
    pub fn segwait(&self, timeout: Duration) -> Result<SegWaitOutcome> {
        if self.is_shutting_down() {
            return Err(Error::new(ErrorKind::Shutdown, "file system is unmounting"));
        }
        let gen = self.wake_gen.load(Ordering::Acquire);
        let _sleeper = Sleeper::enter(&self.sleepers);
        log::trace!("[SEGWAIT] sleeping (gen {}, timeout {:?})", gen, timeout);
        let outcome = wait_on::<H>(&self.wake_gen, gen, timeout, || self.is_shutting_down())?;
        log::debug!("[SEGWAIT] {:?}", outcome);
        Ok(outcome)
    }

    /// 正在 segwait 中等待的调用者数
    pub fn segwait_sleepers(&self) -> u32 {
        self.sleepers.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;
    use std::thread;

    #[test]
    fn test_segwait_times_out() {
        let (fs, _dev) = new_fs(&small_opts());
        let outcome = fs.segwait(Duration::from_millis(20)).unwrap();
        assert_eq!(outcome, SegWaitOutcome::TimedOut);
        assert_eq!(fs.segwait_sleepers(), 0);
    }

    #[test]
    fn test_segwait_woken_by_new_segment() {
        let (fs, _dev) = new_fs(&small_opts());
        thread::scope(|s| {
            let waiter = s.spawn(|| fs.segwait(Duration::ZERO));
            while fs.segwait_sleepers() == 0 {
                thread::yield_now();
            }
            fs.roll_segment().unwrap();
            assert_eq!(waiter.join().unwrap().unwrap(), SegWaitOutcome::Woken);
        });
        assert_eq!(fs.segwait_sleepers(), 0);
    }

    #[test]
    fn test_segwait_interrupted_by_signal() {
        let (fs, _dev) = new_fs(&small_opts());
        TestHal::raise_signal(true);
        let outcome = fs.segwait(Duration::ZERO);
        TestHal::raise_signal(false);
        assert_eq!(outcome.unwrap(), SegWaitOutcome::Interrupted);
    }

    #[test]
    fn test_segwait_refused_during_shutdown() {
        let (fs, _dev) = new_fs(&small_opts());
        thread::scope(|s| {
            let waiter = s.spawn(|| fs.segwait(Duration::ZERO));
            while fs.segwait_sleepers() == 0 {
                thread::yield_now();
            }
            fs.begin_shutdown();
            // begin_shutdown 同时会唤醒：两种结果都说明等待者已离开
            let res = waiter.join().unwrap();
            assert!(matches!(res, Ok(SegWaitOutcome::Woken)) || res.unwrap_err().kind() == ErrorKind::Shutdown);
        });
        assert_eq!(fs.segwait(Duration::ZERO).unwrap_err().kind(), ErrorKind::Shutdown);
    }
}
