//! 段锁
//!
//! 整个文件系统只有一把段锁，同一时刻只有截断、段写入、清理器校验/回收中的
//! 一个持有它。加锁顺序：vnode 锁 → 段锁 → vnode 表 → ifile → 设备，不可反向。
//! 持有段锁时需要 vnode 锁的地方（检查点、markv）一律用 `try_lock`。

use bitflags::bitflags;
use core::ops::{Deref, DerefMut};

bitflags! {
    /// 段锁模式
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SegmFlags: u32 {
        /// 检查点
        const CKP = 0x01;
        /// 清理器操作
        const CLEAN = 0x02;
        /// 同步写
        const SYNC = 0x04;
        /// 保护模式：只读取/修改记账，不向日志追加
        const PROT = 0x08;
    }
}

/// 段锁
pub struct SegLock<T> {
    inner: spin::Mutex<T>,
}

/// 段锁守卫
///
/// 持有守卫即证明段锁已被持有；记账批处理的落账接口要求传入它的引用。
pub struct SegGuard<'a, T> {
    state: spin::MutexGuard<'a, T>,
    flags: SegmFlags,
}

impl<T> SegLock<T> {
    /// 创建段锁
    pub const fn new(state: T) -> Self {
        Self {
            inner: spin::Mutex::new(state),
        }
    }

    /// 以给定模式获取段锁（自旋等待）
    pub fn lock(&self, flags: SegmFlags) -> SegGuard<'_, T> {
        let state = self.inner.lock();
        log::trace!("[SEGLOCK] acquired {:?}", flags);
        SegGuard { state, flags }
    }

    /// 尝试获取段锁
    pub fn try_lock(&self, flags: SegmFlags) -> Option<SegGuard<'_, T>> {
        self.inner.try_lock().map(|state| SegGuard { state, flags })
    }

    /// 段锁当前是否被持有
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

impl<T> SegGuard<'_, T> {
    /// 当前模式
    #[inline]
    pub fn flags(&self) -> SegmFlags {
        self.flags
    }

    /// 追加模式位（例如截断最后决定同步写）
    pub fn add_flags(&mut self, flags: SegmFlags) {
        self.flags |= flags;
    }

    /// 是否允许向日志追加
    #[inline]
    pub fn may_append(&self) -> bool {
        !self.flags.contains(SegmFlags::PROT)
    }
}

impl<T> Deref for SegGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.state
    }
}

impl<T> DerefMut for SegGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.state
    }
}

impl<T> Drop for SegGuard<'_, T> {
    fn drop(&mut self) {
        log::trace!("[SEGLOCK] released {:?}", self.flags);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclusive() {
        let lock = SegLock::new(5u32);
        let mut g = lock.lock(SegmFlags::CKP);
        assert!(lock.is_locked());
        assert!(lock.try_lock(SegmFlags::CLEAN).is_none());
        *g += 1;
        drop(g);
        let g = lock.try_lock(SegmFlags::CLEAN).unwrap();
        assert_eq!(*g, 6);
        assert_eq!(g.flags(), SegmFlags::CLEAN);
    }

    #[test]
    fn test_prot_forbids_append() {
        let lock = SegLock::new(());
        let mut g = lock.lock(SegmFlags::PROT);
        assert!(!g.may_append());
        g.add_flags(SegmFlags::SYNC);
        assert!(g.flags().contains(SegmFlags::SYNC | SegmFlags::PROT));
    }
}
