//! 段记账批处理
//!
//! 截断、块搬移和 inode 重写都会让旧位置上的字节失效。这些失效量先按段累积在
//! [`SegDeltas`] 里，操作结束时由持有段锁的调用者一次性写入段使用表。

use crate::ifile::Ifile;
use crate::segment::SegGuard;
use crate::superblock::Geometry;
use crate::types::Daddr;
use alloc::collections::BTreeMap;

/// 待落账的段字节减量
///
/// 同一段的多次释放合并为一项。记账本身不加锁：累积到落账的整个窗口内，
/// 调用者必须一直持有段锁，[`SegDeltas::finalize`] 通过段锁守卫的引用确认这一点。
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SegDeltas {
    pending: BTreeMap<u32, u64>,
}

impl SegDeltas {
    /// 创建空批次
    pub const fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
        }
    }

    /// 释放位于 `daddr` 的 `bytes` 字节
    ///
    /// 只有真实磁盘地址（正数）会产生减量；空洞和占位指针从未计入任何段。
    pub fn free(&mut self, geom: &Geometry, daddr: Daddr, bytes: u64) {
        if daddr > 0 && bytes > 0 {
            self.record(geom.dtosn(daddr), geom.fragroundup(bytes));
        }
    }

    /// 给段 `sn` 记录 `bytes` 字节的减量
    pub fn record(&mut self, sn: u32, bytes: u64) {
        *self.pending.entry(sn).or_insert(0) += bytes;
    }

    /// 合并另一个批次
    pub fn merge(&mut self, other: SegDeltas) {
        for (sn, bytes) in other.pending {
            self.record(sn, bytes);
        }
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// 某段的待落账字节数
    pub fn get(&self, sn: u32) -> u64 {
        self.pending.get(&sn).copied().unwrap_or(0)
    }

    /// 所有段的待落账字节总数
    pub fn total(&self) -> u64 {
        self.pending.values().sum()
    }

    /// 落账：对每个段读取使用记录、扣减并写回，然后清空批次
    ///
    /// # Panics
    ///
    /// 减量超过段中记录的活跃字节数。这说明记账已经与磁盘内容脱节，
    /// 继续运行只会把错误的计数写进日志。
    pub fn finalize<T>(&mut self, _seg: &SegGuard<'_, T>, ifile: &mut Ifile) {
        for (sn, bytes) in core::mem::take(&mut self.pending) {
            let mut su = match ifile.seguse(sn) {
                Ok(su) => su,
                Err(_) => {
                    log::error!("[SEGUSE] delta for nonexistent segment {}", sn);
                    panic!("segment delta out of range");
                }
            };
            if (su.nbytes as u64) < bytes {
                log::error!(
                    "[SEGUSE] segment {} negative bytes: live={} delta={}",
                    sn, su.nbytes, bytes
                );
                panic!("segment live bytes would go negative");
            }
            su.nbytes -= bytes as u32;
            log::trace!("[SEGUSE] segment {} -{} -> {}", sn, bytes, su.nbytes);
            if ifile.write_seguse(sn, su).is_err() {
                log::error!("[SEGUSE] segment {} usage record not writable", sn);
                panic!("segment usage write failed");
            }
        }
    }
}
