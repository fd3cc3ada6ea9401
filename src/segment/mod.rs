//! 段锁、部分段写入与检查点
//!
//! 日志以部分段（partial segment）为单位追加：一个段摘要后跟若干块。
//! 同一次段写入中的块按 数据块 → 间接块（由低层到高层）→ inode 的顺序排列，
//! 块的新地址在追加时确定，刷写时整个部分段一次写出。

mod checkpoint;
mod lock;
mod write;

pub use lock::{SegGuard, SegLock, SegmFlags};

use crate::types::{Daddr, FInfo};
use alloc::collections::BTreeSet;
use alloc::vec::Vec;

/// 段锁保护的日志状态
#[derive(Debug, Default)]
pub struct LogState {
    /// 当前段
    pub curseg: u32,
    /// 下一个部分段的起始地址
    pub offset: Daddr,
    /// 最近一次检查点写入的 ifile 镜像地址
    pub idaddr: Daddr,
    /// 最近一次检查点的序号
    pub serial: u64,
    /// 段创建计数器
    pub create: u64,
    /// 当前段的创建戳
    pub seg_create: u64,
    /// 部分段序号
    pub psserial: u64,
    /// 自上次检查点以来写满的段数
    pub segs_since_ckp: u32,
    /// 自上次检查点以来被清理的段：下一次检查点之前不得复用
    pub(crate) cleaned: BTreeSet<u32>,
    /// 正在组装的部分段
    pub(crate) partial: Option<Partial>,
}

impl LogState {
    /// 自上次检查点以来被清理、暂不可复用的段
    pub fn cleaned_segments(&self) -> impl Iterator<Item = u32> + '_ {
        self.cleaned.iter().copied()
    }

    /// 是否有尚未刷写的部分段
    pub fn has_partial(&self) -> bool {
        self.partial.is_some()
    }
}

/// 正在组装的部分段
#[derive(Debug)]
pub(crate) struct Partial {
    /// 摘要所在地址
    pub(crate) start: Daddr,
    /// 块条目
    pub(crate) finfos: Vec<FInfo>,
    /// 摘要之后的全部块内容
    pub(crate) data: Vec<u8>,
    /// 其中的 inode 数
    pub(crate) ninos: u16,
}

impl Partial {
    pub(crate) fn new(start: Daddr) -> Self {
        Self {
            start,
            finfos: Vec::new(),
            data: Vec::new(),
            ninos: 0,
        }
    }
}
