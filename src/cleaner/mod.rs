//! 清理器协议（内核侧）
//!
//! 用户态清理器按下面的循环回收段：
//!
//! 1. 读段摘要，列出段中每个块的描述符（[`Lfs::scan_segment`]）
//! 2. `bmapv`：不加段锁地查询每个块的当前地址，地址不变的块仍然活跃
//! 3. `markv`：持有段锁重新校验，把仍然活跃的块重写到日志尾部
//! 4. `segclean`：段中没有活跃字节后把它归还为干净段
//! 5. `segwait`：没有可清理的段时睡眠，直到有段状态变化
//!
//! `bmapv` 的结果只是建议，`markv` 总是重新校验，校验不过的描述符报告为
//! [`MarkOutcome::Stale`] 而不是错误。
//!
//! [`Lfs::scan_segment`]: crate::fs::Lfs::scan_segment

mod bmapv;
mod markv;
mod scan;
mod segclean;
mod segwait;
mod syscall;
mod wire;

pub use markv::MarkvReport;
pub use syscall::{CleanerCaps, Credentials, MountTable};
pub use wire::WireAbi;

use crate::types::{Daddr, Ino, Lbn};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

/// 块描述符：清理器与内核之间交换的单位
///
/// `lbn` 为 [`LFS_UNUSED_LBN`](crate::consts::LFS_UNUSED_LBN) 时描述 inode 自身所在的块；
/// `daddr` 为 [`UNASSIGNED`](crate::consts::UNASSIGNED) 表示 bmapv 无法解析。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockInfo {
    /// inode 号
    pub inode: Ino,
    /// 逻辑块号
    pub lbn: Lbn,
    /// 磁盘地址
    pub daddr: Daddr,
    /// 块所在段的创建戳
    pub segcreate: u64,
    /// inode 版本
    pub version: u32,
    /// 块字节数
    pub size: u32,
    /// 用户缓冲区地址（只在线格式中有意义）
    pub bp: u64,
    /// 清理器读出的块内容（数据块重写时使用）
    pub data: Vec<u8>,
}

/// markv 对单个描述符的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    /// 块已暂存，随后写到日志尾部
    Rewritten,
    /// 描述符与当前状态不符（块已搬走或正被修改），需要重新 bmapv
    Stale,
    /// 块所属的 inode 已删除或版本已变，块不再活跃
    Dead,
    /// 描述符本身无效或读取失败
    Error,
}

/// markv 的整体结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkvStatus {
    /// 所有描述符都已处理
    Ok,
    /// 至少一个描述符过期，清理器应重新解析后再提交
    RetryStale,
}

/// segclean 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegCleanOutcome {
    /// 段已归还为干净段
    Cleaned,
    /// 段是当前段或仍有活跃字节
    Busy,
    /// 段本来就是干净的，未做任何修改
    AlreadyClean,
}

/// segwait 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegWaitOutcome {
    /// 段状态发生了变化
    Woken,
    /// 超时
    TimedOut,
    /// 被信号打断
    Interrupted,
}

/// 所有文件系统共用的唤醒代数，供不指定文件系统的 segwait 使用
static GLOBAL_WAKE: AtomicU64 = AtomicU64::new(0);

/// 唤醒不指定文件系统的 segwait 等待者
pub(crate) fn wakeup_all() {
    GLOBAL_WAKE.fetch_add(1, Ordering::AcqRel);
}

#[cfg(test)]
mod tests;
