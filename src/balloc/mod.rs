//! 块空间分配与记账
//!
//! LFS 的块在写入日志时才确定位置。分配只做两件事：给新块挂上占位指针和脏缓冲区，
//! 并从空闲计数中扣除它将占用的片段；释放产生的段字节减量由 [`SegDeltas`] 批量落账。

mod alloc;
mod free;

pub use free::SegDeltas;
