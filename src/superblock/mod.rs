//! Superblock 操作模块
//!
//! 这个模块提供 LFS 几何参数换算，以及 superblock 的读取、验证和写入。
//!
//! 磁盘上有两个 superblock 副本：段 0 中标签预留区之后一个，段 `nseg/2`
//! 开头一个。检查点交替写两个副本，挂载时取序号最大的有效副本。

mod geometry;
mod read;
mod write;

pub use geometry::Geometry;
pub(crate) use geometry::IMAGE_HDR_SIZE;
pub use read::{probe_superblock, Superblock, SB_DISK_SIZE};
