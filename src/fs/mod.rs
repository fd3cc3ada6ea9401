//! 文件系统高级 API
//!
//! [`Lfs`] 把段锁、ifile、块映射和段写入组合成完整的文件系统：
//! 格式化与挂载、文件读写、截断、同步，以及一致性检查。

mod file;
mod filesystem;
pub mod fsck;
mod truncate;
mod types;

pub use filesystem::{Lfs, Reservation, Vnode};
pub use fsck::{FsckReport, Mismatch};
pub use types::{FileAttr, FsConfig, InodeType, LfsHal, MkfsOptions, StatFs, TruncFlags};
#[cfg(feature = "std")]
pub use types::StdHal;
