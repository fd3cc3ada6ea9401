//! 间接块寻址与截断
//!
//! - [`mapper`]：逻辑块号到磁盘地址的映射、间接路径计算、指针读写
//! - [`trunc`]：间接块树的递归释放

mod mapper;
mod trunc;

pub use mapper::{read_ptr, write_ptr, BlockMapper, Indir};
pub(crate) use trunc::{IndirTrunc, Released};
