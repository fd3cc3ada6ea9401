//! 块设备抽象
//!
//! 提供块设备接口和片段级 I/O 操作。
//! block/device.rs 定义设备接口与包装器，block/io.rs 提供经过片段缓存的读写。

mod device;
mod io;

pub use device::{BlockDev, BlockDevice, IoStats};
