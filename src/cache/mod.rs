//! 片段缓存模块
//!
//! 按磁盘地址缓存片段内容，使用 `lru` crate 管理驱逐。
//!
//! LFS 从不原地覆盖活跃数据，同一磁盘地址只会在所在段被清理并重新使用后
//! 才写入新内容。因此缓存只需要：
//!
//! - 写穿：写入成功后用新内容覆盖缓存项
//! - 段重用前按范围失效（[`FragCache::invalidate_range`]）
//!
//! 不需要脏块跟踪与回写。

mod frag_cache;

pub use frag_cache::{CacheStats, FragCache, DEFAULT_CACHE_FRAGS};
