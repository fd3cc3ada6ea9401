//! 片段缓存实现（基于 lru crate）

use crate::types::Daddr;
use alloc::vec::Vec;
use core::num::NonZeroUsize;
use lru::LruCache;

/// 默认缓存片段数量
pub const DEFAULT_CACHE_FRAGS: usize = 256;

/// 缓存统计信息
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// 命中的片段数
    pub hits: u64,
    /// 未命中的片段数
    pub misses: u64,
    /// 失效的片段数
    pub invalidations: u64,
}

impl CacheStats {
    /// 计算命中率
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// 片段缓存
///
/// 键为片段磁盘地址，值为一个片段的数据。
pub struct FragCache {
    /// LRU缓存核心
    cache: LruCache<Daddr, Vec<u8>>,
    /// 片段大小（字节）
    fsize: usize,
    /// 统计信息
    stats: CacheStats,
}

impl FragCache {
    /// 创建新的片段缓存
    ///
    /// # 参数
    ///
    /// * `capacity` - 缓存容量（片段数量），为 0 时返回 None
    /// * `fsize` - 片段大小（字节）
    pub fn new(capacity: usize, fsize: usize) -> Option<Self> {
        let cap = NonZeroUsize::new(capacity)?;
        Some(Self {
            cache: LruCache::new(cap),
            fsize,
            stats: CacheStats::default(),
        })
    }

    /// 缓存容量
    pub fn capacity(&self) -> usize {
        self.cache.cap().get()
    }

    /// 当前缓存的片段数
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// 缓存是否为空
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// 统计信息
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// 尝试从缓存读取一段连续片段
    ///
    /// 只有全部片段都命中时才复制并返回 true；任一未命中则不修改 `buf`。
    pub fn read_range(&mut self, daddr: Daddr, buf: &mut [u8]) -> bool {
        let nfrags = buf.len() / self.fsize;
        let all_hit = (0..nfrags).all(|i| self.cache.contains(&(daddr + i as Daddr)));
        if !all_hit {
            self.stats.misses += nfrags as u64;
            return false;
        }

        for (i, chunk) in buf.chunks_mut(self.fsize).enumerate() {
            if let Some(data) = self.cache.get(&(daddr + i as Daddr)) {
                chunk.copy_from_slice(data);
            }
        }
        self.stats.hits += nfrags as u64;
        true
    }

    /// 用一段连续片段的内容填充（或覆盖）缓存
    pub fn fill_range(&mut self, daddr: Daddr, buf: &[u8]) {
        for (i, chunk) in buf.chunks(self.fsize).enumerate() {
            self.cache.put(daddr + i as Daddr, chunk.to_vec());
        }
    }

    /// 使单个片段失效
    pub fn invalidate(&mut self, daddr: Daddr) -> bool {
        let hit = self.cache.pop(&daddr).is_some();
        if hit {
            self.stats.invalidations += 1;
        }
        hit
    }

    /// 使一段连续片段失效
    ///
    /// # 返回
    ///
    /// 实际失效的片段数
    pub fn invalidate_range(&mut self, from: Daddr, count: u64) -> usize {
        // 范围远大于缓存时遍历缓存键，避免逐地址查找
        if count as usize > self.cache.len() {
            let end = from + count as Daddr;
            let victims: Vec<Daddr> = self
                .cache
                .iter()
                .map(|(k, _)| *k)
                .filter(|k| *k >= from && *k < end)
                .collect();
            for k in &victims {
                self.cache.pop(k);
            }
            self.stats.invalidations += victims.len() as u64;
            log::debug!("[CACHE] invalidated {} frags in [{:#x}, {:#x})", victims.len(), from, end);
            return victims.len();
        }

        (0..count)
            .filter(|i| self.invalidate(from + *i as Daddr))
            .count()
    }
}
