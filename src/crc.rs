//! CRC32 校验和计算
//!
//! 为 superblock、段摘要和 ifile 镜像提供校验和

use crc32fast::Hasher;

/// 计算校验和（一次性计算）
///
/// # 参数
/// * `data` - 要计算校验和的数据
///
/// # 返回
/// CRC32 值
#[inline]
pub fn lfs_cksum(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// 计算校验和（追加模式）
///
/// 段摘要的数据校验和需要跨越多个块，逐块追加。
#[inline]
pub fn lfs_cksum_append(crc: u32, data: &[u8]) -> u32 {
    let mut hasher = Hasher::new_with_initial(crc);
    hasher.update(data);
    hasher.finalize()
}
