//! 文件操作：创建、删除、读写
//!
//! 写入只修改脏缓冲区（新块挂占位指针），数据在 `fsync`、检查点或截断时
//! 才进入日志。

use super::filesystem::{Lfs, Vnode};
use super::types::{LfsHal, TruncFlags};
use crate::balloc::SegDeltas;
use crate::block::BlockDevice;
use crate::consts::*;
use crate::error::{Error, ErrorKind, Result};
use crate::inode::{Inode, InodeFlags};
use crate::segment::SegmFlags;
use crate::types::{Ino, Lbn};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

impl<D: BlockDevice, H: LfsHal> Lfs<D, H> {
    /// 创建一个新 inode
    ///
    /// inode 在第一次写入日志之前只存在于 vnode 表中。
    ///
    /// # 错误
    ///
    /// - `ErrorKind::NoSpace` - 没有空闲 inode
    pub fn create(&self, mode: u16) -> Result<Ino> {
        let (ino, version) = self.ifile.write().alloc_ino()?;
        let mut ip = Inode::new(ino, version, mode);
        ip.mtime = Self::now_secs();
        let vp: Vnode = Arc::new(spin::Mutex::new(ip));
        self.vnodes.lock().insert(ino, vp);
        log::debug!("[VGET] created ino {} version {} mode {:o}", ino, version, mode);
        Ok(ino)
    }

    /// 删除 inode：释放全部块，版本号递增，inode 号回到空闲链表
    ///
    /// 递增后的版本号让清理器手中关于这个 inode 的描述符全部失效。
    ///
    /// # 错误
    ///
    /// - `ErrorKind::InvalidInput` - 保留 inode
    pub fn remove(&self, ino: Ino) -> Result<()> {
        if ino < LFS_FIRST_INUM {
            return Err(Error::new(ErrorKind::InvalidInput, "cannot remove reserved inode"));
        }
        self.truncate(ino, 0, TruncFlags::empty())?;

        let vp = self.vget(ino)?;
        let mut ip = vp.lock();
        {
            let seg = self.seglock.lock(SegmFlags::empty());
            let mut ifile = self.ifile.write();
            let old = ifile.free_ino(ino)?;
            let mut deltas = SegDeltas::new();
            deltas.free(&self.geom, old, self.geom.fsize as u64);
            deltas.finalize(&seg, &mut ifile);
        }
        ip.flags |= InodeFlags::DELETED;
        ip.flags -= InodeFlags::MODIFIED | InodeFlags::CLEANING;
        ip.dirty.clear();
        ip.nlink = 0;
        drop(ip);
        self.vdrop(ino);
        log::debug!("[VGET] removed ino {}", ino);
        Ok(())
    }

    /// 取得逻辑块的当前内容
    ///
    /// 脏缓冲区优先，否则从磁盘读取 `blksize(ip.size, lbn)` 字节；空洞返回 `None`。
    pub(crate) fn load_block(&self, ip: &Inode, lbn: Lbn) -> Result<Option<Vec<u8>>> {
        if let Some(buf) = ip.dirty_block(lbn) {
            return Ok(Some(buf.to_vec()));
        }
        let mut dev = self.dev.lock();
        let daddr = self.mapper.bmap(&mut *dev, ip, lbn)?;
        if daddr == LFS_UNUSED_DADDR {
            return Ok(None);
        }
        if daddr < 0 {
            log::error!("[VGET] ino {} lbn {} placeholder without buffer", ip.ino, lbn);
            return Err(Error::new(ErrorKind::Corrupted, "placeholder pointer without buffer"));
        }
        let size = self.geom.blksize(ip.size, lbn) as usize;
        let mut buf = vec![0u8; size];
        dev.read_frags(daddr, &mut buf)?;
        Ok(Some(buf))
    }

    /// 读取文件内容
    ///
    /// # 返回
    ///
    /// 实际读取的字节数；`off` 在 EOF 之后时为 0
    pub fn read(&self, ino: Ino, off: u64, buf: &mut [u8]) -> Result<usize> {
        let vp = self.vget(ino)?;
        let ip = vp.lock();
        if off >= ip.size {
            return Ok(0);
        }
        let end = (off + buf.len() as u64).min(ip.size);
        let g = &self.geom;
        let mut pos = off;
        while pos < end {
            let lbn = g.lblkno(pos);
            let boff = g.blkoff(pos) as usize;
            let n = (g.bsize as usize - boff).min((end - pos) as usize);
            let dst = &mut buf[(pos - off) as usize..(pos - off) as usize + n];
            match self.load_block(&ip, lbn)? {
                Some(block) => {
                    let avail = block.len().saturating_sub(boff).min(n);
                    dst[..avail].copy_from_slice(&block[boff..boff + avail]);
                    dst[avail..].fill(0);
                }
                None => dst.fill(0),
            }
            pos += n as u64;
        }
        Ok((end - off) as usize)
    }

    /// 写入文件内容
    ///
    /// 超过 EOF 时文件变长；原来的尾部片段不再是最后一块时先扩展成整块。
    ///
    /// # 错误
    ///
    /// - `ErrorKind::InvalidInput` - 超过最大文件大小
    /// - `ErrorKind::NoSpace` - 空闲片段不足（已写入的部分保留）
    pub fn write(&self, ino: Ino, off: u64, data: &[u8]) -> Result<usize> {
        let g = self.geom;
        let end = off + data.len() as u64;
        if end > g.maxfilesize() {
            return Err(Error::new(ErrorKind::InvalidInput, "file too large"));
        }
        let vp = self.vget(ino)?;
        let mut ip = vp.lock();
        if end > ip.size {
            let osize = ip.size;
            self.extend_tail(&mut ip, osize, end, 0)?;
        }

        let mut pos = off;
        while pos < end {
            let lbn = g.lblkno(pos);
            let boff = g.blkoff(pos) as usize;
            let n = (g.bsize as usize - boff).min((end - pos) as usize);
            let size = ip.size.max(pos + n as u64);
            self.balloc(&mut ip, lbn, g.blksize(size, lbn), 0)?;
            let src = &data[(pos - off) as usize..(pos - off) as usize + n];
            let Some(block) = ip.dirty.get_mut(&lbn) else {
                return Err(Error::new(ErrorKind::InvalidState, "allocated block has no buffer"));
            };
            block[boff..boff + n].copy_from_slice(src);
            if pos + n as u64 > ip.size {
                ip.size = pos + n as u64;
            }
            pos += n as u64;
        }
        ip.mtime = Self::now_secs();
        ip.flags |= InodeFlags::MODIFIED;
        Ok(data.len())
    }

    /// 文件从 `osize` 增长到 `nsize` 之前，把不再是最后一块的尾部片段扩展成整块
    pub(crate) fn extend_tail(&self, ip: &mut Inode, osize: u64, nsize: u64, held: i64) -> Result<()> {
        let g = &self.geom;
        let olbn = g.lblkno(osize);
        if olbn < NDADDR as Lbn && olbn != g.lblkno(nsize) && g.blkroundup(osize) != osize {
            log::trace!("[TRUNC] ino {} tail block {} extended to full block", ip.ino, olbn);
            self.balloc(ip, olbn, g.bsize, held)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;

    #[test]
    fn test_write_read_across_blocks() {
        let (fs, _dev) = new_fs(&small_opts());
        let ino = fs.create(S_IFREG | 0o644).unwrap();
        let data = pattern(4000, 7);
        assert_eq!(fs.write(ino, 100, &data).unwrap(), 4000);
        assert_eq!(fs.stat(ino).unwrap().size, 4100);

        let mut buf = vec![0xffu8; 4100];
        assert_eq!(fs.read(ino, 0, &mut buf).unwrap(), 4100);
        assert!(buf[..100].iter().all(|&b| b == 0));
        assert_eq!(&buf[100..], &data[..]);

        fs.fsync(ino).unwrap();
        let mut again = vec![0u8; 4100];
        fs.read(ino, 0, &mut again).unwrap();
        assert_eq!(again, buf);
    }

    #[test]
    fn test_tail_fragment_grows_when_file_extends() {
        let (fs, _dev) = new_fs(&small_opts());
        let ino = fs.create(S_IFREG | 0o644).unwrap();
        fs.write(ino, 0, &pattern(300, 1)).unwrap();
        fs.fsync(ino).unwrap();
        assert_eq!(fs.stat(ino).unwrap().blocks, 1);

        // 写到第 2 块：块 0 必须成为整块
        fs.write(ino, 2048, &pattern(10, 2)).unwrap();
        let st = fs.stat(ino).unwrap();
        assert_eq!(st.effnblks, 2 + 1);
        fs.fsync(ino).unwrap();
        let st = fs.stat(ino).unwrap();
        assert_eq!(st.blocks, 3);
        assert_eq!(st.effnblks, 3);

        let mut buf = vec![0u8; 300];
        fs.read(ino, 0, &mut buf).unwrap();
        assert_eq!(buf, pattern(300, 1));
    }

    #[test]
    fn test_remove_bumps_version() {
        let (fs, _dev) = new_fs(&small_opts());
        let ino = fs.create(S_IFREG | 0o644).unwrap();
        fs.write(ino, 0, &pattern(2048, 1)).unwrap();
        fs.fsync(ino).unwrap();
        let v = fs.stat(ino).unwrap().version;
        let bfree = fs.statfs().bfree;

        fs.remove(ino).unwrap();
        assert_eq!(fs.vget(ino).err().unwrap().kind(), ErrorKind::NotFound);
        assert_eq!(fs.ifile_snapshot().ientry(ino).unwrap().version, v + 1);
        // 截断后 inode 重写一次：摘要与 inode 各占一个片段
        assert_eq!(fs.statfs().bfree, bfree + 4 - 2);
        assert_eq!(fs.remove(LFS_ROOT_INUM).unwrap_err().kind(), ErrorKind::InvalidInput);
    }
}
