// FAT 表结构体
use super::{BlockDevice, Geometry, START_CLUS_ID};
use crate::config::SECTOR_SIZE;
use crate::error::IOError;
use alloc::sync::Arc;
use log::{debug, trace};

const BYTES_PER_ENTRY: usize = 4;
const ENTRY_MASK: u32 = 0x0FFF_FFFF;
const RESERVED_BITS: u32 = 0xF000_0000;
const BAD_CLUSTER: u32 = 0x0FFF_FFF7;
const FINAL_CLUSTER: u32 = 0x0FFF_FFFF;
/// 不小于这个值的表项都是簇链结尾
pub const END_OF_CHAIN: u32 = 0x0FFF_FFF8;

/// The high 4 bits of a FAT32 FAT entry are reserved.
/// No FAT32 volume should ever be configured containing cluster numbers available for
/// allocation >= 0xFFFFFF7.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum FATEntry {
    Bad,
    Free,
    End,
    Next(u32),
}

impl FATEntry {
    pub fn from_raw(raw: u32) -> Self {
        match raw & ENTRY_MASK {
            0 => FATEntry::Free,
            BAD_CLUSTER => FATEntry::Bad,
            END_OF_CHAIN..=FINAL_CLUSTER => FATEntry::End,
            // 0 号和 1 号簇是保留簇, 指向它们的链是坏的
            n if (n as usize) < START_CLUS_ID => FATEntry::Bad,
            n => FATEntry::Next(n),
        }
    }
    pub fn raw(self) -> u32 {
        match self {
            FATEntry::Free => 0,
            FATEntry::Bad => BAD_CLUSTER,
            FATEntry::End => FINAL_CLUSTER,
            FATEntry::Next(n) => n & ENTRY_MASK,
        }
    }
}

/// 管理 FAT 表. 没有表项缓存, 每次读写都重新读一整个扇区
pub struct FATManager {
    geometry: Arc<Geometry>,
    block_device: Arc<dyn BlockDevice>,
    cluster_bound: u32,
}

impl FATManager {
    pub(crate) fn new(geometry: Arc<Geometry>, block_device: Arc<dyn BlockDevice>) -> Self {
        let cluster_bound = geometry.cluster_bound(block_device.num_blocks());
        Self {
            geometry,
            block_device,
            cluster_bound,
        }
    }
    /// 是否是数据区里能用的簇号
    pub fn is_data_cluster(&self, cluster_id: u32) -> bool {
        (START_CLUS_ID as u32..self.cluster_bound).contains(&cluster_id)
    }
    fn entrys_per_sector(&self) -> usize {
        SECTOR_SIZE / BYTES_PER_ENTRY
    }
    /// 表项在某一份 FAT 中的扇区号和扇区内偏移
    fn position(&self, copy: u32, cluster_id: u32) -> Result<(u32, usize), IOError> {
        let sector_in_fat = cluster_id / self.entrys_per_sector() as u32;
        let fat_start = self.geometry.fat_start_lba + copy * self.geometry.fat_size_32;
        if sector_in_fat >= self.geometry.fat_size_32 {
            return Err(IOError::OutOfRange {
                lba: fat_start + sector_in_fat,
            });
        }
        let offset = BYTES_PER_ENTRY * (cluster_id as usize % self.entrys_per_sector());
        Ok((fat_start + sector_in_fat, offset))
    }
    fn read_raw(sector: &[u8], offset: usize) -> u32 {
        let mut bytes = [0u8; BYTES_PER_ENTRY];
        bytes.copy_from_slice(&sector[offset..offset + BYTES_PER_ENTRY]);
        u32::from_le_bytes(bytes)
    }
    /// 读第一份 FAT 中的表项
    pub fn entry(&self, cluster_id: u32) -> Result<FATEntry, IOError> {
        let (sector_id, offset) = self.position(0, cluster_id)?;
        let mut sector = [0u8; SECTOR_SIZE];
        self.block_device.read_block(sector_id, &mut sector)?;
        Ok(FATEntry::from_raw(Self::read_raw(&sector, offset)))
    }
    /// 读-改-写所在扇区, 所有 FAT 副本都写, 保留原表项的高 4 位
    pub fn set_entry(&self, cluster_id: u32, entry: FATEntry) -> Result<(), IOError> {
        trace!("FAT[{}] <- {:?}", cluster_id, entry);
        let mut sector = [0u8; SECTOR_SIZE];
        for copy in 0..self.geometry.num_fats {
            let (sector_id, offset) = self.position(copy, cluster_id)?;
            self.block_device.read_block(sector_id, &mut sector)?;
            let old_reserved_bits = Self::read_raw(&sector, offset) & RESERVED_BITS;
            let value = entry.raw() | old_reserved_bits;
            sector[offset..offset + BYTES_PER_ENTRY].copy_from_slice(&value.to_le_bytes());
            self.block_device.write_block(sector_id, &sector)?;
        }
        Ok(())
    }
    pub fn next_cluster(&self, cluster_id: u32) -> Result<Option<u32>, IOError> {
        match self.entry(cluster_id)? {
            FATEntry::Next(n) => Ok(Some(n)),
            _ => Ok(None),
        }
    }
    pub fn set_next_cluster(&self, cluster_id: u32, next_cluster: u32) -> Result<(), IOError> {
        self.set_entry(cluster_id, FATEntry::Next(next_cluster))
    }
    pub fn set_end(&self, cluster_id: u32) -> Result<(), IOError> {
        self.set_entry(cluster_id, FATEntry::End)
    }
    /// 返回簇链中第 index 个簇, 链不够长返回 None
    pub fn search_cluster(
        &self,
        chain_start_cluster: u32,
        index: usize,
    ) -> Result<Option<u32>, IOError> {
        let mut curr_cluster = chain_start_cluster;
        for _ in 0..index {
            match self.next_cluster(curr_cluster)? {
                Some(next_cluster) => curr_cluster = next_cluster,
                None => return Ok(None),
            }
        }
        Ok(Some(curr_cluster))
    }
    /// 从 2 号簇开始线性搜索第一个空闲簇, 只在跨扇区时才重新读 FAT.
    /// 返回 None 代表没有空闲簇了
    pub fn search_free_cluster(&self) -> Result<Option<u32>, IOError> {
        let mut sector = [0u8; SECTOR_SIZE];
        let mut loaded: Option<u32> = None;
        for cluster_id in START_CLUS_ID as u32..self.cluster_bound {
            let (sector_id, offset) = self.position(0, cluster_id)?;
            if loaded != Some(sector_id) {
                self.block_device.read_block(sector_id, &mut sector)?;
                loaded = Some(sector_id);
            }
            if FATEntry::from_raw(Self::read_raw(&sector, offset)) == FATEntry::Free {
                return Ok(Some(cluster_id));
            }
        }
        Ok(None)
    }
    /// 分配一个空闲簇并标记为链尾, 有 prev 就把它链到 prev 后面.
    /// 只返回簇号, 不对簇清零
    pub fn alloc_cluster(&self, prev: Option<u32>) -> Result<Option<u32>, IOError> {
        let free_id = match self.search_free_cluster()? {
            Some(id) => id,
            None => {
                debug!("no free cluster below {}", self.cluster_bound);
                return Ok(None);
            }
        };
        self.set_end(free_id)?;
        if let Some(prev) = prev {
            self.set_next_cluster(prev, free_id)?;
        }
        debug!("allocated cluster {} after {:?}", free_id, prev);
        Ok(Some(free_id))
    }
    pub fn chain(&self, start_cluster: u32) -> ClusterChain<'_> {
        ClusterChain {
            fat: self,
            current: Some(start_cluster),
            started: false,
            remaining: self.cluster_bound,
        }
    }
}

/// 沿着簇链走的迭代器, 调用方要下一个簇时才去查 FAT.
/// 最多走 cluster_bound 步, 成环的坏链也能停下来
pub struct ClusterChain<'a> {
    fat: &'a FATManager,
    current: Option<u32>,
    started: bool,
    remaining: u32,
}

impl Iterator for ClusterChain<'_> {
    type Item = Result<u32, IOError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let cluster = if self.started {
            match self.fat.next_cluster(self.current?) {
                Ok(Some(next)) => next,
                Ok(None) => {
                    self.current = None;
                    return None;
                }
                Err(e) => {
                    self.current = None;
                    return Some(Err(e));
                }
            }
        } else {
            self.started = true;
            self.current?
        };
        self.current = Some(cluster);
        self.remaining -= 1;
        Some(Ok(cluster))
    }
}
