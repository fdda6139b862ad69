// 数据区的簇读写, 簇号到扇区号的转换. 不做缓存, 每次都直接访问块设备
use super::{BlockDevice, Geometry};
use crate::config::SECTOR_SIZE;
use crate::error::IOError;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use log::trace;

pub struct DataManager {
    geometry: Arc<Geometry>,
    block_device: Arc<dyn BlockDevice>,
    cluster_bound: u32,
}

impl DataManager {
    pub(crate) fn new(geometry: Arc<Geometry>, block_device: Arc<dyn BlockDevice>) -> Self {
        let cluster_bound = geometry.cluster_bound(block_device.num_blocks());
        Self {
            geometry,
            block_device,
            cluster_bound,
        }
    }
    /// 簇号来自磁盘上的目录项和 FAT, 访问前检查 2 <= cluster_id < cluster_bound
    fn cluster_lba(&self, cluster_id: u32) -> Result<u32, IOError> {
        match self.geometry.cluster_to_lba(cluster_id) {
            Some(lba) if cluster_id < self.cluster_bound => Ok(lba),
            lba => Err(IOError::OutOfRange {
                lba: lba.unwrap_or(u32::MAX),
            }),
        }
    }
    pub fn cluster_size(&self) -> usize {
        self.geometry.cluster_size
    }
    /// 大小为一个簇的空缓冲区
    pub fn cluster_buffer(&self) -> Vec<u8> {
        vec![0; self.cluster_size()]
    }
    /// 逐扇区读, 任何一个扇区失败整个簇就失败. buf 长度必须不小于簇大小
    pub fn read_cluster(&self, cluster_id: u32, buf: &mut [u8]) -> Result<(), IOError> {
        let lba = self.cluster_lba(cluster_id)?;
        trace!("read cluster {} (lba {})", cluster_id, lba);
        for (i, sector) in buf[..self.cluster_size()]
            .chunks_exact_mut(SECTOR_SIZE)
            .enumerate()
        {
            self.block_device.read_block(lba + i as u32, sector)?;
        }
        Ok(())
    }
    pub fn write_cluster(&self, cluster_id: u32, buf: &[u8]) -> Result<(), IOError> {
        let lba = self.cluster_lba(cluster_id)?;
        trace!("write cluster {} (lba {})", cluster_id, lba);
        for (i, sector) in buf[..self.cluster_size()]
            .chunks_exact(SECTOR_SIZE)
            .enumerate()
        {
            self.block_device.write_block(lba + i as u32, sector)?;
        }
        Ok(())
    }
    pub fn clear_cluster(&self, cluster_id: u32) -> Result<(), IOError> {
        let zero = self.cluster_buffer();
        self.write_cluster(cluster_id, &zero)
    }
}
