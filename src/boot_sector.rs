// 对 DBR 的抽象, 挂载时解析一次 BPB, 得到文件系统的几何信息
use crate::config::{MAX_CLUS_SZ, SECTOR_SIZE};
use crate::error::MountError;
use crate::START_CLUS_ID;
use log::error;

const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];
const FAT_ENTRY_SZ: u32 = 4;

// BPB 79 Byte
#[repr(C, packed(1))]
#[derive(Debug, Default, Copy, Clone)]
pub struct BiosParameterBlock {
    bytes_per_sector: u16,
    sectors_per_cluster: u8,
    reserved_sectors: u16,
    fats_number: u8,         // FAT 表数,正常的为1或2
    root_entries: u16,       // 根目录的目录项数, FAT32 一直设为0
    total_sectors_16: u16,   // FAT32 固定为0
    media: u8,               // 存储介质类型
    sectors_per_fat_16: u16, // FAT32 固定为0
    sectors_per_track: u16,
    heads: u16,          // 磁头数
    hidden_sectors: u32, // 文件系统前的隐藏扇区数, 本驱动不解析分区表, 忽略
    total_sectors_32: u32,
    // Extended BIOS Parameter Block
    fats_sectors: u32,
    extended_flags: u16,
    fs_version: u16,
    root_dir_cluster: u32,
    fsinfo_sector_number: u16,
    backup_boot_sector: u16,
    dummy2: [u8; 15], // 不关心的数据
    volumn_id: u32,
    volume_label: [u8; 11], // 卷名, 11bytes
    fs_type_label: [u8; 8], // 文件系统类型名
}

impl BiosParameterBlock {
    pub fn bytes_per_sector(&self) -> u16 {
        self.bytes_per_sector
    }
    pub fn sectors_per_cluster(&self) -> u8 {
        self.sectors_per_cluster
    }
    pub fn reserved_sectors(&self) -> u16 {
        self.reserved_sectors
    }
    pub fn fats_number(&self) -> u8 {
        self.fats_number
    }
    pub fn fats_sectors(&self) -> u32 {
        self.fats_sectors
    }
    pub fn root_dir_cluster(&self) -> u32 {
        self.root_dir_cluster
    }
    pub fn total_sectors_32(&self) -> u32 {
        self.total_sectors_32
    }
    pub fn volume_label(&self) -> [u8; 11] {
        self.volume_label
    }
    fn validate_bytes_per_sector(&self) -> Result<(), MountError> {
        let bytes_per_sector = self.bytes_per_sector;
        if usize::from(bytes_per_sector) != SECTOR_SIZE {
            error!("FAT32: Unsupported sector size {}", bytes_per_sector);
            return Err(MountError::UnsupportedSectorSize(bytes_per_sector));
        }
        Ok(())
    }
    // 簇的扇区数只支持二的整指数倍, 簇大小不超过 MAX_CLUS_SZ
    fn validate_sectors_per_cluster(&self) -> Result<(), MountError> {
        if !self.sectors_per_cluster.is_power_of_two() {
            error!(
                "invalid sectors_per_cluster value in BPB: expected a power of two but got {}",
                self.sectors_per_cluster
            );
            return Err(MountError::CorruptedFileSystem);
        }
        let bytes_per_cluster = usize::from(self.sectors_per_cluster) * SECTOR_SIZE;
        if bytes_per_cluster > MAX_CLUS_SZ {
            error!(
                "invalid bytes_per_cluster value in BPB: expected value not larger than {} but got {}",
                MAX_CLUS_SZ, bytes_per_cluster
            );
            return Err(MountError::CorruptedFileSystem);
        }
        Ok(())
    }
    fn validate_fats(&self) -> Result<(), MountError> {
        let fats_sectors = self.fats_sectors;
        if self.fats_number == 0 || fats_sectors == 0 {
            error!(
                "invalid FAT layout in BPB: {} FATs of {} sectors",
                self.fats_number, fats_sectors
            );
            return Err(MountError::CorruptedFileSystem);
        }
        Ok(())
    }
    fn validate_root_cluster(&self) -> Result<(), MountError> {
        let root = self.root_dir_cluster;
        if (root as usize) < START_CLUS_ID {
            error!("invalid root cluster in BPB: {}", root);
            return Err(MountError::CorruptedFileSystem);
        }
        Ok(())
    }
    // 0 号扇区是引导扇区, FAT 不能从 0 开始
    fn validate_reserved_sectors(&self) -> Result<(), MountError> {
        if self.reserved_sectors == 0 {
            error!("invalid reserved_sectors value in BPB: 0");
            return Err(MountError::CorruptedFileSystem);
        }
        Ok(())
    }
    /// 数据区起始扇区, 溢出返回 None
    fn first_data_sector(&self) -> Option<u32> {
        u32::from(self.fats_number)
            .checked_mul(self.fats_sectors)?
            .checked_add(u32::from(self.reserved_sectors))
    }
    fn validate_total_sectors(&self) -> Result<(), MountError> {
        let total_sectors = self.total_sectors_32;
        let first_data_sector = match self.first_data_sector() {
            Some(sector) => sector,
            None => {
                let (fats_number, fats_sectors) = (self.fats_number, self.fats_sectors);
                error!(
                    "invalid FAT layout in BPB: {} FATs of {} sectors overflow",
                    fats_number, fats_sectors
                );
                return Err(MountError::CorruptedFileSystem);
            }
        };
        if total_sectors <= first_data_sector {
            error!(
                "Invalid total_sectors value in BPB: expected value > {} but got {}",
                first_data_sector, total_sectors
            );
            return Err(MountError::CorruptedFileSystem);
        }
        Ok(())
    }
    pub(crate) fn validate(&self) -> Result<(), MountError> {
        self.validate_bytes_per_sector()?;
        self.validate_sectors_per_cluster()?;
        self.validate_reserved_sectors()?;
        self.validate_fats()?;
        self.validate_root_cluster()?;
        self.validate_total_sectors()?;
        Ok(())
    }
}

// 引导扇区, 只读不写
#[repr(C, packed(1))]
#[derive(Debug, Copy, Clone)]
pub struct BootSector {
    bootjmp: [u8; 3],
    oem_name: [u8; 8],
    bpb: BiosParameterBlock,
    boot_code: [u8; 420],
    boot_sig: [u8; 2],
}

const _: () = assert!(core::mem::size_of::<BootSector>() == SECTOR_SIZE);

impl BootSector {
    /// 从 0 号扇区的内容解析引导扇区
    pub fn from_bytes(sector: &[u8; SECTOR_SIZE]) -> Self {
        // BootSector 按 1 字节对齐, 大小正好一个扇区
        unsafe { core::ptr::read_unaligned(sector.as_ptr() as *const BootSector) }
    }
    pub fn bpb(&self) -> BiosParameterBlock {
        self.bpb
    }
    pub(crate) fn validate(&self) -> Result<(), MountError> {
        if self.boot_sig != BOOT_SIGNATURE {
            error!("FAT32: Missing boot sector signature");
            return Err(MountError::BadSignature);
        }
        self.bpb.validate()
    }
}

/// 挂载时由 BPB 推导出的几何信息, 之后不再改变
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub sectors_per_cluster: u32,
    pub num_fats: u32,
    pub fat_size_32: u32,
    pub root_cluster: u32,
    pub total_sectors_32: u32,
    pub fat_start_lba: u32,
    pub data_start_lba: u32,
    pub cluster_size: usize,
}

impl Geometry {
    pub fn from_bpb(bpb: &BiosParameterBlock) -> Self {
        let sectors_per_cluster = u32::from(bpb.sectors_per_cluster());
        let num_fats = u32::from(bpb.fats_number());
        let fat_start_lba = u32::from(bpb.reserved_sectors());
        Self {
            sectors_per_cluster,
            num_fats,
            fat_size_32: bpb.fats_sectors(),
            root_cluster: bpb.root_dir_cluster(),
            total_sectors_32: bpb.total_sectors_32(),
            fat_start_lba,
            // validate 之后不会溢出, 未校验的 BPB 也不至于 panic
            data_start_lba: bpb.first_data_sector().unwrap_or(u32::MAX),
            cluster_size: sectors_per_cluster as usize * SECTOR_SIZE,
        }
    }
    /// 簇号小于 2 或者算出的扇区号溢出时返回 None
    pub fn cluster_to_lba(&self, cluster: u32) -> Option<u32> {
        cluster
            .checked_sub(START_CLUS_ID as u32)?
            .checked_mul(self.sectors_per_cluster)?
            .checked_add(self.data_start_lba)
    }
    /// 数据区真正能容纳的簇数
    pub fn data_clusters(&self) -> u32 {
        self.total_sectors_32.saturating_sub(self.data_start_lba) / self.sectors_per_cluster.max(1)
    }
    /// 空闲簇搜索的上界(不含).
    /// total_sectors / sectors_per_cluster 没有减去保留区和 FAT 区, 所以再用数据区,
    /// FAT 表容量和设备实际大小收紧
    pub fn cluster_bound(&self, device_blocks: Option<u32>) -> u32 {
        let entries_per_sector = SECTOR_SIZE as u32 / FAT_ENTRY_SZ;
        let sectors_per_cluster = self.sectors_per_cluster.max(1);
        let mut bound = (self.total_sectors_32 / sectors_per_cluster)
            .min(self.data_clusters().saturating_add(START_CLUS_ID as u32))
            .min(self.fat_size_32.saturating_mul(entries_per_sector));
        if let Some(blocks) = device_blocks {
            let device_clusters =
                blocks.saturating_sub(self.data_start_lba) / sectors_per_cluster;
            bound = bound.min(device_clusters.saturating_add(START_CLUS_ID as u32));
        }
        bound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boot_sector(bytes_per_sector: u16, sectors_per_cluster: u8) -> [u8; SECTOR_SIZE] {
        let mut s = [0u8; SECTOR_SIZE];
        s[11..13].copy_from_slice(&bytes_per_sector.to_le_bytes());
        s[13] = sectors_per_cluster;
        s[14..16].copy_from_slice(&32u16.to_le_bytes());
        s[16] = 2;
        s[32..36].copy_from_slice(&65536u32.to_le_bytes());
        s[36..40].copy_from_slice(&512u32.to_le_bytes());
        s[44..48].copy_from_slice(&2u32.to_le_bytes());
        s[510] = 0x55;
        s[511] = 0xAA;
        s
    }

    #[test]
    fn geometry_from_bpb() {
        let bs = BootSector::from_bytes(&boot_sector(512, 8));
        assert!(bs.validate().is_ok());
        let geo = Geometry::from_bpb(&bs.bpb());
        assert_eq!(geo.fat_start_lba, 32);
        assert_eq!(geo.data_start_lba, 32 + 2 * 512);
        assert_eq!(geo.cluster_size, 4096);
        assert_eq!(geo.root_cluster, 2);
        assert_eq!(geo.cluster_to_lba(2), Some(geo.data_start_lba));
        assert_eq!(geo.cluster_to_lba(5), Some(geo.data_start_lba + 3 * 8));
        assert_eq!(geo.cluster_to_lba(1), None);
        assert_eq!(geo.cluster_to_lba(0), None);
        assert_eq!(geo.cluster_to_lba(0x0FFF_FFF0), None);
    }

    #[test]
    fn cluster_bound_is_tightened() {
        let geo = Geometry::from_bpb(&BootSector::from_bytes(&boot_sector(512, 8)).bpb());
        // 65536 / 8 = 8192, 数据区只有 (65536 - 1056) / 8 = 8060 簇
        assert_eq!(geo.cluster_bound(None), 8062);
        assert_eq!(geo.cluster_bound(Some(1056 + 80)), 12);
    }

    #[test]
    fn rejects_bad_sector_size() {
        let bs = BootSector::from_bytes(&boot_sector(4096, 8));
        assert_eq!(bs.validate(), Err(MountError::UnsupportedSectorSize(4096)));
    }

    #[test]
    fn rejects_missing_signature() {
        let mut raw = boot_sector(512, 8);
        raw[510] = 0;
        let bs = BootSector::from_bytes(&raw);
        assert_eq!(bs.validate(), Err(MountError::BadSignature));
    }

    #[test]
    fn rejects_odd_cluster_size() {
        let bs = BootSector::from_bytes(&boot_sector(512, 3));
        assert_eq!(bs.validate(), Err(MountError::CorruptedFileSystem));
    }

    #[test]
    fn rejects_overflowing_fat_layout() {
        let mut raw = boot_sector(512, 8);
        raw[16] = 255;
        raw[36..40].copy_from_slice(&0x0200_0000u32.to_le_bytes());
        let bs = BootSector::from_bytes(&raw);
        assert_eq!(bs.validate(), Err(MountError::CorruptedFileSystem));
        // 没校验就算几何信息也不会 panic
        let geo = Geometry::from_bpb(&bs.bpb());
        assert_eq!(geo.data_clusters(), 0);
    }

    #[test]
    fn rejects_zero_reserved_sectors() {
        let mut raw = boot_sector(512, 8);
        raw[14..16].copy_from_slice(&0u16.to_le_bytes());
        let bs = BootSector::from_bytes(&raw);
        assert_eq!(bs.validate(), Err(MountError::CorruptedFileSystem));
    }
}
