// 测试用的 FAT32 镜像构造工具, 直接按字节布局写, 不经过被测代码
#![allow(dead_code)]

use icefat::{Fat32FileSystem, MemoryBlockDevice};
use std::sync::Arc;

pub const BLOCK_SZ: usize = 512;
pub const RESERVED: u32 = 32;
pub const NUM_FATS: u32 = 2;
pub const EOC: u32 = 0x0FFF_FFFF;
pub const ATTR_DIRECTORY: u8 = 0x10;
pub const ATTR_ARCHIVE: u8 = 0x20;
pub const ATTR_LONG_NAME: u8 = 0x0F;

pub struct ImageBuilder {
    spc: u32,
    fat_size: u32,
    root_chain: Vec<u32>,
    root_used: usize,
    next_free: u32,
    img: Vec<u8>,
}

impl ImageBuilder {
    pub fn new(sectors_per_cluster: u8, data_clusters: u32) -> Self {
        Self::with_root_clusters(sectors_per_cluster, data_clusters, 1)
    }

    pub fn with_root_clusters(sectors_per_cluster: u8, data_clusters: u32, root_clusters: u32) -> Self {
        let spc = sectors_per_cluster as u32;
        let fat_size = ((data_clusters + 2) * 4 + BLOCK_SZ as u32 - 1) / BLOCK_SZ as u32;
        let total = RESERVED + NUM_FATS * fat_size + data_clusters * spc;
        let mut builder = Self {
            spc,
            fat_size,
            root_chain: (2..2 + root_clusters).collect(),
            root_used: 0,
            next_free: 2 + root_clusters,
            img: vec![0; total as usize * BLOCK_SZ],
        };
        builder.write_boot_sector(total);
        builder.set_fat(0, 0x0FFF_FFF8);
        builder.set_fat(1, EOC);
        let chain = builder.root_chain.clone();
        builder.link(&chain);
        builder
    }

    fn write_boot_sector(&mut self, total: u32) {
        let s = &mut self.img[..BLOCK_SZ];
        s[0..3].copy_from_slice(&[0xEB, 0x58, 0x90]);
        s[3..11].copy_from_slice(b"MSWIN4.1");
        s[11..13].copy_from_slice(&(BLOCK_SZ as u16).to_le_bytes());
        s[13] = self.spc as u8;
        s[14..16].copy_from_slice(&(RESERVED as u16).to_le_bytes());
        s[16] = NUM_FATS as u8;
        s[21] = 0xF8;
        s[32..36].copy_from_slice(&total.to_le_bytes());
        s[36..40].copy_from_slice(&self.fat_size.to_le_bytes());
        s[44..48].copy_from_slice(&2u32.to_le_bytes());
        s[48..50].copy_from_slice(&1u16.to_le_bytes());
        s[50..52].copy_from_slice(&6u16.to_le_bytes());
        s[66] = 0x29;
        s[71..82].copy_from_slice(b"ICE        ");
        s[82..90].copy_from_slice(b"FAT32   ");
        s[510] = 0x55;
        s[511] = 0xAA;
    }

    pub fn cluster_size(&self) -> usize {
        self.spc as usize * BLOCK_SZ
    }

    pub fn set_fat(&mut self, cluster: u32, value: u32) {
        for copy in 0..NUM_FATS {
            let off = ((RESERVED + copy * self.fat_size) as usize) * BLOCK_SZ + cluster as usize * 4;
            self.img[off..off + 4].copy_from_slice(&value.to_le_bytes());
        }
    }

    fn link(&mut self, chain: &[u32]) {
        for pair in chain.windows(2) {
            self.set_fat(pair[0], pair[1]);
        }
        if let Some(&last) = chain.last() {
            self.set_fat(last, EOC);
        }
    }

    pub fn cluster_offset(&self, cluster: u32) -> usize {
        let data_start = (RESERVED + NUM_FATS * self.fat_size) as usize * BLOCK_SZ;
        data_start + (cluster as usize - 2) * self.cluster_size()
    }

    /// 分配连续的簇存放 contents, 至少一个簇
    pub fn alloc_chain(&mut self, contents: &[u8]) -> u32 {
        let cs = self.cluster_size();
        let n = ((contents.len() + cs - 1) / cs).max(1) as u32;
        let chain: Vec<u32> = (self.next_free..self.next_free + n).collect();
        self.next_free += n;
        self.link(&chain);
        let off = self.cluster_offset(chain[0]);
        self.img[off..off + contents.len()].copy_from_slice(contents);
        chain[0]
    }

    /// 在根目录里放一个文件, 返回起始簇
    pub fn add_file(&mut self, name: &[u8; 11], contents: &[u8]) -> u32 {
        let first = self.alloc_chain(contents);
        self.add_root_entry(entry(name, ATTR_ARCHIVE, first, contents.len() as u32));
        first
    }

    /// 按顺序写根目录的下一个槽位
    pub fn add_root_entry(&mut self, raw: [u8; 32]) {
        let per_cluster = self.cluster_size() / 32;
        let cluster = self.root_chain[self.root_used / per_cluster];
        let off = self.cluster_offset(cluster) + (self.root_used % per_cluster) * 32;
        self.img[off..off + 32].copy_from_slice(&raw);
        self.root_used += 1;
    }

    pub fn build(self) -> Vec<u8> {
        self.img
    }
}

pub fn entry(name: &[u8; 11], attr: u8, cluster: u32, size: u32) -> [u8; 32] {
    let mut raw = [0u8; 32];
    raw[..11].copy_from_slice(name);
    raw[11] = attr;
    raw[20..22].copy_from_slice(&((cluster >> 16) as u16).to_le_bytes());
    raw[26..28].copy_from_slice(&(cluster as u16).to_le_bytes());
    raw[28..32].copy_from_slice(&size.to_le_bytes());
    raw
}

fn u16_at(img: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([img[off], img[off + 1]])
}

fn u32_at(img: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([img[off], img[off + 1], img[off + 2], img[off + 3]])
}

/// 按镜像自己的 BPB 读 FAT 表项(原始 32 位值)
pub fn read_fat(img: &[u8], copy: u32, cluster: u32) -> u32 {
    let reserved = u16_at(img, 14) as u32;
    let fat_size = u32_at(img, 36);
    let off = ((reserved + copy * fat_size) as usize) * BLOCK_SZ + cluster as usize * 4;
    u32_at(img, off)
}

pub fn cluster_bytes(img: &[u8], cluster: u32) -> &[u8] {
    let spc = img[13] as usize;
    let reserved = u16_at(img, 14) as usize;
    let num_fats = img[16] as usize;
    let fat_size = u32_at(img, 36) as usize;
    let cs = spc * BLOCK_SZ;
    let off = (reserved + num_fats * fat_size) * BLOCK_SZ + (cluster as usize - 2) * cs;
    &img[off..off + cs]
}

/// 簇的第一个扇区号
pub fn cluster_lba(img: &[u8], cluster: u32) -> u32 {
    let spc = img[13] as u32;
    let reserved = u16_at(img, 14) as u32;
    let num_fats = img[16] as u32;
    let fat_size = u32_at(img, 36);
    reserved + num_fats * fat_size + (cluster - 2) * spc
}

pub fn mount(img: Vec<u8>) -> (Arc<MemoryBlockDevice>, Fat32FileSystem) {
    let device = Arc::new(MemoryBlockDevice::from_image(img));
    let mut fs = Fat32FileSystem::new(device.clone());
    fs.init().expect("mount failed");
    (device, fs)
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn readme_image() -> ImageBuilder {
    let mut builder = ImageBuilder::new(1, 64);
    builder.add_file(b"README  TXT", b"hello ICE!");
    builder
}
