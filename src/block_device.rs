// 块设备抽象, 以 512 字节扇区为单位读写
use crate::config::SECTOR_SIZE;
use crate::error::IOError;
use alloc::vec;
use alloc::vec::Vec;
use spin::Mutex;

/// 扇区级块设备, 读写都是同步的, 超时重试由实现者自己处理.
/// buf 的长度为一个扇区, 失败时本层不会重试.
pub trait BlockDevice: Send + Sync {
    fn read_block(&self, block_id: u32, buf: &mut [u8]) -> Result<(), IOError>;
    fn write_block(&self, block_id: u32, buf: &[u8]) -> Result<(), IOError>;
    fn is_present(&self) -> bool {
        true
    }
    /// 设备不在位时挂载前会调用一次
    fn init(&self) -> Result<(), IOError> {
        Ok(())
    }
    /// 设备扇区总数, 不知道就返回 None
    fn num_blocks(&self) -> Option<u32> {
        None
    }
}

struct MemoryDisk {
    data: Vec<u8>,
    present: bool,
    failing_reads: Vec<u32>,
    failing_writes: Vec<u32>,
}

/// 内存盘, 可以注入指定扇区的读写错误
pub struct MemoryBlockDevice {
    disk: Mutex<MemoryDisk>,
}

impl MemoryBlockDevice {
    pub fn new(num_blocks: usize) -> Self {
        Self::from_image(vec![0; num_blocks * SECTOR_SIZE])
    }
    /// 镜像长度不足整扇区时补零
    pub fn from_image(mut data: Vec<u8>) -> Self {
        let rem = data.len() % SECTOR_SIZE;
        if rem != 0 {
            data.resize(data.len() + SECTOR_SIZE - rem, 0);
        }
        Self {
            disk: Mutex::new(MemoryDisk {
                present: !data.is_empty(),
                data,
                failing_reads: Vec::new(),
                failing_writes: Vec::new(),
            }),
        }
    }
    pub fn image(&self) -> Vec<u8> {
        self.disk.lock().data.clone()
    }
    pub fn set_present(&self, present: bool) {
        self.disk.lock().present = present;
    }
    pub fn fail_reads_at(&self, block_id: u32) {
        self.disk.lock().failing_reads.push(block_id);
    }
    pub fn fail_writes_at(&self, block_id: u32) {
        self.disk.lock().failing_writes.push(block_id);
    }
    pub fn clear_faults(&self) {
        let mut disk = self.disk.lock();
        disk.failing_reads.clear();
        disk.failing_writes.clear();
    }
}

impl MemoryDisk {
    fn range(&self, block_id: u32) -> Result<core::ops::Range<usize>, IOError> {
        let start = block_id as usize * SECTOR_SIZE;
        if !self.present {
            return Err(IOError::NotReady);
        }
        if start + SECTOR_SIZE > self.data.len() {
            return Err(IOError::OutOfRange { lba: block_id });
        }
        Ok(start..start + SECTOR_SIZE)
    }
}

impl BlockDevice for MemoryBlockDevice {
    fn read_block(&self, block_id: u32, buf: &mut [u8]) -> Result<(), IOError> {
        let disk = self.disk.lock();
        if disk.failing_reads.contains(&block_id) {
            return Err(IOError::ReadFailed { lba: block_id });
        }
        let range = disk.range(block_id)?;
        buf[..SECTOR_SIZE].copy_from_slice(&disk.data[range]);
        Ok(())
    }
    fn write_block(&self, block_id: u32, buf: &[u8]) -> Result<(), IOError> {
        let mut disk = self.disk.lock();
        if disk.failing_writes.contains(&block_id) {
            return Err(IOError::WriteFailed { lba: block_id });
        }
        let range = disk.range(block_id)?;
        disk.data[range].copy_from_slice(&buf[..SECTOR_SIZE]);
        Ok(())
    }
    fn is_present(&self) -> bool {
        self.disk.lock().present
    }
    fn init(&self) -> Result<(), IOError> {
        let mut disk = self.disk.lock();
        if disk.data.is_empty() {
            return Err(IOError::NotReady);
        }
        disk.present = true;
        Ok(())
    }
    fn num_blocks(&self) -> Option<u32> {
        Some((self.disk.lock().data.len() / SECTOR_SIZE) as u32)
    }
}

/// 用镜像文件模拟块设备
#[cfg(feature = "std")]
pub struct FileBlockDevice {
    file: Mutex<std::fs::File>,
}

#[cfg(feature = "std")]
impl FileBlockDevice {
    pub fn open<P: AsRef<std::path::Path>>(path: P) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

#[cfg(feature = "std")]
impl BlockDevice for FileBlockDevice {
    fn read_block(&self, block_id: u32, buf: &mut [u8]) -> Result<(), IOError> {
        use std::io::{Read, Seek, SeekFrom};
        let mut file = self.file.lock();
        let pos = block_id as u64 * SECTOR_SIZE as u64;
        file.seek(SeekFrom::Start(pos))
            .map_err(|_| IOError::OutOfRange { lba: block_id })?;
        file.read_exact(&mut buf[..SECTOR_SIZE])
            .map_err(|_| IOError::ReadFailed { lba: block_id })
    }
    fn write_block(&self, block_id: u32, buf: &[u8]) -> Result<(), IOError> {
        use std::io::{Seek, SeekFrom, Write};
        let mut file = self.file.lock();
        let pos = block_id as u64 * SECTOR_SIZE as u64;
        file.seek(SeekFrom::Start(pos))
            .map_err(|_| IOError::OutOfRange { lba: block_id })?;
        file.write_all(&buf[..SECTOR_SIZE])
            .map_err(|_| IOError::WriteFailed { lba: block_id })
    }
    fn num_blocks(&self) -> Option<u32> {
        let len = self.file.lock().metadata().ok()?.len();
        u32::try_from(len / SECTOR_SIZE as u64).ok()
    }
}
