// 文件系统的全局管理: 挂载, 打开/关闭, 读写, 创建文件和目录, 列目录
use super::{BlockDevice, BootSector, DataManager, FATManager, Geometry};
use crate::config::{DIR_ENTRY_SIZE, SECTOR_SIZE};
use crate::dir_entry::{
    find_free_slot, DirEntries, FileAttributes, ShortDirectoryEntry, ShortName,
    DIR_ENTRY_END_FLAG,
};
use crate::error::{FSError, MountError};
use crate::path::{components, split_parent, PathResolver};
use crate::vfs::{FileHandle, Handle, HandleTable};
use crate::fat::FATEntry;
use crate::START_CLUS_ID;
use alloc::sync::Arc;
use log::{debug, error, info, warn};

/// 挂载后才存在的状态, 卸载时整体丢弃
struct Mounted {
    geometry: Arc<Geometry>,
    data: DataManager,
    fat: FATManager,
}

/// 打开文件表不随挂载重建, 重新挂载前发出的句柄也会失效
pub struct Fat32FileSystem {
    block_device: Arc<dyn BlockDevice>,
    mounted: Option<Mounted>,
    handles: HandleTable,
}

impl Fat32FileSystem {
    /// 未挂载的文件系统, 调用 init 之后才能用
    pub fn new(block_device: Arc<dyn BlockDevice>) -> Self {
        Self {
            block_device,
            mounted: None,
            handles: HandleTable::new(),
        }
    }

    /// 挂载: 读 0 号扇区解析 BPB, 计算几何信息, 清空打开文件表.
    /// 失败时保持未挂载
    pub fn init(&mut self) -> Result<(), MountError> {
        self.mounted = None;
        self.handles.clear();
        if !self.block_device.is_present() {
            if let Err(e) = self.block_device.init() {
                error!("FAT32: No disk found ({})", e);
                return Err(MountError::NoDevice);
            }
        }
        let mut sector = [0u8; SECTOR_SIZE];
        if let Err(e) = self.block_device.read_block(0, &mut sector) {
            error!("FAT32: Failed to read boot sector ({})", e);
            return Err(e.into());
        }
        let boot_sector = BootSector::from_bytes(&sector);
        boot_sector.validate()?;
        let geometry = Arc::new(Geometry::from_bpb(&boot_sector.bpb()));
        let fat = FATManager::new(Arc::clone(&geometry), Arc::clone(&self.block_device));
        if !fat.is_data_cluster(geometry.root_cluster) {
            error!("FAT32: Root cluster {} outside the data region", geometry.root_cluster);
            return Err(MountError::CorruptedFileSystem);
        }
        info!(
            "FAT32: mounted, fat at {}, data at {}, {} bytes per cluster, root cluster {}",
            geometry.fat_start_lba, geometry.data_start_lba, geometry.cluster_size, geometry.root_cluster
        );
        self.mounted = Some(Mounted {
            data: DataManager::new(Arc::clone(&geometry), Arc::clone(&self.block_device)),
            fat,
            geometry,
        });
        Ok(())
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.is_some()
    }

    pub fn geometry(&self) -> Option<Geometry> {
        self.mounted.as_ref().map(|m| *m.geometry)
    }

    /// 当前打开的文件数
    pub fn open_file_count(&self) -> usize {
        self.handles.open_count()
    }

    fn mounted(&self) -> Result<&Mounted, FSError> {
        self.mounted.as_ref().ok_or(FSError::NotMounted)
    }

    /// 卸载前把所有脏句柄的大小写回目录项
    pub fn unmount(&mut self) -> Result<(), FSError> {
        let mounted = self.mounted.take().ok_or(FSError::NotMounted)?;
        let mut result = Ok(());
        for handle in self.handles.open_handles() {
            if let Some(file) = self.handles.get(handle) {
                if let Err(e) = mounted.flush_entry(file) {
                    warn!("FAT32: failed to flush handle {} on unmount: {}", handle.index(), e);
                    result = result.and(Err(e));
                }
            }
        }
        self.handles.clear();
        info!("FAT32: unmounted");
        result
    }

    pub fn open(&mut self, path: &str) -> Result<Handle, FSError> {
        let mounted = self.mounted.as_ref().ok_or(FSError::NotMounted)?;
        let located = mounted.resolver().resolve(path)?;
        let file = FileHandle::new(
            located.entry.first_cluster(),
            located.entry.size(),
            located.dir_cluster,
            located.offset,
        );
        let handle = self.handles.alloc(file).ok_or(FSError::NoFreeHandle)?;
        debug!("open {} -> handle {} (cluster {})", path, handle.index(), file.start_cluster());
        Ok(handle)
    }

    /// 从当前位置读, 返回实际读到的字节数. 到文件尾返回 0
    pub fn read(&mut self, handle: Handle, buf: &mut [u8]) -> Result<usize, FSError> {
        let mounted = self.mounted.as_ref().ok_or(FSError::NotMounted)?;
        let file = self.handles.get_mut(handle).ok_or(FSError::InvalidHandle)?;
        mounted.read_at_position(file, buf)
    }

    /// 从当前位置写, 簇链不够长时分配新簇. 返回实际写入的字节数
    pub fn write(&mut self, handle: Handle, buf: &[u8]) -> Result<usize, FSError> {
        let mounted = self.mounted.as_ref().ok_or(FSError::NotMounted)?;
        let file = self.handles.get_mut(handle).ok_or(FSError::InvalidHandle)?;
        mounted.write_at_position(file, buf)
    }

    pub fn seek(&mut self, handle: Handle, position: u32) -> Result<(), FSError> {
        self.mounted()?;
        let file = self.handles.get_mut(handle).ok_or(FSError::InvalidHandle)?;
        file.set_position(position);
        Ok(())
    }

    pub fn handle_info(&self, handle: Handle) -> Result<FileHandle, FSError> {
        self.mounted()?;
        self.handles.get(handle).copied().ok_or(FSError::InvalidHandle)
    }

    /// 把句柄里的文件大小写回磁盘上的目录项
    pub fn flush(&mut self, handle: Handle) -> Result<(), FSError> {
        let mounted = self.mounted.as_ref().ok_or(FSError::NotMounted)?;
        let file = self.handles.get_mut(handle).ok_or(FSError::InvalidHandle)?;
        mounted.flush_entry(file)?;
        file.mark_clean();
        Ok(())
    }

    /// 先 flush 再释放句柄. flush 失败时句柄也会被释放
    pub fn close(&mut self, handle: Handle) -> Result<(), FSError> {
        let mounted = self.mounted.as_ref().ok_or(FSError::NotMounted)?;
        let file = self.handles.release(handle).ok_or(FSError::InvalidHandle)?;
        mounted.flush_entry(&file)
    }

    pub fn create_file(&mut self, path: &str) -> Result<(), FSError> {
        let mounted = self.mounted()?;
        let (parent, name) = mounted.prepare_create(path)?;
        let cluster = mounted.alloc_cleared_cluster()?;
        let entry = ShortDirectoryEntry::new(&name, FileAttributes::ARCHIVE, cluster);
        mounted.insert_or_release(parent, &entry, cluster)?;
        debug!("created file {} at cluster {}", path, cluster);
        Ok(())
    }

    pub fn create_dir(&mut self, path: &str) -> Result<(), FSError> {
        let mounted = self.mounted()?;
        let (parent, name) = mounted.prepare_create(path)?;
        let cluster = mounted.fat.alloc_cluster(None)?.ok_or(FSError::NoSpace)?;
        // 根目录没有目录项, ".." 指向根目录时按惯例记为 0
        let parent_link = if parent == mounted.geometry.root_cluster {
            0
        } else {
            parent
        };
        let mut buf = mounted.data.cluster_buffer();
        ShortDirectoryEntry::new(&ShortName::dot(), FileAttributes::DIRECTORY, cluster)
            .write_to(&mut buf[0..]);
        ShortDirectoryEntry::new(&ShortName::dotdot(), FileAttributes::DIRECTORY, parent_link)
            .write_to(&mut buf[DIR_ENTRY_SIZE..]);
        if let Err(e) = mounted.data.write_cluster(cluster, &buf) {
            mounted.release_cluster(cluster);
            return Err(e.into());
        }
        let entry = ShortDirectoryEntry::new(&name, FileAttributes::DIRECTORY, cluster);
        mounted.insert_or_release(parent, &entry, cluster)?;
        debug!("created directory {} at cluster {}", path, cluster);
        Ok(())
    }

    /// 列出根目录. path 参数不起作用, 总是遍历根目录的整条簇链
    pub fn list_dir(
        &self,
        path: &str,
        mut f: impl FnMut(&ShortDirectoryEntry),
    ) -> Result<usize, FSError> {
        let mounted = self.mounted()?;
        if components(path).next().is_some() {
            debug!("list_dir ignores {:?}, listing root", path);
        }
        let mut buf = mounted.data.cluster_buffer();
        let mut count = 0;
        for cluster in mounted.fat.chain(mounted.geometry.root_cluster) {
            let step = cluster.and_then(|c| mounted.data.read_cluster(c, &mut buf));
            if let Err(e) = step {
                if count == 0 {
                    return Err(e.into());
                }
                warn!("list_dir stopped early: {}", e);
                break;
            }
            let mut entries = DirEntries::new(&buf);
            for (_, entry) in entries.by_ref() {
                f(&entry);
                count += 1;
            }
            if entries.reached_end() {
                break;
            }
        }
        Ok(count)
    }
}

impl Mounted {
    fn resolver(&self) -> PathResolver<'_> {
        PathResolver::new(&self.data, &self.fat, self.geometry.root_cluster)
    }

    fn cluster_size(&self) -> usize {
        self.geometry.cluster_size
    }

    /// 在 prev 后面接一个新簇并清零
    fn grow_chain(&self, prev: u32) -> Result<u32, FSError> {
        let cluster = self.fat.alloc_cluster(Some(prev))?.ok_or(FSError::NoSpace)?;
        self.data.clear_cluster(cluster)?;
        Ok(cluster)
    }

    fn alloc_cleared_cluster(&self) -> Result<u32, FSError> {
        let cluster = self.fat.alloc_cluster(None)?.ok_or(FSError::NoSpace)?;
        if let Err(e) = self.data.clear_cluster(cluster) {
            self.release_cluster(cluster);
            return Err(e.into());
        }
        Ok(cluster)
    }

    fn release_cluster(&self, cluster: u32) {
        if let Err(e) = self.fat.set_entry(cluster, FATEntry::Free) {
            warn!("failed to release cluster {}: {}", cluster, e);
        }
    }

    fn read_at_position(&self, file: &mut FileHandle, buf: &mut [u8]) -> Result<usize, FSError> {
        let cluster_size = self.cluster_size();
        let size = file.size() as usize;
        let mut position = file.position() as usize;
        if buf.is_empty() || position >= size || (file.start_cluster() as usize) < START_CLUS_ID {
            return Ok(0);
        }
        // 每次都从起始簇重新走到当前位置所在的簇
        let mut cluster = match self
            .fat
            .search_cluster(file.start_cluster(), position / cluster_size)?
        {
            Some(cluster) => cluster,
            None => return Ok(0),
        };
        let mut offset_in_cluster = position % cluster_size;
        let mut stage = self.data.cluster_buffer();
        let mut read_size = 0usize;
        loop {
            if let Err(e) = self.data.read_cluster(cluster, &mut stage) {
                if read_size == 0 {
                    return Err(e.into());
                }
                warn!("short read at cluster {}: {}", cluster, e);
                break;
            }
            let copy_size = (buf.len() - read_size)
                .min(cluster_size - offset_in_cluster)
                .min(size - position);
            buf[read_size..read_size + copy_size]
                .copy_from_slice(&stage[offset_in_cluster..offset_in_cluster + copy_size]);
            read_size += copy_size;
            position += copy_size;
            file.set_position(position as u32);
            offset_in_cluster = 0;
            if read_size == buf.len() || position == size {
                break;
            }
            cluster = match self.fat.next_cluster(cluster) {
                Ok(Some(next)) => next,
                Ok(None) => break,
                Err(e) => {
                    warn!("short read, FAT lookup failed: {}", e);
                    break;
                }
            };
        }
        Ok(read_size)
    }

    fn write_at_position(&self, file: &mut FileHandle, buf: &[u8]) -> Result<usize, FSError> {
        let cluster_size = self.cluster_size();
        let position = file.position() as usize;
        // 文件大小是 32 位的
        let count = buf.len().min((u32::MAX - file.position()) as usize);
        if count == 0 {
            return Ok(0);
        }
        if (file.start_cluster() as usize) < START_CLUS_ID {
            // 空文件还没有簇, 先给它分配第一个
            let first = self.alloc_cleared_cluster()?;
            file.set_start_cluster(first);
        }
        // 走到当前位置所在的簇, 链不够长就边走边接新簇
        let mut cluster = file.start_cluster();
        for _ in 0..position / cluster_size {
            cluster = match self.fat.next_cluster(cluster)? {
                Some(next) => next,
                None => self.grow_chain(cluster)?,
            };
        }
        let mut offset_in_cluster = position % cluster_size;
        let mut stage = self.data.cluster_buffer();
        let mut write_size = 0usize;
        loop {
            let copy_size = (count - write_size).min(cluster_size - offset_in_cluster);
            if copy_size < cluster_size && self.data.read_cluster(cluster, &mut stage).is_err() {
                // 读不出来的簇当作全零
                stage.fill(0);
            }
            stage[offset_in_cluster..offset_in_cluster + copy_size]
                .copy_from_slice(&buf[write_size..write_size + copy_size]);
            if let Err(e) = self.data.write_cluster(cluster, &stage) {
                if write_size == 0 {
                    return Err(e.into());
                }
                warn!("short write at cluster {}: {}", cluster, e);
                break;
            }
            write_size += copy_size;
            file.advance_write(copy_size as u32);
            offset_in_cluster = 0;
            if write_size == count {
                break;
            }
            let next = match self.fat.next_cluster(cluster) {
                Ok(Some(next)) => Ok(next),
                Ok(None) => self.grow_chain(cluster),
                Err(e) => Err(e.into()),
            };
            cluster = match next {
                Ok(next) => next,
                Err(e) => {
                    warn!("short write after {} bytes: {}", write_size, e);
                    break;
                }
            };
        }
        Ok(write_size)
    }

    /// 句柄脏的时候把大小(和新分配的起始簇)写回目录项
    fn flush_entry(&self, file: &FileHandle) -> Result<(), FSError> {
        let (dir_cluster, offset) = file.dir_entry_pos();
        if !file.is_dirty() || (dir_cluster as usize) < START_CLUS_ID {
            return Ok(());
        }
        let mut buf = self.data.cluster_buffer();
        self.data.read_cluster(dir_cluster, &mut buf)?;
        let mut entry = ShortDirectoryEntry::from_bytes(&buf[offset..]);
        entry.set_size(file.size());
        entry.set_first_cluster(file.start_cluster());
        entry.write_to(&mut buf[offset..]);
        self.data.write_cluster(dir_cluster, &buf)?;
        debug!("flushed size {} to entry at cluster {}+{}", file.size(), dir_cluster, offset);
        Ok(())
    }

    /// 解析父目录, 检查名字, 返回父目录起始簇和 8.3 名
    fn prepare_create(&self, path: &str) -> Result<(u32, ShortName), FSError> {
        let (parent_path, name) = split_parent(path).ok_or(FSError::InvalidPath)?;
        if name == "." || name == ".." {
            return Err(FSError::InvalidPath);
        }
        let resolver = self.resolver();
        let parent = resolver.resolve_dir(parent_path)?;
        let name = ShortName::from_component(name);
        if resolver.find_in_dir(parent, &name)?.is_some() {
            return Err(FSError::AlreadyExists);
        }
        Ok((parent, name))
    }

    /// 在目录的整条簇链中找空位写入目录项, 都满了就给目录接一个新簇
    fn insert_entry(&self, dir_cluster: u32, entry: &ShortDirectoryEntry) -> Result<(), FSError> {
        let mut buf = self.data.cluster_buffer();
        let mut last = dir_cluster;
        for cluster in self.fat.chain(dir_cluster) {
            let cluster = cluster?;
            self.data.read_cluster(cluster, &mut buf)?;
            if let Some(offset) = find_free_slot(&buf) {
                let was_end = buf[offset] == DIR_ENTRY_END_FLAG;
                entry.write_to(&mut buf[offset..]);
                let next = offset + DIR_ENTRY_SIZE;
                if was_end {
                    // 原来结束标志后面的内容都是无效的, 清零后结束标志后移一项
                    buf[next..].fill(0);
                }
                self.data.write_cluster(cluster, &buf)?;
                if was_end && next == buf.len() {
                    self.end_next_cluster(cluster)?;
                }
                return Ok(());
            }
            last = cluster;
        }
        let cluster = self.grow_chain(last)?;
        debug!("directory {} extended with cluster {}", dir_cluster, cluster);
        buf.fill(0);
        entry.write_to(&mut buf[0..]);
        self.data.write_cluster(cluster, &buf)?;
        Ok(())
    }

    /// 占用了簇内最后一项的结束标志时, 结束标志移到链上下一个簇的开头
    fn end_next_cluster(&self, cluster: u32) -> Result<(), FSError> {
        if let Some(next) = self.fat.next_cluster(cluster)? {
            let mut buf = self.data.cluster_buffer();
            self.data.read_cluster(next, &mut buf)?;
            buf[0] = DIR_ENTRY_END_FLAG;
            self.data.write_cluster(next, &buf)?;
        }
        Ok(())
    }

    fn insert_or_release(
        &self,
        dir_cluster: u32,
        entry: &ShortDirectoryEntry,
        cluster: u32,
    ) -> Result<(), FSError> {
        self.insert_entry(dir_cluster, entry).map_err(|e| {
            self.release_cluster(cluster);
            e
        })
    }
}
