// 打开文件表. 固定容量, 线性查找空位
use crate::config::MAX_OPEN_FILES;
use alloc::vec::Vec;

/// 打开文件的句柄: 打开文件表中的下标加上这个位置的代数.
/// 位置被释放后代数加一, 关闭过的旧句柄不会指到后来打开的文件
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Handle {
    index: usize,
    generation: u32,
}

impl Handle {
    pub fn index(&self) -> usize {
        self.index
    }
}

/// 打开的文件. start_cluster 在打开时确定, 之后不再改变(没有簇的空文件第一次写入除外);
/// size 以句柄中的为准, flush 时才写回目录项
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FileHandle {
    start_cluster: u32,
    size: u32,
    position: u32,
    dir_cluster: u32,  // 目录项所在簇
    dir_offset: usize, // 目录项在簇内偏移
    dirty: bool,       // size 变了还没写回
}

impl FileHandle {
    pub fn new(start_cluster: u32, size: u32, dir_cluster: u32, dir_offset: usize) -> Self {
        Self {
            start_cluster,
            size,
            position: 0,
            dir_cluster,
            dir_offset,
            dirty: false,
        }
    }
    pub fn start_cluster(&self) -> u32 {
        self.start_cluster
    }
    pub fn size(&self) -> u32 {
        self.size
    }
    pub fn position(&self) -> u32 {
        self.position
    }
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
    pub(crate) fn dir_entry_pos(&self) -> (u32, usize) {
        (self.dir_cluster, self.dir_offset)
    }
    /// 只用于原本没有簇的空文件第一次写入
    pub(crate) fn set_start_cluster(&mut self, cluster: u32) {
        self.start_cluster = cluster;
        self.dirty = true;
    }
    pub(crate) fn set_position(&mut self, position: u32) {
        self.position = position;
    }
    /// 写入后推进位置, 文件只会变大不会变小
    pub(crate) fn advance_write(&mut self, n: u32) {
        self.position += n;
        if self.position > self.size {
            self.size = self.position;
            self.dirty = true;
        }
    }
    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

pub struct HandleTable {
    slots: [Option<FileHandle>; MAX_OPEN_FILES],
    generations: [u32; MAX_OPEN_FILES],
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            slots: [None; MAX_OPEN_FILES],
            generations: [0; MAX_OPEN_FILES],
        }
    }
    /// 放进第一个空位, 表满返回 None
    pub fn alloc(&mut self, file: FileHandle) -> Option<Handle> {
        let index = self.slots.iter().position(|slot| slot.is_none())?;
        self.slots[index] = Some(file);
        Some(Handle {
            index,
            generation: self.generations[index],
        })
    }
    fn is_current(&self, handle: Handle) -> bool {
        self.generations.get(handle.index) == Some(&handle.generation)
    }
    pub fn get(&self, handle: Handle) -> Option<&FileHandle> {
        if !self.is_current(handle) {
            return None;
        }
        self.slots[handle.index].as_ref()
    }
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut FileHandle> {
        if !self.is_current(handle) {
            return None;
        }
        self.slots[handle.index].as_mut()
    }
    /// 释放后这个位置可以被复用, 旧句柄作废
    pub fn release(&mut self, handle: Handle) -> Option<FileHandle> {
        if !self.is_current(handle) {
            return None;
        }
        let file = self.slots[handle.index].take()?;
        self.generations[handle.index] = self.generations[handle.index].wrapping_add(1);
        Some(file)
    }
    /// 释放所有位置, 已经发出去的句柄全部作废
    pub fn clear(&mut self) {
        for handle in self.open_handles().collect::<Vec<_>>() {
            self.release(handle);
        }
    }
    pub fn open_handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.slots
            .iter()
            .zip(self.generations.iter())
            .enumerate()
            .filter(|(_, (slot, _))| slot.is_some())
            .map(|(index, (_, &generation))| Handle { index, generation })
    }
    pub fn open_count(&self) -> usize {
        self.open_handles().count()
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}
