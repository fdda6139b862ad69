use crate::config::DIR_ENTRY_SIZE;
use alloc::string::String;
use bitflags::bitflags;

pub(crate) const DIR_ENTRY_DELETED_FLAG: u8 = 0xE5;
pub(crate) const DIR_ENTRY_END_FLAG: u8 = 0x00;
pub(crate) const SHORT_FILE_NAME_LEN: usize = 8;
pub(crate) const SHORT_FILE_EXT_LEN: usize = 3;
pub(crate) const SHORT_FILE_NAME_PADDING: u8 = b' ';
pub(crate) const SHORT_NAME_LEN: usize = SHORT_FILE_NAME_LEN + SHORT_FILE_EXT_LEN;

bitflags! {
    /// A FAT file attributes.
    /// 目录项 ATTRIBUTE 字节最高两位是保留不用的
    #[derive(Default)]
    pub struct FileAttributes: u8 {
        const FILE       = 0x00;
        const READ_ONLY  = 0x01;
        const HIDDEN     = 0x02;
        const SYSTEM     = 0x04;
        const VOLUME_ID  = 0x08;
        const DIRECTORY  = 0x10;
        const ARCHIVE    = 0x20;    // 文件创建时置位
        const LONG_NAME  = Self::READ_ONLY.bits | Self::HIDDEN.bits
                        | Self::SYSTEM.bits | Self::VOLUME_ID.bits;
    }
}

/// 8.3 短文件名, 11 字节, 空格填充, 全部大写
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ShortName([u8; SHORT_NAME_LEN]);

impl ShortName {
    /// 把路径中的一段转换为 8.3 形式. 第一个 '.' 之前最多取 8 个字符, 之后最多取 3 个,
    /// 超长的部分直接截断, 小写转大写. "." 和 ".." 保持原样
    pub fn from_component(component: &str) -> Self {
        let mut raw = [SHORT_FILE_NAME_PADDING; SHORT_NAME_LEN];
        if component == "." || component == ".." {
            raw[..component.len()].copy_from_slice(component.as_bytes());
            return Self(raw);
        }
        let bytes = component.as_bytes();
        let (base, ext) = match bytes.iter().position(|&c| c == b'.') {
            Some(dot) => (&bytes[..dot], &bytes[dot + 1..]),
            None => (bytes, &[][..]),
        };
        for (dst, src) in raw[..SHORT_FILE_NAME_LEN].iter_mut().zip(base) {
            *dst = src.to_ascii_uppercase();
        }
        for (dst, src) in raw[SHORT_FILE_NAME_LEN..].iter_mut().zip(ext) {
            *dst = src.to_ascii_uppercase();
        }
        Self(raw)
    }
    pub fn dot() -> Self {
        Self::from_component(".")
    }
    pub fn dotdot() -> Self {
        Self::from_component("..")
    }
    pub fn as_bytes(&self) -> &[u8; SHORT_NAME_LEN] {
        &self.0
    }
}

/// 短目录项, 也适用于当前目录项和上级目录项
#[repr(C, packed(1))]
#[derive(Copy, Clone, Default, Debug)]
pub struct ShortDirectoryEntry {
    name: [u8; SHORT_FILE_NAME_LEN], // 删除时第0位为0xE5，未使用时为0x00
    extension: [u8; SHORT_FILE_EXT_LEN],
    attribute: u8, // 原始属性字节, 长文件名项为 0x0F
    _os_reserved: u8,
    _creation_tenths: u8,
    creation_time: u16,
    creation_date: u16,
    last_acc_date: u16,
    cluster_high: u16,
    modification_time: u16,
    modification_date: u16,
    cluster_low: u16,
    size: u32,
}

const _: () = assert!(core::mem::size_of::<ShortDirectoryEntry>() == DIR_ENTRY_SIZE);

impl ShortDirectoryEntry {
    pub fn new(name: &ShortName, attribute: FileAttributes, first_cluster: u32) -> Self {
        let mut entry = Self {
            attribute: attribute.bits(),
            ..Self::default()
        };
        entry.name.copy_from_slice(&name.0[..SHORT_FILE_NAME_LEN]);
        entry.extension.copy_from_slice(&name.0[SHORT_FILE_NAME_LEN..]);
        entry.set_first_cluster(first_cluster);
        entry
    }
    /// 调用方保证 bytes 至少 32 字节, 不足会 panic
    pub(crate) fn from_bytes(bytes: &[u8]) -> Self {
        let raw = &bytes[..DIR_ENTRY_SIZE];
        unsafe { core::ptr::read_unaligned(raw.as_ptr() as *const ShortDirectoryEntry) }
    }
    /// 同 from_bytes, bytes 至少 32 字节
    pub(crate) fn write_to(&self, bytes: &mut [u8]) {
        let raw = &mut bytes[..DIR_ENTRY_SIZE];
        unsafe { core::ptr::write_unaligned(raw.as_mut_ptr() as *mut ShortDirectoryEntry, *self) }
    }
    pub fn attribute(&self) -> FileAttributes {
        FileAttributes::from_bits_truncate(self.attribute)
    }
    pub fn is_dir(&self) -> bool {
        self.attribute().contains(FileAttributes::DIRECTORY)
    }
    pub fn is_volume(&self) -> bool {
        self.attribute().contains(FileAttributes::VOLUME_ID)
    }
    pub fn is_file(&self) -> bool {
        (!self.is_dir()) && (!self.is_volume())
    }
    pub fn is_long_name(&self) -> bool {
        self.attribute == FileAttributes::LONG_NAME.bits()
    }
    pub fn is_deleted(&self) -> bool {
        self.name[0] == DIR_ENTRY_DELETED_FLAG
    }
    /// 目录结束标志, 后面的目录项都不再看
    pub fn is_end(&self) -> bool {
        self.name[0] == DIR_ENTRY_END_FLAG
    }
    pub fn is_free(&self) -> bool {
        self.is_deleted() || self.is_end()
    }
    // 获取文件起始簇号
    pub fn first_cluster(&self) -> u32 {
        ((self.cluster_high as u32) << 16) | (self.cluster_low as u32)
    }
    // 设置文件起始簇号
    pub fn set_first_cluster(&mut self, cluster: u32) {
        self.cluster_high = ((cluster & 0xFFFF0000) >> 16) as u16;
        self.cluster_low = (cluster & 0x0000FFFF) as u16;
    }
    pub fn size(&self) -> u32 {
        self.size
    }
    pub fn set_size(&mut self, size: u32) {
        self.size = size;
    }
    pub fn short_name(&self) -> ShortName {
        let mut raw = [0u8; SHORT_NAME_LEN];
        raw[..SHORT_FILE_NAME_LEN].copy_from_slice(&self.name);
        raw[SHORT_FILE_NAME_LEN..].copy_from_slice(&self.extension);
        ShortName(raw)
    }
    /// 逐字节比较 11 字节短文件名
    pub fn matches(&self, name: &ShortName) -> bool {
        self.short_name() == *name
    }
    // 获取短文件名,短文件名默认都是大写
    pub fn name(&self) -> String {
        let mut name: String = String::new();
        for &c in self.name.iter().take_while(|&&c| c != SHORT_FILE_NAME_PADDING) {
            name.push(c as char);
        }
        for (i, &c) in self
            .extension
            .iter()
            .take_while(|&&c| c != SHORT_FILE_NAME_PADDING)
            .enumerate()
        {
            if i == 0 {
                name.push('.');
            }
            name.push(c as char);
        }
        name
    }
}

/// 遍历一个目录簇中的有效目录项: 遇到首字节 0x00 就永久停止,
/// 跳过已删除项和长文件名项. 产出 (项在簇中的字节偏移, 目录项)
pub struct DirEntries<'a> {
    buf: &'a [u8],
    offset: usize,
    finished: bool,
}

impl<'a> DirEntries<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            offset: 0,
            finished: false,
        }
    }
    /// 扫描是否因为结束标志而停止, 停止后同一目录后续的簇也不用再看
    pub fn reached_end(&self) -> bool {
        self.finished
    }
}

impl Iterator for DirEntries<'_> {
    type Item = (usize, ShortDirectoryEntry);

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished && self.offset + DIR_ENTRY_SIZE <= self.buf.len() {
            let offset = self.offset;
            self.offset += DIR_ENTRY_SIZE;
            let entry = ShortDirectoryEntry::from_bytes(&self.buf[offset..]);
            if entry.is_end() {
                self.finished = true;
                break;
            }
            if entry.is_deleted() || entry.is_long_name() {
                continue;
            }
            return Some((offset, entry));
        }
        None
    }
}

/// 簇内第一个可以放新目录项的位置(空闲或已删除)
pub fn find_free_slot(buf: &[u8]) -> Option<usize> {
    buf.chunks_exact(DIR_ENTRY_SIZE)
        .position(|raw| raw[0] == DIR_ENTRY_END_FLAG || raw[0] == DIR_ENTRY_DELETED_FLAG)
        .map(|i| i * DIR_ENTRY_SIZE)
}
