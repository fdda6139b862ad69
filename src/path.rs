// 路径解析: 从根目录簇出发, 沿着目录项和簇链逐级查找
use crate::data::DataManager;
use crate::dir_entry::{DirEntries, ShortDirectoryEntry, ShortName};
use crate::error::FSError;
use crate::fat::FATManager;
use log::{trace, warn};

/// 找到的目录项以及它在磁盘上的位置
#[derive(Copy, Clone, Debug)]
pub struct Located {
    pub dir_cluster: u32, // 目录项所在的簇
    pub offset: usize,    // 目录项在簇内的字节偏移
    pub entry: ShortDirectoryEntry,
}

/// 去掉开头的 '/', 空的路径段(连续或结尾的 '/')忽略
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.trim_start_matches('/')
        .split('/')
        .filter(|c| !c.is_empty())
}

/// 拆成父目录路径和最后一段
pub fn split_parent(path: &str) -> Option<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    let (parent, name) = match trimmed.rfind('/') {
        Some(i) => (&trimmed[..i], &trimmed[i + 1..]),
        None => ("", trimmed),
    };
    if name.is_empty() {
        None
    } else {
        Some((parent, name))
    }
}

pub struct PathResolver<'a> {
    data: &'a DataManager,
    fat: &'a FATManager,
    root_cluster: u32,
}

impl<'a> PathResolver<'a> {
    pub fn new(data: &'a DataManager, fat: &'a FATManager, root_cluster: u32) -> Self {
        Self {
            data,
            fat,
            root_cluster,
        }
    }
    /// ".." 指向根目录时簇号记为 0. 簇号超出数据区的目录当作不存在
    fn dir_cluster_of(&self, entry: &ShortDirectoryEntry) -> Result<u32, FSError> {
        match entry.first_cluster() {
            0 => Ok(self.root_cluster),
            n if self.fat.is_data_cluster(n) => Ok(n),
            n => {
                warn!("directory {} points at invalid cluster {}", entry.name(), n);
                Err(FSError::NotFound)
            }
        }
    }
    /// 在一个目录的整条簇链中按 8.3 名字查找
    pub fn find_in_dir(&self, dir_cluster: u32, name: &ShortName) -> Result<Option<Located>, FSError> {
        let mut buf = self.data.cluster_buffer();
        for cluster in self.fat.chain(dir_cluster) {
            let cluster = cluster?;
            self.data.read_cluster(cluster, &mut buf)?;
            let mut entries = DirEntries::new(&buf);
            if let Some((offset, entry)) = entries.by_ref().find(|(_, e)| e.matches(name)) {
                return Ok(Some(Located {
                    dir_cluster: cluster,
                    offset,
                    entry,
                }));
            }
            if entries.reached_end() {
                break;
            }
        }
        Ok(None)
    }
    /// 解析绝对路径, 中间的每一段都必须是目录
    pub fn resolve(&self, path: &str) -> Result<Located, FSError> {
        let mut cluster = self.root_cluster;
        let mut found: Option<Located> = None;
        for component in components(path) {
            if let Some(prev) = found {
                if !prev.entry.is_dir() {
                    return Err(FSError::NotFound);
                }
                cluster = self.dir_cluster_of(&prev.entry)?;
            }
            trace!("lookup {:?} in cluster {}", component, cluster);
            let name = ShortName::from_component(component);
            found = Some(self.find_in_dir(cluster, &name)?.ok_or(FSError::NotFound)?);
        }
        found.ok_or(FSError::InvalidPath)
    }
    /// 解析目录路径, 返回目录的起始簇. 空路径就是根目录
    pub fn resolve_dir(&self, path: &str) -> Result<u32, FSError> {
        if components(path).next().is_none() {
            return Ok(self.root_cluster);
        }
        let located = self.resolve(path)?;
        if !located.entry.is_dir() {
            return Err(FSError::NotADirectory);
        }
        self.dir_cluster_of(&located.entry)
    }
}
