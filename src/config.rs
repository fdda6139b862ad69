/// 可以自行调整的变量

pub const SECTOR_SIZE: usize = 512; // 只支持 512 字节扇区, 其它扇区大小挂载失败
pub const MAX_CLUS_SZ: usize = 512 * 64; // 限制最大簇32KB, 太大了单片机受不了
pub const MAX_OPEN_FILES: usize = 8; // 同时打开的文件句柄数

pub const DIR_ENTRY_SIZE: usize = 32;
