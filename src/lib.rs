#![cfg_attr(not(any(feature = "std", test)), no_std)]

extern crate alloc;

mod block_device;
mod boot_sector;
mod config;
mod data;
mod dir_entry;
mod error;
mod fat;
mod fat32;
mod path;
mod vfs;

use data::DataManager;
use fat::FATManager;

#[cfg(feature = "std")]
pub use block_device::FileBlockDevice;
pub use block_device::{BlockDevice, MemoryBlockDevice};
pub use boot_sector::{BiosParameterBlock, BootSector, Geometry};
pub use config::{DIR_ENTRY_SIZE, MAX_CLUS_SZ, MAX_OPEN_FILES, SECTOR_SIZE};
pub use dir_entry::{FileAttributes, ShortDirectoryEntry, ShortName};
pub use error::{FSError, IOError, MountError};
pub use fat::{FATEntry, END_OF_CHAIN};
pub use fat32::Fat32FileSystem;
pub use vfs::{FileHandle, Handle};

pub const START_CLUS_ID: usize = 2;
