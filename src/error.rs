// 错误类型, 所有操作都通过返回值传递结果, 不在本层重试
use core::fmt;

/// 块设备层的错误, 由 BlockDevice 实现者返回
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IOError {
    ReadFailed { lba: u32 },
    WriteFailed { lba: u32 },
    OutOfRange { lba: u32 },
    NotReady,
}

impl fmt::Display for IOError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IOError::ReadFailed { lba } => write!(f, "failed to read sector {}", lba),
            IOError::WriteFailed { lba } => write!(f, "failed to write sector {}", lba),
            IOError::OutOfRange { lba } => write!(f, "sector {} is beyond the end of the device", lba),
            IOError::NotReady => write!(f, "block device not ready"),
        }
    }
}

/// 挂载失败的原因, 失败时文件系统保持未挂载状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountError {
    NoDevice,
    BadSignature,
    UnsupportedSectorSize(u16),
    CorruptedFileSystem,
    IOError(IOError),
}

impl fmt::Display for MountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountError::NoDevice => write!(f, "no disk found"),
            MountError::BadSignature => write!(f, "boot sector signature missing"),
            MountError::UnsupportedSectorSize(n) => write!(f, "unsupported sector size {}", n),
            MountError::CorruptedFileSystem => write!(f, "invalid FAT32 geometry"),
            MountError::IOError(e) => write!(f, "failed to read boot sector: {}", e),
        }
    }
}

impl From<IOError> for MountError {
    fn from(e: IOError) -> Self {
        MountError::IOError(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FSError {
    NotMounted,
    NotFound,
    InvalidPath,
    InvalidHandle,
    NoFreeHandle,
    NoSpace,
    AlreadyExists,
    NotADirectory,
    IOError(IOError),
}

impl fmt::Display for FSError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FSError::NotMounted => write!(f, "filesystem not mounted"),
            FSError::NotFound => write!(f, "no such file or directory"),
            FSError::InvalidPath => write!(f, "invalid path"),
            FSError::InvalidHandle => write!(f, "invalid file handle"),
            FSError::NoFreeHandle => write!(f, "too many open files"),
            FSError::NoSpace => write!(f, "no space left on device"),
            FSError::AlreadyExists => write!(f, "file exists"),
            FSError::NotADirectory => write!(f, "not a directory"),
            FSError::IOError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl From<IOError> for FSError {
    fn from(e: IOError) -> Self {
        FSError::IOError(e)
    }
}
