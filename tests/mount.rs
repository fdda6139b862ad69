mod common;

use common::*;
use icefat::{Fat32FileSystem, FSError, IOError, MemoryBlockDevice, MountError};
use std::sync::Arc;

#[test]
fn geometry_from_boot_sector() {
    let (_, fs) = mount(readme_image().build());
    assert!(fs.is_mounted());
    let geometry = fs.geometry().unwrap();
    assert_eq!(geometry.fat_start_lba, 32);
    assert_eq!(geometry.fat_size_32, 1);
    assert_eq!(geometry.num_fats, 2);
    assert_eq!(geometry.data_start_lba, 34);
    assert_eq!(geometry.cluster_size, 512);
    assert_eq!(geometry.root_cluster, 2);
    assert_eq!(geometry.cluster_to_lba(3), Some(35));
}

#[test]
fn larger_clusters() {
    let (_, fs) = mount(ImageBuilder::new(8, 16).build());
    let geometry = fs.geometry().unwrap();
    assert_eq!(geometry.sectors_per_cluster, 8);
    assert_eq!(geometry.cluster_size, 4096);
    assert_eq!(geometry.cluster_to_lba(4), Some(34 + 16));
}

#[test]
fn unsupported_sector_size() {
    let mut img = readme_image().build();
    img[11..13].copy_from_slice(&1024u16.to_le_bytes());
    let mut fs = Fat32FileSystem::new(Arc::new(MemoryBlockDevice::from_image(img)));
    assert_eq!(fs.init(), Err(MountError::UnsupportedSectorSize(1024)));
    assert!(!fs.is_mounted());
}

#[test]
fn missing_signature() {
    let mut img = readme_image().build();
    img[510] = 0;
    let mut fs = Fat32FileSystem::new(Arc::new(MemoryBlockDevice::from_image(img)));
    assert_eq!(fs.init(), Err(MountError::BadSignature));
    assert!(!fs.is_mounted());
    assert_eq!(fs.open("/README.TXT"), Err(FSError::NotMounted));
}

#[test]
fn no_device() {
    let mut fs = Fat32FileSystem::new(Arc::new(MemoryBlockDevice::new(0)));
    assert_eq!(fs.init(), Err(MountError::NoDevice));
    assert!(!fs.is_mounted());
}

#[test]
fn absent_device_is_initialized() {
    let device = Arc::new(MemoryBlockDevice::from_image(readme_image().build()));
    device.set_present(false);
    let mut fs = Fat32FileSystem::new(device.clone());
    assert_eq!(fs.init(), Ok(()));
    assert!(fs.is_mounted());
}

#[test]
fn boot_sector_read_failure() {
    let device = Arc::new(MemoryBlockDevice::from_image(readme_image().build()));
    device.fail_reads_at(0);
    let mut fs = Fat32FileSystem::new(device.clone());
    assert_eq!(
        fs.init(),
        Err(MountError::IOError(IOError::ReadFailed { lba: 0 }))
    );
    assert!(!fs.is_mounted());
}

#[test]
fn failed_remount_leaves_unmounted() {
    let (device, mut fs) = mount(readme_image().build());
    device.fail_reads_at(0);
    assert!(fs.init().is_err());
    assert!(!fs.is_mounted());
    assert_eq!(fs.list_dir("/", |_| {}), Err(FSError::NotMounted));

    device.clear_faults();
    fs.init().unwrap();
    assert!(fs.open("/README.TXT").is_ok());
}

#[test]
fn operations_before_mount() {
    let device = Arc::new(MemoryBlockDevice::from_image(readme_image().build()));
    let mut fs = Fat32FileSystem::new(device);
    assert!(!fs.is_mounted());
    assert!(fs.geometry().is_none());
    assert_eq!(fs.open("/README.TXT"), Err(FSError::NotMounted));
    assert_eq!(fs.create_file("/NEW.TXT"), Err(FSError::NotMounted));
    assert_eq!(fs.create_dir("/DIR"), Err(FSError::NotMounted));
    assert_eq!(fs.unmount(), Err(FSError::NotMounted));
}

#[test]
fn remount_closes_handles() {
    let (_, mut fs) = mount(readme_image().build());
    let handle = fs.open("/README.TXT").unwrap();
    assert_eq!(fs.open_file_count(), 1);
    fs.init().unwrap();
    assert_eq!(fs.open_file_count(), 0);
    assert_eq!(fs.read(handle, &mut [0u8; 4]), Err(FSError::InvalidHandle));
    // 重新挂载后打开的文件用同一个位置, 旧句柄仍然无效
    let again = fs.open("/README.TXT").unwrap();
    assert_eq!(again.index(), handle.index());
    assert_eq!(fs.read(handle, &mut [0u8; 4]), Err(FSError::InvalidHandle));
    assert_eq!(fs.read(again, &mut [0u8; 4]), Ok(4));
}

#[test]
fn unmount_flushes_sizes() {
    let (_, mut fs) = mount(readme_image().build());
    fs.create_file("/LOG.TXT").unwrap();
    let handle = fs.open("/LOG.TXT").unwrap();
    assert_eq!(fs.write(handle, &pattern(100)), Ok(100));
    assert_eq!(fs.unmount(), Ok(()));
    assert!(!fs.is_mounted());

    fs.init().unwrap();
    let handle = fs.open("/LOG.TXT").unwrap();
    assert_eq!(fs.handle_info(handle).unwrap().size(), 100);
    let mut buf = [0u8; 128];
    assert_eq!(fs.read(handle, &mut buf), Ok(100));
    assert_eq!(&buf[..100], &pattern(100)[..]);
}

fn mount_raw(img: Vec<u8>) -> (Fat32FileSystem, Result<(), MountError>) {
    let mut fs = Fat32FileSystem::new(Arc::new(MemoryBlockDevice::from_image(img)));
    let result = fs.init();
    (fs, result)
}

#[test]
fn overflowing_fat_layout() {
    let mut img = readme_image().build();
    img[16] = 255;
    img[36..40].copy_from_slice(&0x0200_0000u32.to_le_bytes());
    let (fs, result) = mount_raw(img);
    assert_eq!(result, Err(MountError::CorruptedFileSystem));
    assert!(!fs.is_mounted());
}

#[test]
fn zero_reserved_sectors() {
    let mut img = readme_image().build();
    img[14..16].copy_from_slice(&0u16.to_le_bytes());
    let (fs, result) = mount_raw(img);
    assert_eq!(result, Err(MountError::CorruptedFileSystem));
    assert!(!fs.is_mounted());
}

#[test]
fn root_cluster_outside_data_region() {
    let mut img = readme_image().build();
    img[44..48].copy_from_slice(&1000u32.to_le_bytes());
    let (fs, result) = mount_raw(img);
    assert_eq!(result, Err(MountError::CorruptedFileSystem));
    assert!(!fs.is_mounted());
}
