//! Open file handles and volume-qualified path resolution.
//!
//! Paths name the volume first: `hd0p1/bin/shell`. The handle layer
//! owns position, flags, and ownership; byte transfers are delegated to
//! the volume's driver.

extern crate alloc;

use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;

use bitflags::bitflags;

use super::{FileSystemDriver, FsId, FILESYSTEMS};
use crate::error::{KernelError, Result};
use crate::object::{KernelObject, ObjectHeader, ObjectId, ObjectKind, Registry};
use crate::sync::{MutexGuard, FILE_MUTEX};

bitflags! {
    /// File open flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const READ     = 1 << 0;
        const WRITE    = 1 << 1;
        const CREATE   = 1 << 2;
        const APPEND   = 1 << 3;
    }
}

/// One directory entry as reported by drivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub directory: bool,
    pub size: u64,
}

/// One open file.
pub struct File {
    header: ObjectHeader,
    pub filesystem: FsId,
    /// Raw id of the opening task.
    pub owner: u32,
    pub flags: OpenFlags,
    pub position: u64,
    /// Volume-relative path.
    pub path: String,
    /// Driver-scoped handle.
    pub driver_handle: u32,
    /// Pending directory iteration for FindFirst/FindNext.
    pub find_entries: Vec<DirEntry>,
    pub find_index: usize,
}

impl KernelObject for File {
    const KIND: ObjectKind = ObjectKind::File;
    fn header(&self) -> &ObjectHeader {
        &self.header
    }
}

/// Open-file id.
pub type FileId = ObjectId<File>;

/// All open files.
pub static OPEN_FILES: Registry<File> = Registry::new();

/// Split `hd0p1/rest/of/path` into volume id and volume-relative path.
pub fn resolve_path(full_path: &str) -> Result<(FsId, String)> {
    let trimmed = full_path.trim_start_matches('/');
    let (volume, rest) = match trimmed.split_once('/') {
        Some((volume, rest)) => (volume, rest),
        None => (trimmed, ""),
    };
    let id = super::filesystem_by_name(volume).ok_or(KernelError::NoDevice)?;
    Ok((id, rest.to_string()))
}

fn driver_of(filesystem: FsId) -> Result<Arc<dyn FileSystemDriver>> {
    FILESYSTEMS.with(filesystem, |fs| {
        if !fs.mounted {
            return Err(KernelError::NoDevice);
        }
        fs.driver.clone().ok_or(KernelError::NoDevice)
    })?
}

/// Open a file by volume-qualified path.
pub fn open_file(full_path: &str, flags: OpenFlags) -> Result<FileId> {
    let _file = MutexGuard::lock(&FILE_MUTEX);
    let (filesystem, path) = resolve_path(full_path)?;
    let driver = driver_of(filesystem)?;
    let driver_handle = driver.open(&path, flags)?;
    let position = if flags.contains(OpenFlags::APPEND) {
        driver.size_of(driver_handle).unwrap_or(0)
    } else {
        0
    };
    let id = OPEN_FILES.insert(File {
        header: ObjectHeader::new(ObjectKind::File),
        filesystem,
        owner: crate::sched::current_task_raw().unwrap_or(0),
        flags,
        position,
        path,
        driver_handle,
        find_entries: Vec::new(),
        find_index: 0,
    });
    Ok(id)
}

/// Driver-handle value marking a directory-iteration handle, which has
/// no driver-side state to close.
const FIND_HANDLE: u32 = u32::MAX;

/// Close and unregister a handle.
pub fn close_file(file: FileId) -> Result<()> {
    let _guard = MutexGuard::lock(&FILE_MUTEX);
    let (filesystem, handle) =
        OPEN_FILES.with(file, |f| (f.filesystem, f.driver_handle))?;
    if handle != FIND_HANDLE {
        if let Ok(driver) = driver_of(filesystem) {
            let _ = driver.close(handle);
        }
    }
    OPEN_FILES
        .remove(file)
        .map(|_| ())
        .ok_or(KernelError::BadParameter)
}

/// Read at the current position, advancing it.
pub fn read_file(file: FileId, buffer: &mut [u8]) -> Result<u32> {
    let (filesystem, handle, position, flags) = OPEN_FILES.with(file, |f| {
        (f.filesystem, f.driver_handle, f.position, f.flags)
    })?;
    if !flags.contains(OpenFlags::READ) {
        return Err(KernelError::NoPermission);
    }
    let read = driver_of(filesystem)?.read(handle, position, buffer)?;
    OPEN_FILES.with_mut(file, |f| f.position += u64::from(read))?;
    Ok(read)
}

/// Write at the current position, advancing it.
pub fn write_file(file: FileId, data: &[u8]) -> Result<u32> {
    let (filesystem, handle, position, flags) = OPEN_FILES.with(file, |f| {
        (f.filesystem, f.driver_handle, f.position, f.flags)
    })?;
    if !flags.contains(OpenFlags::WRITE) {
        return Err(KernelError::NoPermission);
    }
    let written = driver_of(filesystem)?.write(handle, position, data)?;
    OPEN_FILES.with_mut(file, |f| f.position += u64::from(written))?;
    Ok(written)
}

/// Current file size.
pub fn file_size(file: FileId) -> Result<u64> {
    let (filesystem, handle) = OPEN_FILES.with(file, |f| (f.filesystem, f.driver_handle))?;
    driver_of(filesystem)?.size_of(handle)
}

/// Current position.
pub fn get_position(file: FileId) -> Result<u64> {
    OPEN_FILES.with(file, |f| f.position)
}

/// Reposition; seeking past the end is allowed, reads clamp there.
pub fn set_position(file: FileId, position: u64) -> Result<()> {
    OPEN_FILES.with_mut(file, |f| f.position = position)
}

/// Begin a directory iteration; returns the first entry.
pub fn find_first(full_path: &str) -> Result<(FileId, Option<DirEntry>)> {
    let _guard = MutexGuard::lock(&FILE_MUTEX);
    let (filesystem, path) = resolve_path(full_path)?;
    let entries = driver_of(filesystem)?.list(&path)?;
    let first = entries.first().cloned();
    let id = OPEN_FILES.insert(File {
        header: ObjectHeader::new(ObjectKind::File),
        filesystem,
        owner: crate::sched::current_task_raw().unwrap_or(0),
        flags: OpenFlags::READ,
        position: 0,
        path,
        driver_handle: FIND_HANDLE,
        find_entries: entries,
        find_index: 1,
    });
    Ok((id, first))
}

/// Continue a directory iteration; `None` ends it.
pub fn find_next(file: FileId) -> Result<Option<DirEntry>> {
    OPEN_FILES.with_mut(file, |f| {
        let entry = f.find_entries.get(f.find_index).cloned();
        if entry.is_some() {
            f.find_index += 1;
        }
        entry
    })
}

/// Close every file still owned by a dying task.
pub fn close_owned_by(owner: u32) {
    for id in OPEN_FILES.ids() {
        if OPEN_FILES.with(id, |f| f.owner) == Ok(owner) {
            let _ = close_file(id);
        }
    }
}

/// Read a whole file into memory; the process loader's entry point.
pub fn load_file(full_path: &str) -> Result<Vec<u8>> {
    let file = open_file(full_path, OpenFlags::READ)?;
    let size = file_size(file)? as usize;
    let mut contents = alloc::vec![0u8; size];
    let mut done = 0usize;
    while done < size {
        let read = read_file(file, &mut contents[done..])? as usize;
        if read == 0 {
            break;
        }
        done += read;
    }
    let _ = close_file(file);
    contents.truncate(done);
    Ok(contents)
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::drivers::ramdisk::RamDisk;
    use crate::drivers::storage::register_disk;
    use crate::fs::partition::{FsFormat, PartitionScheme, TYPE_EXOS};
    use crate::fs::{register_volume, PartitionDescriptor};

    fn mount_ramfs() -> (FsId, String) {
        let disk = register_disk(std::sync::Arc::new(RamDisk::new(512, 64)));
        let descriptor = PartitionDescriptor {
            scheme: PartitionScheme::Virtual,
            type_byte: TYPE_EXOS,
            format: FsFormat::Exfs,
            start_sector: 0,
            sector_count: 64,
        };
        let name = crate::drivers::storage::DISKS
            .with(disk, |unit| std::format!("{}p0", unit.name))
            .unwrap();
        let id = register_volume(disk, name.clone(), descriptor).unwrap();
        (id, name)
    }

    #[test]
    fn open_write_reopen_read() {
        let (_, volume) = mount_ramfs();
        let path = std::format!("{volume}/notes.txt");
        let file = open_file(&path, OpenFlags::CREATE | OpenFlags::WRITE).unwrap();
        write_file(file, b"persisted").unwrap();
        close_file(file).unwrap();

        let again = open_file(&path, OpenFlags::READ).unwrap();
        assert_eq!(file_size(again).unwrap(), 9);
        let mut buffer = [0u8; 16];
        let read = read_file(again, &mut buffer).unwrap();
        assert_eq!(&buffer[..read as usize], b"persisted");
        close_file(again).unwrap();
    }

    #[test]
    fn position_advances_and_seeks() {
        let (_, volume) = mount_ramfs();
        let path = std::format!("{volume}/seek.bin");
        let file = open_file(&path, OpenFlags::CREATE | OpenFlags::WRITE | OpenFlags::READ).unwrap();
        write_file(file, b"0123456789").unwrap();
        assert_eq!(get_position(file).unwrap(), 10);
        set_position(file, 4).unwrap();
        let mut buffer = [0u8; 2];
        read_file(file, &mut buffer).unwrap();
        assert_eq!(&buffer, b"45");
        assert_eq!(get_position(file).unwrap(), 6);
        close_file(file).unwrap();
    }

    #[test]
    fn read_flag_is_enforced() {
        let (_, volume) = mount_ramfs();
        let path = std::format!("{volume}/wo.bin");
        let file = open_file(&path, OpenFlags::CREATE | OpenFlags::WRITE).unwrap();
        let mut buffer = [0u8; 4];
        assert_eq!(read_file(file, &mut buffer), Err(KernelError::NoPermission));
        close_file(file).unwrap();
    }

    #[test]
    fn find_iterates_a_directory() {
        let (id, volume) = mount_ramfs();
        let driver = FILESYSTEMS.with(id, |fs| fs.driver.clone().unwrap()).unwrap();
        driver.create_folder("d").unwrap();
        for name in ["d/a", "d/b", "d/c"] {
            let h = driver.open(name, OpenFlags::CREATE).unwrap();
            driver.close(h).unwrap();
        }

        let (iter, first) = find_first(&std::format!("{volume}/d")).unwrap();
        let mut names = std::vec![first.unwrap().name];
        while let Some(entry) = find_next(iter).unwrap() {
            names.push(entry.name);
        }
        assert_eq!(names, ["a", "b", "c"]);
        close_file(iter).unwrap();
    }

    #[test]
    fn unknown_volume_is_no_device() {
        assert_eq!(
            open_file("nosuch0p9/file", OpenFlags::READ).map(|_| ()),
            Err(KernelError::NoDevice)
        );
    }
}
