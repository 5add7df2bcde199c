//! In-memory filesystem.
//!
//! Backs the native boot volume: a tree of directories and byte-vector
//! files behind the uniform driver contract. Paths are `/`-separated and
//! volume-relative; the empty path is the root directory.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use spin::RwLock;

use super::file::{DirEntry, OpenFlags};
use super::FileSystemDriver;
use crate::error::{KernelError, Result};

enum Node {
    File(Vec<u8>),
    Directory(BTreeMap<String, Node>),
}

impl Node {
    fn dir(&self) -> Option<&BTreeMap<String, Node>> {
        match self {
            Node::Directory(children) => Some(children),
            Node::File(_) => None,
        }
    }

    fn dir_mut(&mut self) -> Option<&mut BTreeMap<String, Node>> {
        match self {
            Node::Directory(children) => Some(children),
            Node::File(_) => None,
        }
    }
}

struct Handles {
    paths: Vec<Option<String>>,
}

/// The in-memory tree driver.
pub struct RamFs {
    root: RwLock<Node>,
    handles: RwLock<Handles>,
}

impl Default for RamFs {
    fn default() -> Self {
        Self::new()
    }
}

impl RamFs {
    pub fn new() -> Self {
        Self {
            root: RwLock::new(Node::Directory(BTreeMap::new())),
            handles: RwLock::new(Handles { paths: Vec::new() }),
        }
    }

    fn components(path: &str) -> impl Iterator<Item = &str> {
        path.split('/').filter(|part| !part.is_empty())
    }

    fn with_node<R>(&self, path: &str, f: impl FnOnce(&Node) -> Result<R>) -> Result<R> {
        let root = self.root.read();
        let mut node = &*root;
        for part in Self::components(path) {
            node = node
                .dir()
                .and_then(|children| children.get(part))
                .ok_or(KernelError::NoDevice)?;
        }
        f(node)
    }

    fn with_parent<R>(
        &self,
        path: &str,
        f: impl FnOnce(&mut BTreeMap<String, Node>, &str) -> Result<R>,
    ) -> Result<R> {
        let mut parts: Vec<&str> = Self::components(path).collect();
        let leaf = parts.pop().ok_or(KernelError::BadParameter)?;
        let mut root = self.root.write();
        let mut node = &mut *root;
        for part in parts {
            node = node
                .dir_mut()
                .and_then(|children| children.get_mut(part))
                .ok_or(KernelError::NoDevice)?;
        }
        let children = node.dir_mut().ok_or(KernelError::BadParameter)?;
        f(children, leaf)
    }

    fn path_of(&self, handle: u32) -> Result<String> {
        self.handles
            .read()
            .paths
            .get(handle as usize)
            .and_then(|slot| slot.clone())
            .ok_or(KernelError::BadParameter)
    }
}

impl FileSystemDriver for RamFs {
    fn name(&self) -> &'static str {
        "ramfs"
    }

    fn open(&self, path: &str, flags: OpenFlags) -> Result<u32> {
        let exists = self.with_node(path, |node| match node {
            Node::File(_) => Ok(true),
            Node::Directory(_) => Err(KernelError::BadParameter),
        });
        match exists {
            Ok(true) => {}
            Err(KernelError::NoDevice) if flags.contains(OpenFlags::CREATE) => {
                self.with_parent(path, |children, leaf| {
                    children.insert(leaf.to_string(), Node::File(Vec::new()));
                    Ok(())
                })?;
            }
            Err(error) => return Err(error),
            Ok(false) => return Err(KernelError::Unexpected),
        }

        let mut handles = self.handles.write();
        for (index, slot) in handles.paths.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(path.to_string());
                return Ok(index as u32);
            }
        }
        handles.paths.push(Some(path.to_string()));
        Ok(handles.paths.len() as u32 - 1)
    }

    fn close(&self, handle: u32) -> Result<()> {
        let mut handles = self.handles.write();
        let slot = handles
            .paths
            .get_mut(handle as usize)
            .ok_or(KernelError::BadParameter)?;
        if slot.take().is_none() {
            return Err(KernelError::BadParameter);
        }
        Ok(())
    }

    fn read(&self, handle: u32, position: u64, buffer: &mut [u8]) -> Result<u32> {
        let path = self.path_of(handle)?;
        self.with_node(&path, |node| match node {
            Node::File(data) => {
                let start = (position as usize).min(data.len());
                let span = (data.len() - start).min(buffer.len());
                buffer[..span].copy_from_slice(&data[start..start + span]);
                Ok(span as u32)
            }
            Node::Directory(_) => Err(KernelError::BadParameter),
        })
    }

    fn write(&self, handle: u32, position: u64, data: &[u8]) -> Result<u32> {
        let path = self.path_of(handle)?;
        self.with_parent(&path, |children, leaf| {
            match children.get_mut(leaf) {
                Some(Node::File(contents)) => {
                    let end = position as usize + data.len();
                    if contents.len() < end {
                        contents.resize(end, 0);
                    }
                    contents[position as usize..end].copy_from_slice(data);
                    Ok(data.len() as u32)
                }
                _ => Err(KernelError::NoDevice),
            }
        })
    }

    fn size_of(&self, handle: u32) -> Result<u64> {
        let path = self.path_of(handle)?;
        self.with_node(&path, |node| match node {
            Node::File(data) => Ok(data.len() as u64),
            Node::Directory(_) => Err(KernelError::BadParameter),
        })
    }

    fn create_folder(&self, path: &str) -> Result<()> {
        self.with_parent(path, |children, leaf| {
            if children.contains_key(leaf) {
                return Err(KernelError::BadParameter);
            }
            children.insert(leaf.to_string(), Node::Directory(BTreeMap::new()));
            Ok(())
        })
    }

    fn delete(&self, path: &str) -> Result<()> {
        self.with_parent(path, |children, leaf| {
            match children.get(leaf) {
                Some(Node::Directory(entries)) if !entries.is_empty() => {
                    Err(KernelError::BadParameter)
                }
                Some(_) => {
                    children.remove(leaf);
                    Ok(())
                }
                None => Err(KernelError::NoDevice),
            }
        })
    }

    fn exists(&self, path: &str) -> bool {
        self.with_node(path, |_| Ok(())).is_ok()
    }

    fn list(&self, path: &str) -> Result<Vec<DirEntry>> {
        self.with_node(path, |node| {
            let children = node.dir().ok_or(KernelError::BadParameter)?;
            Ok(children
                .iter()
                .map(|(name, child)| DirEntry {
                    name: name.clone(),
                    directory: matches!(child, Node::Directory(_)),
                    size: match child {
                        Node::File(data) => data.len() as u64,
                        Node::Directory(_) => 0,
                    },
                })
                .collect())
        })
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn create_write_read() {
        let fs = RamFs::new();
        let handle = fs.open("hello.txt", OpenFlags::CREATE | OpenFlags::WRITE).unwrap();
        fs.write(handle, 0, b"hello exos").unwrap();
        assert_eq!(fs.size_of(handle).unwrap(), 10);

        let mut buffer = [0u8; 16];
        let read = fs.read(handle, 6, &mut buffer).unwrap();
        assert_eq!(&buffer[..read as usize], b"exos");
        fs.close(handle).unwrap();
    }

    #[test]
    fn folders_nest_and_list() {
        let fs = RamFs::new();
        fs.create_folder("bin").unwrap();
        fs.create_folder("bin/tools").unwrap();
        let f = fs.open("bin/tools/cmd", OpenFlags::CREATE | OpenFlags::WRITE).unwrap();
        fs.write(f, 0, &[1, 2, 3]).unwrap();

        let root = fs.list("").unwrap();
        assert_eq!(root.len(), 1);
        assert!(root[0].directory);

        let tools = fs.list("bin/tools").unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "cmd");
        assert_eq!(tools[0].size, 3);
        assert!(!tools[0].directory);
    }

    #[test]
    fn delete_refuses_populated_directories() {
        let fs = RamFs::new();
        fs.create_folder("dir").unwrap();
        let f = fs.open("dir/file", OpenFlags::CREATE).unwrap();
        fs.close(f).unwrap();
        assert_eq!(fs.delete("dir"), Err(KernelError::BadParameter));
        fs.delete("dir/file").unwrap();
        fs.delete("dir").unwrap();
        assert!(!fs.exists("dir"));
    }

    #[test]
    fn open_without_create_requires_existence() {
        let fs = RamFs::new();
        assert_eq!(
            fs.open("missing", OpenFlags::READ),
            Err(KernelError::NoDevice)
        );
    }

    #[test]
    fn sparse_writes_zero_fill() {
        let fs = RamFs::new();
        let handle = fs.open("sparse", OpenFlags::CREATE | OpenFlags::WRITE).unwrap();
        fs.write(handle, 100, b"x").unwrap();
        assert_eq!(fs.size_of(handle).unwrap(), 101);
        let mut buffer = [0xFFu8; 4];
        fs.read(handle, 0, &mut buffer).unwrap();
        assert_eq!(buffer, [0, 0, 0, 0]);
    }
}
